//! Axum handlers for the transport surface.
//!
//! `/sse` opens the event stream: an `endpoint` event first, then
//! `message`, `ping`, and `error` events for that session. `/message`
//! accepts one JSON-RPC envelope per call and, when a valid session id is
//! attached, mirrors the response onto that session's stream.

use std::convert::Infallible;
use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{Query, State},
    http::StatusCode,
    response::{
        sse::{Event, Sse},
        IntoResponse, Response,
    },
    Json,
};
use futures_util::stream::{self, Stream, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, info};

use crate::mcp::server::{handle_payload, SUPPORTED_PROTOCOL_VERSION};
use crate::mcp::session::{PushOutcome, SessionManager, StreamEvent};
use crate::AppState;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
}

#[derive(Debug, Serialize)]
pub struct DiscoveryResponse {
    pub name: &'static str,
    pub version: &'static str,
    pub protocol_version: &'static str,
    pub endpoints: DiscoveryEndpoints,
    pub tools_available: usize,
}

#[derive(Debug, Serialize)]
pub struct DiscoveryEndpoints {
    pub health: &'static str,
    pub sse: &'static str,
    pub message: &'static str,
}

pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse { status: "ok" })
}

pub async fn discovery(State(state): State<AppState>) -> Json<DiscoveryResponse> {
    Json(DiscoveryResponse {
        name: env!("CARGO_PKG_NAME"),
        version: env!("CARGO_PKG_VERSION"),
        protocol_version: SUPPORTED_PROTOCOL_VERSION,
        endpoints: DiscoveryEndpoints {
            health: "/health",
            sse: "/sse",
            message: "/message",
        },
        tools_available: state.registry.tool_count(),
    })
}

pub async fn sse_endpoint(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let (session_id, rx) = state.sessions.create();
    let endpoint = format!("/message?session_id={session_id}");
    info!(session_id = %session_id, "stream opened");

    // Dropping the stream (client disconnect) closes the session via the
    // guard; in-flight pushes become soft no-ops from then on.
    let guard = StreamGuard {
        sessions: Arc::clone(&state.sessions),
        session_id,
    };

    let first = stream::once(std::future::ready(Ok::<Event, Infallible>(
        Event::default().event("endpoint").data(endpoint),
    )));
    let rest = stream::unfold((rx, guard), |(mut rx, guard)| async move {
        let event = rx.recv().await?;
        Some((Ok::<Event, Infallible>(sse_event(event)), (rx, guard)))
    });

    Sse::new(first.chain(rest))
}

struct StreamGuard {
    sessions: Arc<SessionManager>,
    session_id: String,
}

impl Drop for StreamGuard {
    fn drop(&mut self) {
        self.sessions.close(&self.session_id);
    }
}

fn sse_event(event: StreamEvent) -> Event {
    match event {
        StreamEvent::Endpoint(address) => Event::default().event("endpoint").data(address),
        StreamEvent::Message(response) => {
            Event::default().event("message").data(response.to_string())
        }
        StreamEvent::Ping => Event::default().event("ping").data(""),
        StreamEvent::Error { code, message } => Event::default()
            .event("error")
            .data(json!({ "code": code, "message": message }).to_string()),
    }
}

#[derive(Debug, Deserialize)]
pub struct MessageQuery {
    pub session_id: Option<String>,
}

pub async fn message_endpoint(
    State(state): State<AppState>,
    Query(query): Query<MessageQuery>,
    body: Bytes,
) -> Response {
    if let Some(session_id) = query.session_id.as_deref() {
        // Inbound activity keeps the session alive while the call runs.
        state.sessions.touch(session_id);
    }

    let Some(response) = handle_payload(&state, &body).await else {
        return StatusCode::NO_CONTENT.into_response();
    };

    if let Some(session_id) = query.session_id.as_deref() {
        let pushed = state
            .sessions
            .push(session_id, StreamEvent::Message(response.clone()));
        if pushed == PushOutcome::Dropped {
            debug!(session_id = %session_id, "response not mirrored, session gone");
        }
    }

    (StatusCode::OK, Json(response)).into_response()
}
