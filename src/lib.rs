use std::sync::Arc;

use axum::{
    middleware,
    routing::{get, post},
    Router,
};

pub mod auth;
pub mod config;
pub mod errors;
pub mod http;
pub mod logging;
pub mod mcp;
pub mod providers;
pub mod rate_limit;
pub mod registry;
pub mod schema;
pub mod ssrf;
pub mod upstream;

use mcp::session::SessionManager;
use rate_limit::RateLimiter;
use registry::ToolRegistry;

#[derive(Clone)]
pub struct AppState {
    /// `None` is open mode: no authentication gate.
    pub auth_token: Option<Arc<str>>,
    /// `None` means rate limiting is disabled (the default).
    pub rate_limiter: Option<Arc<RateLimiter>>,
    pub registry: Arc<ToolRegistry>,
    pub sessions: Arc<SessionManager>,
}

impl AppState {
    pub fn new(
        auth_token: Option<String>,
        rate_limiter: Option<RateLimiter>,
        registry: ToolRegistry,
        sessions: Arc<SessionManager>,
    ) -> Self {
        Self {
            auth_token: auth_token.map(Arc::<str>::from),
            rate_limiter: rate_limiter.map(Arc::new),
            registry: Arc::new(registry),
            sessions,
        }
    }
}

pub fn build_app(state: AppState) -> Router {
    // Admission gates wrap only the protocol endpoints; auth runs first,
    // then rate limiting.
    let admitted = Router::new()
        .route("/sse", get(http::handlers::sse_endpoint))
        .route("/message", post(http::handlers::message_endpoint))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            rate_limit::enforce_rate_limit,
        ))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            auth::require_bearer_token,
        ));

    Router::new()
        .route("/health", get(http::handlers::health))
        .route("/", get(http::handlers::discovery))
        .merge(admitted)
        .layer(middleware::from_fn(logging::request_logging_middleware))
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use axum::{
        body::Body,
        extract::connect_info::ConnectInfo,
        http::{header, Request, StatusCode},
    };
    use futures_util::StreamExt;
    use http_body_util::BodyExt;
    use serde_json::{json, Value};
    use tower::ServiceExt;

    use crate::config::Config;
    use crate::mcp::rpc::{
        AUTHENTICATION_ERROR, INVALID_PARAMS, INVALID_REQUEST, METHOD_NOT_FOUND, PARSE_ERROR,
        RATE_LIMIT_ERROR,
    };

    use super::*;

    fn test_state(auth_token: Option<&str>, rate_limiter: Option<RateLimiter>) -> AppState {
        let config = Config::from_lookup(|_| None).expect("default config parses");
        let mut registry = ToolRegistry::new();
        providers::register_enabled(&mut registry, &config).expect("providers register");
        AppState::new(
            auth_token.map(str::to_string),
            rate_limiter,
            registry,
            SessionManager::new(),
        )
    }

    fn app() -> Router {
        build_app(test_state(None, None))
    }

    fn message_request(body: &str) -> Request<Body> {
        Request::builder()
            .uri("/message")
            .method("POST")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .expect("request build")
    }

    async fn body_json(response: axum::response::Response) -> Value {
        let body = response
            .into_body()
            .collect()
            .await
            .expect("collect body")
            .to_bytes();
        serde_json::from_slice(&body).expect("valid json response")
    }

    #[tokio::test]
    async fn health_is_public() {
        let response = app()
            .oneshot(
                Request::builder()
                    .uri("/health")
                    .method("GET")
                    .body(Body::empty())
                    .expect("request build"),
            )
            .await
            .expect("request execution");

        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["status"], "ok");
    }

    #[tokio::test]
    async fn discovery_lists_endpoints_and_tools() {
        let response = app()
            .oneshot(
                Request::builder()
                    .uri("/")
                    .method("GET")
                    .body(Body::empty())
                    .expect("request build"),
            )
            .await
            .expect("request execution");

        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["name"], env!("CARGO_PKG_NAME"));
        assert_eq!(body["endpoints"]["sse"], "/sse");
        assert_eq!(body["endpoints"]["message"], "/message");
        assert_eq!(body["tools_available"], 2);
    }

    #[tokio::test]
    async fn initialize_returns_protocol_version_and_server_info() {
        let response = app()
            .oneshot(message_request(
                r#"{"jsonrpc":"2.0","id":1,"method":"initialize","params":{"protocolVersion":"2024-11-05","capabilities":{},"clientInfo":{"name":"x","version":"1"}}}"#,
            ))
            .await
            .expect("request execution");

        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["jsonrpc"], "2.0");
        assert_eq!(body["id"], 1);
        assert_eq!(body["result"]["protocolVersion"], "2024-11-05");
        assert_eq!(body["result"]["serverInfo"]["name"], env!("CARGO_PKG_NAME"));
        assert!(body["result"]["capabilities"]["tools"].is_object());
    }

    #[tokio::test]
    async fn initialized_notification_gets_empty_acknowledgment() {
        let response = app()
            .oneshot(message_request(
                r#"{"jsonrpc":"2.0","method":"notifications/initialized"}"#,
            ))
            .await
            .expect("request execution");

        assert_eq!(response.status(), StatusCode::NO_CONTENT);
        let body = response
            .into_body()
            .collect()
            .await
            .expect("collect body")
            .to_bytes();
        assert!(body.is_empty());
    }

    #[tokio::test]
    async fn notifications_never_get_responses_even_for_unknown_methods() {
        let response = app()
            .oneshot(message_request(r#"{"jsonrpc":"2.0","method":"no/such/method"}"#))
            .await
            .expect("request execution");

        assert_eq!(response.status(), StatusCode::NO_CONTENT);
    }

    #[tokio::test]
    async fn invalid_json_yields_parse_error_with_null_id() {
        let response = app()
            .oneshot(message_request("not valid json{"))
            .await
            .expect("request execution");

        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["id"], Value::Null);
        assert_eq!(body["error"]["code"], json!(PARSE_ERROR));
    }

    #[tokio::test]
    async fn wrong_protocol_version_yields_invalid_request() {
        let response = app()
            .oneshot(message_request(r#"{"jsonrpc":"1.0","id":1,"method":"initialize"}"#))
            .await
            .expect("request execution");

        let body = body_json(response).await;
        assert_eq!(body["id"], 1);
        assert_eq!(body["error"]["code"], json!(INVALID_REQUEST));
    }

    #[tokio::test]
    async fn unknown_method_yields_method_not_found() {
        let response = app()
            .oneshot(message_request(r#"{"jsonrpc":"2.0","id":5,"method":"tools/rename"}"#))
            .await
            .expect("request execution");

        let body = body_json(response).await;
        assert_eq!(body["id"], 5);
        assert_eq!(body["error"]["code"], json!(METHOD_NOT_FOUND));
    }

    #[tokio::test]
    async fn request_ids_are_echoed_type_preserving() {
        for (raw_id, expected) in [("0", json!(0)), (r#""""#, json!("")), (r#""abc""#, json!("abc"))]
        {
            let response = app()
                .oneshot(message_request(&format!(
                    r#"{{"jsonrpc":"2.0","id":{raw_id},"method":"tools/list"}}"#
                )))
                .await
                .expect("request execution");

            let body = body_json(response).await;
            assert_eq!(body["id"], expected);
        }
    }

    #[tokio::test]
    async fn tools_list_returns_example_tools_with_schemas() {
        let response = app()
            .oneshot(message_request(
                r#"{"jsonrpc":"2.0","id":2,"method":"tools/list","params":{}}"#,
            ))
            .await
            .expect("request execution");

        let body = body_json(response).await;
        assert_eq!(body["id"], 2);
        let tools = body["result"]["tools"].as_array().expect("tools array");
        assert_eq!(tools.len(), 2);
        assert_eq!(tools[0]["name"], "example-ping");
        assert_eq!(tools[1]["name"], "example-echo");
        for tool in tools {
            assert!(tool["description"].as_str().is_some());
            assert_eq!(tool["inputSchema"]["type"], "object");
        }
        assert_eq!(tools[1]["inputSchema"]["required"], json!(["message"]));
    }

    #[tokio::test]
    async fn tools_call_echo_returns_content() {
        let response = app()
            .oneshot(message_request(
                r#"{"jsonrpc":"2.0","id":2,"method":"tools/call","params":{"name":"example-echo","arguments":{"message":"hi"}}}"#,
            ))
            .await
            .expect("request execution");

        let body = body_json(response).await;
        assert_eq!(body["id"], 2);
        assert_eq!(body["result"]["isError"], json!(false));
        assert_eq!(body["result"]["content"][0]["type"], "text");
        assert_eq!(body["result"]["content"][0]["text"], "Echo: hi");
    }

    #[tokio::test]
    async fn tools_call_unknown_tool_is_a_protocol_error() {
        let response = app()
            .oneshot(message_request(
                r#"{"jsonrpc":"2.0","id":3,"method":"tools/call","params":{"name":"does-not-exist","arguments":{}}}"#,
            ))
            .await
            .expect("request execution");

        let body = body_json(response).await;
        assert_eq!(body["id"], 3);
        assert!(body.get("result").is_none());
        assert_eq!(body["error"]["code"], json!(INVALID_PARAMS));
        assert_eq!(body["error"]["data"]["code"], "tool_not_found");
        assert_eq!(body["error"]["data"]["details"]["name"], "does-not-exist");
    }

    #[tokio::test]
    async fn tools_call_with_missing_required_argument_is_invalid_params() {
        let response = app()
            .oneshot(message_request(
                r#"{"jsonrpc":"2.0","id":4,"method":"tools/call","params":{"name":"example-echo","arguments":{}}}"#,
            ))
            .await
            .expect("request execution");

        let body = body_json(response).await;
        assert_eq!(body["id"], 4);
        assert_eq!(body["error"]["code"], json!(INVALID_PARAMS));
        assert_eq!(body["error"]["data"]["code"], "invalid_arguments");
    }

    #[tokio::test]
    async fn tools_call_with_malformed_params_is_invalid_params() {
        let response = app()
            .oneshot(message_request(
                r#"{"jsonrpc":"2.0","id":6,"method":"tools/call","params":{"arguments":"not-an-object"}}"#,
            ))
            .await
            .expect("request execution");

        let body = body_json(response).await;
        assert_eq!(body["id"], 6);
        assert_eq!(body["error"]["code"], json!(INVALID_PARAMS));
    }

    #[tokio::test]
    async fn configured_token_rejects_missing_and_wrong_bearer() {
        let app = build_app(test_state(Some("token-1234567890ab"), None));

        let response = app
            .clone()
            .oneshot(message_request(r#"{"jsonrpc":"2.0","id":1,"method":"tools/list"}"#))
            .await
            .expect("request execution");
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        let body = body_json(response).await;
        assert_eq!(body["error"]["code"], json!(AUTHENTICATION_ERROR));

        let mut wrong = message_request(r#"{"jsonrpc":"2.0","id":1,"method":"tools/list"}"#);
        wrong.headers_mut().insert(
            header::AUTHORIZATION,
            "Bearer wrong-token".parse().expect("header value"),
        );
        let response = app.clone().oneshot(wrong).await.expect("request execution");
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let mut valid = message_request(r#"{"jsonrpc":"2.0","id":1,"method":"tools/list"}"#);
        valid.headers_mut().insert(
            header::AUTHORIZATION,
            "Bearer token-1234567890ab".parse().expect("header value"),
        );
        let response = app.oneshot(valid).await.expect("request execution");
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn health_stays_public_when_token_is_configured() {
        let response = build_app(test_state(Some("token-1234567890ab"), None))
            .oneshot(
                Request::builder()
                    .uri("/health")
                    .method("GET")
                    .body(Body::empty())
                    .expect("request build"),
            )
            .await
            .expect("request execution");

        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn rate_limit_rejects_after_the_window_budget() {
        let app = build_app(test_state(None, Some(RateLimiter::new(2))));
        let peer = ConnectInfo(std::net::SocketAddr::from(([10, 1, 2, 3], 9000)));

        for _ in 0..2 {
            let mut request =
                message_request(r#"{"jsonrpc":"2.0","id":1,"method":"tools/list"}"#);
            request.extensions_mut().insert(peer);
            let response = app.clone().oneshot(request).await.expect("request execution");
            assert_eq!(response.status(), StatusCode::OK);
            assert_eq!(
                response
                    .headers()
                    .get("x-ratelimit-limit")
                    .and_then(|value| value.to_str().ok()),
                Some("2")
            );
        }

        let mut request = message_request(r#"{"jsonrpc":"2.0","id":1,"method":"tools/list"}"#);
        request.extensions_mut().insert(peer);
        let response = app.clone().oneshot(request).await.expect("request execution");
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert!(response.headers().get(header::RETRY_AFTER).is_some());
        let body = body_json(response).await;
        assert_eq!(body["error"]["code"], json!(RATE_LIMIT_ERROR));

        // A different client identity still gets through.
        let mut request = message_request(r#"{"jsonrpc":"2.0","id":1,"method":"tools/list"}"#);
        request
            .extensions_mut()
            .insert(ConnectInfo(std::net::SocketAddr::from(([10, 9, 9, 9], 9000))));
        let response = app.oneshot(request).await.expect("request execution");
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn sse_stream_opens_with_endpoint_event_and_mirrors_responses() {
        let state = test_state(None, None);
        let app = build_app(state.clone());

        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .uri("/sse")
                    .method("GET")
                    .body(Body::empty())
                    .expect("request build"),
            )
            .await
            .expect("request execution");
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response
                .headers()
                .get(header::CONTENT_TYPE)
                .and_then(|value| value.to_str().ok()),
            Some("text/event-stream")
        );

        let mut frames = response.into_body().into_data_stream();
        let first = frames.next().await.expect("first frame").expect("frame bytes");
        let first = String::from_utf8(first.to_vec()).expect("utf8 frame");
        assert!(first.contains("event: endpoint"));

        let endpoint = first
            .lines()
            .find_map(|line| line.strip_prefix("data: "))
            .expect("endpoint data line");
        let session_id = endpoint
            .split("session_id=")
            .nth(1)
            .expect("session id in endpoint")
            .trim()
            .to_string();
        assert_eq!(endpoint, format!("/message?session_id={session_id}"));
        assert_eq!(state.sessions.session_count(), 1);

        // A request posted with that session id is answered directly and
        // mirrored onto the stream.
        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .uri(format!("/message?session_id={session_id}"))
                    .method("POST")
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from(
                        r#"{"jsonrpc":"2.0","id":7,"method":"tools/call","params":{"name":"example-ping","arguments":{}}}"#,
                    ))
                    .expect("request build"),
            )
            .await
            .expect("request execution");
        assert_eq!(response.status(), StatusCode::OK);
        let direct = body_json(response).await;
        assert_eq!(direct["id"], 7);
        assert_eq!(direct["result"]["isError"], json!(false));

        let mirrored = frames.next().await.expect("message frame").expect("frame bytes");
        let mirrored = String::from_utf8(mirrored.to_vec()).expect("utf8 frame");
        assert!(mirrored.contains("event: message"));
        assert!(mirrored.contains("\"id\":7"));
    }

    #[tokio::test]
    async fn unknown_session_id_still_returns_the_direct_response() {
        let response = app()
            .oneshot(
                Request::builder()
                    .uri("/message?session_id=00000000-0000-0000-0000-000000000000")
                    .method("POST")
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from(r#"{"jsonrpc":"2.0","id":9,"method":"tools/list"}"#))
                    .expect("request build"),
            )
            .await
            .expect("request execution");

        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["id"], 9);
        assert!(body["result"]["tools"].is_array());
    }
}
