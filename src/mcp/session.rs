//! Session bookkeeping for the streaming transport.
//!
//! Sessions are process-local and never persisted. All table mutations go
//! through one mutex, which is never held across an await; tool calls and
//! upstream fetches happen entirely outside it. A session past the idle
//! window counts as closed on first observation, so an expired id can
//! never be resurrected.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde_json::Value;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::task::JoinHandle;
use tracing::{debug, info};
use uuid::Uuid;

use crate::mcp::rpc::INTERNAL_ERROR;

pub const SESSION_IDLE_TIMEOUT: Duration = Duration::from_secs(30 * 60);
pub const SWEEP_INTERVAL: Duration = Duration::from_secs(60);
pub const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(30);

/// One event on a session's outbound queue, in arrival order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    /// First event on every stream: the address to post messages to.
    Endpoint(String),
    /// A JSON-RPC response mirrored onto the stream.
    Message(Value),
    /// Keepalive with an empty payload.
    Ping,
    /// Out-of-band failure notice.
    Error { code: i64, message: String },
}

/// Delivery is best-effort: pushing to a closed or unknown session is a
/// soft failure, not an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    Delivered,
    Dropped,
}

struct Session {
    created_at: DateTime<Utc>,
    last_activity: Instant,
    tx: UnboundedSender<StreamEvent>,
}

pub struct SessionManager {
    sessions: Mutex<HashMap<String, Session>>,
    idle_timeout: Duration,
}

impl SessionManager {
    pub fn new() -> Arc<Self> {
        Self::with_idle_timeout(SESSION_IDLE_TIMEOUT)
    }

    pub fn with_idle_timeout(idle_timeout: Duration) -> Arc<Self> {
        Arc::new(Self {
            sessions: Mutex::new(HashMap::new()),
            idle_timeout,
        })
    }

    /// Creates a fresh session and hands back the receiving half of its
    /// event queue, to be drained by exactly one stream handler.
    pub fn create(&self) -> (String, UnboundedReceiver<StreamEvent>) {
        let session_id = Uuid::new_v4().to_string();
        let (tx, rx) = mpsc::unbounded_channel();

        self.table().insert(
            session_id.clone(),
            Session {
                created_at: Utc::now(),
                last_activity: Instant::now(),
                tx,
            },
        );

        info!(session_id = %session_id, "session created");
        (session_id, rx)
    }

    /// Resets the activity clock. Returns false for unknown, closed, or
    /// just-expired sessions.
    pub fn touch(&self, session_id: &str) -> bool {
        let mut sessions = self.table();
        let expired = match sessions.get_mut(session_id) {
            None => return false,
            Some(session) => {
                if session.last_activity.elapsed() > self.idle_timeout {
                    true
                } else {
                    session.last_activity = Instant::now();
                    false
                }
            }
        };

        if expired {
            drop_session(&mut sessions, session_id, "idle");
            return false;
        }
        true
    }

    pub fn push(&self, session_id: &str, event: StreamEvent) -> PushOutcome {
        let mut sessions = self.table();
        let delivery = match sessions.get(session_id) {
            None => {
                debug!(session_id = %session_id, "event dropped, session not found");
                return PushOutcome::Dropped;
            }
            Some(session) => {
                if session.last_activity.elapsed() > self.idle_timeout {
                    Err("idle")
                } else if session.tx.send(event).is_err() {
                    // Receiver gone: the stream handler terminated without
                    // its guard firing yet.
                    Err("stream gone")
                } else {
                    Ok(())
                }
            }
        };

        match delivery {
            Ok(()) => PushOutcome::Delivered,
            Err(reason) => {
                drop_session(&mut sessions, session_id, reason);
                PushOutcome::Dropped
            }
        }
    }

    /// Closes a session immediately, e.g. on transport disconnect.
    pub fn close(&self, session_id: &str) {
        drop_session(&mut self.table(), session_id, "disconnect");
    }

    /// Closes every session past the idle window, notifying its stream
    /// first. Returns the number of sessions closed.
    pub fn sweep(&self) -> usize {
        let mut sessions = self.table();
        let expired: Vec<String> = sessions
            .iter()
            .filter(|(_, session)| session.last_activity.elapsed() > self.idle_timeout)
            .map(|(session_id, _)| session_id.clone())
            .collect();

        for session_id in &expired {
            if let Some(session) = sessions.remove(session_id) {
                let _ = session.tx.send(StreamEvent::Error {
                    code: INTERNAL_ERROR,
                    message: "session expired due to inactivity".to_string(),
                });
                log_closed(session_id, &session, "idle");
            }
        }

        expired.len()
    }

    /// Emits a keepalive ping on every active session. Sessions whose
    /// stream has gone away are dropped; idle ones are left for the sweep.
    pub fn keepalive(&self) {
        let mut sessions = self.table();
        let idle_timeout = self.idle_timeout;
        sessions.retain(|session_id, session| {
            if session.last_activity.elapsed() > idle_timeout {
                return true;
            }
            let alive = session.tx.send(StreamEvent::Ping).is_ok();
            if !alive {
                log_closed(session_id, session, "stream gone");
            }
            alive
        });
    }

    pub fn session_count(&self) -> usize {
        self.table().len()
    }

    pub fn spawn_background_tasks(self: &Arc<Self>) -> (JoinHandle<()>, JoinHandle<()>) {
        let sweeper = {
            let manager = Arc::clone(self);
            tokio::spawn(async move {
                let mut ticker = tokio::time::interval(SWEEP_INTERVAL);
                ticker.tick().await;
                loop {
                    ticker.tick().await;
                    let closed = manager.sweep();
                    if closed > 0 {
                        info!(closed, "idle sessions swept");
                    }
                }
            })
        };

        let keepalive = {
            let manager = Arc::clone(self);
            tokio::spawn(async move {
                let mut ticker = tokio::time::interval(KEEPALIVE_INTERVAL);
                ticker.tick().await;
                loop {
                    ticker.tick().await;
                    manager.keepalive();
                }
            })
        };

        (sweeper, keepalive)
    }

    fn table(&self) -> MutexGuard<'_, HashMap<String, Session>> {
        self.sessions
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn drop_session(
    sessions: &mut MutexGuard<'_, HashMap<String, Session>>,
    session_id: &str,
    reason: &'static str,
) {
    if let Some(session) = sessions.remove(session_id) {
        log_closed(session_id, &session, reason);
    }
}

fn log_closed(session_id: &str, session: &Session, reason: &'static str) {
    info!(
        session_id = %session_id,
        reason,
        age_secs = (Utc::now() - session.created_at).num_seconds(),
        "session closed"
    );
}
