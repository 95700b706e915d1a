//! Per-client rate limiting with fixed one-minute windows.
//!
//! Buckets are keyed by client identity (first X-Forwarded-For hop, else
//! the peer address), hold a count plus a window-start timestamp, and are
//! process-local and ephemeral. The gate is off unless enabled in config.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

use axum::{
    extract::{ConnectInfo, Request, State},
    http::{HeaderName, HeaderValue},
    middleware::Next,
    response::Response,
};
use tracing::warn;

use crate::{errors::AppError, AppState};

pub const RATE_LIMIT_WINDOW: Duration = Duration::from_secs(60);

static LIMIT_HEADER: HeaderName = HeaderName::from_static("x-ratelimit-limit");
static REMAINING_HEADER: HeaderName = HeaderName::from_static("x-ratelimit-remaining");

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateDecision {
    Allowed { remaining: u32 },
    Limited { retry_after_secs: u64 },
}

struct Bucket {
    count: u32,
    window_start: Instant,
}

pub struct RateLimiter {
    max_per_window: u32,
    window: Duration,
    buckets: Mutex<HashMap<String, Bucket>>,
}

impl RateLimiter {
    pub fn new(max_per_window: u32) -> Self {
        Self::with_window(max_per_window, RATE_LIMIT_WINDOW)
    }

    pub fn with_window(max_per_window: u32, window: Duration) -> Self {
        Self {
            max_per_window,
            window,
            buckets: Mutex::new(HashMap::new()),
        }
    }

    pub fn limit(&self) -> u32 {
        self.max_per_window
    }

    pub fn check(&self, key: &str) -> RateDecision {
        let now = Instant::now();
        let mut buckets = self.table();
        let bucket = buckets.entry(key.to_string()).or_insert(Bucket {
            count: 0,
            window_start: now,
        });

        if now.duration_since(bucket.window_start) >= self.window {
            bucket.count = 0;
            bucket.window_start = now;
        }

        if bucket.count >= self.max_per_window {
            let elapsed = now.duration_since(bucket.window_start);
            let retry_after_secs = self.window.saturating_sub(elapsed).as_secs().max(1);
            return RateDecision::Limited { retry_after_secs };
        }

        bucket.count += 1;
        RateDecision::Allowed {
            remaining: self.max_per_window - bucket.count,
        }
    }

    fn table(&self) -> MutexGuard<'_, HashMap<String, Bucket>> {
        self.buckets
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

pub async fn enforce_rate_limit(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let Some(limiter) = state.rate_limiter.as_ref() else {
        return Ok(next.run(request).await);
    };

    let key = client_key(&request);
    match limiter.check(&key) {
        RateDecision::Limited { retry_after_secs } => {
            warn!(client = %key, "rate limit exceeded");
            Err(AppError::rate_limited(retry_after_secs))
        }
        RateDecision::Allowed { remaining } => {
            let limit = limiter.limit();
            let mut response = next.run(request).await;
            response
                .headers_mut()
                .insert(LIMIT_HEADER.clone(), HeaderValue::from(limit));
            response
                .headers_mut()
                .insert(REMAINING_HEADER.clone(), HeaderValue::from(remaining));
            Ok(response)
        }
    }
}

fn client_key(request: &Request) -> String {
    let forwarded = request
        .headers()
        .get("x-forwarded-for")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(',').next())
        .map(str::trim)
        .filter(|value| !value.is_empty());
    if let Some(first_hop) = forwarded {
        return first_hop.to_string();
    }

    request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn admits_up_to_the_limit_then_rejects() {
        let limiter = RateLimiter::new(3);

        assert_eq!(limiter.check("10.1.2.3"), RateDecision::Allowed { remaining: 2 });
        assert_eq!(limiter.check("10.1.2.3"), RateDecision::Allowed { remaining: 1 });
        assert_eq!(limiter.check("10.1.2.3"), RateDecision::Allowed { remaining: 0 });
        assert!(matches!(
            limiter.check("10.1.2.3"),
            RateDecision::Limited { retry_after_secs } if retry_after_secs >= 1
        ));
    }

    #[test]
    fn clients_are_limited_independently() {
        let limiter = RateLimiter::new(1);

        assert!(matches!(limiter.check("a"), RateDecision::Allowed { .. }));
        assert!(matches!(limiter.check("a"), RateDecision::Limited { .. }));
        assert!(matches!(limiter.check("b"), RateDecision::Allowed { .. }));
    }

    #[test]
    fn a_fresh_window_admits_again() {
        let limiter = RateLimiter::with_window(1, Duration::from_millis(20));

        assert!(matches!(limiter.check("a"), RateDecision::Allowed { .. }));
        assert!(matches!(limiter.check("a"), RateDecision::Limited { .. }));
        std::thread::sleep(Duration::from_millis(25));
        assert!(matches!(limiter.check("a"), RateDecision::Allowed { .. }));
    }
}
