use axum::{
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

use crate::mcp::rpc::{self, AUTHENTICATION_ERROR, RATE_LIMIT_ERROR};

/// Admission and infrastructure failures surfaced at the HTTP boundary.
/// Rejections carry a JSON-RPC-shaped body so clients can branch on the
/// same code table as protocol errors.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("unauthorized: {message}")]
    Unauthorized {
        code: &'static str,
        message: &'static str,
    },
    #[error("rate limit exceeded")]
    RateLimited { retry_after_secs: u64 },
    #[error("internal error")]
    Internal { message: String },
}

impl AppError {
    pub fn unauthorized(code: &'static str, message: &'static str) -> Self {
        Self::Unauthorized { code, message }
    }

    pub fn rate_limited(retry_after_secs: u64) -> Self {
        Self::RateLimited { retry_after_secs }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        match self {
            Self::Unauthorized { code, message } => {
                let body = rpc::json_rpc_error_with_data(
                    None,
                    AUTHENTICATION_ERROR,
                    rpc::error_message(AUTHENTICATION_ERROR),
                    Some(json!({ "code": code, "message": message })),
                );
                (StatusCode::UNAUTHORIZED, Json(body)).into_response()
            }
            Self::RateLimited { retry_after_secs } => {
                let body = rpc::json_rpc_error(
                    None,
                    RATE_LIMIT_ERROR,
                    rpc::error_message(RATE_LIMIT_ERROR),
                );
                let mut response =
                    (StatusCode::TOO_MANY_REQUESTS, Json(body)).into_response();
                response
                    .headers_mut()
                    .insert(header::RETRY_AFTER, HeaderValue::from(retry_after_secs));
                response
            }
            Self::Internal { message } => {
                tracing::error!(error = %message, "request failed with internal error");
                let body = json!({
                    "code": "internal_error",
                    "message": "internal server error",
                });
                (StatusCode::INTERNAL_SERVER_ERROR, Json(body)).into_response()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unauthorized_maps_to_401_with_rpc_body() {
        let response =
            AppError::unauthorized("missing_token", "missing authorization header")
                .into_response();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[test]
    fn rate_limited_sets_retry_after() {
        let response = AppError::rate_limited(42).into_response();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(
            response.headers().get(header::RETRY_AFTER),
            Some(&HeaderValue::from(42u64))
        );
    }
}
