//! JSON-RPC 2.0 envelope model and response formatting.
//!
//! Request ids are echoed back verbatim, preserving their JSON type. An
//! absent or `null` id marks a notification, which never gets a response.

use serde::Deserialize;
use serde_json::{json, Map, Value};

pub const JSONRPC_VERSION: &str = "2.0";

// Standard JSON-RPC 2.0 error codes.
pub const PARSE_ERROR: i64 = -32700;
pub const INVALID_REQUEST: i64 = -32600;
pub const METHOD_NOT_FOUND: i64 = -32601;
pub const INVALID_PARAMS: i64 = -32602;
pub const INTERNAL_ERROR: i64 = -32603;

// Server-defined codes, in the reserved -32000..-32099 band.
pub const TOOL_EXECUTION_ERROR: i64 = -32000;
pub const AUTHENTICATION_ERROR: i64 = -32001;
pub const RATE_LIMIT_ERROR: i64 = -32002;

pub fn error_message(code: i64) -> &'static str {
    match code {
        PARSE_ERROR => "Parse error",
        INVALID_REQUEST => "Invalid Request",
        METHOD_NOT_FOUND => "Method not found",
        INVALID_PARAMS => "Invalid params",
        INTERNAL_ERROR => "Internal error",
        TOOL_EXECUTION_ERROR => "Tool execution error",
        AUTHENTICATION_ERROR => "Authentication required",
        RATE_LIMIT_ERROR => "Rate limit exceeded",
        _ => "Unknown error",
    }
}

#[derive(Debug, Deserialize)]
pub struct RpcEnvelope {
    pub jsonrpc: String,
    #[serde(default)]
    pub id: Value,
    pub method: String,
    #[serde(default)]
    pub params: Value,
}

impl RpcEnvelope {
    /// `None` for notifications.
    pub fn request_id(&self) -> Option<Value> {
        if self.id.is_null() {
            None
        } else {
            Some(self.id.clone())
        }
    }

    pub fn is_notification(&self) -> bool {
        self.id.is_null()
    }

    /// Envelope-level validity: exact version string, non-empty method,
    /// and an id that is absent, a string, or a number.
    pub fn has_valid_shape(&self) -> bool {
        self.jsonrpc == JSONRPC_VERSION
            && !self.method.trim().is_empty()
            && matches!(self.id, Value::Null | Value::String(_) | Value::Number(_))
    }
}

/// Best-effort id recovery from a payload that failed envelope
/// deserialization. Only string and number ids are echoed back.
pub fn recovered_id(payload: &Value) -> Option<Value> {
    match payload.get("id") {
        Some(id @ (Value::String(_) | Value::Number(_))) => Some(id.clone()),
        _ => None,
    }
}

pub fn json_rpc_result(id: Option<Value>, result: Value) -> Value {
    json!({
        "jsonrpc": JSONRPC_VERSION,
        "id": id.unwrap_or(Value::Null),
        "result": result,
    })
}

pub fn json_rpc_error(id: Option<Value>, code: i64, message: &str) -> Value {
    json_rpc_error_with_data(id, code, message, None)
}

pub fn json_rpc_error_with_data(
    id: Option<Value>,
    code: i64,
    message: &str,
    data: Option<Value>,
) -> Value {
    let mut error = Map::new();
    error.insert("code".to_string(), json!(code));
    error.insert("message".to_string(), json!(message));
    if let Some(data) = data {
        error.insert("data".to_string(), data);
    }

    json!({
        "jsonrpc": JSONRPC_VERSION,
        "id": id.unwrap_or(Value::Null),
        "error": Value::Object(error),
    })
}

pub fn is_json_rpc_error(value: &Value) -> bool {
    value.get("error").is_some()
}
