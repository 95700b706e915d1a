//! The JSON-RPC engine: payload decoding, envelope validation, and method
//! routing for `initialize`, `notifications/initialized`, `tools/list`,
//! and `tools/call`.
//!
//! Processing order: parse (-32700 with null id), envelope shape (-32600),
//! method routing (-32601), params (-32602), anything unanticipated
//! (-32603, details kept server-side). Notifications never produce a
//! response, whatever the outcome.

use serde::Deserialize;
use serde_json::{json, Map, Value};
use tracing::info;

use crate::mcp::rpc::{
    error_message, is_json_rpc_error, json_rpc_error, json_rpc_error_with_data, json_rpc_result,
    recovered_id, RpcEnvelope, INTERNAL_ERROR, INVALID_PARAMS, INVALID_REQUEST, METHOD_NOT_FOUND,
    PARSE_ERROR,
};
use crate::registry::InvokeError;
use crate::AppState;

pub const SUPPORTED_PROTOCOL_VERSION: &str = "2024-11-05";

/// Decodes one raw payload and processes it. `None` means no response is
/// owed (the payload was a notification).
pub async fn handle_payload(state: &AppState, body: &[u8]) -> Option<Value> {
    let payload: Value = match serde_json::from_slice(body) {
        Ok(value) => value,
        Err(_) => {
            return Some(json_rpc_error(None, PARSE_ERROR, error_message(PARSE_ERROR)));
        }
    };
    handle_json_rpc_value(state, payload).await
}

pub async fn handle_json_rpc_value(state: &AppState, payload: Value) -> Option<Value> {
    if !payload.is_object() {
        return Some(json_rpc_error(
            None,
            INVALID_REQUEST,
            error_message(INVALID_REQUEST),
        ));
    }

    let fallback_id = recovered_id(&payload);
    let envelope: RpcEnvelope = match serde_json::from_value(payload) {
        Ok(envelope) => envelope,
        Err(_) => {
            return Some(json_rpc_error(
                fallback_id,
                INVALID_REQUEST,
                error_message(INVALID_REQUEST),
            ));
        }
    };
    if !envelope.has_valid_shape() {
        return Some(json_rpc_error(
            fallback_id,
            INVALID_REQUEST,
            error_message(INVALID_REQUEST),
        ));
    }

    let request_id = envelope.request_id();
    if envelope.is_notification() {
        let _ = dispatch(state, None, &envelope.method, envelope.params).await;
        return None;
    }

    Some(dispatch(state, request_id, &envelope.method, envelope.params).await)
}

async fn dispatch(state: &AppState, id: Option<Value>, method: &str, params: Value) -> Value {
    let audit_params = redact_params(&params);

    let response = match method {
        "initialize" => json_rpc_result(id, initialize_result()),
        "notifications/initialized" => json_rpc_result(id, json!({})),
        "tools/list" => json_rpc_result(id, json!({ "tools": state.registry.describe() })),
        "tools/call" => handle_tools_call(state, id, params).await,
        _ => json_rpc_error(id, METHOD_NOT_FOUND, error_message(METHOD_NOT_FOUND)),
    };

    info!(
        method = %method,
        params = %audit_params,
        outcome = if is_json_rpc_error(&response) { "failure" } else { "success" },
        "rpc call handled"
    );

    response
}

/// Lenient by design: initialize params are advisory, the server always
/// states the protocol version it speaks, and repeat calls are harmless.
fn initialize_result() -> Value {
    json!({
        "protocolVersion": SUPPORTED_PROTOCOL_VERSION,
        "capabilities": { "tools": {} },
        "serverInfo": {
            "name": env!("CARGO_PKG_NAME"),
            "version": env!("CARGO_PKG_VERSION"),
        },
    })
}

#[derive(Debug, Deserialize)]
struct ToolCallParams {
    name: String,
    #[serde(default = "empty_arguments")]
    arguments: Value,
}

fn empty_arguments() -> Value {
    Value::Object(Map::new())
}

async fn handle_tools_call(state: &AppState, id: Option<Value>, params: Value) -> Value {
    let call: ToolCallParams = match serde_json::from_value(params) {
        Ok(call) => call,
        Err(_) => {
            return json_rpc_error(id, INVALID_PARAMS, error_message(INVALID_PARAMS));
        }
    };

    match state.registry.invoke(&call.name, call.arguments).await {
        Ok(outcome) => json_rpc_result(
            id,
            serde_json::to_value(outcome).expect("tool outcome serialization"),
        ),
        // Unknown tool is a protocol-level condition, not a tool result.
        Err(InvokeError::NotFound(name)) => json_rpc_error_with_data(
            id,
            INVALID_PARAMS,
            error_message(INVALID_PARAMS),
            Some(json!({
                "code": "tool_not_found",
                "message": "unknown tool name",
                "details": { "name": name },
            })),
        ),
        Err(InvokeError::InvalidArguments(err)) => json_rpc_error_with_data(
            id,
            INVALID_PARAMS,
            error_message(INVALID_PARAMS),
            Some(json!({
                "code": "invalid_arguments",
                "message": err.to_string(),
                "details": {},
            })),
        ),
        Err(InvokeError::Internal) => {
            json_rpc_error(id, INTERNAL_ERROR, error_message(INTERNAL_ERROR))
        }
    }
}

fn redact_params(value: &Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(key, item)| {
                    if is_sensitive_key(key) {
                        (key.clone(), Value::String("[REDACTED]".to_string()))
                    } else {
                        (key.clone(), redact_params(item))
                    }
                })
                .collect(),
        ),
        Value::Array(items) => Value::Array(items.iter().map(redact_params).collect()),
        _ => value.clone(),
    }
}

fn is_sensitive_key(key: &str) -> bool {
    let normalized = key.trim().to_ascii_lowercase();
    ["token", "secret", "password", "credential", "api_key", "apikey", "authorization", "bearer"]
        .iter()
        .any(|fragment| normalized.contains(fragment))
}
