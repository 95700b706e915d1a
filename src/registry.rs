//! Tool registry: named, schema-described capabilities backed by async
//! handlers.
//!
//! Registration happens once at startup, before any request is served.
//! Invocation distinguishes protocol-level failures (unknown tool, bad
//! arguments) from tool-level failures, which are captured into an
//! `isError` outcome instead of propagating.

use std::{collections::HashMap, sync::Arc, time::Duration};

use async_trait::async_trait;
use serde::Serialize;
use serde_json::{json, Value};
use thiserror::Error;
use tracing::{error, info, warn};

use crate::schema::{Schema, SchemaError};
use crate::ssrf::SsrfError;

/// Result unit produced by tool handlers. Order is presentation order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Content {
    Text {
        text: String,
    },
    Image {
        data: String,
        #[serde(rename = "mimeType")]
        mime_type: String,
    },
}

impl Content {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }

    pub fn image(data: impl Into<String>, mime_type: impl Into<String>) -> Self {
        Self::Image {
            data: data.into(),
            mime_type: mime_type.into(),
        }
    }
}

/// Failure inside a tool handler: the RPC layer did its job, the tool's
/// external dependency did not. Reported as an `isError` result.
#[derive(Debug, Error)]
pub enum ToolError {
    #[error("upstream request failed: {0}")]
    Upstream(String),
    #[error("upstream response was not understood: {0}")]
    Malformed(String),
    #[error("blocked outbound address: {0}")]
    UnsafeAddress(String),
    #[error("{0}")]
    Invalid(String),
}

impl From<reqwest::Error> for ToolError {
    fn from(err: reqwest::Error) -> Self {
        Self::Upstream(err.to_string())
    }
}

impl From<SsrfError> for ToolError {
    fn from(err: SsrfError) -> Self {
        Self::UnsafeAddress(err.to_string())
    }
}

#[async_trait]
pub trait ToolHandler: Send + Sync {
    async fn call(&self, arguments: Value) -> Result<Vec<Content>, ToolError>;
}

pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub input_schema: Schema,
    pub timeout: Duration,
    pub handler: Arc<dyn ToolHandler>,
}

impl ToolDefinition {
    pub fn new(
        name: &str,
        description: &str,
        input_schema: Schema,
        timeout: Duration,
        handler: Arc<dyn ToolHandler>,
    ) -> Self {
        Self {
            name: name.to_string(),
            description: description.to_string(),
            input_schema,
            timeout,
            handler,
        }
    }
}

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("tool '{0}' is already registered")]
    DuplicateTool(String),
    #[error("tool '{name}' has an invalid input schema: {detail}")]
    InvalidSchema { name: String, detail: String },
    #[error("provider setup failed: {0}")]
    Provider(String),
}

/// Protocol-level invocation failure, surfaced as a JSON-RPC error.
#[derive(Debug, Error)]
pub enum InvokeError {
    #[error("unknown tool '{0}'")]
    NotFound(String),
    #[error("{0}")]
    InvalidArguments(#[from] SchemaError),
    #[error("tool execution failed unexpectedly")]
    Internal,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolOutcome {
    pub content: Vec<Content>,
    pub is_error: bool,
}

impl ToolOutcome {
    pub fn success(content: Vec<Content>) -> Self {
        Self {
            content,
            is_error: false,
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            content: vec![Content::text(message)],
            is_error: true,
        }
    }
}

#[derive(Default)]
pub struct ToolRegistry {
    tools: Vec<ToolDefinition>,
    index: HashMap<String, usize>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, definition: ToolDefinition) -> Result<(), RegistryError> {
        if self.index.contains_key(&definition.name) {
            return Err(RegistryError::DuplicateTool(definition.name));
        }
        definition
            .input_schema
            .check_structure()
            .map_err(|detail| RegistryError::InvalidSchema {
                name: definition.name.clone(),
                detail,
            })?;

        info!(tool = %definition.name, "registered tool");
        self.index.insert(definition.name.clone(), self.tools.len());
        self.tools.push(definition);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&ToolDefinition> {
        self.index.get(name).map(|position| &self.tools[*position])
    }

    pub fn tool_count(&self) -> usize {
        self.tools.len()
    }

    /// Tool descriptions in registration order, schemas included verbatim.
    pub fn describe(&self) -> Vec<Value> {
        self.tools
            .iter()
            .map(|definition| {
                json!({
                    "name": definition.name,
                    "description": definition.description,
                    "inputSchema": definition.input_schema.to_json(),
                })
            })
            .collect()
    }

    pub async fn invoke(&self, name: &str, arguments: Value) -> Result<ToolOutcome, InvokeError> {
        let Some(definition) = self.get(name) else {
            return Err(InvokeError::NotFound(name.to_string()));
        };
        definition.input_schema.validate(&arguments)?;

        // The handler runs on its own task so a dropped caller or an
        // elapsed timeout lets it finish in the background; its result is
        // simply discarded.
        let handler = Arc::clone(&definition.handler);
        let task = tokio::spawn(async move { handler.call(arguments).await });

        match tokio::time::timeout(definition.timeout, task).await {
            Err(_) => Ok(ToolOutcome::failure(format!(
                "Tool '{name}' timed out after {}s",
                definition.timeout.as_secs()
            ))),
            Ok(Err(join_err)) => {
                error!(tool = %name, error = %join_err, "tool task aborted");
                Err(InvokeError::Internal)
            }
            Ok(Ok(Ok(content))) => Ok(ToolOutcome::success(content)),
            Ok(Ok(Err(tool_err))) => {
                warn!(tool = %name, error = %tool_err, "tool execution failed");
                Ok(ToolOutcome::failure(format!("Tool '{name}' failed: {tool_err}")))
            }
        }
    }
}
