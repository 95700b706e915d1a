//! Example provider: no external calls, used to verify the gateway loop
//! end to end.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;

use crate::config::Config;
use crate::registry::{
    Content, RegistryError, ToolDefinition, ToolError, ToolHandler, ToolRegistry,
};
use crate::schema::Schema;

struct PingTool;

#[async_trait]
impl ToolHandler for PingTool {
    async fn call(&self, _arguments: Value) -> Result<Vec<Content>, ToolError> {
        Ok(vec![Content::text("pong")])
    }
}

#[derive(Debug, Deserialize)]
struct EchoArgs {
    message: String,
}

struct EchoTool;

#[async_trait]
impl ToolHandler for EchoTool {
    async fn call(&self, arguments: Value) -> Result<Vec<Content>, ToolError> {
        let args: EchoArgs = serde_json::from_value(arguments)
            .map_err(|err| ToolError::Invalid(err.to_string()))?;
        Ok(vec![Content::text(format!("Echo: {}", args.message))])
    }
}

pub fn register_tools(registry: &mut ToolRegistry, config: &Config) -> Result<(), RegistryError> {
    registry.register(ToolDefinition::new(
        "example-ping",
        "Returns a simple pong response. Use this to test if the gateway is reachable.",
        Schema::empty_object(),
        config.tool_timeout,
        Arc::new(PingTool),
    ))?;

    registry.register(ToolDefinition::new(
        "example-echo",
        "Echoes back the provided message. Use this to test tool argument passing.",
        Schema::object(
            [("message", Schema::string("The message to echo back"))],
            &["message"],
        ),
        config.tool_timeout,
        Arc::new(EchoTool),
    ))?;

    Ok(())
}
