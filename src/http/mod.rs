//! HTTP transport layer: routing surface for the streaming and message
//! endpoints plus the public metadata endpoints.

pub mod handlers;
