use std::net::SocketAddr;

use heritage_gateway_mcp::{
    build_app, config::Config, logging, mcp::session::SessionManager, providers,
    rate_limit::RateLimiter, registry::ToolRegistry, AppState,
};
use tracing::info;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    logging::init_logging();

    let config = Config::from_env()?;

    let mut registry = ToolRegistry::new();
    providers::register_enabled(&mut registry, &config)?;
    info!(
        tools = registry.tool_count(),
        providers = ?config.enabled_providers,
        "tool registry ready"
    );

    let sessions = SessionManager::new();
    let (sweeper, keepalive) = sessions.spawn_background_tasks();

    let rate_limiter = config
        .rate_limit_enabled
        .then(|| RateLimiter::new(config.rate_limit_per_minute));
    let bind_socket = config.bind_socket()?;
    let state = AppState::new(config.auth_token.clone(), rate_limiter, registry, sessions);
    let app = build_app(state);
    let listener = tokio::net::TcpListener::bind(bind_socket).await?;

    info!(
        bind_addr = %config.bind_addr,
        bind_port = config.bind_port,
        open_mode = config.auth_token.is_none(),
        rate_limiting = config.rate_limit_enabled,
        "server starting"
    );

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    sweeper.abort();
    keepalive.abort();
    Ok(())
}
