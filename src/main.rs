#![deny(warnings)]
#![deny(clippy::unwrap_used)]

use std::sync::Arc;

use dotenv::dotenv;
use poem::{EndpointExt, Route, Server, listener::TcpListener, middleware::Tracing};
use poem_mcpserver::{McpServer, streamable_http};
use remote_ops_mcp::mcp::{ConnectionManager, ManagerConfig, McpSSHCommands};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv().ok();

    // Initialize logging, defaulting to info when RUST_LOG is unset
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    // Setup MCP server
    let mcp_port: u16 = std::env::var("MCP_PORT")
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(8000);
    let mcp_addr = format!("0.0.0.0:{}", mcp_port);
    info!("Starting MCP server on {}", mcp_addr);

    let config = ManagerConfig::from_env();
    info!(
        "Connection pool capacity {}, max session age {}s, max idle {}s",
        config.max_connections,
        config.max_session_age.as_secs(),
        config.max_session_idle.as_secs()
    );
    let manager = Arc::new(ConnectionManager::new(config));
    let tools = McpSSHCommands::new(manager.clone());

    // Every MCP session shares the same connection pool
    let app = Route::new()
        .at(
            "/",
            streamable_http::endpoint(move |_| McpServer::new().tools(tools.clone())),
        )
        .with(Tracing);

    info!("MCP Server with SSH client support is ready");
    info!("Use the ssh_connect command to establish SSH connections");

    // Run the MCP server until ctrl-c, then drain the pool
    Server::new(TcpListener::bind(mcp_addr))
        .name("Remote Ops MCP Server")
        .run_with_graceful_shutdown(
            app,
            async {
                let _ = tokio::signal::ctrl_c().await;
                info!("Shutdown signal received");
            },
            None,
        )
        .await?;

    manager.shutdown().await;
    Ok(())
}
