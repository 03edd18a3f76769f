#![deny(warnings)]
#![deny(clippy::unwrap_used)]

use std::sync::Arc;

use dotenv::dotenv;
use poem_mcpserver::McpServer;
use remote_ops_mcp::mcp::{ConnectionManager, ManagerConfig, McpSSHCommands};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv().ok();

    // stdout carries the protocol, so logs go to stderr
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let manager = Arc::new(ConnectionManager::new(ManagerConfig::from_env()));
    let result = poem_mcpserver::stdio::stdio(
        McpServer::new().tools(McpSSHCommands::new(manager.clone())),
    )
    .await;

    manager.shutdown().await;
    result?;
    Ok(())
}
