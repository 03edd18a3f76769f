//! MCP SSH module: a pooled SSH connection manager exposed as MCP tools.
//!
//! This module is organized into the following submodules:
//!
//! - `types`: Serializable result and response types for MCP tools
//! - `config`: Configuration resolution with environment variable support
//! - `error`: Error taxonomy and retry classification
//! - `transport`: Traits the manager talks to (connection, shell, files)
//! - `session`: One pooled session and its bookkeeping
//! - `manager`: The session pool, capacity policy and operation routing
//! - `client`: russh connection, authentication and retry logic
//! - `auth`: Authentication strategies and private key parsers
//! - `shell` / `sftp`: russh-backed shell and SFTP channels
//! - `executor`: Plain, batched and interactive command execution
//! - `transfer`: SFTP upload, download and listing
//! - `sysinfo`: Read-only diagnostics battery
//! - `forward`: Port forwarding implementation (feature-gated)
//! - `commands`: MCP tool implementations

pub mod auth;
pub(crate) mod client;
pub mod commands;
pub mod config;
pub mod error;
pub(crate) mod executor;
#[cfg(feature = "port_forward")]
pub(crate) mod forward;
pub mod manager;
pub mod message;
pub(crate) mod schema;
pub mod session;
pub(crate) mod sftp;
pub(crate) mod shell;
pub(crate) mod sysinfo;
#[cfg(test)]
pub(crate) mod testing;
pub(crate) mod transfer;
pub mod transport;
pub mod types;

pub use commands::McpSSHCommands;
pub use config::ManagerConfig;
pub use error::ManagerError;
pub use manager::ConnectionManager;
