//! Serializable value and response types for the remote operations tools.
//!
//! Manager operations return the value objects defined here directly
//! (`CommandResult`, `FileEntry`, `TransferSummary`, `SessionInfo`); the
//! `Ssh*Response` wrappers are what the MCP layer hands back as structured
//! content. All types implement `Serialize`, `Deserialize`, and `JsonSchema`.

use std::collections::BTreeMap;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Snapshot of one pooled session
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct SessionInfo {
    pub session_id: String,
    pub host: String,
    #[schemars(schema_with = "crate::mcp::schema::uint")]
    pub port: u16,
    pub username: String,
    /// Creation time (RFC3339 format)
    pub created_at: String,
    /// Last successful lookup (RFC3339 format)
    pub last_used_at: String,
    pub is_connected: bool,
    /// Number of retained history entries
    #[schemars(schema_with = "crate::mcp::schema::uint")]
    pub command_count: usize,
    #[schemars(schema_with = "crate::mcp::schema::uint")]
    pub tunnel_count: usize,
}

/// Outcome of a completed command.
///
/// Interactive commands always report `exit_code == 0` and `success == true`
/// because no exit status is observable through the shell channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct CommandResult {
    pub command: String,
    pub stdout: String,
    pub stderr: String,
    /// `-1` when the server never reported an exit status
    pub exit_code: i32,
    /// Wall-clock duration in milliseconds
    #[schemars(schema_with = "crate::mcp::schema::uint")]
    pub duration_ms: u64,
    pub success: bool,
}

/// One step of a multi-command run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum CommandOutcome {
    /// The command ran to completion (possibly with a non-zero exit code)
    Completed(CommandResult),
    /// The command could not be run
    Failed { command: String, error: String },
}

impl CommandOutcome {
    pub fn command(&self) -> &str {
        match self {
            CommandOutcome::Completed(result) => &result.command,
            CommandOutcome::Failed { command, .. } => command,
        }
    }

    /// Whether this step halts a stop-on-error run.
    pub fn is_failure(&self) -> bool {
        match self {
            CommandOutcome::Completed(result) => !result.success,
            CommandOutcome::Failed { .. } => true,
        }
    }
}

/// One remote directory entry.
///
/// Simple listings fill only `name` and `path`; the remaining fields carry
/// zero/`false`/`"000"`/`"unknown"` placeholders.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct FileEntry {
    pub name: String,
    pub path: String,
    #[schemars(schema_with = "crate::mcp::schema::uint")]
    pub size: u64,
    pub is_directory: bool,
    /// Octal permission bits, e.g. `"644"`
    pub permissions: String,
    /// Modification time in seconds since the epoch
    #[schemars(schema_with = "crate::mcp::schema::uint")]
    pub modified_time: u64,
    pub owner: String,
    pub group: String,
}

impl FileEntry {
    /// Entry for a simple (names only) listing.
    pub fn simple(name: String, path: String) -> Self {
        Self {
            name,
            path,
            size: 0,
            is_directory: false,
            permissions: "000".to_string(),
            modified_time: 0,
            owner: "unknown".to_string(),
            group: "unknown".to_string(),
        }
    }
}

/// Totals of a successful upload or download
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct TransferSummary {
    #[schemars(schema_with = "crate::mcp::schema::uint")]
    pub files: u64,
    #[schemars(schema_with = "crate::mcp::schema::uint")]
    pub directories: u64,
    #[schemars(schema_with = "crate::mcp::schema::uint")]
    pub bytes: u64,
}

#[derive(Debug, Serialize, Deserialize, JsonSchema)]
pub struct SshConnectResponse {
    pub session_id: String,
    pub message: String,
    pub authenticated: bool,
}

#[derive(Debug, Serialize, Deserialize, JsonSchema)]
pub struct SshDisconnectResponse {
    pub session_id: String,
    /// `false` when the session id was unknown
    pub disconnected: bool,
    pub message: String,
}

#[derive(Debug, Serialize, Deserialize, JsonSchema)]
pub struct SessionListResponse {
    /// List of pooled SSH sessions
    pub sessions: Vec<SessionInfo>,
    /// Total number of pooled sessions
    #[schemars(schema_with = "crate::mcp::schema::uint")]
    pub count: usize,
}

#[derive(Debug, Serialize, Deserialize, JsonSchema)]
pub struct SshProbeResponse {
    pub session_id: String,
    pub alive: bool,
}

#[derive(Debug, Serialize, Deserialize, JsonSchema)]
pub struct SshExecuteMultiResponse {
    pub results: Vec<CommandOutcome>,
    /// Number of steps actually attempted
    #[schemars(schema_with = "crate::mcp::schema::uint")]
    pub executed: usize,
    /// Number of commands requested
    #[schemars(schema_with = "crate::mcp::schema::uint")]
    pub requested: usize,
    /// Whether every attempted step succeeded
    pub all_succeeded: bool,
}

#[derive(Debug, Serialize, Deserialize, JsonSchema)]
pub struct SshTransferResponse {
    pub local_path: String,
    pub remote_path: String,
    pub summary: TransferSummary,
    pub message: String,
}

#[derive(Debug, Serialize, Deserialize, JsonSchema)]
pub struct SshListDirectoryResponse {
    pub path: String,
    pub entries: Vec<FileEntry>,
    #[schemars(schema_with = "crate::mcp::schema::uint")]
    pub count: usize,
}

#[derive(Debug, Serialize, Deserialize, JsonSchema)]
pub struct SshFileExistsResponse {
    pub path: String,
    pub exists: bool,
}

#[derive(Debug, Serialize, Deserialize, JsonSchema)]
pub struct SshSystemInfoResponse {
    pub session_id: String,
    /// Diagnostic key -> value, `"N/A"` where a probe failed
    pub info: BTreeMap<String, String>,
}

#[derive(Debug, Serialize, Deserialize, JsonSchema)]
pub struct SshCommandHistoryResponse {
    pub session_id: String,
    /// Oldest first
    pub commands: Vec<String>,
    #[schemars(schema_with = "crate::mcp::schema::uint")]
    pub count: usize,
}

/// Port forwarding response (only functional when port_forward feature is enabled)
#[derive(Debug, Serialize, Deserialize, JsonSchema)]
pub struct PortForwardingResponse {
    pub tunnel_id: String,
    pub local_address: String,
    pub remote_address: String,
    pub active: bool,
}
