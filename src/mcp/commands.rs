//! MCP SSH Commands implementation.
//!
//! Each tool is a thin adapter over [`ConnectionManager`]: it resolves
//! defaults, makes one manager call and renders the typed result. Errors are
//! returned as their `Display` text.
//!
//! - `ssh_connect` / `ssh_disconnect` / `ssh_list_sessions` / `ssh_probe`
//! - `ssh_execute` / `ssh_execute_multi` / `ssh_execute_interactive`
//! - `ssh_upload` / `ssh_download` / `ssh_list_directory` / `ssh_file_exists`
//! - `ssh_system_info` / `ssh_command_history`
//! - `ssh_forward`: Setup port forwarding (feature-gated)

use std::path::Path;
use std::sync::Arc;

use poem_mcpserver::{Tools, tool::StructuredContent};
use tracing::{error, info};

use super::config::{DEFAULT_HISTORY_QUERY_LIMIT, resolve_command_timeout, resolve_connect_timeout};
use super::manager::ConnectionManager;
use super::message::{
    ConnectMessageBuilder, TransferDirection, TransferMessageBuilder, truncate_command,
};
use super::transport::Credential;
use super::types::{
    CommandResult, PortForwardingResponse, SessionListResponse, SshCommandHistoryResponse,
    SshConnectResponse, SshDisconnectResponse, SshExecuteMultiResponse, SshFileExistsResponse,
    SshListDirectoryResponse, SshProbeResponse, SshSystemInfoResponse, SshTransferResponse,
};

/// MCP SSH Commands tool implementation.
///
/// Holds the shared connection manager; cloning the tool set shares the pool.
#[derive(Clone)]
pub struct McpSSHCommands {
    manager: Arc<ConnectionManager>,
}

impl McpSSHCommands {
    pub fn new(manager: Arc<ConnectionManager>) -> Self {
        Self { manager }
    }

    pub fn manager(&self) -> &Arc<ConnectionManager> {
        &self.manager
    }
}

/// Pick the credential from the connect arguments; a private key wins over a password.
fn credential_from(
    password: Option<String>,
    private_key: Option<String>,
) -> Result<Credential, String> {
    match (private_key, password) {
        (Some(key), _) if !key.trim().is_empty() => Ok(Credential::PrivateKey(key)),
        (_, Some(password)) => Ok(Credential::Password(password)),
        _ => Err("Either password or private_key must be provided".to_string()),
    }
}

#[Tools]
impl McpSSHCommands {
    /// Connect to an SSH server and add the session to the pool.
    ///
    /// Returns a session_id for subsequent commands. Authenticate with either
    /// a password or a private key (OpenSSH or PEM text, or a path to a key
    /// file). Sessions idle for 30 minutes or older than one hour are evicted
    /// when the pool is full.
    async fn ssh_connect(
        &self,
        /// SSH server hostname or IP address
        host: String,
        /// SSH username for authentication
        username: String,
        /// Password for password-based authentication
        password: Option<String>,
        /// Private key contents, or a path to a private key file
        private_key: Option<String>,
        /// SSH port (default: 22)
        port: Option<u16>,
        /// Connection timeout in seconds (default: 30, env: SSH_CONNECT_TIMEOUT)
        timeout_secs: Option<u64>,
    ) -> Result<StructuredContent<SshConnectResponse>, String> {
        let credential = credential_from(password, private_key)?;
        let port = port.unwrap_or(22);
        let timeout = resolve_connect_timeout(timeout_secs);

        info!(
            "Attempting SSH connection to {}@{}:{} with {} auth, timeout {}s",
            username,
            host,
            port,
            credential.kind(),
            timeout.as_secs()
        );

        match self
            .manager
            .create(&host, &username, credential, port, timeout)
            .await
        {
            Ok(session_id) => Ok(StructuredContent(SshConnectResponse {
                message: ConnectMessageBuilder::new(&session_id, &username, &host)
                    .with_port(port)
                    .build(),
                session_id,
                authenticated: true,
            })),
            Err(e) => {
                error!("SSH connection failed: {}", e);
                Err(e.to_string())
            }
        }
    }

    /// Disconnect an SSH session, closing its tunnels and file channel.
    ///
    /// Disconnecting an unknown session is not an error; `disconnected` is
    /// false in that case.
    async fn ssh_disconnect(
        &self,
        /// Session ID to disconnect
        session_id: String,
    ) -> StructuredContent<SshDisconnectResponse> {
        let disconnected = self.manager.disconnect(&session_id).await;
        let message = if disconnected {
            format!("Session {} disconnected successfully", session_id)
        } else {
            format!("No active SSH session with ID: {}", session_id)
        };
        StructuredContent(SshDisconnectResponse {
            session_id,
            disconnected,
            message,
        })
    }

    /// List all pooled SSH sessions with their metadata.
    ///
    /// This is a snapshot; it does not probe the sessions. Use `ssh_probe`
    /// to check a specific session.
    async fn ssh_list_sessions(&self) -> StructuredContent<SessionListResponse> {
        let sessions = self.manager.list().await;
        let count = sessions.len();
        StructuredContent(SessionListResponse { sessions, count })
    }

    /// Check whether a session still answers a round-trip echo.
    ///
    /// A failed probe marks the session disconnected; it will be evicted by
    /// the next sweep.
    async fn ssh_probe(
        &self,
        /// Session ID returned from ssh_connect
        session_id: String,
    ) -> Result<StructuredContent<SshProbeResponse>, String> {
        let alive = self
            .manager
            .probe(&session_id)
            .await
            .map_err(|e| e.to_string())?;
        Ok(StructuredContent(SshProbeResponse { session_id, alive }))
    }

    /// Execute a command on a connected SSH session and wait for it to finish.
    ///
    /// Returns stdout, stderr and the exit code. A missing exit status is
    /// reported as -1.
    async fn ssh_execute(
        &self,
        /// Session ID returned from ssh_connect
        session_id: String,
        /// Shell command to execute on the remote server
        command: String,
        /// Command execution timeout in seconds (default: 30, env: SSH_COMMAND_TIMEOUT)
        timeout_secs: Option<u64>,
    ) -> Result<StructuredContent<CommandResult>, String> {
        let timeout = resolve_command_timeout(timeout_secs);
        info!(
            "Executing on {}: {}",
            session_id,
            truncate_command(&command, 80)
        );

        self.manager
            .execute(&session_id, &command, timeout)
            .await
            .map(StructuredContent)
            .map_err(|e| e.to_string())
    }

    /// Execute several commands in order on one session.
    ///
    /// With `stop_on_error` (default: true) the run ends after the first step
    /// that fails or exits non-zero. Each entry in `results` is either a
    /// completed command result or a failure marker.
    async fn ssh_execute_multi(
        &self,
        /// Session ID returned from ssh_connect
        session_id: String,
        /// Commands to execute, in order
        commands: Vec<String>,
        /// Stop after the first failing step (default: true)
        stop_on_error: Option<bool>,
        /// Per-command timeout in seconds (default: 30, env: SSH_COMMAND_TIMEOUT)
        timeout_secs: Option<u64>,
    ) -> Result<StructuredContent<SshExecuteMultiResponse>, String> {
        let timeout = resolve_command_timeout(timeout_secs);
        let stop_on_error = stop_on_error.unwrap_or(true);

        let results = self
            .manager
            .execute_multi(&session_id, &commands, timeout, stop_on_error)
            .await
            .map_err(|e| e.to_string())?;

        Ok(StructuredContent(SshExecuteMultiResponse {
            executed: results.len(),
            requested: commands.len(),
            all_succeeded: !results.iter().any(|outcome| outcome.is_failure()),
            results,
        }))
    }

    /// Run a command in an interactive shell, answering prompts as they appear.
    ///
    /// `expect_prompts[i]` is answered with `responses[i]`; both lists must
    /// have the same length. Prompt matching is a substring check against
    /// everything the shell has printed so far.
    async fn ssh_execute_interactive(
        &self,
        /// Session ID returned from ssh_connect
        session_id: String,
        /// Command to start in the shell
        command: String,
        /// Prompt substrings to wait for, in order
        expect_prompts: Vec<String>,
        /// Response to send for each prompt, in order
        responses: Vec<String>,
        /// Overall timeout in seconds (default: 30, env: SSH_COMMAND_TIMEOUT)
        timeout_secs: Option<u64>,
    ) -> Result<StructuredContent<CommandResult>, String> {
        let timeout = resolve_command_timeout(timeout_secs);
        info!(
            "Interactive execution on {} ({} prompt(s)): {}",
            session_id,
            expect_prompts.len(),
            truncate_command(&command, 80)
        );

        self.manager
            .execute_interactive(&session_id, &command, &expect_prompts, &responses, timeout)
            .await
            .map(StructuredContent)
            .map_err(|e| e.to_string())
    }

    /// Upload a local file or directory over SFTP.
    ///
    /// Directories require `recursive=true`. Permissions are copied by
    /// default.
    async fn ssh_upload(
        &self,
        /// Session ID returned from ssh_connect
        session_id: String,
        /// Local file or directory to upload
        local_path: String,
        /// Destination path on the remote server
        remote_path: String,
        /// Upload directories recursively (default: false)
        recursive: Option<bool>,
        /// Copy local permission bits to the remote files (default: true)
        preserve_permissions: Option<bool>,
    ) -> Result<StructuredContent<SshTransferResponse>, String> {
        let summary = self
            .manager
            .upload(
                &session_id,
                Path::new(&local_path),
                &remote_path,
                recursive.unwrap_or(false),
                preserve_permissions.unwrap_or(true),
            )
            .await
            .map_err(|e| e.to_string())?;

        let message = TransferMessageBuilder::new(TransferDirection::Upload, &local_path, &remote_path)
            .with_summary(summary)
            .build();
        Ok(StructuredContent(SshTransferResponse {
            local_path,
            remote_path,
            summary,
            message,
        }))
    }

    /// Download a remote file or directory over SFTP.
    ///
    /// Directories require `recursive=true`. Missing local parent directories
    /// are created.
    async fn ssh_download(
        &self,
        /// Session ID returned from ssh_connect
        session_id: String,
        /// File or directory on the remote server
        remote_path: String,
        /// Local destination path
        local_path: String,
        /// Download directories recursively (default: false)
        recursive: Option<bool>,
    ) -> Result<StructuredContent<SshTransferResponse>, String> {
        let summary = self
            .manager
            .download(
                &session_id,
                &remote_path,
                Path::new(&local_path),
                recursive.unwrap_or(false),
            )
            .await
            .map_err(|e| e.to_string())?;

        let message =
            TransferMessageBuilder::new(TransferDirection::Download, &local_path, &remote_path)
                .with_summary(summary)
                .build();
        Ok(StructuredContent(SshTransferResponse {
            local_path,
            remote_path,
            summary,
            message,
        }))
    }

    /// List a remote directory.
    ///
    /// With `detailed=true` (default) each entry carries size, type,
    /// permissions, modification time and owner.
    async fn ssh_list_directory(
        &self,
        /// Session ID returned from ssh_connect
        session_id: String,
        /// Remote directory (default: ".")
        remote_path: Option<String>,
        /// Include file metadata (default: true)
        detailed: Option<bool>,
    ) -> Result<StructuredContent<SshListDirectoryResponse>, String> {
        let path = remote_path.unwrap_or_else(|| ".".to_string());
        let entries = self
            .manager
            .list_directory(&session_id, &path, detailed.unwrap_or(true))
            .await
            .map_err(|e| e.to_string())?;

        let count = entries.len();
        Ok(StructuredContent(SshListDirectoryResponse {
            path,
            entries,
            count,
        }))
    }

    /// Check whether a remote path exists.
    async fn ssh_file_exists(
        &self,
        /// Session ID returned from ssh_connect
        session_id: String,
        /// Path on the remote server
        remote_path: String,
    ) -> Result<StructuredContent<SshFileExistsResponse>, String> {
        let exists = self
            .manager
            .file_exists(&session_id, &remote_path)
            .await
            .map_err(|e| e.to_string())?;
        Ok(StructuredContent(SshFileExistsResponse {
            path: remote_path,
            exists,
        }))
    }

    /// Collect basic diagnostics from the remote host.
    ///
    /// Reports hostname, kernel, os, architecture, uptime, memory, disk and
    /// cpu. A diagnostic that fails is reported as "N/A".
    async fn ssh_system_info(
        &self,
        /// Session ID returned from ssh_connect
        session_id: String,
    ) -> Result<StructuredContent<SshSystemInfoResponse>, String> {
        let info = self
            .manager
            .system_info(&session_id)
            .await
            .map_err(|e| e.to_string())?;
        Ok(StructuredContent(SshSystemInfoResponse { session_id, info }))
    }

    /// Show the most recent commands executed on a session, oldest first.
    async fn ssh_command_history(
        &self,
        /// Session ID returned from ssh_connect
        session_id: String,
        /// Maximum number of entries to return (default: 50)
        limit: Option<usize>,
    ) -> Result<StructuredContent<SshCommandHistoryResponse>, String> {
        let commands = self
            .manager
            .command_history(&session_id, limit.unwrap_or(DEFAULT_HISTORY_QUERY_LIMIT))
            .await
            .map_err(|e| e.to_string())?;

        let count = commands.len();
        Ok(StructuredContent(SshCommandHistoryResponse {
            session_id,
            commands,
            count,
        }))
    }

    /// Setup port forwarding on an existing SSH session
    ///
    /// Listens on 127.0.0.1:`local_port` and relays each connection to
    /// `remote_address`:`remote_port` through the session. The tunnel closes
    /// with the session.
    #[allow(unused_variables)]
    async fn ssh_forward(
        &self,
        /// Session ID returned from ssh_connect
        session_id: String,
        /// Local port to listen on (e.g., 8080)
        local_port: u16,
        /// Remote host to forward to (e.g., "localhost" or "10.0.0.1")
        remote_address: String,
        /// Remote port to forward to (e.g., 3306 for MySQL)
        remote_port: u16,
    ) -> Result<StructuredContent<PortForwardingResponse>, String> {
        #[cfg(feature = "port_forward")]
        {
            info!(
                "Setting up port forwarding from local port {} to {}:{} using session {}",
                local_port, remote_address, remote_port, session_id
            );

            match self
                .manager
                .forward(&session_id, local_port, &remote_address, remote_port)
                .await
            {
                Ok((tunnel_id, local_addr)) => Ok(StructuredContent(PortForwardingResponse {
                    tunnel_id,
                    local_address: local_addr.to_string(),
                    remote_address: format!("{}:{}", remote_address, remote_port),
                    active: true,
                })),
                Err(e) => {
                    error!("Port forwarding setup failed: {}", e);
                    Err(e.to_string())
                }
            }
        }

        #[cfg(not(feature = "port_forward"))]
        {
            Err(
                "Port forwarding feature is not enabled. Rebuild with --features port_forward"
                    .to_string(),
            )
        }
    }
}
