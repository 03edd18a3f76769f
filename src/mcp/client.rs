//! russh-backed connector and connection.
//!
//! ## Connection Lifecycle
//!
//! 1. **Credential Parsing**: Key material is parsed by the ordered
//!    [`KeyParsers`] registry before any network I/O, so a malformed key
//!    fails fast with `InvalidCredential`.
//!
//! 2. **Client Configuration**: Build the russh client configuration with
//!    keepalive and compression settings.
//!
//! 3. **Connection Establishment**: Establish TCP connection to the SSH server
//!    with the requested timeout.
//!
//! 4. **Authentication**: Authenticate using the [`AuthStrategy`] matching the
//!    credential kind.
//!
//! 5. **File Sub-channel**: Open the SFTP subsystem eagerly; if that fails the
//!    connection is torn down and the whole connect fails.
//!
//! ## Retry Strategy
//!
//! Connection attempts use exponential backoff with jitter via the `backon` crate:
//!
//! - **Initial delay**: `ManagerConfig::retry_delay` (default: 1000ms)
//! - **Maximum delay**: Capped at [`MAX_RETRY_DELAY`] (10 seconds)
//! - **Maximum attempts**: `ManagerConfig::max_retries` (default: 3)
//! - **Jitter**: Random jitter is added to prevent thundering herd
//!
//! Only transient `ConnectionFailed` errors are retried (see
//! [`ManagerError::is_retryable`]). Authentication failures are never retried
//! to avoid account lockouts.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use backon::{ExponentialBuilder, Retryable};
use russh::{ChannelMsg, Disconnect, client};
use tracing::{error, info, warn};

use super::auth::{self, AuthStrategy, KeyParsers};
use super::config::{MAX_RETRY_DELAY, ManagerConfig};
use super::error::ManagerError;
use super::session::SshClientHandler;
use super::sftp::SftpFiles;
use super::shell::RusshShell;
use super::transport::{
    ConnectRequest, Connected, Connector, ExecOutput, RemoteConnection, ShellChannel, TunnelIo,
};

/// Build russh client configuration.
///
/// Creates an `Arc<client::Config>` with:
/// - No inactivity timeout; pooled sessions are retired by the manager's
///   age/idle policy instead
/// - Keepalive interval of 30 seconds with max 3 keepalives
/// - Compression preference based on `compress` flag (ZLIB if enabled, NONE if disabled)
pub(crate) fn build_client_config(compress: bool) -> Arc<client::Config> {
    let compression = if compress {
        (&[russh::compression::ZLIB, russh::compression::NONE][..]).into()
    } else {
        (&[russh::compression::NONE][..]).into()
    };

    let preferred = russh::Preferred {
        compression,
        ..Default::default()
    };

    Arc::new(client::Config {
        inactivity_timeout: None,
        keepalive_interval: Some(Duration::from_secs(30)),
        keepalive_max: 3,
        preferred,
        ..Default::default()
    })
}

/// Opens russh sessions for the connection manager.
pub struct RusshConnector {
    max_retries: u32,
    retry_delay: Duration,
    compression: bool,
    parsers: KeyParsers,
}

impl RusshConnector {
    pub fn new(config: &ManagerConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            retry_delay: config.retry_delay,
            compression: config.compression,
            parsers: KeyParsers::default(),
        }
    }

    /// Replace the private key format registry.
    pub fn with_key_parsers(mut self, parsers: KeyParsers) -> Self {
        self.parsers = parsers;
        self
    }

    /// Connect and authenticate, retrying transient failures with backoff.
    async fn connect_with_retry(
        &self,
        request: &ConnectRequest,
        strategy: &dyn AuthStrategy,
    ) -> Result<client::Handle<SshClientHandler>, ManagerError> {
        // Track retry attempts using atomic counter
        let attempt_counter = AtomicU32::new(0);

        let backoff = ExponentialBuilder::default()
            .with_min_delay(self.retry_delay)
            .with_max_delay(MAX_RETRY_DELAY)
            .with_max_times(self.max_retries as usize)
            .with_jitter();

        let result = (|| async {
            let current_attempt = attempt_counter.fetch_add(1, Ordering::SeqCst);

            if current_attempt > 0 {
                warn!(
                    "SSH connection retry attempt {} to {}@{}:{}",
                    current_attempt, request.username, request.host, request.port
                );
            }

            connect_once(request, strategy, self.compression).await
        })
        .retry(backoff)
        .when(|e: &ManagerError| {
            let retryable = e.is_retryable();
            if !retryable {
                warn!(
                    "SSH connection to {}@{}:{} failed with non-retryable error: {}",
                    request.username, request.host, request.port, e
                );
            }
            retryable
        })
        .notify(|err, dur| {
            warn!("SSH connection failed: {}. Retrying in {:?}", err, dur);
        })
        .await;

        let total_attempts = attempt_counter.load(Ordering::SeqCst);
        match result {
            Ok(handle) => {
                if total_attempts > 1 {
                    info!(
                        "SSH connection to {}@{}:{} succeeded after {} retry attempt(s)",
                        request.username,
                        request.host,
                        request.port,
                        total_attempts - 1
                    );
                }
                Ok(handle)
            }
            Err(e) => {
                error!(
                    "SSH connection to {}@{}:{} failed after {} attempt(s). Last error: {}",
                    request.username, request.host, request.port, total_attempts, e
                );
                Err(e)
            }
        }
    }
}

fn connection_failed(request: &ConnectRequest, cause: String) -> ManagerError {
    ManagerError::ConnectionFailed {
        host: request.host.clone(),
        port: request.port,
        cause,
    }
}

/// One connect + authenticate attempt.
async fn connect_once(
    request: &ConnectRequest,
    strategy: &dyn AuthStrategy,
    compress: bool,
) -> Result<client::Handle<SshClientHandler>, ManagerError> {
    let config = build_client_config(compress);
    let connect_future = client::connect(
        config,
        (request.host.as_str(), request.port),
        SshClientHandler,
    );

    let mut handle = tokio::time::timeout(request.timeout, connect_future)
        .await
        .map_err(|_| {
            connection_failed(
                request,
                format!("Connection timed out after {:?}", request.timeout),
            )
        })?
        .map_err(|e| connection_failed(request, format!("Failed to connect: {}", e)))?;

    let authenticated = tokio::time::timeout(
        request.timeout,
        strategy.authenticate(&mut handle, &request.username),
    )
    .await
    .map_err(|_| {
        connection_failed(
            request,
            format!("Authentication timed out after {:?}", request.timeout),
        )
    })?
    .map_err(|cause| connection_failed(request, cause))?;

    if !authenticated {
        return Err(ManagerError::AuthenticationFailed {
            username: request.username.clone(),
            method: strategy.name(),
        });
    }

    Ok(handle)
}

#[async_trait]
impl Connector for RusshConnector {
    async fn connect(&self, request: &ConnectRequest) -> Result<Connected, ManagerError> {
        let strategy = auth::strategy_for(&request.credential, &self.parsers)?;
        let handle = self.connect_with_retry(request, strategy.as_ref()).await?;

        let files = match SftpFiles::open(&handle).await {
            Ok(files) => files,
            Err(cause) => {
                let _ = handle
                    .disconnect(Disconnect::ByApplication, "", "en")
                    .await;
                return Err(connection_failed(request, cause));
            }
        };

        Ok(Connected {
            connection: Arc::new(RusshConnection {
                handle: Arc::new(handle),
            }),
            files: Some(Arc::new(files)),
        })
    }
}

/// An authenticated russh session.
pub struct RusshConnection {
    handle: Arc<client::Handle<SshClientHandler>>,
}

#[async_trait]
impl RemoteConnection for RusshConnection {
    fn is_active(&self) -> bool {
        !self.handle.is_closed()
    }

    async fn exec(&self, command: &str, timeout: Duration) -> Result<ExecOutput, String> {
        execute_ssh_command(&self.handle, command, timeout).await
    }

    async fn open_shell(&self) -> Result<Box<dyn ShellChannel>, String> {
        let shell = RusshShell::open(&self.handle).await?;
        Ok(Box::new(shell))
    }

    async fn open_direct_tcpip(&self, host: &str, port: u16) -> Result<Box<dyn TunnelIo>, String> {
        let channel = self
            .handle
            .channel_open_direct_tcpip(
                host,
                port as u32,
                "127.0.0.1",
                0, // Local originator port (not significant for direct-tcpip)
            )
            .await
            .map_err(|e| format!("Failed to open direct-tcpip channel: {}", e))?;

        Ok(Box::new(Box::pin(channel.into_stream())))
    }

    async fn close(&self) -> Result<(), String> {
        self.handle
            .disconnect(Disconnect::ByApplication, "", "en")
            .await
            .map_err(|e| format!("Failed to disconnect: {}", e))
    }
}

/// Execute a command on an SSH session with timeout support.
///
/// Opens a session channel, executes the command, and collects the output.
/// One deadline covers the channel open, the exec request and the output
/// collection. If it fires, returns whatever output arrived with
/// `timed_out: true` instead of an error; the channel is closed and not reused.
pub(crate) async fn execute_ssh_command(
    handle: &client::Handle<SshClientHandler>,
    command: &str,
    timeout: Duration,
) -> Result<ExecOutput, String> {
    let deadline = tokio::time::Instant::now() + timeout;

    // Channel setup counts against the same deadline
    let opened = tokio::time::timeout_at(deadline, async {
        let channel = handle
            .channel_open_session()
            .await
            .map_err(|e| format!("Failed to open channel: {}", e))?;
        channel
            .exec(true, command)
            .await
            .map_err(|e| format!("Failed to execute command: {}", e))?;
        Ok::<_, String>(channel)
    })
    .await;

    let mut channel = match opened {
        Ok(channel) => channel?,
        Err(_) => {
            warn!("Timed out after {:?} opening exec channel", timeout);
            return Ok(ExecOutput {
                timed_out: true,
                ..ExecOutput::default()
            });
        }
    };

    // Pre-allocate buffers to reduce reallocations during output collection
    let mut stdout = Vec::with_capacity(4096);
    let mut stderr = Vec::with_capacity(1024);
    let mut exit_code: Option<u32> = None;

    let result = tokio::time::timeout_at(deadline, async {
        loop {
            match channel.wait().await {
                Some(ChannelMsg::Data { data }) => {
                    stdout.extend_from_slice(&data);
                }
                Some(ChannelMsg::ExtendedData { data, ext }) => {
                    // ext == 1 is stderr in SSH protocol
                    if ext == 1 {
                        stderr.extend_from_slice(&data);
                    }
                }
                Some(ChannelMsg::ExitStatus { exit_status }) => {
                    exit_code = Some(exit_status);
                }
                Some(ChannelMsg::Eof) => {
                    // Continue to wait for exit status if not received yet
                    if exit_code.is_some() {
                        break;
                    }
                }
                Some(ChannelMsg::Close) | None => {
                    break;
                }
                Some(_) => {}
            }
        }
    })
    .await;

    let timed_out = result.is_err();
    if timed_out {
        warn!(
            "Command timed out after {:?}, discarding partial output ({} bytes stdout, {} bytes stderr)",
            timeout,
            stdout.len(),
            stderr.len()
        );
    }

    let _ = channel.close().await;

    Ok(ExecOutput {
        stdout: String::from_utf8_lossy(&stdout).into_owned(),
        stderr: String::from_utf8_lossy(&stderr).into_owned(),
        exit_code,
        timed_out,
    })
}
