//! Transport seams between the connection manager and the SSH library.
//!
//! The manager never talks to `russh` directly. It holds trait objects for
//! the connection, its interactive shell channels and its file sub-channel,
//! which lets the pool, executor and transfer logic run against scripted
//! fakes in tests. Production implementations live in `client`, `shell`
//! and `sftp`.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};

use super::error::ManagerError;

/// Raw output of a one-shot exec channel.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecOutput {
    pub stdout: String,
    pub stderr: String,
    /// `None` when the server never reported an exit status
    pub exit_code: Option<u32>,
    /// The read deadline fired before the channel closed
    pub timed_out: bool,
}

/// Byte stream relayed through a `direct-tcpip` channel.
pub trait TunnelIo: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> TunnelIo for T {}

/// An authenticated remote connection.
#[async_trait]
pub trait RemoteConnection: Send + Sync {
    /// Whether the transport still reports itself as open.
    fn is_active(&self) -> bool;

    /// Run `command` on a fresh exec channel and collect its output.
    ///
    /// Timeouts are reported through [`ExecOutput::timed_out`], not as errors.
    async fn exec(&self, command: &str, timeout: Duration) -> Result<ExecOutput, String>;

    /// Open a PTY-backed interactive shell channel.
    async fn open_shell(&self) -> Result<Box<dyn ShellChannel>, String>;

    /// Open a `direct-tcpip` channel to `host:port` as seen from the remote side.
    async fn open_direct_tcpip(&self, host: &str, port: u16) -> Result<Box<dyn TunnelIo>, String>;

    /// Tear down the transport.
    async fn close(&self) -> Result<(), String>;
}

/// Duplex interactive channel used by the expect/response loop.
#[async_trait]
pub trait ShellChannel: Send {
    async fn send(&mut self, data: &[u8]) -> Result<(), String>;

    /// Take whatever output has arrived since the previous call.
    ///
    /// Never blocks waiting for new data; returns an empty buffer instead.
    async fn read_available(&mut self) -> Result<Vec<u8>, String>;

    async fn close(&mut self) -> Result<(), String>;
}

/// Kind of a remote filesystem entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteFileKind {
    File,
    Directory,
    /// Symlinks, sockets, devices
    Other,
}

/// Attributes of a remote path as reported by the file sub-channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteMetadata {
    pub kind: RemoteFileKind,
    pub size: u64,
    pub permissions: Option<u32>,
    /// Modification time in seconds since the epoch
    pub modified: Option<u64>,
    pub uid: Option<u32>,
    pub gid: Option<u32>,
}

impl RemoteMetadata {
    pub fn is_dir(&self) -> bool {
        self.kind == RemoteFileKind::Directory
    }

    pub fn is_file(&self) -> bool {
        self.kind == RemoteFileKind::File
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteDirEntry {
    pub name: String,
    pub metadata: RemoteMetadata,
}

/// Readable remote file handle.
pub trait RemoteReader: AsyncRead + Unpin + Send {}

impl<T: AsyncRead + Unpin + Send> RemoteReader for T {}

/// Writable remote file handle.
pub trait RemoteWriter: AsyncWrite + Unpin + Send {}

impl<T: AsyncWrite + Unpin + Send> RemoteWriter for T {}

/// Failure reported by a [`FileChannel`].
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FileChannelError {
    #[error("No such file: {0}")]
    NotFound(String),
    #[error("{0}")]
    Other(String),
}

/// File sub-channel of a session (SFTP in production).
#[async_trait]
pub trait FileChannel: Send + Sync {
    async fn metadata(&self, path: &str) -> Result<RemoteMetadata, FileChannelError>;

    /// List a directory; `.` and `..` are never returned.
    async fn read_dir(&self, path: &str) -> Result<Vec<RemoteDirEntry>, FileChannelError>;

    /// Open `path` for streaming reads.
    async fn open_read(&self, path: &str) -> Result<Box<dyn RemoteReader>, FileChannelError>;

    /// Create or truncate `path` for streaming writes.
    ///
    /// The writer must be shut down to commit buffered data.
    async fn create(&self, path: &str) -> Result<Box<dyn RemoteWriter>, FileChannelError>;

    async fn create_dir(&self, path: &str) -> Result<(), FileChannelError>;

    async fn set_permissions(&self, path: &str, mode: u32) -> Result<(), FileChannelError>;

    async fn close(&self) -> Result<(), FileChannelError>;
}

/// Secret used to authenticate a new session.
#[derive(Clone)]
pub enum Credential {
    Password(String),
    /// Private key material, or a path to a key file
    PrivateKey(String),
}

impl Credential {
    /// Credential kind reported in authentication failures.
    pub fn kind(&self) -> &'static str {
        match self {
            Credential::Password(_) => "password",
            Credential::PrivateKey(_) => "key",
        }
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Credential::{}(<redacted>)", self.kind())
    }
}

/// Parameters of a `create` call.
#[derive(Debug, Clone)]
pub struct ConnectRequest {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub credential: Credential,
    pub timeout: Duration,
}

/// A freshly authenticated connection and its eagerly opened file sub-channel.
pub struct Connected {
    pub connection: Arc<dyn RemoteConnection>,
    pub files: Option<Arc<dyn FileChannel>>,
}

/// Establishes authenticated connections for the manager.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, request: &ConnectRequest) -> Result<Connected, ManagerError>;
}
