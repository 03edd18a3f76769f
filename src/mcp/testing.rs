//! Scripted in-memory transports for unit tests.
//!
//! - `FakeConnector` hands out `FakeConnection`s (plus a `MemoryFiles`
//!   sub-channel) and can be told to fail.
//! - `FakeConnection` answers `exec` from a response table, falling back to
//!   a tiny `echo` emulation.
//! - `ScriptedShell` yields one scripted chunk per poll and records sends.
//! - `MemoryFiles` is a flat path -> node map standing in for SFTP.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::io;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::AsyncWrite;

use super::error::ManagerError;
use super::transport::{
    ConnectRequest, Connected, Connector, ExecOutput, FileChannel, FileChannelError,
    RemoteConnection, RemoteDirEntry, RemoteFileKind, RemoteMetadata, RemoteReader, RemoteWriter,
    ShellChannel, TunnelIo,
};

type ConnectFailure = Box<dyn Fn(&ConnectRequest) -> ManagerError + Send + Sync>;

#[derive(Default)]
pub(crate) struct FakeConnector {
    connections: Mutex<Vec<Arc<FakeConnection>>>,
    files: Mutex<Vec<Arc<MemoryFiles>>>,
    failure: Mutex<Option<ConnectFailure>>,
    files_unavailable: AtomicBool,
    attempts: AtomicUsize,
    connect_delay: Mutex<Option<Duration>>,
}

impl FakeConnector {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn fail_with(
        &self,
        failure: impl Fn(&ConnectRequest) -> ManagerError + Send + Sync + 'static,
    ) {
        *self.failure.lock().unwrap() = Some(Box::new(failure));
    }

    pub(crate) fn succeed(&self) {
        *self.failure.lock().unwrap() = None;
    }

    pub(crate) fn without_files(&self) {
        self.files_unavailable.store(true, Ordering::SeqCst);
    }

    /// Sleep this long inside every `connect`.
    pub(crate) fn delay_connect(&self, delay: Duration) {
        *self.connect_delay.lock().unwrap() = Some(delay);
    }

    pub(crate) fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    pub(crate) fn connection(&self, index: usize) -> Arc<FakeConnection> {
        self.connections.lock().unwrap()[index].clone()
    }

    pub(crate) fn files(&self, index: usize) -> Arc<MemoryFiles> {
        self.files.lock().unwrap()[index].clone()
    }
}

#[async_trait]
impl Connector for FakeConnector {
    async fn connect(&self, request: &ConnectRequest) -> Result<Connected, ManagerError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        let delay = *self.connect_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(failure) = self.failure.lock().unwrap().as_ref() {
            return Err(failure(request));
        }

        let connection = Arc::new(FakeConnection::new());
        self.connections.lock().unwrap().push(connection.clone());

        let files: Option<Arc<dyn FileChannel>> = if self.files_unavailable.load(Ordering::SeqCst)
        {
            None
        } else {
            let files = Arc::new(MemoryFiles::new());
            self.files.lock().unwrap().push(files.clone());
            Some(files)
        };

        Ok(Connected { connection, files })
    }
}

pub(crate) struct FakeConnection {
    active: AtomicBool,
    closed: AtomicBool,
    close_error: Mutex<Option<String>>,
    responses: Mutex<HashMap<String, Result<ExecOutput, String>>>,
    executed: Mutex<Vec<String>>,
    shells: Mutex<VecDeque<ScriptedShell>>,
    exec_stalled: AtomicBool,
    shell_open_stalled: AtomicBool,
}

impl FakeConnection {
    pub(crate) fn new() -> Self {
        Self {
            active: AtomicBool::new(true),
            closed: AtomicBool::new(false),
            close_error: Mutex::new(None),
            responses: Mutex::new(HashMap::new()),
            executed: Mutex::new(Vec::new()),
            shells: Mutex::new(VecDeque::new()),
            exec_stalled: AtomicBool::new(false),
            shell_open_stalled: AtomicBool::new(false),
        }
    }

    /// Make every `exec` hang forever, like a half-open transport.
    pub(crate) fn stall_exec(&self) {
        self.exec_stalled.store(true, Ordering::SeqCst);
    }

    /// Make every `open_shell` hang forever.
    pub(crate) fn stall_shell_open(&self) {
        self.shell_open_stalled.store(true, Ordering::SeqCst);
    }

    pub(crate) fn set_active(&self, active: bool) {
        self.active.store(active, Ordering::SeqCst);
    }

    /// Script the outcome of `command`: `Ok((stdout, stderr, exit_code))` or a transport error.
    pub(crate) fn respond(
        &self,
        command: &str,
        outcome: Result<(&str, &str, Option<u32>), &str>,
    ) {
        let outcome = outcome
            .map(|(stdout, stderr, exit_code)| ExecOutput {
                stdout: stdout.to_string(),
                stderr: stderr.to_string(),
                exit_code,
                timed_out: false,
            })
            .map_err(str::to_string);
        self.responses
            .lock()
            .unwrap()
            .insert(command.to_string(), outcome);
    }

    pub(crate) fn respond_timeout(&self, command: &str) {
        self.responses.lock().unwrap().insert(
            command.to_string(),
            Ok(ExecOutput {
                stdout: "partial".to_string(),
                timed_out: true,
                ..ExecOutput::default()
            }),
        );
    }

    pub(crate) fn clear_responses(&self) {
        self.responses.lock().unwrap().clear();
    }

    pub(crate) fn fail_close(&self, message: &str) {
        *self.close_error.lock().unwrap() = Some(message.to_string());
    }

    pub(crate) fn push_shell(&self, shell: ScriptedShell) {
        self.shells.lock().unwrap().push_back(shell);
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Every command passed to `exec`, probes included.
    pub(crate) fn executed(&self) -> Vec<String> {
        self.executed.lock().unwrap().clone()
    }
}

#[async_trait]
impl RemoteConnection for FakeConnection {
    fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst) && !self.is_closed()
    }

    async fn exec(&self, command: &str, _timeout: Duration) -> Result<ExecOutput, String> {
        if self.is_closed() {
            return Err("Failed to open channel: session closed".to_string());
        }
        self.executed.lock().unwrap().push(command.to_string());
        if self.exec_stalled.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }

        if let Some(outcome) = self.responses.lock().unwrap().get(command) {
            return outcome.clone();
        }

        let stdout = command
            .strip_prefix("echo ")
            .map(|rest| format!("{}\n", rest))
            .unwrap_or_default();
        Ok(ExecOutput {
            stdout,
            exit_code: Some(0),
            ..ExecOutput::default()
        })
    }

    async fn open_shell(&self) -> Result<Box<dyn ShellChannel>, String> {
        if self.shell_open_stalled.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        self.shells
            .lock()
            .unwrap()
            .pop_front()
            .map(|shell| Box::new(shell) as Box<dyn ShellChannel>)
            .ok_or_else(|| "Failed to open shell: no scripted shell".to_string())
    }

    async fn open_direct_tcpip(&self, _host: &str, _port: u16) -> Result<Box<dyn TunnelIo>, String> {
        let (local, mut remote) = tokio::io::duplex(4096);
        tokio::spawn(async move {
            let (mut reader, mut writer) = tokio::io::split(&mut remote);
            let _ = tokio::io::copy(&mut reader, &mut writer).await;
        });
        Ok(Box::new(local))
    }

    async fn close(&self) -> Result<(), String> {
        self.closed.store(true, Ordering::SeqCst);
        match self.close_error.lock().unwrap().clone() {
            Some(message) => Err(message),
            None => Ok(()),
        }
    }
}

/// What a `ScriptedShell` saw from the executor.
#[derive(Debug, Default)]
pub(crate) struct ShellLog {
    pub(crate) sent: Vec<String>,
    pub(crate) polls: usize,
    pub(crate) closed: bool,
}

pub(crate) struct ScriptedShell {
    chunks: VecDeque<Vec<u8>>,
    log: Arc<Mutex<ShellLog>>,
}

impl ScriptedShell {
    pub(crate) fn new() -> Self {
        Self {
            chunks: VecDeque::new(),
            log: Arc::new(Mutex::new(ShellLog::default())),
        }
    }

    /// Output returned by the next unanswered poll.
    pub(crate) fn then_output(mut self, chunk: &str) -> Self {
        self.chunks.push_back(chunk.as_bytes().to_vec());
        self
    }

    /// A poll that returns nothing.
    pub(crate) fn then_silence(mut self) -> Self {
        self.chunks.push_back(Vec::new());
        self
    }

    pub(crate) fn log(&self) -> Arc<Mutex<ShellLog>> {
        self.log.clone()
    }
}

#[async_trait]
impl ShellChannel for ScriptedShell {
    async fn send(&mut self, data: &[u8]) -> Result<(), String> {
        self.log
            .lock()
            .unwrap()
            .sent
            .push(String::from_utf8_lossy(data).into_owned());
        Ok(())
    }

    async fn read_available(&mut self) -> Result<Vec<u8>, String> {
        self.log.lock().unwrap().polls += 1;
        Ok(self.chunks.pop_front().unwrap_or_default())
    }

    async fn close(&mut self) -> Result<(), String> {
        self.log.lock().unwrap().closed = true;
        Ok(())
    }
}

#[derive(Debug, Clone)]
enum Node {
    File { data: Vec<u8>, mode: u32 },
    Dir { mode: u32 },
}

const S_IFREG: u32 = 0o100000;
const S_IFDIR: u32 = 0o040000;

fn parent_of(path: &str) -> String {
    match path.rsplit_once('/') {
        Some(("", _)) => "/".to_string(),
        Some((parent, _)) => parent.to_string(),
        None => ".".to_string(),
    }
}

fn normalize(path: &str) -> String {
    if path.len() > 1 {
        path.trim_end_matches('/').to_string()
    } else {
        path.to_string()
    }
}

/// Appends straight into the file node it was created for.
struct MemoryWriter {
    nodes: Arc<Mutex<BTreeMap<String, Node>>>,
    path: String,
    writes: Arc<AtomicUsize>,
}

impl AsyncWrite for MemoryWriter {
    fn poll_write(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        match self.nodes.lock().unwrap().get_mut(&self.path) {
            Some(Node::File { data, .. }) => {
                data.extend_from_slice(buf);
                Poll::Ready(Ok(buf.len()))
            }
            _ => Poll::Ready(Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("{} vanished while writing", self.path),
            ))),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }
}

pub(crate) struct MemoryFiles {
    nodes: Arc<Mutex<BTreeMap<String, Node>>>,
    metadata_error: Mutex<Option<String>>,
    closed: AtomicBool,
    writes: Arc<AtomicUsize>,
}

impl MemoryFiles {
    pub(crate) fn new() -> Self {
        let mut nodes = BTreeMap::new();
        nodes.insert("/".to_string(), Node::Dir { mode: S_IFDIR | 0o755 });
        nodes.insert(".".to_string(), Node::Dir { mode: S_IFDIR | 0o755 });
        Self {
            nodes: Arc::new(Mutex::new(nodes)),
            metadata_error: Mutex::new(None),
            closed: AtomicBool::new(false),
            writes: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Number of `poll_write` calls accepted by writers from `create`.
    pub(crate) fn write_calls(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    pub(crate) fn add_dir(&self, path: &str) {
        self.nodes
            .lock()
            .unwrap()
            .insert(normalize(path), Node::Dir { mode: S_IFDIR | 0o755 });
    }

    pub(crate) fn add_file(&self, path: &str, data: &[u8]) {
        self.nodes.lock().unwrap().insert(
            normalize(path),
            Node::File {
                data: data.to_vec(),
                mode: S_IFREG | 0o644,
            },
        );
    }

    /// Make every `metadata` call fail with a non-"not found" error.
    pub(crate) fn fail_metadata(&self, message: &str) {
        *self.metadata_error.lock().unwrap() = Some(message.to_string());
    }

    pub(crate) fn file(&self, path: &str) -> Option<Vec<u8>> {
        match self.nodes.lock().unwrap().get(&normalize(path)) {
            Some(Node::File { data, .. }) => Some(data.clone()),
            _ => None,
        }
    }

    pub(crate) fn mode(&self, path: &str) -> Option<u32> {
        self.nodes
            .lock()
            .unwrap()
            .get(&normalize(path))
            .map(|node| match node {
                Node::File { mode, .. } | Node::Dir { mode } => *mode,
            })
    }

    pub(crate) fn is_dir(&self, path: &str) -> bool {
        matches!(
            self.nodes.lock().unwrap().get(&normalize(path)),
            Some(Node::Dir { .. })
        )
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn describe(node: &Node) -> RemoteMetadata {
        match node {
            Node::File { data, mode } => RemoteMetadata {
                kind: RemoteFileKind::File,
                size: data.len() as u64,
                permissions: Some(*mode),
                modified: Some(1_700_000_000),
                uid: Some(1000),
                gid: Some(1000),
            },
            Node::Dir { mode } => RemoteMetadata {
                kind: RemoteFileKind::Directory,
                size: 4096,
                permissions: Some(*mode),
                modified: Some(1_700_000_000),
                uid: Some(0),
                gid: Some(0),
            },
        }
    }
}

#[async_trait]
impl FileChannel for MemoryFiles {
    async fn metadata(&self, path: &str) -> Result<RemoteMetadata, FileChannelError> {
        if let Some(message) = self.metadata_error.lock().unwrap().clone() {
            return Err(FileChannelError::Other(message));
        }
        self.nodes
            .lock()
            .unwrap()
            .get(&normalize(path))
            .map(Self::describe)
            .ok_or_else(|| FileChannelError::NotFound(path.to_string()))
    }

    async fn read_dir(&self, path: &str) -> Result<Vec<RemoteDirEntry>, FileChannelError> {
        let dir = normalize(path);
        let nodes = self.nodes.lock().unwrap();
        match nodes.get(&dir) {
            Some(Node::Dir { .. }) => {}
            Some(Node::File { .. }) => {
                return Err(FileChannelError::Other(format!("Not a directory: {}", path)));
            }
            None => return Err(FileChannelError::NotFound(path.to_string())),
        }
        Ok(nodes
            .iter()
            .filter(|(key, _)| key.as_str() != dir && parent_of(key) == dir)
            .map(|(key, node)| RemoteDirEntry {
                name: key.rsplit('/').next().unwrap_or(key).to_string(),
                metadata: Self::describe(node),
            })
            .collect())
    }

    async fn open_read(&self, path: &str) -> Result<Box<dyn RemoteReader>, FileChannelError> {
        match self.nodes.lock().unwrap().get(&normalize(path)) {
            Some(Node::File { data, .. }) => Ok(Box::new(std::io::Cursor::new(data.clone()))),
            Some(Node::Dir { .. }) => Err(FileChannelError::Other(format!(
                "Is a directory: {}",
                path
            ))),
            None => Err(FileChannelError::NotFound(path.to_string())),
        }
    }

    async fn create(&self, path: &str) -> Result<Box<dyn RemoteWriter>, FileChannelError> {
        let path = normalize(path);
        let mut nodes = self.nodes.lock().unwrap();
        let parent = parent_of(&path);
        if !matches!(nodes.get(&parent), Some(Node::Dir { .. })) {
            return Err(FileChannelError::NotFound(parent));
        }
        match nodes.get_mut(&path) {
            Some(Node::File { data, .. }) => data.clear(),
            Some(Node::Dir { .. }) => {
                return Err(FileChannelError::Other(format!("Is a directory: {}", path)));
            }
            None => {
                nodes.insert(
                    path.clone(),
                    Node::File {
                        data: Vec::new(),
                        mode: S_IFREG | 0o644,
                    },
                );
            }
        }
        Ok(Box::new(MemoryWriter {
            nodes: self.nodes.clone(),
            path,
            writes: self.writes.clone(),
        }))
    }

    async fn create_dir(&self, path: &str) -> Result<(), FileChannelError> {
        let path = normalize(path);
        let mut nodes = self.nodes.lock().unwrap();
        if nodes.contains_key(&path) {
            return Err(FileChannelError::Other(format!("Failure: {} already exists", path)));
        }
        let parent = parent_of(&path);
        if !matches!(nodes.get(&parent), Some(Node::Dir { .. })) {
            return Err(FileChannelError::NotFound(parent));
        }
        nodes.insert(path, Node::Dir { mode: S_IFDIR | 0o755 });
        Ok(())
    }

    async fn set_permissions(&self, path: &str, new_mode: u32) -> Result<(), FileChannelError> {
        match self.nodes.lock().unwrap().get_mut(&normalize(path)) {
            Some(Node::File { mode, .. }) => {
                *mode = S_IFREG | (new_mode & 0o7777);
                Ok(())
            }
            Some(Node::Dir { mode }) => {
                *mode = S_IFDIR | (new_mode & 0o7777);
                Ok(())
            }
            None => Err(FileChannelError::NotFound(path.to_string())),
        }
    }

    async fn close(&self) -> Result<(), FileChannelError> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}
