//! Pooled SSH sessions and the russh client handler.
//!
//! # Architecture
//!
//! - `SshClientHandler`: A russh client handler that accepts all host keys (similar to
//!   `StrictHostKeyChecking=no` in OpenSSH).
//! - `Session`: one authenticated connection plus its file sub-channel, usage
//!   timestamps, liveness flag, bounded command history and open tunnels.
//!
//! # Thread Safety
//!
//! Sessions are shared as `Arc<Session>` between the pool and in-flight
//! operations. Mutable bookkeeping sits behind its own small lock or atomic so
//! a running command never blocks pool maintenance. Two concurrent operations
//! on the same session are not isolated from each other at the transport level.

use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use russh::{client, keys};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::transport::{FileChannel, RemoteConnection};
use super::types::SessionInfo;

/// Token echoed by the liveness probe.
pub(crate) const PROBE_TOKEN: &str = "test";

/// Client handler for russh that accepts all host keys.
///
/// # Security Note
///
/// In production environments, you should implement proper host key verification
/// against a known_hosts file to prevent man-in-the-middle attacks.
pub struct SshClientHandler;

impl client::Handler for SshClientHandler {
    type Error = russh::Error;

    async fn check_server_key(
        &mut self,
        _server_public_key: &keys::PublicKey,
    ) -> Result<bool, Self::Error> {
        Ok(true)
    }
}

/// Insertion-ordered command log that keeps only the newest `capacity` entries.
#[derive(Debug, Clone)]
pub struct CommandHistory {
    entries: VecDeque<String>,
    capacity: usize,
}

impl CommandHistory {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(capacity.min(128)),
            capacity,
        }
    }

    pub fn push(&mut self, command: impl Into<String>) {
        if self.capacity == 0 {
            return;
        }
        while self.entries.len() >= self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(command.into());
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The newest `limit` entries, oldest first.
    pub fn last(&self, limit: usize) -> Vec<String> {
        let skip = self.entries.len().saturating_sub(limit);
        self.entries.iter().skip(skip).cloned().collect()
    }
}

/// A local port forward owned by a session.
pub struct Tunnel {
    pub local_address: SocketAddr,
    pub remote_address: String,
    cancel_token: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl Tunnel {
    pub fn new(
        local_address: SocketAddr,
        remote_address: String,
        cancel_token: CancellationToken,
        task: JoinHandle<()>,
    ) -> Self {
        Self {
            local_address,
            remote_address,
            cancel_token,
            task: Mutex::new(Some(task)),
        }
    }

    /// Stop accepting connections and wait briefly for the accept loop to exit.
    pub async fn close(&self) -> Result<(), String> {
        self.cancel_token.cancel();
        let task = self.task.lock().await.take();
        if let Some(task) = task {
            match tokio::time::timeout(Duration::from_secs(2), task).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => return Err(format!("Tunnel task failed: {}", e)),
                Err(_) => return Err("Tunnel task did not stop within 2s".to_string()),
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy)]
struct UsageStamp {
    at: Instant,
    wall: DateTime<Utc>,
}

impl UsageStamp {
    fn now() -> Self {
        Self {
            at: Instant::now(),
            wall: Utc::now(),
        }
    }
}

/// Lifecycle thresholds checked during eviction.
#[derive(Debug, Clone, Copy)]
pub struct StalenessPolicy {
    pub max_age: Duration,
    pub max_idle: Duration,
}

/// One pooled, authenticated remote connection.
pub struct Session {
    pub id: String,
    pub host: String,
    pub port: u16,
    pub username: String,
    connection: Arc<dyn RemoteConnection>,
    files: Option<Arc<dyn FileChannel>>,
    created: UsageStamp,
    last_used: Mutex<UsageStamp>,
    connected: AtomicBool,
    history: Mutex<CommandHistory>,
    pub(crate) tunnels: DashMap<String, Tunnel>,
}

impl Session {
    pub fn new(
        id: String,
        host: String,
        port: u16,
        username: String,
        connection: Arc<dyn RemoteConnection>,
        files: Option<Arc<dyn FileChannel>>,
        history_limit: usize,
    ) -> Self {
        let created = UsageStamp::now();
        Self {
            id,
            host,
            port,
            username,
            connection,
            files,
            created,
            last_used: Mutex::new(created),
            connected: AtomicBool::new(true),
            history: Mutex::new(CommandHistory::new(history_limit)),
            tunnels: DashMap::new(),
        }
    }

    pub fn connection(&self) -> &Arc<dyn RemoteConnection> {
        &self.connection
    }

    pub fn files(&self) -> Option<&Arc<dyn FileChannel>> {
        self.files.as_ref()
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    pub(crate) fn mark_disconnected(&self) {
        self.connected.store(false, Ordering::SeqCst);
    }

    pub(crate) async fn touch(&self) {
        *self.last_used.lock().await = UsageStamp::now();
    }

    #[cfg(test)]
    pub(crate) async fn set_last_used(&self, at: Instant) {
        self.last_used.lock().await.at = at;
    }

    pub(crate) async fn record_command(&self, command: impl Into<String>) {
        self.history.lock().await.push(command);
    }

    /// The newest `limit` history entries, oldest first.
    pub async fn history(&self, limit: usize) -> Vec<String> {
        self.history.lock().await.last(limit)
    }

    pub async fn history_len(&self) -> usize {
        self.history.lock().await.len()
    }

    /// Liveness check: transport open and an echo round-trip returns the token.
    ///
    /// The round-trip, channel setup included, is bounded by `timeout`. Any
    /// failure flips the session to disconnected; a passing probe never flips
    /// it back.
    pub async fn probe(&self, timeout: Duration) -> bool {
        if !self.connection.is_active() {
            warn!("Session {} transport is no longer active", self.id);
            self.mark_disconnected();
            return false;
        }

        let command = format!("echo {}", PROBE_TOKEN);
        let round_trip = tokio::time::timeout(timeout, self.connection.exec(&command, timeout));
        match round_trip.await {
            Err(_) => {
                warn!("Probe on session {} got no answer within {:?}", self.id, timeout);
                self.mark_disconnected();
                false
            }
            Ok(Ok(output)) if !output.timed_out && output.stdout.trim() == PROBE_TOKEN => true,
            Ok(Ok(output)) => {
                warn!(
                    "Probe on session {} returned unexpected output (timed_out={}, stdout={:?})",
                    self.id, output.timed_out, output.stdout
                );
                self.mark_disconnected();
                false
            }
            Ok(Err(e)) => {
                warn!("Probe on session {} failed: {}", self.id, e);
                self.mark_disconnected();
                false
            }
        }
    }

    /// Whether the session is past its age or idle budget, or already dead.
    pub(crate) async fn is_stale(&self, now: Instant, policy: StalenessPolicy) -> bool {
        let last_used = self.last_used.lock().await.at;
        now.saturating_duration_since(self.created.at) > policy.max_age
            || now.saturating_duration_since(last_used) > policy.max_idle
            || !self.is_connected()
    }

    pub async fn info(&self) -> SessionInfo {
        let last_used = *self.last_used.lock().await;
        SessionInfo {
            session_id: self.id.clone(),
            host: self.host.clone(),
            port: self.port,
            username: self.username.clone(),
            created_at: self.created.wall.to_rfc3339(),
            last_used_at: last_used.wall.to_rfc3339(),
            is_connected: self.is_connected(),
            command_count: self.history_len().await,
            tunnel_count: self.tunnels.len(),
        }
    }

    /// Close tunnels, the file sub-channel and the transport, in that order.
    ///
    /// Errors are logged and reported as `false`; every step is attempted.
    pub(crate) async fn close(&self) -> bool {
        let mut clean = true;

        let tunnel_ids: Vec<String> = self.tunnels.iter().map(|t| t.key().clone()).collect();
        for tunnel_id in tunnel_ids {
            if let Some((_, tunnel)) = self.tunnels.remove(&tunnel_id) {
                if let Err(e) = tunnel.close().await {
                    warn!("Error closing tunnel {} on {}: {}", tunnel_id, self.id, e);
                    clean = false;
                } else {
                    debug!("Closed tunnel {} on {}", tunnel_id, self.id);
                }
            }
        }

        if let Some(files) = &self.files
            && let Err(e) = files.close().await
        {
            warn!("Error closing file channel on {}: {}", self.id, e);
            clean = false;
        }

        if let Err(e) = self.connection.close().await {
            warn!("Error closing connection {}: {}", self.id, e);
            clean = false;
        }

        self.mark_disconnected();
        clean
    }
}
