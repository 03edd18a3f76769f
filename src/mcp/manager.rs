//! Connection manager: session pool, capacity policy and operation routing.
//!
//! # Pool Discipline
//!
//! The pool map is the only structure behind the manager's lock. The lock is
//! held for map reads and mutations only, never across network I/O:
//!
//! - `create` checks capacity (evicting stale sessions if full), connects
//!   without the lock, then re-checks capacity and inserts.
//! - `disconnect` and eviction remove entries under the lock and close the
//!   removed sessions afterwards, so an id is either fully pooled or absent.
//!
//! Operations on a looked-up session run concurrently with pool maintenance.
//! Two concurrent operations on the same session id are not isolated from
//! each other; serialising them is up to the caller.

use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::join_all;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::client::RusshConnector;
use super::config::ManagerConfig;
use super::error::ManagerError;
use super::executor;
use super::session::{Session, StalenessPolicy};
use super::sysinfo;
use super::transfer;
use super::transport::{ConnectRequest, Connector, Credential};
use super::types::{CommandOutcome, CommandResult, FileEntry, SessionInfo, TransferSummary};

/// Owns the pool of live sessions.
pub struct ConnectionManager {
    config: ManagerConfig,
    connector: Arc<dyn Connector>,
    sessions: Mutex<HashMap<String, Arc<Session>>>,
}

/// Build a session id of the form `ssh_<8 hex>_<host>_<username>`.
fn generate_session_id(host: &str, username: &str) -> String {
    let token = Uuid::new_v4().simple().to_string();
    format!("ssh_{}_{}_{}", &token[..8], host, username)
}

impl ConnectionManager {
    /// A manager that connects with russh.
    pub fn new(config: ManagerConfig) -> Self {
        let connector = Arc::new(RusshConnector::new(&config));
        Self::with_connector(config, connector)
    }

    /// A manager that connects through `connector`.
    pub fn with_connector(config: ManagerConfig, connector: Arc<dyn Connector>) -> Self {
        Self {
            config,
            connector,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &ManagerConfig {
        &self.config
    }

    /// Connect, authenticate and pool a new session, returning its id.
    pub async fn create(
        &self,
        host: &str,
        username: &str,
        credential: Credential,
        port: u16,
        timeout: Duration,
    ) -> Result<String, ManagerError> {
        let max = self.config.max_connections;

        let at_capacity = self.sessions.lock().await.len() >= max;
        if at_capacity {
            info!("Pool at capacity ({}), evicting stale sessions", max);
            self.evict_stale().await;
            if self.sessions.lock().await.len() >= max {
                return Err(ManagerError::CapacityExceeded { max });
            }
        }

        let request = ConnectRequest {
            host: host.to_string(),
            port,
            username: username.to_string(),
            credential,
            timeout,
        };
        let connected = self.connector.connect(&request).await?;

        let mut sessions = self.sessions.lock().await;
        if sessions.len() >= max {
            drop(sessions);
            warn!(
                "Pool filled up while connecting to {}@{}:{}, dropping new connection",
                username, host, port
            );
            if let Some(files) = &connected.files
                && let Err(e) = files.close().await
            {
                warn!("Error closing file channel of dropped connection: {}", e);
            }
            if let Err(e) = connected.connection.close().await {
                warn!("Error closing dropped connection to {}:{}: {}", host, port, e);
            }
            return Err(ManagerError::CapacityExceeded { max });
        }

        let mut session_id = generate_session_id(host, username);
        while sessions.contains_key(&session_id) {
            session_id = generate_session_id(host, username);
        }

        let session = Session::new(
            session_id.clone(),
            host.to_string(),
            port,
            username.to_string(),
            connected.connection,
            connected.files,
            self.config.history_limit,
        );
        sessions.insert(session_id.clone(), Arc::new(session));

        info!(
            "SSH connection established: {} ({}@{}:{}, {} pooled)",
            session_id,
            username,
            host,
            port,
            sessions.len()
        );
        Ok(session_id)
    }

    /// Remove and close a session. Returns `false` if the id is unknown.
    pub async fn disconnect(&self, session_id: &str) -> bool {
        let removed = self.sessions.lock().await.remove(session_id);
        match removed {
            Some(session) => {
                if !session.close().await {
                    warn!("Session {} closed with errors", session_id);
                }
                info!("Disconnected session {}", session_id);
                true
            }
            None => {
                debug!("Disconnect requested for unknown session {}", session_id);
                false
            }
        }
    }

    /// Fetch a pooled session and mark it used. Does not probe.
    pub async fn lookup(&self, session_id: &str) -> Result<Arc<Session>, ManagerError> {
        let session = self
            .sessions
            .lock()
            .await
            .get(session_id)
            .cloned()
            .ok_or_else(|| ManagerError::SessionNotFound {
                session_id: session_id.to_string(),
            })?;
        session.touch().await;
        Ok(session)
    }

    /// Snapshot of every pooled session, in no particular order.
    pub async fn list(&self) -> Vec<SessionInfo> {
        let sessions: Vec<Arc<Session>> = self.sessions.lock().await.values().cloned().collect();
        let mut infos = Vec::with_capacity(sessions.len());
        for session in sessions {
            infos.push(session.info().await);
        }
        infos
    }

    pub async fn len(&self) -> usize {
        self.sessions.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.lock().await.is_empty()
    }

    /// Liveness test of a pooled session.
    pub async fn probe(&self, session_id: &str) -> Result<bool, ManagerError> {
        let session = self.lookup(session_id).await?;
        Ok(session.probe(self.config.probe_timeout).await)
    }

    /// Remove every session past its age or idle budget, or already disconnected.
    ///
    /// Returns the number of sessions evicted. Close failures are logged only.
    pub async fn evict_stale(&self) -> usize {
        self.evict_stale_at(Instant::now()).await
    }

    pub(crate) async fn evict_stale_at(&self, now: Instant) -> usize {
        let policy = StalenessPolicy {
            max_age: self.config.max_session_age,
            max_idle: self.config.max_session_idle,
        };

        let evicted: Vec<Arc<Session>> = {
            let mut sessions = self.sessions.lock().await;
            let mut stale_ids = Vec::new();
            for (id, session) in sessions.iter() {
                if session.is_stale(now, policy).await {
                    stale_ids.push(id.clone());
                }
            }
            stale_ids
                .iter()
                .filter_map(|id| sessions.remove(id))
                .collect()
        };

        let count = evicted.len();
        join_all(evicted.iter().map(|session| async move {
            if !session.close().await {
                warn!("Error cleaning up stale session {}", session.id);
            }
        }))
        .await;

        if count > 0 {
            info!("Evicted {} stale session(s)", count);
        }
        count
    }

    /// Disconnect every pooled session.
    pub async fn shutdown(&self) {
        let drained: Vec<Arc<Session>> = self
            .sessions
            .lock()
            .await
            .drain()
            .map(|(_, session)| session)
            .collect();

        let count = drained.len();
        join_all(drained.iter().map(|session| async move {
            if !session.close().await {
                warn!("Error cleaning up session {} during shutdown", session.id);
            }
        }))
        .await;
        info!("Connection manager shut down ({} session(s) closed)", count);
    }

    pub async fn execute(
        &self,
        session_id: &str,
        command: &str,
        timeout: Duration,
    ) -> Result<CommandResult, ManagerError> {
        let session = self.lookup(session_id).await?;
        executor::execute(&session, command, timeout, self.config.probe_timeout).await
    }

    pub async fn execute_multi(
        &self,
        session_id: &str,
        commands: &[String],
        timeout: Duration,
        stop_on_error: bool,
    ) -> Result<Vec<CommandOutcome>, ManagerError> {
        let session = self.lookup(session_id).await?;
        Ok(executor::execute_multi(
            &session,
            commands,
            timeout,
            stop_on_error,
            self.config.probe_timeout,
        )
        .await)
    }

    pub async fn execute_interactive(
        &self,
        session_id: &str,
        command: &str,
        expect_prompts: &[String],
        responses: &[String],
        timeout: Duration,
    ) -> Result<CommandResult, ManagerError> {
        let session = self.lookup(session_id).await?;
        executor::execute_interactive(
            &session,
            command,
            expect_prompts,
            responses,
            timeout,
            self.config.probe_timeout,
            self.config.interactive,
        )
        .await
    }

    pub async fn upload(
        &self,
        session_id: &str,
        local_path: &Path,
        remote_path: &str,
        recursive: bool,
        preserve_permissions: bool,
    ) -> Result<TransferSummary, ManagerError> {
        let session = self.lookup(session_id).await?;
        transfer::upload(&session, local_path, remote_path, recursive, preserve_permissions).await
    }

    pub async fn download(
        &self,
        session_id: &str,
        remote_path: &str,
        local_path: &Path,
        recursive: bool,
    ) -> Result<TransferSummary, ManagerError> {
        let session = self.lookup(session_id).await?;
        transfer::download(&session, remote_path, local_path, recursive).await
    }

    pub async fn list_directory(
        &self,
        session_id: &str,
        remote_path: &str,
        detailed: bool,
    ) -> Result<Vec<FileEntry>, ManagerError> {
        let session = self.lookup(session_id).await?;
        transfer::list(&session, remote_path, detailed).await
    }

    pub async fn file_exists(&self, session_id: &str, remote_path: &str) -> Result<bool, ManagerError> {
        let session = self.lookup(session_id).await?;
        Ok(transfer::exists(&session, remote_path).await)
    }

    pub async fn system_info(
        &self,
        session_id: &str,
    ) -> Result<BTreeMap<String, String>, ManagerError> {
        let session = self.lookup(session_id).await?;
        Ok(sysinfo::collect(&session, self.config.probe_timeout).await)
    }

    /// The newest `limit` history entries, oldest first.
    pub async fn command_history(
        &self,
        session_id: &str,
        limit: usize,
    ) -> Result<Vec<String>, ManagerError> {
        let session = self.lookup(session_id).await?;
        Ok(session.history(limit).await)
    }

    /// Open a local port forward on a pooled session.
    #[cfg(feature = "port_forward")]
    pub async fn forward(
        &self,
        session_id: &str,
        local_port: u16,
        remote_host: &str,
        remote_port: u16,
    ) -> Result<(String, std::net::SocketAddr), ManagerError> {
        let session = self.lookup(session_id).await?;
        super::forward::setup_port_forwarding(&session, local_port, remote_host, remote_port).await
    }
}
