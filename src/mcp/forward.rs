//! Local port forwarding through a pooled session.
//!
//! This module provides SSH port forwarding (local tunnel) functionality using the
//! `direct-tcpip` channel type defined in RFC 4254.
//!
//! # Architecture
//!
//! 1. **TCP Listener**: A local TCP listener binds to the specified port on `127.0.0.1`.
//!    When a client connects to this port, a new forwarding task is spawned.
//!
//! 2. **Bidirectional I/O**: Each forwarding task opens a `direct-tcpip` channel
//!    to the remote destination and copies both directions with
//!    `tokio::io::copy` under `tokio::select!` until either side closes.
//!
//! 3. **Ownership**: The tunnel is registered in the session's tunnel map with
//!    its cancellation token and accept-loop task, so disconnecting the
//!    session stops the listener and every relay.
//!
//! # Feature Gate
//!
//! This module is only compiled when the `port_forward` feature is enabled.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};
use uuid::Uuid;

use super::error::ManagerError;
use super::session::{Session, Tunnel};
use super::transport::RemoteConnection;

/// Forward `127.0.0.1:local_port` to `remote_host:remote_port` via `session`.
///
/// Returns the tunnel id and the bound local address (useful when
/// `local_port` is 0).
pub(crate) async fn setup_port_forwarding(
    session: &Session,
    local_port: u16,
    remote_host: &str,
    remote_port: u16,
) -> Result<(String, SocketAddr), ManagerError> {
    let tunnel_failed = |cause: String| ManagerError::TunnelFailed { local_port, cause };

    let listener = TcpListener::bind(("127.0.0.1", local_port))
        .await
        .map_err(|e| tunnel_failed(format!("Failed to bind to local port: {}", e)))?;

    let local_address = listener
        .local_addr()
        .map_err(|e| tunnel_failed(format!("Failed to get local address: {}", e)))?;

    let tunnel_id = format!("tunnel_{}", &Uuid::new_v4().simple().to_string()[..8]);
    let cancel_token = CancellationToken::new();
    let task = tokio::spawn(accept_loop(
        listener,
        session.connection().clone(),
        remote_host.to_string(),
        remote_port,
        cancel_token.clone(),
    ));

    let remote_address = format!("{}:{}", remote_host, remote_port);
    info!(
        "Tunnel {} on {}: {} -> {}",
        tunnel_id, session.id, local_address, remote_address
    );
    session.tunnels.insert(
        tunnel_id.clone(),
        Tunnel::new(local_address, remote_address, cancel_token, task),
    );

    Ok((tunnel_id, local_address))
}

async fn accept_loop(
    listener: TcpListener,
    connection: Arc<dyn RemoteConnection>,
    remote_host: String,
    remote_port: u16,
    cancel_token: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = cancel_token.cancelled() => {
                debug!("Port forwarding listener stopped");
                break;
            }
            accepted = listener.accept() => match accepted {
                Ok((local_stream, client_addr)) => {
                    debug!("New connection from {} to forwarded port", client_addr);
                    let connection = connection.clone();
                    let remote_host = remote_host.clone();
                    let cancel_token = cancel_token.clone();

                    tokio::spawn(async move {
                        if let Err(e) = relay(
                            connection,
                            local_stream,
                            &remote_host,
                            remote_port,
                            cancel_token,
                        )
                        .await
                        {
                            debug!("Port forwarding connection error: {}", e);
                        }
                    });
                }
                Err(e) => {
                    error!("Error accepting connection: {}", e);
                    break;
                }
            }
        }
    }
}

/// Relay one accepted connection over a fresh `direct-tcpip` channel.
async fn relay(
    connection: Arc<dyn RemoteConnection>,
    local_stream: TcpStream,
    remote_host: &str,
    remote_port: u16,
    cancel_token: CancellationToken,
) -> Result<(), String> {
    let channel_stream = connection
        .open_direct_tcpip(remote_host, remote_port)
        .await?;

    let (mut local_read, mut local_write) = tokio::io::split(local_stream);
    let (mut channel_read, mut channel_write) = tokio::io::split(channel_stream);

    let local_to_remote = tokio::io::copy(&mut local_read, &mut channel_write);
    let remote_to_local = tokio::io::copy(&mut channel_read, &mut local_write);

    tokio::select! {
        _ = cancel_token.cancelled() => {}
        result = local_to_remote => {
            if let Err(e) = result {
                debug!("Local to remote copy ended: {}", e);
            }
        }
        result = remote_to_local => {
            if let Err(e) = result {
                debug!("Remote to local copy ended: {}", e);
            }
        }
    }

    debug!("Port forwarding connection closed");
    Ok(())
}
