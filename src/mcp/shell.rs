//! PTY-backed interactive shell channel.
//!
//! The expect/response loop needs to poll whatever output has arrived so far
//! without blocking. `RusshShell` splits the russh channel: a background task
//! drains the read half into a shared buffer while the write half stays
//! available for input.
//!
//! # Architecture
//!
//! - `ChannelWriter`: `Send + Sync` wrapper over the channel write half.
//! - `RusshShell`: buffer, writer and the cancellation token that stops the
//!   background reader on close or drop.

use std::sync::Arc;

use async_trait::async_trait;
use russh::client;
use russh::{ChannelMsg, ChannelReadHalf, ChannelWriteHalf};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::session::SshClientHandler;
use super::transport::ShellChannel;

/// Terminal type requested for the PTY
const TERM: &str = "xterm";

/// PTY size in columns and rows
const PTY_COLS: u32 = 200;
const PTY_ROWS: u32 = 50;

/// Write handle for sending input to a shell channel.
///
/// Wraps `russh::ChannelWriteHalf` to provide a `Send + Sync` interface
/// for writing data to the PTY channel without holding a lock on the read half.
pub struct ChannelWriter {
    pub(crate) write_half: ChannelWriteHalf<client::Msg>,
}

impl ChannelWriter {
    pub fn new(write_half: ChannelWriteHalf<client::Msg>) -> Self {
        Self { write_half }
    }

    /// Send data (text, keystrokes, escape sequences) to the shell.
    pub async fn write(&self, data: &[u8]) -> Result<(), String> {
        self.write_half
            .data(data)
            .await
            .map_err(|e| format!("Failed to write to shell: {}", e))
    }

    /// Close the channel gracefully.
    pub async fn close(&self) -> Result<(), String> {
        self.write_half
            .close()
            .await
            .map_err(|e| format!("Failed to close shell channel: {}", e))
    }
}

/// An open interactive shell on a russh session.
pub struct RusshShell {
    writer: ChannelWriter,
    /// Output received since the last `read_available` (single stream, no stderr separation)
    output: Arc<Mutex<Vec<u8>>>,
    cancel_token: CancellationToken,
    reader: Option<JoinHandle<()>>,
}

impl RusshShell {
    /// Open a session channel, request a PTY and start a login shell on it.
    pub(crate) async fn open(handle: &client::Handle<SshClientHandler>) -> Result<Self, String> {
        let channel = handle
            .channel_open_session()
            .await
            .map_err(|e| format!("Failed to open channel: {}", e))?;

        channel
            .request_pty(true, TERM, PTY_COLS, PTY_ROWS, 0, 0, &[])
            .await
            .map_err(|e| format!("Failed to request PTY: {}", e))?;

        channel
            .request_shell(true)
            .await
            .map_err(|e| format!("Failed to request shell: {}", e))?;

        let (read_half, write_half) = channel.split();
        let output = Arc::new(Mutex::new(Vec::with_capacity(4096)));
        let cancel_token = CancellationToken::new();

        let reader = tokio::spawn(pump_output(
            read_half,
            output.clone(),
            cancel_token.clone(),
        ));

        Ok(Self {
            writer: ChannelWriter::new(write_half),
            output,
            cancel_token,
            reader: Some(reader),
        })
    }
}

/// Append everything the shell prints to `output` until the channel ends or
/// `cancel_token` fires.
async fn pump_output(
    mut read_half: ChannelReadHalf,
    output: Arc<Mutex<Vec<u8>>>,
    cancel_token: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = cancel_token.cancelled() => break,
            msg = read_half.wait() => match msg {
                Some(ChannelMsg::Data { data }) => {
                    output.lock().await.extend_from_slice(&data);
                }
                Some(ChannelMsg::ExtendedData { data, .. }) => {
                    output.lock().await.extend_from_slice(&data);
                }
                Some(ChannelMsg::Eof) | Some(ChannelMsg::Close) | None => {
                    debug!("Interactive shell channel closed by remote");
                    break;
                }
                Some(_) => {}
            }
        }
    }
}

#[async_trait]
impl ShellChannel for RusshShell {
    async fn send(&mut self, data: &[u8]) -> Result<(), String> {
        self.writer.write(data).await
    }

    async fn read_available(&mut self) -> Result<Vec<u8>, String> {
        Ok(std::mem::take(&mut *self.output.lock().await))
    }

    async fn close(&mut self) -> Result<(), String> {
        self.cancel_token.cancel();
        if let Some(reader) = self.reader.take() {
            let _ = reader.await;
        }
        self.writer.close().await
    }
}

impl Drop for RusshShell {
    fn drop(&mut self) {
        self.cancel_token.cancel();
    }
}
