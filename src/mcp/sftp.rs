//! SFTP file sub-channel.
//!
//! Opened eagerly when a session is created, over the `sftp` subsystem of a
//! dedicated session channel. Errors are flattened to [`FileChannelError`],
//! keeping "no such file" distinguishable so callers can report
//! `RemotePathNotFound` or a plain `false`.

use async_trait::async_trait;
use russh::client;
use russh_sftp::client::SftpSession;
use russh_sftp::client::error::Error as SftpError;
use russh_sftp::protocol::{FileAttributes, StatusCode};

use super::session::SshClientHandler;
use super::transport::{
    FileChannel, FileChannelError, RemoteDirEntry, RemoteFileKind, RemoteMetadata, RemoteReader,
    RemoteWriter,
};

/// SFTP-backed [`FileChannel`].
pub struct SftpFiles {
    sftp: SftpSession,
}

impl SftpFiles {
    /// Start the `sftp` subsystem on a fresh session channel.
    pub(crate) async fn open(handle: &client::Handle<SshClientHandler>) -> Result<Self, String> {
        let channel = handle
            .channel_open_session()
            .await
            .map_err(|e| format!("Failed to open channel: {}", e))?;

        channel
            .request_subsystem(true, "sftp")
            .await
            .map_err(|e| format!("Failed to request sftp subsystem: {}", e))?;

        let sftp = SftpSession::new(channel.into_stream())
            .await
            .map_err(|e| format!("Failed to start SFTP session: {}", e))?;

        Ok(Self { sftp })
    }
}

fn classify(path: &str, error: SftpError) -> FileChannelError {
    match &error {
        SftpError::Status(status) if status.status_code == StatusCode::NoSuchFile => {
            FileChannelError::NotFound(path.to_string())
        }
        _ => FileChannelError::Other(error.to_string()),
    }
}

pub(crate) fn to_metadata(attrs: &FileAttributes) -> RemoteMetadata {
    let kind = if attrs.is_dir() {
        RemoteFileKind::Directory
    } else if attrs.is_regular() {
        RemoteFileKind::File
    } else {
        RemoteFileKind::Other
    };

    RemoteMetadata {
        kind,
        size: attrs.size.unwrap_or(0),
        permissions: attrs.permissions,
        modified: attrs.mtime.map(u64::from),
        uid: attrs.uid,
        gid: attrs.gid,
    }
}

#[async_trait]
impl FileChannel for SftpFiles {
    async fn metadata(&self, path: &str) -> Result<RemoteMetadata, FileChannelError> {
        self.sftp
            .metadata(path)
            .await
            .map(|attrs| to_metadata(&attrs))
            .map_err(|e| classify(path, e))
    }

    async fn read_dir(&self, path: &str) -> Result<Vec<RemoteDirEntry>, FileChannelError> {
        let entries = self
            .sftp
            .read_dir(path)
            .await
            .map_err(|e| classify(path, e))?;

        Ok(entries
            .filter_map(|entry| {
                let name = entry.file_name();
                if name == "." || name == ".." {
                    return None;
                }
                Some(RemoteDirEntry {
                    metadata: to_metadata(&entry.metadata()),
                    name,
                })
            })
            .collect())
    }

    async fn open_read(&self, path: &str) -> Result<Box<dyn RemoteReader>, FileChannelError> {
        let file = self.sftp.open(path).await.map_err(|e| classify(path, e))?;
        Ok(Box::new(Box::pin(file)))
    }

    async fn create(&self, path: &str) -> Result<Box<dyn RemoteWriter>, FileChannelError> {
        let file = self.sftp.create(path).await.map_err(|e| classify(path, e))?;
        Ok(Box::new(Box::pin(file)))
    }

    async fn create_dir(&self, path: &str) -> Result<(), FileChannelError> {
        self.sftp
            .create_dir(path)
            .await
            .map_err(|e| classify(path, e))
    }

    async fn set_permissions(&self, path: &str, mode: u32) -> Result<(), FileChannelError> {
        let attrs = FileAttributes {
            permissions: Some(mode),
            ..FileAttributes::default()
        };
        self.sftp
            .set_metadata(path, attrs)
            .await
            .map_err(|e| classify(path, e))
    }

    async fn close(&self) -> Result<(), FileChannelError> {
        self.sftp
            .close()
            .await
            .map_err(|e| FileChannelError::Other(e.to_string()))
    }
}
