//! File transfer over a session's file sub-channel.
//!
//! Recursive transfers walk the tree with an explicit work stack of
//! `(source dir, target dir)` pairs instead of recursion. A directory is
//! always created on the target side before any of its children are pushed,
//! so parents exist before their entries are written. Symbolic links and
//! special files met during a walk are skipped.
//!
//! Remote paths are plain `/`-joined strings; local paths are `PathBuf`s.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

use super::error::ManagerError;
use super::session::Session;
use super::transport::{FileChannel, FileChannelError, RemoteFileKind};
use super::types::{FileEntry, TransferSummary};

const UPLOAD: &str = "upload";
const DOWNLOAD: &str = "download";
const LIST_DIRECTORY: &str = "list_directory";

/// Join a remote directory and an entry name, collapsing a doubled separator.
pub(crate) fn join_remote(dir: &str, name: &str) -> String {
    if dir.ends_with('/') {
        format!("{}{}", dir, name)
    } else {
        format!("{}/{}", dir, name)
    }
}

fn file_channel<'a>(
    session: &'a Session,
    operation: &'static str,
    local_path: Option<&str>,
    remote_path: &str,
) -> Result<&'a Arc<dyn FileChannel>, ManagerError> {
    session.files().ok_or_else(|| {
        ManagerError::file_operation(
            operation,
            local_path,
            Some(remote_path),
            format!("SFTP not available on {}", session.id),
        )
    })
}

#[cfg(unix)]
fn local_mode(metadata: &std::fs::Metadata) -> Option<u32> {
    use std::os::unix::fs::PermissionsExt;
    Some(metadata.permissions().mode() & 0o7777)
}

#[cfg(not(unix))]
fn local_mode(_metadata: &std::fs::Metadata) -> Option<u32> {
    None
}

/// Copy a local file or directory tree to `remote_path`.
pub(crate) async fn upload(
    session: &Session,
    local_path: &Path,
    remote_path: &str,
    recursive: bool,
    preserve_permissions: bool,
) -> Result<TransferSummary, ManagerError> {
    let local_display = local_path.display().to_string();
    let metadata = tokio::fs::metadata(local_path).await.map_err(|e| {
        if e.kind() == io::ErrorKind::NotFound {
            ManagerError::LocalPathNotFound {
                path: local_display.clone(),
            }
        } else {
            upload_error(local_path, remote_path, e)
        }
    })?;

    let files = file_channel(session, UPLOAD, Some(&local_display), remote_path)?;
    let mut summary = TransferSummary::default();

    if !metadata.is_dir() {
        summary.bytes =
            upload_file(files.as_ref(), local_path, remote_path, preserve_permissions).await?;
        summary.files = 1;
    } else if !recursive {
        return Err(ManagerError::DirectoryRequiresRecursive { path: local_display });
    } else {
        let mut pending: Vec<(PathBuf, String)> =
            vec![(local_path.to_path_buf(), remote_path.to_string())];

        while let Some((local_dir, remote_dir)) = pending.pop() {
            ensure_remote_dir(files.as_ref(), &local_dir, &remote_dir).await?;
            summary.directories += 1;

            let mut entries = tokio::fs::read_dir(&local_dir)
                .await
                .map_err(|e| upload_error(&local_dir, &remote_dir, e))?;

            while let Some(entry) = entries
                .next_entry()
                .await
                .map_err(|e| upload_error(&local_dir, &remote_dir, e))?
            {
                let child_local = entry.path();
                let child_remote = join_remote(&remote_dir, &entry.file_name().to_string_lossy());
                let file_type = entry
                    .file_type()
                    .await
                    .map_err(|e| upload_error(&child_local, &child_remote, e))?;

                if file_type.is_dir() {
                    pending.push((child_local, child_remote));
                } else if file_type.is_file() {
                    let size =
                        upload_file(files.as_ref(), &child_local, &child_remote, preserve_permissions)
                            .await?;
                    summary.files += 1;
                    summary.bytes += size;
                } else {
                    debug!("Skipping special file {}", child_local.display());
                }
            }
        }
    }

    info!(
        "Uploaded {} -> {}:{} ({} files, {} directories, {} bytes)",
        local_display, session.id, remote_path, summary.files, summary.directories, summary.bytes
    );
    Ok(summary)
}

fn upload_error(local: &Path, remote: &str, cause: impl std::fmt::Display) -> ManagerError {
    ManagerError::file_operation(
        UPLOAD,
        Some(&local.display().to_string()),
        Some(remote),
        cause,
    )
}

/// Stream one local file to `remote_path`, returning the byte count.
async fn upload_file(
    files: &dyn FileChannel,
    local_path: &Path,
    remote_path: &str,
    preserve_permissions: bool,
) -> Result<u64, ManagerError> {
    let mut local = tokio::fs::File::open(local_path)
        .await
        .map_err(|e| upload_error(local_path, remote_path, e))?;

    let mut remote = files
        .create(remote_path)
        .await
        .map_err(|e| upload_error(local_path, remote_path, e))?;

    let bytes = tokio::io::copy(&mut local, &mut remote)
        .await
        .map_err(|e| upload_error(local_path, remote_path, e))?;
    remote
        .shutdown()
        .await
        .map_err(|e| upload_error(local_path, remote_path, e))?;

    if preserve_permissions {
        let metadata = local
            .metadata()
            .await
            .map_err(|e| upload_error(local_path, remote_path, e))?;
        if let Some(mode) = local_mode(&metadata) {
            files
                .set_permissions(remote_path, mode)
                .await
                .map_err(|e| upload_error(local_path, remote_path, e))?;
        }
    }

    debug!(
        "Uploaded {} -> {} ({} bytes)",
        local_path.display(),
        remote_path,
        bytes
    );
    Ok(bytes)
}

/// Create `remote_dir`, accepting a directory that already exists.
async fn ensure_remote_dir(
    files: &dyn FileChannel,
    local_dir: &Path,
    remote_dir: &str,
) -> Result<(), ManagerError> {
    match files.create_dir(remote_dir).await {
        Ok(()) => Ok(()),
        Err(create_error) => match files.metadata(remote_dir).await {
            Ok(meta) if meta.is_dir() => Ok(()),
            _ => Err(upload_error(local_dir, remote_dir, create_error)),
        },
    }
}

/// Copy a remote file or directory tree to `local_path`.
pub(crate) async fn download(
    session: &Session,
    remote_path: &str,
    local_path: &Path,
    recursive: bool,
) -> Result<TransferSummary, ManagerError> {
    let local_display = local_path.display().to_string();
    let files = file_channel(session, DOWNLOAD, Some(&local_display), remote_path)?;

    let metadata = files
        .metadata(remote_path)
        .await
        .map_err(|e| match e {
            FileChannelError::NotFound(_) => ManagerError::RemotePathNotFound {
                path: remote_path.to_string(),
            },
            other => download_error(local_path, remote_path, other),
        })?;

    let mut summary = TransferSummary::default();

    if !metadata.is_dir() {
        summary.bytes = download_file(files.as_ref(), remote_path, local_path).await?;
        summary.files = 1;
    } else if !recursive {
        return Err(ManagerError::DirectoryRequiresRecursive {
            path: remote_path.to_string(),
        });
    } else {
        let mut pending: Vec<(String, PathBuf)> =
            vec![(remote_path.to_string(), local_path.to_path_buf())];

        while let Some((remote_dir, local_dir)) = pending.pop() {
            tokio::fs::create_dir_all(&local_dir)
                .await
                .map_err(|e| download_error(&local_dir, &remote_dir, e))?;
            summary.directories += 1;

            let entries = files
                .read_dir(&remote_dir)
                .await
                .map_err(|e| download_error(&local_dir, &remote_dir, e))?;

            for entry in entries {
                let child_remote = join_remote(&remote_dir, &entry.name);
                let child_local = local_dir.join(&entry.name);

                match entry.metadata.kind {
                    RemoteFileKind::Directory => pending.push((child_remote, child_local)),
                    RemoteFileKind::File => {
                        summary.bytes +=
                            download_file(files.as_ref(), &child_remote, &child_local).await?;
                        summary.files += 1;
                    }
                    RemoteFileKind::Other => {
                        debug!("Skipping special remote entry {}", child_remote);
                    }
                }
            }
        }
    }

    info!(
        "Downloaded {}:{} -> {} ({} files, {} directories, {} bytes)",
        session.id, remote_path, local_display, summary.files, summary.directories, summary.bytes
    );
    Ok(summary)
}

fn download_error(local: &Path, remote: &str, cause: impl std::fmt::Display) -> ManagerError {
    ManagerError::file_operation(
        DOWNLOAD,
        Some(&local.display().to_string()),
        Some(remote),
        cause,
    )
}

/// Stream one remote file to `local_path`, creating missing local parents.
async fn download_file(
    files: &dyn FileChannel,
    remote_path: &str,
    local_path: &Path,
) -> Result<u64, ManagerError> {
    let mut remote = files
        .open_read(remote_path)
        .await
        .map_err(|e| download_error(local_path, remote_path, e))?;

    if let Some(parent) = local_path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| download_error(local_path, remote_path, e))?;
    }

    let mut local = tokio::fs::File::create(local_path)
        .await
        .map_err(|e| download_error(local_path, remote_path, e))?;

    let bytes = tokio::io::copy(&mut remote, &mut local)
        .await
        .map_err(|e| download_error(local_path, remote_path, e))?;
    local
        .flush()
        .await
        .map_err(|e| download_error(local_path, remote_path, e))?;

    debug!(
        "Downloaded {} -> {} ({} bytes)",
        remote_path,
        local_path.display(),
        bytes
    );
    Ok(bytes)
}

/// List `remote_path` in directory enumeration order.
pub(crate) async fn list(
    session: &Session,
    remote_path: &str,
    detailed: bool,
) -> Result<Vec<FileEntry>, ManagerError> {
    let files = file_channel(session, LIST_DIRECTORY, None, remote_path)?;

    let entries = files.read_dir(remote_path).await.map_err(|e| match e {
        FileChannelError::NotFound(_) => ManagerError::RemotePathNotFound {
            path: remote_path.to_string(),
        },
        other => ManagerError::file_operation(LIST_DIRECTORY, None, Some(remote_path), other),
    })?;

    Ok(entries
        .into_iter()
        .map(|entry| {
            let path = join_remote(remote_path, &entry.name);
            if !detailed {
                return FileEntry::simple(entry.name, path);
            }
            let meta = entry.metadata;
            FileEntry {
                is_directory: meta.is_dir(),
                size: meta.size,
                permissions: meta
                    .permissions
                    .map(|mode| format!("{:03o}", mode & 0o777))
                    .unwrap_or_else(|| "000".to_string()),
                modified_time: meta.modified.unwrap_or(0),
                owner: meta
                    .uid
                    .map(|uid| uid.to_string())
                    .unwrap_or_else(|| "unknown".to_string()),
                group: meta
                    .gid
                    .map(|gid| gid.to_string())
                    .unwrap_or_else(|| "unknown".to_string()),
                name: entry.name,
                path,
            }
        })
        .collect())
}

/// Whether `remote_path` exists; any failure counts as "no".
pub(crate) async fn exists(session: &Session, remote_path: &str) -> bool {
    let Some(files) = session.files() else {
        return false;
    };
    match files.metadata(remote_path).await {
        Ok(_) => true,
        Err(FileChannelError::NotFound(_)) => false,
        Err(e) => {
            debug!("Treating stat failure on {} as absent: {}", remote_path, e);
            false
        }
    }
}
