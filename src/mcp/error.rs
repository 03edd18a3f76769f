//! Error taxonomy for the connection manager and retry classification.
//!
//! Every transport or library failure is caught at an operation boundary and
//! re-wrapped into one [`ManagerError`] variant carrying enough context to
//! render a human-readable message. Raw `russh` / `russh-sftp` errors never
//! escape to callers.
//!
//! # Retry Classification
//!
//! Only [`ManagerError::ConnectionFailed`] is ever retried, and only when its
//! cause looks transient (see [`is_retryable_error`]). Authentication errors
//! take precedence: a cause mentioning both a timeout and an authentication
//! failure is treated as permanent to avoid locking accounts out.

use std::time::Duration;

use thiserror::Error;

/// Errors produced by connection manager operations.
#[derive(Debug, Error)]
pub enum ManagerError {
    /// Transport-level connect failure.
    #[error("SSH connection failed to {host}:{port}: {cause}")]
    ConnectionFailed {
        host: String,
        port: u16,
        cause: String,
    },

    /// The server rejected the supplied credential.
    #[error("Authentication failed for {username} using {method} credentials")]
    AuthenticationFailed {
        username: String,
        method: &'static str,
    },

    /// No registered key parser accepted the private key material.
    #[error("Invalid private key format (tried: {})", .attempted.join(", "))]
    InvalidCredential { attempted: Vec<&'static str> },

    /// Pool is full and nothing could be evicted.
    #[error("Maximum number of connections reached ({max})")]
    CapacityExceeded { max: usize },

    #[error("No active SSH session with ID: {session_id}")]
    SessionNotFound { session_id: String },

    /// The liveness probe failed before an operation.
    #[error("Connection {session_id} is not active")]
    ConnectionInactive { session_id: String },

    /// Transport error while a command was running.
    #[error("Error executing command '{command}': {cause}")]
    CommandExecution { command: String, cause: String },

    #[error("{}", describe_timeout(.command, .timeout, .waiting_for.as_deref()))]
    CommandTimeout {
        command: String,
        timeout: Duration,
        /// Prompt that was still unmatched (interactive mode only)
        waiting_for: Option<String>,
    },

    #[error(
        "Number of expect prompts ({prompts}) must match number of responses ({responses})"
    )]
    ArgumentMismatch { prompts: usize, responses: usize },

    #[error("Local path does not exist: {path}")]
    LocalPathNotFound { path: String },

    #[error("Remote path does not exist: {path}")]
    RemotePathNotFound { path: String },

    #[error("Path is a directory but recursive=false: {path}")]
    DirectoryRequiresRecursive { path: String },

    /// Generic file transfer failure.
    #[error("{}", describe_file_operation(.operation, .local_path.as_deref(), .remote_path.as_deref(), .cause))]
    FileOperation {
        operation: &'static str,
        local_path: Option<String>,
        remote_path: Option<String>,
        cause: String,
    },

    #[error("Port forwarding from local port {local_port} failed: {cause}")]
    TunnelFailed { local_port: u16, cause: String },
}

impl ManagerError {
    /// Whether retrying the failed connect could plausibly succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            ManagerError::ConnectionFailed { cause, .. } => is_retryable_error(cause),
            _ => false,
        }
    }

    /// Build a [`ManagerError::FileOperation`] from any displayable cause.
    pub(crate) fn file_operation(
        operation: &'static str,
        local_path: Option<&str>,
        remote_path: Option<&str>,
        cause: impl std::fmt::Display,
    ) -> Self {
        ManagerError::FileOperation {
            operation,
            local_path: local_path.map(str::to_string),
            remote_path: remote_path.map(str::to_string),
            cause: cause.to_string(),
        }
    }
}

fn describe_timeout(command: &str, timeout: &Duration, waiting_for: Option<&str>) -> String {
    match waiting_for {
        Some(prompt) => format!(
            "Interactive command timed out after {:?} waiting for prompt '{}': {}",
            timeout, prompt, command
        ),
        None => format!("Command timed out after {:?}: {}", timeout, command),
    }
}

fn describe_file_operation(
    operation: &str,
    local_path: Option<&str>,
    remote_path: Option<&str>,
    cause: &str,
) -> String {
    let mut message = format!("File operation '{}' failed", operation);
    match (local_path, remote_path) {
        (Some(local), Some(remote)) => {
            message.push_str(&format!(" ({} <-> {})", local, remote));
        }
        (Some(local), None) => message.push_str(&format!(" (local: {})", local)),
        (None, Some(remote)) => message.push_str(&format!(" (remote: {})", remote)),
        (None, None) => {}
    }
    message.push_str(": ");
    message.push_str(cause);
    message
}

/// Authentication error patterns that indicate permanent failures.
const AUTH_ERRORS: &[&str] = &[
    "authentication failed",
    "password authentication failed",
    "key authentication failed",
    "permission denied",
    "publickey",
    "auth fail",
    "no authentication",
    "all authentication methods failed",
];

/// Connection error patterns that indicate transient failures.
const RETRYABLE_ERRORS: &[&str] = &[
    "connection refused",
    "connection reset",
    "connection timed out",
    "timed out",
    "timeout",
    "network is unreachable",
    "no route to host",
    "host is down",
    "temporary failure",
    "resource temporarily unavailable",
    "handshake failed",
    "failed to connect",
    "broken pipe",
    "would block",
];

/// Classify a connect failure cause as transient (`true`) or permanent.
///
/// Authentication patterns are checked first and always win. Unknown causes
/// are retried unless they look like an SSH protocol error.
pub(crate) fn is_retryable_error(error: &str) -> bool {
    let error_lower = error.to_lowercase();

    if AUTH_ERRORS.iter().any(|p| error_lower.contains(p)) {
        return false;
    }

    if RETRYABLE_ERRORS.iter().any(|p| error_lower.contains(p)) {
        return true;
    }

    !error_lower.contains("ssh") || error_lower.contains("connect")
}

#[cfg(test)]
mod tests {
    use super::*;

    mod classification {
        use super::*;

        #[test]
        fn test_auth_errors_not_retryable() {
            assert!(!is_retryable_error("Authentication failed"));
            assert!(!is_retryable_error("permission denied (publickey)"));
            assert!(!is_retryable_error("All authentication methods failed"));
        }

        #[test]
        fn test_connection_errors_retryable() {
            assert!(is_retryable_error("Connection refused"));
            assert!(is_retryable_error("connection reset by peer"));
            assert!(is_retryable_error("Connection timed out after 30s"));
            assert!(is_retryable_error("No route to host"));
            assert!(is_retryable_error("Broken pipe"));
        }

        #[test]
        fn test_ssh_protocol_error_not_retryable() {
            assert!(!is_retryable_error("SSH protocol error"));
            assert!(is_retryable_error("SSH failed to connect"));
        }

        #[test]
        fn test_auth_takes_precedence() {
            assert!(!is_retryable_error(
                "Connection timeout during authentication failed"
            ));
        }

        #[test]
        fn test_unknown_error_is_retryable() {
            assert!(is_retryable_error("Something went wrong"));
        }
    }

    mod manager_error {
        use super::*;

        #[test]
        fn test_only_connection_failures_retry() {
            let transient = ManagerError::ConnectionFailed {
                host: "h".to_string(),
                port: 22,
                cause: "Connection refused".to_string(),
            };
            assert!(transient.is_retryable());

            let auth = ManagerError::AuthenticationFailed {
                username: "u".to_string(),
                method: "password",
            };
            assert!(!auth.is_retryable());

            let capacity = ManagerError::CapacityExceeded { max: 50 };
            assert!(!capacity.is_retryable());
        }

        #[test]
        fn test_connection_failed_message_carries_endpoint() {
            let err = ManagerError::ConnectionFailed {
                host: "db.internal".to_string(),
                port: 2222,
                cause: "Connection refused".to_string(),
            };
            let message = err.to_string();
            assert!(message.contains("db.internal:2222"));
            assert!(message.contains("Connection refused"));
        }

        #[test]
        fn test_timeout_message_mentions_prompt() {
            let err = ManagerError::CommandTimeout {
                command: "sudo ls".to_string(),
                timeout: Duration::from_secs(5),
                waiting_for: Some("Password:".to_string()),
            };
            let message = err.to_string();
            assert!(message.contains("waiting for prompt 'Password:'"));
            assert!(message.contains("sudo ls"));
        }

        #[test]
        fn test_timeout_message_without_prompt() {
            let err = ManagerError::CommandTimeout {
                command: "sleep 60".to_string(),
                timeout: Duration::from_secs(1),
                waiting_for: None,
            };
            assert_eq!(err.to_string(), "Command timed out after 1s: sleep 60");
        }

        #[test]
        fn test_invalid_credential_lists_formats() {
            let err = ManagerError::InvalidCredential {
                attempted: vec!["openssh", "pem"],
            };
            assert_eq!(
                err.to_string(),
                "Invalid private key format (tried: openssh, pem)"
            );
        }

        #[test]
        fn test_file_operation_message_includes_paths() {
            let err = ManagerError::file_operation(
                "upload",
                Some("/tmp/a"),
                Some("/srv/a"),
                "permission denied",
            );
            assert_eq!(
                err.to_string(),
                "File operation 'upload' failed (/tmp/a <-> /srv/a): permission denied"
            );

            let err = ManagerError::file_operation("list_directory", None, Some("/srv"), "eof");
            assert_eq!(
                err.to_string(),
                "File operation 'list_directory' failed (remote: /srv): eof"
            );
        }
    }
}
