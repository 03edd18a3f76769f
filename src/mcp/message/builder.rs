//! Builder patterns for constructing MCP response messages.
//!
//! These builders follow the fluent API pattern to construct human-readable
//! messages that help LLMs remember important identifiers.

use crate::mcp::types::TransferSummary;

/// Builder for SSH connection success messages.
///
/// # Example
///
/// ```ignore
/// let message = ConnectMessageBuilder::new("ssh_1a2b3c4d_host_user", "user", "host")
///     .with_port(2222)
///     .build();
/// ```
pub struct ConnectMessageBuilder {
    session_id: String,
    username: String,
    host: String,
    port: u16,
}

impl ConnectMessageBuilder {
    /// Create a new connect message builder with required fields.
    pub fn new(
        session_id: impl Into<String>,
        username: impl Into<String>,
        host: impl Into<String>,
    ) -> Self {
        Self {
            session_id: session_id.into(),
            username: username.into(),
            host: host.into(),
            port: 22,
        }
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Build the message string.
    pub fn build(&self) -> String {
        let lines = [
            "SSH CONNECTION ESTABLISHED. REMEMBER THIS IDENTIFIER:".to_string(),
            format!("• session_id: '{}'", self.session_id),
            format!("• host: {}@{}:{}", self.username, self.host, self.port),
            String::new(), // empty line
            format!(
                "Use ssh_execute with session_id '{}' to run commands.",
                self.session_id
            ),
            "Use ssh_disconnect when finished; idle sessions are evicted after 30 minutes."
                .to_string(),
        ];

        lines.join("\n")
    }
}

/// Direction of a completed transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferDirection {
    Upload,
    Download,
}

/// Builder for transfer completion messages.
///
/// # Example
///
/// ```ignore
/// let message = TransferMessageBuilder::new(TransferDirection::Upload, "./site", "/var/www")
///     .with_summary(summary)
///     .build();
/// ```
pub struct TransferMessageBuilder {
    direction: TransferDirection,
    local_path: String,
    remote_path: String,
    summary: TransferSummary,
}

impl TransferMessageBuilder {
    pub fn new(
        direction: TransferDirection,
        local_path: impl Into<String>,
        remote_path: impl Into<String>,
    ) -> Self {
        Self {
            direction,
            local_path: local_path.into(),
            remote_path: remote_path.into(),
            summary: TransferSummary::default(),
        }
    }

    pub fn with_summary(mut self, summary: TransferSummary) -> Self {
        self.summary = summary;
        self
    }

    /// Build the message string.
    pub fn build(&self) -> String {
        let (header, from, to) = match self.direction {
            TransferDirection::Upload => ("UPLOAD COMPLETE", &self.local_path, &self.remote_path),
            TransferDirection::Download => {
                ("DOWNLOAD COMPLETE", &self.remote_path, &self.local_path)
            }
        };

        let mut lines = vec![
            format!("{}: {} -> {}", header, from, to),
            format!("• files: {}", self.summary.files),
        ];
        if self.summary.directories > 0 {
            lines.push(format!("• directories: {}", self.summary.directories));
        }
        lines.push(format!("• bytes: {}", self.summary.bytes));

        lines.join("\n")
    }
}

/// Truncate a command string for display purposes.
pub(crate) fn truncate_command(command: &str, max_len: usize) -> String {
    if command.chars().count() > max_len {
        let kept: String = command.chars().take(max_len.saturating_sub(3)).collect();
        format!("{}...", kept)
    } else {
        command.to_string()
    }
}
