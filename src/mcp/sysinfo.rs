//! Read-only diagnostics battery.

use std::collections::BTreeMap;

use tracing::debug;

use super::config::SYSTEM_INFO_TIMEOUT;
use super::executor;
use super::session::Session;

/// Placeholder for a diagnostic that failed
pub(crate) const NOT_AVAILABLE: &str = "N/A";

/// Key and command of every diagnostic, in execution order.
pub(crate) const SYSTEM_INFO_COMMANDS: &[(&str, &str)] = &[
    ("hostname", "hostname"),
    ("kernel", "uname -r"),
    ("os", "uname -o"),
    ("architecture", "uname -m"),
    ("uptime", "uptime"),
    ("memory", "free -h"),
    ("disk", "df -h"),
    ("cpu", "lscpu | head -20"),
];

/// Run every diagnostic; a failing one yields [`NOT_AVAILABLE`] instead of an error.
pub(crate) async fn collect(
    session: &Session,
    probe_timeout: std::time::Duration,
) -> BTreeMap<String, String> {
    let mut info = BTreeMap::new();

    for (key, command) in SYSTEM_INFO_COMMANDS {
        let value = match executor::execute(session, command, SYSTEM_INFO_TIMEOUT, probe_timeout)
            .await
        {
            Ok(result) if result.success => result.stdout.trim().to_string(),
            Ok(result) => {
                debug!("{} exited with {} on {}", command, result.exit_code, session.id);
                NOT_AVAILABLE.to_string()
            }
            Err(e) => {
                debug!("{} failed on {}: {}", command, session.id, e);
                NOT_AVAILABLE.to_string()
            }
        };
        info.insert(key.to_string(), value);
    }

    info
}
