//! Configuration resolution for the connection manager.
//!
//! Tunable values follow a three-tier priority system:
//!
//! 1. **Parameter** - Explicitly provided function parameter (highest priority)
//! 2. **Environment Variable** - Value from environment variable
//! 3. **Default** - Built-in default value (lowest priority)
//!
//! # Environment Variables
//!
//! | Variable | Default | Description |
//! |----------|---------|-------------|
//! | `SSH_CONNECT_TIMEOUT` | 30s | Connection timeout in seconds |
//! | `SSH_COMMAND_TIMEOUT` | 30s | Command execution timeout in seconds |
//! | `SSH_MAX_RETRIES` | 3 | Maximum connect retry attempts |
//! | `SSH_RETRY_DELAY_MS` | 1000ms | Initial retry delay in milliseconds |
//! | `SSH_COMPRESSION` | true | Enable zlib compression |
//! | `SSH_MAX_CONNECTIONS` | 50 | Maximum pooled sessions |
//!
//! Pool lifecycle policy (age, idleness, probe and interactive timings) is
//! fixed and lives in [`ManagerConfig`].

use std::env;
use std::str::FromStr;
use std::time::Duration;

/// Default SSH connection timeout in seconds
pub(crate) const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 30;

/// Default command execution timeout in seconds
pub(crate) const DEFAULT_COMMAND_TIMEOUT_SECS: u64 = 30;

/// Default maximum retry attempts for SSH connection
pub(crate) const DEFAULT_MAX_RETRIES: u32 = 3;

/// Default retry delay in milliseconds
pub(crate) const DEFAULT_RETRY_DELAY_MS: u64 = 1000;

/// Default pool capacity
pub(crate) const DEFAULT_MAX_CONNECTIONS: usize = 50;

/// Maximum retry delay cap
pub(crate) const MAX_RETRY_DELAY: Duration = Duration::from_secs(10);

/// Sessions older than this are evictable
pub(crate) const MAX_SESSION_AGE: Duration = Duration::from_secs(60 * 60);

/// Sessions unused for this long are evictable
pub(crate) const MAX_SESSION_IDLE: Duration = Duration::from_secs(30 * 60);

/// Liveness probe round-trip budget
pub(crate) const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// Maximum retained command history entries per session
pub(crate) const COMMAND_HISTORY_LIMIT: usize = 100;

/// Default number of history entries returned to callers
pub(crate) const DEFAULT_HISTORY_QUERY_LIMIT: usize = 50;

/// Per-command timeout for the system info battery
pub(crate) const SYSTEM_INFO_TIMEOUT: Duration = Duration::from_secs(10);

/// Environment variable name for SSH connection timeout
pub(crate) const CONNECT_TIMEOUT_ENV_VAR: &str = "SSH_CONNECT_TIMEOUT";

/// Environment variable name for command execution timeout
pub(crate) const COMMAND_TIMEOUT_ENV_VAR: &str = "SSH_COMMAND_TIMEOUT";

/// Environment variable name for SSH max retries
pub(crate) const MAX_RETRIES_ENV_VAR: &str = "SSH_MAX_RETRIES";

/// Environment variable name for SSH retry delay in milliseconds
pub(crate) const RETRY_DELAY_MS_ENV_VAR: &str = "SSH_RETRY_DELAY_MS";

/// Environment variable name for SSH compression
pub(crate) const COMPRESSION_ENV_VAR: &str = "SSH_COMPRESSION";

/// Environment variable name for pool capacity
pub(crate) const MAX_CONNECTIONS_ENV_VAR: &str = "SSH_MAX_CONNECTIONS";

fn from_env<T: FromStr>(name: &str) -> Option<T> {
    env::var(name).ok().and_then(|value| value.parse::<T>().ok())
}

/// Resolve the connection timeout with priority: parameter -> env var -> default
pub(crate) fn resolve_connect_timeout(timeout_param: Option<u64>) -> Duration {
    let secs = timeout_param
        .or_else(|| from_env(CONNECT_TIMEOUT_ENV_VAR))
        .unwrap_or(DEFAULT_CONNECT_TIMEOUT_SECS);
    Duration::from_secs(secs)
}

/// Resolve the command timeout with priority: parameter -> env var -> default
pub(crate) fn resolve_command_timeout(timeout_param: Option<u64>) -> Duration {
    let secs = timeout_param
        .or_else(|| from_env(COMMAND_TIMEOUT_ENV_VAR))
        .unwrap_or(DEFAULT_COMMAND_TIMEOUT_SECS);
    Duration::from_secs(secs)
}

/// Resolve the max retries value with priority: parameter -> env var -> default
pub(crate) fn resolve_max_retries(max_retries_param: Option<u32>) -> u32 {
    max_retries_param
        .or_else(|| from_env(MAX_RETRIES_ENV_VAR))
        .unwrap_or(DEFAULT_MAX_RETRIES)
}

/// Resolve the initial retry delay with priority: parameter -> env var -> default
pub(crate) fn resolve_retry_delay(retry_delay_param: Option<u64>) -> Duration {
    let millis = retry_delay_param
        .or_else(|| from_env(RETRY_DELAY_MS_ENV_VAR))
        .unwrap_or(DEFAULT_RETRY_DELAY_MS);
    Duration::from_millis(millis)
}

/// Resolve the compression setting with priority: parameter -> env var -> default (true)
pub(crate) fn resolve_compression(compress_param: Option<bool>) -> bool {
    if let Some(compress) = compress_param {
        return compress;
    }

    if let Ok(env_compress) = env::var(COMPRESSION_ENV_VAR) {
        return env_compress.eq_ignore_ascii_case("true") || env_compress == "1";
    }

    true
}

/// Resolve pool capacity with priority: parameter -> env var -> default.
///
/// A capacity of zero is meaningless and falls through to the next tier.
pub(crate) fn resolve_max_connections(max_param: Option<usize>) -> usize {
    max_param
        .filter(|max| *max > 0)
        .or_else(|| from_env::<usize>(MAX_CONNECTIONS_ENV_VAR).filter(|max| *max > 0))
        .unwrap_or(DEFAULT_MAX_CONNECTIONS)
}

/// Timings of the expect/response loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InteractiveTiming {
    /// Delay between polls of the shell's buffered output
    pub poll_interval: Duration,
    /// Pause after each response is sent
    pub response_delay: Duration,
    /// Wait before the final drain of buffered output
    pub drain_grace: Duration,
}

impl Default for InteractiveTiming {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(100),
            response_delay: Duration::from_millis(100),
            drain_grace: Duration::from_millis(500),
        }
    }
}

/// Pool capacity, lifecycle policy and connect behaviour for a manager.
#[derive(Debug, Clone)]
pub struct ManagerConfig {
    pub max_connections: usize,
    pub max_session_age: Duration,
    pub max_session_idle: Duration,
    pub probe_timeout: Duration,
    pub history_limit: usize,
    pub max_retries: u32,
    pub retry_delay: Duration,
    pub compression: bool,
    pub interactive: InteractiveTiming,
}

impl ManagerConfig {
    /// Build a configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self {
            max_connections: resolve_max_connections(None),
            max_retries: resolve_max_retries(None),
            retry_delay: resolve_retry_delay(None),
            compression: resolve_compression(None),
            ..Self::default()
        }
    }

    /// Override pool capacity.
    pub fn with_max_connections(mut self, max_connections: usize) -> Self {
        self.max_connections = resolve_max_connections(Some(max_connections));
        self
    }
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            max_connections: DEFAULT_MAX_CONNECTIONS,
            max_session_age: MAX_SESSION_AGE,
            max_session_idle: MAX_SESSION_IDLE,
            probe_timeout: PROBE_TIMEOUT,
            history_limit: COMMAND_HISTORY_LIMIT,
            max_retries: DEFAULT_MAX_RETRIES,
            retry_delay: Duration::from_millis(DEFAULT_RETRY_DELAY_MS),
            compression: true,
            interactive: InteractiveTiming::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;

    // SAFETY: Tests are serialized via ENV_TEST_MUTEX to prevent data races
    static ENV_TEST_MUTEX: once_cell::sync::Lazy<StdMutex<()>> =
        once_cell::sync::Lazy::new(|| StdMutex::new(()));

    /// SAFETY: Must be called while holding ENV_TEST_MUTEX.
    unsafe fn set_env(key: &str, value: &str) {
        // SAFETY: Caller ensures ENV_TEST_MUTEX is held
        unsafe { env::set_var(key, value) };
    }

    /// SAFETY: Must be called while holding ENV_TEST_MUTEX.
    unsafe fn remove_env(key: &str) {
        // SAFETY: Caller ensures ENV_TEST_MUTEX is held
        unsafe { env::remove_var(key) };
    }

    mod connect_timeout {
        use super::*;

        #[test]
        fn test_uses_param_when_provided() {
            assert_eq!(resolve_connect_timeout(Some(60)), Duration::from_secs(60));
        }

        #[test]
        fn test_param_takes_priority_over_env() {
            let _guard = ENV_TEST_MUTEX.lock().unwrap();
            // SAFETY: Holding ENV_TEST_MUTEX
            unsafe { set_env(CONNECT_TIMEOUT_ENV_VAR, "120") };
            let result = resolve_connect_timeout(Some(45));
            // SAFETY: Holding ENV_TEST_MUTEX
            unsafe { remove_env(CONNECT_TIMEOUT_ENV_VAR) };
            assert_eq!(result, Duration::from_secs(45));
        }

        #[test]
        fn test_uses_env_var_when_no_param() {
            let _guard = ENV_TEST_MUTEX.lock().unwrap();
            // SAFETY: Holding ENV_TEST_MUTEX
            unsafe { set_env(CONNECT_TIMEOUT_ENV_VAR, "90") };
            let result = resolve_connect_timeout(None);
            // SAFETY: Holding ENV_TEST_MUTEX
            unsafe { remove_env(CONNECT_TIMEOUT_ENV_VAR) };
            assert_eq!(result, Duration::from_secs(90));
        }

        #[test]
        fn test_ignores_invalid_env_var() {
            let _guard = ENV_TEST_MUTEX.lock().unwrap();
            // SAFETY: Holding ENV_TEST_MUTEX
            unsafe { set_env(CONNECT_TIMEOUT_ENV_VAR, "-10") };
            let result = resolve_connect_timeout(None);
            // SAFETY: Holding ENV_TEST_MUTEX
            unsafe { remove_env(CONNECT_TIMEOUT_ENV_VAR) };
            assert_eq!(result, Duration::from_secs(DEFAULT_CONNECT_TIMEOUT_SECS));
        }
    }

    mod command_timeout {
        use super::*;

        #[test]
        fn test_default_is_thirty_seconds() {
            let _guard = ENV_TEST_MUTEX.lock().unwrap();
            // SAFETY: Holding ENV_TEST_MUTEX
            unsafe { remove_env(COMMAND_TIMEOUT_ENV_VAR) };
            assert_eq!(resolve_command_timeout(None), Duration::from_secs(30));
        }

        #[test]
        fn test_uses_env_var_when_no_param() {
            let _guard = ENV_TEST_MUTEX.lock().unwrap();
            // SAFETY: Holding ENV_TEST_MUTEX
            unsafe { set_env(COMMAND_TIMEOUT_ENV_VAR, "240") };
            let result = resolve_command_timeout(None);
            // SAFETY: Holding ENV_TEST_MUTEX
            unsafe { remove_env(COMMAND_TIMEOUT_ENV_VAR) };
            assert_eq!(result, Duration::from_secs(240));
        }
    }

    mod retries {
        use super::*;

        #[test]
        fn test_zero_retries_is_valid() {
            assert_eq!(resolve_max_retries(Some(0)), 0);
        }

        #[test]
        fn test_ignores_invalid_env_var() {
            let _guard = ENV_TEST_MUTEX.lock().unwrap();
            // SAFETY: Holding ENV_TEST_MUTEX
            unsafe { set_env(MAX_RETRIES_ENV_VAR, "abc") };
            let result = resolve_max_retries(None);
            // SAFETY: Holding ENV_TEST_MUTEX
            unsafe { remove_env(MAX_RETRIES_ENV_VAR) };
            assert_eq!(result, DEFAULT_MAX_RETRIES);
        }

        #[test]
        fn test_retry_delay_from_env() {
            let _guard = ENV_TEST_MUTEX.lock().unwrap();
            // SAFETY: Holding ENV_TEST_MUTEX
            unsafe { set_env(RETRY_DELAY_MS_ENV_VAR, "250") };
            let result = resolve_retry_delay(None);
            // SAFETY: Holding ENV_TEST_MUTEX
            unsafe { remove_env(RETRY_DELAY_MS_ENV_VAR) };
            assert_eq!(result, Duration::from_millis(250));
        }
    }

    mod compression {
        use super::*;

        #[test]
        fn test_param_takes_priority_over_env() {
            let _guard = ENV_TEST_MUTEX.lock().unwrap();
            // SAFETY: Holding ENV_TEST_MUTEX
            unsafe { set_env(COMPRESSION_ENV_VAR, "true") };
            let result = resolve_compression(Some(false));
            // SAFETY: Holding ENV_TEST_MUTEX
            unsafe { remove_env(COMPRESSION_ENV_VAR) };
            assert!(!result);
        }

        #[test]
        fn test_env_var_one_and_mixed_case() {
            let _guard = ENV_TEST_MUTEX.lock().unwrap();
            for value in ["1", "TrUe"] {
                // SAFETY: Holding ENV_TEST_MUTEX
                unsafe { set_env(COMPRESSION_ENV_VAR, value) };
                assert!(resolve_compression(None), "{} should enable", value);
            }
            // SAFETY: Holding ENV_TEST_MUTEX
            unsafe { set_env(COMPRESSION_ENV_VAR, "yes") };
            let result = resolve_compression(None);
            // SAFETY: Holding ENV_TEST_MUTEX
            unsafe { remove_env(COMPRESSION_ENV_VAR) };
            assert!(!result);
        }
    }

    mod max_connections {
        use super::*;

        #[test]
        fn test_default_is_fifty() {
            let _guard = ENV_TEST_MUTEX.lock().unwrap();
            // SAFETY: Holding ENV_TEST_MUTEX
            unsafe { remove_env(MAX_CONNECTIONS_ENV_VAR) };
            assert_eq!(resolve_max_connections(None), 50);
        }

        #[test]
        fn test_zero_falls_through() {
            let _guard = ENV_TEST_MUTEX.lock().unwrap();
            // SAFETY: Holding ENV_TEST_MUTEX
            unsafe { set_env(MAX_CONNECTIONS_ENV_VAR, "0") };
            let result = resolve_max_connections(Some(0));
            // SAFETY: Holding ENV_TEST_MUTEX
            unsafe { remove_env(MAX_CONNECTIONS_ENV_VAR) };
            assert_eq!(result, DEFAULT_MAX_CONNECTIONS);
        }

        #[test]
        fn test_uses_env_var() {
            let _guard = ENV_TEST_MUTEX.lock().unwrap();
            // SAFETY: Holding ENV_TEST_MUTEX
            unsafe { set_env(MAX_CONNECTIONS_ENV_VAR, "7") };
            let result = resolve_max_connections(None);
            // SAFETY: Holding ENV_TEST_MUTEX
            unsafe { remove_env(MAX_CONNECTIONS_ENV_VAR) };
            assert_eq!(result, 7);
        }
    }

    mod manager_config {
        use super::*;

        #[test]
        fn test_default_lifecycle_policy() {
            let config = ManagerConfig::default();
            assert_eq!(config.max_session_age, Duration::from_secs(3600));
            assert_eq!(config.max_session_idle, Duration::from_secs(1800));
            assert_eq!(config.probe_timeout, Duration::from_secs(5));
            assert_eq!(config.history_limit, 100);
        }

        #[test]
        fn test_default_interactive_timing() {
            let timing = InteractiveTiming::default();
            assert_eq!(timing.poll_interval, Duration::from_millis(100));
            assert_eq!(timing.drain_grace, Duration::from_millis(500));
        }

        #[test]
        fn test_with_max_connections() {
            let config = ManagerConfig::default().with_max_connections(3);
            assert_eq!(config.max_connections, 3);
        }
    }
}
