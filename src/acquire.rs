//! Concurrent acquisition pollers.
//!
//! Each poller owns its device link exclusively and runs its own
//! reconnect/retry state machine: transient faults are retried up to a
//! bound with a fixed delay, and exceeding the bound tears the link down
//! and rebuilds it from scratch, forever: the node's purpose is to
//! stay attached to a running simulation indefinitely. Shutdown is the only
//! thing that stops a rebuild loop.

pub mod modbus;
pub mod pmu;

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::RwLock;

/// Connection state of a device link.
///
/// A link is owned exclusively by its poller task and never shared; the
/// state is exported for diagnostics only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
}

impl ConnectionState {
    #[inline]
    pub const fn is_connected(&self) -> bool {
        matches!(self, Self::Connected)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Reconnecting => "reconnecting",
        };
        write!(f, "{}", s)
    }
}

/// Bounded retry with a fixed delay between attempts.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Consecutive failures tolerated before the link is rebuilt.
    pub max_retries: u32,

    /// Delay between attempts.
    pub delay: Duration,
}

impl RetryPolicy {
    pub const fn fixed(max_retries: u32, delay: Duration) -> Self {
        Self { max_retries, delay }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            delay: Duration::from_millis(1000),
        }
    }
}

/// Poller statistics, snapshotted periodically into the log.
#[derive(Debug, Clone, Serialize)]
pub struct Diagnostics {
    /// Source name (device label or protocol).
    pub source: String,

    pub state: ConnectionState,

    /// Successful frame/poll-cycle count.
    pub read_count: u64,

    /// Successful device write count.
    pub write_count: u64,

    /// Transient error count.
    pub error_count: u64,

    /// Completed link rebuilds.
    pub reconnect_count: u64,

    pub last_error: Option<String>,

    /// Source-specific details.
    pub extra: serde_json::Value,
}

impl Diagnostics {
    pub fn new(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            state: ConnectionState::Disconnected,
            read_count: 0,
            write_count: 0,
            error_count: 0,
            reconnect_count: 0,
            last_error: None,
            extra: serde_json::Value::Null,
        }
    }
}

/// Shared handle for a poller's diagnostics.
pub type SharedDiagnostics = Arc<RwLock<Diagnostics>>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_state() {
        assert!(ConnectionState::Connected.is_connected());
        assert!(!ConnectionState::Reconnecting.is_connected());
        assert_eq!(ConnectionState::default(), ConnectionState::Disconnected);
    }

    #[test]
    fn test_retry_policy_defaults() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_retries, 3);
        assert_eq!(policy.delay, Duration::from_millis(1000));
    }
}
