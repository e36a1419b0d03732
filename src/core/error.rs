//! Error types for the acquisition bridge.

use thiserror::Error;

/// Result type used throughout the crate.
pub type Result<T> = std::result::Result<T, BridgeError>;

/// Unified error type for the acquisition bridge.
///
/// The taxonomy mirrors how callers must react:
///
/// - `Config` / `Decode` indicate a mismatch between the configuration and
///   the connected equipment. Retrying cannot fix them; they terminate the
///   affected poller.
/// - `Connection` / `Protocol` / `NotConnected` are transient device faults
///   handled by the retry and reconnect machinery.
/// - `Tag` errors surface synchronously on the command channel as `ERR=`
///   replies and never crash the node.
#[derive(Debug, Error)]
pub enum BridgeError {
    /// Configuration is invalid or inconsistent.
    #[error("configuration error: {0}")]
    Config(String),

    /// Connection establishment or transport failure.
    #[error("connection error: {0}")]
    Connection(String),

    /// Device answered, but with a protocol-level failure.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Received data does not match the configured shape. Fatal for the
    /// affected poller.
    #[error("decode error: {0}")]
    Decode(String),

    /// Operation attempted without an established connection.
    #[error("not connected")]
    NotConnected,

    /// A command referenced a tag that does not exist.
    #[error("tag not found: {0}")]
    TagNotFound(String),

    /// A command carried a value that cannot be coerced to the tag's kind.
    #[error("invalid value for tag {tag}: {reason}")]
    InvalidValue { tag: String, reason: String },

    /// Underlying I/O failure.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl BridgeError {
    /// Create a configuration error.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a connection error.
    pub fn connection(msg: impl Into<String>) -> Self {
        Self::Connection(msg.into())
    }

    /// Create a protocol error.
    pub fn protocol(msg: impl Into<String>) -> Self {
        Self::Protocol(msg.into())
    }

    /// Create a decode error.
    pub fn decode(msg: impl Into<String>) -> Self {
        Self::Decode(msg.into())
    }

    /// Check whether this error is fatal for a poller.
    ///
    /// Fatal errors indicate the configuration does not match the connected
    /// device; the reconnect machinery must not swallow them.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Config(_) | Self::Decode(_))
    }
}
