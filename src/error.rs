//! Error types for the gateway
//!
//! Defines process-level errors, configuration errors, queue errors and
//! transport codec errors. Uses thiserror for ergonomic error definitions.

use std::time::Duration;

use thiserror::Error;

/// Gateway-level errors
///
/// Every variant is fatal: it ends the process with a non-zero exit code.
/// Transient conditions are absorbed where they occur and never become a
/// `GatewayError`.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// Configuration missing or invalid
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Dialing the chat server failed
    #[error("failed to connect to {addr}: {source}")]
    Connect {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    /// Dialing the chat server took longer than the dial timeout
    #[error("timed out connecting to {addr} after {timeout:?}")]
    ConnectTimeout { addr: String, timeout: Duration },

    /// A queue name could not be resolved to a queue locator
    #[error("failed to bind queue '{name}': {source}")]
    QueueBind {
        name: String,
        #[source]
        source: QueueError,
    },

    /// Reading from the chat socket failed (not end-of-stream)
    #[error("chat read error: {0}")]
    ChatRead(#[source] std::io::Error),

    /// Writing to the chat socket failed
    #[error("chat write error: {0}")]
    ChatWrite(#[source] std::io::Error),

    /// An internal channel or task ended unexpectedly
    #[error("internal channel closed: {0}")]
    ChannelClosed(&'static str),
}

/// Configuration loading and validation errors
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration file could not be read
    #[error("cannot read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// The configuration file is not valid JSON for the expected shape
    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    /// A required key is absent or empty
    #[error("'{0}' is not defined")]
    Missing(&'static str),

    /// A key has a value that cannot be used
    #[error("{0}")]
    Invalid(String),

    /// Command line could not be understood
    #[error("usage: {0}")]
    Usage(String),
}

/// Queue client errors
///
/// Once the queues are bound every variant except `Rejected` is transient
/// and the adapters retry it. `Rejected` means the request itself is
/// unacceptable, so resending it cannot succeed.
#[derive(Debug, Clone, Error)]
pub enum QueueError {
    /// The queue service failed a request
    #[error("queue service error: {0}")]
    Service(String),

    /// The queue service refused the request as invalid
    #[error("rejected by the queue service: {0}")]
    Rejected(String),

    /// The referenced queue does not exist
    #[error("unknown queue: {0}")]
    UnknownQueue(String),

    /// A failure injected by the in-memory queue
    #[error("injected failure: {0}")]
    Injected(&'static str),
}

impl QueueError {
    /// Whether retrying the same request can never succeed
    pub fn is_permanent(&self) -> bool {
        matches!(self, QueueError::Rejected(_))
    }
}

/// Transport codec errors
#[derive(Debug, Error)]
pub enum CodecError {
    /// The body is not valid base64
    #[error("invalid base64 body: {0}")]
    Base64(#[from] base64::DecodeError),

    /// The decoded body is not valid UTF-8
    #[error("decoded body is not UTF-8: {0}")]
    Utf8(#[from] std::string::FromUtf8Error),
}
