//! Basic type definitions for the gateway
//!
//! Provides newtype wrappers for type safety:
//! - `LineId`: UUID-based identifier attached to every chat line sent to a queue
//! - `MessageId`: queue-assigned identifier of a received message
//! - `ReceiptHandle`: token proving one specific receive of a message
//! - `QueueUrl`: opaque locator of a bound queue

use uuid::Uuid;

/// Unique chat line identifier (newtype pattern)
///
/// Every line forwarded from chat to a queue gets one, so that a resend
/// after a failed send can be recognised by the consumer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LineId(pub Uuid);

impl LineId {
    /// Create a new random line ID
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for LineId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for LineId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Queue-assigned message identifier
///
/// Stable across redeliveries of the same message, unlike the receipt handle.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MessageId(pub String);

impl std::fmt::Display for MessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Receipt handle of a received message, required to delete it
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ReceiptHandle(pub String);

/// Queue locator, resolved once per queue name at startup
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct QueueUrl(pub String);

impl std::fmt::Display for QueueUrl {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Direction of a data path through the gateway
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Queue → chat
    Inbound,
    /// Chat → queue
    Outbound,
    /// Acknowledgment of delivered inbound messages
    Acknowledge,
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Direction::Inbound => "inbound",
            Direction::Outbound => "outbound",
            Direction::Acknowledge => "acknowledge",
        };
        f.write_str(name)
    }
}
