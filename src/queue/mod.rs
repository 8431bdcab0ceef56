//! Managed message queue boundary
//!
//! `QueueClient` is the seam between the gateway and the queue service.
//! `SqsClient` talks to AWS SQS; `MemoryQueue` keeps everything in
//! process and is what the tests drive.
//!
//! The adapters in [`adapter`] wrap a client into long-running tasks that
//! retry transient failures on their own.

pub mod adapter;
pub mod memory;
pub mod sqs;

use std::time::Duration;

use async_trait::async_trait;

use crate::error::QueueError;
use crate::types::{LineId, MessageId, QueueUrl, ReceiptHandle};

pub use adapter::{Delivery, OutboundBody, QueueFault};
pub use memory::MemoryQueue;
pub use sqs::SqsClient;

/// A message received from a queue
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueMessage {
    pub id: MessageId,
    pub body: String,
    pub receipt: ReceiptHandle,
    pub queue: QueueUrl,
}

/// Operations the gateway needs from a queue service
#[async_trait]
pub trait QueueClient: Send + Sync + 'static {
    /// Resolve a queue name to its locator, creating the queue if needed
    async fn bind(&self, name: &str) -> Result<QueueUrl, QueueError>;

    /// Long-poll for at most one message, waiting up to `wait`
    async fn receive(
        &self,
        queue: &QueueUrl,
        wait: Duration,
    ) -> Result<Option<QueueMessage>, QueueError>;

    /// Send one message body
    async fn send(&self, queue: &QueueUrl, body: &str, line: LineId) -> Result<(), QueueError>;

    /// Delete (acknowledge) a received message
    async fn delete(&self, queue: &QueueUrl, receipt: &ReceiptHandle) -> Result<(), QueueError>;
}
