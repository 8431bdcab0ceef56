//! SQS ⇄ IRC Gateway Library
//!
//! Bridges one IRC connection to a pair of SQS queues so that a separate
//! bot process can read chat from one queue and speak through the other
//! without ever holding a chat connection itself.
//!
//! # Features
//! - NICK/USER handshake with automatic nickname retry (`bot` → `bot_`)
//! - PING/PONG keepalive answered in place
//! - Long-poll queue receive, acknowledgment only after delivery to chat
//! - Redelivery deduplication by message id
//! - Exponential backoff with jitter on every queue error
//! - Pluggable reversible body encoding (plain or base64)
//!
//! # Architecture
//! Tasks communicating over `mpsc` channels:
//! - `LineReader` consumes the socket and drives the handshake
//! - `LineWriter` announces identity, then writes outbound lines
//! - `InboundAdapter` / `OutboundAdapter` / `Acknowledger` own queue I/O
//! - `Router` is the single control loop between all of them
//!
//! The connection state lives in one owner (`StateHandle`); the reader
//! and writer change it only through compare-and-swap transitions.
//!
//! # Example
//! ```ignore
//! use std::sync::Arc;
//! use sqs_irc_gateway::{Config, Gateway, SqsClient};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::load("gateway.json".as_ref())?;
//!     let client = Arc::new(SqsClient::from_config(&config).await);
//!     Gateway::new(config, client).run().await?;
//!     Ok(())
//! }
//! ```

pub mod backoff;
pub mod codec;
pub mod config;
pub mod connection;
pub mod error;
pub mod gateway;
pub mod protocol;
pub mod queue;
pub mod router;
pub mod state;
pub mod transport;
pub mod types;

// Re-export main types for convenience
pub use config::{Config, Timing};
pub use connection::{ChatConnection, OutboundLine, ReaderExit};
pub use error::{CodecError, ConfigError, GatewayError, QueueError};
pub use gateway::Gateway;
pub use queue::{MemoryQueue, QueueClient, QueueMessage, SqsClient};
pub use router::Router;
pub use state::{ConnectionState, StateHandle};
pub use transport::{BodyCodec, BodyEncoding};
pub use types::{LineId, MessageId, QueueUrl, ReceiptHandle};
