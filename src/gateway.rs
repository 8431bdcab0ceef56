//! Gateway startup and teardown
//!
//! Connects to chat, binds both queues, spawns the reader, writer, queue
//! adapters and acknowledger, then runs the router until the chat
//! connection ends. Any failure before the router starts is fatal and
//! happens before a single line is forwarded.
//!
//! On the way out the outbound adapter gets a bounded grace period to send
//! the chat lines still queued for it; every other task is aborted.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::config::Config;
use crate::connection::{ChatConnection, LineReader, LineWriter};
use crate::error::GatewayError;
use crate::queue::adapter::{Acknowledger, InboundAdapter, OutboundAdapter};
use crate::queue::QueueClient;
use crate::router::{Router, RouterInputs, RouterOutputs};
use crate::state::StateHandle;
use crate::types::QueueUrl;

/// How long shutdown waits for queued chat lines to reach the outgoing queue
pub const FLUSH_TIMEOUT: Duration = Duration::from_secs(10);

/// A configured gateway, ready to run
pub struct Gateway {
    config: Config,
    client: Arc<dyn QueueClient>,
}

impl Gateway {
    pub fn new(config: Config, client: Arc<dyn QueueClient>) -> Self {
        Self { config, client }
    }

    /// Dial the configured chat server and run until it disconnects
    pub async fn run(self) -> Result<(), GatewayError> {
        let connection =
            ChatConnection::connect(&self.config.server, self.config.timing.dial_timeout).await?;
        self.run_on(connection).await
    }

    /// Run over an already open chat connection
    pub async fn run_on(self, connection: ChatConnection) -> Result<(), GatewayError> {
        let Gateway { config, client } = self;

        let incoming = bind(client.as_ref(), &config.incoming_queue).await?;
        let outgoing = bind(client.as_ref(), &config.outgoing_queue).await?;

        let state = StateHandle::new(config.nickname.clone());

        let (chat_lines_tx, chat_lines_rx) = mpsc::unbounded_channel();
        let (to_chat_tx, to_chat_rx) = mpsc::unbounded_channel();
        let (delivered_tx, delivered_rx) = mpsc::unbounded_channel();
        let (disconnect_tx, disconnect_rx) = oneshot::channel();
        let (messages_tx, messages_rx) = mpsc::unbounded_channel();
        let (to_queue_tx, to_queue_rx) = mpsc::unbounded_channel();
        let (acks_tx, acks_rx) = mpsc::unbounded_channel();
        let (faults_tx, faults_rx) = mpsc::unbounded_channel();

        let background: Vec<JoinHandle<()>> = vec![
            tokio::spawn(
                LineReader::new(
                    connection.lines,
                    connection.sender.clone(),
                    state.clone(),
                    chat_lines_tx,
                    disconnect_tx,
                )
                .run(),
            ),
            tokio::spawn(
                InboundAdapter::new(
                    client.clone(),
                    incoming,
                    config.timing,
                    messages_tx,
                    faults_tx.clone(),
                )
                .run(),
            ),
            tokio::spawn(
                Acknowledger::new(client.clone(), config.timing, acks_rx, faults_tx.clone()).run(),
            ),
        ];
        let mut outbound = tokio::spawn(
            OutboundAdapter::new(client, outgoing, config.timing, to_queue_rx, faults_tx).run(),
        );
        let mut writer = tokio::spawn(
            LineWriter::new(connection.sender, state, to_chat_rx, delivered_tx).run(),
        );

        let router = Router::new(
            config.encoding.codec(),
            RouterInputs {
                chat_lines: chat_lines_rx,
                queue_messages: messages_rx,
                delivered: delivered_rx,
                faults: faults_rx,
                disconnect: disconnect_rx,
            },
            RouterOutputs {
                to_queue: to_queue_tx,
                to_chat: to_chat_tx,
                acks: acks_tx,
            },
        );

        // The writer only returns early when the socket fails
        let result = tokio::select! {
            result = router.run() => result,
            joined = &mut writer => match joined {
                Ok(Ok(())) => Err(GatewayError::ChannelClosed("chat writer")),
                Ok(Err(e)) => Err(e),
                Err(e) => {
                    error!("writer task failed: {}", e);
                    Err(GatewayError::ChannelClosed("chat writer"))
                }
            },
        };

        // The router is gone, so the body channel closes once it is empty
        match tokio::time::timeout(FLUSH_TIMEOUT, &mut outbound).await {
            Ok(Ok(())) => info!("outgoing queue flushed"),
            Ok(Err(e)) => error!("outbound adapter failed: {}", e),
            Err(_) => {
                warn!(timeout = ?FLUSH_TIMEOUT, "gave up flushing lines to the outgoing queue");
                outbound.abort();
            }
        }

        writer.abort();
        for task in background {
            task.abort();
        }
        result
    }
}

async fn bind(client: &dyn QueueClient, name: &str) -> Result<QueueUrl, GatewayError> {
    let url = client
        .bind(name)
        .await
        .map_err(|source| GatewayError::QueueBind {
            name: name.to_string(),
            source,
        })?;
    info!(queue = name, url = %url, "queue bound");
    Ok(url)
}
