//! Queue adapter tasks
//!
//! Each adapter owns one direction of queue traffic and runs as its own
//! task:
//! - `InboundAdapter` long-polls the incoming queue and yields messages
//! - `OutboundAdapter` sends encoded chat lines to the outgoing queue
//! - `Acknowledger` deletes messages once they reached chat
//!
//! Transient errors never leave an adapter. The adapter reports a
//! `QueueFault` for logging, waits out its own backoff and retries, so a
//! failing direction cannot stall the other one. A body the service
//! rejects outright is logged and dropped instead.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::backoff::Backoff;
use crate::config::Timing;
use crate::error::QueueError;
use crate::queue::{QueueClient, QueueMessage};
use crate::types::{Direction, LineId, MessageId, QueueUrl, ReceiptHandle};

/// Delete attempts per delivered message before leaving it to redelivery
pub const ACK_ATTEMPTS: u32 = 3;

/// A transient queue failure, reported to the router for logging
#[derive(Debug, Clone)]
pub struct QueueFault {
    pub direction: Direction,
    pub queue: QueueUrl,
    pub error: QueueError,
    /// Delay the adapter waits before its next attempt
    pub retry_in: Duration,
    /// Consecutive failures so far
    pub failures: u32,
}

/// An encoded chat line on its way to the outgoing queue
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundBody {
    pub line: LineId,
    pub body: String,
}

/// A message that has been written to chat and may now be deleted
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub id: MessageId,
    pub receipt: ReceiptHandle,
    pub queue: QueueUrl,
}

impl From<&QueueMessage> for Delivery {
    fn from(message: &QueueMessage) -> Self {
        Self {
            id: message.id.clone(),
            receipt: message.receipt.clone(),
            queue: message.queue.clone(),
        }
    }
}

fn report(
    faults: &mpsc::UnboundedSender<QueueFault>,
    direction: Direction,
    queue: &QueueUrl,
    error: QueueError,
    backoff: &mut Backoff,
) -> Duration {
    let retry_in = backoff.next_delay();
    let _ = faults.send(QueueFault {
        direction,
        queue: queue.clone(),
        error,
        retry_in,
        failures: backoff.failures(),
    });
    retry_in
}

/// Long-polls the incoming queue
pub struct InboundAdapter {
    client: Arc<dyn QueueClient>,
    queue: QueueUrl,
    timing: Timing,
    messages: mpsc::UnboundedSender<QueueMessage>,
    faults: mpsc::UnboundedSender<QueueFault>,
}

impl InboundAdapter {
    pub fn new(
        client: Arc<dyn QueueClient>,
        queue: QueueUrl,
        timing: Timing,
        messages: mpsc::UnboundedSender<QueueMessage>,
        faults: mpsc::UnboundedSender<QueueFault>,
    ) -> Self {
        Self {
            client,
            queue,
            timing,
            messages,
            faults,
        }
    }

    /// Receive until the router goes away
    pub async fn run(self) {
        info!(queue = %self.queue, "inbound adapter started");
        let mut backoff = Backoff::from_timing(&self.timing);

        while !self.messages.is_closed() {
            match self.client.receive(&self.queue, self.timing.poll_wait).await {
                Ok(Some(message)) => {
                    backoff.reset();
                    debug!(message_id = %message.id, "queue message received");
                    if self.messages.send(message).is_err() {
                        break;
                    }
                }
                Ok(None) => backoff.reset(),
                Err(error) => {
                    let delay = report(
                        &self.faults,
                        Direction::Inbound,
                        &self.queue,
                        error,
                        &mut backoff,
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }

        debug!(queue = %self.queue, "inbound adapter stopped");
    }
}

/// Sends chat lines to the outgoing queue
///
/// A body that fails to send is resent until it succeeds; later bodies
/// wait behind it so queue order matches chat order. A body the service
/// rejects as invalid is dropped so it cannot hold up the lines after it.
pub struct OutboundAdapter {
    client: Arc<dyn QueueClient>,
    queue: QueueUrl,
    timing: Timing,
    bodies: mpsc::UnboundedReceiver<OutboundBody>,
    faults: mpsc::UnboundedSender<QueueFault>,
}

impl OutboundAdapter {
    pub fn new(
        client: Arc<dyn QueueClient>,
        queue: QueueUrl,
        timing: Timing,
        bodies: mpsc::UnboundedReceiver<OutboundBody>,
        faults: mpsc::UnboundedSender<QueueFault>,
    ) -> Self {
        Self {
            client,
            queue,
            timing,
            bodies,
            faults,
        }
    }

    /// Send until the router drops its end of the body channel
    pub async fn run(mut self) {
        info!(queue = %self.queue, "outbound adapter started");
        let mut backoff = Backoff::from_timing(&self.timing);

        while let Some(item) = self.bodies.recv().await {
            loop {
                match self.client.send(&self.queue, &item.body, item.line).await {
                    Ok(()) => {
                        backoff.reset();
                        debug!(line_id = %item.line, "line sent to queue");
                        break;
                    }
                    Err(error) if error.is_permanent() => {
                        warn!(
                            line_id = %item.line,
                            error = %error,
                            "dropping line the queue will not accept"
                        );
                        break;
                    }
                    Err(error) => {
                        let delay = report(
                            &self.faults,
                            Direction::Outbound,
                            &self.queue,
                            error,
                            &mut backoff,
                        );
                        tokio::time::sleep(delay).await;
                    }
                }
            }
        }

        debug!(queue = %self.queue, "outbound adapter stopped");
    }
}

/// Deletes delivered messages from the incoming queue
pub struct Acknowledger {
    client: Arc<dyn QueueClient>,
    timing: Timing,
    deliveries: mpsc::UnboundedReceiver<Delivery>,
    faults: mpsc::UnboundedSender<QueueFault>,
}

impl Acknowledger {
    pub fn new(
        client: Arc<dyn QueueClient>,
        timing: Timing,
        deliveries: mpsc::UnboundedReceiver<Delivery>,
        faults: mpsc::UnboundedSender<QueueFault>,
    ) -> Self {
        Self {
            client,
            timing,
            deliveries,
            faults,
        }
    }

    pub async fn run(mut self) {
        while let Some(delivery) = self.deliveries.recv().await {
            self.acknowledge(&delivery).await;
        }
        debug!("acknowledger stopped");
    }

    async fn acknowledge(&self, delivery: &Delivery) {
        let mut backoff = Backoff::from_timing(&self.timing);

        for attempt in 1..=ACK_ATTEMPTS {
            match self.client.delete(&delivery.queue, &delivery.receipt).await {
                Ok(()) => {
                    debug!(message_id = %delivery.id, "queue message deleted");
                    return;
                }
                Err(error) if attempt < ACK_ATTEMPTS => {
                    let delay = report(
                        &self.faults,
                        Direction::Acknowledge,
                        &delivery.queue,
                        error,
                        &mut backoff,
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(error) => {
                    warn!(
                        message_id = %delivery.id,
                        error = %error,
                        "giving up deleting message, it will be redelivered"
                    );
                }
            }
        }
    }
}
