//! Router: the gateway's single control loop
//!
//! Owns every cross-task decision. Each iteration handles whichever event
//! arrives first:
//! - a chat line → encode → outbound adapter
//! - a queue message → decode → writer
//! - a delivery confirmed by the writer → acknowledger
//! - a queue fault → log (the adapter handles its own retry delay)
//! - the reader's exit → forward the chat lines still queued, then stop
//!
//! A message is acknowledged only after the writer confirms the line hit
//! the socket, never on receipt.

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::connection::{OutboundLine, ReaderExit};
use crate::error::GatewayError;
use crate::queue::{Delivery, OutboundBody, QueueFault, QueueMessage};
use crate::transport::BodyCodec;
use crate::types::{LineId, MessageId};

/// How many forwarded message ids are remembered for deduplication
pub const RECENT_MESSAGE_IDS: usize = 1024;

/// Channels the router consumes
pub struct RouterInputs {
    /// Lines read from chat (reader → router)
    pub chat_lines: mpsc::UnboundedReceiver<String>,
    /// Messages received from the incoming queue (inbound adapter → router)
    pub queue_messages: mpsc::UnboundedReceiver<QueueMessage>,
    /// Lines the writer has put on the socket (writer → router)
    pub delivered: mpsc::UnboundedReceiver<Delivery>,
    /// Transient queue failures (adapters → router)
    pub faults: mpsc::UnboundedReceiver<QueueFault>,
    /// Reader exit (reader → router)
    pub disconnect: oneshot::Receiver<ReaderExit>,
}

/// Channels the router produces into
pub struct RouterOutputs {
    /// Bodies for the outgoing queue (router → outbound adapter)
    pub to_queue: mpsc::UnboundedSender<OutboundBody>,
    /// Lines for chat (router → writer)
    pub to_chat: mpsc::UnboundedSender<OutboundLine>,
    /// Messages to delete (router → acknowledger)
    pub acks: mpsc::UnboundedSender<Delivery>,
}

/// Bounded set of recently forwarded message ids
#[derive(Debug)]
struct RecentIds {
    order: VecDeque<MessageId>,
    seen: HashSet<MessageId>,
    capacity: usize,
}

impl RecentIds {
    fn new(capacity: usize) -> Self {
        Self {
            order: VecDeque::with_capacity(capacity),
            seen: HashSet::with_capacity(capacity),
            capacity,
        }
    }

    fn contains(&self, id: &MessageId) -> bool {
        self.seen.contains(id)
    }

    fn insert(&mut self, id: MessageId) {
        if !self.seen.insert(id.clone()) {
            return;
        }
        self.order.push_back(id);
        if self.order.len() > self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.seen.remove(&oldest);
            }
        }
    }
}

/// The gateway's orchestrating task
pub struct Router {
    codec: Arc<dyn BodyCodec>,
    inputs: RouterInputs,
    outputs: RouterOutputs,
    recent: RecentIds,
}

impl Router {
    pub fn new(codec: Arc<dyn BodyCodec>, inputs: RouterInputs, outputs: RouterOutputs) -> Self {
        Self {
            codec,
            inputs,
            outputs,
            recent: RecentIds::new(RECENT_MESSAGE_IDS),
        }
    }

    /// Route until the chat connection ends
    ///
    /// Returns `Ok` when the server closed the connection, and the fatal
    /// error otherwise.
    pub async fn run(mut self) -> Result<(), GatewayError> {
        info!("router started");

        loop {
            tokio::select! {
                Some(line) = self.inputs.chat_lines.recv() => {
                    self.forward_to_queue(line)?;
                }
                Some(message) = self.inputs.queue_messages.recv() => {
                    self.forward_to_chat(message)?;
                }
                Some(delivery) = self.inputs.delivered.recv() => {
                    self.acknowledge(delivery);
                }
                Some(fault) = self.inputs.faults.recv() => {
                    warn!(
                        direction = %fault.direction,
                        queue = %fault.queue,
                        failures = fault.failures,
                        retry_in = ?fault.retry_in,
                        "queue error: {}", fault.error
                    );
                }
                exit = &mut self.inputs.disconnect => {
                    return match exit {
                        Ok(ReaderExit::Disconnected) => {
                            info!("Disconnected: server closed the connection");
                            self.drain_chat_lines()
                        }
                        Ok(ReaderExit::Failed(e)) => Err(e),
                        Err(_) => Err(GatewayError::ChannelClosed("disconnect signal")),
                    };
                }
            }
        }
    }

    /// Forward the lines the reader queued before it signalled its exit
    ///
    /// The reader sends every line before the disconnect signal, so
    /// whatever `select!` left behind is already in the channel.
    fn drain_chat_lines(&mut self) -> Result<(), GatewayError> {
        let mut drained = 0;
        while let Ok(line) = self.inputs.chat_lines.try_recv() {
            self.forward_to_queue(line)?;
            drained += 1;
        }
        if drained > 0 {
            debug!(lines = drained, "forwarded lines read before disconnect");
        }
        Ok(())
    }

    /// Chat → queue
    fn forward_to_queue(&mut self, line: String) -> Result<(), GatewayError> {
        let body = OutboundBody {
            line: LineId::new(),
            body: self.codec.encode(&line),
        };
        self.outputs
            .to_queue
            .send(body)
            .map_err(|_| GatewayError::ChannelClosed("outbound queue bodies"))
    }

    /// Queue → chat
    fn forward_to_chat(&mut self, message: QueueMessage) -> Result<(), GatewayError> {
        let delivery = Delivery::from(&message);

        if self.recent.contains(&message.id) {
            debug!(message_id = %message.id, "duplicate delivery, acknowledging only");
            self.acknowledge(delivery);
            return Ok(());
        }

        let text = match self.codec.decode(&message.body) {
            Ok(text) => text,
            Err(e) => {
                warn!(message_id = %message.id, error = %e, "dropping undecodable message");
                self.acknowledge(delivery);
                return Ok(());
            }
        };

        self.recent.insert(message.id);
        self.outputs
            .to_chat
            .send(OutboundLine {
                text,
                delivery: Some(delivery),
            })
            .map_err(|_| GatewayError::ChannelClosed("outbound chat lines"))
    }

    fn acknowledge(&self, delivery: Delivery) {
        if let Err(mpsc::error::SendError(delivery)) = self.outputs.acks.send(delivery) {
            warn!(message_id = %delivery.id, "acknowledger gone, message will be redelivered");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::config::Timing;
    use crate::error::QueueError;
    use crate::transport::{Base64Text, PlainText};
    use crate::types::{Direction, QueueUrl, ReceiptHandle};

    const WAIT: Duration = Duration::from_secs(1);

    struct Harness {
        chat_lines: mpsc::UnboundedSender<String>,
        queue_messages: mpsc::UnboundedSender<QueueMessage>,
        delivered: mpsc::UnboundedSender<Delivery>,
        faults: mpsc::UnboundedSender<QueueFault>,
        disconnect: Option<oneshot::Sender<ReaderExit>>,
        to_queue: mpsc::UnboundedReceiver<OutboundBody>,
        to_chat: mpsc::UnboundedReceiver<OutboundLine>,
        acks: mpsc::UnboundedReceiver<Delivery>,
        task: tokio::task::JoinHandle<Result<(), GatewayError>>,
    }

    impl Harness {
        fn start(codec: Arc<dyn BodyCodec>) -> Self {
            let (chat_lines, chat_lines_rx) = mpsc::unbounded_channel();
            let (queue_messages, queue_messages_rx) = mpsc::unbounded_channel();
            let (delivered, delivered_rx) = mpsc::unbounded_channel();
            let (faults, faults_rx) = mpsc::unbounded_channel();
            let (disconnect, disconnect_rx) = oneshot::channel();
            let (to_queue_tx, to_queue) = mpsc::unbounded_channel();
            let (to_chat_tx, to_chat) = mpsc::unbounded_channel();
            let (acks_tx, acks) = mpsc::unbounded_channel();

            let router = Router::new(
                codec,
                RouterInputs {
                    chat_lines: chat_lines_rx,
                    queue_messages: queue_messages_rx,
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

            Self {
                chat_lines,
                queue_messages,
                delivered,
                faults,
                disconnect: Some(disconnect),
                to_queue,
                to_chat,
                acks,
                task: tokio::spawn(router.run()),
            }
        }

        async fn stop(mut self, exit: ReaderExit) -> Result<(), GatewayError> {
            let _ = self.disconnect.take().unwrap().send(exit);
            tokio::time::timeout(WAIT, self.task).await.unwrap().unwrap()
        }
    }

    fn message(id: &str, body: &str) -> QueueMessage {
        QueueMessage {
            id: MessageId(id.to_string()),
            body: body.to_string(),
            receipt: ReceiptHandle(format!("receipt-{id}")),
            queue: QueueUrl("in".to_string()),
        }
    }

    async fn recv<T>(rx: &mut mpsc::UnboundedReceiver<T>) -> T {
        tokio::time::timeout(WAIT, rx.recv()).await.unwrap().unwrap()
    }

    #[tokio::test]
    async fn test_chat_lines_go_to_queue_in_order() {
        let mut h = Harness::start(Arc::new(PlainText));
        for i in 0..10 {
            h.chat_lines.send(format!("line {i}")).unwrap();
        }
        for i in 0..10 {
            assert_eq!(recv(&mut h.to_queue).await.body, format!("line {i}"));
        }
        assert!(h.stop(ReaderExit::Disconnected).await.is_ok());
    }

    #[tokio::test]
    async fn test_chat_lines_are_encoded() {
        let mut h = Harness::start(Arc::new(Base64Text));
        h.chat_lines.send("hello room".into()).unwrap();
        assert_eq!(recv(&mut h.to_queue).await.body, "aGVsbG8gcm9vbQ==");
    }

    #[tokio::test]
    async fn test_ack_only_after_writer_confirms() {
        let mut h = Harness::start(Arc::new(PlainText));
        let msg = message("m1", "PRIVMSG #room :hi");
        h.queue_messages.send(msg.clone()).unwrap();

        let line = recv(&mut h.to_chat).await;
        assert_eq!(line.text, "PRIVMSG #room :hi");

        // Nothing acknowledged while the line is only queued for the writer
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(h.acks.try_recv().is_err());

        h.delivered.send(line.delivery.unwrap()).unwrap();
        let ack = recv(&mut h.acks).await;
        assert_eq!(ack, Delivery::from(&msg));
    }

    #[tokio::test]
    async fn test_duplicate_message_acked_not_forwarded() {
        let mut h = Harness::start(Arc::new(PlainText));
        h.queue_messages.send(message("m1", "once")).unwrap();
        let mut again = message("m1", "once");
        again.receipt = ReceiptHandle("second-receipt".into());
        h.queue_messages.send(again.clone()).unwrap();
        h.queue_messages.send(message("m2", "twice")).unwrap();

        assert_eq!(recv(&mut h.to_chat).await.text, "once");
        assert_eq!(recv(&mut h.acks).await.receipt, again.receipt);
        assert_eq!(recv(&mut h.to_chat).await.text, "twice");
    }

    #[tokio::test]
    async fn test_undecodable_message_dropped_and_acked() {
        let mut h = Harness::start(Arc::new(Base64Text));
        h.queue_messages.send(message("bad", "%%%")).unwrap();
        h.queue_messages.send(message("good", "aGk=")).unwrap();

        assert_eq!(recv(&mut h.acks).await.id, MessageId("bad".into()));
        assert_eq!(recv(&mut h.to_chat).await.text, "hi");
    }

    #[tokio::test]
    async fn test_fault_does_not_stop_routing() {
        let mut h = Harness::start(Arc::new(PlainText));
        let timing = Timing::default();
        h.faults
            .send(QueueFault {
                direction: Direction::Inbound,
                queue: QueueUrl("in".into()),
                error: QueueError::Service("throttled".into()),
                retry_in: timing.retry_delay,
                failures: 1,
            })
            .unwrap();
        h.chat_lines.send("still flowing".into()).unwrap();
        assert_eq!(recv(&mut h.to_queue).await.body, "still flowing");
    }

    #[tokio::test]
    async fn test_disconnect_is_graceful() {
        let h = Harness::start(Arc::new(PlainText));
        assert!(h.stop(ReaderExit::Disconnected).await.is_ok());
    }

    #[tokio::test]
    async fn test_lines_before_disconnect_are_forwarded() {
        let mut h = Harness::start(Arc::new(PlainText));
        for i in 0..5 {
            h.chat_lines.send(format!("line {i}")).unwrap();
        }
        h.chat_lines.send("ERROR :Closing link".into()).unwrap();
        h.disconnect
            .take()
            .unwrap()
            .send(ReaderExit::Disconnected)
            .unwrap();
        let result = tokio::time::timeout(WAIT, &mut h.task).await.unwrap().unwrap();
        assert!(result.is_ok());

        // The router dropped its sender, so the channel ends after the last body
        let mut bodies = Vec::new();
        while let Some(body) = h.to_queue.recv().await {
            bodies.push(body.body);
        }
        assert_eq!(bodies.len(), 6);
        assert_eq!(bodies[0], "line 0");
        assert_eq!(bodies[5], "ERROR :Closing link");
    }

    #[tokio::test]
    async fn test_read_failure_is_fatal() {
        let h = Harness::start(Arc::new(PlainText));
        let err = h
            .stop(ReaderExit::Failed(GatewayError::ChatRead(std::io::Error::new(
                std::io::ErrorKind::ConnectionReset,
                "reset",
            ))))
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::ChatRead(_)));
    }

    #[test]
    fn test_recent_ids_bounded() {
        let mut recent = RecentIds::new(2);
        for id in ["a", "b", "c"] {
            recent.insert(MessageId(id.into()));
        }
        assert!(!recent.contains(&MessageId("a".into())));
        assert!(recent.contains(&MessageId("b".into())));
        assert!(recent.contains(&MessageId("c".into())));
    }
}
