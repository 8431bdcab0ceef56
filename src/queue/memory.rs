//! In-process queue service
//!
//! Behaves like a managed queue as far as the gateway can tell: named
//! queues created on bind, long-poll receive, receipt handles, delete, and
//! redelivery of messages that were received but never deleted. Like SQS
//! it refuses bodies with characters outside the XML character range. It
//! also keeps a journal of every operation and can inject failures.

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{Mutex, Notify};
use tokio::time::{timeout_at, Instant};

use crate::error::QueueError;
use crate::queue::{QueueClient, QueueMessage};
use crate::types::{LineId, MessageId, QueueUrl, ReceiptHandle};

/// One entry of the operation journal
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueueOp {
    Sent {
        queue: String,
        body: String,
        line: LineId,
    },
    Received {
        queue: String,
        id: MessageId,
    },
    Deleted {
        queue: String,
        id: MessageId,
    },
}

#[derive(Debug, Clone)]
struct Stored {
    id: MessageId,
    body: String,
}

#[derive(Debug, Default)]
struct Inner {
    ready: HashMap<String, VecDeque<Stored>>,
    /// Received but not deleted, by receipt handle
    in_flight: HashMap<ReceiptHandle, (String, Stored)>,
    journal: Vec<QueueOp>,
    next_id: u64,
    fail_binds: bool,
    fail_sends: usize,
    fail_receives: usize,
    fail_deletes: usize,
}

impl Inner {
    fn next(&mut self, prefix: &str) -> String {
        self.next_id += 1;
        format!("{prefix}-{}", self.next_id)
    }

    fn queue_name(&self, url: &QueueUrl) -> Result<String, QueueError> {
        let name = url.0.strip_prefix(MemoryQueue::URL_PREFIX).unwrap_or(url.0.as_str());
        if self.ready.contains_key(name) {
            Ok(name.to_string())
        } else {
            Err(QueueError::UnknownQueue(url.0.clone()))
        }
    }
}

/// Whether SQS accepts `c` in a message body
///
/// Allowed: `#x9 | #xA | #xD | #x20` to `#xD7FF | #xE000` to `#xFFFD |
/// #x10000` to `#x10FFFF`. `char` already excludes surrogates.
fn is_body_char(c: char) -> bool {
    matches!(c, '\t' | '\n' | '\r') || (c >= ' ' && c != '\u{FFFE}' && c != '\u{FFFF}')
}

/// In-memory queue service
#[derive(Debug, Default)]
pub struct MemoryQueue {
    inner: Mutex<Inner>,
    arrived: Notify,
}

impl MemoryQueue {
    const URL_PREFIX: &'static str = "memory://";

    pub fn new() -> Self {
        Self::default()
    }

    /// Locator a bound queue of this name gets
    pub fn url_for(name: &str) -> QueueUrl {
        QueueUrl(format!("{}{name}", Self::URL_PREFIX))
    }

    /// Put a message on a queue as an external producer would
    pub async fn push(&self, name: &str, body: impl Into<String>) -> MessageId {
        let mut inner = self.inner.lock().await;
        let id = MessageId(inner.next("msg"));
        inner
            .ready
            .entry(name.to_string())
            .or_default()
            .push_back(Stored {
                id: id.clone(),
                body: body.into(),
            });
        drop(inner);
        self.arrived.notify_waiters();
        id
    }

    /// Remove and return the bodies of every ready message on a queue
    pub async fn drain(&self, name: &str) -> Vec<String> {
        let mut inner = self.inner.lock().await;
        inner
            .ready
            .get_mut(name)
            .map(|queue| queue.drain(..).map(|stored| stored.body).collect())
            .unwrap_or_default()
    }

    /// Make every received-but-undeleted message visible again, as a
    /// visibility timeout would
    pub async fn redeliver_in_flight(&self) -> usize {
        let mut inner = self.inner.lock().await;
        let expired: Vec<_> = inner.in_flight.drain().map(|(_, entry)| entry).collect();
        let count = expired.len();
        for (name, stored) in expired {
            inner.ready.entry(name).or_default().push_front(stored);
        }
        drop(inner);
        self.arrived.notify_waiters();
        count
    }

    /// Number of received messages not yet deleted
    pub async fn in_flight(&self) -> usize {
        self.inner.lock().await.in_flight.len()
    }

    /// Copy of the operation journal
    pub async fn journal(&self) -> Vec<QueueOp> {
        self.inner.lock().await.journal.clone()
    }

    /// Make every following `bind` fail
    pub async fn fail_binds(&self) {
        self.inner.lock().await.fail_binds = true;
    }

    /// Make the next `count` sends fail
    pub async fn fail_sends(&self, count: usize) {
        self.inner.lock().await.fail_sends = count;
    }

    /// Make the next `count` receives fail
    pub async fn fail_receives(&self, count: usize) {
        self.inner.lock().await.fail_receives = count;
    }

    /// Make the next `count` deletes fail
    pub async fn fail_deletes(&self, count: usize) {
        self.inner.lock().await.fail_deletes = count;
    }

    async fn try_take(&self, queue: &QueueUrl) -> Result<Option<QueueMessage>, QueueError> {
        let mut inner = self.inner.lock().await;
        let name = inner.queue_name(queue)?;
        let Some(stored) = inner.ready.get_mut(&name).and_then(VecDeque::pop_front) else {
            return Ok(None);
        };

        let receipt = ReceiptHandle(inner.next("receipt"));
        inner.journal.push(QueueOp::Received {
            queue: name.clone(),
            id: stored.id.clone(),
        });
        inner
            .in_flight
            .insert(receipt.clone(), (name, stored.clone()));

        Ok(Some(QueueMessage {
            id: stored.id,
            body: stored.body,
            receipt,
            queue: queue.clone(),
        }))
    }
}

#[async_trait]
impl QueueClient for MemoryQueue {
    async fn bind(&self, name: &str) -> Result<QueueUrl, QueueError> {
        let mut inner = self.inner.lock().await;
        if inner.fail_binds {
            return Err(QueueError::Injected("bind"));
        }
        inner.ready.entry(name.to_string()).or_default();
        Ok(Self::url_for(name))
    }

    async fn receive(
        &self,
        queue: &QueueUrl,
        wait: Duration,
    ) -> Result<Option<QueueMessage>, QueueError> {
        {
            let mut inner = self.inner.lock().await;
            if inner.fail_receives > 0 {
                inner.fail_receives -= 1;
                return Err(QueueError::Injected("receive"));
            }
        }

        let deadline = Instant::now() + wait;
        loop {
            // Registered before the check so a push in between is not missed
            let arrived = self.arrived.notified();
            if let Some(message) = self.try_take(queue).await? {
                return Ok(Some(message));
            }
            if timeout_at(deadline, arrived).await.is_err() {
                return Ok(None);
            }
        }
    }

    async fn send(&self, queue: &QueueUrl, body: &str, line: LineId) -> Result<(), QueueError> {
        let mut inner = self.inner.lock().await;
        if inner.fail_sends > 0 {
            inner.fail_sends -= 1;
            return Err(QueueError::Injected("send"));
        }

        let name = inner.queue_name(queue)?;
        if let Some(bad) = body.chars().find(|c| !is_body_char(*c)) {
            return Err(QueueError::Rejected(format!(
                "InvalidMessageContents: invalid character {:#x} in body",
                bad as u32
            )));
        }
        let id = MessageId(inner.next("msg"));
        inner.journal.push(QueueOp::Sent {
            queue: name.clone(),
            body: body.to_string(),
            line,
        });
        inner.ready.entry(name).or_default().push_back(Stored {
            id,
            body: body.to_string(),
        });
        drop(inner);
        self.arrived.notify_waiters();
        Ok(())
    }

    async fn delete(&self, queue: &QueueUrl, receipt: &ReceiptHandle) -> Result<(), QueueError> {
        let mut inner = self.inner.lock().await;
        if inner.fail_deletes > 0 {
            inner.fail_deletes -= 1;
            return Err(QueueError::Injected("delete"));
        }

        let name = inner.queue_name(queue)?;
        // Deleting with a stale receipt is not an error, as with SQS
        if let Some((_, stored)) = inner.in_flight.remove(receipt) {
            inner.journal.push(QueueOp::Deleted {
                queue: name,
                id: stored.id,
            });
        }
        Ok(())
    }
}
