//! Connection state owner
//!
//! The reader and writer tasks never mutate the connection state directly.
//! Every transition goes through `StateHandle`, which applies it as a
//! compare-and-swap on a `watch` channel and wakes every task waiting on a
//! state change.

use std::sync::Arc;

use tokio::sync::watch;
use tracing::info;

use crate::error::GatewayError;

/// Handshake progress of the chat connection
///
/// Moves Init → AwaitingHandshake → Live. The only way back is
/// AwaitingHandshake → Init, when the server rejects the nickname.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Identity commands not sent yet
    Init,
    /// NICK/USER sent, waiting for the server's verdict
    AwaitingHandshake,
    /// Registered; ordinary traffic flows
    Live,
}

/// Connection state together with the nickname it applies to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot {
    pub state: ConnectionState,
    pub nickname: String,
    /// Number of handshakes started so far
    pub attempts: u32,
}

/// Shared handle to the connection state owner
#[derive(Debug, Clone)]
pub struct StateHandle {
    tx: Arc<watch::Sender<Snapshot>>,
}

impl StateHandle {
    /// Create the state owner in `Init` with the configured nickname
    pub fn new(nickname: impl Into<String>) -> Self {
        let (tx, _rx) = watch::channel(Snapshot {
            state: ConnectionState::Init,
            nickname: nickname.into(),
            attempts: 0,
        });
        Self { tx: Arc::new(tx) }
    }

    /// Copy of the current state
    pub fn snapshot(&self) -> Snapshot {
        self.tx.borrow().clone()
    }

    pub fn state(&self) -> ConnectionState {
        self.tx.borrow().state
    }

    pub fn nickname(&self) -> String {
        self.tx.borrow().nickname.clone()
    }

    /// Init → AwaitingHandshake
    ///
    /// Returns the nickname to announce, or `None` if the state was not
    /// `Init`.
    pub fn begin_handshake(&self) -> Option<String> {
        let mut announced = None;
        self.tx.send_if_modified(|snapshot| {
            if snapshot.state != ConnectionState::Init {
                return false;
            }
            snapshot.state = ConnectionState::AwaitingHandshake;
            snapshot.attempts += 1;
            announced = Some(snapshot.nickname.clone());
            true
        });
        announced
    }

    /// AwaitingHandshake → Init, appending `_` to the nickname
    ///
    /// Returns the nickname for the next attempt, or `None` if no handshake
    /// was in progress.
    pub fn reject_nickname(&self) -> Option<String> {
        let mut next = None;
        self.tx.send_if_modified(|snapshot| {
            if snapshot.state != ConnectionState::AwaitingHandshake {
                return false;
            }
            snapshot.nickname.push('_');
            snapshot.state = ConnectionState::Init;
            next = Some(snapshot.nickname.clone());
            true
        });
        if let Some(nickname) = &next {
            info!(nickname = %nickname, "nickname rejected, retrying handshake");
        }
        next
    }

    /// AwaitingHandshake → Live
    pub fn go_live(&self) -> bool {
        let changed = self.tx.send_if_modified(|snapshot| {
            if snapshot.state != ConnectionState::AwaitingHandshake {
                return false;
            }
            snapshot.state = ConnectionState::Live;
            true
        });
        if changed {
            info!(nickname = %self.nickname(), "handshake complete, connection is live");
        }
        changed
    }

    /// Wait until the state satisfies `predicate`, without polling
    pub async fn wait_until<F>(&self, mut predicate: F) -> Result<Snapshot, GatewayError>
    where
        F: FnMut(&Snapshot) -> bool,
    {
        let mut rx = self.tx.subscribe();
        let snapshot = rx
            .wait_for(|snapshot| predicate(snapshot))
            .await
            .map_err(|_| GatewayError::ChannelClosed("connection state"))?;
        Ok(snapshot.clone())
    }
}
