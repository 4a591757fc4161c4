//! Cloneable handle for issuing requests through the event feed.
//!
//! Commands are queued over a channel to the feed's connection loop, which
//! owns the transport. A request stays pending across reconnects and is
//! answered once, whichever connection the response arrives on.

use crate::connection::ConnectionState;
use crate::error::{WsError, WsResult};
use crate::subscription::SubscriptionKey;
use parking_lot::RwLock;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Command from a handle to the connection loop.
#[derive(Debug)]
pub enum FeedCommand {
    /// JSON-RPC call; the result is sent back on `responder`.
    Request {
        method: String,
        params: Value,
        responder: oneshot::Sender<WsResult<Value>>,
    },
    /// Register a subscription; the key is sent back immediately.
    Subscribe {
        label: String,
        params: Value,
        responder: oneshot::Sender<SubscriptionKey>,
    },
}

/// Handle for sending requests to the feed.
#[derive(Clone)]
pub struct FeedHandle {
    tx: mpsc::Sender<FeedCommand>,
    state: Arc<RwLock<ConnectionState>>,
    shutdown_token: CancellationToken,
}

impl FeedHandle {
    pub fn new(
        tx: mpsc::Sender<FeedCommand>,
        state: Arc<RwLock<ConnectionState>>,
        shutdown_token: CancellationToken,
    ) -> Self {
        Self {
            tx,
            state,
            shutdown_token,
        }
    }

    /// Issue a JSON-RPC call and wait for its result.
    ///
    /// Callers that need a deadline wrap this in `tokio::time::timeout`.
    /// The request is re-sent on every reconnect until answered, unless the
    /// caller has stopped waiting by then.
    pub async fn request(&self, method: &str, params: Value) -> WsResult<Value> {
        let (responder, rx) = oneshot::channel();
        self.tx
            .send(FeedCommand::Request {
                method: method.to_string(),
                params,
                responder,
            })
            .await
            .map_err(|_| WsError::ShutDown)?;
        debug!(method, "Request queued");

        rx.await.map_err(|_| WsError::ShutDown)?
    }

    /// Register a subscription; `params` is the `eth_subscribe` params array.
    pub async fn subscribe(&self, label: &str, params: Value) -> WsResult<SubscriptionKey> {
        let (responder, rx) = oneshot::channel();
        self.tx
            .send(FeedCommand::Subscribe {
                label: label.to_string(),
                params,
                responder,
            })
            .await
            .map_err(|_| WsError::ShutDown)?;

        rx.await.map_err(|_| WsError::ShutDown)
    }

    /// Stop the feed gracefully (close code 1000, no reconnect).
    pub fn shutdown(&self) {
        self.shutdown_token.cancel();
    }

    pub fn is_connected(&self) -> bool {
        *self.state.read() == ConnectionState::Connected && !self.tx.is_closed()
    }

    pub fn connection_state(&self) -> ConnectionState {
        *self.state.read()
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}
