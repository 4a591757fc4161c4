//! Reconnecting event feed over a JSON-RPC WebSocket.
//!
//! Owns the transport and an explicit reconnect state machine: the
//! subscription registry and request ledger outlive any single connection
//! and are replayed into each new one. A close with code 1000 (or a local
//! shutdown) ends the feed; anything else reconnects.

use crate::error::{WsError, WsResult};
use crate::feed_handle::{FeedCommand, FeedHandle};
use crate::heartbeat::HeartbeatManager;
use crate::message::RpcMessage;
use crate::pending::{PendingKind, RequestLedger};
use crate::subscription::{SubscriptionKey, SubscriptionRegistry, SubscriptionStatus};
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Mutex as TokioMutex};
use tokio::time::MissedTickBehavior;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::{
    connect_async_tls_with_config, tungstenite::Message, MaybeTlsStream, WebSocketStream,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

type WsSink = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;

/// Close code for a graceful close.
pub const NORMAL_CLOSE: u16 = 1000;
/// Close code reported when the stream ends without a close frame.
pub const ABNORMAL_CLOSE: u16 = 1006;

/// Feed configuration.
#[derive(Debug, Clone)]
pub struct FeedConfig {
    /// WebSocket URL.
    pub url: String,
    /// Maximum consecutive reconnection attempts (0 = infinite).
    pub max_reconnect_attempts: u32,
    /// Delay before the first reconnect after a drop.
    pub reconnect_delay_ms: u64,
    /// Cap for the exponential backoff on repeated failures.
    pub reconnect_max_delay_ms: u64,
    /// Ping interval.
    pub heartbeat_interval_ms: u64,
    /// Pong must arrive within this.
    pub heartbeat_timeout_ms: u64,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            max_reconnect_attempts: 0, // Infinite
            reconnect_delay_ms: 100,
            reconnect_max_delay_ms: 30_000,
            heartbeat_interval_ms: 10_000,
            heartbeat_timeout_ms: 5_000,
        }
    }
}

/// Connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Disconnected => write!(f, "DISCONNECTED"),
            Self::Connecting => write!(f, "CONNECTING"),
            Self::Connected => write!(f, "CONNECTED"),
            Self::Reconnecting => write!(f, "RECONNECTING"),
        }
    }
}

/// Events delivered to the feed's consumer.
#[derive(Debug, Clone, PartialEq)]
pub enum FeedEvent {
    /// Transport open and all subscriptions and pending requests replayed.
    Connected { reconnect: bool },
    /// Transport lost or closed.
    Disconnected { code: u16, reason: String },
    /// Subscription notification.
    Notification {
        key: SubscriptionKey,
        label: String,
        payload: Value,
    },
}

/// How a live session ended without error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SessionEnd {
    Shutdown,
    NormalClose,
}

/// Resilient event subscription feed.
pub struct EventFeed {
    config: FeedConfig,
    state: Arc<RwLock<ConnectionState>>,
    registry: Mutex<SubscriptionRegistry>,
    ledger: Mutex<RequestLedger>,
    heartbeat: HeartbeatManager,
    event_tx: mpsc::Sender<FeedEvent>,
    /// Consecutive failed attempts since the last successful connect.
    reconnect_count: RwLock<u32>,
    /// Successful connects over the feed's lifetime.
    connections: RwLock<u64>,
    command_tx: mpsc::Sender<FeedCommand>,
    command_rx: TokioMutex<mpsc::Receiver<FeedCommand>>,
    shutdown_token: CancellationToken,
}

impl EventFeed {
    pub fn new(config: FeedConfig, event_tx: mpsc::Sender<FeedEvent>) -> Self {
        let (command_tx, command_rx) = mpsc::channel(256);
        Self {
            heartbeat: HeartbeatManager::new(
                config.heartbeat_interval_ms,
                config.heartbeat_timeout_ms,
            ),
            config,
            state: Arc::new(RwLock::new(ConnectionState::Disconnected)),
            registry: Mutex::new(SubscriptionRegistry::new()),
            ledger: Mutex::new(RequestLedger::new()),
            event_tx,
            reconnect_count: RwLock::new(0),
            connections: RwLock::new(0),
            command_tx,
            command_rx: TokioMutex::new(command_rx),
            shutdown_token: CancellationToken::new(),
        }
    }

    /// Get a cloneable handle for requests and late subscriptions.
    pub fn handle(&self) -> FeedHandle {
        FeedHandle::new(
            self.command_tx.clone(),
            self.state.clone(),
            self.shutdown_token.clone(),
        )
    }

    /// Register a subscription before (or while) the feed runs.
    ///
    /// It is established on the next connection; use [`FeedHandle::subscribe`]
    /// to have it sent immediately on a live connection.
    pub fn subscribe(&self, label: &str, params: Value) -> SubscriptionKey {
        self.registry.lock().register(label, params)
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.read()
    }

    pub fn reconnect_count(&self) -> u32 {
        *self.reconnect_count.read()
    }

    pub fn connection_count(&self) -> u64 {
        *self.connections.read()
    }

    pub fn active_subscriptions(&self) -> usize {
        self.registry.lock().active_count()
    }

    pub fn subscriptions(&self) -> Vec<SubscriptionStatus> {
        self.registry.lock().snapshot()
    }

    /// Caller-issued requests still awaiting a response.
    pub fn pending_requests(&self) -> usize {
        self.ledger.lock().calls_pending()
    }

    /// Signal graceful shutdown.
    pub fn shutdown(&self) {
        info!("EventFeed shutdown requested");
        self.shutdown_token.cancel();
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown_token.is_cancelled()
    }

    /// Connect and run until shutdown, a normal close, or the reconnect
    /// limit is exhausted.
    pub async fn run(&self) -> WsResult<()> {
        loop {
            if self.is_shutdown() {
                info!("Shutdown requested, exiting feed loop");
                self.finish(|| WsError::ShutDown);
                return Ok(());
            }

            *self.state.write() = ConnectionState::Connecting;

            let error = match self.try_connect().await {
                Ok(SessionEnd::Shutdown) => {
                    self.emit_disconnected(NORMAL_CLOSE, "shutdown").await;
                    self.finish(|| WsError::ShutDown);
                    return Ok(());
                }
                Ok(SessionEnd::NormalClose) => {
                    info!("Feed closed normally by server, not reconnecting");
                    self.emit_disconnected(NORMAL_CLOSE, "normal close").await;
                    self.finish(|| WsError::ConnectionClosed {
                        code: NORMAL_CLOSE,
                        reason: "normal close".to_string(),
                    });
                    return Ok(());
                }
                Err(e) => e,
            };

            error!(error = %error, "Feed transport failure");
            self.registry.lock().reset_server_ids();
            let (code, reason) = match &error {
                WsError::ConnectionClosed { code, reason } => (*code, reason.clone()),
                other => (ABNORMAL_CLOSE, other.to_string()),
            };
            self.emit_disconnected(code, &reason).await;

            if self.is_shutdown() {
                info!("Shutdown requested after disconnect, not reconnecting");
                self.finish(|| WsError::ShutDown);
                return Ok(());
            }

            let attempt = {
                let mut count = self.reconnect_count.write();
                *count += 1;
                *count
            };

            if self.config.max_reconnect_attempts > 0
                && attempt > self.config.max_reconnect_attempts
            {
                error!(attempt, "Max reconnection attempts reached");
                self.finish(|| {
                    WsError::ConnectionFailed("Max reconnection attempts reached".to_string())
                });
                return Err(WsError::ConnectionFailed(
                    "Max reconnection attempts reached".to_string(),
                ));
            }

            *self.state.write() = ConnectionState::Reconnecting;

            let delay = self.backoff_delay(attempt);
            warn!(attempt, delay_ms = delay.as_millis() as u64, "Reconnecting");

            tokio::select! {
                () = tokio::time::sleep(delay) => {}
                () = self.shutdown_token.cancelled() => {
                    info!("Shutdown requested during backoff, exiting");
                    self.finish(|| WsError::ShutDown);
                    return Ok(());
                }
            }
        }
    }

    async fn try_connect(&self) -> WsResult<SessionEnd> {
        info!(url = %self.config.url, "Connecting to WebSocket");

        let connect = connect_async_tls_with_config(&self.config.url, None, true, None);
        let (ws_stream, _response) = tokio::select! {
            result = connect => result?,
            () = self.shutdown_token.cancelled() => return Ok(SessionEnd::Shutdown),
        };
        let (mut write, mut read) = ws_stream.split();

        *self.state.write() = ConnectionState::Connected;
        *self.reconnect_count.write() = 0;
        let reconnect = {
            let mut connections = self.connections.write();
            *connections += 1;
            *connections > 1
        };
        info!(reconnect, "WebSocket connected");

        self.heartbeat.reset();
        self.replay(&mut write).await?;
        self.emit(FeedEvent::Connected { reconnect }).await;

        let mut heartbeat_tick = tokio::time::interval(self.heartbeat.check_interval());
        heartbeat_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut commands = self.command_rx.lock().await;

        loop {
            tokio::select! {
                biased;

                () = self.shutdown_token.cancelled() => {
                    info!("Shutdown signal received in message loop");
                    let frame = CloseFrame {
                        code: CloseCode::Normal,
                        reason: "shutdown".into(),
                    };
                    if let Err(e) = write.send(Message::Close(Some(frame))).await {
                        warn!(?e, "Failed to send Close frame during shutdown");
                    }
                    *self.state.write() = ConnectionState::Disconnected;
                    return Ok(SessionEnd::Shutdown);
                }

                msg = read.next() => {
                    match msg {
                        Some(Ok(Message::Text(text))) => {
                            self.handle_text_message(&text).await;
                        }
                        Some(Ok(Message::Ping(data))) => {
                            self.heartbeat.record_message();
                            write.send(Message::Pong(data)).await?;
                        }
                        Some(Ok(Message::Pong(_))) => {
                            self.heartbeat.record_pong();
                        }
                        Some(Ok(Message::Close(frame))) => {
                            let (code, reason) = frame
                                .map(|f| (u16::from(f.code), f.reason.to_string()))
                                .unwrap_or((ABNORMAL_CLOSE, "Close without frame".to_string()));
                            *self.state.write() = ConnectionState::Disconnected;
                            if code == NORMAL_CLOSE {
                                info!(code, %reason, "WebSocket closed by server");
                                return Ok(SessionEnd::NormalClose);
                            }
                            warn!(code, %reason, "WebSocket closed abnormally by server");
                            return Err(WsError::ConnectionClosed { code, reason });
                        }
                        Some(Err(e)) => {
                            error!(?e, "WebSocket read error");
                            *self.state.write() = ConnectionState::Disconnected;
                            return Err(e.into());
                        }
                        None => {
                            warn!("WebSocket stream ended");
                            *self.state.write() = ConnectionState::Disconnected;
                            return Err(WsError::ConnectionClosed {
                                code: ABNORMAL_CLOSE,
                                reason: "Stream ended".to_string(),
                            });
                        }
                        _ => {}
                    }
                }

                command = commands.recv() => {
                    if let Some(command) = command {
                        self.handle_command(command, &mut write).await?;
                    }
                }

                _ = heartbeat_tick.tick() => {
                    if self.heartbeat.is_timed_out() {
                        error!("Heartbeat timeout, forcing close");
                        if let Err(e) = write.send(Message::Close(None)).await {
                            debug!(?e, "Close frame not sent");
                        }
                        *self.state.write() = ConnectionState::Disconnected;
                        return Err(WsError::HeartbeatTimeout);
                    }

                    if self.heartbeat.should_send_heartbeat() {
                        write.send(Message::Ping(Vec::new())).await?;
                        self.heartbeat.record_ping();
                        debug!("Sent heartbeat ping");
                    }
                }
            }
        }
    }

    /// Write every registered subscription and pending request into a
    /// fresh connection, each exactly once.
    async fn replay(&self, write: &mut WsSink) -> WsResult<()> {
        let order = {
            let registry = self.registry.lock();
            let mut ledger = self.ledger.lock();
            let dropped = ledger.drop_abandoned();
            if dropped > 0 {
                info!(dropped, "Dropped requests abandoned by their callers");
            }
            ledger.replay_order(&registry)
        };
        if order.is_empty() {
            return Ok(());
        }

        info!(count = order.len(), "Replaying subscriptions and pending requests");
        for id in order {
            self.send_pending(id, write).await?;
        }
        Ok(())
    }

    async fn send_pending(&self, id: u64, write: &mut WsSink) -> WsResult<()> {
        let text = self.ledger.lock().mark_sent(id)?;
        if let Some(text) = text {
            write
                .send(Message::Text(text))
                .await
                .map_err(|e| WsError::SendFailed(e.to_string()))?;
            debug!(id, "Request sent");
        }
        Ok(())
    }

    async fn handle_command(&self, command: FeedCommand, write: &mut WsSink) -> WsResult<()> {
        let id = match command {
            FeedCommand::Request {
                method,
                params,
                responder,
            } => self.ledger.lock().insert_call(method, params, responder),
            FeedCommand::Subscribe {
                label,
                params,
                responder,
            } => {
                let key = self.registry.lock().register(label, params.clone());
                let _ = responder.send(key);
                self.ledger.lock().ensure_subscribe(key, params)
            }
        };
        self.send_pending(id, write).await
    }

    async fn handle_text_message(&self, text: &str) {
        self.heartbeat.record_message();

        let msg: RpcMessage = match serde_json::from_str(text) {
            Ok(msg) => msg,
            Err(e) => {
                warn!(error = %e, "Ignoring unparseable message");
                return;
            }
        };

        match msg {
            RpcMessage::Response(resp) => {
                let Some(entry) = self.ledger.lock().complete(resp.id) else {
                    debug!(id = resp.id, "Response for unknown request");
                    return;
                };

                match (entry.kind, resp.error) {
                    (PendingKind::Call, Some(err)) => entry.respond(Err(WsError::Rpc {
                        code: err.code,
                        message: err.message,
                    })),
                    (PendingKind::Call, None) => {
                        entry.respond(Ok(resp.result.unwrap_or(Value::Null)))
                    }
                    (PendingKind::Subscribe(key), Some(err)) => {
                        // stays registered, retried on the next connection
                        warn!(%key, code = err.code, message = %err.message, "Subscribe rejected");
                    }
                    (PendingKind::Subscribe(key), None) => {
                        match resp.result.as_ref().and_then(Value::as_str) {
                            Some(server_id) => {
                                self.registry.lock().confirm(key, server_id.to_string());
                            }
                            None => warn!(%key, "Subscribe response without subscription id"),
                        }
                    }
                }
            }
            RpcMessage::Notification(note) => {
                if !note.is_subscription() {
                    debug!(method = %note.method, "Ignoring notification");
                    return;
                }
                let resolved = self
                    .registry
                    .lock()
                    .lookup(&note.params.subscription)
                    .map(|(key, label)| (key, label.to_string()));
                match resolved {
                    Some((key, label)) => {
                        self.emit(FeedEvent::Notification {
                            key,
                            label,
                            payload: note.params.result,
                        })
                        .await;
                    }
                    None => {
                        debug!(id = %note.params.subscription, "Notification for stale subscription");
                    }
                }
            }
        }
    }

    async fn emit(&self, event: FeedEvent) {
        if self.event_tx.send(event).await.is_err() {
            warn!("Feed event receiver dropped");
        }
    }

    async fn emit_disconnected(&self, code: u16, reason: &str) {
        self.emit(FeedEvent::Disconnected {
            code,
            reason: reason.to_string(),
        })
        .await;
    }

    /// Terminal cleanup: fail waiting callers and drop server ids.
    fn finish(&self, reason: impl Fn() -> WsError) {
        *self.state.write() = ConnectionState::Disconnected;
        self.registry.lock().reset_server_ids();
        self.ledger.lock().fail_all(reason);
    }

    fn backoff_delay(&self, attempt: u32) -> Duration {
        let base = self.config.reconnect_delay_ms;
        let max = self.config.reconnect_max_delay_ms;

        // attempt=1 -> base, attempt=2 -> 2*base, attempt=3 -> 4*base
        let exponent = attempt.saturating_sub(1).min(16);
        let delay = base.saturating_mul(1u64 << exponent).min(max);
        Duration::from_millis(delay)
    }
}
