//! Resilient JSON-RPC WebSocket event feed.
//!
//! Provides a pool event subscription that survives transport failures:
//! - Automatic reconnection (fixed first delay, exponential backoff after)
//! - Subscription registry re-established on every connection
//! - In-flight request ledger replayed exactly once per connection
//! - Heartbeat monitoring (ping frames, pong timeout forces a close)
//! - Channel-based request handle and event delivery

pub mod connection;
pub mod error;
pub mod feed_handle;
pub mod heartbeat;
pub mod message;
pub mod pending;
pub mod subscription;

pub use connection::{
    ConnectionState, EventFeed, FeedConfig, FeedEvent, ABNORMAL_CLOSE, NORMAL_CLOSE,
};
pub use error::{WsError, WsResult};
pub use feed_handle::{FeedCommand, FeedHandle};
pub use message::{RpcErrorObject, RpcMessage, RpcNotification, RpcRequest, RpcResponse};
pub use subscription::{SubscriptionKey, SubscriptionStatus};

use std::sync::Once;

static INIT_CRYPTO: Once = Once::new();

/// Initialize the TLS crypto provider.
/// Must be called before any `wss://` connection is made.
pub fn init_crypto() {
    INIT_CRYPTO.call_once(|| {
        let _ = rustls::crypto::ring::default_provider().install_default();
    });
}
