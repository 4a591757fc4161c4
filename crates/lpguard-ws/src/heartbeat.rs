//! Heartbeat management for the feed transport.
//!
//! Pings are WebSocket ping frames sent every `interval_ms`; a pong must
//! arrive within `timeout_ms` or the transport is force-closed.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::time::Duration;
use tracing::debug;

/// Heartbeat manager for a single live connection.
pub struct HeartbeatManager {
    /// How often to send a ping.
    interval_ms: u64,
    /// How long to wait for the matching pong.
    timeout_ms: u64,
    last_ping: RwLock<Option<DateTime<Utc>>>,
    last_pong: RwLock<Option<DateTime<Utc>>>,
    /// Last inbound frame of any kind.
    last_message: RwLock<DateTime<Utc>>,
    waiting_for_pong: RwLock<bool>,
}

impl HeartbeatManager {
    pub fn new(interval_ms: u64, timeout_ms: u64) -> Self {
        Self {
            interval_ms,
            timeout_ms,
            last_ping: RwLock::new(None),
            last_pong: RwLock::new(None),
            last_message: RwLock::new(Utc::now()),
            waiting_for_pong: RwLock::new(false),
        }
    }

    /// Reset heartbeat state (called on connection open).
    pub fn reset(&self) {
        *self.last_ping.write() = None;
        *self.last_pong.write() = None;
        *self.last_message.write() = Utc::now();
        *self.waiting_for_pong.write() = false;
    }

    pub fn record_ping(&self) {
        let now = Utc::now();
        *self.last_ping.write() = Some(now);
        *self.waiting_for_pong.write() = true;
        debug!(time = %now, "Recorded ping");
    }

    pub fn record_pong(&self) {
        let now = Utc::now();
        *self.last_pong.write() = Some(now);
        *self.waiting_for_pong.write() = false;

        if let Some(ping_time) = *self.last_ping.read() {
            let rtt_ms = (now - ping_time).num_milliseconds();
            debug!(rtt_ms, "Received pong");
        }
    }

    pub fn record_message(&self) {
        *self.last_message.write() = Utc::now();
    }

    /// A ping is outstanding and its pong is overdue.
    pub fn is_timed_out(&self) -> bool {
        if !*self.waiting_for_pong.read() {
            return false;
        }

        match *self.last_ping.read() {
            Some(ping_time) => (Utc::now() - ping_time).num_milliseconds() > self.timeout_ms as i64,
            None => false,
        }
    }

    /// Time to send the next ping: none outstanding and the interval has
    /// elapsed since the previous one (or since the connection opened).
    pub fn should_send_heartbeat(&self) -> bool {
        if *self.waiting_for_pong.read() {
            return false;
        }

        let last_ping = *self.last_ping.read();
        let since = last_ping.unwrap_or_else(|| *self.last_message.read());
        (Utc::now() - since).num_milliseconds() >= self.interval_ms as i64
    }

    /// Granularity of heartbeat checks; fine enough to notice a timeout
    /// within a fraction of `timeout_ms`.
    pub fn check_interval(&self) -> Duration {
        let ms = (self.interval_ms.min(self.timeout_ms) / 4).max(10);
        Duration::from_millis(ms)
    }

    pub fn stats(&self) -> HeartbeatStats {
        HeartbeatStats {
            last_ping: *self.last_ping.read(),
            last_pong: *self.last_pong.read(),
            last_message: *self.last_message.read(),
            waiting_for_pong: *self.waiting_for_pong.read(),
        }
    }
}

/// Heartbeat statistics.
#[derive(Debug, Clone)]
pub struct HeartbeatStats {
    pub last_ping: Option<DateTime<Utc>>,
    pub last_pong: Option<DateTime<Utc>>,
    pub last_message: DateTime<Utc>,
    pub waiting_for_pong: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_heartbeat_initial_state() {
        let hb = HeartbeatManager::new(10_000, 5_000);
        assert!(!hb.is_timed_out());
        assert!(!hb.should_send_heartbeat());
        assert!(!hb.stats().waiting_for_pong);
    }

    #[test]
    fn test_heartbeat_ping_pong() {
        let hb = HeartbeatManager::new(10_000, 5_000);

        hb.record_ping();
        assert!(hb.stats().waiting_for_pong);
        assert!(!hb.should_send_heartbeat());

        hb.record_pong();
        assert!(!hb.stats().waiting_for_pong);
        assert!(hb.stats().last_pong.is_some());
    }

    #[test]
    fn test_heartbeat_times_out_without_pong() {
        let hb = HeartbeatManager::new(0, 0);
        hb.record_ping();
        std::thread::sleep(Duration::from_millis(5));
        assert!(hb.is_timed_out());

        hb.record_pong();
        assert!(!hb.is_timed_out());
    }

    #[test]
    fn test_zero_interval_sends_immediately() {
        let hb = HeartbeatManager::new(0, 5_000);
        assert!(hb.should_send_heartbeat());
    }

    #[test]
    fn test_check_interval_floor() {
        assert_eq!(
            HeartbeatManager::new(10_000, 5_000).check_interval(),
            Duration::from_millis(1_250)
        );
        assert_eq!(
            HeartbeatManager::new(0, 0).check_interval(),
            Duration::from_millis(10)
        );
    }
}
