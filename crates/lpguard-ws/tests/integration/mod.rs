//! Integration tests for lpguard-ws.
//!
//! These tests run the event feed against an in-process JSON-RPC server:
//! - Reconnect after an abnormal close
//! - Replay of subscriptions and in-flight requests
//! - Heartbeat timeout and normal close handling

pub mod common;
