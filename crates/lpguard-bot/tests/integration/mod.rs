//! Integration tests for lpguard-bot.
//!
//! These tests run the whole application against an in-process node:
//! - Position initialization over `eth_call`
//! - Startup evaluation and event-triggered evaluations
//! - Graceful shutdown

pub mod common;
