//! Subscription registry.
//!
//! Subscriptions are identified locally by a stable [`SubscriptionKey`]; the
//! server-assigned id is per connection and is cleared on disconnect, so
//! every registered subscription is re-established on the next connection.

use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use tracing::{debug, info};

/// Stable local identifier of a subscription across reconnects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SubscriptionKey(pub u64);

impl std::fmt::Display for SubscriptionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "sub#{}", self.0)
    }
}

#[derive(Debug, Clone)]
struct SubscriptionEntry {
    label: String,
    params: Value,
    server_id: Option<String>,
    confirmed_at: Option<DateTime<Utc>>,
}

/// Point-in-time view of one subscription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionStatus {
    pub key: SubscriptionKey,
    pub label: String,
    pub server_id: Option<String>,
    pub confirmed_at: Option<DateTime<Utc>>,
}

impl SubscriptionStatus {
    pub fn is_active(&self) -> bool {
        self.server_id.is_some()
    }
}

/// Registered subscriptions in registration order.
#[derive(Debug, Default)]
pub struct SubscriptionRegistry {
    entries: BTreeMap<SubscriptionKey, SubscriptionEntry>,
    by_server_id: HashMap<String, SubscriptionKey>,
    next_key: u64,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a subscription; `params` is the full `eth_subscribe` params array.
    pub fn register(&mut self, label: impl Into<String>, params: Value) -> SubscriptionKey {
        self.next_key += 1;
        let key = SubscriptionKey(self.next_key);
        let label = label.into();
        debug!(%key, %label, "Subscription registered");
        self.entries.insert(
            key,
            SubscriptionEntry {
                label,
                params,
                server_id: None,
                confirmed_at: None,
            },
        );
        key
    }

    /// Record the server id returned for `key` on the current connection.
    ///
    /// Returns `false` if the key is unknown.
    pub fn confirm(&mut self, key: SubscriptionKey, server_id: String) -> bool {
        let Some(entry) = self.entries.get_mut(&key) else {
            return false;
        };
        if let Some(old) = entry.server_id.replace(server_id.clone()) {
            self.by_server_id.remove(&old);
        }
        entry.confirmed_at = Some(Utc::now());
        info!(%key, label = %entry.label, %server_id, "Subscription active");
        self.by_server_id.insert(server_id, key);
        true
    }

    /// Resolve a notification's server id to the local key and label.
    pub fn lookup(&self, server_id: &str) -> Option<(SubscriptionKey, &str)> {
        let key = *self.by_server_id.get(server_id)?;
        self.entries
            .get(&key)
            .map(|entry| (key, entry.label.as_str()))
    }

    /// Forget all server ids (connection lost).
    pub fn reset_server_ids(&mut self) {
        self.by_server_id.clear();
        for entry in self.entries.values_mut() {
            entry.server_id = None;
        }
    }

    /// Keys in registration order.
    pub fn keys(&self) -> Vec<SubscriptionKey> {
        self.entries.keys().copied().collect()
    }

    pub fn params(&self, key: SubscriptionKey) -> Option<&Value> {
        self.entries.get(&key).map(|entry| &entry.params)
    }

    pub fn active_count(&self) -> usize {
        self.by_server_id.len()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn snapshot(&self) -> Vec<SubscriptionStatus> {
        self.entries
            .iter()
            .map(|(key, entry)| SubscriptionStatus {
                key: *key,
                label: entry.label.clone(),
                server_id: entry.server_id.clone(),
                confirmed_at: entry.confirmed_at,
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_register_assigns_increasing_keys() {
        let mut reg = SubscriptionRegistry::new();
        let a = reg.register("swap", json!(["logs", {}]));
        let b = reg.register("mint", json!(["logs", {}]));
        assert!(a < b);
        assert_eq!(reg.keys(), vec![a, b]);
        assert_eq!(reg.active_count(), 0);
    }

    #[test]
    fn test_confirm_and_lookup() {
        let mut reg = SubscriptionRegistry::new();
        let key = reg.register("swap", json!(["logs", {}]));

        assert!(reg.confirm(key, "0xaa".to_string()));
        assert_eq!(reg.lookup("0xaa"), Some((key, "swap")));
        assert_eq!(reg.active_count(), 1);
        assert!(reg.snapshot()[0].is_active());
    }

    #[test]
    fn test_confirm_unknown_key() {
        let mut reg = SubscriptionRegistry::new();
        assert!(!reg.confirm(SubscriptionKey(42), "0x1".to_string()));
    }

    #[test]
    fn test_reconfirm_replaces_old_server_id() {
        let mut reg = SubscriptionRegistry::new();
        let key = reg.register("swap", json!(["logs", {}]));
        reg.confirm(key, "0x1".to_string());
        reg.confirm(key, "0x2".to_string());

        assert!(reg.lookup("0x1").is_none());
        assert_eq!(reg.lookup("0x2").map(|(k, _)| k), Some(key));
        assert_eq!(reg.active_count(), 1);
    }

    #[test]
    fn test_reset_server_ids_keeps_registrations() {
        let mut reg = SubscriptionRegistry::new();
        let key = reg.register("swap", json!(["logs", {"address": "0x1"}]));
        reg.confirm(key, "0xaa".to_string());

        reg.reset_server_ids();

        assert_eq!(reg.len(), 1);
        assert_eq!(reg.active_count(), 0);
        assert!(reg.lookup("0xaa").is_none());
        assert_eq!(reg.params(key), Some(&json!(["logs", {"address": "0x1"}])));
    }
}
