//! Ledger of requests sent but not yet answered.
//!
//! Entries survive a dropped connection and are written once into each new
//! connection, subscriptions first, then calls in their original id order.
//! An entry leaves the ledger when its response arrives, when the feed
//! stops, or, for a call whose caller stopped waiting, before the next
//! replay.

use serde_json::Value;
use std::collections::BTreeMap;
use tokio::sync::oneshot;
use tracing::debug;

use crate::error::{WsError, WsResult};
use crate::message::RpcRequest;
use crate::subscription::{SubscriptionKey, SubscriptionRegistry};

/// Responder for a caller awaiting an RPC result.
pub type Responder = oneshot::Sender<WsResult<Value>>;

/// What a pending request is for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PendingKind {
    /// Caller-issued call; the response goes back to the caller.
    Call,
    /// `eth_subscribe` for a registered subscription.
    Subscribe(SubscriptionKey),
}

#[derive(Debug)]
pub struct PendingRequest {
    pub request: RpcRequest,
    pub kind: PendingKind,
    /// Number of times this request has been written to a transport.
    pub sends: u32,
    responder: Option<Responder>,
}

impl PendingRequest {
    /// Deliver the result to the waiting caller, if any.
    pub fn respond(mut self, result: WsResult<Value>) {
        if let Some(responder) = self.responder.take() {
            if responder.send(result).is_err() {
                debug!(id = self.request.id, "Caller dropped before response");
            }
        }
    }
}

#[derive(Debug, Default)]
pub struct RequestLedger {
    pending: BTreeMap<u64, PendingRequest>,
    next_id: u64,
}

impl RequestLedger {
    pub fn new() -> Self {
        Self::default()
    }

    fn allocate_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    /// Record a caller-issued call and return its request id.
    pub fn insert_call(&mut self, method: String, params: Value, responder: Responder) -> u64 {
        let id = self.allocate_id();
        self.pending.insert(
            id,
            PendingRequest {
                request: RpcRequest::new(id, method, params),
                kind: PendingKind::Call,
                sends: 0,
                responder: Some(responder),
            },
        );
        id
    }

    /// Record an `eth_subscribe` for `key` unless one is already pending.
    ///
    /// Returns the id of the pending subscribe request.
    pub fn ensure_subscribe(&mut self, key: SubscriptionKey, params: Value) -> u64 {
        if let Some(id) = self.subscribe_in_flight(key) {
            return id;
        }
        let id = self.allocate_id();
        self.pending.insert(
            id,
            PendingRequest {
                request: RpcRequest::subscribe(id, params),
                kind: PendingKind::Subscribe(key),
                sends: 0,
                responder: None,
            },
        );
        id
    }

    pub fn subscribe_in_flight(&self, key: SubscriptionKey) -> Option<u64> {
        self.pending
            .iter()
            .find(|(_, p)| p.kind == PendingKind::Subscribe(key))
            .map(|(id, _)| *id)
    }

    /// Serialize `id` for sending and count the send.
    pub fn mark_sent(&mut self, id: u64) -> WsResult<Option<String>> {
        match self.pending.get_mut(&id) {
            Some(entry) => {
                let text = serde_json::to_string(&entry.request)?;
                entry.sends += 1;
                Ok(Some(text))
            }
            None => Ok(None),
        }
    }

    /// Remove calls whose caller is gone (timed out or dropped the future).
    ///
    /// Subscribes have no caller and always stay.
    pub fn drop_abandoned(&mut self) -> usize {
        let before = self.pending.len();
        self.pending.retain(|id, entry| {
            let abandoned = entry.kind == PendingKind::Call
                && entry.responder.as_ref().map_or(true, |r| r.is_closed());
            if abandoned {
                debug!(id, method = %entry.request.method, "Dropping call abandoned by its caller");
            }
            !abandoned
        });
        before - self.pending.len()
    }

    /// Ids to write into a fresh connection, in replay order: one subscribe
    /// per registered subscription (creating it if needed), then pending
    /// calls by id.
    pub fn replay_order(&mut self, registry: &SubscriptionRegistry) -> Vec<u64> {
        let mut order = Vec::with_capacity(self.pending.len() + registry.len());
        for key in registry.keys() {
            if let Some(params) = registry.params(key) {
                order.push(self.ensure_subscribe(key, params.clone()));
            }
        }
        order.extend(
            self.pending
                .iter()
                .filter(|(_, p)| p.kind == PendingKind::Call)
                .map(|(id, _)| *id),
        );
        order
    }

    /// Remove the entry answered by a response.
    pub fn complete(&mut self, id: u64) -> Option<PendingRequest> {
        self.pending.remove(&id)
    }

    /// Fail every pending call (feed stopping).
    pub fn fail_all(&mut self, reason: impl Fn() -> WsError) {
        for (_, entry) in std::mem::take(&mut self.pending) {
            entry.respond(Err(reason()));
        }
    }

    pub fn get(&self, id: u64) -> Option<&PendingRequest> {
        self.pending.get(&id)
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn calls_pending(&self) -> usize {
        self.pending
            .values()
            .filter(|p| p.kind == PendingKind::Call)
            .count()
    }
}
