//! JSON-RPC 2.0 message types for the Ethereum WebSocket API.
//!
//! Outbound traffic is requests (`eth_subscribe`, `eth_call`, ...); inbound
//! traffic is either a response correlated by `id` or an `eth_subscription`
//! notification keyed by the server's subscription id.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Method name of subscription notifications.
pub const SUBSCRIPTION_NOTIFICATION: &str = "eth_subscription";

/// Outbound JSON-RPC request.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RpcRequest {
    pub jsonrpc: &'static str,
    pub id: u64,
    pub method: String,
    pub params: Value,
}

impl RpcRequest {
    pub fn new(id: u64, method: impl Into<String>, params: Value) -> Self {
        Self {
            jsonrpc: "2.0",
            id,
            method: method.into(),
            params,
        }
    }

    /// `eth_subscribe` request with the given subscription params.
    pub fn subscribe(id: u64, params: Value) -> Self {
        Self::new(id, "eth_subscribe", params)
    }
}

/// Error object of a failed JSON-RPC call.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RpcErrorObject {
    pub code: i64,
    pub message: String,
    #[serde(default)]
    pub data: Option<Value>,
}

/// Response to a request we sent.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RpcResponse {
    pub id: u64,
    #[serde(default)]
    pub result: Option<Value>,
    #[serde(default)]
    pub error: Option<RpcErrorObject>,
}

/// Params of an `eth_subscription` notification.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct NotificationParams {
    pub subscription: String,
    pub result: Value,
}

/// Server-initiated notification.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RpcNotification {
    pub method: String,
    pub params: NotificationParams,
}

impl RpcNotification {
    pub fn is_subscription(&self) -> bool {
        self.method == SUBSCRIPTION_NOTIFICATION
    }
}

/// Any inbound message.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum RpcMessage {
    Response(RpcResponse),
    Notification(RpcNotification),
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_request_serialization() {
        let req = RpcRequest::subscribe(7, json!(["logs", {"address": "0xabc"}]));
        let text = serde_json::to_string(&req).unwrap();
        assert_eq!(
            text,
            r#"{"jsonrpc":"2.0","id":7,"method":"eth_subscribe","params":["logs",{"address":"0xabc"}]}"#
        );
    }

    #[test]
    fn test_parse_success_response() {
        let raw = r#"{"jsonrpc":"2.0","id":3,"result":"0x9cef478923ff08bf67fde6c64013158d"}"#;
        let msg: RpcMessage = serde_json::from_str(raw).unwrap();
        match msg {
            RpcMessage::Response(resp) => {
                assert_eq!(resp.id, 3);
                assert_eq!(resp.result, Some(json!("0x9cef478923ff08bf67fde6c64013158d")));
                assert!(resp.error.is_none());
            }
            other => panic!("expected response, got {other:?}"),
        }
    }

    #[test]
    fn test_parse_error_response() {
        let raw = r#"{"jsonrpc":"2.0","id":4,"error":{"code":-32000,"message":"execution reverted"}}"#;
        let msg: RpcMessage = serde_json::from_str(raw).unwrap();
        let RpcMessage::Response(resp) = msg else {
            panic!("expected response");
        };
        let err = resp.error.unwrap();
        assert_eq!(err.code, -32000);
        assert_eq!(err.message, "execution reverted");
    }

    #[test]
    fn test_parse_notification() {
        let raw = r#"{
            "jsonrpc": "2.0",
            "method": "eth_subscription",
            "params": {
                "subscription": "0x1",
                "result": {"topics": ["0xc42079f9"], "data": "0x"}
            }
        }"#;
        let msg: RpcMessage = serde_json::from_str(raw).unwrap();
        let RpcMessage::Notification(note) = msg else {
            panic!("expected notification");
        };
        assert!(note.is_subscription());
        assert_eq!(note.params.subscription, "0x1");
        assert_eq!(note.params.result["data"], json!("0x"));
    }
}
