//! Mock JSON-RPC WebSocket server for integration tests.
//!
//! Provides a scripted Ethereum-style server that can:
//! - Acknowledge `eth_subscribe` with a per-connection subscription id
//! - Answer or drop calls depending on the scenario
//! - Close a connection abnormally or normally
//! - Record every received request with its connection number

use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, Mutex};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::{accept_async, tungstenite::Message};

/// Server behaviour.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scenario {
    /// First connection: ack subscriptions, then close with 1011 on the
    /// first non-subscribe call. Later connections answer everything and
    /// push one notification per acknowledged subscription.
    DropFirstCall,
    /// First connection: leave the first call unanswered and close with 1011
    /// on the second. Later connections answer everything.
    IgnoreFirstCall,
    /// Ack the first subscribe, then close with 1000.
    CloseNormally,
    /// Complete the handshake and never read again (no pongs).
    Silent,
}

/// A request as seen by the server.
#[derive(Debug, Clone)]
pub struct Received {
    pub connection: u32,
    pub id: u64,
    pub method: String,
    pub params: Value,
}

pub struct MockRpcServer {
    addr: SocketAddr,
    shutdown_tx: mpsc::Sender<()>,
    received: Arc<Mutex<Vec<Received>>>,
    connections: Arc<Mutex<u32>>,
}

impl MockRpcServer {
    pub async fn start(scenario: Scenario) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let received: Arc<Mutex<Vec<Received>>> = Arc::new(Mutex::new(Vec::new()));
        let connections: Arc<Mutex<u32>> = Arc::new(Mutex::new(0));
        let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);

        let received_clone = received.clone();
        let connections_clone = connections.clone();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    Ok((stream, _)) = listener.accept() => {
                        let connection = {
                            let mut count = connections_clone.lock().await;
                            *count += 1;
                            *count
                        };
                        tokio::spawn(handle_connection(
                            stream,
                            connection,
                            scenario,
                            received_clone.clone(),
                        ));
                    }
                    _ = shutdown_rx.recv() => {
                        break;
                    }
                }
            }
        });

        Self {
            addr,
            shutdown_tx,
            received,
            connections,
        }
    }

    pub fn url(&self) -> String {
        format!("ws://{}", self.addr)
    }

    pub async fn connection_count(&self) -> u32 {
        *self.connections.lock().await
    }

    pub async fn received(&self) -> Vec<Received> {
        self.received.lock().await.clone()
    }

    /// Received requests with `method`, across all connections.
    pub async fn received_method(&self, method: &str) -> Vec<Received> {
        self.received()
            .await
            .into_iter()
            .filter(|r| r.method == method)
            .collect()
    }

    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(()).await;
    }
}

async fn handle_connection(
    stream: TcpStream,
    connection: u32,
    scenario: Scenario,
    received: Arc<Mutex<Vec<Received>>>,
) {
    let ws_stream = match accept_async(stream).await {
        Ok(ws) => ws,
        Err(e) => {
            eprintln!("WebSocket handshake failed: {}", e);
            return;
        }
    };

    if scenario == Scenario::Silent {
        // hold the socket open without reading, so pings go unanswered
        tokio::time::sleep(Duration::from_secs(10)).await;
        drop(ws_stream);
        return;
    }

    let (mut write, mut read) = ws_stream.split();
    let mut subscriptions = 0u32;
    let mut calls = 0u32;

    while let Some(msg) = read.next().await {
        let text = match msg {
            Ok(Message::Text(text)) => text,
            Ok(Message::Close(_)) | Err(_) => break,
            _ => continue,
        };

        let Ok(request) = serde_json::from_str::<Value>(&text) else {
            continue;
        };
        let id = request["id"].as_u64().unwrap_or_default();
        let method = request["method"].as_str().unwrap_or_default().to_string();
        received.lock().await.push(Received {
            connection,
            id,
            method: method.clone(),
            params: request["params"].clone(),
        });

        if method == "eth_subscribe" {
            subscriptions += 1;
            let server_id = format!("0x{connection:02x}{subscriptions:02x}");
            let ack = json!({"jsonrpc": "2.0", "id": id, "result": server_id});
            let _ = write.send(Message::Text(ack.to_string())).await;

            match scenario {
                Scenario::CloseNormally => {
                    let frame = CloseFrame {
                        code: CloseCode::Normal,
                        reason: "bye".into(),
                    };
                    let _ = write.send(Message::Close(Some(frame))).await;
                    break;
                }
                Scenario::DropFirstCall if connection > 1 => {
                    let note = json!({
                        "jsonrpc": "2.0",
                        "method": "eth_subscription",
                        "params": {
                            "subscription": server_id,
                            "result": {"connection": connection}
                        }
                    });
                    let _ = write.send(Message::Text(note.to_string())).await;
                }
                _ => {}
            }
            continue;
        }

        calls += 1;
        if scenario == Scenario::IgnoreFirstCall && connection == 1 && calls == 1 {
            continue;
        }

        let drop_here = match scenario {
            Scenario::DropFirstCall => connection == 1,
            Scenario::IgnoreFirstCall => connection == 1 && calls == 2,
            _ => false,
        };
        if drop_here {
            let frame = CloseFrame {
                code: CloseCode::Error,
                reason: "internal error".into(),
            };
            let _ = write.send(Message::Close(Some(frame))).await;
            break;
        }

        let reply = json!({"jsonrpc": "2.0", "id": id, "result": "0x2a"});
        let _ = write.send(Message::Text(reply.to_string())).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_server_starts() {
        let server = MockRpcServer::start(Scenario::DropFirstCall).await;
        assert!(server.url().starts_with("ws://127.0.0.1:"));
        server.shutdown().await;
    }
}
