//! Mock upstream socket server for integration tests.
//!
//! Provides a WebSocket server that can:
//! - Accept connections and record the `Authorization` header
//! - Answer every subscribe with two data events for that subscription
//! - Answer application pings with pongs
//! - Optionally drop the first connection after its first subscribe

use futures_util::{SinkExt, StreamExt};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, Mutex};
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::{accept_hdr_async, tungstenite::Message};

#[derive(Default)]
struct Recorded {
    messages: Vec<String>,
    connections: u32,
    auth_headers: Vec<Option<String>>,
}

/// A mock upstream socket server.
pub struct MockWsServer {
    addr: SocketAddr,
    shutdown_tx: mpsc::Sender<()>,
    recorded: Arc<Mutex<Recorded>>,
}

impl MockWsServer {
    /// Start on an available port.
    pub async fn start() -> Self {
        Self::start_with(false).await
    }

    /// Start a server that closes the first connection after its first subscribe.
    pub async fn start_dropping_first() -> Self {
        Self::start_with(true).await
    }

    async fn start_with(drop_first: bool) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let recorded = Arc::new(Mutex::new(Recorded::default()));
        let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);

        let recorded_clone = recorded.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    Ok((stream, _)) = listener.accept() => {
                        let recorded = recorded_clone.clone();
                        tokio::spawn(handle_connection(stream, recorded, drop_first));
                    }
                    _ = shutdown_rx.recv() => break,
                }
            }
        });

        Self {
            addr,
            shutdown_tx,
            recorded,
        }
    }

    pub fn url(&self) -> String {
        format!("ws://{}", self.addr)
    }

    pub async fn connection_count(&self) -> u32 {
        self.recorded.lock().await.connections
    }

    pub async fn received_messages(&self) -> Vec<serde_json::Value> {
        self.recorded
            .lock()
            .await
            .messages
            .iter()
            .filter_map(|m| serde_json::from_str(m).ok())
            .collect()
    }

    pub async fn auth_headers(&self) -> Vec<Option<String>> {
        self.recorded.lock().await.auth_headers.clone()
    }

    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(()).await;
    }
}

async fn handle_connection(stream: TcpStream, recorded: Arc<Mutex<Recorded>>, drop_first: bool) {
    let auth = Arc::new(std::sync::Mutex::new(None));
    let auth_clone = auth.clone();
    let callback = move |req: &Request, resp: Response| -> Result<Response, ErrorResponse> {
        let header = req
            .headers()
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        *auth_clone.lock().unwrap() = header;
        Ok(resp)
    };

    let ws_stream = match accept_hdr_async(stream, callback).await {
        Ok(ws) => ws,
        Err(e) => {
            eprintln!("WebSocket handshake failed: {}", e);
            return;
        }
    };

    let connection_no = {
        let mut rec = recorded.lock().await;
        rec.connections += 1;
        rec.auth_headers.push(auth.lock().unwrap().clone());
        rec.connections
    };

    let (mut write, mut read) = ws_stream.split();

    while let Some(msg) = read.next().await {
        match msg {
            Ok(Message::Text(text)) => {
                recorded.lock().await.messages.push(text.clone());

                let Ok(parsed) = serde_json::from_str::<serde_json::Value>(&text) else {
                    continue;
                };
                match parsed.get("type").and_then(|t| t.as_str()) {
                    Some("subscribe") => {
                        let id = parsed["subscriptionId"].clone();
                        for close in [1.0, 2.0] {
                            let event = serde_json::json!({
                                "subscriptionId": id,
                                "data": {"t": 1_700_000_000, "o": 1.0, "h": 2.0, "l": 0.5, "c": close, "v": 1.0}
                            });
                            let _ = write.send(Message::Text(event.to_string())).await;
                        }
                        if drop_first && connection_no == 1 {
                            let _ = write.send(Message::Close(None)).await;
                            break;
                        }
                    }
                    Some("ping") => {
                        let _ = write
                            .send(Message::Text(r#"{"type":"pong"}"#.to_string()))
                            .await;
                    }
                    _ => {}
                }
            }
            Ok(Message::Ping(data)) => {
                let _ = write.send(Message::Pong(data)).await;
            }
            Ok(Message::Close(_)) => break,
            Err(_) => break,
            _ => {}
        }
    }
}
