//! Persistent upstream socket client.
//!
//! Handles connection lifecycle, automatic reconnection with exponential backoff,
//! re-subscription of every active subscription after reconnection, and routing
//! of `{"subscriptionId", "data"}` events to their callbacks.

use crate::error::{StreamError, StreamResult};
use crate::message::{SocketMessage, SocketRequest, StreamType};
use crate::socket_transport::SocketClient;
use crate::transport::DataCallback;
use futures_util::{SinkExt, StreamExt};
use parking_lot::RwLock;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, Mutex as TokioMutex};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::{header::AUTHORIZATION, HeaderValue};
use tokio_tungstenite::{connect_async_tls_with_config, tungstenite::Message};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Socket client configuration.
#[derive(Debug, Clone)]
pub struct WsClientConfig {
    /// WebSocket URL.
    pub url: String,
    /// Sent as the `Authorization` header of the upgrade request.
    pub api_key: Option<String>,
    /// Maximum reconnection attempts (0 = infinite).
    pub max_reconnect_attempts: u32,
    /// Base delay for exponential backoff.
    pub reconnect_base_delay_ms: u64,
    /// Maximum delay for exponential backoff.
    pub reconnect_max_delay_ms: u64,
    /// Idle time after which an application ping is sent.
    pub heartbeat_interval_ms: u64,
}

impl Default for WsClientConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            api_key: None,
            max_reconnect_attempts: 0, // Infinite
            reconnect_base_delay_ms: 1000,
            reconnect_max_delay_ms: 60000,
            heartbeat_interval_ms: 30000,
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

struct ActiveSubscription {
    stream_type: StreamType,
    payload: Value,
    on_data: DataCallback,
}

impl ActiveSubscription {
    fn request(&self, subscription_id: &str) -> SocketRequest {
        SocketRequest::Subscribe {
            subscription_id: subscription_id.to_string(),
            stream_type: self.stream_type,
            payload: self.payload.clone(),
        }
    }
}

/// Upstream socket client shared by every socket-mode subscription.
///
/// `subscribe`/`unsubscribe` are synchronous: they update the subscription
/// table and queue the wire message; [`WsStreamClient::run`] owns the socket.
pub struct WsStreamClient {
    config: WsClientConfig,
    state: Arc<RwLock<ConnectionState>>,
    subscriptions: Arc<RwLock<HashMap<String, ActiveSubscription>>>,
    reconnect_count: Arc<RwLock<u32>>,
    outbound_tx: mpsc::UnboundedSender<String>,
    outbound_rx: Arc<TokioMutex<mpsc::UnboundedReceiver<String>>>,
    shutdown_token: CancellationToken,
}

impl WsStreamClient {
    pub fn new(config: WsClientConfig) -> Self {
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        Self {
            config,
            state: Arc::new(RwLock::new(ConnectionState::Disconnected)),
            subscriptions: Arc::new(RwLock::new(HashMap::new())),
            reconnect_count: Arc::new(RwLock::new(0)),
            outbound_tx,
            outbound_rx: Arc::new(TokioMutex::new(outbound_rx)),
            shutdown_token: CancellationToken::new(),
        }
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.read()
    }

    pub fn subscription_count(&self) -> usize {
        self.subscriptions.read().len()
    }

    pub fn reconnect_count(&self) -> u32 {
        *self.reconnect_count.read()
    }

    /// Signal graceful shutdown of [`WsStreamClient::run`].
    pub fn shutdown(&self) {
        info!("WsStreamClient shutdown requested");
        self.shutdown_token.cancel();
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown_token.is_cancelled()
    }

    /// Connect and run the message loop until shutdown or the reconnect
    /// budget is exhausted.
    pub async fn run(&self) -> StreamResult<()> {
        let mut attempt = 0u32;

        loop {
            if self.is_shutdown() {
                info!("Shutdown requested, exiting connect loop");
                *self.state.write() = ConnectionState::Disconnected;
                return Ok(());
            }

            *self.state.write() = ConnectionState::Connecting;

            match self.try_connect().await {
                Ok(()) => info!("Upstream socket closed"),
                Err(e) => error!(error = %e, "Upstream socket error"),
            }

            if self.is_shutdown() {
                info!("Shutdown requested after disconnect, not reconnecting");
                *self.state.write() = ConnectionState::Disconnected;
                return Ok(());
            }

            attempt += 1;
            *self.reconnect_count.write() = attempt;

            if self.config.max_reconnect_attempts > 0
                && attempt >= self.config.max_reconnect_attempts
            {
                error!(attempt, "Max reconnection attempts reached");
                *self.state.write() = ConnectionState::Disconnected;
                return Err(StreamError::ConnectionFailed(
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
                    *self.state.write() = ConnectionState::Disconnected;
                    return Ok(());
                }
            }
        }
    }

    async fn try_connect(&self) -> StreamResult<()> {
        info!(url = %self.config.url, "Connecting to upstream socket");

        let mut request = self.config.url.as_str().into_client_request()?;
        if let Some(key) = &self.config.api_key {
            let value = HeaderValue::from_str(key)
                .map_err(|e| StreamError::ConnectionFailed(format!("invalid api key: {e}")))?;
            request.headers_mut().insert(AUTHORIZATION, value);
        }

        let (ws_stream, _response) = connect_async_tls_with_config(request, None, true, None).await?;
        let (mut write, mut read) = ws_stream.split();

        // Anything queued while disconnected is covered by the restore below
        let mut outbound = self.outbound_rx.lock().await;
        while outbound.try_recv().is_ok() {}

        *self.state.write() = ConnectionState::Connected;
        *self.reconnect_count.write() = 0;
        info!("Upstream socket connected");

        for text in self.restore_requests()? {
            write.send(Message::Text(text)).await?;
        }

        let heartbeat = Duration::from_millis(self.config.heartbeat_interval_ms.max(1));
        let mut ticker = tokio::time::interval(heartbeat);
        ticker.tick().await;
        let mut last_message = Instant::now();
        let mut awaiting_pong = false;

        loop {
            tokio::select! {
                biased;

                () = self.shutdown_token.cancelled() => {
                    info!("Shutdown signal received in message loop");
                    if let Err(e) = write.send(Message::Close(None)).await {
                        warn!(error = %e, "Failed to send Close frame during shutdown");
                    }
                    *self.state.write() = ConnectionState::Disconnected;
                    return Ok(());
                }

                msg = read.next() => {
                    last_message = Instant::now();
                    awaiting_pong = false;
                    match msg {
                        Some(Ok(Message::Text(text))) => self.handle_text_message(&text),
                        Some(Ok(Message::Ping(data))) => {
                            debug!("Received ping, sending pong");
                            write.send(Message::Pong(data)).await?;
                        }
                        Some(Ok(Message::Close(frame))) => {
                            let (code, reason) = frame
                                .map(|f| (f.code.into(), f.reason.to_string()))
                                .unwrap_or((1000, "Normal close".to_string()));
                            warn!(code, %reason, "Upstream socket closed by server");
                            *self.state.write() = ConnectionState::Disconnected;
                            return Err(StreamError::ConnectionClosed { code, reason });
                        }
                        Some(Err(e)) => {
                            *self.state.write() = ConnectionState::Disconnected;
                            return Err(e.into());
                        }
                        None => {
                            warn!("Upstream socket stream ended");
                            *self.state.write() = ConnectionState::Disconnected;
                            return Ok(());
                        }
                        _ => {}
                    }
                }

                text = outbound.recv() => {
                    if let Some(text) = text {
                        write.send(Message::Text(text)).await?;
                    }
                }

                _ = ticker.tick() => {
                    if last_message.elapsed() < heartbeat {
                        continue;
                    }
                    if awaiting_pong {
                        error!("Heartbeat timeout");
                        *self.state.write() = ConnectionState::Disconnected;
                        return Err(StreamError::HeartbeatTimeout);
                    }
                    let ping = serde_json::to_string(&SocketRequest::Ping)?;
                    write.send(Message::Text(ping)).await?;
                    awaiting_pong = true;
                    debug!("Sent heartbeat ping");
                }
            }
        }
    }

    fn restore_requests(&self) -> StreamResult<Vec<String>> {
        let subs = self.subscriptions.read();
        if !subs.is_empty() {
            info!(count = subs.len(), "Restoring subscriptions");
        }
        subs.iter()
            .map(|(id, sub)| Ok(serde_json::to_string(&sub.request(id))?))
            .collect()
    }

    fn handle_text_message(&self, text: &str) {
        let msg: SocketMessage = match serde_json::from_str(text) {
            Ok(msg) => msg,
            Err(e) => {
                warn!(error = %e, "Unparseable upstream message");
                return;
            }
        };
        if msg.is_pong() {
            debug!("Received application-level pong");
            return;
        }

        match msg {
            SocketMessage::Data {
                subscription_id,
                data,
            } => {
                let callback = self
                    .subscriptions
                    .read()
                    .get(&subscription_id)
                    .map(|sub| sub.on_data.clone());
                match callback {
                    Some(on_data) => on_data(data),
                    None => debug!(%subscription_id, "Event for unknown subscription"),
                }
            }
            SocketMessage::Control { kind, message } => match kind.as_str() {
                "error" => warn!(?message, "Upstream error message"),
                other => debug!(kind = other, "Control message"),
            },
            SocketMessage::Other(value) => debug!(%value, "Ignoring upstream message"),
        }
    }

    fn queue(&self, request: &SocketRequest) -> StreamResult<()> {
        if self.state() != ConnectionState::Connected {
            return Ok(());
        }
        let text = serde_json::to_string(request)?;
        self.outbound_tx
            .send(text)
            .map_err(|e| StreamError::SendFailed(e.to_string()))
    }

    fn backoff_delay(&self, attempt: u32) -> Duration {
        let base = self.config.reconnect_base_delay_ms;
        let max = self.config.reconnect_max_delay_ms;

        // base * 2^(attempt-1), capped
        let exponent = attempt.saturating_sub(1).min(10);
        let delay = base.saturating_mul(1u64 << exponent).min(max);

        Duration::from_millis(delay + rand_jitter())
    }
}

impl SocketClient for WsStreamClient {
    fn subscribe(
        &self,
        stream_type: StreamType,
        payload: Value,
        on_data: DataCallback,
    ) -> StreamResult<String> {
        let subscription_id = Uuid::new_v4().to_string();
        let sub = ActiveSubscription {
            stream_type,
            payload,
            on_data,
        };
        let request = sub.request(&subscription_id);
        self.subscriptions
            .write()
            .insert(subscription_id.clone(), sub);

        // While disconnected the next restore sends it
        if let Err(e) = self.queue(&request) {
            self.subscriptions.write().remove(&subscription_id);
            return Err(e);
        }
        Ok(subscription_id)
    }

    fn unsubscribe(&self, subscription_id: &str) {
        if self.subscriptions.write().remove(subscription_id).is_none() {
            return;
        }
        let request = SocketRequest::Unsubscribe {
            subscription_id: subscription_id.to_string(),
        };
        if let Err(e) = self.queue(&request) {
            warn!(%subscription_id, error = %e, "Failed to queue unsubscribe");
        }
    }
}

/// Random jitter (0-1000ms).
fn rand_jitter() -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.subsec_nanos())
        .unwrap_or(0);
    (nanos % 1000) as u64
}
