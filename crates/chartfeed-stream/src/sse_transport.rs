//! Server-mode transport: stream request over HTTP, SSE frames in the body.

use crate::error::{StreamError, StreamResult};
use crate::gate::DeliveryGate;
use crate::message::{StreamRequest, StreamType};
use crate::sse::{parse_payload, SseDecoder, SsePayload};
use crate::transport::{transition, DataCallback, StreamHandle, StreamState, StreamTransport};
use chartfeed_telemetry::Metrics;
use futures_util::StreamExt;
use parking_lot::RwLock;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
pub struct SseConfig {
    /// Full URL of the stream endpoint, e.g. `http://localhost:8080/api/stream`.
    pub endpoint: String,
    pub connect_timeout: Duration,
}

impl SseConfig {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            connect_timeout: Duration::from_secs(10),
        }
    }
}

/// Reads live data from the server-mode stream endpoint.
///
/// Each subscription is one long-lived POST whose body is decoded
/// incrementally. There is no automatic retry after a failure.
pub struct SseTransport {
    client: reqwest::Client,
    endpoint: String,
}

impl SseTransport {
    pub fn new(config: SseConfig) -> StreamResult<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout)
            .build()?;
        Ok(Self {
            client,
            endpoint: config.endpoint,
        })
    }
}

impl StreamTransport for SseTransport {
    fn subscribe(
        &self,
        stream_type: StreamType,
        payload: Value,
        on_data: DataCallback,
    ) -> StreamResult<StreamHandle> {
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| StreamError::Runtime(e.to_string()))?;

        let gate = Arc::new(DeliveryGate::new());
        let state = Arc::new(RwLock::new(StreamState::Connecting));
        let token = CancellationToken::new();

        let request = self
            .client
            .post(&self.endpoint)
            .header(reqwest::header::ACCEPT, "text/event-stream")
            .json(&StreamRequest {
                stream_type,
                payload,
            });

        let reader = StreamReader {
            gate: gate.clone(),
            generation: gate.generation(),
            state: state.clone(),
            on_data,
        };
        runtime.spawn(reader.run(request, token.clone(), stream_type));

        Ok(StreamHandle::new(gate, state, Box::new(move || token.cancel())))
    }

    fn name(&self) -> &'static str {
        "sse"
    }
}

struct StreamReader {
    gate: Arc<DeliveryGate>,
    generation: u64,
    state: Arc<RwLock<StreamState>>,
    on_data: DataCallback,
}

impl StreamReader {
    async fn run(
        self,
        request: reqwest::RequestBuilder,
        token: CancellationToken,
        stream_type: StreamType,
    ) {
        let outcome = tokio::select! {
            biased;
            () = token.cancelled() => {
                debug!(%stream_type, "SSE stream aborted");
                return;
            }
            result = self.read(request) => result,
        };

        match outcome {
            Ok(()) => {
                if transition(&self.state, StreamState::Closed) {
                    info!(%stream_type, "SSE stream closed by server");
                }
            }
            Err(e) => {
                if transition(&self.state, StreamState::Errored) {
                    warn!(%stream_type, error = %e, "SSE stream failed");
                }
            }
        }
    }

    async fn read(&self, request: reqwest::RequestBuilder) -> StreamResult<()> {
        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(StreamError::Status {
                status: status.as_u16(),
                body,
            });
        }

        transition(&self.state, StreamState::Streaming);

        let mut decoder = SseDecoder::new();
        let mut body = response.bytes_stream();
        while let Some(chunk) = body.next().await {
            let chunk = chunk?;
            for data in decoder.push(&chunk) {
                if !self.dispatch(&data) {
                    return Ok(());
                }
            }
        }
        if let Some(data) = decoder.finish() {
            self.dispatch(&data);
        }
        Ok(())
    }

    /// Handle one frame payload. Returns `false` once the gate is closed.
    fn dispatch(&self, data: &str) -> bool {
        match parse_payload(data) {
            SsePayload::Handshake { subscription_id } => {
                debug!(?subscription_id, "SSE handshake received");
                Metrics::stream_frame("handshake");
                self.gate.is_open()
            }
            SsePayload::Malformed(error) => {
                warn!(%error, frame = %data, "Skipping malformed SSE frame");
                Metrics::stream_frame("malformed");
                self.gate.is_open()
            }
            SsePayload::Data(value) => {
                let on_data = &self.on_data;
                let delivered = self.gate.deliver(self.generation, || on_data(value));
                if delivered {
                    Metrics::stream_frame("forwarded");
                }
                delivered
            }
        }
    }
}
