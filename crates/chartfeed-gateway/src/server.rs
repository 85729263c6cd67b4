//! HTTP server implementation using axum.

use std::convert::Infallible;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use axum::body::{Body, Bytes};
use axum::extract::State;
use axum::http::{header, HeaderValue, Method, StatusCode};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use axum::Router;
use chartfeed_stream::{encode_frame, DataCallback, SocketClient, StreamRequest};
use chartfeed_telemetry::{encode_metrics, Metrics};
use futures_util::stream::{self, StreamExt};
use serde_json::{json, Value};
use tokio::sync::mpsc::{self, error::TrySendError};
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tracing::{debug, error, info, warn};

use crate::config::GatewayConfig;
use crate::error::{GatewayError, GatewayResult};

/// Caps the number of concurrently open event streams.
pub struct ConnectionLimiter {
    current: AtomicUsize,
    max: usize,
}

impl ConnectionLimiter {
    pub fn new(max: usize) -> Self {
        Self {
            current: AtomicUsize::new(0),
            max,
        }
    }

    /// Take a slot. The slot is released when the guard drops, which for a
    /// stream response is when the client goes away.
    pub fn try_acquire(self: &Arc<Self>) -> Option<ConnectionGuard> {
        loop {
            let current = self.current.load(Ordering::Acquire);
            if current >= self.max {
                return None;
            }
            if self
                .current
                .compare_exchange(current, current + 1, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                Metrics::gateway_connection_opened();
                return Some(ConnectionGuard {
                    limiter: self.clone(),
                });
            }
        }
    }

    pub fn current_count(&self) -> usize {
        self.current.load(Ordering::Relaxed)
    }
}

pub struct ConnectionGuard {
    limiter: Arc<ConnectionLimiter>,
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.limiter.current.fetch_sub(1, Ordering::Release);
        Metrics::gateway_connection_closed();
    }
}

/// Shared application state for axum handlers.
#[derive(Clone)]
pub struct AppState {
    /// `None` when no upstream credential is configured.
    upstream: Option<Arc<dyn SocketClient>>,
    connection_limiter: Arc<ConnectionLimiter>,
    config: GatewayConfig,
}

impl AppState {
    pub fn new(upstream: Option<Arc<dyn SocketClient>>, config: GatewayConfig) -> Self {
        Self {
            upstream,
            connection_limiter: Arc::new(ConnectionLimiter::new(config.max_connections)),
            config,
        }
    }

    pub fn open_connections(&self) -> usize {
        self.connection_limiter.current_count()
    }
}

/// Create the axum router.
pub fn create_router(state: AppState) -> GatewayResult<Router> {
    let cors = cors_layer(&state.config)?;
    Ok(Router::new()
        .route(&state.config.stream_path, post(stream_handler))
        .route("/metrics", get(metrics_handler))
        .route("/health", get(health_handler))
        .layer(cors)
        .with_state(state))
}

fn cors_layer(config: &GatewayConfig) -> GatewayResult<CorsLayer> {
    let layer = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(Any);
    if config.allowed_origins.is_empty() {
        return Ok(layer.allow_origin(Any));
    }
    let origins = config
        .allowed_origins
        .iter()
        .map(|o| HeaderValue::from_str(o).map_err(|_| GatewayError::InvalidOrigin(o.clone())))
        .collect::<GatewayResult<Vec<_>>>()?;
    Ok(layer.allow_origin(AllowOrigin::list(origins)))
}

/// Open one upstream subscription and relay it as an event stream.
async fn stream_handler(State(state): State<AppState>, body: Bytes) -> Response {
    let request = match parse_stream_request(&body) {
        Ok(request) => request,
        Err(message) => {
            debug!(%message, "Rejected stream request");
            return error_response(StatusCode::BAD_REQUEST, &message);
        }
    };

    let Some(upstream) = state.upstream.clone() else {
        error!("Stream requested but no upstream credential is configured");
        return error_response(
            StatusCode::INTERNAL_SERVER_ERROR,
            "upstream credential not configured",
        );
    };

    let Some(guard) = state.connection_limiter.try_acquire() else {
        warn!(
            current = state.connection_limiter.current_count(),
            max = state.config.max_connections,
            "Stream connection limit reached"
        );
        return error_response(StatusCode::SERVICE_UNAVAILABLE, "too many connections");
    };

    let (tx, rx) = mpsc::channel::<Value>(state.config.relay_buffer.max(1));
    let on_data: DataCallback = Arc::new(move |value| {
        if let Err(TrySendError::Full(_)) = tx.try_send(value) {
            Metrics::stream_frame("dropped");
            debug!("Slow stream client, frame dropped");
        }
    });

    let stream_type = request.stream_type;
    let subscription_id = match upstream.subscribe(stream_type, request.payload, on_data) {
        Ok(id) => id,
        Err(e) => {
            warn!(%stream_type, error = %e, "Upstream subscribe failed");
            return error_response(StatusCode::BAD_GATEWAY, &e.to_string());
        }
    };

    info!(
        %stream_type,
        %subscription_id,
        connections = state.connection_limiter.current_count(),
        "Stream opened"
    );

    let handshake = encode_frame(&json!({
        "event": "connected",
        "subscriptionId": subscription_id,
    }));
    let relay = Relay {
        rx,
        _subscription: UpstreamSubscription {
            upstream,
            subscription_id,
            _guard: guard,
        },
    };

    let frames = stream::once(async move { Ok::<_, Infallible>(Bytes::from(handshake)) }).chain(
        stream::unfold(relay, |mut relay| async move {
            let value = relay.rx.recv().await?;
            Some((Ok(Bytes::from(encode_frame(&value))), relay))
        }),
    );

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "text/event-stream")
        .header(header::CACHE_CONTROL, "no-cache, no-transform")
        .header(header::CONNECTION, "keep-alive")
        .header("x-accel-buffering", "no")
        .body(Body::from_stream(frames))
        .unwrap_or_else(|e| {
            error!(error = %e, "Failed to build stream response");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        })
}

/// Both fields must be present and the payload must be an object.
fn parse_stream_request(body: &[u8]) -> Result<StreamRequest, String> {
    let request: StreamRequest =
        serde_json::from_slice(body).map_err(|e| format!("invalid stream request: {e}"))?;
    if !request.payload.is_object() {
        return Err("payload must be an object".to_string());
    }
    Ok(request)
}

struct Relay {
    rx: mpsc::Receiver<Value>,
    _subscription: UpstreamSubscription,
}

/// Unsubscribes upstream when the response body is dropped.
struct UpstreamSubscription {
    upstream: Arc<dyn SocketClient>,
    subscription_id: String,
    _guard: ConnectionGuard,
}

impl Drop for UpstreamSubscription {
    fn drop(&mut self) {
        self.upstream.unsubscribe(&self.subscription_id);
        info!(subscription_id = %self.subscription_id, "Stream closed");
    }
}

fn error_response(status: StatusCode, message: &str) -> Response {
    (status, Json(json!({ "error": message }))).into_response()
}

/// Prometheus text exposition.
async fn metrics_handler() -> Response {
    match encode_metrics() {
        Ok(text) => (
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            text,
        )
            .into_response(),
        Err(e) => error_response(StatusCode::INTERNAL_SERVER_ERROR, &e.to_string()),
    }
}

async fn health_handler(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "upstream": state.upstream.is_some(),
        "connections": state.connection_limiter.current_count(),
    }))
}

/// Run the gateway until `shutdown` resolves.
pub async fn run_server<F>(state: AppState, shutdown: F) -> GatewayResult<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let port = state.config.port;
    let app = create_router(state)?;

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|source| GatewayError::Bind { addr, source })?;
    info!(%addr, "Starting stream gateway");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await?;

    info!("Stream gateway stopped");
    Ok(())
}
