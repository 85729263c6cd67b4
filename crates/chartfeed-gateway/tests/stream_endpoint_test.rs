//! Stream endpoint routes driven through `tower::ServiceExt::oneshot`.

use axum::body::{to_bytes, Body};
use axum::http::{header, Request, StatusCode};
use axum::Router;
use chartfeed_gateway::{create_router, AppState, GatewayConfig};
use chartfeed_stream::{DataCallback, SocketClient, StreamError, StreamResult, StreamType};
use futures_util::StreamExt;
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;

/// Upstream double that records subscriptions and lets tests push events.
#[derive(Default)]
struct FakeUpstream {
    subscriptions: Mutex<Vec<(String, StreamType, Value, DataCallback)>>,
    unsubscribed: Mutex<Vec<String>>,
    refuse: bool,
}

impl FakeUpstream {
    fn push(&self, index: usize, value: Value) {
        let cb = self.subscriptions.lock()[index].3.clone();
        cb(value);
    }
}

impl SocketClient for FakeUpstream {
    fn subscribe(
        &self,
        stream_type: StreamType,
        payload: Value,
        on_data: DataCallback,
    ) -> StreamResult<String> {
        if self.refuse {
            return Err(StreamError::ConnectionFailed("not connected".to_string()));
        }
        let mut subs = self.subscriptions.lock();
        let id = format!("sub-{}", subs.len() + 1);
        subs.push((id.clone(), stream_type, payload, on_data));
        Ok(id)
    }

    fn unsubscribe(&self, subscription_id: &str) {
        self.unsubscribed.lock().push(subscription_id.to_string());
    }
}

fn router(upstream: Option<Arc<FakeUpstream>>, max_connections: usize) -> (Router, AppState) {
    router_with(
        upstream,
        GatewayConfig {
            max_connections,
            ..Default::default()
        },
    )
}

fn router_with(upstream: Option<Arc<FakeUpstream>>, config: GatewayConfig) -> (Router, AppState) {
    let upstream = upstream.map(|u| u as Arc<dyn SocketClient>);
    let state = AppState::new(upstream, config);
    (create_router(state.clone()).unwrap(), state)
}

fn stream_request(body: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/api/stream")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

const OHLCV: &str = r#"{"streamType":"ohlcv","payload":{"asset":"0xabc","period":"1m"}}"#;

async fn next_frame<S>(stream: &mut S) -> String
where
    S: futures_util::Stream<Item = Result<axum::body::Bytes, axum::Error>> + Unpin,
{
    let chunk = tokio::time::timeout(Duration::from_secs(2), stream.next())
        .await
        .expect("frame within timeout")
        .expect("stream still open")
        .unwrap();
    String::from_utf8(chunk.to_vec()).unwrap()
}

#[tokio::test]
async fn test_stream_relays_upstream_events() {
    let upstream = Arc::new(FakeUpstream::default());
    let (app, _) = router(Some(upstream.clone()), 4);

    let response = app.oneshot(stream_request(OHLCV)).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let headers = response.headers();
    assert_eq!(headers[header::CONTENT_TYPE], "text/event-stream");
    assert_eq!(headers[header::CACHE_CONTROL], "no-cache, no-transform");
    assert_eq!(headers[header::CONNECTION], "keep-alive");
    assert_eq!(headers["x-accel-buffering"], "no");

    {
        let subs = upstream.subscriptions.lock();
        assert_eq!(subs.len(), 1);
        assert_eq!(subs[0].1, StreamType::Ohlcv);
        assert_eq!(subs[0].2, json!({"asset": "0xabc", "period": "1m"}));
    }

    let mut body = response.into_body().into_data_stream();
    assert_eq!(
        next_frame(&mut body).await,
        "data: {\"event\":\"connected\",\"subscriptionId\":\"sub-1\"}\n\n"
    );

    upstream.push(0, json!({"t": 1_700_000_000, "c": 1.5}));
    assert_eq!(
        next_frame(&mut body).await,
        "data: {\"t\":1700000000,\"c\":1.5}\n\n"
    );
}

#[tokio::test]
async fn test_slow_client_drops_frames_past_buffer() {
    let upstream = Arc::new(FakeUpstream::default());
    let (app, _) = router_with(
        Some(upstream.clone()),
        GatewayConfig {
            relay_buffer: 2,
            ..Default::default()
        },
    );

    let response = app.oneshot(stream_request(OHLCV)).await.unwrap();
    let mut body = response.into_body().into_data_stream();
    assert!(next_frame(&mut body).await.contains("connected"));

    for t in 1..=5 {
        upstream.push(0, json!({ "t": t }));
    }
    assert_eq!(next_frame(&mut body).await, "data: {\"t\":1}\n\n");
    assert_eq!(next_frame(&mut body).await, "data: {\"t\":2}\n\n");

    // Room again once the client caught up
    upstream.push(0, json!({ "t": 6 }));
    assert_eq!(next_frame(&mut body).await, "data: {\"t\":6}\n\n");
}

#[tokio::test]
async fn test_dropping_body_unsubscribes_and_frees_slot() {
    let upstream = Arc::new(FakeUpstream::default());
    let (app, state) = router(Some(upstream.clone()), 1);

    let response = app.clone().oneshot(stream_request(OHLCV)).await.unwrap();
    assert_eq!(state.open_connections(), 1);

    let busy = app.clone().oneshot(stream_request(OHLCV)).await.unwrap();
    assert_eq!(busy.status(), StatusCode::SERVICE_UNAVAILABLE);

    drop(response);
    assert_eq!(*upstream.unsubscribed.lock(), vec!["sub-1".to_string()]);
    assert_eq!(state.open_connections(), 0);

    let again = app.oneshot(stream_request(OHLCV)).await.unwrap();
    assert_eq!(again.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_missing_fields_are_bad_requests() {
    let upstream = Arc::new(FakeUpstream::default());
    let (app, _) = router(Some(upstream.clone()), 4);

    for body in [
        r#"{"payload":{"asset":"0xabc"}}"#,
        r#"{"streamType":"ohlcv"}"#,
        r#"{"streamType":"bogus","payload":{}}"#,
        "garbage",
    ] {
        let response = app.clone().oneshot(stream_request(body)).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST, "body {body}");
    }
    assert!(upstream.subscriptions.lock().is_empty());
}

#[tokio::test]
async fn test_missing_credential_is_server_error() {
    let (app, _) = router(None, 4);
    let response = app.oneshot(stream_request(OHLCV)).await.unwrap();
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let json: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["error"], "upstream credential not configured");
}

#[tokio::test]
async fn test_upstream_refusal_releases_slot() {
    let upstream = Arc::new(FakeUpstream {
        refuse: true,
        ..Default::default()
    });
    let (app, state) = router(Some(upstream), 1);

    let response = app.oneshot(stream_request(OHLCV)).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    assert_eq!(state.open_connections(), 0);
}

#[tokio::test]
async fn test_metrics_endpoint() {
    let upstream = Arc::new(FakeUpstream::default());
    let (app, _) = router(Some(upstream), 4);
    let stream = app.clone().oneshot(stream_request(OHLCV)).await.unwrap();
    assert_eq!(stream.status(), StatusCode::OK);

    let response = app
        .oneshot(Request::get("/metrics").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let text = String::from_utf8(body.to_vec()).unwrap();
    assert!(text.contains("chartfeed_gateway_connections"));
}
