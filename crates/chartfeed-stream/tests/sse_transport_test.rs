//! SSE transport against an in-process HTTP server.

use axum::body::{Body, Bytes};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use chartfeed_stream::{SseConfig, SseTransport, StreamState, StreamTransport, StreamType};
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;

fn delayed_chunks(chunks: Vec<&'static str>) -> Body {
    let stream = futures_util::stream::unfold(chunks.into_iter(), |mut chunks| async move {
        let chunk = chunks.next()?;
        tokio::time::sleep(Duration::from_millis(5)).await;
        Some((Ok::<_, std::io::Error>(Bytes::from(chunk)), chunks))
    });
    Body::from_stream(stream)
}

fn endless_frames() -> Body {
    let stream = futures_util::stream::unfold(0u64, |n| async move {
        tokio::time::sleep(Duration::from_millis(5)).await;
        let frame = format!("data: {{\"t\":{},\"c\":1.0}}\n\n", 1_700_000_000 + n);
        Some((Ok::<_, std::io::Error>(Bytes::from(frame)), n + 1))
    });
    Body::from_stream(stream)
}

async fn stream_handler(Json(body): Json<Value>) -> Response {
    let scenario = body["payload"]["scenario"].as_str().unwrap_or_default().to_string();
    let sse = |b: Body| {
        Response::builder()
            .header(header::CONTENT_TYPE, "text/event-stream")
            .body(b)
            .unwrap()
    };
    match scenario.as_str() {
        "split" => sse(delayed_chunks(vec![
            "data: {\"event\":\"connected\",\"subscriptionId\":\"s-1\"}\n\n",
            "data: {\"t\":100,\"o\"",
            ":5.4,\"c\":5.5}\n\n",
            "data: {broken\n\n",
            "data: {\"t\":160,\"c\":6.0}\n\n",
        ])),
        "echo" => sse(Body::from(format!("data: {body}\n\n"))),
        "endless" => sse(endless_frames()),
        _ => (StatusCode::INTERNAL_SERVER_ERROR, "upstream not configured").into_response(),
    }
}

async fn start_server() -> String {
    let app = Router::new().route("/api/stream", post(stream_handler));
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}/api/stream")
}

fn collector() -> (Arc<Mutex<Vec<Value>>>, chartfeed_stream::DataCallback) {
    let received: Arc<Mutex<Vec<Value>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = received.clone();
    (received, Arc::new(move |v| sink.lock().push(v)))
}

async fn wait_for_state(handle: &chartfeed_stream::StreamHandle, state: StreamState) {
    for _ in 0..300 {
        if handle.state() == state {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("stream never reached {state:?}, last {:?}", handle.state());
}

#[tokio::test]
async fn test_reassembles_frames_and_skips_bad_ones() {
    let endpoint = start_server().await;
    let transport = SseTransport::new(SseConfig::new(endpoint)).unwrap();
    let (received, on_data) = collector();

    let handle = transport
        .subscribe(StreamType::Ohlcv, json!({"scenario": "split"}), on_data)
        .unwrap();
    wait_for_state(&handle, StreamState::Closed).await;

    // Handshake filtered, split payload reassembled, malformed frame skipped
    assert_eq!(
        *received.lock(),
        vec![
            json!({"t": 100, "o": 5.4, "c": 5.5}),
            json!({"t": 160, "c": 6.0})
        ]
    );
    // Unsubscribing after the stream ended is safe
    handle.unsubscribe();
    assert_eq!(handle.state(), StreamState::Closed);
}

#[tokio::test]
async fn test_request_body_carries_stream_type_and_payload() {
    let endpoint = start_server().await;
    let transport = SseTransport::new(SseConfig::new(endpoint)).unwrap();
    let (received, on_data) = collector();

    let handle = transport
        .subscribe(StreamType::Trades, json!({"scenario": "echo"}), on_data)
        .unwrap();
    wait_for_state(&handle, StreamState::Closed).await;

    assert_eq!(
        *received.lock(),
        vec![json!({"streamType": "trades", "payload": {"scenario": "echo"}})]
    );
}

#[tokio::test]
async fn test_error_status_is_terminal() {
    let endpoint = start_server().await;
    let transport = SseTransport::new(SseConfig::new(endpoint)).unwrap();
    let (received, on_data) = collector();

    let handle = transport
        .subscribe(StreamType::Ohlcv, json!({"scenario": "missing"}), on_data)
        .unwrap();
    wait_for_state(&handle, StreamState::Errored).await;
    assert!(received.lock().is_empty());
    assert!(!handle.is_active());
}

#[tokio::test]
async fn test_unsubscribe_stops_delivery() {
    let endpoint = start_server().await;
    let transport = SseTransport::new(SseConfig::new(endpoint)).unwrap();
    let (received, on_data) = collector();

    let handle = transport
        .subscribe(StreamType::Ohlcv, json!({"scenario": "endless"}), on_data)
        .unwrap();
    wait_for_state(&handle, StreamState::Streaming).await;
    for _ in 0..300 {
        if received.lock().len() >= 3 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    handle.unsubscribe();
    let count = received.lock().len();
    assert!(count >= 3);
    assert_eq!(handle.state(), StreamState::Aborted);

    tokio::time::sleep(Duration::from_millis(60)).await;
    assert_eq!(received.lock().len(), count);
}

#[tokio::test]
async fn test_unreachable_endpoint_errors() {
    let transport = SseTransport::new(SseConfig::new("http://127.0.0.1:9/api/stream")).unwrap();
    let (_received, on_data) = collector();
    let handle = transport
        .subscribe(StreamType::Ohlcv, json!({}), on_data)
        .unwrap();
    wait_for_state(&handle, StreamState::Errored).await;
}
