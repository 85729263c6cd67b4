//! Live data transports for chartfeed.
//!
//! Two interchangeable implementations of [`StreamTransport`]:
//! - [`SseTransport`]: POSTs a stream request and decodes the chunked
//!   `text/event-stream` response body frame by frame
//! - [`SocketTransport`]: delegates to a persistent duplex socket client such
//!   as [`WsStreamClient`] (reconnect with backoff, resubscription, heartbeat)
//!
//! Both guarantee that no data callback runs after
//! [`StreamHandle::unsubscribe`] returns.

pub mod connection;
pub mod error;
pub mod gate;
pub mod message;
pub mod socket_transport;
pub mod sse;
pub mod sse_transport;
pub mod transport;

pub use connection::{ConnectionState, WsClientConfig, WsStreamClient};
pub use error::{StreamError, StreamResult};
pub use gate::DeliveryGate;
pub use message::{is_handshake, SocketMessage, SocketRequest, StreamRequest, StreamType};
pub use socket_transport::{SocketClient, SocketTransport};
pub use sse::{encode_frame, parse_payload, SseDecoder, SsePayload};
pub use sse_transport::{SseConfig, SseTransport};
pub use transport::{DataCallback, StreamHandle, StreamState, StreamTransport};

use std::sync::Once;

static INIT_CRYPTO: Once = Once::new();

/// Install the TLS crypto provider.
/// Must be called before any socket or HTTPS connection is opened.
pub fn init_crypto() {
    INIT_CRYPTO.call_once(|| {
        let _ = rustls::crypto::ring::default_provider().install_default();
    });
}
