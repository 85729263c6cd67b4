//! Direct-socket transport.

use crate::error::StreamResult;
use crate::gate::DeliveryGate;
use crate::message::StreamType;
use crate::transport::{DataCallback, StreamHandle, StreamState, StreamTransport};
use parking_lot::RwLock;
use serde_json::Value;
use std::sync::Arc;
use tracing::debug;

/// Persistent streaming client that multiplexes subscriptions over one socket.
pub trait SocketClient: Send + Sync {
    /// Register a subscription and return its opaque identifier.
    fn subscribe(
        &self,
        stream_type: StreamType,
        payload: Value,
        on_data: DataCallback,
    ) -> StreamResult<String>;

    /// Remove a subscription. Unknown identifiers are ignored.
    fn unsubscribe(&self, subscription_id: &str);
}

/// Forwards subscriptions to a [`SocketClient`].
#[derive(Clone)]
pub struct SocketTransport {
    client: Arc<dyn SocketClient>,
}

impl SocketTransport {
    pub fn new(client: Arc<dyn SocketClient>) -> Self {
        Self { client }
    }
}

impl StreamTransport for SocketTransport {
    fn subscribe(
        &self,
        stream_type: StreamType,
        payload: Value,
        on_data: DataCallback,
    ) -> StreamResult<StreamHandle> {
        let gate = Arc::new(DeliveryGate::new());
        let generation = gate.generation();

        let gated: DataCallback = {
            let gate = gate.clone();
            Arc::new(move |value| {
                gate.deliver(generation, || on_data(value));
            })
        };

        let subscription_id = self.client.subscribe(stream_type, payload, gated)?;
        debug!(%stream_type, %subscription_id, "Socket subscription opened");

        let client = self.client.clone();
        Ok(StreamHandle::new(
            gate,
            Arc::new(RwLock::new(StreamState::Streaming)),
            Box::new(move || {
                debug!(%subscription_id, "Socket subscription closed");
                client.unsubscribe(&subscription_id);
            }),
        ))
    }

    fn name(&self) -> &'static str {
        "socket"
    }
}
