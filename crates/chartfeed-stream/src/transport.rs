//! Transport abstraction shared by the SSE and socket implementations.

use crate::error::StreamResult;
use crate::gate::DeliveryGate;
use crate::message::StreamType;
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use std::sync::Arc;

/// Callback receiving each forwarded stream payload, in arrival order.
pub type DataCallback = Arc<dyn Fn(Value) + Send + Sync>;

/// Closes the underlying stream (aborts a request, unsubscribes a socket id).
pub type Closer = Box<dyn FnOnce() + Send>;

/// Lifecycle of one transport subscription.
///
/// `Connecting -> Streaming -> (Closed | Aborted | Errored)`. Terminal states
/// never transition again; `Errored` is not retried by the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    Connecting,
    Streaming,
    /// Producer ended the stream.
    Closed,
    /// Caller unsubscribed.
    Aborted,
    /// Connection-level failure.
    Errored,
}

impl StreamState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Closed | Self::Aborted | Self::Errored)
    }
}

/// Move `state` to `next` unless it is already terminal.
pub(crate) fn transition(state: &RwLock<StreamState>, next: StreamState) -> bool {
    let mut current = state.write();
    if current.is_terminal() {
        return false;
    }
    *current = next;
    true
}

/// Live stream source.
pub trait StreamTransport: Send + Sync {
    /// Open a stream; `on_data` receives every application payload.
    fn subscribe(
        &self,
        stream_type: StreamType,
        payload: Value,
        on_data: DataCallback,
    ) -> StreamResult<StreamHandle>;

    /// Short name for logs ("sse", "socket").
    fn name(&self) -> &'static str;
}

/// Handle to one open transport subscription.
///
/// Dropping the handle unsubscribes.
pub struct StreamHandle {
    gate: Arc<DeliveryGate>,
    state: Arc<RwLock<StreamState>>,
    closer: Mutex<Option<Closer>>,
}

impl StreamHandle {
    pub fn new(gate: Arc<DeliveryGate>, state: Arc<RwLock<StreamState>>, closer: Closer) -> Self {
        Self {
            gate,
            state,
            closer: Mutex::new(Some(closer)),
        }
    }

    /// Stop delivery and release the underlying stream.
    ///
    /// Idempotent. After this returns `on_data` is never invoked again, even
    /// for payloads the transport had already buffered.
    pub fn unsubscribe(&self) {
        self.gate.close();
        transition(&self.state, StreamState::Aborted);
        let closer = self.closer.lock().take();
        if let Some(close) = closer {
            close();
        }
    }

    pub fn state(&self) -> StreamState {
        *self.state.read()
    }

    /// Whether payloads may still be delivered.
    pub fn is_active(&self) -> bool {
        self.gate.is_open() && !self.state().is_terminal()
    }
}

impl Drop for StreamHandle {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

impl std::fmt::Debug for StreamHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamHandle")
            .field("state", &self.state())
            .field("open", &self.gate.is_open())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn handle(closes: Arc<AtomicUsize>) -> StreamHandle {
        StreamHandle::new(
            Arc::new(DeliveryGate::new()),
            Arc::new(RwLock::new(StreamState::Streaming)),
            Box::new(move || {
                closes.fetch_add(1, Ordering::SeqCst);
            }),
        )
    }

    #[test]
    fn test_unsubscribe_is_idempotent() {
        let closes = Arc::new(AtomicUsize::new(0));
        let h = handle(closes.clone());
        h.unsubscribe();
        h.unsubscribe();
        assert_eq!(closes.load(Ordering::SeqCst), 1);
        assert_eq!(h.state(), StreamState::Aborted);
        assert!(!h.is_active());
    }

    #[test]
    fn test_drop_unsubscribes() {
        let closes = Arc::new(AtomicUsize::new(0));
        drop(handle(closes.clone()));
        assert_eq!(closes.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_terminal_state_is_kept() {
        let state = RwLock::new(StreamState::Connecting);
        assert!(transition(&state, StreamState::Streaming));
        assert!(transition(&state, StreamState::Errored));
        assert!(!transition(&state, StreamState::Aborted));
        assert_eq!(*state.read(), StreamState::Errored);
    }
}
