//! Test doubles shared by unit tests.

use chartfeed_stream::{
    DataCallback, DeliveryGate, StreamError, StreamHandle, StreamResult, StreamState,
    StreamTransport, StreamType,
};
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Transport whose streams are pushed by hand.
#[derive(Default)]
pub(crate) struct ManualTransport {
    streams: Mutex<Vec<(Value, DataCallback, Arc<AtomicBool>)>>,
    pub(crate) fail: AtomicBool,
}

impl ManualTransport {
    pub(crate) fn push(&self, index: usize, value: Value) {
        let cb = self.streams.lock()[index].1.clone();
        cb(value);
    }

    pub(crate) fn count(&self) -> usize {
        self.streams.lock().len()
    }

    pub(crate) fn closed(&self, index: usize) -> bool {
        self.streams.lock()[index].2.load(Ordering::SeqCst)
    }

    pub(crate) fn payload(&self, index: usize) -> Value {
        self.streams.lock()[index].0.clone()
    }
}

impl StreamTransport for ManualTransport {
    fn subscribe(
        &self,
        _stream_type: StreamType,
        payload: Value,
        on_data: DataCallback,
    ) -> StreamResult<StreamHandle> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(StreamError::ConnectionFailed("refused".to_string()));
        }
        let closed = Arc::new(AtomicBool::new(false));
        self.streams.lock().push((payload, on_data, closed.clone()));
        Ok(StreamHandle::new(
            Arc::new(DeliveryGate::new()),
            Arc::new(RwLock::new(StreamState::Streaming)),
            Box::new(move || closed.store(true, Ordering::SeqCst)),
        ))
    }

    fn name(&self) -> &'static str {
        "manual"
    }
}
