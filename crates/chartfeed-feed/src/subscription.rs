//! Live bar subscriptions.
//!
//! One slot per listener. Each slot owns a transport handle and a delivery
//! gate stamped with a fresh generation; a tick is delivered only while the
//! slot's gate is open at that generation. The first tick after a
//! (re)subscription may be preceded by a bridge bar connecting it to the
//! cached last bar.

use crate::bar_cache::BarCache;
use chartfeed_core::{bridge_bar, transform, Bar, CacheKey, RawBar, SettingsSnapshot};
use chartfeed_stream::{DataCallback, DeliveryGate, StreamHandle, StreamTransport, StreamType};
use chartfeed_telemetry::Metrics;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Receives transformed live bars.
pub type TickCallback = Arc<dyn Fn(Bar) + Send + Sync>;

/// Tells the widget to drop its bars and request history again.
pub type ResetCallback = Arc<dyn Fn() + Send + Sync>;

/// What to stream for one listener.
#[derive(Debug, Clone)]
pub struct LiveRequest {
    pub cache_key: CacheKey,
    pub stream_type: StreamType,
    pub payload: Value,
    pub settings: SettingsSnapshot,
}

struct Slot {
    cache_key: CacheKey,
    gate: Arc<DeliveryGate>,
    handle: StreamHandle,
    on_reset: Option<ResetCallback>,
}

impl Slot {
    fn close(self, listener_id: &str) -> Option<ResetCallback> {
        self.gate.close();
        self.handle.unsubscribe();
        Metrics::subscription_closed();
        debug!(listener = %listener_id, key = %self.cache_key, "Live subscription closed");
        self.on_reset
    }
}

pub struct SubscriptionManager {
    transport: Arc<dyn StreamTransport>,
    cache: Arc<BarCache>,
    slots: Mutex<HashMap<String, Slot>>,
    next_generation: AtomicU64,
}

impl SubscriptionManager {
    pub fn new(transport: Arc<dyn StreamTransport>, cache: Arc<BarCache>) -> Self {
        Self {
            transport,
            cache,
            slots: Mutex::new(HashMap::new()),
            next_generation: AtomicU64::new(0),
        }
    }

    /// Open (or keep) the live stream for `listener_id`.
    ///
    /// A listener already streaming the same cache key is left untouched.
    /// Otherwise its previous stream is closed before the new one opens. A
    /// transport failure is logged and leaves the listener unsubscribed.
    /// Returns whether the listener is streaming `request.cache_key`.
    pub fn subscribe(
        &self,
        listener_id: &str,
        request: LiveRequest,
        on_tick: TickCallback,
        on_reset: Option<ResetCallback>,
    ) -> bool {
        let previous = {
            let mut slots = self.slots.lock();
            if slots
                .get(listener_id)
                .is_some_and(|slot| slot.cache_key == request.cache_key)
            {
                debug!(listener = %listener_id, key = %request.cache_key, "Already subscribed");
                return true;
            }
            slots.remove(listener_id)
        };
        if let Some(slot) = previous {
            slot.close(listener_id);
        }

        let generation = self.next_generation.fetch_add(1, Ordering::SeqCst) + 1;
        let gate = Arc::new(DeliveryGate::with_generation(generation));
        let on_data = self.tick_handler(listener_id, &request, &gate, generation, on_tick);

        let handle = match self
            .transport
            .subscribe(request.stream_type, request.payload.clone(), on_data)
        {
            Ok(handle) => handle,
            Err(e) => {
                gate.close();
                error!(
                    listener = %listener_id,
                    key = %request.cache_key,
                    transport = self.transport.name(),
                    error = %e,
                    "Live subscription failed"
                );
                return false;
            }
        };

        info!(
            listener = %listener_id,
            key = %request.cache_key,
            transport = self.transport.name(),
            generation,
            "Live subscription opened"
        );
        Metrics::subscription_opened();

        let replaced = self.slots.lock().insert(
            listener_id.to_string(),
            Slot {
                cache_key: request.cache_key,
                gate,
                handle,
                on_reset,
            },
        );
        if let Some(slot) = replaced {
            slot.close(listener_id);
        }
        true
    }

    fn tick_handler(
        &self,
        listener_id: &str,
        request: &LiveRequest,
        gate: &Arc<DeliveryGate>,
        generation: u64,
        on_tick: TickCallback,
    ) -> DataCallback {
        let handler = TickHandler {
            listener_id: listener_id.to_string(),
            cache_key: request.cache_key.clone(),
            settings: request.settings,
            cache: self.cache.clone(),
            on_tick,
            first_tick: AtomicBool::new(true),
        };
        let gate = gate.clone();
        Arc::new(move |value| {
            gate.deliver(generation, || handler.handle(&value));
        })
    }

    /// Close the stream of `listener_id`. Safe to call when none exists.
    pub fn unsubscribe(&self, listener_id: &str) -> bool {
        let slot = self.slots.lock().remove(listener_id);
        match slot {
            Some(slot) => {
                slot.close(listener_id);
                true
            }
            None => false,
        }
    }

    /// Close every stream whose cache key matches `predicate` and return the
    /// reset callbacks those listeners registered.
    pub fn remove_where<P: Fn(&CacheKey) -> bool>(&self, predicate: P) -> Vec<ResetCallback> {
        let removed: Vec<(String, Slot)> = {
            let mut slots = self.slots.lock();
            let ids: Vec<String> = slots
                .iter()
                .filter(|(_, slot)| predicate(&slot.cache_key))
                .map(|(id, _)| id.clone())
                .collect();
            ids.into_iter()
                .filter_map(|id| slots.remove(&id).map(|slot| (id, slot)))
                .collect()
        };

        removed
            .into_iter()
            .filter_map(|(id, slot)| slot.close(&id))
            .collect()
    }

    pub fn unsubscribe_all(&self) -> Vec<ResetCallback> {
        self.remove_where(|_| true)
    }

    pub fn is_subscribed(&self, listener_id: &str) -> bool {
        self.slots.lock().contains_key(listener_id)
    }

    /// Cache key streamed for `listener_id`.
    pub fn cache_key(&self, listener_id: &str) -> Option<CacheKey> {
        self.slots
            .lock()
            .get(listener_id)
            .map(|slot| slot.cache_key.clone())
    }

    pub fn len(&self) -> usize {
        self.slots.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

struct TickHandler {
    listener_id: String,
    cache_key: CacheKey,
    settings: SettingsSnapshot,
    cache: Arc<BarCache>,
    on_tick: TickCallback,
    first_tick: AtomicBool,
}

impl TickHandler {
    fn handle(&self, value: &Value) {
        let raw = match parse_tick(value) {
            Some(raw) => raw,
            None => {
                warn!(listener = %self.listener_id, payload = %value, "Ignoring unparseable tick");
                return;
            }
        };
        let bar = transform(raw, &self.settings);
        let last = self.cache.last_bar(&self.cache_key);

        if let Some(last) = last {
            if bar.time_ms() < last.time_ms() {
                debug!(
                    listener = %self.listener_id,
                    tick = bar.time,
                    last = last.time,
                    "Dropping stale tick"
                );
                Metrics::live_bar("stale");
                return;
            }
        }

        if self.first_tick.swap(false, Ordering::SeqCst) {
            if let Some(bridge) = last.and_then(|last| bridge_bar(&last, &bar)) {
                debug!(listener = %self.listener_id, time = bridge.time, "Emitting bridge bar");
                self.cache.set_last_bar(&self.cache_key, bridge);
                Metrics::live_bar("bridge");
                (self.on_tick)(bridge);
            }
        }

        self.cache.set_last_bar(&self.cache_key, bar);
        Metrics::live_bar("tick");
        (self.on_tick)(bar);
    }
}

/// Ticks arrive either as a bare bar or wrapped as `{"data": bar}`.
fn parse_tick(value: &Value) -> Option<RawBar> {
    RawBar::from_value(value)
        .ok()
        .or_else(|| value.get("data").and_then(|inner| RawBar::from_value(inner).ok()))
}
