//! Delivery gate for live data callbacks.
//!
//! A gate pairs a subscription generation with a reentrant lock. Delivery
//! runs while the lock is held, so once [`DeliveryGate::close`] returns no
//! callback for that gate is running or will run. The lock is reentrant so a
//! callback may close its own gate (e.g. unsubscribe from inside `on_data`).

use parking_lot::ReentrantMutex;
use std::cell::Cell;

/// Generation value of a closed gate.
const CLOSED: u64 = 0;

#[derive(Debug)]
pub struct DeliveryGate {
    generation: ReentrantMutex<Cell<u64>>,
}

impl DeliveryGate {
    /// Open gate at generation 1.
    pub fn new() -> Self {
        Self::with_generation(1)
    }

    /// Open gate at `generation`. Generation 0 yields a closed gate.
    pub fn with_generation(generation: u64) -> Self {
        Self {
            generation: ReentrantMutex::new(Cell::new(generation)),
        }
    }

    /// Current generation, 0 once closed.
    pub fn generation(&self) -> u64 {
        self.generation.lock().get()
    }

    pub fn is_open(&self) -> bool {
        self.generation() != CLOSED
    }

    /// Run `deliver` if the gate is open at `expected`.
    ///
    /// Returns whether the callback ran.
    pub fn deliver<F: FnOnce()>(&self, expected: u64, deliver: F) -> bool {
        let guard = self.generation.lock();
        let current = guard.get();
        if current == CLOSED || current != expected {
            return false;
        }
        deliver();
        true
    }

    /// Close the gate, waiting for an in-progress delivery on another thread.
    pub fn close(&self) {
        self.generation.lock().set(CLOSED);
    }
}

impl Default for DeliveryGate {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn test_deliver_matching_generation() {
        let gate = DeliveryGate::with_generation(7);
        let mut hits = 0;
        assert!(gate.deliver(7, || hits += 1));
        assert!(!gate.deliver(6, || hits += 1));
        assert_eq!(hits, 1);
    }

    #[test]
    fn test_closed_gate_rejects() {
        let gate = DeliveryGate::new();
        gate.close();
        assert!(!gate.is_open());
        assert!(!gate.deliver(1, || panic!("must not run")));
        // Idempotent
        gate.close();
        assert_eq!(gate.generation(), 0);
    }

    #[test]
    fn test_close_from_inside_delivery() {
        let gate = DeliveryGate::new();
        assert!(gate.deliver(1, || gate.close()));
        assert!(!gate.is_open());
    }

    #[test]
    fn test_close_waits_for_running_delivery() {
        let gate = Arc::new(DeliveryGate::new());
        let finished = Arc::new(AtomicUsize::new(0));

        let worker = {
            let gate = gate.clone();
            let finished = finished.clone();
            std::thread::spawn(move || {
                gate.deliver(1, || {
                    std::thread::sleep(Duration::from_millis(50));
                    finished.fetch_add(1, Ordering::SeqCst);
                });
            })
        };

        std::thread::sleep(Duration::from_millis(10));
        gate.close();
        // close() returned, so the delivery that started first has completed
        assert_eq!(finished.load(Ordering::SeqCst), 1);
        worker.join().unwrap();
    }
}
