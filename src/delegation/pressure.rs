//! Main-backend pressure signal.
//!
//! A dimensionless 0..1 gauge derived from the main backend's recent latency
//! and queue depth. The router feeds latency samples in after every main
//! execution; the orchestrator adjusts queue depth around admissions. Only
//! the delegation engine reads it.

use std::sync::atomic::{AtomicU64, Ordering};

/// Latency at or above this contributes the full latency share.
const SATURATING_LATENCY_MS: f64 = 30_000.0;
/// Queue depth at or above this contributes the full queue share.
const SATURATING_QUEUE_DEPTH: f64 = 16.0;
/// EWMA smoothing factor for latency samples.
const ALPHA: f64 = 0.2;

#[derive(Debug, Default)]
pub struct PressureGauge {
    /// EWMA of main latency, stored as f64 bits.
    latency_ewma_ms: AtomicU64,
    queue_depth: AtomicU64,
}

impl PressureGauge {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_latency(&self, latency_ms: u64) {
        #[allow(clippy::cast_precision_loss)]
        let sample = latency_ms as f64;
        let mut current = self.latency_ewma_ms.load(Ordering::Acquire);
        loop {
            let previous = f64::from_bits(current);
            let next = if previous == 0.0 {
                sample
            } else {
                ALPHA * sample + (1.0 - ALPHA) * previous
            };
            match self.latency_ewma_ms.compare_exchange_weak(
                current,
                next.to_bits(),
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => break,
                Err(actual) => current = actual,
            }
        }
    }

    pub fn enqueue(&self) {
        self.queue_depth.fetch_add(1, Ordering::AcqRel);
    }

    pub fn dequeue(&self) {
        let _ = self
            .queue_depth
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |depth| {
                depth.checked_sub(1)
            });
    }

    /// Current pressure in [0, 1]: equal-weight blend of the latency EWMA and
    /// the queue depth, each normalized against its saturation point.
    pub fn value(&self) -> f64 {
        let latency = f64::from_bits(self.latency_ewma_ms.load(Ordering::Acquire));
        let latency_share = (latency / SATURATING_LATENCY_MS).min(1.0);
        #[allow(clippy::cast_precision_loss)]
        let queue_share =
            (self.queue_depth.load(Ordering::Acquire) as f64 / SATURATING_QUEUE_DEPTH).min(1.0);
        (0.5 * latency_share + 0.5 * queue_share).clamp(0.0, 1.0)
    }

    /// Test hook: force a pressure value by saturating the latency share.
    #[doc(hidden)]
    pub fn set_latency_ewma_ms(&self, latency_ms: f64) {
        self.latency_ewma_ms
            .store(latency_ms.to_bits(), Ordering::Release);
    }
}
