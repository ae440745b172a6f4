//! Engine-level request counters.

use std::sync::atomic::{AtomicU64, Ordering};

/// Thread-safe counters for the request handlers.
#[derive(Debug, Default)]
pub struct EngineMetrics {
    requests: AtomicU64,
    filtered: AtomicU64,
    passthrough: AtomicU64,
    handoffs: AtomicU64,
    reversals_persisted: AtomicU64,
    reversals_recovered: AtomicU64,
    reversal_decode_failures: AtomicU64,
}

/// Point-in-time copy of [`EngineMetrics`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineMetricsSnapshot {
    /// Object requests seen by the handler.
    pub requests: u64,
    /// Requests that streamed through at least one filter.
    pub filtered: u64,
    /// Requests with no applicable filters.
    pub passthrough: u64,
    /// Sub-plans handed to the other node.
    pub handoffs: u64,
    /// Reversal records attached at write time.
    pub reversals_persisted: u64,
    /// Reversal records applied at read time.
    pub reversals_recovered: u64,
    /// Corrupt reversal records served as stored.
    pub reversal_decode_failures: u64,
}

impl EngineMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_request(&self) {
        self.requests.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_filtered(&self) {
        self.filtered.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_passthrough(&self) {
        self.passthrough.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_handoff(&self) {
        self.handoffs.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_reversal_persisted(&self) {
        self.reversals_persisted.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_reversal_recovered(&self) {
        self.reversals_recovered.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_reversal_decode_failure(&self) {
        self.reversal_decode_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> EngineMetricsSnapshot {
        EngineMetricsSnapshot {
            requests: self.requests.load(Ordering::Relaxed),
            filtered: self.filtered.load(Ordering::Relaxed),
            passthrough: self.passthrough.load(Ordering::Relaxed),
            handoffs: self.handoffs.load(Ordering::Relaxed),
            reversals_persisted: self.reversals_persisted.load(Ordering::Relaxed),
            reversals_recovered: self.reversals_recovered.load(Ordering::Relaxed),
            reversal_decode_failures: self.reversal_decode_failures.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_accumulate() {
        let m = EngineMetrics::new();
        m.record_request();
        m.record_request();
        m.record_filtered();
        m.record_passthrough();
        let snap = m.snapshot();
        assert_eq!(snap.requests, 2);
        assert_eq!(snap.filtered, 1);
        assert_eq!(snap.passthrough, 1);
        assert_eq!(snap.handoffs, 0);
    }
}
