use std::sync::atomic::{AtomicU64, Ordering};

/// Thread-safe counters describing upload and reconciliation activity.
#[derive(Default)]
pub struct IngestMetrics {
    fragments_received: AtomicU64,
    uploads_assembled: AtomicU64,
    parse_failures: AtomicU64,
    imports_succeeded: AtomicU64,
    imports_failed: AtomicU64,
    in_flight: AtomicU64,
}

impl IngestMetrics {
    /// Create an empty metrics accumulator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one inbound fragment.
    pub fn record_fragment(&self) {
        self.fragments_received.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a fully reassembled upload.
    pub fn record_assembled(&self) {
        self.uploads_assembled.fetch_add(1, Ordering::Relaxed);
    }

    /// Record an upload whose payload failed to parse.
    pub fn record_parse_failure(&self) {
        self.parse_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Mark a reconciliation as started.
    pub fn reconciliation_started(&self) {
        self.in_flight.fetch_add(1, Ordering::Relaxed);
    }

    /// Mark a reconciliation as finished with the given verified outcome.
    pub fn reconciliation_finished(&self, succeeded: bool) {
        let counter = if succeeded {
            &self.imports_succeeded
        } else {
            &self.imports_failed
        };
        counter.fetch_add(1, Ordering::Relaxed);
        // Saturating: a stray finish must not wrap the gauge.
        let _ = self
            .in_flight
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |value| {
                Some(value.saturating_sub(1))
            });
    }

    /// Reconciliations currently running.
    pub fn in_flight(&self) -> u64 {
        self.in_flight.load(Ordering::Relaxed)
    }

    /// Return a snapshot of the current counters.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            fragments_received: self.fragments_received.load(Ordering::Relaxed),
            uploads_assembled: self.uploads_assembled.load(Ordering::Relaxed),
            parse_failures: self.parse_failures.load(Ordering::Relaxed),
            imports_succeeded: self.imports_succeeded.load(Ordering::Relaxed),
            imports_failed: self.imports_failed.load(Ordering::Relaxed),
            in_flight: self.in_flight.load(Ordering::Relaxed),
        }
    }
}

/// Immutable view of ingestion counters used for reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct MetricsSnapshot {
    /// Fragments received since startup.
    pub fragments_received: u64,
    /// Uploads reassembled into a descriptor.
    pub uploads_assembled: u64,
    /// Uploads discarded because their payload did not parse.
    pub parse_failures: u64,
    /// Uploads verified present in the store.
    pub imports_succeeded: u64,
    /// Uploads that ended in `ERROR`.
    pub imports_failed: u64,
    /// Reconciliations still running.
    pub in_flight: u64,
}
