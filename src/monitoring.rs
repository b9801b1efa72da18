//! Operational metrics for the tail-based sampling core.
//!
//! Tracks the handful of counters an operator needs to tell the sampling
//! subsystem is keeping up: buffered-trace drops, detector queue drops,
//! and peer fan-out failures.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::SystemTime;

/// Overall health of the tail-based sampling subsystem, derived from the
/// counters in [`SamplingStats`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SystemHealth {
    /// No drops or fan-out failures observed.
    Healthy,
    /// Some drops or failures, but the subsystem is still running.
    Degraded,
    /// Sustained drops suggesting the subsystem cannot keep up.
    Unhealthy,
}

impl SystemHealth {
    /// Short label for structured log fields.
    pub fn label(&self) -> &'static str {
        match self {
            SystemHealth::Healthy => "healthy",
            SystemHealth::Degraded => "degraded",
            SystemHealth::Unhealthy => "unhealthy",
        }
    }
}

/// Counters shared across the `WindowBuffer`, `ErrorDetector`, and
/// `PeerFanOut`, exposed to an operator via [`SamplingStats::snapshot`].
#[derive(Default)]
pub struct SamplingStats {
    buffered_traces_dropped: AtomicU64,
    detector_spans_dropped: AtomicU64,
    peer_fetch_failures: AtomicU64,
    processing_sink_errors: AtomicU64,
}

/// A point-in-time read of [`SamplingStats`].
#[derive(Debug, Clone, Copy)]
pub struct StatsSnapshot {
    /// Trace keys dropped by the `WindowBuffer`'s optional hard cap.
    pub buffered_traces_dropped: u64,
    /// Spans dropped by the `ErrorDetector` under `DropOldest` backpressure.
    pub detector_spans_dropped: u64,
    /// Peer `GetTrace` calls that failed after retry.
    pub peer_fetch_failures: u64,
    /// Batches the processing sink rejected.
    pub processing_sink_errors: u64,
    /// When this snapshot was taken.
    pub taken_at: SystemTime,
}

impl SamplingStats {
    /// Creates a zeroed counter set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records `n` trace keys dropped by the buffer's hard cap.
    pub fn record_buffer_drop(&self, n: u64) {
        self.buffered_traces_dropped.fetch_add(n, Ordering::Relaxed);
    }

    /// Records one span dropped by the detector.
    pub fn record_detector_drop(&self) {
        self.detector_spans_dropped.fetch_add(1, Ordering::Relaxed);
    }

    /// Records one failed peer fetch.
    pub fn record_peer_fetch_failure(&self) {
        self.peer_fetch_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Records one processing-sink rejection.
    pub fn record_sink_error(&self) {
        self.processing_sink_errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Takes a snapshot of all counters.
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            buffered_traces_dropped: self.buffered_traces_dropped.load(Ordering::Relaxed),
            detector_spans_dropped: self.detector_spans_dropped.load(Ordering::Relaxed),
            peer_fetch_failures: self.peer_fetch_failures.load(Ordering::Relaxed),
            processing_sink_errors: self.processing_sink_errors.load(Ordering::Relaxed),
            taken_at: SystemTime::now(),
        }
    }
}

impl StatsSnapshot {
    /// Derives a coarse health verdict from drop/failure counts.
    ///
    /// Thresholds are operator heuristics, not spec-mandated: any drops at
    /// all are `Degraded`; sustained buffer drops (the subsystem running
    /// out of memory headroom) are `Unhealthy`.
    pub fn health(&self) -> SystemHealth {
        if self.buffered_traces_dropped > 1000 {
            SystemHealth::Unhealthy
        } else if self.buffered_traces_dropped > 0
            || self.detector_spans_dropped > 0
            || self.peer_fetch_failures > 0
            || self.processing_sink_errors > 0
        {
            SystemHealth::Degraded
        } else {
            SystemHealth::Healthy
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fresh_stats_are_healthy() {
        let stats = SamplingStats::new();
        assert_eq!(stats.snapshot().health(), SystemHealth::Healthy);
    }

    #[test]
    fn test_any_drop_is_degraded() {
        let stats = SamplingStats::new();
        stats.record_detector_drop();
        assert_eq!(stats.snapshot().health(), SystemHealth::Degraded);
    }

    #[test]
    fn test_heavy_buffer_drops_are_unhealthy() {
        let stats = SamplingStats::new();
        stats.record_buffer_drop(2000);
        assert_eq!(stats.snapshot().health(), SystemHealth::Unhealthy);
    }
}
