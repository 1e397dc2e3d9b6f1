//! Consumer metrics collection

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use serde::Serialize;

/// Samples kept for latency percentiles
const MAX_DURATION_SAMPLES: usize = 1000;

/// Consumer metrics collector
///
/// Cloning shares the underlying counters.
#[derive(Debug, Clone)]
pub struct ConsumerMetrics {
    messages_consumed: Arc<AtomicU64>,
    messages_persisted: Arc<AtomicU64>,
    messages_dropped: Arc<AtomicU64>,
    messages_duplicate: Arc<AtomicU64>,
    messages_acked: Arc<AtomicU64>,
    ack_failures: Arc<AtomicU64>,
    persistence_failures: Arc<AtomicU64>,
    transport_errors: Arc<AtomicU64>,
    recomputes: Arc<AtomicU64>,
    recompute_failures: Arc<AtomicU64>,
    processing_durations: Arc<RwLock<Vec<Duration>>>,
    start_time: Instant,
}

impl ConsumerMetrics {
    pub fn new() -> Self {
        Self {
            messages_consumed: Arc::new(AtomicU64::new(0)),
            messages_persisted: Arc::new(AtomicU64::new(0)),
            messages_dropped: Arc::new(AtomicU64::new(0)),
            messages_duplicate: Arc::new(AtomicU64::new(0)),
            messages_acked: Arc::new(AtomicU64::new(0)),
            ack_failures: Arc::new(AtomicU64::new(0)),
            persistence_failures: Arc::new(AtomicU64::new(0)),
            transport_errors: Arc::new(AtomicU64::new(0)),
            recomputes: Arc::new(AtomicU64::new(0)),
            recompute_failures: Arc::new(AtomicU64::new(0)),
            processing_durations: Arc::new(RwLock::new(Vec::new())),
            start_time: Instant::now(),
        }
    }

    pub fn increment_consumed(&self) {
        self.messages_consumed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_persisted(&self) {
        self.messages_persisted.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a malformed message that was acknowledged without persisting
    pub fn increment_dropped(&self) {
        self.messages_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_duplicate(&self) {
        self.messages_duplicate.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_acked(&self) {
        self.messages_acked.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_ack_failure(&self) {
        self.ack_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_persistence_failure(&self) {
        self.persistence_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_transport_error(&self) {
        self.transport_errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a recompute and whether it published
    pub fn record_recompute(&self, published: bool) {
        self.recomputes.fetch_add(1, Ordering::Relaxed);
        if !published {
            self.recompute_failures.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Record processing duration
    pub fn record_processing_duration(&self, duration: Duration) {
        let mut durations = self.processing_durations.write();
        durations.push(duration);
        if durations.len() > MAX_DURATION_SAMPLES {
            durations.remove(0);
        }
    }

    /// Get processing statistics
    pub fn processing_stats(&self) -> ProcessingStats {
        let durations = self.processing_durations.read();
        if durations.is_empty() {
            return ProcessingStats::default();
        }

        let mut sorted = durations.clone();
        drop(durations);
        sorted.sort();

        let p95_idx = ((sorted.len() - 1) as f64 * 0.95) as usize;
        let total: Duration = sorted.iter().sum();
        ProcessingStats {
            count: sorted.len(),
            mean: total / sorted.len() as u32,
            p50: sorted[sorted.len() / 2],
            p95: sorted[p95_idx],
            max: sorted[sorted.len() - 1],
        }
    }

    /// Get messages per second since creation
    pub fn messages_per_second(&self) -> f64 {
        let elapsed = self.start_time.elapsed().as_secs_f64();
        if elapsed > 0.0 {
            self.messages_consumed.load(Ordering::Relaxed) as f64 / elapsed
        } else {
            0.0
        }
    }

    /// Point-in-time copy of every counter
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            consumed: self.messages_consumed.load(Ordering::Relaxed),
            persisted: self.messages_persisted.load(Ordering::Relaxed),
            dropped: self.messages_dropped.load(Ordering::Relaxed),
            duplicates: self.messages_duplicate.load(Ordering::Relaxed),
            acked: self.messages_acked.load(Ordering::Relaxed),
            ack_failures: self.ack_failures.load(Ordering::Relaxed),
            persistence_failures: self.persistence_failures.load(Ordering::Relaxed),
            transport_errors: self.transport_errors.load(Ordering::Relaxed),
            recomputes: self.recomputes.load(Ordering::Relaxed),
            recompute_failures: self.recompute_failures.load(Ordering::Relaxed),
            messages_per_second: self.messages_per_second(),
            processing: self.processing_stats(),
        }
    }
}

impl Default for ConsumerMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Latency summary over the retained samples
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct ProcessingStats {
    pub count: usize,
    pub mean: Duration,
    pub p50: Duration,
    pub p95: Duration,
    pub max: Duration,
}

/// Serialisable view of [`ConsumerMetrics`]
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MetricsSnapshot {
    pub consumed: u64,
    pub persisted: u64,
    pub dropped: u64,
    pub duplicates: u64,
    pub acked: u64,
    pub ack_failures: u64,
    pub persistence_failures: u64,
    pub transport_errors: u64,
    pub recomputes: u64,
    pub recompute_failures: u64,
    pub messages_per_second: f64,
    pub processing: ProcessingStats,
}
