//! Pipeline Counters
//!
//! Lock-free counters shared by every stage. Each update is also forwarded
//! to the `metrics` facade so an installed recorder can export it.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// Running totals for one pipeline
#[derive(Debug, Default)]
pub struct PipelineCounters {
    received: AtomicU64,
    bytes_received: AtomicU64,
    processed: AtomicU64,
    dropped: AtomicU64,
    queue_full_drops: AtomicU64,
    monitor_flushed: AtomicU64,
    pending_overflow_drops: AtomicU64,
    parse_errors: AtomicU64,
    notifications: AtomicU64,
    early_flushes: AtomicU64,
    queue_memory: AtomicU64,
}

/// Copy of the counters at one instant
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CountersSnapshot {
    /// Datagrams handed to the queue
    pub received: u64,
    pub bytes_received: u64,
    /// Frames parsed and applied
    pub processed: u64,
    /// Everything lost: queue-full, monitor flushes and pending overflow
    pub dropped: u64,
    pub queue_full_drops: u64,
    pub monitor_flushed: u64,
    /// Change records discarded by the pending bound
    pub pending_overflow_drops: u64,
    pub parse_errors: u64,
    /// Field-change events published
    pub notifications: u64,
    /// Flushes forced by the pending high-water mark
    pub early_flushes: u64,
    /// Queue memory at the last monitor sample
    pub queue_memory: u64,
}

impl PipelineCounters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_received(&self, bytes: usize) {
        self.received.fetch_add(1, Ordering::Relaxed);
        self.bytes_received.fetch_add(bytes as u64, Ordering::Relaxed);
        metrics::counter!("telemetry_datagrams_received_total").increment(1);
        metrics::counter!("telemetry_bytes_received_total").increment(bytes as u64);
    }

    pub fn record_queue_full(&self) {
        self.dropped.fetch_add(1, Ordering::Relaxed);
        self.queue_full_drops.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("telemetry_datagrams_dropped_total", "reason" => "queue_full").increment(1);
    }

    pub fn record_monitor_flush(&self, discarded: usize) {
        if discarded == 0 {
            return;
        }
        let discarded = discarded as u64;
        self.dropped.fetch_add(discarded, Ordering::Relaxed);
        self.monitor_flushed.fetch_add(discarded, Ordering::Relaxed);
        metrics::counter!("telemetry_datagrams_dropped_total", "reason" => "memory").increment(discarded);
    }

    pub fn record_processed(&self) {
        self.processed.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("telemetry_frames_processed_total").increment(1);
    }

    pub fn record_parse_error(&self, category: &'static str) {
        self.parse_errors.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("telemetry_parse_errors_total", "kind" => category).increment(1);
    }

    pub fn record_pending_overflow(&self, discarded: usize) {
        if discarded == 0 {
            return;
        }
        self.dropped.fetch_add(discarded as u64, Ordering::Relaxed);
        self.pending_overflow_drops.fetch_add(discarded as u64, Ordering::Relaxed);
        metrics::counter!("telemetry_pending_overflow_total").increment(discarded as u64);
    }

    pub fn record_notifications(&self, count: usize) {
        self.notifications.fetch_add(count as u64, Ordering::Relaxed);
        metrics::counter!("telemetry_notifications_total").increment(count as u64);
    }

    pub fn record_early_flush(&self) {
        self.early_flushes.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("telemetry_early_flushes_total").increment(1);
    }

    pub fn set_queue_memory(&self, bytes: usize) {
        self.queue_memory.store(bytes as u64, Ordering::Relaxed);
        metrics::gauge!("telemetry_queue_memory_bytes").set(bytes as f64);
    }

    pub fn received(&self) -> u64 {
        self.received.load(Ordering::Relaxed)
    }

    pub fn processed(&self) -> u64 {
        self.processed.load(Ordering::Relaxed)
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    pub fn parse_errors(&self) -> u64 {
        self.parse_errors.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> CountersSnapshot {
        CountersSnapshot {
            received: self.received.load(Ordering::Relaxed),
            bytes_received: self.bytes_received.load(Ordering::Relaxed),
            processed: self.processed.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            queue_full_drops: self.queue_full_drops.load(Ordering::Relaxed),
            monitor_flushed: self.monitor_flushed.load(Ordering::Relaxed),
            pending_overflow_drops: self.pending_overflow_drops.load(Ordering::Relaxed),
            parse_errors: self.parse_errors.load(Ordering::Relaxed),
            notifications: self.notifications.load(Ordering::Relaxed),
            early_flushes: self.early_flushes.load(Ordering::Relaxed),
            queue_memory: self.queue_memory.load(Ordering::Relaxed),
        }
    }
}
