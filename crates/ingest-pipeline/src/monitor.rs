//! Resource Monitor
//!
//! Samples queue memory on a slow tick, sheds the queue when it grows past
//! the ceiling, and logs throughput for the elapsed window.

use crate::counters::{CountersSnapshot, PipelineCounters};
use datagram_queue::DatagramQueue;
use serde::Serialize;
use state_store::StateStore;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::time::{self, MissedTickBehavior};
use tracing::{debug, info, warn};

/// One monitor sample
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct MonitorReport {
    pub uptime_secs: f64,
    pub queue_len: usize,
    pub queue_memory: usize,
    pub pending_changes: usize,
    pub processed: u64,
    pub dropped: u64,
    /// Datagrams discarded by this sample's memory flush
    pub flushed: usize,
    pub received_per_sec: f64,
    pub processed_per_sec: f64,
    pub dropped_per_sec: f64,
}

pub struct ResourceMonitor {
    queue: Arc<DatagramQueue>,
    store: Arc<StateStore>,
    counters: Arc<PipelineCounters>,
    memory_ceiling: usize,
    started: Instant,
    last_sample: Instant,
    last_counts: CountersSnapshot,
}

impl ResourceMonitor {
    pub fn new(
        queue: Arc<DatagramQueue>,
        store: Arc<StateStore>,
        counters: Arc<PipelineCounters>,
        memory_ceiling: usize,
    ) -> Self {
        let now = Instant::now();
        let last_counts = counters.snapshot();
        Self {
            queue,
            store,
            counters,
            memory_ceiling,
            started: now,
            last_sample: now,
            last_counts,
        }
    }

    pub async fn run(mut self, period: Duration, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = time::interval_at(time::Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                _ = ticker.tick() => {
                    self.sample();
                }
            }
        }

        debug!("Resource monitor stopped");
    }

    /// Take one sample, shedding the queue if it is over the ceiling
    pub fn sample(&mut self) -> MonitorReport {
        let mut queue_memory = self.queue.memory_usage();
        let mut flushed = 0;

        if queue_memory > self.memory_ceiling {
            flushed = self.queue.clear();
            self.counters.record_monitor_flush(flushed);
            warn!(
                queue_memory,
                ceiling = self.memory_ceiling,
                flushed,
                "Queue memory over ceiling, discarded queued datagrams"
            );
            queue_memory = self.queue.memory_usage();
        }
        self.counters.set_queue_memory(queue_memory);

        let now = Instant::now();
        let window = now.duration_since(self.last_sample).as_secs_f64().max(f64::EPSILON);
        let counts = self.counters.snapshot();
        let rate = |now: u64, before: u64| now.saturating_sub(before) as f64 / window;

        let report = MonitorReport {
            uptime_secs: now.duration_since(self.started).as_secs_f64(),
            queue_len: self.queue.len(),
            queue_memory,
            pending_changes: self.store.pending_len(),
            processed: counts.processed,
            dropped: counts.dropped,
            flushed,
            received_per_sec: rate(counts.received, self.last_counts.received),
            processed_per_sec: rate(counts.processed, self.last_counts.processed),
            dropped_per_sec: rate(counts.dropped, self.last_counts.dropped),
        };

        info!(
            uptime_secs = report.uptime_secs as u64,
            processed = report.processed,
            dropped = report.dropped,
            queue_len = report.queue_len,
            queue_memory = report.queue_memory,
            pending = report.pending_changes,
            "Throughput: {:.1} received/s, {:.1} processed/s, {:.1} dropped/s",
            report.received_per_sec,
            report.processed_per_sec,
            report.dropped_per_sec
        );

        self.last_sample = now;
        self.last_counts = counts;
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use datagram_queue::RawDatagram;

    fn monitor(ceiling: usize) -> (ResourceMonitor, Arc<DatagramQueue>, Arc<PipelineCounters>) {
        let queue = Arc::new(DatagramQueue::new(100));
        let counters = Arc::new(PipelineCounters::new());
        let monitor = ResourceMonitor::new(
            Arc::clone(&queue),
            Arc::new(StateStore::new(100)),
            Arc::clone(&counters),
            ceiling,
        );
        (monitor, queue, counters)
    }

    #[test]
    fn test_under_ceiling_keeps_queue() {
        let (mut monitor, queue, counters) = monitor(1 << 20);
        queue.enqueue(RawDatagram::new(vec![0; 64])).unwrap();

        let report = monitor.sample();
        assert_eq!(report.flushed, 0);
        assert_eq!(report.queue_len, 1);
        assert_eq!(counters.snapshot().queue_memory, queue.memory_usage() as u64);
    }

    #[test]
    fn test_over_ceiling_sheds_and_counts() {
        let (mut monitor, queue, counters) = monitor(256);
        for _ in 0..10 {
            queue.enqueue(RawDatagram::new(vec![0; 100])).unwrap();
        }

        let report = monitor.sample();
        assert_eq!(report.flushed, 10);
        assert_eq!(report.queue_len, 0);
        assert_eq!(report.queue_memory, 0);

        let snap = counters.snapshot();
        assert_eq!(snap.dropped, 10);
        assert_eq!(snap.monitor_flushed, 10);
        assert_eq!(snap.queue_memory, 0);
    }

    #[test]
    fn test_rates_cover_window_only() {
        let (mut monitor, _queue, counters) = monitor(1 << 20);
        counters.record_processed();
        let first = monitor.sample();
        assert_eq!(first.processed, 1);

        let second = monitor.sample();
        assert_eq!(second.processed, 1);
        assert_eq!(second.processed_per_sec, 0.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_stops_on_shutdown() {
        let (monitor, _queue, _counters) = monitor(1 << 20);
        let (tx, rx) = watch::channel(false);
        let task = tokio::spawn(monitor.run(Duration::from_secs(5), rx));
        time::sleep(Duration::from_secs(11)).await;
        tx.send(true).unwrap();
        task.await.unwrap();
    }
}
