//! Batch Emitter
//!
//! Turns the pending-change buffer into one event per changed field on a
//! fixed tick, or sooner when workers report the buffer is filling up.

use crate::counters::PipelineCounters;
use crate::event::TelemetryEvent;
use state_store::StateStore;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, watch, Notify};
use tokio::time::{self, MissedTickBehavior};
use tracing::{debug, trace};

pub struct BatchEmitter {
    store: Arc<StateStore>,
    counters: Arc<PipelineCounters>,
    events: broadcast::Sender<TelemetryEvent>,
    flush: Arc<Notify>,
    interval: Duration,
}

impl BatchEmitter {
    pub fn new(
        store: Arc<StateStore>,
        counters: Arc<PipelineCounters>,
        events: broadcast::Sender<TelemetryEvent>,
        flush: Arc<Notify>,
        interval: Duration,
    ) -> Self {
        Self {
            store,
            counters,
            events,
            flush,
            interval,
        }
    }

    /// Tick until `shutdown` flips to true
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        debug!("Batch emitter running every {:?}", self.interval);

        loop {
            tokio::select! {
                biased;
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                _ = ticker.tick() => {
                    self.flush();
                }
                _ = self.flush.notified() => {
                    self.counters.record_early_flush();
                    self.flush();
                }
            }
        }

        debug!("Batch emitter stopped");
    }

    /// Publish one event per field changed since the last flush.
    /// Returns the number of events sent.
    pub fn flush(&self) -> usize {
        let batch = self.store.take_batch();
        if batch.is_empty() {
            return 0;
        }

        let count = batch.changes.len();
        for change in batch.changes {
            // Sending only fails with no subscribers
            let _ = self.events.send(TelemetryEvent::FieldChanged(change));
        }
        self.counters.record_notifications(count);
        trace!(records = batch.records, notifications = count, "Flushed change batch");
        count
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use telemetry_protocol::{decode_frame, Field, FieldValue, FrameLayout};

    fn emitter(interval: Duration) -> (BatchEmitter, broadcast::Receiver<TelemetryEvent>) {
        let (events, rx) = broadcast::channel(256);
        let emitter = BatchEmitter::new(
            Arc::new(StateStore::new(10_000)),
            Arc::new(PipelineCounters::new()),
            events,
            Arc::new(Notify::new()),
            interval,
        );
        (emitter, rx)
    }

    fn frame(rpm: i32) -> String {
        format!("55.5,{},40,0,12.3,80.1,90,-122.4,37.7,100,101,99,98", rpm)
    }

    #[test]
    fn test_many_updates_one_notification() {
        let (emitter, mut rx) = emitter(Duration::from_millis(16));
        emitter
            .store
            .apply(&decode_frame(frame(0).as_bytes(), FrameLayout::Standard).unwrap());
        emitter.flush();
        while rx.try_recv().is_ok() {}

        for rpm in 1..=500 {
            let sample = decode_frame(frame(rpm).as_bytes(), FrameLayout::Standard).unwrap();
            emitter.store.apply(&sample);
        }
        assert_eq!(emitter.flush(), 1);

        let change = rx.try_recv().unwrap();
        let change = change.as_change().unwrap();
        assert_eq!(change.field, Field::Rpm);
        assert_eq!(change.value, FieldValue::I32(500));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_empty_flush_sends_nothing() {
        let (emitter, mut rx) = emitter(Duration::from_millis(16));
        assert_eq!(emitter.flush(), 0);
        assert!(rx.try_recv().is_err());
        assert_eq!(emitter.counters.snapshot().notifications, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_tick_flushes_and_shutdown_stops() {
        let (emitter, mut rx) = emitter(Duration::from_millis(16));
        let store = Arc::clone(&emitter.store);
        let (tx, shutdown) = watch::channel(false);
        let task = tokio::spawn(emitter.run(shutdown));

        store.apply(&decode_frame(frame(1234).as_bytes(), FrameLayout::Standard).unwrap());
        time::sleep(Duration::from_millis(40)).await;

        let mut seen = 0;
        while let Ok(event) = rx.try_recv() {
            assert!(event.as_change().is_some());
            seen += 1;
        }
        assert_eq!(seen, 13);

        tx.send(true).unwrap();
        task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_notify_forces_early_flush() {
        let (emitter, mut rx) = emitter(Duration::from_secs(3600));
        let store = Arc::clone(&emitter.store);
        let flush = Arc::clone(&emitter.flush);
        let counters = Arc::clone(&emitter.counters);
        let (tx, shutdown) = watch::channel(false);
        let task = tokio::spawn(emitter.run(shutdown));

        // Let the immediate first tick pass
        tokio::task::yield_now().await;
        store.apply(&decode_frame(frame(7).as_bytes(), FrameLayout::Standard).unwrap());
        flush.notify_one();
        time::sleep(Duration::from_millis(1)).await;

        assert!(rx.try_recv().is_ok());
        assert_eq!(counters.snapshot().early_flushes, 1);

        tx.send(true).unwrap();
        task.await.unwrap();
    }
}
