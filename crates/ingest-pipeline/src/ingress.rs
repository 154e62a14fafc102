//! Queue entry point shared by every transport

use crate::counters::PipelineCounters;
use crate::throttle::LogThrottle;
use datagram_queue::{DatagramQueue, EnqueueError, RawDatagram};
use std::sync::Arc;
use tracing::{trace, warn};

/// Handle a transport uses to push datagrams into a running pipeline
#[derive(Clone)]
pub struct Ingress {
    queue: Arc<DatagramQueue>,
    counters: Arc<PipelineCounters>,
    drop_log: Arc<LogThrottle>,
    source: &'static str,
}

impl Ingress {
    pub(crate) fn new(
        queue: Arc<DatagramQueue>,
        counters: Arc<PipelineCounters>,
        drop_log: Arc<LogThrottle>,
        source: &'static str,
    ) -> Self {
        Self {
            queue,
            counters,
            drop_log,
            source,
        }
    }

    /// Same queue, different source label
    pub(crate) fn for_source(&self, source: &'static str) -> Self {
        Self {
            source,
            ..self.clone()
        }
    }

    /// Offer one payload. Returns `false` if it was dropped.
    pub fn offer(&self, payload: Vec<u8>) -> bool {
        let bytes = payload.len();
        match self.queue.enqueue(RawDatagram::new(payload)) {
            Ok(()) => {
                self.counters.record_received(bytes);
                true
            }
            Err(EnqueueError::Full { capacity }) => {
                self.counters.record_queue_full();
                if let Some(suppressed) = self.drop_log.allow() {
                    warn!(
                        source = self.source,
                        capacity,
                        suppressed,
                        total_dropped = self.counters.dropped(),
                        "Queue full, dropping datagram"
                    );
                }
                false
            }
            Err(EnqueueError::Shutdown) => {
                trace!(source = self.source, "Queue shut down, discarding datagram");
                false
            }
        }
    }

    pub fn source(&self) -> &'static str {
        self.source
    }

    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }
}

impl std::fmt::Debug for Ingress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Ingress")
            .field("source", &self.source)
            .field("queued", &self.queue.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn ingress(capacity: usize) -> (Ingress, Arc<DatagramQueue>, Arc<PipelineCounters>) {
        let queue = Arc::new(DatagramQueue::new(capacity));
        let counters = Arc::new(PipelineCounters::new());
        let throttle = Arc::new(LogThrottle::new(Duration::from_secs(1)));
        (
            Ingress::new(queue.clone(), counters.clone(), throttle, "test"),
            queue,
            counters,
        )
    }

    #[test]
    fn test_full_queue_counts_one_drop() {
        let (ingress, queue, counters) = ingress(2);
        assert!(ingress.offer(b"a".to_vec()));
        assert!(ingress.offer(b"b".to_vec()));
        assert!(!ingress.offer(b"c".to_vec()));

        assert_eq!(queue.len(), 2);
        let snap = counters.snapshot();
        assert_eq!(snap.received, 2);
        assert_eq!(snap.dropped, 1);
        assert_eq!(snap.queue_full_drops, 1);
    }

    #[test]
    fn test_shutdown_discard_is_not_a_drop() {
        let (ingress, queue, counters) = ingress(4);
        queue.shutdown();
        assert!(!ingress.offer(b"late".to_vec()));
        assert_eq!(counters.dropped(), 0);
        assert_eq!(counters.received(), 0);
    }

    #[test]
    fn test_for_source_shares_queue() {
        let (ingress, queue, _) = ingress(4);
        let mqtt = ingress.for_source("mqtt");
        assert_eq!(mqtt.source(), "mqtt");
        assert!(mqtt.offer(b"x".to_vec()));
        assert_eq!(queue.len(), 1);
        assert_eq!(ingress.queue_len(), 1);
    }
}
