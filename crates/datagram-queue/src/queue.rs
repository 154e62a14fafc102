//! Bounded Queue Implementation

use crate::{EnqueueError, RawDatagram};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

/// Default capacity in datagrams
pub const DEFAULT_CAPACITY: usize = 10_000;

struct Inner {
    items: VecDeque<RawDatagram>,
    shutdown: bool,
}

/// Fixed-capacity FIFO shared by one producer side and many consumers.
///
/// Each datagram is handed to exactly one consumer. Memory usage is tracked
/// with atomics so monitors can read it without taking the lock.
pub struct DatagramQueue {
    inner: Mutex<Inner>,
    not_empty: Condvar,
    capacity: usize,
    /// Estimated bytes held (payload + per-item overhead)
    memory: AtomicUsize,
    /// Mirror of the shutdown flag for lock-free checks
    closed: AtomicBool,
    /// Datagrams refused by `enqueue`
    rejected: AtomicU64,
    /// Datagrams accepted by `enqueue`
    total_enqueued: AtomicU64,
}

impl DatagramQueue {
    /// Create a queue holding at most `capacity` datagrams
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            inner: Mutex::new(Inner {
                items: VecDeque::with_capacity(capacity.min(DEFAULT_CAPACITY)),
                shutdown: false,
            }),
            not_empty: Condvar::new(),
            capacity,
            memory: AtomicUsize::new(0),
            closed: AtomicBool::new(false),
            rejected: AtomicU64::new(0),
            total_enqueued: AtomicU64::new(0),
        }
    }

    /// Create a queue with the default capacity
    pub fn with_default_capacity() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Offer a datagram without blocking.
    ///
    /// Fails when the queue is full or shut down; the datagram is dropped and
    /// the rejection counted.
    pub fn enqueue(&self, datagram: RawDatagram) -> Result<(), EnqueueError> {
        let result = {
            let mut inner = self.lock();
            if inner.shutdown {
                Err(EnqueueError::Shutdown)
            } else if inner.items.len() >= self.capacity {
                Err(EnqueueError::Full {
                    capacity: self.capacity,
                })
            } else {
                // Charged under the lock so a consumer can only release it afterwards
                self.memory.fetch_add(datagram.footprint(), Ordering::Relaxed);
                inner.items.push_back(datagram);
                Ok(())
            }
        };

        match result {
            Ok(()) => {
                self.total_enqueued.fetch_add(1, Ordering::Relaxed);
                self.not_empty.notify_one();
            }
            Err(_) => {
                self.rejected.fetch_add(1, Ordering::Relaxed);
            }
        }
        result
    }

    /// Take the oldest datagram, waiting up to `timeout` for one to arrive.
    ///
    /// Returns `None` on timeout or once the queue is shut down.
    pub fn dequeue(&self, timeout: Duration) -> Option<RawDatagram> {
        let guard = self.lock();
        let (mut inner, _) = self
            .not_empty
            .wait_timeout_while(guard, timeout, |inner| {
                inner.items.is_empty() && !inner.shutdown
            })
            .unwrap_or_else(PoisonError::into_inner);

        if inner.shutdown {
            return None;
        }
        let datagram = inner.items.pop_front()?;
        drop(inner);

        self.memory.fetch_sub(datagram.footprint(), Ordering::Relaxed);
        Some(datagram)
    }

    /// Wake every waiting consumer and refuse further datagrams.
    ///
    /// Calling this more than once has no further effect.
    pub fn shutdown(&self) {
        {
            let mut inner = self.lock();
            inner.shutdown = true;
        }
        self.closed.store(true, Ordering::Release);
        self.not_empty.notify_all();
    }

    /// Check if the queue has been shut down
    pub fn is_shutdown(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Discard every queued datagram, returning how many were dropped
    pub fn clear(&self) -> usize {
        let drained: Vec<RawDatagram> = {
            let mut inner = self.lock();
            inner.items.drain(..).collect()
        };
        let bytes: usize = drained.iter().map(RawDatagram::footprint).sum();
        self.memory.fetch_sub(bytes, Ordering::Relaxed);
        drained.len()
    }

    /// Number of queued datagrams
    pub fn len(&self) -> usize {
        self.lock().items.len()
    }

    /// Check if the queue is empty
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Maximum number of queued datagrams
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Fill ratio (0.0 to 1.0)
    pub fn fill_ratio(&self) -> f64 {
        self.len() as f64 / self.capacity as f64
    }

    /// Estimated bytes currently held
    pub fn memory_usage(&self) -> usize {
        self.memory.load(Ordering::Relaxed)
    }

    /// Datagrams refused since creation
    pub fn rejected(&self) -> u64 {
        self.rejected.load(Ordering::Relaxed)
    }

    /// Datagrams accepted since creation
    pub fn total_enqueued(&self) -> u64 {
        self.total_enqueued.load(Ordering::Relaxed)
    }
}

impl Default for DatagramQueue {
    fn default() -> Self {
        Self::with_default_capacity()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ITEM_OVERHEAD;
    use std::sync::Arc;
    use std::thread;
    use std::time::Instant;

    fn datagram(text: &str) -> RawDatagram {
        RawDatagram::new(text.as_bytes().to_vec())
    }

    #[test]
    fn test_fifo_order() {
        let queue = DatagramQueue::new(10);
        queue.enqueue(datagram("a")).unwrap();
        queue.enqueue(datagram("b")).unwrap();

        assert_eq!(queue.dequeue(Duration::ZERO).unwrap().payload, b"a");
        assert_eq!(queue.dequeue(Duration::ZERO).unwrap().payload, b"b");
        assert!(queue.dequeue(Duration::ZERO).is_none());
    }

    #[test]
    fn test_full_queue_rejects() {
        let queue = DatagramQueue::new(2);
        assert!(queue.enqueue(datagram("one")).is_ok());
        assert!(queue.enqueue(datagram("two")).is_ok());

        let err = queue.enqueue(datagram("three")).unwrap_err();
        assert_eq!(err, EnqueueError::Full { capacity: 2 });
        assert_eq!(queue.len(), 2);
        assert_eq!(queue.rejected(), 1);
        assert_eq!(queue.total_enqueued(), 2);
    }

    #[test]
    fn test_memory_tracking() {
        let queue = DatagramQueue::new(4);
        assert_eq!(queue.memory_usage(), 0);

        queue.enqueue(datagram("12345")).unwrap();
        queue.enqueue(datagram("123")).unwrap();
        assert_eq!(queue.memory_usage(), 8 + 2 * ITEM_OVERHEAD);

        queue.dequeue(Duration::ZERO).unwrap();
        assert_eq!(queue.memory_usage(), 3 + ITEM_OVERHEAD);

        // Rejections leave the estimate untouched
        let full = DatagramQueue::new(1);
        full.enqueue(datagram("x")).unwrap();
        let before = full.memory_usage();
        assert!(full.enqueue(datagram("yyyy")).is_err());
        assert_eq!(full.memory_usage(), before);
    }

    #[test]
    fn test_rejected_offers_never_inflate_memory() {
        let queue = Arc::new(DatagramQueue::new(4));
        for _ in 0..4 {
            queue.enqueue(datagram("held")).unwrap();
        }
        let held = queue.memory_usage();
        assert_eq!(held, 4 * (4 + ITEM_OVERHEAD));

        let producer = {
            let queue = Arc::clone(&queue);
            thread::spawn(move || {
                for _ in 0..50_000 {
                    assert!(queue.enqueue(datagram("a much larger payload")).is_err());
                }
            })
        };
        while !producer.is_finished() {
            assert_eq!(queue.memory_usage(), held);
        }
        producer.join().unwrap();
        assert_eq!(queue.memory_usage(), held);
        assert_eq!(queue.rejected(), 50_000);
    }

    #[test]
    fn test_clear_releases_memory() {
        let queue = DatagramQueue::new(8);
        for _ in 0..5 {
            queue.enqueue(datagram("payload")).unwrap();
        }
        assert_eq!(queue.clear(), 5);
        assert!(queue.is_empty());
        assert_eq!(queue.memory_usage(), 0);
    }

    #[test]
    fn test_dequeue_times_out() {
        let queue = DatagramQueue::new(1);
        let start = Instant::now();
        assert!(queue.dequeue(Duration::from_millis(30)).is_none());
        assert!(start.elapsed() >= Duration::from_millis(25));
    }

    #[test]
    fn test_shutdown_wakes_waiters() {
        let queue = Arc::new(DatagramQueue::new(4));
        let waiters: Vec<_> = (0..3)
            .map(|_| {
                let queue = Arc::clone(&queue);
                thread::spawn(move || queue.dequeue(Duration::from_secs(30)))
            })
            .collect();

        thread::sleep(Duration::from_millis(20));
        let start = Instant::now();
        queue.shutdown();
        queue.shutdown();

        for waiter in waiters {
            assert!(waiter.join().unwrap().is_none());
        }
        assert!(start.elapsed() < Duration::from_secs(5));
        assert!(queue.is_shutdown());
        assert_eq!(queue.enqueue(datagram("late")), Err(EnqueueError::Shutdown));
    }

    #[test]
    fn test_each_item_consumed_once() {
        let queue = Arc::new(DatagramQueue::new(1000));
        for i in 0..1000u32 {
            queue.enqueue(RawDatagram::new(i.to_le_bytes().to_vec())).unwrap();
        }

        let consumers: Vec<_> = (0..4)
            .map(|_| {
                let queue = Arc::clone(&queue);
                thread::spawn(move || {
                    let mut seen = Vec::new();
                    while let Some(d) = queue.dequeue(Duration::from_millis(10)) {
                        seen.push(u32::from_le_bytes(d.payload.try_into().unwrap()));
                    }
                    seen
                })
            })
            .collect();

        let mut all: Vec<u32> = consumers
            .into_iter()
            .flat_map(|c| c.join().unwrap())
            .collect();
        all.sort_unstable();
        assert_eq!(all, (0..1000).collect::<Vec<_>>());
        assert_eq!(queue.memory_usage(), 0);
    }

    proptest::proptest! {
        #[test]
        fn prop_len_never_exceeds_capacity(capacity in 1usize..32, pushes in 0usize..64) {
            let queue = DatagramQueue::new(capacity);
            let mut accepted = 0;
            for _ in 0..pushes {
                if queue.enqueue(datagram("x")).is_ok() {
                    accepted += 1;
                }
            }
            proptest::prop_assert_eq!(queue.len(), accepted);
            proptest::prop_assert!(queue.len() <= capacity);
            proptest::prop_assert_eq!(queue.rejected() as usize, pushes - accepted);
        }
    }
}
