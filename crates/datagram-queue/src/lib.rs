//! Bounded Datagram Queue
//!
//! Hands raw datagrams from the socket reader to the parser workers. Enqueue
//! never blocks; dequeue waits with a timeout.

mod queue;

pub use queue::{DatagramQueue, DEFAULT_CAPACITY};

use std::time::Instant;
use thiserror::Error;

/// Bookkeeping bytes charged per queued datagram on top of its payload
pub const ITEM_OVERHEAD: usize = std::mem::size_of::<RawDatagram>();

/// A datagram payload as it came off the wire
#[derive(Debug, Clone)]
pub struct RawDatagram {
    /// Payload bytes
    pub payload: Vec<u8>,
    /// When the datagram was read from the transport
    pub received_at: Instant,
}

impl RawDatagram {
    /// Wrap a payload, stamping the arrival time
    pub fn new(payload: Vec<u8>) -> Self {
        Self {
            payload,
            received_at: Instant::now(),
        }
    }

    /// Payload size in bytes
    pub fn len(&self) -> usize {
        self.payload.len()
    }

    /// Check if the payload is empty
    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }

    /// Estimated memory held while queued
    pub fn footprint(&self) -> usize {
        self.payload.len() + ITEM_OVERHEAD
    }
}

/// Reasons a datagram was not accepted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum EnqueueError {
    /// Queue is at capacity
    #[error("Queue full ({capacity} datagrams)")]
    Full { capacity: usize },

    /// Queue has been shut down
    #[error("Queue is shut down")]
    Shutdown,
}
