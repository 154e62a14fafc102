//! Parser Worker Pool
//!
//! Pull-based: every worker dequeues from the shared queue, decodes one frame
//! and applies it to the store. Workers keep no shared scratch state.

use crate::counters::PipelineCounters;
use crate::error::PipelineError;
use crate::event::TelemetryEvent;
use crate::throttle::LogThrottle;
use datagram_queue::{DatagramQueue, RawDatagram};
use state_store::StateStore;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use telemetry_protocol::{FrameLayout, ParseError, TelemetrySample};
use tokio::sync::{broadcast, Notify};
use tracing::{debug, info, warn};

/// Frames between per-worker progress lines
const PROGRESS_EVERY: u64 = 1_000;

/// Frame decoder used by the workers
pub type Decoder = fn(&[u8], FrameLayout) -> Result<TelemetrySample, ParseError>;

/// Everything a worker touches
pub struct WorkerContext {
    pub queue: Arc<DatagramQueue>,
    pub store: Arc<StateStore>,
    pub counters: Arc<PipelineCounters>,
    pub events: broadcast::Sender<TelemetryEvent>,
    /// Wakes the emitter for an out-of-cycle flush
    pub flush: Arc<Notify>,
    pub layout: FrameLayout,
    pub decoder: Decoder,
    /// Fraction of the store's current pending bound that triggers a flush
    pub high_water_ratio: f64,
    pub dequeue_timeout: Duration,
    pub parse_log: LogThrottle,
}

impl WorkerContext {
    /// Decode and apply one datagram
    pub fn process(&self, datagram: &RawDatagram) -> Result<(), ParseError> {
        let (decoder, layout) = (self.decoder, self.layout);
        let sample = guarded(|| decoder(&datagram.payload, layout))?;

        let outcome = self.store.apply(&sample);
        self.counters.record_processed();
        self.counters.record_pending_overflow(outcome.overflowed);

        if outcome.changed > 0 && outcome.pending >= self.high_water() {
            self.flush.notify_one();
        }
        Ok(())
    }

    /// Flush threshold against the bound in force right now
    pub fn high_water(&self) -> usize {
        high_water_mark(self.store.max_pending(), self.high_water_ratio)
    }

    fn report(&self, err: ParseError) {
        self.counters.record_parse_error(err.category());
        if let Some(suppressed) = self.parse_log.allow() {
            warn!(kind = err.category(), suppressed, "Dropping malformed frame: {}", err);
        }
        // No subscribers is fine
        let _ = self.events.send(TelemetryEvent::Error(PipelineError::Parse(err)));
    }
}

/// `ceil(ratio × max)`, kept within `1..=max`
pub fn high_water_mark(max_pending: usize, ratio: f64) -> usize {
    let max = max_pending.max(1);
    ((max as f64 * ratio).ceil() as usize).clamp(1, max)
}

/// Run a decode step with any panic converted into a parse error
fn guarded<T, F>(decode: F) -> Result<T, ParseError>
where
    F: FnOnce() -> Result<T, ParseError>,
{
    panic::catch_unwind(AssertUnwindSafe(decode)).unwrap_or_else(|payload| {
        let reason = payload
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "decoder panicked".to_string());
        Err(ParseError::Fault(reason))
    })
}

/// Fixed set of parser threads
pub struct WorkerPool {
    handles: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Spawn `count` workers. Workers exit once the queue is shut down.
    pub fn spawn(count: usize, ctx: Arc<WorkerContext>) -> Result<Self, PipelineError> {
        let mut handles = Vec::with_capacity(count);
        for id in 0..count {
            let worker_ctx = Arc::clone(&ctx);
            let name = format!("parser-{}", id);
            let spawned = thread::Builder::new()
                .name(name.clone())
                .spawn(move || worker_loop(id, worker_ctx));

            match spawned {
                Ok(handle) => handles.push(handle),
                Err(e) => {
                    // Release the workers already running before bailing out
                    ctx.queue.shutdown();
                    Self { handles }.join();
                    return Err(PipelineError::Spawn {
                        name,
                        reason: e.to_string(),
                    });
                }
            }
        }

        info!("Started {} parser workers", count);
        Ok(Self { handles })
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Wait for every worker to exit. The queue must already be shut down.
    pub fn join(self) {
        for handle in self.handles {
            if handle.join().is_err() {
                warn!("Parser worker panicked");
            }
        }
    }
}

fn worker_loop(id: usize, ctx: Arc<WorkerContext>) {
    debug!(worker = id, "Parser worker started");
    let mut parsed: u64 = 0;

    loop {
        let Some(datagram) = ctx.queue.dequeue(ctx.dequeue_timeout) else {
            if ctx.queue.is_shutdown() {
                break;
            }
            continue;
        };

        match ctx.process(&datagram) {
            Ok(()) => {
                parsed += 1;
                if parsed % PROGRESS_EVERY == 0 {
                    debug!(worker = id, parsed, "Parser worker progress");
                }
            }
            Err(err) => ctx.report(err),
        }
    }

    debug!(worker = id, parsed, "Parser worker stopped");
}
