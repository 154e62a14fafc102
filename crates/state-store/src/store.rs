//! Atomic Field Store

use crate::batch::{coalesce, ChangeBatch};
use crate::snapshot::TelemetrySnapshot;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use telemetry_protocol::{Field, FieldValue, TelemetrySample};
use tracing::{debug, info};

/// Default bound on buffered change records
pub const DEFAULT_MAX_PENDING: usize = 10_000;

/// A field write waiting to be announced
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PendingChange {
    pub field: Field,
    pub value: FieldValue,
}

/// What a single `apply` did
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ApplyOutcome {
    /// Fields whose stored value changed
    pub changed: usize,
    /// Pending records buffered after this apply
    pub pending: usize,
    /// Oldest pending records discarded to stay within the bound
    pub overflowed: usize,
}

/// Latest-value store with one atomic cell per field.
///
/// Each cell is updated independently; a reader may see one sample
/// half-applied across fields but never a torn value within a field. The
/// pending-change buffer sits behind a single mutex since it is appended by
/// workers and drained whole by the emitter.
pub struct StateStore {
    /// Packed `FieldValue` bits, indexed by `Field::index`
    cells: [AtomicU64; Field::COUNT],
    /// Bit per field, set once the field has been written
    written: AtomicU32,
    /// Change records since the last drain
    pending: Mutex<VecDeque<PendingChange>>,
    /// Mirror of `pending.len()` for lock-free reads
    pending_len: AtomicUsize,
    /// Bound on `pending`
    max_pending: AtomicUsize,
    /// Records discarded because the bound was exceeded
    overflow_drops: AtomicU64,
}

impl StateStore {
    /// Create a store with every field at zero
    pub fn new(max_pending: usize) -> Self {
        info!("Creating state store (max pending changes: {})", max_pending);
        Self {
            cells: std::array::from_fn(|i| {
                let zero = Field::from_index(i)
                    .map(|field| FieldValue::zero(field.kind()).to_bits())
                    .unwrap_or(0);
                AtomicU64::new(zero)
            }),
            written: AtomicU32::new(0),
            pending: Mutex::new(VecDeque::new()),
            pending_len: AtomicUsize::new(0),
            max_pending: AtomicUsize::new(max_pending.max(1)),
            overflow_drops: AtomicU64::new(0),
        }
    }

    fn lock_pending(&self) -> MutexGuard<'_, VecDeque<PendingChange>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Current value of one field
    pub fn get(&self, field: Field) -> FieldValue {
        let bits = self.cells[field.index()].load(Ordering::Acquire);
        FieldValue::from_bits(field.kind(), bits)
    }

    /// Write every field of `sample` that differs from the stored value.
    ///
    /// Integers compare exactly, floats with tolerance. Each changed field
    /// is stored and a pending record appended. The first write to a field
    /// always counts as a change. Fields the sample does not carry are left
    /// alone.
    pub fn apply(&self, sample: &TelemetrySample) -> ApplyOutcome {
        let mut changes = Vec::with_capacity(Field::COUNT);
        let written = self.written.load(Ordering::Acquire);

        for (field, value) in sample.fields() {
            let bit = 1u32 << field.index();
            let cell = &self.cells[field.index()];
            let current = FieldValue::from_bits(field.kind(), cell.load(Ordering::Acquire));
            if written & bit != 0 && current.approx_eq(&value) {
                continue;
            }
            cell.store(value.to_bits(), Ordering::Release);
            if written & bit == 0 {
                self.written.fetch_or(bit, Ordering::AcqRel);
            }
            changes.push(PendingChange { field, value });
        }

        if changes.is_empty() {
            return ApplyOutcome {
                pending: self.pending_len(),
                ..Default::default()
            };
        }

        let changed = changes.len();
        let (pending, overflowed) = self.record(changes);
        ApplyOutcome {
            changed,
            pending,
            overflowed,
        }
    }

    fn record(&self, changes: Vec<PendingChange>) -> (usize, usize) {
        let max = self.max_pending.load(Ordering::Relaxed).max(1);
        let mut overflowed = 0;

        let len = {
            let mut pending = self.lock_pending();
            pending.extend(changes);
            while pending.len() > max {
                pending.pop_front();
                overflowed += 1;
            }
            let len = pending.len();
            self.pending_len.store(len, Ordering::Relaxed);
            len
        };

        if overflowed > 0 {
            self.overflow_drops
                .fetch_add(overflowed as u64, Ordering::Relaxed);
        }
        (len, overflowed)
    }

    /// Take every pending record, oldest first
    pub fn drain_pending(&self) -> Vec<PendingChange> {
        let drained = {
            let mut pending = self.lock_pending();
            self.pending_len.store(0, Ordering::Relaxed);
            std::mem::take(&mut *pending)
        };
        Vec::from(drained)
    }

    /// Drain pending records and coalesce them into one change per field,
    /// each carrying the field's current value
    pub fn take_batch(&self) -> ChangeBatch {
        let records = self.drain_pending();
        let batch = coalesce(&records, |field| self.get(field));
        if !batch.is_empty() {
            debug!(
                "Coalesced {} change records into {} notifications",
                batch.records, batch.changes.len()
            );
        }
        batch
    }

    /// Discard pending records, returning how many there were
    pub fn clear_pending(&self) -> usize {
        let mut pending = self.lock_pending();
        let count = pending.len();
        pending.clear();
        self.pending_len.store(0, Ordering::Relaxed);
        count
    }

    /// Number of buffered change records
    pub fn pending_len(&self) -> usize {
        self.pending_len.load(Ordering::Relaxed)
    }

    /// Change the pending-record bound; applies from the next write
    pub fn set_max_pending(&self, max_pending: usize) {
        self.max_pending.store(max_pending.max(1), Ordering::Relaxed);
    }

    /// Current pending-record bound
    pub fn max_pending(&self) -> usize {
        self.max_pending.load(Ordering::Relaxed)
    }

    /// Records discarded by the pending bound since creation
    pub fn overflow_drops(&self) -> u64 {
        self.overflow_drops.load(Ordering::Relaxed)
    }

    /// Check if a field has received a value yet
    pub fn is_written(&self, field: Field) -> bool {
        self.written.load(Ordering::Acquire) & (1u32 << field.index()) != 0
    }

    /// Read every field
    pub fn snapshot(&self) -> TelemetrySnapshot {
        TelemetrySnapshot::from_fn(|field| self.get(field))
    }
}

impl Default for StateStore {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_PENDING)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use proptest::prelude::any;
    use telemetry_protocol::{decode_frame, FrameLayout, GForces};

    fn base_sample() -> TelemetrySample {
        decode_frame(
            b"55.5,3000,40,0,12.3,80.1,90,-122.4,37.7,100,101,99,98",
            FrameLayout::Standard,
        )
        .unwrap()
    }

    #[test]
    fn test_first_apply_updates_all_base_fields() {
        let store = StateStore::default();
        let outcome = store.apply(&base_sample());

        assert_eq!(outcome.changed, 13);
        assert_eq!(outcome.pending, 13);
        assert_eq!(store.get(Field::Speed), FieldValue::F32(55.5));
        assert_eq!(store.get(Field::SpeedBr), FieldValue::I32(98));
        // Zero on the wire still counts as the first write
        assert!(store.is_written(Field::BrakePedal));
        // Not carried by a 13-field frame
        assert_eq!(store.get(Field::LateralG), FieldValue::F64(0.0));
        assert!(!store.is_written(Field::LateralG));
    }

    #[test]
    fn test_only_differing_fields_change() {
        let store = StateStore::default();
        store.apply(&base_sample());
        store.drain_pending();

        let mut next = base_sample();
        next.rpm = 3100;
        next.temperature += 1e-6; // representation noise
        next.gps_latitude = 37.8;

        let outcome = store.apply(&next);
        assert_eq!(outcome.changed, 2);

        let fields: Vec<Field> = store.drain_pending().iter().map(|c| c.field).collect();
        assert_eq!(fields, vec![Field::Rpm, Field::GpsLatitude]);
        assert_eq!(store.get(Field::Temperature), FieldValue::F32(80.1));
    }

    #[test]
    fn test_repeat_sample_is_silent() {
        let store = StateStore::default();
        store.apply(&base_sample());
        store.drain_pending();

        let outcome = store.apply(&base_sample());
        assert_eq!(outcome.changed, 0);
        assert_eq!(store.pending_len(), 0);
    }

    #[test]
    fn test_snapshot_matches_applied_sample() {
        let store = StateStore::default();
        let mut sample = base_sample();
        sample.g_forces = Some(GForces {
            lateral: 0.3,
            longitudinal: -1.1,
        });
        store.apply(&sample);

        let snapshot = store.snapshot();
        for (field, value) in sample.fields() {
            assert_eq!(snapshot.get(field), value, "{}", field);
        }
    }

    #[test]
    fn test_pending_overflow_drops_oldest() {
        let store = StateStore::new(5);
        let mut sample = base_sample();
        for rpm in 1..=8 {
            sample.rpm = rpm;
            store.apply(&sample);
        }

        // First apply queues 13 records, trimmed to 5; seven more applies each add one
        assert_eq!(store.pending_len(), 5);
        assert_eq!(store.overflow_drops(), 8 + 7);
        let pending = store.drain_pending();
        assert_eq!(pending.last().unwrap().value, FieldValue::I32(8));
        assert_eq!(pending.first().unwrap().value, FieldValue::I32(4));
    }

    #[test]
    fn test_clear_pending() {
        let store = StateStore::default();
        store.apply(&base_sample());
        assert_eq!(store.clear_pending(), 13);
        assert_eq!(store.pending_len(), 0);
        assert!(store.take_batch().is_empty());
    }

    #[test]
    fn test_concurrent_writers_leave_written_values() {
        let store = Arc::new(StateStore::new(100));
        let writers: Vec<_> = (0..4)
            .map(|w| {
                let store = Arc::clone(&store);
                thread::spawn(move || {
                    let mut sample = base_sample();
                    for i in 0..500 {
                        sample.rpm = w * 1000 + i;
                        sample.gps_longitude = f64::from(w * 1000 + i);
                        store.apply(&sample);
                    }
                })
            })
            .collect();
        for writer in writers {
            writer.join().unwrap();
        }

        let FieldValue::I32(rpm) = store.get(Field::Rpm) else {
            panic!("rpm has wrong kind");
        };
        assert!((0..4).any(|w| (w * 1000..w * 1000 + 500).contains(&rpm)));
        assert!(store.pending_len() <= 100);
    }

    proptest::proptest! {
        #[test]
        fn prop_second_apply_is_silent(
            speed in -300.0f32..300.0,
            rpm in any::<i32>(),
            lat in -90.0f64..90.0,
        ) {
            let store = StateStore::default();
            let mut sample = base_sample();
            sample.speed = speed;
            sample.rpm = rpm;
            sample.gps_latitude = lat;

            store.apply(&sample);
            let snapshot = store.snapshot();
            proptest::prop_assert_eq!(snapshot.speed, speed);
            proptest::prop_assert_eq!(snapshot.rpm, rpm);
            proptest::prop_assert_eq!(snapshot.gps_latitude, lat);
            proptest::prop_assert_eq!(store.apply(&sample).changed, 0);
        }
    }
}
