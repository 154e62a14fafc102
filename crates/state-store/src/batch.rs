//! Change Coalescing

use crate::store::PendingChange;
use serde::{Deserialize, Serialize};
use telemetry_protocol::{Field, FieldValue};

/// A single per-field notification
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FieldChange {
    pub field: Field,
    pub value: FieldValue,
}

/// Notifications produced from one drain of the pending buffer
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChangeBatch {
    /// At most one change per field, in wire order
    pub changes: Vec<FieldChange>,
    /// Pending records that were coalesced
    pub records: usize,
}

impl ChangeBatch {
    /// Check if there is nothing to announce
    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }
}

/// Reduce change records to one notification per touched field.
///
/// The recorded values are only used to learn which fields moved; each
/// notification carries `current(field)` so the latest write always wins.
pub fn coalesce(records: &[PendingChange], current: impl Fn(Field) -> FieldValue) -> ChangeBatch {
    let mut touched = [false; Field::COUNT];
    for record in records {
        touched[record.field.index()] = true;
    }

    let changes = Field::ALL
        .iter()
        .filter(|field| touched[field.index()])
        .map(|&field| FieldChange {
            field,
            value: current(field),
        })
        .collect();

    ChangeBatch {
        changes,
        records: records.len(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::StateStore;
    use telemetry_protocol::{decode_frame, FrameLayout};

    #[test]
    fn test_many_updates_one_notification() {
        let store = StateStore::new(100_000);
        let mut sample = decode_frame(
            b"55.5,3000,40,0,12.3,80.1,90,-122.4,37.7,100,101,99,98",
            FrameLayout::Standard,
        )
        .unwrap();
        store.apply(&sample);
        store.take_batch();

        for rpm in 1..=10_000 {
            sample.rpm = rpm;
            store.apply(&sample);
        }

        let batch = store.take_batch();
        assert_eq!(batch.records, 10_000);
        assert_eq!(
            batch.changes,
            vec![FieldChange {
                field: Field::Rpm,
                value: FieldValue::I32(10_000)
            }]
        );
        assert!(store.take_batch().is_empty());
    }

    #[test]
    fn test_coalesce_uses_current_value() {
        let records = [
            PendingChange {
                field: Field::Speed,
                value: FieldValue::F32(1.0),
            },
            PendingChange {
                field: Field::Rpm,
                value: FieldValue::I32(10),
            },
            PendingChange {
                field: Field::Speed,
                value: FieldValue::F32(2.0),
            },
        ];

        let batch = coalesce(&records, |field| match field {
            Field::Speed => FieldValue::F32(3.0),
            other => FieldValue::zero(other.kind()),
        });

        assert_eq!(batch.records, 3);
        assert_eq!(batch.changes.len(), 2);
        assert_eq!(batch.changes[0].field, Field::Speed);
        assert_eq!(batch.changes[0].value, FieldValue::F32(3.0));
        assert_eq!(batch.changes[1].field, Field::Rpm);
    }

    #[test]
    fn test_empty_records() {
        let batch = coalesce(&[], |field| FieldValue::zero(field.kind()));
        assert!(batch.is_empty());
        assert_eq!(batch.records, 0);
    }
}
