//! Telemetry Field Definitions
//!
//! Every field has a fixed position in the wire frame and a fixed numeric
//! type. Values travel as [`FieldValue`] and can be packed into a `u64` so a
//! single atomic word can hold any of them.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Relative tolerance for `f32` comparisons
const F32_REL_EPS: f32 = 1e-5;
/// Absolute floor for `f32` comparisons near zero
const F32_ABS_EPS: f32 = 1e-6;
/// Relative tolerance for `f64` comparisons
const F64_REL_EPS: f64 = 1e-12;
/// Absolute floor for `f64` comparisons near zero
const F64_ABS_EPS: f64 = 1e-12;

/// Telemetry fields in wire order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[repr(u8)]
pub enum Field {
    /// Vehicle speed (f32)
    Speed = 0,
    /// Engine RPM (i32)
    Rpm = 1,
    /// Accelerator pedal position (i32)
    AccPedal = 2,
    /// Brake pedal position (i32)
    BrakePedal = 3,
    /// Steering encoder angle (f64)
    EncoderAngle = 4,
    /// Temperature (f32)
    Temperature = 5,
    /// Battery level (i32)
    BatteryLevel = 6,
    /// GPS longitude (f64)
    GpsLongitude = 7,
    /// GPS latitude (f64)
    GpsLatitude = 8,
    /// Front-left wheel speed (i32)
    #[serde(rename = "speedFL")]
    SpeedFl = 9,
    /// Front-right wheel speed (i32)
    #[serde(rename = "speedFR")]
    SpeedFr = 10,
    /// Rear-left wheel speed (i32)
    #[serde(rename = "speedBL")]
    SpeedBl = 11,
    /// Rear-right wheel speed (i32)
    #[serde(rename = "speedBR")]
    SpeedBr = 12,
    /// Lateral acceleration in g (f64, extended frames only)
    LateralG = 13,
    /// Longitudinal acceleration in g (f64, extended frames only)
    LongitudinalG = 14,
}

impl Field {
    /// Number of telemetry fields
    pub const COUNT: usize = 15;

    /// All fields in wire order
    pub const ALL: [Field; Field::COUNT] = [
        Field::Speed,
        Field::Rpm,
        Field::AccPedal,
        Field::BrakePedal,
        Field::EncoderAngle,
        Field::Temperature,
        Field::BatteryLevel,
        Field::GpsLongitude,
        Field::GpsLatitude,
        Field::SpeedFl,
        Field::SpeedFr,
        Field::SpeedBl,
        Field::SpeedBr,
        Field::LateralG,
        Field::LongitudinalG,
    ];

    /// Position of this field in the wire frame
    pub fn index(self) -> usize {
        self as usize
    }

    /// Look up a field by its wire position
    pub fn from_index(index: usize) -> Option<Field> {
        Field::ALL.get(index).copied()
    }

    /// Numeric type carried by this field
    pub fn kind(self) -> FieldKind {
        match self {
            Field::Speed | Field::Temperature => FieldKind::Float32,
            Field::EncoderAngle
            | Field::GpsLongitude
            | Field::GpsLatitude
            | Field::LateralG
            | Field::LongitudinalG => FieldKind::Float64,
            _ => FieldKind::Int32,
        }
    }

    /// Name used by the presentation layer
    pub fn name(self) -> &'static str {
        match self {
            Field::Speed => "speed",
            Field::Rpm => "rpm",
            Field::AccPedal => "accPedal",
            Field::BrakePedal => "brakePedal",
            Field::EncoderAngle => "encoderAngle",
            Field::Temperature => "temperature",
            Field::BatteryLevel => "batteryLevel",
            Field::GpsLongitude => "gpsLongitude",
            Field::GpsLatitude => "gpsLatitude",
            Field::SpeedFl => "speedFL",
            Field::SpeedFr => "speedFR",
            Field::SpeedBl => "speedBL",
            Field::SpeedBr => "speedBR",
            Field::LateralG => "lateralG",
            Field::LongitudinalG => "longitudinalG",
        }
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Numeric representation of a field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FieldKind {
    Float32,
    Int32,
    Float64,
}

/// A single decoded field value
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    F32(f32),
    I32(i32),
    F64(f64),
}

impl FieldValue {
    /// Zero value of the given kind
    pub fn zero(kind: FieldKind) -> Self {
        match kind {
            FieldKind::Float32 => FieldValue::F32(0.0),
            FieldKind::Int32 => FieldValue::I32(0),
            FieldKind::Float64 => FieldValue::F64(0.0),
        }
    }

    /// Kind of this value
    pub fn kind(&self) -> FieldKind {
        match self {
            FieldValue::F32(_) => FieldKind::Float32,
            FieldValue::I32(_) => FieldKind::Int32,
            FieldValue::F64(_) => FieldKind::Float64,
        }
    }

    /// Pack the value into a 64-bit word
    pub fn to_bits(self) -> u64 {
        match self {
            FieldValue::F32(v) => u64::from(v.to_bits()),
            FieldValue::I32(v) => u64::from(v as u32),
            FieldValue::F64(v) => v.to_bits(),
        }
    }

    /// Unpack a word produced by [`FieldValue::to_bits`]
    pub fn from_bits(kind: FieldKind, bits: u64) -> Self {
        match kind {
            FieldKind::Float32 => FieldValue::F32(f32::from_bits(bits as u32)),
            FieldKind::Int32 => FieldValue::I32(bits as u32 as i32),
            FieldKind::Float64 => FieldValue::F64(f64::from_bits(bits)),
        }
    }

    /// Widen to `f64` for display and statistics
    pub fn as_f64(&self) -> f64 {
        match *self {
            FieldValue::F32(v) => f64::from(v),
            FieldValue::I32(v) => f64::from(v),
            FieldValue::F64(v) => v,
        }
    }

    /// Equality used for change detection.
    ///
    /// Integers compare exactly. Floats compare with a relative tolerance and
    /// a small absolute floor so representation noise does not count as a
    /// change. Values of different kinds are never equal.
    pub fn approx_eq(&self, other: &FieldValue) -> bool {
        match (*self, *other) {
            (FieldValue::I32(a), FieldValue::I32(b)) => a == b,
            (FieldValue::F32(a), FieldValue::F32(b)) => f32_approx_eq(a, b),
            (FieldValue::F64(a), FieldValue::F64(b)) => f64_approx_eq(a, b),
            _ => false,
        }
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldValue::F32(v) => write!(f, "{}", v),
            FieldValue::I32(v) => write!(f, "{}", v),
            FieldValue::F64(v) => write!(f, "{}", v),
        }
    }
}

fn f32_approx_eq(a: f32, b: f32) -> bool {
    if a == b {
        return true;
    }
    if !a.is_finite() || !b.is_finite() {
        return false;
    }
    let diff = (a - b).abs();
    diff <= F32_ABS_EPS.max(F32_REL_EPS * a.abs().max(b.abs()))
}

fn f64_approx_eq(a: f64, b: f64) -> bool {
    if a == b {
        return true;
    }
    if !a.is_finite() || !b.is_finite() {
        return false;
    }
    let diff = (a - b).abs();
    diff <= F64_ABS_EPS.max(F64_REL_EPS * a.abs().max(b.abs()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_field_order_matches_index() {
        for (i, field) in Field::ALL.iter().enumerate() {
            assert_eq!(field.index(), i);
            assert_eq!(Field::from_index(i), Some(*field));
        }
        assert_eq!(Field::from_index(Field::COUNT), None);
    }

    #[test]
    fn test_field_kinds() {
        assert_eq!(Field::Speed.kind(), FieldKind::Float32);
        assert_eq!(Field::Rpm.kind(), FieldKind::Int32);
        assert_eq!(Field::GpsLatitude.kind(), FieldKind::Float64);
        assert_eq!(Field::SpeedBr.kind(), FieldKind::Int32);
        assert_eq!(Field::LongitudinalG.kind(), FieldKind::Float64);
    }

    #[test]
    fn test_negative_int_survives_bits() {
        let value = FieldValue::I32(-42);
        assert_eq!(FieldValue::from_bits(FieldKind::Int32, value.to_bits()), value);
    }

    #[test]
    fn test_float_noise_is_not_a_change() {
        assert!(FieldValue::F32(80.1).approx_eq(&FieldValue::F32(80.100_006)));
        assert!(FieldValue::F64(-122.4).approx_eq(&FieldValue::F64(-122.400_000_000_000_01)));
        assert!(!FieldValue::F32(80.1).approx_eq(&FieldValue::F32(80.2)));
        assert!(!FieldValue::F64(37.7).approx_eq(&FieldValue::F64(37.700_001)));
    }

    #[test]
    fn test_zero_and_nan_handling() {
        assert!(FieldValue::F64(0.0).approx_eq(&FieldValue::F64(-0.0)));
        assert!(!FieldValue::F64(0.0).approx_eq(&FieldValue::F64(0.5)));
        assert!(!FieldValue::F32(f32::NAN).approx_eq(&FieldValue::F32(f32::NAN)));
        assert!(!FieldValue::F32(f32::INFINITY).approx_eq(&FieldValue::F32(1.0)));
    }

    #[test]
    fn test_mixed_kinds_never_equal() {
        assert!(!FieldValue::I32(1).approx_eq(&FieldValue::F64(1.0)));
    }

    proptest! {
        #[test]
        fn prop_ints_compare_exactly(a in any::<i32>(), b in any::<i32>()) {
            prop_assert_eq!(FieldValue::I32(a).approx_eq(&FieldValue::I32(b)), a == b);
        }

        #[test]
        fn prop_f64_bits_round_trip(v in any::<f64>()) {
            let bits = FieldValue::F64(v).to_bits();
            prop_assert_eq!(FieldValue::from_bits(FieldKind::Float64, bits).to_bits(), bits);
        }

        #[test]
        fn prop_approx_eq_is_symmetric(a in -1.0e6f64..1.0e6, b in -1.0e6f64..1.0e6) {
            let (x, y) = (FieldValue::F64(a), FieldValue::F64(b));
            prop_assert_eq!(x.approx_eq(&y), y.approx_eq(&x));
        }
    }
}
