//! Telemetry Frame Decoding
//!
//! A frame is a single line of comma-separated numbers:
//!
//! ```text
//! speed,rpm,accPedal,brakePedal,encoderAngle,temperature,batteryLevel,
//! gpsLongitude,gpsLatitude,speedFL,speedFR,speedBL,speedBR[,lateralG,longitudinalG]
//! ```
//!
//! A frame is accepted only when every required field converts. A frame with
//! one bad field has unknown alignment, so nothing from it is used.

use crate::error::ParseError;
use crate::field::{Field, FieldValue};
use crate::layout::{BASE_FIELDS, EXTENDED_FIELDS};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Field separator on the wire
pub const DELIMITER: char = ',';

/// Longest slice of a bad field echoed back in errors
const MAX_ECHO_CHARS: usize = 32;

/// Which frame generation the sender speaks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FrameLayout {
    /// 13 required fields; the G pair is decoded when both are present
    #[default]
    Standard,
    /// All 15 fields required
    Extended,
}

impl FrameLayout {
    /// Minimum number of fields a frame must carry
    pub fn min_fields(self) -> usize {
        match self {
            FrameLayout::Standard => BASE_FIELDS,
            FrameLayout::Extended => EXTENDED_FIELDS,
        }
    }
}

/// Lateral and longitudinal acceleration pair
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GForces {
    pub lateral: f64,
    pub longitudinal: f64,
}

/// One fully decoded telemetry frame
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct TelemetrySample {
    pub speed: f32,
    pub rpm: i32,
    pub acc_pedal: i32,
    pub brake_pedal: i32,
    pub encoder_angle: f64,
    pub temperature: f32,
    pub battery_level: i32,
    pub gps_longitude: f64,
    pub gps_latitude: f64,
    pub speed_fl: i32,
    pub speed_fr: i32,
    pub speed_bl: i32,
    pub speed_br: i32,
    /// Present only when the frame carried the G pair
    pub g_forces: Option<GForces>,
}

impl TelemetrySample {
    /// Value of a field, or `None` if this sample does not carry it
    pub fn get(&self, field: Field) -> Option<FieldValue> {
        let value = match field {
            Field::Speed => FieldValue::F32(self.speed),
            Field::Rpm => FieldValue::I32(self.rpm),
            Field::AccPedal => FieldValue::I32(self.acc_pedal),
            Field::BrakePedal => FieldValue::I32(self.brake_pedal),
            Field::EncoderAngle => FieldValue::F64(self.encoder_angle),
            Field::Temperature => FieldValue::F32(self.temperature),
            Field::BatteryLevel => FieldValue::I32(self.battery_level),
            Field::GpsLongitude => FieldValue::F64(self.gps_longitude),
            Field::GpsLatitude => FieldValue::F64(self.gps_latitude),
            Field::SpeedFl => FieldValue::I32(self.speed_fl),
            Field::SpeedFr => FieldValue::I32(self.speed_fr),
            Field::SpeedBl => FieldValue::I32(self.speed_bl),
            Field::SpeedBr => FieldValue::I32(self.speed_br),
            Field::LateralG => FieldValue::F64(self.g_forces?.lateral),
            Field::LongitudinalG => FieldValue::F64(self.g_forces?.longitudinal),
        };
        Some(value)
    }

    /// Iterate over every field this sample carries, in wire order
    pub fn fields(&self) -> impl Iterator<Item = (Field, FieldValue)> + '_ {
        Field::ALL
            .iter()
            .filter_map(move |&field| self.get(field).map(|value| (field, value)))
    }

    /// Number of fields this sample carries
    pub fn field_count(&self) -> usize {
        if self.g_forces.is_some() {
            EXTENDED_FIELDS
        } else {
            BASE_FIELDS
        }
    }
}

/// Encodes the sample as a wire frame
impl fmt::Display for TelemetrySample {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, (_, value)) in self.fields().enumerate() {
            if i > 0 {
                write!(f, "{}", DELIMITER)?;
            }
            write!(f, "{}", value)?;
        }
        Ok(())
    }
}

/// Decode one datagram payload into a sample.
///
/// The payload is trimmed, split on [`DELIMITER`], and each required field
/// converted. Trailing fields beyond the layout are ignored.
pub fn decode_frame(payload: &[u8], layout: FrameLayout) -> Result<TelemetrySample, ParseError> {
    let text = std::str::from_utf8(payload).map_err(|_| ParseError::InvalidUtf8)?;
    let parts: Vec<&str> = text.trim().split(DELIMITER).collect();

    let expected = layout.min_fields();
    if parts.len() < expected {
        return Err(ParseError::FieldCount {
            expected,
            actual: parts.len(),
        });
    }

    let mut sample = TelemetrySample {
        speed: parse_field(&parts, Field::Speed)?,
        rpm: parse_field(&parts, Field::Rpm)?,
        acc_pedal: parse_field(&parts, Field::AccPedal)?,
        brake_pedal: parse_field(&parts, Field::BrakePedal)?,
        encoder_angle: parse_field(&parts, Field::EncoderAngle)?,
        temperature: parse_field(&parts, Field::Temperature)?,
        battery_level: parse_field(&parts, Field::BatteryLevel)?,
        gps_longitude: parse_field(&parts, Field::GpsLongitude)?,
        gps_latitude: parse_field(&parts, Field::GpsLatitude)?,
        speed_fl: parse_field(&parts, Field::SpeedFl)?,
        speed_fr: parse_field(&parts, Field::SpeedFr)?,
        speed_bl: parse_field(&parts, Field::SpeedBl)?,
        speed_br: parse_field(&parts, Field::SpeedBr)?,
        g_forces: None,
    };

    // Base fields are reported before the optional G pair
    if parts.len() >= EXTENDED_FIELDS {
        sample.g_forces = Some(GForces {
            lateral: parse_field(&parts, Field::LateralG)?,
            longitudinal: parse_field(&parts, Field::LongitudinalG)?,
        });
    }
    Ok(sample)
}

fn parse_field<T: FromStr>(parts: &[&str], field: Field) -> Result<T, ParseError> {
    let raw = parts.get(field.index()).map(|s| s.trim()).unwrap_or_default();
    raw.parse().map_err(|_| ParseError::InvalidField {
        field,
        raw: raw.chars().take(MAX_ECHO_CHARS).collect(),
    })
}
