//! Point-in-time view of every field

use serde::{Deserialize, Serialize};
use telemetry_protocol::{Field, FieldValue};

/// Current value of every telemetry field
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TelemetrySnapshot {
    pub speed: f32,
    pub rpm: i32,
    pub acc_pedal: i32,
    pub brake_pedal: i32,
    pub encoder_angle: f64,
    pub temperature: f32,
    pub battery_level: i32,
    pub gps_longitude: f64,
    pub gps_latitude: f64,
    #[serde(rename = "speedFL")]
    pub speed_fl: i32,
    #[serde(rename = "speedFR")]
    pub speed_fr: i32,
    #[serde(rename = "speedBL")]
    pub speed_bl: i32,
    #[serde(rename = "speedBR")]
    pub speed_br: i32,
    pub lateral_g: f64,
    pub longitudinal_g: f64,
}

impl TelemetrySnapshot {
    /// Build a snapshot by reading each field
    pub fn from_fn(read: impl Fn(Field) -> FieldValue) -> Self {
        let f32_of = |field| match read(field) {
            FieldValue::F32(v) => v,
            other => other.as_f64() as f32,
        };
        let i32_of = |field| match read(field) {
            FieldValue::I32(v) => v,
            other => other.as_f64() as i32,
        };
        let f64_of = |field| read(field).as_f64();

        Self {
            speed: f32_of(Field::Speed),
            rpm: i32_of(Field::Rpm),
            acc_pedal: i32_of(Field::AccPedal),
            brake_pedal: i32_of(Field::BrakePedal),
            encoder_angle: f64_of(Field::EncoderAngle),
            temperature: f32_of(Field::Temperature),
            battery_level: i32_of(Field::BatteryLevel),
            gps_longitude: f64_of(Field::GpsLongitude),
            gps_latitude: f64_of(Field::GpsLatitude),
            speed_fl: i32_of(Field::SpeedFl),
            speed_fr: i32_of(Field::SpeedFr),
            speed_bl: i32_of(Field::SpeedBl),
            speed_br: i32_of(Field::SpeedBr),
            lateral_g: f64_of(Field::LateralG),
            longitudinal_g: f64_of(Field::LongitudinalG),
        }
    }

    /// Value of one field
    pub fn get(&self, field: Field) -> FieldValue {
        match field {
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
            Field::LateralG => FieldValue::F64(self.lateral_g),
            Field::LongitudinalG => FieldValue::F64(self.longitudinal_g),
        }
    }
}
