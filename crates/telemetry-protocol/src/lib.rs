//! Vehicle Telemetry Frame Protocol
//!
//! This crate defines the telemetry fields carried by the dashboard link and
//! decodes the comma-separated text frames that arrive over UDP or MQTT.

mod error;
mod field;
mod frame;

pub use error::ParseError;
pub use field::{Field, FieldKind, FieldValue};
pub use frame::{decode_frame, FrameLayout, GForces, TelemetrySample, DELIMITER};

/// Field counts for each supported frame layout
pub mod layout {
    /// Base frame: speed through the four wheel speeds
    pub const BASE_FIELDS: usize = 13;
    /// Base frame plus lateral and longitudinal G
    pub const EXTENDED_FIELDS: usize = 15;
}
