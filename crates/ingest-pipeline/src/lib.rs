//! Telemetry Ingestion Pipeline
//!
//! Receives telemetry datagrams, parses them on a worker pool and publishes
//! the latest value of every field with debounced change notifications.
//!
//! ```text
//! socket -> receiver -> bounded queue -> parser workers -> state store
//!                          ^                                   |
//!                     MQTT source                        batch emitter -> observers
//! ```

mod config;
mod counters;
mod emitter;
mod error;
mod event;
mod ingress;
mod monitor;
mod mqtt;
mod pipeline;
mod receiver;
mod throttle;
mod workers;

pub use config::{MqttConfig, PipelineConfig};
pub use counters::{CountersSnapshot, PipelineCounters};
pub use error::PipelineError;
pub use event::TelemetryEvent;
pub use ingress::Ingress;
pub use monitor::MonitorReport;
pub use pipeline::{resolve_parser_threads, Pipeline, PipelineState};
pub use throttle::LogThrottle;

pub use state_store::{FieldChange, TelemetrySnapshot};
pub use telemetry_protocol::{Field, FieldValue, FrameLayout, ParseError, TelemetrySample};

use tracing::Level;
use tracing_subscriber::FmtSubscriber;

/// Initialize logging
pub fn init_logging(json: bool) {
    let builder = FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .with_target(true);

    let result = if json {
        tracing::subscriber::set_global_default(builder.json().finish())
    } else {
        tracing::subscriber::set_global_default(builder.finish())
    };

    if let Err(e) = result {
        eprintln!("Tracing subscriber already set: {}", e);
    }
}
