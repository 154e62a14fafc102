//! Pipeline Configuration
//!
//! Loaded from an optional file plus `TELEMETRY_*` environment overrides,
//! e.g. `TELEMETRY_QUEUE_CAPACITY=20000` or `TELEMETRY_MQTT__HOST=broker`.

use crate::error::PipelineError;
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use telemetry_protocol::FrameLayout;
use tracing::info;

/// Environment variable prefix for overrides
pub const ENV_PREFIX: &str = "TELEMETRY";

/// Pipeline configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// UDP port used by the binary
    pub port: u16,
    /// Parser worker count (0 = host core count)
    pub parser_threads: usize,
    /// Maximum queued datagrams
    pub queue_capacity: usize,
    /// Maximum buffered change records
    pub max_pending_changes: usize,
    /// Fraction of `max_pending_changes` that forces an early flush
    pub pending_high_water_ratio: f64,
    /// Batch emitter period (ms)
    pub emit_interval_ms: u64,
    /// Resource monitor period (ms)
    pub monitor_interval_ms: u64,
    /// Queue memory above which the monitor sheds queued datagrams
    pub queue_memory_ceiling_bytes: usize,
    /// How long a worker waits for a datagram before re-checking shutdown (ms)
    pub dequeue_timeout_ms: u64,
    /// Receiver idle wait when the socket has nothing pending (ms)
    pub receive_idle_ms: u64,
    /// Minimum spacing between repeated drop/parse warnings (ms)
    pub drop_log_interval_ms: u64,
    /// Nice value requested for the receiver thread (Linux)
    pub receiver_nice: i32,
    /// Wire frame generation
    pub frame_layout: FrameLayout,
    /// Buffered events per observer before it starts lagging
    pub event_channel_capacity: usize,
    /// Emit JSON log lines
    pub log_json: bool,
    /// Optional broker feeding the same queue
    pub mqtt: Option<MqttConfig>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            port: 5005,
            parser_threads: 0,
            queue_capacity: 10_000,
            max_pending_changes: 10_000,
            pending_high_water_ratio: 0.75,
            emit_interval_ms: 16, // ~60 Hz
            monitor_interval_ms: 5_000,
            queue_memory_ceiling_bytes: 32 * 1024 * 1024,
            dequeue_timeout_ms: 100,
            receive_idle_ms: 5,
            drop_log_interval_ms: 1_000,
            receiver_nice: -10,
            frame_layout: FrameLayout::Standard,
            event_channel_capacity: 1_024,
            log_json: false,
            mqtt: None,
        }
    }
}

impl PipelineConfig {
    /// Load configuration from `path` (if given) and the environment
    pub fn load(path: Option<&Path>) -> Result<Self, PipelineError> {
        let mut builder = Config::builder();
        if let Some(path) = path {
            info!("Loading configuration from {}", path.display());
            builder = builder.add_source(File::from(path).required(true));
        }
        builder = builder.add_source(
            Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let config: PipelineConfig = builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values the pipeline cannot run with
    pub fn validate(&self) -> Result<(), PipelineError> {
        let invalid = |msg: &str| Err(PipelineError::Config(msg.to_string()));

        if self.queue_capacity == 0 {
            return invalid("queue_capacity must be greater than 0");
        }
        if self.max_pending_changes == 0 {
            return invalid("max_pending_changes must be greater than 0");
        }
        if !(self.pending_high_water_ratio > 0.0 && self.pending_high_water_ratio <= 1.0) {
            return invalid("pending_high_water_ratio must be in (0, 1]");
        }
        if self.emit_interval_ms == 0 || self.monitor_interval_ms == 0 {
            return invalid("emit and monitor intervals must be greater than 0");
        }
        if self.dequeue_timeout_ms == 0 || self.receive_idle_ms == 0 {
            return invalid("dequeue and receive timeouts must be greater than 0");
        }
        if self.event_channel_capacity == 0 {
            return invalid("event_channel_capacity must be greater than 0");
        }
        if let Some(mqtt) = &self.mqtt {
            mqtt.validate()?;
        }
        Ok(())
    }

    /// Pending-record count that triggers an out-of-cycle flush
    pub fn pending_high_water(&self) -> usize {
        crate::workers::high_water_mark(self.max_pending_changes, self.pending_high_water_ratio)
    }

    pub fn emit_interval(&self) -> Duration {
        Duration::from_millis(self.emit_interval_ms)
    }

    pub fn monitor_interval(&self) -> Duration {
        Duration::from_millis(self.monitor_interval_ms)
    }

    pub fn dequeue_timeout(&self) -> Duration {
        Duration::from_millis(self.dequeue_timeout_ms)
    }

    pub fn receive_idle(&self) -> Duration {
        Duration::from_millis(self.receive_idle_ms)
    }

    pub fn drop_log_interval(&self) -> Duration {
        Duration::from_millis(self.drop_log_interval_ms)
    }
}

/// Broker subscription settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MqttConfig {
    /// Broker host
    pub host: String,
    /// Broker port (8883 is the usual TLS port)
    pub port: u16,
    /// Connect over TLS using the bundled root certificates
    pub tls: bool,
    /// Topic carrying telemetry frames
    pub topic: String,
    /// Client identifier presented to the broker
    pub client_id: String,
    pub username: Option<String>,
    pub password: Option<String>,
    /// Keep-alive interval (seconds)
    pub keep_alive_secs: u64,
    /// Wait before polling again after a connection error (ms)
    pub reconnect_delay_ms: u64,
    /// Outgoing request buffer of the MQTT client
    pub request_capacity: usize,
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 1883,
            tls: false,
            topic: "vehicle/telemetry".to_string(),
            client_id: "telemetry-ingest".to_string(),
            username: None,
            password: None,
            keep_alive_secs: 30,
            reconnect_delay_ms: 5_000,
            request_capacity: 10,
        }
    }
}

impl MqttConfig {
    /// Reject settings the client cannot use
    pub fn validate(&self) -> Result<(), PipelineError> {
        if self.host.is_empty() {
            return Err(PipelineError::Config("mqtt.host must not be empty".to_string()));
        }
        if self.topic.is_empty() {
            return Err(PipelineError::Config("mqtt.topic must not be empty".to_string()));
        }
        if self.keep_alive_secs < 5 {
            return Err(PipelineError::Config("mqtt.keep_alive_secs must be at least 5".to_string()));
        }
        Ok(())
    }

    pub fn keep_alive(&self) -> Duration {
        Duration::from_secs(self.keep_alive_secs)
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }
}
