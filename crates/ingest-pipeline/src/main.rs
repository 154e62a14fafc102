//! Telemetry Ingest - Main Entry Point
//!
//! Usage: `telemetry-ingest [config-file]`

use anyhow::Context;
use ingest_pipeline::{init_logging, Pipeline, PipelineConfig, TelemetryEvent};
use std::path::PathBuf;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let path = std::env::args_os().nth(1).map(PathBuf::from);
    let config = PipelineConfig::load(path.as_deref()).context("loading configuration")?;
    init_logging(config.log_json);

    info!("=== Telemetry Ingest v{} ===", env!("CARGO_PKG_VERSION"));

    let port = config.port;
    let mut pipeline = Pipeline::new(config);
    let mut events = pipeline.subscribe();
    pipeline
        .start(port)
        .await
        .with_context(|| format!("starting pipeline on UDP port {}", port))?;

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            result = &mut shutdown => {
                if let Err(e) = result {
                    warn!("Signal handler failed: {}", e);
                }
                info!("Shutdown requested");
                break;
            }
            event = events.recv() => match event {
                Ok(TelemetryEvent::FieldChanged(change)) => {
                    debug!(field = %change.field, value = %change.value, "Field changed");
                }
                Ok(TelemetryEvent::Error(e)) => {
                    debug!("Pipeline error: {}", e);
                }
                Err(RecvError::Lagged(missed)) => {
                    debug!(missed, "Event listener lagging");
                }
                Err(RecvError::Closed) => break,
            },
        }
    }

    pipeline.stop().await;

    let snapshot = serde_json::to_string(&pipeline.snapshot()).context("encoding snapshot")?;
    let counters = serde_json::to_string(&pipeline.counters()).context("encoding counters")?;
    info!("Final snapshot: {}", snapshot);
    info!("Final counters: {}", counters);

    Ok(())
}
