//! Pipeline Lifecycle
//!
//! Owns every stage and moves them through
//! `Stopped -> Starting -> Running -> Stopping -> Stopped`.

use crate::config::{MqttConfig, PipelineConfig};
use crate::counters::{CountersSnapshot, PipelineCounters};
use crate::emitter::BatchEmitter;
use crate::error::PipelineError;
use crate::event::TelemetryEvent;
use crate::ingress::Ingress;
use crate::monitor::ResourceMonitor;
use crate::mqtt::MqttSource;
use crate::receiver::{self, Receiver, ReceiverOptions};
use crate::throttle::LogThrottle;
use crate::workers::{WorkerContext, WorkerPool};
use datagram_queue::DatagramQueue;
use state_store::{StateStore, TelemetrySnapshot};
use telemetry_protocol::decode_frame;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::sync::{broadcast, watch, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Stopped,
    Starting,
    Running,
    Stopping,
}

/// Parser worker count for a requested value: 0 selects the host core
/// count, anything above twice the core count is capped
pub fn resolve_parser_threads(requested: usize) -> usize {
    let cores = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1);
    if requested == 0 {
        cores
    } else {
        requested.min(cores * 2)
    }
}

/// Stages that only exist between `start` and `stop`
struct Running {
    queue: Arc<DatagramQueue>,
    receiving: Arc<AtomicBool>,
    receiver: Receiver,
    workers: WorkerPool,
    shutdown: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
    ingress: Ingress,
    runtime: Handle,
}

/// Telemetry ingestion pipeline
pub struct Pipeline {
    config: PipelineConfig,
    parser_threads: usize,
    state: PipelineState,
    store: Arc<StateStore>,
    counters: Arc<PipelineCounters>,
    events: broadcast::Sender<TelemetryEvent>,
    running: Option<Running>,
}

impl Pipeline {
    pub fn new(config: PipelineConfig) -> Self {
        let (events, _) = broadcast::channel(config.event_channel_capacity.max(1));
        Self {
            parser_threads: resolve_parser_threads(config.parser_threads),
            store: Arc::new(StateStore::new(config.max_pending_changes)),
            counters: Arc::new(PipelineCounters::new()),
            state: PipelineState::Stopped,
            events,
            running: None,
            config,
        }
    }

    pub fn state(&self) -> PipelineState {
        self.state
    }

    pub fn is_running(&self) -> bool {
        self.state == PipelineState::Running
    }

    /// Receive field changes and errors from now on
    pub fn subscribe(&self) -> broadcast::Receiver<TelemetryEvent> {
        self.events.subscribe()
    }

    pub fn store(&self) -> Arc<StateStore> {
        Arc::clone(&self.store)
    }

    /// Current value of every field
    pub fn snapshot(&self) -> TelemetrySnapshot {
        self.store.snapshot()
    }

    pub fn counters(&self) -> CountersSnapshot {
        self.counters.snapshot()
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Address the UDP socket is bound to while running
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.running.as_ref().map(|r| r.receiver.local_addr())
    }

    /// Handle for pushing payloads from another transport while running
    pub fn ingress(&self) -> Option<Ingress> {
        self.running.as_ref().map(|r| r.ingress.for_source("external"))
    }

    /// Set the worker count used by the next `start`
    pub fn set_parser_thread_count(&mut self, count: usize) {
        self.parser_threads = resolve_parser_threads(count);
        self.config.parser_threads = count;
        if self.running.is_some() {
            info!("Parser thread count set to {} (applies on next start)", self.parser_threads);
        }
    }

    pub fn parser_thread_count(&self) -> usize {
        self.parser_threads
    }

    /// Set the queue capacity used by the next `start`
    pub fn set_queue_capacity(&mut self, capacity: usize) {
        self.config.queue_capacity = capacity.max(1);
    }

    pub fn queue_capacity(&self) -> usize {
        self.config.queue_capacity
    }

    /// Set the pending-change bound; takes effect on the next write
    pub fn set_max_pending_changes(&mut self, max: usize) {
        self.config.max_pending_changes = max.max(1);
        self.store.set_max_pending(self.config.max_pending_changes);
    }

    pub fn max_pending_changes(&self) -> usize {
        self.store.max_pending()
    }

    /// Bind `port` and start every stage.
    ///
    /// An invalid configuration or a bind failure leaves the pipeline
    /// stopped; a bind failure is also published as an error event.
    pub async fn start(&mut self, port: u16) -> Result<(), PipelineError> {
        if self.state != PipelineState::Stopped {
            return Err(PipelineError::AlreadyRunning);
        }
        self.config.validate()?;
        self.state = PipelineState::Starting;
        info!("Starting telemetry pipeline on port {}", port);

        match self.launch(port) {
            Ok(running) => {
                let addr = running.receiver.local_addr();
                self.running = Some(running);
                self.state = PipelineState::Running;
                info!(
                    "Telemetry pipeline running on {} ({} parser threads, queue capacity {})",
                    addr, self.parser_threads, self.config.queue_capacity
                );
            }
            Err(e) => {
                self.state = PipelineState::Stopped;
                error!("Failed to start telemetry pipeline: {}", e);
                let _ = self.events.send(TelemetryEvent::Error(e.clone()));
                return Err(e);
            }
        }

        if let Some(mqtt) = self.config.mqtt.clone() {
            if let Err(e) = self.attach_mqtt(mqtt) {
                warn!("MQTT source not attached: {}", e);
            }
        }
        Ok(())
    }

    fn launch(&self, port: u16) -> Result<Running, PipelineError> {
        let socket = receiver::bind(port)?;
        let runtime = Handle::current();

        let queue = Arc::new(DatagramQueue::new(self.config.queue_capacity));
        let flush = Arc::new(Notify::new());
        let drop_log = Arc::new(LogThrottle::new(self.config.drop_log_interval()));
        let ingress = Ingress::new(Arc::clone(&queue), Arc::clone(&self.counters), drop_log, "udp");

        let ctx = Arc::new(WorkerContext {
            queue: Arc::clone(&queue),
            store: Arc::clone(&self.store),
            counters: Arc::clone(&self.counters),
            events: self.events.clone(),
            flush: Arc::clone(&flush),
            layout: self.config.frame_layout,
            decoder: decode_frame,
            high_water_ratio: self.config.pending_high_water_ratio,
            dequeue_timeout: self.config.dequeue_timeout(),
            parse_log: LogThrottle::new(self.config.drop_log_interval()),
        });
        let workers = WorkerPool::spawn(self.parser_threads, ctx)?;

        let receiving = Arc::new(AtomicBool::new(true));
        let receiver = match Receiver::spawn(
            socket,
            ingress.clone(),
            Arc::clone(&receiving),
            ReceiverOptions {
                idle: self.config.receive_idle(),
                nice: self.config.receiver_nice,
                error_log_interval: self.config.drop_log_interval(),
            },
        ) {
            Ok(receiver) => receiver,
            Err(e) => {
                queue.shutdown();
                workers.join();
                return Err(e);
            }
        };

        let (shutdown, shutdown_rx) = watch::channel(false);
        let emitter = BatchEmitter::new(
            Arc::clone(&self.store),
            Arc::clone(&self.counters),
            self.events.clone(),
            flush,
            self.config.emit_interval(),
        );
        let monitor = ResourceMonitor::new(
            Arc::clone(&queue),
            Arc::clone(&self.store),
            Arc::clone(&self.counters),
            self.config.queue_memory_ceiling_bytes,
        );
        let tasks = vec![
            runtime.spawn(emitter.run(shutdown_rx.clone())),
            runtime.spawn(monitor.run(self.config.monitor_interval(), shutdown_rx)),
        ];

        Ok(Running {
            queue,
            receiving,
            receiver,
            workers,
            shutdown,
            tasks,
            ingress,
            runtime,
        })
    }

    /// Subscribe to a broker topic feeding the same queue
    pub fn attach_mqtt(&mut self, config: MqttConfig) -> Result<(), PipelineError> {
        config.validate()?;
        let running = self.running.as_mut().ok_or(PipelineError::NotRunning)?;

        let source = MqttSource::new(config, running.ingress.for_source("mqtt"), self.events.clone());
        let task = running.runtime.spawn(source.run(running.shutdown.subscribe()));
        running.tasks.push(task);
        Ok(())
    }

    /// Stop every stage and discard queued datagrams and pending changes.
    /// Does nothing when already stopped.
    pub async fn stop(&mut self) {
        let Some(running) = self.running.take() else {
            return;
        };
        self.state = PipelineState::Stopping;
        info!("Stopping telemetry pipeline");

        let Running {
            queue,
            receiving,
            receiver,
            workers,
            shutdown,
            tasks,
            ..
        } = running;

        receiving.store(false, Ordering::Release);
        queue.shutdown();
        let _ = shutdown.send(true);

        let joined = tokio::task::spawn_blocking(move || {
            receiver.join();
            workers.join();
        })
        .await;
        if let Err(e) = joined {
            warn!("Joining pipeline threads failed: {}", e);
        }

        for task in tasks {
            if let Err(e) = task.await {
                warn!("Pipeline task ended abnormally: {}", e);
            }
        }

        let discarded = queue.clear();
        let pending = self.store.clear_pending();
        debug!(discarded, pending, "Discarded undelivered work");

        self.state = PipelineState::Stopped;
        info!("Telemetry pipeline stopped");
    }
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        if let Some(running) = self.running.take() {
            // Threads exit on their own once signalled; tasks are cancelled
            running.receiving.store(false, Ordering::Release);
            running.queue.shutdown();
            let _ = running.shutdown.send(true);
            for task in &running.tasks {
                task.abort();
            }
        }
    }
}
