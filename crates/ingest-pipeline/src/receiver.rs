//! UDP Receiver
//!
//! Dedicated OS thread that drains the socket into the datagram queue. It
//! never parses, so a burst of traffic only costs one copy per datagram.

use crate::error::PipelineError;
use crate::ingress::Ingress;
use crate::throttle::LogThrottle;
use std::io::ErrorKind;
use std::net::{SocketAddr, UdpSocket};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Largest UDP payload
pub const MAX_DATAGRAM_SIZE: usize = 65_536;

/// Pause after an unexpected socket error
const ERROR_BACKOFF: Duration = Duration::from_millis(10);

/// Bind the telemetry socket on every interface
pub fn bind(port: u16) -> Result<UdpSocket, PipelineError> {
    UdpSocket::bind(("0.0.0.0", port)).map_err(|e| PipelineError::Bind {
        port,
        reason: e.to_string(),
    })
}

/// Receiver settings
#[derive(Debug, Clone)]
pub struct ReceiverOptions {
    /// Socket read timeout while idle
    pub idle: Duration,
    /// Requested nice value for the thread
    pub nice: i32,
    /// Spacing of socket error warnings
    pub error_log_interval: Duration,
}

/// Running receiver thread
pub struct Receiver {
    handle: JoinHandle<()>,
    local_addr: SocketAddr,
}

impl Receiver {
    /// Start reading `socket` until `running` is cleared
    pub fn spawn(
        socket: UdpSocket,
        ingress: Ingress,
        running: Arc<AtomicBool>,
        options: ReceiverOptions,
    ) -> Result<Self, PipelineError> {
        let spawn_err = |e: std::io::Error| PipelineError::Spawn {
            name: "udp-receiver".to_string(),
            reason: e.to_string(),
        };

        let local_addr = socket.local_addr().map_err(spawn_err)?;
        socket
            .set_read_timeout(Some(options.idle.max(Duration::from_millis(1))))
            .map_err(spawn_err)?;

        let handle = thread::Builder::new()
            .name("udp-receiver".to_string())
            .spawn(move || receive_loop(socket, ingress, running, options))
            .map_err(spawn_err)?;

        info!("UDP receiver listening on {}", local_addr);
        Ok(Self { handle, local_addr })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Wait for the thread to exit
    pub fn join(self) {
        if self.handle.join().is_err() {
            warn!("UDP receiver thread panicked");
        }
    }
}

fn receive_loop(socket: UdpSocket, ingress: Ingress, running: Arc<AtomicBool>, options: ReceiverOptions) {
    raise_priority(options.nice);

    let error_log = LogThrottle::new(options.error_log_interval);
    let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];
    let mut window_start = Instant::now();
    let mut window_count: u64 = 0;
    let mut window_bytes: u64 = 0;

    while running.load(Ordering::Acquire) {
        match socket.recv(&mut buf) {
            Ok(len) => {
                ingress.offer(buf[..len].to_vec());
                window_count += 1;
                window_bytes += len as u64;
            }
            Err(e) if is_idle(e.kind()) => {}
            Err(e) => {
                if let Some(suppressed) = error_log.allow() {
                    warn!(suppressed, "UDP receive error: {}", e);
                }
                thread::sleep(ERROR_BACKOFF);
            }
        }

        let elapsed = window_start.elapsed();
        if elapsed >= Duration::from_secs(1) {
            if window_count > 0 {
                debug!(
                    datagrams_per_sec = window_count as f64 / elapsed.as_secs_f64(),
                    bytes_per_sec = window_bytes as f64 / elapsed.as_secs_f64(),
                    "Receiver throughput"
                );
            }
            window_start = Instant::now();
            window_count = 0;
            window_bytes = 0;
        }
    }

    debug!("UDP receiver stopped");
}

fn is_idle(kind: ErrorKind) -> bool {
    matches!(kind, ErrorKind::WouldBlock | ErrorKind::TimedOut | ErrorKind::Interrupted)
}

#[cfg(target_os = "linux")]
fn raise_priority(nice: i32) {
    // PRIO_PROCESS with a thread id targets just this thread on Linux
    let tid = unsafe { libc::syscall(libc::SYS_gettid) } as libc::id_t;
    let rc = unsafe { libc::setpriority(libc::PRIO_PROCESS, tid, nice) };
    if rc != 0 {
        debug!(
            nice,
            "Could not raise receiver priority: {}",
            std::io::Error::last_os_error()
        );
    }
}

#[cfg(not(target_os = "linux"))]
fn raise_priority(_nice: i32) {}
