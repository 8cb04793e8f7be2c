use std::net::SocketAddr;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use lazy_static::lazy_static;
use prometheus::{Counter, CounterVec, Gauge, HistogramOpts, HistogramVec, Opts, Registry};
use tracing::{error, info};
use warp::Filter;

use crate::device::RunState;

lazy_static! {
    /// Global Prometheus registry
    pub static ref REGISTRY: Registry = Registry::new();

    /// Counter for commands received, by message kind
    pub static ref COMMANDS_TOTAL: CounterVec = CounterVec::new(
        Opts::new("commands_total", "Total number of commands processed by kind"),
        &["kind"]
    ).expect("Failed to create commands counter");

    /// Histogram for command handling time
    pub static ref COMMAND_DURATION: HistogramVec = HistogramVec::new(
        HistogramOpts::new("command_duration_seconds", "Time spent handling a command")
            .buckets(vec![0.00001, 0.0001, 0.001, 0.01, 0.05, 0.1, 0.5, 1.0]),
        &["kind"]
    ).expect("Failed to create command duration histogram");

    /// Counter for instructions executed by the device
    pub static ref INSTRUCTIONS_TOTAL: Counter = Counter::new(
        "cpu_instructions_total", "Total number of instructions executed"
    ).expect("Failed to create instructions counter");

    /// Gauge for the run-state: 0 running, 1 done, 2 crashed
    pub static ref RUN_STATE: Gauge = Gauge::new(
        "cpu_run_state", "Current run-state (0 running, 1 done, 2 crashed)"
    ).expect("Failed to create run-state gauge");

    /// Counter for responses that could not be sent
    pub static ref SEND_FAILURES_TOTAL: Counter = Counter::new(
        "response_send_failures_total", "Responses dropped because the outbound channel refused them"
    ).expect("Failed to create send failures counter");

    /// Counter for records that did not decode as commands
    pub static ref INVALID_COMMANDS_TOTAL: Counter = Counter::new(
        "invalid_commands_total", "Records received that are not valid commands"
    ).expect("Failed to create invalid commands counter");

    /// Counter for failed flash flushes at shutdown
    pub static ref FLUSH_FAILURES_TOTAL: Counter = Counter::new(
        "flash_flush_failures_total", "Failed writes of program memory to its backing file"
    ).expect("Failed to create flush failures counter");
}

/// Register every metric with the global registry. Call once at startup.
pub fn init_metrics() {
    REGISTRY
        .register(Box::new(COMMANDS_TOTAL.clone()))
        .expect("Failed to register commands counter");

    REGISTRY
        .register(Box::new(COMMAND_DURATION.clone()))
        .expect("Failed to register command duration histogram");

    REGISTRY
        .register(Box::new(INSTRUCTIONS_TOTAL.clone()))
        .expect("Failed to register instructions counter");

    REGISTRY
        .register(Box::new(RUN_STATE.clone()))
        .expect("Failed to register run-state gauge");

    REGISTRY
        .register(Box::new(SEND_FAILURES_TOTAL.clone()))
        .expect("Failed to register send failures counter");

    REGISTRY
        .register(Box::new(INVALID_COMMANDS_TOTAL.clone()))
        .expect("Failed to register invalid commands counter");

    REGISTRY
        .register(Box::new(FLUSH_FAILURES_TOTAL.clone()))
        .expect("Failed to register flush failures counter");
}

/// Record a handled command
pub fn record_command(kind: &str, duration: Duration) {
    COMMANDS_TOTAL.with_label_values(&[kind]).inc();
    COMMAND_DURATION
        .with_label_values(&[kind])
        .observe(duration.as_secs_f64());
}

pub fn record_instructions(count: u64) {
    INSTRUCTIONS_TOTAL.inc_by(count as f64);
}

pub fn set_run_state(state: RunState) {
    let value = match state {
        RunState::Running => 0.0,
        RunState::Done => 1.0,
        RunState::Crashed => 2.0,
    };
    RUN_STATE.set(value);
}

pub fn record_send_failure() {
    SEND_FAILURES_TOTAL.inc();
}

pub fn record_invalid_command() {
    INVALID_COMMANDS_TOTAL.inc();
}

pub fn record_flush_failure() {
    FLUSH_FAILURES_TOTAL.inc();
}

/// Helper struct for timing operations
pub struct Timer {
    start: Instant,
}

impl Timer {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }
}

impl Default for Timer {
    fn default() -> Self {
        Self::new()
    }
}

/// Registry contents in the Prometheus text format.
pub fn gather_text() -> Result<String, prometheus::Error> {
    let encoder = prometheus::TextEncoder::new();
    encoder.encode_to_string(&REGISTRY.gather())
}

/// Serve `/metrics` on `addr` from a dedicated thread with its own runtime.
/// The exporter only reads the registry, never the device.
pub fn spawn_exporter(addr: SocketAddr) -> std::io::Result<JoinHandle<()>> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;

    std::thread::Builder::new()
        .name("metrics-exporter".to_string())
        .spawn(move || {
            runtime.block_on(async move {
                let route = warp::path("metrics")
                    .and(warp::path::end())
                    .and(warp::get())
                    .and_then(metrics_handler);

                match warp::serve(route).try_bind_ephemeral(addr) {
                    Ok((bound, server)) => {
                        info!(addr = %bound, "metrics exporter listening");
                        server.await;
                    }
                    Err(err) => error!(%addr, error = %err, "metrics exporter failed to bind"),
                }
            })
        })
}

async fn metrics_handler() -> Result<impl warp::Reply, warp::Rejection> {
    match gather_text() {
        Ok(metrics_text) => Ok(warp::reply::with_header(
            metrics_text,
            "content-type",
            "text/plain; version=0.0.4",
        )),
        Err(_) => Ok(warp::reply::with_header(
            "Error encoding metrics".to_string(),
            "content-type",
            "text/plain",
        )),
    }
}
