//! Run-mode controller
//!
//! The mode is dispatched exactly once at startup:
//!
//! ```text
//! Initializing -> ServerRunning | JobRunning | AgentRunning -> ShuttingDown -> Terminated
//! ```
//!
//! Shutdown order is fixed: grace wait, stop the load generator, close
//! the listener and drain in-flight requests, cancel remaining timers.

use crate::config::{ProcessConfig, RunMode};
use crate::job::{execute_job, JobError, JobRecord, JOB_LOG};
use crate::server::{
    bind_listener, create_metrics, listener_close, serve, AppState, HealthState,
    TerminationSignals, Timers,
};
use crate::sink::FileSink;
use chrono::{DateTime, Utc};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::net::TcpListener;
use tracing::{error, info};

/// Agent heartbeat period
pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(10);

#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("failed to register signal handlers: {0}")]
    Signals(#[source] std::io::Error),

    #[error("failed to bind listener on port {port}: {source}")]
    Bind {
        port: u16,
        #[source]
        source: std::io::Error,
    },

    #[error("metrics registry error: {0}")]
    Metrics(#[from] prometheus::Error),

    #[error("server error: {0}")]
    Serve(#[source] std::io::Error),

    #[error("server task failed: {0}")]
    Join(#[from] tokio::task::JoinError),

    #[error(transparent)]
    Job(#[from] JobError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Initializing,
    ServerRunning,
    JobRunning,
    AgentRunning,
    ShuttingDown,
    Terminated,
}

/// Current lifecycle phase, logged on every transition
#[derive(Debug)]
pub struct Lifecycle {
    phase: Phase,
}

impl Lifecycle {
    pub fn new() -> Self {
        Self {
            phase: Phase::Initializing,
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn enter(&mut self, next: Phase) {
        info!(from = ?self.phase, to = ?next, "Lifecycle transition");
        self.phase = next;
    }

    /// Running phase for a listener-backed mode
    fn running_phase(mode: RunMode) -> Phase {
        match mode {
            RunMode::Server => Phase::ServerRunning,
            RunMode::Agent => Phase::AgentRunning,
            RunMode::Job => Phase::JobRunning,
        }
    }
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self::new()
    }
}

/// Entry point: dispatch on the configured mode
pub async fn run(config: ProcessConfig) -> Result<(), RuntimeError> {
    match config.mode {
        RunMode::Job => run_job(&config).await.map(|_| ()),
        RunMode::Server | RunMode::Agent => {
            let signals = TerminationSignals::register().map_err(RuntimeError::Signals)?;
            let listener = bind_listener(config.port)
                .await
                .map_err(|source| RuntimeError::Bind {
                    port: config.port,
                    source,
                })?;

            run_listener(config, listener, signals.first()).await
        }
    }
}

/// Job mode: one record to `<DATA_DIR>/job.log`, then report the outcome
///
/// No listener is ever opened.
pub async fn run_job(config: &ProcessConfig) -> Result<JobRecord, RuntimeError> {
    let mut lifecycle = Lifecycle::new();
    lifecycle.enter(Phase::JobRunning);

    let sink = FileSink::in_dir(&config.data_dir, JOB_LOG);
    let outcome = execute_job(config, &sink, &mut rand::rng()).await;

    match &outcome {
        Ok(record) => info!(nonce = %record.nonce, file = %sink.path().display(), "Job succeeded"),
        Err(e) => error!(error = %e, "Job failed"),
    }
    lifecycle.enter(Phase::Terminated);
    outcome.map_err(RuntimeError::from)
}

/// One agent heartbeat
#[derive(Debug, Clone)]
pub struct Heartbeat {
    pub ts: DateTime<Utc>,
    pub host: String,
    pub node: String,
}

impl Heartbeat {
    pub fn now(config: &ProcessConfig) -> Self {
        Self {
            ts: Utc::now(),
            host: config.hostname.clone(),
            node: config.node_name.clone(),
        }
    }

    /// Log under the `heartbeat` target with one field per attribute
    pub fn emit(&self) {
        info!(
            target: "heartbeat",
            ts = %self.ts.to_rfc3339(),
            host = %self.host,
            node = %self.node,
            "heartbeat"
        );
    }
}

async fn heartbeat(config: Arc<ProcessConfig>, period: Duration) {
    let mut ticker = tokio::time::interval(period);
    loop {
        ticker.tick().await;
        Heartbeat::now(&config).emit();
    }
}

/// Server and agent modes: serve on `listener` until `stop` resolves,
/// then run the shutdown sequence
///
/// `stop` resolves with the name of the signal that triggered shutdown.
pub async fn run_listener<S>(
    config: ProcessConfig,
    listener: TcpListener,
    stop: S,
) -> Result<(), RuntimeError>
where
    S: Future<Output = &'static str>,
{
    let mut lifecycle = Lifecycle::new();
    let config = Arc::new(config);
    let timers = Timers::new();

    let health = HealthState::new(config.startup_delay.is_zero());
    if !config.startup_delay.is_zero() {
        let flip = health.clone();
        let delay_ms = config.startup_delay.as_millis() as u64;
        timers.schedule(config.startup_delay, move || {
            flip.set_ready(true);
            info!(delay_ms = delay_ms, "Startup delay elapsed, marked ready");
        });
        info!(delay_ms = delay_ms, "Not ready until startup delay elapses");
    }

    let metrics = create_metrics()?;
    let state = AppState::new(config.clone(), health, metrics, timers.clone());

    if config.mode == RunMode::Agent {
        timers.spawn(heartbeat(config.clone(), HEARTBEAT_INTERVAL));
    }

    let (close, close_signal) = listener_close();
    let mut server = tokio::spawn(serve(listener, state.clone(), close_signal));
    lifecycle.enter(Lifecycle::running_phase(config.mode));

    let signal_name = tokio::select! {
        name = stop => name,
        joined = &mut server => {
            // The server only returns on its own when accepting fails.
            timers.cancel_all();
            state.load.stop();
            return match joined? {
                Ok(()) => Ok(()),
                Err(e) => Err(RuntimeError::Serve(e)),
            };
        }
    };

    lifecycle.enter(Phase::ShuttingDown);
    info!(
        signal = signal_name,
        grace_ms = config.graceful.as_millis() as u64,
        "Starting graceful shutdown"
    );

    tokio::time::sleep(config.graceful).await;

    state.load.stop();

    close.close();
    let served = server.await;

    timers.cancel_all();
    lifecycle.enter(Phase::Terminated);

    served?.map_err(RuntimeError::Serve)?;
    info!("Shut down gracefully");
    Ok(())
}

#[cfg(test)]
#[path = "runtime_test.rs"]
mod tests;
