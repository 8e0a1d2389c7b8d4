//! Background synthetic load generator
//!
//! At most one generator runs at a time. Starting a new one aborts the
//! previous task first; stopping with nothing active is a no-op.

use crate::server::metrics::SharedMetrics;
use crate::stress::burn_cpu;
use serde::Serialize;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::info;

/// Smallest tick interval accepted; a zero interval would spin forever
pub const MIN_INTERVAL: Duration = Duration::from_millis(1);

/// Parameters of a running generator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct LoadSettings {
    pub cpu_ms: u64,
    pub interval_ms: u64,
}

struct LoadGenerator {
    settings: LoadSettings,
    task: JoinHandle<()>,
}

#[derive(Clone)]
pub struct BackgroundLoad {
    active: Arc<Mutex<Option<LoadGenerator>>>,
    metrics: SharedMetrics,
}

impl BackgroundLoad {
    pub fn new(metrics: SharedMetrics) -> Self {
        Self {
            active: Arc::new(Mutex::new(None)),
            metrics,
        }
    }

    /// Replace any running generator with one burning `cpu_burn` every `interval`
    pub fn start(&self, cpu_burn: Duration, interval: Duration) -> LoadSettings {
        let interval = interval.max(MIN_INTERVAL);
        let settings = LoadSettings {
            cpu_ms: cpu_burn.as_millis() as u64,
            interval_ms: interval.as_millis() as u64,
        };

        let mut active = self.lock();
        if let Some(previous) = active.take() {
            previous.task.abort();
            info!(
                cpu_ms = previous.settings.cpu_ms,
                interval_ms = previous.settings.interval_ms,
                "Replaced running load generator"
            );
        }

        let metrics = self.metrics.clone();
        let task = tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + interval, interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                burn_cpu(cpu_burn);
                metrics.record_load_tick();
            }
        });

        *active = Some(LoadGenerator { settings, task });
        self.metrics.set_load_active(true);
        info!(
            cpu_ms = settings.cpu_ms,
            interval_ms = settings.interval_ms,
            "Load generator started"
        );
        settings
    }

    /// Stop the running generator; returns its settings if one was active
    pub fn stop(&self) -> Option<LoadSettings> {
        let stopped = self.lock().take().map(|generator| {
            generator.task.abort();
            generator.settings
        });

        self.metrics.set_load_active(false);
        if let Some(settings) = stopped {
            info!(
                cpu_ms = settings.cpu_ms,
                interval_ms = settings.interval_ms,
                "Load generator stopped"
            );
        }
        stopped
    }

    /// Settings of the running generator, if any
    pub fn current(&self) -> Option<LoadSettings> {
        self.lock().as_ref().map(|generator| generator.settings)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Option<LoadGenerator>> {
        self.active
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
