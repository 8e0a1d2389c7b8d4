//! Liveness and readiness state
//!
//! - liveness: should the supervisor keep this process? (`/healthz`)
//! - readiness: should this process receive traffic? (`/readyz`)
//!
//! Liveness is never restored automatically once cleared; only an
//! explicit override or a restart sets it back.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Shared, cloneable health flags
#[derive(Debug, Clone)]
pub struct HealthState {
    healthy: Arc<AtomicBool>,
    ready: Arc<AtomicBool>,
}

impl HealthState {
    /// Healthy, with readiness as given
    pub fn new(ready: bool) -> Self {
        Self {
            healthy: Arc::new(AtomicBool::new(true)),
            ready: Arc::new(AtomicBool::new(ready)),
        }
    }

    pub fn is_healthy(&self) -> bool {
        self.healthy.load(Ordering::SeqCst)
    }

    pub fn set_healthy(&self, healthy: bool) {
        self.healthy.store(healthy, Ordering::SeqCst);
    }

    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    pub fn set_ready(&self, ready: bool) {
        self.ready.store(ready, Ordering::SeqCst);
    }
}

impl Default for HealthState {
    fn default() -> Self {
        Self::new(true)
    }
}
