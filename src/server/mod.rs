//! HTTP surface of the workload simulator
//!
//! Provides Kubernetes probes (`/healthz`, `/readyz`), fault-injection
//! endpoints, Prometheus metrics, and graceful shutdown handling for
//! SIGTERM/SIGINT.

pub mod handlers;
mod health;
pub mod load;
pub mod metrics;
pub mod shutdown;
pub mod timers;

pub use handlers::{bind_listener, build_router, serve, AppState};
pub use health::HealthState;
pub use load::{BackgroundLoad, LoadSettings};
pub use metrics::{create_metrics, SharedMetrics};
pub use shutdown::{listener_close, CloseHandle, CloseSignal, TerminationSignals};
pub use timers::Timers;

#[cfg(test)]
#[path = "health_test.rs"]
mod health_tests;

#[cfg(test)]
#[path = "handlers_test.rs"]
mod handlers_tests;

#[cfg(test)]
#[path = "shutdown_test.rs"]
mod shutdown_tests;
