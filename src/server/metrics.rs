//! Prometheus metrics for the workload simulator
//!
//! Every completed request is observed into
//! `http_request_duration_seconds{route, method, status_code}`. Nothing is
//! reset during the process lifetime.

use crate::server::health::HealthState;
use axum::{
    body::Body,
    extract::{MatchedPath, State},
    http::Request,
    middleware::Next,
    response::Response,
};
use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounter, IntGauge, Opts, Registry, TextEncoder,
};
use std::sync::Arc;
use std::time::Instant;
use tracing::debug;

/// Fixed latency bucket boundaries, in seconds
pub const LATENCY_BUCKETS: &[f64] = &[0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.0, 5.0];

/// Metrics handle shared between handlers and the middleware
pub type SharedMetrics = Arc<WorkloadMetrics>;

pub struct WorkloadMetrics {
    registry: Registry,
    request_duration: HistogramVec,
    retained_buffers: IntGauge,
    retained_bytes: IntGauge,
    load_active: IntGauge,
    load_ticks: IntCounter,
    healthy: IntGauge,
    ready: IntGauge,
}

/// Build the registry with process metrics and workload metrics registered
pub fn create_metrics() -> Result<SharedMetrics, prometheus::Error> {
    let registry = Registry::new();

    #[cfg(target_os = "linux")]
    registry.register(Box::new(
        prometheus::process_collector::ProcessCollector::for_self(),
    ))?;

    let request_duration = HistogramVec::new(
        HistogramOpts::new(
            "http_request_duration_seconds",
            "HTTP request latency by route, method and status code",
        )
        .buckets(LATENCY_BUCKETS.to_vec()),
        &["route", "method", "status_code"],
    )?;
    registry.register(Box::new(request_duration.clone()))?;

    let retained_buffers = IntGauge::with_opts(Opts::new(
        "workload_retained_buffers",
        "Number of deliberately leaked buffers",
    ))?;
    registry.register(Box::new(retained_buffers.clone()))?;

    let retained_bytes = IntGauge::with_opts(Opts::new(
        "workload_retained_bytes",
        "Total bytes held by deliberately leaked buffers",
    ))?;
    registry.register(Box::new(retained_bytes.clone()))?;

    let load_active = IntGauge::with_opts(Opts::new(
        "workload_load_generator_active",
        "1 while a background load generator is running",
    ))?;
    registry.register(Box::new(load_active.clone()))?;

    let load_ticks = IntCounter::with_opts(Opts::new(
        "workload_load_ticks_total",
        "Background load generator ticks executed",
    ))?;
    registry.register(Box::new(load_ticks.clone()))?;

    let healthy = IntGauge::with_opts(Opts::new("workload_healthy", "Current liveness flag"))?;
    registry.register(Box::new(healthy.clone()))?;

    let ready = IntGauge::with_opts(Opts::new("workload_ready", "Current readiness flag"))?;
    registry.register(Box::new(ready.clone()))?;

    Ok(Arc::new(WorkloadMetrics {
        registry,
        request_duration,
        retained_buffers,
        retained_bytes,
        load_active,
        load_ticks,
        healthy,
        ready,
    }))
}

impl WorkloadMetrics {
    /// Record one completed request
    pub fn observe_request(&self, route: &str, method: &str, status: u16, seconds: f64) {
        let status = status.to_string();
        self.request_duration
            .with_label_values(&[route, method, status.as_str()])
            .observe(seconds);
    }

    /// Number of observations recorded for one label triple
    pub fn request_count(&self, route: &str, method: &str, status: u16) -> u64 {
        let status = status.to_string();
        self.request_duration
            .with_label_values(&[route, method, status.as_str()])
            .get_sample_count()
    }

    pub fn set_retained(&self, buffers: usize, bytes: usize) {
        self.retained_buffers.set(buffers as i64);
        self.retained_bytes.set(bytes as i64);
    }

    pub fn set_load_active(&self, active: bool) {
        self.load_active.set(i64::from(active));
    }

    pub fn record_load_tick(&self) {
        self.load_ticks.inc();
    }

    pub fn load_ticks(&self) -> u64 {
        self.load_ticks.get()
    }

    /// Copy the current health flags into their gauges
    pub fn observe_health(&self, health: &HealthState) {
        self.healthy.set(i64::from(health.is_healthy()));
        self.ready.set(i64::from(health.is_ready()));
    }

    /// Encode all registered metrics in the Prometheus text format
    pub fn encode(&self) -> Result<String, prometheus::Error> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}

/// Middleware observing latency and status of every request
///
/// The route label is the matched route template, or the raw path when
/// no route matched.
pub async fn track_requests(
    State(metrics): State<SharedMetrics>,
    req: Request<Body>,
    next: Next,
) -> Response {
    let start = Instant::now();
    let method = req.method().as_str().to_string();
    let route = req
        .extensions()
        .get::<MatchedPath>()
        .map(|p| p.as_str().to_string())
        .unwrap_or_else(|| req.uri().path().to_string());

    let response = next.run(req).await;

    let elapsed = start.elapsed().as_secs_f64();
    let status = response.status().as_u16();
    metrics.observe_request(&route, &method, status, elapsed);
    debug!(route = %route, method = %method, status = status, elapsed_s = elapsed, "Request completed");

    response
}
