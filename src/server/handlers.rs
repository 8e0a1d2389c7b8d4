//! Workload endpoints
//!
//! - `/healthz`, `/readyz` - probes, with query overrides
//! - `/version`, `/id`, `/headers` - introspection
//! - `/sleep`, `/status`, `/cpu`, `/alloc` - fault injection
//! - `/data` - append-only per-host log
//! - `/load/start`, `/load/stop` - background load generator
//! - `/metrics`, `/retained` - observability

use crate::config::ProcessConfig;
use crate::server::health::HealthState;
use crate::server::load::BackgroundLoad;
use crate::server::metrics::{track_requests, SharedMetrics};
use crate::server::shutdown::CloseSignal;
use crate::server::timers::Timers;
use crate::sink::{FileSink, RecordSink, SinkError};
use crate::stress::{allocate, burn_cpu, RetainedBuffers, StressError};
use axum::{
    body::Bytes,
    extract::{Query, State},
    http::{header::CONTENT_TYPE, HeaderMap, StatusCode, Uri},
    middleware,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::net::TcpListener;
use tracing::{debug, info, warn};

/// Longest `/alloc` waits before replying, whatever `ms` asks for
pub const ALLOC_REPLY_CAP: Duration = Duration::from_millis(200);

/// Records returned by `GET /data`
pub const DATA_TAIL: usize = 50;

const DEFAULT_CPU_MS: u64 = 100;
const DEFAULT_ALLOC_MB: usize = 10;
const DEFAULT_ALLOC_HOLD_MS: u64 = 1000;
const DEFAULT_LOAD_CPU_MS: u64 = 100;
const DEFAULT_LOAD_INTERVAL_MS: u64 = 1000;

/// State captured by every handler
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ProcessConfig>,
    pub health: HealthState,
    pub metrics: SharedMetrics,
    pub load: BackgroundLoad,
    pub retained: RetainedBuffers,
    pub timers: Timers,
    pub data: Arc<dyn RecordSink>,
}

impl AppState {
    pub fn new(
        config: Arc<ProcessConfig>,
        health: HealthState,
        metrics: SharedMetrics,
        timers: Timers,
    ) -> Self {
        let data = Arc::new(FileSink::in_dir(&config.data_dir, &config.host_log_name()));
        Self {
            load: BackgroundLoad::new(metrics.clone()),
            config,
            health,
            metrics,
            retained: RetainedBuffers::new(),
            timers,
            data,
        }
    }

    /// Replace the data sink (the default is `<DATA_DIR>/<hostname>.log`)
    pub fn with_data_sink(mut self, data: Arc<dyn RecordSink>) -> Self {
        self.data = data;
        self
    }
}

#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Stress(#[from] StressError),

    #[error(transparent)]
    Sink(#[from] SinkError),

    #[error("invalid status code: {0}")]
    InvalidStatus(u16),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            ApiError::Stress(StressError::OutOfMemory { .. }) => StatusCode::INSUFFICIENT_STORAGE,
            ApiError::Sink(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::InvalidStatus(_) => StatusCode::BAD_REQUEST,
        };
        warn!(error = %self, status = status.as_u16(), "Request failed");
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

/// Interpret a query flag; anything unrecognized is treated as absent
fn parse_flag(raw: Option<&str>) -> Option<bool> {
    match raw?.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

async fn root(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "message": "workload simulator",
        "version": state.config.version,
        "mode": state.config.mode.as_str(),
    }))
}

#[derive(Debug, Deserialize)]
struct HealthQuery {
    fail: Option<String>,
}

/// Liveness probe; `?fail=1` clears liveness until restart
async fn healthz(
    State(state): State<AppState>,
    Query(query): Query<HealthQuery>,
) -> (StatusCode, Json<Value>) {
    if parse_flag(query.fail.as_deref()) == Some(true) {
        state.health.set_healthy(false);
        warn!("Liveness cleared by request");
    }

    if state.health.is_healthy() {
        (StatusCode::OK, Json(json!({ "ok": true })))
    } else {
        (StatusCode::INTERNAL_SERVER_ERROR, Json(json!({ "ok": false })))
    }
}

#[derive(Debug, Deserialize)]
struct ReadyQuery {
    ready: Option<String>,
}

/// Readiness probe; `?ready=0|1` overrides readiness
async fn readyz(
    State(state): State<AppState>,
    Query(query): Query<ReadyQuery>,
) -> (StatusCode, Json<Value>) {
    if let Some(ready) = parse_flag(query.ready.as_deref()) {
        state.health.set_ready(ready);
        info!(ready = ready, "Readiness overridden by request");
    }

    if state.health.is_ready() {
        (StatusCode::OK, Json(json!({ "ready": true })))
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, Json(json!({ "ready": false })))
    }
}

async fn version(State(state): State<AppState>) -> Json<Value> {
    Json(json!({ "version": state.config.version }))
}

async fn id(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "hostname": state.config.hostname,
        "node": state.config.node_name,
        "pid": std::process::id(),
        "mode": state.config.mode.as_str(),
    }))
}

async fn headers(headers: HeaderMap) -> Json<BTreeMap<String, String>> {
    Json(
        headers
            .iter()
            .map(|(name, value)| {
                (
                    name.as_str().to_string(),
                    String::from_utf8_lossy(value.as_bytes()).into_owned(),
                )
            })
            .collect(),
    )
}

#[derive(Debug, Deserialize)]
struct SleepQuery {
    ms: Option<u64>,
}

/// Suspend only this request
async fn sleep(Query(query): Query<SleepQuery>) -> Json<Value> {
    let ms = query.ms.unwrap_or(0);
    tokio::time::sleep(Duration::from_millis(ms)).await;
    Json(json!({ "slept_ms": ms }))
}

#[derive(Debug, Deserialize)]
struct StatusQuery {
    code: Option<u16>,
}

async fn status(Query(query): Query<StatusQuery>) -> Result<Response, ApiError> {
    let code = query.code.unwrap_or(200);
    let status = StatusCode::from_u16(code).map_err(|_| ApiError::InvalidStatus(code))?;
    Ok((status, Json(json!({ "status": code }))).into_response())
}

#[derive(Debug, Deserialize)]
struct CpuQuery {
    ms: Option<u64>,
}

/// Burn CPU on the handling thread; blocks the runtime for the duration
async fn cpu(Query(query): Query<CpuQuery>) -> Json<Value> {
    let ms = query.ms.unwrap_or(DEFAULT_CPU_MS);
    let start = Instant::now();
    let iterations = burn_cpu(Duration::from_millis(ms));
    Json(json!({
        "burned_ms": ms,
        "elapsed_ms": start.elapsed().as_millis() as u64,
        "iterations": iterations,
    }))
}

#[derive(Debug, Deserialize)]
struct AllocQuery {
    mb: Option<usize>,
    ms: Option<u64>,
    leak: Option<String>,
}

/// Allocate memory, either leaking it or releasing it after `ms`
async fn alloc(
    State(state): State<AppState>,
    Query(query): Query<AllocQuery>,
) -> Result<Json<Value>, ApiError> {
    let mb = query.mb.unwrap_or(DEFAULT_ALLOC_MB);
    let hold = Duration::from_millis(query.ms.unwrap_or(DEFAULT_ALLOC_HOLD_MS));
    let leak = parse_flag(query.leak.as_deref()).unwrap_or(false);

    let buffer = allocate(mb)?;

    if leak {
        let (buffers, bytes) = state.retained.retain(buffer);
        state.metrics.set_retained(buffers, bytes);
        info!(mb = mb, buffers = buffers, bytes = bytes, "Leaked allocation");
    } else {
        state.timers.schedule(hold, move || {
            debug!(bytes = buffer.len(), "Released allocation");
            drop(buffer);
        });
    }

    tokio::time::sleep(hold.min(ALLOC_REPLY_CAP)).await;

    let release_after_ms = (!leak).then(|| hold.as_millis() as u64);
    Ok(Json(json!({
        "allocated_mb": mb,
        "leaked": leak,
        "release_after_ms": release_after_ms,
        "retained_buffers": state.retained.count(),
    })))
}

/// Append the request body to this host's data log
///
/// JSON bodies are stored as-is, anything else as a string.
async fn data_append(State(state): State<AppState>, body: Bytes) -> Result<Json<Value>, ApiError> {
    let payload = serde_json::from_slice::<Value>(&body)
        .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&body).into_owned()));

    let record = json!({
        "ts": Utc::now().to_rfc3339(),
        "host": state.config.hostname,
        "payload": payload,
    });
    state.data.append(&record).await?;

    Ok(Json(json!({ "ok": true, "file": state.data.location() })))
}

async fn data_inspect(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    let records = state.data.read_all().await?;
    let count = records.len();
    let tail: Vec<Value> = records.into_iter().skip(count.saturating_sub(DATA_TAIL)).collect();

    Ok(Json(json!({
        "file": state.data.location(),
        "count": count,
        "records": tail,
    })))
}

#[derive(Debug, Deserialize)]
struct LoadQuery {
    cpu_ms: Option<u64>,
    interval_ms: Option<u64>,
}

async fn load_start(
    State(state): State<AppState>,
    Query(query): Query<LoadQuery>,
) -> Json<Value> {
    let settings = state.load.start(
        Duration::from_millis(query.cpu_ms.unwrap_or(DEFAULT_LOAD_CPU_MS)),
        Duration::from_millis(query.interval_ms.unwrap_or(DEFAULT_LOAD_INTERVAL_MS)),
    );
    Json(json!({ "running": true, "settings": settings }))
}

async fn load_stop(State(state): State<AppState>) -> Json<Value> {
    let stopped = state.load.stop();
    Json(json!({ "running": false, "stopped": stopped }))
}

async fn retained(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "buffers": state.retained.count(),
        "bytes": state.retained.total_bytes(),
    }))
}

/// Prometheus metrics handler
///
/// Returns metrics in Prometheus text format for scraping.
async fn metrics(State(state): State<AppState>) -> impl IntoResponse {
    state.metrics.observe_health(&state.health);
    match state.metrics.encode() {
        Ok(body) => (
            StatusCode::OK,
            [(CONTENT_TYPE, "text/plain; version=0.0.4; charset=utf-8")],
            body,
        )
            .into_response(),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("Failed to encode metrics: {}", e),
        )
            .into_response(),
    }
}

async fn not_found(uri: Uri) -> (StatusCode, Json<Value>) {
    (
        StatusCode::NOT_FOUND,
        Json(json!({ "error": "not found", "path": uri.path() })),
    )
}

/// Build the router with every endpoint and the metrics middleware
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(root))
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/version", get(version))
        .route("/id", get(id))
        .route("/headers", get(headers))
        .route("/sleep", get(sleep))
        .route("/status", get(status))
        .route("/cpu", get(cpu))
        .route("/alloc", get(alloc))
        .route("/data", post(data_append).get(data_inspect))
        .route("/load/start", post(load_start))
        .route("/load/stop", post(load_stop))
        .route("/retained", get(retained))
        .route("/metrics", get(self::metrics))
        .fallback(not_found)
        .layer(middleware::from_fn_with_state(
            state.metrics.clone(),
            track_requests,
        ))
        .with_state(state)
}

/// Serve on `listener` until `close` fires, then drain in-flight requests
pub async fn serve(
    listener: TcpListener,
    state: AppState,
    close: CloseSignal,
) -> Result<(), std::io::Error> {
    let app = build_router(state);

    axum::serve(listener, app)
        .with_graceful_shutdown(close.closed())
        .await
}

/// Bind the request listener on all interfaces
pub async fn bind_listener(port: u16) -> Result<TcpListener, std::io::Error> {
    let listener = TcpListener::bind(("0.0.0.0", port)).await?;
    // Log after successful bind - server is actually listening
    info!(port = %port, "Workload server listening (HTTP)");
    Ok(listener)
}
