//! Process configuration read once from the environment at startup
//!
//! Malformed values never fail startup: every field falls back to its
//! default (or is clamped) and the fallback is logged at `warn`.

use std::path::PathBuf;
use std::time::Duration;
use tracing::warn;

/// Default listener port
pub const DEFAULT_PORT: u16 = 3000;

/// Default version label reported by `/version`
pub const DEFAULT_VERSION: &str = "v1";

/// Default directory for the per-host data log and `job.log`
pub const DEFAULT_DATA_DIR: &str = "/data";

/// Host identity used when `HOSTNAME` is unset
pub const UNKNOWN_HOST: &str = "unknown-host";

/// Run mode, chosen once at startup and never re-checked per request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    /// Long-running HTTP server
    Server,
    /// One unit of work, then exit
    Job,
    /// Server plus a periodic heartbeat
    Agent,
}

impl RunMode {
    /// Parse a `MODE` value; unknown values yield `None`
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "" | "web" | "server" => Some(RunMode::Server),
            "job" => Some(RunMode::Job),
            "agent" => Some(RunMode::Agent),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RunMode::Server => "server",
            RunMode::Job => "job",
            RunMode::Agent => "agent",
        }
    }
}

/// Immutable process configuration
#[derive(Debug, Clone)]
pub struct ProcessConfig {
    pub mode: RunMode,
    pub port: u16,
    pub version: String,
    pub data_dir: PathBuf,
    pub startup_delay: Duration,
    pub graceful: Duration,
    /// Always within [0, 1]
    pub job_fail_rate: f64,
    pub node_name: String,
    pub hostname: String,
}

impl Default for ProcessConfig {
    fn default() -> Self {
        Self {
            mode: RunMode::Server,
            port: DEFAULT_PORT,
            version: DEFAULT_VERSION.to_string(),
            data_dir: PathBuf::from(DEFAULT_DATA_DIR),
            startup_delay: Duration::ZERO,
            graceful: Duration::ZERO,
            job_fail_rate: 0.0,
            node_name: String::new(),
            hostname: UNKNOWN_HOST.to_string(),
        }
    }
}

impl ProcessConfig {
    /// Read configuration from process environment variables
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build configuration from an arbitrary key lookup
    ///
    /// Empty values are treated as unset.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let defaults = Self::default();

        let mode = match get("MODE") {
            Some(raw) => RunMode::parse(&raw).unwrap_or_else(|| {
                warn!(mode = %raw, "Unknown MODE, falling back to server");
                RunMode::Server
            }),
            None => defaults.mode,
        };

        let port = get("PORT")
            .and_then(|raw| parse_or_warn::<u16>("PORT", &raw))
            .unwrap_or(defaults.port);

        let node_name = get("NODE_NAME")
            .or_else(|| get("K8S_NODE_NAME"))
            .unwrap_or_default();

        Self {
            mode,
            port,
            version: get("APP_VERSION").unwrap_or(defaults.version),
            data_dir: get("DATA_DIR").map(PathBuf::from).unwrap_or(defaults.data_dir),
            startup_delay: duration_ms(get("STARTUP_DELAY_MS"), "STARTUP_DELAY_MS"),
            graceful: duration_ms(get("GRACEFUL_MS"), "GRACEFUL_MS"),
            job_fail_rate: get("JOB_FAIL_RATE")
                .and_then(|raw| parse_or_warn::<f64>("JOB_FAIL_RATE", &raw))
                .map(clamp_rate)
                .unwrap_or(0.0),
            node_name,
            hostname: get("HOSTNAME").unwrap_or(defaults.hostname),
        }
    }

    /// File name of this host's data log
    pub fn host_log_name(&self) -> String {
        format!("{}.log", self.hostname)
    }
}

fn parse_or_warn<T: std::str::FromStr>(key: &str, raw: &str) -> Option<T> {
    match raw.trim().parse::<T>() {
        Ok(v) => Some(v),
        Err(_) => {
            warn!(key = key, value = %raw, "Ignoring malformed value, using default");
            None
        }
    }
}

/// Parse a millisecond duration, treating negative or malformed input as zero
fn duration_ms(raw: Option<String>, key: &str) -> Duration {
    raw.and_then(|raw| parse_or_warn::<i64>(key, &raw))
        .map(|ms| Duration::from_millis(ms.max(0) as u64))
        .unwrap_or(Duration::ZERO)
}

/// Clamp a probability into [0, 1]; NaN becomes 0
pub fn clamp_rate(rate: f64) -> f64 {
    if rate.is_nan() {
        0.0
    } else {
        rate.clamp(0.0, 1.0)
    }
}

#[cfg(test)]
#[path = "config_test.rs"]
mod tests;
