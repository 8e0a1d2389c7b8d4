//! One-shot job execution
//!
//! A job writes one record to the sink, then samples the configured
//! failure rate. The outcome is returned as a `Result`; only `main`
//! turns it into an exit code.

use crate::config::ProcessConfig;
use crate::sink::{RecordSink, SinkError};
use chrono::{DateTime, Utc};
use rand::Rng;
use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

/// File name for job-mode records inside the data directory
pub const JOB_LOG: &str = "job.log";

#[derive(Debug, Error)]
pub enum JobError {
    #[error("failed to write job record: {0}")]
    Sink(#[from] SinkError),

    #[error("job failed by sampling (roll {roll:.4} < fail rate {rate})")]
    SampledFailure { roll: f64, rate: f64 },
}

/// Record appended for every job run
#[derive(Debug, Clone, Serialize)]
pub struct JobRecord {
    pub ts: DateTime<Utc>,
    pub host: String,
    pub node: String,
    pub nonce: Uuid,
}

impl JobRecord {
    pub fn new(config: &ProcessConfig) -> Self {
        Self {
            ts: Utc::now(),
            host: config.hostname.clone(),
            node: config.node_name.clone(),
            nonce: Uuid::new_v4(),
        }
    }
}

/// Run one unit of work against `sink`
///
/// The record is always written before the failure roll, so a sampled
/// failure still leaves exactly one record behind.
pub async fn execute_job<R: Rng>(
    config: &ProcessConfig,
    sink: &dyn RecordSink,
    rng: &mut R,
) -> Result<JobRecord, JobError> {
    let record = JobRecord::new(config);
    let value = serde_json::to_value(&record).map_err(SinkError::from)?;
    sink.append(&value).await?;

    let roll: f64 = rng.random();
    if roll < config.job_fail_rate {
        return Err(JobError::SampledFailure {
            roll,
            rate: config.job_fail_rate,
        });
    }

    Ok(record)
}
