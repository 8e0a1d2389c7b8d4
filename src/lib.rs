//! Synthetic workload simulator for exercising cluster orchestration:
//! probes, autoscaling, rolling deploys and resource limits.

pub mod config;
pub mod job;
pub mod runtime;
pub mod server;
pub mod sink;
pub mod stress;
