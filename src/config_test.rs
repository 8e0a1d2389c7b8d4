//! Tests for environment-driven configuration

use super::*;
use std::collections::HashMap;

fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
    let map: HashMap<String, String> = pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    move |key| map.get(key).cloned()
}

#[test]
fn test_defaults_when_nothing_set() {
    let config = ProcessConfig::from_lookup(|_| None);

    assert_eq!(config.mode, RunMode::Server);
    assert_eq!(config.port, 3000);
    assert_eq!(config.version, "v1");
    assert_eq!(config.data_dir, PathBuf::from("/data"));
    assert_eq!(config.startup_delay, Duration::ZERO);
    assert_eq!(config.graceful, Duration::ZERO);
    assert_eq!(config.job_fail_rate, 0.0);
    assert_eq!(config.node_name, "");
    assert_eq!(config.hostname, "unknown-host");
}

#[test]
fn test_reads_all_recognized_variables() {
    let config = ProcessConfig::from_lookup(lookup_from(&[
        ("MODE", "agent"),
        ("PORT", "8081"),
        ("APP_VERSION", "v2"),
        ("DATA_DIR", "/tmp/sim"),
        ("STARTUP_DELAY_MS", "500"),
        ("GRACEFUL_MS", "1000"),
        ("JOB_FAIL_RATE", "0.25"),
        ("NODE_NAME", "node-a"),
        ("HOSTNAME", "pod-1"),
    ]));

    assert_eq!(config.mode, RunMode::Agent);
    assert_eq!(config.port, 8081);
    assert_eq!(config.version, "v2");
    assert_eq!(config.data_dir, PathBuf::from("/tmp/sim"));
    assert_eq!(config.startup_delay, Duration::from_millis(500));
    assert_eq!(config.graceful, Duration::from_millis(1000));
    assert_eq!(config.job_fail_rate, 0.25);
    assert_eq!(config.node_name, "node-a");
    assert_eq!(config.host_log_name(), "pod-1.log");
}

#[test]
fn test_mode_aliases() {
    assert_eq!(RunMode::parse("web"), Some(RunMode::Server));
    assert_eq!(RunMode::parse("SERVER"), Some(RunMode::Server));
    assert_eq!(RunMode::parse(" Job "), Some(RunMode::Job));
    assert_eq!(RunMode::parse("agent"), Some(RunMode::Agent));
    assert_eq!(RunMode::parse("daemon"), None);
}

#[test]
fn test_unknown_mode_falls_back_to_server() {
    let config = ProcessConfig::from_lookup(lookup_from(&[("MODE", "batch")]));
    assert_eq!(config.mode, RunMode::Server);
}

#[test]
fn test_malformed_numbers_fall_back_to_defaults() {
    let config = ProcessConfig::from_lookup(lookup_from(&[
        ("PORT", "not-a-port"),
        ("STARTUP_DELAY_MS", "soon"),
        ("GRACEFUL_MS", "-250"),
        ("JOB_FAIL_RATE", "often"),
    ]));

    assert_eq!(config.port, 3000);
    assert_eq!(config.startup_delay, Duration::ZERO);
    assert_eq!(config.graceful, Duration::ZERO);
    assert_eq!(config.job_fail_rate, 0.0);
}

#[test]
fn test_fail_rate_is_clamped() {
    let high = ProcessConfig::from_lookup(lookup_from(&[("JOB_FAIL_RATE", "3.5")]));
    let low = ProcessConfig::from_lookup(lookup_from(&[("JOB_FAIL_RATE", "-1")]));

    assert_eq!(high.job_fail_rate, 1.0);
    assert_eq!(low.job_fail_rate, 0.0);
    assert_eq!(clamp_rate(f64::NAN), 0.0);
}

#[test]
fn test_node_name_falls_back_to_cluster_variable() {
    let config = ProcessConfig::from_lookup(lookup_from(&[("K8S_NODE_NAME", "worker-3")]));
    assert_eq!(config.node_name, "worker-3");

    let explicit = ProcessConfig::from_lookup(lookup_from(&[
        ("NODE_NAME", "node-a"),
        ("K8S_NODE_NAME", "worker-3"),
    ]));
    assert_eq!(explicit.node_name, "node-a");
}

#[test]
fn test_empty_values_are_treated_as_unset() {
    let config = ProcessConfig::from_lookup(lookup_from(&[("PORT", ""), ("APP_VERSION", " ")]));
    assert_eq!(config.port, 3000);
    assert_eq!(config.version, "v1");
}
