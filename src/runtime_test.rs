//! Tests for mode dispatch, startup delay and the shutdown sequence

use super::*;
use std::io::Write;
use std::sync::Mutex;
use std::time::Instant;
use tokio::sync::oneshot;

async fn ephemeral_listener() -> (TcpListener, String) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let base = format!("http://{}", listener.local_addr().unwrap());
    (listener, base)
}

fn stop_on(rx: oneshot::Receiver<()>) -> impl Future<Output = &'static str> {
    async move {
        let _ = rx.await;
        "TEST"
    }
}

async fn get_status(base: &str, path: &str) -> Result<u16, reqwest::Error> {
    // Fresh client each time so no pooled connection outlives the listener
    reqwest::Client::new()
        .get(format!("{}{}", base, path))
        .timeout(Duration::from_secs(10))
        .send()
        .await
        .map(|r| r.status().as_u16())
}

#[test]
fn test_lifecycle_transitions() {
    let mut lifecycle = Lifecycle::new();
    assert_eq!(lifecycle.phase(), Phase::Initializing);

    lifecycle.enter(Lifecycle::running_phase(RunMode::Agent));
    assert_eq!(lifecycle.phase(), Phase::AgentRunning);

    lifecycle.enter(Phase::ShuttingDown);
    lifecycle.enter(Phase::Terminated);
    assert_eq!(lifecycle.phase(), Phase::Terminated);
}

/// Log sink shared between a test and its subscriber
#[derive(Clone, Default)]
struct CapturedLog(Arc<Mutex<Vec<u8>>>);

impl Write for CapturedLog {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

#[test]
fn test_heartbeat_logs_structured_fields() {
    let config = ProcessConfig {
        hostname: "agent-host".to_string(),
        node_name: "node-7".to_string(),
        ..Default::default()
    };
    let beat = Heartbeat::now(&config);
    assert_eq!(beat.host, "agent-host");
    assert_eq!(beat.node, "node-7");

    let captured = CapturedLog::default();
    let writer = captured.clone();
    let subscriber = tracing_subscriber::fmt()
        .with_ansi(false)
        .with_writer(move || writer.clone())
        .finish();
    tracing::subscriber::with_default(subscriber, || beat.emit());

    let line = String::from_utf8(captured.0.lock().unwrap().clone()).unwrap();
    assert!(line.contains("heartbeat:"), "target missing: {}", line);
    assert!(line.contains(&format!("ts={}", beat.ts.to_rfc3339())), "{}", line);
    assert!(line.contains("host=agent-host"), "{}", line);
    assert!(line.contains("node=node-7"), "{}", line);
    assert!(!line.contains("record="), "{}", line);
}

#[tokio::test]
async fn test_bind_failure_is_fatal() {
    let held = TcpListener::bind("0.0.0.0:0").await.unwrap();
    let port = held.local_addr().unwrap().port();
    let config = ProcessConfig {
        mode: RunMode::Server,
        port,
        ..Default::default()
    };

    match run(config).await {
        Err(RuntimeError::Bind {
            port: failed,
            source,
        }) => {
            assert_eq!(failed, port);
            assert_eq!(source.kind(), std::io::ErrorKind::AddrInUse);
        }
        other => panic!("expected bind failure, got {:?}", other),
    }
}

#[tokio::test]
async fn test_job_with_full_fail_rate_exits_with_failure() {
    let dir = tempfile::tempdir().unwrap();
    let config = ProcessConfig {
        mode: RunMode::Job,
        data_dir: dir.path().to_path_buf(),
        job_fail_rate: 1.0,
        ..Default::default()
    };

    let result = run(config).await;

    assert!(matches!(
        result,
        Err(RuntimeError::Job(JobError::SampledFailure { .. }))
    ));
    let log = std::fs::read_to_string(dir.path().join(JOB_LOG)).unwrap();
    assert_eq!(log.lines().count(), 1);
}

#[tokio::test]
async fn test_job_with_zero_fail_rate_succeeds() {
    let dir = tempfile::tempdir().unwrap();
    let config = ProcessConfig {
        mode: RunMode::Job,
        data_dir: dir.path().to_path_buf(),
        hostname: "batch-1".to_string(),
        ..Default::default()
    };

    let record = run_job(&config).await.unwrap();

    assert_eq!(record.host, "batch-1");
    let log = std::fs::read_to_string(dir.path().join(JOB_LOG)).unwrap();
    assert!(log.contains(&record.nonce.to_string()));
}

/// Readiness flips on its own once the startup delay elapses
#[tokio::test]
async fn test_startup_delay_flips_readiness() {
    let (listener, base) = ephemeral_listener().await;
    let (tx, rx) = oneshot::channel();
    let config = ProcessConfig {
        startup_delay: Duration::from_millis(500),
        ..Default::default()
    };

    let (result, ()) = tokio::join!(run_listener(config, listener, stop_on(rx)), async {
        assert_eq!(get_status(&base, "/readyz").await.unwrap(), 503);
        assert_eq!(get_status(&base, "/healthz").await.unwrap(), 200);

        tokio::time::sleep(Duration::from_millis(600)).await;
        assert_eq!(get_status(&base, "/readyz").await.unwrap(), 200);

        let _ = tx.send(());
    });

    assert!(result.is_ok());
}

/// The listener keeps accepting during the grace wait, in-flight requests
/// complete, and new connections fail once shutdown finishes
#[tokio::test]
async fn test_graceful_shutdown_drains_in_flight_request() {
    let (listener, base) = ephemeral_listener().await;
    let (tx, rx) = oneshot::channel();
    let config = ProcessConfig {
        graceful: Duration::from_millis(300),
        ..Default::default()
    };

    let start = Instant::now();
    let (result, (in_flight, during_grace)) =
        tokio::join!(run_listener(config, listener, stop_on(rx)), async {
            tokio::join!(get_status(&base, "/sleep?ms=800"), async {
                tokio::time::sleep(Duration::from_millis(50)).await;
                let _ = tx.send(());
                tokio::time::sleep(Duration::from_millis(100)).await;
                get_status(&base, "/healthz").await
            })
        });

    assert!(result.is_ok(), "shutdown should succeed: {:?}", result.err());
    assert_eq!(in_flight.unwrap(), 200, "in-flight request must complete");
    assert_eq!(
        during_grace.unwrap(),
        200,
        "listener must accept during grace wait"
    );
    assert!(start.elapsed() >= Duration::from_millis(800));

    assert!(
        get_status(&base, "/healthz").await.is_err(),
        "listener should be closed after shutdown"
    );
}

/// Shutdown stops a running load generator before closing the listener
#[tokio::test]
async fn test_shutdown_in_agent_mode_with_load_running() {
    let (listener, base) = ephemeral_listener().await;
    let (tx, rx) = oneshot::channel();
    let config = ProcessConfig {
        mode: RunMode::Agent,
        ..Default::default()
    };

    let (result, ()) = tokio::join!(run_listener(config, listener, stop_on(rx)), async {
        let started = reqwest::Client::new()
            .post(format!("{}/load/start?cpu_ms=1&interval_ms=20", base))
            .send()
            .await
            .unwrap();
        assert_eq!(started.status(), 200);
        assert_eq!(get_status(&base, "/healthz").await.unwrap(), 200);

        let _ = tx.send(());
    });

    assert!(result.is_ok());
}

#[cfg(unix)]
async fn send_sigterm_to_self() {
    let status = tokio::process::Command::new("kill")
        .args(["-TERM", &std::process::id().to_string()])
        .status()
        .await
        .unwrap();
    assert!(status.success());
}

/// A second SIGTERM during the grace wait neither kills the process nor
/// cuts the wait short
#[cfg(unix)]
#[tokio::test]
async fn test_repeated_sigterm_during_grace_is_ignored() {
    let (listener, base) = ephemeral_listener().await;
    let signals = TerminationSignals::register().unwrap();
    let config = ProcessConfig {
        graceful: Duration::from_millis(600),
        ..Default::default()
    };

    let (result, during_grace) =
        tokio::join!(run_listener(config, listener, signals.first()), async {
            assert_eq!(get_status(&base, "/healthz").await.unwrap(), 200);

            send_sigterm_to_self().await;
            tokio::time::sleep(Duration::from_millis(150)).await;
            send_sigterm_to_self().await;
            tokio::time::sleep(Duration::from_millis(150)).await;

            get_status(&base, "/healthz").await
        });

    assert_eq!(
        during_grace.unwrap(),
        200,
        "listener must still answer after the second signal"
    );
    assert!(result.is_ok(), "shutdown should succeed: {:?}", result.err());
    assert!(get_status(&base, "/healthz").await.is_err());
}
