use tracing::{error, info};
use workload_sim::config::ProcessConfig;
use workload_sim::runtime::run;

/// Single-threaded on purpose: `/cpu` and load ticks must starve every
/// other request while they burn.
#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let config = ProcessConfig::from_env();
    info!(
        mode = config.mode.as_str(),
        port = config.port,
        version = %config.version,
        host = %config.hostname,
        node = %config.node_name,
        "Starting workload simulator"
    );

    if let Err(e) = run(config).await {
        error!(error = %e, "Exiting with failure");
        return Err(e.into());
    }

    info!("Exiting");
    Ok(())
}
