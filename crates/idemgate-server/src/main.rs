use std::time::Duration;

use tracing::{info, warn};

use idemgate_server::bootstrap;
use idemgate_server::metrics::init_metrics;
use idemgate_server::model::Configuration;
use idemgate_server::startup::{init_logging, wait_for_shutdown_signal};

/// Upper bound on waiting for an in-flight sweep when stopping
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let configuration = Configuration::new()?;

    let _logging_guard = init_logging(&configuration.logging_config())
        .map_err(|e| anyhow::anyhow!("{}", e))?;
    init_metrics();

    let idemgate = bootstrap(&configuration).await?;
    let reaper = idemgate.service.start_reaper();
    info!(
        owner = idemgate.service.reaper().owner(),
        "Idemgate server started"
    );

    let shutdown = wait_for_shutdown_signal();
    shutdown.wait().await;

    if tokio::time::timeout(SHUTDOWN_TIMEOUT, reaper.stop())
        .await
        .is_err()
    {
        warn!("Expiry reaper did not stop within {:?}", SHUTDOWN_TIMEOUT);
    }

    info!("Idemgate server stopped");
    Ok(())
}
