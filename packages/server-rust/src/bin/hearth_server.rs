use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tracing::info;

use hearth_server::service::{Orchestrator, ServerArgs, ServerConfig};
use hearth_server::{standard_services, telemetry};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = ServerArgs::parse();
    let config = ServerConfig::try_from(args).context("invalid configuration")?;

    telemetry::init_tracing(config.telemetry.log_format)?;
    if let Some(addr) = config.telemetry.metrics_addr {
        telemetry::install_metrics_exporter(addr)?;
    }

    info!(
        host = %config.network.host,
        port = config.network.port,
        max_clients = config.network.max_clients,
        "starting hearth server"
    );

    // The listener bounds its own drain by shutdown_timeout; leave it room to
    // finish before the orchestrator gives up on the stop hook.
    let stop_timeout = config.network.shutdown_timeout + Duration::from_secs(1);
    Orchestrator::new(stop_timeout)
        .run(standard_services(&config))
        .await?;

    info!("hearth server stopped");
    Ok(())
}
