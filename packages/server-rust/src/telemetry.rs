//! Tracing subscriber and metrics exporter setup.

use std::net::SocketAddr;

use metrics_exporter_prometheus::PrometheusBuilder;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use crate::service::config::LogFormat;

/// Filter applied when `RUST_LOG` is unset.
pub const DEFAULT_LOG_FILTER: &str = "hearth_server=info,tower_http=info";

/// Names of every metric recorded by the server.
pub mod metric_names {
    pub const CONNECTIONS_ACCEPTED: &str = "hearth_connections_accepted_total";
    pub const CONNECTIONS_REJECTED: &str = "hearth_connections_rejected_total";
    /// Labelled with `reason`.
    pub const FRAMES_DROPPED: &str = "hearth_frames_dropped_total";
    /// Labelled with `packet`.
    pub const PACKETS_DISPATCHED: &str = "hearth_packets_dispatched_total";
    pub const PACKETS_UNROUTED: &str = "hearth_packets_unrouted_total";
    /// Labelled with `packet` and `outcome`.
    pub const HANDLER_FAILURES: &str = "hearth_handler_failures_total";
    pub const ACTIVE_CONNECTIONS: &str = "hearth_active_connections";
}

/// Installs the global tracing subscriber.
///
/// # Errors
///
/// Returns an error if a global subscriber is already installed.
pub fn init_tracing(format: LogFormat) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    let registry = tracing_subscriber::registry().with(filter);

    match format {
        LogFormat::Text => registry
            .with(tracing_subscriber::fmt::layer().with_target(true))
            .try_init()?,
        LogFormat::Json => registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .flatten_event(true),
            )
            .try_init()?,
    }

    Ok(())
}

/// Installs the Prometheus recorder and serves `/metrics` on `addr`.
///
/// Must be called from within a tokio runtime.
///
/// # Errors
///
/// Returns an error if a recorder is already installed or the listener
/// cannot be bound.
pub fn install_metrics_exporter(addr: SocketAddr) -> anyhow::Result<()> {
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    tracing::info!(%addr, "prometheus exporter listening");
    Ok(())
}
