//! Prometheus export for the client's metrics.

use anyhow::{Context, Result};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use tracing::info;

/// Install the Prometheus recorder and serve it on `port`.
///
/// # Errors
///
/// Returns an error if the recorder is already installed or the listener
/// cannot be bound.
pub fn start_metrics_server(port: u16) -> Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .context("Failed to install Prometheus exporter")?;

    tether_client::metrics::describe_metrics();
    info!("Metrics server listening on {}", addr);
    Ok(())
}
