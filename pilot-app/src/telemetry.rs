//! Logging and metrics setup. Logs go to stderr; stdout carries the protocol.

use crate::config::{LogConfig, MetricsConfig};
use anyhow::{anyhow, Result};
use tracing_subscriber::EnvFilter;

/// `RUST_LOG` wins over the configured level.
pub fn init_logging(config: &LogConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.level))
        .map_err(|e| anyhow!("Invalid log level '{}': {}", config.level, e))?;

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);

    let installed = if config.json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
    installed.map_err(|e| anyhow!("Failed to install logger: {}", e))
}

#[cfg(feature = "prometheus")]
pub fn init_metrics(config: &MetricsConfig) -> Result<()> {
    use metrics_exporter_prometheus::PrometheusBuilder;
    use std::net::SocketAddr;

    let Some(listen) = &config.listen else {
        return Ok(());
    };
    let addr: SocketAddr = listen
        .parse()
        .map_err(|e| anyhow!("Invalid metrics.listen '{}': {}", listen, e))?;
    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| anyhow!("Failed to start metrics exporter: {}", e))?;
    tracing::info!(%addr, "Prometheus exporter listening");
    Ok(())
}

#[cfg(not(feature = "prometheus"))]
pub fn init_metrics(config: &MetricsConfig) -> Result<()> {
    if let Some(listen) = &config.listen {
        tracing::warn!(
            listen = %listen,
            "metrics.listen is set but pilotd was built without the prometheus feature"
        );
    }
    Ok(())
}
