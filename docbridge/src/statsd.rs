use crate::config::MetricsConfig;
use metrics_exporter_statsd::{StatsdBuilder, StatsdError};

const PREFIX: &str = "docbridge";

#[derive(thiserror::Error, Debug)]
pub enum MetricsError {
    #[error("could not build statsd exporter: {0}")]
    Exporter(#[from] StatsdError),
    #[error("could not install metrics recorder: {0}")]
    Install(String),
}

/// Sends metrics to StatsD when configured. Without a config the `metrics`
/// macros stay no-ops.
pub fn init(config: Option<&MetricsConfig>) -> Result<(), MetricsError> {
    let Some(config) = config else {
        tracing::info!("No metrics backend configured");
        return Ok(());
    };

    let recorder =
        StatsdBuilder::from(config.statsd_host.as_str(), config.statsd_port).build(Some(PREFIX))?;
    metrics::set_global_recorder(recorder).map_err(|e| MetricsError::Install(e.to_string()))?;

    shared::metrics_defs::describe_all(gateway::metrics_defs::ALL_METRICS);
    shared::metrics_defs::describe_all(shards::metrics_defs::ALL_METRICS);

    tracing::info!(
        host = %config.statsd_host,
        port = config.statsd_port,
        "Sending metrics to statsd"
    );
    Ok(())
}
