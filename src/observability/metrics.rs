//! Prometheus metrics for the lifecycle engine.
//!
//! Provides metrics for:
//! - Rows marked, exported, and deleted per phase
//! - Phase durations
//! - Run outcomes by disposition

#[cfg(feature = "prometheus")]
use metrics::{counter, histogram};
#[cfg(feature = "prometheus")]
use metrics_exporter_prometheus::PrometheusBuilder;

use crate::{config::MetricsConfig, lifecycle::RunOutcome};

/// Initialize the metrics exporter with the given configuration.
#[cfg(feature = "prometheus")]
pub fn init_metrics(config: &MetricsConfig) -> Result<(), MetricsError> {
    if !config.enabled {
        return Ok(());
    }

    let mut builder = PrometheusBuilder::new();
    if let Some(listen) = config.listen {
        builder = builder.with_http_listener(listen);
    }

    builder
        .install()
        .map_err(|e| MetricsError::Setup(e.to_string()))?;

    Ok(())
}

/// Initialize the metrics exporter (no-op without the prometheus feature).
#[cfg(not(feature = "prometheus"))]
pub fn init_metrics(config: &MetricsConfig) -> Result<(), MetricsError> {
    if config.enabled {
        tracing::warn!(
            "metrics are enabled in config but the 'prometheus' feature is not compiled. \
             Rebuild with: cargo build --features prometheus"
        );
    }
    Ok(())
}

/// Record a completed phase.
pub fn record_phase(phase: &'static str, rows: u64, duration: std::time::Duration) {
    #[cfg(feature = "prometheus")]
    {
        counter!("lifecycle_rows_total", "phase" => phase).increment(rows);
        histogram!("lifecycle_phase_duration_seconds", "phase" => phase)
            .record(duration.as_secs_f64());
    }
    #[cfg(not(feature = "prometheus"))]
    {
        let _ = (phase, rows, duration);
    }
}

/// Record a finished run.
pub fn record_run(outcome: &RunOutcome) {
    #[cfg(feature = "prometheus")]
    {
        let disposition = format!("{:?}", outcome.disposition()).to_lowercase();
        let mode = if outcome.dry_run { "dry_run" } else { "live" };
        counter!("lifecycle_runs_total", "disposition" => disposition, "mode" => mode)
            .increment(1);
    }
    #[cfg(not(feature = "prometheus"))]
    {
        let _ = outcome;
    }
}

/// Metrics initialization errors.
#[derive(Debug, thiserror::Error)]
pub enum MetricsError {
    #[error("Failed to set up metrics exporter: {0}")]
    Setup(String),
}
