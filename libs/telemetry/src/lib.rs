//! Lightweight telemetry helpers for the Greentic correlation layer.
//! Provides subscriber installation, metric label sets, and metric recorders
//! built on top of the `metrics` facade.

use anyhow::Result;

mod config;
mod context;
mod recorders;
mod tracing_init;

pub use config::TelemetryConfig;
pub use context::TelemetryLabels;
pub use recorders::{record_counter, record_gauge, record_histogram};
pub use tracing_init::{init_tracing, with_correlation_fields};

/// Installs the shared tracing subscriber configured from `RUST_LOG` and `LOG_FORMAT`.
pub fn install(service_name: &str) -> Result<()> {
    init_tracing(TelemetryConfig::from_env(service_name))
}
