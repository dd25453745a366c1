//! Prometheus exporter for Corsair PSU telemetry.
//!
//! This crate runs the PSU monitor CLI as a child process, turns each JSON
//! line it prints into gauge updates and exposes the gauges via an HTTP
//! `/metrics` endpoint.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────┐     ┌─────────────────┐     ┌─────────────────┐
//! │ Monitor process │────>│ ExporterService │────>│   HTTP Server   │
//! │  (stdout JSON)  │     │ (GaugeRegistry) │     │   (/metrics)    │
//! └─────────────────┘     └─────────────────┘     └─────────────────┘
//! ```
//!
//! # Usage
//!
//! ```bash
//! corsair-exporter --config /config/corsairexporter.json
//! corsair-exporter --device /dev/hidraw0 --port 9123
//! ```
//!
//! # Configuration
//!
//! See [`config::ExporterConfig`] for configuration options.

pub mod config;
pub mod decoder;
pub mod error;
pub mod http;
pub mod line;
pub mod process_metrics;
pub mod registry;
pub mod service;
pub mod supervisor;

pub use config::{ExporterConfig, LogFormat, LoggingConfig};
pub use decoder::{DecodeError, TelemetryRecord, decode};
pub use error::{ExporterError, Result};
pub use http::{AppState, HttpServer};
pub use line::LineReader;
pub use process_metrics::{ProcessCollector, ProcessMetrics, SharedProcessMetrics};
pub use registry::{GaugeRegistry, METRIC_DEFINITIONS, MetricDefinition, SharedRegistry};
pub use service::ExporterService;
pub use supervisor::{ProcessSupervisor, SupervisorState};

/// Initialize tracing with the given configuration.
///
/// `RUST_LOG` takes precedence over the configured level.
pub fn init_tracing(config: &LoggingConfig) -> Result<()> {
    use tracing_subscriber::{EnvFilter, fmt, prelude::*};

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));

    match config.format {
        LogFormat::Text => tracing_subscriber::registry()
            .with(fmt::layer())
            .with(filter)
            .try_init(),
        LogFormat::Json => tracing_subscriber::registry()
            .with(fmt::layer().json())
            .with(filter)
            .try_init(),
    }
    .map_err(|e| ExporterError::Tracing(e.to_string()))
}
