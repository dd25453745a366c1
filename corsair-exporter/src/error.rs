//! Error types for the exporter.

use std::net::SocketAddr;

use thiserror::Error;

use crate::config::ConfigError;

/// Result type alias using [`ExporterError`].
pub type Result<T> = std::result::Result<T, ExporterError>;

/// Errors that stop the exporter or one of its workers.
#[derive(Error, Debug)]
pub enum ExporterError {
    /// Invalid or missing configuration.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// The metrics port could not be bound.
    #[error("Failed to bind to {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    /// The HTTP server failed while serving or closing.
    #[error("HTTP server error: {0}")]
    Server(#[source] std::io::Error),

    /// The monitor process could not be started.
    #[error("Failed to start '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// Tracing could not be initialized.
    #[error("Failed to initialize tracing: {0}")]
    Tracing(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
