//! Prometheus exporter for Corsair PSU telemetry.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tokio::sync::{mpsc, watch};
use tracing::{error, info, warn};

use corsair_exporter::config::DEFAULT_CONFIG_PATH;
use corsair_exporter::{
    AppState, ExporterConfig, ExporterService, GaugeRegistry, HttpServer, ProcessCollector,
    ProcessMetrics, ProcessSupervisor, init_tracing,
};

/// Capacity of the line channel between the monitor and the service.
const LINE_CHANNEL_CAPACITY: usize = 256;

/// Prometheus exporter for Corsair PSU telemetry.
#[derive(Parser, Debug)]
#[command(name = "corsair-exporter")]
#[command(about = "Export Corsair PSU telemetry as Prometheus metrics")]
#[command(version)]
struct Args {
    /// Path to configuration file (JSON or JSON5).
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Device passed to the monitor binary (overrides config).
    #[arg(long)]
    device: Option<String>,

    /// HTTP listen port (overrides config).
    #[arg(long)]
    port: Option<u16>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long)]
    log_level: Option<String>,
}

fn load_config(args: &Args) -> anyhow::Result<ExporterConfig> {
    let mut config = match &args.config {
        Some(path) => ExporterConfig::load_from_file(path)?,
        None if Path::new(DEFAULT_CONFIG_PATH).exists() => {
            ExporterConfig::load_from_file(DEFAULT_CONFIG_PATH)?
        }
        None => ExporterConfig::default(),
    };

    if let Some(device) = &args.device {
        config.device = Some(device.clone());
    }
    if let Some(port) = args.port {
        config.port = port;
    }
    if let Some(level) = &args.log_level {
        config.logging.level = level.clone();
    }

    Ok(config)
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let config = load_config(&args)?;

    init_tracing(&config.logging)?;

    if let Err(e) = config.validate() {
        error!(error = %e, "Invalid configuration");
        return Err(e.into());
    }
    // validate() guarantees both
    let device = config.device.clone().unwrap_or_default();
    let listen_addr = config.listen_addr()?;

    info!(version = env!("CARGO_PKG_VERSION"), "Starting Corsair exporter");

    // Create shutdown signal
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let registry = Arc::new(GaugeRegistry::new(config.prefix.clone()));
    let service = ExporterService::new(registry.clone());
    let process_metrics = Arc::new(ProcessMetrics::new());

    let http_server = HttpServer::bind(
        AppState::new(service.clone(), process_metrics.clone()),
        listen_addr,
    )
    .await?;
    info!(
        "Running corsair-exporter. Listening on {}",
        http_server.local_addr()
    );

    let collector_task = tokio::spawn(
        ProcessCollector::new(process_metrics).run(config.scrape_interval(), shutdown_rx.clone()),
    );

    let mut http_task = tokio::spawn(http_server.run(shutdown_rx.clone()));

    // The monitor starts only once the port is bound
    let (line_tx, line_rx) = mpsc::channel(LINE_CHANNEL_CAPACITY);
    let service_task = tokio::spawn(service.run(line_rx));
    let supervisor = ProcessSupervisor::new(config.binary.clone(), device);
    let supervisor_task = tokio::spawn(supervisor.run(line_tx, shutdown_rx.clone()));

    let http_result = tokio::select! {
        signal = shutdown_signal() => {
            match signal {
                Ok(name) => info!("Received {}, shutting down...", name),
                Err(e) => error!(error = %e, "Failed to listen for shutdown signals, shutting down..."),
            }
            shutdown_tx.send_replace(true);
            (&mut http_task).await
        }
        result = &mut http_task => {
            warn!("HTTP server exited unexpectedly, shutting down...");
            shutdown_tx.send_replace(true);
            result
        }
    };

    if let Err(e) = collector_task.await {
        warn!(error = %e, "Process metrics collector task failed");
    }
    match supervisor_task.await {
        Ok(state) => info!(state = ?state, "Monitor supervisor finished"),
        Err(e) => warn!(error = %e, "Monitor supervisor task failed"),
    }
    if let Err(e) = service_task.await {
        warn!(error = %e, "Telemetry service task failed");
    }

    let stats = registry.stats();
    info!(
        lines_received = stats.lines_received,
        records_applied = stats.records_applied,
        decode_errors = stats.decode_errors,
        values_rejected = stats.values_rejected,
        "Final statistics"
    );

    match http_result.context("HTTP server task panicked")? {
        Ok(()) => {
            info!("Exporter stopped");
            Ok(())
        }
        Err(e) => {
            error!(error = %e, "Failed to close HTTP server");
            Err(e.into())
        }
    }
}

/// Wait for Ctrl+C or SIGTERM and return the signal name.
async fn shutdown_signal() -> std::io::Result<&'static str> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        let mut sigterm = signal(SignalKind::terminate())?;
        tokio::select! {
            result = tokio::signal::ctrl_c() => result.map(|_| "Ctrl+C"),
            _ = sigterm.recv() => Ok("SIGTERM"),
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await.map(|_| "Ctrl+C")
    }
}
