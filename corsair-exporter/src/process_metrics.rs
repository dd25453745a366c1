//! Resource metrics of the exporter process itself.

use std::fmt::Write;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use sysinfo::{Pid, ProcessesToUpdate, System};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::registry::format_value;

/// One sample of the exporter's own process.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProcessSnapshot {
    pub resident_memory_bytes: u64,
    pub virtual_memory_bytes: u64,
    pub start_time_seconds: u64,
    pub cpu_usage_percent: f32,
}

/// Latest process sample, shared with the HTTP handlers.
#[derive(Debug, Default)]
pub struct ProcessMetrics {
    latest: RwLock<Option<ProcessSnapshot>>,
}

/// Create a shareable process metrics handle.
pub type SharedProcessMetrics = Arc<ProcessMetrics>;

impl ProcessMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Latest sample, if one has been taken.
    pub fn latest(&self) -> Option<ProcessSnapshot> {
        *self.latest.read()
    }

    fn store(&self, snapshot: ProcessSnapshot) {
        *self.latest.write() = Some(snapshot);
    }

    /// Render the latest sample; empty before the first sample.
    pub fn render(&self) -> String {
        let Some(snapshot) = self.latest() else {
            return String::new();
        };

        let series: [(&str, &str, f64); 4] = [
            (
                "process_resident_memory_bytes",
                "Resident memory size in bytes.",
                snapshot.resident_memory_bytes as f64,
            ),
            (
                "process_virtual_memory_bytes",
                "Virtual memory size in bytes.",
                snapshot.virtual_memory_bytes as f64,
            ),
            (
                "process_start_time_seconds",
                "Start time of the process since unix epoch in seconds.",
                snapshot.start_time_seconds as f64,
            ),
            (
                "process_cpu_usage_percent",
                "CPU usage of the process over the last sample interval.",
                snapshot.cpu_usage_percent as f64,
            ),
        ];

        let mut output = String::with_capacity(512);
        for (name, help, value) in series {
            writeln!(output, "# HELP {} {}", name, help).ok();
            writeln!(output, "# TYPE {} gauge", name).ok();
            writeln!(output, "{} {}", name, format_value(value)).ok();
        }
        output
    }
}

/// Periodically samples the current process with `sysinfo`.
pub struct ProcessCollector {
    system: System,
    pid: Option<Pid>,
    metrics: SharedProcessMetrics,
}

impl ProcessCollector {
    /// Create a collector writing into `metrics`.
    pub fn new(metrics: SharedProcessMetrics) -> Self {
        let pid = match sysinfo::get_current_pid() {
            Ok(pid) => Some(pid),
            Err(e) => {
                warn!(error = e, "Process metrics unavailable on this platform");
                None
            }
        };

        Self {
            system: System::new(),
            pid,
            metrics,
        }
    }

    /// Take one sample. Returns `false` when the process could not be read.
    pub fn collect(&mut self) -> bool {
        let Some(pid) = self.pid else {
            return false;
        };

        self.system
            .refresh_processes(ProcessesToUpdate::Some(&[pid]), true);

        let Some(process) = self.system.process(pid) else {
            debug!(pid = %pid, "Own process not found");
            return false;
        };

        self.metrics.store(ProcessSnapshot {
            resident_memory_bytes: process.memory(),
            virtual_memory_bytes: process.virtual_memory(),
            start_time_seconds: process.start_time(),
            cpu_usage_percent: process.cpu_usage(),
        });
        true
    }

    /// Sample every `interval` until shutdown is signalled.
    pub async fn run(mut self, interval: Duration, mut shutdown: watch::Receiver<bool>) {
        info!(interval_secs = interval.as_secs(), "Starting process metrics collector");
        let mut ticker = tokio::time::interval(interval);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.collect();
                }
                result = shutdown.changed() => {
                    if result.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        debug!("Process metrics collector stopped");
    }
}
