//! Fixed set of PSU gauges and their Prometheus rendering.

use std::fmt::Write;
use std::sync::Arc;

use parking_lot::RwLock;
use serde_json::Value;
use thiserror::Error;
use tracing::trace;

/// A gauge the exporter understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MetricDefinition {
    /// Field name in the telemetry record, also the metric name suffix.
    pub name: &'static str,
    /// HELP text.
    pub help: &'static str,
}

/// Every gauge exposed by the exporter, in render order.
pub const METRIC_DEFINITIONS: &[MetricDefinition] = &[
    MetricDefinition { name: "fanMode", help: "Fan mode" },
    MetricDefinition { name: "fanSetting", help: "Fan setting" },
    MetricDefinition { name: "fanSpeed", help: "Fan speed" },
    MetricDefinition { name: "temperature", help: "Temperature" },
    MetricDefinition { name: "voltage", help: "Voltage" },
    MetricDefinition { name: "current", help: "Input current" },
    MetricDefinition { name: "inputPower", help: "Input power" },
    MetricDefinition { name: "outputPower", help: "Output power" },
    MetricDefinition { name: "efficiency", help: "Efficiency" },
];

/// Rejected gauge update.
#[derive(Debug, Error)]
pub enum SetError {
    #[error("Non-numeric value for {name}: {value}")]
    NonNumeric { name: String, value: Value },
}

/// Result of a successful [`GaugeRegistry::set`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetOutcome {
    /// The gauge now holds the new value.
    Updated,
    /// The name is not a known gauge; nothing changed.
    Unknown,
}

/// Ingestion statistics.
#[derive(Debug, Clone, Default)]
pub struct IngestStats {
    /// Lines read from the monitor's stdout.
    pub lines_received: u64,
    /// Lines that decoded to a JSON object and were applied.
    pub records_applied: u64,
    /// Lines that were not valid JSON.
    pub decode_errors: u64,
    /// Known fields skipped because the value was not numeric.
    pub values_rejected: u64,
}

struct GaugeSlot {
    definition: MetricDefinition,
    value: Option<f64>,
}

/// Registry holding the current value of every known gauge.
///
/// The set of gauges is fixed at construction; only values change.
pub struct GaugeRegistry {
    prefix: String,
    gauges: RwLock<Vec<GaugeSlot>>,
    stats: RwLock<IngestStats>,
}

/// Create a shareable registry handle.
pub type SharedRegistry = Arc<GaugeRegistry>;

impl GaugeRegistry {
    /// Create a registry with every gauge unset.
    pub fn new(prefix: impl Into<String>) -> Self {
        let gauges = METRIC_DEFINITIONS
            .iter()
            .map(|definition| GaugeSlot {
                definition: *definition,
                value: None,
            })
            .collect();

        Self {
            prefix: prefix.into(),
            gauges: RwLock::new(gauges),
            stats: RwLock::new(IngestStats::default()),
        }
    }

    /// Set a gauge from a telemetry field value.
    ///
    /// Unknown names are ignored. Known names accept JSON numbers only.
    pub fn set(&self, name: &str, value: &Value) -> Result<SetOutcome, SetError> {
        let mut gauges = self.gauges.write();
        let Some(slot) = gauges.iter_mut().find(|g| g.definition.name == name) else {
            return Ok(SetOutcome::Unknown);
        };

        let Some(number) = value.as_f64() else {
            return Err(SetError::NonNumeric {
                name: name.to_string(),
                value: value.clone(),
            });
        };

        trace!(gauge = name, value = number, "Gauge updated");
        slot.value = Some(number);
        Ok(SetOutcome::Updated)
    }

    /// Current value of a gauge, `None` if unknown or never set.
    pub fn get(&self, name: &str) -> Option<f64> {
        self.gauges
            .read()
            .iter()
            .find(|g| g.definition.name == name)
            .and_then(|g| g.value)
    }

    /// Snapshot of every gauge value in definition order.
    pub fn values(&self) -> Vec<(&'static str, Option<f64>)> {
        self.gauges
            .read()
            .iter()
            .map(|g| (g.definition.name, g.value))
            .collect()
    }

    pub(crate) fn note_line(&self) {
        self.stats.write().lines_received += 1;
    }

    pub(crate) fn note_record(&self) {
        self.stats.write().records_applied += 1;
    }

    pub(crate) fn note_decode_error(&self) {
        self.stats.write().decode_errors += 1;
    }

    pub(crate) fn note_rejected_value(&self) {
        self.stats.write().values_rejected += 1;
    }

    /// Get ingestion statistics.
    pub fn stats(&self) -> IngestStats {
        self.stats.read().clone()
    }

    /// Render every gauge in Prometheus exposition format.
    ///
    /// Gauges that were never set are rendered as `0` so scrapers always see
    /// the same series.
    pub fn render(&self) -> String {
        let gauges = self.gauges.read();
        let mut output = String::with_capacity(gauges.len() * 96);

        for gauge in gauges.iter() {
            let name = format!("{}_{}", self.prefix, gauge.definition.name);
            writeln!(output, "# HELP {} {}", name, gauge.definition.help).ok();
            writeln!(output, "# TYPE {} gauge", name).ok();
            writeln!(output, "{} {}", name, format_value(gauge.value.unwrap_or(0.0))).ok();
        }
        drop(gauges);

        let stats = self.stats.read();
        let counters = [
            ("lines_received_total", "Lines read from the monitor", stats.lines_received),
            ("records_applied_total", "Telemetry records applied", stats.records_applied),
            ("decode_errors_total", "Lines that were not valid JSON", stats.decode_errors),
            ("values_rejected_total", "Non-numeric values for known gauges", stats.values_rejected),
        ];

        for (suffix, help, value) in counters {
            let name = format!("{}_exporter_{}", self.prefix, suffix);
            writeln!(output, "# HELP {} {}", name, help).ok();
            writeln!(output, "# TYPE {} counter", name).ok();
            writeln!(output, "{} {}", name, value).ok();
        }

        output
    }
}

impl Default for GaugeRegistry {
    fn default() -> Self {
        Self::new("corsair")
    }
}

/// Check a name against `[a-zA-Z_:][a-zA-Z0-9_:]*`.
pub fn is_valid_metric_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' || c == ':' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == ':')
}

/// Format a floating point value for Prometheus.
pub(crate) fn format_value(value: f64) -> String {
    if value.is_nan() {
        "NaN".to_string()
    } else if value.is_infinite() {
        if value.is_sign_positive() {
            "+Inf".to_string()
        } else {
            "-Inf".to_string()
        }
    } else if value.fract() == 0.0 {
        format!("{:.0}", value)
    } else {
        format!("{}", value)
    }
}
