//! Applies decoded telemetry to the gauge registry.

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::decoder::{TelemetryRecord, decode};
use crate::registry::{METRIC_DEFINITIONS, SetOutcome, SharedRegistry};

/// Body returned by the informational endpoint.
pub const INFO_TEXT: &str = "Point Prometheus here for your Corsair statistics";

/// The single writer of the gauge registry.
#[derive(Clone)]
pub struct ExporterService {
    registry: SharedRegistry,
}

impl ExporterService {
    /// Create a service writing into `registry`.
    pub fn new(registry: SharedRegistry) -> Self {
        Self { registry }
    }

    /// The registry this service updates.
    pub fn registry(&self) -> &SharedRegistry {
        &self.registry
    }

    /// Informational response for the root endpoint.
    pub fn info(&self) -> &'static str {
        INFO_TEXT
    }

    /// Rendered metrics for the scrape endpoint.
    pub fn render(&self) -> String {
        self.registry.render()
    }

    /// Decode and apply one line of monitor output.
    ///
    /// Malformed lines are logged and counted; they never change a gauge.
    pub fn process_line(&self, line: &[u8]) {
        self.registry.note_line();

        match decode(line) {
            Ok(Some(record)) => self.apply(&record),
            Ok(None) => debug!("Ignoring non-object telemetry line"),
            Err(e) => {
                self.registry.note_decode_error();
                warn!(raw = %e.raw, error = %e.source, "{}", e.reason);
            }
        }
    }

    /// Update every known gauge present in `record`.
    ///
    /// Unknown fields are ignored. A non-numeric value skips that field only.
    /// The record counts as applied when at least one gauge changed.
    pub fn apply(&self, record: &TelemetryRecord) {
        let mut updated = 0;
        for definition in METRIC_DEFINITIONS {
            let Some(value) = record.get(definition.name) else {
                continue;
            };

            match self.registry.set(definition.name, value) {
                Ok(SetOutcome::Updated) => updated += 1,
                Ok(SetOutcome::Unknown) => {}
                Err(e) => {
                    self.registry.note_rejected_value();
                    warn!(field = definition.name, error = %e, "Skipping telemetry field");
                }
            }
        }

        if updated > 0 {
            self.registry.note_record();
        } else {
            debug!(fields = record.len(), "Record carried no usable gauge values");
        }
    }

    /// Consume lines until every sender is dropped.
    pub async fn run(self, mut lines: mpsc::Receiver<Vec<u8>>) {
        while let Some(line) = lines.recv().await {
            self.process_line(&line);
        }

        let stats = self.registry.stats();
        info!(
            lines_received = stats.lines_received,
            records_applied = stats.records_applied,
            decode_errors = stats.decode_errors,
            "Telemetry stream ended"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::GaugeRegistry;
    use std::sync::Arc;

    fn service() -> ExporterService {
        ExporterService::new(Arc::new(GaugeRegistry::default()))
    }

    #[test]
    fn test_scenario_temperature_and_fan_speed() {
        let service = service();
        service.process_line(br#"{"temperature": 42.5, "fanSpeed": 1200}"#);

        let output = service.render();
        assert!(output.lines().any(|l| l == "corsair_temperature 42.5"));
        assert!(output.lines().any(|l| l == "corsair_fanSpeed 1200"));
        assert!(output.lines().any(|l| l == "corsair_voltage 0"));
    }

    #[test]
    fn test_subset_leaves_other_gauges_unchanged() {
        let service = service();
        service.process_line(br#"{"voltage": 12.1, "current": 3.5, "efficiency": 90}"#);
        service.process_line(br#"{"current": 3.7}"#);

        let registry = service.registry();
        assert_eq!(registry.get("voltage"), Some(12.1));
        assert_eq!(registry.get("current"), Some(3.7));
        assert_eq!(registry.get("efficiency"), Some(90.0));
        assert_eq!(registry.get("temperature"), None);
    }

    #[test]
    fn test_malformed_line_changes_nothing() {
        let service = service();
        service.process_line(br#"{"temperature": 40}"#);
        let before = service.registry().values();

        service.process_line(b"not json at all");
        service.process_line(br#"{"temperature": "#);

        assert_eq!(service.registry().values(), before);
        assert_eq!(service.registry().stats().decode_errors, 2);

        service.process_line(br#"{"temperature": 41}"#);
        assert_eq!(service.registry().get("temperature"), Some(41.0));
    }

    #[test]
    fn test_unknown_keys_ignored() {
        let service = service();
        let before = service.registry().values();

        service.process_line(br#"{"humidity": 55, "model": "HX1000i"}"#);

        assert_eq!(service.registry().values(), before);
        assert_eq!(service.registry().stats().values_rejected, 0);
    }

    #[test]
    fn test_non_numeric_field_skipped_others_applied() {
        let service = service();
        service.process_line(br#"{"fanMode": "auto", "fanSpeed": 900, "voltage": null}"#);

        let registry = service.registry();
        assert_eq!(registry.get("fanMode"), None);
        assert_eq!(registry.get("voltage"), None);
        assert_eq!(registry.get("fanSpeed"), Some(900.0));
        assert_eq!(registry.stats().values_rejected, 2);
    }

    #[test]
    fn test_non_object_json_is_noop() {
        let service = service();
        let before = service.registry().values();

        for line in [&b"null"[..], &b"[1,2]"[..], &b"12"[..], &b"\"temperature\""[..]] {
            service.process_line(line);
        }

        assert_eq!(service.registry().values(), before);
        assert_eq!(service.registry().stats().decode_errors, 0);
        assert_eq!(service.registry().stats().records_applied, 0);
    }

    #[test]
    fn test_record_without_usable_fields_is_not_counted() {
        let service = service();
        service.process_line(br#"{"humidity": 55}"#);
        service.process_line(br#"{"voltage": "12", "current": null}"#);
        service.process_line(br#"{"voltage": 12, "humidity": 55}"#);

        let stats = service.registry().stats();
        assert_eq!(stats.lines_received, 3);
        assert_eq!(stats.records_applied, 1);
        assert_eq!(stats.values_rejected, 2);
    }

    #[test]
    fn test_same_record_twice_is_idempotent() {
        let once = service();
        let twice = service();
        let line = br#"{"inputPower": 520.5, "outputPower": 480}"#;

        once.process_line(line);
        twice.process_line(line);
        twice.process_line(line);

        assert_eq!(once.registry().values(), twice.registry().values());
    }

    #[test]
    fn test_disjoint_updates_commute() {
        let forward = service();
        let reverse = service();

        forward.process_line(br#"{"temperature": 40}"#);
        forward.process_line(br#"{"voltage": 12}"#);
        reverse.process_line(br#"{"voltage": 12}"#);
        reverse.process_line(br#"{"temperature": 40}"#);

        assert_eq!(forward.registry().values(), reverse.registry().values());
    }

    #[tokio::test]
    async fn test_run_applies_lines_in_order() {
        let service = service();
        let registry = service.registry().clone();
        let (tx, rx) = mpsc::channel(8);

        let task = tokio::spawn(service.run(rx));
        tx.send(br#"{"fanSetting": 1}"#.to_vec()).await.unwrap();
        tx.send(b"garbage".to_vec()).await.unwrap();
        tx.send(br#"{"fanSetting": 2}"#.to_vec()).await.unwrap();
        drop(tx);
        task.await.unwrap();

        assert_eq!(registry.get("fanSetting"), Some(2.0));
        let stats = registry.stats();
        assert_eq!(stats.lines_received, 3);
        assert_eq!(stats.records_applied, 2);
        assert_eq!(stats.decode_errors, 1);
    }
}
