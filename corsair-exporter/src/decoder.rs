//! JSON decoding of monitor output lines.

use serde_json::{Map, Value};
use thiserror::Error;

/// A line that could not be decoded.
#[derive(Debug, Error)]
#[error("{reason}: {raw}")]
pub struct DecodeError {
    /// Short description of the failure.
    pub reason: &'static str,
    /// The offending line, lossily converted to UTF-8.
    pub raw: String,
    #[source]
    pub source: serde_json::Error,
}

/// One decoded telemetry record: field name to raw JSON value.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TelemetryRecord {
    fields: Map<String, Value>,
}

impl TelemetryRecord {
    /// Value of a field, if present.
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }

    /// Number of fields in the record.
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Whether the record has no fields.
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

impl From<Map<String, Value>> for TelemetryRecord {
    fn from(fields: Map<String, Value>) -> Self {
        Self { fields }
    }
}

/// Decode one line of monitor output.
///
/// Returns `Ok(None)` for valid JSON that is not an object; such lines carry
/// no fields and are skipped without error.
pub fn decode(line: &[u8]) -> Result<Option<TelemetryRecord>, DecodeError> {
    let value: Value = serde_json::from_slice(line).map_err(|source| DecodeError {
        reason: "invalid JSON",
        raw: String::from_utf8_lossy(line).into_owned(),
        source,
    })?;

    match value {
        Value::Object(fields) => Ok(Some(fields.into())),
        _ => Ok(None),
    }
}
