//! Extraction schemas and their canonical serialisation.
//!
//! An [`ExtractionSchema`] is a JSON Schema object describing the structure
//! the extract stage must return. It is configuration, not data: the cache
//! keys extraction results by the hash of [`ExtractionSchema::canonical_json`],
//! so two schemas that differ only in key order share cached results while
//! any structural edit invalidates them.
//!
//! The canonical form is RFC 8785 (JCS): object keys sorted at every depth,
//! no whitespace, numbers in their shortest ECMAScript spelling so `1.0` and
//! `1` agree. It is computed once when the schema is built.

use crate::error::ExtractError;
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::path::Path;

/// A JSON Schema (draft-07 style) object used for the extract stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Value", into = "Value")]
pub struct ExtractionSchema {
    value: Value,
    canonical: String,
}

impl ExtractionSchema {
    /// Wrap a JSON value. The value must be an object.
    pub fn new(value: Value) -> Result<Self, ExtractError> {
        if !value.is_object() {
            return Err(ExtractError::InvalidSchema {
                detail: format!("expected a JSON object, got {}", type_name(&value)),
            });
        }
        let canonical = canonical_json(&value)?;
        Ok(Self { value, canonical })
    }

    /// Parse a schema from JSON text.
    pub fn from_json_str(s: &str) -> Result<Self, ExtractError> {
        let value: Value = serde_json::from_str(s).map_err(|e| ExtractError::InvalidSchema {
            detail: e.to_string(),
        })?;
        Self::new(value)
    }

    /// Load a schema from a JSON file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ExtractError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| ExtractError::InvalidSchema {
            detail: format!("cannot read '{}': {e}", path.display()),
        })?;
        Self::from_json_str(&text)
    }

    /// The built-in lab-report schema.
    pub fn lab_report() -> Self {
        LAB_REPORT_SCHEMA.clone()
    }

    pub fn as_value(&self) -> &Value {
        &self.value
    }

    pub fn into_value(self) -> Value {
        self.value
    }

    /// Top-level `required` field names, in declaration order.
    pub fn required_fields(&self) -> Vec<&str> {
        self.value
            .get("required")
            .and_then(Value::as_array)
            .map(|fields| fields.iter().filter_map(Value::as_str).collect())
            .unwrap_or_default()
    }

    /// JCS canonical JSON of the schema.
    ///
    /// This is both the unit hashed for the schema fingerprint and the string
    /// sent to the extract endpoint.
    pub fn canonical_json(&self) -> &str {
        &self.canonical
    }
}

impl TryFrom<Value> for ExtractionSchema {
    type Error = ExtractError;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<ExtractionSchema> for Value {
    fn from(schema: ExtractionSchema) -> Self {
        schema.value
    }
}

impl Default for ExtractionSchema {
    fn default() -> Self {
        Self::lab_report()
    }
}

/// Serialise `value` as RFC 8785 canonical JSON.
pub fn canonical_json(value: &Value) -> Result<String, ExtractError> {
    serde_jcs::to_string(value).map_err(|e| ExtractError::InvalidSchema {
        detail: format!("cannot canonicalise: {e}"),
    })
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

// ── Built-in schema ──────────────────────────────────────────────────────

static LAB_REPORT_SCHEMA: Lazy<ExtractionSchema> = Lazy::new(|| {
    ExtractionSchema::new(json!({
        "type": "object",
        "title": "Extracted Markdown Document Data",
        "$schema": "http://json-schema.org/draft-07/schema#",
        "required": ["patient_info", "report_dates", "test_results", "clinical_notes"],
        "properties": {
            "patient_info": {
                "type": "object",
                "required": ["name", "age_gender", "report_ref_id", "patient_id", "collected_datetime"],
                "properties": {
                    "name": {"type": "string"},
                    "age_gender": {"type": "string"},
                    "patient_id": {"type": "string"},
                    "report_ref_id": {"type": "string"},
                    "collected_datetime": {"type": "string"}
                }
            },
            "report_dates": {
                "type": "object",
                "required": ["received_datetime", "reported_datetime", "partner", "ref_by", "lab_name"],
                "properties": {
                    "ref_by": {"type": "string"},
                    "partner": {"type": "string"},
                    "lab_name": {"type": "string"},
                    "received_datetime": {"type": "string"},
                    "reported_datetime": {"type": "string"}
                }
            },
            "test_results": {
                "type": "array",
                "items": {
                    "type": "object",
                    "required": ["test_name", "result", "units", "reference_interval"],
                    "properties": {
                        "units": {"type": "string"},
                        "result": {"type": "string"},
                        "test_name": {"type": "string"},
                        "reference_interval": {"type": "string"}
                    }
                }
            },
            "clinical_notes": {
                "type": "array",
                "items": {
                    "type": "object",
                    "required": ["note"],
                    "properties": {"note": {"type": "string"}}
                }
            }
        }
    }))
    .expect("built-in schema is a JSON object")
});
