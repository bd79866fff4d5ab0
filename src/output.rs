//! Result types returned by the pipeline.

use crate::error::StageError;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Terminal state of one pipeline run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineOutcome {
    /// Parse and extract both available (from cache or remote).
    Done,
    /// The parse call failed; nothing was cached.
    ParseFailed,
    /// Parse yielded no Markdown, so extraction was not attempted.
    ExtractSkipped,
    /// The extract call failed; parse output is still returned.
    ExtractFailed,
}

impl PipelineOutcome {
    pub fn is_success(self) -> bool {
        self == PipelineOutcome::Done
    }
}

/// Timing and cache-hit statistics for one run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineStats {
    /// Parse output came from the cache.
    pub parse_cached: bool,
    /// Extraction came from the cache under the current schema.
    pub extract_cached: bool,
    /// Wall-clock time of the parse stage, cache lookup included.
    pub parse_duration_ms: u64,
    /// Wall-clock time of the extract stage, cache lookup included.
    pub extract_duration_ms: u64,
    /// Wall-clock time of the whole run, lock wait included.
    pub total_duration_ms: u64,
}

/// Everything the pipeline knows about one processed document.
///
/// Always produced, even when a stage failed: in that case `extraction` holds
/// `{"error": "<message>"}` and `stage_error` says which stage it was.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineResult {
    pub filename: String,
    pub content_type: String,
    /// Hex SHA-256 of the document bytes.
    pub fingerprint: String,
    /// Hex SHA-256 of the canonical schema.
    pub schema_fingerprint: String,
    /// Cleaned Markdown: inline tags stripped, trimmed. Empty on parse failure.
    pub markdown: String,
    /// Parse metadata, `{}` when unavailable.
    pub parse_metadata: Value,
    /// Structured extraction, or `{"error": "<message>"}`.
    pub extraction: Value,
    pub outcome: PipelineOutcome,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stage_error: Option<StageError>,
    pub stats: PipelineStats,
}

impl PipelineResult {
    /// The user-visible error message, if a stage failed.
    pub fn error(&self) -> Option<String> {
        self.stage_error.as_ref().map(ToString::to_string)
    }

    pub fn is_success(&self) -> bool {
        self.stage_error.is_none()
    }

    /// `extraction` pretty-printed, as shown to a human reader.
    pub fn extraction_json(&self) -> String {
        serde_json::to_string_pretty(&self.extraction).unwrap_or_else(|_| "{}".to_string())
    }
}

/// The structured value of a raw extract response: its `extraction` field
/// when present, else the whole response.
pub fn extraction_value(raw: &Value) -> Value {
    match raw.get("extraction") {
        Some(inner) => inner.clone(),
        None => raw.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn extraction_value_unwraps_nested_field() {
        let raw = json!({"extraction": {"patient_info": {"patient_name": "A"}}, "metadata": {}});
        assert_eq!(
            extraction_value(&raw),
            json!({"patient_info": {"patient_name": "A"}})
        );
    }

    #[test]
    fn extraction_value_falls_back_to_whole_response() {
        let raw = json!({"patient_info": {}});
        assert_eq!(extraction_value(&raw), raw);
    }

    #[test]
    fn outcome_serialises_snake_case() {
        assert_eq!(
            serde_json::to_value(PipelineOutcome::ExtractSkipped).unwrap(),
            json!("extract_skipped")
        );
        assert!(PipelineOutcome::Done.is_success());
        assert!(!PipelineOutcome::ParseFailed.is_success());
    }

    #[test]
    fn result_error_and_json() {
        let err = StageError::MissingMarkdown;
        let result = PipelineResult {
            filename: "a.pdf".into(),
            content_type: "application/pdf".into(),
            fingerprint: "00".into(),
            schema_fingerprint: "11".into(),
            markdown: String::new(),
            parse_metadata: json!({}),
            extraction: err.to_payload(),
            outcome: PipelineOutcome::ExtractSkipped,
            stage_error: Some(err),
            stats: PipelineStats::default(),
        };
        assert!(!result.is_success());
        assert_eq!(
            result.error().as_deref(),
            Some("No markdown returned from parse")
        );
        assert!(result.extraction_json().contains("\"error\""));

        let v = serde_json::to_value(&result).unwrap();
        assert_eq!(v["outcome"], "extract_skipped");
        assert_eq!(v["stage_error"]["kind"], "missing_markdown");
    }
}
