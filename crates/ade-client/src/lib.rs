//! # ade-client
//!
//! Thin async client for the two LandingAI Agentic Document Extraction (ADE)
//! endpoints used by `ade-extract`:
//!
//! 1. **parse**   — upload a PDF or image, get back layout-aware Markdown plus
//!    a metadata object.
//! 2. **extract** — upload Markdown and a JSON Schema, get back a JSON object
//!    whose `extraction` field conforms to the schema.
//!
//! Both endpoints take `multipart/form-data` and authenticate with
//! `Authorization: Basic <api key>`. The client does no caching or retrying;
//! callers layer those on top.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use ade_client::AdeClient;
//!
//! # async fn run() -> Result<(), ade_client::AdeError> {
//! let client = AdeClient::builder("my-api-key").timeout_secs(300).build()?;
//!
//! let bytes = std::fs::read("report.pdf").expect("read");
//! let parsed = client
//!     .parse(bytes, "report.pdf", "application/pdf", "dpt-2-latest")
//!     .await?;
//!
//! let schema = r#"{"type":"object","properties":{"name":{"type":"string"}}}"#;
//! let response = client.extract(&parsed.markdown, schema).await?;
//! println!("{}", response["extraction"]);
//! # Ok(())
//! # }
//! ```

use std::fmt;
use std::time::Duration;

use reqwest::header::AUTHORIZATION;
use reqwest::multipart::{Form, Part};
use serde::Serialize;
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::debug;

// ── Public constants ─────────────────────────────────────────────────────────

/// Production parse endpoint.
pub const DEFAULT_PARSE_URL: &str = "https://api.va.landing.ai/v1/ade/parse";

/// Production extract endpoint.
pub const DEFAULT_EXTRACT_URL: &str = "https://api.va.landing.ai/v1/ade/extract";

/// Default per-request timeout. Parsing a long scanned document can take
/// several minutes upstream.
pub const DEFAULT_TIMEOUT_SECS: u64 = 300;

/// Longest error body kept in [`AdeError::Status`].
const MAX_ERROR_BODY: usize = 512;

// ── Error type ───────────────────────────────────────────────────────────────

/// Errors returned by [`AdeClient`].
#[derive(Error, Debug)]
pub enum AdeError {
    /// The underlying `reqwest::Client` could not be constructed.
    #[error("Failed to build HTTP client: {0}")]
    Client(#[source] reqwest::Error),

    /// The request did not complete within the configured timeout.
    #[error("Request to {url} timed out after {secs}s")]
    Timeout { url: String, secs: u64 },

    /// Connection, TLS or body-transfer failure.
    #[error("Request to {url} failed: {source}")]
    Request {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    /// The endpoint answered with a non-2xx status.
    #[error("{url} returned HTTP {status}: {body}")]
    Status {
        url: String,
        status: u16,
        body: String,
    },

    /// The endpoint answered 2xx but the body was not a JSON object.
    #[error("Invalid response from {url}: {detail}")]
    Decode { url: String, detail: String },

    /// The caller passed a content type reqwest refuses to put in a header.
    #[error("Invalid content type '{0}'")]
    InvalidContentType(String),
}

/// Whether an HTTP status is worth retrying: `429` and `5xx`.
pub fn is_retryable_status(status: u16) -> bool {
    status == 429 || status >= 500
}

impl AdeError {
    /// HTTP status for [`AdeError::Status`], `None` otherwise.
    pub fn status(&self) -> Option<u16> {
        match self {
            AdeError::Status { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Whether repeating the same request could plausibly succeed.
    ///
    /// Timeouts, transport failures, `429` and `5xx` are retryable; auth
    /// errors, `4xx` and malformed bodies are not.
    pub fn is_retryable(&self) -> bool {
        match self {
            AdeError::Timeout { .. } | AdeError::Request { .. } => true,
            AdeError::Status { status, .. } => is_retryable_status(*status),
            AdeError::Client(_) | AdeError::Decode { .. } | AdeError::InvalidContentType(_) => {
                false
            }
        }
    }
}

// ── Responses ────────────────────────────────────────────────────────────────

/// Decoded body of a successful parse call.
#[derive(Debug, Clone, Serialize)]
pub struct ParseResponse {
    /// Layout-aware Markdown. Empty when the service returned none.
    pub markdown: String,
    /// Auxiliary metadata (page count, credit usage, …). `{}` when absent.
    pub metadata: Value,
}

impl ParseResponse {
    /// Pull `markdown` and `metadata` out of a raw parse response.
    ///
    /// Missing or `null` fields degrade to `""` and `{}` respectively.
    pub fn from_value(value: &Value) -> Self {
        let markdown = value
            .get("markdown")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let metadata = match value.get("metadata") {
            Some(Value::Null) | None => Value::Object(Map::new()),
            Some(other) => other.clone(),
        };
        Self { markdown, metadata }
    }
}

// ── Client ───────────────────────────────────────────────────────────────────

/// Async ADE client. Cheap to clone; clones share one connection pool.
#[derive(Clone)]
pub struct AdeClient {
    http: reqwest::Client,
    api_key: String,
    parse_url: String,
    extract_url: String,
    timeout_secs: u64,
}

impl fmt::Debug for AdeClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AdeClient")
            .field("api_key", &"<redacted>")
            .field("parse_url", &self.parse_url)
            .field("extract_url", &self.extract_url)
            .field("timeout_secs", &self.timeout_secs)
            .finish()
    }
}

/// Builder for [`AdeClient`].
#[derive(Debug)]
pub struct AdeClientBuilder {
    api_key: String,
    parse_url: String,
    extract_url: String,
    timeout_secs: u64,
}

impl AdeClientBuilder {
    pub fn parse_url(mut self, url: impl Into<String>) -> Self {
        self.parse_url = url.into();
        self
    }

    pub fn extract_url(mut self, url: impl Into<String>) -> Self {
        self.extract_url = url.into();
        self
    }

    pub fn timeout_secs(mut self, secs: u64) -> Self {
        self.timeout_secs = secs.max(1);
        self
    }

    pub fn build(self) -> Result<AdeClient, AdeError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(self.timeout_secs))
            .build()
            .map_err(AdeError::Client)?;

        Ok(AdeClient {
            http,
            api_key: self.api_key,
            parse_url: self.parse_url,
            extract_url: self.extract_url,
            timeout_secs: self.timeout_secs,
        })
    }
}

impl AdeClient {
    /// Start building a client for the production endpoints.
    pub fn builder(api_key: impl Into<String>) -> AdeClientBuilder {
        AdeClientBuilder {
            api_key: api_key.into(),
            parse_url: DEFAULT_PARSE_URL.to_string(),
            extract_url: DEFAULT_EXTRACT_URL.to_string(),
            timeout_secs: DEFAULT_TIMEOUT_SECS,
        }
    }

    pub fn parse_url(&self) -> &str {
        &self.parse_url
    }

    pub fn extract_url(&self) -> &str {
        &self.extract_url
    }

    pub fn timeout_secs(&self) -> u64 {
        self.timeout_secs
    }

    /// Upload a document and return its Markdown rendition.
    ///
    /// Form fields: `document` (file part carrying `filename` and
    /// `content_type`) and `model`.
    pub async fn parse(
        &self,
        document: Vec<u8>,
        filename: &str,
        content_type: &str,
        model: &str,
    ) -> Result<ParseResponse, AdeError> {
        let size = document.len();
        let part = Part::bytes(document)
            .file_name(filename.to_string())
            .mime_str(content_type)
            .map_err(|_| AdeError::InvalidContentType(content_type.to_string()))?;
        let form = Form::new()
            .part("document", part)
            .text("model", model.to_string());

        debug!(filename, content_type, model, size, "ADE parse request");
        let value = self.post_form(&self.parse_url, form).await?;
        Ok(ParseResponse::from_value(&value))
    }

    /// Run structured extraction over `markdown` against `schema_json`.
    ///
    /// Form fields: `markdown` (file part `document.md`, `text/markdown`) and
    /// `schema` (the schema serialised as a JSON string). Returns the raw
    /// response object; the structured value lives under `extraction`.
    pub async fn extract(&self, markdown: &str, schema_json: &str) -> Result<Value, AdeError> {
        let part = Part::text(markdown.to_string())
            .file_name("document.md")
            .mime_str("text/markdown")
            .map_err(|_| AdeError::InvalidContentType("text/markdown".to_string()))?;
        let form = Form::new()
            .part("markdown", part)
            .text("schema", schema_json.to_string());

        debug!(markdown_len = markdown.len(), "ADE extract request");
        self.post_form(&self.extract_url, form).await
    }

    async fn post_form(&self, url: &str, form: Form) -> Result<Value, AdeError> {
        let response = self
            .http
            .post(url)
            .header(AUTHORIZATION, format!("Basic {}", self.api_key))
            .multipart(form)
            .send()
            .await
            .map_err(|e| self.transport_error(url, e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AdeError::Status {
                url: url.to_string(),
                status: status.as_u16(),
                body: truncate(&body, MAX_ERROR_BODY),
            });
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| self.transport_error(url, e))?;

        let value: Value = serde_json::from_slice(&bytes).map_err(|e| AdeError::Decode {
            url: url.to_string(),
            detail: e.to_string(),
        })?;

        if !value.is_object() {
            return Err(AdeError::Decode {
                url: url.to_string(),
                detail: "expected a JSON object".to_string(),
            });
        }

        Ok(value)
    }

    fn transport_error(&self, url: &str, e: reqwest::Error) -> AdeError {
        if e.is_timeout() {
            AdeError::Timeout {
                url: url.to_string(),
                secs: self.timeout_secs,
            }
        } else {
            AdeError::Request {
                url: url.to_string(),
                source: e,
            }
        }
    }
}

fn truncate(s: &str, max: usize) -> String {
    if s.len() <= max {
        return s.to_string();
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}\u{2026}", &s[..end])
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parse_response_defaults_missing_fields() {
        let r = ParseResponse::from_value(&json!({}));
        assert_eq!(r.markdown, "");
        assert_eq!(r.metadata, json!({}));
    }

    #[test]
    fn parse_response_null_metadata_becomes_empty_object() {
        let r = ParseResponse::from_value(&json!({"markdown": "# Hi", "metadata": null}));
        assert_eq!(r.markdown, "# Hi");
        assert_eq!(r.metadata, json!({}));
    }

    #[test]
    fn retryable_classification() {
        let status = |s| AdeError::Status {
            url: "u".into(),
            status: s,
            body: String::new(),
        };
        assert!(status(429).is_retryable());
        assert!(status(503).is_retryable());
        assert!(!status(401).is_retryable());
        assert!(!status(422).is_retryable());
        assert!(AdeError::Timeout {
            url: "u".into(),
            secs: 1
        }
        .is_retryable());
        assert!(!AdeError::Decode {
            url: "u".into(),
            detail: "x".into()
        }
        .is_retryable());
    }

    #[test]
    fn debug_redacts_api_key() {
        let client = AdeClient::builder("super-secret").build().unwrap();
        let dbg = format!("{client:?}");
        assert!(!dbg.contains("super-secret"));
        assert!(dbg.contains("<redacted>"));
    }

    #[test]
    fn truncate_respects_char_boundaries() {
        let s = "é".repeat(10);
        let t = truncate(&s, 5);
        assert!(t.ends_with('\u{2026}'));
        assert_eq!(truncate("short", 10), "short");
    }
}
