//! Error types for the ade-extract library.
//!
//! Four error types reflect four distinct failure domains:
//!
//! * [`ExtractError`] — **Fatal**: the pipeline cannot be built or the input
//!   cannot be read at all (missing file, no API key, unusable cache root).
//!   Returned as `Err(ExtractError)` from constructors and input resolution.
//!
//! * [`StageError`] — **Non-fatal**: the parse or extract stage failed for
//!   one document. Stored inside [`crate::output::PipelineResult`] and
//!   rendered into its `extraction` field as `{"error": "<message>"}`, so
//!   [`crate::process::ExtractionPipeline::process`] always answers.
//!
//! * [`RemoteError`] — what a [`crate::pipeline::remote::RemoteExtractor`]
//!   returns. Converted to a [`StageError`] at the call site.
//!
//! * [`CacheError`] — a cache write failed. Logged and otherwise ignored by
//!   the pipeline; reads never error (corruption is a miss).

use std::path::PathBuf;
use thiserror::Error;

/// All fatal errors returned by the ade-extract library.
#[derive(Debug, Error)]
pub enum ExtractError {
    // ── Input errors ──────────────────────────────────────────────────────
    /// Input file was not found at the given path.
    #[error("Document not found: '{path}'\nCheck the path exists and is readable.")]
    FileNotFound { path: PathBuf },

    /// Process does not have read permission on the file.
    #[error("Permission denied reading '{path}'\nTry: chmod +r {path:?}")]
    PermissionDenied { path: PathBuf },

    /// The file exists but reading it failed.
    #[error("Failed to read '{path}': {source}")]
    ReadFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// HTTP URL was syntactically valid but download failed.
    #[error("Failed to download '{url}': {reason}\nCheck your internet connection.")]
    DownloadFailed { url: String, reason: String },

    /// Download exceeded the configured timeout.
    #[error("Download timed out after {secs}s for '{url}'\nIncrease --download-timeout.")]
    DownloadTimeout { url: String, secs: u64 },

    // ── Schema errors ─────────────────────────────────────────────────────
    /// The extraction schema is not a JSON object or could not be read.
    #[error("Invalid extraction schema: {detail}")]
    InvalidSchema { detail: String },

    // ── Remote errors ─────────────────────────────────────────────────────
    /// No remote capability could be constructed (missing API key etc.).
    #[error("ADE remote is not configured.\n{hint}")]
    ProviderNotConfigured { hint: String },

    // ── Cache errors ──────────────────────────────────────────────────────
    /// The cache root could not be created or opened.
    #[error("Cache directory '{path}' is unavailable: {source}")]
    CacheUnavailable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── I/O errors ────────────────────────────────────────────────────────
    /// Could not create or write the output file.
    #[error("Failed to write output file '{path}': {source}")]
    OutputWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// A non-fatal failure of one pipeline stage for one document.
///
/// The `Display` text is exactly what callers see in
/// `extraction.error`.
#[derive(Debug, Clone, PartialEq, Eq, Error, serde::Serialize, serde::Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StageError {
    /// The remote parse call failed; extraction was not attempted.
    #[error("Parse failed: {detail}")]
    ParseFailed { detail: String },

    /// Parse produced no markdown, so there was nothing to extract from.
    #[error("No markdown returned from parse")]
    MissingMarkdown,

    /// The remote extract call failed.
    #[error("Extract failed: {detail}")]
    ExtractFailed { detail: String },
}

impl StageError {
    /// The `{"error": "<message>"}` payload placed in a result's
    /// `extraction` field.
    pub fn to_payload(&self) -> serde_json::Value {
        serde_json::json!({ "error": self.to_string() })
    }
}

/// Failure of the remote parse or extract capability.
#[derive(Debug, Error)]
pub enum RemoteError {
    /// The call did not finish within the pipeline's timeout.
    #[error("timed out after {secs}s")]
    Timeout { secs: u64 },

    /// Connection or transfer failure.
    #[error("{0}")]
    Transport(String),

    /// The service answered with a non-success status.
    #[error("HTTP {status}: {body}")]
    Status { status: u16, body: String },

    /// The service answered but the body was unusable.
    #[error("malformed response: {0}")]
    Malformed(String),

    /// The request was never sent because it could not be built.
    #[error("{0}")]
    Rejected(String),
}

impl RemoteError {
    /// Whether repeating the call could plausibly succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            RemoteError::Timeout { .. } | RemoteError::Transport(_) => true,
            RemoteError::Status { status, .. } => ade_client::is_retryable_status(*status),
            RemoteError::Malformed(_) | RemoteError::Rejected(_) => false,
        }
    }
}

impl From<ade_client::AdeError> for RemoteError {
    fn from(e: ade_client::AdeError) -> Self {
        use ade_client::AdeError;
        let retryable = e.is_retryable();
        match e {
            AdeError::Timeout { secs, .. } => RemoteError::Timeout { secs },
            AdeError::Status { status, body, .. } => RemoteError::Status { status, body },
            AdeError::Decode { detail, .. } => RemoteError::Malformed(detail),
            other if retryable => RemoteError::Transport(other.to_string()),
            other => RemoteError::Rejected(other.to_string()),
        }
    }
}

/// A cache write failed.
#[derive(Debug, Error)]
pub enum CacheError {
    /// Filesystem failure while staging or renaming an artifact.
    #[error("Cache I/O error at '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// An artifact could not be serialised.
    #[error("Failed to serialise cache artifact: {0}")]
    Serialize(#[from] serde_json::Error),

    /// Background write task panicked or was cancelled.
    #[error("Cache write task failed: {0}")]
    Task(String),
}
