//! Progress-callback trait for per-document pipeline events.
//!
//! Inject an [`Arc<dyn PipelineProgressCallback>`] via
//! [`crate::config::PipelineConfigBuilder::progress_callback`] to observe
//! each stage as it runs, is served from cache, or fails.
//!
//! # Example
//!
//! ```rust
//! use ade_extract::{PipelineConfig, PipelineProgressCallback};
//! use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
//!
//! struct CountRemoteCalls {
//!     calls: AtomicUsize,
//! }
//!
//! impl PipelineProgressCallback for CountRemoteCalls {
//!     fn on_parse_start(&self, _filename: &str) {
//!         self.calls.fetch_add(1, Ordering::SeqCst);
//!     }
//!     fn on_extract_start(&self, _filename: &str) {
//!         self.calls.fetch_add(1, Ordering::SeqCst);
//!     }
//! }
//!
//! let cb = Arc::new(CountRemoteCalls { calls: AtomicUsize::new(0) });
//! let config = PipelineConfig::builder()
//!     .progress_callback(cb as Arc<dyn PipelineProgressCallback>)
//!     .build()
//!     .unwrap();
//! ```

use crate::output::PipelineOutcome;
use std::sync::Arc;

/// Called by the pipeline as it processes a document.
///
/// Implementations must be `Send + Sync`: several documents may be processed
/// concurrently by one pipeline. All methods have default no-op
/// implementations so callers only override what they care about.
///
/// `*_start` fires only when a remote call is about to be made; a cache hit
/// fires `*_cached` instead.
pub trait PipelineProgressCallback: Send + Sync {
    /// Called once per document, after fingerprinting.
    ///
    /// # Arguments
    /// * `filename`    — display name of the document
    /// * `fingerprint` — hex SHA-256 of its bytes
    fn on_document_start(&self, filename: &str, fingerprint: &str) {
        let _ = (filename, fingerprint);
    }

    /// Called just before the parse request is sent.
    fn on_parse_start(&self, filename: &str) {
        let _ = filename;
    }

    /// Called when parse output was found in the cache.
    fn on_parse_cached(&self, filename: &str) {
        let _ = filename;
    }

    /// Called when the parse call succeeded.
    ///
    /// # Arguments
    /// * `markdown_len` — byte length of the raw Markdown
    fn on_parse_complete(&self, filename: &str, markdown_len: usize) {
        let _ = (filename, markdown_len);
    }

    /// Called just before the extract request is sent.
    fn on_extract_start(&self, filename: &str) {
        let _ = filename;
    }

    /// Called when an extraction for the current schema was found in the
    /// cache.
    fn on_extract_cached(&self, filename: &str) {
        let _ = filename;
    }

    /// Called when the extract call succeeded.
    fn on_extract_complete(&self, filename: &str) {
        let _ = filename;
    }

    /// Called when a stage fails after all retries are exhausted.
    ///
    /// # Arguments
    /// * `error` — the message that will appear in `extraction.error`
    fn on_stage_error(&self, filename: &str, error: &str) {
        let _ = (filename, error);
    }

    /// Called once per document with its final outcome. `fingerprint` is
    /// the value passed to the matching `on_document_start`.
    fn on_document_complete(&self, filename: &str, fingerprint: &str, outcome: PipelineOutcome) {
        let _ = (filename, fingerprint, outcome);
    }
}

/// A no-op implementation for callers that don't need progress events.
///
/// This is the default when no callback is configured.
pub struct NoopProgressCallback;

impl PipelineProgressCallback for NoopProgressCallback {}

/// Convenience alias matching the type stored in [`crate::config::PipelineConfig`].
pub type ProgressCallback = Arc<dyn PipelineProgressCallback>;
