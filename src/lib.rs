//! # ade-extract
//!
//! Turn scanned lab reports into structured JSON with the LandingAI ADE
//! service, paying for each remote call at most once.
//!
//! ## Why this crate?
//!
//! ADE works in two billable steps: *parse* (layout-aware OCR to Markdown)
//! and *extract* (schema-guided structured extraction from that Markdown).
//! Users re-upload the same document, and schemas evolve. This crate keys
//! every artifact by the SHA-256 of the document bytes, so a re-upload costs
//! nothing, and keys extractions additionally by the SHA-256 of the schema,
//! so a schema change costs one re-extraction and never a re-parse.
//!
//! ## Pipeline Overview
//!
//! ```text
//! bytes
//!  │
//!  ├─ 1. Fingerprint  SHA-256 of document and of canonical schema
//!  ├─ 2. Parse        cache hit, or remote parse (timeout + retry) then persist
//!  ├─ 3. Extract      cache hit for this schema, or remote extract then persist
//!  └─ 4. Clean        strip <::...::> anchors from Markdown, trim
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use ade_extract::{ExtractionPipeline, PipelineConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // API key read from LANDING_API_KEY
//!     let pipeline = ExtractionPipeline::new(PipelineConfig::default())?;
//!     let result = pipeline.process_source("cbc.pdf").await?;
//!     println!("{}", result.extraction_json());
//!     if let Some(err) = result.error() {
//!         eprintln!("{err}");
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `ade-extract` binary (clap + anyhow + tracing-subscriber + indicatif) |
//!
//! Disable `cli` when using only the library:
//! ```toml
//! ade-extract = { version = "0.1", default-features = false }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod cache;
pub mod config;
pub mod error;
pub mod output;
pub mod pipeline;
pub mod process;
pub mod progress;
pub mod schema;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use cache::{fingerprint, schema_fingerprint, CacheStore, Fingerprint, FsCacheStore, MemoryCacheStore};
pub use config::{PipelineConfig, PipelineConfigBuilder};
pub use error::{CacheError, ExtractError, RemoteError, StageError};
pub use output::{PipelineOutcome, PipelineResult, PipelineStats};
pub use pipeline::input::DocumentInput;
pub use pipeline::remote::{AdeRemote, ParseRequest, ParsedDocument, RemoteExtractor};
pub use process::{process_sync, ExtractionPipeline};
pub use progress::{NoopProgressCallback, PipelineProgressCallback, ProgressCallback};
pub use schema::ExtractionSchema;
