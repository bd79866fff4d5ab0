//! Pipeline entry points: fingerprint, parse, extract, clean.
//!
//! [`ExtractionPipeline::process`] runs one document through the state
//! machine below and always returns a [`PipelineResult`]; a failed stage
//! becomes an `{"error": ...}` payload rather than an `Err`.
//!
//! ```text
//! fingerprint ─▶ parse cached? ─yes─────────────┐
//!                    │ no                        ▼
//!                    └─▶ remote parse ─ok─▶ markdown empty? ─yes─▶ ExtractSkipped
//!                             │ err                 │ no
//!                             ▼                     ▼
//!                        ParseFailed        extraction cached for schema? ─yes─▶ Done
//!                                                   │ no
//!                                                   └─▶ remote extract ─ok─▶ Done
//!                                                              │ err
//!                                                              ▼
//!                                                        ExtractFailed
//! ```
//!
//! Only `Err(ExtractError)` paths are construction (no API key, unusable
//! cache root) and input resolution (missing file, failed download).

use crate::cache::{schema_fingerprint, CacheStore, CachedParse, Fingerprint, FsCacheStore};
use crate::config::{PipelineConfig, API_KEY_ENV};
use crate::error::{ExtractError, StageError};
use crate::output::{extraction_value, PipelineOutcome, PipelineResult, PipelineStats};
use crate::pipeline::inflight::KeyedLocks;
use crate::pipeline::input::{self, DocumentInput};
use crate::pipeline::postprocess;
use crate::pipeline::remote::{call_with_retry, AdeRemote, ParseRequest, RemoteExtractor, RetryPolicy};
use crate::progress::PipelineProgressCallback;
use crate::schema::ExtractionSchema;
use serde_json::{json, Value};
use std::fmt;
use std::io::Write;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Cache-first parse/extract pipeline bound to one remote and one store.
///
/// Cheap to share behind an `Arc`; concurrent calls for different documents
/// run in parallel, calls for the same document are serialised when
/// `single_flight` is on.
pub struct ExtractionPipeline {
    config: PipelineConfig,
    remote: Arc<dyn RemoteExtractor>,
    store: Arc<dyn CacheStore>,
    inflight: KeyedLocks,
    retry: RetryPolicy,
}

impl fmt::Debug for ExtractionPipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExtractionPipeline")
            .field("config", &self.config)
            .field("store", &self.store.describe())
            .field("retry", &self.retry)
            .finish()
    }
}

impl ExtractionPipeline {
    /// Build a pipeline, resolving the remote capability and cache store.
    ///
    /// # Errors
    /// - [`ExtractError::ProviderNotConfigured`] when no remote was injected
    ///   and no API key is configured or set in `LANDING_API_KEY`
    /// - [`ExtractError::CacheUnavailable`] when the cache root cannot be
    ///   created
    pub fn new(config: PipelineConfig) -> Result<Self, ExtractError> {
        let remote = resolve_remote(&config)?;
        let store = resolve_store(&config)?;
        info!(
            "Pipeline ready: cache={}, model={}",
            store.describe(),
            config.model
        );
        Ok(Self {
            retry: RetryPolicy::from_config(&config),
            inflight: KeyedLocks::new(),
            remote,
            store,
            config,
        })
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn CacheStore> {
        &self.store
    }

    /// Process an uploaded document.
    ///
    /// The content type is guessed from `filename`. Never fails; check
    /// [`PipelineResult::error`].
    pub async fn process(
        &self,
        file_bytes: &[u8],
        filename: &str,
        model: &str,
        schema: &ExtractionSchema,
    ) -> PipelineResult {
        let content_type = input::guess_content_type(filename);
        self.run(file_bytes, filename, &content_type, model, schema)
            .await
    }

    /// Process a resolved document with the configured model and schema.
    pub async fn process_input(&self, doc: &DocumentInput) -> PipelineResult {
        self.run(
            &doc.bytes,
            &doc.filename,
            &doc.content_type,
            &self.config.model,
            &self.config.schema,
        )
        .await
    }

    /// Read a local path or download a URL, then process it.
    ///
    /// # Errors
    /// Only input resolution errors; stage failures are in the result.
    pub async fn process_source(
        &self,
        source: impl AsRef<str>,
    ) -> Result<PipelineResult, ExtractError> {
        let doc = input::resolve_input(source.as_ref(), self.config.download_timeout_secs).await?;
        Ok(self.process_input(&doc).await)
    }

    /// Process `source` and write the result as pretty JSON to `output_path`.
    ///
    /// Uses atomic write (temp file + rename) to prevent partial files.
    pub async fn process_to_file(
        &self,
        source: impl AsRef<str>,
        output_path: impl AsRef<Path>,
    ) -> Result<PipelineResult, ExtractError> {
        let result = self.process_source(source).await?;
        let path = output_path.as_ref().to_path_buf();
        let body = serde_json::to_vec_pretty(&result)
            .map_err(|e| ExtractError::Internal(format!("serialise result: {e}")))?;

        tokio::task::spawn_blocking(move || write_output(&path, &body))
            .await
            .map_err(|e| ExtractError::Internal(format!("output write task: {e}")))??;

        Ok(result)
    }

    async fn run(
        &self,
        bytes: &[u8],
        filename: &str,
        content_type: &str,
        model: &str,
        schema: &ExtractionSchema,
    ) -> PipelineResult {
        let total_start = Instant::now();
        let fp = Fingerprint::of(bytes);
        let schema_fp = schema_fingerprint(schema);
        info!(
            "Processing {} ({} bytes, fp={}, schema={})",
            filename,
            bytes.len(),
            fp.short(),
            schema_fp.short()
        );

        let _guard = if self.config.single_flight {
            Some(self.inflight.lock(fp.as_str()).await)
        } else {
            None
        };
        self.notify(|cb| cb.on_document_start(filename, fp.as_str()));

        let mut result = PipelineResult {
            filename: filename.to_string(),
            content_type: content_type.to_string(),
            fingerprint: fp.to_string(),
            schema_fingerprint: schema_fp.to_string(),
            markdown: String::new(),
            parse_metadata: json!({}),
            extraction: json!({}),
            outcome: PipelineOutcome::Done,
            stage_error: None,
            stats: PipelineStats::default(),
        };

        // ── Stage 1: Parse ───────────────────────────────────────────────
        let parse_start = Instant::now();
        let parsed = self
            .parse_stage(&fp, bytes, filename, content_type, model)
            .await;
        result.stats.parse_duration_ms = parse_start.elapsed().as_millis() as u64;

        let parsed = match parsed {
            Ok((parsed, cached)) => {
                result.stats.parse_cached = cached;
                parsed
            }
            Err(e) => return self.fail(result, e, PipelineOutcome::ParseFailed, total_start),
        };

        result.markdown = postprocess::clean_markdown(&parsed.markdown);
        result.parse_metadata = parsed.metadata;

        if parsed.markdown.is_empty() {
            return self.fail(
                result,
                StageError::MissingMarkdown,
                PipelineOutcome::ExtractSkipped,
                total_start,
            );
        }

        // ── Stage 2: Extract ─────────────────────────────────────────────
        let extract_start = Instant::now();
        let extracted = self
            .extract_stage(&fp, &schema_fp, &parsed.markdown, schema, filename)
            .await;
        result.stats.extract_duration_ms = extract_start.elapsed().as_millis() as u64;

        match extracted {
            Ok((raw, cached)) => {
                result.stats.extract_cached = cached;
                result.extraction = extraction_value(&raw);
            }
            Err(e) => return self.fail(result, e, PipelineOutcome::ExtractFailed, total_start),
        }

        self.complete(result, total_start)
    }

    /// Cached parse output, or a fresh remote parse persisted on success.
    async fn parse_stage(
        &self,
        fp: &Fingerprint,
        bytes: &[u8],
        filename: &str,
        content_type: &str,
        model: &str,
    ) -> Result<(CachedParse, bool), StageError> {
        if let Some(hit) = self.store.get_parse(fp).await {
            debug!("Parse cache hit for {}", fp.short());
            self.notify(|cb| cb.on_parse_cached(filename));
            return Ok((hit, true));
        }

        self.notify(|cb| cb.on_parse_start(filename));
        let request = ParseRequest {
            bytes,
            filename,
            content_type,
            model,
        };
        let remote = &self.remote;
        let parsed = call_with_retry("parse", &self.retry, move || remote.parse(request))
            .await
            .map_err(|e| StageError::ParseFailed {
                detail: e.to_string(),
            })?;

        info!(
            "Parsed {}: {} bytes of markdown",
            filename,
            parsed.markdown.len()
        );
        self.notify(|cb| cb.on_parse_complete(filename, parsed.markdown.len()));

        if let Err(e) = self
            .store
            .put_parse(fp, &parsed.markdown, &parsed.metadata)
            .await
        {
            warn!("Could not cache parse output for {}: {}", fp.short(), e);
        }

        Ok((
            CachedParse {
                markdown: parsed.markdown,
                metadata: parsed.metadata,
            },
            false,
        ))
    }

    /// Cached extraction for `schema_fp`, or a fresh remote extract
    /// persisted on success. Failures are never cached.
    async fn extract_stage(
        &self,
        fp: &Fingerprint,
        schema_fp: &Fingerprint,
        markdown: &str,
        schema: &ExtractionSchema,
        filename: &str,
    ) -> Result<(Value, bool), StageError> {
        if let Some(hit) = self.store.get_extraction(fp, schema_fp).await {
            debug!(
                "Extraction cache hit for {} (schema {})",
                fp.short(),
                schema_fp.short()
            );
            self.notify(|cb| cb.on_extract_cached(filename));
            return Ok((hit, true));
        }

        self.notify(|cb| cb.on_extract_start(filename));
        let remote = &self.remote;
        let raw = call_with_retry("extract", &self.retry, move || {
            remote.extract(markdown, schema)
        })
        .await
        .map_err(|e| StageError::ExtractFailed {
            detail: e.to_string(),
        })?;

        info!("Extracted {}", filename);
        self.notify(|cb| cb.on_extract_complete(filename));

        if let Err(e) = self.store.put_extraction(fp, schema_fp, &raw).await {
            warn!("Could not cache extraction for {}: {}", fp.short(), e);
        }

        Ok((raw, false))
    }

    fn fail(
        &self,
        mut result: PipelineResult,
        error: StageError,
        outcome: PipelineOutcome,
        total_start: Instant,
    ) -> PipelineResult {
        let message = error.to_string();
        warn!("{}: {}", result.filename, message);
        self.notify(|cb| cb.on_stage_error(&result.filename, &message));

        result.extraction = error.to_payload();
        result.outcome = outcome;
        result.stage_error = Some(error);
        self.complete(result, total_start)
    }

    fn complete(&self, mut result: PipelineResult, total_start: Instant) -> PipelineResult {
        result.stats.total_duration_ms = total_start.elapsed().as_millis() as u64;
        info!(
            "{}: {:?} in {}ms (parse {}, extract {})",
            result.filename,
            result.outcome,
            result.stats.total_duration_ms,
            if result.stats.parse_cached { "cached" } else { "remote" },
            if result.stats.extract_cached { "cached" } else { "remote" },
        );
        self.notify(|cb| {
            cb.on_document_complete(&result.filename, &result.fingerprint, result.outcome)
        });
        result
    }

    fn notify(&self, f: impl FnOnce(&dyn PipelineProgressCallback)) {
        if let Some(ref cb) = self.config.progress_callback {
            f(cb.as_ref());
        }
    }
}

/// Synchronous wrapper: build a pipeline and process one path or URL.
///
/// Creates a temporary tokio runtime internally.
pub fn process_sync(
    source: impl AsRef<str>,
    config: &PipelineConfig,
) -> Result<PipelineResult, ExtractError> {
    tokio::runtime::Runtime::new()
        .map_err(|e| ExtractError::Internal(format!("Failed to create tokio runtime: {}", e)))?
        .block_on(async {
            let pipeline = ExtractionPipeline::new(config.clone())?;
            pipeline.process_source(source).await
        })
}

// ── Internal helpers ─────────────────────────────────────────────────────

/// Resolve the remote capability, from most-specific to least-specific:
/// injected remote, configured API key, `LANDING_API_KEY`.
fn resolve_remote(config: &PipelineConfig) -> Result<Arc<dyn RemoteExtractor>, ExtractError> {
    if let Some(ref remote) = config.remote {
        return Ok(Arc::clone(remote));
    }

    if let Some(key) = config.api_key.as_deref().filter(|k| !k.trim().is_empty()) {
        return Ok(Arc::new(AdeRemote::from_config(config, key.trim())?));
    }

    match std::env::var(API_KEY_ENV) {
        Ok(key) if !key.trim().is_empty() => {
            Ok(Arc::new(AdeRemote::from_config(config, key.trim())?))
        }
        _ => Err(ExtractError::ProviderNotConfigured {
            hint: format!(
                "Set {API_KEY_ENV} in the environment or pass an API key explicitly."
            ),
        }),
    }
}

fn resolve_store(config: &PipelineConfig) -> Result<Arc<dyn CacheStore>, ExtractError> {
    if let Some(ref store) = config.store {
        return Ok(Arc::clone(store));
    }
    Ok(Arc::new(FsCacheStore::open(&config.cache_dir)?))
}

fn write_output(path: &Path, body: &[u8]) -> Result<(), ExtractError> {
    let err = |source: std::io::Error| ExtractError::OutputWriteFailed {
        path: path.to_path_buf(),
        source,
    };

    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(parent).map_err(err)?;

    let mut tmp = tempfile::NamedTempFile::new_in(parent).map_err(err)?;
    tmp.write_all(body).map_err(err)?;
    tmp.persist(path).map_err(|e| err(e.error))?;
    Ok(())
}
