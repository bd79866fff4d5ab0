//! Configuration types for the extraction pipeline.
//!
//! All pipeline behaviour is controlled through [`PipelineConfig`], built via
//! its [`PipelineConfigBuilder`]. Credentials, schema, storage root and
//! endpoints live here rather than in process-global state, so a pipeline
//! can be built in a test with a fake remote and an in-memory store.

use crate::cache::CacheStore;
use crate::error::ExtractError;
use crate::pipeline::remote::RemoteExtractor;
use crate::progress::ProgressCallback;
use crate::schema::ExtractionSchema;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

/// Default parse model.
pub const DEFAULT_MODEL: &str = "dpt-2-latest";

/// Environment variable consulted when no API key is configured.
pub const API_KEY_ENV: &str = "LANDING_API_KEY";

/// Cache root used when the platform has no cache directory.
pub const FALLBACK_CACHE_DIR: &str = "caches";

/// Configuration for an [`crate::ExtractionPipeline`].
///
/// Built via [`PipelineConfig::builder()`] or using
/// [`PipelineConfig::default()`].
///
/// # Example
/// ```rust
/// use ade_extract::PipelineConfig;
///
/// let config = PipelineConfig::builder()
///     .cache_dir("/tmp/ade-cache")
///     .model("dpt-2-latest")
///     .max_retries(1)
///     .build()
///     .unwrap();
/// ```
#[derive(Clone)]
pub struct PipelineConfig {
    /// Root directory of the on-disk cache. Ignored when `store` is set.
    pub cache_dir: PathBuf,

    /// Parse model identifier. Default: `dpt-2-latest`.
    pub model: String,

    /// ADE API key. If None, `LANDING_API_KEY` is read when the pipeline is
    /// built.
    pub api_key: Option<String>,

    /// Parse endpoint.
    pub parse_url: String,

    /// Extract endpoint.
    pub extract_url: String,

    /// Extraction schema. Default: the built-in lab-report schema.
    pub schema: ExtractionSchema,

    /// Per-remote-call timeout in seconds. Default: 300.
    ///
    /// Parsing a long scanned document can take minutes on the service side.
    pub remote_timeout_secs: u64,

    /// Maximum retries on a retryable remote failure. Default: 2.
    ///
    /// Only timeouts, transport failures, 429 and 5xx are retried; a rejected
    /// key or schema fails on the first attempt.
    pub max_retries: u32,

    /// Initial retry delay in milliseconds, doubling per attempt. Default: 500.
    pub retry_backoff_ms: u64,

    /// Serialise concurrent work on the same document. Default: true.
    ///
    /// With this off, two simultaneous calls for an uncached document may
    /// both parse it; the cache stays consistent either way.
    pub single_flight: bool,

    /// Pre-constructed remote capability. Takes precedence over `api_key`.
    pub remote: Option<Arc<dyn RemoteExtractor>>,

    /// Pre-constructed cache store. Takes precedence over `cache_dir`.
    pub store: Option<Arc<dyn CacheStore>>,

    /// Receives per-stage events.
    pub progress_callback: Option<ProgressCallback>,

    /// Download timeout for URL inputs in seconds. Default: 120.
    pub download_timeout_secs: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            cache_dir: default_cache_dir(),
            model: DEFAULT_MODEL.to_string(),
            api_key: None,
            parse_url: ade_client::DEFAULT_PARSE_URL.to_string(),
            extract_url: ade_client::DEFAULT_EXTRACT_URL.to_string(),
            schema: ExtractionSchema::default(),
            remote_timeout_secs: ade_client::DEFAULT_TIMEOUT_SECS,
            max_retries: 2,
            retry_backoff_ms: 500,
            single_flight: true,
            remote: None,
            store: None,
            progress_callback: None,
            download_timeout_secs: 120,
        }
    }
}

impl fmt::Debug for PipelineConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipelineConfig")
            .field("cache_dir", &self.cache_dir)
            .field("model", &self.model)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("parse_url", &self.parse_url)
            .field("extract_url", &self.extract_url)
            .field("schema_fields", &self.schema.required_fields())
            .field("remote_timeout_secs", &self.remote_timeout_secs)
            .field("max_retries", &self.max_retries)
            .field("retry_backoff_ms", &self.retry_backoff_ms)
            .field("single_flight", &self.single_flight)
            .field("remote", &self.remote.as_ref().map(|_| "<dyn RemoteExtractor>"))
            .field("store", &self.store.as_ref().map(|s| s.describe()))
            .field(
                "progress_callback",
                &self.progress_callback.as_ref().map(|_| "<dyn PipelineProgressCallback>"),
            )
            .field("download_timeout_secs", &self.download_timeout_secs)
            .finish()
    }
}

impl PipelineConfig {
    /// Create a new builder for `PipelineConfig`.
    pub fn builder() -> PipelineConfigBuilder {
        PipelineConfigBuilder {
            config: Self::default(),
        }
    }
}

/// `<platform cache dir>/ade-extract`, or `./caches` when the platform has
/// none.
pub fn default_cache_dir() -> PathBuf {
    dirs::cache_dir()
        .map(|d| d.join("ade-extract"))
        .unwrap_or_else(|| PathBuf::from(FALLBACK_CACHE_DIR))
}

/// Builder for [`PipelineConfig`].
#[derive(Debug)]
pub struct PipelineConfigBuilder {
    config: PipelineConfig,
}

impl PipelineConfigBuilder {
    pub fn cache_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.cache_dir = dir.into();
        self
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.config.model = model.into();
        self
    }

    pub fn api_key(mut self, key: impl Into<String>) -> Self {
        self.config.api_key = Some(key.into());
        self
    }

    pub fn parse_url(mut self, url: impl Into<String>) -> Self {
        self.config.parse_url = url.into();
        self
    }

    pub fn extract_url(mut self, url: impl Into<String>) -> Self {
        self.config.extract_url = url.into();
        self
    }

    pub fn schema(mut self, schema: ExtractionSchema) -> Self {
        self.config.schema = schema;
        self
    }

    pub fn remote_timeout_secs(mut self, secs: u64) -> Self {
        self.config.remote_timeout_secs = secs;
        self
    }

    pub fn max_retries(mut self, n: u32) -> Self {
        self.config.max_retries = n;
        self
    }

    pub fn retry_backoff_ms(mut self, ms: u64) -> Self {
        self.config.retry_backoff_ms = ms;
        self
    }

    pub fn single_flight(mut self, v: bool) -> Self {
        self.config.single_flight = v;
        self
    }

    pub fn remote(mut self, remote: Arc<dyn RemoteExtractor>) -> Self {
        self.config.remote = Some(remote);
        self
    }

    pub fn store(mut self, store: Arc<dyn CacheStore>) -> Self {
        self.config.store = Some(store);
        self
    }

    pub fn progress_callback(mut self, cb: ProgressCallback) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    pub fn download_timeout_secs(mut self, secs: u64) -> Self {
        self.config.download_timeout_secs = secs;
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<PipelineConfig, ExtractError> {
        let c = &self.config;
        if c.model.trim().is_empty() {
            return Err(ExtractError::InvalidConfig("Model must not be empty".into()));
        }
        if c.remote_timeout_secs == 0 {
            return Err(ExtractError::InvalidConfig(
                "Remote timeout must be ≥ 1 second".into(),
            ));
        }
        if c.download_timeout_secs == 0 {
            return Err(ExtractError::InvalidConfig(
                "Download timeout must be ≥ 1 second".into(),
            ));
        }
        Ok(self.config)
    }
}
