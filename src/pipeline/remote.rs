//! Remote parse/extract capability and the retry loop around it.
//!
//! [`RemoteExtractor`] is the seam between the pipeline and the outside
//! world. [`AdeRemote`] implements it over [`ade_client::AdeClient`]; tests
//! and embedders inject their own implementation through
//! [`crate::config::PipelineConfigBuilder::remote`].
//!
//! ## Retry Strategy
//!
//! Every remote call runs under a timeout. Timeouts, transport failures,
//! HTTP 429 and 5xx are retried with exponential backoff
//! (`backoff_ms * 2^attempt`); anything else fails immediately. With 500 ms
//! base and 2 retries the waits are 500 ms → 1 s.

use crate::config::PipelineConfig;
use crate::error::{ExtractError, RemoteError};
use crate::schema::ExtractionSchema;
use ade_client::AdeClient;
use async_trait::async_trait;
use serde_json::Value;
use std::future::Future;
use std::time::Duration;
use tokio::time::{sleep, timeout};
use tracing::warn;

/// Borrowed arguments of a parse call.
#[derive(Debug, Clone, Copy)]
pub struct ParseRequest<'a> {
    pub bytes: &'a [u8],
    pub filename: &'a str,
    pub content_type: &'a str,
    pub model: &'a str,
}

/// Output of a successful parse call.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedDocument {
    /// Markdown including inline `<::...::>` tags; may be empty.
    pub markdown: String,
    /// Opaque metadata object.
    pub metadata: Value,
}

/// The external OCR/extraction service.
#[async_trait]
pub trait RemoteExtractor: Send + Sync {
    /// Layout-parse a document into Markdown.
    async fn parse(&self, request: ParseRequest<'_>) -> Result<ParsedDocument, RemoteError>;

    /// Extract structured data from Markdown. Returns the raw response; the
    /// structured value is under `extraction` when the service nests it.
    async fn extract(
        &self,
        markdown: &str,
        schema: &ExtractionSchema,
    ) -> Result<Value, RemoteError>;
}

/// [`RemoteExtractor`] backed by the LandingAI ADE REST API.
#[derive(Debug, Clone)]
pub struct AdeRemote {
    client: AdeClient,
}

impl AdeRemote {
    pub fn new(client: AdeClient) -> Self {
        Self { client }
    }

    /// Build a client from the endpoints and timeout in `config`.
    pub fn from_config(config: &PipelineConfig, api_key: &str) -> Result<Self, ExtractError> {
        let client = AdeClient::builder(api_key)
            .parse_url(config.parse_url.clone())
            .extract_url(config.extract_url.clone())
            .timeout_secs(config.remote_timeout_secs)
            .build()
            .map_err(|e| ExtractError::InvalidConfig(format!("HTTP client: {e}")))?;
        Ok(Self::new(client))
    }

    pub fn client(&self) -> &AdeClient {
        &self.client
    }
}

#[async_trait]
impl RemoteExtractor for AdeRemote {
    async fn parse(&self, request: ParseRequest<'_>) -> Result<ParsedDocument, RemoteError> {
        let response = self
            .client
            .parse(
                request.bytes.to_vec(),
                request.filename,
                request.content_type,
                request.model,
            )
            .await?;
        Ok(ParsedDocument {
            markdown: response.markdown,
            metadata: response.metadata,
        })
    }

    async fn extract(
        &self,
        markdown: &str,
        schema: &ExtractionSchema,
    ) -> Result<Value, RemoteError> {
        Ok(self.client.extract(markdown, schema.canonical_json()).await?)
    }
}

/// Timeout and retry settings for one remote call.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub timeout: Duration,
    pub max_retries: u32,
    pub backoff_ms: u64,
}

impl RetryPolicy {
    pub fn from_config(config: &PipelineConfig) -> Self {
        Self {
            timeout: Duration::from_secs(config.remote_timeout_secs),
            max_retries: config.max_retries,
            backoff_ms: config.retry_backoff_ms,
        }
    }
}

/// Run `call` under `policy`, retrying retryable failures.
///
/// Returns the first success, the first non-retryable error, or the last
/// error once retries are exhausted.
pub async fn call_with_retry<T, F, Fut>(
    stage: &str,
    policy: &RetryPolicy,
    mut call: F,
) -> Result<T, RemoteError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, RemoteError>>,
{
    let mut attempt: u32 = 0;
    loop {
        let result = match timeout(policy.timeout, call()).await {
            Ok(result) => result,
            Err(_) => Err(RemoteError::Timeout {
                secs: policy.timeout.as_secs(),
            }),
        };

        match result {
            Ok(value) => return Ok(value),
            Err(e) if e.is_retryable() && attempt < policy.max_retries => {
                attempt += 1;
                let backoff = policy.backoff_ms * 2u64.pow(attempt - 1);
                warn!(
                    "{}: attempt {} failed: {}; retry {}/{} after {}ms",
                    stage, attempt, e, attempt, policy.max_retries, backoff
                );
                sleep(Duration::from_millis(backoff)).await;
            }
            Err(e) => return Err(e),
        }
    }
}
