//! Input resolution: turn a user-supplied path or URL into document bytes.
//!
//! The pipeline core works on `(bytes, filename, content_type)`. This module
//! is the only place that touches the caller's filesystem or downloads
//! anything; the bytes it returns are what gets fingerprinted.

use crate::error::ExtractError;
use std::io::ErrorKind;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info};

/// A document ready to be fingerprinted and parsed.
#[derive(Debug, Clone)]
pub struct DocumentInput {
    /// Raw document bytes.
    pub bytes: Vec<u8>,
    /// Display name, also sent to the parse endpoint.
    pub filename: String,
    /// MIME type sent with the upload.
    pub content_type: String,
}

impl DocumentInput {
    /// Wrap in-memory bytes, guessing the content type from `filename`.
    pub fn from_bytes(bytes: Vec<u8>, filename: impl Into<String>) -> Self {
        let filename = filename.into();
        let content_type = guess_content_type(&filename);
        Self {
            bytes,
            filename,
            content_type,
        }
    }
}

/// Check if the input string looks like a URL.
pub fn is_url(input: &str) -> bool {
    input.starts_with("http://") || input.starts_with("https://")
}

/// Guess a MIME type from a file name's extension.
///
/// Unknown or missing extensions map to `application/octet-stream`.
pub fn guess_content_type(filename: &str) -> String {
    mime_guess::from_path(filename)
        .first_or_octet_stream()
        .essence_str()
        .to_string()
}

/// Resolve the input string to document bytes.
///
/// URLs are downloaded (bounded by `timeout_secs`); anything else is read as
/// a local path.
pub async fn resolve_input(input: &str, timeout_secs: u64) -> Result<DocumentInput, ExtractError> {
    if is_url(input) {
        download_url(input, timeout_secs).await
    } else {
        read_local(Path::new(input)).await
    }
}

/// Read a local file.
async fn read_local(path: &Path) -> Result<DocumentInput, ExtractError> {
    let bytes = tokio::fs::read(path).await.map_err(|e| match e.kind() {
        ErrorKind::NotFound => ExtractError::FileNotFound {
            path: path.to_path_buf(),
        },
        ErrorKind::PermissionDenied => ExtractError::PermissionDenied {
            path: path.to_path_buf(),
        },
        _ => ExtractError::ReadFailed {
            path: path.to_path_buf(),
            source: e,
        },
    })?;

    let filename = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| path.display().to_string());

    debug!("Read {} bytes from {}", bytes.len(), path.display());
    Ok(DocumentInput::from_bytes(bytes, filename))
}

/// Download a URL into memory.
async fn download_url(url: &str, timeout_secs: u64) -> Result<DocumentInput, ExtractError> {
    info!("Downloading document from: {}", url);

    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .build()
        .map_err(|e| ExtractError::DownloadFailed {
            url: url.to_string(),
            reason: e.to_string(),
        })?;

    let response = client.get(url).send().await.map_err(|e| {
        if e.is_timeout() {
            ExtractError::DownloadTimeout {
                url: url.to_string(),
                secs: timeout_secs,
            }
        } else {
            ExtractError::DownloadFailed {
                url: url.to_string(),
                reason: e.to_string(),
            }
        }
    })?;

    if !response.status().is_success() {
        return Err(ExtractError::DownloadFailed {
            url: url.to_string(),
            reason: format!("HTTP {}", response.status()),
        });
    }

    let header_type = response
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.split(';').next().unwrap_or(v).trim().to_string());

    let bytes = response
        .bytes()
        .await
        .map_err(|e| ExtractError::DownloadFailed {
            url: url.to_string(),
            reason: e.to_string(),
        })?;

    let mut input = DocumentInput::from_bytes(bytes.to_vec(), extract_filename(url));
    if input.content_type == mime_guess::mime::APPLICATION_OCTET_STREAM.essence_str() {
        if let Some(ct) = header_type.filter(|ct| !ct.is_empty()) {
            input.content_type = ct;
        }
    }

    info!("Downloaded {} bytes ({})", input.bytes.len(), input.content_type);
    Ok(input)
}

/// Extract a reasonable filename from the URL path.
fn extract_filename(url: &str) -> String {
    if let Ok(parsed) = reqwest::Url::parse(url) {
        if let Some(mut segments) = parsed.path_segments() {
            if let Some(last) = segments.next_back() {
                if !last.is_empty() && last.contains('.') {
                    return last.to_string();
                }
            }
        }
    }

    "downloaded.pdf".to_string()
}
