//! Filesystem cache backend: one directory per document fingerprint.
//!
//! ## Atomic writes
//!
//! Each artifact is written to a uniquely named staging file inside the
//! entry directory (`tempfile`), flushed, then renamed over its final name.
//! Rename within one directory is atomic on every supported platform, so a
//! reader sees either the previous artifact or the new one and never a
//! partial write, even with two writers racing on the same fingerprint.
//!
//! ## Keeping the extraction pair consistent
//!
//! `schema.hash` and `extracted.json` are two files and cannot be replaced
//! in one rename. `extracted.json` therefore stores an envelope that embeds
//! the schema fingerprint it was produced under, and a lookup only hits when
//! both copies match the requested fingerprint. A crash between the two
//! renames leaves them disagreeing, which reads as a miss.
//!
//! ## Staging leftovers
//!
//! A crash between staging and rename leaves a `.<name>.*.tmp` file in the
//! entry directory. Lookups only open the fixed artifact names, so these are
//! never read. The next write to the same entry deletes any that are older
//! than [`STALE_STAGING_AGE`].

use super::{CacheStore, CachedParse, Fingerprint};
use crate::error::{CacheError, ExtractError};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs;
use tracing::{debug, warn};

/// Parsed markdown, UTF-8 text.
pub const PARSED_MD: &str = "parsed.md";
/// Parse metadata, pretty-printed JSON.
pub const PARSE_META: &str = "parse_meta.json";
/// Schema fingerprint the extraction was produced under, bare hex.
pub const SCHEMA_HASH: &str = "schema.hash";
/// Raw extract response wrapped in an [`ExtractionEnvelope`].
pub const EXTRACTED_JSON: &str = "extracted.json";

/// Staging files older than this belong to a writer that died.
pub const STALE_STAGING_AGE: Duration = Duration::from_secs(60 * 60);

/// On-disk form of `extracted.json`.
#[derive(Debug, Serialize, Deserialize)]
struct ExtractionEnvelope {
    schema_fingerprint: Fingerprint,
    response: Value,
}

/// Directory-per-fingerprint cache rooted at a local path.
#[derive(Debug, Clone)]
pub struct FsCacheStore {
    root: PathBuf,
}

impl FsCacheStore {
    /// Open (creating if necessary) a cache rooted at `root`.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, ExtractError> {
        let root = root.into();
        std::fs::create_dir_all(&root).map_err(|source| ExtractError::CacheUnavailable {
            path: root.clone(),
            source,
        })?;
        debug!("Opened cache at {}", root.display());
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory holding every artifact for `fp`.
    pub fn entry_dir(&self, fp: &Fingerprint) -> PathBuf {
        self.root.join(fp.as_str())
    }

    async fn write_artifacts(
        &self,
        fp: &Fingerprint,
        files: Vec<(&'static str, Vec<u8>)>,
    ) -> Result<(), CacheError> {
        let dir = self.entry_dir(fp);
        tokio::task::spawn_blocking(move || {
            sweep_stale_staging(&dir, STALE_STAGING_AGE);
            for (name, contents) in files {
                write_atomic(&dir, name, &contents)?;
            }
            Ok::<(), CacheError>(())
        })
        .await
        .map_err(|e| CacheError::Task(e.to_string()))?
    }
}

#[async_trait]
impl CacheStore for FsCacheStore {
    async fn get_parse(&self, fp: &Fingerprint) -> Option<CachedParse> {
        let dir = self.entry_dir(fp);

        let markdown = match fs::read_to_string(dir.join(PARSED_MD)).await {
            Ok(md) => md,
            Err(e) if e.kind() == ErrorKind::NotFound => return None,
            Err(e) => {
                warn!(fingerprint = %fp.short(), "Unreadable cached markdown, re-parsing: {}", e);
                return None;
            }
        };

        let metadata = match fs::read(dir.join(PARSE_META)).await {
            Ok(bytes) => serde_json::from_slice(&bytes).unwrap_or_else(|e| {
                warn!(fingerprint = %fp.short(), "Corrupt parse metadata, using {{}}: {}", e);
                empty_object()
            }),
            Err(e) if e.kind() == ErrorKind::NotFound => empty_object(),
            Err(e) => {
                warn!(fingerprint = %fp.short(), "Unreadable parse metadata, using {{}}: {}", e);
                empty_object()
            }
        };

        Some(CachedParse { markdown, metadata })
    }

    async fn put_parse(
        &self,
        fp: &Fingerprint,
        markdown: &str,
        metadata: &Value,
    ) -> Result<(), CacheError> {
        let meta = serde_json::to_vec_pretty(metadata)?;
        // Metadata first: a reader that finds parsed.md also finds its metadata.
        self.write_artifacts(
            fp,
            vec![
                (PARSE_META, meta),
                (PARSED_MD, markdown.as_bytes().to_vec()),
            ],
        )
        .await
    }

    async fn get_extraction(&self, fp: &Fingerprint, schema_fp: &Fingerprint) -> Option<Value> {
        let dir = self.entry_dir(fp);

        let stored = fs::read_to_string(dir.join(SCHEMA_HASH)).await.ok()?;
        if stored.trim() != schema_fp.as_str() {
            debug!(fingerprint = %fp.short(), "Cached extraction is for another schema");
            return None;
        }

        let bytes = match fs::read(dir.join(EXTRACTED_JSON)).await {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(fingerprint = %fp.short(), "Schema hash present but extraction unreadable: {}", e);
                return None;
            }
        };

        let envelope: ExtractionEnvelope = match serde_json::from_slice(&bytes) {
            Ok(env) => env,
            Err(e) => {
                warn!(fingerprint = %fp.short(), "Corrupt cached extraction, re-extracting: {}", e);
                return None;
            }
        };

        if envelope.schema_fingerprint != *schema_fp {
            warn!(fingerprint = %fp.short(), "Extraction and schema hash disagree, re-extracting");
            return None;
        }

        Some(envelope.response)
    }

    async fn put_extraction(
        &self,
        fp: &Fingerprint,
        schema_fp: &Fingerprint,
        raw: &Value,
    ) -> Result<(), CacheError> {
        let envelope = ExtractionEnvelope {
            schema_fingerprint: schema_fp.clone(),
            response: raw.clone(),
        };
        let body = serde_json::to_vec_pretty(&envelope)?;
        self.write_artifacts(
            fp,
            vec![
                (EXTRACTED_JSON, body),
                (SCHEMA_HASH, schema_fp.as_str().as_bytes().to_vec()),
            ],
        )
        .await
    }

    fn describe(&self) -> String {
        format!("fs:{}", self.root.display())
    }
}

/// Write `contents` to `dir/name` via a staging file and atomic rename.
fn write_atomic(dir: &Path, name: &str, contents: &[u8]) -> Result<(), CacheError> {
    let target = dir.join(name);
    let io_err = |path: &Path| {
        let path = path.to_path_buf();
        move |source: std::io::Error| CacheError::Io { path, source }
    };

    std::fs::create_dir_all(dir).map_err(io_err(dir))?;

    let mut staging = tempfile::Builder::new()
        .prefix(&format!(".{name}."))
        .suffix(".tmp")
        .tempfile_in(dir)
        .map_err(io_err(&target))?;
    staging.write_all(contents).map_err(io_err(&target))?;
    staging.as_file().sync_all().map_err(io_err(&target))?;
    staging.persist(&target).map_err(|e| CacheError::Io {
        path: target.clone(),
        source: e.error,
    })?;
    Ok(())
}

/// Delete `.*.tmp` staging files in `dir` last modified more than `max_age`
/// ago. Best effort: failures are logged and skipped.
fn sweep_stale_staging(dir: &Path, max_age: Duration) {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(_) => return,
    };
    for entry in entries.flatten() {
        let name = entry.file_name();
        let name = name.to_string_lossy();
        if !(name.starts_with('.') && name.ends_with(".tmp")) {
            continue;
        }
        let stale = entry
            .metadata()
            .and_then(|m| m.modified())
            .map(|t| t.elapsed().map_or(false, |age| age > max_age))
            .unwrap_or(false);
        if !stale {
            continue;
        }
        match std::fs::remove_file(entry.path()) {
            Ok(()) => debug!("Removed stale staging file {}", entry.path().display()),
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => warn!("Could not remove stale staging file {}: {}", entry.path().display(), e),
        }
    }
}

fn empty_object() -> Value {
    Value::Object(Map::new())
}
