//! Content-addressed two-tier cache for pipeline artifacts.
//!
//! Every uploaded document is identified by its [`Fingerprint`], the SHA-256
//! of its raw bytes. A cache entry for a fingerprint holds up to four
//! artifacts, validated independently:
//!
//! ```text
//! <fingerprint>/
//!  ├─ parsed.md         markdown from the parse stage      (tier 1)
//!  ├─ parse_meta.json   metadata returned alongside it     (tier 1)
//!  ├─ schema.hash       fingerprint of the schema used     (tier 2)
//!  └─ extracted.json    raw extract response               (tier 2)
//! ```
//!
//! Tier 1 depends only on document content and is written once. Tier 2 is
//! valid only while the stored schema fingerprint equals the fingerprint of
//! the schema in use, so a schema change costs one re-extraction per document
//! on next access and never a re-parse.
//!
//! Reads never fail: a missing, unreadable or corrupt artifact is a miss and
//! the pipeline recomputes it. Writes replace whole artifacts atomically.
//!
//! Backends:
//! - [`fs::FsCacheStore`]     — directory per fingerprint on local disk
//! - [`memory::MemoryCacheStore`] — process-local map, for tests and embedding

pub mod fs;
pub mod memory;

use crate::error::CacheError;
use crate::schema::ExtractionSchema;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;

pub use fs::FsCacheStore;
pub use memory::MemoryCacheStore;

/// Length of a hex-encoded SHA-256 digest.
const FINGERPRINT_LEN: usize = 64;

/// SHA-256 content fingerprint, 64 lowercase hex characters.
///
/// Only constructible by hashing or by parsing a well-formed digest, so it is
/// always safe to use as a path component.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Hash raw bytes.
    pub fn of(bytes: &[u8]) -> Self {
        Self(format!("{:x}", Sha256::digest(bytes)))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// First 12 hex characters, for log lines.
    pub fn short(&self) -> &str {
        &self.0[..12]
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for Fingerprint {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl FromStr for Fingerprint {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.len() == FINGERPRINT_LEN
            && s.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
        {
            Ok(Self(s.to_string()))
        } else {
            Err(format!("not a SHA-256 hex digest: {s:?}"))
        }
    }
}

impl TryFrom<String> for Fingerprint {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<Fingerprint> for String {
    fn from(fp: Fingerprint) -> Self {
        fp.0
    }
}

/// Document fingerprint: SHA-256 of the raw uploaded bytes.
pub fn fingerprint(bytes: &[u8]) -> Fingerprint {
    Fingerprint::of(bytes)
}

/// Schema fingerprint: SHA-256 of the schema's canonical serialisation.
///
/// Structurally identical schemas hash identically regardless of key order
/// or number spelling.
pub fn schema_fingerprint(schema: &ExtractionSchema) -> Fingerprint {
    Fingerprint::of(schema.canonical_json().as_bytes())
}

/// Tier-1 artifacts for one document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedParse {
    /// Markdown exactly as the parse stage returned it (tags included).
    pub markdown: String,
    /// Parse metadata; `{}` when the stored copy was missing or corrupt.
    pub metadata: Value,
}

/// Durable storage for pipeline artifacts, keyed by [`Fingerprint`].
///
/// `get_*` methods never fail; anything other than a valid, matching
/// artifact is `None`. `put_*` methods replace whole artifacts so concurrent
/// writers of identical content cannot leave a torn file behind.
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Cached markdown and metadata for `fp`, or `None` when no readable
    /// markdown exists.
    async fn get_parse(&self, fp: &Fingerprint) -> Option<CachedParse>;

    /// Store markdown and metadata for `fp`. Does not check for an existing
    /// entry.
    async fn put_parse(
        &self,
        fp: &Fingerprint,
        markdown: &str,
        metadata: &Value,
    ) -> Result<(), CacheError>;

    /// The raw extract response cached for `fp`, only if it was produced
    /// under `schema_fp`.
    async fn get_extraction(&self, fp: &Fingerprint, schema_fp: &Fingerprint) -> Option<Value>;

    /// Store the raw extract response for `fp` together with `schema_fp`,
    /// replacing whatever was cached under a previous schema.
    async fn put_extraction(
        &self,
        fp: &Fingerprint,
        schema_fp: &Fingerprint,
        raw: &Value,
    ) -> Result<(), CacheError>;

    /// Short human-readable description for logs.
    fn describe(&self) -> String;
}
