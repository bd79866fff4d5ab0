//! In-process cache backend.
//!
//! Same contract as [`super::FsCacheStore`] without touching disk. Entries
//! live as long as the store; cloning the store shares them.

use super::{CacheStore, CachedParse, Fingerprint};
use crate::error::CacheError;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

#[derive(Debug, Default, Clone)]
struct Entry {
    parse: Option<CachedParse>,
    extraction: Option<(Fingerprint, Value)>,
}

/// Map-backed [`CacheStore`].
#[derive(Debug, Default, Clone)]
pub struct MemoryCacheStore {
    entries: Arc<Mutex<HashMap<Fingerprint, Entry>>>,
}

impl MemoryCacheStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of documents with at least one artifact.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Schema fingerprint currently stored for `fp`, if any.
    pub fn stored_schema(&self, fp: &Fingerprint) -> Option<Fingerprint> {
        self.lock()
            .get(fp)
            .and_then(|e| e.extraction.as_ref().map(|(schema_fp, _)| schema_fp.clone()))
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<Fingerprint, Entry>> {
        // A panic while holding the lock cannot leave an entry half-updated:
        // every mutation is a single field assignment.
        self.entries.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl CacheStore for MemoryCacheStore {
    async fn get_parse(&self, fp: &Fingerprint) -> Option<CachedParse> {
        self.lock().get(fp).and_then(|e| e.parse.clone())
    }

    async fn put_parse(
        &self,
        fp: &Fingerprint,
        markdown: &str,
        metadata: &Value,
    ) -> Result<(), CacheError> {
        self.lock().entry(fp.clone()).or_default().parse = Some(CachedParse {
            markdown: markdown.to_string(),
            metadata: metadata.clone(),
        });
        Ok(())
    }

    async fn get_extraction(&self, fp: &Fingerprint, schema_fp: &Fingerprint) -> Option<Value> {
        let entries = self.lock();
        match entries.get(fp)?.extraction.as_ref()? {
            (stored, raw) if stored == schema_fp => Some(raw.clone()),
            _ => None,
        }
    }

    async fn put_extraction(
        &self,
        fp: &Fingerprint,
        schema_fp: &Fingerprint,
        raw: &Value,
    ) -> Result<(), CacheError> {
        self.lock().entry(fp.clone()).or_default().extraction =
            Some((schema_fp.clone(), raw.clone()));
        Ok(())
    }

    fn describe(&self) -> String {
        "memory".to_string()
    }
}
