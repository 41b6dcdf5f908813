//! In-memory fakes for storage traits
//!
//! Provides `MemoryVersionStore` and `MemoryBaselineStore` that satisfy the
//! trait contracts without any external dependencies. Used by tests.

use std::collections::HashMap;
use std::sync::{Mutex, RwLock};

use async_trait::async_trait;
use chrono::Utc;

use crate::error::StorageError;
use crate::storage_traits::*;

fn poisoned<T>(_: T) -> StorageError {
    StorageError::Backend("in-memory store lock poisoned".to_string())
}

/// Rewrite the document's `version` field to the assigned number.
pub(crate) fn stamp_version(mut document: serde_json::Value, version: u32) -> serde_json::Value {
    if let Some(obj) = document.as_object_mut() {
        obj.insert("version".to_string(), serde_json::json!(version));
    }
    document
}

// ---------------------------------------------------------------------------
// MemoryVersionStore
// ---------------------------------------------------------------------------

/// In-memory version store backed by a `HashMap<tag, Vec<VersionRecord>>`.
///
/// The check-and-append runs under the write lock, so appends for any tag
/// are atomic. Reads share the read lock and never wait for each other.
#[derive(Debug, Default)]
pub struct MemoryVersionStore {
    versions: RwLock<HashMap<String, Vec<VersionRecord>>>,
}

impl MemoryVersionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl VersionStore for MemoryVersionStore {
    async fn append_version(
        &self,
        tag: &str,
        base_version: Option<u32>,
        new: NewVersion,
    ) -> StorageResult<VersionRecord> {
        let mut versions = self.versions.write().map_err(poisoned)?;
        let history = versions.entry(tag.to_string()).or_default();
        let latest = history.last().map(|r| r.version);
        if latest != base_version {
            return Err(StorageError::Conflict {
                tag: tag.to_string(),
                expected: base_version,
                actual: latest,
            });
        }

        let version = latest.unwrap_or(0) + 1;
        let record = VersionRecord {
            tag: tag.to_string(),
            version,
            document: stamp_version(new.document, version),
            digest: new.digest,
            author: new.author,
            changelog: new.changelog,
            created_at: Utc::now(),
        };
        history.push(record.clone());
        Ok(record)
    }

    async fn get_version(&self, tag: &str, version: u32) -> StorageResult<VersionRecord> {
        let versions = self.versions.read().map_err(poisoned)?;
        let history = versions
            .get(tag)
            .filter(|h| !h.is_empty())
            .ok_or_else(|| StorageError::TagNotFound {
                tag: tag.to_string(),
            })?;
        history
            .iter()
            .find(|r| r.version == version)
            .cloned()
            .ok_or_else(|| StorageError::VersionNotFound {
                tag: tag.to_string(),
                version,
            })
    }

    async fn latest(&self, tag: &str) -> StorageResult<Option<VersionRecord>> {
        let versions = self.versions.read().map_err(poisoned)?;
        Ok(versions.get(tag).and_then(|h| h.last().cloned()))
    }

    async fn history(&self, tag: &str) -> StorageResult<Vec<VersionRecord>> {
        let versions = self.versions.read().map_err(poisoned)?;
        Ok(versions.get(tag).cloned().unwrap_or_default())
    }

    async fn list_tags(&self) -> StorageResult<Vec<String>> {
        let versions = self.versions.read().map_err(poisoned)?;
        let mut tags: Vec<String> = versions
            .iter()
            .filter(|(_, h)| !h.is_empty())
            .map(|(t, _)| t.clone())
            .collect();
        tags.sort();
        Ok(tags)
    }
}

// ---------------------------------------------------------------------------
// MemoryBaselineStore
// ---------------------------------------------------------------------------

type BaselineKey = (String, u32, String);

/// In-memory baseline store; each (tag, version, persona) keeps its full history.
#[derive(Debug, Default)]
pub struct MemoryBaselineStore {
    baselines: Mutex<HashMap<BaselineKey, Vec<BaselineRecord>>>,
}

impl MemoryBaselineStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl BaselineStore for MemoryBaselineStore {
    async fn record_baseline(&self, record: BaselineRecord) -> StorageResult<()> {
        let mut baselines = self.baselines.lock().map_err(poisoned)?;
        baselines
            .entry((record.tag.clone(), record.version, record.persona.clone()))
            .or_default()
            .push(record);
        Ok(())
    }

    async fn latest_baseline(
        &self,
        tag: &str,
        version: u32,
        persona: &str,
    ) -> StorageResult<Option<BaselineRecord>> {
        let baselines = self.baselines.lock().map_err(poisoned)?;
        Ok(baselines
            .get(&(tag.to_string(), version, persona.to_string()))
            .and_then(|h| h.last().cloned()))
    }
}
