//! SurrealDB-backed `VersionStore` and `BaselineStore`
//!
//! Uses private row types for persistence, converting to/from the
//! `storage_traits` types at the boundary.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use surrealdb::engine::any::Any;
use surrealdb::opt::auth::{Database, Root};
use surrealdb::sql::Datetime as SurrealDatetime;
use surrealdb::Surreal;
use tracing::{debug, info, instrument};

use crate::config::StoreConfig;
use crate::error::{StateError, StorageError};
use crate::fakes::stamp_version;
use crate::migrations;
use crate::storage_traits::{
    BaselineRecord, BaselineStore, BaselineVerdict, ContentDigest, NewVersion, StorageResult,
    VersionRecord, VersionStore,
};

#[derive(Debug, Clone, Serialize, Deserialize)]
struct DbVersion {
    tag: String,
    version: u64,
    document: serde_json::Value,
    digest: String,
    author: String,
    changelog: Option<String>,
    created_at: SurrealDatetime,
}

impl DbVersion {
    fn into_record(self) -> StorageResult<VersionRecord> {
        let version = u32::try_from(self.version)
            .map_err(|_| StorageError::Backend(format!("version out of range: {}", self.version)))?;
        Ok(VersionRecord {
            tag: self.tag,
            version,
            document: self.document,
            digest: ContentDigest::try_from(self.digest)?,
            author: self.author,
            changelog: self.changelog,
            created_at: DateTime::<Utc>::from(self.created_at),
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct DbBaseline {
    tag: String,
    version: u64,
    #[serde(default)]
    persona: String,
    verdict: String,
    aggregate_score: f64,
    batch_id: String,
    recorded_at: SurrealDatetime,
}

impl DbBaseline {
    fn into_record(self) -> StorageResult<BaselineRecord> {
        let verdict = BaselineVerdict::parse(&self.verdict).ok_or_else(|| {
            StorageError::Backend(format!("unknown baseline verdict: {}", self.verdict))
        })?;
        let version = u32::try_from(self.version)
            .map_err(|_| StorageError::Backend(format!("version out of range: {}", self.version)))?;
        Ok(BaselineRecord {
            tag: self.tag,
            version,
            persona: self.persona,
            verdict,
            aggregate_score: self.aggregate_score,
            batch_id: self.batch_id,
            recorded_at: DateTime::<Utc>::from(self.recorded_at),
        })
    }
}

/// SurrealDB implementation of both storage traits.
///
/// Appends for one tag are serialized through a per-tag async lock held
/// across the read-latest / insert pair; the unique (tag, version) index
/// rejects duplicates written by other processes.
#[derive(Clone)]
pub struct SurrealScenarioStore {
    db: Surreal<Any>,
    /// One entry per tag this handle has written. Tags are never deleted,
    /// so the table is bounded by the number of scenarios and not pruned.
    tag_locks: Arc<Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>>,
}

impl SurrealScenarioStore {
    /// Create an in-memory instance for testing.
    pub async fn in_memory() -> crate::Result<Self> {
        Self::connect(&StoreConfig::in_memory()).await
    }

    /// Create from environment variables (see [`StoreConfig::from_env`]).
    pub async fn from_env() -> crate::Result<Self> {
        Self::connect(&StoreConfig::from_env()).await
    }

    /// Connect, authenticate if needed, select namespace/database and run
    /// `init_schema`.
    #[instrument(skip(config), fields(endpoint = %config.endpoint()))]
    pub async fn connect(config: &StoreConfig) -> crate::Result<Self> {
        let db = match config {
            StoreConfig::Remote {
                endpoint,
                username,
                password,
                namespace,
                database,
                is_root,
            } => {
                let db = surrealdb::engine::any::connect(endpoint.as_str())
                    .await
                    .map_err(|e| {
                        StateError::Connection(format!("Failed to connect to {}: {}", endpoint, e))
                    })?;

                if *is_root {
                    db.signin(Root {
                        username: username.as_str(),
                        password: password.as_str(),
                    })
                    .await
                    .map_err(|e| StateError::Connection(format!("Root auth failed: {e}")))?;
                } else {
                    db.signin(Database {
                        namespace: namespace.as_str(),
                        database: database.as_str(),
                        username: username.as_str(),
                        password: password.as_str(),
                    })
                    .await
                    .map_err(|e| StateError::Connection(format!("DB auth failed: {e}")))?;
                }

                db.use_ns(namespace.as_str())
                    .use_db(database.as_str())
                    .await
                    .map_err(|e| StateError::Connection(e.to_string()))?;
                db
            }
            StoreConfig::Url(url) => {
                if let Some(path) = url.strip_prefix("surrealkv://") {
                    std::fs::create_dir_all(path).map_err(|e| {
                        StateError::Connection(format!(
                            "Failed to create database directory {}: {}",
                            path, e
                        ))
                    })?;
                }
                let db = surrealdb::engine::any::connect(url.as_str())
                    .await
                    .map_err(|e| {
                        StateError::Connection(format!("Failed to connect to {}: {}", url, e))
                    })?;
                db.use_ns(StoreConfig::DEFAULT_NAMESPACE)
                    .use_db(StoreConfig::DEFAULT_DATABASE)
                    .await
                    .map_err(|e| StateError::Connection(e.to_string()))?;
                db
            }
        };

        migrations::init_schema(&db).await?;
        info!("SurrealScenarioStore connected ({})", config.endpoint());
        Ok(Self {
            db,
            tag_locks: Arc::new(Mutex::new(HashMap::new())),
        })
    }

    // -- private helpers -----------------------------------------------------

    fn tag_lock(&self, tag: &str) -> StorageResult<Arc<tokio::sync::Mutex<()>>> {
        let mut locks = self
            .tag_locks
            .lock()
            .map_err(|_| StorageError::Backend("tag lock table poisoned".to_string()))?;
        Ok(Arc::clone(locks.entry(tag.to_string()).or_default()))
    }

    async fn fetch_latest(&self, tag: &str) -> StorageResult<Option<DbVersion>> {
        let tag_owned = tag.to_string();
        let mut res = self
            .db
            .query("SELECT * FROM scenario_versions WHERE tag = $tag ORDER BY version DESC LIMIT 1")
            .bind(("tag", tag_owned))
            .await
            .map_err(|e| StorageError::Backend(e.to_string()))?;

        let rows: Vec<DbVersion> = res
            .take(0)
            .map_err(|e| StorageError::Backend(e.to_string()))?;
        Ok(rows.into_iter().next())
    }
}

fn is_unique_violation(err: &surrealdb::Error) -> bool {
    err.to_string().contains("already contains")
}

#[async_trait]
impl VersionStore for SurrealScenarioStore {
    #[instrument(skip(self, new), fields(tag = %tag, base = ?base_version))]
    async fn append_version(
        &self,
        tag: &str,
        base_version: Option<u32>,
        new: NewVersion,
    ) -> StorageResult<VersionRecord> {
        let lock = self.tag_lock(tag)?;
        let _guard = lock.lock().await;

        let latest = self
            .fetch_latest(tag)
            .await?
            .map(|row| row.version as u32);
        if latest != base_version {
            return Err(StorageError::Conflict {
                tag: tag.to_string(),
                expected: base_version,
                actual: latest,
            });
        }

        let version = latest.unwrap_or(0) + 1;
        let row = DbVersion {
            tag: tag.to_string(),
            version: u64::from(version),
            document: stamp_version(new.document, version),
            digest: new.digest.as_str().to_string(),
            author: new.author,
            changelog: new.changelog,
            created_at: SurrealDatetime::from(Utc::now()),
        };

        let created: Option<DbVersion> = self
            .db
            .create("scenario_versions")
            .content(row)
            .await
            .map_err(|e| {
                if is_unique_violation(&e) {
                    StorageError::Conflict {
                        tag: tag.to_string(),
                        expected: base_version,
                        actual: Some(version),
                    }
                } else {
                    StorageError::Backend(e.to_string())
                }
            })?;

        debug!(version, "scenario version appended");
        created
            .ok_or_else(|| StorageError::Backend("failed to create version record".to_string()))?
            .into_record()
    }

    #[instrument(skip(self))]
    async fn get_version(&self, tag: &str, version: u32) -> StorageResult<VersionRecord> {
        let tag_owned = tag.to_string();
        let mut res = self
            .db
            .query("SELECT * FROM scenario_versions WHERE tag = $tag AND version = $version")
            .bind(("tag", tag_owned))
            .bind(("version", u64::from(version)))
            .await
            .map_err(|e| StorageError::Backend(e.to_string()))?;

        let rows: Vec<DbVersion> = res
            .take(0)
            .map_err(|e| StorageError::Backend(e.to_string()))?;

        match rows.into_iter().next() {
            Some(row) => row.into_record(),
            None if self.fetch_latest(tag).await?.is_none() => Err(StorageError::TagNotFound {
                tag: tag.to_string(),
            }),
            None => Err(StorageError::VersionNotFound {
                tag: tag.to_string(),
                version,
            }),
        }
    }

    #[instrument(skip(self))]
    async fn latest(&self, tag: &str) -> StorageResult<Option<VersionRecord>> {
        self.fetch_latest(tag)
            .await?
            .map(DbVersion::into_record)
            .transpose()
    }

    #[instrument(skip(self))]
    async fn history(&self, tag: &str) -> StorageResult<Vec<VersionRecord>> {
        let tag_owned = tag.to_string();
        let mut res = self
            .db
            .query("SELECT * FROM scenario_versions WHERE tag = $tag ORDER BY version ASC")
            .bind(("tag", tag_owned))
            .await
            .map_err(|e| StorageError::Backend(e.to_string()))?;

        let rows: Vec<DbVersion> = res
            .take(0)
            .map_err(|e| StorageError::Backend(e.to_string()))?;
        rows.into_iter().map(DbVersion::into_record).collect()
    }

    async fn list_tags(&self) -> StorageResult<Vec<String>> {
        #[derive(Deserialize)]
        struct TagRow {
            tag: String,
        }

        let mut res = self
            .db
            .query("SELECT tag FROM scenario_versions GROUP BY tag")
            .await
            .map_err(|e| StorageError::Backend(e.to_string()))?;
        let rows: Vec<TagRow> = res
            .take(0)
            .map_err(|e| StorageError::Backend(e.to_string()))?;

        let mut tags: Vec<String> = rows.into_iter().map(|r| r.tag).collect();
        tags.sort();
        tags.dedup();
        Ok(tags)
    }
}

#[async_trait]
impl BaselineStore for SurrealScenarioStore {
    #[instrument(skip(self, record), fields(tag = %record.tag, version = record.version))]
    async fn record_baseline(&self, record: BaselineRecord) -> StorageResult<()> {
        let row = DbBaseline {
            tag: record.tag,
            version: u64::from(record.version),
            persona: record.persona,
            verdict: record.verdict.as_str().to_string(),
            aggregate_score: record.aggregate_score,
            batch_id: record.batch_id,
            recorded_at: SurrealDatetime::from(record.recorded_at),
        };

        let created: Option<DbBaseline> = self
            .db
            .create("baselines")
            .content(row)
            .await
            .map_err(|e| StorageError::Backend(e.to_string()))?;

        created
            .map(|_| ())
            .ok_or_else(|| StorageError::Backend("failed to create baseline record".to_string()))
    }

    #[instrument(skip(self))]
    async fn latest_baseline(
        &self,
        tag: &str,
        version: u32,
        persona: &str,
    ) -> StorageResult<Option<BaselineRecord>> {
        let tag_owned = tag.to_string();
        let mut res = self
            .db
            .query(
                "SELECT * FROM baselines WHERE tag = $tag AND version = $version \
                 AND persona = $persona ORDER BY recorded_at DESC LIMIT 1",
            )
            .bind(("tag", tag_owned))
            .bind(("version", u64::from(version)))
            .bind(("persona", persona.to_string()))
            .await
            .map_err(|e| StorageError::Backend(e.to_string()))?;

        let rows: Vec<DbBaseline> = res
            .take(0)
            .map_err(|e| StorageError::Backend(e.to_string()))?;
        rows.into_iter().next().map(DbBaseline::into_record).transpose()
    }
}
