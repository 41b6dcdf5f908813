//! Storage trait definitions for Trainexus
//!
//! These traits define the persistence contract the engine depends on:
//! - `VersionStore`: append-only scenario versions (atomic append + point reads)
//! - `BaselineStore`: recorded regression verdicts per scenario version
//!
//! All traits are async and backend-agnostic. In-memory fakes are provided
//! for testing via the `fakes` module.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::Sha256;

use crate::error::StorageError;

/// Result type for storage operations
pub type StorageResult<T> = std::result::Result<T, StorageError>;

// ---------------------------------------------------------------------------
// ContentDigest
// ---------------------------------------------------------------------------

/// Content digest (SHA-256 hex string).
///
/// The inner field is private to guarantee the string is always valid
/// lowercase hex produced by `from_bytes` or validated via `TryFrom<String>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContentDigest(String);

impl ContentDigest {
    /// Compute the SHA-256 digest of the given bytes.
    pub fn from_bytes(data: &[u8]) -> Self {
        use sha2::Digest;
        let mut hasher = Sha256::new();
        hasher.update(data);
        ContentDigest(hex::encode(hasher.finalize()))
    }

    /// Return the full hex string.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Short form (first 12 hex chars).
    pub fn short(&self) -> &str {
        &self.0[..12.min(self.0.len())]
    }
}

impl TryFrom<String> for ContentDigest {
    type Error = StorageError;

    fn try_from(s: String) -> std::result::Result<Self, Self::Error> {
        if s.len() != 64 || !s.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(StorageError::InvalidDigest { digest: s });
        }
        Ok(ContentDigest(s.to_ascii_lowercase()))
    }
}

impl std::fmt::Display for ContentDigest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// VersionStore — append-only scenario versions
// ---------------------------------------------------------------------------

/// Payload for a version about to be appended.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewVersion {
    /// Validated scenario document. The store rewrites its `version` field to
    /// the assigned number before persisting.
    pub document: serde_json::Value,
    /// Digest of the document content (excluding the version number).
    pub digest: ContentDigest,
    /// Who saved this version
    pub author: String,
    /// Optional free-text change note
    pub changelog: Option<String>,
}

/// A persisted, immutable scenario version.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VersionRecord {
    pub tag: String,
    /// 1-based, strictly increasing per tag with no gaps
    pub version: u32,
    pub document: serde_json::Value,
    pub digest: ContentDigest,
    pub author: String,
    pub changelog: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Scenario version store.
///
/// Guarantees:
/// - Version numbers per tag are exactly `1..=n`: no gaps, no duplicates.
/// - `append_version` succeeds only when `base_version` equals the current
///   latest version (`None` for a tag with no versions yet); otherwise it
///   fails with `StorageError::Conflict` and stores nothing.
/// - Appends for the same tag are serialized; reads never wait on them.
/// - Stored records are never mutated.
#[async_trait]
pub trait VersionStore: Send + Sync {
    /// Append `base_version + 1` (or 1) for `tag`.
    async fn append_version(
        &self,
        tag: &str,
        base_version: Option<u32>,
        new: NewVersion,
    ) -> StorageResult<VersionRecord>;

    /// Point read. `TagNotFound` / `VersionNotFound` when absent.
    async fn get_version(&self, tag: &str, version: u32) -> StorageResult<VersionRecord>;

    /// Most recent version for a tag, if any.
    async fn latest(&self, tag: &str) -> StorageResult<Option<VersionRecord>>;

    /// All versions of a tag, oldest first.
    async fn history(&self, tag: &str) -> StorageResult<Vec<VersionRecord>>;

    /// Every tag with at least one version, sorted.
    async fn list_tags(&self) -> StorageResult<Vec<String>>;
}

// ---------------------------------------------------------------------------
// BaselineStore — regression comparison points
// ---------------------------------------------------------------------------

/// Verdict as persisted in a baseline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BaselineVerdict {
    Pass,
    Fail,
    Inconclusive,
}

impl BaselineVerdict {
    pub fn as_str(&self) -> &'static str {
        match self {
            BaselineVerdict::Pass => "pass",
            BaselineVerdict::Fail => "fail",
            BaselineVerdict::Inconclusive => "inconclusive",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pass" => Some(BaselineVerdict::Pass),
            "fail" => Some(BaselineVerdict::Fail),
            "inconclusive" => Some(BaselineVerdict::Inconclusive),
            _ => None,
        }
    }
}

/// A recorded verdict for one scenario version and tester persona.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BaselineRecord {
    pub tag: String,
    pub version: u32,
    /// Tester variant name; empty for the scenario's own tester persona.
    #[serde(default)]
    pub persona: String,
    pub verdict: BaselineVerdict,
    /// Mean weighted aggregate score of the recording batch (0.0–1.0)
    pub aggregate_score: f64,
    /// Regression batch that produced this baseline
    pub batch_id: String,
    pub recorded_at: DateTime<Utc>,
}

/// Baseline store.
///
/// Semantics:
/// - `record_baseline` appends; earlier baselines are kept.
/// - `latest_baseline` returns the most recently recorded entry for the
///   exact (tag, version, persona) key.
#[async_trait]
pub trait BaselineStore: Send + Sync {
    async fn record_baseline(&self, record: BaselineRecord) -> StorageResult<()>;

    async fn latest_baseline(
        &self,
        tag: &str,
        version: u32,
        persona: &str,
    ) -> StorageResult<Option<BaselineRecord>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn digest_is_stable_and_short_prefix() {
        let a = ContentDigest::from_bytes(b"scenario");
        let b = ContentDigest::from_bytes(b"scenario");
        assert_eq!(a, b);
        assert_eq!(a.as_str().len(), 64);
        assert_eq!(a.short(), &a.as_str()[..12]);
    }

    #[test]
    fn digest_try_from_rejects_non_hex() {
        let err = ContentDigest::try_from("xyz".to_string()).unwrap_err();
        assert!(matches!(err, StorageError::InvalidDigest { .. }));
    }

    #[test]
    fn baseline_verdict_parse_matches_as_str() {
        for v in [
            BaselineVerdict::Pass,
            BaselineVerdict::Fail,
            BaselineVerdict::Inconclusive,
        ] {
            assert_eq!(BaselineVerdict::parse(v.as_str()), Some(v));
        }
        assert_eq!(BaselineVerdict::parse("maybe"), None);
    }
}
