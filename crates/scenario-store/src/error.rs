//! Error types for scenario-store

use thiserror::Error;

/// Errors raised while connecting to or preparing the backend
#[derive(Error, Debug)]
pub enum StateError {
    /// Database connection error
    #[error("Database connection failed: {0}")]
    Connection(String),

    /// Database query error
    #[error("Database query failed: {0}")]
    Query(String),

    /// Serialization error
    #[error("Serialization failed: {0}")]
    Serialization(String),

    /// Schema setup error
    #[error("Schema setup failed: {0}")]
    SchemaSetup(String),
}

impl From<surrealdb::Error> for StateError {
    fn from(err: surrealdb::Error) -> Self {
        StateError::Query(err.to_string())
    }
}

impl From<serde_json::Error> for StateError {
    fn from(err: serde_json::Error) -> Self {
        StateError::Serialization(err.to_string())
    }
}

/// Errors returned by the storage traits.
#[derive(Error, Debug)]
pub enum StorageError {
    /// No version has ever been stored for this tag
    #[error("scenario not found: {tag}")]
    TagNotFound { tag: String },

    /// The tag exists but the requested version does not
    #[error("scenario version not found: {tag} v{version}")]
    VersionNotFound { tag: String, version: u32 },

    /// Another writer appended to the tag since the caller read it.
    /// The caller must reload the latest version and retry.
    #[error("version conflict on {tag}: edit based on {expected:?} but latest is {actual:?}")]
    Conflict {
        tag: String,
        expected: Option<u32>,
        actual: Option<u32>,
    },

    #[error("invalid digest: {digest}")]
    InvalidDigest { digest: String },

    #[error("storage backend error: {0}")]
    Backend(String),

    #[error("serialization error: {0}")]
    Serialization(String),
}

impl From<StateError> for StorageError {
    fn from(err: StateError) -> Self {
        StorageError::Backend(err.to_string())
    }
}

impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        StorageError::Serialization(err.to_string())
    }
}
