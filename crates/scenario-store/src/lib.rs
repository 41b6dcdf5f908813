//! Scenario-Store: versioned persistence for Trainexus scenarios
//!
//! This crate owns every piece of mutable shared state in the engine: the
//! append-only scenario version history and the regression baselines.
//!
//! ## Key Components
//!
//! - `VersionStore`: atomic "append next version for tag" plus point reads
//! - `BaselineStore`: most recent recorded verdict per (tag, version, persona)
//! - `SurrealScenarioStore`: SurrealDB backend for both traits
//! - `fakes`: in-memory implementations for tests

mod config;
mod error;
pub mod fakes;
mod migrations;
pub mod storage_traits;
pub mod surreal_store;

pub use config::StoreConfig;
pub use error::{StateError, StorageError};
pub use storage_traits::{
    BaselineRecord, BaselineStore, BaselineVerdict, ContentDigest, NewVersion, StorageResult,
    VersionRecord, VersionStore,
};
pub use surreal_store::SurrealScenarioStore;

/// Result type for connection and schema operations
pub type Result<T> = std::result::Result<T, StateError>;
