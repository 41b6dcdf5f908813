//! SurrealDB schema initialization
//!
//! Safe to call on every connection (idempotent).

use crate::error::StateError;
use crate::Result;
use surrealdb::engine::any::Any;
use surrealdb::Surreal;
use tracing::{debug, info};

/// Initialize all Trainexus tables in SurrealDB
pub async fn init_schema(db: &Surreal<Any>) -> Result<()> {
    info!("Initializing Trainexus SurrealDB schema");

    init_scenario_versions_table(db).await?;
    init_baselines_table(db).await?;

    info!("Trainexus schema initialization complete");
    Ok(())
}

/// Initialize `scenario_versions`
///
/// Schema:
/// ```text
/// TABLE scenario_versions {
///   tag:        STRING (indexed)
///   version:    INT    (unique together with tag)
///   document:   OBJECT
///   digest:     STRING
///   author:     STRING
///   changelog:  STRING?
///   created_at: DATETIME
/// }
/// ```
///
/// The unique (tag, version) index is the last line of defence against a
/// duplicate version number; per-tag write serialization happens in the
/// store before the insert.
async fn init_scenario_versions_table(db: &Surreal<Any>) -> Result<()> {
    debug!("Initializing scenario_versions table");

    let sql = r#"
        DEFINE TABLE IF NOT EXISTS scenario_versions SCHEMALESS;
        DEFINE INDEX IF NOT EXISTS idx_tag_version ON TABLE scenario_versions COLUMNS tag, version UNIQUE;
        DEFINE INDEX IF NOT EXISTS idx_tag ON TABLE scenario_versions COLUMNS tag;
    "#;

    db.query(sql)
        .await
        .map_err(|e| StateError::SchemaSetup(format!("scenario_versions: {e}")))?;
    Ok(())
}

/// Initialize `baselines`
///
/// Schema:
/// ```text
/// TABLE baselines {
///   tag:             STRING
///   version:         INT
///   persona:         STRING (empty = scenario's own tester)
///   verdict:         STRING (pass | fail | inconclusive)
///   aggregate_score: FLOAT
///   batch_id:        STRING
///   recorded_at:     DATETIME
/// }
/// ```
async fn init_baselines_table(db: &Surreal<Any>) -> Result<()> {
    debug!("Initializing baselines table");

    let sql = r#"
        DEFINE TABLE IF NOT EXISTS baselines SCHEMALESS;
        DEFINE INDEX IF NOT EXISTS idx_baseline_key ON TABLE baselines COLUMNS tag, version, persona;
    "#;

    db.query(sql)
        .await
        .map_err(|e| StateError::SchemaSetup(format!("baselines: {e}")))?;
    Ok(())
}
