//! Scenario version repository: validation and digesting in front of a
//! [`VersionStore`].

use std::sync::Arc;

use scenario_store::{NewVersion, VersionStore};
use serde_json::Value;
use tracing::instrument;

use crate::diff::{diff_versions, ChangeRecord};
use crate::domain::digest::scenario_digest;
use crate::domain::{validate, Result, ScenarioVersion, TrainexusError};
use crate::obs::emit_version_created;

#[derive(Clone)]
pub struct ScenarioRepository {
    store: Arc<dyn VersionStore>,
}

impl ScenarioRepository {
    pub fn new(store: Arc<dyn VersionStore>) -> Self {
        Self { store }
    }

    /// Validate `document` and append it as the next version of its tag.
    ///
    /// The document's `version` names the version the edit started from
    /// (absent or 0 for a new scenario). If another version was saved in the
    /// meantime this fails with [`TrainexusError::Conflict`]; reload the
    /// latest version and reapply the edit.
    #[instrument(skip_all, fields(author = %author))]
    pub async fn create_version(
        &self,
        document: &Value,
        author: &str,
        changelog: Option<&str>,
    ) -> Result<ScenarioVersion> {
        let spec = validate(document)?;
        let normalized = spec.to_document()?;
        let digest = scenario_digest(&normalized)?;

        let record = self
            .store
            .append_version(
                &spec.tag,
                spec.base_version(),
                NewVersion {
                    document: normalized,
                    digest,
                    author: author.to_string(),
                    changelog: changelog.map(str::to_string),
                },
            )
            .await?;

        let version = ScenarioVersion::from_record(record)?;
        emit_version_created(
            &version.tag,
            version.version,
            version.digest.as_str(),
            &version.author,
        );
        Ok(version)
    }

    pub async fn get_version(&self, tag: &str, version: u32) -> Result<ScenarioVersion> {
        let record = self.store.get_version(tag, version).await?;
        Ok(ScenarioVersion::from_record(record)?)
    }

    pub async fn get_latest(&self, tag: &str) -> Result<ScenarioVersion> {
        match self.store.latest(tag).await? {
            Some(record) => Ok(ScenarioVersion::from_record(record)?),
            None => Err(TrainexusError::ScenarioNotFound(tag.to_string())),
        }
    }

    /// Oldest first.
    pub async fn history(&self, tag: &str) -> Result<Vec<ScenarioVersion>> {
        let records = self.store.history(tag).await?;
        if records.is_empty() {
            return Err(TrainexusError::ScenarioNotFound(tag.to_string()));
        }
        records
            .into_iter()
            .map(|r| ScenarioVersion::from_record(r).map_err(TrainexusError::from))
            .collect()
    }

    pub async fn list_tags(&self) -> Result<Vec<String>> {
        Ok(self.store.list_tags().await?)
    }

    /// Field-level changes from version `a` to version `b` of `tag`.
    pub async fn diff(&self, tag: &str, a: u32, b: u32) -> Result<Vec<ChangeRecord>> {
        let old = self.get_version(tag, a).await?;
        let new = self.get_version(tag, b).await?;
        Ok(diff_versions(&old, &new)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::starter::starter_document;
    use scenario_store::fakes::MemoryVersionStore;
    use serde_json::json;

    fn repo() -> ScenarioRepository {
        ScenarioRepository::new(Arc::new(MemoryVersionStore::new()))
    }

    #[tokio::test]
    async fn create_assigns_sequential_versions() {
        let repo = repo();
        let v1 = repo
            .create_version(&starter_document("onboarding"), "ana", None)
            .await
            .unwrap();
        assert_eq!(v1.version, 1);

        let mut edit = starter_document("onboarding");
        edit["version"] = json!(1);
        edit["max_turns"] = json!(8);
        let v2 = repo
            .create_version(&edit, "ana", Some("longer dialogue"))
            .await
            .unwrap();
        assert_eq!(v2.version, 2);
        assert_eq!(v2.spec.version, 2);
        assert_eq!(v2.changelog.as_deref(), Some("longer dialogue"));
        assert_eq!(repo.get_latest("onboarding").await.unwrap().version, 2);
    }

    #[tokio::test]
    async fn stale_edit_conflicts() {
        let repo = repo();
        repo.create_version(&starter_document("onboarding"), "ana", None)
            .await
            .unwrap();
        let err = repo
            .create_version(&starter_document("onboarding"), "ben", None)
            .await
            .unwrap_err();
        assert!(matches!(err, TrainexusError::Conflict { .. }));
        assert_eq!(repo.history("onboarding").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn invalid_document_is_not_stored() {
        let repo = repo();
        let mut doc = starter_document("onboarding");
        doc["max_turns"] = json!(0);
        let err = repo.create_version(&doc, "ana", None).await.unwrap_err();
        assert!(matches!(err, TrainexusError::Schema(_)));
        assert!(repo.list_tags().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn missing_scenario_and_version() {
        let repo = repo();
        assert!(matches!(
            repo.get_latest("ghost").await.unwrap_err(),
            TrainexusError::ScenarioNotFound(_)
        ));
        repo.create_version(&starter_document("onboarding"), "ana", None)
            .await
            .unwrap();
        assert!(matches!(
            repo.get_version("onboarding", 9).await.unwrap_err(),
            TrainexusError::VersionNotFound { .. }
        ));
    }

    #[tokio::test]
    async fn identical_content_has_identical_digest() {
        let repo = repo();
        let v1 = repo
            .create_version(&starter_document("onboarding"), "ana", None)
            .await
            .unwrap();
        let mut same = starter_document("onboarding");
        same["version"] = json!(1);
        let v2 = repo.create_version(&same, "ana", None).await.unwrap();
        assert_eq!(v1.digest, v2.digest);
        assert!(repo.diff("onboarding", 1, 2).await.unwrap().is_empty());
    }
}
