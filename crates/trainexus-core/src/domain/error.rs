//! Error taxonomy for the Trainexus engine.

use scenario_store::StorageError;
use serde::Serialize;

/// One violated constraint in a scenario document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Violation {
    /// Dotted path into the document, e.g. `rubric[2].weight`.
    pub path: String,
    pub message: String,
}

impl std::fmt::Display for Violation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.path, self.message)
    }
}

/// Invalid scenario document. Always carries every violation found.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaError {
    pub violations: Vec<Violation>,
}

impl std::fmt::Display for SchemaError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "invalid scenario document ({} violation(s))",
            self.violations.len()
        )?;
        for v in &self.violations {
            write!(f, "; {v}")?;
        }
        Ok(())
    }
}

impl std::error::Error for SchemaError {}

/// Template references names that the render context does not provide.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unresolved template placeholders: {}", .missing.join(", "))]
pub struct TemplateError {
    /// Missing placeholder names in first-appearance order.
    pub missing: Vec<String>,
}

/// Failure modes surfaced by an LLM agent call.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AgentError {
    #[error("rate limited: {0}")]
    RateLimited(String),

    #[error("transient agent failure: {0}")]
    Transient(String),

    #[error("agent call timed out after {0} ms")]
    Timeout(u64),

    #[error("malformed agent output: {0}")]
    MalformedOutput(String),

    #[error("fatal agent failure: {0}")]
    Fatal(String),
}

impl AgentError {
    /// Rate limits and transient failures are retried with backoff.
    pub fn is_retryable(&self) -> bool {
        matches!(self, AgentError::RateLimited(_) | AgentError::Transient(_))
    }
}

/// Judge output that does not satisfy `{"score": number, "justification": string}`.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum JudgmentParseError {
    #[error("judgment is not a JSON object: {0}")]
    NotJson(String),

    #[error("judgment is missing field `{0}`")]
    MissingField(&'static str),

    #[error("judgment field `{field}` must be a {expected}")]
    WrongType {
        field: &'static str,
        expected: &'static str,
    },

    #[error("score {score} outside the {scoring} range")]
    ScoreOutOfRange { score: f64, scoring: &'static str },
}

/// Why a single judgment could not produce a score.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum JudgeError {
    #[error(transparent)]
    Agent(#[from] AgentError),

    #[error(transparent)]
    Parse(#[from] JudgmentParseError),
}

/// Document retrieval collaborator failure.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("document retrieval failed: {0}")]
pub struct RetrievalError(pub String);

/// Errors raised by the evaluator itself (not by individual criteria).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EvaluationError {
    #[error("cannot evaluate a failed transcript ({termination}): {detail}")]
    FailedTranscript { termination: String, detail: String },

    #[error("transcript digest failed: {0}")]
    Digest(String),
}

/// Engine-level errors.
#[derive(Debug, thiserror::Error)]
pub enum TrainexusError {
    #[error(transparent)]
    Schema(#[from] SchemaError),

    #[error(transparent)]
    Template(#[from] TemplateError),

    #[error(transparent)]
    Agent(#[from] AgentError),

    #[error(transparent)]
    Evaluation(#[from] EvaluationError),

    #[error(transparent)]
    Retrieval(#[from] RetrievalError),

    /// Another edit was saved first; reload the latest version and retry.
    #[error("version conflict for '{tag}': edit based on {expected:?}, latest is {actual:?}")]
    Conflict {
        tag: String,
        expected: Option<u32>,
        actual: Option<u32>,
    },

    #[error("scenario not found: {0}")]
    ScenarioNotFound(String),

    #[error("scenario version not found: {tag} v{version}")]
    VersionNotFound { tag: String, version: u32 },

    #[error("storage error: {0}")]
    Storage(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<StorageError> for TrainexusError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::Conflict {
                tag,
                expected,
                actual,
            } => TrainexusError::Conflict {
                tag,
                expected,
                actual,
            },
            StorageError::TagNotFound { tag } => TrainexusError::ScenarioNotFound(tag),
            StorageError::VersionNotFound { tag, version } => {
                TrainexusError::VersionNotFound { tag, version }
            }
            other => TrainexusError::Storage(other.to_string()),
        }
    }
}

/// Result type for Trainexus engine operations.
pub type Result<T> = std::result::Result<T, TrainexusError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schema_error_lists_every_violation() {
        let err = SchemaError {
            violations: vec![
                Violation {
                    path: "tag".to_string(),
                    message: "missing required field".to_string(),
                },
                Violation {
                    path: "max_turns".to_string(),
                    message: "must be at least 1".to_string(),
                },
            ],
        };
        let msg = err.to_string();
        assert!(msg.contains("2 violation(s)"));
        assert!(msg.contains("tag: missing required field"));
        assert!(msg.contains("max_turns: must be at least 1"));
    }

    #[test]
    fn template_error_names_missing_placeholders() {
        let err = TemplateError {
            missing: vec!["persona.role".to_string(), "history".to_string()],
        };
        assert_eq!(
            err.to_string(),
            "unresolved template placeholders: persona.role, history"
        );
    }

    #[test]
    fn only_rate_limit_and_transient_are_retryable() {
        assert!(AgentError::RateLimited("429".into()).is_retryable());
        assert!(AgentError::Transient("503".into()).is_retryable());
        assert!(!AgentError::Timeout(10).is_retryable());
        assert!(!AgentError::MalformedOutput("empty".into()).is_retryable());
        assert!(!AgentError::Fatal("bad key".into()).is_retryable());
    }

    #[test]
    fn storage_conflict_maps_to_conflict() {
        let err: TrainexusError = StorageError::Conflict {
            tag: "onboarding".to_string(),
            expected: Some(1),
            actual: Some(2),
        }
        .into();
        assert!(matches!(
            err,
            TrainexusError::Conflict {
                expected: Some(1),
                actual: Some(2),
                ..
            }
        ));
    }

    #[test]
    fn storage_backend_maps_to_storage() {
        let err: TrainexusError = StorageError::Backend("connection reset".to_string()).into();
        assert!(err.to_string().contains("connection reset"));
    }
}
