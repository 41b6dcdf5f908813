//! Domain models for Trainexus.
//!
//! - `ScenarioSpec` / `ScenarioVersion`: validated, immutable scenario content
//! - `Transcript`: turn log of one simulation run
//! - `EvaluationResult`: rubric outcome for one transcript

pub mod digest;
pub mod error;
pub mod evaluation;
pub mod scenario;
pub mod transcript;

pub use error::{
    AgentError, EvaluationError, JudgeError, JudgmentParseError, Result, RetrievalError,
    SchemaError, TemplateError, TrainexusError, Violation,
};
pub use evaluation::{
    aggregate, CriterionOutcome, CriterionResult, EvaluationResult, Judgment, Verdict,
};
pub use scenario::{
    validate, Didactics, DocumentRef, Persona, PersonaConstraints, Personas, Phase,
    PromptTemplates, RubricCriterion, ScenarioSpec, ScenarioVersion, ScoringType, TemplateKind,
};
pub use transcript::{
    RunMetadata, RunState, SimulationRun, Speaker, TerminationReason, Transcript, Turn,
};
