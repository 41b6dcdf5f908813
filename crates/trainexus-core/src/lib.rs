//! Trainexus Core Library
//!
//! Scenario simulation and regression engine: validates and versions
//! training scenarios, simulates dialogues between two LLM personas,
//! evaluates transcripts against rubrics and compares verdicts across runs.

pub mod agent;
pub mod config;
pub mod diff;
pub mod domain;
pub mod evaluator;
pub mod lint;
pub mod metrics;
pub mod obs;
pub mod orchestrator;
pub mod regression;
pub mod render;
pub mod reporting;
pub mod repository;
pub mod retrieval;
pub mod starter;
pub mod telemetry;

pub use agent::{
    ChatMessage, ChatRole, DialogueAgent, HttpChatAgent, Judge, JudgeRequest, LlmJudge,
    OfflineAgent, OfflineJudge, ScriptStep, ScriptedAgent, ScriptedJudge, JUDGE_CONTRACT,
};
pub use config::{EngineConfig, LlmConfig, RegressionConfig, SimulationConfig, TesterVariant};
pub use diff::{diff_documents, diff_versions, render_diff_text, ChangeKind, ChangeRecord};
pub use domain::{
    aggregate, validate, AgentError, CriterionOutcome, CriterionResult, EvaluationError,
    EvaluationResult, JudgeError, JudgmentParseError, Phase, Result, RunMetadata, RunState,
    ScenarioSpec, ScenarioVersion, SchemaError, ScoringType, SimulationRun, Speaker,
    TemplateError, TemplateKind, TerminationReason, Transcript, TrainexusError, Turn, Verdict,
};
pub use evaluator::{formative_checkpoints, Evaluator};
pub use lint::{lint_prompt, lint_scenario, LintIssue, LintReport, Severity};
pub use orchestrator::{DialogueOrchestrator, RunAgents};
pub use regression::{
    AgentProvider, CancelHandle, RegressionReport, RegressionRow, RegressionRunner, ReportCounts,
    RowStatus, ScenarioSelector, StaticAgentProvider,
};
pub use render::{placeholders, render, RenderContext};
pub use reporting::{
    render_csv, render_summary_md, write_report_csv, write_report_json, CSV_HEADER,
};
pub use repository::ScenarioRepository;
pub use retrieval::{DocumentRetriever, Excerpt, NoDocuments, StaticRetriever};
pub use starter::starter_document;

pub use metrics::METRICS;
pub use obs::{
    emit_baseline_recorded, emit_evaluation_finished, emit_regression_finished,
    emit_simulation_finished, emit_simulation_started, emit_version_created,
};
pub use telemetry::init_tracing;

/// Trainexus version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
