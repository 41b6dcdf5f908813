//! Regression batches: simulate and evaluate many scenarios concurrently and
//! compare the verdicts with recorded baselines.
//!
//! Every distinct selector yields exactly one row per tester variant, whatever
//! happened to its runs. Concurrency is bounded by a semaphore; cancelling stops runs that
//! have not started yet while in-flight runs finish.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::future::join_all;
use scenario_store::{BaselineRecord, BaselineStore};
use serde::{Deserialize, Serialize};
use tokio::sync::{watch, Semaphore};
use tracing::{instrument, warn};
use uuid::Uuid;

use crate::agent::Judge;
use crate::config::{RegressionConfig, SimulationConfig, TesterVariant};
use crate::domain::{AgentError, EvaluationResult, ScenarioVersion, Verdict};
use crate::evaluator::Evaluator;
use crate::metrics::METRICS;
use crate::obs::{emit_baseline_recorded, emit_regression_finished, emit_regression_warning};
use crate::orchestrator::{DialogueOrchestrator, RunAgents};
use crate::repository::ScenarioRepository;
use crate::retrieval::{DocumentRetriever, NoDocuments};

/// Which scenario to run: a tag, optionally pinned to one version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScenarioSelector {
    pub tag: String,
    pub version: Option<u32>,
}

impl ScenarioSelector {
    pub fn latest(tag: impl Into<String>) -> Self {
        Self {
            tag: tag.into(),
            version: None,
        }
    }

    pub fn pinned(tag: impl Into<String>, version: u32) -> Self {
        Self {
            tag: tag.into(),
            version: Some(version),
        }
    }

    /// Parse `tag` or `tag@version`.
    pub fn parse(input: &str) -> Result<Self, String> {
        match input.split_once('@') {
            None if !input.is_empty() => Ok(Self::latest(input)),
            Some((tag, version)) if !tag.is_empty() => version
                .parse::<u32>()
                .ok()
                .filter(|v| *v > 0)
                .map(|v| Self::pinned(tag, v))
                .ok_or_else(|| format!("invalid version in selector '{input}'")),
            _ => Err(format!("invalid scenario selector '{input}'")),
        }
    }
}

/// Supplies the agents for each run of a batch.
pub trait AgentProvider: Send + Sync {
    /// Agents for repetition `repetition` (0-based) of `scenario`.
    fn agents(&self, scenario: &ScenarioVersion, repetition: u32) -> Result<RunAgents, AgentError>;
}

impl<F> AgentProvider for F
where
    F: Fn(&ScenarioVersion, u32) -> Result<RunAgents, AgentError> + Send + Sync,
{
    fn agents(&self, scenario: &ScenarioVersion, repetition: u32) -> Result<RunAgents, AgentError> {
        (self)(scenario, repetition)
    }
}

/// Same agents for every run.
pub struct StaticAgentProvider {
    agents: RunAgents,
}

impl StaticAgentProvider {
    pub fn new(agents: RunAgents) -> Self {
        Self { agents }
    }
}

impl AgentProvider for StaticAgentProvider {
    fn agents(&self, _scenario: &ScenarioVersion, _repetition: u32) -> Result<RunAgents, AgentError> {
        Ok(self.agents.clone())
    }
}

/// Cancels every run of a batch that has not started yet.
#[derive(Clone)]
pub struct CancelHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl CancelHandle {
    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.tx.borrow()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RowStatus {
    Pass,
    Fail,
    Inconclusive,
    /// The scenario could not be resolved or at least one run failed to
    /// simulate or evaluate. Distinct from a rubric failure.
    ExecutionError,
}

impl RowStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RowStatus::Pass => "pass",
            RowStatus::Fail => "fail",
            RowStatus::Inconclusive => "inconclusive",
            RowStatus::ExecutionError => "execution_error",
        }
    }
}

/// One report row per requested scenario and tester variant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegressionRow {
    pub tag: String,
    /// `None` when a latest-version selector could not be resolved.
    pub version: Option<u32>,
    /// Tester variant name; `None` for the scenario's own tester persona.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub persona: Option<String>,
    pub status: RowStatus,
    /// Combined verdict over the evaluated runs.
    pub verdict: Option<Verdict>,
    pub passes: u32,
    pub fails: u32,
    pub inconclusive: u32,
    /// Runs that failed to simulate or evaluate.
    pub errors: u32,
    /// Runs skipped because the batch was cancelled.
    pub cancelled: u32,
    /// Mean weighted aggregate over evaluated runs.
    pub aggregate_score: Option<f64>,
    pub baseline_verdict: Option<Verdict>,
    pub baseline_score: Option<f64>,
    /// `aggregate_score - baseline_score`.
    pub delta: Option<f64>,
    /// Both pass and fail verdicts were observed.
    pub flaky: bool,
    pub execution_error: bool,
    pub detail: Option<String>,
}

impl RegressionRow {
    fn empty(tag: &str, version: Option<u32>) -> Self {
        Self {
            tag: tag.to_string(),
            version,
            persona: None,
            status: RowStatus::ExecutionError,
            verdict: None,
            passes: 0,
            fails: 0,
            inconclusive: 0,
            errors: 0,
            cancelled: 0,
            aggregate_score: None,
            baseline_verdict: None,
            baseline_score: None,
            delta: None,
            flaky: false,
            execution_error: false,
            detail: None,
        }
    }

    fn execution_error(tag: &str, version: Option<u32>, detail: String) -> Self {
        Self {
            execution_error: true,
            detail: Some(detail),
            ..Self::empty(tag, version)
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportCounts {
    pub pass: usize,
    pub fail: usize,
    pub inconclusive: usize,
    pub execution_error: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegressionReport {
    pub run_id: Uuid,
    pub generated_at: DateTime<Utc>,
    /// Sorted by tag, version and persona.
    pub rows: Vec<RegressionRow>,
    pub counts: ReportCounts,
}

impl RegressionReport {
    /// No rubric failures and no execution errors.
    pub fn is_green(&self) -> bool {
        self.counts.fail == 0 && self.counts.execution_error == 0
    }
}

enum RunOutcome {
    Evaluated(EvaluationResult),
    ExecutionError(String),
    Cancelled,
}

pub struct RegressionRunner {
    repository: ScenarioRepository,
    baselines: Arc<dyn BaselineStore>,
    provider: Arc<dyn AgentProvider>,
    judge: Arc<dyn Judge>,
    retriever: Arc<dyn DocumentRetriever>,
    simulation: SimulationConfig,
    config: RegressionConfig,
    cancel: Arc<watch::Sender<bool>>,
}

impl RegressionRunner {
    pub fn new(
        repository: ScenarioRepository,
        baselines: Arc<dyn BaselineStore>,
        provider: Arc<dyn AgentProvider>,
        judge: Arc<dyn Judge>,
    ) -> Self {
        let (tx, _rx) = watch::channel(false);
        Self {
            repository,
            baselines,
            provider,
            judge,
            retriever: Arc::new(NoDocuments),
            simulation: SimulationConfig::default(),
            config: RegressionConfig::default(),
            cancel: Arc::new(tx),
        }
    }

    pub fn with_retriever(mut self, retriever: Arc<dyn DocumentRetriever>) -> Self {
        self.retriever = retriever;
        self
    }

    pub fn with_simulation_config(mut self, simulation: SimulationConfig) -> Self {
        self.simulation = simulation;
        self
    }

    pub fn with_config(mut self, config: RegressionConfig) -> Self {
        self.config = config;
        self
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        CancelHandle {
            tx: Arc::clone(&self.cancel),
        }
    }

    /// Run `selectors × variants × repetitions` simulations and build the
    /// report.
    ///
    /// Identical selectors are run once. Different versions of one tag are
    /// distinct selectors and get their own rows.
    #[instrument(skip_all, fields(
        scenarios = selectors.len(),
        variants = self.config.tester_variants.len(),
        repetitions = self.config.repetitions
    ))]
    pub async fn run(&self, selectors: &[ScenarioSelector]) -> RegressionReport {
        let batch_id = Uuid::new_v4();
        let mut seen = HashSet::new();
        let selectors: Vec<&ScenarioSelector> = selectors
            .iter()
            .filter(|s| seen.insert((s.tag.as_str(), s.version)))
            .collect();

        let resolved = join_all(selectors.iter().map(|s| self.resolve(s))).await;

        let mut names = HashSet::new();
        let variants: Vec<Option<&TesterVariant>> = if self.config.tester_variants.is_empty() {
            vec![None]
        } else {
            self.config
                .tester_variants
                .iter()
                .filter(|v| names.insert(v.name.as_str()))
                .map(Some)
                .collect()
        };

        let mut jobs: Vec<Job<'_>> = Vec::with_capacity(selectors.len() * variants.len());
        for (selector, resolution) in selectors.iter().zip(&resolved) {
            for variant in &variants {
                let scenario = match (resolution, variant) {
                    (Ok(scenario), Some(variant)) => Ok(Arc::new(with_tester(scenario, variant))),
                    (Ok(scenario), None) => Ok(Arc::clone(scenario)),
                    (Err(detail), _) => Err(detail.clone()),
                };
                jobs.push(Job {
                    selector,
                    persona: variant.map(|v| v.name.clone()),
                    scenario,
                });
            }
        }

        let sem = Arc::new(Semaphore::new(self.config.concurrency.max(1)));
        let mut tasks = Vec::new();
        for (idx, job) in jobs.iter().enumerate() {
            let Ok(scenario) = &job.scenario else { continue };
            for repetition in 0..self.config.repetitions.max(1) {
                let scenario = Arc::clone(scenario);
                let sem = Arc::clone(&sem);
                let cancel_rx = self.cancel.subscribe();
                let provider = Arc::clone(&self.provider);
                let judge = Arc::clone(&self.judge);
                let retriever = Arc::clone(&self.retriever);
                let simulation = self.simulation.clone();

                let task = tokio::spawn(async move {
                    let _permit = sem.acquire_owned().await.ok();
                    if *cancel_rx.borrow() {
                        return RunOutcome::Cancelled;
                    }
                    let agents = match provider.agents(&scenario, repetition) {
                        Ok(agents) => agents,
                        Err(e) => return RunOutcome::ExecutionError(format!("agent setup failed: {e}")),
                    };
                    let timeout = Duration::from_millis(simulation.call_timeout_ms);
                    let run = DialogueOrchestrator::new(agents, retriever, simulation)
                        .run(&scenario)
                        .await;
                    if !run.transcript.is_completed() {
                        return RunOutcome::ExecutionError(format!(
                            "simulation ended with {}: {}",
                            run.transcript.termination,
                            run.transcript.failure.unwrap_or_default()
                        ));
                    }
                    match Evaluator::new(judge)
                        .with_timeout(timeout)
                        .evaluate(&scenario, &run.transcript)
                        .await
                    {
                        Ok(result) => RunOutcome::Evaluated(result),
                        Err(e) => RunOutcome::ExecutionError(e.to_string()),
                    }
                });
                tasks.push((idx, task));
            }
        }

        let mut outcomes: Vec<Vec<RunOutcome>> = jobs.iter().map(|_| Vec::new()).collect();
        for (idx, task) in tasks {
            let outcome = match task.await {
                Ok(outcome) => outcome,
                Err(e) => RunOutcome::ExecutionError(format!("run task failed: {e}")),
            };
            outcomes[idx].push(outcome);
        }

        let mut rows = Vec::with_capacity(jobs.len());
        for (job, runs) in jobs.iter().zip(outcomes) {
            let mut row = match &job.scenario {
                Err(detail) => RegressionRow::execution_error(
                    &job.selector.tag,
                    job.selector.version,
                    detail.clone(),
                ),
                Ok(scenario) => self.summarize(scenario, job.persona.as_deref(), runs).await,
            };
            row.persona = job.persona.clone();
            rows.push(row);
        }
        rows.sort_by(|a, b| {
            (&a.tag, a.version, &a.persona).cmp(&(&b.tag, b.version, &b.persona))
        });

        if self.config.record_baseline {
            self.record_baselines(&batch_id.to_string(), &rows).await;
        }

        let counts = count(&rows);
        emit_regression_finished(
            &batch_id.to_string(),
            rows.len(),
            counts.pass,
            counts.fail,
            counts.execution_error,
        );
        METRICS.flush();

        RegressionReport {
            run_id: batch_id,
            generated_at: Utc::now(),
            rows,
            counts,
        }
    }

    async fn resolve(&self, selector: &ScenarioSelector) -> Result<Arc<ScenarioVersion>, String> {
        let resolved = match selector.version {
            Some(version) => self.repository.get_version(&selector.tag, version).await,
            None => self.repository.get_latest(&selector.tag).await,
        };
        resolved.map(Arc::new).map_err(|e| e.to_string())
    }

    async fn summarize(
        &self,
        scenario: &ScenarioVersion,
        persona: Option<&str>,
        runs: Vec<RunOutcome>,
    ) -> RegressionRow {
        let mut row = RegressionRow::empty(&scenario.tag, Some(scenario.version));

        let mut scores = Vec::new();
        let mut first_error = None;
        for run in runs {
            match run {
                RunOutcome::Evaluated(result) => {
                    match result.verdict {
                        Verdict::Pass => row.passes += 1,
                        Verdict::Fail => row.fails += 1,
                        Verdict::Inconclusive => row.inconclusive += 1,
                    }
                    scores.extend(result.aggregate_score);
                }
                RunOutcome::ExecutionError(detail) => {
                    row.errors += 1;
                    first_error.get_or_insert(detail);
                }
                RunOutcome::Cancelled => row.cancelled += 1,
            }
        }

        let evaluated = row.passes + row.fails + row.inconclusive;
        row.verdict = (evaluated > 0).then(|| {
            if row.fails > 0 {
                Verdict::Fail
            } else if row.inconclusive > 0 {
                Verdict::Inconclusive
            } else {
                Verdict::Pass
            }
        });
        row.flaky = row.passes > 0 && row.fails > 0;
        row.aggregate_score =
            (!scores.is_empty()).then(|| scores.iter().sum::<f64>() / scores.len() as f64);

        row.execution_error = row.errors > 0 || evaluated == 0;
        row.status = match (row.execution_error, row.verdict) {
            (true, _) | (false, None) => RowStatus::ExecutionError,
            (false, Some(Verdict::Pass)) => RowStatus::Pass,
            (false, Some(Verdict::Fail)) => RowStatus::Fail,
            (false, Some(Verdict::Inconclusive)) => RowStatus::Inconclusive,
        };
        row.detail = match (first_error, row.cancelled) {
            (Some(error), _) => Some(error),
            (None, 0) => None,
            (None, n) => Some(format!("{n} run(s) cancelled before start")),
        };

        match self
            .baselines
            .latest_baseline(&scenario.tag, scenario.version, persona.unwrap_or_default())
            .await
        {
            Ok(Some(baseline)) => {
                row.baseline_verdict = Some(baseline.verdict.into());
                row.baseline_score = Some(baseline.aggregate_score);
                row.delta = row.aggregate_score.map(|s| s - baseline.aggregate_score);
            }
            Ok(None) => {}
            Err(e) => warn!(tag = %scenario.tag, error = %e, "baseline lookup failed"),
        }
        row
    }

    async fn record_baselines(&self, batch_id: &str, rows: &[RegressionRow]) {
        for row in rows {
            let (Some(version), Some(score)) = (row.version, row.aggregate_score) else {
                continue;
            };
            let verdict = match row.status {
                RowStatus::Pass => Verdict::Pass,
                RowStatus::Fail => Verdict::Fail,
                RowStatus::Inconclusive | RowStatus::ExecutionError => continue,
            };
            let record = BaselineRecord {
                tag: row.tag.clone(),
                version,
                persona: row.persona.clone().unwrap_or_default(),
                verdict: verdict.into(),
                aggregate_score: score,
                batch_id: batch_id.to_string(),
                recorded_at: Utc::now(),
            };
            match self.baselines.record_baseline(record).await {
                Ok(()) => emit_baseline_recorded(&row.tag, version, verdict.as_str(), batch_id),
                Err(e) => emit_regression_warning(batch_id, &row.tag, &e),
            }
        }
    }
}

/// One row's worth of work: a resolved selector under one tester variant.
struct Job<'a> {
    selector: &'a ScenarioSelector,
    persona: Option<String>,
    scenario: Result<Arc<ScenarioVersion>, String>,
}

/// Copy of `scenario` whose tester persona follows `variant`.
fn with_tester(scenario: &ScenarioVersion, variant: &TesterVariant) -> ScenarioVersion {
    let mut scenario = scenario.clone();
    scenario.spec.personas.tester.instructions = variant.instructions.clone();
    scenario
}

fn count(rows: &[RegressionRow]) -> ReportCounts {
    let mut counts = ReportCounts::default();
    for row in rows {
        match row.status {
            RowStatus::Pass => counts.pass += 1,
            RowStatus::Fail => counts.fail += 1,
            RowStatus::Inconclusive => counts.inconclusive += 1,
            RowStatus::ExecutionError => counts.execution_error += 1,
        }
    }
    counts
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn selector_parsing() {
        assert_eq!(
            ScenarioSelector::parse("onboarding").unwrap(),
            ScenarioSelector::latest("onboarding")
        );
        assert_eq!(
            ScenarioSelector::parse("onboarding@3").unwrap(),
            ScenarioSelector::pinned("onboarding", 3)
        );
        assert!(ScenarioSelector::parse("onboarding@x").is_err());
        assert!(ScenarioSelector::parse("onboarding@0").is_err());
        assert!(ScenarioSelector::parse("@2").is_err());
        assert!(ScenarioSelector::parse("").is_err());
    }

    #[test]
    fn counts_by_status() {
        let pass = RegressionRow {
            status: RowStatus::Pass,
            ..RegressionRow::empty("a", Some(1))
        };
        let error = RegressionRow::execution_error("b", None, "missing".into());
        let counts = count(&[pass, error]);
        assert_eq!(counts.pass, 1);
        assert_eq!(counts.execution_error, 1);
    }

    #[test]
    fn tester_variant_replaces_only_tester_instructions() {
        let spec = crate::domain::validate(&crate::starter::starter_document("onboarding")).unwrap();
        let scenario = ScenarioVersion {
            tag: "onboarding".into(),
            version: 1,
            spec,
            digest: scenario_store::ContentDigest::from_bytes(b"onboarding"),
            author: "author".into(),
            changelog: None,
            created_at: Utc::now(),
        };
        let variant = TesterVariant::new("weak", "Ramble.");
        let varied = with_tester(&scenario, &variant);
        assert_eq!(varied.spec.personas.tester.instructions, "Ramble.");
        assert_eq!(varied.spec.personas.trainee, scenario.spec.personas.trainee);
        assert_eq!((varied.tag.as_str(), varied.version), ("onboarding", 1));
        assert_ne!(scenario.spec.personas.tester.instructions, "Ramble.");
    }

    #[test]
    fn cancel_handle_flips_flag() {
        let (tx, _rx) = watch::channel(false);
        let handle = CancelHandle { tx: Arc::new(tx) };
        assert!(!handle.is_cancelled());
        handle.cancel();
        assert!(handle.is_cancelled());
    }
}
