//! Regression batches over in-memory stores with deterministic agents.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use async_trait::async_trait;

use scenario_store::fakes::{MemoryBaselineStore, MemoryVersionStore};
use scenario_store::BaselineStore;
use serde_json::json;
use trainexus_core::{
    render_csv, starter_document, write_report_csv, write_report_json, AgentError, CancelHandle,
    ChatMessage, DialogueAgent, RegressionConfig, RegressionReport, RegressionRunner, RowStatus,
    RunAgents, ScenarioRepository, ScenarioSelector, ScenarioVersion, ScoringType, ScriptedAgent,
    ScriptedJudge, SimulationConfig, StaticAgentProvider, TesterVariant, Verdict, CSV_HEADER,
};

fn simulation() -> SimulationConfig {
    SimulationConfig {
        max_retries: 1,
        backoff_base_ms: 1,
        call_timeout_ms: 1_000,
    }
}

fn regression(repetitions: u32, concurrency: usize, record_baseline: bool) -> RegressionConfig {
    RegressionConfig {
        repetitions,
        concurrency,
        record_baseline,
        ..RegressionConfig::default()
    }
}

async fn repository_with(tags: &[&str], max_turns: u32) -> ScenarioRepository {
    let repo = ScenarioRepository::new(Arc::new(MemoryVersionStore::new()));
    for tag in tags {
        let mut doc = starter_document(tag);
        doc["max_turns"] = json!(max_turns);
        repo.create_version(&doc, "author", None).await.unwrap();
    }
    repo
}

/// Full marks when the transcript contains "good", zero otherwise.
fn keyword_judge() -> Arc<ScriptedJudge> {
    Arc::new(ScriptedJudge::from_fn(|req| {
        let good = req.transcript.contains("good");
        let score = match (req.criterion.scoring, good) {
            (ScoringType::Binary, true) => 1,
            (ScoringType::Scaled, true) => 100,
            (_, false) => 0,
        };
        Ok(format!(r#"{{"score": {score}, "justification": "keyword"}}"#))
    }))
}

fn good_agents() -> Arc<StaticAgentProvider> {
    Arc::new(StaticAgentProvider::new(RunAgents::shared(Arc::new(
        ScriptedAgent::replies(["a good answer"]),
    ))))
}

fn selectors(tags: &[&str]) -> Vec<ScenarioSelector> {
    tags.iter().map(|t| ScenarioSelector::latest(*t)).collect()
}

#[tokio::test]
async fn test_three_scenarios_with_one_fatal_failure() {
    let repo = repository_with(&["alpha", "beta", "gamma"], 2).await;
    let provider = |scenario: &ScenarioVersion, _rep: u32| -> Result<RunAgents, AgentError> {
        if scenario.tag == "beta" {
            Ok(RunAgents::shared(Arc::new(ScriptedAgent::failing(
                AgentError::Fatal("invalid api key".into()),
            ))))
        } else {
            Ok(RunAgents::shared(Arc::new(ScriptedAgent::replies([
                "a good answer",
            ]))))
        }
    };

    let runner = RegressionRunner::new(
        repo,
        Arc::new(MemoryBaselineStore::new()),
        Arc::new(provider),
        keyword_judge(),
    )
    .with_simulation_config(simulation())
    .with_config(regression(1, 3, false));

    let report = runner.run(&selectors(&["gamma", "beta", "alpha"])).await;

    let tags: Vec<&str> = report.rows.iter().map(|r| r.tag.as_str()).collect();
    assert_eq!(tags, vec!["alpha", "beta", "gamma"]);

    let beta = &report.rows[1];
    assert_eq!(beta.status, RowStatus::ExecutionError);
    assert!(beta.execution_error);
    assert_eq!(beta.verdict, None);
    assert_eq!(beta.errors, 1);
    assert!(beta.detail.as_deref().unwrap().contains("invalid api key"));

    for row in [&report.rows[0], &report.rows[2]] {
        assert_eq!(row.status, RowStatus::Pass);
        assert!(!row.execution_error);
        assert_eq!(row.passes, 1);
    }
    assert_eq!(report.counts.pass, 2);
    assert_eq!(report.counts.execution_error, 1);
    assert!(!report.is_green());
}

#[tokio::test]
async fn test_alternating_agent_is_flagged_flaky() {
    let repo = repository_with(&["onboarding"], 1).await;
    let shared = Arc::new(ScriptedAgent::replies(["a good answer", "a bad answer"]));
    let runner = RegressionRunner::new(
        repo,
        Arc::new(MemoryBaselineStore::new()),
        Arc::new(StaticAgentProvider::new(RunAgents::shared(shared))),
        keyword_judge(),
    )
    .with_simulation_config(simulation())
    .with_config(regression(2, 1, false));

    let report = runner.run(&selectors(&["onboarding"])).await;
    let row = &report.rows[0];
    assert_eq!((row.passes, row.fails), (1, 1));
    assert!(row.flaky);
    assert_eq!(row.status, RowStatus::Fail);
    assert!((row.aggregate_score.unwrap() - 0.5).abs() < 1e-9);
}

#[tokio::test]
async fn test_stable_agent_is_not_flaky() {
    let repo = repository_with(&["onboarding"], 2).await;
    let runner = RegressionRunner::new(
        repo,
        Arc::new(MemoryBaselineStore::new()),
        good_agents(),
        keyword_judge(),
    )
    .with_simulation_config(simulation())
    .with_config(regression(3, 2, false));

    let report = runner.run(&selectors(&["onboarding"])).await;
    let row = &report.rows[0];
    assert_eq!(row.passes, 3);
    assert!(!row.flaky);
    assert!(report.is_green());
}

#[tokio::test]
async fn test_missing_scenario_gets_execution_error_row() {
    let repo = repository_with(&["onboarding"], 2).await;
    let runner = RegressionRunner::new(
        repo,
        Arc::new(MemoryBaselineStore::new()),
        good_agents(),
        keyword_judge(),
    )
    .with_simulation_config(simulation());

    let report = runner
        .run(&[
            ScenarioSelector::latest("onboarding"),
            ScenarioSelector::latest("ghost"),
            ScenarioSelector::pinned("onboarding", 9),
            ScenarioSelector::latest("onboarding"),
        ])
        .await;

    // the repeated latest selector runs once, the pinned one keeps its row
    assert_eq!(report.rows.len(), 3);
    let ghost = &report.rows[0];
    assert_eq!(ghost.tag, "ghost");
    assert_eq!(ghost.status, RowStatus::ExecutionError);
    assert_eq!(ghost.version, None);
    assert!(ghost.detail.as_deref().unwrap().contains("ghost"));

    let latest = &report.rows[1];
    assert_eq!((latest.tag.as_str(), latest.version), ("onboarding", Some(1)));
    assert_eq!(latest.status, RowStatus::Pass);
    assert_eq!(latest.passes, 1);

    let missing = &report.rows[2];
    assert_eq!((missing.tag.as_str(), missing.version), ("onboarding", Some(9)));
    assert_eq!(missing.status, RowStatus::ExecutionError);
    assert!(missing.execution_error);
    assert_eq!(report.counts.execution_error, 2);
}

#[tokio::test]
async fn test_pinned_versions_of_one_tag_get_separate_rows() {
    let repo = repository_with(&["onboarding"], 2).await;
    let mut doc = starter_document("onboarding");
    doc["version"] = json!(1);
    doc["max_turns"] = json!(2);
    repo.create_version(&doc, "author", Some("second".into()))
        .await
        .unwrap();

    let runner = RegressionRunner::new(
        repo,
        Arc::new(MemoryBaselineStore::new()),
        good_agents(),
        keyword_judge(),
    )
    .with_simulation_config(simulation());

    let report = runner
        .run(&[
            ScenarioSelector::pinned("onboarding", 9),
            ScenarioSelector::pinned("onboarding", 2),
            ScenarioSelector::pinned("onboarding", 1),
        ])
        .await;

    let versions: Vec<Option<u32>> = report.rows.iter().map(|r| r.version).collect();
    assert_eq!(versions, vec![Some(1), Some(2), Some(9)]);
    assert_eq!(report.rows[0].status, RowStatus::Pass);
    assert_eq!(report.rows[1].status, RowStatus::Pass);
    assert_eq!(report.rows[2].status, RowStatus::ExecutionError);
    assert!(report.rows[2].detail.is_some());
}

/// Tracks how many calls are in flight at once.
#[derive(Default)]
struct PeakAgent {
    in_flight: AtomicUsize,
    peak: AtomicUsize,
}

#[async_trait]
impl DialogueAgent for PeakAgent {
    async fn respond(&self, _prompt: &str, _history: &[ChatMessage]) -> Result<String, AgentError> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(100)).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        Ok("a good answer".to_string())
    }
}

#[tokio::test(start_paused = true)]
async fn test_concurrency_limit_bounds_runs_in_flight() {
    let repo = repository_with(&["alpha", "beta", "gamma"], 1).await;
    let agent = Arc::new(PeakAgent::default());
    let runner = RegressionRunner::new(
        repo,
        Arc::new(MemoryBaselineStore::new()),
        Arc::new(StaticAgentProvider::new(RunAgents::shared(agent.clone()))),
        keyword_judge(),
    )
    .with_simulation_config(simulation())
    .with_config(regression(3, 2, false));

    let report = runner.run(&selectors(&["alpha", "beta", "gamma"])).await;

    assert_eq!(report.counts.pass, 3);
    assert!(report.rows.iter().all(|r| r.passes == 3));
    assert_eq!(agent.in_flight.load(Ordering::SeqCst), 0);
    let peak = agent.peak.load(Ordering::SeqCst);
    assert!(peak <= 2, "peak {peak} exceeds the concurrency limit");
    assert!(peak >= 2, "runs never overlapped");
}

/// Answers well only when its prompt asks for a well-prepared learner.
struct InstructionFollowingTester;

#[async_trait]
impl DialogueAgent for InstructionFollowingTester {
    async fn respond(&self, prompt: &str, _history: &[ChatMessage]) -> Result<String, AgentError> {
        if prompt.contains("well-prepared") {
            Ok("a good answer".to_string())
        } else {
            Ok("no idea".to_string())
        }
    }
}

#[tokio::test]
async fn test_tester_variant_matrix_yields_one_row_per_persona() {
    let repo = repository_with(&["onboarding"], 2).await;
    let baselines = Arc::new(MemoryBaselineStore::new());
    let agents = RunAgents::new(
        Arc::new(ScriptedAgent::replies(["What do you know about the team?"])),
        Arc::new(InstructionFollowingTester),
    );
    let config = RegressionConfig {
        tester_variants: TesterVariant::default_matrix(),
        ..regression(1, 3, true)
    };

    let report = RegressionRunner::new(
        repo,
        baselines.clone(),
        Arc::new(StaticAgentProvider::new(agents)),
        keyword_judge(),
    )
    .with_simulation_config(simulation())
    .with_config(config)
    .run(&selectors(&["onboarding"]))
    .await;

    let personas: Vec<Option<&str>> = report.rows.iter().map(|r| r.persona.as_deref()).collect();
    assert_eq!(
        personas,
        vec![Some("best_case"), Some("weak"), Some("zero_knowledge")]
    );
    assert!(report.rows.iter().all(|r| r.version == Some(1)));
    assert_eq!(report.rows[0].status, RowStatus::Pass);
    assert_eq!(report.rows[1].status, RowStatus::Fail);
    assert_eq!(report.rows[2].status, RowStatus::Fail);

    let weak = baselines
        .latest_baseline("onboarding", 1, "weak")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(weak.persona, "weak");
    assert!(baselines
        .latest_baseline("onboarding", 1, "")
        .await
        .unwrap()
        .is_none());

    let csv = render_csv(&report);
    assert!(csv.lines().nth(1).unwrap().starts_with("onboarding,1,best_case,pass,"));
}

#[tokio::test]
async fn test_baselines_are_recorded_and_compared() {
    let repo = repository_with(&["onboarding"], 2).await;
    let baselines = Arc::new(MemoryBaselineStore::new());

    let first = RegressionRunner::new(
        repo.clone(),
        baselines.clone(),
        good_agents(),
        keyword_judge(),
    )
    .with_simulation_config(simulation())
    .with_config(regression(1, 1, true))
    .run(&selectors(&["onboarding"]))
    .await;
    assert_eq!(first.rows[0].baseline_verdict, None);
    assert_eq!(first.rows[0].delta, None);

    let recorded = baselines
        .latest_baseline("onboarding", 1, "")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(recorded.batch_id, first.run_id.to_string());

    let second = RegressionRunner::new(repo, baselines, good_agents(), keyword_judge())
        .with_simulation_config(simulation())
        .run(&selectors(&["onboarding"]))
        .await;
    let row = &second.rows[0];
    assert_eq!(row.baseline_verdict, Some(Verdict::Pass));
    assert_eq!(row.baseline_score, Some(1.0));
    assert_eq!(row.delta, Some(0.0));
}

#[tokio::test]
async fn test_cancel_before_start_cancels_every_run() {
    let repo = repository_with(&["alpha", "beta"], 2).await;
    let runner = RegressionRunner::new(
        repo,
        Arc::new(MemoryBaselineStore::new()),
        good_agents(),
        keyword_judge(),
    )
    .with_simulation_config(simulation())
    .with_config(regression(2, 2, false));

    runner.cancel_handle().cancel();
    let report = runner.run(&selectors(&["alpha", "beta"])).await;

    assert_eq!(report.rows.len(), 2);
    for row in &report.rows {
        assert_eq!(row.status, RowStatus::ExecutionError);
        assert_eq!(row.cancelled, 2);
        assert_eq!(row.errors, 0);
    }
}

#[tokio::test]
async fn test_cancel_mid_batch_lets_in_flight_run_finish() {
    let repo = repository_with(&["alpha", "beta", "gamma"], 2).await;
    let handle: Arc<OnceLock<CancelHandle>> = Arc::new(OnceLock::new());
    let hook = handle.clone();
    let provider = move |_scenario: &ScenarioVersion, _rep: u32| -> Result<RunAgents, AgentError> {
        if let Some(cancel) = hook.get() {
            cancel.cancel();
        }
        Ok(RunAgents::shared(Arc::new(ScriptedAgent::replies([
            "a good answer",
        ]))))
    };

    let runner = RegressionRunner::new(
        repo,
        Arc::new(MemoryBaselineStore::new()),
        Arc::new(provider),
        keyword_judge(),
    )
    .with_simulation_config(simulation())
    .with_config(regression(1, 1, false));
    assert!(handle.set(runner.cancel_handle()).is_ok());

    let report = runner.run(&selectors(&["alpha", "beta", "gamma"])).await;

    assert_eq!(report.rows.len(), 3);
    assert_eq!(report.counts.pass, 1);
    assert_eq!(report.counts.execution_error, 2);
    let cancelled: u32 = report.rows.iter().map(|r| r.cancelled).sum();
    assert_eq!(cancelled, 2);
}

#[tokio::test]
async fn test_reports_are_written_as_csv_and_json() {
    let repo = repository_with(&["alpha", "beta"], 2).await;
    let report = RegressionRunner::new(
        repo,
        Arc::new(MemoryBaselineStore::new()),
        good_agents(),
        keyword_judge(),
    )
    .with_simulation_config(simulation())
    .run(&selectors(&["beta", "alpha", "ghost"]))
    .await;

    let dir = tempfile::tempdir().unwrap();
    let csv_path = dir.path().join("report.csv");
    let json_path = dir.path().join("report.json");
    write_report_csv(&csv_path, &report).unwrap();
    write_report_json(&json_path, &report).unwrap();

    let csv = std::fs::read_to_string(&csv_path).unwrap();
    assert_eq!(csv, render_csv(&report));
    let lines: Vec<&str> = csv.lines().collect();
    assert_eq!(lines[0], CSV_HEADER);
    assert_eq!(lines.len(), 4);
    assert!(lines[1].starts_with("alpha,1,,pass,pass,1.0000,,,false,false,1,0,0,0,"));
    assert!(lines[3].starts_with("ghost,,,execution_error,,"));

    let parsed: RegressionReport =
        serde_json::from_str(&std::fs::read_to_string(&json_path).unwrap()).unwrap();
    assert_eq!(parsed, report);
}
