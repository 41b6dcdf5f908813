//! Simulation and evaluation end to end over stored scenario versions.

use std::sync::Arc;
use std::time::Duration;

use scenario_store::fakes::MemoryVersionStore;
use serde_json::{json, Value};
use trainexus_core::{
    starter_document, validate, AgentError, DialogueOrchestrator, Evaluator, NoDocuments,
    RunAgents, RunState, ScenarioRepository, ScenarioVersion, ScriptStep, ScriptedAgent,
    ScriptedJudge, SimulationConfig, Speaker, TerminationReason, TrainexusError, Verdict,
};

fn config() -> SimulationConfig {
    SimulationConfig {
        max_retries: 2,
        backoff_base_ms: 1,
        call_timeout_ms: 500,
    }
}

async fn stored(doc: Value) -> ScenarioVersion {
    let repo = ScenarioRepository::new(Arc::new(MemoryVersionStore::new()));
    repo.create_version(&doc, "author", None).await.unwrap()
}

fn orchestrator(trainee: ScriptedAgent, tester: ScriptedAgent) -> DialogueOrchestrator {
    DialogueOrchestrator::new(
        RunAgents::new(Arc::new(trainee), Arc::new(tester)),
        Arc::new(NoDocuments),
        config(),
    )
}

#[tokio::test]
async fn test_max_turns_yields_exactly_k_turns() {
    for k in 1..=5u32 {
        let mut doc = starter_document("onboarding");
        doc["max_turns"] = json!(k);
        let scenario = stored(doc).await;

        let run = orchestrator(
            ScriptedAgent::replies(["Let's begin."]),
            ScriptedAgent::replies(["Go on."]),
        )
        .run(&scenario)
        .await;

        assert_eq!(run.transcript.len(), k as usize);
        assert_eq!(run.transcript.termination, TerminationReason::MaxTurns);
        assert_eq!(run.metadata.state, RunState::Completed);
        assert_eq!(run.transcript.turns[0].speaker, Speaker::Trainee);
    }
}

#[tokio::test]
async fn test_persona_limit_tightens_max_turns() {
    let mut doc = starter_document("onboarding");
    doc["max_turns"] = json!(10);
    doc["personas"]["tester"]["constraints"] = json!({"max_turns": 3});
    let scenario = stored(doc).await;

    let run = orchestrator(ScriptedAgent::replies(["a"]), ScriptedAgent::replies(["b"]))
        .run(&scenario)
        .await;
    assert_eq!(run.transcript.len(), 3);
}

#[tokio::test]
async fn test_end_marker_beats_turn_limit() {
    let mut doc = starter_document("onboarding");
    doc["max_turns"] = json!(4);
    doc["end_marker"] = json!("<<done>>");
    let scenario = stored(doc).await;

    let run = orchestrator(
        ScriptedAgent::replies(["Welcome."]),
        ScriptedAgent::replies(["Question?", "All clear <<done>>"]),
    )
    .run(&scenario)
    .await;

    assert_eq!(run.transcript.len(), 4);
    assert_eq!(run.transcript.termination, TerminationReason::ExplicitEndMarker);
}

#[tokio::test]
async fn test_undeclared_placeholder_is_rejected_at_validation() {
    let mut doc = starter_document("onboarding");
    doc["templates"]["tester"] = json!("Play {persona.role} at {company}.");
    let err = validate(&doc).unwrap_err();
    assert!(err
        .violations
        .iter()
        .any(|v| v.path == "templates.tester" && v.message.contains("company")));

    let repo = ScenarioRepository::new(Arc::new(MemoryVersionStore::new()));
    let err = repo.create_version(&doc, "author", None).await.unwrap_err();
    assert!(matches!(err, TrainexusError::Schema(_)));

    doc["variables"] = json!({"company": "ACME"});
    assert!(validate(&doc).is_ok());
}

#[tokio::test]
async fn test_retries_are_invisible_in_transcript() {
    let scenario = stored(starter_document("onboarding")).await;
    let flaky_trainee = ScriptedAgent::new(vec![
        ScriptStep::Fail(AgentError::Transient("503".into())),
        ScriptStep::Reply("Welcome.".into()),
    ]);
    let retried = orchestrator(flaky_trainee, ScriptedAgent::replies(["Hi [END]"]))
        .run(&scenario)
        .await;
    let clean = orchestrator(
        ScriptedAgent::replies(["Welcome."]),
        ScriptedAgent::replies(["Hi [END]"]),
    )
    .run(&scenario)
    .await;

    assert!(retried.metadata.retries >= 1);
    assert_eq!(clean.metadata.retries, 0);
    assert_eq!(
        retried.transcript.digest().unwrap(),
        clean.transcript.digest().unwrap()
    );
}

#[tokio::test(start_paused = true)]
async fn test_timeout_keeps_partial_transcript() {
    let mut doc = starter_document("onboarding");
    doc["max_turns"] = json!(6);
    let scenario = stored(doc).await;

    let tester = ScriptedAgent::new(vec![
        ScriptStep::Reply("First question".into()),
        ScriptStep::Delayed {
            delay: Duration::from_secs(30),
            reply: "late".into(),
        },
    ]);
    let run = orchestrator(ScriptedAgent::replies(["Answer"]), tester)
        .run(&scenario)
        .await;

    assert_eq!(run.metadata.state, RunState::Failed);
    assert_eq!(run.transcript.termination, TerminationReason::TesterTimeout);
    assert_eq!(run.transcript.len(), 3);

    let err = Evaluator::new(Arc::new(ScriptedJudge::constant(1.0, "x")))
        .evaluate(&scenario, &run.transcript)
        .await
        .unwrap_err();
    assert!(err.to_string().contains("tester_timeout"));
}

#[tokio::test]
async fn test_deterministic_stubs_give_identical_results() {
    let scenario = stored(starter_document("onboarding")).await;
    let judge = Arc::new(ScriptedJudge::from_fn(|req| {
        let score = if req.criterion.id == "guidance" { 75 } else { 1 };
        Ok(format!(r#"{{"score": {score}, "justification": "steady"}}"#))
    }));

    let mut results = Vec::new();
    for _ in 0..2 {
        let run = orchestrator(
            ScriptedAgent::replies(["Explain it back to me?", "Good."]),
            ScriptedAgent::replies(["Sure, first you...", "Thanks [END]"]),
        )
        .run(&scenario)
        .await;
        let result = Evaluator::new(judge.clone())
            .evaluate(&scenario, &run.transcript)
            .await
            .unwrap();
        results.push((run.transcript.digest().unwrap(), result));
    }

    assert_eq!(results[0], results[1]);
    assert_eq!(results[0].1.verdict, Verdict::Pass);
}

#[tokio::test]
async fn test_below_threshold_fails_and_malformed_judgment_is_inconclusive() {
    let mut doc = starter_document("onboarding");
    doc["pass_threshold"] = json!(0.8);
    let scenario = stored(doc).await;
    let run = orchestrator(
        ScriptedAgent::replies(["Hello"]),
        ScriptedAgent::replies(["Bye [END]"]),
    )
    .run(&scenario)
    .await;

    // guidance (w=1) 0.7, goal_reached (w=2) 1 -> 0.9 passes 0.8
    let passing = Evaluator::new(Arc::new(ScriptedJudge::from_fn(|req| {
        let score = if req.criterion.id == "guidance" { 70 } else { 1 };
        Ok(format!(r#"{{"score": {score}, "justification": "j"}}"#))
    })))
    .evaluate(&scenario, &run.transcript)
    .await
    .unwrap();
    assert_eq!(passing.verdict, Verdict::Pass);

    // guidance 0.7, goal_reached 0 -> 0.2333 below 0.8
    let failing = Evaluator::new(Arc::new(ScriptedJudge::from_fn(|req| {
        let score = if req.criterion.id == "guidance" { 70 } else { 0 };
        Ok(format!(r#"{{"score": {score}, "justification": "j"}}"#))
    })))
    .evaluate(&scenario, &run.transcript)
    .await
    .unwrap();
    assert_eq!(failing.verdict, Verdict::Fail);

    let malformed = Evaluator::new(Arc::new(ScriptedJudge::from_fn(|req| {
        if req.criterion.id == "guidance" {
            Ok("I think it went well".to_string())
        } else {
            Ok(r#"{"score": 1, "justification": "j"}"#.to_string())
        }
    })))
    .evaluate(&scenario, &run.transcript)
    .await
    .unwrap();
    assert_eq!(malformed.verdict, Verdict::Inconclusive);
    assert!(malformed.criteria[0].outcome.is_inconclusive());
}
