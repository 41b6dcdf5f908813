//! Dialogue orchestration: drives one simulated conversation between the
//! trainee-facing persona and the tester persona.
//!
//! A run moves `Init -> Running -> {Completed, Failed}`. Turns alternate
//! strictly (trainee opens). After each turn the run stops when the tester
//! wrote the end marker or the effective turn limit is reached. Agent calls
//! are bounded by a per-call timeout; rate-limited and transient failures
//! are retried with exponential backoff. A failed run keeps every turn it
//! produced.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{debug, warn, Instrument};

use crate::agent::{ChatMessage, DialogueAgent};
use crate::config::SimulationConfig;
use crate::domain::{
    AgentError, RunMetadata, RunState, ScenarioSpec, ScenarioVersion, SimulationRun, Speaker,
    TemplateKind, TerminationReason, Transcript, Turn,
};
use crate::metrics::METRICS;
use crate::obs::{emit_agent_retry, emit_simulation_finished, emit_simulation_started, simulation_span};
use crate::render::{dialogue_text, render, scenario_context, RenderContext};
use crate::retrieval::{format_excerpts, DocumentRetriever};

/// The two agents taking part in one run.
#[derive(Clone)]
pub struct RunAgents {
    pub trainee: Arc<dyn DialogueAgent>,
    pub tester: Arc<dyn DialogueAgent>,
}

impl RunAgents {
    pub fn new(trainee: Arc<dyn DialogueAgent>, tester: Arc<dyn DialogueAgent>) -> Self {
        Self { trainee, tester }
    }

    /// One agent plays both personas.
    pub fn shared(agent: Arc<dyn DialogueAgent>) -> Self {
        Self {
            trainee: agent.clone(),
            tester: agent,
        }
    }

    fn for_speaker(&self, speaker: Speaker) -> &Arc<dyn DialogueAgent> {
        match speaker {
            Speaker::Trainee => &self.trainee,
            Speaker::Tester => &self.tester,
        }
    }
}

/// Final failure of one agent call after retries.
struct CallFailure {
    attempts: u32,
    error: AgentError,
}

pub struct DialogueOrchestrator {
    agents: RunAgents,
    retriever: Arc<dyn DocumentRetriever>,
    config: SimulationConfig,
}

impl DialogueOrchestrator {
    pub fn new(
        agents: RunAgents,
        retriever: Arc<dyn DocumentRetriever>,
        config: SimulationConfig,
    ) -> Self {
        Self {
            agents,
            retriever,
            config,
        }
    }

    /// Simulate one conversation for `scenario`.
    ///
    /// Never fails: agent, retrieval and template problems end the run in
    /// `RunState::Failed` with the reason recorded on the transcript.
    pub async fn run(&self, scenario: &ScenarioVersion) -> SimulationRun {
        let meta = RunMetadata::start();
        let span = simulation_span(&meta.run_id.to_string(), &scenario.tag, scenario.version);
        self.drive(scenario, meta).instrument(span).await
    }

    async fn drive(&self, scenario: &ScenarioVersion, mut meta: RunMetadata) -> SimulationRun {
        let spec = &scenario.spec;
        let max_turns = spec.effective_max_turns();
        emit_simulation_started(
            &meta.run_id.to_string(),
            &scenario.tag,
            scenario.version,
            max_turns,
        );
        METRICS.inc_simulations();

        let base = match self.prepare(spec, max_turns).await {
            Ok(base) => base,
            Err(detail) => {
                return finish(scenario, meta, Vec::new(), TerminationReason::Error, Some(detail));
            }
        };
        meta.state = RunState::Running;

        let mut turns: Vec<Turn> = Vec::new();
        for index in 1..=max_turns {
            let speaker = Speaker::for_turn(index);
            let context = turn_context(&base, spec, speaker, &turns, index);
            let prompt = match render(spec.templates.get(template_for(speaker)), &context) {
                Ok(prompt) => prompt,
                Err(e) => {
                    return finish(scenario, meta, turns, TerminationReason::Error, Some(e.to_string()));
                }
            };
            let history = speaker_history(&turns, speaker);

            let output = match self.call_agent(speaker, &prompt, &history, &mut meta).await {
                Ok(output) => output,
                Err(failure) => {
                    // A timeout of either agent ends the run as `tester_timeout`;
                    // the detail names the speaker that stalled.
                    let reason = match failure.error {
                        AgentError::Timeout(_) => TerminationReason::TesterTimeout,
                        _ => TerminationReason::Error,
                    };
                    let detail = format!(
                        "{speaker} agent failed after {} attempt(s): {}",
                        failure.attempts, failure.error
                    );
                    return finish(scenario, meta, turns, reason, Some(detail));
                }
            };

            let ended = speaker == Speaker::Tester && output.contains(spec.end_marker.as_str());
            debug!(turn = index, speaker = %speaker, chars = output.len(), "turn recorded");
            turns.push(Turn {
                index,
                speaker,
                prompt,
                output,
                timestamp: Utc::now(),
            });
            if ended {
                return finish(scenario, meta, turns, TerminationReason::ExplicitEndMarker, None);
            }
        }

        finish(scenario, meta, turns, TerminationReason::MaxTurns, None)
    }

    /// Fetch excerpts and check that both opening prompts render.
    async fn prepare(&self, spec: &ScenarioSpec, max_turns: u32) -> Result<RenderContext, String> {
        let query = if spec.didactics.didactic_goal.trim().is_empty() {
            spec.name.as_str()
        } else {
            spec.didactics.didactic_goal.as_str()
        };
        let excerpts = self
            .retriever
            .retrieve(&spec.tag, query)
            .await
            .map_err(|e| e.to_string())?;

        let base = scenario_context(spec)
            .with("documents", format_excerpts(&excerpts))
            .with("end_marker", spec.end_marker.as_str())
            .with("max_turns", max_turns.to_string());

        for speaker in [Speaker::Trainee, Speaker::Tester] {
            let opening = turn_context(&base, spec, speaker, &[], 1);
            render(spec.templates.get(template_for(speaker)), &opening)
                .map_err(|e| format!("{} template: {e}", template_for(speaker).field()))?;
        }
        Ok(base)
    }

    async fn call_agent(
        &self,
        speaker: Speaker,
        prompt: &str,
        history: &[ChatMessage],
        meta: &mut RunMetadata,
    ) -> Result<String, CallFailure> {
        let agent = self.agents.for_speaker(speaker);
        let limit = Duration::from_millis(self.config.call_timeout_ms);
        let max_attempts = self.config.max_retries + 1;

        let mut attempt = 1;
        loop {
            meta.calls += 1;
            METRICS.inc_agent_calls();
            let result = match tokio::time::timeout(limit, agent.respond(prompt, history)).await {
                Ok(result) => result,
                Err(_elapsed) => Err(AgentError::Timeout(self.config.call_timeout_ms)),
            };

            match result {
                Ok(output) => return Ok(output),
                Err(error) if error.is_retryable() && attempt < max_attempts => {
                    let delay_ms = self.config.backoff_ms(attempt);
                    emit_agent_retry(speaker.as_str(), attempt, delay_ms, &error);
                    meta.retries += 1;
                    METRICS.inc_agent_retries();
                    tokio::time::sleep(Duration::from_millis(delay_ms)).await;
                    attempt += 1;
                }
                Err(error) => {
                    return Err(CallFailure {
                        attempts: attempt,
                        error,
                    })
                }
            }
        }
    }
}

fn template_for(speaker: Speaker) -> TemplateKind {
    match speaker {
        Speaker::Trainee => TemplateKind::Main,
        Speaker::Tester => TemplateKind::Tester,
    }
}

/// Per-turn values layered over the scenario-level context.
fn turn_context(
    base: &RenderContext,
    spec: &ScenarioSpec,
    speaker: Speaker,
    turns: &[Turn],
    index: u32,
) -> RenderContext {
    let (persona, counterpart) = match speaker {
        Speaker::Trainee => (&spec.personas.trainee, &spec.personas.tester),
        Speaker::Tester => (&spec.personas.tester, &spec.personas.trainee),
    };
    base.clone()
        .with("persona.role", persona.role.as_str())
        .with("persona.instructions", persona.instructions.as_str())
        .with("persona.tone", persona.tone.clone().unwrap_or_default())
        .with(
            "persona.disallowed_topics",
            persona.constraints.disallowed_topics.join(", "),
        )
        .with("counterpart.role", counterpart.role.as_str())
        .with("history", dialogue_text(spec, turns))
        .with(
            "last_message",
            turns.last().map(|t| t.output.clone()).unwrap_or_default(),
        )
        .with("turn", index.to_string())
}

/// Conversation from `speaker`'s point of view: its own turns are the
/// assistant side.
fn speaker_history(turns: &[Turn], speaker: Speaker) -> Vec<ChatMessage> {
    turns
        .iter()
        .map(|t| {
            if t.speaker == speaker {
                ChatMessage::assistant(t.output.as_str())
            } else {
                ChatMessage::user(t.output.as_str())
            }
        })
        .collect()
}

fn finish(
    scenario: &ScenarioVersion,
    mut meta: RunMetadata,
    turns: Vec<Turn>,
    termination: TerminationReason,
    failure: Option<String>,
) -> SimulationRun {
    meta.state = if termination.is_completion() {
        RunState::Completed
    } else {
        RunState::Failed
    };
    meta.finished_at = Some(Utc::now());

    if let Some(detail) = &failure {
        METRICS.inc_simulations_failed();
        warn!(termination = %termination, turns = turns.len(), error = %detail, "simulation failed");
    }
    emit_simulation_finished(
        &meta.run_id.to_string(),
        termination.as_str(),
        turns.len(),
        meta.retries,
        meta.duration_ms(),
    );

    SimulationRun {
        tag: scenario.tag.clone(),
        version: scenario.version,
        transcript: Transcript {
            turns,
            termination,
            failure,
        },
        metadata: meta,
    }
}
