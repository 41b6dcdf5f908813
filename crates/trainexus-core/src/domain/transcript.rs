//! Turns, transcripts and run metadata produced by one simulation run.

use chrono::{DateTime, Utc};
use scenario_store::ContentDigest;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::digest::content_digest;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Speaker {
    /// Trainee-facing persona (main template).
    Trainee,
    /// Simulated learner (tester template).
    Tester,
}

impl Speaker {
    /// Speaker of the 1-based turn `index`; the trainee always opens.
    pub fn for_turn(index: u32) -> Self {
        if index % 2 == 1 {
            Speaker::Trainee
        } else {
            Speaker::Tester
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Speaker::Trainee => "trainee",
            Speaker::Tester => "tester",
        }
    }
}

impl std::fmt::Display for Speaker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Turn {
    /// 1-based position in the transcript.
    pub index: u32,
    pub speaker: Speaker,
    /// Rendered instruction the agent was called with.
    pub prompt: String,
    /// Raw model output.
    pub output: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminationReason {
    MaxTurns,
    ExplicitEndMarker,
    TesterTimeout,
    Error,
}

impl TerminationReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            TerminationReason::MaxTurns => "max_turns",
            TerminationReason::ExplicitEndMarker => "explicit_end_marker",
            TerminationReason::TesterTimeout => "tester_timeout",
            TerminationReason::Error => "error",
        }
    }

    /// `true` for reasons that end a run in `Completed`.
    pub fn is_completion(&self) -> bool {
        matches!(
            self,
            TerminationReason::MaxTurns | TerminationReason::ExplicitEndMarker
        )
    }
}

impl std::fmt::Display for TerminationReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Ordered turn log of one run. Failed runs keep every turn produced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transcript {
    pub turns: Vec<Turn>,
    pub termination: TerminationReason,
    /// Failure detail for `tester_timeout` / `error`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<String>,
}

#[derive(Serialize)]
struct DigestTurn<'a> {
    index: u32,
    speaker: Speaker,
    prompt: &'a str,
    output: &'a str,
}

#[derive(Serialize)]
struct DigestView<'a> {
    turns: Vec<DigestTurn<'a>>,
    termination: TerminationReason,
    failure: Option<&'a str>,
}

impl Transcript {
    pub fn is_completed(&self) -> bool {
        self.termination.is_completion()
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    /// Content digest over speakers, prompts, outputs and termination.
    /// Timestamps are excluded so replays of the same dialogue match.
    pub fn digest(&self) -> serde_json::Result<ContentDigest> {
        let view = DigestView {
            turns: self
                .turns
                .iter()
                .map(|t| DigestTurn {
                    index: t.index,
                    speaker: t.speaker,
                    prompt: &t.prompt,
                    output: &t.output,
                })
                .collect(),
            termination: self.termination,
            failure: self.failure.as_deref(),
        };
        content_digest(&serde_json::to_value(view)?)
    }
}

/// Orchestrator state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Init,
    Running,
    Completed,
    Failed,
}

/// Observability data for one run; never part of the transcript.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunMetadata {
    pub run_id: Uuid,
    pub state: RunState,
    /// Retried agent calls (transient failures that were retried).
    pub retries: u32,
    /// Agent call attempts, retries included.
    pub calls: u32,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl RunMetadata {
    pub fn start() -> Self {
        Self {
            run_id: Uuid::new_v4(),
            state: RunState::Init,
            retries: 0,
            calls: 0,
            started_at: Utc::now(),
            finished_at: None,
        }
    }

    pub fn duration_ms(&self) -> u64 {
        self.finished_at
            .map(|end| (end - self.started_at).num_milliseconds().max(0) as u64)
            .unwrap_or(0)
    }
}

/// Result of one simulation: the transcript plus its run metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SimulationRun {
    pub tag: String,
    pub version: u32,
    pub transcript: Transcript,
    pub metadata: RunMetadata,
}
