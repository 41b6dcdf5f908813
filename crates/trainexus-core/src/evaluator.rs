//! Rubric evaluation of completed transcripts.
//!
//! Summative criteria are judged once on the whole transcript. Formative
//! criteria are judged at checkpoints (every `formative_interval` turns, or
//! the whole transcript when it is shorter) and scored as the mean of their
//! checkpoints. A judgment that cannot be rendered, fails, or violates the
//! judge contract makes its criterion inconclusive; evaluation carries on.

use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tracing::{debug, instrument};

use crate::agent::{Judge, JudgeRequest};
use crate::domain::{
    aggregate, CriterionOutcome, CriterionResult, EvaluationError, EvaluationResult, Phase,
    RubricCriterion, ScenarioSpec, ScenarioVersion, ScoringType, TemplateKind, Transcript,
};
use crate::metrics::METRICS;
use crate::obs::emit_evaluation_finished;
use crate::render::{dialogue_text, render, scenario_context};

pub struct Evaluator {
    judge: Arc<dyn Judge>,
    call_timeout: Option<Duration>,
}

impl Evaluator {
    pub fn new(judge: Arc<dyn Judge>) -> Self {
        Self {
            judge,
            call_timeout: None,
        }
    }

    /// Bound every judge call; a call that exceeds it is inconclusive.
    pub fn with_timeout(mut self, limit: Duration) -> Self {
        self.call_timeout = Some(limit);
        self
    }

    #[instrument(skip_all, fields(tag = %scenario.tag, version = scenario.version, turns = transcript.len()))]
    pub async fn evaluate(
        &self,
        scenario: &ScenarioVersion,
        transcript: &Transcript,
    ) -> Result<EvaluationResult, EvaluationError> {
        if !transcript.is_completed() {
            return Err(EvaluationError::FailedTranscript {
                termination: transcript.termination.to_string(),
                detail: transcript.failure.clone().unwrap_or_default(),
            });
        }
        let transcript_digest = transcript
            .digest()
            .map_err(|e| EvaluationError::Digest(e.to_string()))?;

        let spec = &scenario.spec;
        let checkpoints = formative_checkpoints(transcript.len(), spec.formative_interval);
        let criteria = join_all(
            spec.rubric
                .iter()
                .map(|criterion| self.judge_criterion(spec, criterion, transcript, &checkpoints)),
        )
        .await;

        let (aggregate_score, verdict) = aggregate(&criteria, spec.pass_threshold);
        let inconclusive = criteria
            .iter()
            .filter(|c| c.outcome.is_inconclusive())
            .count();
        emit_evaluation_finished(
            &scenario.tag,
            scenario.version,
            verdict.as_str(),
            aggregate_score,
            inconclusive,
        );

        Ok(EvaluationResult {
            tag: scenario.tag.clone(),
            version: scenario.version,
            transcript_digest,
            criteria,
            aggregate_score,
            verdict,
        })
    }

    async fn judge_criterion(
        &self,
        spec: &ScenarioSpec,
        criterion: &RubricCriterion,
        transcript: &Transcript,
        checkpoints: &[usize],
    ) -> CriterionResult {
        let points = match criterion.phase {
            Phase::Formative => checkpoints.to_vec(),
            Phase::Summative => vec![transcript.len()],
        };
        let outcomes = join_all(
            points
                .iter()
                .map(|&turns| self.judge_at(spec, criterion, transcript, turns)),
        )
        .await;

        let mut scores = Vec::with_capacity(outcomes.len());
        let mut justifications = Vec::with_capacity(outcomes.len());
        let mut failure = None;
        for (turns, outcome) in points.iter().zip(outcomes) {
            match outcome {
                Ok((score, justification)) => {
                    scores.push(score);
                    justifications.push(if points.len() > 1 {
                        format!("turn {turns}: {justification}")
                    } else {
                        justification
                    });
                }
                Err(reason) => {
                    METRICS.inc_judgments_inconclusive();
                    debug!(criterion = %criterion.id, turns, reason = %reason, "judgment inconclusive");
                    failure.get_or_insert(format!("turn {turns}: {reason}"));
                }
            }
        }

        let outcome = match failure {
            Some(reason) => CriterionOutcome::Inconclusive { reason },
            None => CriterionOutcome::Scored {
                score: scores.iter().sum::<f64>() / scores.len() as f64,
                justification: justifications.join("\n"),
            },
        };
        CriterionResult {
            criterion_id: criterion.id.clone(),
            phase: criterion.phase,
            weight: criterion.weight,
            outcome,
            judgments: points.len() as u32,
        }
    }

    /// One judgment over the first `turns` turns; the error is the reason it
    /// is inconclusive.
    async fn judge_at(
        &self,
        spec: &ScenarioSpec,
        criterion: &RubricCriterion,
        transcript: &Transcript,
        turns: usize,
    ) -> Result<(f64, String), String> {
        let kind = match criterion.phase {
            Phase::Formative => TemplateKind::Formative,
            Phase::Summative => TemplateKind::Summative,
        };
        let text = dialogue_text(spec, &transcript.turns[..turns]);
        let context = scenario_context(spec)
            .with("criterion.id", criterion.id.as_str())
            .with("criterion.description", criterion.description.as_str())
            .with("criterion.type", criterion.scoring.as_str())
            .with("phase", criterion.phase.as_str())
            .with("score_range", score_range(criterion.scoring))
            .with("transcript", text.as_str())
            .with("turn", turns.to_string());
        let prompt = render(spec.templates.get(kind), &context).map_err(|e| e.to_string())?;

        let request = JudgeRequest {
            tag: spec.tag.clone(),
            criterion: criterion.clone(),
            phase: criterion.phase,
            checkpoint: turns as u32,
            prompt,
            transcript: text,
        };
        METRICS.inc_judgments();
        let call = self.judge.judge(&request);
        let judged = match self.call_timeout {
            Some(limit) => tokio::time::timeout(limit, call)
                .await
                .map_err(|_| format!("judge timed out after {}ms", limit.as_millis()))?,
            None => call.await,
        };
        let judgment = judged.map_err(|e| e.to_string())?;
        let score = judgment
            .normalized(criterion.scoring)
            .map_err(|e| e.to_string())?;
        Ok((score, judgment.justification))
    }
}

fn score_range(scoring: ScoringType) -> &'static str {
    match scoring {
        ScoringType::Binary => "0 or 1",
        ScoringType::Scaled => "0-100",
    }
}

/// Transcript prefix lengths at which formative criteria are judged.
pub fn formative_checkpoints(len: usize, interval: u32) -> Vec<usize> {
    let interval = interval.max(1) as usize;
    if len < interval {
        return vec![len];
    }
    (1..=len / interval).map(|k| k * interval).collect()
}
