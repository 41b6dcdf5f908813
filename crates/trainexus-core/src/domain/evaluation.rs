//! Rubric judgments, per-criterion outcomes and evaluation verdicts.

use scenario_store::{BaselineVerdict, ContentDigest};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::domain::error::JudgmentParseError;
use crate::domain::scenario::{Phase, ScoringType};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    Pass,
    Fail,
    Inconclusive,
}

impl Verdict {
    pub fn as_str(&self) -> &'static str {
        match self {
            Verdict::Pass => "pass",
            Verdict::Fail => "fail",
            Verdict::Inconclusive => "inconclusive",
        }
    }
}

impl std::fmt::Display for Verdict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<Verdict> for BaselineVerdict {
    fn from(v: Verdict) -> Self {
        match v {
            Verdict::Pass => BaselineVerdict::Pass,
            Verdict::Fail => BaselineVerdict::Fail,
            Verdict::Inconclusive => BaselineVerdict::Inconclusive,
        }
    }
}

impl From<BaselineVerdict> for Verdict {
    fn from(v: BaselineVerdict) -> Self {
        match v {
            BaselineVerdict::Pass => Verdict::Pass,
            BaselineVerdict::Fail => Verdict::Fail,
            BaselineVerdict::Inconclusive => Verdict::Inconclusive,
        }
    }
}

/// A judge's raw answer: `{"score": number, "justification": string}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Judgment {
    pub score: f64,
    pub justification: String,
}

fn strip_code_fence(raw: &str) -> &str {
    let trimmed = raw.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let rest = rest.strip_prefix("json").unwrap_or(rest);
    rest.strip_suffix("```").unwrap_or(rest).trim()
}

impl Judgment {
    /// Parse judge output against the strict contract.
    ///
    /// A surrounding markdown code fence is tolerated; extra keys are ignored.
    pub fn parse(raw: &str) -> Result<Self, JudgmentParseError> {
        let value: Value = serde_json::from_str(strip_code_fence(raw))
            .map_err(|e| JudgmentParseError::NotJson(e.to_string()))?;
        let Some(obj) = value.as_object() else {
            return Err(JudgmentParseError::NotJson(
                "top-level value is not an object".to_string(),
            ));
        };

        let score = match obj.get("score") {
            None | Some(Value::Null) => return Err(JudgmentParseError::MissingField("score")),
            Some(v) => v.as_f64().ok_or(JudgmentParseError::WrongType {
                field: "score",
                expected: "number",
            })?,
        };
        let justification = match obj.get("justification") {
            None | Some(Value::Null) => {
                return Err(JudgmentParseError::MissingField("justification"))
            }
            Some(v) => v
                .as_str()
                .ok_or(JudgmentParseError::WrongType {
                    field: "justification",
                    expected: "string",
                })?
                .to_string(),
        };

        Ok(Self {
            score,
            justification,
        })
    }

    /// Check the score against the criterion's scale and normalise to 0.0..=1.0.
    pub fn normalized(&self, scoring: ScoringType) -> Result<f64, JudgmentParseError> {
        match scoring {
            ScoringType::Binary if self.score == 0.0 || self.score == 1.0 => Ok(self.score),
            ScoringType::Scaled if (0.0..=100.0).contains(&self.score) => Ok(self.score / 100.0),
            _ => Err(JudgmentParseError::ScoreOutOfRange {
                score: self.score,
                scoring: scoring.as_str(),
            }),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum CriterionOutcome {
    /// Normalised score in 0.0..=1.0.
    Scored { score: f64, justification: String },
    Inconclusive { reason: String },
}

impl CriterionOutcome {
    pub fn score(&self) -> Option<f64> {
        match self {
            CriterionOutcome::Scored { score, .. } => Some(*score),
            CriterionOutcome::Inconclusive { .. } => None,
        }
    }

    pub fn is_inconclusive(&self) -> bool {
        matches!(self, CriterionOutcome::Inconclusive { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CriterionResult {
    pub criterion_id: String,
    pub phase: Phase,
    pub weight: f64,
    pub outcome: CriterionOutcome,
    /// Number of judge calls that went into this outcome (checkpoints).
    pub judgments: u32,
}

/// Outcome of applying a scenario's rubric to one completed transcript.
///
/// Carries no timestamp or run id, so the same transcript always yields an
/// identical result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationResult {
    pub tag: String,
    pub version: u32,
    pub transcript_digest: ContentDigest,
    pub criteria: Vec<CriterionResult>,
    /// Weighted mean over conclusive criteria; `None` when none scored.
    pub aggregate_score: Option<f64>,
    pub verdict: Verdict,
}

/// Weighted aggregate and verdict.
///
/// Inconclusive if any criterion is inconclusive, fail below `threshold`,
/// pass otherwise. Each criterion contributes exactly once.
pub fn aggregate(criteria: &[CriterionResult], threshold: f64) -> (Option<f64>, Verdict) {
    let (weighted, total_weight) = criteria
        .iter()
        .filter_map(|c| c.outcome.score().map(|s| (s * c.weight, c.weight)))
        .fold((0.0, 0.0), |(ws, tw), (s, w)| (ws + s, tw + w));
    let score = (total_weight > 0.0).then(|| weighted / total_weight);

    let verdict = if criteria.iter().any(|c| c.outcome.is_inconclusive()) {
        Verdict::Inconclusive
    } else {
        match score {
            Some(s) if s >= threshold => Verdict::Pass,
            Some(_) => Verdict::Fail,
            None => Verdict::Inconclusive,
        }
    };
    (score, verdict)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scored(id: &str, weight: f64, score: f64) -> CriterionResult {
        CriterionResult {
            criterion_id: id.to_string(),
            phase: Phase::Summative,
            weight,
            outcome: CriterionOutcome::Scored {
                score,
                justification: "ok".to_string(),
            },
            judgments: 1,
        }
    }

    #[test]
    fn parses_strict_contract() {
        let j = Judgment::parse(r#"{"score": 80, "justification": "clear"}"#).unwrap();
        assert_eq!(j.score, 80.0);
        assert_eq!(j.justification, "clear");
    }

    #[test]
    fn tolerates_code_fence() {
        let j = Judgment::parse("```json\n{\"score\": 1, \"justification\": \"yes\"}\n```").unwrap();
        assert_eq!(j.score, 1.0);
    }

    #[test]
    fn rejects_contract_violations() {
        assert!(matches!(
            Judgment::parse("great job!"),
            Err(JudgmentParseError::NotJson(_))
        ));
        assert!(matches!(
            Judgment::parse(r#"{"justification": "x"}"#),
            Err(JudgmentParseError::MissingField("score"))
        ));
        assert!(matches!(
            Judgment::parse(r#"{"score": "high", "justification": "x"}"#),
            Err(JudgmentParseError::WrongType { field: "score", .. })
        ));
        assert!(matches!(
            Judgment::parse(r#"{"score": 3}"#),
            Err(JudgmentParseError::MissingField("justification"))
        ));
    }

    #[test]
    fn normalisation_enforces_scale() {
        let j = |score| Judgment {
            score,
            justification: String::new(),
        };
        assert_eq!(j(1.0).normalized(ScoringType::Binary).unwrap(), 1.0);
        assert!(j(0.5).normalized(ScoringType::Binary).is_err());
        assert_eq!(j(75.0).normalized(ScoringType::Scaled).unwrap(), 0.75);
        assert!(j(101.0).normalized(ScoringType::Scaled).is_err());
        assert!(j(-1.0).normalized(ScoringType::Scaled).is_err());
    }

    #[test]
    fn weighted_aggregate_below_threshold_fails() {
        let criteria = vec![scored("a", 3.0, 0.2), scored("b", 1.0, 1.0)];
        let (score, verdict) = aggregate(&criteria, 0.6);
        assert!((score.unwrap() - 0.4).abs() < 1e-9);
        assert_eq!(verdict, Verdict::Fail);
    }

    #[test]
    fn any_inconclusive_criterion_wins() {
        let mut criteria = vec![scored("a", 1.0, 1.0), scored("b", 1.0, 1.0)];
        criteria[1].outcome = CriterionOutcome::Inconclusive {
            reason: "malformed".to_string(),
        };
        let (score, verdict) = aggregate(&criteria, 0.6);
        assert_eq!(score, Some(1.0));
        assert_eq!(verdict, Verdict::Inconclusive);
    }

    #[test]
    fn verdict_converts_to_baseline() {
        assert_eq!(BaselineVerdict::from(Verdict::Fail), BaselineVerdict::Fail);
        assert_eq!(Verdict::from(BaselineVerdict::Pass), Verdict::Pass);
    }
}
