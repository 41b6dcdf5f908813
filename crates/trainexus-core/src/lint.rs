//! Author-facing heuristics for prompt templates.
//!
//! Lint findings never block saving a scenario; they are advice shown by
//! `trainexus lint`.

use serde::{Deserialize, Serialize};

use crate::domain::{ScenarioSpec, TemplateKind};

const MAX_PROMPT_CHARS: usize = 6_000;
const WARN_PROMPT_CHARS: usize = 4_000;

/// Recommended sections; a section counts as present when any of its
/// spellings appears (case-insensitive).
const SECTIONS: &[(&str, &[&str])] = &[
    ("role", &["role", "rolle"]),
    ("behaviour", &["behaviour", "behavior", "verhalten"]),
    ("format", &["format"]),
];

const SAFETY_WORDS: &[&str] = &["safe", "respect", "sicher", "respekt"];
const GUARDRAIL_PHRASES: &[&str] = &["never provide medical", "never provide legal"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Error,
    Warning,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LintIssue {
    pub severity: Severity,
    pub message: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LintReport {
    pub errors: Vec<LintIssue>,
    pub warnings: Vec<LintIssue>,
}

impl LintReport {
    pub fn is_clean(&self) -> bool {
        self.errors.is_empty() && self.warnings.is_empty()
    }

    fn push(&mut self, severity: Severity, message: String) {
        let issue = LintIssue { severity, message };
        match severity {
            Severity::Error => self.errors.push(issue),
            Severity::Warning => self.warnings.push(issue),
        }
    }
}

/// Lint one prompt text.
pub fn lint_prompt(text: &str) -> LintReport {
    let mut report = LintReport::default();
    check_length(text, &mut report);
    check_sections(text, &mut report);
    check_safety(text, &mut report);
    report
}

fn check_length(text: &str, report: &mut LintReport) {
    let len = text.chars().count();
    if len > MAX_PROMPT_CHARS {
        report.push(
            Severity::Error,
            format!("prompt too long ({len} chars), keep it under {MAX_PROMPT_CHARS}"),
        );
    } else if len > WARN_PROMPT_CHARS {
        report.push(
            Severity::Warning,
            format!("prompt is {len} chars, consider trimming for latency"),
        );
    }
}

fn check_sections(text: &str, report: &mut LintReport) {
    let lower = text.to_lowercase();
    let missing: Vec<&str> = SECTIONS
        .iter()
        .filter(|(_, spellings)| !spellings.iter().any(|s| lower.contains(s)))
        .map(|(name, _)| *name)
        .collect();
    if !missing.is_empty() {
        report.push(
            Severity::Warning,
            format!("prompt is missing recommended sections: {}", missing.join(", ")),
        );
    }
}

fn check_safety(text: &str, report: &mut LintReport) {
    let lower = text.to_lowercase();
    if GUARDRAIL_PHRASES.iter().any(|p| lower.contains(p)) {
        return;
    }
    if !SAFETY_WORDS.iter().any(|w| lower.contains(w)) {
        report.push(
            Severity::Warning,
            "prompt should set a safe, respectful tone".to_string(),
        );
    }
}

/// Lint every template of a scenario.
///
/// Dialogue templates (main, tester) get all checks; judge templates only
/// the length check.
pub fn lint_scenario(spec: &ScenarioSpec) -> Vec<(TemplateKind, LintReport)> {
    TemplateKind::ALL
        .iter()
        .map(|&kind| {
            let text = spec.templates.get(kind);
            let report = match kind {
                TemplateKind::Main | TemplateKind::Tester => lint_prompt(text),
                TemplateKind::Formative | TemplateKind::Summative => {
                    let mut report = LintReport::default();
                    check_length(text, &mut report);
                    report
                }
            };
            (kind, report)
        })
        .collect()
}
