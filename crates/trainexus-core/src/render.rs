//! Prompt template rendering.
//!
//! Placeholders are `{name}` where `name` is an identifier optionally
//! containing dots (`{persona.role}`). `{{` and `}}` produce literal braces.
//! Any other brace is left as written, so JSON snippets inside a template
//! survive untouched.

use std::collections::BTreeMap;
use std::sync::OnceLock;

use regex::{Captures, Regex};

use crate::domain::{ScenarioSpec, Speaker, TemplateError, Turn};

const PLACEHOLDER_PATTERN: &str = r"\{\{|\}\}|\{([A-Za-z_][A-Za-z0-9_.]*)\}";

fn placeholder_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(PLACEHOLDER_PATTERN).expect("placeholder pattern is valid"))
}

/// Values available to a template at render time.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RenderContext {
    values: BTreeMap<String, String>,
}

impl RenderContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert.
    pub fn with(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.insert(name, value);
        self
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.values.insert(name.into(), value.into());
    }

    /// Insert every entry that is not already present.
    pub fn extend_missing<'a, I>(&mut self, entries: I)
    where
        I: IntoIterator<Item = (&'a String, &'a String)>,
    {
        for (k, v) in entries {
            self.values.entry(k.clone()).or_insert_with(|| v.clone());
        }
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.values.get(name).map(String::as_str)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.values.contains_key(name)
    }
}

fn bullet_list(items: &[String]) -> String {
    items
        .iter()
        .map(|i| format!("- {i}"))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Scenario-level values shared by every template of `spec`: metadata,
/// didactics and the declared custom variables.
pub fn scenario_context(spec: &ScenarioSpec) -> RenderContext {
    let d = &spec.didactics;
    let mut ctx = RenderContext::new()
        .with("scenario.tag", spec.tag.as_str())
        .with("scenario.name", spec.name.as_str())
        .with("scenario.description", spec.description.as_str())
        .with("didactic_goal", d.didactic_goal.as_str())
        .with("success_criteria", bullet_list(&d.success_criteria))
        .with("must_rules", bullet_list(&d.must_rules))
        .with("never_rules", bullet_list(&d.never_rules))
        .with("target_profile", d.target_profile.as_str());
    ctx.extend_missing(&spec.variables);
    ctx
}

/// Plain-text conversation, one `{role}: {output}` line per turn.
pub fn dialogue_text(spec: &ScenarioSpec, turns: &[Turn]) -> String {
    turns
        .iter()
        .map(|t| {
            let role = match t.speaker {
                Speaker::Trainee => &spec.personas.trainee.role,
                Speaker::Tester => &spec.personas.tester.role,
            };
            format!("{role}: {}", t.output)
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Placeholder names in first-appearance order, without duplicates.
pub fn placeholders(template: &str) -> Vec<String> {
    let mut names: Vec<String> = Vec::new();
    for caps in placeholder_regex().captures_iter(template) {
        if let Some(name) = caps.get(1) {
            if !names.iter().any(|n| n == name.as_str()) {
                names.push(name.as_str().to_string());
            }
        }
    }
    names
}

/// Substitute every placeholder in `template` from `context`.
///
/// All-or-nothing: if any placeholder is unresolved the error names all of
/// them and no text is returned.
pub fn render(template: &str, context: &RenderContext) -> Result<String, TemplateError> {
    let mut missing: Vec<String> = Vec::new();
    let rendered = placeholder_regex().replace_all(template, |caps: &Captures<'_>| {
        match caps.get(1) {
            Some(name) => match context.get(name.as_str()) {
                Some(value) => value.to_string(),
                None => {
                    if !missing.iter().any(|m| m == name.as_str()) {
                        missing.push(name.as_str().to_string());
                    }
                    String::new()
                }
            },
            None if &caps[0] == "{{" => "{".to_string(),
            None => "}".to_string(),
        }
    });

    if missing.is_empty() {
        Ok(rendered.into_owned())
    } else {
        Err(TemplateError { missing })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx() -> RenderContext {
        RenderContext::new()
            .with("persona.role", "Coach")
            .with("history", "Tester: hi")
    }

    #[test]
    fn substitutes_dotted_placeholders() {
        let out = render("You are {persona.role}.\n{history}", &ctx()).unwrap();
        assert_eq!(out, "You are Coach.\nTester: hi");
    }

    #[test]
    fn double_braces_are_literal() {
        let out = render("Reply as {{\"score\": 1}} for {persona.role}", &ctx()).unwrap();
        assert_eq!(out, "Reply as {\"score\": 1} for Coach");

        let out = render("{{persona.role}}", &ctx()).unwrap();
        assert_eq!(out, "{persona.role}");
    }

    #[test]
    fn non_identifier_braces_pass_through() {
        let out = render(r#"Format: {"score": 0-100} by {persona.role}"#, &ctx()).unwrap();
        assert_eq!(out, r#"Format: {"score": 0-100} by Coach"#);
    }

    #[test]
    fn unresolved_placeholders_fail_with_all_names() {
        let err = render("{persona.role} {goal} {tone} {goal}", &ctx()).unwrap_err();
        assert_eq!(err.missing, vec!["goal".to_string(), "tone".to_string()]);
    }

    #[test]
    fn placeholders_in_first_appearance_order() {
        let names = placeholders("{b} {a} {{c}} {b} {x.y}");
        assert_eq!(names, vec!["b", "a", "x.y"]);
    }

    #[test]
    fn rendering_is_deterministic() {
        let template = "{persona.role}: {history}";
        assert_eq!(
            render(template, &ctx()).unwrap(),
            render(template, &ctx()).unwrap()
        );
    }
}
