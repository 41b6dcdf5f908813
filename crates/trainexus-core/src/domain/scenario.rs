//! Scenario model and boundary validation.
//!
//! Authoring tools hand us loosely typed JSON. [`validate`] walks the whole
//! document, collects every violated constraint, and only then produces the
//! typed [`ScenarioSpec`] that the rest of the engine works with.

use std::collections::{BTreeMap, HashSet};

use chrono::{DateTime, Utc};
use scenario_store::{ContentDigest, VersionRecord};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::domain::error::{SchemaError, Violation};
use crate::render::placeholders;

/// Default pass threshold (an overall score of 60/100).
pub const DEFAULT_PASS_THRESHOLD: f64 = 0.6;
pub const DEFAULT_FORMATIVE_INTERVAL: u32 = 2;
pub const DEFAULT_END_MARKER: &str = "[END]";

/// Placeholders every dialogue template (main, tester) may use.
pub const DIALOGUE_VARIABLES: &[&str] = &[
    "scenario.tag",
    "scenario.name",
    "scenario.description",
    "didactic_goal",
    "success_criteria",
    "must_rules",
    "never_rules",
    "target_profile",
    "persona.role",
    "persona.instructions",
    "persona.tone",
    "persona.disallowed_topics",
    "counterpart.role",
    "history",
    "last_message",
    "turn",
    "max_turns",
    "documents",
    "end_marker",
];

/// Placeholders every judge template (formative, summative) may use.
pub const JUDGE_VARIABLES: &[&str] = &[
    "scenario.tag",
    "scenario.name",
    "scenario.description",
    "didactic_goal",
    "success_criteria",
    "must_rules",
    "never_rules",
    "target_profile",
    "criterion.id",
    "criterion.description",
    "criterion.type",
    "phase",
    "score_range",
    "transcript",
    "turn",
];

// ---------------------------------------------------------------------------
// Typed model
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScoringType {
    /// Score must be exactly 0 or 1.
    Binary,
    /// Score in 0..=100, normalised to 0.0..=1.0.
    Scaled,
}

impl ScoringType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScoringType::Binary => "binary",
            ScoringType::Scaled => "scaled",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    /// Judged at intermediate checkpoints.
    Formative,
    /// Judged once on the whole transcript.
    Summative,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Formative => "formative",
            Phase::Summative => "summative",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RubricCriterion {
    pub id: String,
    #[serde(default)]
    pub description: String,
    pub weight: f64,
    #[serde(rename = "type")]
    pub scoring: ScoringType,
    pub phase: Phase,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersonaConstraints {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_turns: Option<u32>,
    #[serde(default)]
    pub disallowed_topics: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Persona {
    #[serde(default)]
    pub role: String,
    pub instructions: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tone: Option<String>,
    #[serde(default)]
    pub constraints: PersonaConstraints,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Personas {
    /// Trainee-facing persona, driven by the main template.
    pub trainee: Persona,
    /// Simulated learner, driven by the tester template.
    pub tester: Persona,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromptTemplates {
    pub main: String,
    pub tester: String,
    pub formative: String,
    pub summative: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TemplateKind {
    Main,
    Tester,
    Formative,
    Summative,
}

impl TemplateKind {
    pub const ALL: [TemplateKind; 4] = [
        TemplateKind::Main,
        TemplateKind::Tester,
        TemplateKind::Formative,
        TemplateKind::Summative,
    ];

    pub fn field(&self) -> &'static str {
        match self {
            TemplateKind::Main => "main",
            TemplateKind::Tester => "tester",
            TemplateKind::Formative => "formative",
            TemplateKind::Summative => "summative",
        }
    }

    /// Built-in placeholders this template may reference.
    pub fn builtins(&self) -> &'static [&'static str] {
        match self {
            TemplateKind::Main | TemplateKind::Tester => DIALOGUE_VARIABLES,
            TemplateKind::Formative | TemplateKind::Summative => JUDGE_VARIABLES,
        }
    }
}

impl PromptTemplates {
    pub fn get(&self, kind: TemplateKind) -> &str {
        match kind {
            TemplateKind::Main => &self.main,
            TemplateKind::Tester => &self.tester,
            TemplateKind::Formative => &self.formative,
            TemplateKind::Summative => &self.summative,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Didactics {
    #[serde(default)]
    pub didactic_goal: String,
    #[serde(default)]
    pub success_criteria: Vec<String>,
    #[serde(default)]
    pub must_rules: Vec<String>,
    #[serde(default)]
    pub never_rules: Vec<String>,
    #[serde(default)]
    pub target_profile: String,
}

/// Opaque reference resolved by the document retrieval collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentRef {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
}

fn default_pass_threshold() -> f64 {
    DEFAULT_PASS_THRESHOLD
}

fn default_formative_interval() -> u32 {
    DEFAULT_FORMATIVE_INTERVAL
}

fn default_end_marker() -> String {
    DEFAULT_END_MARKER.to_string()
}

/// Validated scenario content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScenarioSpec {
    pub tag: String,
    /// In an edit: the version it was based on (0 = new scenario).
    /// In a stored version: the assigned version number.
    #[serde(default)]
    pub version: u32,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub didactics: Didactics,
    pub personas: Personas,
    pub templates: PromptTemplates,
    pub rubric: Vec<RubricCriterion>,
    pub max_turns: u32,
    #[serde(default = "default_pass_threshold")]
    pub pass_threshold: f64,
    #[serde(default = "default_formative_interval")]
    pub formative_interval: u32,
    #[serde(default = "default_end_marker")]
    pub end_marker: String,
    #[serde(default)]
    pub variables: BTreeMap<String, String>,
    #[serde(default)]
    pub documents: Vec<DocumentRef>,
}

impl ScenarioSpec {
    /// Version this edit is based on; `None` for a brand-new scenario.
    pub fn base_version(&self) -> Option<u32> {
        (self.version > 0).then_some(self.version)
    }

    /// Scenario limit, tightened by either persona's own `max_turns`.
    pub fn effective_max_turns(&self) -> u32 {
        [
            Some(self.max_turns),
            self.personas.trainee.constraints.max_turns,
            self.personas.tester.constraints.max_turns,
        ]
        .into_iter()
        .flatten()
        .min()
        .unwrap_or(self.max_turns)
    }

    pub fn criteria(&self, phase: Phase) -> impl Iterator<Item = &RubricCriterion> {
        self.rubric.iter().filter(move |c| c.phase == phase)
    }

    /// Normalised JSON document (defaults filled in).
    pub fn to_document(&self) -> serde_json::Result<Value> {
        serde_json::to_value(self)
    }
}

/// An immutable, persisted scenario version.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScenarioVersion {
    pub tag: String,
    pub version: u32,
    pub spec: ScenarioSpec,
    pub digest: ContentDigest,
    pub author: String,
    pub changelog: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl ScenarioVersion {
    /// Rebuild from a stored record, re-validating the document.
    pub fn from_record(record: VersionRecord) -> Result<Self, SchemaError> {
        let mut spec = validate(&record.document)?;
        spec.version = record.version;
        Ok(Self {
            tag: record.tag,
            version: record.version,
            spec,
            digest: record.digest,
            author: record.author,
            changelog: record.changelog,
            created_at: record.created_at,
        })
    }
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

#[derive(Default)]
struct Checker {
    violations: Vec<Violation>,
}

impl Checker {
    fn push(&mut self, path: impl Into<String>, message: impl Into<String>) {
        self.violations.push(Violation {
            path: path.into(),
            message: message.into(),
        });
    }

    fn required<'a>(&mut self, obj: &'a Map<String, Value>, key: &str, path: &str) -> Option<&'a Value> {
        match obj.get(key) {
            None | Some(Value::Null) => {
                self.push(path, "missing required field");
                None
            }
            Some(v) => Some(v),
        }
    }

    fn object<'a>(&mut self, value: &'a Value, path: &str) -> Option<&'a Map<String, Value>> {
        let obj = value.as_object();
        if obj.is_none() {
            self.push(path, "expected an object");
        }
        obj
    }

    fn string<'a>(&mut self, value: &'a Value, path: &str) -> Option<&'a str> {
        let s = value.as_str();
        if s.is_none() {
            self.push(path, "expected a string");
        }
        s
    }

    fn non_empty_string<'a>(&mut self, value: &'a Value, path: &str) -> Option<&'a str> {
        let s = self.string(value, path)?;
        if s.trim().is_empty() {
            self.push(path, "must not be empty");
            return None;
        }
        Some(s)
    }

    fn integer(&mut self, value: &Value, path: &str, min: u64) -> Option<u32> {
        match value.as_u64() {
            Some(n) if n < min => {
                self.push(path, format!("must be at least {min}"));
                None
            }
            Some(n) => match u32::try_from(n) {
                Ok(n) => Some(n),
                Err(_) => {
                    self.push(path, "integer too large");
                    None
                }
            },
            None => {
                self.push(path, "expected a non-negative integer");
                None
            }
        }
    }

    fn string_list(&mut self, value: &Value, path: &str) {
        match value.as_array() {
            Some(items) => {
                for (i, item) in items.iter().enumerate() {
                    if !item.is_string() {
                        self.push(format!("{path}[{i}]"), "expected a string");
                    }
                }
            }
            None => self.push(path, "expected a list of strings"),
        }
    }
}

fn optional<'a>(obj: &'a Map<String, Value>, key: &str) -> Option<&'a Value> {
    obj.get(key).filter(|v| !v.is_null())
}

fn is_valid_tag(tag: &str) -> bool {
    tag.chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_' || c == '-')
}

fn is_placeholder_name(name: &str) -> bool {
    let mut chars = name.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '.')
}

fn strip_nulls(value: &Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.iter()
                .filter(|(_, v)| !v.is_null())
                .map(|(k, v)| (k.clone(), strip_nulls(v)))
                .collect(),
        ),
        Value::Array(items) => Value::Array(items.iter().map(strip_nulls).collect()),
        other => other.clone(),
    }
}

fn check_persona(c: &mut Checker, personas: &Map<String, Value>, key: &str) {
    let path = format!("personas.{key}");
    let Some(value) = c.required(personas, key, &path) else {
        return;
    };
    let Some(persona) = c.object(value, &path) else {
        return;
    };

    if let Some(role) = optional(persona, "role") {
        c.string(role, &format!("{path}.role"));
    }
    if let Some(instructions) = c.required(persona, "instructions", &format!("{path}.instructions")) {
        c.non_empty_string(instructions, &format!("{path}.instructions"));
    }
    if let Some(tone) = optional(persona, "tone") {
        c.string(tone, &format!("{path}.tone"));
    }
    if let Some(constraints) = optional(persona, "constraints") {
        let cpath = format!("{path}.constraints");
        if let Some(constraints) = c.object(constraints, &cpath) {
            if let Some(max) = optional(constraints, "max_turns") {
                c.integer(max, &format!("{cpath}.max_turns"), 1);
            }
            if let Some(topics) = optional(constraints, "disallowed_topics") {
                c.string_list(topics, &format!("{cpath}.disallowed_topics"));
            }
        }
    }
}

fn check_variables(c: &mut Checker, root: &Map<String, Value>) -> HashSet<String> {
    let mut declared = HashSet::new();
    let Some(value) = optional(root, "variables") else {
        return declared;
    };
    let Some(vars) = c.object(value, "variables") else {
        return declared;
    };
    for (name, v) in vars {
        let path = format!("variables.{name}");
        if !is_placeholder_name(name) {
            c.push(&path, "variable names must be identifiers (letters, digits, '_', '.')");
            continue;
        }
        if DIALOGUE_VARIABLES.contains(&name.as_str()) || JUDGE_VARIABLES.contains(&name.as_str()) {
            c.push(&path, "shadows a built-in variable");
            continue;
        }
        if c.string(v, &path).is_some() {
            declared.insert(name.clone());
        }
    }
    declared
}

fn check_templates(c: &mut Checker, root: &Map<String, Value>, declared: &HashSet<String>) {
    let Some(value) = c.required(root, "templates", "templates") else {
        return;
    };
    let Some(templates) = c.object(value, "templates") else {
        return;
    };
    for kind in TemplateKind::ALL {
        let path = format!("templates.{}", kind.field());
        let Some(t) = c.required(templates, kind.field(), &path) else {
            continue;
        };
        let Some(text) = c.non_empty_string(t, &path) else {
            continue;
        };
        for name in placeholders(text) {
            if !kind.builtins().contains(&name.as_str()) && !declared.contains(&name) {
                c.push(&path, format!("unknown placeholder {{{name}}}"));
            }
        }
    }
}

fn check_rubric(c: &mut Checker, root: &Map<String, Value>) {
    let Some(value) = c.required(root, "rubric", "rubric") else {
        return;
    };
    let Some(items) = value.as_array() else {
        c.push("rubric", "expected a list of criteria");
        return;
    };

    let mut ids = HashSet::new();
    let (mut formative, mut summative) = (0, 0);
    for (i, item) in items.iter().enumerate() {
        let path = format!("rubric[{i}]");
        let Some(criterion) = c.object(item, &path) else {
            continue;
        };
        if let Some(id) = c.required(criterion, "id", &format!("{path}.id")) {
            if let Some(id) = c.non_empty_string(id, &format!("{path}.id")) {
                if !ids.insert(id.to_string()) {
                    c.push(format!("{path}.id"), format!("duplicate criterion id '{id}'"));
                }
            }
        }
        if let Some(desc) = optional(criterion, "description") {
            c.string(desc, &format!("{path}.description"));
        }
        if let Some(weight) = c.required(criterion, "weight", &format!("{path}.weight")) {
            match weight.as_f64() {
                Some(w) if w > 0.0 && w.is_finite() => {}
                Some(_) => c.push(format!("{path}.weight"), "must be greater than 0"),
                None => c.push(format!("{path}.weight"), "expected a number"),
            }
        }
        if let Some(kind) = c.required(criterion, "type", &format!("{path}.type")) {
            if !matches!(kind.as_str(), Some("binary") | Some("scaled")) {
                c.push(format!("{path}.type"), "must be 'binary' or 'scaled'");
            }
        }
        if let Some(phase) = c.required(criterion, "phase", &format!("{path}.phase")) {
            match phase.as_str() {
                Some("formative") => formative += 1,
                Some("summative") => summative += 1,
                _ => c.push(format!("{path}.phase"), "must be 'formative' or 'summative'"),
            }
        }
    }

    if formative == 0 {
        c.push("rubric", "at least one formative criterion is required");
    }
    if summative == 0 {
        c.push("rubric", "at least one summative criterion is required");
    }
}

fn check_documents(c: &mut Checker, root: &Map<String, Value>) {
    let Some(value) = optional(root, "documents") else {
        return;
    };
    let Some(items) = value.as_array() else {
        c.push("documents", "expected a list of document references");
        return;
    };
    let mut ids = HashSet::new();
    for (i, item) in items.iter().enumerate() {
        let path = format!("documents[{i}]");
        let Some(doc) = c.object(item, &path) else {
            continue;
        };
        if let Some(id) = c.required(doc, "id", &format!("{path}.id")) {
            if let Some(id) = c.non_empty_string(id, &format!("{path}.id")) {
                if !ids.insert(id.to_string()) {
                    c.push(format!("{path}.id"), format!("duplicate document id '{id}'"));
                }
            }
        }
        for key in ["title", "kind"] {
            if let Some(v) = optional(doc, key) {
                c.string(v, &format!("{path}.{key}"));
            }
        }
    }
}

/// Validate a scenario document against the fixed schema.
///
/// Returns every violation at once. The input is never modified.
pub fn validate(document: &Value) -> Result<ScenarioSpec, SchemaError> {
    let Some(root) = document.as_object() else {
        return Err(SchemaError {
            violations: vec![Violation {
                path: "$".to_string(),
                message: "scenario document must be a JSON object".to_string(),
            }],
        });
    };

    let mut c = Checker::default();

    if let Some(tag) = c.required(root, "tag", "tag") {
        if let Some(tag) = c.non_empty_string(tag, "tag") {
            if !is_valid_tag(tag) {
                c.push("tag", "only lowercase letters, digits, '_' and '-' are allowed");
            }
        }
    }
    if let Some(version) = optional(root, "version") {
        c.integer(version, "version", 0);
    }
    for key in ["name", "description"] {
        if let Some(v) = optional(root, key) {
            c.string(v, key);
        }
    }

    if let Some(didactics) = optional(root, "didactics") {
        if let Some(d) = c.object(didactics, "didactics") {
            for key in ["didactic_goal", "target_profile"] {
                if let Some(v) = optional(d, key) {
                    c.string(v, &format!("didactics.{key}"));
                }
            }
            for key in ["success_criteria", "must_rules", "never_rules"] {
                if let Some(v) = optional(d, key) {
                    c.string_list(v, &format!("didactics.{key}"));
                }
            }
        }
    }

    if let Some(personas) = c.required(root, "personas", "personas") {
        if let Some(personas) = c.object(personas, "personas") {
            check_persona(&mut c, personas, "trainee");
            check_persona(&mut c, personas, "tester");
        }
    }

    let declared = check_variables(&mut c, root);
    check_templates(&mut c, root, &declared);
    check_rubric(&mut c, root);

    if let Some(max_turns) = c.required(root, "max_turns", "max_turns") {
        c.integer(max_turns, "max_turns", 1);
    }
    if let Some(threshold) = optional(root, "pass_threshold") {
        match threshold.as_f64() {
            Some(t) if (0.0..=1.0).contains(&t) => {}
            Some(_) => c.push("pass_threshold", "must be between 0 and 1"),
            None => c.push("pass_threshold", "expected a number"),
        }
    }
    if let Some(interval) = optional(root, "formative_interval") {
        c.integer(interval, "formative_interval", 1);
    }
    if let Some(marker) = optional(root, "end_marker") {
        c.non_empty_string(marker, "end_marker");
    }
    check_documents(&mut c, root);

    if !c.violations.is_empty() {
        return Err(SchemaError {
            violations: c.violations,
        });
    }

    let mut spec: ScenarioSpec =
        serde_json::from_value(strip_nulls(document)).map_err(|e| SchemaError {
            violations: vec![Violation {
                path: "$".to_string(),
                message: e.to_string(),
            }],
        })?;
    if spec.personas.trainee.role.trim().is_empty() {
        spec.personas.trainee.role = "trainee".to_string();
    }
    if spec.personas.tester.role.trim().is_empty() {
        spec.personas.tester.role = "tester".to_string();
    }
    Ok(spec)
}
