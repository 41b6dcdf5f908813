//! Field-level diff between two scenario documents.
//!
//! Objects are walked key by key. `rubric` and `documents` entries are
//! matched by their `id`, so reordering them is not a change; every other
//! array is compared by position. The `version` field is ignored.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::domain::ScenarioVersion;

/// Top-level arrays whose entries are identified by `id`.
const KEYED_LISTS: &[&str] = &["rubric", "documents"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    Added,
    Removed,
    Modified,
}

impl ChangeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeKind::Added => "added",
            ChangeKind::Removed => "removed",
            ChangeKind::Modified => "modified",
        }
    }
}

/// One changed field, e.g. `rubric[empathy].weight` or `templates.main`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeRecord {
    pub kind: ChangeKind,
    pub path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub old: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub new: Option<Value>,
}

/// Changes turning `old` into `new`, ordered by path.
pub fn diff_documents(old: &Value, new: &Value) -> Vec<ChangeRecord> {
    let mut changes = Vec::new();
    match (old.as_object(), new.as_object()) {
        (Some(a), Some(b)) => {
            let keys: BTreeSet<&String> = a.keys().chain(b.keys()).collect();
            for key in keys {
                if key == "version" {
                    continue;
                }
                let (va, vb) = (a.get(key), b.get(key));
                match (va, vb) {
                    (Some(Value::Array(la)), Some(Value::Array(lb)))
                        if KEYED_LISTS.contains(&key.as_str()) =>
                    {
                        diff_keyed(key, la, lb, &mut changes)
                    }
                    _ => diff_optional(key.clone(), va, vb, &mut changes),
                }
            }
        }
        _ => walk(String::new(), old, new, &mut changes),
    }
    changes.sort_by(|x, y| x.path.cmp(&y.path));
    changes
}

/// Diff two stored versions of the same scenario.
pub fn diff_versions(old: &ScenarioVersion, new: &ScenarioVersion) -> serde_json::Result<Vec<ChangeRecord>> {
    Ok(diff_documents(
        &old.spec.to_document()?,
        &new.spec.to_document()?,
    ))
}

fn diff_optional(path: String, old: Option<&Value>, new: Option<&Value>, out: &mut Vec<ChangeRecord>) {
    match (old, new) {
        (Some(a), Some(b)) => walk(path, a, b, out),
        (Some(a), None) => out.push(ChangeRecord {
            kind: ChangeKind::Removed,
            path,
            old: Some(a.clone()),
            new: None,
        }),
        (None, Some(b)) => out.push(ChangeRecord {
            kind: ChangeKind::Added,
            path,
            old: None,
            new: Some(b.clone()),
        }),
        (None, None) => {}
    }
}

fn join(path: &str, key: &str) -> String {
    if path.is_empty() {
        key.to_string()
    } else {
        format!("{path}.{key}")
    }
}

fn walk(path: String, old: &Value, new: &Value, out: &mut Vec<ChangeRecord>) {
    if old == new {
        return;
    }
    match (old, new) {
        (Value::Object(a), Value::Object(b)) => {
            let keys: BTreeSet<&String> = a.keys().chain(b.keys()).collect();
            for key in keys {
                diff_optional(join(&path, key), a.get(key), b.get(key), out);
            }
        }
        (Value::Array(a), Value::Array(b)) => {
            for i in 0..a.len().max(b.len()) {
                diff_optional(format!("{path}[{i}]"), a.get(i), b.get(i), out);
            }
        }
        _ => out.push(ChangeRecord {
            kind: ChangeKind::Modified,
            path,
            old: Some(old.clone()),
            new: Some(new.clone()),
        }),
    }
}

fn by_id(list: &[Value]) -> BTreeMap<String, &Value> {
    list.iter()
        .enumerate()
        .map(|(i, item)| {
            let id = item
                .get("id")
                .and_then(Value::as_str)
                .map(str::to_string)
                .unwrap_or_else(|| format!("#{i}"));
            (id, item)
        })
        .collect()
}

fn diff_keyed(field: &str, old: &[Value], new: &[Value], out: &mut Vec<ChangeRecord>) {
    let (a, b) = (by_id(old), by_id(new));
    let ids: BTreeSet<&String> = a.keys().chain(b.keys()).collect();
    for id in ids {
        diff_optional(
            format!("{field}[{id}]"),
            a.get(id).copied(),
            b.get(id).copied(),
            out,
        );
    }
}

fn short(value: &Value) -> String {
    let text = match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    };
    if text.chars().count() > 80 {
        format!("{}...", text.chars().take(77).collect::<String>())
    } else {
        text
    }
}

/// Human-readable change list.
pub fn render_diff_text(changes: &[ChangeRecord]) -> String {
    if changes.is_empty() {
        return "No differences between the selected versions.".to_string();
    }
    let mut lines = vec!["Changes:".to_string()];
    for change in changes {
        let line = match (change.kind, &change.old, &change.new) {
            (ChangeKind::Added, _, Some(new)) => format!("+ {}: {}", change.path, short(new)),
            (ChangeKind::Removed, Some(old), _) => format!("- {}: {}", change.path, short(old)),
            (_, Some(old), Some(new)) => {
                format!("~ {}: {} -> {}", change.path, short(old), short(new))
            }
            _ => format!("~ {}", change.path),
        };
        lines.push(line);
    }
    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::starter::starter_document;
    use serde_json::json;

    #[test]
    fn identical_documents_have_no_changes() {
        let doc = starter_document("onboarding");
        assert!(diff_documents(&doc, &doc).is_empty());
    }

    #[test]
    fn version_field_is_ignored() {
        let a = starter_document("onboarding");
        let mut b = a.clone();
        b["version"] = json!(7);
        assert!(diff_documents(&a, &b).is_empty());
    }

    #[test]
    fn reordering_rubric_is_not_a_change() {
        let a = starter_document("onboarding");
        let mut b = a.clone();
        b["rubric"].as_array_mut().unwrap().reverse();
        assert!(diff_documents(&a, &b).is_empty());
    }

    #[test]
    fn rubric_changes_are_keyed_by_id() {
        let a = starter_document("onboarding");
        let mut b = a.clone();
        b["rubric"][0]["weight"] = json!(3);
        b["rubric"].as_array_mut().unwrap().push(json!({
            "id": "tone", "description": "Keeps a friendly tone", "weight": 1,
            "type": "binary", "phase": "summative"
        }));

        let changes = diff_documents(&a, &b);
        let paths: Vec<&str> = changes.iter().map(|c| c.path.as_str()).collect();
        assert_eq!(paths, vec!["rubric[guidance].weight", "rubric[tone]"]);
        assert_eq!(changes[0].kind, ChangeKind::Modified);
        assert_eq!(changes[1].kind, ChangeKind::Added);
    }

    #[test]
    fn changes_are_sorted_by_path() {
        let a = starter_document("onboarding");
        let mut b = a.clone();
        b["templates"]["tester"] = json!("{history}");
        b["max_turns"] = json!(8);
        b["description"] = json!("Changed");
        b["personas"]["trainee"].as_object_mut().unwrap().remove("tone");

        let changes = diff_documents(&a, &b);
        let paths: Vec<&str> = changes.iter().map(|c| c.path.as_str()).collect();
        assert_eq!(
            paths,
            vec![
                "description",
                "max_turns",
                "personas.trainee.tone",
                "templates.tester"
            ]
        );
        assert_eq!(changes[2].kind, ChangeKind::Removed);
    }

    #[test]
    fn positional_arrays_report_index() {
        let a = json!({"didactics": {"must_rules": ["a", "b"]}});
        let b = json!({"didactics": {"must_rules": ["a", "c", "d"]}});
        let changes = diff_documents(&a, &b);
        let paths: Vec<&str> = changes.iter().map(|c| c.path.as_str()).collect();
        assert_eq!(paths, vec!["didactics.must_rules[1]", "didactics.must_rules[2]"]);
    }

    #[test]
    fn renders_text() {
        assert_eq!(
            render_diff_text(&[]),
            "No differences between the selected versions."
        );
        let text = render_diff_text(&[ChangeRecord {
            kind: ChangeKind::Modified,
            path: "max_turns".into(),
            old: Some(json!(6)),
            new: Some(json!(8)),
        }]);
        assert_eq!(text, "Changes:\n~ max_turns: 6 -> 8");
    }
}
