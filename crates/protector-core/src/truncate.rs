//! Table-driven truncation policy.
//!
//! A policy is a list of rules, each a dot-separated path pattern (`*`
//! matches every member at that level) plus an operation. Applying a policy
//! is a pure, strict-subset transformation: fields are only ever removed,
//! never added or renamed, and applying the same policy twice yields the
//! same document.

use serde_json::{Map, Value};
use std::collections::HashSet;

#[derive(Debug, Clone)]
pub enum TruncateOp {
    /// Arrays: retain only the last `n` elements.
    KeepLast(usize),
    /// Maps with numeric values: retain the `n` entries with the largest
    /// values.
    KeepTopByValue(usize),
    /// Maps of groupings: retain at most `k` entries, preferring the most
    /// recently touched (latest trailing `history` timestamp).
    KeepAtMost(usize),
    /// Remove the field entirely.
    Drop,
}

#[derive(Debug, Clone)]
pub struct TruncateRule {
    pub path: String,
    pub op: TruncateOp,
}

impl TruncateRule {
    pub fn new(path: impl Into<String>, op: TruncateOp) -> Self {
        Self {
            path: path.into(),
            op,
        }
    }
}

#[derive(Debug, Clone)]
pub struct TruncationPolicy {
    rules: Vec<TruncateRule>,
}

impl TruncationPolicy {
    pub fn new(rules: Vec<TruncateRule>) -> Self {
        Self { rules }
    }

    /// The stock rule set for the protected document: bound growth-prone
    /// lists, drop derived caches, cap the project map.
    pub fn default_rules() -> Self {
        use TruncateOp::*;
        Self::new(vec![
            TruncateRule::new("projects", KeepAtMost(20)),
            TruncateRule::new("projects.*.history", KeepLast(10)),
            TruncateRule::new("projects.*.cache", Drop),
            TruncateRule::new("projects.*.analysis", Drop),
            TruncateRule::new("projects.*.ast", Drop),
            TruncateRule::new("tipsHistory", KeepTopByValue(20)),
            TruncateRule::new("testData", Drop),
            TruncateRule::new("debug", Drop),
            TruncateRule::new("temp", Drop),
            TruncateRule::new("sessions", KeepLast(10)),
        ])
    }

    pub fn rules(&self) -> &[TruncateRule] {
        &self.rules
    }

    /// Produce the reduced document. Pure; the input is untouched.
    pub fn apply(&self, doc: &Value) -> Value {
        let mut reduced = doc.clone();
        for rule in &self.rules {
            let segments: Vec<&str> = rule.path.split('.').collect();
            apply_rule(&mut reduced, &segments, &rule.op);
        }
        reduced
    }
}

fn apply_rule(value: &mut Value, segments: &[&str], op: &TruncateOp) {
    if segments.is_empty() {
        return;
    }
    if segments.len() == 1 {
        apply_op(value, segments[0], op);
        return;
    }
    let (head, tail) = (segments[0], &segments[1..]);
    if head == "*" {
        match value {
            Value::Object(map) => {
                for child in map.values_mut() {
                    apply_rule(child, tail, op);
                }
            }
            Value::Array(items) => {
                for child in items.iter_mut() {
                    apply_rule(child, tail, op);
                }
            }
            _ => {}
        }
    } else if let Value::Object(map) = value {
        if let Some(child) = map.get_mut(head) {
            apply_rule(child, tail, op);
        }
    }
}

fn apply_op(parent: &mut Value, field: &str, op: &TruncateOp) {
    let Value::Object(map) = parent else {
        return;
    };
    match op {
        TruncateOp::Drop => {
            map.remove(field);
        }
        TruncateOp::KeepLast(n) => {
            if let Some(Value::Array(items)) = map.get_mut(field) {
                if items.len() > *n {
                    *items = items.split_off(items.len() - n);
                }
            }
        }
        TruncateOp::KeepTopByValue(n) => {
            if let Some(Value::Object(entries)) = map.get_mut(field) {
                if entries.len() > *n {
                    let mut ranked: Vec<(f64, String)> = entries
                        .iter()
                        .map(|(key, v)| (v.as_f64().unwrap_or(f64::NEG_INFINITY), key.clone()))
                        .collect();
                    ranked.sort_by(|a, b| b.0.total_cmp(&a.0).then_with(|| a.1.cmp(&b.1)));
                    let keep: HashSet<String> =
                        ranked.into_iter().take(*n).map(|(_, key)| key).collect();
                    retain_keys(entries, &keep);
                }
            }
        }
        TruncateOp::KeepAtMost(k) => {
            if let Some(Value::Object(groups)) = map.get_mut(field) {
                if groups.len() > *k {
                    let mut ranked: Vec<(String, String)> = groups
                        .iter()
                        .map(|(key, v)| (recency_key(v), key.clone()))
                        .collect();
                    ranked.sort_by(|a, b| b.0.cmp(&a.0).then_with(|| a.1.cmp(&b.1)));
                    let keep: HashSet<String> =
                        ranked.into_iter().take(*k).map(|(_, key)| key).collect();
                    retain_keys(groups, &keep);
                }
            }
        }
    }
}

fn retain_keys(map: &mut Map<String, Value>, keep: &HashSet<String>) {
    *map = std::mem::take(map)
        .into_iter()
        .filter(|(key, _)| keep.contains(key))
        .collect();
}

/// Recency of a grouping: the timestamp of its trailing history entry.
/// The trailing entry survives `KeepLast`, so ranking is stable across
/// repeated applications.
fn recency_key(grouping: &Value) -> String {
    grouping
        .get("history")
        .and_then(Value::as_array)
        .and_then(|h| h.last())
        .and_then(|entry| entry.get("timestamp"))
        .and_then(Value::as_str)
        .unwrap_or("")
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_doc() -> Value {
        json!({
            "numStartups": 42,
            "userID": "abc123",
            "projects": {
                "/home/a/one": {
                    "allowedTools": ["Bash"],
                    "history": (0..50).map(|i| json!({
                        "display": format!("command {i}"),
                        "timestamp": format!("2026-01-01T00:00:{:02}Z", i % 60)
                    })).collect::<Vec<_>>(),
                    "cache": {"huge": "blob"},
                    "analysis": [1, 2, 3],
                    "ast": {"nodes": []}
                },
                "/home/a/two": {
                    "history": ["plain string entry"]
                }
            },
            "tipsHistory": {
                "tip-a": 1, "tip-b": 9, "tip-c": 5, "tip-d": 3
            },
            "testData": {"x": 1},
            "debug": true,
            "sessions": (0..25).map(|i| json!({"id": i})).collect::<Vec<_>>()
        })
    }

    /// Every key/element of `after` must already exist in `before`.
    fn assert_subset(after: &Value, before: &Value, path: &str) {
        match (after, before) {
            (Value::Object(a), Value::Object(b)) => {
                for (key, sub) in a {
                    let orig = b
                        .get(key)
                        .unwrap_or_else(|| panic!("invented field {path}.{key}"));
                    assert_subset(sub, orig, &format!("{path}.{key}"));
                }
            }
            (Value::Array(a), Value::Array(b)) => {
                assert!(a.len() <= b.len(), "list grew at {path}");
                for item in a {
                    assert!(b.contains(item), "invented element at {path}");
                }
            }
            (a, b) => assert_eq!(a, b, "value changed at {path}"),
        }
    }

    #[test]
    fn keeps_last_n_history_entries() {
        let policy = TruncationPolicy::default_rules();
        let reduced = policy.apply(&sample_doc());
        let history = &reduced["projects"]["/home/a/one"]["history"];
        assert_eq!(history.as_array().unwrap().len(), 10);
        // the trailing entry survives
        assert_eq!(history[9]["display"], "command 49");
    }

    #[test]
    fn drops_cache_like_subobjects() {
        let policy = TruncationPolicy::default_rules();
        let reduced = policy.apply(&sample_doc());
        let project = &reduced["projects"]["/home/a/one"];
        assert!(project.get("cache").is_none());
        assert!(project.get("analysis").is_none());
        assert!(project.get("ast").is_none());
        // unrelated fields untouched
        assert_eq!(project["allowedTools"], json!(["Bash"]));
    }

    #[test]
    fn keeps_top_tips_by_value() {
        let policy = TruncationPolicy::new(vec![TruncateRule::new(
            "tipsHistory",
            TruncateOp::KeepTopByValue(2),
        )]);
        let reduced = policy.apply(&sample_doc());
        let tips = reduced["tipsHistory"].as_object().unwrap();
        assert_eq!(tips.len(), 2);
        assert!(tips.contains_key("tip-b"));
        assert!(tips.contains_key("tip-c"));
    }

    #[test]
    fn caps_groupings_preferring_recent() {
        let doc = json!({
            "projects": {
                "old": {"history": [{"timestamp": "2020-01-01T00:00:00Z"}]},
                "mid": {"history": [{"timestamp": "2024-06-01T00:00:00Z"}]},
                "new": {"history": [{"timestamp": "2026-02-01T00:00:00Z"}]}
            }
        });
        let policy = TruncationPolicy::new(vec![TruncateRule::new(
            "projects",
            TruncateOp::KeepAtMost(2),
        )]);
        let reduced = policy.apply(&doc);
        let projects = reduced["projects"].as_object().unwrap();
        assert_eq!(projects.len(), 2);
        assert!(projects.contains_key("new"));
        assert!(projects.contains_key("mid"));
        assert!(!projects.contains_key("old"));
    }

    #[test]
    fn idempotent() {
        let policy = TruncationPolicy::default_rules();
        let once = policy.apply(&sample_doc());
        let twice = policy.apply(&once);
        assert_eq!(once, twice);
    }

    #[test]
    fn strict_subset_of_input() {
        let doc = sample_doc();
        let policy = TruncationPolicy::default_rules();
        let reduced = policy.apply(&doc);
        assert_subset(&reduced, &doc, "$");
    }

    #[test]
    fn input_is_untouched() {
        let doc = sample_doc();
        let before = doc.clone();
        TruncationPolicy::default_rules().apply(&doc);
        assert_eq!(doc, before);
    }

    #[test]
    fn document_without_matching_fields_is_unchanged() {
        let doc = json!({"numStartups": 1, "installMethod": "npm"});
        let reduced = TruncationPolicy::default_rules().apply(&doc);
        assert_eq!(reduced, doc);
    }

    #[test]
    fn rules_tolerate_wrong_shapes() {
        // fields with unexpected types are left alone rather than mangled
        let doc = json!({
            "projects": "not an object",
            "sessions": {"not": "an array"},
            "tipsHistory": [1, 2, 3]
        });
        let reduced = TruncationPolicy::default_rules().apply(&doc);
        assert_eq!(reduced, doc);
    }
}
