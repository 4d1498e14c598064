//! Session Summary
//!
//! Final answers may carry a structured note about the session. It is pulled
//! out of the visible text, merged with the note persisted by earlier runs
//! and written back, so long conversations stay bounded across runs.
//!
//! Two embeddings are recognized:
//!
//! ```text
//! answer text
//! <!--SUMMARY_START-->{"confirmed_needs": ["..."]}<!--SUMMARY_END-->
//! ```
//!
//! or a trailing fenced JSON block whose keys look like a summary:
//!
//! ```text
//! answer text
//! ---
//! **Summary**
//! ```json
//! {"core_discussion": "...", "confirmed_needs": ["..."]}
//! ```
//! ```

use serde_json::{Map, Value};
use std::collections::HashSet;

pub const SUMMARY_START: &str = "<!--SUMMARY_START-->";
pub const SUMMARY_END: &str = "<!--SUMMARY_END-->";

/// Top-level keys that identify a fenced block as a summary
pub const SUMMARY_KEYS: [&str; 4] = [
    "core_discussion",
    "discussion_log",
    "confirmed_needs",
    "current_conclusion",
];

/// Log-style field merged by `topic`
const LOG_FIELD: &str = "discussion_log";
const LOG_KEY: &str = "topic";

/// Result of [`extract`]
#[derive(Clone, Debug, PartialEq)]
pub struct Extraction {
    /// Text to show the user
    pub text: String,
    /// The embedded summary, when one was found and parsed
    pub summary: Option<Value>,
}

impl Extraction {
    fn passthrough(text: &str) -> Self {
        Self {
            text: text.to_string(),
            summary: None,
        }
    }
}

/// Split an answer into visible text and embedded summary
pub fn extract(text: &str) -> Extraction {
    if let Some(extraction) = extract_delimited(text) {
        return extraction;
    }
    extract_trailing_block(text).unwrap_or_else(|| Extraction::passthrough(text))
}

fn extract_delimited(text: &str) -> Option<Extraction> {
    let start = text.find(SUMMARY_START)?;
    let end = start + text[start..].find(SUMMARY_END)?;
    let raw = text[start + SUMMARY_START.len()..end].trim();

    let summary = match serde_json::from_str::<Value>(strip_fence(raw)) {
        Ok(value) if value.is_object() => value,
        Ok(_) | Err(_) => {
            tracing::warn!("summary block is not a JSON object; keeping text as-is");
            return Some(Extraction::passthrough(text));
        }
    };

    let before = text[..start].trim_end();
    let after = text[end + SUMMARY_END.len()..].trim();
    let cleaned = if after.is_empty() {
        before.to_string()
    } else if before.is_empty() {
        after.to_string()
    } else {
        format!("{}\n\n{}", before, after)
    };

    Some(Extraction {
        text: cleaned,
        summary: Some(summary),
    })
}

/// Models sometimes wrap the delimited JSON in a fence as well
fn strip_fence(raw: &str) -> &str {
    let Some(inner) = raw.strip_prefix("```") else {
        return raw;
    };
    let inner = inner.strip_prefix("json").unwrap_or(inner);
    inner.strip_suffix("```").unwrap_or(inner).trim()
}

fn extract_trailing_block(text: &str) -> Option<Extraction> {
    let trimmed = text.trim_end();
    let body_end = trimmed.len().checked_sub(3)?;
    if !trimmed.ends_with("```") {
        return None;
    }
    let open = trimmed[..body_end].rfind("```")?;

    let inner = &trimmed[open + 3..body_end];
    let inner = inner.strip_prefix("json").unwrap_or(inner).trim();
    if !(inner.starts_with('{') && inner.ends_with('}')) {
        return None;
    }

    let map: Map<String, Value> = serde_json::from_str(inner).ok()?;
    if !is_summary(&map) {
        return None;
    }

    let prefix = strip_label(trimmed[..open].trim_end());
    Some(Extraction {
        text: prefix.to_string(),
        summary: Some(Value::Object(map)),
    })
}

/// Heuristic: at least two recognized summary keys at the top level
pub fn is_summary(map: &Map<String, Value>) -> bool {
    SUMMARY_KEYS.iter().filter(|k| map.contains_key(**k)).count() >= 2
}

/// Drop an optional "Summary" label line and `---` separator preceding the block
fn strip_label(prefix: &str) -> &str {
    let mut rest = prefix;

    let (head, last_line) = match rest.rfind('\n') {
        Some(idx) => (&rest[..idx], &rest[idx + 1..]),
        None => ("", rest),
    };
    let label = last_line
        .trim()
        .trim_matches(|c| c == '*' || c == '#' || c == ':')
        .trim();
    if label.len() <= 80 && label.to_lowercase().contains("summary") {
        rest = head.trim_end();
    }

    if let Some(stripped) = rest.strip_suffix("---") {
        rest = stripped.trim_end();
    }
    rest
}

/// Merge a freshly extracted summary into the previously persisted one.
///
/// List fields are unioned newest-first with exact de-duplication,
/// `discussion_log` records are de-duplicated by `topic` (newest wins),
/// every other field takes the new value, and fields only present in the
/// previous summary are kept.
pub fn merge(previous: Option<&Value>, latest: &Value) -> Value {
    let (Some(Value::Object(old)), Value::Object(new)) = (previous, latest) else {
        return latest.clone();
    };

    let mut merged = old.clone();
    for (key, new_value) in new {
        let value = match (old.get(key), new_value) {
            (Some(Value::Array(old_items)), Value::Array(new_items)) if key == LOG_FIELD => {
                Value::Array(union_by(new_items, old_items, log_identity))
            }
            (Some(Value::Array(old_items)), Value::Array(new_items)) => {
                Value::Array(union_by(new_items, old_items, item_identity))
            }
            _ => dedup_value(key, new_value),
        };
        merged.insert(key.clone(), value);
    }
    Value::Object(merged)
}

fn dedup_value(key: &str, value: &Value) -> Value {
    match value {
        Value::Array(items) if key == LOG_FIELD => Value::Array(union_by(items, &[], log_identity)),
        Value::Array(items) => Value::Array(union_by(items, &[], item_identity)),
        other => other.clone(),
    }
}

fn union_by(newer: &[Value], older: &[Value], identity: fn(&Value) -> String) -> Vec<Value> {
    let mut seen = HashSet::new();
    newer
        .iter()
        .chain(older.iter())
        .filter(|item| seen.insert(identity(item)))
        .cloned()
        .collect()
}

fn item_identity(item: &Value) -> String {
    match item {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn log_identity(record: &Value) -> String {
    match record.get(LOG_KEY).and_then(Value::as_str) {
        Some(topic) => format!("topic:{}", topic),
        None => record.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_delimited_summary_is_removed() {
        let text = format!(
            "Here is the answer.\n{}{{\"confirmed_needs\":[\"x\"]}}{}",
            SUMMARY_START, SUMMARY_END
        );
        let extraction = extract(&text);
        assert_eq!(extraction.text, "Here is the answer.");
        assert_eq!(extraction.summary, Some(json!({"confirmed_needs": ["x"]})));
    }

    #[test]
    fn test_text_after_delimiters_is_kept() {
        let text = format!("Intro{}{{\"a\":1}}{}\nOutro", SUMMARY_START, SUMMARY_END);
        let extraction = extract(&text);
        assert_eq!(extraction.text, "Intro\n\nOutro");
    }

    #[test]
    fn test_malformed_delimited_summary_passes_through() {
        let text = format!("Answer{}{{not json{}", SUMMARY_START, SUMMARY_END);
        let extraction = extract(&text);
        assert_eq!(extraction.text, text);
        assert!(extraction.summary.is_none());
    }

    #[test]
    fn test_trailing_fenced_summary() {
        let text = "The build is fixed.\n\n---\n**Session Summary**\n```json\n{\"core_discussion\": \"ci\", \"confirmed_needs\": [\"green build\"]}\n```\n";
        let extraction = extract(text);
        assert_eq!(extraction.text, "The build is fixed.");
        assert_eq!(
            extraction.summary,
            Some(json!({"core_discussion": "ci", "confirmed_needs": ["green build"]}))
        );
    }

    #[test]
    fn test_trailing_example_code_is_not_a_summary() {
        let text = "Use this config:\n```json\n{\"confirmed_needs\": [\"x\"], \"port\": 8080}\n```";
        let extraction = extract(text);
        assert_eq!(extraction.text, text);
        assert!(extraction.summary.is_none());
    }

    #[test]
    fn test_plain_text_untouched() {
        let extraction = extract("just an answer");
        assert_eq!(extraction.text, "just an answer");
        assert!(extraction.summary.is_none());
    }

    #[test]
    fn test_merge_lists_newest_first() {
        let previous = json!({"confirmed_needs": ["a"]});
        let latest = json!({"confirmed_needs": ["b"]});
        assert_eq!(
            merge(Some(&previous), &latest),
            json!({"confirmed_needs": ["b", "a"]})
        );

        let again = json!({"confirmed_needs": ["a", "c"]});
        assert_eq!(
            merge(Some(&json!({"confirmed_needs": ["b", "a"]})), &again),
            json!({"confirmed_needs": ["a", "c", "b"]})
        );
    }

    #[test]
    fn test_merge_log_by_topic() {
        let previous = json!({
            "discussion_log": [
                {"topic": "db", "conclusion": "postgres"},
                {"topic": "auth", "conclusion": "oauth"}
            ],
            "current_conclusion": "old",
            "core_discussion": "stack"
        });
        let latest = json!({
            "discussion_log": [{"topic": "db", "conclusion": "sqlite"}],
            "current_conclusion": "new"
        });

        let merged = merge(Some(&previous), &latest);
        assert_eq!(
            merged["discussion_log"],
            json!([
                {"topic": "db", "conclusion": "sqlite"},
                {"topic": "auth", "conclusion": "oauth"}
            ])
        );
        assert_eq!(merged["current_conclusion"], "new");
        assert_eq!(merged["core_discussion"], "stack");
    }

    #[test]
    fn test_merge_is_idempotent() {
        let summary = json!({
            "confirmed_needs": ["a", "b"],
            "discussion_log": [{"topic": "t", "conclusion": "c"}],
            "current_conclusion": "done"
        });
        assert_eq!(merge(Some(&summary), &summary), summary);
    }

    #[test]
    fn test_merge_without_previous() {
        let latest = json!({"confirmed_needs": ["x"]});
        assert_eq!(merge(None, &latest), latest);
    }
}
