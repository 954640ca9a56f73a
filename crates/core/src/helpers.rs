//! Helper functions for text processing and serialization.

use std::collections::BTreeMap;

use serde_json::Value;

/// Clean text by normalizing line endings and trimming trailing whitespace.
pub fn clean_text(text: &str) -> String {
    text.replace("\r\n", "\n")
        .replace('\r', "\n")
        .trim_end()
        .to_string()
}

/// Create a fenced code block with optional language tag.
pub fn fenced_block(language: Option<&str>, content: &str) -> String {
    let lang = language.unwrap_or("").to_lowercase();
    format!("```{}\n{}\n```", lang, content)
}

/// Strip role-marker characters (`*`, `#`) and surrounding whitespace from a
/// matched header template, leaving the bare role name.
pub fn strip_header_markers(header: &str) -> String {
    header
        .chars()
        .filter(|&c| c != '*' && c != '#')
        .collect::<String>()
        .trim()
        .to_string()
}

/// Depth-first flatten of a nested JSON object into a single-level mapping.
///
/// Nested keys are joined with `.`; leaf values keep their string form
/// (strings unquoted, everything else in JSON notation).
pub fn flatten_json(value: &Value) -> BTreeMap<String, String> {
    let mut flat = BTreeMap::new();
    flatten_into(value, "", &mut flat);
    flat
}

fn flatten_into(value: &Value, prefix: &str, flat: &mut BTreeMap<String, String>) {
    match value {
        Value::Object(map) => {
            for (key, child) in map {
                let path = if prefix.is_empty() {
                    key.clone()
                } else {
                    format!("{}.{}", prefix, key)
                };
                flatten_into(child, &path, flat);
            }
        }
        Value::String(s) => {
            flat.insert(prefix.to_string(), s.clone());
        }
        other => {
            flat.insert(prefix.to_string(), other.to_string());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clean_text() {
        assert_eq!(clean_text("hello\r\nworld\r"), "hello\nworld");
        assert_eq!(clean_text("test  \n  "), "test");
        assert_eq!(clean_text("test\n"), "test");
        assert_eq!(clean_text("test  "), "test");
    }

    #[test]
    fn test_fenced_block() {
        assert_eq!(
            fenced_block(Some("python"), "print(1)"),
            "```python\nprint(1)\n```"
        );
        assert_eq!(fenced_block(None, "code"), "```\ncode\n```");
        // Language tags are normalized to lowercase.
        assert_eq!(fenced_block(Some("SQL"), "SELECT 1"), "```sql\nSELECT 1\n```");
    }

    #[test]
    fn test_strip_header_markers() {
        assert_eq!(strip_header_markers("**User**"), "User");
        assert_eq!(strip_header_markers("# Assistant"), "Assistant");
        assert_eq!(strip_header_markers("  **Assistant**  "), "Assistant");
    }

    #[test]
    fn test_flatten_json_nested() {
        let value: Value = serde_json::from_str(
            r#"{"project": {"action": "Debug", "depth": 2}, "topic": "Loops"}"#,
        )
        .unwrap();
        let flat = flatten_json(&value);
        assert_eq!(flat.get("project.action").map(String::as_str), Some("Debug"));
        assert_eq!(flat.get("project.depth").map(String::as_str), Some("2"));
        assert_eq!(flat.get("topic").map(String::as_str), Some("Loops"));
    }

    #[test]
    fn test_flatten_json_flat_object_is_identity() {
        let value: Value = serde_json::from_str(r#"{"a": "1", "b": "2"}"#).unwrap();
        let flat = flatten_json(&value);
        assert_eq!(flat.len(), 2);
        assert_eq!(flat.get("a").map(String::as_str), Some("1"));
    }
}
