//! Metadata extraction from a notebook's head cell.
//!
//! The primary path is a fixed table of patterns; head cells using a
//! free-form layout are handed to the completion service, which flattens
//! their key/value pairs into a single-level JSON object.

use std::collections::BTreeMap;
use std::sync::LazyLock;

use regex::Regex;
use serde_json::Value;

use crate::helpers::flatten_json;
use crate::{CompletionRequest, CompletionService, METADATA_MAX_TOKENS};

const METADATA_SYSTEM_INSTRUCTION: &str = "IDENTITY:\nYou are an information processor.\n\n\
INSTRUCTION:\nWe have metadata strings that contain key/value pairs. We need to identify the \
key/value pairs within the metadata string and extract it as a JSON object.\n\nIf there can be \
nested key/value pairs, please provide the JSON object containing only the leaf key/value pairs \
flattened.";

/// Marker for free-form head cells that the fixed patterns cannot parse.
const FREEFORM_MARKER: &str = "Project / Action";

/// Sentinel stored for a pattern that was expected but did not match.
pub const UNKNOWN: &str = "Unknown";

/// Experience-level labels recognized inside an occupation value, probed in
/// order.
pub const EXPERIENCE_LEVELS: [&str; 5] = [
    "First Timer",
    "Beginner",
    "Intermediate",
    "Advanced",
    "Expert",
];

static METADATA_PATTERNS: LazyLock<[(&str, Regex); 5]> = LazyLock::new(|| {
    [
        (
            "occupation",
            Regex::new(r"\*\*Occupation Topics\*\* - ([\w\s-]+(?:\(.*?\))?[ \w-]*) > ([\w\s-]+?) - (.+)")
                .unwrap(),
        ),
        (
            "target_turns",
            Regex::new(r"\*\*Target Number of Turns \(User \+ Assistant\)\*\* - ([\d-]+)").unwrap(),
        ),
        ("use_case", Regex::new(r"\*\*Use Case\*\* - (.+)").unwrap()),
        (
            "technical_topic",
            Regex::new(r"\*\*Technical Topic\*\* - (.+)").unwrap(),
        ),
        (
            "personality",
            Regex::new(r"\*\*User Personality\*\* - (.+)").unwrap(),
        ),
    ]
});

/// Extract a flat key/value metadata record from the head cell text.
///
/// Pattern misses are stored as the `"Unknown"` sentinel rather than omitted.
/// Free-form layouts go through the completion-service fallback; if the
/// fallback cannot produce a mapping the result is empty.
pub fn extract_metadata<S>(head_source: &str, service: &S) -> BTreeMap<String, String>
where
    S: CompletionService,
{
    if head_source.contains(FREEFORM_MARKER) {
        return flatten_metadata_dynamically(head_source, service).unwrap_or_default();
    }

    let mut metadata = BTreeMap::new();
    for (key, pattern) in METADATA_PATTERNS.iter() {
        let value = pattern
            .captures(head_source)
            .and_then(|caps| caps.get(1))
            .map(|m| m.as_str().trim().to_string())
            .unwrap_or_else(|| UNKNOWN.to_string());
        metadata.insert((*key).to_string(), value);
    }

    // Line-prefix fields from the older head-cell layout.
    for line in head_source.lines() {
        let Some((_, value)) = line.split_once(" - ") else {
            continue;
        };
        let value = value.trim().to_string();
        if line.contains("**Python Topics**") {
            metadata.insert("topic".to_string(), value);
        } else if line.contains("**Type**") {
            metadata.insert("type".to_string(), value);
        } else if line.contains("**Target Number of Turns (User + Assistant)**") {
            metadata.insert("target_turns".to_string(), value);
        }
    }

    let occupation = metadata
        .get("occupation")
        .cloned()
        .unwrap_or_else(|| UNKNOWN.to_string());
    let (experience_level, learning_topic) = split_experience(&occupation);
    metadata.insert("experience_level".to_string(), experience_level);
    metadata.insert("learning_topic".to_string(), learning_topic);

    metadata
}

/// Split an occupation value into experience level and learning topic.
fn split_experience(occupation: &str) -> (String, String) {
    for level in EXPERIENCE_LEVELS {
        if occupation.contains(level) {
            let topic = occupation
                .replacen(level, "", 1)
                .trim_matches([' ', '-'])
                .to_string();
            return (level.to_string(), topic);
        }
    }
    (UNKNOWN.to_string(), occupation.to_string())
}

/// Hand a free-form head cell to the completion service and flatten its
/// reply. Failures degrade to `None`; they never abort the notebook.
fn flatten_metadata_dynamically<S>(
    head_source: &str,
    service: &S,
) -> Option<BTreeMap<String, String>>
where
    S: CompletionService,
{
    let request = CompletionRequest {
        system_instruction: METADATA_SYSTEM_INSTRUCTION.to_string(),
        context: head_source.to_string(),
        max_tokens: METADATA_MAX_TOKENS,
        deterministic: true,
    };
    let reply = match service.complete(&request) {
        Ok(reply) => reply,
        Err(error) => {
            log::warn!("dynamic metadata extraction failed: {}", error);
            return None;
        }
    };

    match serde_json::from_str::<Value>(&reply) {
        Ok(value) if value.is_object() => Some(flatten_json(&value)),
        Ok(_) | Err(_) => {
            log::warn!("dynamic metadata reply was not a JSON object");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ServiceError;

    /// Completion service that always replies with the same text.
    struct FixedService(&'static str);

    impl CompletionService for FixedService {
        fn complete(&self, _request: &CompletionRequest) -> Result<String, ServiceError> {
            Ok(self.0.to_string())
        }
    }

    /// Completion service that always fails.
    struct FailingService;

    impl CompletionService for FailingService {
        fn complete(&self, _request: &CompletionRequest) -> Result<String, ServiceError> {
            Err(ServiceError("service unavailable".to_string()))
        }
    }

    #[test]
    fn test_single_pattern_with_unknown_sentinels() {
        let metadata = extract_metadata("**Use Case** - Learning", &FailingService);
        assert_eq!(metadata.get("use_case").map(String::as_str), Some("Learning"));
        assert_eq!(metadata.get("occupation").map(String::as_str), Some(UNKNOWN));
        assert_eq!(
            metadata.get("technical_topic").map(String::as_str),
            Some(UNKNOWN)
        );
        assert_eq!(metadata.get("personality").map(String::as_str), Some(UNKNOWN));
        assert_eq!(
            metadata.get("experience_level").map(String::as_str),
            Some(UNKNOWN)
        );
        assert_eq!(
            metadata.get("learning_topic").map(String::as_str),
            Some(UNKNOWN)
        );
    }

    #[test]
    fn test_occupation_splits_experience_level() {
        let head = "# Metadata\n\n\
            **Occupation Topics** - First Timer - Software Engineering > Machine Learning - Data Science\n\n\
            **Target Number of Turns (User + Assistant)** - 5-8\n";
        let metadata = extract_metadata(head, &FailingService);
        assert_eq!(
            metadata.get("occupation").map(String::as_str),
            Some("First Timer - Software Engineering")
        );
        assert_eq!(
            metadata.get("experience_level").map(String::as_str),
            Some("First Timer")
        );
        assert_eq!(
            metadata.get("learning_topic").map(String::as_str),
            Some("Software Engineering")
        );
        assert_eq!(metadata.get("target_turns").map(String::as_str), Some("5-8"));
    }

    #[test]
    fn test_legacy_line_fields() {
        let head = "# Metadata\n\n\
            **Python Topics** - Iterators > Generators\n\n\
            **Type** - Conversation\n\n\
            **Target Number of Turns (User + Assistant)** - 4\n";
        let metadata = extract_metadata(head, &FailingService);
        assert_eq!(
            metadata.get("topic").map(String::as_str),
            Some("Iterators > Generators")
        );
        assert_eq!(metadata.get("type").map(String::as_str), Some("Conversation"));
        assert_eq!(metadata.get("target_turns").map(String::as_str), Some("4"));
    }

    #[test]
    fn test_freeform_layout_uses_dynamic_fallback() {
        let head = "Project / Action\nsome free-form description";
        let service = FixedService(r#"{"project": {"action": "Debugging"}, "topic": "Loops"}"#);
        let metadata = extract_metadata(head, &service);
        assert_eq!(
            metadata.get("project.action").map(String::as_str),
            Some("Debugging")
        );
        assert_eq!(metadata.get("topic").map(String::as_str), Some("Loops"));
    }

    #[test]
    fn test_dynamic_fallback_failure_returns_empty() {
        let head = "Project / Action\nsome free-form description";
        let metadata = extract_metadata(head, &FailingService);
        assert!(metadata.is_empty());
    }

    #[test]
    fn test_dynamic_fallback_rejects_non_object_reply() {
        let head = "Project / Action\nsome free-form description";
        let metadata = extract_metadata(head, &FixedService("not json at all"));
        assert!(metadata.is_empty());
    }
}
