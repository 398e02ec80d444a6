//! Parsing of structured completion-service answers.
//!
//! Responses are untrusted: shape is validated by typed deserialization and
//! anything else is a `ServiceParseFailure`.

use crate::error::{ContextError, Result};
use indexmap::IndexMap;

/// Topic name to excerpts, in the order the service listed them
pub type TopicExcerpts = IndexMap<String, Vec<String>>;

/// Strip whitespace and a surrounding Markdown code fence, if any
pub fn strip_code_fence(raw: &str) -> &str {
    let trimmed = raw.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let Some(body) = rest.strip_suffix("```") else {
        return trimmed;
    };
    // Drop the info string (e.g. `json`) on the opening fence line
    match body.find('\n') {
        Some(newline) => body[newline + 1..].trim(),
        None => body.trim(),
    }
}

/// Parse a JSON array of topic names
pub fn parse_topic_list(raw: &str) -> Result<Vec<String>> {
    let body = strip_code_fence(raw);
    if body.is_empty() {
        return Err(ContextError::ServiceParseFailure("empty response".to_string()));
    }
    let topics: Vec<String> = serde_json::from_str(body)?;
    Ok(topics
        .into_iter()
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
        .collect())
}

/// Parse a JSON object mapping topic names to arrays of excerpts
pub fn parse_topic_excerpts(raw: &str) -> Result<TopicExcerpts> {
    let body = strip_code_fence(raw);
    if body.is_empty() {
        return Err(ContextError::ServiceParseFailure("empty response".to_string()));
    }
    let parsed: TopicExcerpts = serde_json::from_str(body)?;
    Ok(parsed
        .into_iter()
        .filter_map(|(topic, excerpts)| {
            let topic = topic.trim().to_string();
            (!topic.is_empty()).then_some((topic, excerpts))
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strip_code_fence() {
        assert_eq!(strip_code_fence("  [\"a\"] "), "[\"a\"]");
        assert_eq!(strip_code_fence("```json\n[\"a\"]\n```"), "[\"a\"]");
        assert_eq!(strip_code_fence("```\n{}\n```"), "{}");
        assert_eq!(strip_code_fence("```[1]```"), "[1]");
    }

    #[test]
    fn test_parse_topic_list() {
        let topics = parse_topic_list(r#"["shipping", " billing ", ""]"#).unwrap();
        assert_eq!(topics, vec!["shipping", "billing"]);
        assert!(parse_topic_list("[]").unwrap().is_empty());
    }

    #[test]
    fn test_topic_list_rejects_wrong_shape() {
        assert!(parse_topic_list(r#"{"a": 1}"#).is_err());
        assert!(parse_topic_list("[1, 2]").is_err());
        assert!(parse_topic_list("shipping").is_err());
        assert!(matches!(
            parse_topic_list(""),
            Err(ContextError::ServiceParseFailure(_))
        ));
    }

    #[test]
    fn test_parse_topic_excerpts_preserves_order() {
        let parsed = parse_topic_excerpts(
            "```json\n{\"weather\": [\"it rains\"], \"food\": [\"pasta\", \"pizza\"]}\n```",
        )
        .unwrap();
        let names: Vec<&str> = parsed.keys().map(String::as_str).collect();
        assert_eq!(names, vec!["weather", "food"]);
        assert_eq!(parsed["food"], vec!["pasta", "pizza"]);
    }

    #[test]
    fn test_topic_excerpts_rejects_wrong_shape() {
        assert!(parse_topic_excerpts(r#"{"food": "pasta"}"#).is_err());
        assert!(parse_topic_excerpts(r#"["food"]"#).is_err());
        assert!(parse_topic_excerpts("Sure! Here are the topics").is_err());
    }

    #[test]
    fn test_blank_topic_names_dropped() {
        let parsed = parse_topic_excerpts(r#"{" ": ["x"], "food": []}"#).unwrap();
        assert_eq!(parsed.len(), 1);
        assert!(parsed.contains_key("food"));
    }
}
