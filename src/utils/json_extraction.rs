//! JSON extraction from LLM responses.
//!
//! Model replies often wrap the JSON payload in markdown fences or surround it
//! with prose. The extraction tries, in order:
//! 1. The whole trimmed response
//! 2. A ```json fenced block
//! 3. Any fenced block containing an object
//! 4. The largest parseable object anywhere in the text, preferring later ones

use regex::Regex;
use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq)]
pub enum JsonExtractionError {
    #[error("JSON appears truncated: {unclosed_braces} unclosed braces")]
    Truncated { unclosed_braces: usize },

    #[error("No JSON object found in response. Content starts with: '{content_preview}'")]
    NotFound { content_preview: String },
}

/// Index of the `}` matching the `{` at the start of `s`.
///
/// Braces inside string literals are ignored, including escaped quotes.
pub fn find_matching_brace(s: &str) -> Option<usize> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escape_next = false;

    for (i, c) in s.char_indices() {
        if escape_next {
            escape_next = false;
            continue;
        }
        match c {
            '\\' if in_string => escape_next = true,
            '"' => in_string = !in_string,
            '{' if !in_string => depth += 1,
            '}' if !in_string => {
                depth = depth.checked_sub(1)?;
                if depth == 0 {
                    return Some(i);
                }
            }
            _ => {}
        }
    }
    None
}

fn is_valid_json(candidate: &str) -> bool {
    serde_json::from_str::<serde_json::Value>(candidate).is_ok()
}

fn object_in(block: &str) -> Option<String> {
    let start = block.find('{')?;
    let end = find_matching_brace(&block[start..])?;
    let candidate = &block[start..=start + end];
    is_valid_json(candidate).then(|| candidate.to_string())
}

fn from_json_fence(content: &str) -> Option<String> {
    let re = Regex::new(r"```json\s*\n?([\s\S]*?)\n?```").ok()?;
    let caps = re.captures(content)?;
    object_in(caps.get(1)?.as_str())
}

fn from_any_fence(content: &str) -> Option<String> {
    let re = Regex::new(r"```(?:\w+)?\s*\n?([\s\S]*?)\n?```").ok()?;
    let found = re
        .captures_iter(content)
        .filter_map(|caps| caps.get(1).and_then(|m| object_in(m.as_str())))
        .next();
    found
}

fn largest_object(content: &str) -> Option<String> {
    content
        .char_indices()
        .filter(|(_, c)| *c == '{')
        .filter_map(|(start, _)| {
            let substr = &content[start..];
            let end = find_matching_brace(substr)?;
            let candidate = &substr[..=end];
            is_valid_json(candidate).then(|| (start, candidate.to_string()))
        })
        .max_by(|(pos_a, a), (pos_b, b)| a.len().cmp(&b.len()).then(pos_a.cmp(pos_b)))
        .map(|(_, json)| json)
}

fn unclosed_braces(content: &str) -> usize {
    let mut depth = 0i64;
    let mut in_string = false;
    let mut escape_next = false;
    for c in content.chars() {
        if escape_next {
            escape_next = false;
            continue;
        }
        match c {
            '\\' if in_string => escape_next = true,
            '"' => in_string = !in_string,
            '{' if !in_string => depth += 1,
            '}' if !in_string => depth -= 1,
            _ => {}
        }
    }
    depth.max(0) as usize
}

/// Extracts a single JSON object from a model reply.
///
/// # Errors
///
/// Returns `Truncated` when an object starts but never closes, `NotFound`
/// otherwise.
pub fn extract_json_object(content: &str) -> Result<String, JsonExtractionError> {
    let trimmed = content.trim();
    if trimmed.starts_with('{') && is_valid_json(trimmed) {
        return Ok(trimmed.to_string());
    }

    if let Some(json) = from_json_fence(trimmed)
        .or_else(|| from_any_fence(trimmed))
        .or_else(|| largest_object(trimmed))
    {
        return Ok(json);
    }

    if let Some(start) = trimmed.find('{') {
        let unclosed = unclosed_braces(&trimmed[start..]);
        if unclosed > 0 {
            return Err(JsonExtractionError::Truncated {
                unclosed_braces: unclosed,
            });
        }
    }

    Err(JsonExtractionError::NotFound {
        content_preview: trimmed.chars().take(60).collect(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_direct_json() {
        let input = r#"{"key": "value"}"#;
        assert_eq!(extract_json_object(input).as_deref(), Ok(input));
    }

    #[test]
    fn test_json_code_block() {
        let input = "Here you go:\n```json\n{\"main_prompt\": \"a lake\"}\n```\nDone.";
        assert_eq!(
            extract_json_object(input).as_deref(),
            Ok("{\"main_prompt\": \"a lake\"}")
        );
    }

    #[test]
    fn test_generic_code_block() {
        let input = "```\n{\"a\": 1}\n```";
        assert_eq!(extract_json_object(input).as_deref(), Ok("{\"a\": 1}"));
    }

    #[test]
    fn test_prefers_largest_object() {
        let input = r#"I considered {"a": 1} but the answer is {"a": 1, "b": {"c": 2}}"#;
        assert_eq!(
            extract_json_object(input).as_deref(),
            Ok(r#"{"a": 1, "b": {"c": 2}}"#)
        );
    }

    #[test]
    fn test_braces_inside_strings() {
        let input = r#"{"text": "a } inside \" quoted"}"#;
        assert_eq!(find_matching_brace(input), Some(input.len() - 1));
    }

    #[test]
    fn test_truncated_and_missing() {
        assert_eq!(
            extract_json_object(r#"{"a": {"b": 1"#),
            Err(JsonExtractionError::Truncated { unclosed_braces: 2 })
        );
        assert!(matches!(
            extract_json_object("no json here"),
            Err(JsonExtractionError::NotFound { .. })
        ));
    }
}
