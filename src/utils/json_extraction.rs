//! JSON extraction utilities for parsing judge responses.
//!
//! Judges are asked for a bare JSON object, but LLMs routinely wrap it in a
//! markdown fence or surround it with commentary. Extraction tries, in order:
//! 1. A ```json fenced block
//! 2. A generic fenced block
//! 3. The first balanced `{...}` object in the content
//!
//! Only objects are extracted; every judge response is an object.

use std::sync::LazyLock;

use regex::Regex;

static JSON_FENCE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"```json\s*\n?([\s\S]*?)\n?```").expect("Invalid fence regex"));

static GENERIC_FENCE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"```(?:\w+)?\s*\n?([\s\S]*?)\n?```").expect("Invalid generic fence regex")
});

/// Result of a JSON extraction attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum JsonExtractionResult {
    /// Successfully extracted a JSON object that parses.
    Success(String),
    /// An object was opened but never closed.
    Truncated { unclosed_braces: usize },
    /// No JSON-like content found.
    NotFound,
}

impl JsonExtractionResult {
    /// Returns true if JSON was successfully extracted.
    pub fn is_success(&self) -> bool {
        matches!(self, JsonExtractionResult::Success(_))
    }
}

/// Extract the JSON object from an LLM response.
pub fn try_extract_json_object(content: &str) -> JsonExtractionResult {
    let trimmed = content.trim();

    if let Some(caps) = JSON_FENCE_RE.captures(trimmed) {
        if let Some(json) = caps.get(1).and_then(|m| balanced_object(m.as_str())) {
            if parses(&json) {
                return JsonExtractionResult::Success(json);
            }
        }
    }

    if let Some(caps) = GENERIC_FENCE_RE.captures(trimmed) {
        if let Some(json) = caps.get(1).and_then(|m| balanced_object(m.as_str())) {
            if parses(&json) {
                return JsonExtractionResult::Success(json);
            }
        }
    }

    let mut search_from = 0;
    while let Some(offset) = trimmed[search_from..].find('{') {
        let start = search_from + offset;
        match find_matching_brace(&trimmed[start..]) {
            Some(end) => {
                let candidate = &trimmed[start..=start + end];
                if parses(candidate) {
                    return JsonExtractionResult::Success(candidate.to_string());
                }
                search_from = start + 1;
            }
            None => {
                return JsonExtractionResult::Truncated {
                    unclosed_braces: unclosed_braces(&trimmed[start..]),
                };
            }
        }
    }

    JsonExtractionResult::NotFound
}

/// Index of the `}` closing the object that starts at the first `{` of `s`.
///
/// Braces inside string literals are ignored.
pub fn find_matching_brace(s: &str) -> Option<usize> {
    let mut depth = 0;
    let mut in_string = false;
    let mut escape_next = false;

    for (i, c) in s.char_indices() {
        if escape_next {
            escape_next = false;
            continue;
        }

        match c {
            '\\' if in_string => {
                escape_next = true;
            }
            '"' => {
                in_string = !in_string;
            }
            '{' if !in_string => {
                depth += 1;
            }
            '}' if !in_string => {
                depth -= 1;
                if depth == 0 {
                    return Some(i);
                }
            }
            _ => {}
        }
    }

    None
}

fn balanced_object(block: &str) -> Option<String> {
    let block = block.trim();
    let start = block.find('{')?;
    let end = find_matching_brace(&block[start..])?;
    Some(block[start..=start + end].to_string())
}

fn unclosed_braces(s: &str) -> usize {
    let mut depth: isize = 0;
    let mut in_string = false;
    let mut escape_next = false;
    for c in s.chars() {
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

fn parses(candidate: &str) -> bool {
    serde_json::from_str::<serde_json::Value>(candidate)
        .map(|v| v.is_object())
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_json_code_block() {
        let result = try_extract_json_object("```json\n{\"key\": \"value\"}\n```");
        assert_eq!(
            result,
            JsonExtractionResult::Success("{\"key\": \"value\"}".to_string())
        );
    }

    #[test]
    fn test_generic_code_block() {
        let result = try_extract_json_object("Here:\n```\n{\"a\": 1}\n```\nDone.");
        assert_eq!(result, JsonExtractionResult::Success("{\"a\": 1}".to_string()));
    }

    #[test]
    fn test_embedded_object() {
        let result = try_extract_json_object("My verdict is {\"a\": {\"b\": \"}\"}} as shown.");
        assert_eq!(
            result,
            JsonExtractionResult::Success("{\"a\": {\"b\": \"}\"}}".to_string())
        );
    }

    #[test]
    fn test_skips_non_json_braces() {
        let result = try_extract_json_object("Use {braces} wisely. {\"x\": 2}");
        assert_eq!(result, JsonExtractionResult::Success("{\"x\": 2}".to_string()));
    }

    #[test]
    fn test_truncated() {
        let result = try_extract_json_object("{\"a\": {\"b\": 1");
        assert_eq!(result, JsonExtractionResult::Truncated { unclosed_braces: 2 });
        assert!(!result.is_success());
    }

    #[test]
    fn test_not_found() {
        assert_eq!(
            try_extract_json_object("no json here"),
            JsonExtractionResult::NotFound
        );
    }

    #[test]
    fn test_find_matching_brace() {
        assert_eq!(find_matching_brace("{\"a\": \"{\"}"), Some(9));
        assert_eq!(find_matching_brace("{"), None);
    }
}
