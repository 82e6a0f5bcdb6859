//! Strict parsing of judge responses.
//!
//! A response either yields a score for every requested dimension or it is a
//! [`JudgeParse::ParseFailure`]. Partial structures never reach the
//! arbitrator.

use std::collections::BTreeMap;

use serde_json::Value;

use super::types::DimensionScore;
use crate::utils::{try_extract_json_object, JsonExtractionResult};

/// Outcome of parsing one judge response.
#[derive(Debug, Clone, PartialEq)]
pub enum JudgeParse {
    Score(BTreeMap<String, DimensionScore>),
    ParseFailure { reason: String },
}

impl JudgeParse {
    fn failure(reason: impl Into<String>) -> Self {
        JudgeParse::ParseFailure {
            reason: reason.into(),
        }
    }
}

/// Parse `content` against the requested dimension names.
pub fn parse_judge_response(content: &str, dimensions: &[String]) -> JudgeParse {
    let json = match try_extract_json_object(content) {
        JsonExtractionResult::Success(json) => json,
        JsonExtractionResult::Truncated { unclosed_braces } => {
            return JudgeParse::failure(format!(
                "truncated JSON ({} unclosed braces)",
                unclosed_braces
            ))
        }
        JsonExtractionResult::NotFound => return JudgeParse::failure("no JSON object in response"),
    };

    let object = match serde_json::from_str::<Value>(&json) {
        Ok(Value::Object(map)) => map,
        Ok(_) => return JudgeParse::failure("response is not a JSON object"),
        Err(e) => return JudgeParse::failure(format!("invalid JSON: {}", e)),
    };

    let mut scores = BTreeMap::new();
    for name in dimensions {
        let entry = object.get(name.as_str()).or_else(|| {
            object
                .iter()
                .find(|(key, _)| key.eq_ignore_ascii_case(name))
                .map(|(_, value)| value)
        });
        let Some(entry) = entry else {
            return JudgeParse::failure(format!("missing dimension '{}'", name));
        };

        let (score, reason) = match entry {
            Value::Number(n) => (n.as_f64(), String::new()),
            Value::Object(fields) => (
                fields.get("score").and_then(Value::as_f64),
                fields
                    .get("reason")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
            ),
            _ => (None, String::new()),
        };

        let Some(score) = score else {
            return JudgeParse::failure(format!("dimension '{}' has no numeric score", name));
        };
        if !score.is_finite() || !(0.0..=10.0).contains(&score) {
            return JudgeParse::failure(format!(
                "dimension '{}' score {} outside [0, 10]",
                name, score
            ));
        }

        scores.insert(name.clone(), DimensionScore { score, reason });
    }

    JudgeParse::Score(scores)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dims() -> Vec<String> {
        vec!["features_complete".to_string(), "code_quality".to_string()]
    }

    #[test]
    fn test_parses_fenced_response() {
        let content = "Here is my evaluation:\n```json\n{\"features_complete\": {\"score\": 8, \"reason\": \"all there\"}, \"code_quality\": {\"score\": 6.5, \"reason\": \"ok\"}}\n```";
        match parse_judge_response(content, &dims()) {
            JudgeParse::Score(scores) => {
                assert_eq!(scores["features_complete"].score, 8.0);
                assert_eq!(scores["features_complete"].reason, "all there");
                assert_eq!(scores["code_quality"].score, 6.5);
            }
            other => panic!("expected score, got {:?}", other),
        }
    }

    #[test]
    fn test_bare_numbers_accepted() {
        let content = "{\"features_complete\": 7, \"CODE_QUALITY\": 4}";
        assert!(matches!(
            parse_judge_response(content, &dims()),
            JudgeParse::Score(_)
        ));
    }

    #[test]
    fn test_missing_dimension_fails() {
        let content = "{\"features_complete\": {\"score\": 7}}";
        assert_eq!(
            parse_judge_response(content, &dims()),
            JudgeParse::ParseFailure {
                reason: "missing dimension 'code_quality'".to_string()
            }
        );
    }

    #[test]
    fn test_out_of_range_fails() {
        let content = "{\"features_complete\": 11, \"code_quality\": 5}";
        assert!(matches!(
            parse_judge_response(content, &dims()),
            JudgeParse::ParseFailure { .. }
        ));
    }

    #[test]
    fn test_string_score_fails() {
        let content = "{\"features_complete\": {\"score\": \"8\"}, \"code_quality\": 5}";
        assert!(matches!(
            parse_judge_response(content, &dims()),
            JudgeParse::ParseFailure { .. }
        ));
    }

    #[test]
    fn test_prose_fails() {
        assert!(matches!(
            parse_judge_response("I would give this an 8.", &dims()),
            JudgeParse::ParseFailure { .. }
        ));
    }
}
