//! Rubric weights and where each dimension's score comes from.

use std::collections::HashSet;
use std::fmt;

use serde::de::{MapAccess, SeqAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::CaseError;

const WEIGHT_TOLERANCE: f64 = 1e-6;

/// Judge dimension that stands in for `edge_cases` when no suite exists.
pub const EDGE_CASE_FALLBACK: &str = "output_quality";

/// One weighted rubric dimension.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RubricWeight {
    pub name: String,
    pub weight: f64,
}

/// Weighted dimensions that make up a total score.
///
/// Serialized as an ordered `name: weight` map. A list of
/// `{name, weight}` entries is also accepted.
#[derive(Debug, Clone, PartialEq)]
pub struct Rubric {
    weights: Vec<RubricWeight>,
}

impl Default for Rubric {
    fn default() -> Self {
        Self::from_pairs(&[
            ("executes", 0.15),
            ("test_pass_rate", 0.20),
            ("features_complete", 0.20),
            ("edge_cases", 0.10),
            ("code_quality", 0.10),
            ("output_quality", 0.05),
            ("direction_following", 0.10),
            ("robustness", 0.10),
        ])
    }
}

impl Rubric {
    pub fn new(weights: Vec<RubricWeight>) -> Result<Self, CaseError> {
        let rubric = Self { weights };
        rubric.validate()?;
        Ok(rubric)
    }

    fn from_pairs(pairs: &[(&str, f64)]) -> Self {
        Self {
            weights: pairs
                .iter()
                .map(|(name, weight)| RubricWeight {
                    name: (*name).to_string(),
                    weight: *weight,
                })
                .collect(),
        }
    }

    pub fn weights(&self) -> &[RubricWeight] {
        &self.weights
    }

    /// Check that weights are non-negative, names unique, and the sum is 1.
    pub fn validate(&self) -> Result<(), CaseError> {
        if self.weights.is_empty() {
            return Err(CaseError::InvalidRubric("rubric has no dimensions".to_string()));
        }
        let mut seen = HashSet::new();
        for w in &self.weights {
            if !w.weight.is_finite() || w.weight < 0.0 {
                return Err(CaseError::InvalidRubric(format!(
                    "weight for '{}' must be a non-negative number, got {}",
                    w.name, w.weight
                )));
            }
            if !seen.insert(w.name.as_str()) {
                return Err(CaseError::InvalidRubric(format!(
                    "duplicate dimension '{}'",
                    w.name
                )));
            }
        }
        let sum: f64 = self.weights.iter().map(|w| w.weight).sum();
        if (sum - 1.0).abs() > WEIGHT_TOLERANCE {
            return Err(CaseError::InvalidRubric(format!(
                "weights sum to {}, expected 1.0",
                sum
            )));
        }
        Ok(())
    }

    /// Judge dimensions this rubric reads, in rubric order, deduplicated.
    pub fn judge_dimensions(&self) -> Vec<String> {
        let mut names: Vec<String> = Vec::new();
        for w in &self.weights {
            let judged = match DimensionSource::for_name(&w.name) {
                DimensionSource::Judge(name) => Some(name),
                DimensionSource::TestsOrJudge(name) => Some(name),
                _ => None,
            };
            if let Some(name) = judged {
                if !names.contains(&name) {
                    names.push(name);
                }
            }
        }
        names
    }
}

impl Serialize for Rubric {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.weights.len()))?;
        for w in &self.weights {
            map.serialize_entry(&w.name, &w.weight)?;
        }
        map.end()
    }
}

struct RubricVisitor;

impl<'de> Visitor<'de> for RubricVisitor {
    type Value = Rubric;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a map of dimension names to weights")
    }

    fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Rubric, A::Error> {
        let mut weights = Vec::new();
        while let Some((name, weight)) = access.next_entry::<String, f64>()? {
            weights.push(RubricWeight { name, weight });
        }
        Ok(Rubric { weights })
    }

    fn visit_seq<A: SeqAccess<'de>>(self, mut access: A) -> Result<Rubric, A::Error> {
        let mut weights = Vec::new();
        while let Some(entry) = access.next_element::<RubricWeight>()? {
            weights.push(entry);
        }
        Ok(Rubric { weights })
    }
}

impl<'de> Deserialize<'de> for Rubric {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_any(RubricVisitor)
    }
}

/// Where a rubric dimension gets its 0-10 sub-score.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "source", content = "dimension")]
pub enum DimensionSource {
    Execution,
    Tests,
    /// Tests when a suite exists, otherwise the named judge dimension.
    TestsOrJudge(String),
    Judge(String),
}

impl DimensionSource {
    pub fn for_name(name: &str) -> Self {
        match name {
            "executes" => DimensionSource::Execution,
            "test_pass_rate" | "robustness" => DimensionSource::Tests,
            "edge_cases" => DimensionSource::TestsOrJudge(EDGE_CASE_FALLBACK.to_string()),
            other => DimensionSource::Judge(other.to_string()),
        }
    }
}

impl fmt::Display for DimensionSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DimensionSource::Execution => write!(f, "execution"),
            DimensionSource::Tests => write!(f, "tests"),
            DimensionSource::TestsOrJudge(judge) => write!(f, "tests|judge:{}", judge),
            DimensionSource::Judge(judge) => write!(f, "judge:{}", judge),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn weight(name: &str, weight: f64) -> RubricWeight {
        RubricWeight {
            name: name.to_string(),
            weight,
        }
    }

    #[test]
    fn test_default_rubric_is_valid() {
        let rubric = Rubric::default();
        assert!(rubric.validate().is_ok());
        assert_eq!(rubric.weights().len(), 8);
        assert_eq!(
            rubric.judge_dimensions(),
            vec![
                "features_complete",
                "output_quality",
                "code_quality",
                "direction_following"
            ]
        );
    }

    #[test]
    fn test_rejects_bad_sum() {
        let err = Rubric::new(vec![weight("executes", 0.5), weight("code_quality", 0.4)])
            .unwrap_err();
        assert!(err.to_string().contains("sum"));
    }

    #[test]
    fn test_rejects_negative_and_duplicate() {
        assert!(Rubric::new(vec![weight("executes", 1.2), weight("code_quality", -0.2)]).is_err());
        assert!(Rubric::new(vec![weight("executes", 0.5), weight("executes", 0.5)]).is_err());
    }

    #[test]
    fn test_yaml_map_form_keeps_order() {
        let rubric: Rubric =
            serde_yaml::from_str("executes: 0.4\ncode_quality: 0.35\nfeatures_complete: 0.25\n")
                .unwrap();
        assert!(rubric.validate().is_ok());
        let names: Vec<_> = rubric.weights().iter().map(|w| w.name.as_str()).collect();
        assert_eq!(names, vec!["executes", "code_quality", "features_complete"]);

        let yaml = serde_yaml::to_string(&rubric).unwrap();
        assert!(yaml.starts_with("executes: 0.4"));
    }

    #[test]
    fn test_yaml_list_form() {
        let rubric: Rubric = serde_yaml::from_str(
            "- name: executes\n  weight: 0.5\n- name: code_quality\n  weight: 0.5\n",
        )
        .unwrap();
        assert!(rubric.validate().is_ok());
        assert_eq!(rubric.weights()[1].name, "code_quality");
    }

    #[test]
    fn test_sources_by_name() {
        assert_eq!(DimensionSource::for_name("executes"), DimensionSource::Execution);
        assert_eq!(DimensionSource::for_name("robustness"), DimensionSource::Tests);
        assert_eq!(
            DimensionSource::for_name("edge_cases"),
            DimensionSource::TestsOrJudge("output_quality".to_string())
        );
        assert_eq!(
            DimensionSource::for_name("creativity"),
            DimensionSource::Judge("creativity".to_string())
        );
    }
}
