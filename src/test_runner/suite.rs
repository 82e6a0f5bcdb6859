//! Test suite discovery.
//!
//! A case suite is a `tests.py` file of `def test_*(...)` functions. Tests
//! are discovered statically so that a broken suite file is still reported
//! per test instead of aborting the whole run.

use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::artifact::ArtifactKind;
use crate::config::TimeoutProfile;

static TEST_DEF_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^(?:async\s+)?def\s+(test_\w+)\s*\(([^)]*)\)").expect("Invalid test regex")
});

/// One discovered test function.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoveredTest {
    pub name: String,
    /// First parameter name, e.g. `page` for browser tests.
    pub first_param: Option<String>,
}

/// Discover test functions, sorted by name and deduplicated.
pub fn discover_tests(source: &str) -> Vec<DiscoveredTest> {
    let mut tests: Vec<DiscoveredTest> = TEST_DEF_RE
        .captures_iter(source)
        .map(|caps| {
            let first_param = caps[2]
                .split(',')
                .next()
                .map(|p| p.split(':').next().unwrap_or("").trim().to_string())
                .filter(|p| !p.is_empty());
            DiscoveredTest {
                name: caps[1].to_string(),
                first_param,
            }
        })
        .collect();
    tests.sort_by(|a, b| a.name.cmp(&b.name));
    tests.dedup_by(|a, b| a.name == b.name);
    tests
}

/// A case-supplied functional test suite.
#[derive(Debug, Clone, PartialEq)]
pub struct TestSuite {
    pub path: PathBuf,
    pub tests: Vec<DiscoveredTest>,
    /// Tests that run under the fast profile. Empty means all of them.
    pub fast_tests: Vec<String>,
    /// Start the artifact once and run every test against it.
    pub shared_server: bool,
}

impl TestSuite {
    /// Load and discover `tests.py`.
    pub fn load(path: &Path) -> std::io::Result<Self> {
        let source = std::fs::read_to_string(path)?;
        Ok(Self {
            path: path.to_path_buf(),
            tests: discover_tests(&source),
            fast_tests: Vec::new(),
            shared_server: false,
        })
    }

    pub fn with_fast_tests(mut self, fast_tests: Vec<String>) -> Self {
        self.fast_tests = fast_tests;
        self
    }

    pub fn with_shared_server(mut self, shared: bool) -> Self {
        self.shared_server = shared;
        self
    }

    /// Kind implied by the test signatures: tests taking `page` drive a browser.
    pub fn implied_kind(&self) -> Option<ArtifactKind> {
        if self.tests.is_empty() {
            return None;
        }
        let wants_page = self
            .tests
            .iter()
            .any(|t| t.first_param.as_deref() == Some("page"));
        Some(if wants_page {
            ArtifactKind::Html
        } else {
            ArtifactKind::Python
        })
    }

    /// Test names to run under `profile`.
    pub fn select(&self, profile: TimeoutProfile) -> Vec<String> {
        let all = self.tests.iter().map(|t| t.name.clone());
        match profile {
            TimeoutProfile::Fast if !self.fast_tests.is_empty() => all
                .filter(|name| self.fast_tests.contains(name))
                .collect(),
            _ => all.collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const SUITE: &str = r##"
import re

def helper(x):
    return x

def test_timer_starts(page):
    page.click("#start")

def test_reset(page: "Page"):
    pass

def test_timer_starts(page):
    pass

class Thing:
    def test_method(self):
        pass
"##;

    #[test]
    fn test_discovery_sorted_and_deduped() {
        let tests = discover_tests(SUITE);
        let names: Vec<&str> = tests.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, vec!["test_reset", "test_timer_starts"]);
        assert_eq!(tests[0].first_param.as_deref(), Some("page"));
    }

    #[test]
    fn test_implied_kind() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("tests.py");
        std::fs::write(&path, SUITE).unwrap();
        assert_eq!(TestSuite::load(&path).unwrap().implied_kind(), Some(ArtifactKind::Html));

        std::fs::write(&path, "def test_output(workspace, main_file):\n    pass\n").unwrap();
        assert_eq!(
            TestSuite::load(&path).unwrap().implied_kind(),
            Some(ArtifactKind::Python)
        );

        std::fs::write(&path, "# nothing here\n").unwrap();
        assert_eq!(TestSuite::load(&path).unwrap().implied_kind(), None);
    }

    #[test]
    fn test_fast_selection() {
        let suite = TestSuite {
            path: PathBuf::from("tests.py"),
            tests: discover_tests(SUITE),
            fast_tests: vec!["test_reset".to_string()],
            shared_server: false,
        };
        assert_eq!(suite.select(TimeoutProfile::Fast), vec!["test_reset"]);
        assert_eq!(suite.select(TimeoutProfile::Full).len(), 2);
    }
}
