//! Case definitions: the spec, optional tests, and per-case options.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::artifact::{detect_kind, ArtifactKind};
use crate::config::TimeoutProfile;
use crate::error::CaseError;
use crate::scoring::Rubric;
use crate::test_runner::TestSuite;

pub const SPEC_FILE: &str = "spec.md";
pub const TESTS_FILE: &str = "tests.py";
pub const MANIFEST_FILE: &str = "case.yaml";

/// Optional `case.yaml` contents.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaseManifest {
    pub kind: Option<ArtifactKind>,
    pub rubric: Option<Rubric>,
    pub timeout_profile: Option<TimeoutProfile>,
    pub fast_tests: Vec<String>,
    pub shared_server: bool,
}

/// One evaluation case.
#[derive(Debug, Clone)]
pub struct CaseDefinition {
    /// Directory name of the case.
    pub id: String,
    pub dir: PathBuf,
    /// Prompt given to the model and shown to judges.
    pub spec: String,
    pub suite: Option<TestSuite>,
    pub kind: Option<ArtifactKind>,
    pub rubric: Rubric,
    pub timeout_profile: Option<TimeoutProfile>,
}

impl CaseDefinition {
    /// Load the case in `dir`. The directory path is canonicalized so the
    /// suite path stays valid for sandboxed children.
    pub fn load(dir: &Path) -> Result<Self, CaseError> {
        if !dir.is_dir() {
            return Err(CaseError::NotFound(dir.to_path_buf()));
        }
        let dir = dir.canonicalize()?;
        let id = dir
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        let spec_path = dir.join(SPEC_FILE);
        if !spec_path.is_file() {
            return Err(CaseError::MissingSpec(id));
        }
        let spec = std::fs::read_to_string(&spec_path)?;

        let manifest_path = dir.join(MANIFEST_FILE);
        let manifest: CaseManifest = if manifest_path.is_file() {
            let content = std::fs::read_to_string(&manifest_path)?;
            if content.trim().is_empty() {
                CaseManifest::default()
            } else {
                serde_yaml::from_str(&content)?
            }
        } else {
            CaseManifest::default()
        };

        let rubric = manifest.rubric.unwrap_or_default();
        rubric.validate()?;

        let tests_path = dir.join(TESTS_FILE);
        let suite = if tests_path.is_file() {
            Some(
                TestSuite::load(&tests_path)?
                    .with_fast_tests(manifest.fast_tests)
                    .with_shared_server(manifest.shared_server),
            )
        } else {
            None
        };

        Ok(Self {
            id,
            dir,
            spec,
            suite,
            kind: manifest.kind,
            rubric,
            timeout_profile: manifest.timeout_profile,
        })
    }

    /// Artifact kind to look for in `workspace`: the declared kind, then the
    /// kind the tests imply, then whatever the workspace holds.
    pub fn resolve_kind(&self, workspace: &Path) -> Option<ArtifactKind> {
        self.kind
            .or_else(|| self.suite.as_ref().and_then(TestSuite::implied_kind))
            .or_else(|| detect_kind(workspace))
    }

    pub fn profile(&self, default: TimeoutProfile) -> TimeoutProfile {
        self.timeout_profile.unwrap_or(default)
    }
}

/// Load every case under `root`: each subdirectory holding a `spec.md`, in
/// name order.
pub fn discover_cases(root: &Path) -> Result<Vec<CaseDefinition>, CaseError> {
    if !root.is_dir() {
        return Err(CaseError::NotFound(root.to_path_buf()));
    }
    let mut dirs: Vec<PathBuf> = std::fs::read_dir(root)?
        .filter_map(Result::ok)
        .map(|e| e.path())
        .filter(|p| p.is_dir() && p.join(SPEC_FILE).is_file())
        .collect();
    dirs.sort();
    dirs.iter().map(|d| CaseDefinition::load(d)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn write_case(root: &Path, name: &str, manifest: Option<&str>, tests: Option<&str>) -> PathBuf {
        let dir = root.join(name);
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join(SPEC_FILE), format!("Build {}.", name)).unwrap();
        if let Some(manifest) = manifest {
            fs::write(dir.join(MANIFEST_FILE), manifest).unwrap();
        }
        if let Some(tests) = tests {
            fs::write(dir.join(TESTS_FILE), tests).unwrap();
        }
        dir
    }

    #[test]
    fn test_load_minimal_case() {
        let root = TempDir::new().unwrap();
        let dir = write_case(root.path(), "calculator", None, None);
        let case = CaseDefinition::load(&dir).unwrap();
        assert_eq!(case.id, "calculator");
        assert_eq!(case.spec, "Build calculator.");
        assert!(case.suite.is_none());
        assert_eq!(case.rubric, Rubric::default());
        assert!(case.dir.is_absolute());
    }

    #[test]
    fn test_load_full_manifest() {
        let root = TempDir::new().unwrap();
        let dir = write_case(
            root.path(),
            "stopwatch",
            Some(
                "timeout_profile: fast\nfast_tests: [test_start]\nshared_server: false\n\
                 rubric:\n  executes: 0.5\n  features_complete: 0.5\n",
            ),
            Some("def test_start(page):\n    pass\n\ndef test_lap(page):\n    pass\n"),
        );
        let case = CaseDefinition::load(&dir).unwrap();
        assert_eq!(case.timeout_profile, Some(TimeoutProfile::Fast));
        assert_eq!(case.rubric.weights().len(), 2);
        let suite = case.suite.as_ref().unwrap();
        assert_eq!(suite.select(TimeoutProfile::Fast), vec!["test_start"]);
        // tests take `page`, so the case is HTML even without a declared kind
        assert_eq!(case.resolve_kind(root.path()), Some(ArtifactKind::Html));
    }

    #[test]
    fn test_invalid_rubric_rejected() {
        let root = TempDir::new().unwrap();
        let dir = write_case(
            root.path(),
            "bad",
            Some("rubric:\n  executes: 0.5\n  code_quality: 0.2\n"),
            None,
        );
        assert!(matches!(
            CaseDefinition::load(&dir),
            Err(CaseError::InvalidRubric(_))
        ));
    }

    #[test]
    fn test_missing_spec() {
        let root = TempDir::new().unwrap();
        fs::create_dir(root.path().join("empty")).unwrap();
        assert!(matches!(
            CaseDefinition::load(&root.path().join("empty")),
            Err(CaseError::MissingSpec(_))
        ));
    }

    #[test]
    fn test_discover_cases_sorted() {
        let root = TempDir::new().unwrap();
        write_case(root.path(), "b-snake", None, None);
        write_case(root.path(), "a-todo", None, None);
        fs::create_dir(root.path().join("notes")).unwrap();

        let cases = discover_cases(root.path()).unwrap();
        let ids: Vec<_> = cases.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, vec!["a-todo", "b-snake"]);
    }
}
