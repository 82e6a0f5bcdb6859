//! RunTargets: one (case, model) workspace to evaluate.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::case::CaseDefinition;
use crate::ledger::RunKey;

/// Directory name used for `model_id` under the workspaces root.
pub fn model_slug(model_id: &str) -> String {
    model_id.replace('/', "_")
}

/// One (case, model) pair and the workspace the model produced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunTarget {
    pub case_id: String,
    pub model_id: String,
    /// Absolute path. It may not exist when the model produced nothing.
    pub workspace: PathBuf,
}

impl RunTarget {
    pub fn new(case_id: impl Into<String>, model_id: impl Into<String>, workspace: &Path) -> Self {
        Self {
            case_id: case_id.into(),
            model_id: model_id.into(),
            workspace: absolutize(workspace),
        }
    }

    pub fn key(&self) -> RunKey {
        (self.case_id.clone(), self.model_id.clone())
    }
}

fn absolutize(path: &Path) -> PathBuf {
    if let Ok(canonical) = path.canonicalize() {
        return canonical;
    }
    if path.is_absolute() {
        return path.to_path_buf();
    }
    std::env::current_dir()
        .map(|cwd| cwd.join(path))
        .unwrap_or_else(|_| path.to_path_buf())
}

/// A RunTarget together with its case.
#[derive(Debug, Clone)]
pub struct EvaluationJob {
    pub case: Arc<CaseDefinition>,
    pub target: RunTarget,
}

/// Cross `cases` with `models`, locating each workspace at
/// `<workspaces>/<model_slug>/<case_id>/`.
pub fn build_jobs(
    cases: &[Arc<CaseDefinition>],
    workspaces: &Path,
    models: &[String],
) -> Vec<EvaluationJob> {
    let mut jobs = Vec::with_capacity(cases.len() * models.len());
    for model in models {
        let model_dir = workspaces.join(model_slug(model));
        for case in cases {
            let workspace = model_dir.join(&case.id);
            if !workspace.is_dir() {
                tracing::debug!(
                    case_id = %case.id,
                    model = %model,
                    workspace = %workspace.display(),
                    "Workspace missing; will score as NO_ARTIFACT"
                );
            }
            jobs.push(EvaluationJob {
                case: case.clone(),
                target: RunTarget::new(case.id.clone(), model.clone(), &workspace),
            });
        }
    }
    jobs
}
