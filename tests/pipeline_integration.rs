//! End-to-end session runs against a tempdir ledger with scripted judges.
//!
//! Needs `python3` on PATH; the tests return early when it is missing.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tempfile::TempDir;

use vibe_eval::config::{EvalConfig, SessionSettings};
use vibe_eval::error::JudgeError;
use vibe_eval::judge::{DimensionScore, Judge, JudgeRequest, JudgeScore, MultiJudgeArbitrator};
use vibe_eval::ledger::{load_ledger, ResultLedger};
use vibe_eval::llm::Usage;
use vibe_eval::session::{build_jobs, discover_cases, model_slug, EvaluationSession, Evaluator};

fn python_available() -> bool {
    std::process::Command::new("python3")
        .arg("--version")
        .output()
        .map(|o| o.status.success())
        .unwrap_or(false)
}

/// Gives every requested dimension the same score.
struct FlatJudge {
    id: String,
    score: f64,
}

#[async_trait]
impl Judge for FlatJudge {
    fn id(&self) -> &str {
        &self.id
    }

    fn model(&self) -> &str {
        "scripted"
    }

    async fn score(&self, request: &JudgeRequest) -> Result<JudgeScore, JudgeError> {
        let scores: BTreeMap<String, DimensionScore> = request
            .dimensions
            .iter()
            .map(|d| {
                (
                    d.name.clone(),
                    DimensionScore {
                        score: self.score,
                        reason: "scripted".to_string(),
                    },
                )
            })
            .collect();
        Ok(JudgeScore {
            judge_id: self.id.clone(),
            model: "scripted".to_string(),
            scores,
            latency_ms: 1,
            usage: Usage::default(),
            cost_usd: 0.0,
        })
    }
}

fn panel(scores: &[f64]) -> MultiJudgeArbitrator {
    let judges: Vec<Arc<dyn Judge>> = scores
        .iter()
        .enumerate()
        .map(|(i, score)| {
            Arc::new(FlatJudge {
                id: format!("judge-{}", i),
                score: *score,
            }) as Arc<dyn Judge>
        })
        .collect();
    MultiJudgeArbitrator::new(judges, Duration::from_secs(10), 3.0)
}

const GREETER_TESTS: &str = r#"
import contextlib
import importlib.util
import io


def _run(main_file):
    spec = importlib.util.spec_from_file_location("submission", str(main_file))
    module = importlib.util.module_from_spec(spec)
    out = io.StringIO()
    with contextlib.redirect_stdout(out):
        spec.loader.exec_module(module)
    return out.getvalue()


def test_prints_greeting(workspace, main_file):
    assert "hello" in _run(main_file).lower()


def test_has_main_file(workspace, main_file):
    assert main_file.exists()
"#;

fn write_case(cases: &Path) {
    let dir = cases.join("greeter");
    fs::create_dir_all(&dir).unwrap();
    fs::write(dir.join("spec.md"), "Write a Python script that prints a greeting.").unwrap();
    fs::write(dir.join("tests.py"), GREETER_TESTS).unwrap();
}

fn write_workspace(workspaces: &Path, model: &str, source: &str) {
    let dir = workspaces.join(model_slug(model)).join("greeter");
    fs::create_dir_all(&dir).unwrap();
    fs::write(dir.join("main.py"), source).unwrap();
}

fn settings() -> SessionSettings {
    SessionSettings {
        max_workers: 2,
        ..SessionSettings::default()
    }
}

#[tokio::test]
async fn test_session_scores_and_resumes() {
    if !python_available() {
        eprintln!("python3 not available; skipping");
        return;
    }
    let root = TempDir::new().unwrap();
    let cases_dir = root.path().join("cases");
    let workspaces = root.path().join("workspaces");
    write_case(&cases_dir);
    write_workspace(&workspaces, "good/model", "print('Hello, world!')\n");
    write_workspace(&workspaces, "bad/model", "raise SystemExit('boom')\n");

    let cases: Vec<_> = discover_cases(&cases_dir)
        .unwrap()
        .into_iter()
        .map(Arc::new)
        .collect();
    assert_eq!(cases.len(), 1);
    let models = vec!["good/model".to_string(), "bad/model".to_string()];
    let ledger_path = root.path().join("results.jsonl");

    let config = EvalConfig::default();
    let ledger = Arc::new(
        ResultLedger::open(&ledger_path, 3, Duration::from_millis(10))
            .await
            .unwrap(),
    );
    let evaluator = Evaluator::new(&config).with_arbitrator(panel(&[8.0, 8.0, 2.0]));
    let session = EvaluationSession::new(evaluator, ledger.clone(), settings());

    let summary = session
        .run(build_jobs(&cases, &workspaces, &models))
        .await
        .unwrap();
    ledger.close().await.unwrap();
    assert_eq!(summary.total_jobs, 2);
    assert_eq!(summary.evaluated, 2);
    assert_eq!(summary.skipped, 0);
    assert_eq!(summary.gated, 1);

    let loaded = load_ledger(&ledger_path).unwrap();
    assert_eq!(loaded.records.len(), 2);
    assert_eq!(loaded.skipped_lines, 0);

    let good = loaded
        .records
        .iter()
        .find(|r| r.model_id == "good/model")
        .unwrap();
    assert!(good.verdict.is_clean(), "{:?}", good.verdict);
    let tests = good.tests.as_ref().unwrap();
    assert_eq!(tests.total, 2);
    assert_eq!(tests.passed, 2);
    assert!(!good.score.gated);
    assert!(good.score.total > 30.0);
    let consensus = good.consensus.consensus().unwrap();
    assert_eq!(consensus.get("code_quality"), Some(8.0));
    assert_eq!(consensus.divergent_judges, vec!["judge-2".to_string()]);

    let bad = loaded
        .records
        .iter()
        .find(|r| r.model_id == "bad/model")
        .unwrap();
    assert_eq!(bad.verdict.status.as_str(), "RUNTIME_ERROR");
    assert!(bad.score.gated);
    assert!(bad.score.total <= 30.0);

    // A second session over the same ledger has nothing left to do.
    let ledger = Arc::new(
        ResultLedger::open(&ledger_path, 3, Duration::from_millis(10))
            .await
            .unwrap(),
    );
    assert_eq!(ledger.completed_keys().len(), 2);
    let evaluator = Evaluator::new(&config).with_arbitrator(panel(&[5.0]));
    let session = EvaluationSession::new(evaluator, ledger.clone(), settings());
    let summary = session
        .run(build_jobs(&cases, &workspaces, &models))
        .await
        .unwrap();
    ledger.close().await.unwrap();
    assert_eq!(summary.evaluated, 0);
    assert_eq!(summary.skipped, 2);
    assert_eq!(load_ledger(&ledger_path).unwrap().records.len(), 2);
}

#[tokio::test]
async fn test_missing_workspace_recorded_as_no_artifact() {
    let root = TempDir::new().unwrap();
    let cases_dir = root.path().join("cases");
    let dir = cases_dir.join("empty");
    fs::create_dir_all(&dir).unwrap();
    fs::write(dir.join("spec.md"), "Build something.").unwrap();

    let cases: Vec<_> = discover_cases(&cases_dir)
        .unwrap()
        .into_iter()
        .map(Arc::new)
        .collect();
    let ledger_path = root.path().join("results.jsonl");
    let ledger = Arc::new(
        ResultLedger::open(&ledger_path, 3, Duration::from_millis(10))
            .await
            .unwrap(),
    );
    let evaluator = Evaluator::new(&EvalConfig::default()).with_arbitrator(panel(&[7.0, 7.0]));
    let session = EvaluationSession::new(evaluator, ledger.clone(), settings());
    let summary = session
        .run(build_jobs(
            &cases,
            &root.path().join("workspaces"),
            &["some/model".to_string()],
        ))
        .await
        .unwrap();
    ledger.close().await.unwrap();

    assert_eq!(summary.evaluated, 1);
    assert_eq!(summary.gated, 1);
    let loaded = load_ledger(&ledger_path).unwrap();
    let record = &loaded.records[0];
    assert_eq!(record.verdict.status.as_str(), "NO_ARTIFACT");
    assert_eq!(record.score.total, 0.0);
    assert!(!record.consensus.is_available());
}

/// Live and not a zombie waiting to be reaped.
#[cfg(target_os = "linux")]
fn process_running(pid: u32) -> bool {
    match fs::read_to_string(format!("/proc/{}/stat", pid)) {
        Ok(stat) => stat
            .rsplit_once(')')
            .and_then(|(_, rest)| rest.split_whitespace().next())
            .map(|state| state != "Z" && state != "X")
            .unwrap_or(false),
        Err(_) => false,
    }
}

const SLEEPER: &str = r#"
import os
import subprocess
import time

child = subprocess.Popen(["sleep", "120"])
here = os.path.dirname(os.path.abspath(__file__))
with open(os.path.join(here, "pids.txt"), "w") as f:
    f.write("%d %d" % (os.getpid(), child.pid))
time.sleep(120)
"#;

#[cfg(target_os = "linux")]
#[tokio::test]
async fn test_target_timeout_records_and_kills_process_group() {
    if !python_available() {
        eprintln!("python3 not available; skipping");
        return;
    }
    let root = TempDir::new().unwrap();
    let cases_dir = root.path().join("cases");
    let case_dir = cases_dir.join("sleeper");
    fs::create_dir_all(&case_dir).unwrap();
    fs::write(case_dir.join("spec.md"), "Write a script that runs forever.").unwrap();
    let workspaces = root.path().join("workspaces");
    let workspace = workspaces.join(model_slug("slow/model")).join("sleeper");
    fs::create_dir_all(&workspace).unwrap();
    fs::write(workspace.join("main.py"), SLEEPER).unwrap();

    let cases: Vec<_> = discover_cases(&cases_dir)
        .unwrap()
        .into_iter()
        .map(Arc::new)
        .collect();
    let ledger_path = root.path().join("results.jsonl");
    let ledger = Arc::new(
        ResultLedger::open(&ledger_path, 3, Duration::from_millis(10))
            .await
            .unwrap(),
    );
    let evaluator = Evaluator::new(&EvalConfig::default()).with_arbitrator(panel(&[9.0]));
    let session = EvaluationSession::new(
        evaluator,
        ledger.clone(),
        SessionSettings {
            max_workers: 1,
            target_timeout_secs: 3,
            ..SessionSettings::default()
        },
    );
    let summary = session
        .run(build_jobs(&cases, &workspaces, &["slow/model".to_string()]))
        .await
        .unwrap();
    ledger.close().await.unwrap();

    assert_eq!(summary.evaluated, 1);
    assert_eq!(summary.timed_out, 1);
    let loaded = load_ledger(&ledger_path).unwrap();
    assert_eq!(loaded.records.len(), 1);
    let record = &loaded.records[0];
    assert_eq!(record.verdict.status.as_str(), "TIMEOUT");
    assert!(record.score.gated);
    assert!(!record.consensus.is_available());

    let pids = fs::read_to_string(workspace.join("pids.txt")).unwrap();
    let pids: Vec<u32> = pids
        .split_whitespace()
        .map(|p| p.parse().unwrap())
        .collect();
    assert_eq!(pids.len(), 2);
    tokio::time::sleep(Duration::from_millis(500)).await;
    for pid in pids {
        assert!(!process_running(pid), "pid {} outlived the target timeout", pid);
    }
}
