//! Concurrent evaluation of RunTargets.
//!
//! Each job runs as its own task, bounded by a worker semaphore and a
//! per-target timeout. Inside a job, judging runs concurrently with the
//! strictly sequential validate-then-test chain. Every result is appended to
//! the ledger and acknowledged as durable before the job counts as done; a
//! ledger failure aborts the session.

use std::path::Path;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use uuid::Uuid;

use super::case::CaseDefinition;
use super::progress::{ProgressCounters, ProgressMonitor};
use super::summary::SessionSummary;
use super::target::EvaluationJob;
use crate::artifact::locate_entry_point;
use crate::config::{EvalConfig, SessionSettings, TimeoutProfile};
use crate::error::SessionError;
use crate::judge::{
    collect_code_files, default_dimensions, ConsensusScore, JudgeDimension, JudgeFailure,
    JudgeRequest, JudgeScore, MultiJudgeArbitrator,
};
use crate::ledger::{ResultLedger, RunMetadata, ScoredResult};
use crate::llm::CostTracker;
use crate::metrics::MetricsCollector;
use crate::scoring::ScoreAggregator;
use crate::test_runner::{FunctionalTestRunner, TestResult};
use crate::validation::{BrowserPool, ExecutionValidator, ExecutionVerdict};

/// Judge dimensions for `case`, with descriptions for the well-known ones.
pub fn judge_dimensions_for(case: &CaseDefinition) -> Vec<JudgeDimension> {
    let known = default_dimensions();
    case.rubric
        .judge_dimensions()
        .into_iter()
        .map(|name| {
            known
                .iter()
                .find(|d| d.name == name)
                .cloned()
                .unwrap_or_else(|| {
                    let description =
                        format!("How well does the submission do on {}?", name.replace('_', " "));
                    JudgeDimension::new(name, description)
                })
        })
        .collect()
}

/// Scores one job from start to finish. Never fails: every problem ends up
/// in the verdict, the tests or the consensus.
pub struct Evaluator {
    validator: ExecutionValidator,
    tests: FunctionalTestRunner,
    arbitrator: Option<MultiJudgeArbitrator>,
    aggregator: ScoreAggregator,
    default_profile: TimeoutProfile,
    max_code_files: usize,
    max_file_chars: usize,
}

impl Evaluator {
    /// Evaluator without judges; judge dimensions are always excluded.
    pub fn new(config: &EvalConfig) -> Self {
        // Page loads and browser tests share one Chromium budget.
        let browsers = BrowserPool::new(config.sandbox.browser_slots);
        Self {
            validator: ExecutionValidator::with_browser_pool(
                config.sandbox.clone(),
                browsers.clone(),
            ),
            tests: FunctionalTestRunner::with_browser_pool(config.sandbox.clone(), browsers),
            arbitrator: None,
            aggregator: ScoreAggregator::new(&config.scoring),
            default_profile: config.session.default_profile,
            max_code_files: config.judges.max_code_files,
            max_file_chars: config.judges.max_file_chars,
        }
    }

    pub fn with_arbitrator(mut self, arbitrator: MultiJudgeArbitrator) -> Self {
        self.arbitrator = Some(arbitrator);
        self
    }

    pub fn with_validator(mut self, validator: ExecutionValidator) -> Self {
        self.validator = validator;
        self
    }

    /// Verdict and tests only, as used by `vibe-eval validate`.
    pub async fn validate_only(
        &self,
        case: &CaseDefinition,
        workspace: &Path,
    ) -> (ExecutionVerdict, Option<TestResult>) {
        let profile = case.profile(self.default_profile);
        let artifact = case
            .resolve_kind(workspace)
            .and_then(|kind| locate_entry_point(workspace, kind));
        let verdict = self
            .validator
            .validate(workspace, artifact.as_ref(), profile)
            .await;
        let tests = self
            .tests
            .run(case.suite.as_ref(), artifact.as_ref(), workspace, &verdict, profile)
            .await;
        (verdict, tests)
    }

    async fn judge(&self, case: &CaseDefinition, workspace: &Path) -> JudgeOutput {
        let Some(arbitrator) = self.arbitrator.as_ref().filter(|a| !a.is_empty()) else {
            return JudgeOutput::unavailable("judging disabled");
        };
        let dimensions = judge_dimensions_for(case);
        if dimensions.is_empty() {
            return JudgeOutput::unavailable("rubric has no judge dimensions");
        }
        let files = collect_code_files(workspace, self.max_code_files, self.max_file_chars);
        if files.is_empty() {
            return JudgeOutput::unavailable("no code files to judge");
        }

        let request = JudgeRequest {
            case_id: case.id.clone(),
            spec: case.spec.clone(),
            files,
            dimensions,
        };
        let outcome = arbitrator.arbitrate(&request).await;
        JudgeOutput {
            consensus: outcome.consensus,
            scores: outcome.scores,
            failures: outcome.failures,
            cost_usd: outcome.cost_usd,
        }
    }

    /// Evaluate `job` and build its ledger record.
    pub async fn evaluate(&self, job: &EvaluationJob) -> ScoredResult {
        let started = Instant::now();
        let case = job.case.as_ref();
        let workspace = job.target.workspace.as_path();
        let metadata = RunMetadata::load(workspace);
        let kind = case.resolve_kind(workspace);

        let (judged, (verdict, tests)) =
            tokio::join!(self.judge(case, workspace), self.validate_only(case, workspace));

        let score = self
            .aggregator
            .aggregate(&case.rubric, &verdict, tests.as_ref(), &judged.consensus);

        ScoredResult {
            run_id: Uuid::new_v4(),
            case_id: job.target.case_id.clone(),
            model_id: job.target.model_id.clone(),
            kind,
            verdict,
            tests,
            consensus: judged.consensus,
            judge_scores: judged.scores,
            judge_failures: judged.failures,
            score,
            metadata,
            judge_cost_usd: judged.cost_usd,
            duration_ms: started.elapsed().as_millis() as u64,
            completed_at: Utc::now(),
        }
    }

    /// Record for a job that ran past the per-target timeout.
    pub fn timed_out(&self, job: &EvaluationJob, limit: Duration, elapsed: Duration) -> ScoredResult {
        let case = job.case.as_ref();
        let workspace = job.target.workspace.as_path();
        let verdict = ExecutionVerdict::timeout(format!(
            "evaluation exceeded the {}s per-target limit",
            limit.as_secs()
        ))
        .with_duration(elapsed);
        let tests = case.suite.as_ref().and_then(|suite| {
            let names = suite.select(case.profile(self.default_profile));
            (!names.is_empty()).then(|| TestResult::not_run(&names, "not run: evaluation timed out"))
        });
        let consensus = ConsensusScore::unavailable("evaluation timed out");
        let score = self
            .aggregator
            .aggregate(&case.rubric, &verdict, tests.as_ref(), &consensus);

        ScoredResult {
            run_id: Uuid::new_v4(),
            case_id: job.target.case_id.clone(),
            model_id: job.target.model_id.clone(),
            kind: case.resolve_kind(workspace),
            verdict,
            tests,
            consensus,
            judge_scores: Vec::new(),
            judge_failures: Vec::new(),
            score,
            metadata: RunMetadata::load(workspace),
            judge_cost_usd: 0.0,
            duration_ms: elapsed.as_millis() as u64,
            completed_at: Utc::now(),
        }
    }
}

struct JudgeOutput {
    consensus: ConsensusScore,
    scores: Vec<JudgeScore>,
    failures: Vec<JudgeFailure>,
    cost_usd: f64,
}

impl JudgeOutput {
    fn unavailable(reason: &str) -> Self {
        Self {
            consensus: ConsensusScore::unavailable(reason),
            scores: Vec::new(),
            failures: Vec::new(),
            cost_usd: 0.0,
        }
    }
}

/// What a finished worker reports back.
struct TargetOutcome {
    model_id: String,
    total: f64,
    gated: bool,
    timed_out: bool,
    judge_cost_usd: f64,
}

/// Runs many jobs against one ledger.
pub struct EvaluationSession {
    evaluator: Arc<Evaluator>,
    ledger: Arc<ResultLedger>,
    settings: SessionSettings,
    costs: Arc<CostTracker>,
}

impl EvaluationSession {
    pub fn new(evaluator: Evaluator, ledger: Arc<ResultLedger>, settings: SessionSettings) -> Self {
        Self {
            evaluator: Arc::new(evaluator),
            ledger,
            settings,
            costs: Arc::new(CostTracker::new()),
        }
    }

    /// Share a cost tracker with the judges so the summary can report it.
    pub fn with_cost_tracker(mut self, costs: Arc<CostTracker>) -> Self {
        self.costs = costs;
        self
    }

    pub fn costs(&self) -> &Arc<CostTracker> {
        &self.costs
    }

    /// Evaluate `jobs`, skipping any already recorded in the ledger.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::Ledger` as soon as a result cannot be made
    /// durable; remaining workers are aborted.
    pub async fn run(&self, jobs: Vec<EvaluationJob>) -> Result<SessionSummary, SessionError> {
        let started = Instant::now();
        let total_jobs = jobs.len();
        let done = self.ledger.completed_keys();
        let (pending, skipped): (Vec<_>, Vec<_>) = jobs
            .into_iter()
            .partition(|job| !done.contains(&job.target.key()));

        let counters = ProgressCounters::new();
        counters.skipped.fetch_add(skipped.len(), Ordering::Relaxed);
        tracing::info!(
            total = total_jobs,
            pending = pending.len(),
            skipped = skipped.len(),
            workers = self.settings.max_workers,
            "Starting evaluation session"
        );

        let monitor =
            ProgressMonitor::start(counters.clone(), total_jobs, self.settings.progress_interval());
        let semaphore = Arc::new(Semaphore::new(self.settings.max_workers.max(1)));
        let limit = self.settings.target_timeout();

        let mut workers: JoinSet<Result<TargetOutcome, SessionError>> = JoinSet::new();
        for job in pending {
            let evaluator = self.evaluator.clone();
            let ledger = self.ledger.clone();
            let semaphore = semaphore.clone();
            let counters = counters.clone();

            workers.spawn(async move {
                let _permit = semaphore
                    .acquire_owned()
                    .await
                    .map_err(|e| SessionError::Worker(e.to_string()))?;
                let metrics = MetricsCollector::new();
                metrics.worker_started();
                counters.active.fetch_add(1, Ordering::Relaxed);

                let began = Instant::now();
                let (result, timed_out) =
                    match tokio::time::timeout(limit, evaluator.evaluate(&job)).await {
                        Ok(result) => (result, false),
                        Err(_) => {
                            tracing::warn!(
                                case_id = %job.target.case_id,
                                model = %job.target.model_id,
                                limit_secs = limit.as_secs(),
                                "Run target timed out"
                            );
                            (evaluator.timed_out(&job, limit, began.elapsed()), true)
                        }
                    };

                counters.active.fetch_sub(1, Ordering::Relaxed);
                metrics.worker_finished();

                let kind = result
                    .kind
                    .map(|k| k.to_string())
                    .unwrap_or_else(|| "unknown".to_string());
                metrics.record_run(
                    result.verdict.status.as_str(),
                    &result.model_id,
                    &kind,
                    began.elapsed().as_secs_f64(),
                );
                metrics.record_score(result.score.total, result.score.gated);

                ledger.append(&result).await?;

                counters.completed.fetch_add(1, Ordering::Relaxed);
                if result.score.gated {
                    counters.gated.fetch_add(1, Ordering::Relaxed);
                }
                if timed_out {
                    counters.timed_out.fetch_add(1, Ordering::Relaxed);
                }
                tracing::info!(
                    case_id = %result.case_id,
                    model = %result.model_id,
                    status = %result.verdict.status,
                    total = result.score.total,
                    gated = result.score.gated,
                    judges = result.judge_scores.len(),
                    "Scored run target"
                );

                Ok(TargetOutcome {
                    model_id: result.model_id,
                    total: result.score.total,
                    gated: result.score.gated,
                    timed_out,
                    judge_cost_usd: result.judge_cost_usd,
                })
            });
        }

        let mut summary = SessionSummary {
            total_jobs,
            skipped: skipped.len(),
            ..Default::default()
        };

        while let Some(joined) = workers.join_next().await {
            match joined {
                Ok(Ok(outcome)) => {
                    summary.evaluated += 1;
                    if outcome.gated {
                        summary.gated += 1;
                    }
                    if outcome.timed_out {
                        summary.timed_out += 1;
                    }
                    summary.judge_cost_usd += outcome.judge_cost_usd;
                    summary
                        .per_model
                        .entry(outcome.model_id)
                        .or_default()
                        .record(outcome.total, outcome.gated);
                }
                Ok(Err(e)) => {
                    tracing::error!(error = %e, "Aborting session");
                    workers.abort_all();
                    monitor.stop().await;
                    return Err(e);
                }
                Err(e) if e.is_panic() => {
                    tracing::error!(error = %e, "Evaluation worker panicked");
                    summary.failed_workers += 1;
                }
                Err(_) => {}
            }
        }

        monitor.stop().await;
        summary.duration = started.elapsed();
        tracing::info!(
            evaluated = summary.evaluated,
            skipped = summary.skipped,
            gated = summary.gated,
            timed_out = summary.timed_out,
            judge_cost_usd = format!("{:.4}", summary.judge_cost_usd),
            elapsed_secs = summary.duration.as_secs(),
            "Evaluation session finished"
        );
        Ok(summary)
    }
}
