//! CLI command definitions for vibe-eval.
//!
//! `run` scores every (case, model) workspace into a ledger, `validate`
//! checks one workspace without judges, and `summary` rolls a ledger up per
//! model.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::Parser;
use serde::Serialize;
use tracing::{info, warn};

use crate::artifact::ArtifactKind;
use crate::config::{EvalConfig, TimeoutProfile};
use crate::judge::MultiJudgeArbitrator;
use crate::ledger::{load_ledger, ResultLedger};
use crate::llm::CostTracker;
use crate::metrics::{export_metrics, init_metrics};
use crate::scoring::{Rubric, ScoreAggregator};
use crate::session::{
    build_jobs, discover_cases, summarize_results, CaseDefinition, EvaluationSession, Evaluator,
    ModelSummary, SessionSummary,
};
use crate::test_runner::{TestResult, TestSuite};
use crate::validation::ExecutionVerdict;

/// Execution-and-scoring harness for LLM-generated programs.
#[derive(Parser)]
#[command(name = "vibe-eval")]
#[command(about = "Execute, test and judge LLM-generated programs")]
#[command(version)]
#[command(
    long_about = "vibe-eval runs the programs a model produced for each case, tests them, asks a panel of LLM judges for scores, and records one gated 0-100 score per (case, model) in a crash-safe JSONL ledger.\n\nExample usage:\n  vibe-eval run --cases ./cases --workspaces ./workspaces --models openai/gpt-4o --ledger ./results.jsonl"
)]
pub struct Cli {
    /// The subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short, long, default_value = "info", global = true)]
    pub log_level: String,
}

/// Available CLI subcommands.
#[derive(clap::Subcommand)]
pub enum Commands {
    /// Evaluate every case for every model, appending results to a ledger.
    ///
    /// Targets already present in the ledger are skipped, so an interrupted
    /// run resumes where it stopped.
    Run(RunArgs),

    /// Validate and test a single workspace. No judges are called.
    Validate(ValidateArgs),

    /// Summarize a ledger per model.
    Summary(SummaryArgs),
}

/// Arguments for `vibe-eval run`.
#[derive(Parser, Debug)]
pub struct RunArgs {
    /// Directory of cases, one subdirectory per case with a spec.md.
    #[arg(long)]
    pub cases: PathBuf,

    /// Root of generated workspaces, laid out as <model_slug>/<case_id>/.
    #[arg(long)]
    pub workspaces: PathBuf,

    /// Comma-separated model ids whose workspaces to evaluate.
    #[arg(long, value_delimiter = ',', required = true)]
    pub models: Vec<String>,

    /// JSONL ledger to append results to.
    #[arg(long)]
    pub ledger: PathBuf,

    /// YAML configuration file.
    #[arg(short, long, env = "VIBE_EVAL_CONFIG")]
    pub config: Option<PathBuf>,

    /// Timeout profile for cases that do not set one (fast, full).
    #[arg(long)]
    pub profile: Option<TimeoutProfile>,

    /// Maximum concurrent run targets.
    #[arg(short, long)]
    pub workers: Option<usize>,

    /// Skip LLM judges; judge dimensions are excluded from scores.
    #[arg(long)]
    pub no_judges: bool,

    /// Write Prometheus metrics to this file when the run finishes.
    #[arg(long)]
    pub metrics_out: Option<PathBuf>,

    /// Print the session summary as JSON.
    #[arg(short = 'j', long)]
    pub json: bool,
}

/// Arguments for `vibe-eval validate`.
#[derive(Parser, Debug)]
pub struct ValidateArgs {
    /// Workspace holding the generated program.
    pub workspace: PathBuf,

    /// Artifact kind (html, python). Detected when omitted.
    #[arg(short, long)]
    pub kind: Option<ArtifactKind>,

    /// tests.py to run against the artifact.
    #[arg(short, long)]
    pub tests: Option<PathBuf>,

    /// Timeout profile (fast, full).
    #[arg(long, default_value = "full")]
    pub profile: TimeoutProfile,

    /// YAML configuration file.
    #[arg(short, long, env = "VIBE_EVAL_CONFIG")]
    pub config: Option<PathBuf>,

    /// Print the result as JSON.
    #[arg(short = 'j', long)]
    pub json: bool,
}

/// Arguments for `vibe-eval summary`.
#[derive(Parser, Debug)]
pub struct SummaryArgs {
    /// JSONL ledger to read.
    #[arg(long)]
    pub ledger: PathBuf,

    /// Print the summary as JSON.
    #[arg(short = 'j', long)]
    pub json: bool,
}

/// Parse CLI arguments and return the Cli struct.
///
/// This allows main.rs to access CLI arguments (like log_level) before running commands.
pub fn parse_cli() -> Cli {
    Cli::parse()
}

/// Run the CLI by parsing arguments and executing the command.
pub async fn run() -> anyhow::Result<()> {
    run_with_cli(parse_cli()).await
}

/// Run the CLI with the parsed arguments.
pub async fn run_with_cli(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Commands::Run(args) => run_eval_command(args).await,
        Commands::Validate(args) => run_validate_command(args).await,
        Commands::Summary(args) => run_summary_command(args),
    }
}

fn load_config(path: Option<&Path>) -> anyhow::Result<EvalConfig> {
    let config = match path {
        Some(path) => {
            info!(path = %path.display(), "Loading configuration");
            EvalConfig::from_yaml_file(path)?
        }
        None => EvalConfig::default(),
    };
    Ok(config.apply_env()?)
}

// ============================================================================
// run
// ============================================================================

async fn run_eval_command(args: RunArgs) -> anyhow::Result<()> {
    let mut config = load_config(args.config.as_deref())?;
    if let Some(workers) = args.workers {
        config = config.with_max_workers(workers);
    }
    if let Some(profile) = args.profile {
        config = config.with_default_profile(profile);
    }
    config.validate()?;

    if args.metrics_out.is_some() {
        init_metrics()?;
    }

    let cases: Vec<Arc<CaseDefinition>> = discover_cases(&args.cases)?
        .into_iter()
        .map(Arc::new)
        .collect();
    if cases.is_empty() {
        anyhow::bail!("No cases found under {}", args.cases.display());
    }
    info!(cases = cases.len(), models = args.models.len(), "Loaded cases");

    let ledger = Arc::new(
        ResultLedger::open(
            &args.ledger,
            config.session.ledger_write_attempts,
            config.session.ledger_retry_backoff(),
        )
        .await?,
    );

    let costs = Arc::new(CostTracker::new());
    let mut evaluator = Evaluator::new(&config);
    if args.no_judges {
        warn!("Judges disabled; scores use execution and tests only");
    } else {
        let arbitrator = MultiJudgeArbitrator::from_config(&config.judges, Some(costs.clone()))?;
        info!(judges = arbitrator.judge_count(), "Judge panel ready");
        evaluator = evaluator.with_arbitrator(arbitrator);
    }

    let session = EvaluationSession::new(evaluator, ledger.clone(), config.session.clone())
        .with_cost_tracker(costs.clone());
    let jobs = build_jobs(&cases, &args.workspaces, &args.models);

    let outcome = session.run(jobs).await;
    let closed = ledger.close().await;
    let summary = outcome?;
    closed?;

    if let Some(path) = &args.metrics_out {
        fs::write(path, export_metrics())?;
        info!(path = %path.display(), "Wrote metrics");
    }

    if args.json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        print_session_summary(&summary, &costs);
    }
    Ok(())
}

fn print_session_summary(summary: &SessionSummary, costs: &CostTracker) {
    println!(
        "Evaluated {} of {} targets ({} skipped, {} gated, {} timed out) in {:.1}s",
        summary.evaluated,
        summary.total_jobs,
        summary.skipped,
        summary.gated,
        summary.timed_out,
        summary.duration.as_secs_f64()
    );
    if summary.failed_workers > 0 {
        println!("{} workers failed without a result", summary.failed_workers);
    }
    print_model_table(summary.per_model.iter());
    let report = costs.report();
    println!(
        "Judge spend: ${:.4} over {} calls",
        report.total_usd, report.calls
    );
}

fn print_model_table<'a>(rows: impl Iterator<Item = (&'a String, &'a ModelSummary)>) {
    for (model, row) in rows {
        println!(
            "  {:<40} runs={:<4} mean={:>6.2} gated={}",
            model, row.runs, row.mean_score, row.gated
        );
    }
}

// ============================================================================
// validate
// ============================================================================

#[derive(Debug, Serialize)]
struct ValidateOutput {
    workspace: PathBuf,
    kind: Option<ArtifactKind>,
    verdict: ExecutionVerdict,
    tests: Option<TestResult>,
    gated: bool,
    gate_reason: Option<String>,
}

async fn run_validate_command(args: ValidateArgs) -> anyhow::Result<()> {
    let config = load_config(args.config.as_deref())?;
    config.validate()?;

    if !args.workspace.is_dir() {
        anyhow::bail!("Workspace does not exist: {}", args.workspace.display());
    }
    let workspace = args.workspace.canonicalize()?;

    let suite = match &args.tests {
        Some(path) => Some(TestSuite::load(&path.canonicalize()?)?),
        None => None,
    };
    let case = CaseDefinition {
        id: workspace
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default(),
        dir: workspace.clone(),
        spec: String::new(),
        suite,
        kind: args.kind,
        rubric: Rubric::default(),
        timeout_profile: Some(args.profile),
    };

    let evaluator = Evaluator::new(&config);
    let (verdict, tests) = evaluator.validate_only(&case, &workspace).await;
    let gate_reason = ScoreAggregator::new(&config.scoring).gate(&verdict, tests.as_ref());

    let output = ValidateOutput {
        kind: case.resolve_kind(&workspace),
        workspace,
        verdict,
        tests,
        gated: gate_reason.is_some(),
        gate_reason,
    };

    if args.json {
        println!("{}", serde_json::to_string_pretty(&output)?);
        return Ok(());
    }

    println!(
        "{}: {}",
        output.workspace.display(),
        output.verdict.status
    );
    if let Some(detail) = &output.verdict.detail {
        println!("  detail: {}", detail);
    }
    for warning in &output.verdict.warnings {
        println!("  warning: {}", warning);
    }
    if !output.verdict.excerpt.is_empty() && !output.verdict.is_clean() {
        println!("  output:\n{}", output.verdict.excerpt);
    }
    match &output.tests {
        Some(tests) => {
            println!("  tests: {}/{} passed", tests.passed, tests.total);
            for case in tests.tests.iter().filter(|t| !t.passed) {
                println!(
                    "    FAIL {}: {}",
                    case.name,
                    case.error.as_deref().unwrap_or("failed")
                );
            }
        }
        None => println!("  tests: none"),
    }
    if let Some(reason) = &output.gate_reason {
        println!("  gate: {}", reason);
    }
    Ok(())
}

// ============================================================================
// summary
// ============================================================================

#[derive(Debug, Serialize)]
struct SummaryOutput {
    records: usize,
    skipped_lines: usize,
    truncated_tail: bool,
    models: std::collections::BTreeMap<String, ModelSummary>,
}

fn run_summary_command(args: SummaryArgs) -> anyhow::Result<()> {
    if !args.ledger.is_file() {
        anyhow::bail!("Ledger does not exist: {}", args.ledger.display());
    }
    let loaded = load_ledger(&args.ledger)?;
    let output = SummaryOutput {
        records: loaded.records.len(),
        skipped_lines: loaded.skipped_lines,
        truncated_tail: loaded.truncated_tail,
        models: summarize_results(&loaded.records),
    };

    if args.json {
        println!("{}", serde_json::to_string_pretty(&output)?);
        return Ok(());
    }

    println!("{} results in {}", output.records, args.ledger.display());
    if output.skipped_lines > 0 {
        println!(
            "{} unreadable lines skipped{}",
            output.skipped_lines,
            if output.truncated_tail {
                " (torn final line)"
            } else {
                ""
            }
        );
    }
    print_model_table(output.models.iter());
    Ok(())
}
