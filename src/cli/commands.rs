//! CLI command definitions for harbor-bench.
//!
//! This module provides the command-line surface for dispatching benchmark
//! batches through harbor and post-processing their rewards.

use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::Parser;
use tracing::{info, warn};

use crate::accounts::AccountPool;
use crate::credentials::{CredentialsStore, TokenRefresher, DEFAULT_REFRESH_MARGIN_SECS};
use crate::dispatch::{BatchConfig, BatchDispatcher};
use crate::harbor::RunVariant;
use crate::selection::TaskSelection;
use crate::{report, results};

/// Default task-selection manifest path.
const DEFAULT_SELECTION: &str = "./selected_benchmark_tasks.json";

/// Default jobs directory for harbor run artifacts.
const DEFAULT_JOBS_DIR: &str = "./jobs";

/// Default output path for the Markdown evaluation report.
const DEFAULT_REPORT_PATH: &str = "./evaluation_report.md";

/// Benchmark orchestration for agent evaluation via harbor.
#[derive(Parser)]
#[command(name = "harbor-bench")]
#[command(about = "Run a coding agent across benchmark task suites via harbor")]
#[command(version)]
#[command(
    long_about = "harbor-bench dispatches a selected set of benchmark tasks through the external\nharbor runner, in baseline and MCP (code-search) configurations, and aggregates\nthe resulting rewards into Markdown reports.\n\nExample usage:\n  harbor-bench run --selection ./selected_benchmark_tasks.json --jobs-dir ./jobs\n  harbor-bench report --jobs-dir ./jobs -o ./evaluation_report.md"
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
    /// Dispatch the selected tasks through harbor.
    ///
    /// Iterates tasks × variants, runs a canary probe before committing to
    /// the batch, and parallelizes across the account pool.
    Run(Box<RunArgs>),

    /// Check or force an OAuth credential refresh.
    Refresh(RefreshArgs),

    /// Validate that every task directory in the selection exists on disk.
    Validate(ValidateArgs),

    /// Aggregate rewards from a jobs directory into a Markdown report.
    Report(ReportArgs),
}

/// Arguments for `harbor-bench run`.
#[derive(Parser, Debug)]
pub struct RunArgs {
    /// Task-selection manifest.
    #[arg(short = 's', long, default_value = DEFAULT_SELECTION)]
    pub selection: String,

    /// Root directory task_dir entries resolve against.
    #[arg(long, default_value = ".")]
    pub tasks_root: String,

    /// Directory harbor writes run artifacts into (one subdir per variant).
    #[arg(short = 'j', long, default_value = DEFAULT_JOBS_DIR)]
    pub jobs_dir: String,

    /// Only run the baseline (no code-search) configuration.
    #[arg(long, conflicts_with = "full_only")]
    pub baseline_only: bool,

    /// Only run the full (Sourcegraph MCP) configuration.
    #[arg(long)]
    pub full_only: bool,

    /// Model passed to the agent.
    #[arg(short = 'm', long)]
    pub model: Option<String>,

    /// Concurrent harbor processes (default: one per account).
    #[arg(short = 'p', long)]
    pub parallel: Option<usize>,

    /// Attempt count per task passed to harbor (-n).
    #[arg(short = 'n', long, default_value = "1")]
    pub attempts: u32,

    /// Timeout multiplier passed to harbor (per-task manifest values win).
    #[arg(long)]
    pub timeout_multiplier: Option<f64>,

    /// Orchestrator-side timeout per invocation, in seconds.
    #[arg(long, default_value = "3600")]
    pub timeout_secs: u64,

    /// Restrict to these benchmark suites (repeatable).
    #[arg(long = "benchmark")]
    pub benchmarks: Vec<String>,

    /// Restrict to these task ids (repeatable).
    #[arg(long = "task")]
    pub tasks: Vec<String>,

    /// Print invocations without executing them.
    #[arg(long)]
    pub dry_run: bool,

    /// Skip the canary probe and commit to the batch immediately.
    #[arg(long)]
    pub no_canary: bool,

    /// Harbor executable.
    #[arg(long, default_value = "harbor")]
    pub harbor_bin: String,

    /// MCP type exported to baseline runs.
    #[arg(long, env = "BASELINE_MCP_TYPE", default_value = "none")]
    pub baseline_mcp_type: String,

    /// Sourcegraph access token for MCP runs.
    #[arg(long, env = "SOURCEGRAPH_ACCESS_TOKEN")]
    pub sourcegraph_token: Option<String>,

    /// API key for the default single-account pool (subscription OAuth
    /// credentials are used when absent).
    #[arg(long, env = "ANTHROPIC_API_KEY")]
    pub api_key: Option<String>,

    /// Additional account as name=credentials_path (repeatable).
    #[arg(long = "account")]
    pub accounts: Vec<String>,

    /// YAML account pool file (overrides --account).
    #[arg(long)]
    pub accounts_file: Option<String>,

    /// Refresh OAuth tokens when less than this many seconds remain.
    #[arg(long, default_value_t = DEFAULT_REFRESH_MARGIN_SECS)]
    pub refresh_margin_secs: i64,
}

/// Arguments for `harbor-bench refresh`.
#[derive(Parser, Debug)]
pub struct RefreshArgs {
    /// Credentials file (default: ~/.claude/.credentials.json).
    #[arg(short = 'c', long)]
    pub credentials: Option<String>,

    /// Refresh even when the token is still inside its validity window.
    #[arg(long)]
    pub force: bool,

    /// Refresh margin in seconds.
    #[arg(long, default_value_t = DEFAULT_REFRESH_MARGIN_SECS)]
    pub margin_secs: i64,
}

/// Arguments for `harbor-bench validate`.
#[derive(Parser, Debug)]
pub struct ValidateArgs {
    /// Task-selection manifest.
    #[arg(short = 's', long, default_value = DEFAULT_SELECTION)]
    pub selection: String,

    /// Root directory task_dir entries resolve against.
    #[arg(long, default_value = ".")]
    pub tasks_root: String,
}

/// Arguments for `harbor-bench report`.
#[derive(Parser, Debug)]
pub struct ReportArgs {
    /// Jobs directory to collect rewards from.
    #[arg(short = 'j', long, default_value = DEFAULT_JOBS_DIR)]
    pub jobs_dir: String,

    /// Selection manifest used to map task ids back to benchmarks.
    #[arg(short = 's', long)]
    pub selection: Option<String>,

    /// Output path for the Markdown report.
    #[arg(short = 'o', long, default_value = DEFAULT_REPORT_PATH)]
    pub output: String,

    /// External statistics script invoked once per result directory.
    #[arg(long)]
    pub stats_script: Option<String>,
}

/// Parse CLI arguments.
pub fn parse_cli() -> Cli {
    Cli::parse()
}

/// Run the CLI with pre-parsed arguments.
pub async fn run_with_cli(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Commands::Run(args) => cmd_run(*args).await,
        Commands::Refresh(args) => cmd_refresh(args).await,
        Commands::Validate(args) => cmd_validate(args),
        Commands::Report(args) => cmd_report(args).await,
    }
}

async fn cmd_run(args: RunArgs) -> anyhow::Result<()> {
    let pool = if let Some(file) = &args.accounts_file {
        AccountPool::from_yaml_file(file)?
    } else if !args.accounts.is_empty() {
        AccountPool::from_specs(&args.accounts)?
    } else {
        AccountPool::single(args.api_key.clone())
    };

    let variants = if args.baseline_only {
        vec![RunVariant::Baseline]
    } else if args.full_only {
        vec![RunVariant::Mcp]
    } else {
        RunVariant::all().to_vec()
    };

    let mut config = BatchConfig::new(&args.selection)
        .with_tasks_root(&args.tasks_root)
        .with_jobs_dir(&args.jobs_dir)
        .with_variants(variants)
        .with_benchmarks(args.benchmarks.clone())
        .with_task_ids(args.tasks.clone())
        .with_attempts(args.attempts)
        .with_timeout(Duration::from_secs(args.timeout_secs))
        .with_harbor_bin(args.harbor_bin.as_str())
        .with_baseline_mcp_type(args.baseline_mcp_type.as_str());
    if let Some(parallel) = args.parallel {
        config = config.with_parallel(parallel);
    }
    if let Some(multiplier) = args.timeout_multiplier {
        config = config.with_timeout_multiplier(multiplier);
    }
    if let Some(model) = &args.model {
        config = config.with_model(model.as_str());
    }
    if let Some(token) = &args.sourcegraph_token {
        config = config.with_sourcegraph_token(token.as_str());
    }
    if args.dry_run {
        config = config.dry_run();
    }
    if args.no_canary {
        config = config.without_canary();
    }

    let refresher = TokenRefresher::new().with_margin_secs(args.refresh_margin_secs);
    let dispatcher = BatchDispatcher::new(config, pool).with_refresher(refresher);
    let summary = dispatcher.run().await?;

    if summary.dry_run {
        return Ok(());
    }

    println!("\n📊 Batch Summary");
    println!("================");
    println!("Batch id:  {}", summary.batch_id);
    println!("Total:     {}", summary.total);
    println!("Completed: {}", summary.completed);
    println!(
        "Failed:    {}",
        summary.failed + summary.timeout + summary.spawn_failed
    );
    match summary.mean_reward {
        Some(mean) => println!("Mean reward: {mean:.3}"),
        None => println!("Mean reward: n/a (no rewards collected)"),
    }

    Ok(())
}

async fn cmd_refresh(args: RefreshArgs) -> anyhow::Result<()> {
    let store = match args.credentials {
        Some(path) => CredentialsStore::new(PathBuf::from(path)),
        None => CredentialsStore::default_location(),
    };
    let refresher = TokenRefresher::new().with_margin_secs(args.margin_secs);

    if args.force {
        let refreshed = refresher.refresh(&store).await?;
        println!(
            "✓ Refreshed token for {} (expires {})",
            store.path().display(),
            refreshed.expires_at_utc()
        );
        return Ok(());
    }

    let refreshed = refresher.ensure_fresh(&store).await?;
    let file = store.load()?;
    let remaining = file
        .claude_ai_oauth
        .remaining_validity_secs(chrono::Utc::now());
    if refreshed {
        println!(
            "✓ Token refreshed, {}s of validity remaining",
            remaining.max(0)
        );
    } else {
        println!(
            "✓ Token still valid for {}s (margin {}s), no refresh needed",
            remaining.max(0),
            args.margin_secs
        );
    }
    Ok(())
}

fn cmd_validate(args: ValidateArgs) -> anyhow::Result<()> {
    let selection = TaskSelection::load(&args.selection)?;
    match selection.validate_task_dirs(Path::new(&args.tasks_root)) {
        Ok(()) => {
            println!(
                "✓ All {} task directories from {} exist",
                selection.len(),
                args.selection
            );
            Ok(())
        }
        Err(e) => {
            eprintln!("✗ {e}");
            Err(e.into())
        }
    }
}

async fn cmd_report(args: ReportArgs) -> anyhow::Result<()> {
    let selection = match &args.selection {
        Some(path) => Some(TaskSelection::load(path)?),
        None => None,
    };

    let records = results::collect(Path::new(&args.jobs_dir), selection.as_ref())?;
    if records.is_empty() {
        warn!(jobs_dir = %args.jobs_dir, "No rewards found under jobs directory");
    }
    let rows = results::summarize(&records);
    report::write_markdown(&records, &rows, Path::new(&args.output))?;

    if let Some(script) = &args.stats_script {
        let dirs = report::result_dirs(&records);
        let succeeded = report::run_external_stats(Path::new(script), &dirs).await?;
        info!(succeeded, total = dirs.len(), "Stats script pass done");
    }

    println!("📁 Report written to {}", args.output);
    for row in &rows {
        println!(
            "  {} / {}: {} runs, {} resolved, mean reward {:.3}",
            row.benchmark,
            row.variant.map(|v| v.as_str()).unwrap_or("-"),
            row.count,
            row.resolved,
            row.mean_reward
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_parses() {
        // Verify CLI definition is valid
        Cli::command().debug_assert();
    }

    #[test]
    fn test_run_command_defaults() {
        let cli = Cli::try_parse_from(["harbor-bench", "run"]).expect("should parse");
        match cli.command {
            Commands::Run(args) => {
                assert_eq!(args.selection, DEFAULT_SELECTION);
                assert_eq!(args.jobs_dir, DEFAULT_JOBS_DIR);
                assert_eq!(args.attempts, 1);
                assert_eq!(args.timeout_secs, 3600);
                assert!(!args.baseline_only);
                assert!(!args.full_only);
                assert!(!args.dry_run);
                assert!(!args.no_canary);
                assert!(args.parallel.is_none());
                assert_eq!(args.refresh_margin_secs, DEFAULT_REFRESH_MARGIN_SECS);
            }
            _ => panic!("Expected Run command"),
        }
    }

    #[test]
    fn test_run_command_with_all_options() {
        let cli = Cli::try_parse_from([
            "harbor-bench",
            "run",
            "-s",
            "./sel.json",
            "-j",
            "/tmp/jobs",
            "--baseline-only",
            "-m",
            "claude-sonnet-4-5",
            "-p",
            "4",
            "-n",
            "3",
            "--timeout-multiplier",
            "2.0",
            "--benchmark",
            "swe-bench-verified",
            "--task",
            "astropy-1",
            "--task",
            "django-2",
            "--dry-run",
            "--no-canary",
            "--account",
            "alpha=/home/u/.claude-alpha/.credentials.json",
        ])
        .expect("should parse");

        match cli.command {
            Commands::Run(args) => {
                assert_eq!(args.selection, "./sel.json");
                assert_eq!(args.jobs_dir, "/tmp/jobs");
                assert!(args.baseline_only);
                assert_eq!(args.model.as_deref(), Some("claude-sonnet-4-5"));
                assert_eq!(args.parallel, Some(4));
                assert_eq!(args.attempts, 3);
                assert_eq!(args.timeout_multiplier, Some(2.0));
                assert_eq!(args.benchmarks, vec!["swe-bench-verified"]);
                assert_eq!(args.tasks, vec!["astropy-1", "django-2"]);
                assert!(args.dry_run);
                assert!(args.no_canary);
                assert_eq!(args.accounts.len(), 1);
            }
            _ => panic!("Expected Run command"),
        }
    }

    #[test]
    fn test_baseline_and_full_conflict() {
        let result =
            Cli::try_parse_from(["harbor-bench", "run", "--baseline-only", "--full-only"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_refresh_command() {
        let cli = Cli::try_parse_from([
            "harbor-bench",
            "refresh",
            "-c",
            "/tmp/.credentials.json",
            "--force",
        ])
        .expect("should parse");
        match cli.command {
            Commands::Refresh(args) => {
                assert_eq!(args.credentials.as_deref(), Some("/tmp/.credentials.json"));
                assert!(args.force);
                assert_eq!(args.margin_secs, DEFAULT_REFRESH_MARGIN_SECS);
            }
            _ => panic!("Expected Refresh command"),
        }
    }

    #[test]
    fn test_validate_command_defaults() {
        let cli = Cli::try_parse_from(["harbor-bench", "validate"]).expect("should parse");
        match cli.command {
            Commands::Validate(args) => {
                assert_eq!(args.selection, DEFAULT_SELECTION);
                assert_eq!(args.tasks_root, ".");
            }
            _ => panic!("Expected Validate command"),
        }
    }

    #[test]
    fn test_report_command() {
        let cli = Cli::try_parse_from([
            "harbor-bench",
            "report",
            "-j",
            "/tmp/jobs",
            "-s",
            "./sel.json",
            "-o",
            "./report.md",
            "--stats-script",
            "./scripts/stats.py",
        ])
        .expect("should parse");
        match cli.command {
            Commands::Report(args) => {
                assert_eq!(args.jobs_dir, "/tmp/jobs");
                assert_eq!(args.selection.as_deref(), Some("./sel.json"));
                assert_eq!(args.output, "./report.md");
                assert_eq!(args.stats_script.as_deref(), Some("./scripts/stats.py"));
            }
            _ => panic!("Expected Report command"),
        }
    }
}
