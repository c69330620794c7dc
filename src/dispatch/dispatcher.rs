//! Batch dispatcher with canary gating.

use std::time::Duration;

use futures::future::join_all;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

use crate::accounts::{Account, AccountPool};
use crate::credentials::TokenRefresher;
use crate::error::SelectionError;
use crate::harbor::invocation::variant_env;
use crate::harbor::{HarborInvocation, HarborRunner, RunVariant, TaskOutcome, TaskStatus};
use crate::selection::{SelectedTask, TaskSelection};

use super::config::BatchConfig;
use super::progress::{DispatchCounters, DispatchMonitor};

/// Output markers that indicate an infrastructure-level authentication
/// failure rather than a task-level one.
const AUTH_FAILURE_MARKERS: &[&str] = &[
    "authentication_error",
    "OAuth token has expired",
    "invalid x-api-key",
    "Credit balance is too low",
    "401 Unauthorized",
];

/// How often the background monitor logs batch progress.
const PROGRESS_INTERVAL: Duration = Duration::from_secs(60);

/// Errors that can abort a batch before or during dispatch.
#[derive(Debug, Error)]
pub enum DispatchError {
    /// The canary probe hit a systemic failure; the batch was not committed.
    #[error("Canary probe failed systemically: {0}")]
    CanaryFailed(String),

    /// Every account in the pool failed its token-health check.
    #[error("No usable accounts in the pool")]
    NoUsableAccounts,

    /// MCP runs were requested without a Sourcegraph access token.
    #[error("MCP variant requested but no Sourcegraph access token configured")]
    MissingSourcegraphToken,

    #[error("Selection error: {0}")]
    Selection(#[from] SelectionError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// One unit of dispatch: a selected task under one variant.
#[derive(Debug, Clone)]
struct Job {
    task: SelectedTask,
    variant: RunVariant,
}

/// Aggregate result of a batch run.
#[derive(Debug, Serialize, Deserialize)]
pub struct BatchSummary {
    pub batch_id: String,
    pub dry_run: bool,
    pub total: usize,
    pub completed: usize,
    pub failed: usize,
    pub timeout: usize,
    pub spawn_failed: usize,
    /// Mean reward over outcomes that produced one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mean_reward: Option<f64>,
    pub outcomes: Vec<TaskOutcome>,
}

impl BatchSummary {
    fn from_outcomes(batch_id: String, dry_run: bool, outcomes: Vec<TaskOutcome>) -> Self {
        let count = |status: TaskStatus| outcomes.iter().filter(|o| o.status == status).count();
        let rewards: Vec<f64> = outcomes.iter().filter_map(|o| o.reward).collect();
        let mean_reward = if rewards.is_empty() {
            None
        } else {
            Some(rewards.iter().sum::<f64>() / rewards.len() as f64)
        };
        Self {
            batch_id,
            dry_run,
            total: outcomes.len(),
            completed: count(TaskStatus::Completed),
            failed: count(TaskStatus::Failed),
            timeout: count(TaskStatus::Timeout),
            spawn_failed: count(TaskStatus::SpawnFailed),
            mean_reward,
            outcomes,
        }
    }
}

/// Dispatches a task selection across the account pool.
pub struct BatchDispatcher {
    config: BatchConfig,
    pool: AccountPool,
    refresher: TokenRefresher,
}

impl BatchDispatcher {
    pub fn new(config: BatchConfig, pool: AccountPool) -> Self {
        Self {
            config,
            pool,
            refresher: TokenRefresher::new(),
        }
    }

    /// Overrides the token refresher (tests point it at a local endpoint).
    pub fn with_refresher(mut self, refresher: TokenRefresher) -> Self {
        self.refresher = refresher;
        self
    }

    /// Runs the batch to completion.
    ///
    /// Aborts only on setup failure, a systemic canary failure, or a fully
    /// unusable account pool; individual task failures are recorded in the
    /// summary and the batch continues.
    pub async fn run(&self) -> Result<BatchSummary, DispatchError> {
        let mut selection = TaskSelection::load(&self.config.selection_path)?;
        if !self.config.benchmarks.is_empty() {
            selection.retain_benchmarks(&self.config.benchmarks);
        }
        if !self.config.task_ids.is_empty() {
            selection.retain_tasks(&self.config.task_ids);
        }
        if selection.is_empty() {
            return Err(SelectionError::Empty(selection.path().to_path_buf()).into());
        }
        selection.validate_task_dirs(&self.config.tasks_root)?;

        if self.config.variants.contains(&RunVariant::Mcp)
            && self.config.sourcegraph_token.is_none()
        {
            return Err(DispatchError::MissingSourcegraphToken);
        }

        let batch_id = format!("batch-{}", Uuid::new_v4());

        // tasks × variants, grouped per suite
        let job_groups: Vec<(String, Vec<Job>)> = selection
            .by_benchmark()
            .into_iter()
            .map(|(benchmark, tasks)| {
                let jobs = tasks
                    .iter()
                    .flat_map(|task| {
                        self.config.variants.iter().map(move |&variant| Job {
                            task: (*task).clone(),
                            variant,
                        })
                    })
                    .collect();
                (benchmark, jobs)
            })
            .collect();
        let total_jobs: usize = job_groups.iter().map(|(_, jobs)| jobs.len()).sum();

        info!(
            batch_id = %batch_id,
            total_jobs,
            suites = job_groups.len(),
            accounts = self.pool.len(),
            "Starting batch"
        );

        if self.config.dry_run {
            for (_, jobs) in &job_groups {
                for job in jobs {
                    println!(
                        "{}",
                        build_invocation(&self.config, &job.task, job.variant, None).render()
                    );
                }
            }
            return Ok(BatchSummary::from_outcomes(batch_id, true, Vec::new()));
        }

        std::fs::create_dir_all(&self.config.jobs_dir)?;

        let counters = DispatchCounters::new();
        let mut outcomes: Vec<TaskOutcome> = Vec::new();

        // Canary probe: commit to the batch only after one task survives.
        let canary_consumed = self.config.canary && total_jobs > 1;
        if canary_consumed {
            let healthy = self.pool.healthy_accounts(&self.refresher).await;
            let account = healthy.first().ok_or(DispatchError::NoUsableAccounts)?;
            let job = &job_groups[0].1[0];
            info!(task_id = %job.task.task_id, variant = %job.variant, "Running canary probe");

            let outcome =
                execute_job(self.config.clone(), job.clone(), account.clone(), counters.clone())
                    .await;
            if let Some(reason) = systemic_failure(&outcome) {
                return Err(DispatchError::CanaryFailed(reason));
            }
            info!(task_id = %outcome.task_id, status = %outcome.status, "Canary probe passed");
            outcomes.push(outcome);
        }

        let monitor = DispatchMonitor::start(counters.clone(), total_jobs, PROGRESS_INTERVAL);

        for (group_index, (benchmark, jobs)) in job_groups.iter().enumerate() {
            // Token health between suite batches; accounts that fail shrink
            // the pool for this suite instead of aborting.
            let healthy = self.pool.healthy_accounts(&self.refresher).await;
            if healthy.is_empty() {
                return Err(DispatchError::NoUsableAccounts);
            }

            let parallel = self
                .config
                .parallel
                .unwrap_or(healthy.len())
                .min(healthy.len())
                .max(1);

            let todo: &[Job] = if group_index == 0 && canary_consumed {
                &jobs[1..]
            } else {
                jobs
            };
            info!(
                benchmark = %benchmark,
                jobs = todo.len(),
                parallel,
                accounts = healthy.len(),
                "Dispatching suite"
            );

            let mut next_account = 0usize;
            for chunk in todo.chunks(parallel) {
                let mut handles = Vec::new();
                for job in chunk {
                    let account = healthy[next_account % healthy.len()].clone();
                    next_account += 1;
                    let config = self.config.clone();
                    let counters = counters.clone();
                    let job = job.clone();
                    handles.push(tokio::spawn(async move {
                        execute_job(config, job, account, counters).await
                    }));
                }
                for result in join_all(handles).await {
                    match result {
                        Ok(outcome) => outcomes.push(outcome),
                        Err(e) => warn!("Task panicked: {e}"),
                    }
                }
            }
        }

        monitor.stop().await;

        let summary = BatchSummary::from_outcomes(batch_id, false, outcomes);
        info!(
            batch_id = %summary.batch_id,
            total = summary.total,
            completed = summary.completed,
            failed = summary.failed + summary.timeout + summary.spawn_failed,
            mean_reward = ?summary.mean_reward,
            "Batch finished"
        );

        let summary_path = self.config.jobs_dir.join("batch-summary.json");
        match serde_json::to_string_pretty(&summary) {
            Ok(json) => {
                if let Err(e) = std::fs::write(&summary_path, json) {
                    warn!("Failed to write batch summary: {e}");
                }
            }
            Err(e) => warn!("Failed to serialize batch summary: {e}"),
        }

        Ok(summary)
    }
}

/// Builds the harbor invocation for one job.
fn build_invocation(
    config: &BatchConfig,
    task: &SelectedTask,
    variant: RunVariant,
    account: Option<&Account>,
) -> HarborInvocation {
    let task_path = config.tasks_root.join(&task.task_dir);
    let mut invocation = HarborInvocation::new(task_path.display().to_string(), task.dataset_name())
        .with_harbor_bin(config.harbor_bin.as_str())
        .with_jobs_dir(config.jobs_dir.join(variant.as_str()))
        .with_attempts(config.attempts)
        .with_agent(config.agent.as_str())
        .with_envs(variant_env(
            variant,
            &config.baseline_mcp_type,
            config.sourcegraph_token.as_deref(),
            task.repo_name.as_deref(),
        ));
    if let Some(account) = account {
        invocation = invocation.with_envs(account.env());
    }
    if let Some(model) = &config.model {
        invocation = invocation.with_model(model.as_str());
    }
    if let Some(multiplier) = task.timeout_multiplier.or(config.timeout_multiplier) {
        invocation = invocation.with_timeout_multiplier(multiplier);
    }
    invocation
}

/// Runs one job on one account and reads back its reward, best effort.
async fn execute_job(
    config: BatchConfig,
    job: Job,
    account: Account,
    counters: DispatchCounters,
) -> TaskOutcome {
    use std::sync::atomic::Ordering;

    counters.launched.fetch_add(1, Ordering::Relaxed);

    let invocation = build_invocation(&config, &job.task, job.variant, Some(&account));
    let runner = HarborRunner::new(config.timeout);
    let mut outcome = runner
        .run(
            &invocation,
            &job.task.task_id,
            &job.task.benchmark,
            job.variant,
            Some(&account.name),
        )
        .await;

    if outcome.is_success() {
        counters.completed.fetch_add(1, Ordering::Relaxed);
    } else {
        counters.failed.fetch_add(1, Ordering::Relaxed);
        warn!(
            task_id = %outcome.task_id,
            variant = %outcome.variant,
            status = %outcome.status,
            "Task run did not complete (continuing batch)"
        );
    }

    let variant_jobs_dir = config.jobs_dir.join(job.variant.as_str());
    outcome.reward = crate::results::latest_reward(&variant_jobs_dir, &job.task.task_id);
    if outcome.reward.is_some() {
        counters.rewarded.fetch_add(1, Ordering::Relaxed);
    }

    outcome
}

/// Classifies an outcome as a systemic (infrastructure) failure.
///
/// A clean exit with a bad reward is a model problem, not infrastructure,
/// and must not trip the canary.
fn systemic_failure(outcome: &TaskOutcome) -> Option<String> {
    match outcome.status {
        TaskStatus::SpawnFailed => Some(
            outcome
                .error
                .clone()
                .unwrap_or_else(|| "runner could not be spawned".to_string()),
        ),
        TaskStatus::Timeout => Some(format!(
            "canary timed out after {:.0}s",
            outcome.duration_secs
        )),
        _ => AUTH_FAILURE_MARKERS
            .iter()
            .find(|marker| outcome.log_tail.contains(**marker))
            .map(|marker| format!("authentication failure in output: {marker}")),
    }
}
