//! Configuration for batch dispatch.

use std::path::PathBuf;
use std::time::Duration;

use crate::harbor::invocation::{DEFAULT_AGENT, DEFAULT_HARBOR_BIN};
use crate::harbor::RunVariant;

/// Configuration for one batch run over a task selection.
#[derive(Debug, Clone)]
pub struct BatchConfig {
    /// Path to the task-selection manifest.
    pub selection_path: PathBuf,
    /// Root directory task_dir entries resolve against.
    pub tasks_root: PathBuf,
    /// Directory harbor run artifacts land in (one subdir per variant).
    pub jobs_dir: PathBuf,
    /// Variants to dispatch for every task.
    pub variants: Vec<RunVariant>,
    /// Restrict to these benchmark suites (empty = all).
    pub benchmarks: Vec<String>,
    /// Restrict to these task ids (empty = all).
    pub task_ids: Vec<String>,
    /// Concurrent harbor processes; `None` means one per pool account.
    pub parallel: Option<usize>,
    /// Attempt count passed to harbor (`-n`).
    pub attempts: u32,
    /// Orchestrator-side timeout per invocation.
    pub timeout: Duration,
    /// Batch-wide timeout multiplier (per-task overrides win).
    pub timeout_multiplier: Option<f64>,
    /// Model passed to the agent.
    pub model: Option<String>,
    /// Agent identifier passed to harbor.
    pub agent: String,
    /// Harbor executable.
    pub harbor_bin: String,
    /// `BASELINE_MCP_TYPE` value for baseline runs.
    pub baseline_mcp_type: String,
    /// Sourcegraph access token for MCP runs.
    pub sourcegraph_token: Option<String>,
    /// Print invocations instead of executing them.
    pub dry_run: bool,
    /// Run a canary probe before committing to the batch.
    pub canary: bool,
}

impl BatchConfig {
    /// Creates a configuration with defaults for the given manifest.
    pub fn new(selection_path: impl Into<PathBuf>) -> Self {
        Self {
            selection_path: selection_path.into(),
            tasks_root: PathBuf::from("."),
            jobs_dir: PathBuf::from("./jobs"),
            variants: RunVariant::all().to_vec(),
            benchmarks: Vec::new(),
            task_ids: Vec::new(),
            parallel: None,
            attempts: 1,
            timeout: Duration::from_secs(3600),
            timeout_multiplier: None,
            model: None,
            agent: DEFAULT_AGENT.to_string(),
            harbor_bin: DEFAULT_HARBOR_BIN.to_string(),
            baseline_mcp_type: "none".to_string(),
            sourcegraph_token: None,
            dry_run: false,
            canary: true,
        }
    }

    /// Sets the tasks root directory.
    pub fn with_tasks_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.tasks_root = root.into();
        self
    }

    /// Sets the jobs directory.
    pub fn with_jobs_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.jobs_dir = dir.into();
        self
    }

    /// Sets the variants to run.
    pub fn with_variants(mut self, variants: Vec<RunVariant>) -> Self {
        self.variants = variants;
        self
    }

    /// Restricts the batch to the given benchmark suites.
    pub fn with_benchmarks(mut self, benchmarks: Vec<String>) -> Self {
        self.benchmarks = benchmarks;
        self
    }

    /// Restricts the batch to the given task ids.
    pub fn with_task_ids(mut self, task_ids: Vec<String>) -> Self {
        self.task_ids = task_ids;
        self
    }

    /// Caps concurrent harbor processes.
    pub fn with_parallel(mut self, parallel: usize) -> Self {
        self.parallel = Some(parallel);
        self
    }

    /// Sets the attempt count.
    pub fn with_attempts(mut self, attempts: u32) -> Self {
        self.attempts = attempts;
        self
    }

    /// Sets the per-invocation timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Sets the batch-wide timeout multiplier.
    pub fn with_timeout_multiplier(mut self, multiplier: f64) -> Self {
        self.timeout_multiplier = Some(multiplier);
        self
    }

    /// Sets the model.
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    /// Sets the harbor executable.
    pub fn with_harbor_bin(mut self, bin: impl Into<String>) -> Self {
        self.harbor_bin = bin.into();
        self
    }

    /// Sets the `BASELINE_MCP_TYPE` value.
    pub fn with_baseline_mcp_type(mut self, mcp_type: impl Into<String>) -> Self {
        self.baseline_mcp_type = mcp_type.into();
        self
    }

    /// Sets the Sourcegraph access token.
    pub fn with_sourcegraph_token(mut self, token: impl Into<String>) -> Self {
        self.sourcegraph_token = Some(token.into());
        self
    }

    /// Enables dry-run mode.
    pub fn dry_run(mut self) -> Self {
        self.dry_run = true;
        self
    }

    /// Disables the canary probe.
    pub fn without_canary(mut self) -> Self {
        self.canary = false;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = BatchConfig::new("./selected_benchmark_tasks.json");
        assert_eq!(config.variants.len(), 2);
        assert_eq!(config.attempts, 1);
        assert_eq!(config.timeout, Duration::from_secs(3600));
        assert!(config.canary);
        assert!(!config.dry_run);
        assert!(config.parallel.is_none());
        assert_eq!(config.agent, "claude-code");
        assert_eq!(config.harbor_bin, "harbor");
        assert_eq!(config.baseline_mcp_type, "none");
    }

    #[test]
    fn test_builder() {
        let config = BatchConfig::new("sel.json")
            .with_jobs_dir("/tmp/jobs")
            .with_variants(vec![RunVariant::Baseline])
            .with_parallel(4)
            .with_attempts(3)
            .with_model("claude-sonnet-4-5")
            .with_sourcegraph_token("sgp_x")
            .dry_run()
            .without_canary();

        assert_eq!(config.jobs_dir, PathBuf::from("/tmp/jobs"));
        assert_eq!(config.variants, vec![RunVariant::Baseline]);
        assert_eq!(config.parallel, Some(4));
        assert_eq!(config.attempts, 3);
        assert!(config.dry_run);
        assert!(!config.canary);
    }
}
