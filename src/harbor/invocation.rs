//! Command-line construction for `harbor run`.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Default harbor executable name (resolved via PATH).
pub const DEFAULT_HARBOR_BIN: &str = "harbor";

/// Default agent identifier passed to harbor.
pub const DEFAULT_AGENT: &str = "claude-code";

/// Which tool configuration a run uses.
///
/// Baseline runs expose the agent's built-in tools only; MCP runs add the
/// Sourcegraph code-search integration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunVariant {
    Baseline,
    Mcp,
}

impl RunVariant {
    /// Both variants in dispatch order.
    pub fn all() -> [RunVariant; 2] {
        [RunVariant::Baseline, RunVariant::Mcp]
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RunVariant::Baseline => "baseline",
            RunVariant::Mcp => "mcp",
        }
    }
}

impl std::fmt::Display for RunVariant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Per-variant environment exported to the harbor process.
///
/// Baseline runs pin `BASELINE_MCP_TYPE`; MCP runs inject the Sourcegraph
/// access token and the per-task repository-name override.
pub fn variant_env(
    variant: RunVariant,
    baseline_mcp_type: &str,
    sourcegraph_token: Option<&str>,
    repo_name: Option<&str>,
) -> Vec<(String, String)> {
    match variant {
        RunVariant::Baseline => vec![(
            "BASELINE_MCP_TYPE".to_string(),
            baseline_mcp_type.to_string(),
        )],
        RunVariant::Mcp => {
            let mut env = Vec::new();
            if let Some(token) = sourcegraph_token {
                env.push(("SOURCEGRAPH_ACCESS_TOKEN".to_string(), token.to_string()));
            }
            if let Some(repo) = repo_name {
                env.push(("SOURCEGRAPH_REPO_NAME".to_string(), repo.to_string()));
            }
            env
        }
    }
}

/// Builder for a single `harbor run` invocation.
#[derive(Debug, Clone)]
pub struct HarborInvocation {
    harbor_bin: String,
    task_dir: String,
    dataset: String,
    jobs_dir: PathBuf,
    attempts: u32,
    timeout_multiplier: Option<f64>,
    agent: String,
    model: Option<String>,
    env: Vec<(String, String)>,
}

impl HarborInvocation {
    /// Creates an invocation for a task directory and dataset with defaults.
    pub fn new(task_dir: impl Into<String>, dataset: impl Into<String>) -> Self {
        Self {
            harbor_bin: DEFAULT_HARBOR_BIN.to_string(),
            task_dir: task_dir.into(),
            dataset: dataset.into(),
            jobs_dir: PathBuf::from("./jobs"),
            attempts: 1,
            timeout_multiplier: None,
            agent: DEFAULT_AGENT.to_string(),
            model: None,
            env: Vec::new(),
        }
    }

    /// Overrides the harbor executable path.
    pub fn with_harbor_bin(mut self, bin: impl Into<String>) -> Self {
        self.harbor_bin = bin.into();
        self
    }

    /// Sets the jobs directory harbor writes run artifacts into.
    pub fn with_jobs_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.jobs_dir = dir.into();
        self
    }

    /// Sets the attempt count (`-n`).
    pub fn with_attempts(mut self, attempts: u32) -> Self {
        self.attempts = attempts;
        self
    }

    /// Sets the timeout multiplier.
    pub fn with_timeout_multiplier(mut self, multiplier: f64) -> Self {
        self.timeout_multiplier = Some(multiplier);
        self
    }

    /// Sets the agent identifier.
    pub fn with_agent(mut self, agent: impl Into<String>) -> Self {
        self.agent = agent.into();
        self
    }

    /// Sets the model passed to the agent.
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    /// Adds one environment variable.
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    /// Extends the environment from an iterator.
    pub fn with_envs(mut self, vars: impl IntoIterator<Item = (String, String)>) -> Self {
        self.env.extend(vars);
        self
    }

    pub fn harbor_bin(&self) -> &str {
        &self.harbor_bin
    }

    pub fn jobs_dir(&self) -> &Path {
        &self.jobs_dir
    }

    pub fn env(&self) -> &[(String, String)] {
        &self.env
    }

    /// Arguments after the executable: `run --path ... --dataset ...`.
    pub fn args(&self) -> Vec<String> {
        let mut args = vec![
            "run".to_string(),
            "--path".to_string(),
            self.task_dir.clone(),
            "--dataset".to_string(),
            self.dataset.clone(),
            "--jobs-dir".to_string(),
            self.jobs_dir.display().to_string(),
            "-n".to_string(),
            self.attempts.to_string(),
            "--agent".to_string(),
            self.agent.clone(),
        ];
        if let Some(model) = &self.model {
            args.push("--model".to_string());
            args.push(model.clone());
        }
        if let Some(multiplier) = self.timeout_multiplier {
            args.push("--timeout-multiplier".to_string());
            args.push(multiplier.to_string());
        }
        args
    }

    /// Printable form of the full invocation for `--dry-run` output.
    ///
    /// Secret-bearing variables (tokens, keys) are masked.
    pub fn render(&self) -> String {
        let mut parts = Vec::new();
        for (key, value) in &self.env {
            let shown = if key.contains("TOKEN") || key.contains("KEY") {
                "***"
            } else {
                value.as_str()
            };
            parts.push(format!("{key}={shown}"));
        }
        parts.push(self.harbor_bin.clone());
        parts.extend(self.args());
        parts.join(" ")
    }
}
