//! Process supervision for harbor invocations.

use std::path::PathBuf;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::process::Command;
use tracing::{debug, info, warn};

use super::invocation::{HarborInvocation, RunVariant};

/// How much captured output each outcome keeps in memory.
const LOG_TAIL_CHARS: usize = 4000;

/// Terminal state of one harbor invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Process exited zero.
    Completed,
    /// Process exited non-zero.
    Failed,
    /// Killed after the orchestrator-side timeout.
    Timeout,
    /// The harbor process could not be started at all.
    SpawnFailed,
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskStatus::Completed => write!(f, "completed"),
            TaskStatus::Failed => write!(f, "failed"),
            TaskStatus::Timeout => write!(f, "timeout"),
            TaskStatus::SpawnFailed => write!(f, "spawn_failed"),
        }
    }
}

/// Result record for one task × variant invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskOutcome {
    pub task_id: String,
    pub benchmark: String,
    pub variant: RunVariant,
    /// Account the run was dispatched on, when pooled.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub account: Option<String>,
    pub status: TaskStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    /// Reward read back from the run directory, when one was produced.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reward: Option<f64>,
    pub started_at: DateTime<Utc>,
    pub duration_secs: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_path: Option<PathBuf>,
    /// Tail of the combined output, kept for systemic-failure probes.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub log_tail: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl TaskOutcome {
    /// True when the process ran to completion with exit code zero.
    pub fn is_success(&self) -> bool {
        self.status == TaskStatus::Completed
    }
}

/// Spawns harbor invocations under a timeout and tees their output to
/// per-task log files.
#[derive(Debug, Clone)]
pub struct HarborRunner {
    timeout: Duration,
}

impl HarborRunner {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    /// Runs one invocation to completion.
    ///
    /// Process failure, non-zero exit, and timeout are all recorded in the
    /// returned outcome rather than propagated: a single task failure must
    /// never abort a batch.
    pub async fn run(
        &self,
        invocation: &HarborInvocation,
        task_id: &str,
        benchmark: &str,
        variant: RunVariant,
        account: Option<&str>,
    ) -> TaskOutcome {
        let started_at = Utc::now();
        let start = Instant::now();

        let mut outcome = TaskOutcome {
            task_id: task_id.to_string(),
            benchmark: benchmark.to_string(),
            variant,
            account: account.map(str::to_string),
            status: TaskStatus::SpawnFailed,
            exit_code: None,
            reward: None,
            started_at,
            duration_secs: 0.0,
            log_path: None,
            log_tail: String::new(),
            error: None,
        };

        debug!(task_id, variant = %variant, "harbor {}", invocation.args().join(" "));

        let mut command = Command::new(invocation.harbor_bin());
        command
            .args(invocation.args())
            .envs(invocation.env().iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .kill_on_drop(true);

        let result = tokio::time::timeout(self.timeout, command.output()).await;
        outcome.duration_secs = start.elapsed().as_secs_f64();

        match result {
            Ok(Ok(output)) => {
                let stdout = String::from_utf8_lossy(&output.stdout);
                let stderr = String::from_utf8_lossy(&output.stderr);
                let combined = format!("{stdout}\n{stderr}");

                outcome.log_path = self.tee_log(invocation, task_id, variant, &combined);
                outcome.log_tail = tail(&combined, LOG_TAIL_CHARS);
                outcome.exit_code = output.status.code();

                if output.status.success() {
                    outcome.status = TaskStatus::Completed;
                    info!(
                        task_id,
                        variant = %variant,
                        duration_secs = format!("{:.1}", outcome.duration_secs),
                        "Task run completed"
                    );
                } else {
                    outcome.status = TaskStatus::Failed;
                    outcome.error = Some(format!(
                        "harbor exited with code {}",
                        outcome.exit_code.unwrap_or(-1)
                    ));
                    warn!(
                        task_id,
                        variant = %variant,
                        exit_code = outcome.exit_code.unwrap_or(-1),
                        "Task run failed"
                    );
                }
            }
            Ok(Err(e)) => {
                outcome.status = TaskStatus::SpawnFailed;
                outcome.error = Some(format!(
                    "failed to spawn {}: {e}",
                    invocation.harbor_bin()
                ));
                warn!(task_id, variant = %variant, "Failed to spawn harbor: {e}");
            }
            Err(_) => {
                outcome.status = TaskStatus::Timeout;
                outcome.error = Some(format!("timed out after {:?}", self.timeout));
                warn!(task_id, variant = %variant, timeout = ?self.timeout, "Task run timed out");
            }
        }

        outcome
    }

    /// Writes the combined output under `<jobs_dir>/logs/`.
    fn tee_log(
        &self,
        invocation: &HarborInvocation,
        task_id: &str,
        variant: RunVariant,
        combined: &str,
    ) -> Option<PathBuf> {
        let log_dir = invocation.jobs_dir().join("logs");
        if let Err(e) = std::fs::create_dir_all(&log_dir) {
            warn!(task_id, "Failed to create log directory: {e}");
            return None;
        }
        let safe_id = task_id.replace(['/', ' '], "_");
        let log_path = log_dir.join(format!("{safe_id}.{variant}.log"));
        match std::fs::write(&log_path, combined) {
            Ok(()) => Some(log_path),
            Err(e) => {
                warn!(task_id, "Failed to write log file: {e}");
                None
            }
        }
    }
}

/// Last `max` characters of `s`, on a char boundary.
fn tail(s: &str, max: usize) -> String {
    if s.len() <= max {
        return s.to_string();
    }
    let mut start = s.len() - max;
    while !s.is_char_boundary(start) {
        start += 1;
    }
    s[start..].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_tail_short() {
        assert_eq!(tail("hello", 10), "hello");
    }

    #[test]
    fn test_tail_truncates_front() {
        assert_eq!(tail("0123456789", 4), "6789");
    }

    #[test]
    fn test_tail_unicode_boundary() {
        let s = "héllo wörld";
        let t = tail(s, 5);
        assert!(t.len() <= 6);
        assert!(s.ends_with(&t));
    }

    #[test]
    fn test_status_display() {
        assert_eq!(TaskStatus::Completed.to_string(), "completed");
        assert_eq!(TaskStatus::Failed.to_string(), "failed");
        assert_eq!(TaskStatus::Timeout.to_string(), "timeout");
        assert_eq!(TaskStatus::SpawnFailed.to_string(), "spawn_failed");
    }

    #[test]
    fn test_outcome_serialization_skips_empty() {
        let outcome = TaskOutcome {
            task_id: "t1".to_string(),
            benchmark: "b".to_string(),
            variant: RunVariant::Baseline,
            account: None,
            status: TaskStatus::Completed,
            exit_code: Some(0),
            reward: Some(1.0),
            started_at: Utc::now(),
            duration_secs: 2.0,
            log_path: None,
            log_tail: String::new(),
            error: None,
        };
        let json = serde_json::to_string(&outcome).unwrap();
        assert!(json.contains("\"completed\""));
        assert!(!json.contains("log_tail"));
        assert!(!json.contains("account"));
    }

    #[tokio::test]
    async fn test_run_spawn_failure() {
        let temp = TempDir::new().unwrap();
        let inv = super::super::HarborInvocation::new("tasks/t", "ds")
            .with_harbor_bin(temp.path().join("does-not-exist").display().to_string())
            .with_jobs_dir(temp.path().join("jobs"));
        let runner = HarborRunner::new(Duration::from_secs(5));
        let outcome = runner.run(&inv, "t1", "bench", RunVariant::Baseline, None).await;
        assert_eq!(outcome.status, TaskStatus::SpawnFailed);
        assert!(outcome.error.as_deref().unwrap().contains("failed to spawn"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_run_captures_output_and_tees_log() {
        let temp = TempDir::new().unwrap();
        let jobs = temp.path().join("jobs");
        // Stub harbor: succeeds and echoes its argv
        let bin = temp.path().join("harbor-stub");
        std::fs::write(&bin, "#!/bin/sh\necho \"stub ran: $@\"\n").unwrap();
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&bin, std::fs::Permissions::from_mode(0o755)).unwrap();
        }

        let inv = super::super::HarborInvocation::new("tasks/t", "ds")
            .with_harbor_bin(bin.display().to_string())
            .with_jobs_dir(&jobs);
        let runner = HarborRunner::new(Duration::from_secs(10));
        let outcome = runner.run(&inv, "t1", "bench", RunVariant::Mcp, Some("acct-a")).await;

        assert_eq!(outcome.status, TaskStatus::Completed);
        assert_eq!(outcome.exit_code, Some(0));
        assert!(outcome.log_tail.contains("stub ran"));
        assert_eq!(outcome.account.as_deref(), Some("acct-a"));

        let log_path = outcome.log_path.expect("log should be written");
        assert!(log_path.ends_with("logs/t1.mcp.log"));
        let content = std::fs::read_to_string(log_path).unwrap();
        assert!(content.contains("--dataset ds"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_run_timeout() {
        let temp = TempDir::new().unwrap();
        let bin = temp.path().join("harbor-slow");
        std::fs::write(&bin, "#!/bin/sh\nsleep 30\n").unwrap();
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&bin, std::fs::Permissions::from_mode(0o755)).unwrap();
        }

        let inv = super::super::HarborInvocation::new("tasks/t", "ds")
            .with_harbor_bin(bin.display().to_string())
            .with_jobs_dir(temp.path().join("jobs"));
        let runner = HarborRunner::new(Duration::from_millis(200));
        let outcome = runner.run(&inv, "t1", "bench", RunVariant::Baseline, None).await;
        assert_eq!(outcome.status, TaskStatus::Timeout);
    }
}
