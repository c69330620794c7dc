//! Task-selection manifest.
//!
//! Batch runs are driven by a JSON manifest (`selected_benchmark_tasks.json`)
//! holding an array of selected tasks, each naming its benchmark suite, task
//! id, and on-disk task directory. The manifest is produced by external
//! selection tooling; this module only consumes it.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::SelectionError;

/// One entry of the task-selection manifest.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SelectedTask {
    /// Benchmark suite this task belongs to (e.g. "swe-bench-verified").
    pub benchmark: String,
    /// Task identifier within the suite.
    pub task_id: String,
    /// Directory holding the task definition, relative to the selection root.
    pub task_dir: String,
    /// Dataset name to pass to the runner; defaults to the benchmark name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dataset: Option<String>,
    /// Repository-name override exported to the code-search integration.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repo_name: Option<String>,
    /// Per-task timeout multiplier override.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_multiplier: Option<f64>,
    /// Manifest fields we do not interpret.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl SelectedTask {
    /// Dataset to pass to the runner (`dataset` field or the benchmark name).
    pub fn dataset_name(&self) -> &str {
        self.dataset.as_deref().unwrap_or(&self.benchmark)
    }
}

/// The parsed task-selection manifest.
#[derive(Debug, Clone)]
pub struct TaskSelection {
    tasks: Vec<SelectedTask>,
    path: PathBuf,
}

impl TaskSelection {
    /// Loads and parses a selection manifest.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, SelectionError> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(SelectionError::NotFound(path.to_path_buf()));
        }
        let content = std::fs::read_to_string(path)?;
        let tasks: Vec<SelectedTask> = serde_json::from_str(&content)?;
        if tasks.is_empty() {
            return Err(SelectionError::Empty(path.to_path_buf()));
        }
        Ok(Self {
            tasks,
            path: path.to_path_buf(),
        })
    }

    /// Path the manifest was loaded from.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// All selected tasks in manifest order.
    pub fn tasks(&self) -> &[SelectedTask] {
        &self.tasks
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Keeps only tasks from the given benchmark suites.
    pub fn retain_benchmarks(&mut self, benchmarks: &[String]) {
        self.tasks.retain(|t| benchmarks.contains(&t.benchmark));
    }

    /// Keeps only tasks with the given ids.
    pub fn retain_tasks(&mut self, task_ids: &[String]) {
        self.tasks.retain(|t| task_ids.contains(&t.task_id));
    }

    /// Operational smoke check: every `task_dir` referenced by the selection
    /// must exist on disk under `root`.
    pub fn validate_task_dirs(&self, root: &Path) -> Result<(), SelectionError> {
        let missing: Vec<String> = self
            .tasks
            .iter()
            .filter(|t| !root.join(&t.task_dir).is_dir())
            .map(|t| t.task_dir.clone())
            .collect();
        if missing.is_empty() {
            Ok(())
        } else {
            Err(SelectionError::MissingTaskDirs(missing))
        }
    }

    /// Groups tasks per benchmark suite, suites in sorted order.
    pub fn by_benchmark(&self) -> Vec<(String, Vec<&SelectedTask>)> {
        let mut groups: BTreeMap<&str, Vec<&SelectedTask>> = BTreeMap::new();
        for task in &self.tasks {
            groups.entry(&task.benchmark).or_default().push(task);
        }
        groups
            .into_iter()
            .map(|(name, tasks)| (name.to_string(), tasks))
            .collect()
    }

    /// Benchmark a task id belongs to, if selected.
    pub fn benchmark_for(&self, task_id: &str) -> Option<&str> {
        self.tasks
            .iter()
            .find(|t| t.task_id == task_id)
            .map(|t| t.benchmark.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const SAMPLE: &str = r#"[
        {"benchmark": "swe-bench-verified", "task_id": "astropy-1", "task_dir": "tasks/astropy-1", "repo_name": "github.com/astropy/astropy"},
        {"benchmark": "swe-bench-verified", "task_id": "django-2", "task_dir": "tasks/django-2", "timeout_multiplier": 2.0},
        {"benchmark": "terminal-bench", "task_id": "grep-3", "task_dir": "tasks/grep-3", "dataset": "terminal-bench-core", "priority": 5}
    ]"#;

    fn write_sample(dir: &Path) -> PathBuf {
        let path = dir.join("selected_benchmark_tasks.json");
        std::fs::write(&path, SAMPLE).unwrap();
        path
    }

    #[test]
    fn test_load_missing_file() {
        let temp = TempDir::new().unwrap();
        let result = TaskSelection::load(temp.path().join("nope.json"));
        assert!(matches!(result, Err(SelectionError::NotFound(_))));
    }

    #[test]
    fn test_load_empty_manifest() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("empty.json");
        std::fs::write(&path, "[]").unwrap();
        assert!(matches!(
            TaskSelection::load(&path),
            Err(SelectionError::Empty(_))
        ));
    }

    #[test]
    fn test_load_parses_entries_and_unknown_fields() {
        let temp = TempDir::new().unwrap();
        let selection = TaskSelection::load(write_sample(temp.path())).unwrap();

        assert_eq!(selection.len(), 3);
        let grep = &selection.tasks()[2];
        assert_eq!(grep.task_id, "grep-3");
        assert_eq!(grep.dataset_name(), "terminal-bench-core");
        assert_eq!(grep.extra.get("priority"), Some(&serde_json::json!(5)));

        let astropy = &selection.tasks()[0];
        assert_eq!(astropy.dataset_name(), "swe-bench-verified");
        assert_eq!(
            astropy.repo_name.as_deref(),
            Some("github.com/astropy/astropy")
        );
    }

    #[test]
    fn test_validate_task_dirs() {
        let temp = TempDir::new().unwrap();
        let selection = TaskSelection::load(write_sample(temp.path())).unwrap();

        // None of the directories exist yet
        let err = selection.validate_task_dirs(temp.path()).unwrap_err();
        match err {
            SelectionError::MissingTaskDirs(missing) => assert_eq!(missing.len(), 3),
            other => panic!("unexpected error: {other}"),
        }

        for sub in ["tasks/astropy-1", "tasks/django-2", "tasks/grep-3"] {
            std::fs::create_dir_all(temp.path().join(sub)).unwrap();
        }
        assert!(selection.validate_task_dirs(temp.path()).is_ok());
    }

    #[test]
    fn test_retain_benchmarks() {
        let temp = TempDir::new().unwrap();
        let mut selection = TaskSelection::load(write_sample(temp.path())).unwrap();
        selection.retain_benchmarks(&["terminal-bench".to_string()]);
        assert_eq!(selection.len(), 1);
        assert_eq!(selection.tasks()[0].task_id, "grep-3");
    }

    #[test]
    fn test_retain_tasks() {
        let temp = TempDir::new().unwrap();
        let mut selection = TaskSelection::load(write_sample(temp.path())).unwrap();
        selection.retain_tasks(&["django-2".to_string(), "grep-3".to_string()]);
        assert_eq!(selection.len(), 2);
    }

    #[test]
    fn test_by_benchmark_sorted_groups() {
        let temp = TempDir::new().unwrap();
        let selection = TaskSelection::load(write_sample(temp.path())).unwrap();
        let groups = selection.by_benchmark();
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].0, "swe-bench-verified");
        assert_eq!(groups[0].1.len(), 2);
        assert_eq!(groups[1].0, "terminal-bench");
    }

    #[test]
    fn test_benchmark_for() {
        let temp = TempDir::new().unwrap();
        let selection = TaskSelection::load(write_sample(temp.path())).unwrap();
        assert_eq!(selection.benchmark_for("grep-3"), Some("terminal-bench"));
        assert_eq!(selection.benchmark_for("unknown"), None);
    }
}
