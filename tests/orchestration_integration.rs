//! Integration tests for batch orchestration.
//!
//! These tests drive the full dispatch pipeline against a stub harbor
//! executable, then aggregate the rewards it writes into a report.

#![cfg(unix)]

use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use harbor_bench::accounts::AccountPool;
use harbor_bench::dispatch::{BatchConfig, BatchDispatcher};
use harbor_bench::harbor::RunVariant;
use harbor_bench::selection::TaskSelection;
use harbor_bench::{report, results};

const SELECTION: &str = r#"[
    {"benchmark": "suite-a", "task_id": "task-1", "task_dir": "tasks/task-1", "repo_name": "github.com/example/one"},
    {"benchmark": "suite-a", "task_id": "task-2", "task_dir": "tasks/task-2"},
    {"benchmark": "suite-b", "task_id": "task-3", "task_dir": "tasks/task-3"}
]"#;

/// Stub harbor: records its argv and env, writes a result.json whose reward
/// depends on the variant (baseline runs get 0, MCP runs get 1).
const STUB_HARBOR: &str = r#"#!/bin/sh
while [ $# -gt 0 ]; do
  case "$1" in
    --path) path="$2"; shift 2 ;;
    --jobs-dir) jobs="$2"; shift 2 ;;
    *) shift ;;
  esac
done
task=$(basename "$path")
mkdir -p "$jobs/$task"
if [ -n "$SOURCEGRAPH_ACCESS_TOKEN" ]; then
  reward="1.0"
else
  reward="0.0"
fi
echo "{\"reward\": $reward}" > "$jobs/$task/result.json"
echo "env BASELINE_MCP_TYPE=$BASELINE_MCP_TYPE SOURCEGRAPH_REPO_NAME=$SOURCEGRAPH_REPO_NAME"
"#;

fn write_fixture(root: &Path) -> (PathBuf, PathBuf) {
    for dir in ["tasks/task-1", "tasks/task-2", "tasks/task-3"] {
        std::fs::create_dir_all(root.join(dir)).unwrap();
    }
    let selection = root.join("selected_benchmark_tasks.json");
    std::fs::write(&selection, SELECTION).unwrap();

    let bin = root.join("harbor-stub");
    std::fs::write(&bin, STUB_HARBOR).unwrap();
    std::fs::set_permissions(&bin, std::fs::Permissions::from_mode(0o755)).unwrap();
    (selection, bin)
}

#[tokio::test]
async fn test_batch_both_variants_end_to_end() {
    let temp = tempfile::TempDir::new().unwrap();
    let (selection_path, bin) = write_fixture(temp.path());
    let jobs_dir = temp.path().join("jobs");

    let config = BatchConfig::new(&selection_path)
        .with_tasks_root(temp.path())
        .with_jobs_dir(&jobs_dir)
        .with_harbor_bin(bin.display().to_string())
        .with_sourcegraph_token("sgp_integration")
        .with_timeout(Duration::from_secs(60))
        .with_parallel(2);
    let dispatcher = BatchDispatcher::new(config, AccountPool::single(Some("sk-test".into())));

    let summary = dispatcher.run().await.unwrap();
    // 3 tasks × 2 variants
    assert_eq!(summary.total, 6);
    assert_eq!(summary.completed, 6);
    assert_eq!(summary.failed, 0);

    // Baseline runs scored 0, MCP runs scored 1
    assert_eq!(summary.mean_reward, Some(0.5));
    assert!(jobs_dir.join("batch-summary.json").exists());
    assert!(jobs_dir.join("baseline/task-1/result.json").exists());
    assert!(jobs_dir.join("mcp/task-3/result.json").exists());

    // Per-task MCP env made it through to the stub's log
    let log = std::fs::read_to_string(jobs_dir.join("mcp/logs/task-1.mcp.log")).unwrap();
    assert!(log.contains("SOURCEGRAPH_REPO_NAME=github.com/example/one"));
    let baseline_log =
        std::fs::read_to_string(jobs_dir.join("baseline/logs/task-1.baseline.log")).unwrap();
    assert!(baseline_log.contains("BASELINE_MCP_TYPE=none"));
}

#[tokio::test]
async fn test_rewards_aggregate_into_report() {
    let temp = tempfile::TempDir::new().unwrap();
    let (selection_path, bin) = write_fixture(temp.path());
    let jobs_dir = temp.path().join("jobs");

    let config = BatchConfig::new(&selection_path)
        .with_tasks_root(temp.path())
        .with_jobs_dir(&jobs_dir)
        .with_harbor_bin(bin.display().to_string())
        .with_sourcegraph_token("sgp_integration")
        .with_timeout(Duration::from_secs(60));
    let dispatcher = BatchDispatcher::new(config, AccountPool::single(Some("sk-test".into())));
    dispatcher.run().await.unwrap();

    let selection = TaskSelection::load(&selection_path).unwrap();
    let records = results::collect(&jobs_dir, Some(&selection)).unwrap();
    assert_eq!(records.len(), 6);
    assert!(records.iter().all(|r| r.benchmark != "unknown"));

    let rows = results::summarize(&records);
    // suite-a and suite-b, each with both variants
    assert_eq!(rows.len(), 4);

    let report_path = temp.path().join("evaluation_report.md");
    report::write_markdown(&records, &rows, &report_path).unwrap();
    let md = std::fs::read_to_string(&report_path).unwrap();
    assert!(md.contains("## Baseline vs MCP"));
    assert!(md.contains("| suite-a | 0.000 | 1.000 | +1.000 |"));
}

#[tokio::test]
async fn test_canary_gates_broken_environment() {
    let temp = tempfile::TempDir::new().unwrap();
    let (selection_path, _) = write_fixture(temp.path());
    let jobs_dir = temp.path().join("jobs");

    // Harbor stub whose output carries an authentication failure marker
    let bin = temp.path().join("harbor-auth-broken");
    std::fs::write(
        &bin,
        "#!/bin/sh\necho 'API error: authentication_error: OAuth token has expired'\nexit 1\n",
    )
    .unwrap();
    std::fs::set_permissions(&bin, std::fs::Permissions::from_mode(0o755)).unwrap();

    let config = BatchConfig::new(&selection_path)
        .with_tasks_root(temp.path())
        .with_jobs_dir(&jobs_dir)
        .with_variants(vec![RunVariant::Baseline])
        .with_harbor_bin(bin.display().to_string())
        .with_timeout(Duration::from_secs(60));
    let dispatcher = BatchDispatcher::new(config, AccountPool::single(Some("sk-test".into())));

    let err = dispatcher.run().await.unwrap_err();
    assert!(err.to_string().contains("Canary"));

    // Only the canary ran: no batch summary was committed
    assert!(!jobs_dir.join("batch-summary.json").exists());
}
