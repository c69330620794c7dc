//! Markdown evaluation reports and external stats-script glue.
//!
//! Reports carry count/mean/min/max per benchmark × variant and a
//! baseline-vs-MCP delta table. Deeper statistical analysis is done by
//! external scripts, invoked here once per result directory.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::Utc;
use tracing::{info, warn};

use crate::error::ReportError;
use crate::harbor::RunVariant;
use crate::results::{RewardRecord, SummaryRow};

/// Renders the Markdown evaluation report.
pub fn render_markdown(records: &[RewardRecord], rows: &[SummaryRow]) -> String {
    let mut out = String::new();
    out.push_str("# Benchmark Evaluation Report\n\n");
    out.push_str(&format!(
        "Generated: {}\n\n",
        Utc::now().format("%Y-%m-%d %H:%M:%S UTC")
    ));

    out.push_str("## Summary\n\n");
    out.push_str("| Benchmark | Variant | Runs | Resolved | Mean reward | Min | Max |\n");
    out.push_str("|---|---|---:|---:|---:|---:|---:|\n");
    for row in rows {
        out.push_str(&format!(
            "| {} | {} | {} | {} | {:.3} | {:.3} | {:.3} |\n",
            row.benchmark,
            row.variant.map(|v| v.as_str()).unwrap_or("-"),
            row.count,
            row.resolved,
            row.mean_reward,
            row.min_reward,
            row.max_reward,
        ));
    }
    out.push('\n');

    let deltas = baseline_vs_mcp(rows);
    if !deltas.is_empty() {
        out.push_str("## Baseline vs MCP\n\n");
        out.push_str("| Benchmark | Baseline | MCP | Delta |\n");
        out.push_str("|---|---:|---:|---:|\n");
        for (benchmark, baseline, mcp) in &deltas {
            out.push_str(&format!(
                "| {} | {:.3} | {:.3} | {:+.3} |\n",
                benchmark,
                baseline,
                mcp,
                mcp - baseline,
            ));
        }
        out.push('\n');
    }

    out.push_str("## Per-task rewards\n\n");
    out.push_str("| Task | Benchmark | Variant | Reward |\n");
    out.push_str("|---|---|---|---:|\n");
    for record in records {
        out.push_str(&format!(
            "| {} | {} | {} | {:.3} |\n",
            record.task_id,
            record.benchmark,
            record.variant.map(|v| v.as_str()).unwrap_or("-"),
            record.reward,
        ));
    }

    out
}

/// Writes the Markdown report to `path`.
pub fn write_markdown(
    records: &[RewardRecord],
    rows: &[SummaryRow],
    path: &Path,
) -> Result<(), ReportError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, render_markdown(records, rows))?;
    info!(path = %path.display(), "Wrote evaluation report");
    Ok(())
}

/// Benchmarks that have mean rewards for both variants: `(benchmark,
/// baseline mean, mcp mean)`.
fn baseline_vs_mcp(rows: &[SummaryRow]) -> Vec<(String, f64, f64)> {
    let mut per_benchmark: BTreeMap<&str, (Option<f64>, Option<f64>)> = BTreeMap::new();
    for row in rows {
        let cell = per_benchmark.entry(&row.benchmark).or_default();
        match row.variant {
            Some(RunVariant::Baseline) => cell.0 = Some(row.mean_reward),
            Some(RunVariant::Mcp) => cell.1 = Some(row.mean_reward),
            None => {}
        }
    }
    per_benchmark
        .into_iter()
        .filter_map(|(benchmark, (baseline, mcp))| {
            Some((benchmark.to_string(), baseline?, mcp?))
        })
        .collect()
}

/// Unique run directories the given records came from.
pub fn result_dirs(records: &[RewardRecord]) -> Vec<PathBuf> {
    let mut dirs: Vec<PathBuf> = records
        .iter()
        .filter_map(|r| r.source.parent().map(Path::to_path_buf))
        .collect();
    dirs.sort();
    dirs.dedup();
    dirs
}

/// Invokes an external statistics script once per result directory.
///
/// Failures are logged and skipped; returns how many invocations exited
/// zero.
pub async fn run_external_stats(
    script: &Path,
    result_dirs: &[PathBuf],
) -> Result<usize, ReportError> {
    if !script.exists() {
        return Err(ReportError::StatsScriptNotFound(script.to_path_buf()));
    }

    let mut succeeded = 0;
    for dir in result_dirs {
        let output = tokio::process::Command::new(script)
            .arg(dir)
            .output()
            .await;
        match output {
            Ok(output) if output.status.success() => succeeded += 1,
            Ok(output) => warn!(
                dir = %dir.display(),
                exit_code = output.status.code().unwrap_or(-1),
                "Stats script failed (continuing)"
            ),
            Err(e) => warn!(dir = %dir.display(), "Failed to run stats script: {e}"),
        }
    }
    info!(
        succeeded,
        total = result_dirs.len(),
        "External stats pass finished"
    );
    Ok(succeeded)
}
