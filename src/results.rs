//! Reward collection from harbor run directories.
//!
//! harbor writes one directory per run under the jobs dir, containing a
//! `result.json` (external format, only the `reward` field is interpreted
//! here) and sometimes a bare-float `reward.txt`. This module walks a jobs
//! directory, pulls rewards out of whatever result files exist, and
//! aggregates them per benchmark × variant. Unreadable files are skipped
//! with a warning.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::error::ReportError;
use crate::harbor::RunVariant;
use crate::selection::TaskSelection;

/// Reward at or above this counts as resolved (full reward).
pub const RESOLVED_THRESHOLD: f64 = 1.0;

/// One reward parsed from a run directory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RewardRecord {
    pub task_id: String,
    pub benchmark: String,
    /// Variant inferred from the run path, when the jobs dir is split.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variant: Option<RunVariant>,
    pub reward: f64,
    /// File the reward was read from.
    pub source: PathBuf,
}

impl RewardRecord {
    pub fn resolved(&self) -> bool {
        self.reward >= RESOLVED_THRESHOLD
    }
}

/// Aggregate over one benchmark × variant cell.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SummaryRow {
    pub benchmark: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variant: Option<RunVariant>,
    pub count: usize,
    pub resolved: usize,
    pub mean_reward: f64,
    pub min_reward: f64,
    pub max_reward: f64,
}

/// Shape of the fields we read out of harbor's `result.json`.
#[derive(Debug, Deserialize)]
struct ResultFile {
    reward: Option<f64>,
    #[serde(default)]
    task_id: Option<String>,
}

/// Walks a jobs directory and collects every readable reward.
///
/// `result.json` wins over a sibling `reward.txt`. When a selection is
/// given, task ids are mapped back to their benchmark suite; unknown tasks
/// are kept under "unknown".
pub fn collect(
    jobs_dir: &Path,
    selection: Option<&TaskSelection>,
) -> Result<Vec<RewardRecord>, ReportError> {
    if !jobs_dir.is_dir() {
        return Err(ReportError::NoResults(jobs_dir.to_path_buf()));
    }

    let mut records = Vec::new();
    for entry in WalkDir::new(jobs_dir)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|e| e.file_type().is_file())
    {
        let path = entry.path();
        let reward = match path.file_name().and_then(|n| n.to_str()) {
            Some("result.json") => parse_result_json(path),
            Some("reward.txt") => {
                // result.json is authoritative when both exist
                if path.with_file_name("result.json").exists() {
                    continue;
                }
                parse_reward_txt(path)
            }
            _ => continue,
        };

        let Some((reward, task_id_field)) = reward else {
            continue;
        };
        let task_id = task_id_field.unwrap_or_else(|| task_id_from_dir(path));
        let benchmark = selection
            .and_then(|s| s.benchmark_for(&task_id))
            .unwrap_or("unknown")
            .to_string();

        records.push(RewardRecord {
            task_id,
            benchmark,
            variant: variant_from_path(jobs_dir, path),
            reward,
            source: path.to_path_buf(),
        });
    }

    debug!(count = records.len(), "Collected reward records");
    Ok(records)
}

/// Aggregates records into per benchmark × variant summary rows.
pub fn summarize(records: &[RewardRecord]) -> Vec<SummaryRow> {
    let mut cells: BTreeMap<(String, Option<&str>), Vec<&RewardRecord>> = BTreeMap::new();
    for record in records {
        cells
            .entry((
                record.benchmark.clone(),
                record.variant.as_ref().map(|v| v.as_str()),
            ))
            .or_default()
            .push(record);
    }

    cells
        .into_iter()
        .map(|((benchmark, _), cell)| {
            let rewards: Vec<f64> = cell.iter().map(|r| r.reward).collect();
            let sum: f64 = rewards.iter().sum();
            SummaryRow {
                benchmark,
                variant: cell[0].variant,
                count: cell.len(),
                resolved: cell.iter().filter(|r| r.resolved()).count(),
                mean_reward: sum / rewards.len() as f64,
                min_reward: rewards.iter().cloned().fold(f64::INFINITY, f64::min),
                max_reward: rewards.iter().cloned().fold(f64::NEG_INFINITY, f64::max),
            }
        })
        .collect()
}

/// Most recent reward written for a task under a jobs directory.
///
/// Best effort: used right after a run to attach the reward to its outcome.
pub fn latest_reward(jobs_dir: &Path, task_id: &str) -> Option<f64> {
    let mut best: Option<(SystemTime, f64)> = None;
    for entry in WalkDir::new(jobs_dir)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|e| e.file_type().is_file())
    {
        let path = entry.path();
        let is_result = matches!(
            path.file_name().and_then(|n| n.to_str()),
            Some("result.json") | Some("reward.txt")
        );
        if !is_result || task_id_from_dir(path) != task_id {
            continue;
        }
        let reward = match path.file_name().and_then(|n| n.to_str()) {
            Some("result.json") => parse_result_json(path).map(|(r, _)| r),
            _ => {
                if path.with_file_name("result.json").exists() {
                    None
                } else {
                    parse_reward_txt(path).map(|(r, _)| r)
                }
            }
        };
        let Some(reward) = reward else { continue };
        let mtime = entry
            .metadata()
            .ok()
            .and_then(|m| m.modified().ok())
            .unwrap_or(SystemTime::UNIX_EPOCH);
        if best.map(|(t, _)| mtime >= t).unwrap_or(true) {
            best = Some((mtime, reward));
        }
    }
    best.map(|(_, reward)| reward)
}

fn parse_result_json(path: &Path) -> Option<(f64, Option<String>)> {
    let content = match std::fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) => {
            warn!(path = %path.display(), "Skipping unreadable result file: {e}");
            return None;
        }
    };
    match serde_json::from_str::<ResultFile>(&content) {
        Ok(parsed) => parsed.reward.map(|r| (r, parsed.task_id)),
        Err(e) => {
            warn!(path = %path.display(), "Skipping malformed result.json: {e}");
            None
        }
    }
}

fn parse_reward_txt(path: &Path) -> Option<(f64, Option<String>)> {
    let content = match std::fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) => {
            warn!(path = %path.display(), "Skipping unreadable reward file: {e}");
            return None;
        }
    };
    match content.trim().parse::<f64>() {
        Ok(reward) => Some((reward, None)),
        Err(e) => {
            warn!(path = %path.display(), "Skipping malformed reward.txt: {e}");
            None
        }
    }
}

/// Task id from a result file's run directory, with any `__<attempt>`
/// suffix stripped.
fn task_id_from_dir(result_path: &Path) -> String {
    let dir_name = result_path
        .parent()
        .and_then(|p| p.file_name())
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    match dir_name.rfind("__") {
        Some(idx) if dir_name[idx + 2..].chars().all(|c| c.is_ascii_digit()) => {
            dir_name[..idx].to_string()
        }
        _ => dir_name,
    }
}

/// Variant from the run path: the first path segment under the jobs dir
/// named after a variant.
fn variant_from_path(jobs_dir: &Path, path: &Path) -> Option<RunVariant> {
    let relative = path.strip_prefix(jobs_dir).ok()?;
    for component in relative.components() {
        match component.as_os_str().to_str() {
            Some("baseline") => return Some(RunVariant::Baseline),
            Some("mcp") => return Some(RunVariant::Mcp),
            _ => {}
        }
    }
    None
}
