//! Error types for harbor-bench operations.
//!
//! Defines error types for the major subsystems:
//! - OAuth credential loading and refresh
//! - Task-selection manifest parsing and validation
//! - Account pool configuration
//! - Reward collection and report generation

use std::path::PathBuf;

use thiserror::Error;

/// Errors that can occur while loading or refreshing OAuth credentials.
#[derive(Debug, Error)]
pub enum CredentialsError {
    #[error("Credentials file not found: {0}")]
    NotFound(PathBuf),

    #[error("Credentials file {0} has no refresh token")]
    MissingRefreshToken(PathBuf),

    #[error("Token refresh rejected ({status}): {body}")]
    RefreshRejected { status: u16, body: String },

    #[error("Refreshed token expiry {expires_at} does not clear the {margin_secs}s refresh margin")]
    StaleAfterRefresh { expires_at: i64, margin_secs: i64 },

    #[error("HTTP error during token refresh: {0}")]
    Http(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Errors that can occur while loading the task-selection manifest.
#[derive(Debug, Error)]
pub enum SelectionError {
    #[error("Selection file not found: {0}")]
    NotFound(PathBuf),

    #[error("Selection file {0} contains no tasks")]
    Empty(PathBuf),

    #[error("{} task directories from the selection are missing on disk: {}", .0.len(), .0.join(", "))]
    MissingTaskDirs(Vec<String>),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Errors that can occur while building the account pool.
#[derive(Debug, Error)]
pub enum AccountError {
    #[error("Account pool is empty")]
    Empty,

    #[error("Invalid account spec '{0}': expected name=credentials_path")]
    InvalidSpec(String),

    #[error("Duplicate account name '{0}'")]
    DuplicateName(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

/// Errors that can occur during reward collection and report generation.
#[derive(Debug, Error)]
pub enum ReportError {
    #[error("No results found under {0}")]
    NoResults(PathBuf),

    #[error("Stats script not found: {0}")]
    StatsScriptNotFound(PathBuf),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
