//! Command-line interface for harbor-bench.
//!
//! Provides commands for batch dispatch, credential refresh, selection
//! validation, and report generation.

mod commands;

pub use commands::{parse_cli, run_with_cli, Cli};
