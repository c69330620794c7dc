//! Invocation of the external harbor task runner.
//!
//! harbor is the benchmark runner that actually executes a coding agent
//! against a task inside its own (Docker-backed) environment. This module
//! only constructs `harbor run` command lines and supervises the spawned
//! processes; everything behind that CLI boundary is opaque.
//!
//! ```text
//! SelectedTask → HarborInvocation (argv + env) → HarborRunner → TaskOutcome
//! ```

pub mod invocation;
pub mod runner;

pub use invocation::{variant_env, HarborInvocation, RunVariant};
pub use runner::{HarborRunner, TaskOutcome, TaskStatus};
