//! Task-batch dispatch.
//!
//! The dispatcher turns a task selection into harbor invocations and drives
//! them to completion:
//!
//! ```text
//! TaskSelection → jobs (task × variant) → canary probe
//!   → per-suite batches (token health → bounded parallel dispatch)
//!   → BatchSummary
//! ```
//!
//! Failure policy: a single task failure logs a warning and the batch
//! continues. The canary probe is the only thing that aborts a batch; it
//! catches systemic (infrastructure) failure before the remaining jobs are
//! committed.

pub mod config;
pub mod dispatcher;
pub mod progress;

pub use config::BatchConfig;
pub use dispatcher::{BatchDispatcher, BatchSummary, DispatchError};
pub use progress::{DispatchCounters, DispatchMonitor};
