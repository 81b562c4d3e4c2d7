//! Scheduling and execution of validated task graphs.
//!
//! This module provides:
//! - The [`Executor`], which runs independent nodes concurrently and skips
//!   nodes whose fingerprint matches the state store
//! - Failure policies and external cancellation
//! - Execution reports

mod cancellation;
mod executor;
mod report;

pub use cancellation::CancellationToken;
pub use executor::{Executor, ExecutorConfig, FailurePolicy};
pub use report::{ExecutionReport, NodeReport};
