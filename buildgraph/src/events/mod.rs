//! Build lifecycle events.
//!
//! Sinks are injected into the scheduler and build operation explicitly;
//! there is no process-wide sink.

mod sink;

pub use sink::{CollectedEvent, CollectingEventSink, EventSink, LoggingEventSink, NoOpEventSink};

/// A build is about to execute.
pub const BUILD_STARTED: &str = "build.started";
/// A build finished, successfully or not.
pub const BUILD_COMPLETED: &str = "build.completed";
/// A node was dispatched.
pub const TASK_STARTED: &str = "task.started";
/// A node ran and succeeded.
pub const TASK_COMPLETED: &str = "task.completed";
/// A node ran and failed, or could not run.
pub const TASK_FAILED: &str = "task.failed";
/// A node was skipped because it is up to date.
pub const TASK_UP_TO_DATE: &str = "task.up_to_date";
/// A node was skipped because a predecessor failed.
pub const TASK_SKIPPED_UPSTREAM_FAILURE: &str = "task.skipped_upstream_failure";
/// A node was never evaluated because dispatch stopped.
pub const TASK_NOT_EVALUATED: &str = "task.not_evaluated";
