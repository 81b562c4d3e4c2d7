//! Testing utilities for build graphs.
//!
//! This module provides:
//! - Actions that record or fail their executions
//! - A filesystem fixture for creating source trees

mod actions;
mod fixtures;

pub use actions::{FailingAction, RecordedEvent, RecordedPhase, RecordingAction};
pub use fixtures::WorkspaceFixture;
