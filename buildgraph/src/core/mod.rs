//! Core types shared across the engine.
//!
//! This module provides:
//! - Task node status values
//! - Stable node and target identities
//! - Declared artifacts (files and virtual outputs)
//! - Command descriptions
//! - Diagnostics

mod artifact;
mod command;
mod diagnostic;
mod identity;
mod status;

pub use artifact::{normalize_path, Artifact};
pub use command::CommandSpec;
pub use diagnostic::{Diagnostic, Severity};
pub use identity::{NodeId, TargetId, TargetRef};
pub use status::NodeStatus;
