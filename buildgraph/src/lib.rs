//! # Buildgraph
//!
//! The task graph, fingerprinting, and scheduling core of an incremental
//! build engine.
//!
//! Buildgraph turns a resolved project model into a directed acyclic graph
//! of task nodes and executes it with:
//!
//! - **Data and ordering edges**: derived from declared inputs and outputs,
//!   build phase order, and explicit target dependencies
//! - **Structural cycle rejection**: every cycle reported before any node runs
//! - **Content fingerprints**: nodes are skipped when nothing they depend on
//!   has changed since their last successful run
//! - **Bounded concurrency**: independent nodes run in parallel
//! - **Persistent state**: one append-only journal per build root
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use buildgraph::prelude::*;
//!
//! let workspace = Workspace::new("demo").project(
//!     Project::new("App").target(
//!         Target::new("Tool").phase(
//!             Phase::new("Compile").item(
//!                 WorkItem::new("Compile main.c", CommandSpec::new("cc").arg("-c").arg("main.c"))
//!                     .input(Artifact::file("main.c"))
//!                     .output(Artifact::file("main.o")),
//!             ),
//!         ),
//!     ),
//! );
//!
//! let operation = BuildOperation::new("build", EngineConfig::default())?;
//! let report = operation.run(&BuildRequest::new(workspace)).await?;
//! println!("{}", report.summary());
//! ```

#![forbid(unsafe_code)]
#![warn(
    clippy::all,
    clippy::pedantic,
    missing_docs,
    rust_2018_idioms
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc
)]

pub mod actions;
pub mod config;
pub mod core;
pub mod errors;
pub mod events;
pub mod fingerprint;
pub mod graph;
pub mod model;
pub mod operation;
pub mod scheduler;
pub mod state;
pub mod testing;
pub mod trace;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::actions::{
        ActionContext, ActionOutcome, ActionRegistry, CustomTaskSpec, OutputClassifier,
        ProcessAction, RegexOutputClassifier, TaskAction,
    };
    pub use crate::config::EngineConfig;
    pub use crate::core::{
        Artifact, CommandSpec, Diagnostic, NodeId, NodeStatus, Severity, TargetId, TargetRef,
    };
    pub use crate::errors::{
        BuildGraphError, DependencyCycle, GraphConstructionError, OrderingError,
    };
    pub use crate::events::{CollectingEventSink, EventSink, LoggingEventSink, NoOpEventSink};
    pub use crate::fingerprint::Signature;
    pub use crate::graph::{validate, EdgeKind, GraphBuilder, TaskGraph, ValidatedGraph};
    pub use crate::model::{
        BuildRequest, DependencyScope, Phase, Project, Target, WorkItem, Workspace,
    };
    pub use crate::operation::{BuildOperation, BuildPlan, CleanReport};
    pub use crate::scheduler::{
        CancellationToken, ExecutionReport, Executor, ExecutorConfig, FailurePolicy,
    };
    pub use crate::state::{FileStateStore, InMemoryStateStore, StateStore};
    pub use crate::trace::{NdjsonTraceSink, TraceRecord, TraceSink};
}
