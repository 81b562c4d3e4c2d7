//! Command-line interface definitions for buildgraph.

use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// Incremental build engine driver.
#[derive(Parser)]
#[command(name = "buildgraph", version, about)]
pub struct Cli {
    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Command,

    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    pub json_logs: bool,
}

/// Available subcommands.
#[derive(Subcommand)]
pub enum Command {
    /// Plan and execute a build.
    Build(BuildArgs),
    /// Plan a build and print its description without running anything.
    Plan(BuildArgs),
    /// Remove declared outputs and the build state.
    Clean(BuildArgs),
}

/// Dependency scope as written on the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ScopeArg {
    /// Honor dependencies across the whole workspace.
    Workspace,
    /// Honor dependencies only within a project.
    Project,
}

/// Arguments shared by every subcommand.
#[derive(Args)]
pub struct BuildArgs {
    /// Serialized build request (JSON).
    #[arg(long, short = 'm')]
    pub model: PathBuf,

    /// Build-output root; state and build descriptions live here.
    #[arg(long, default_value = "build")]
    pub build_root: PathBuf,

    /// Engine configuration file (JSON).
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Maximum number of tasks in flight (0 = available parallelism).
    #[arg(long, short = 'j')]
    pub jobs: Option<usize>,

    /// Stop dispatching after the first failure.
    #[arg(long)]
    pub stop_on_error: bool,

    /// Build targets one at a time, in dependency order.
    #[arg(long)]
    pub serial_targets: bool,

    /// Dependency scope (overrides the request).
    #[arg(long, value_enum)]
    pub scope: Option<ScopeArg>,

    /// Append one trace record per build to this file.
    #[arg(long, env = "BUILDGRAPH_TRACE_FILE")]
    pub trace_file: Option<PathBuf>,

    /// Build only these targets and their dependencies (`target` or `project::target`).
    #[arg(long = "target", short = 't')]
    pub targets: Vec<String>,
}
