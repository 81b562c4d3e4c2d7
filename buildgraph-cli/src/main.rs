//! Command-line driver for the buildgraph engine.
//!
//! Reads a serialized build request, plans it, and builds, plans, or cleans
//! under a build-output root. Exits non-zero when the plan is rejected or
//! any task fails.

mod cli;

use anyhow::{Context, Result};
use clap::Parser;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use buildgraph::prelude::*;
use cli::{BuildArgs, Cli, Command, ScopeArg};

const LOG_ENV: &str = "BUILDGRAPH_LOG";

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.json_logs);

    match dispatch(cli.command).await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            error!(error = %e, "buildgraph failed");
            eprintln!("error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

fn init_logging(json: bool) {
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

async fn dispatch(command: Command) -> Result<bool> {
    match command {
        Command::Build(args) => cmd_build(&args).await,
        Command::Plan(args) => cmd_plan(&args),
        Command::Clean(args) => cmd_clean(&args).await,
    }
}

/// Loads the request and configuration, applying command-line overrides.
fn load(args: &BuildArgs) -> Result<(BuildRequest, EngineConfig)> {
    let mut request = BuildRequest::from_json_file(&args.model)
        .with_context(|| format!("unable to load build request '{}'", args.model.display()))?;
    if args.serial_targets {
        request.parallelize_targets = false;
    }
    if let Some(scope) = args.scope {
        request.scope = match scope {
            ScopeArg::Workspace => DependencyScope::Workspace,
            ScopeArg::Project => DependencyScope::Project,
        };
    }
    for target in &args.targets {
        request = request.with_target(target);
    }

    let mut config = match &args.config {
        Some(path) => EngineConfig::from_json_file(path)
            .with_context(|| format!("unable to load configuration '{}'", path.display()))?,
        None => EngineConfig::default(),
    };
    if let Some(jobs) = args.jobs {
        config.max_concurrency = jobs;
    }
    if args.stop_on_error {
        config.failure_policy = FailurePolicy::StopOnFirstError;
    }
    if let Some(trace_file) = &args.trace_file {
        config.trace_file = Some(trace_file.clone());
    }
    Ok((request, config))
}

fn operation(args: &BuildArgs, config: EngineConfig) -> Result<BuildOperation> {
    Ok(BuildOperation::new(&args.build_root, config)?
        .with_event_sink(Arc::new(LoggingEventSink::debug())))
}

/// Prints every cycle and reports whether the error was a rejected plan.
fn report_rejection(err: &BuildGraphError) -> bool {
    match err {
        BuildGraphError::Ordering(ordering) => {
            for cycle in &ordering.cycles {
                eprintln!("error: {}", cycle.message);
            }
            true
        }
        BuildGraphError::GraphConstruction(construction) => {
            let info = construction.info();
            eprintln!("error: {construction}");
            if let Some(hint) = info.fix_hint {
                eprintln!("note: {hint}");
            }
            true
        }
        _ => false,
    }
}

async fn cmd_build(args: &BuildArgs) -> Result<bool> {
    let (request, config) = load(args)?;
    let token = CancellationToken::new();
    let interrupt = Arc::clone(&token);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted; waiting for running tasks");
            interrupt.cancel("interrupted");
        }
    });

    let operation = operation(args, config)?.with_cancellation(token);
    let report = match operation.run(&request).await {
        Ok(report) => report,
        Err(e) if report_rejection(&e) => return Ok(false),
        Err(e) => return Err(e.into()),
    };

    for note in &report.notes {
        eprintln!("{note}");
    }
    for diagnostic in &report.diagnostics {
        eprintln!("{diagnostic}");
    }
    if let Some(reason) = &report.stopped {
        eprintln!("Build stopped: {reason}");
    }

    let success = report.success();
    info!(summary = %report.summary(), "Build finished");
    println!(
        "{} ({})",
        if success { "Build succeeded" } else { "Build failed" },
        report.summary()
    );
    Ok(success)
}

fn cmd_plan(args: &BuildArgs) -> Result<bool> {
    let (request, config) = load(args)?;
    let plan = match operation(args, config)?.plan(&request) {
        Ok(plan) => plan,
        Err(e) if report_rejection(&e) => return Ok(false),
        Err(e) => return Err(e.into()),
    };
    let json = serde_json::to_string_pretty(&plan.description())?;
    println!("{json}");
    Ok(true)
}

async fn cmd_clean(args: &BuildArgs) -> Result<bool> {
    let (request, config) = load(args)?;
    let cleaned = match operation(args, config)?.clean(&request).await {
        Ok(cleaned) => cleaned,
        Err(e) if report_rejection(&e) => return Ok(false),
        Err(e) => return Err(e.into()),
    };
    for path in &cleaned.removed {
        println!("Removed {}", path.display());
    }
    Ok(true)
}
