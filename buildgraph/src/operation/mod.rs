//! End-to-end build operations.
//!
//! A [`BuildOperation`] owns everything scoped to one build-output root: the
//! incremental state store, the build description manifests, and the
//! optional trace sink. Each call plans the request from scratch; only the
//! state store carries information from one invocation to the next.

mod description;

pub use description::{BuildDescription, DescribedEdge, DescribedNode};

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::actions::{ActionRegistry, OutputClassifier};
use crate::config::EngineConfig;
use crate::core::{Artifact, Diagnostic};
use crate::errors::BuildGraphError;
use crate::events::EventSink;
use crate::fingerprint::{self, Signature};
use crate::graph::{validate, GraphBuilder, ValidatedGraph};
use crate::model::BuildRequest;
use crate::scheduler::{CancellationToken, ExecutionReport, Executor};
use crate::state::{FileStateStore, StateStore};
use crate::trace::{NdjsonTraceSink, TraceRecord, TraceSink};

/// A validated graph together with its build description signature.
#[derive(Debug, Clone)]
pub struct BuildPlan {
    /// The graph, proven acyclic.
    pub graph: ValidatedGraph,
    /// Signature of the graph's structure and settings.
    pub signature: Signature,
}

impl BuildPlan {
    /// Returns the serializable description of the plan.
    #[must_use]
    pub fn description(&self) -> BuildDescription {
        BuildDescription::from_graph(&self.graph, self.signature.clone())
    }
}

/// Result of a clean.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CleanReport {
    /// Declared outputs that existed and were removed.
    pub removed: Vec<PathBuf>,
}

/// Plans, runs, and cleans builds under one build root.
pub struct BuildOperation {
    config: EngineConfig,
    build_root: PathBuf,
    builder: GraphBuilder,
    store: Arc<dyn StateStore>,
    events: Option<Arc<dyn EventSink>>,
    trace: Option<Arc<dyn TraceSink>>,
    classifier: Option<Arc<dyn OutputClassifier>>,
    cancellation: Option<Arc<CancellationToken>>,
}

impl std::fmt::Debug for BuildOperation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BuildOperation")
            .field("config", &self.config)
            .field("build_root", &self.build_root)
            .field("store", &self.store)
            .field("trace", &self.trace)
            .finish_non_exhaustive()
    }
}

impl BuildOperation {
    /// Creates an operation for a build root.
    ///
    /// State is kept in `<build_root>/<state_dir_name>`. A trace file in the
    /// configuration enables an appending trace sink.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid.
    pub fn new(build_root: impl Into<PathBuf>, config: EngineConfig) -> Result<Self, BuildGraphError> {
        config.validate()?;
        let build_root = build_root.into();
        let store = Arc::new(FileStateStore::with_state_dir(&build_root, &config.state_dir_name));
        let trace = config
            .trace_file
            .as_ref()
            .map(|path| Arc::new(NdjsonTraceSink::new(path)) as Arc<dyn TraceSink>);

        Ok(Self {
            config,
            build_root,
            builder: GraphBuilder::default(),
            store,
            events: None,
            trace,
            classifier: None,
            cancellation: None,
        })
    }

    /// Resolves tools through the given registry.
    #[must_use]
    pub fn with_registry(mut self, registry: Arc<ActionRegistry>) -> Self {
        self.builder = GraphBuilder::new(registry);
        self
    }

    /// Replaces the state store.
    #[must_use]
    pub fn with_state_store(mut self, store: Arc<dyn StateStore>) -> Self {
        self.store = store;
        self
    }

    /// Sets the event sink.
    #[must_use]
    pub fn with_event_sink(mut self, events: Arc<dyn EventSink>) -> Self {
        self.events = Some(events);
        self
    }

    /// Sets the trace sink, replacing any configured trace file.
    #[must_use]
    pub fn with_trace_sink(mut self, trace: Arc<dyn TraceSink>) -> Self {
        self.trace = Some(trace);
        self
    }

    /// Sets the output classifier.
    #[must_use]
    pub fn with_classifier(mut self, classifier: Arc<dyn OutputClassifier>) -> Self {
        self.classifier = Some(classifier);
        self
    }

    /// Sets an external cancellation token.
    #[must_use]
    pub fn with_cancellation(mut self, token: Arc<CancellationToken>) -> Self {
        self.cancellation = Some(token);
        self
    }

    /// Returns the build root.
    #[must_use]
    pub fn build_root(&self) -> &Path {
        &self.build_root
    }

    /// Returns the configuration.
    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Returns the state store.
    #[must_use]
    pub fn store(&self) -> &Arc<dyn StateStore> {
        &self.store
    }

    /// Returns where the manifest for a signature lives.
    #[must_use]
    pub fn description_path(&self, signature: &Signature) -> PathBuf {
        self.build_root
            .join(&self.config.state_dir_name)
            .join(format!("{signature}.json"))
    }

    /// Builds and validates the graph for a request without running it.
    ///
    /// # Errors
    ///
    /// Returns an error if the graph cannot be constructed or contains a
    /// dependency cycle.
    pub fn plan(&self, request: &BuildRequest) -> Result<BuildPlan, BuildGraphError> {
        let graph = self.builder.build(request).map_err(|e| {
            warn!(code = %e.info().code, error = %e, "Unable to construct task graph");
            e
        })?;
        let graph = validate(graph).map_err(|e| {
            warn!(cycles = e.cycles.len(), "Task graph contains dependency cycles");
            e
        })?;
        let signature = fingerprint::plan_signature(&graph);
        debug!(signature = %signature, nodes = graph.node_count(), "Planned build");
        Ok(BuildPlan { graph, signature })
    }

    /// Plans and executes a build.
    ///
    /// Node failures are reported in the returned [`ExecutionReport`]; only
    /// planning problems and manifest I/O errors are returned as errors, and
    /// in those cases nothing was executed.
    ///
    /// # Errors
    ///
    /// Returns an error if planning fails or the build description cannot be
    /// written.
    pub async fn run(&self, request: &BuildRequest) -> Result<ExecutionReport, BuildGraphError> {
        let build_id = Uuid::new_v4();
        let span = info_span!("build", %build_id, workspace = %request.workspace.name);
        self.run_inner(request).instrument(span).await
    }

    async fn run_inner(&self, request: &BuildRequest) -> Result<ExecutionReport, BuildGraphError> {
        let plan = self.plan(request)?;
        let path = self.description_path(&plan.signature);

        if self.config.write_build_description {
            let written = plan.description().write_if_absent(&path).await?;
            debug!(path = %path.display(), written, "Build description");
        }

        if let Some(trace) = &self.trace {
            let record = TraceRecord {
                build_description_signature: plan.signature.clone(),
                target_parallelization_enabled: plan.graph.parallelize_targets(),
                name: plan.graph.name().to_string(),
                path: path.clone(),
            };
            if let Err(e) = trace.record(&record) {
                warn!(error = %e, "Unable to write trace record");
            }
        }

        let mut report = self.executor().execute(&plan.graph).await;

        if let Err(e) = self.store.compact().await {
            warn!(error = %e, "Unable to compact build state");
        }

        let mut notes = plan.graph.notes().to_vec();
        notes.push(Diagnostic::note(format!(
            "Build description signature: {}",
            plan.signature
        )));
        notes.push(Diagnostic::note(format!(
            "Build description path: {}",
            path.display()
        )));
        notes.append(&mut report.notes);
        report.notes = notes;
        report.signature = Some(plan.signature);
        Ok(report)
    }

    /// Removes every declared file output of the request's graph and the
    /// build state for this root.
    ///
    /// Cycles do not prevent a clean; only graph construction errors do.
    ///
    /// # Errors
    ///
    /// Returns an error if the graph cannot be constructed, an output cannot
    /// be removed, or the state cannot be cleared.
    pub async fn clean(&self, request: &BuildRequest) -> Result<CleanReport, BuildGraphError> {
        let graph = self.builder.build(request)?;
        let mut paths: Vec<PathBuf> = graph
            .nodes()
            .flat_map(|node| node.outputs.iter())
            .filter_map(Artifact::path)
            .map(Path::to_path_buf)
            .collect();
        paths.sort();
        paths.dedup();

        let mut report = CleanReport::default();
        for path in paths {
            if remove_output(&path).await? {
                debug!(path = %path.display(), "Removed output");
                report.removed.push(path);
            }
        }

        self.store.clear().await?;
        info!(removed = report.removed.len(), "Cleaned build root");
        Ok(report)
    }

    fn executor(&self) -> Executor {
        let mut executor =
            Executor::new(Arc::clone(&self.store)).with_config(self.config.executor());
        if let Some(events) = &self.events {
            executor = executor.with_event_sink(Arc::clone(events));
        }
        if let Some(classifier) = &self.classifier {
            executor = executor.with_classifier(Arc::clone(classifier));
        }
        if let Some(token) = &self.cancellation {
            executor = executor.with_cancellation(Arc::clone(token));
        }
        executor
    }
}

async fn remove_output(path: &Path) -> io::Result<bool> {
    let meta = match tokio::fs::symlink_metadata(path).await {
        Ok(meta) => meta,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(false),
        Err(e) => return Err(e),
    };
    if meta.is_dir() {
        tokio::fs::remove_dir_all(path).await?;
    } else {
        tokio::fs::remove_file(path).await?;
    }
    Ok(true)
}
