//! The graph executor.
//!
//! A single coordinator walks the validated graph. Nodes whose predecessors
//! have all reached a terminal state become ready; ready nodes are spawned
//! as tokio tasks up to the concurrency limit. Each node task fingerprints
//! the node, decides whether it is up to date, runs its action if not, and
//! commits the new record before returning. The coordinator unblocks
//! successors only after that, so a successor always reads committed state.
//!
//! Whether a predecessor changed is read from the store, not remembered by
//! the coordinator: each record carries a revision, and a successor records
//! the revisions it consumed. A build that stops early therefore leaves
//! pending successors out of date rather than silently current.

use futures::future::BoxFuture;
use futures::stream::{FuturesUnordered, StreamExt};
use futures::FutureExt;
use parking_lot::Mutex;
use petgraph::graph::NodeIndex;
use petgraph::visit::{Dfs, Walker};
use petgraph::Direction;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::BTreeSet;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;
use tokio::task::JoinError;
use tracing::{debug, error, info, info_span, warn, Instrument};

use super::{CancellationToken, ExecutionReport, NodeReport};
use crate::actions::{ActionContext, ActionOutcome, OutputClassifier, RegexOutputClassifier};
use crate::core::{Diagnostic, NodeId, NodeStatus};
use crate::errors::FingerprintError;
use crate::events::{self, EventSink, NoOpEventSink};
use crate::fingerprint::{self, Signature};
use crate::graph::{TaskNode, ValidatedGraph};
use crate::state::{FingerprintRecord, StateStore};

/// What happens to the rest of the build when a node fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Skip the failed node's successors; keep building independent work.
    #[default]
    ContinueOnFailure,
    /// Stop dispatching; let running nodes finish.
    StopOnFirstError,
}

/// Executor settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecutorConfig {
    /// Maximum nodes in flight; 0 means available parallelism.
    pub max_concurrency: usize,
    /// Failure policy.
    pub failure_policy: FailurePolicy,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            max_concurrency: 0,
            failure_policy: FailurePolicy::ContinueOnFailure,
        }
    }
}

impl ExecutorConfig {
    /// Sets the concurrency limit.
    #[must_use]
    pub fn with_max_concurrency(mut self, max: usize) -> Self {
        self.max_concurrency = max;
        self
    }

    /// Sets the failure policy.
    #[must_use]
    pub fn with_failure_policy(mut self, policy: FailurePolicy) -> Self {
        self.failure_policy = policy;
        self
    }

    /// Resolves the concurrency limit.
    #[must_use]
    pub fn effective_concurrency(&self) -> usize {
        if self.max_concurrency > 0 {
            return self.max_concurrency;
        }
        std::thread::available_parallelism().map_or(1, std::num::NonZeroUsize::get)
    }
}

/// Result of one node task, handed back to the coordinator.
#[derive(Debug)]
struct NodeRun {
    status: NodeStatus,
    diagnostics: Vec<Diagnostic>,
    exit_code: Option<i32>,
    error: Option<String>,
    duration_ms: f64,
}

impl NodeRun {
    fn failed(node: &NodeId, reason: impl Into<String>, started: Instant) -> Self {
        let reason = reason.into();
        Self {
            status: NodeStatus::Failed,
            diagnostics: vec![Diagnostic::error(reason.clone()).for_node(node.clone())],
            exit_code: None,
            error: Some(reason),
            duration_ms: elapsed_ms(started),
        }
    }
}

fn elapsed_ms(started: Instant) -> f64 {
    started.elapsed().as_secs_f64() * 1000.0
}

/// Everything a node task needs; owned so the task can be spawned.
struct NodeJob {
    node: Arc<TaskNode>,
    /// Direct predecessors in identity order.
    predecessors: Vec<NodeId>,
    store: Arc<dyn StateStore>,
    events: Arc<dyn EventSink>,
    classifier: Arc<dyn OutputClassifier>,
    dispatched: Arc<Mutex<Vec<NodeId>>>,
}

/// Executes validated task graphs against a state store.
pub struct Executor {
    config: ExecutorConfig,
    store: Arc<dyn StateStore>,
    events: Arc<dyn EventSink>,
    classifier: Arc<dyn OutputClassifier>,
    cancellation: Option<Arc<CancellationToken>>,
}

impl std::fmt::Debug for Executor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Executor")
            .field("config", &self.config)
            .field("store", &self.store)
            .field("classifier", &self.classifier)
            .field("cancellation", &self.cancellation)
            .finish_non_exhaustive()
    }
}

impl Executor {
    /// Creates an executor with default settings, no event sink, and the
    /// default output classifier.
    #[must_use]
    pub fn new(store: Arc<dyn StateStore>) -> Self {
        Self {
            config: ExecutorConfig::default(),
            store,
            events: Arc::new(NoOpEventSink),
            classifier: Arc::new(RegexOutputClassifier::default()),
            cancellation: None,
        }
    }

    /// Sets the executor settings.
    #[must_use]
    pub fn with_config(mut self, config: ExecutorConfig) -> Self {
        self.config = config;
        self
    }

    /// Sets the event sink.
    #[must_use]
    pub fn with_event_sink(mut self, events: Arc<dyn EventSink>) -> Self {
        self.events = events;
        self
    }

    /// Sets the output classifier.
    #[must_use]
    pub fn with_classifier(mut self, classifier: Arc<dyn OutputClassifier>) -> Self {
        self.classifier = classifier;
        self
    }

    /// Sets an external cancellation token.
    #[must_use]
    pub fn with_cancellation(mut self, token: Arc<CancellationToken>) -> Self {
        self.cancellation = Some(token);
        self
    }

    /// Returns the state store.
    #[must_use]
    pub fn store(&self) -> &Arc<dyn StateStore> {
        &self.store
    }

    /// Executes the graph.
    ///
    /// Node failures, missing inputs, and state store problems are recorded
    /// in the report; they never abort the call.
    pub async fn execute(&self, graph: &ValidatedGraph) -> ExecutionReport {
        let span = info_span!("execute", workspace = %graph.name(), nodes = graph.node_count());
        self.execute_inner(graph).instrument(span).await
    }

    #[allow(clippy::too_many_lines)]
    async fn execute_inner(&self, graph: &ValidatedGraph) -> ExecutionReport {
        let mut report = ExecutionReport::new();
        let inner = graph.inner();
        let count = inner.node_count();
        let limit = self.config.effective_concurrency();

        match self.store.load().await {
            Ok(records) => debug!(records = records.len(), "Loaded prior state"),
            Err(e) => warn!(error = %e, "Unable to load prior state; every node will run"),
        }

        self.events
            .emit(events::BUILD_STARTED, Some(json!({ "workspace": graph.name(), "nodes": count })))
            .await;
        info!(nodes = count, max_concurrency = limit, "Starting build");

        let nodes: Vec<Arc<TaskNode>> = inner
            .node_indices()
            .map(|idx| Arc::new(inner[idx].clone()))
            .collect();
        let mut statuses = vec![NodeStatus::Pending; count];
        let mut remaining: Vec<usize> = inner
            .node_indices()
            .map(|idx| inner.neighbors_directed(idx, Direction::Incoming).count())
            .collect();
        let mut ready: BTreeSet<(NodeId, NodeIndex)> = inner
            .node_indices()
            .filter(|idx| remaining[idx.index()] == 0)
            .map(|idx| (inner[idx].id.clone(), idx))
            .collect();

        let dispatched = Arc::new(Mutex::new(Vec::new()));
        let mut in_flight: FuturesUnordered<BoxFuture<'static, (NodeIndex, Result<NodeRun, JoinError>)>> =
            FuturesUnordered::new();
        let mut stopping = false;

        loop {
            if !stopping {
                if let Some(token) = &self.cancellation {
                    if token.is_cancelled() {
                        stopping = true;
                        report.stopped = Some(token.reason().unwrap_or_else(|| "cancelled".into()));
                        warn!(reason = ?report.stopped, "Build cancelled; no further tasks will start");
                    }
                }
            }

            while !stopping && in_flight.len() < limit {
                let Some((_, idx)) = ready.pop_first() else {
                    break;
                };
                statuses[idx.index()] = NodeStatus::Running;
                let job = NodeJob {
                    node: Arc::clone(&nodes[idx.index()]),
                    predecessors: predecessor_ids(graph, idx),
                    store: Arc::clone(&self.store),
                    events: Arc::clone(&self.events),
                    classifier: Arc::clone(&self.classifier),
                    dispatched: Arc::clone(&dispatched),
                };
                let handle = tokio::spawn(run_node(job));
                in_flight.push(async move { (idx, handle.await) }.boxed());
            }

            if in_flight.is_empty() {
                break;
            }

            let cancellation = self.cancellation.clone();
            let cancelled = async move {
                match cancellation {
                    Some(token) => token.cancelled().await,
                    None => std::future::pending().await,
                }
            };

            let (idx, joined) = tokio::select! {
                biased;
                Some(done) = in_flight.next() => done,
                () = cancelled, if !stopping => continue,
                else => break,
            };

            let node = &nodes[idx.index()];
            let run = joined.unwrap_or_else(|e| {
                error!(node = %node.id, error = %e, "Task panicked");
                NodeRun::failed(&node.id, format!("Task {} panicked: {e}", node.name), Instant::now())
            });

            statuses[idx.index()] = run.status;
            report.diagnostics.extend(run.diagnostics.iter().cloned());
            let mut node_report = NodeReport::new(
                node.id.clone(),
                node.target.clone(),
                node.name.clone(),
                run.status,
            );
            node_report.diagnostics = run.diagnostics;
            node_report.exit_code = run.exit_code;
            node_report.error = run.error;
            node_report.duration_ms = run.duration_ms;
            report.nodes.insert(node.id.clone(), node_report);

            if run.status == NodeStatus::Failed {
                if self.config.failure_policy == FailurePolicy::StopOnFirstError && !stopping {
                    stopping = true;
                    report.stopped = Some(format!("stopped after '{}' failed", node.id));
                    warn!(node = %node.id, "Stopping build after first error");
                }
                self.skip_successors(graph, idx, &nodes, &mut statuses, &mut report);
                continue;
            }

            for successor in inner.neighbors_directed(idx, Direction::Outgoing) {
                let s = successor.index();
                remaining[s] = remaining[s].saturating_sub(1);
                if remaining[s] == 0 && statuses[s] == NodeStatus::Pending {
                    ready.insert((nodes[s].id.clone(), successor));
                }
            }
        }

        for (i, status) in statuses.iter_mut().enumerate() {
            if *status == NodeStatus::Pending {
                *status = NodeStatus::NotEvaluated;
                let node = &nodes[i];
                report.nodes.insert(
                    node.id.clone(),
                    NodeReport::new(
                        node.id.clone(),
                        node.target.clone(),
                        node.name.clone(),
                        NodeStatus::NotEvaluated,
                    ),
                );
                self.events
                    .try_emit(events::TASK_NOT_EVALUATED, Some(json!({ "node": node.id })));
            }
        }

        report.dispatch_order = std::mem::take(&mut *dispatched.lock());
        report.finished_at = chrono::Utc::now();

        let summary = report.summary();
        if report.success() {
            info!(summary = %summary, "Build succeeded");
        } else {
            warn!(summary = %summary, "Build failed");
        }
        self.events
            .emit(
                events::BUILD_COMPLETED,
                Some(json!({ "success": report.success(), "summary": summary })),
            )
            .await;
        report
    }

    /// Marks every pending transitive successor of a failed node.
    fn skip_successors(
        &self,
        graph: &ValidatedGraph,
        failed: NodeIndex,
        nodes: &[Arc<TaskNode>],
        statuses: &mut [NodeStatus],
        report: &mut ExecutionReport,
    ) {
        let inner = graph.inner();
        for idx in Dfs::new(inner, failed).iter(inner).skip(1) {
            let i = idx.index();
            if statuses[i] != NodeStatus::Pending {
                continue;
            }
            statuses[i] = NodeStatus::SkippedUpstreamFailure;
            let node = &nodes[i];
            debug!(node = %node.id, failed = %nodes[failed.index()].id, "Skipping after upstream failure");
            report.nodes.insert(
                node.id.clone(),
                NodeReport::new(
                    node.id.clone(),
                    node.target.clone(),
                    node.name.clone(),
                    NodeStatus::SkippedUpstreamFailure,
                ),
            );
            self.events.try_emit(
                events::TASK_SKIPPED_UPSTREAM_FAILURE,
                Some(json!({ "node": node.id, "failed": nodes[failed.index()].id })),
            );
        }
    }
}

fn predecessor_ids(graph: &ValidatedGraph, idx: NodeIndex) -> Vec<NodeId> {
    let inner = graph.inner();
    let ids: BTreeSet<NodeId> = inner
        .neighbors_directed(idx, Direction::Incoming)
        .map(|p| inner[p].id.clone())
        .collect();
    ids.into_iter().collect()
}

/// Digests the revisions this node would consume if it ran now.
async fn upstream_state(job: &NodeJob) -> Signature {
    let mut revisions = Vec::with_capacity(job.predecessors.len());
    for id in &job.predecessors {
        revisions.push(job.store.get(id).await.map(|record| record.revision));
    }
    fingerprint::upstream_state(job.predecessors.iter().zip(revisions.iter().map(Option::as_ref)))
}

async fn compute_fingerprint(node: &Arc<TaskNode>) -> Result<Signature, Diagnostic> {
    let node = Arc::clone(node);
    match tokio::task::spawn_blocking(move || fingerprint::fingerprint(&node)).await {
        Ok(Ok(signature)) => Ok(signature),
        Ok(Err(e @ FingerprintError::MissingInput { .. })) => {
            Err(Diagnostic::error(e.to_string()).with_code("NODE-001-MISSING_INPUT"))
        }
        Ok(Err(e)) => Err(Diagnostic::error(e.to_string())),
        Err(e) => Err(Diagnostic::error(format!("fingerprinting panicked: {e}"))),
    }
}

async fn compute_output_state(node: &Arc<TaskNode>) -> Result<Signature, String> {
    let node = Arc::clone(node);
    match tokio::task::spawn_blocking(move || fingerprint::output_state(&node)).await {
        Ok(Ok(signature)) => Ok(signature),
        Ok(Err(e)) => Err(e.to_string()),
        Err(e) => Err(format!("output hashing panicked: {e}")),
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| (*s).to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}

/// Runs one node: fingerprint, skip check, action, commit.
async fn run_node(job: NodeJob) -> NodeRun {
    let started = Instant::now();
    let node = &job.node;
    let payload = json!({ "node": node.id, "target": node.target, "name": node.name });

    let fingerprint = match compute_fingerprint(node).await {
        Ok(fingerprint) => fingerprint,
        Err(diagnostic) => {
            // A declared input that is missing now is an ordering problem the
            // graph could not see; the node fails like any other.
            let reason = diagnostic.message.clone();
            warn!(node = %node.id, reason = %reason, "Unable to fingerprint task");
            if let Err(e) = job.store.invalidate(&node.id).await {
                warn!(node = %node.id, error = %e, "Unable to invalidate state");
            }
            let mut run = NodeRun::failed(&node.id, reason.clone(), started);
            run.diagnostics = vec![diagnostic.for_node(node.id.clone())];
            job.events
                .emit(events::TASK_FAILED, Some(json!({ "node": node.id, "error": reason })))
                .await;
            return run;
        }
    };

    let upstream = upstream_state(&job).await;
    let prior = job.store.get(&node.id).await;

    if !node.always_out_of_date {
        let current = prior
            .as_ref()
            .is_some_and(|p| p.fingerprint == fingerprint && p.upstream == upstream);
        if current && fingerprint::outputs_present(node) {
            debug!(node = %node.id, "Task is up to date");
            job.events.emit(events::TASK_UP_TO_DATE, Some(payload)).await;
            return NodeRun {
                status: NodeStatus::SkippedUpToDate,
                diagnostics: Vec::new(),
                exit_code: None,
                error: None,
                duration_ms: elapsed_ms(started),
            };
        }
    }

    job.dispatched.lock().push(node.id.clone());
    info!(node = %node.id, "{}", node.display_description());
    job.events.emit(events::TASK_STARTED, Some(payload)).await;

    let ctx = ActionContext::new(node);
    let outcome = match AssertUnwindSafe(node.action.execute(&ctx)).catch_unwind().await {
        Ok(outcome) => outcome,
        Err(panic) => ActionOutcome::fail(format!(
            "Task {} panicked: {}",
            node.name,
            panic_message(panic.as_ref())
        )),
    };

    let mut diagnostics: Vec<Diagnostic> = outcome
        .diagnostics
        .into_iter()
        .map(|d| d.for_node(node.id.clone()))
        .collect();
    diagnostics.extend(job.classifier.classify(&node.id, &outcome.stdout, &outcome.stderr));

    if !outcome.success {
        let reason = outcome.error.unwrap_or_else(|| "task failed".to_string());
        error!(node = %node.id, reason = %reason, "Task failed");
        diagnostics.push(Diagnostic::error(reason.clone()).for_node(node.id.clone()));
        if let Err(e) = job.store.invalidate(&node.id).await {
            warn!(node = %node.id, error = %e, "Unable to invalidate state");
        }
        job.events
            .emit(
                events::TASK_FAILED,
                Some(json!({ "node": node.id, "error": reason, "exit_code": outcome.exit_code })),
            )
            .await;
        return NodeRun {
            status: NodeStatus::Failed,
            diagnostics,
            exit_code: outcome.exit_code,
            error: Some(reason),
            duration_ms: elapsed_ms(started),
        };
    }

    let output_hash = match compute_output_state(node).await {
        Ok(hash) => hash,
        Err(reason) => {
            if let Err(e) = job.store.invalidate(&node.id).await {
                warn!(node = %node.id, error = %e, "Unable to invalidate state");
            }
            let mut run = NodeRun::failed(&node.id, reason, started);
            diagnostics.append(&mut run.diagnostics);
            run.diagnostics = diagnostics;
            return run;
        }
    };

    let kept_revision = prior
        .filter(|p| fingerprint::outputs_confirm_unchanged(node) && p.output_hash == output_hash)
        .map(|p| p.revision);
    let changed = kept_revision.is_none();
    let revision =
        kept_revision.unwrap_or_else(|| fingerprint::fresh_revision(&fingerprint, &output_hash));
    let record = FingerprintRecord::new(fingerprint, output_hash)
        .with_upstream(upstream)
        .with_revision(revision);

    if let Err(e) = job.store.commit(&node.id, record).await {
        warn!(node = %node.id, error = %e, "Unable to commit state; task will run again next build");
    }

    let duration_ms = elapsed_ms(started);
    job.events
        .emit(
            events::TASK_COMPLETED,
            Some(json!({ "node": node.id, "duration_ms": duration_ms, "changed": changed })),
        )
        .await;

    NodeRun {
        status: NodeStatus::Succeeded,
        diagnostics,
        exit_code: outcome.exit_code,
        error: None,
        duration_ms,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actions::{ActionRegistry, FnAction, TaskAction};
    use crate::core::{Artifact, CommandSpec};
    use crate::events::CollectingEventSink;
    use crate::graph::{validate, GraphBuilder};
    use crate::model::{BuildRequest, Phase, Project, Target, WorkItem, Workspace};
    use crate::state::InMemoryStateStore;
    use crate::testing::{FailingAction, RecordingAction};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn item(name: &str, tool: &str) -> WorkItem {
        WorkItem::new(name, CommandSpec::new(name)).with_tool(tool)
    }

    fn target(name: &str, item: WorkItem) -> Target {
        Target::new(name).phase(Phase::new("Run").item(item))
    }

    fn plan(registry: ActionRegistry, project: Project) -> ValidatedGraph {
        let request = BuildRequest::new(Workspace::new("ws").project(project));
        let graph = GraphBuilder::new(Arc::new(registry)).build(&request).unwrap();
        validate(graph).unwrap()
    }

    #[derive(Debug, Default)]
    struct ConcurrencyGauge {
        current: AtomicUsize,
        peak: AtomicUsize,
    }

    #[async_trait]
    impl TaskAction for ConcurrencyGauge {
        fn kind(&self) -> &str {
            "Gauge"
        }

        async fn execute(&self, _ctx: &ActionContext<'_>) -> ActionOutcome {
            let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(20)).await;
            self.current.fetch_sub(1, Ordering::SeqCst);
            ActionOutcome::ok()
        }
    }

    #[tokio::test]
    async fn test_concurrency_is_bounded() {
        let gauge = Arc::new(ConcurrencyGauge::default());
        let mut project = Project::new("P");
        for name in ["A", "B", "C", "D", "E", "F"] {
            project = project.target(target(name, item(name, "gauge")));
        }
        let graph = plan(ActionRegistry::new().with("gauge", gauge.clone()), project);

        let executor = Executor::new(Arc::new(InMemoryStateStore::new()))
            .with_config(ExecutorConfig::default().with_max_concurrency(2));
        let report = executor.execute(&graph).await;

        assert!(report.success());
        assert_eq!(report.ran().len(), 6);
        assert_eq!(gauge.peak.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_second_run_is_null_build() {
        let recorder = Arc::new(RecordingAction::new());
        let project = Project::new("P")
            .target(target("Lib", item("lib", "record")))
            .target(target("App", item("app", "record")).depends_on("Lib"));
        let graph = plan(ActionRegistry::new().with("record", recorder.clone()), project);
        let executor = Executor::new(Arc::new(InMemoryStateStore::new()));

        let first = executor.execute(&graph).await;
        assert!(first.success());
        assert_eq!(recorder.execution_count(), 2);

        let second = executor.execute(&graph).await;
        assert!(second.is_null_build());
        assert!(second.dispatch_order.is_empty());
        assert_eq!(recorder.execution_count(), 2);
    }

    #[tokio::test]
    async fn test_failure_skips_dependents_only() {
        let failing = Arc::new(FailingAction::new("compiler crashed"));
        let registry = ActionRegistry::new()
            .with("fail", failing.clone())
            .with("record", Arc::new(RecordingAction::new()));
        let project = Project::new("P")
            .target(target("A", item("a", "fail")))
            .target(target("B", item("b", "record")).depends_on("A"))
            .target(target("C", item("c", "record")));
        let graph = plan(registry, project);

        let report = Executor::new(Arc::new(InMemoryStateStore::new()))
            .execute(&graph)
            .await;

        assert_eq!(report.status_of("P::A/0-Run/0"), Some(NodeStatus::Failed));
        assert_eq!(
            report.status_of("P::B/0-Run/0"),
            Some(NodeStatus::SkippedUpstreamFailure)
        );
        assert_eq!(report.status_of("P::C/0-Run/0"), Some(NodeStatus::Succeeded));
        assert!(!report.success());
        assert!(report.stopped.is_none());
        assert_eq!(failing.call_count(), 1);
        assert_eq!(report.errors().len(), 1);
    }

    #[tokio::test]
    async fn test_failure_is_not_remembered() {
        let failing = Arc::new(FailingAction::new("nope"));
        let project = Project::new("P").target(target("A", item("a", "fail")));
        let graph = plan(ActionRegistry::new().with("fail", failing.clone()), project);
        let executor = Executor::new(Arc::new(InMemoryStateStore::new()));

        executor.execute(&graph).await;
        executor.execute(&graph).await;
        assert_eq!(failing.call_count(), 2);
    }

    #[tokio::test]
    async fn test_stop_on_first_error() {
        let registry = ActionRegistry::new()
            .with("fail", Arc::new(FailingAction::new("boom")))
            .with("record", Arc::new(RecordingAction::new()));
        let project = Project::new("P")
            .target(target("A", item("a", "fail")))
            .target(target("B", item("b", "record")))
            .target(target("C", item("c", "record")));
        let graph = plan(registry, project);

        let report = Executor::new(Arc::new(InMemoryStateStore::new()))
            .with_config(
                ExecutorConfig::default()
                    .with_max_concurrency(1)
                    .with_failure_policy(FailurePolicy::StopOnFirstError),
            )
            .execute(&graph)
            .await;

        assert_eq!(report.status_of("P::A/0-Run/0"), Some(NodeStatus::Failed));
        assert_eq!(report.not_evaluated().len(), 2);
        assert_eq!(report.stopped.as_deref(), Some("stopped after 'P::A/0-Run/0' failed"));
    }

    #[tokio::test]
    async fn test_panicking_action_fails_its_node() {
        let panicking = FnAction::new("Panic", |_ctx: &ActionContext<'_>| -> ActionOutcome {
            panic!("tool exploded")
        });
        let project = Project::new("P").target(target("A", item("a", "panic")));
        let graph = plan(ActionRegistry::new().with("panic", Arc::new(panicking)), project);

        let report = Executor::new(Arc::new(InMemoryStateStore::new()))
            .execute(&graph)
            .await;

        let node = &report.nodes[&NodeId::from_raw("P::A/0-Run/0")];
        assert_eq!(node.status, NodeStatus::Failed);
        assert_eq!(node.error.as_deref(), Some("Task a panicked: tool exploded"));
    }

    #[tokio::test]
    async fn test_unchanged_output_cuts_off_consumers() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("schema.txt");
        let header = dir.path().join("gen.h");
        let object = dir.path().join("use.o");
        std::fs::write(&src, "v1").unwrap();

        let recorder = Arc::new(RecordingAction::new().with_fixed_content("generated"));
        let project = Project::new("P").target(
            Target::new("T")
                .phase(
                    Phase::new("Generate").item(
                        item("gen", "record")
                            .input(Artifact::file(&src))
                            .output(Artifact::file(&header)),
                    ),
                )
                .phase(
                    Phase::new("Compile").item(
                        item("use", "record")
                            .input(Artifact::file(&header))
                            .output(Artifact::file(&object)),
                    ),
                ),
        );
        let graph = plan(ActionRegistry::new().with("record", recorder.clone()), project);
        let executor = Executor::new(Arc::new(InMemoryStateStore::new()));

        assert!(executor.execute(&graph).await.success());
        std::fs::write(&src, "v2").unwrap();
        let report = executor.execute(&graph).await;

        assert_eq!(report.status_of("P::T/0-Generate/0"), Some(NodeStatus::Succeeded));
        assert_eq!(
            report.status_of("P::T/1-Compile/0"),
            Some(NodeStatus::SkippedUpToDate)
        );
        assert_eq!(recorder.count_matching("Generate"), 2);
        assert_eq!(recorder.count_matching("Compile"), 1);
    }

    #[tokio::test]
    async fn test_events_are_emitted() {
        let sink = Arc::new(CollectingEventSink::new());
        let project = Project::new("P")
            .target(target("A", item("a", "record")))
            .target(target("B", item("b", "fail")));
        let registry = ActionRegistry::new()
            .with("record", Arc::new(RecordingAction::new()))
            .with("fail", Arc::new(FailingAction::new("bad")));
        let graph = plan(registry, project);

        Executor::new(Arc::new(InMemoryStateStore::new()))
            .with_event_sink(sink.clone())
            .execute(&graph)
            .await;

        assert_eq!(sink.events_of_type(events::BUILD_STARTED).len(), 1);
        assert_eq!(sink.events_of_type(events::BUILD_COMPLETED).len(), 1);
        assert_eq!(sink.nodes_for(events::TASK_COMPLETED), vec!["P::A/0-Run/0"]);
        assert_eq!(sink.nodes_for(events::TASK_FAILED), vec!["P::B/0-Run/0"]);
    }

    #[tokio::test]
    async fn test_cancelled_before_start_runs_nothing() {
        let recorder = Arc::new(RecordingAction::new());
        let project = Project::new("P").target(target("A", item("a", "record")));
        let graph = plan(ActionRegistry::new().with("record", recorder.clone()), project);
        let token = CancellationToken::new();
        token.cancel("user interrupt");

        let report = Executor::new(Arc::new(InMemoryStateStore::new()))
            .with_cancellation(token)
            .execute(&graph)
            .await;

        assert_eq!(recorder.execution_count(), 0);
        assert_eq!(report.not_evaluated().len(), 1);
        assert_eq!(report.stopped.as_deref(), Some("user interrupt"));
        assert!(!report.success());
    }

    fn stop_on_error(max: usize) -> ExecutorConfig {
        ExecutorConfig::default()
            .with_max_concurrency(max)
            .with_failure_policy(FailurePolicy::StopOnFirstError)
    }

    #[tokio::test]
    async fn test_consumer_catches_up_after_interrupted_build() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("src.txt");
        std::fs::write(&src, "v1").unwrap();

        let recorder = Arc::new(RecordingAction::new());
        let registry = ActionRegistry::new()
            .with("record", recorder.clone())
            .with("fail", Arc::new(FailingAction::new("broken")));
        let project = Project::new("P")
            .target(target(
                "Gen",
                item("gen", "record")
                    .input(Artifact::file(&src))
                    .output(Artifact::virtual_output("done")),
            ))
            .target(target("Halt", item("halt", "fail")))
            .target(target(
                "Pack",
                item("pack", "record").input(Artifact::virtual_output("done")),
            ));
        let graph = plan(registry, project);
        let store: Arc<dyn StateStore> = Arc::new(InMemoryStateStore::new());
        let serial = ExecutorConfig::default().with_max_concurrency(1);
        let keep_going = Executor::new(Arc::clone(&store)).with_config(serial);
        let stopping = Executor::new(Arc::clone(&store)).with_config(stop_on_error(1));

        keep_going.execute(&graph).await;
        assert_eq!(recorder.count_matching("Pack"), 1);

        std::fs::write(&src, "v2").unwrap();
        let interrupted = stopping.execute(&graph).await;
        assert_eq!(interrupted.status_of("P::Gen/0-Run/0"), Some(NodeStatus::Succeeded));
        assert_eq!(interrupted.status_of("P::Pack/0-Run/0"), Some(NodeStatus::NotEvaluated));

        let resumed = keep_going.execute(&graph).await;
        assert_eq!(resumed.status_of("P::Gen/0-Run/0"), Some(NodeStatus::SkippedUpToDate));
        assert_eq!(resumed.status_of("P::Pack/0-Run/0"), Some(NodeStatus::Succeeded));
        assert_eq!(recorder.count_matching("Pack"), 2);

        let settled = keep_going.execute(&graph).await;
        assert_eq!(settled.status_of("P::Pack/0-Run/0"), Some(NodeStatus::SkippedUpToDate));
    }

    fn slow_chain(recorder: &Arc<RecordingAction>, with_failure: bool) -> ValidatedGraph {
        let mut registry = ActionRegistry::new().with("record", recorder.clone());
        let mut project = Project::new("P")
            .target(target("Slow", item("slow", "record")))
            .target(target("Next", item("next", "record")).depends_on("Slow"));
        if with_failure {
            registry = registry.with("fail", Arc::new(FailingAction::new("broken")));
            project = project.target(target("Bad", item("bad", "fail")));
        }
        plan(registry, project)
    }

    #[tokio::test]
    async fn test_running_task_finishes_after_first_error() {
        let recorder = Arc::new(
            RecordingAction::new().with_delay("slow", Duration::from_millis(50)),
        );
        let graph = slow_chain(&recorder, true);
        let store: Arc<dyn StateStore> = Arc::new(InMemoryStateStore::new());

        let report = Executor::new(Arc::clone(&store))
            .with_config(stop_on_error(2))
            .execute(&graph)
            .await;

        assert_eq!(report.status_of("P::Bad/0-Run/0"), Some(NodeStatus::Failed));
        assert_eq!(report.status_of("P::Slow/0-Run/0"), Some(NodeStatus::Succeeded));
        assert_eq!(report.status_of("P::Next/0-Run/0"), Some(NodeStatus::NotEvaluated));
        assert!(report.stopped.is_some());

        let followup = Executor::new(store).execute(&graph).await;
        assert_eq!(followup.status_of("P::Slow/0-Run/0"), Some(NodeStatus::SkippedUpToDate));
        assert_eq!(followup.status_of("P::Next/0-Run/0"), Some(NodeStatus::Succeeded));
        assert_eq!(recorder.count_matching("Slow"), 1);
    }

    #[tokio::test]
    async fn test_running_task_finishes_after_cancellation() {
        let recorder = Arc::new(
            RecordingAction::new().with_delay("slow", Duration::from_millis(100)),
        );
        let graph = slow_chain(&recorder, false);
        let store: Arc<dyn StateStore> = Arc::new(InMemoryStateStore::new());
        let token = CancellationToken::new();
        tokio::spawn({
            let token = Arc::clone(&token);
            async move {
                tokio::time::sleep(Duration::from_millis(20)).await;
                token.cancel("interrupted");
            }
        });

        let report = Executor::new(Arc::clone(&store))
            .with_cancellation(token)
            .execute(&graph)
            .await;

        assert_eq!(report.status_of("P::Slow/0-Run/0"), Some(NodeStatus::Succeeded));
        assert_eq!(report.status_of("P::Next/0-Run/0"), Some(NodeStatus::NotEvaluated));
        assert_eq!(report.stopped.as_deref(), Some("interrupted"));

        let followup = Executor::new(store).execute(&graph).await;
        assert_eq!(followup.status_of("P::Next/0-Run/0"), Some(NodeStatus::Succeeded));
        assert_eq!(recorder.count_matching("Slow"), 1);
        assert_eq!(recorder.count_matching("Next"), 1);
    }
}
