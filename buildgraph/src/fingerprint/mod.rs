//! Fingerprint engine.
//!
//! Computes stable content signatures for task nodes and a whole-plan
//! signature for a finalized task graph. Every function here is pure apart
//! from reading declared inputs and outputs.

mod content;

pub use content::{hash_path, ContentHash};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeSet;
use std::fmt;

use crate::core::{Artifact, NodeId};
use crate::errors::FingerprintError;
use crate::graph::{TaskGraph, TaskNode};

const NODE_DOMAIN: &str = "buildgraph.node.v1";
const OUTPUT_DOMAIN: &str = "buildgraph.outputs.v1";
const PLAN_DOMAIN: &str = "buildgraph.plan.v1";
const UPSTREAM_DOMAIN: &str = "buildgraph.upstream.v1";
const REVISION_DOMAIN: &str = "buildgraph.revision.v1";

/// An opaque, hex-encoded SHA-256 signature.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Signature(String);

impl Signature {
    /// Wraps an existing hex string.
    #[must_use]
    pub fn from_hex(hex: impl Into<String>) -> Self {
        Self(hex.into())
    }

    /// Returns the hex string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Incremental hasher with tagged, length-prefixed fields.
///
/// Length prefixes keep `["ab", "c"]` and `["a", "bc"]` distinct.
#[derive(Debug, Clone)]
pub struct SignatureHasher {
    inner: Sha256,
}

impl SignatureHasher {
    /// Creates a hasher for a domain.
    #[must_use]
    pub fn new(domain: &str) -> Self {
        let mut hasher = Self {
            inner: Sha256::new(),
        };
        hasher.bytes("domain", domain.as_bytes());
        hasher
    }

    /// Adds a tagged byte field.
    pub fn bytes(&mut self, tag: &str, value: &[u8]) -> &mut Self {
        self.inner.update((tag.len() as u64).to_le_bytes());
        self.inner.update(tag.as_bytes());
        self.inner.update((value.len() as u64).to_le_bytes());
        self.inner.update(value);
        self
    }

    /// Adds a tagged string field.
    pub fn str(&mut self, tag: &str, value: &str) -> &mut Self {
        self.bytes(tag, value.as_bytes())
    }

    /// Adds a tagged boolean field.
    pub fn flag(&mut self, tag: &str, value: bool) -> &mut Self {
        self.bytes(tag, &[u8::from(value)])
    }

    /// Adds a tagged count, used before variable-length sequences.
    pub fn count(&mut self, tag: &str, value: usize) -> &mut Self {
        self.bytes(tag, &(value as u64).to_le_bytes())
    }

    /// Finishes and returns the signature.
    #[must_use]
    pub fn finish(self) -> Signature {
        Signature(hex::encode(self.inner.finalize()))
    }
}

fn hash_command(hasher: &mut SignatureHasher, node: &TaskNode) {
    let command_line = node.command.normalized_command_line();
    hasher.count("argc", command_line.len());
    for arg in &command_line {
        hasher.str("arg", arg);
    }
    hasher.count("envc", node.command.environment.len());
    for (key, value) in &node.command.environment {
        hasher.str("env.key", key).str("env.value", value);
    }
    let cwd = node
        .command
        .working_directory
        .as_ref()
        .map(|dir| dir.to_string_lossy().into_owned())
        .unwrap_or_default();
    hasher.str("cwd", &cwd);
}

fn sorted_artifacts(artifacts: &[Artifact]) -> BTreeSet<&Artifact> {
    artifacts.iter().collect()
}

/// Computes the fingerprint of a node: command, environment, working
/// directory, declared outputs, and the content of declared inputs.
///
/// # Errors
///
/// Returns [`FingerprintError::MissingInput`] if a declared file input does
/// not exist, or [`FingerprintError::Io`] if one cannot be read.
pub fn fingerprint(node: &TaskNode) -> Result<Signature, FingerprintError> {
    let mut hasher = SignatureHasher::new(NODE_DOMAIN);
    hasher.str("kind", &node.kind);
    hash_command(&mut hasher, node);
    hasher
        .flag("sandboxed", node.sandboxed)
        .flag("affects_indexing", node.affects_indexing);

    let inputs = sorted_artifacts(&node.inputs);
    hasher.count("inputs", inputs.len());
    for input in inputs {
        match input {
            Artifact::Virtual(name) => {
                hasher.str("input.virtual", name);
            }
            Artifact::File(path) => {
                let content = hash_path(path)
                    .map_err(|source| FingerprintError::Io {
                        path: path.clone(),
                        source,
                    })?
                    .ok_or_else(|| FingerprintError::MissingInput { path: path.clone() })?;
                hasher
                    .str("input.path", &path.to_string_lossy())
                    .str("input.content", content.as_str());
            }
        }
    }

    let outputs = sorted_artifacts(&node.outputs);
    hasher.count("outputs", outputs.len());
    for output in outputs {
        hasher.str("output", &output.to_string());
    }

    Ok(hasher.finish())
}

/// Hashes the current state of a node's declared outputs.
///
/// Missing files hash to an explicit marker rather than failing.
///
/// # Errors
///
/// Returns [`FingerprintError::Io`] if an existing output cannot be read.
pub fn output_state(node: &TaskNode) -> Result<Signature, FingerprintError> {
    let mut hasher = SignatureHasher::new(OUTPUT_DOMAIN);
    let outputs = sorted_artifacts(&node.outputs);
    hasher.count("outputs", outputs.len());
    for output in outputs {
        match output {
            Artifact::Virtual(name) => {
                hasher.str("virtual", name);
            }
            Artifact::File(path) => {
                let content = hash_path(path).map_err(|source| FingerprintError::Io {
                    path: path.clone(),
                    source,
                })?;
                hasher.str("path", &path.to_string_lossy());
                match content {
                    Some(content) => hasher.str("content", content.as_str()),
                    None => hasher.str("missing", ""),
                };
            }
        }
    }
    Ok(hasher.finish())
}

/// Returns true if an unchanged output hash proves the node's effect is
/// unchanged: every declared output is a file, and there is at least one.
#[must_use]
pub fn outputs_confirm_unchanged(node: &TaskNode) -> bool {
    !node.outputs.is_empty() && node.outputs.iter().all(|output| !output.is_virtual())
}

/// Returns true if every declared file output currently exists.
#[must_use]
pub fn outputs_present(node: &TaskNode) -> bool {
    node.outputs
        .iter()
        .filter_map(Artifact::path)
        .all(std::path::Path::exists)
}

/// Digests the committed revisions of a node's predecessors.
///
/// A predecessor without a record hashes to an explicit marker. Callers pass
/// predecessors in identity order.
#[must_use]
pub fn upstream_state<'a>(
    predecessors: impl IntoIterator<Item = (&'a NodeId, Option<&'a Signature>)>,
) -> Signature {
    let mut hasher = SignatureHasher::new(UPSTREAM_DOMAIN);
    for (id, revision) in predecessors {
        hasher.str("node", id.as_str());
        match revision {
            Some(revision) => hasher.str("revision", revision.as_str()),
            None => hasher.str("missing", ""),
        };
    }
    hasher.finish()
}

/// Mints a revision for a run whose effect successors cannot prove equal to
/// the previous one. Unique per call.
#[must_use]
pub fn fresh_revision(fingerprint: &Signature, output_hash: &Signature) -> Signature {
    let mut hasher = SignatureHasher::new(REVISION_DOMAIN);
    hasher
        .str("fingerprint", fingerprint.as_str())
        .str("outputs", output_hash.as_str())
        .str("run", &uuid::Uuid::new_v4().to_string());
    hasher.finish()
}

/// Computes the build description signature of a finalized graph.
///
/// Covers structure and settings only, never execution results or input
/// content, so unchanged projects hash identically across processes.
#[must_use]
pub fn plan_signature(graph: &TaskGraph) -> Signature {
    let mut hasher = SignatureHasher::new(PLAN_DOMAIN);
    hasher
        .str("name", graph.name())
        .str("scope", &graph.scope().to_string())
        .flag("parallelize_targets", graph.parallelize_targets());

    hasher.count("settings", graph.settings().len());
    for (key, value) in graph.settings() {
        hasher.str("setting.key", key).str("setting.value", value);
    }

    let mut nodes: Vec<&TaskNode> = graph.nodes().collect();
    nodes.sort_by(|a, b| a.id.cmp(&b.id));
    hasher.count("nodes", nodes.len());
    for node in nodes {
        hasher
            .str("node", node.id.as_str())
            .str("kind", &node.kind)
            .flag("always_out_of_date", node.always_out_of_date)
            .flag("sandboxed", node.sandboxed)
            .flag("affects_indexing", node.affects_indexing);
        hash_command(&mut hasher, node);
        let inputs = sorted_artifacts(&node.inputs);
        hasher.count("inputs", inputs.len());
        for input in inputs {
            hasher.str("input", &input.to_string());
        }
        let outputs = sorted_artifacts(&node.outputs);
        hasher.count("outputs", outputs.len());
        for output in outputs {
            hasher.str("output", &output.to_string());
        }
    }

    let mut edges: Vec<(String, String, String)> = graph
        .edges()
        .map(|(from, to, kind)| (from.to_string(), to.to_string(), kind.label()))
        .collect();
    edges.sort();
    hasher.count("edges", edges.len());
    for (from, to, kind) in &edges {
        hasher.str("edge.from", from).str("edge.to", to).str("edge.kind", kind);
    }

    hasher.finish()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actions::ProcessAction;
    use crate::core::{CommandSpec, NodeId, TargetId};
    use crate::model::WorkItem;
    use std::sync::Arc;

    fn node(item: WorkItem) -> TaskNode {
        TaskNode::from_work_item(
            NodeId::from_raw("P::T/0-Compile/0"),
            TargetId::new("P", "T"),
            0,
            item,
            Arc::new(ProcessAction),
        )
    }

    fn compile(flag: &str) -> WorkItem {
        WorkItem::new("Compile", CommandSpec::new("cc").arg(flag).arg("-c"))
    }

    #[test]
    fn test_hasher_is_length_prefixed() {
        let mut a = SignatureHasher::new("test");
        a.str("arg", "ab").str("arg", "c");
        let mut b = SignatureHasher::new("test");
        b.str("arg", "a").str("arg", "bc");
        assert_ne!(a.finish(), b.finish());
    }

    #[test]
    fn test_hasher_domain_separation() {
        assert_ne!(
            SignatureHasher::new("one").finish(),
            SignatureHasher::new("two").finish()
        );
    }

    #[test]
    fn test_signature_is_hex_sha256() {
        let sig = SignatureHasher::new("x").finish();
        assert_eq!(sig.as_str().len(), 64);
        assert!(sig.as_str().chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_flag_change_changes_fingerprint() {
        let a = fingerprint(&node(compile("-DFOO"))).unwrap();
        let b = fingerprint(&node(compile("-DBAR"))).unwrap();
        assert_ne!(a, b);
        assert_eq!(a, fingerprint(&node(compile("-DFOO"))).unwrap());
    }

    #[test]
    fn test_input_declaration_order_is_irrelevant() {
        let dir = tempfile::tempdir().unwrap();
        let x = dir.path().join("x.h");
        let y = dir.path().join("y.h");
        std::fs::write(&x, "x").unwrap();
        std::fs::write(&y, "y").unwrap();

        let forward = compile("-O2").input(Artifact::file(&x)).input(Artifact::file(&y));
        let reverse = compile("-O2").input(Artifact::file(&y)).input(Artifact::file(&x));
        assert_eq!(
            fingerprint(&node(forward)).unwrap(),
            fingerprint(&node(reverse)).unwrap()
        );
    }

    #[test]
    fn test_input_content_change_changes_fingerprint() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("main.c");
        std::fs::write(&src, "int main() { return 0; }").unwrap();
        let item = compile("-O2").input(Artifact::file(&src));

        let before = fingerprint(&node(item.clone())).unwrap();
        std::fs::write(&src, "int main() { return 1; }").unwrap();
        assert_ne!(before, fingerprint(&node(item)).unwrap());
    }

    #[test]
    fn test_missing_input_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("gone.h");
        let err = fingerprint(&node(compile("-O2").input(Artifact::file(&missing)))).unwrap_err();
        assert!(matches!(err, FingerprintError::MissingInput { path } if path == missing));
    }

    #[test]
    fn test_output_state_marks_missing_files() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("main.o");
        let n = node(compile("-O2").output(Artifact::file(&out)));

        let missing = output_state(&n).unwrap();
        assert!(!outputs_present(&n));
        std::fs::write(&out, "obj").unwrap();
        assert_ne!(missing, output_state(&n).unwrap());
        assert!(outputs_present(&n));
    }

    #[test]
    fn test_only_file_outputs_confirm_unchanged() {
        let file = node(compile("-O2").output(Artifact::file("/tmp/out.o")));
        let virtual_only = node(compile("-O2").output(Artifact::virtual_output("done")));
        let none = node(compile("-O2"));
        assert!(outputs_confirm_unchanged(&file));
        assert!(!outputs_confirm_unchanged(&virtual_only));
        assert!(!outputs_confirm_unchanged(&none));
    }

    #[test]
    fn test_upstream_state_tracks_predecessor_revisions() {
        let gen = NodeId::from_raw("App::Gen/0-Run/0");
        let lib = NodeId::from_raw("App::Lib/0-Run/0");
        let r1 = Signature::from_hex("r1");
        let r2 = Signature::from_hex("r2");

        let base = upstream_state([(&gen, Some(&r1)), (&lib, Some(&r2))]);
        assert_eq!(base, upstream_state([(&gen, Some(&r1)), (&lib, Some(&r2))]));
        assert_ne!(base, upstream_state([(&gen, Some(&r2)), (&lib, Some(&r2))]));
        assert_ne!(base, upstream_state([(&gen, None), (&lib, Some(&r2))]));
        assert_ne!(base, upstream_state([(&gen, Some(&r1))]));
    }

    #[test]
    fn test_fresh_revisions_are_unique() {
        let fp = Signature::from_hex("fp");
        let out = Signature::from_hex("out");
        assert_ne!(fresh_revision(&fp, &out), fresh_revision(&fp, &out));
    }
}
