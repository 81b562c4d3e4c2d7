//! Incremental state store.
//!
//! Persists, across build invocations, the fingerprint and output hash of
//! every node that last ran successfully, keyed by stable node identity.
//! Stores are scoped to one build-output root.

mod file;
mod memory;

pub use file::{FileStateStore, DEFAULT_STATE_DIR, JOURNAL_VERSION};
pub use memory::InMemoryStateStore;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::Debug;

use crate::core::NodeId;
use crate::errors::StateStoreError;
use crate::fingerprint::Signature;

/// What is remembered about a node's last successful run.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FingerprintRecord {
    /// Node fingerprint at the time it ran.
    pub fingerprint: Signature,
    /// Hash of the declared outputs after it ran.
    pub output_hash: Signature,
    /// Digest of the predecessors' revisions the run consumed.
    pub upstream: Signature,
    /// Changes whenever a run may have changed what successors see; kept
    /// when the outputs are confirmed byte-identical.
    pub revision: Signature,
}

impl FingerprintRecord {
    /// Creates a record with no predecessors whose revision is its output
    /// hash.
    #[must_use]
    pub fn new(fingerprint: Signature, output_hash: Signature) -> Self {
        Self {
            fingerprint,
            revision: output_hash.clone(),
            output_hash,
            upstream: Signature::from_hex(""),
        }
    }

    /// Sets the digest of consumed predecessor revisions.
    #[must_use]
    pub fn with_upstream(mut self, upstream: Signature) -> Self {
        self.upstream = upstream;
        self
    }

    /// Sets the revision successors will consume.
    #[must_use]
    pub fn with_revision(mut self, revision: Signature) -> Self {
        self.revision = revision;
        self
    }
}

/// Counters gathered while loading persisted state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct LoadStats {
    /// Live records after replay.
    pub records: usize,
    /// Journal lines that could not be used.
    pub discarded: usize,
}

/// A point-in-time copy of every record.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StateSnapshot {
    records: BTreeMap<NodeId, FingerprintRecord>,
}

impl StateSnapshot {
    pub(crate) fn new(records: BTreeMap<NodeId, FingerprintRecord>) -> Self {
        Self { records }
    }

    /// Returns the record for a node.
    #[must_use]
    pub fn get(&self, id: &NodeId) -> Option<&FingerprintRecord> {
        self.records.get(id)
    }

    /// Returns the number of records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Returns true if there are no records.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Iterates over records in identity order.
    pub fn iter(&self) -> impl Iterator<Item = (&NodeId, &FingerprintRecord)> {
        self.records.iter()
    }
}

/// Persistence backend for fingerprint records.
///
/// All mutation goes through `commit` and `invalidate`; running node bodies
/// never see the store directly.
#[async_trait]
pub trait StateStore: Send + Sync + Debug {
    /// Reads persisted state, discarding anything unusable.
    async fn load(&self) -> Result<BTreeMap<NodeId, FingerprintRecord>, StateStoreError>;

    /// Returns the current record for a node.
    async fn get(&self, id: &NodeId) -> Option<FingerprintRecord>;

    /// Records a successful run.
    async fn commit(&self, id: &NodeId, record: FingerprintRecord) -> Result<(), StateStoreError>;

    /// Forgets a node, forcing it to run next time.
    async fn invalidate(&self, id: &NodeId) -> Result<(), StateStoreError>;

    /// Returns a copy of every record.
    async fn snapshot(&self) -> StateSnapshot;

    /// Forgets every node.
    async fn clear(&self) -> Result<(), StateStoreError>;

    /// Rewrites persisted state in its most compact form.
    async fn compact(&self) -> Result<(), StateStoreError> {
        Ok(())
    }

    /// Returns statistics from the last load.
    fn load_stats(&self) -> LoadStats {
        LoadStats::default()
    }
}
