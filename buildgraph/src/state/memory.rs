//! In-memory state store.

use async_trait::async_trait;
use dashmap::DashMap;
use std::collections::BTreeMap;

use super::{FingerprintRecord, StateSnapshot, StateStore};
use crate::core::NodeId;
use crate::errors::StateStoreError;

/// State store that lives only as long as the process.
#[derive(Debug, Default)]
pub struct InMemoryStateStore {
    records: DashMap<NodeId, FingerprintRecord>,
}

impl InMemoryStateStore {
    /// Creates a new empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Returns true if the store is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[async_trait]
impl StateStore for InMemoryStateStore {
    async fn load(&self) -> Result<BTreeMap<NodeId, FingerprintRecord>, StateStoreError> {
        Ok(self
            .records
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect())
    }

    async fn get(&self, id: &NodeId) -> Option<FingerprintRecord> {
        self.records.get(id).map(|entry| entry.value().clone())
    }

    async fn commit(&self, id: &NodeId, record: FingerprintRecord) -> Result<(), StateStoreError> {
        self.records.insert(id.clone(), record);
        Ok(())
    }

    async fn invalidate(&self, id: &NodeId) -> Result<(), StateStoreError> {
        self.records.remove(id);
        Ok(())
    }

    async fn snapshot(&self) -> StateSnapshot {
        StateSnapshot::new(self.load().await.unwrap_or_default())
    }

    async fn clear(&self) -> Result<(), StateStoreError> {
        self.records.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fingerprint::Signature;

    fn record(fp: &str) -> FingerprintRecord {
        FingerprintRecord::new(Signature::from_hex(fp), Signature::from_hex("out"))
    }

    #[tokio::test]
    async fn test_commit_get_invalidate() {
        let store = InMemoryStateStore::new();
        let id = NodeId::from_raw("P::A/0-S/0");

        assert!(store.get(&id).await.is_none());
        store.commit(&id, record("aa")).await.unwrap();
        assert_eq!(store.get(&id).await, Some(record("aa")));

        store.commit(&id, record("bb")).await.unwrap();
        assert_eq!(store.len(), 1);
        assert_eq!(store.snapshot().await.get(&id), Some(&record("bb")));

        store.invalidate(&id).await.unwrap();
        assert!(store.is_empty());
    }
}
