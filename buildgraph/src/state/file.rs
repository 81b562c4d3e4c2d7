//! Journal-backed state store scoped to one build root.
//!
//! State lives in `<root>/<state dir>/state.jsonl`: one JSON entry per line,
//! replayed in order so the last entry for a node wins. A `null` record
//! forgets the node. Lines that fail to parse, or carry another journal
//! version, are discarded and the affected nodes simply run again.

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io;
use std::path::{Path, PathBuf};
use tokio::fs::{self, File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

use super::{FingerprintRecord, LoadStats, StateSnapshot, StateStore};
use crate::core::NodeId;
use crate::errors::StateStoreError;

/// Journal format version; entries with any other version are discarded.
pub const JOURNAL_VERSION: u32 = 2;

/// Default state directory inside a build root.
pub const DEFAULT_STATE_DIR: &str = "BuildData";

const JOURNAL_FILE: &str = "state.jsonl";

#[derive(Debug, Serialize, Deserialize)]
struct JournalEntry {
    version: u32,
    id: NodeId,
    record: Option<FingerprintRecord>,
}

#[derive(Debug, Default)]
struct Writer {
    file: Option<File>,
    /// The journal ends in a partial line that must be terminated first.
    needs_newline: bool,
}

/// State store persisted as an append-only journal.
#[derive(Debug)]
pub struct FileStateStore {
    path: PathBuf,
    records: Mutex<BTreeMap<NodeId, FingerprintRecord>>,
    stats: Mutex<LoadStats>,
    writer: tokio::sync::Mutex<Writer>,
}

impl FileStateStore {
    /// Creates a store for a build root using the default state directory.
    #[must_use]
    pub fn new(build_root: impl AsRef<Path>) -> Self {
        Self::with_state_dir(build_root, DEFAULT_STATE_DIR)
    }

    /// Creates a store for a build root with a custom state directory name.
    #[must_use]
    pub fn with_state_dir(build_root: impl AsRef<Path>, state_dir: &str) -> Self {
        Self {
            path: build_root.as_ref().join(state_dir).join(JOURNAL_FILE),
            records: Mutex::new(BTreeMap::new()),
            stats: Mutex::new(LoadStats::default()),
            writer: tokio::sync::Mutex::new(Writer::default()),
        }
    }

    /// Returns the journal path.
    #[must_use]
    pub fn journal_path(&self) -> &Path {
        &self.path
    }

    fn io_error(&self, source: io::Error) -> StateStoreError {
        StateStoreError::Io {
            path: self.path.clone(),
            source,
        }
    }

    async fn append(&self, entry: &JournalEntry) -> Result<(), StateStoreError> {
        let mut line = serde_json::to_string(entry)
            .map_err(|e| StateStoreError::Encoding(e.to_string()))?;
        line.push('\n');

        let mut writer = self.writer.lock().await;
        if writer.file.is_none() {
            if let Some(parent) = self.path.parent() {
                fs::create_dir_all(parent)
                    .await
                    .map_err(|e| self.io_error(e))?;
            }
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&self.path)
                .await
                .map_err(|e| self.io_error(e))?;
            writer.file = Some(file);
        }
        if writer.needs_newline {
            line.insert(0, '\n');
            writer.needs_newline = false;
        }
        if let Some(file) = writer.file.as_mut() {
            file.write_all(line.as_bytes())
                .await
                .map_err(|e| self.io_error(e))?;
            file.flush().await.map_err(|e| self.io_error(e))?;
        }
        Ok(())
    }
}

/// Replays journal text into records, counting unusable lines.
fn replay(text: &str) -> (BTreeMap<NodeId, FingerprintRecord>, usize) {
    let mut records = BTreeMap::new();
    let mut discarded = 0;
    for (line_no, line) in text.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<JournalEntry>(line) {
            Ok(entry) if entry.version == JOURNAL_VERSION => match entry.record {
                Some(record) => {
                    records.insert(entry.id, record);
                }
                None => {
                    records.remove(&entry.id);
                }
            },
            Ok(entry) => {
                warn!(line = line_no + 1, version = entry.version, "Discarding state entry with unknown version");
                discarded += 1;
            }
            Err(e) => {
                warn!(line = line_no + 1, error = %e, "Discarding malformed state entry");
                discarded += 1;
            }
        }
    }
    (records, discarded)
}

#[async_trait]
impl StateStore for FileStateStore {
    async fn load(&self) -> Result<BTreeMap<NodeId, FingerprintRecord>, StateStoreError> {
        let bytes = match fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => Vec::new(),
            Err(e) => return Err(self.io_error(e)),
        };
        let text = String::from_utf8_lossy(&bytes);
        let (records, discarded) = replay(&text);

        {
            let mut writer = self.writer.lock().await;
            writer.needs_newline = !bytes.is_empty() && !bytes.ends_with(b"\n");
        }

        let stats = LoadStats {
            records: records.len(),
            discarded,
        };
        if discarded > 0 {
            warn!(path = %self.path.display(), discarded, "Recovered from corrupt build state");
        }
        debug!(path = %self.path.display(), records = stats.records, "Loaded build state");

        *self.stats.lock() = stats;
        *self.records.lock() = records.clone();
        Ok(records)
    }

    async fn get(&self, id: &NodeId) -> Option<FingerprintRecord> {
        self.records.lock().get(id).cloned()
    }

    async fn commit(&self, id: &NodeId, record: FingerprintRecord) -> Result<(), StateStoreError> {
        let entry = JournalEntry {
            version: JOURNAL_VERSION,
            id: id.clone(),
            record: Some(record.clone()),
        };
        self.append(&entry).await?;
        self.records.lock().insert(id.clone(), record);
        Ok(())
    }

    async fn invalidate(&self, id: &NodeId) -> Result<(), StateStoreError> {
        let known = self.records.lock().remove(id).is_some();
        if known {
            let entry = JournalEntry {
                version: JOURNAL_VERSION,
                id: id.clone(),
                record: None,
            };
            self.append(&entry).await?;
        }
        Ok(())
    }

    async fn snapshot(&self) -> StateSnapshot {
        StateSnapshot::new(self.records.lock().clone())
    }

    async fn clear(&self) -> Result<(), StateStoreError> {
        let mut writer = self.writer.lock().await;
        writer.file = None;
        writer.needs_newline = false;
        match fs::remove_file(&self.path).await {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(self.io_error(e)),
        }
        self.records.lock().clear();
        info!(path = %self.path.display(), "Removed build state");
        Ok(())
    }

    async fn compact(&self) -> Result<(), StateStoreError> {
        let records = self.records.lock().clone();
        let mut text = String::new();
        for (id, record) in records {
            let entry = JournalEntry {
                version: JOURNAL_VERSION,
                id,
                record: Some(record),
            };
            text.push_str(
                &serde_json::to_string(&entry)
                    .map_err(|e| StateStoreError::Encoding(e.to_string()))?,
            );
            text.push('\n');
        }

        let mut writer = self.writer.lock().await;
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| self.io_error(e))?;
        }
        let tmp = self.path.with_extension("jsonl.tmp");
        fs::write(&tmp, text).await.map_err(|e| self.io_error(e))?;
        fs::rename(&tmp, &self.path)
            .await
            .map_err(|e| self.io_error(e))?;
        writer.file = None;
        writer.needs_newline = false;
        debug!(path = %self.path.display(), "Compacted build state");
        Ok(())
    }

    fn load_stats(&self) -> LoadStats {
        *self.stats.lock()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fingerprint::Signature;

    fn record(fp: &str) -> FingerprintRecord {
        FingerprintRecord::new(Signature::from_hex(fp), Signature::from_hex("out"))
    }

    fn id(raw: &str) -> NodeId {
        NodeId::from_raw(raw)
    }

    #[tokio::test]
    async fn test_records_survive_reopen() {
        let root = tempfile::tempdir().unwrap();
        let store = FileStateStore::new(root.path());
        store.load().await.unwrap();
        store.commit(&id("P::A/0-S/0"), record("aa")).await.unwrap();
        store.commit(&id("P::A/0-S/1"), record("bb")).await.unwrap();
        store.commit(&id("P::A/0-S/0"), record("cc")).await.unwrap();
        store.invalidate(&id("P::A/0-S/1")).await.unwrap();
        drop(store);

        let reopened = FileStateStore::new(root.path());
        let records = reopened.load().await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records.get(&id("P::A/0-S/0")), Some(&record("cc")));
        assert_eq!(reopened.load_stats(), LoadStats { records: 1, discarded: 0 });
    }

    #[tokio::test]
    async fn test_dependency_state_survives_reopen() {
        let root = tempfile::tempdir().unwrap();
        let stored = record("aa")
            .with_upstream(Signature::from_hex("up"))
            .with_revision(Signature::from_hex("rev"));
        let store = FileStateStore::new(root.path());
        store.commit(&id("P::Pack/0-S/0"), stored.clone()).await.unwrap();
        drop(store);

        let reopened = FileStateStore::new(root.path());
        let records = reopened.load().await.unwrap();
        let loaded = &records[&id("P::Pack/0-S/0")];
        assert_eq!(loaded, &stored);
        assert_eq!(loaded.upstream.as_str(), "up");
        assert_eq!(loaded.revision.as_str(), "rev");
    }

    #[tokio::test]
    async fn test_separate_roots_are_independent() {
        let one = tempfile::tempdir().unwrap();
        let two = tempfile::tempdir().unwrap();
        let first = FileStateStore::new(one.path());
        first.commit(&id("P::A/0-S/0"), record("aa")).await.unwrap();

        let second = FileStateStore::new(two.path());
        assert!(second.load().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_corrupt_lines_are_discarded() {
        let root = tempfile::tempdir().unwrap();
        let store = FileStateStore::new(root.path());
        store.commit(&id("P::A/0-S/0"), record("aa")).await.unwrap();
        drop(store);

        let path = root.path().join(DEFAULT_STATE_DIR).join(JOURNAL_FILE);
        let mut text = std::fs::read_to_string(&path).unwrap();
        text.push_str("{not json}\n");
        text.push_str("{\"version\":99,\"id\":\"P::B/0-S/0\",\"record\":null}\n");
        text.push_str("{\"version\":2,\"id\":\"P::C/0-S/0\",\"rec");
        std::fs::write(&path, text).unwrap();

        let store = FileStateStore::new(root.path());
        let records = store.load().await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(store.load_stats().discarded, 3);

        // The truncated tail must not swallow the next entry.
        store.commit(&id("P::D/0-S/0"), record("dd")).await.unwrap();
        let reopened = FileStateStore::new(root.path());
        assert_eq!(reopened.load().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_compact_and_clear() {
        let root = tempfile::tempdir().unwrap();
        let store = FileStateStore::new(root.path());
        for fp in ["a", "b", "c"] {
            store.commit(&id("P::A/0-S/0"), record(fp)).await.unwrap();
        }
        store.compact().await.unwrap();
        let text = std::fs::read_to_string(store.journal_path()).unwrap();
        assert_eq!(text.lines().count(), 1);

        store.commit(&id("P::A/0-S/1"), record("d")).await.unwrap();
        assert_eq!(FileStateStore::new(root.path()).load().await.unwrap().len(), 2);

        store.clear().await.unwrap();
        assert!(!store.journal_path().exists());
        assert!(store.snapshot().await.is_empty());
    }
}
