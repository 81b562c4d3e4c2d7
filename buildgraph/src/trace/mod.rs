//! Build trace records.
//!
//! When enabled, every build invocation appends one JSON line identifying
//! the build description it used. Repeated builds of an unchanged project
//! append identical lines, which makes the trace usable as a cross-run
//! identity check.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt::Debug;
use std::fs::OpenOptions;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use crate::fingerprint::Signature;

/// One trace entry. Field order is part of the format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TraceRecord {
    /// Build description signature.
    pub build_description_signature: Signature,
    /// Whether independent targets were allowed to build concurrently.
    pub target_parallelization_enabled: bool,
    /// Human-readable build name.
    pub name: String,
    /// Build description path.
    pub path: PathBuf,
}

impl TraceRecord {
    /// Serializes the record as a single JSON line, without the newline.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_line(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// Destination for trace records.
pub trait TraceSink: Send + Sync + Debug {
    /// Appends one record.
    ///
    /// # Errors
    ///
    /// Returns an error if the record cannot be written.
    fn record(&self, record: &TraceRecord) -> io::Result<()>;
}

/// Discards records.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpTraceSink;

impl TraceSink for NoOpTraceSink {
    fn record(&self, _record: &TraceRecord) -> io::Result<()> {
        Ok(())
    }
}

/// Appends newline-delimited JSON records to a file.
#[derive(Debug)]
pub struct NdjsonTraceSink {
    path: PathBuf,
    lock: Mutex<()>,
}

impl NdjsonTraceSink {
    /// Creates a sink appending to `path`. The file is created on first use.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    /// Returns the trace file path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl TraceSink for NdjsonTraceSink {
    fn record(&self, record: &TraceRecord) -> io::Result<()> {
        let mut line = record.to_line().map_err(io::Error::other)?;
        line.push('\n');

        let _guard = self.lock.lock();
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        file.write_all(line.as_bytes())?;
        file.flush()
    }
}

/// Keeps records in memory, for tests.
#[derive(Debug, Default)]
pub struct CollectingTraceSink {
    records: Mutex<Vec<TraceRecord>>,
}

impl CollectingTraceSink {
    /// Creates an empty sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns every record so far.
    #[must_use]
    pub fn records(&self) -> Vec<TraceRecord> {
        self.records.lock().clone()
    }
}

impl TraceSink for CollectingTraceSink {
    fn record(&self, record: &TraceRecord) -> io::Result<()> {
        self.records.lock().push(record.clone());
        Ok(())
    }
}
