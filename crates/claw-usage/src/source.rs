//! Task record sources.
//!
//! The raw record store lives outside this crate. [`TaskSource`] is the
//! boundary it is queried through; two implementations ship here:
//!
//! - [`InMemoryTaskSource`] for embedding and tests
//! - [`JsonLinesTaskSource`] reading one JSON record per line from a file

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use tracing::{debug, warn};

use crate::error::Result;
use crate::selector::{select, TaskFilter};
use crate::types::TaskRecord;
use crate::window::TimeWindow;

/// A queryable store of task records.
pub trait TaskSource: Send + Sync {
    /// Returns the source name for logging.
    fn name(&self) -> &str;

    /// Returns records overlapping `window` that match `filter`.
    ///
    /// Running records are measured up to `now`.
    ///
    /// # Errors
    ///
    /// Returns `UsageError::SourceUnavailable` or `UsageError::SourceTimeout`
    /// if the store cannot be read.
    fn query(&self, window: &TimeWindow, filter: &TaskFilter, now: DateTime<Utc>) -> Result<Vec<TaskRecord>>;
}

/// Records held in memory.
#[derive(Debug, Clone, Default)]
pub struct InMemoryTaskSource {
    records: Arc<RwLock<Vec<TaskRecord>>>,
}

impl InMemoryTaskSource {
    /// Creates an empty source.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a source holding `records`.
    #[must_use]
    pub fn with_records(records: Vec<TaskRecord>) -> Self {
        Self {
            records: Arc::new(RwLock::new(records)),
        }
    }

    /// Appends a record.
    pub fn push(&self, record: TaskRecord) {
        self.records.write().push(record);
    }

    /// Appends several records.
    pub fn extend(&self, records: impl IntoIterator<Item = TaskRecord>) {
        self.records.write().extend(records);
    }

    /// Returns the number of stored records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    /// Returns true if no record is stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }
}

impl TaskSource for InMemoryTaskSource {
    fn name(&self) -> &str {
        "memory"
    }

    fn query(&self, window: &TimeWindow, filter: &TaskFilter, now: DateTime<Utc>) -> Result<Vec<TaskRecord>> {
        Ok(select(self.records.read().iter(), window, filter, now))
    }
}

/// Records read from a JSON-lines file on every query.
///
/// Blank lines are ignored. Lines that fail to parse are logged and skipped.
#[derive(Debug, Clone)]
pub struct JsonLinesTaskSource {
    path: PathBuf,
}

impl JsonLinesTaskSource {
    /// Creates a source reading `path`.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Returns the file path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_all(&self) -> Result<Vec<TaskRecord>> {
        let reader = BufReader::new(File::open(&self.path)?);
        let mut records = Vec::new();

        for (idx, line) in reader.lines().enumerate() {
            let line = line?;
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            match serde_json::from_str::<TaskRecord>(trimmed) {
                Ok(record) => records.push(record),
                Err(e) => warn!(
                    path = %self.path.display(),
                    line = idx + 1,
                    error = %e,
                    "skipping unparsable task record"
                ),
            }
        }

        debug!(path = %self.path.display(), records = records.len(), "loaded task records");
        Ok(records)
    }
}

impl TaskSource for JsonLinesTaskSource {
    fn name(&self) -> &str {
        "jsonl"
    }

    fn query(&self, window: &TimeWindow, filter: &TaskFilter, now: DateTime<Utc>) -> Result<Vec<TaskRecord>> {
        let records = self.read_all()?;
        Ok(select(&records, window, filter, now))
    }
}
