//! Persistence of per-kind run markers.
//!
//! A marker records the end of the last report window that was confirmed
//! delivered. Only the scheduler writes markers.

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{ReportError, Result};
use crate::kind::ReportKind;

/// The last successful run of one report kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportRun {
    /// Report kind.
    pub kind: ReportKind,
    /// End of the last delivered window.
    pub last_successful_window_end: DateTime<Utc>,
}

/// Storage for run markers.
pub trait RunMarkerStore: Send + Sync + std::fmt::Debug {
    /// Loads the marker for `kind`, if one was ever saved.
    ///
    /// # Errors
    ///
    /// Returns `ReportError::MarkerStore` if the store cannot be read.
    fn load(&self, kind: ReportKind) -> Result<Option<DateTime<Utc>>>;

    /// Saves the marker for `kind`.
    ///
    /// # Errors
    ///
    /// Returns `ReportError::MarkerStore` if the store cannot be written.
    fn save(&self, kind: ReportKind, window_end: DateTime<Utc>) -> Result<()>;

    /// Loads every saved marker.
    ///
    /// # Errors
    ///
    /// Returns `ReportError::MarkerStore` if the store cannot be read.
    fn load_all(&self) -> Result<Vec<ReportRun>> {
        let mut runs = Vec::new();
        for kind in ReportKind::ALL {
            if let Some(end) = self.load(kind)? {
                runs.push(ReportRun {
                    kind,
                    last_successful_window_end: end,
                });
            }
        }
        Ok(runs)
    }
}

/// Markers held in memory.
#[derive(Debug, Default)]
pub struct MemoryMarkerStore {
    markers: RwLock<HashMap<ReportKind, DateTime<Utc>>>,
}

impl MemoryMarkerStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl RunMarkerStore for MemoryMarkerStore {
    fn load(&self, kind: ReportKind) -> Result<Option<DateTime<Utc>>> {
        Ok(self.markers.read().get(&kind).copied())
    }

    fn save(&self, kind: ReportKind, window_end: DateTime<Utc>) -> Result<()> {
        self.markers.write().insert(kind, window_end);
        Ok(())
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct MarkerFile {
    version: u32,
    markers: BTreeMap<String, DateTime<Utc>>,
}

/// Markers kept in one JSON file.
///
/// Writes go to a temporary sibling file that is then renamed over the
/// existing one, so a crash never leaves a truncated file behind.
#[derive(Debug)]
pub struct JsonMarkerStore {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl JsonMarkerStore {
    /// File name used inside a state directory.
    pub const FILE_NAME: &'static str = "report-markers.json";

    const VERSION: u32 = 1;

    /// Creates a store backed by `path`. The file need not exist yet.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    /// Creates a store for a state directory.
    #[must_use]
    pub fn in_dir(state_dir: impl AsRef<Path>) -> Self {
        Self::new(state_dir.as_ref().join(Self::FILE_NAME))
    }

    /// Returns the backing file path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read(&self) -> Result<MarkerFile> {
        if !self.path.exists() {
            return Ok(MarkerFile {
                version: Self::VERSION,
                markers: BTreeMap::new(),
            });
        }
        let contents = fs::read_to_string(&self.path)?;
        let file: MarkerFile = serde_json::from_str(&contents)?;
        if file.version != Self::VERSION {
            return Err(ReportError::MarkerStore {
                reason: format!("unsupported marker file version {}", file.version),
            });
        }
        Ok(file)
    }

    fn write(&self, file: &MarkerFile) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(file)?;
        let temp_path = self.path.with_extension("json.tmp");
        fs::write(&temp_path, json)?;
        fs::rename(&temp_path, &self.path)?;
        Ok(())
    }
}

impl RunMarkerStore for JsonMarkerStore {
    fn load(&self, kind: ReportKind) -> Result<Option<DateTime<Utc>>> {
        Ok(self.read()?.markers.get(kind.as_str()).copied())
    }

    fn save(&self, kind: ReportKind, window_end: DateTime<Utc>) -> Result<()> {
        let _guard = self.write_lock.lock();
        let mut file = self.read()?;
        file.markers.insert(kind.as_str().to_string(), window_end);
        self.write(&file)?;
        debug!(kind = %kind, window_end = %window_end, path = %self.path.display(), "saved report marker");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn instant(d: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 8, d, 0, 0, 0).unwrap()
    }

    mod memory_tests {
        use super::*;

        #[test]
        fn save_and_load() {
            let store = MemoryMarkerStore::new();
            assert!(store.load(ReportKind::Daily).unwrap().is_none());
            store.save(ReportKind::Daily, instant(3)).unwrap();
            assert_eq!(store.load(ReportKind::Daily).unwrap(), Some(instant(3)));
            assert!(store.load(ReportKind::Weekly).unwrap().is_none());
        }

        #[test]
        fn load_all_lists_saved_kinds() {
            let store = MemoryMarkerStore::new();
            store.save(ReportKind::Monthly, instant(1)).unwrap();
            store.save(ReportKind::Daily, instant(2)).unwrap();
            let runs = store.load_all().unwrap();
            let kinds: Vec<_> = runs.iter().map(|r| r.kind).collect();
            assert_eq!(kinds, vec![ReportKind::Daily, ReportKind::Monthly]);
        }
    }

    mod json_tests {
        use super::*;

        #[test]
        fn missing_file_has_no_markers() {
            let dir = tempfile::tempdir().unwrap();
            let store = JsonMarkerStore::in_dir(dir.path());
            assert!(store.load(ReportKind::Yearly).unwrap().is_none());
        }

        #[test]
        fn markers_persist_across_instances() {
            let dir = tempfile::tempdir().unwrap();
            {
                let store = JsonMarkerStore::in_dir(dir.path());
                store.save(ReportKind::Daily, instant(5)).unwrap();
                store.save(ReportKind::Weekly, instant(4)).unwrap();
            }
            let reopened = JsonMarkerStore::in_dir(dir.path());
            assert_eq!(reopened.load(ReportKind::Daily).unwrap(), Some(instant(5)));
            assert_eq!(reopened.load(ReportKind::Weekly).unwrap(), Some(instant(4)));
            assert!(!dir.path().join("report-markers.json.tmp").exists());
        }

        #[test]
        fn creates_missing_parent_directories() {
            let dir = tempfile::tempdir().unwrap();
            let store = JsonMarkerStore::in_dir(dir.path().join("nested/state"));
            store.save(ReportKind::Monthly, instant(1)).unwrap();
            assert!(store.path().exists());
        }

        #[test]
        fn corrupt_file_is_an_error() {
            let dir = tempfile::tempdir().unwrap();
            let store = JsonMarkerStore::in_dir(dir.path());
            fs::write(store.path(), "{not json").unwrap();
            assert!(matches!(
                store.load(ReportKind::Daily),
                Err(ReportError::Serialization(_))
            ));
        }

        #[test]
        fn unknown_version_is_rejected() {
            let dir = tempfile::tempdir().unwrap();
            let store = JsonMarkerStore::in_dir(dir.path());
            fs::write(store.path(), r#"{"version": 9, "markers": {}}"#).unwrap();
            assert!(matches!(
                store.load(ReportKind::Daily),
                Err(ReportError::MarkerStore { .. })
            ));
        }
    }
}
