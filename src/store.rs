use std::fs;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;
use uuid::Uuid;

use crate::models::{DailySnapshot, Level};
use crate::retention::RetentionIndex;

/// Opaque reference to a stored daily snapshot. Only the store that issued it
/// knows how to resolve it.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SnapshotRef(pub String);

impl std::fmt::Display for SnapshotRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("failed to write snapshot {path}: {source}")]
    SnapshotWrite {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to read snapshot {reference}: {source}")]
    SnapshotRead {
        reference: SnapshotRef,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to delete snapshot {reference}: {source}")]
    SnapshotDelete {
        reference: SnapshotRef,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to load retention index for {level}: {message}")]
    IndexLoad { level: Level, message: String },

    #[error("failed to save retention index for {level}: {message}")]
    IndexSave { level: Level, message: String },

    #[error("malformed snapshot JSON in {reference}: {source}")]
    SnapshotParse {
        reference: SnapshotRef,
        #[source]
        source: serde_json::Error,
    },
}

/// Storage for daily snapshot documents.
pub trait SnapshotStore {
    fn put(&self, snapshot: &DailySnapshot) -> Result<SnapshotRef, StoreError>;
    fn get(&self, reference: &SnapshotRef) -> Result<DailySnapshot, StoreError>;
    /// Best-effort; callers treat failure as a harmless leak, not a hard error.
    fn delete(&self, reference: &SnapshotRef) -> Result<(), StoreError>;
}

/// Persistence for the per-level retention index.
pub trait RetentionStore {
    /// A missing index is the first run and loads as empty; any other failure
    /// is fatal to the caller, which cannot reason about retained history
    /// without it.
    fn load_index(&self, level: Level) -> Result<RetentionIndex, StoreError>;
    fn save_index(&self, level: Level, index: &RetentionIndex) -> Result<(), StoreError>;
}

/// JSON-files-on-disk implementation of both stores, one directory per
/// deployment. Snapshot filenames carry the level and date for operator
/// legibility, but consumers treat the reference as opaque.
pub struct FsAttendanceStore {
    root: PathBuf,
}

impl FsAttendanceStore {
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, std::io::Error> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    fn snapshot_path(&self, reference: &SnapshotRef) -> PathBuf {
        self.root.join(&reference.0)
    }

    fn index_path(&self, level: Level) -> PathBuf {
        self.root.join(format!("retention_{level}.json"))
    }
}

impl SnapshotStore for FsAttendanceStore {
    fn put(&self, snapshot: &DailySnapshot) -> Result<SnapshotRef, StoreError> {
        let reference = SnapshotRef(format!(
            "snapshot_{}_{}_{}.json",
            snapshot.level,
            snapshot.date,
            Uuid::new_v4().simple()
        ));
        let path = self.snapshot_path(&reference);
        let body = serde_json::to_vec_pretty(snapshot).map_err(|source| {
            StoreError::SnapshotParse {
                reference: reference.clone(),
                source,
            }
        })?;
        fs::write(&path, body).map_err(|source| StoreError::SnapshotWrite { path, source })?;
        debug!(%reference, "snapshot written");
        Ok(reference)
    }

    fn get(&self, reference: &SnapshotRef) -> Result<DailySnapshot, StoreError> {
        let body = fs::read_to_string(self.snapshot_path(reference)).map_err(|source| {
            StoreError::SnapshotRead {
                reference: reference.clone(),
                source,
            }
        })?;
        serde_json::from_str(&body).map_err(|source| StoreError::SnapshotParse {
            reference: reference.clone(),
            source,
        })
    }

    fn delete(&self, reference: &SnapshotRef) -> Result<(), StoreError> {
        fs::remove_file(self.snapshot_path(reference)).map_err(|source| {
            StoreError::SnapshotDelete {
                reference: reference.clone(),
                source,
            }
        })
    }
}

impl RetentionStore for FsAttendanceStore {
    fn load_index(&self, level: Level) -> Result<RetentionIndex, StoreError> {
        let path = self.index_path(level);
        let body = match fs::read_to_string(&path) {
            Ok(body) => body,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                debug!(%level, "no retention index yet, starting empty");
                return Ok(RetentionIndex::default());
            }
            Err(err) => {
                return Err(StoreError::IndexLoad {
                    level,
                    message: err.to_string(),
                })
            }
        };
        serde_json::from_str(&body).map_err(|err| StoreError::IndexLoad {
            level,
            message: err.to_string(),
        })
    }

    fn save_index(&self, level: Level, index: &RetentionIndex) -> Result<(), StoreError> {
        let body = serde_json::to_vec_pretty(index).map_err(|err| StoreError::IndexSave {
            level,
            message: err.to_string(),
        })?;
        fs::write(self.index_path(level), body).map_err(|err| StoreError::IndexSave {
            level,
            message: err.to_string(),
        })
    }
}


#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use chrono::NaiveDate;

    use super::*;
    use crate::models::{Classroom, DayAttendance, MarkResult, SectionAttendance};

    fn sample_snapshot(date: NaiveDate) -> DailySnapshot {
        let classroom = Classroom {
            id: Uuid::new_v4(),
            level: Level::Secondary,
            grade: 1,
            section: "A".to_string(),
            color: "blue".to_string(),
            homeroom_teacher_id: None,
        };
        let mut students = BTreeMap::new();
        students.insert(
            Uuid::new_v4(),
            DayAttendance {
                entry: MarkResult {
                    offset_seconds: Some(-45),
                },
                exit: None,
            },
        );
        let mut sections = BTreeMap::new();
        sections.insert("A".to_string(), SectionAttendance { classroom, students });
        let mut grades = BTreeMap::new();
        grades.insert(1, sections);
        DailySnapshot {
            level: Level::Secondary,
            date,
            grades,
        }
    }

    #[test]
    fn snapshot_round_trips_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsAttendanceStore::open(dir.path()).unwrap();
        let date = NaiveDate::from_ymd_opt(2026, 3, 9).unwrap();

        let reference = store.put(&sample_snapshot(date)).unwrap();
        let loaded = store.get(&reference).unwrap();
        assert_eq!(loaded.date, date);
        assert_eq!(loaded.level, Level::Secondary);
        assert_eq!(loaded.iter_students().count(), 1);

        store.delete(&reference).unwrap();
        assert!(store.get(&reference).is_err());
    }

    #[test]
    fn missing_index_loads_as_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsAttendanceStore::open(dir.path()).unwrap();
        let index = store.load_index(Level::Primary).unwrap();
        assert!(index.is_empty());
    }

    #[test]
    fn index_round_trips_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsAttendanceStore::open(dir.path()).unwrap();

        let mut index = RetentionIndex::default();
        let date = NaiveDate::from_ymd_opt(2026, 3, 9).unwrap();
        index.insert(date, SnapshotRef("snapshot_a.json".to_string()));

        store.save_index(Level::Secondary, &index).unwrap();
        let loaded = store.load_index(Level::Secondary).unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(
            loaded.get(date),
            Some(&SnapshotRef("snapshot_a.json".to_string()))
        );
    }

    #[test]
    fn corrupt_index_is_a_load_error() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsAttendanceStore::open(dir.path()).unwrap();
        std::fs::write(dir.path().join("retention_primary.json"), "{not json").unwrap();

        let err = store.load_index(Level::Primary).unwrap_err();
        assert!(matches!(err, StoreError::IndexLoad { .. }));
    }
}
