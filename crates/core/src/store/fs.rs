//! Filesystem stores.
//!
//! Every record is a JSON document in its own sharded directory:
//!
//! `<root>/<kind>/<id[0..2]>/<id[2..4]>/<id>/record.json`
//!
//! Documents are written to a temporary file and renamed into place, so readers never observe a
//! partially written record. A queue entry is claimed by creating `processing.lock` in its
//! directory with `create_new`, which the operating system guarantees only one caller can do.
//! The lock is authoritative: an entry with a lock reads back as `Processing` even if the
//! claimant stopped before rewriting its document.

use super::{ArchiveStore, EncounterStore, ErrorStore, ObservationStore, QueueStore};
use crate::constants::{
    ARCHIVE_DIR_NAME, ENCOUNTER_DIR_NAME, ERROR_DIR_NAME, OBSERVATION_DIR_NAME,
    PROCESSING_LOCK_FILENAME, QUEUE_DIR_NAME, RECORD_FILENAME,
};
use crate::model::{
    ArchiveEntry, Encounter, ErrorEntry, NewEncounter, NewObservation, Observation, QueueEntry,
    QueueState,
};
use crate::{CoreError, CoreResult};
use hl7vg_types::Hl7Source;
use hl7vg_uuid::RecordId;
use serde::{de::DeserializeOwned, Serialize};
use std::fs::{self, OpenOptions};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

/// JSON-file backed implementation of every record store.
#[derive(Clone, Debug)]
pub struct FsStore {
    root: PathBuf,
}

impl FsStore {
    /// Opens (creating if necessary) a store rooted at `root`.
    pub fn open(root: impl Into<PathBuf>) -> CoreResult<Self> {
        let root = root.into();
        for kind in [
            QUEUE_DIR_NAME,
            ARCHIVE_DIR_NAME,
            ERROR_DIR_NAME,
            OBSERVATION_DIR_NAME,
            ENCOUNTER_DIR_NAME,
        ] {
            fs::create_dir_all(root.join(kind)).map_err(CoreError::StorageDirCreation)?;
        }
        Ok(Self { root })
    }

    fn record_dir(&self, kind: &str, id: &RecordId) -> PathBuf {
        id.sharded_dir(&self.root.join(kind))
    }

    /// Applies the claim marker to a queue entry read from disk.
    fn with_claim(&self, mut entry: QueueEntry) -> QueueEntry {
        let lock = self
            .record_dir(QUEUE_DIR_NAME, &entry.id)
            .join(PROCESSING_LOCK_FILENAME);
        if lock.exists() {
            entry.state = QueueState::Processing;
        }
        entry
    }

    fn queue_entries(&self) -> CoreResult<Vec<QueueEntry>> {
        Ok(self
            .list_records::<QueueEntry>(QUEUE_DIR_NAME)?
            .into_iter()
            .map(|e| self.with_claim(e))
            .collect())
    }

    /// Creates the record directory and writes the first version of the document.
    fn create_record<T: Serialize>(
        &self,
        kind: &str,
        label: &'static str,
        id: &RecordId,
        record: &T,
    ) -> CoreResult<()> {
        let dir = self.record_dir(kind, id);
        if let Some(parent) = dir.parent() {
            fs::create_dir_all(parent).map_err(CoreError::StorageDirCreation)?;
        }
        match fs::create_dir(&dir) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                return Err(CoreError::AlreadyExists {
                    kind: label,
                    id: *id,
                })
            }
            Err(e) => return Err(CoreError::StorageDirCreation(e)),
        }
        write_document(&dir, record)
    }

    /// Rewrites the document of an existing record.
    fn update_record<T: Serialize>(
        &self,
        kind: &str,
        label: &'static str,
        id: &RecordId,
        record: &T,
    ) -> CoreResult<()> {
        let dir = self.record_dir(kind, id);
        if !dir.is_dir() {
            return Err(CoreError::NotFound {
                kind: label,
                id: *id,
            });
        }
        write_document(&dir, record)
    }

    fn read_record<T: DeserializeOwned>(&self, kind: &str, id: &RecordId) -> CoreResult<Option<T>> {
        read_document(&self.record_dir(kind, id).join(RECORD_FILENAME))
    }

    fn remove_record(&self, kind: &str, id: &RecordId) -> CoreResult<()> {
        match fs::remove_dir_all(self.record_dir(kind, id)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(CoreError::FileRemove(e)),
        }
    }

    /// Reads every record of a kind.
    ///
    /// Walks `<kind>/<s1>/<s2>/<id>/`. Directories that do not hold a readable document
    /// (for example one being created concurrently) are skipped with a warning.
    fn list_records<T: DeserializeOwned>(&self, kind: &str) -> CoreResult<Vec<T>> {
        let mut records = Vec::new();

        for s1 in read_subdirs(&self.root.join(kind))? {
            for s2 in read_subdirs(&s1)? {
                for record_dir in read_subdirs(&s2)? {
                    let path = record_dir.join(RECORD_FILENAME);
                    match read_document::<T>(&path) {
                        Ok(Some(record)) => records.push(record),
                        Ok(None) => {}
                        Err(e) => {
                            tracing::warn!("skipping unreadable record {}: {}", path.display(), e)
                        }
                    }
                }
            }
        }

        Ok(records)
    }
}

fn read_subdirs(dir: &Path) -> CoreResult<Vec<PathBuf>> {
    let iter = match fs::read_dir(dir) {
        Ok(it) => it,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(CoreError::FileRead(e)),
    };

    let mut dirs = Vec::new();
    for entry in iter {
        let path = entry.map_err(CoreError::FileRead)?.path();
        if path.is_dir() {
            dirs.push(path);
        }
    }
    Ok(dirs)
}

fn write_document<T: Serialize>(dir: &Path, record: &T) -> CoreResult<()> {
    let json = serde_json::to_string_pretty(record).map_err(CoreError::Serialization)?;
    let tmp = dir.join(format!("{}.tmp", RECORD_FILENAME));
    fs::write(&tmp, json).map_err(CoreError::FileWrite)?;
    fs::rename(&tmp, dir.join(RECORD_FILENAME)).map_err(CoreError::FileWrite)
}

fn read_document<T: DeserializeOwned>(path: &Path) -> CoreResult<Option<T>> {
    let contents = match fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(CoreError::FileRead(e)),
    };
    serde_json::from_str(&contents)
        .map(Some)
        .map_err(CoreError::Deserialization)
}

impl QueueStore for FsStore {
    fn enqueue(
        &self,
        data: String,
        source: Hl7Source,
        source_key: Option<String>,
    ) -> CoreResult<QueueEntry> {
        let entry = QueueEntry::new(data, source, source_key);
        self.create_record(QUEUE_DIR_NAME, "queue entry", &entry.id, &entry)?;
        Ok(entry)
    }

    fn next_pending(&self) -> CoreResult<Option<QueueEntry>> {
        Ok(self
            .queue_entries()?
            .into_iter()
            .filter(|e| e.state == QueueState::Pending)
            .min_by_key(|e| (e.created_at, e.id)))
    }

    fn get(&self, id: &RecordId) -> CoreResult<Option<QueueEntry>> {
        Ok(self
            .read_record::<QueueEntry>(QUEUE_DIR_NAME, id)?
            .map(|e| self.with_claim(e)))
    }

    fn save(&self, entry: &QueueEntry) -> CoreResult<()> {
        match self.create_record(QUEUE_DIR_NAME, "queue entry", &entry.id, entry) {
            Err(CoreError::AlreadyExists { .. }) => {
                self.update_record(QUEUE_DIR_NAME, "queue entry", &entry.id, entry)
            }
            other => other,
        }
    }

    fn begin_processing(&self, entry: &mut QueueEntry) -> CoreResult<()> {
        let duplicate = |entry: &QueueEntry| CoreError::DuplicateProcessing {
            id: entry.id,
            key: entry.key(),
        };

        let stored = QueueStore::get(self, &entry.id)?.ok_or(CoreError::NotFound {
            kind: "queue entry",
            id: entry.id,
        })?;
        if stored.state == QueueState::Processing {
            return Err(duplicate(entry));
        }

        let dir = self.record_dir(QUEUE_DIR_NAME, &entry.id);
        match OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(dir.join(PROCESSING_LOCK_FILENAME))
        {
            Ok(_) => {}
            Err(e) if e.kind() == ErrorKind::AlreadyExists => return Err(duplicate(entry)),
            Err(e) => return Err(CoreError::FileWrite(e)),
        }

        let mut claimed = stored;
        claimed.state = QueueState::Processing;
        if let Err(e) = write_document(&dir, &claimed) {
            let _ = fs::remove_file(dir.join(PROCESSING_LOCK_FILENAME));
            return Err(e);
        }
        entry.state = QueueState::Processing;
        Ok(())
    }

    fn delete(&self, id: &RecordId) -> CoreResult<()> {
        self.remove_record(QUEUE_DIR_NAME, id)
    }

    fn list(&self) -> CoreResult<Vec<QueueEntry>> {
        let mut entries = self.queue_entries()?;
        entries.sort_by_key(|e| (e.created_at, e.id));
        Ok(entries)
    }
}

impl ArchiveStore for FsStore {
    fn save(&self, entry: &ArchiveEntry) -> CoreResult<()> {
        self.create_record(ARCHIVE_DIR_NAME, "archive entry", &entry.id, entry)
    }

    fn list(&self) -> CoreResult<Vec<ArchiveEntry>> {
        let mut entries = self.list_records::<ArchiveEntry>(ARCHIVE_DIR_NAME)?;
        entries.sort_by_key(|e| e.archived_at);
        Ok(entries)
    }
}

impl ErrorStore for FsStore {
    fn save(&self, entry: &ErrorEntry) -> CoreResult<()> {
        self.create_record(ERROR_DIR_NAME, "error entry", &entry.id, entry)
    }

    fn list(&self) -> CoreResult<Vec<ErrorEntry>> {
        let mut entries = self.list_records::<ErrorEntry>(ERROR_DIR_NAME)?;
        entries.sort_by_key(|e| e.failed_at);
        Ok(entries)
    }
}

impl ObservationStore for FsStore {
    fn save(
        &self,
        observation: NewObservation,
        value_group_id: Option<RecordId>,
    ) -> CoreResult<Observation> {
        let stored = Observation::from_new(observation, value_group_id);
        self.create_record(OBSERVATION_DIR_NAME, "observation", &stored.id, &stored)?;
        Ok(stored)
    }

    fn set_value_group(
        &self,
        id: &RecordId,
        value_group_id: Option<RecordId>,
    ) -> CoreResult<Observation> {
        let mut stored: Observation = self
            .read_record(OBSERVATION_DIR_NAME, id)?
            .ok_or(CoreError::NotFound {
                kind: "observation",
                id: *id,
            })?;
        stored.value_group_id = value_group_id;
        self.update_record(OBSERVATION_DIR_NAME, "observation", id, &stored)?;
        Ok(stored)
    }

    fn get(&self, id: &RecordId) -> CoreResult<Option<Observation>> {
        self.read_record(OBSERVATION_DIR_NAME, id)
    }

    fn list_by_concept(&self, concept_code: &str) -> CoreResult<Vec<Observation>> {
        let mut found: Vec<Observation> = self
            .list_records::<Observation>(OBSERVATION_DIR_NAME)?
            .into_iter()
            .filter(|o| o.concept.code == concept_code)
            .collect();
        found.sort_by_key(|o| (o.observed_at, o.position));
        Ok(found)
    }
}

impl EncounterStore for FsStore {
    fn create(&self, encounter: NewEncounter) -> CoreResult<Encounter> {
        let stored = Encounter::from_new(encounter);
        self.create_record(ENCOUNTER_DIR_NAME, "encounter", &stored.id, &stored)?;
        Ok(stored)
    }

    fn get(&self, id: &RecordId) -> CoreResult<Option<Encounter>> {
        self.read_record(ENCOUNTER_DIR_NAME, id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn source() -> Hl7Source {
        Hl7Source::new(2, "remote-lab").unwrap()
    }

    #[test]
    fn enqueue_writes_sharded_record() {
        let dir = TempDir::new().expect("Failed to create temp dir");
        let store = FsStore::open(dir.path()).expect("open store");

        let entry = store
            .enqueue("MSH|^~\\&|A".into(), source(), Some("K1".into()))
            .unwrap();

        let path = entry
            .id
            .sharded_dir(&dir.path().join(QUEUE_DIR_NAME))
            .join(RECORD_FILENAME);
        assert!(path.is_file(), "expected {}", path.display());

        let read = QueueStore::get(&store, &entry.id).unwrap().expect("stored");
        assert_eq!(read, entry);
    }

    #[test]
    fn claim_is_exclusive_across_store_handles() {
        let dir = TempDir::new().expect("Failed to create temp dir");
        let first = FsStore::open(dir.path()).unwrap();
        let second = FsStore::open(dir.path()).unwrap();

        let entry = first.enqueue("data".into(), source(), None).unwrap();

        let mut a = entry.clone();
        first.begin_processing(&mut a).expect("first claim wins");

        let mut b = entry.clone();
        let err = second
            .begin_processing(&mut b)
            .expect_err("second claim must lose");
        assert!(matches!(err, CoreError::DuplicateProcessing { .. }));

        let stored = QueueStore::get(&second, &entry.id).unwrap().unwrap();
        assert_eq!(stored.state, QueueState::Processing);
        assert!(first.next_pending().unwrap().is_none());
    }

    #[test]
    fn stored_processing_state_rejects_stale_pending_copy() {
        let dir = TempDir::new().expect("Failed to create temp dir");
        let store = FsStore::open(dir.path()).unwrap();
        let entry = store.enqueue("data".into(), source(), None).unwrap();

        let mut processing = entry.clone();
        processing.state = QueueState::Processing;
        QueueStore::save(&store, &processing).unwrap();

        let mut stale = entry.clone();
        let err = store
            .begin_processing(&mut stale)
            .expect_err("stored entry is already processing");
        assert!(matches!(err, CoreError::DuplicateProcessing { .. }));
        assert_eq!(stale.state, QueueState::Pending);
        assert!(!entry
            .id
            .sharded_dir(&dir.path().join(QUEUE_DIR_NAME))
            .join(PROCESSING_LOCK_FILENAME)
            .exists());
    }

    #[test]
    fn leftover_lock_marks_entry_processing() {
        let dir = TempDir::new().expect("Failed to create temp dir");
        let store = FsStore::open(dir.path()).unwrap();
        let first = store.enqueue("one".into(), source(), Some("K1".into())).unwrap();
        let second = store.enqueue("two".into(), source(), Some("K2".into())).unwrap();

        fs::write(
            first
                .id
                .sharded_dir(&dir.path().join(QUEUE_DIR_NAME))
                .join(PROCESSING_LOCK_FILENAME),
            "",
        )
        .unwrap();

        let stored = QueueStore::get(&store, &first.id).unwrap().unwrap();
        assert_eq!(stored.state, QueueState::Processing);
        assert_eq!(store.next_pending().unwrap().map(|e| e.id), Some(second.id));

        let mut stale = first.clone();
        assert!(matches!(
            store.begin_processing(&mut stale),
            Err(CoreError::DuplicateProcessing { .. })
        ));
    }

    #[test]
    fn delete_removes_entry_and_lock() {
        let dir = TempDir::new().expect("Failed to create temp dir");
        let store = FsStore::open(dir.path()).unwrap();
        let mut entry = store.enqueue("data".into(), source(), None).unwrap();
        store.begin_processing(&mut entry).unwrap();

        store.delete(&entry.id).unwrap();
        assert!(QueueStore::get(&store, &entry.id).unwrap().is_none());
        assert!(!entry.id.sharded_dir(&dir.path().join(QUEUE_DIR_NAME)).exists());
        assert!(QueueStore::list(&store).unwrap().is_empty());
    }

    #[test]
    fn archive_is_write_once() {
        let dir = TempDir::new().expect("Failed to create temp dir");
        let store = FsStore::open(dir.path()).unwrap();
        let entry = QueueEntry::new("data".into(), source(), None);
        let archived = ArchiveEntry::from_queue_entry(&entry);

        ArchiveStore::save(&store, &archived).unwrap();
        let err = ArchiveStore::save(&store, &archived).expect_err("second archive must fail");
        assert!(matches!(err, CoreError::AlreadyExists { .. }));
        assert_eq!(ArchiveStore::list(&store).unwrap(), vec![archived]);
    }

    #[test]
    fn set_value_group_rewrites_observation() {
        use crate::model::ObsValue;
        use chrono::NaiveDate;
        use hl7_wire::CodedElement;

        let dir = TempDir::new().expect("Failed to create temp dir");
        let store = FsStore::open(dir.path()).unwrap();
        let new = NewObservation {
            person_id: RecordId::new(),
            encounter_id: RecordId::new(),
            concept: CodedElement {
                code: "5089".into(),
                text: Some("WEIGHT (KG)".into()),
                coding_system: Some("99DCT".into()),
            },
            value: ObsValue::Numeric(61.5),
            observed_at: NaiveDate::from_ymd_opt(2008, 2, 6)
                .unwrap()
                .and_hms_opt(0, 0, 0)
                .unwrap(),
            position: 5,
        };

        let saved = ObservationStore::save(&store, new, None).unwrap();
        let updated = store.set_value_group(&saved.id, Some(saved.id)).unwrap();
        assert!(updated.is_value_group_anchor());

        let read = ObservationStore::get(&store, &saved.id).unwrap().unwrap();
        assert_eq!(read.value_group_id, Some(saved.id));
        assert_eq!(store.list_by_concept("5089").unwrap().len(), 1);
        assert!(store.list_by_concept("1558").unwrap().is_empty());
    }
}
