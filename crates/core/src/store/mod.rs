//! Storage collaborators of the processing pipeline.
//!
//! Each concern gets its own trait so components receive only the capabilities they use: the
//! queue processor never sees observations, and handlers never see the queue.
//!
//! Two implementations are provided:
//! - [`memory`]: mutex-guarded maps, for tests and embedding
//! - [`fs`]: one JSON document per record under sharded directories

pub mod fs;
pub mod memory;
pub mod patients;

use crate::model::{
    ArchiveEntry, Encounter, ErrorEntry, NewEncounter, NewObservation, Observation, QueueEntry,
};
use crate::CoreResult;
use hl7vg_types::Hl7Source;
use hl7vg_uuid::RecordId;
use std::sync::Arc;

pub use fs::FsStore;
pub use memory::{MemoryArchiveStore, MemoryClinicalStore, MemoryErrorStore, MemoryQueueStore};
pub use patients::PatientIndex;

/// The durable inbound queue.
pub trait QueueStore: Send + Sync {
    /// Stores a new `Pending` entry.
    fn enqueue(
        &self,
        data: String,
        source: Hl7Source,
        source_key: Option<String>,
    ) -> CoreResult<QueueEntry>;

    /// The oldest `Pending` entry, if any.
    fn next_pending(&self) -> CoreResult<Option<QueueEntry>>;

    fn get(&self, id: &RecordId) -> CoreResult<Option<QueueEntry>>;

    /// Inserts or replaces an entry.
    fn save(&self, entry: &QueueEntry) -> CoreResult<()>;

    /// Atomically moves a stored entry from `Pending` to `Processing` and updates `entry` to
    /// match.
    ///
    /// Of several concurrent callers for the same entry exactly one succeeds; the others get
    /// [`CoreError::DuplicateProcessing`](crate::CoreError::DuplicateProcessing).
    fn begin_processing(&self, entry: &mut QueueEntry) -> CoreResult<()>;

    fn delete(&self, id: &RecordId) -> CoreResult<()>;

    /// All entries, oldest first.
    fn list(&self) -> CoreResult<Vec<QueueEntry>>;
}

/// Successfully processed messages.
pub trait ArchiveStore: Send + Sync {
    /// Stores an archive entry. Fails with `AlreadyExists` if the id is already archived.
    fn save(&self, entry: &ArchiveEntry) -> CoreResult<()>;

    fn list(&self) -> CoreResult<Vec<ArchiveEntry>>;
}

/// Messages whose processing failed fatally.
pub trait ErrorStore: Send + Sync {
    /// Stores an error entry. Fails with `AlreadyExists` if the id already has one.
    fn save(&self, entry: &ErrorEntry) -> CoreResult<()>;

    fn list(&self) -> CoreResult<Vec<ErrorEntry>>;
}

/// Clinical observations.
pub trait ObservationStore: Send + Sync {
    /// Stores a new observation, assigning its id.
    fn save(
        &self,
        observation: NewObservation,
        value_group_id: Option<RecordId>,
    ) -> CoreResult<Observation>;

    /// Replaces the value group of a stored observation and returns the updated record.
    fn set_value_group(
        &self,
        id: &RecordId,
        value_group_id: Option<RecordId>,
    ) -> CoreResult<Observation>;

    fn get(&self, id: &RecordId) -> CoreResult<Option<Observation>>;

    /// Observations for a concept code, ordered by message position.
    fn list_by_concept(&self, concept_code: &str) -> CoreResult<Vec<Observation>>;
}

/// Clinical encounters.
pub trait EncounterStore: Send + Sync {
    fn create(&self, encounter: NewEncounter) -> CoreResult<Encounter>;

    fn get(&self, id: &RecordId) -> CoreResult<Option<Encounter>>;
}

/// Resolves the patient identifiers carried by messages to patient records.
pub trait PatientDirectory: Send + Sync {
    fn resolve(&self, identifier: &str) -> Option<RecordId>;
}

/// The full set of stores used by a running pipeline.
#[derive(Clone)]
pub struct Stores {
    pub queue: Arc<dyn QueueStore>,
    pub archive: Arc<dyn ArchiveStore>,
    pub errors: Arc<dyn ErrorStore>,
    pub observations: Arc<dyn ObservationStore>,
    pub encounters: Arc<dyn EncounterStore>,
}

impl Stores {
    /// Fresh, empty in-memory stores.
    pub fn in_memory() -> Self {
        let clinical = Arc::new(MemoryClinicalStore::default());
        Self {
            queue: Arc::new(MemoryQueueStore::default()),
            archive: Arc::new(MemoryArchiveStore::default()),
            errors: Arc::new(MemoryErrorStore::default()),
            observations: clinical.clone(),
            encounters: clinical,
        }
    }

    /// Filesystem stores rooted at `root`.
    pub fn filesystem(root: impl Into<std::path::PathBuf>) -> CoreResult<Self> {
        let store = Arc::new(FsStore::open(root)?);
        Ok(Self {
            queue: store.clone(),
            archive: store.clone(),
            errors: store.clone(),
            observations: store.clone(),
            encounters: store,
        })
    }
}
