//! In-memory stores.

use super::{ArchiveStore, EncounterStore, ErrorStore, ObservationStore, QueueStore};
use crate::model::{
    ArchiveEntry, Encounter, ErrorEntry, NewEncounter, NewObservation, Observation, QueueEntry,
    QueueState,
};
use crate::{CoreError, CoreResult};
use hl7vg_types::Hl7Source;
use hl7vg_uuid::RecordId;
use std::sync::{Mutex, MutexGuard};

fn lock<'a, T>(mutex: &'a Mutex<T>, name: &'static str) -> CoreResult<MutexGuard<'a, T>> {
    mutex.lock().map_err(|_| CoreError::LockPoisoned(name))
}

/// Queue entries in enqueue order.
#[derive(Debug, Default)]
pub struct MemoryQueueStore {
    entries: Mutex<Vec<QueueEntry>>,
}

impl QueueStore for MemoryQueueStore {
    fn enqueue(
        &self,
        data: String,
        source: Hl7Source,
        source_key: Option<String>,
    ) -> CoreResult<QueueEntry> {
        let entry = QueueEntry::new(data, source, source_key);
        lock(&self.entries, "queue")?.push(entry.clone());
        Ok(entry)
    }

    fn next_pending(&self) -> CoreResult<Option<QueueEntry>> {
        Ok(lock(&self.entries, "queue")?
            .iter()
            .find(|e| e.state == QueueState::Pending)
            .cloned())
    }

    fn get(&self, id: &RecordId) -> CoreResult<Option<QueueEntry>> {
        Ok(lock(&self.entries, "queue")?
            .iter()
            .find(|e| e.id == *id)
            .cloned())
    }

    fn save(&self, entry: &QueueEntry) -> CoreResult<()> {
        let mut entries = lock(&self.entries, "queue")?;
        match entries.iter_mut().find(|e| e.id == entry.id) {
            Some(stored) => *stored = entry.clone(),
            None => entries.push(entry.clone()),
        }
        Ok(())
    }

    fn begin_processing(&self, entry: &mut QueueEntry) -> CoreResult<()> {
        let mut entries = lock(&self.entries, "queue")?;
        let stored = entries
            .iter_mut()
            .find(|e| e.id == entry.id)
            .ok_or(CoreError::NotFound {
                kind: "queue entry",
                id: entry.id,
            })?;

        if stored.state == QueueState::Processing {
            return Err(CoreError::DuplicateProcessing {
                id: entry.id,
                key: entry.key(),
            });
        }

        stored.state = QueueState::Processing;
        entry.state = QueueState::Processing;
        Ok(())
    }

    fn delete(&self, id: &RecordId) -> CoreResult<()> {
        lock(&self.entries, "queue")?.retain(|e| e.id != *id);
        Ok(())
    }

    fn list(&self) -> CoreResult<Vec<QueueEntry>> {
        Ok(lock(&self.entries, "queue")?.clone())
    }
}

#[derive(Debug, Default)]
pub struct MemoryArchiveStore {
    entries: Mutex<Vec<ArchiveEntry>>,
}

impl ArchiveStore for MemoryArchiveStore {
    fn save(&self, entry: &ArchiveEntry) -> CoreResult<()> {
        let mut entries = lock(&self.entries, "archive")?;
        if entries.iter().any(|e| e.id == entry.id) {
            return Err(CoreError::AlreadyExists {
                kind: "archive entry",
                id: entry.id,
            });
        }
        entries.push(entry.clone());
        Ok(())
    }

    fn list(&self) -> CoreResult<Vec<ArchiveEntry>> {
        Ok(lock(&self.entries, "archive")?.clone())
    }
}

#[derive(Debug, Default)]
pub struct MemoryErrorStore {
    entries: Mutex<Vec<ErrorEntry>>,
}

impl ErrorStore for MemoryErrorStore {
    fn save(&self, entry: &ErrorEntry) -> CoreResult<()> {
        let mut entries = lock(&self.entries, "error")?;
        if entries.iter().any(|e| e.id == entry.id) {
            return Err(CoreError::AlreadyExists {
                kind: "error entry",
                id: entry.id,
            });
        }
        entries.push(entry.clone());
        Ok(())
    }

    fn list(&self) -> CoreResult<Vec<ErrorEntry>> {
        Ok(lock(&self.entries, "error")?.clone())
    }
}

/// Observations and encounters held together, as a clinical database would.
#[derive(Debug, Default)]
pub struct MemoryClinicalStore {
    observations: Mutex<Vec<Observation>>,
    encounters: Mutex<Vec<Encounter>>,
}

impl ObservationStore for MemoryClinicalStore {
    fn save(
        &self,
        observation: NewObservation,
        value_group_id: Option<RecordId>,
    ) -> CoreResult<Observation> {
        let stored = Observation::from_new(observation, value_group_id);
        lock(&self.observations, "observation")?.push(stored.clone());
        Ok(stored)
    }

    fn set_value_group(
        &self,
        id: &RecordId,
        value_group_id: Option<RecordId>,
    ) -> CoreResult<Observation> {
        let mut observations = lock(&self.observations, "observation")?;
        let stored = observations
            .iter_mut()
            .find(|o| o.id == *id)
            .ok_or(CoreError::NotFound {
                kind: "observation",
                id: *id,
            })?;
        stored.value_group_id = value_group_id;
        Ok(stored.clone())
    }

    fn get(&self, id: &RecordId) -> CoreResult<Option<Observation>> {
        Ok(lock(&self.observations, "observation")?
            .iter()
            .find(|o| o.id == *id)
            .cloned())
    }

    fn list_by_concept(&self, concept_code: &str) -> CoreResult<Vec<Observation>> {
        let mut found: Vec<Observation> = lock(&self.observations, "observation")?
            .iter()
            .filter(|o| o.concept.code == concept_code)
            .cloned()
            .collect();
        found.sort_by_key(|o| (o.observed_at, o.position));
        Ok(found)
    }
}

impl EncounterStore for MemoryClinicalStore {
    fn create(&self, encounter: NewEncounter) -> CoreResult<Encounter> {
        let stored = Encounter::from_new(encounter);
        lock(&self.encounters, "encounter")?.push(stored.clone());
        Ok(stored)
    }

    fn get(&self, id: &RecordId) -> CoreResult<Option<Encounter>> {
        Ok(lock(&self.encounters, "encounter")?
            .iter()
            .find(|e| e.id == *id)
            .cloned())
    }
}
