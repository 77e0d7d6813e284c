//! Records owned by the queue, archive, error and clinical stores.

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use hl7_wire::{CodedElement, Provider};
use hl7vg_types::Hl7Source;
use hl7vg_uuid::RecordId;
use serde::{Deserialize, Serialize};

/// Processing state of a queue entry.
///
/// An entry moves from `Pending` to `Processing` exactly once. Every terminal outcome removes
/// the entry from the queue, so there is no "done" state.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueueState {
    Pending,
    Processing,
}

/// One inbound message awaiting processing.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueEntry {
    pub id: RecordId,
    pub source: Hl7Source,
    /// Sender-assigned key for the message, normally the MSH-10 control id.
    pub source_key: Option<String>,
    pub data: String,
    pub state: QueueState,
    pub created_at: DateTime<Utc>,
}

impl QueueEntry {
    pub fn new(data: String, source: Hl7Source, source_key: Option<String>) -> Self {
        Self {
            id: RecordId::new(),
            source,
            source_key,
            data,
            state: QueueState::Pending,
            created_at: Utc::now(),
        }
    }

    /// The key used to identify this entry in logs and error summaries.
    pub fn key(&self) -> String {
        self.source_key
            .clone()
            .unwrap_or_else(|| self.id.to_string())
    }
}

/// Immutable copy of a successfully processed queue entry.
///
/// The archive entry keeps the queue entry's id, so a message can be archived at most once.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchiveEntry {
    pub id: RecordId,
    pub source: Hl7Source,
    pub source_key: Option<String>,
    pub data: String,
    pub created_at: DateTime<Utc>,
    pub archived_at: DateTime<Utc>,
}

impl ArchiveEntry {
    pub fn from_queue_entry(entry: &QueueEntry) -> Self {
        Self {
            id: entry.id,
            source: entry.source.clone(),
            source_key: entry.source_key.clone(),
            data: entry.data.clone(),
            created_at: entry.created_at,
            archived_at: Utc::now(),
        }
    }
}

/// A queue entry whose processing failed fatally, kept for operator review.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorEntry {
    pub id: RecordId,
    pub source: Hl7Source,
    pub source_key: Option<String>,
    pub data: String,
    /// Human-readable summary.
    pub error: String,
    /// Bounded rendering of the failure and its causes.
    pub error_details: String,
    pub created_at: DateTime<Utc>,
    pub failed_at: DateTime<Utc>,
}

impl ErrorEntry {
    pub fn from_queue_entry(entry: &QueueEntry, error: String, error_details: String) -> Self {
        Self {
            id: entry.id,
            source: entry.source.clone(),
            source_key: entry.source_key.clone(),
            data: entry.data.clone(),
            error,
            error_details,
            created_at: entry.created_at,
            failed_at: Utc::now(),
        }
    }
}

/// Typed value of an observation.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum ObsValue {
    Coded(CodedElement),
    Numeric(f64),
    Text(String),
    Date(NaiveDate),
    DateTime(NaiveDateTime),
}

/// An observation that has not been stored yet.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NewObservation {
    pub person_id: RecordId,
    pub encounter_id: RecordId,
    pub concept: CodedElement,
    pub value: ObsValue,
    pub observed_at: NaiveDateTime,
    /// Position of the originating segment within its message.
    pub position: usize,
}

/// A stored observation.
///
/// Observations sharing a `value_group_id` are facets of one composite value. The group id is
/// the id of the anchor observation, whose own `value_group_id` points at itself.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    pub id: RecordId,
    pub person_id: RecordId,
    pub encounter_id: RecordId,
    pub concept: CodedElement,
    pub value: ObsValue,
    pub observed_at: NaiveDateTime,
    pub position: usize,
    pub value_group_id: Option<RecordId>,
    pub created_at: DateTime<Utc>,
}

impl Observation {
    pub fn from_new(new: NewObservation, value_group_id: Option<RecordId>) -> Self {
        Self {
            id: RecordId::new(),
            person_id: new.person_id,
            encounter_id: new.encounter_id,
            concept: new.concept,
            value: new.value,
            observed_at: new.observed_at,
            position: new.position,
            value_group_id,
            created_at: Utc::now(),
        }
    }

    /// True if this observation is the anchor of its value group.
    pub fn is_value_group_anchor(&self) -> bool {
        self.value_group_id == Some(self.id)
    }
}

/// An encounter that has not been stored yet.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewEncounter {
    pub patient_id: RecordId,
    pub encounter_datetime: NaiveDateTime,
    pub location: Option<String>,
    pub provider: Option<Provider>,
    /// Form the results were captured on (MSH-21).
    pub form_id: Option<String>,
}

/// A stored encounter; every processed result message creates one.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Encounter {
    pub id: RecordId,
    pub patient_id: RecordId,
    pub encounter_datetime: NaiveDateTime,
    pub location: Option<String>,
    pub provider: Option<Provider>,
    pub form_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Encounter {
    pub fn from_new(new: NewEncounter) -> Self {
        Self {
            id: RecordId::new(),
            patient_id: new.patient_id,
            encounter_datetime: new.encounter_datetime,
            location: new.location,
            provider: new.provider,
            form_id: new.form_id,
            created_at: Utc::now(),
        }
    }
}
