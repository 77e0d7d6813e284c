//! Patient identifier index.
//!
//! Maps the identifiers that senders put in PID-3 to patient record ids. The index is a YAML
//! list kept next to the stores:
//!
//! ```yaml
//! - identifier: "3"
//!   patient_id: 6f1c0b1e0c2a4f7e9d0b8a1c2e3f4a5b
//! ```

use super::PatientDirectory;
use crate::{CoreError, CoreResult};
use hl7vg_uuid::RecordId;
use serde::Deserialize;
use std::collections::HashMap;
use std::fs;
use std::io::ErrorKind;
use std::path::Path;

#[derive(Debug, Deserialize)]
struct PatientIndexEntry {
    identifier: String,
    patient_id: RecordId,
}

/// Read-only identifier → patient lookup.
#[derive(Clone, Debug, Default)]
pub struct PatientIndex {
    by_identifier: HashMap<String, RecordId>,
}

impl PatientIndex {
    pub fn new(entries: impl IntoIterator<Item = (String, RecordId)>) -> Self {
        Self {
            by_identifier: entries
                .into_iter()
                .map(|(identifier, id)| (identifier.trim().to_string(), id))
                .collect(),
        }
    }

    /// Loads the index from a YAML file.
    ///
    /// A missing file yields an empty index, so every patient lookup fails until one is
    /// provided.
    pub fn from_yaml_file(path: &Path) -> CoreResult<Self> {
        let contents = match fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                tracing::warn!(
                    "patient index {} not found; no patients can be resolved",
                    path.display()
                );
                return Ok(Self::default());
            }
            Err(e) => return Err(CoreError::FileRead(e)),
        };

        let entries: Vec<PatientIndexEntry> =
            serde_yaml::from_str(&contents).map_err(CoreError::YamlDeserialization)?;
        tracing::debug!("loaded {} patient identifiers", entries.len());

        Ok(Self::new(
            entries.into_iter().map(|e| (e.identifier, e.patient_id)),
        ))
    }

    pub fn len(&self) -> usize {
        self.by_identifier.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_identifier.is_empty()
    }
}

impl PatientDirectory for PatientIndex {
    fn resolve(&self, identifier: &str) -> Option<RecordId> {
        self.by_identifier.get(identifier.trim()).copied()
    }
}
