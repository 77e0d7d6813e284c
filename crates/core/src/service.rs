//! Service facade wiring configuration, stores, router and processor together.
//!
//! Binaries construct one [`Hl7Service`] at startup and share it; the CLI, the REST upload and
//! the poller all go through it.

use crate::classifier::ErrorClassifier;
use crate::config::CoreConfig;
use crate::handlers::default_router;
use crate::model::{ArchiveEntry, ErrorEntry, Observation, QueueEntry};
use crate::processor::{PipeParser, ProcessedEntry, QueueProcessor};
use crate::router::MessageRouter;
use crate::store::{PatientDirectory, PatientIndex, Stores};
use crate::{CoreError, CoreResult};
use hl7vg_uuid::RecordId;
use std::sync::Arc;

#[derive(Clone)]
pub struct Hl7Service {
    cfg: Arc<CoreConfig>,
    stores: Stores,
    router: Arc<MessageRouter>,
    processor: Arc<QueueProcessor>,
}

impl Hl7Service {
    /// Opens the filesystem stores and patient index under the configured data directory.
    pub fn open(cfg: Arc<CoreConfig>) -> CoreResult<Self> {
        let stores = Stores::filesystem(cfg.data_dir())?;
        let patients = PatientIndex::from_yaml_file(&cfg.patient_index_path())?;
        tracing::info!(
            "opened HL7 stores at {} ({} known patient identifiers)",
            cfg.data_dir().display(),
            patients.len()
        );
        Self::new(cfg, stores, Arc::new(patients))
    }

    /// Builds a service over explicit collaborators.
    pub fn new(
        cfg: Arc<CoreConfig>,
        stores: Stores,
        patients: Arc<dyn PatientDirectory>,
    ) -> CoreResult<Self> {
        let router = Arc::new(default_router(&stores, patients)?);
        let processor = Arc::new(QueueProcessor::new(
            stores.queue.clone(),
            stores.archive.clone(),
            stores.errors.clone(),
            Arc::new(PipeParser),
            router.clone(),
            ErrorClassifier::new(&cfg),
        ));

        Ok(Self {
            cfg,
            stores,
            router,
            processor,
        })
    }

    pub fn config(&self) -> &CoreConfig {
        &self.cfg
    }

    /// Message names with a registered handler, e.g. `ORU_R01`.
    pub fn routes(&self) -> Vec<String> {
        self.router.keys()
    }

    /// Adds raw message text to the queue on behalf of `source_id`.
    ///
    /// The message control id (MSH-10) is recorded as the source key when the header can be
    /// read; nothing else is validated until the entry is processed.
    ///
    /// # Errors
    ///
    /// - [`CoreError::InvalidInput`] if `raw` is blank.
    /// - [`CoreError::UnknownSource`] if `source_id` is not configured.
    pub fn enqueue(&self, raw: &str, source_id: u32) -> CoreResult<QueueEntry> {
        if raw.trim().is_empty() {
            return Err(CoreError::InvalidInput("HL7 message is empty".into()));
        }
        let source = self.cfg.source(source_id)?.clone();
        let source_key = hl7_wire::header_control_id(raw);

        let entry = self
            .stores
            .queue
            .enqueue(raw.to_string(), source, source_key)?;
        tracing::info!("queued HL7 message {} from source {}", entry.key(), entry.source);
        Ok(entry)
    }

    /// Processes up to `limit` pending entries.
    pub fn process_pending(&self, limit: usize) -> CoreResult<Vec<ProcessedEntry>> {
        self.processor.process_pending(limit)
    }

    /// Processes one queue entry by id.
    pub fn process(&self, id: &RecordId) -> CoreResult<ProcessedEntry> {
        let entry = self.stores.queue.get(id)?.ok_or(CoreError::NotFound {
            kind: "queue entry",
            id: *id,
        })?;
        self.processor.process(entry)
    }

    pub fn pending(&self) -> CoreResult<Vec<QueueEntry>> {
        self.stores.queue.list()
    }

    pub fn errors(&self) -> CoreResult<Vec<ErrorEntry>> {
        self.stores.errors.list()
    }

    pub fn archived(&self) -> CoreResult<Vec<ArchiveEntry>> {
        self.stores.archive.list()
    }

    pub fn observations_by_concept(&self, concept_code: &str) -> CoreResult<Vec<Observation>> {
        self.stores.observations.list_by_concept(concept_code)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::sources_from_env_value;
    use crate::constants::{PROCESSING_LOCK_FILENAME, QUEUE_DIR_NAME};
    use crate::model::{ObsValue, QueueState};
    use crate::processor::Disposition;
    use std::fs;
    use tempfile::TempDir;

    const ORU: &str = "MSH|^~\\&|REFPACS|IU|HL7LISTENER|AMRS.ELD|20080226102656||ORU^R01|ABC101083591|P|2.5|1||||||||16^AMRS.ELD.FORMID\r\
PID|||3^^^^||John3^Doe^||\r\
PV1||O|1^Unknown Location||||1^Super User (1-8)|||||||||||||||||||||||||||||||||||||20080212|||||||V\r\
ORC|RE||||||||20080226102537|1^Super User\r\
OBR|1|||1238^MEDICAL RECORD OBSERVATIONS^99DCT\r\
OBX|1|CWE|1558^PATIENT CONTACT METHOD^99DCT||1555^PHONE^99DCT~1726^FOLLOW-UP ACTION^99DCT|||||||||20080206\r\
OBX|5|DT|5096^RETURN VISIT DATE^99DCT||20080229|||||||||20080212";

    fn cfg(data_dir: &std::path::Path, ignore: bool) -> Arc<CoreConfig> {
        let sources = sources_from_env_value(Some("1:local,2:remote-lab".into())).unwrap();
        Arc::new(CoreConfig::new(data_dir.to_path_buf(), ignore, sources).unwrap())
    }

    fn in_memory(ignore: bool, known: &[&str]) -> Hl7Service {
        let patients = PatientIndex::new(known.iter().map(|id| (id.to_string(), RecordId::new())));
        Hl7Service::new(
            cfg(std::path::Path::new("unused"), ignore),
            Stores::in_memory(),
            Arc::new(patients),
        )
        .unwrap()
    }

    #[test]
    fn result_message_is_archived_with_value_group() {
        let service = in_memory(false, &["3"]);
        let entry = service.enqueue(ORU, 1).unwrap();
        assert_eq!(entry.source_key.as_deref(), Some("ABC101083591"));

        let done = service.process_pending(10).unwrap();
        assert_eq!(done.len(), 1);
        assert_eq!(done[0].disposition, Disposition::Archived);

        let grouped = service.observations_by_concept("1558").unwrap();
        assert_eq!(grouped.len(), 2);
        let anchor = grouped
            .iter()
            .find(|o| o.is_value_group_anchor())
            .expect("one member anchors the group");
        assert!(grouped.iter().all(|o| o.value_group_id == Some(anchor.id)));

        let visit = service.observations_by_concept("5096").unwrap();
        assert_eq!(visit.len(), 1);
        assert_eq!(visit[0].value_group_id, None);

        assert_eq!(service.archived().unwrap().len(), 1);
        assert!(service.pending().unwrap().is_empty());
        assert!(service.errors().unwrap().is_empty());
    }

    #[test]
    fn separate_segments_for_one_concept_form_a_group() {
        let raw = "MSH|^~\\&|REFPACS|IU|HL7LISTENER|AMRS.ELD|20080226102656||ORU^R01|SEG1558|P|2.5\r\
PID|||3^^^^||John3^Doe^||\r\
OBR|1|||1238^MEDICAL RECORD OBSERVATIONS^99DCT\r\
OBX|1|CWE|1558^PATIENT CONTACT METHOD^99DCT||1555^PHONE^99DCT|||||||||20080206\r\
OBX|2|CWE|1558^PATIENT CONTACT METHOD^99DCT||1726^FOLLOW-UP ACTION^99DCT|||||||||20080206\r\
OBX|3|DT|5096^RETURN VISIT DATE^99DCT||20080229|||||||||20080212";
        let service = in_memory(false, &["3"]);
        service.enqueue(raw, 1).unwrap();

        let done = service.process_pending(10).unwrap();
        assert_eq!(done.len(), 1);
        assert_eq!(done[0].disposition, Disposition::Archived);

        let mut grouped = service.observations_by_concept("1558").unwrap();
        grouped.sort_by_key(|o| o.position);
        assert_eq!(grouped.len(), 2);
        let first = &grouped[0];
        assert!(matches!(&first.value, ObsValue::Coded(c) if c.code == "1555"));
        assert!(grouped.iter().all(|o| o.value_group_id == Some(first.id)));

        let visit = service.observations_by_concept("5096").unwrap();
        assert_eq!(visit.len(), 1);
        assert_eq!(visit[0].value_group_id, None);

        let archived = service.archived().unwrap();
        assert_eq!(archived.len(), 1);
        assert_eq!(archived[0].source_key.as_deref(), Some("SEG1558"));
        assert!(service.pending().unwrap().is_empty());
    }

    #[test]
    fn leftover_claim_does_not_block_later_entries() {
        let dir = TempDir::new().expect("Failed to create temp dir");
        fs::write(
            dir.path().join("patients.yaml"),
            format!("- identifier: \"3\"\n  patient_id: \"{}\"\n", RecordId::new()),
        )
        .unwrap();
        let service = Hl7Service::open(cfg(dir.path(), false)).unwrap();

        let stuck = service.enqueue(ORU, 1).unwrap();
        let next = service
            .enqueue(&ORU.replace("ABC101083591", "K2"), 1)
            .unwrap();
        fs::write(
            stuck
                .id
                .sharded_dir(&dir.path().join(QUEUE_DIR_NAME))
                .join(PROCESSING_LOCK_FILENAME),
            "",
        )
        .unwrap();

        let done = service.process_pending(10).unwrap();
        assert_eq!(done.len(), 1);
        assert_eq!(done[0].entry.id, next.id);
        assert_eq!(done[0].disposition, Disposition::Archived);

        let pending = service.pending().unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id, stuck.id);
        assert_eq!(pending[0].state, QueueState::Processing);
        assert_eq!(service.archived().unwrap().len(), 1);
    }

    #[test]
    fn unknown_patient_from_remote_lab_is_dropped() {
        let service = in_memory(true, &[]);
        service.enqueue(ORU, 2).unwrap();

        let done = service.process_pending(10).unwrap();
        assert_eq!(done[0].disposition, Disposition::Skipped);
        assert!(service.pending().unwrap().is_empty());
        assert!(service.archived().unwrap().is_empty());
        assert!(service.errors().unwrap().is_empty());
    }

    #[test]
    fn unknown_patient_from_local_source_is_recorded() {
        let service = in_memory(true, &[]);
        service.enqueue(ORU, 1).unwrap();

        let done = service.process_pending(10).unwrap();
        assert_eq!(done[0].disposition, Disposition::Errored);
        let errors = service.errors().unwrap();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].error, "Trouble parsing HL7 message (ABC101083591)");
        assert!(errors[0].error_details.contains("Could not resolve patient"));
    }

    #[test]
    fn enqueue_rejects_blank_and_unknown_source() {
        let service = in_memory(false, &[]);
        assert!(matches!(
            service.enqueue("  ", 1),
            Err(CoreError::InvalidInput(_))
        ));
        assert!(matches!(
            service.enqueue(ORU, 42),
            Err(CoreError::UnknownSource(42))
        ));
        assert_eq!(service.routes(), vec!["ORU_R01".to_string()]);
    }

    #[test]
    fn filesystem_service_round_trip() {
        let dir = TempDir::new().expect("Failed to create temp dir");
        let patient = RecordId::new();
        fs::write(
            dir.path().join("patients.yaml"),
            format!("- identifier: \"3\"\n  patient_id: \"{}\"\n", patient),
        )
        .unwrap();

        let service = Hl7Service::open(cfg(dir.path(), false)).unwrap();
        let entry = service.enqueue(ORU, 1).unwrap();
        let done = service.process(&entry.id).unwrap();
        assert_eq!(done.disposition, Disposition::Archived);

        let reopened = Hl7Service::open(cfg(dir.path(), false)).unwrap();
        assert_eq!(reopened.archived().unwrap().len(), 1);
        let grouped = reopened.observations_by_concept("1558").unwrap();
        assert_eq!(grouped.len(), 2);
        assert!(grouped.iter().all(|o| o.person_id == patient));
    }
}
