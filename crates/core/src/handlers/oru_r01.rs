//! `ORU^R01` (unsolicited observation result) handler.
//!
//! Each message becomes one encounter for the patient named in PID-3, holding one observation
//! per OBX value. Values that are facets of one answer are stored as a value group:
//! - the repetitions of a single OBX value field (`1555^PHONE^99DCT~1726^FOLLOW-UP ACTION^99DCT`)
//! - consecutive OBX segments under the same order with the same concept and sub-id

use crate::error::ParseCause;
use crate::model::{NewEncounter, NewObservation, ObsValue};
use crate::router::{HandlerError, MessageHandler};
use crate::store::{EncounterStore, ObservationStore, PatientDirectory};
use crate::value_group::ValueGroupCorrelator;
use chrono::NaiveDateTime;
use hl7_wire::{parse_date, parse_timestamp, Message, ResultSegment, WireError};
use hl7vg_uuid::RecordId;
use std::sync::Arc;

pub struct ValueGroupOruR01Handler {
    patients: Arc<dyn PatientDirectory>,
    encounters: Arc<dyn EncounterStore>,
    correlator: ValueGroupCorrelator,
}

/// OBX segments whose values belong to one group share this key.
#[derive(PartialEq, Eq)]
struct GroupKey {
    order: u32,
    concept: String,
    sub_id: Option<String>,
}

impl GroupKey {
    fn of(segment: &ResultSegment) -> Self {
        Self {
            order: segment.order,
            concept: segment.concept.code.clone(),
            sub_id: segment.sub_id.clone(),
        }
    }
}

fn invalid_wire(e: WireError) -> HandlerError {
    HandlerError::rejected("Invalid ORU_R01 message", ParseCause::Wire(e))
}

fn invalid_content(reason: String) -> HandlerError {
    HandlerError::rejected("Invalid ORU_R01 message", ParseCause::InvalidContent(reason))
}

impl ValueGroupOruR01Handler {
    pub fn new(
        patients: Arc<dyn PatientDirectory>,
        encounters: Arc<dyn EncounterStore>,
        observations: Arc<dyn ObservationStore>,
    ) -> Self {
        Self {
            patients,
            encounters,
            correlator: ValueGroupCorrelator::new(observations),
        }
    }

    /// The first PID-3 identifier known to the patient directory.
    fn resolve_patient(&self, message: &Message) -> Result<RecordId, HandlerError> {
        let identifiers = message.patient_identifiers();
        identifiers
            .iter()
            .find_map(|pid| self.patients.resolve(&pid.id))
            .ok_or_else(|| {
                let listed: Vec<&str> = identifiers.iter().map(|pid| pid.id.as_str()).collect();
                HandlerError::rejected(
                    "Could not resolve patient",
                    ParseCause::PatientNotResolved {
                        identifiers: listed.join(", "),
                    },
                )
            })
    }

    fn create_encounter(
        &self,
        message: &Message,
        patient_id: RecordId,
    ) -> Result<(RecordId, NaiveDateTime), HandlerError> {
        let visit = message.visit().map_err(invalid_wire)?;
        let sent_at = message.sent_at().map_err(invalid_wire)?;

        let encounter_datetime = visit
            .as_ref()
            .and_then(|v| v.admitted_at)
            .or(sent_at)
            .ok_or_else(|| invalid_content("no encounter date in PV1-44 or MSH-7".to_string()))?;

        let encounter = self.encounters.create(NewEncounter {
            patient_id,
            encounter_datetime,
            location: visit
                .as_ref()
                .and_then(|v| v.location_name.clone().or_else(|| v.location_id.clone())),
            provider: visit.and_then(|v| v.provider),
            form_id: message.profile_id().map(str::to_string),
        })?;

        tracing::debug!(
            "created encounter {} for patient {}",
            encounter.id,
            patient_id
        );
        Ok((encounter.id, encounter_datetime))
    }
}

/// Decodes the OBX-5 repetitions according to OBX-2.
fn decode_values(segment: &ResultSegment) -> Result<Vec<ObsValue>, HandlerError> {
    let describe = |value: &str, expected: &str| {
        invalid_content(format!(
            "OBX {} value '{}' is not a valid {}",
            segment.concept.code, value, expected
        ))
    };

    match segment.value_type.as_str() {
        "CE" | "CWE" | "CNE" => Ok(segment
            .coded_values()
            .into_iter()
            .map(ObsValue::Coded)
            .collect()),
        "NM" => segment
            .text_values()
            .into_iter()
            .map(|v| {
                match v.trim().parse::<f64>() {
                    Ok(n) if n.is_finite() => Ok(ObsValue::Numeric(n)),
                    _ => Err(describe(&v, "number")),
                }
            })
            .collect(),
        "DT" => segment
            .text_values()
            .into_iter()
            .map(|v| {
                parse_date(v.trim())
                    .map(ObsValue::Date)
                    .map_err(|_| describe(&v, "date"))
            })
            .collect(),
        "TS" | "DTM" => segment
            .text_values()
            .into_iter()
            .map(|v| {
                parse_timestamp(v.trim())
                    .map(ObsValue::DateTime)
                    .map_err(|_| describe(&v, "timestamp"))
            })
            .collect(),
        "ST" | "TX" | "FT" => Ok(segment
            .text_values()
            .into_iter()
            .map(ObsValue::Text)
            .collect()),
        other => Err(invalid_content(format!(
            "OBX {} has unsupported value type '{}'",
            segment.concept.code, other
        ))),
    }
}

impl MessageHandler for ValueGroupOruR01Handler {
    fn process(&self, message: &Message) -> Result<(), HandlerError> {
        let patient_id = self.resolve_patient(message)?;

        let results = message.result_segments().map_err(invalid_wire)?;
        let decoded = results
            .iter()
            .map(|segment| decode_values(segment).map(|values| (segment, values)))
            .collect::<Result<Vec<_>, HandlerError>>()?;

        let (encounter_id, encounter_datetime) = self.create_encounter(message, patient_id)?;

        let mut groups: Vec<(GroupKey, Vec<NewObservation>)> = Vec::new();
        for (segment, values) in decoded {
            if values.is_empty() {
                tracing::debug!("OBX {} has no value; skipping", segment.concept.code);
                continue;
            }

            let members = values.into_iter().map(|value| NewObservation {
                person_id: patient_id,
                encounter_id,
                concept: segment.concept.clone(),
                value,
                observed_at: segment.observed_at.unwrap_or(encounter_datetime),
                position: segment.position,
            });

            let key = GroupKey::of(segment);
            match groups.last_mut() {
                Some((last, group)) if *last == key => group.extend(members),
                _ => groups.push((key, members.collect())),
            }
        }

        for (_, members) in groups {
            self.correlator.persist_group(members)?;
        }
        Ok(())
    }
}
