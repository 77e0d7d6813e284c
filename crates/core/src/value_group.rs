//! Value-group correlation.
//!
//! Several observations can be facets of one composite value: a coded answer with several
//! selections, or a measurement split across consecutive segments. Such observations are linked
//! through a shared `value_group_id` equal to the id of the group's anchor, the member with the
//! lowest message position. The anchor points at itself.
//!
//! The anchor's id is only known once it is stored, so the group is written in two phases:
//! store the anchor ungrouped, then point it at itself, then store the followers.

use crate::model::{NewObservation, Observation};
use crate::store::ObservationStore;
use crate::{CoreError, CoreResult};
use hl7vg_uuid::RecordId;
use std::sync::Arc;

pub struct ValueGroupCorrelator {
    observations: Arc<dyn ObservationStore>,
}

impl ValueGroupCorrelator {
    pub fn new(observations: Arc<dyn ObservationStore>) -> Self {
        Self { observations }
    }

    /// Persists `members` as one value group and returns them in stored form, anchor first.
    ///
    /// A single member is stored without a group. A failure part-way through leaves the
    /// members already written in place.
    pub fn persist_group(&self, mut members: Vec<NewObservation>) -> CoreResult<Vec<Observation>> {
        if members.len() < 2 {
            return members
                .into_iter()
                .map(|m| self.observations.save(m, None))
                .collect();
        }

        members.sort_by_key(|m| m.position);
        let mut members = members.into_iter();
        let Some(anchor) = members.next() else {
            return Ok(Vec::new());
        };

        let anchor = self.observations.save(anchor, None)?;
        let anchor = self.observations.set_value_group(&anchor.id, Some(anchor.id))?;
        let group_id = anchor.id;
        tracing::debug!("anchored value group {} on concept {}", group_id, anchor.concept.code);

        let mut stored = vec![anchor];
        for member in members {
            stored.push(self.observations.save(member, Some(group_id))?);
        }
        Ok(stored)
    }

    /// Fetches the anchor of `observation`'s group.
    ///
    /// Returns `None` for an ungrouped observation.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::BrokenValueGroup`] if the group id does not name a stored
    /// observation that is anchored on itself.
    pub fn resolve_anchor(&self, observation: &Observation) -> CoreResult<Option<Observation>> {
        let Some(group_id) = observation.value_group_id else {
            return Ok(None);
        };
        let broken = |group_id: RecordId| CoreError::BrokenValueGroup { group_id };

        let anchor = self
            .observations
            .get(&group_id)?
            .ok_or_else(|| broken(group_id))?;
        if !anchor.is_value_group_anchor() {
            return Err(broken(group_id));
        }
        Ok(Some(anchor))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ObsValue;
    use crate::store::MemoryClinicalStore;
    use chrono::NaiveDate;
    use hl7_wire::CodedElement;

    fn coded(code: &str) -> CodedElement {
        CodedElement {
            code: code.into(),
            text: None,
            coding_system: Some("99DCT".into()),
        }
    }

    fn member(position: usize, answer: &str) -> NewObservation {
        NewObservation {
            person_id: RecordId::new(),
            encounter_id: RecordId::new(),
            concept: coded("1558"),
            value: ObsValue::Coded(coded(answer)),
            observed_at: NaiveDate::from_ymd_opt(2008, 2, 6)
                .unwrap()
                .and_hms_opt(0, 0, 0)
                .unwrap(),
            position,
        }
    }

    fn correlator() -> (Arc<MemoryClinicalStore>, ValueGroupCorrelator) {
        let store = Arc::new(MemoryClinicalStore::default());
        let correlator = ValueGroupCorrelator::new(store.clone());
        (store, correlator)
    }

    #[test]
    fn lowest_position_becomes_anchor() {
        let (store, correlator) = correlator();
        let stored = correlator
            .persist_group(vec![member(7, "1726"), member(5, "1555"), member(6, "1650")])
            .unwrap();

        assert_eq!(stored.len(), 3);
        let anchor = &stored[0];
        assert_eq!(anchor.position, 5);
        assert!(anchor.is_value_group_anchor());
        for follower in &stored[1..] {
            assert_eq!(follower.value_group_id, Some(anchor.id));
            assert_ne!(follower.id, anchor.id);
        }

        let read_back = ObservationStore::get(store.as_ref(), &anchor.id).unwrap().unwrap();
        assert_eq!(read_back.value_group_id, Some(anchor.id));
    }

    #[test]
    fn single_member_is_not_grouped() {
        let (_store, correlator) = correlator();
        let stored = correlator.persist_group(vec![member(5, "1555")]).unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].value_group_id, None);
        assert!(correlator.resolve_anchor(&stored[0]).unwrap().is_none());
    }

    #[test]
    fn every_member_resolves_to_the_anchor() {
        let (_store, correlator) = correlator();
        let stored = correlator
            .persist_group(vec![member(5, "1555"), member(5, "1726")])
            .unwrap();
        let anchor_id = stored[0].id;

        for observation in &stored {
            let anchor = correlator.resolve_anchor(observation).unwrap().unwrap();
            assert_eq!(anchor.id, anchor_id);
        }
    }

    #[test]
    fn dangling_group_id_is_reported() {
        let (store, correlator) = correlator();
        let orphan = store.save(member(5, "1555"), Some(RecordId::new())).unwrap();
        let err = correlator.resolve_anchor(&orphan).expect_err("group has no anchor");
        assert!(matches!(err, CoreError::BrokenValueGroup { .. }));
    }
}
