//! Typed views over the segments consumed by result handlers.

use crate::datetime::parse_timestamp;
use crate::message::{component_of, non_empty, Delimiters, Segment};
use crate::{WireError, WireResult};
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

/// A coded value (`CE`/`CWE`): code, display text and coding system.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CodedElement {
    pub code: String,
    pub text: Option<String>,
    pub coding_system: Option<String>,
}

impl CodedElement {
    /// Decodes a single field repetition such as `1558^PATIENT CONTACT METHOD^99DCT`.
    ///
    /// Returns `None` when the code component is empty.
    pub fn parse(value: &str, delimiters: Delimiters) -> Option<Self> {
        let sep = delimiters.component;
        let code = non_empty(component_of(value, sep, 1))?;
        Some(Self {
            code: code.to_string(),
            text: non_empty(component_of(value, sep, 2)).map(|t| delimiters.unescape(t)),
            coding_system: non_empty(component_of(value, sep, 3)).map(str::to_string),
        })
    }
}

/// One entry of the patient identifier list (PID-3).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PatientIdentifier {
    pub id: String,
    pub assigning_authority: Option<String>,
    pub identifier_type: Option<String>,
}

impl PatientIdentifier {
    pub(crate) fn from_pid(pid: &Segment) -> Vec<Self> {
        let sep = pid.delimiters().component;
        pid.repetitions(3)
            .into_iter()
            .filter_map(|rep| {
                let id = non_empty(component_of(rep, sep, 1))?;
                Some(Self {
                    id: id.to_string(),
                    assigning_authority: non_empty(component_of(rep, sep, 4)).map(str::to_string),
                    identifier_type: non_empty(component_of(rep, sep, 5)).map(str::to_string),
                })
            })
            .collect()
    }
}

/// The attending provider named in PV1-7.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Provider {
    pub id: String,
    pub name: Option<String>,
}

/// Visit details from the PV1 segment.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Visit {
    pub patient_class: Option<String>,
    pub location_id: Option<String>,
    pub location_name: Option<String>,
    pub provider: Option<Provider>,
    pub admitted_at: Option<NaiveDateTime>,
}

impl Visit {
    pub(crate) fn from_pv1(pv1: &Segment) -> WireResult<Self> {
        let provider = non_empty(pv1.component(7, 1)).map(|id| Provider {
            id: id.to_string(),
            name: non_empty(pv1.component(7, 2)).map(str::to_string),
        });
        let admitted_at = non_empty(pv1.component(44, 1))
            .map(parse_timestamp)
            .transpose()?;

        Ok(Self {
            patient_class: non_empty(pv1.field(2)).map(str::to_string),
            location_id: non_empty(pv1.component(3, 1)).map(str::to_string),
            location_name: non_empty(pv1.component(3, 2)).map(str::to_string),
            provider,
            admitted_at,
        })
    }
}

/// One OBX segment: a reported value with its coded concept and position in the message.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResultSegment {
    /// Index of the segment within the message, counting every segment from MSH = 0.
    pub position: usize,
    /// Number of OBR segments seen before this one; 0 when the OBX precedes any order.
    pub order: u32,
    /// OBX-1.
    pub set_id: Option<u32>,
    /// OBX-2, e.g. `CWE`, `NM`, `DT`.
    pub value_type: String,
    /// OBX-3.
    pub concept: CodedElement,
    /// OBX-4.
    pub sub_id: Option<String>,
    /// OBX-5 repetitions, still encoded.
    pub values: Vec<String>,
    /// OBX-14.
    pub observed_at: Option<NaiveDateTime>,
    delimiters: Delimiters,
}

impl ResultSegment {
    pub(crate) fn from_obx(obx: &Segment, position: usize, order: u32) -> WireResult<Self> {
        let invalid = |field: usize, reason: String| WireError::InvalidField {
            segment: "OBX".into(),
            field,
            reason,
        };

        let set_id = non_empty(obx.field(1))
            .map(|s| {
                s.parse::<u32>()
                    .map_err(|_| invalid(1, format!("set id '{}' is not a number", s)))
            })
            .transpose()?;

        let delimiters = obx.delimiters();
        let concept = obx
            .repetitions(3)
            .first()
            .and_then(|rep| CodedElement::parse(rep, delimiters))
            .ok_or_else(|| invalid(3, "missing observation identifier".into()))?;

        let observed_at = non_empty(obx.component(14, 1))
            .map(parse_timestamp)
            .transpose()?;

        Ok(Self {
            position,
            order,
            set_id,
            value_type: obx.field(2).trim().to_ascii_uppercase(),
            concept,
            sub_id: non_empty(obx.field(4)).map(str::to_string),
            values: obx
                .repetitions(5)
                .into_iter()
                .filter(|v| !v.trim().is_empty())
                .map(str::to_string)
                .collect(),
            observed_at,
            delimiters,
        })
    }

    /// The OBX-5 repetitions decoded as coded elements. Repetitions without a code are dropped.
    pub fn coded_values(&self) -> Vec<CodedElement> {
        self.values
            .iter()
            .filter_map(|v| CodedElement::parse(v, self.delimiters))
            .collect()
    }

    /// The OBX-5 repetitions with escape sequences decoded.
    pub fn text_values(&self) -> Vec<String> {
        self.values
            .iter()
            .map(|v| self.delimiters.unescape(v))
            .collect()
    }
}
