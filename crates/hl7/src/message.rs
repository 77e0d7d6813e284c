//! Message and segment tokenizing.

use crate::datetime::parse_timestamp;
use crate::segments::{PatientIdentifier, ResultSegment, Visit};
use crate::{WireError, WireResult};
use chrono::NaiveDateTime;

/// Segment identifier of the message header.
const HEADER_SEGMENT: &str = "MSH";

/// The separator and encoding characters declared by a message's MSH segment.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Delimiters {
    pub field: char,
    pub component: char,
    pub repetition: char,
    pub escape: char,
    pub subcomponent: char,
}

impl Default for Delimiters {
    fn default() -> Self {
        Self {
            field: '|',
            component: '^',
            repetition: '~',
            escape: '\\',
            subcomponent: '&',
        }
    }
}

impl Delimiters {
    /// Decodes HL7 escape sequences (`\F\`, `\S\`, `\T\`, `\R\`, `\E\`) in a text value.
    ///
    /// Unknown escape sequences are kept verbatim.
    pub fn unescape(&self, value: &str) -> String {
        if !value.contains(self.escape) {
            return value.to_string();
        }

        let mut out = String::with_capacity(value.len());
        let mut rest = value;
        while let Some(start) = rest.find(self.escape) {
            out.push_str(&rest[..start]);
            let after = &rest[start + self.escape.len_utf8()..];
            match after.find(self.escape) {
                Some(end) => {
                    let sequence = &after[..end];
                    match sequence {
                        "F" => out.push(self.field),
                        "S" => out.push(self.component),
                        "T" => out.push(self.subcomponent),
                        "R" => out.push(self.repetition),
                        "E" => out.push(self.escape),
                        _ => {
                            out.push(self.escape);
                            out.push_str(sequence);
                            out.push(self.escape);
                        }
                    }
                    rest = &after[end + self.escape.len_utf8()..];
                }
                None => {
                    out.push_str(&rest[start..]);
                    rest = "";
                }
            }
        }
        out.push_str(rest);
        out
    }
}

/// One segment of a message, split into fields.
///
/// Fields are addressed with HL7's 1-based numbering. For the MSH segment the field separator
/// itself is MSH-1, so `field(9)` is the message type for every segment kind.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Segment {
    fields: Vec<String>,
    delimiters: Delimiters,
}

impl Segment {
    fn parse(line: &str, delimiters: Delimiters) -> Self {
        let mut fields: Vec<String> = line.split(delimiters.field).map(str::to_string).collect();
        if fields.first().map(String::as_str) == Some(HEADER_SEGMENT) {
            fields.insert(1, delimiters.field.to_string());
        }
        Self { fields, delimiters }
    }

    /// The three-letter segment identifier, e.g. `OBX`.
    pub fn id(&self) -> &str {
        self.fields.first().map(String::as_str).unwrap_or_default()
    }

    /// The raw text of field `n`, or `""` when the segment is shorter.
    pub fn field(&self, n: usize) -> &str {
        self.fields.get(n).map(String::as_str).unwrap_or_default()
    }

    /// The repetitions of field `n`. Empty fields have no repetitions.
    pub fn repetitions(&self, n: usize) -> Vec<&str> {
        let raw = self.field(n);
        if raw.is_empty() {
            return Vec::new();
        }
        raw.split(self.delimiters.repetition).collect()
    }

    /// Component `c` (1-based) of the first repetition of field `n`, or `""`.
    pub fn component(&self, n: usize, c: usize) -> &str {
        let first = self
            .field(n)
            .split(self.delimiters.repetition)
            .next()
            .unwrap_or_default();
        component_of(first, self.delimiters.component, c)
    }

    pub fn delimiters(&self) -> Delimiters {
        self.delimiters
    }
}

/// Component `c` (1-based) of a single field repetition, or `""`.
pub(crate) fn component_of(value: &str, separator: char, c: usize) -> &str {
    if c == 0 {
        return "";
    }
    value.split(separator).nth(c - 1).unwrap_or_default()
}

/// A structurally decoded HL7 v2 message.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Message {
    delimiters: Delimiters,
    segments: Vec<Segment>,
    message_type: String,
    trigger_event: String,
}

impl Message {
    /// Parses raw wire text.
    ///
    /// Segments may be separated by `\r` (the standard), `\n` or `\r\n`. Blank lines are
    /// ignored.
    ///
    /// # Errors
    ///
    /// Returns a [`WireError`] if the text is empty, does not begin with a valid MSH segment,
    /// or MSH-9 lacks either the message type or the trigger event.
    pub fn parse(raw: &str) -> WireResult<Self> {
        let mut lines = raw
            .split(['\r', '\n'])
            .map(str::trim_end)
            .filter(|line| !line.is_empty());

        let header = lines.next().ok_or(WireError::Empty)?;
        let delimiters = parse_delimiters(header)?;

        let mut segments = vec![Segment::parse(header, delimiters)];
        segments.extend(lines.map(|line| Segment::parse(line, delimiters)));

        let msh = &segments[0];
        let message_type = msh.component(9, 1).trim().to_string();
        let trigger_event = msh.component(9, 2).trim().to_string();
        if message_type.is_empty() || trigger_event.is_empty() {
            return Err(WireError::InvalidMessageType(msh.field(9).to_string()));
        }

        Ok(Self {
            delimiters,
            segments,
            message_type,
            trigger_event,
        })
    }

    pub fn delimiters(&self) -> Delimiters {
        self.delimiters
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    /// The first segment with the given identifier.
    pub fn segment(&self, id: &str) -> Option<&Segment> {
        self.segments.iter().find(|s| s.id() == id)
    }

    /// The message header (always present once parsed).
    pub fn header(&self) -> &Segment {
        &self.segments[0]
    }

    /// MSH-9.1, e.g. `ORU`.
    pub fn message_type(&self) -> &str {
        &self.message_type
    }

    /// MSH-9.2, e.g. `R01`.
    pub fn trigger_event(&self) -> &str {
        &self.trigger_event
    }

    /// The structure name used for routing and diagnostics, e.g. `ORU_R01`.
    pub fn name(&self) -> String {
        format!("{}_{}", self.message_type, self.trigger_event)
    }

    /// MSH-10, the sender's message control id.
    pub fn control_id(&self) -> Option<&str> {
        non_empty(self.header().field(10))
    }

    /// MSH-7, the time the message was created by the sender.
    pub fn sent_at(&self) -> WireResult<Option<NaiveDateTime>> {
        non_empty(self.header().component(7, 1))
            .map(parse_timestamp)
            .transpose()
    }

    /// MSH-21.1, the message profile identifier. Result messages use it to carry the
    /// originating form's id.
    pub fn profile_id(&self) -> Option<&str> {
        non_empty(self.header().component(21, 1))
    }

    /// All identifiers listed in PID-3.
    pub fn patient_identifiers(&self) -> Vec<PatientIdentifier> {
        self.segment("PID")
            .map(PatientIdentifier::from_pid)
            .unwrap_or_default()
    }

    /// The patient visit (PV1), if the message carries one.
    pub fn visit(&self) -> WireResult<Option<Visit>> {
        self.segment("PV1").map(Visit::from_pv1).transpose()
    }

    /// Every OBX segment in message order.
    pub fn result_segments(&self) -> WireResult<Vec<ResultSegment>> {
        let mut order = 0u32;
        let mut results = Vec::new();
        for (position, segment) in self.segments.iter().enumerate() {
            match segment.id() {
                "OBR" => order += 1,
                "OBX" => results.push(ResultSegment::from_obx(segment, position, order)?),
                _ => {}
            }
        }
        Ok(results)
    }
}

fn parse_delimiters(header: &str) -> WireResult<Delimiters> {
    let Some(rest) = header.strip_prefix(HEADER_SEGMENT) else {
        let found: String = header.chars().take(3).collect();
        return Err(WireError::MissingHeader(found));
    };

    let mut chars = rest.chars();
    let field = chars.next().ok_or(WireError::InvalidEncodingCharacters)?;
    if field.is_alphanumeric() {
        return Err(WireError::InvalidEncodingCharacters);
    }

    let encoding: Vec<char> = chars.take_while(|c| *c != field).collect();
    let defaults = Delimiters::default();
    let pick = |idx: usize, fallback: char| encoding.get(idx).copied().unwrap_or(fallback);

    let delimiters = Delimiters {
        field,
        component: pick(0, defaults.component),
        repetition: pick(1, defaults.repetition),
        escape: pick(2, defaults.escape),
        subcomponent: pick(3, defaults.subcomponent),
    };

    let all = [
        delimiters.field,
        delimiters.component,
        delimiters.repetition,
        delimiters.escape,
        delimiters.subcomponent,
    ];
    for (i, a) in all.iter().enumerate() {
        if a.is_alphanumeric() || all[i + 1..].contains(a) {
            return Err(WireError::InvalidEncodingCharacters);
        }
    }

    Ok(delimiters)
}

/// Returns MSH-10 from raw message text without decoding the rest of the message.
///
/// Used when enqueueing to record a source key; malformed text simply yields `None`.
pub fn header_control_id(raw: &str) -> Option<String> {
    let header = raw.split(['\r', '\n']).find(|line| !line.trim().is_empty())?;
    let delimiters = parse_delimiters(header.trim_end()).ok()?;
    let segment = Segment::parse(header.trim_end(), delimiters);
    non_empty(segment.field(10)).map(str::to_string)
}

pub(crate) fn non_empty(value: &str) -> Option<&str> {
    let trimmed = value.trim();
    (!trimmed.is_empty()).then_some(trimmed)
}
