//! HL7 v2 wire/boundary support.
//!
//! This crate turns the segmented, pipe-delimited text of an inbound HL7 v2 message into a
//! [`Message`] that the processing pipeline can route and consume:
//! - header (MSH) decoding, including the declared field separator and encoding characters
//! - message type / trigger event identity (`ORU^R01`)
//! - typed accessors for the segments the result handlers need (PID, PV1, OBX)
//! - HL7 timestamp and escape-sequence decoding
//!
//! It knows nothing about queues, storage or clinical records.

pub mod datetime;
pub mod message;
pub mod segments;

pub use datetime::{parse_date, parse_timestamp};
pub use message::{header_control_id, Delimiters, Message, Segment};
pub use segments::{CodedElement, PatientIdentifier, Provider, ResultSegment, Visit};

/// Errors returned while decoding HL7 wire text.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WireError {
    #[error("message is empty")]
    Empty,

    #[error("message must begin with an MSH segment, found '{0}'")]
    MissingHeader(String),

    #[error("MSH segment does not declare valid encoding characters")]
    InvalidEncodingCharacters,

    #[error("MSH-9 must carry a message type and trigger event, got '{0}'")]
    InvalidMessageType(String),

    #[error("invalid {segment}-{field}: {reason}")]
    InvalidField {
        segment: String,
        field: usize,
        reason: String,
    },

    #[error("invalid HL7 timestamp '{0}'")]
    InvalidTimestamp(String),
}

/// Type alias for Results that can fail with a [`WireError`].
pub type WireResult<T> = Result<T, WireError>;
