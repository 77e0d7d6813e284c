//! Error types for the processing core.
//!
//! Two families are kept apart:
//! - [`CoreError`] covers configuration, storage and queue-protocol failures. These are returned
//!   to callers of the core.
//! - [`Hl7Error`] covers everything that can go wrong while turning one queue entry into clinical
//!   data. These never escape the queue processor; they are classified and then either dropped or
//!   captured as an error record.

use hl7vg_uuid::RecordId;

#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("invalid handler key '{0}': the format must be messageType_triggerEvent, e.g. ORU_R01")]
    InvalidHandlerKey(String),
    #[error("a handler is already registered for {0}")]
    DuplicateHandler(String),
    #[error("unknown HL7 source id: {0}")]
    UnknownSource(u32),
    #[error("the queue entry with id {id} is already processing (key={key})")]
    DuplicateProcessing { id: RecordId, key: String },
    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: RecordId },
    #[error("{kind} already exists: {id}")]
    AlreadyExists { kind: &'static str, id: RecordId },
    #[error("value group {group_id} is not anchored on itself")]
    BrokenValueGroup { group_id: RecordId },

    #[error("failed to create storage directory: {0}")]
    StorageDirCreation(std::io::Error),
    #[error("failed to write record file: {0}")]
    FileWrite(std::io::Error),
    #[error("failed to read record file: {0}")]
    FileRead(std::io::Error),
    #[error("failed to remove record: {0}")]
    FileRemove(std::io::Error),
    #[error("failed to serialize record: {0}")]
    Serialization(serde_json::Error),
    #[error("failed to deserialize record: {0}")]
    Deserialization(serde_json::Error),
    #[error("failed to deserialize YAML: {0}")]
    YamlDeserialization(serde_yaml::Error),
    #[error("{0} store lock poisoned")]
    LockPoisoned(&'static str),
}

pub type CoreResult<T> = std::result::Result<T, CoreError>;

/// Structured reason attached to a parse-class failure.
///
/// The classifier inspects this value, never the rendered message text.
#[derive(Debug, thiserror::Error)]
pub enum ParseCause {
    #[error("Could not resolve patient (identifiers: [{identifiers}])")]
    PatientNotResolved { identifiers: String },
    #[error(transparent)]
    Wire(#[from] hl7_wire::WireError),
    #[error("{0}")]
    InvalidContent(String),
}

/// A failure while processing one queue entry.
#[derive(Debug, thiserror::Error)]
pub enum Hl7Error {
    #[error(
        "No route for hl7 message: {message_name}. Make sure a handler is registered for this type"
    )]
    NoRoute { message_name: String },

    #[error("{message}")]
    Parse {
        message: String,
        #[source]
        cause: Option<ParseCause>,
    },

    #[error("Error while processing HL7 message: {message_name}")]
    Handler {
        message_name: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("{message}")]
    Unclassified {
        message: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
}

impl Hl7Error {
    pub fn parse(message: impl Into<String>, cause: ParseCause) -> Self {
        Self::Parse {
            message: message.into(),
            cause: Some(cause),
        }
    }

    pub fn unclassified(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Unclassified {
            message: message.into(),
            source: Box::new(source),
        }
    }

    /// Returns the structured cause of a parse-class failure, if any.
    pub fn parse_cause(&self) -> Option<&ParseCause> {
        match self {
            Self::Parse { cause, .. } => cause.as_ref(),
            _ => None,
        }
    }

    /// True for failures raised while decoding or routing the message, as opposed to faults in
    /// the handler or the surrounding machinery.
    pub fn is_message_failure(&self) -> bool {
        matches!(self, Self::NoRoute { .. } | Self::Parse { .. } | Self::Handler { .. })
    }
}
