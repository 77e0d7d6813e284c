//! # HL7 Value Groups Core
//!
//! Inbound HL7 v2 result processing.
//!
//! This crate owns the message pipeline and its storage:
//! - the durable inbound queue and the per-entry state machine ([`processor`])
//! - routing of parsed messages to handlers by type and trigger event ([`router`])
//! - fatal-vs-skippable failure classification ([`classifier`])
//! - correlation of result values into anchored value groups ([`value_group`])
//! - the built-in `ORU^R01` handler ([`handlers`])
//! - in-memory and filesystem stores ([`store`])
//!
//! **No API concerns**: HTTP servers and command-line parsing belong in `api-rest` and `cli`.
//! Configuration is resolved by those binaries and passed in as a [`CoreConfig`].

pub mod classifier;
pub mod config;
pub mod constants;
pub mod error;
pub mod handlers;
pub mod model;
pub mod processor;
pub mod router;
pub mod service;
pub mod store;
pub mod value_group;

pub use classifier::{Classification, ErrorClassifier};
pub use config::CoreConfig;
pub use error::{CoreError, CoreResult, Hl7Error, ParseCause};
pub use model::{
    ArchiveEntry, Encounter, ErrorEntry, ObsValue, Observation, QueueEntry, QueueState,
};
pub use processor::{Disposition, MessageParser, PipeParser, ProcessedEntry, QueueProcessor};
pub use router::{HandlerError, HandlerKey, MessageHandler, MessageRouter};
pub use service::Hl7Service;
pub use store::Stores;
pub use value_group::ValueGroupCorrelator;

pub use hl7vg_types::Hl7Source;
pub use hl7vg_uuid::RecordId;
