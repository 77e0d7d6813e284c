//! Record identifiers and sharded-path utilities.
//!
//! Every persisted record (queue entries, archive entries, error entries, observations and
//! encounters) is identified by a [`RecordId`]: a UUID held in a *canonical* representation of
//! **32 lowercase hexadecimal characters** (no hyphens).
//!
//! ## Sharded directory layout
//! The filesystem stores place a record with canonical id `u` under:
//! `parent_dir/<u[0..2]>/<u[2..4]>/<u>/`
//!
//! Example:
//! `hl7_data/queue/55/0e/550e8400e29b41d4a716446655440000/`
//!
//! This keeps any single directory from growing to an unbounded number of entries when the
//! queue backs up.

mod service;

pub use service::{RecordId, Uuid};

/// Error type for identifier operations.
#[derive(Debug, thiserror::Error)]
pub enum UuidError {
    /// Invalid input provided
    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

/// Result type for identifier operations.
pub type UuidResult<T> = Result<T, UuidError>;
