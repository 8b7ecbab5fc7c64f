//! The module contains the errors the engine can throw.
//!
//! The interesting ones for callers are:
//!
//! - [`MalformedEntry`] an expense/settlement failed validation and was
//!   rejected before touching any balance.
//! - [`SnapshotConflict`] the bounded retry budget for a snapshot update was
//!   exhausted; the caller should retry the whole request.
//! - [`EntryConflict`] someone else edited the same entry concurrently.
//! - [`CorruptSnapshot`] a persisted snapshot failed its invariant check on
//!   read; recoverable via `Engine::recompute_snapshot`.
//!
//!  [`MalformedEntry`]: EngineError::MalformedEntry
//!  [`SnapshotConflict`]: EngineError::SnapshotConflict
//!  [`EntryConflict`]: EngineError::EntryConflict
//!  [`CorruptSnapshot`]: EngineError::CorruptSnapshot
use sea_orm::DbErr;
use thiserror::Error;

/// Engine custom errors.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Malformed entry: {0}")]
    MalformedEntry(String),
    #[error("Snapshot conflict: {0}")]
    SnapshotConflict(String),
    #[error("Entry conflict: {0}")]
    EntryConflict(String),
    #[error("Corrupt snapshot: {0}")]
    CorruptSnapshot(String),
    #[error("\"{0}\" key not found!")]
    KeyNotFound(String),
    #[error("\"{0}\" already present!")]
    ExistingKey(String),
    #[error("Invalid amount: {0}")]
    InvalidAmount(String),
    #[error("Invalid currency: {0}")]
    InvalidCurrency(String),
    #[error("Invalid role: {0}")]
    InvalidRole(String),
    #[error(transparent)]
    Database(#[from] DbErr),
}

impl PartialEq for EngineError {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::MalformedEntry(a), Self::MalformedEntry(b)) => a == b,
            (Self::SnapshotConflict(a), Self::SnapshotConflict(b)) => a == b,
            (Self::EntryConflict(a), Self::EntryConflict(b)) => a == b,
            (Self::CorruptSnapshot(a), Self::CorruptSnapshot(b)) => a == b,
            (Self::KeyNotFound(a), Self::KeyNotFound(b)) => a == b,
            (Self::ExistingKey(a), Self::ExistingKey(b)) => a == b,
            (Self::InvalidAmount(a), Self::InvalidAmount(b)) => a == b,
            (Self::InvalidCurrency(a), Self::InvalidCurrency(b)) => a == b,
            (Self::InvalidRole(a), Self::InvalidRole(b)) => a == b,
            (Self::Database(a), Self::Database(b)) => a.to_string() == b.to_string(),
            _ => false,
        }
    }
}
