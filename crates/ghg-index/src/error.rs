//! Error types for the index crate.

use std::path::PathBuf;

use ghg_types::{ContentHash, SeriesId};

use crate::reconcile::AttrConflict;

/// Errors that can occur during index operations.
#[derive(Debug, thiserror::Error)]
pub enum IndexError {
    /// The durable state changed since the staged record was read.
    #[error("commit conflict on series {series} in {data_kind}: staged against revision {expected}, found {found}")]
    Conflict {
        data_kind: String,
        series: SeriesId,
        expected: u64,
        found: u64,
    },

    /// Another series already owns this fingerprint.
    #[error("fingerprint {fingerprint} in {data_kind} already belongs to series {owner}")]
    FingerprintTaken {
        data_kind: String,
        fingerprint: ContentHash,
        owner: SeriesId,
    },

    /// The commit lock could not be taken in time.
    #[error("timed out after {waited_ms} ms waiting for lock {}", path.display())]
    LockTimeout { path: PathBuf, waited_ms: u128 },

    /// The commit lock was broken as stale while this writer held it.
    #[error("lock {} was taken over by another writer", path.display())]
    LockLost { path: PathBuf },

    /// The index file cannot be understood.
    #[error("corrupt index file {}: {reason}", path.display())]
    Corrupt { path: PathBuf, reason: String },

    /// No record exists for the series.
    #[error("series not found in index: {0}")]
    NotFound(SeriesId),

    /// The undo log holds no snapshot at this revision.
    #[error("no snapshot of series {series} at revision {revision}")]
    UnknownRevision { series: SeriesId, revision: u64 },

    /// Embedded attributes disagree with stored metadata.
    #[error("attribute mismatch for series {series}: {}", describe(conflicts))]
    AttrMismatch {
        series: SeriesId,
        conflicts: Vec<AttrConflict>,
    },

    /// A data kind or key name is not usable.
    #[error("invalid name {name:?}: {reason}")]
    InvalidName { name: String, reason: String },

    /// Serialization or deserialization error.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// I/O error on the index or lock file.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

fn describe(conflicts: &[AttrConflict]) -> String {
    conflicts
        .iter()
        .map(|c| format!("{} (metadata {}, attributes {})", c.key, c.metadata, c.attribute))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Convenience alias for index results.
pub type IndexResult<T> = Result<T, IndexError>;
