use std::path::PathBuf;

use ghg_types::{ContentHash, SeriesId};

/// Errors from content and array store operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The requested object was not found.
    #[error("object not found: {0}")]
    NotFound(ContentHash),

    /// Content hash mismatch on read (data corruption).
    #[error("hash mismatch for {id}: computed {computed}")]
    HashMismatch { id: ContentHash, computed: ContentHash },

    /// A payload chunk referenced by a series is missing.
    #[error("missing payload chunk {key} for series {series}")]
    MissingChunk { series: SeriesId, key: String },

    /// Chunk framing or checksum failure.
    #[error("corrupt chunk {}: {reason}", path.display())]
    CorruptChunk { path: PathBuf, reason: String },

    /// The payload handed to the store is malformed.
    #[error("invalid payload: {0}")]
    InvalidPayload(String),

    /// Serialization or deserialization failure.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// I/O error from the underlying storage backend.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;
