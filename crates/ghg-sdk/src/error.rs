use std::path::PathBuf;

use ghg_index::{AttrConflict, IndexError};
use ghg_series::SeriesError;
use ghg_store::StoreError;
use ghg_types::{Attributes, ContentHash, Interval, SeriesId, VersionLabel};
use thiserror::Error;

type BoxedCause = Box<dyn std::error::Error + Send + Sync>;

#[derive(Debug, Error)]
pub enum SdkError {
    /// Identical source content was submitted again without `force`.
    #[error("duplicate input for series {series}: {filename} ({hash}) already stored under {version}")]
    DuplicateInput {
        series: SeriesId,
        hash: ContentHash,
        version: VersionLabel,
        filename: String,
    },

    /// Temporal conflict under the `auto` policy. Nothing was changed.
    #[error("data overlap in series {series} [{}]: candidates {candidates:?} conflict with {conflicting:?}", describe_keys(keys))]
    DataOverlap {
        series: SeriesId,
        keys: Attributes,
        conflicting: Vec<Interval>,
        candidates: Vec<Interval>,
    },

    /// Embedded attributes disagree with stored metadata.
    #[error("attribute mismatch for series {series} on keys {}", conflicts.iter().map(|c| c.key.as_str()).collect::<Vec<_>>().join(", "))]
    AttrMismatch {
        series: SeriesId,
        conflicts: Vec<AttrConflict>,
    },

    /// Lock timeout, corrupt index, failed I/O or exhausted commit retries.
    #[error("object store error: {reason}: {cause}")]
    ObjectStore {
        reason: String,
        #[source]
        cause: BoxedCause,
    },

    #[error("store not initialized at {}", .0.display())]
    NotInitialized(PathBuf),

    #[error("unknown data kind: {0}")]
    UnknownDataKind(String),

    #[error("missing required key {key} for data kind {data_kind}")]
    MissingKey { data_kind: String, key: String },

    #[error("invalid value {value:?} for key {key}: {reason}")]
    InvalidKey {
        key: String,
        value: String,
        reason: String,
    },

    #[error("invalid dataset: {0}")]
    InvalidDataset(String),

    #[error("series not found: {0}")]
    SeriesNotFound(SeriesId),

    #[error("no metadata snapshot of series {series} at revision {revision}")]
    UnknownRevision { series: SeriesId, revision: u64 },

    #[error("key {0} is distinguishing and cannot be edited")]
    ProtectedKey(String),

    #[error("deletion of series {expected} not confirmed (confirmation names {given})")]
    DeleteNotConfirmed { expected: SeriesId, given: SeriesId },

    #[error("configuration error: {0}")]
    Config(String),

    #[error("series error: {0}")]
    Series(SeriesError),
}

impl SdkError {
    /// Whether the caller should stop rather than report and continue.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::ObjectStore { .. } | Self::NotInitialized(_) | Self::Config(_)
        )
    }

    pub(crate) fn object_store(
        reason: impl Into<String>,
        cause: impl Into<BoxedCause>,
    ) -> Self {
        Self::ObjectStore {
            reason: reason.into(),
            cause: cause.into(),
        }
    }
}

fn describe_keys(keys: &Attributes) -> String {
    keys.iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join(", ")
}

impl From<SeriesError> for SdkError {
    fn from(e: SeriesError) -> Self {
        match e {
            SeriesError::DuplicateInput {
                series,
                hash,
                version,
                filename,
            } => Self::DuplicateInput {
                series,
                hash,
                version,
                filename,
            },
            SeriesError::DataOverlap {
                series,
                conflicting,
                candidates,
            } => Self::DataOverlap {
                series,
                keys: Attributes::new(),
                conflicting,
                candidates,
            },
            other => Self::Series(other),
        }
    }
}

impl From<IndexError> for SdkError {
    fn from(e: IndexError) -> Self {
        match e {
            IndexError::AttrMismatch { series, conflicts } => Self::AttrMismatch { series, conflicts },
            IndexError::InvalidName { name, reason } => Self::InvalidKey {
                key: name.clone(),
                value: name,
                reason,
            },
            IndexError::UnknownRevision { series, revision } => {
                Self::UnknownRevision { series, revision }
            }
            IndexError::NotFound(series) => Self::SeriesNotFound(series),
            other => Self::object_store("metadata index", other),
        }
    }
}

impl From<StoreError> for SdkError {
    fn from(e: StoreError) -> Self {
        Self::object_store("payload storage", e)
    }
}

impl From<std::io::Error> for SdkError {
    fn from(e: std::io::Error) -> Self {
        Self::object_store("filesystem", e)
    }
}

pub type SdkResult<T> = Result<T, SdkError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duplicates_are_not_fatal() {
        let e = SdkError::DuplicateInput {
            series: SeriesId::new(),
            hash: ContentHash::from_bytes(b"x"),
            version: VersionLabel::first(),
            filename: "x.csv".into(),
        };
        assert!(!e.is_fatal());
        let e: SdkError = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied").into();
        assert!(e.is_fatal());
        assert!(e.to_string().contains("denied"));
    }

    #[test]
    fn index_mismatch_maps_to_attr_mismatch() {
        let e: SdkError = IndexError::AttrMismatch {
            series: SeriesId::new(),
            conflicts: vec![],
        }
        .into();
        assert!(matches!(e, SdkError::AttrMismatch { .. }));
        let e: SdkError = IndexError::NotFound(SeriesId::new()).into();
        assert!(matches!(e, SdkError::SeriesNotFound(_)));
        let e: SdkError = IndexError::Serialization("bad".into()).into();
        assert!(e.is_fatal());
    }
}
