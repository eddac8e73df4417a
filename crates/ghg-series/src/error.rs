//! Error types for series operations.

use ghg_types::{ContentHash, Interval, SeriesId, VersionLabel};
use thiserror::Error;

/// Errors raised by the add-data procedure and version management.
#[derive(Debug, Error)]
pub enum SeriesError {
    /// The same source content was already ingested into this series.
    #[error("duplicate input for series {series}: {filename} ({hash}) already stored under {version}")]
    DuplicateInput {
        series: SeriesId,
        hash: ContentHash,
        version: VersionLabel,
        filename: String,
    },

    /// Candidate intervals overlap the latest version and the policy does
    /// not allow replacing data.
    #[error("data overlap in series {series}: candidates {candidates:?} conflict with {conflicting:?}")]
    DataOverlap {
        series: SeriesId,
        conflicting: Vec<Interval>,
        candidates: Vec<Interval>,
    },

    /// No candidate intervals were supplied.
    #[error("no intervals supplied for series {series}")]
    NoIntervals { series: SeriesId },

    /// Candidate intervals overlap each other.
    #[error("candidate intervals overlap each other: {0:?}")]
    OverlappingCandidates(Vec<Interval>),

    /// The requested version does not exist.
    #[error("series {series} has no version {version}")]
    UnknownVersion { series: SeriesId, version: VersionLabel },

    /// The version is already the latest one.
    #[error("{version} is already the latest version of series {series}")]
    AlreadyLatest { series: SeriesId, version: VersionLabel },

    /// The plan was made against a different state of the record.
    #[error("stale plan for series {series}: planned against {expected}, record is at {found}")]
    StalePlan {
        series: SeriesId,
        expected: VersionLabel,
        found: VersionLabel,
    },

    /// Payload references handed to `apply_plan` do not match the plan.
    #[error("payload references do not match plan for series {series}: {reason}")]
    PayloadMismatch { series: SeriesId, reason: String },
}

/// Convenience type alias for series operations.
pub type SeriesResult<T> = std::result::Result<T, SeriesError>;
