//! What a parser hands the store, and what an ingest reports back.

use chrono::Duration;
use ghg_index::UpdateMismatch;
use ghg_series::{ConflictPolicy, RetainCurrent};
use ghg_store::ArrayPayload;
use ghg_types::{Attributes, Interval, MetaValue, SeriesId, VersionLabel};

use crate::error::{SdkError, SdkResult};

/// Raw source file as uploaded.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SourceBytes {
    pub name: String,
    pub bytes: Vec<u8>,
}

/// One standardised dataset ready for ingest.
#[derive(Clone, Debug)]
pub struct Dataset {
    pub payload: ArrayPayload,
    /// Candidate intervals the payload covers.
    pub intervals: Vec<Interval>,
    /// Candidate descriptive keys; the schema picks the distinguishing ones.
    pub metadata: Attributes,
    /// Attributes embedded in the payload itself.
    pub attributes: Attributes,
    pub source: Option<SourceBytes>,
}

impl Dataset {
    pub fn new(payload: ArrayPayload, intervals: Vec<Interval>) -> Self {
        Self {
            payload,
            intervals,
            metadata: Attributes::new(),
            attributes: Attributes::new(),
            source: None,
        }
    }

    /// A dataset covering its payload from the first timestamp to one
    /// sampling period past the last.
    pub fn spanning(payload: ArrayPayload, sampling_period: Duration) -> SdkResult<Self> {
        let span = payload
            .span(sampling_period)
            .ok_or_else(|| SdkError::InvalidDataset("payload has no rows".into()))?;
        Ok(Self::new(payload, vec![span]))
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<MetaValue>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<MetaValue>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    pub fn with_source(mut self, name: impl Into<String>, bytes: impl Into<Vec<u8>>) -> Self {
        self.source = Some(SourceBytes {
            name: name.into(),
            bytes: bytes.into(),
        });
        self
    }

    pub(crate) fn validate(&self) -> SdkResult<()> {
        if self.intervals.is_empty() {
            return Err(SdkError::InvalidDataset("no candidate intervals".into()));
        }
        self.payload
            .validate()
            .map_err(|e| SdkError::InvalidDataset(e.to_string()))
    }
}

/// Policy knobs of one ingest call.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct IngestOptions {
    pub conflict_policy: ConflictPolicy,
    pub retain_current: RetainCurrent,
    pub force: bool,
    pub update_mismatch: UpdateMismatch,
}

impl IngestOptions {
    pub fn with_policy(mut self, policy: ConflictPolicy, retain: RetainCurrent) -> Self {
        self.conflict_policy = policy;
        self.retain_current = retain;
        self
    }

    pub fn forced(mut self) -> Self {
        self.force = true;
        self
    }

    pub fn with_update_mismatch(mut self, choice: UpdateMismatch) -> Self {
        self.update_mismatch = choice;
        self
    }
}

/// How an ingest changed its series.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IngestAction {
    /// A new series was created.
    Created,
    /// Data appended to the latest version.
    Appended,
    /// A new version superseded part of the old one.
    NewVersion,
    /// The latest version was rewritten in place.
    ReplacedInPlace,
}

/// Result of a successful ingest.
#[derive(Clone, Debug)]
pub struct IngestOutcome {
    pub series_id: SeriesId,
    pub data_kind: String,
    pub version: VersionLabel,
    pub action: IngestAction,
    /// Committed index revision of the series.
    pub revision: u64,
    /// Latest-version intervals that were replaced.
    pub superseded: Vec<Interval>,
    /// Payload chunks no version references any more.
    pub released_chunks: usize,
    /// Embedded attributes after reconciliation.
    pub attributes: Attributes,
}

/// Result of a batch ingest.
#[derive(Debug, Default)]
pub struct IngestReport {
    pub outcomes: Vec<IngestOutcome>,
    /// Non-fatal rejections, in submission order.
    pub skipped: Vec<SdkError>,
}
