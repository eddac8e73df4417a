//! The add-data decision procedure.
//!
//! Deciding and applying are separate steps. [`plan_add`] looks only at the
//! current record and the request, and either rejects (duplicate input,
//! overlap under the `auto` policy) or returns an [`AddDataPlan`] naming the
//! version label the payload must be written under. Once the payload is
//! durable, [`apply_plan`] folds the written entries into the record.

use ghg_store::PayloadRef;
use ghg_types::interval::{conflicts, is_disjoint_sorted, subtract};
use ghg_types::{ContentHash, Interval, Timestamp, VersionLabel};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{SeriesError, SeriesResult};
use crate::policy::{ConflictPolicy, RetainCurrent, Retention};
use crate::types::{SeriesRecord, Version, VersionEntry};

/// Raw source file identity, used for duplicate detection.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceFile {
    pub hash: ContentHash,
    pub name: String,
}

/// Input to the add-data procedure.
#[derive(Clone, Debug)]
pub struct AddDataRequest {
    pub intervals: Vec<Interval>,
    pub source: Option<SourceFile>,
    pub conflict_policy: ConflictPolicy,
    pub retain_current: RetainCurrent,
    /// Skip duplicate-input detection.
    pub force: bool,
}

impl AddDataRequest {
    /// A request with default policies.
    pub fn new(intervals: Vec<Interval>) -> Self {
        Self {
            intervals,
            source: None,
            conflict_policy: ConflictPolicy::default(),
            retain_current: RetainCurrent::default(),
            force: false,
        }
    }

    pub fn with_source(mut self, hash: ContentHash, name: impl Into<String>) -> Self {
        self.source = Some(SourceFile {
            hash,
            name: name.into(),
        });
        self
    }

    pub fn with_policy(mut self, policy: ConflictPolicy, retain: RetainCurrent) -> Self {
        self.conflict_policy = policy;
        self.retain_current = retain;
        self
    }

    pub fn forced(mut self, force: bool) -> Self {
        self.force = force;
        self
    }
}

/// What applying a plan will do to the record.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AddDataAction {
    /// No overlap: extend the latest version.
    Append,
    /// Overlap, retained: a new latest version replaces the overlapping
    /// portion; the old version stays addressable.
    NewVersion { superseded: Vec<Interval> },
    /// Overlap, discarded: the latest version is rewritten in place.
    ReplaceInPlace { superseded: Vec<Interval> },
}

/// Outcome of [`plan_add`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AddDataPlan {
    pub action: AddDataAction,
    /// Version the payload belongs to once applied.
    pub target_version: VersionLabel,
    /// Sorted candidate intervals.
    pub candidates: Vec<Interval>,
    pub source: Option<SourceFile>,
    base_version: VersionLabel,
}

/// Result of [`apply_plan`].
#[derive(Clone, Debug)]
pub struct Applied {
    pub record: SeriesRecord,
    /// References no version uses any more.
    pub released: Vec<PayloadRef>,
}

/// Decide how a request changes `record`, without changing it.
pub fn plan_add(record: &SeriesRecord, request: &AddDataRequest) -> SeriesResult<AddDataPlan> {
    let series = record.series_id;
    if request.intervals.is_empty() {
        return Err(SeriesError::NoIntervals { series });
    }
    let mut candidates = request.intervals.clone();
    candidates.sort();
    if !is_disjoint_sorted(&candidates) {
        return Err(SeriesError::OverlappingCandidates(candidates));
    }

    if !request.force {
        if let Some(source) = &request.source {
            if let Some((version, filename)) = record.find_source(&source.hash) {
                return Err(SeriesError::DuplicateInput {
                    series,
                    hash: source.hash,
                    version,
                    filename: filename.to_string(),
                });
            }
        }
    }

    let latest = record.latest()?;
    let conflicting = conflicts(&latest.intervals(), &candidates);
    let (action, target_version) = if conflicting.is_empty() {
        (AddDataAction::Append, record.latest_version)
    } else {
        match request.conflict_policy {
            ConflictPolicy::Auto => {
                return Err(SeriesError::DataOverlap {
                    series,
                    conflicting,
                    candidates,
                })
            }
            ConflictPolicy::New => match request.retain_current.resolve() {
                Retention::Retain => (
                    AddDataAction::NewVersion {
                        superseded: conflicting,
                    },
                    record.next_label(),
                ),
                Retention::Discard => (
                    AddDataAction::ReplaceInPlace {
                        superseded: conflicting,
                    },
                    record.latest_version,
                ),
            },
        }
    };

    debug!(series = %series, target = %target_version, action = ?action, "add-data planned");
    Ok(AddDataPlan {
        action,
        target_version,
        candidates,
        source: request.source.clone(),
        base_version: record.latest_version,
    })
}

/// Fold freshly written entries into the record according to `plan`.
///
/// `written` must hold exactly one entry per candidate interval.
pub fn apply_plan(
    record: &SeriesRecord,
    plan: &AddDataPlan,
    written: Vec<VersionEntry>,
    now: Timestamp,
) -> SeriesResult<Applied> {
    let series = record.series_id;
    if record.latest_version != plan.base_version {
        return Err(SeriesError::StalePlan {
            series,
            expected: plan.base_version,
            found: record.latest_version,
        });
    }
    let mut written = written;
    written.sort_by(|a, b| a.interval.cmp(&b.interval));
    let written_intervals: Vec<Interval> = written.iter().map(|e| e.interval).collect();
    if written_intervals != plan.candidates {
        return Err(SeriesError::PayloadMismatch {
            series,
            reason: format!(
                "expected entries for {:?}, got {:?}",
                plan.candidates, written_intervals
            ),
        });
    }

    let latest = record.latest()?;
    let mut next = record.clone();
    match &plan.action {
        AddDataAction::Append => {
            let version = next
                .versions
                .get_mut(&plan.target_version)
                .ok_or(SeriesError::UnknownVersion {
                    series,
                    version: plan.target_version,
                })?;
            version.entries.extend(written);
            version.sort();
            if !is_disjoint_sorted(&version.intervals()) {
                return Err(SeriesError::DataOverlap {
                    series,
                    conflicting: conflicts(&latest.intervals(), &plan.candidates),
                    candidates: plan.candidates.clone(),
                });
            }
        }
        AddDataAction::NewVersion { .. } => {
            let version = Version {
                entries: supersede(latest, &plan.candidates, written),
                created_at: now,
            };
            next.versions.insert(plan.target_version, version);
            next.latest_version = plan.target_version;
        }
        AddDataAction::ReplaceInPlace { .. } => {
            let entries = supersede(latest, &plan.candidates, written);
            let version = next
                .versions
                .get_mut(&plan.target_version)
                .ok_or(SeriesError::UnknownVersion {
                    series,
                    version: plan.target_version,
                })?;
            version.entries = entries;
        }
    }

    if let Some(source) = &plan.source {
        next.original_file_hashes
            .entry(next.latest_version)
            .or_default()
            .insert(source.hash, source.name.clone());
    }
    next.updated_at = now;

    let still_used = next.all_refs();
    let released: Vec<PayloadRef> = record
        .all_refs()
        .into_iter()
        .filter(|r| !still_used.contains(r))
        .cloned()
        .collect();

    Ok(Applied {
        record: next,
        released,
    })
}

/// Entries of `base` with the candidate ranges cut out, plus the new ones.
fn supersede(base: &Version, candidates: &[Interval], written: Vec<VersionEntry>) -> Vec<VersionEntry> {
    let mut entries: Vec<VersionEntry> = base
        .entries
        .iter()
        .flat_map(|entry| {
            subtract(&[entry.interval], candidates)
                .into_iter()
                .map(|interval| VersionEntry {
                    interval,
                    refs: entry.refs.clone(),
                    attributes: entry.attributes.clone(),
                })
        })
        .collect();
    entries.extend(written);
    entries.sort_by(|a, b| a.interval.cmp(&b.interval));
    entries
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use ghg_types::{Attributes, SeriesId};

    fn ts(y: i32, m: u32) -> Timestamp {
        Utc.with_ymd_and_hms(y, m, 1, 0, 0, 0).unwrap()
    }

    fn iv(a: (i32, u32), b: (i32, u32)) -> Interval {
        Interval::new(ts(a.0, a.1), ts(b.0, b.1)).unwrap()
    }

    fn chunk(name: &str, interval: Interval) -> PayloadRef {
        PayloadRef {
            key: format!("{name}.chunk"),
            hash: ContentHash::from_bytes(name.as_bytes()),
            interval,
            rows: 1,
        }
    }

    fn entry(name: &str, interval: Interval) -> VersionEntry {
        VersionEntry::new(interval, vec![chunk(name, interval)])
    }

    fn empty_record() -> SeriesRecord {
        SeriesRecord::new(
            SeriesId::new(),
            "surface",
            Attributes::new(),
            ContentHash::from_bytes(b"fingerprint"),
            Attributes::new(),
            ts(2020, 1),
        )
    }

    fn ingest(record: &SeriesRecord, request: AddDataRequest, name: &str) -> SeriesResult<Applied> {
        let plan = plan_add(record, &request)?;
        let written = plan
            .candidates
            .iter()
            .map(|iv| entry(name, *iv))
            .collect();
        apply_plan(record, &plan, written, ts(2024, 1))
    }

    /// Record after scenarios 1 to 3: v1 covering 2010-01 .. 2012-06.
    fn seeded() -> SeriesRecord {
        let r = empty_record();
        let r = ingest(&r, AddDataRequest::new(vec![iv((2010, 1), (2011, 1))]), "a").unwrap().record;
        let r = ingest(&r, AddDataRequest::new(vec![iv((2011, 1), (2012, 1))]), "b").unwrap().record;
        ingest(
            &r,
            AddDataRequest::new(vec![iv((2012, 1), (2012, 6))])
                .with_policy(ConflictPolicy::New, RetainCurrent::Auto),
            "c",
        )
        .unwrap()
        .record
    }

    #[test]
    fn first_ingest_lands_in_v1() {
        let r = empty_record();
        let applied = ingest(&r, AddDataRequest::new(vec![iv((2010, 1), (2011, 1))]), "a").unwrap();
        assert_eq!(applied.record.latest_version, VersionLabel::first());
        assert_eq!(applied.record.latest().unwrap().entries.len(), 1);
        assert!(applied.released.is_empty());
    }

    #[test]
    fn appends_stay_in_v1_and_fuse() {
        let r = seeded();
        assert_eq!(r.latest_version, VersionLabel::first());
        assert_eq!(r.versions.len(), 1);
        assert_eq!(r.coverage(r.latest_version).unwrap(), vec![iv((2010, 1), (2012, 6))]);
    }

    #[test]
    fn overlap_under_auto_is_rejected() {
        let r = seeded();
        let err = plan_add(&r, &AddDataRequest::new(vec![iv((2012, 3), (2012, 9))])).unwrap_err();
        match err {
            SeriesError::DataOverlap {
                conflicting,
                candidates,
                ..
            } => {
                assert_eq!(conflicting, vec![iv((2012, 1), (2012, 6))]);
                assert_eq!(candidates, vec![iv((2012, 3), (2012, 9))]);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn overlap_retained_creates_v2() {
        let r = seeded();
        let request = AddDataRequest::new(vec![iv((2012, 3), (2012, 9))])
            .with_policy(ConflictPolicy::New, RetainCurrent::Yes);
        let applied = ingest(&r, request, "d").unwrap();
        let next = applied.record;

        assert_eq!(next.latest_version.ordinal(), 2);
        assert_eq!(next.version(VersionLabel::first()).unwrap(), r.latest().unwrap());
        let v2 = next.latest().unwrap();
        assert!(is_disjoint_sorted(&v2.intervals()));
        assert_eq!(
            v2.intervals(),
            vec![
                iv((2010, 1), (2011, 1)),
                iv((2011, 1), (2012, 1)),
                iv((2012, 1), (2012, 3)),
                iv((2012, 3), (2012, 9)),
            ]
        );
        assert!(applied.released.is_empty());
    }

    #[test]
    fn overlap_discarded_rewrites_v1() {
        let r = seeded();
        let request = AddDataRequest::new(vec![iv((2011, 6), (2012, 9))])
            .with_policy(ConflictPolicy::New, RetainCurrent::No);
        let applied = ingest(&r, request, "d").unwrap();
        let next = applied.record;

        assert_eq!(next.latest_version, VersionLabel::first());
        assert_eq!(next.versions.len(), 1);
        assert_eq!(
            next.latest().unwrap().intervals(),
            vec![
                iv((2010, 1), (2011, 1)),
                iv((2011, 1), (2011, 6)),
                iv((2011, 6), (2012, 9)),
            ]
        );
        // Chunk "c" covered only 2012-01..2012-06, now fully superseded.
        assert_eq!(applied.released.len(), 1);
        assert_eq!(applied.released[0].key, "c.chunk");
    }

    #[test]
    fn duplicate_source_is_rejected_unless_forced() {
        let r = empty_record();
        let hash = ContentHash::from_bytes(b"raw file");
        let first = AddDataRequest::new(vec![iv((2010, 1), (2011, 1))]).with_source(hash, "mhd.csv");
        let r = ingest(&r, first, "a").unwrap().record;

        let again = AddDataRequest::new(vec![iv((2013, 1), (2014, 1))]).with_source(hash, "mhd.csv");
        assert!(matches!(
            plan_add(&r, &again),
            Err(SeriesError::DuplicateInput { .. })
        ));
        assert!(plan_add(&r, &again.forced(true)).is_ok());
    }

    #[test]
    fn duplicate_detection_spans_all_versions() {
        let r = empty_record();
        let hash = ContentHash::from_bytes(b"old file");
        let r = ingest(
            &r,
            AddDataRequest::new(vec![iv((2010, 1), (2011, 1))]).with_source(hash, "old.nc"),
            "a",
        )
        .unwrap()
        .record;
        let r = ingest(
            &r,
            AddDataRequest::new(vec![iv((2010, 6), (2011, 1))])
                .with_policy(ConflictPolicy::New, RetainCurrent::Yes),
            "b",
        )
        .unwrap()
        .record;
        assert_eq!(r.latest_version.ordinal(), 2);
        let again = AddDataRequest::new(vec![iv((2015, 1), (2016, 1))]).with_source(hash, "old.nc");
        match plan_add(&r, &again) {
            Err(SeriesError::DuplicateInput { version, .. }) => assert_eq!(version, VersionLabel::first()),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn source_recorded_under_resulting_version() {
        let r = seeded();
        let hash = ContentHash::from_bytes(b"v2 file");
        let request = AddDataRequest::new(vec![iv((2012, 3), (2012, 9))])
            .with_policy(ConflictPolicy::New, RetainCurrent::Yes)
            .with_source(hash, "v2.csv");
        let next = ingest(&r, request, "d").unwrap().record;
        assert_eq!(next.find_source(&hash).unwrap().0, next.latest_version);
    }

    #[test]
    fn overlapping_candidates_and_empty_requests_fail() {
        let r = empty_record();
        assert!(matches!(
            plan_add(&r, &AddDataRequest::new(vec![])),
            Err(SeriesError::NoIntervals { .. })
        ));
        let request = AddDataRequest::new(vec![iv((2010, 1), (2011, 1)), iv((2010, 6), (2012, 1))]);
        assert!(matches!(
            plan_add(&r, &request),
            Err(SeriesError::OverlappingCandidates(_))
        ));
    }

    #[test]
    fn stale_plan_is_refused() {
        let r = seeded();
        let request = AddDataRequest::new(vec![iv((2012, 3), (2012, 9))])
            .with_policy(ConflictPolicy::New, RetainCurrent::Yes);
        let plan = plan_add(&r, &request).unwrap();
        let moved = ingest(&r, request.clone(), "x").unwrap().record;
        let written = vec![entry("y", iv((2012, 3), (2012, 9)))];
        assert!(matches!(
            apply_plan(&moved, &plan, written, ts(2024, 2)),
            Err(SeriesError::StalePlan { .. })
        ));
    }

    #[test]
    fn mismatched_entries_are_refused() {
        let r = empty_record();
        let plan = plan_add(&r, &AddDataRequest::new(vec![iv((2010, 1), (2011, 1))])).unwrap();
        let written = vec![entry("a", iv((2010, 1), (2010, 6)))];
        assert!(matches!(
            apply_plan(&r, &plan, written, ts(2024, 1)),
            Err(SeriesError::PayloadMismatch { .. })
        ));
    }

    #[test]
    fn adjacent_at_nanosecond_is_not_overlap() {
        let r = empty_record();
        let a = Interval::new(Utc.timestamp_nanos(0), Utc.timestamp_nanos(1_000)).unwrap();
        let b = Interval::new(Utc.timestamp_nanos(1_000), Utc.timestamp_nanos(2_000)).unwrap();
        let r = ingest(&r, AddDataRequest::new(vec![a]), "a").unwrap().record;
        let plan = plan_add(&r, &AddDataRequest::new(vec![b])).unwrap();
        assert_eq!(plan.action, AddDataAction::Append);
    }
}
