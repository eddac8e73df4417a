//! Store consistency checks.
//!
//! Ingest writes chunks before it commits the metadata that references them,
//! so a chunk nothing references may simply belong to an ingest in flight.
//! Unreferenced chunks younger than the grace period are counted as pending
//! rather than reported, and prune re-checks age and references right before
//! deleting anything.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use chrono::{Duration, Utc};
use ghg_index::MetadataIndex;
use ghg_store::{ArrayStore, ContentStore, StoredChunk};
use ghg_types::interval::is_disjoint_sorted;
use ghg_types::{ContentHash, Interval, SeriesId, Timestamp, VersionLabel};
use tracing::{debug, info};

use crate::error::SdkResult;

/// One inconsistency found by a check.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Issue {
    /// Metadata references a chunk that is not stored.
    MissingChunk { series: SeriesId, key: String },
    /// A referenced chunk fails its checksum or content hash.
    CorruptChunk { series: SeriesId, key: String },
    /// The latest version holds overlapping intervals.
    OverlappingIntervals {
        series: SeriesId,
        version: VersionLabel,
        intervals: Vec<Interval>,
    },
    /// A recorded source file is not in the source cache.
    MissingSource { series: SeriesId, hash: ContentHash },
    /// A payload folder with no metadata record.
    OrphanedSeries(SeriesId),
    /// A stored chunk no version references.
    UnreferencedChunk { series: SeriesId, key: String },
}

impl fmt::Display for Issue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingChunk { series, key } => write!(f, "{series}: missing chunk {key}"),
            Self::CorruptChunk { series, key } => write!(f, "{series}: corrupt chunk {key}"),
            Self::OverlappingIntervals {
                series,
                version,
                intervals,
            } => {
                let list: Vec<String> = intervals.iter().map(ToString::to_string).collect();
                write!(f, "{series}: {version} has overlapping intervals {}", list.join(", "))
            }
            Self::MissingSource { series, hash } => {
                write!(f, "{series}: source file {} not cached", hash.short_hex())
            }
            Self::OrphanedSeries(series) => write!(f, "{series}: payload folder without metadata"),
            Self::UnreferencedChunk { series, key } => write!(f, "{series}: unreferenced chunk {key}"),
        }
    }
}

/// Result of [`DataStore::check`](crate::DataStore::check).
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ConsistencyReport {
    pub series_checked: usize,
    pub chunks_checked: usize,
    /// Unreferenced chunks still inside the grace period.
    pub pending_chunks: usize,
    pub issues: Vec<Issue>,
}

impl ConsistencyReport {
    pub fn is_clean(&self) -> bool {
        self.issues.is_empty()
    }

    /// Issues that prune can repair.
    pub fn prunable(&self) -> impl Iterator<Item = &Issue> {
        self.issues
            .iter()
            .filter(|i| matches!(i, Issue::OrphanedSeries(_) | Issue::UnreferencedChunk { .. }))
    }
}

/// What a prune removed.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PruneSummary {
    pub chunks: usize,
    pub folders: usize,
    /// Reported items left alone because they were written to or
    /// referenced again since the check.
    pub kept: usize,
}

fn settled(chunk: &StoredChunk, cutoff: Timestamp) -> bool {
    chunk.written_at <= cutoff
}

pub(crate) fn run(
    indexes: &[&dyn MetadataIndex],
    arrays: &dyn ArrayStore,
    sources: &dyn ContentStore,
    grace: Duration,
) -> SdkResult<ConsistencyReport> {
    let cutoff = Utc::now() - grace;
    let mut report = ConsistencyReport::default();
    let mut known = BTreeSet::new();

    for index in indexes {
        for record in index.all()? {
            let id = record.series_id;
            known.insert(id);
            report.series_checked += 1;

            let refs = record.series.all_refs();
            let referenced: BTreeSet<&str> = refs.iter().map(|r| r.key.as_str()).collect();
            for reference in &refs {
                report.chunks_checked += 1;
                if !arrays.exists(&id, reference)? {
                    report.issues.push(Issue::MissingChunk {
                        series: id,
                        key: reference.key.clone(),
                    });
                } else if !arrays.verify(&id, reference)? {
                    report.issues.push(Issue::CorruptChunk {
                        series: id,
                        key: reference.key.clone(),
                    });
                }
            }
            for chunk in arrays.chunks(&id)? {
                if referenced.contains(chunk.key.as_str()) {
                    continue;
                }
                if settled(&chunk, cutoff) {
                    report.issues.push(Issue::UnreferencedChunk {
                        series: id,
                        key: chunk.key,
                    });
                } else {
                    report.pending_chunks += 1;
                }
            }

            let latest = record.series.latest()?;
            let mut intervals = latest.intervals();
            intervals.sort();
            if !is_disjoint_sorted(&intervals) {
                report.issues.push(Issue::OverlappingIntervals {
                    series: id,
                    version: record.latest_version,
                    intervals,
                });
            }

            for hash in record.series.original_file_hashes.values().flat_map(BTreeMap::keys) {
                if !sources.exists(hash)? {
                    report.issues.push(Issue::MissingSource {
                        series: id,
                        hash: *hash,
                    });
                }
            }
            debug!(series = %id, data_kind = %record.data_kind, "series checked");
        }
    }

    for id in arrays.series_ids()? {
        if known.contains(&id) {
            continue;
        }
        let chunks = arrays.chunks(&id)?;
        let pending = chunks.iter().filter(|c| !settled(c, cutoff)).count();
        if pending == 0 {
            report.issues.push(Issue::OrphanedSeries(id));
        } else {
            report.pending_chunks += pending;
        }
    }
    Ok(report)
}

/// Chunk keys any index currently references for `series`.
fn referenced_now(indexes: &[&dyn MetadataIndex], series: &SeriesId) -> SdkResult<Option<BTreeSet<String>>> {
    let mut found = None;
    for index in indexes {
        if let Some(record) = index.get(series)? {
            let keys = found.get_or_insert_with(BTreeSet::new);
            keys.extend(record.series.all_refs().into_iter().map(|r| r.key.clone()));
        }
    }
    Ok(found)
}

pub(crate) fn prune(
    report: &ConsistencyReport,
    indexes: &[&dyn MetadataIndex],
    arrays: &dyn ArrayStore,
    grace: Duration,
) -> SdkResult<PruneSummary> {
    let cutoff = Utc::now() - grace;
    let mut summary = PruneSummary::default();
    let mut unreferenced: BTreeMap<SeriesId, BTreeSet<&str>> = BTreeMap::new();
    for issue in report.prunable() {
        match issue {
            Issue::OrphanedSeries(id) => {
                let busy = referenced_now(indexes, id)?.is_some()
                    || arrays.chunks(id)?.iter().any(|c| !settled(c, cutoff));
                if busy {
                    summary.kept += 1;
                } else if arrays.delete_series(id)? {
                    summary.folders += 1;
                }
            }
            Issue::UnreferencedChunk { series, key } => {
                unreferenced.entry(*series).or_default().insert(key.as_str());
            }
            _ => {}
        }
    }
    for (series, keys) in unreferenced {
        let referenced = referenced_now(indexes, &series)?.unwrap_or_default();
        let doomed: Vec<String> = arrays
            .chunks(&series)?
            .into_iter()
            .filter(|c| keys.contains(c.key.as_str()))
            .filter(|c| settled(c, cutoff) && !referenced.contains(&c.key))
            .map(|c| c.key)
            .collect();
        summary.kept += keys.len() - doomed.len();
        summary.chunks += arrays.delete_chunks(&series, &doomed)?;
    }
    info!(chunks = summary.chunks, folders = summary.folders, kept = summary.kept, "prune finished");
    Ok(summary)
}
