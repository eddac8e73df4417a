//! Series records and their versions.

use std::collections::{BTreeMap, BTreeSet};

use ghg_store::PayloadRef;
use ghg_types::interval::{covering, merge};
use ghg_types::{Attributes, ContentHash, Interval, SeriesId, Timestamp, VersionLabel};
use serde::{Deserialize, Serialize};

use crate::error::{SeriesError, SeriesResult};

/// One covered interval of a version and the chunks that back it.
///
/// The references may reach past `interval` when an entry is what remains of
/// a larger one after a split; readers restrict chunk rows to `interval`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct VersionEntry {
    pub interval: Interval,
    pub refs: Vec<PayloadRef>,
    /// Embedded data attributes of the ingest that wrote the entry, after
    /// reconciliation with the series metadata.
    #[serde(default, skip_serializing_if = "Attributes::is_empty")]
    pub attributes: Attributes,
}

impl VersionEntry {
    pub fn new(interval: Interval, refs: Vec<PayloadRef>) -> Self {
        Self {
            interval,
            refs,
            attributes: Attributes::new(),
        }
    }

    pub fn with_attributes(mut self, attributes: Attributes) -> Self {
        self.attributes = attributes;
        self
    }
}

/// A labelled snapshot of a series' coverage.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Version {
    /// Sorted, pairwise non-overlapping entries.
    pub entries: Vec<VersionEntry>,
    pub created_at: Timestamp,
}

impl Version {
    /// An empty version.
    pub fn empty(created_at: Timestamp) -> Self {
        Self {
            entries: Vec::new(),
            created_at,
        }
    }

    /// Intervals of the entries, sorted.
    pub fn intervals(&self) -> Vec<Interval> {
        self.entries.iter().map(|e| e.interval).collect()
    }

    /// Minimal covering set: adjacent entries fused.
    pub fn coverage(&self) -> Vec<Interval> {
        merge(&self.intervals())
    }

    /// Earliest start and latest end.
    pub fn span(&self) -> Option<Interval> {
        covering(&self.intervals())
    }

    /// Every distinct payload reference of this version.
    pub fn payload_refs(&self) -> BTreeSet<&PayloadRef> {
        self.entries.iter().flat_map(|e| e.refs.iter()).collect()
    }

    /// Entries intersecting `window`.
    pub fn entries_in<'a>(&'a self, window: &'a Interval) -> impl Iterator<Item = &'a VersionEntry> {
        self.entries.iter().filter(move |e| e.interval.overlaps(window))
    }

    /// Attributes of all entries, later entries winning on shared keys.
    pub fn attributes(&self) -> Attributes {
        self.entries
            .iter()
            .flat_map(|e| e.attributes.clone())
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub(crate) fn sort(&mut self) {
        self.entries.sort_by(|a, b| a.interval.cmp(&b.interval));
    }
}

/// Full durable state of one series.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SeriesRecord {
    pub series_id: SeriesId,
    pub data_kind: String,
    /// Normalised distinguishing keys the series was created for.
    pub distinguishing_keys: Attributes,
    /// Hash of `distinguishing_keys`.
    pub fingerprint: ContentHash,
    pub versions: BTreeMap<VersionLabel, Version>,
    pub latest_version: VersionLabel,
    /// Non-distinguishing, editable metadata.
    pub descriptive_metadata: Attributes,
    /// Source files ingested per version: content hash to file name.
    pub original_file_hashes: BTreeMap<VersionLabel, BTreeMap<ContentHash, String>>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl SeriesRecord {
    /// A fresh record with an empty `v1`.
    pub fn new(
        series_id: SeriesId,
        data_kind: impl Into<String>,
        distinguishing_keys: Attributes,
        fingerprint: ContentHash,
        descriptive_metadata: Attributes,
        now: Timestamp,
    ) -> Self {
        let first = VersionLabel::first();
        Self {
            series_id,
            data_kind: data_kind.into(),
            distinguishing_keys,
            fingerprint,
            versions: BTreeMap::from([(first, Version::empty(now))]),
            latest_version: first,
            descriptive_metadata,
            original_file_hashes: BTreeMap::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Look up a version.
    pub fn version(&self, label: VersionLabel) -> SeriesResult<&Version> {
        self.versions.get(&label).ok_or(SeriesError::UnknownVersion {
            series: self.series_id,
            version: label,
        })
    }

    /// The latest version.
    pub fn latest(&self) -> SeriesResult<&Version> {
        self.version(self.latest_version)
    }

    /// Labels in creation order.
    pub fn labels(&self) -> impl Iterator<Item = VersionLabel> + '_ {
        self.versions.keys().copied()
    }

    /// Merged coverage of a version.
    pub fn coverage(&self, label: VersionLabel) -> SeriesResult<Vec<Interval>> {
        Ok(self.version(label)?.coverage())
    }

    /// Label the next new version receives.
    pub fn next_label(&self) -> VersionLabel {
        self.versions
            .keys()
            .next_back()
            .map_or(VersionLabel::first(), VersionLabel::next)
    }

    /// Where a source content hash was already ingested, if anywhere.
    pub fn find_source(&self, hash: &ContentHash) -> Option<(VersionLabel, &str)> {
        self.original_file_hashes
            .iter()
            .find_map(|(label, files)| files.get(hash).map(|name| (*label, name.as_str())))
    }

    /// Every payload reference held by any version.
    pub fn all_refs(&self) -> BTreeSet<&PayloadRef> {
        self.versions.values().flat_map(Version::payload_refs).collect()
    }

    /// Earliest start and latest end of the latest version.
    pub fn latest_span(&self) -> Option<Interval> {
        self.versions.get(&self.latest_version).and_then(Version::span)
    }

    /// Non-destructive rollback: create a new latest version whose contents
    /// equal `label`.
    pub fn restore_version(&self, label: VersionLabel, now: Timestamp) -> SeriesResult<Self> {
        if label == self.latest_version {
            return Err(SeriesError::AlreadyLatest {
                series: self.series_id,
                version: label,
            });
        }
        let source = self.version(label)?;
        let restored = Version {
            entries: source.entries.clone(),
            created_at: now,
        };
        let next = self.next_label();
        let mut record = self.clone();
        record.versions.insert(next, restored);
        record.latest_version = next;
        record.updated_at = now;
        tracing::info!(series = %self.series_id, from = %label, to = %next, "version restored");
        Ok(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use ghg_types::MetaValue;

    fn ts(y: i32) -> Timestamp {
        Utc.with_ymd_and_hms(y, 1, 1, 0, 0, 0).unwrap()
    }

    fn record() -> SeriesRecord {
        let keys = Attributes::from([("site".to_string(), MetaValue::from("mhd"))]);
        SeriesRecord::new(
            SeriesId::new(),
            "surface",
            keys,
            ContentHash::from_bytes(b"fp"),
            Attributes::new(),
            ts(2020),
        )
    }

    fn entry(a: i32, b: i32) -> VersionEntry {
        VersionEntry::new(Interval::new(ts(a), ts(b)).unwrap(), Vec::new())
    }

    #[test]
    fn new_record_starts_at_empty_v1() {
        let r = record();
        assert_eq!(r.latest_version, VersionLabel::first());
        assert!(r.latest().unwrap().is_empty());
        assert_eq!(r.next_label().to_string(), "v2");
        assert!(r.latest_span().is_none());
    }

    #[test]
    fn coverage_fuses_adjacent_entries() {
        let mut r = record();
        let v1 = r.versions.get_mut(&VersionLabel::first()).unwrap();
        v1.entries = vec![entry(2010, 2011), entry(2011, 2012), entry(2014, 2015)];
        let cov = r.coverage(VersionLabel::first()).unwrap();
        assert_eq!(cov.len(), 2);
        assert_eq!(cov[0], Interval::new(ts(2010), ts(2012)).unwrap());
        assert_eq!(r.latest_span().unwrap(), Interval::new(ts(2010), ts(2015)).unwrap());
    }

    #[test]
    fn restore_creates_new_latest() {
        let mut r = record();
        r.versions.get_mut(&VersionLabel::first()).unwrap().entries = vec![entry(2010, 2011)];
        r.versions.insert(
            VersionLabel::first().next(),
            Version {
                entries: vec![entry(2012, 2013)],
                created_at: ts(2021),
            },
        );
        r.latest_version = VersionLabel::first().next();

        let restored = r.restore_version(VersionLabel::first(), ts(2022)).unwrap();
        assert_eq!(restored.latest_version.ordinal(), 3);
        assert_eq!(
            restored.latest().unwrap().entries,
            r.version(VersionLabel::first()).unwrap().entries
        );
        assert_eq!(restored.versions.len(), 3);
    }

    #[test]
    fn later_entries_win_attribute_merge() {
        let mut r = record();
        let units = |u: &str| Attributes::from([("units".to_string(), MetaValue::from(u))]);
        r.versions.get_mut(&VersionLabel::first()).unwrap().entries = vec![
            entry(2010, 2011).with_attributes(units("ppm")),
            entry(2011, 2012),
            entry(2012, 2013).with_attributes(units("ppb")),
        ];
        let attrs = r.latest().unwrap().attributes();
        assert_eq!(attrs["units"], MetaValue::from("ppb"));
    }

    #[test]
    fn restore_latest_or_unknown_fails() {
        let r = record();
        assert!(matches!(
            r.restore_version(VersionLabel::first(), ts(2021)),
            Err(SeriesError::AlreadyLatest { .. })
        ));
        assert!(matches!(
            r.restore_version(VersionLabel::new(7).unwrap(), ts(2021)),
            Err(SeriesError::UnknownVersion { .. })
        ));
    }

    #[test]
    fn record_survives_json() {
        let mut r = record();
        r.original_file_hashes
            .entry(VersionLabel::first())
            .or_default()
            .insert(ContentHash::from_bytes(b"file"), "mhd.csv".to_string());
        r.versions.get_mut(&VersionLabel::first()).unwrap().entries = vec![entry(2010, 2011)
            .with_attributes(Attributes::from([("units".to_string(), MetaValue::from("ppb"))]))];
        let json = serde_json::to_string(&r).unwrap();
        let back: SeriesRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(back, r);
        assert!(back.find_source(&ContentHash::from_bytes(b"file")).is_some());
    }
}
