//! Caller-held undo log for metadata edits.
//!
//! Before editing a record the caller snapshots it here. Restoring never
//! rewrites history: it produces a record carrying the snapshot's descriptive
//! metadata on top of the current state, to be committed as a new revision.

use std::collections::BTreeMap;

use ghg_types::SeriesId;

use crate::error::{IndexError, IndexResult};
use crate::record::MetadataRecord;

/// Snapshots of metadata records keyed by series and revision.
#[derive(Clone, Debug, Default)]
pub struct UndoLog {
    snapshots: BTreeMap<SeriesId, BTreeMap<u64, MetadataRecord>>,
}

impl UndoLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Keep a snapshot of `record` at its current revision.
    pub fn record(&mut self, record: &MetadataRecord) {
        self.snapshots
            .entry(record.series_id)
            .or_default()
            .insert(record.revision, record.clone());
    }

    /// Revisions held for a series, oldest first.
    pub fn revisions(&self, series: &SeriesId) -> Vec<u64> {
        self.snapshots
            .get(series)
            .map(|m| m.keys().copied().collect())
            .unwrap_or_default()
    }

    pub fn snapshot(&self, series: &SeriesId, revision: u64) -> Option<&MetadataRecord> {
        self.snapshots.get(series)?.get(&revision)
    }

    /// Most recent snapshot of a series.
    pub fn latest(&self, series: &SeriesId) -> Option<&MetadataRecord> {
        self.snapshots.get(series)?.values().next_back()
    }

    /// Build the record that restores the snapshot at `revision` on top of
    /// `current`.
    pub fn restore(&self, current: &MetadataRecord, revision: u64) -> IndexResult<MetadataRecord> {
        let snapshot = self
            .snapshot(&current.series_id, revision)
            .ok_or(IndexError::UnknownRevision {
                series: current.series_id,
                revision,
            })?;
        let mut series = current.series.clone();
        series.descriptive_metadata = snapshot.series.descriptive_metadata.clone();
        Ok(current.updated(series))
    }

    pub fn len(&self) -> usize {
        self.snapshots.values().map(BTreeMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshots.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::tests::sample;
    use ghg_types::MetaValue;

    #[test]
    fn restore_brings_back_old_metadata_at_current_revision() {
        let mut log = UndoLog::new();
        let mut current = sample("mhd", "ch4");
        current.revision = 3;
        log.record(&current);

        let mut edited = current.series.clone();
        edited
            .descriptive_metadata
            .insert("network".into(), MetaValue::from("noaa"));
        let mut current = current.updated(edited);
        current.revision = 4;

        let restored = log.restore(&current, 3).unwrap();
        assert_eq!(restored.revision, 4);
        assert_eq!(
            restored.series.descriptive_metadata["network"],
            MetaValue::from("agage")
        );
        assert_eq!(log.revisions(&current.series_id), vec![3]);
        assert_eq!(log.latest(&current.series_id).unwrap().revision, 3);
    }

    #[test]
    fn unknown_revision_errors() {
        let log = UndoLog::new();
        assert!(log.is_empty());
        assert!(matches!(
            log.restore(&sample("tac", "co2"), 1),
            Err(IndexError::UnknownRevision { .. })
        ));
    }
}
