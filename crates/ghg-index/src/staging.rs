//! Staged writes and the optimistic commit check.
//!
//! Writes are collected in a [`Transaction`] and only reach durable storage
//! through [`MetadataIndex::commit`](crate::MetadataIndex::commit). Every
//! staged record carries the revision it was read at; the commit refuses the
//! whole transaction if any of those revisions moved in the meantime.

use std::collections::BTreeMap;

use ghg_types::SeriesId;
use tracing::debug;

use crate::error::{IndexError, IndexResult};
use crate::record::MetadataRecord;

/// A single staged change.
#[derive(Clone, Debug, PartialEq)]
pub enum StagedWrite {
    /// Insert or replace a record. Its `revision` is the base revision.
    Put(MetadataRecord),
    /// Remove a record last read at `base_revision`.
    Delete { series: SeriesId, base_revision: u64 },
}

impl StagedWrite {
    pub fn series(&self) -> SeriesId {
        match self {
            Self::Put(record) => record.series_id,
            Self::Delete { series, .. } => *series,
        }
    }

    pub fn base_revision(&self) -> u64 {
        match self {
            Self::Put(record) => record.revision,
            Self::Delete { base_revision, .. } => *base_revision,
        }
    }
}

/// In-memory staging area for index writes. One write per series; staging a
/// second write for the same series replaces the first.
#[derive(Clone, Debug, Default)]
pub struct Transaction {
    writes: BTreeMap<SeriesId, StagedWrite>,
}

impl Transaction {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stage an insert or update.
    pub fn put(&mut self, record: MetadataRecord) -> &mut Self {
        self.writes.insert(record.series_id, StagedWrite::Put(record));
        self
    }

    /// Stage removal of a record as it was read.
    pub fn delete(&mut self, record: &MetadataRecord) -> &mut Self {
        self.writes.insert(
            record.series_id,
            StagedWrite::Delete {
                series: record.series_id,
                base_revision: record.revision,
            },
        );
        self
    }

    pub fn writes(&self) -> impl Iterator<Item = &StagedWrite> {
        self.writes.values()
    }

    pub fn len(&self) -> usize {
        self.writes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.writes.is_empty()
    }

    /// Check every staged write against `current` and, if all pass, apply
    /// them. Returns the committed records with their new revisions.
    ///
    /// Nothing is changed when any check fails.
    pub fn apply_to(
        &self,
        data_kind: &str,
        current: &mut BTreeMap<SeriesId, MetadataRecord>,
    ) -> IndexResult<Vec<MetadataRecord>> {
        for write in self.writes.values() {
            let series = write.series();
            let found = current.get(&series).map_or(0, |r| r.revision);
            if found != write.base_revision() {
                debug!(series = %series, expected = write.base_revision(), found, "optimistic commit check failed");
                return Err(IndexError::Conflict {
                    data_kind: data_kind.to_string(),
                    series,
                    expected: write.base_revision(),
                    found,
                });
            }
            if let StagedWrite::Put(record) = write {
                let owner = current
                    .values()
                    .find(|r| r.fingerprint == record.fingerprint && r.series_id != series);
                if let Some(owner) = owner {
                    return Err(IndexError::FingerprintTaken {
                        data_kind: data_kind.to_string(),
                        fingerprint: record.fingerprint,
                        owner: owner.series_id,
                    });
                }
            }
        }

        let mut committed = Vec::new();
        for write in self.writes.values() {
            match write {
                StagedWrite::Put(record) => {
                    let mut record = record.clone();
                    record.revision += 1;
                    current.insert(record.series_id, record.clone());
                    committed.push(record);
                }
                StagedWrite::Delete { series, .. } => {
                    current.remove(series);
                }
            }
        }
        Ok(committed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::tests::sample;

    #[test]
    fn new_record_commits_at_revision_one() {
        let mut current = BTreeMap::new();
        let mut txn = Transaction::new();
        txn.put(sample("mhd", "ch4"));
        let committed = txn.apply_to("surface", &mut current).unwrap();
        assert_eq!(committed[0].revision, 1);
        assert_eq!(current.len(), 1);
    }

    #[test]
    fn stale_base_revision_conflicts_and_changes_nothing() {
        let mut current = BTreeMap::new();
        let record = sample("mhd", "ch4");
        let mut first = Transaction::new();
        first.put(record.clone());
        first.apply_to("surface", &mut current).unwrap();

        // A second writer staged against revision 0 as well.
        let other = sample("tac", "co2");
        let mut second = Transaction::new();
        second.put(other.clone()).put(record);
        let before = current.clone();
        assert!(matches!(
            second.apply_to("surface", &mut current),
            Err(IndexError::Conflict { expected: 0, found: 1, .. })
        ));
        assert_eq!(current, before);
    }

    #[test]
    fn duplicate_fingerprint_is_refused() {
        let mut current = BTreeMap::new();
        let a = sample("mhd", "ch4");
        let mut b = sample("mhd", "ch4");
        b.fingerprint = a.fingerprint;
        let mut txn = Transaction::new();
        txn.put(a);
        txn.apply_to("surface", &mut current).unwrap();
        let mut txn = Transaction::new();
        txn.put(b);
        assert!(matches!(
            txn.apply_to("surface", &mut current),
            Err(IndexError::FingerprintTaken { .. })
        ));
    }

    #[test]
    fn delete_checks_revision() {
        let mut current = BTreeMap::new();
        let mut txn = Transaction::new();
        txn.put(sample("mhd", "ch4"));
        let committed = txn.apply_to("surface", &mut current).unwrap().remove(0);

        let mut stale = committed.clone();
        stale.revision = 0;
        let mut txn = Transaction::new();
        txn.delete(&stale);
        assert!(txn.apply_to("surface", &mut current).is_err());

        let mut txn = Transaction::new();
        txn.delete(&committed);
        txn.apply_to("surface", &mut current).unwrap();
        assert!(current.is_empty());
    }
}
