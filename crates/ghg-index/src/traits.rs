//! The metadata index capability trait.

use ghg_types::{ContentHash, SeriesId};

use crate::error::IndexResult;
use crate::filter::{matches_all, matches_none, Filter};
use crate::record::MetadataRecord;
use crate::staging::Transaction;

/// Searchable, durable storage of metadata records for one data kind.
///
/// Reads always observe a committed state. Writes go through
/// [`commit`](MetadataIndex::commit), which either applies a whole
/// [`Transaction`] or none of it.
pub trait MetadataIndex: Send + Sync {
    /// The data kind this index holds.
    fn data_kind(&self) -> &str;

    /// Every committed record.
    fn all(&self) -> IndexResult<Vec<MetadataRecord>>;

    /// Apply a transaction if none of its base revisions moved.
    fn commit(&self, transaction: &Transaction) -> IndexResult<Vec<MetadataRecord>>;

    /// Point lookup by series identifier.
    fn get(&self, series: &SeriesId) -> IndexResult<Option<MetadataRecord>> {
        Ok(self.all()?.into_iter().find(|r| r.series_id == *series))
    }

    /// The record owning a distinguishing-key fingerprint.
    fn find_by_fingerprint(&self, fingerprint: &ContentHash) -> IndexResult<Option<MetadataRecord>> {
        Ok(self
            .all()?
            .into_iter()
            .find(|r| r.fingerprint == *fingerprint))
    }

    /// Records matching every filter.
    fn search(&self, filters: &[Filter]) -> IndexResult<Vec<MetadataRecord>> {
        Ok(self
            .all()?
            .into_iter()
            .filter(|r| matches_all(filters, r))
            .collect())
    }

    /// Identifiers of records matching every filter.
    fn lookup(&self, filters: &[Filter]) -> IndexResult<Vec<SeriesId>> {
        Ok(self.search(filters)?.into_iter().map(|r| r.series_id).collect())
    }

    /// Identifiers of records matching none of the filters. Records lacking
    /// a filtered key are included.
    fn negate(&self, filters: &[Filter]) -> IndexResult<Vec<SeriesId>> {
        Ok(self
            .all()?
            .into_iter()
            .filter(|r| matches_none(filters, r))
            .map(|r| r.series_id)
            .collect())
    }
}
