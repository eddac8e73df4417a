//! File-backed metadata index.
//!
//! Layout under the metadata directory:
//!
//! ```text
//! <kind>.json         every record of the data kind, pretty-printed JSON
//! <kind>.lock         present only while a commit is in progress
//! <kind>.lock.break   present only while a lock file is being removed
//! ```
//!
//! Readers load `<kind>.json` without locking. The file is only ever
//! replaced by an atomic rename, so a reader sees either the state before or
//! after a commit. Writers serialise on the lock, re-read the file, run the
//! optimistic revision check, confirm the lock is still theirs and replace
//! the file.

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use ghg_store::fsutil;
use ghg_types::SeriesId;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{IndexError, IndexResult};
use crate::lock::{FileLock, LockOptions};
use crate::names::validate_data_kind;
use crate::record::MetadataRecord;
use crate::staging::Transaction;
use crate::traits::MetadataIndex;

/// Current on-disk format version.
pub const FORMAT_VERSION: u32 = 1;

#[derive(Serialize, Deserialize)]
struct IndexFile {
    format_version: u32,
    data_kind: String,
    records: BTreeMap<SeriesId, MetadataRecord>,
}

/// A [`MetadataIndex`] persisted as one JSON file per data kind.
#[derive(Debug, Clone)]
pub struct FileIndex {
    data_kind: String,
    path: PathBuf,
    lock_path: PathBuf,
    lock_options: LockOptions,
}

impl FileIndex {
    /// Open the index for `data_kind` inside `dir`. The file is created on
    /// first commit.
    pub fn open(dir: &Path, data_kind: &str, lock_options: LockOptions) -> IndexResult<Self> {
        validate_data_kind(data_kind)?;
        fsutil::ensure_dir(dir)?;
        Ok(Self {
            data_kind: data_kind.to_string(),
            path: dir.join(format!("{data_kind}.json")),
            lock_path: dir.join(format!("{data_kind}.lock")),
            lock_options,
        })
    }

    /// Path of the JSON file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn lock_path(&self) -> &Path {
        &self.lock_path
    }

    fn load(&self) -> IndexResult<BTreeMap<SeriesId, MetadataRecord>> {
        let bytes = match fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(BTreeMap::new()),
            Err(e) => return Err(e.into()),
        };
        let file: IndexFile = serde_json::from_slice(&bytes).map_err(|e| IndexError::Corrupt {
            path: self.path.clone(),
            reason: e.to_string(),
        })?;
        if file.format_version != FORMAT_VERSION {
            return Err(IndexError::Corrupt {
                path: self.path.clone(),
                reason: format!("unsupported format version {}", file.format_version),
            });
        }
        if file.data_kind != self.data_kind {
            return Err(IndexError::Corrupt {
                path: self.path.clone(),
                reason: format!("holds data kind {}, expected {}", file.data_kind, self.data_kind),
            });
        }
        Ok(file.records)
    }

    fn store(&self, records: BTreeMap<SeriesId, MetadataRecord>) -> IndexResult<()> {
        let file = IndexFile {
            format_version: FORMAT_VERSION,
            data_kind: self.data_kind.clone(),
            records,
        };
        let json = serde_json::to_vec_pretty(&file).map_err(|e| IndexError::Serialization(e.to_string()))?;
        fsutil::write_atomic(&self.path, &json)?;
        Ok(())
    }
}

impl MetadataIndex for FileIndex {
    fn data_kind(&self) -> &str {
        &self.data_kind
    }

    fn all(&self) -> IndexResult<Vec<MetadataRecord>> {
        Ok(self.load()?.into_values().collect())
    }

    fn get(&self, series: &SeriesId) -> IndexResult<Option<MetadataRecord>> {
        Ok(self.load()?.remove(series))
    }

    fn commit(&self, transaction: &Transaction) -> IndexResult<Vec<MetadataRecord>> {
        if transaction.is_empty() {
            return Ok(Vec::new());
        }
        let lock = FileLock::acquire(&self.lock_path, &self.lock_options)?;
        let mut records = self.load()?;
        let committed = transaction.apply_to(&self.data_kind, &mut records)?;
        lock.verify()?;
        self.store(records)?;
        info!(
            data_kind = %self.data_kind,
            writes = transaction.len(),
            "metadata committed"
        );
        for record in &committed {
            debug!(series = %record.series_id, revision = record.revision, "record revision");
        }
        Ok(committed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::Filter;
    use crate::record::tests::sample;
    use std::time::Duration;

    fn open(dir: &Path) -> FileIndex {
        FileIndex::open(dir, "surface", LockOptions::default()).unwrap()
    }

    #[test]
    fn missing_file_reads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let index = open(dir.path());
        assert!(index.all().unwrap().is_empty());
        assert!(!index.path().exists());
    }

    #[test]
    fn commit_persists_across_handles() {
        let dir = tempfile::tempdir().unwrap();
        let a = open(dir.path());
        let mut txn = Transaction::new();
        txn.put(sample("mhd", "ch4"));
        let committed = a.commit(&txn).unwrap();

        let b = open(dir.path());
        let read = b.get(&committed[0].series_id).unwrap().unwrap();
        assert_eq!(read.revision, 1);
        assert_eq!(b.lookup(&[Filter::eq("species", "CH4")]).unwrap().len(), 1);
        assert!(!a.lock_path().exists());
    }

    #[test]
    fn concurrent_writer_is_detected() {
        let dir = tempfile::tempdir().unwrap();
        let a = open(dir.path());
        let b = open(dir.path());
        let mut txn = Transaction::new();
        txn.put(sample("mhd", "ch4"));
        let record = a.commit(&txn).unwrap().remove(0);

        // Both writers read revision 1.
        let read_a = a.get(&record.series_id).unwrap().unwrap();
        let read_b = b.get(&record.series_id).unwrap().unwrap();

        let mut txn = Transaction::new();
        txn.put(read_a);
        a.commit(&txn).unwrap();

        let bytes_before = fs::read(b.path()).unwrap();
        let mut txn = Transaction::new();
        txn.put(read_b);
        assert!(matches!(
            b.commit(&txn),
            Err(IndexError::Conflict { expected: 1, found: 2, .. })
        ));
        assert_eq!(fs::read(b.path()).unwrap(), bytes_before);
    }

    #[test]
    fn empty_commit_does_not_touch_disk() {
        let dir = tempfile::tempdir().unwrap();
        let index = open(dir.path());
        index.commit(&Transaction::new()).unwrap();
        assert!(!index.path().exists());
    }

    #[test]
    fn held_lock_times_out_commit() {
        let dir = tempfile::tempdir().unwrap();
        let options = LockOptions {
            timeout: Duration::from_millis(50),
            poll_interval: Duration::from_millis(10),
            stale_after: Duration::from_secs(3600),
        };
        let index = FileIndex::open(dir.path(), "surface", options.clone()).unwrap();
        let _held = FileLock::acquire(index.lock_path(), &options).unwrap();
        let mut txn = Transaction::new();
        txn.put(sample("mhd", "ch4"));
        assert!(matches!(index.commit(&txn), Err(IndexError::LockTimeout { .. })));
    }

    #[test]
    fn corrupt_file_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let index = open(dir.path());
        fs::write(index.path(), b"{ not json").unwrap();
        assert!(matches!(index.all(), Err(IndexError::Corrupt { .. })));
    }

    #[test]
    fn wrong_kind_is_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let surface = open(dir.path());
        let mut txn = Transaction::new();
        txn.put(sample("mhd", "ch4"));
        surface.commit(&txn).unwrap();
        fs::copy(surface.path(), dir.path().join("footprints.json")).unwrap();
        let footprints = FileIndex::open(dir.path(), "footprints", LockOptions::default()).unwrap();
        assert!(matches!(footprints.all(), Err(IndexError::Corrupt { .. })));
    }
}
