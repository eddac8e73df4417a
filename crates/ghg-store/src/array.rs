//! Chunked array payload storage.
//!
//! The [`ArrayStore`] trait is the contract with the bulk-array backend: it
//! accepts `(series, version, interval, payload, hints)`, persists the
//! payload as one or more chunks, and returns [`PayloadRef`]s that can later
//! be read back lazily. Only the chunks whose interval intersects the
//! requested window are loaded.

use std::collections::HashMap;
use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::RwLock;
use std::time::SystemTime;

use chrono::Utc;
use ghg_types::{Interval, SeriesId, Timestamp, VersionLabel};
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::chunk;
use crate::error::{StoreError, StoreResult};
use crate::fsutil;
use crate::payload::{ArrayPayload, ChunkHints, PayloadRef, StoredChunk};

/// Storage backend for chunked series payloads.
pub trait ArrayStore: Send + Sync {
    /// Persist the rows of `payload` that fall inside `interval`.
    ///
    /// The returned references tile `interval` exactly and are only returned
    /// once every chunk is durable. Rewriting a chunk that already exists
    /// refreshes its write time.
    fn write(
        &self,
        series: &SeriesId,
        version: VersionLabel,
        interval: &Interval,
        payload: &ArrayPayload,
        hints: &ChunkHints,
    ) -> StoreResult<Vec<PayloadRef>>;

    /// Read the rows referenced by `refs`, restricted to `window` if given.
    fn read(
        &self,
        series: &SeriesId,
        refs: &[PayloadRef],
        window: Option<&Interval>,
    ) -> StoreResult<ArrayPayload>;

    /// Whether the chunk behind `reference` is present.
    fn exists(&self, series: &SeriesId, reference: &PayloadRef) -> StoreResult<bool>;

    /// Whether the chunk behind `reference` is present and intact.
    fn verify(&self, series: &SeriesId, reference: &PayloadRef) -> StoreResult<bool>;

    /// Every chunk stored for a series, sorted by key.
    fn chunks(&self, series: &SeriesId) -> StoreResult<Vec<StoredChunk>>;

    /// Remove the chunks stored under `keys`. Missing chunks are ignored.
    /// Returns how many were removed.
    fn delete_chunks(&self, series: &SeriesId, keys: &[String]) -> StoreResult<usize>;

    /// Remove every chunk of a series. Returns `true` if anything existed.
    fn delete_series(&self, series: &SeriesId) -> StoreResult<bool>;

    /// Series that currently hold payload data.
    fn series_ids(&self) -> StoreResult<Vec<SeriesId>>;
}

/// Cut `payload` (restricted to `interval`) into row blocks that tile
/// `interval`.
fn plan_chunks(
    interval: &Interval,
    payload: &ArrayPayload,
    hints: &ChunkHints,
) -> StoreResult<Vec<(Interval, ArrayPayload)>> {
    payload.validate()?;
    let rows = payload.slice(interval);
    let max_rows = hints.max_rows.max(1);
    if rows.is_empty() {
        return Ok(vec![(*interval, rows)]);
    }

    let starts: Vec<usize> = (0..rows.len()).step_by(max_rows).collect();
    let mut out = Vec::with_capacity(starts.len());
    for (i, &lo) in starts.iter().enumerate() {
        let hi = starts.get(i + 1).copied().unwrap_or(rows.len());
        let start = if i == 0 {
            interval.start()
        } else {
            rows.times[lo]
        };
        let end = if hi == rows.len() {
            interval.end()
        } else {
            rows.times[hi]
        };
        let span = Interval::new(start, end).map_err(|e| StoreError::InvalidPayload(e.to_string()))?;
        out.push((span, rows.rows(lo, hi)));
    }
    Ok(out)
}

fn chunk_key(version: VersionLabel, hash: &ghg_types::ContentHash) -> String {
    format!("{version}/{}.chunk", hash.to_hex())
}

/// Load, verify and concatenate chunks.
fn assemble<F>(refs: &[PayloadRef], window: Option<&Interval>, mut load: F) -> StoreResult<ArrayPayload>
where
    F: FnMut(&PayloadRef) -> StoreResult<(ArrayPayload, ghg_types::ContentHash)>,
{
    let mut parts = Vec::new();
    for reference in refs {
        if let Some(w) = window {
            if !reference.interval.overlaps(w) {
                continue;
            }
        }
        let (part, hash) = load(reference)?;
        if hash != reference.hash {
            return Err(StoreError::HashMismatch {
                id: reference.hash,
                computed: hash,
            });
        }
        parts.push(part.slice(&reference.interval));
    }
    let joined = ArrayPayload::concat(parts);
    Ok(match window {
        Some(w) => joined.slice(w),
        None => joined,
    })
}

// ---------------------------------------------------------------------------
// In-memory backend
// ---------------------------------------------------------------------------

struct MemChunk {
    bytes: Vec<u8>,
    written_at: Timestamp,
}

/// In-memory array store for tests and embedding.
#[derive(Default)]
pub struct InMemoryArrayStore {
    chunks: RwLock<HashMap<SeriesId, HashMap<String, MemChunk>>>,
}

impl InMemoryArrayStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Total number of chunks held.
    pub fn chunk_count(&self) -> usize {
        self.chunks
            .read()
            .expect("lock poisoned")
            .values()
            .map(HashMap::len)
            .sum()
    }
}

impl ArrayStore for InMemoryArrayStore {
    fn write(
        &self,
        series: &SeriesId,
        version: VersionLabel,
        interval: &Interval,
        payload: &ArrayPayload,
        hints: &ChunkHints,
    ) -> StoreResult<Vec<PayloadRef>> {
        let mut refs = Vec::new();
        let mut map = self.chunks.write().expect("lock poisoned");
        let folder = map.entry(*series).or_default();
        for (span, rows) in plan_chunks(interval, payload, hints)? {
            let encoded = chunk::encode(&rows)?;
            let key = chunk_key(version, &encoded.hash);
            let now = Utc::now();
            folder
                .entry(key.clone())
                .and_modify(|c| c.written_at = now)
                .or_insert(MemChunk {
                    bytes: encoded.bytes,
                    written_at: now,
                });
            refs.push(PayloadRef {
                key,
                hash: encoded.hash,
                interval: span,
                rows: rows.len(),
            });
        }
        Ok(refs)
    }

    fn read(
        &self,
        series: &SeriesId,
        refs: &[PayloadRef],
        window: Option<&Interval>,
    ) -> StoreResult<ArrayPayload> {
        let map = self.chunks.read().expect("lock poisoned");
        assemble(refs, window, |reference| {
            let stored = map
                .get(series)
                .and_then(|f| f.get(&reference.key))
                .ok_or_else(|| StoreError::MissingChunk {
                    series: *series,
                    key: reference.key.clone(),
                })?;
            chunk::decode(&stored.bytes, Path::new(&reference.key))
        })
    }

    fn exists(&self, series: &SeriesId, reference: &PayloadRef) -> StoreResult<bool> {
        let map = self.chunks.read().expect("lock poisoned");
        Ok(map
            .get(series)
            .is_some_and(|f| f.contains_key(&reference.key)))
    }

    fn verify(&self, series: &SeriesId, reference: &PayloadRef) -> StoreResult<bool> {
        let map = self.chunks.read().expect("lock poisoned");
        let Some(stored) = map.get(series).and_then(|f| f.get(&reference.key)) else {
            return Ok(false);
        };
        Ok(chunk::decode(&stored.bytes, Path::new(&reference.key))
            .is_ok_and(|(_, hash)| hash == reference.hash))
    }

    fn chunks(&self, series: &SeriesId) -> StoreResult<Vec<StoredChunk>> {
        let map = self.chunks.read().expect("lock poisoned");
        let mut chunks: Vec<StoredChunk> = map
            .get(series)
            .map(|folder| {
                folder
                    .iter()
                    .map(|(key, c)| StoredChunk {
                        key: key.clone(),
                        written_at: c.written_at,
                    })
                    .collect()
            })
            .unwrap_or_default();
        chunks.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(chunks)
    }

    fn delete_chunks(&self, series: &SeriesId, keys: &[String]) -> StoreResult<usize> {
        let mut map = self.chunks.write().expect("lock poisoned");
        let Some(folder) = map.get_mut(series) else {
            return Ok(0);
        };
        Ok(keys.iter().filter(|k| folder.remove(*k).is_some()).count())
    }

    fn delete_series(&self, series: &SeriesId) -> StoreResult<bool> {
        let mut map = self.chunks.write().expect("lock poisoned");
        Ok(map.remove(series).is_some())
    }

    fn series_ids(&self) -> StoreResult<Vec<SeriesId>> {
        let map = self.chunks.read().expect("lock poisoned");
        let mut ids: Vec<SeriesId> = map.keys().copied().collect();
        ids.sort();
        Ok(ids)
    }
}

impl std::fmt::Debug for InMemoryArrayStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryArrayStore")
            .field("chunk_count", &self.chunk_count())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Filesystem backend
// ---------------------------------------------------------------------------

/// On-disk array store: `<root>/<series_id>/<version>/<hash>.chunk`.
#[derive(Debug, Clone)]
pub struct FsArrayStore {
    root: PathBuf,
}

impl FsArrayStore {
    /// Open (creating if needed) an array store rooted at `root`.
    pub fn open(root: impl Into<PathBuf>) -> StoreResult<Self> {
        let root = root.into();
        fsutil::ensure_dir(&root)?;
        Ok(Self { root })
    }

    /// Root directory holding one folder per series.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Folder holding the chunks of one series.
    pub fn series_dir(&self, series: &SeriesId) -> PathBuf {
        self.root.join(series.to_string())
    }

    fn chunk_path(&self, series: &SeriesId, key: &str) -> PathBuf {
        self.series_dir(series).join(key)
    }

    fn load(
        &self,
        series: &SeriesId,
        reference: &PayloadRef,
    ) -> StoreResult<(ArrayPayload, ghg_types::ContentHash)> {
        let path = self.chunk_path(series, &reference.key);
        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(StoreError::MissingChunk {
                    series: *series,
                    key: reference.key.clone(),
                })
            }
            Err(e) => return Err(e.into()),
        };
        chunk::decode(&bytes, &path)
    }
}

impl ArrayStore for FsArrayStore {
    fn write(
        &self,
        series: &SeriesId,
        version: VersionLabel,
        interval: &Interval,
        payload: &ArrayPayload,
        hints: &ChunkHints,
    ) -> StoreResult<Vec<PayloadRef>> {
        let mut refs = Vec::new();
        for (span, rows) in plan_chunks(interval, payload, hints)? {
            let encoded = chunk::encode(&rows)?;
            let key = chunk_key(version, &encoded.hash);
            let path = self.series_dir(series).join(&key);
            if path.is_file() {
                File::options()
                    .write(true)
                    .open(&path)?
                    .set_modified(SystemTime::now())?;
            } else {
                fsutil::write_atomic(&path, &encoded.bytes)?;
            }
            refs.push(PayloadRef {
                key,
                hash: encoded.hash,
                interval: span,
                rows: rows.len(),
            });
        }
        debug!(
            series = %series,
            version = %version,
            interval = %interval,
            chunks = refs.len(),
            "payload written"
        );
        Ok(refs)
    }

    fn read(
        &self,
        series: &SeriesId,
        refs: &[PayloadRef],
        window: Option<&Interval>,
    ) -> StoreResult<ArrayPayload> {
        assemble(refs, window, |reference| self.load(series, reference))
    }

    fn exists(&self, series: &SeriesId, reference: &PayloadRef) -> StoreResult<bool> {
        Ok(self.chunk_path(series, &reference.key).is_file())
    }

    fn verify(&self, series: &SeriesId, reference: &PayloadRef) -> StoreResult<bool> {
        match self.load(series, reference) {
            Ok((_, hash)) => Ok(hash == reference.hash),
            Err(StoreError::MissingChunk { .. } | StoreError::CorruptChunk { .. }) => Ok(false),
            Err(e) => Err(e),
        }
    }

    fn chunks(&self, series: &SeriesId) -> StoreResult<Vec<StoredChunk>> {
        let dir = self.series_dir(series);
        if !dir.is_dir() {
            return Ok(Vec::new());
        }
        let mut chunks = Vec::new();
        for entry in WalkDir::new(&dir).min_depth(2).max_depth(2) {
            let entry = entry.map_err(io::Error::from)?;
            if !entry.file_type().is_file() {
                continue;
            }
            let Ok(relative) = entry.path().strip_prefix(&dir) else {
                continue;
            };
            // Chunk keys always use '/' whatever the platform separator.
            let key = relative
                .components()
                .map(|c| c.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join("/");
            if !key.ends_with(".chunk") {
                continue;
            }
            let modified = entry.metadata().map_err(io::Error::from)?.modified()?;
            chunks.push(StoredChunk {
                key,
                written_at: modified.into(),
            });
        }
        chunks.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(chunks)
    }

    fn delete_chunks(&self, series: &SeriesId, keys: &[String]) -> StoreResult<usize> {
        let mut removed = 0;
        for key in keys {
            match fs::remove_file(self.chunk_path(series, key)) {
                Ok(()) => removed += 1,
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(removed)
    }

    fn delete_series(&self, series: &SeriesId) -> StoreResult<bool> {
        match fs::remove_dir_all(self.series_dir(series)) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    fn series_ids(&self) -> StoreResult<Vec<SeriesId>> {
        let mut ids = Vec::new();
        for entry in fs::read_dir(&self.root)? {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            let name = entry.file_name();
            match SeriesId::parse(&name.to_string_lossy()) {
                Ok(id) => ids.push(id),
                Err(_) => warn!(dir = ?name, "ignoring non-series folder in data directory"),
            }
        }
        ids.sort();
        Ok(ids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};
    use ghg_types::Timestamp;
    use std::collections::BTreeMap;

    fn daily(start: Timestamp, n: usize) -> ArrayPayload {
        let times: Vec<Timestamp> = (0..n).map(|i| start + Duration::days(i as i64)).collect();
        let values = (0..n).map(|i| 400.0 + i as f64).collect();
        ArrayPayload::from_parts(times, BTreeMap::new()).with_variable("co2", values)
    }

    fn year(y: i32) -> Interval {
        Interval::new(
            Utc.with_ymd_and_hms(y, 1, 1, 0, 0, 0).unwrap(),
            Utc.with_ymd_and_hms(y + 1, 1, 1, 0, 0, 0).unwrap(),
        )
        .unwrap()
    }

    fn stores() -> (tempfile::TempDir, Vec<Box<dyn ArrayStore>>) {
        let dir = tempfile::tempdir().unwrap();
        let fs_store = FsArrayStore::open(dir.path().join("data")).unwrap();
        (
            dir,
            vec![Box::new(InMemoryArrayStore::new()), Box::new(fs_store)],
        )
    }

    #[test]
    fn refs_tile_the_written_interval() {
        let (_dir, backends) = stores();
        let interval = year(2010);
        let payload = daily(interval.start(), 365);
        for store in backends {
            let refs = store
                .write(
                    &SeriesId::new(),
                    VersionLabel::first(),
                    &interval,
                    &payload,
                    &ChunkHints { max_rows: 100 },
                )
                .unwrap();
            assert_eq!(refs.len(), 4);
            assert_eq!(refs[0].interval.start(), interval.start());
            assert_eq!(refs[3].interval.end(), interval.end());
            assert!(refs.windows(2).all(|w| w[0].interval.end() == w[1].interval.start()));
            assert_eq!(refs.iter().map(|r| r.rows).sum::<usize>(), 365);
        }
    }

    #[test]
    fn read_back_whole_and_windowed() {
        let (_dir, backends) = stores();
        let interval = year(2010);
        let payload = daily(interval.start(), 365);
        let series = SeriesId::new();
        for store in backends {
            let refs = store
                .write(&series, VersionLabel::first(), &interval, &payload, &ChunkHints { max_rows: 50 })
                .unwrap();
            assert_eq!(store.read(&series, &refs, None).unwrap(), payload);

            let march = Interval::new(
                Utc.with_ymd_and_hms(2010, 3, 1, 0, 0, 0).unwrap(),
                Utc.with_ymd_and_hms(2010, 4, 1, 0, 0, 0).unwrap(),
            )
            .unwrap();
            let part = store.read(&series, &refs, Some(&march)).unwrap();
            assert_eq!(part.len(), 31);
            assert_eq!(part.times[0], march.start());
        }
    }

    #[test]
    fn rows_outside_interval_are_not_stored() {
        let store = InMemoryArrayStore::new();
        let series = SeriesId::new();
        let payload = daily(Utc.with_ymd_and_hms(2009, 12, 1, 0, 0, 0).unwrap(), 62);
        let refs = store
            .write(&series, VersionLabel::first(), &year(2010), &payload, &ChunkHints::default())
            .unwrap();
        let back = store.read(&series, &refs, None).unwrap();
        assert_eq!(back.len(), 31);
    }

    #[test]
    fn missing_chunk_is_reported() {
        let (_dir, backends) = stores();
        let interval = year(2011);
        let payload = daily(interval.start(), 10);
        let series = SeriesId::new();
        for store in backends {
            let refs = store
                .write(&series, VersionLabel::first(), &interval, &payload, &ChunkHints::default())
                .unwrap();
            assert!(store.verify(&series, &refs[0]).unwrap());
            let stored = store.chunks(&series).unwrap();
            assert_eq!(stored.len(), 1);
            assert_eq!(stored[0].key, refs[0].key);
            assert_eq!(store.delete_chunks(&series, &[refs[0].key.clone()]).unwrap(), 1);
            assert!(store.chunks(&series).unwrap().is_empty());
            assert!(!store.exists(&series, &refs[0]).unwrap());
            assert!(!store.verify(&series, &refs[0]).unwrap());
            assert!(matches!(
                store.read(&series, &refs, None),
                Err(StoreError::MissingChunk { .. })
            ));
        }
    }

    #[test]
    fn rewriting_a_chunk_refreshes_its_write_time() {
        let (_dir, backends) = stores();
        let interval = year(2014);
        let payload = daily(interval.start(), 5);
        let series = SeriesId::new();
        for store in backends {
            store
                .write(&series, VersionLabel::first(), &interval, &payload, &ChunkHints::default())
                .unwrap();
            let first = store.chunks(&series).unwrap()[0].written_at;
            std::thread::sleep(std::time::Duration::from_millis(20));
            store
                .write(&series, VersionLabel::first(), &interval, &payload, &ChunkHints::default())
                .unwrap();
            let again = store.chunks(&series).unwrap();
            assert_eq!(again.len(), 1);
            assert!(again[0].written_at > first);
        }
    }

    #[test]
    fn delete_series_removes_folder() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsArrayStore::open(dir.path()).unwrap();
        let series = SeriesId::new();
        let interval = year(2012);
        store
            .write(&series, VersionLabel::first(), &interval, &daily(interval.start(), 3), &ChunkHints::default())
            .unwrap();
        assert_eq!(store.series_ids().unwrap(), vec![series]);
        assert!(store.delete_series(&series).unwrap());
        assert!(!store.series_dir(&series).exists());
        assert!(!store.delete_series(&series).unwrap());
        assert!(store.series_ids().unwrap().is_empty());
    }

    #[test]
    fn empty_interval_payload_still_gets_a_ref() {
        let store = InMemoryArrayStore::new();
        let refs = store
            .write(&SeriesId::new(), VersionLabel::first(), &year(2013), &ArrayPayload::new(), &ChunkHints::default())
            .unwrap();
        assert_eq!(refs.len(), 1);
        assert_eq!(refs[0].rows, 0);
        assert_eq!(refs[0].interval, year(2013));
    }
}
