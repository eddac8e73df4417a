//! On-disk content store.
//!
//! Layout: `<root>/<first 2 hex>/<remaining 62 hex>`, each file holding the
//! zstd-compressed blob. Blobs are written atomically (temp file, fsync,
//! rename), so two processes storing the same content race harmlessly.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use ghg_types::ContentHash;
use tracing::debug;

use crate::error::{StoreError, StoreResult};
use crate::fsutil;
use crate::traits::ContentStore;

/// Default zstd compression level for cached blobs.
pub const DEFAULT_COMPRESSION_LEVEL: i32 = 3;

/// Filesystem-backed content store.
#[derive(Debug, Clone)]
pub struct FsContentStore {
    root: PathBuf,
    level: i32,
}

impl FsContentStore {
    /// Open (creating if needed) a content store rooted at `root`.
    pub fn open(root: impl Into<PathBuf>) -> StoreResult<Self> {
        Self::with_level(root, DEFAULT_COMPRESSION_LEVEL)
    }

    /// Open with an explicit zstd compression level.
    pub fn with_level(root: impl Into<PathBuf>, level: i32) -> StoreResult<Self> {
        let root = root.into();
        fsutil::ensure_dir(&root)?;
        Ok(Self { root, level })
    }

    /// Root directory of the store.
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn object_path(&self, hash: &ContentHash) -> PathBuf {
        let hex = hash.to_hex();
        self.root.join(&hex[..2]).join(&hex[2..])
    }
}

impl ContentStore for FsContentStore {
    fn get(&self, hash: &ContentHash) -> StoreResult<Option<Vec<u8>>> {
        let path = self.object_path(hash);
        let compressed = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let data = zstd::decode_all(compressed.as_slice())?;
        let computed = self.hash_of(&data);
        if computed != *hash {
            return Err(StoreError::HashMismatch {
                id: *hash,
                computed,
            });
        }
        Ok(Some(data))
    }

    fn put(&self, data: &[u8]) -> StoreResult<ContentHash> {
        let id = self.hash_of(data);
        let path = self.object_path(&id);
        if path.exists() {
            debug!(hash = %id.short_hex(), "blob already stored");
            return Ok(id);
        }
        let compressed = zstd::encode_all(data, self.level)?;
        fsutil::write_atomic(&path, &compressed)?;
        debug!(hash = %id.short_hex(), bytes = data.len(), "blob stored");
        Ok(id)
    }

    fn exists(&self, hash: &ContentHash) -> StoreResult<bool> {
        Ok(self.object_path(hash).is_file())
    }
}
