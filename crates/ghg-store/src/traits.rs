use ghg_types::{ContentHash, ContentHasher};

use crate::error::StoreResult;

/// Write-once, content-addressed blob store.
///
/// All implementations must satisfy these invariants:
/// - Blobs are immutable once written. The same bytes always produce the
///   same [`ContentHash`] (the [`ContentHasher::BLOB`] domain).
/// - Write-then-link: the blob is durable before its hash is returned.
/// - Concurrent reads are always safe.
/// - The store never interprets blob contents.
/// - All I/O errors are propagated, never silently ignored.
pub trait ContentStore: Send + Sync {
    /// Read a blob by hash.
    ///
    /// Returns `Ok(None)` if the blob does not exist.
    /// Returns `Err` on I/O failure or data corruption.
    fn get(&self, hash: &ContentHash) -> StoreResult<Option<Vec<u8>>>;

    /// Write a blob and return its content hash.
    ///
    /// If the blob already exists, this is a no-op (idempotent).
    fn put(&self, data: &[u8]) -> StoreResult<ContentHash>;

    /// Check whether a blob exists.
    fn exists(&self, hash: &ContentHash) -> StoreResult<bool>;

    /// The hash `put` would assign to `data`, without writing anything.
    fn hash_of(&self, data: &[u8]) -> ContentHash {
        ContentHasher::BLOB.hash(data)
    }
}
