use std::collections::HashMap;
use std::sync::RwLock;

use ghg_types::ContentHash;

use crate::error::StoreResult;
use crate::traits::ContentStore;

/// In-memory, HashMap-based content store.
///
/// Intended for tests and embedding. Blobs are held behind a `RwLock` and
/// cloned on read/write.
pub struct InMemoryContentStore {
    blobs: RwLock<HashMap<ContentHash, Vec<u8>>>,
}

impl InMemoryContentStore {
    /// Create a new empty in-memory store.
    pub fn new() -> Self {
        Self {
            blobs: RwLock::new(HashMap::new()),
        }
    }

    /// Number of blobs currently stored.
    pub fn len(&self) -> usize {
        self.blobs.read().expect("lock poisoned").len()
    }

    /// Returns `true` if the store is empty.
    pub fn is_empty(&self) -> bool {
        self.blobs.read().expect("lock poisoned").is_empty()
    }
}

impl Default for InMemoryContentStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ContentStore for InMemoryContentStore {
    fn get(&self, hash: &ContentHash) -> StoreResult<Option<Vec<u8>>> {
        let map = self.blobs.read().expect("lock poisoned");
        Ok(map.get(hash).cloned())
    }

    fn put(&self, data: &[u8]) -> StoreResult<ContentHash> {
        let id = self.hash_of(data);
        let mut map = self.blobs.write().expect("lock poisoned");
        map.entry(id).or_insert_with(|| data.to_vec());
        Ok(id)
    }

    fn exists(&self, hash: &ContentHash) -> StoreResult<bool> {
        let map = self.blobs.read().expect("lock poisoned");
        Ok(map.contains_key(hash))
    }
}

impl std::fmt::Debug for InMemoryContentStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryContentStore")
            .field("blob_count", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ghg_types::ContentHasher;

    #[test]
    fn put_and_get() {
        let store = InMemoryContentStore::new();
        let id = store.put(b"raw file").unwrap();
        assert_eq!(store.get(&id).unwrap().as_deref(), Some(&b"raw file"[..]));
    }

    #[test]
    fn put_uses_blob_domain() {
        let store = InMemoryContentStore::new();
        let id = store.put(b"abc").unwrap();
        assert_eq!(id, ContentHasher::BLOB.hash(b"abc"));
        assert_eq!(id, store.hash_of(b"abc"));
    }

    #[test]
    fn same_content_is_stored_once() {
        let store = InMemoryContentStore::new();
        let a = store.put(b"identical").unwrap();
        let b = store.put(b"identical").unwrap();
        assert_eq!(a, b);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn exists_after_put() {
        let store = InMemoryContentStore::new();
        let id = store.hash_of(b"source");
        assert!(!store.exists(&id).unwrap());
        store.put(b"source").unwrap();
        assert!(store.exists(&id).unwrap());
        assert!(!store.is_empty());
    }

    #[test]
    fn get_missing_returns_none() {
        let store = InMemoryContentStore::new();
        assert!(store.get(&ContentHash::from_bytes(b"nope")).unwrap().is_none());
    }

    #[test]
    fn debug_format() {
        let store = InMemoryContentStore::new();
        store.put(b"x").unwrap();
        let debug = format!("{store:?}");
        assert!(debug.contains("InMemoryContentStore"));
        assert!(debug.contains("blob_count"));
    }
}
