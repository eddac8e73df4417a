//! Content-addressed storage for the GHG series store.
//!
//! Two write-once storage areas live here:
//!
//! - the **content store**, a hash-keyed blob area analogous to git's
//!   `.git/objects/`, used to cache original uploaded source files. Every
//!   blob is identified by its domain-separated BLAKE3 hash, which is also the
//!   hash used for duplicate-input detection.
//! - the **array store**, the chunked payload backend that persists the
//!   numeric arrays of each series under `data/<series_id>/` and hands back
//!   opaque [`PayloadRef`]s for later lazy re-reads.
//!
//! # Storage Backends
//!
//! - [`InMemoryContentStore`] / [`InMemoryArrayStore`] -- `HashMap`-based, for
//!   tests and embedding
//! - [`FsContentStore`] / [`FsArrayStore`] -- on-disk, safe for several
//!   processes writing the same store root
//!
//! # Design Rules
//!
//! 1. Objects are immutable once written (content-addressing guarantees this).
//! 2. Write-then-link: bytes are written and fsynced before an identifier is
//!    returned, so callers never record a reference to unpersisted data.
//! 3. Concurrent reads are always safe (objects are immutable).
//! 4. Orphaned objects are harmless; they are never partially visible.
//! 5. All I/O errors are propagated, never silently ignored.

pub mod array;
pub mod chunk;
pub mod error;
pub mod fs;
pub mod fsutil;
pub mod memory;
pub mod payload;
pub mod traits;

// Re-export primary types at crate root for ergonomic imports.
pub use array::{ArrayStore, FsArrayStore, InMemoryArrayStore};
pub use error::{StoreError, StoreResult};
pub use fs::FsContentStore;
pub use memory::InMemoryContentStore;
pub use payload::{ArrayPayload, ChunkHints, PayloadRef, StoredChunk};
pub use traits::ContentStore;
