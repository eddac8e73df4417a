//! Metadata index for the GHG series store.
//!
//! Holds one searchable [`MetadataRecord`] per series, grouped by data kind,
//! and makes writes from several independent processes safe.
//!
//! # Write Path
//!
//! 1. The caller reads records (each carries its committed `revision`).
//! 2. Changes are staged in a [`Transaction`].
//! 3. [`MetadataIndex::commit`] takes the exclusive [`FileLock`], re-reads the
//!    durable state, refuses the transaction with [`IndexError::Conflict`] if
//!    any staged base revision moved, and otherwise replaces the index file
//!    atomically.
//!
//! # Key Types
//!
//! - [`MetadataIndex`] -- Capability trait: search, lookup, negate, commit
//! - [`FileIndex`] -- JSON file per data kind, safe across processes
//! - [`InMemoryIndex`] -- `BTreeMap`-backed, for tests
//! - [`Filter`] -- Equality, any-of, range and presence conditions
//! - [`UndoLog`] -- Caller-held snapshots for undoing metadata edits
//! - [`reconcile()`] -- Attribute/metadata mismatch resolution

pub mod error;
pub mod file;
pub mod filter;
pub mod lock;
pub mod memory;
pub mod multi;
pub mod names;
pub mod reconcile;
pub mod record;
pub mod staging;
pub mod traits;
pub mod undo;

pub use error::{IndexError, IndexResult};
pub use file::FileIndex;
pub use filter::Filter;
pub use lock::{FileLock, LockOptions};
pub use memory::InMemoryIndex;
pub use multi::{lookup_many, negate_many, Hit};
pub use reconcile::{find_conflicts, reconcile, AttrConflict, Reconciled, UpdateMismatch};
pub use record::MetadataRecord;
pub use staging::{StagedWrite, Transaction};
pub use traits::MetadataIndex;
pub use undo::UndoLog;
