//! Foundation types for the GHG series store.
//!
//! This crate provides the identifier, temporal, and value types shared by
//! every other crate in the workspace.
//!
//! # Key Types
//!
//! - [`SeriesId`] -- Stable, never-reused identifier of one logical series (UUID v7)
//! - [`ContentHash`] -- Content-addressed identifier (BLAKE3 hash)
//! - [`ContentHasher`] -- Domain-separated BLAKE3 hasher
//! - [`Interval`] -- Half-open `[start, end)` time range, plus the interval algebra
//! - [`VersionLabel`] -- Version labels `v1`, `v2`, ...
//! - [`MetaValue`] -- Typed metadata/attribute value

pub mod error;
pub mod hash;
pub mod hasher;
pub mod id;
pub mod interval;
pub mod value;
pub mod version;

pub use error::TypeError;
pub use hash::ContentHash;
pub use hasher::ContentHasher;
pub use id::SeriesId;
pub use interval::{Interval, Split, Timestamp};
pub use value::{Attributes, MetaValue};
pub use version::VersionLabel;
