//! Versioned series for the GHG series store.
//!
//! A series is one logical, evolving measurement time series, identified by
//! its distinguishing keys. This crate holds the per-series state machine:
//! which versions exist, which intervals each version covers, and which
//! payload chunks back each interval.
//!
//! # Architecture
//!
//! - **Versions** are labelled `v1`, `v2`, ... and strictly ordered. Exactly
//!   one is latest. Older versions stay addressable.
//! - **Entries** pair an interval with the payload references that back it.
//!   Entries of one version never overlap.
//! - **Adding data** is split in two: [`plan_add`] is pure and decides between
//!   append, new version or in-place replacement (or rejects the request);
//!   [`apply_plan`] turns a plan plus freshly written payload references into
//!   the next record. Callers can therefore reject before writing any bytes.
//!
//! # Modules
//!
//! - [`error`] -- Error types for series operations
//! - [`types`] -- [`SeriesRecord`], [`Version`], [`VersionEntry`]
//! - [`policy`] -- [`ConflictPolicy`] and [`RetainCurrent`]
//! - [`add`] -- The add-data decision procedure

pub mod add;
pub mod error;
pub mod policy;
pub mod types;

pub use add::{apply_plan, plan_add, AddDataAction, AddDataPlan, AddDataRequest, Applied, SourceFile};
pub use error::{SeriesError, SeriesResult};
pub use policy::{ConflictPolicy, Retention, RetainCurrent};
pub use types::{SeriesRecord, Version, VersionEntry};
