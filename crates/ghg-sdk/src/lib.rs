//! Store orchestrator for the GHG series store.
//!
//! [`DataStore`] is the entry point: it derives distinguishing keys from a
//! [`Dataset`] using the data kind's [`KeySchema`], resolves or creates the
//! series, runs the add-data decision procedure, writes payload chunks and
//! commits the metadata record under the optimistic revision check.
//!
//! ```no_run
//! use ghg_sdk::{DataStore, Dataset, IngestOptions, StoreConfig};
//! # fn demo(dataset: Dataset) -> ghg_sdk::SdkResult<()> {
//! let store = DataStore::init(std::path::Path::new("/data/ghg"), &StoreConfig::default())?;
//! let outcome = store.ingest("surface", &dataset, &IngestOptions::default())?;
//! println!("{} {}", outcome.series_id, outcome.version);
//! # Ok(())
//! # }
//! ```

pub mod check;
pub mod config;
pub mod dataset;
pub mod error;
pub mod schema;
pub mod store;

pub use check::{ConsistencyReport, Issue, PruneSummary};
pub use config::{StoreConfig, STORE_CONFIG_FILE};
pub use dataset::{Dataset, IngestAction, IngestOptions, IngestOutcome, IngestReport, SourceBytes};
pub use error::{SdkError, SdkResult};
pub use schema::{DerivedKeys, KeySchema, KeyType};
pub use store::{search_many, DataStore, DeleteConfirmation, StoreHit};

// Re-export the types callers need to build requests and read results.
pub use ghg_index::{Filter, MetadataRecord, UndoLog, UpdateMismatch};
pub use ghg_series::{ConflictPolicy, RetainCurrent};
pub use ghg_store::ArrayPayload;
pub use ghg_types::{Attributes, Interval, MetaValue, SeriesId, VersionLabel};
