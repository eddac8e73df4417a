//! The store orchestrator.
//!
//! [`DataStore`] ties the key schemas, the metadata indexes, the array store
//! and the source-file cache together. On disk a store looks like:
//!
//! ```text
//! <root>/store.toml          StoreConfig
//! <root>/config/<kind>.toml  KeySchema per data kind
//! <root>/metadata/<kind>.json
//! <root>/data/<series_id>/   payload chunks
//! <root>/objects/            cached original source files
//! ```
//!
//! Every ingest runs `RECEIVE -> DERIVE_KEYS -> RESOLVE_SERIES -> ADD_DATA ->
//! PERSIST` and ends in `DONE` or `REJECTED`. Payload chunks and source bytes
//! are durable before the metadata commit that references them.

use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::Utc;
use ghg_index::names::{normalize_key, validate_data_kind};
use ghg_index::record::{
    DATA_KIND_KEY, END_DATE_KEY, LATEST_VERSION_KEY, SERIES_ID_KEY, START_DATE_KEY,
};
use ghg_index::{
    lookup_many, negate_many, reconcile, FileIndex, Filter, InMemoryIndex, IndexError,
    MetadataIndex, MetadataRecord, Transaction, UndoLog, UpdateMismatch,
};
use ghg_series::{
    apply_plan, plan_add, AddDataAction, AddDataRequest, SeriesError, SeriesRecord, SourceFile,
    VersionEntry,
};
use ghg_store::{
    ArrayPayload, ArrayStore, ContentStore, FsArrayStore, FsContentStore, InMemoryArrayStore,
    InMemoryContentStore,
};
use ghg_store::fsutil;
use ghg_types::{Attributes, ContentHasher, Interval, SeriesId, VersionLabel};
use tracing::{debug, info, warn};

use crate::check::{self, ConsistencyReport, PruneSummary};
use crate::config::{StoreConfig, STORE_CONFIG_FILE};
use crate::dataset::{Dataset, IngestAction, IngestOptions, IngestOutcome, IngestReport};
use crate::error::{SdkError, SdkResult};
use crate::schema::{DerivedKeys, KeySchema};

/// Schema directory inside the store root.
pub const CONFIG_DIR: &str = "config";
/// Payload chunk directory inside the store root.
pub const DATA_DIR: &str = "data";
/// Metadata index directory inside the store root.
pub const METADATA_DIR: &str = "metadata";
/// Source-file cache directory inside the store root.
pub const OBJECTS_DIR: &str = "objects";

/// Keys derived from the series state; never user-editable.
const DERIVED_KEYS: &[&str] = &[
    SERIES_ID_KEY,
    DATA_KIND_KEY,
    START_DATE_KEY,
    END_DATE_KEY,
    LATEST_VERSION_KEY,
];

/// Where a store keeps its state. Chosen at construction.
#[derive(Clone, Debug)]
enum Backend {
    Disk { root: PathBuf },
    Memory,
}

/// Explicit go-ahead for [`DataStore::delete_series`]. Must name the series
/// being deleted.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DeleteConfirmation {
    pub series: SeriesId,
}

impl DeleteConfirmation {
    pub fn new(series: SeriesId) -> Self {
        Self { series }
    }
}

/// A hit from [`search_many`], tagged with the position of its store.
#[derive(Clone, Debug)]
pub struct StoreHit {
    pub store: usize,
    pub record: MetadataRecord,
}

#[derive(Clone, Copy, Debug)]
enum Stage {
    Receive,
    DeriveKeys,
    ResolveSeries,
    AddData,
    Persist,
    Done,
    Rejected,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Receive => "RECEIVE",
            Self::DeriveKeys => "DERIVE_KEYS",
            Self::ResolveSeries => "RESOLVE_SERIES",
            Self::AddData => "ADD_DATA",
            Self::Persist => "PERSIST",
            Self::Done => "DONE",
            Self::Rejected => "REJECTED",
        })
    }
}

/// Outcome of one optimistic commit attempt.
enum Attempt<T> {
    Done(T),
    Conflict(IndexError),
}

/// Handle on one store.
pub struct DataStore {
    backend: Backend,
    config: StoreConfig,
    arrays: Box<dyn ArrayStore>,
    sources: Box<dyn ContentStore>,
    schemas: BTreeMap<String, KeySchema>,
    indexes: BTreeMap<String, Box<dyn MetadataIndex>>,
}

impl DataStore {
    // ---- Construction ----

    /// Create the store layout at `root` and open it.
    ///
    /// Existing files are left alone, so running `init` on an initialised
    /// store only fills in what is missing.
    pub fn init(root: &Path, config: &StoreConfig) -> SdkResult<Self> {
        config.validate()?;
        for dir in [CONFIG_DIR, DATA_DIR, METADATA_DIR, OBJECTS_DIR] {
            fsutil::ensure_dir(&root.join(dir))?;
        }
        if !root.join(STORE_CONFIG_FILE).is_file() {
            config.save(root)?;
        }
        for (kind, schema) in [
            ("surface", KeySchema::surface()),
            ("footprints", KeySchema::footprints()),
        ] {
            let path = schema_path(root, kind);
            if !path.is_file() {
                schema.save(&path)?;
            }
        }
        info!(root = %root.display(), "store initialized");
        Self::open(root)
    }

    /// Open an initialised store.
    pub fn open(root: &Path) -> SdkResult<Self> {
        let config = StoreConfig::load(root)?;
        let arrays = FsArrayStore::open(root.join(DATA_DIR))?;
        let sources = FsContentStore::with_level(root.join(OBJECTS_DIR), config.compression_level)?;
        let mut store = Self {
            backend: Backend::Disk {
                root: root.to_path_buf(),
            },
            config,
            arrays: Box::new(arrays),
            sources: Box::new(sources),
            schemas: BTreeMap::new(),
            indexes: BTreeMap::new(),
        };

        let mut found = Vec::new();
        for entry in fs::read_dir(root.join(CONFIG_DIR))? {
            let path = entry?.path();
            if path.extension().is_some_and(|ext| ext == "toml") {
                if let Some(kind) = path.file_stem().and_then(|s| s.to_str()) {
                    found.push((kind.to_string(), path.clone()));
                }
            }
        }
        for (kind, path) in found {
            let schema = KeySchema::load(&path)?;
            store.attach(&kind, schema)?;
        }
        debug!(root = %root.display(), data_kinds = store.schemas.len(), "store opened");
        Ok(store)
    }

    /// A store held entirely in memory, with the default schemas.
    pub fn in_memory(config: StoreConfig) -> SdkResult<Self> {
        config.validate()?;
        let mut store = Self {
            backend: Backend::Memory,
            config,
            arrays: Box::new(InMemoryArrayStore::new()),
            sources: Box::new(InMemoryContentStore::new()),
            schemas: BTreeMap::new(),
            indexes: BTreeMap::new(),
        };
        store.attach("surface", KeySchema::surface())?;
        store.attach("footprints", KeySchema::footprints())?;
        Ok(store)
    }

    /// Add or replace the schema of a data kind.
    pub fn register_schema(&mut self, data_kind: &str, schema: KeySchema) -> SdkResult<()> {
        validate_data_kind(data_kind)?;
        if let Backend::Disk { root } = &self.backend {
            schema.save(&schema_path(root, data_kind))?;
        }
        info!(data_kind, "schema registered");
        self.attach(data_kind, schema)
    }

    fn attach(&mut self, data_kind: &str, schema: KeySchema) -> SdkResult<()> {
        let index: Box<dyn MetadataIndex> = match &self.backend {
            Backend::Disk { root } => Box::new(FileIndex::open(
                &root.join(METADATA_DIR),
                data_kind,
                self.config.lock_options(),
            )?),
            Backend::Memory => Box::new(InMemoryIndex::new(data_kind)?),
        };
        self.schemas.insert(data_kind.to_string(), schema);
        self.indexes.entry(data_kind.to_string()).or_insert(index);
        Ok(())
    }

    // ---- Accessors ----

    pub fn root(&self) -> Option<&Path> {
        match &self.backend {
            Backend::Disk { root } => Some(root),
            Backend::Memory => None,
        }
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    pub fn data_kinds(&self) -> Vec<&str> {
        self.schemas.keys().map(String::as_str).collect()
    }

    pub fn schema(&self, data_kind: &str) -> SdkResult<&KeySchema> {
        self.schemas
            .get(data_kind)
            .ok_or_else(|| SdkError::UnknownDataKind(data_kind.to_string()))
    }

    fn index(&self, data_kind: &str) -> SdkResult<&dyn MetadataIndex> {
        self.indexes
            .get(data_kind)
            .map(|index| index.as_ref())
            .ok_or_else(|| SdkError::UnknownDataKind(data_kind.to_string()))
    }

    fn selected(&self, data_kind: Option<&str>) -> SdkResult<Vec<&dyn MetadataIndex>> {
        match data_kind {
            Some(kind) => Ok(vec![self.index(kind)?]),
            None => Ok(self.indexes.values().map(|index| index.as_ref()).collect()),
        }
    }

    // ---- Ingest ----

    /// Ingest one dataset into `data_kind`.
    pub fn ingest(
        &self,
        data_kind: &str,
        dataset: &Dataset,
        options: &IngestOptions,
    ) -> SdkResult<IngestOutcome> {
        let result = self.run_ingest(data_kind, dataset, options);
        match &result {
            Ok(outcome) => info!(
                stage = %Stage::Done,
                data_kind,
                series = %outcome.series_id,
                version = %outcome.version,
                action = ?outcome.action,
                revision = outcome.revision,
                "ingest finished"
            ),
            Err(e) => warn!(stage = %Stage::Rejected, data_kind, error = %e, "ingest rejected"),
        }
        result
    }

    /// Ingest several datasets. Non-fatal rejections are collected and the
    /// batch continues; a fatal error stops it.
    pub fn ingest_batch(
        &self,
        data_kind: &str,
        datasets: &[Dataset],
        options: &IngestOptions,
    ) -> SdkResult<IngestReport> {
        let mut report = IngestReport::default();
        for dataset in datasets {
            match self.ingest(data_kind, dataset, options) {
                Ok(outcome) => report.outcomes.push(outcome),
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => report.skipped.push(e),
            }
        }
        Ok(report)
    }

    fn run_ingest(
        &self,
        data_kind: &str,
        dataset: &Dataset,
        options: &IngestOptions,
    ) -> SdkResult<IngestOutcome> {
        debug!(stage = %Stage::Receive, data_kind, rows = dataset.payload.len(), "ingest received");
        dataset.validate()?;
        let schema = self.schema(data_kind)?;
        let index = self.index(data_kind)?;

        debug!(stage = %Stage::DeriveKeys, data_kind);
        let keys = schema.derive(data_kind, &dataset.metadata)?;
        let attributes = normalize_attributes(schema, &dataset.attributes);
        let source = dataset.source.as_ref().map(|s| SourceFile {
            hash: ContentHasher::BLOB.hash(&s.bytes),
            name: s.name.clone(),
        });
        let mut request = AddDataRequest::new(dataset.intervals.clone())
            .with_policy(options.conflict_policy, options.retain_current)
            .forced(options.force);
        request.source = source;

        self.with_retries("ingest", || {
            debug!(stage = %Stage::ResolveSeries, data_kind, fingerprint = %keys.fingerprint.short_hex());
            let now = Utc::now();
            let (base, created) = match index.find_by_fingerprint(&keys.fingerprint)? {
                Some(record) => (record, false),
                None => {
                    let series = SeriesRecord::new(
                        SeriesId::new(),
                        data_kind,
                        keys.distinguishing.clone(),
                        keys.fingerprint,
                        keys.informational.clone(),
                        now,
                    );
                    (MetadataRecord::project(series), true)
                }
            };
            let series_id = base.series_id;
            let mut series = base.series.clone();
            series
                .descriptive_metadata
                .extend(keys.informational.clone());
            let attributes = reconcile_attributes(&mut series, &attributes, options.update_mismatch)?;

            debug!(stage = %Stage::AddData, series = %series_id, created);
            let plan = plan_add(&series, &request).map_err(|e| with_keys(e, &keys))?;
            let mut written = Vec::with_capacity(plan.candidates.len());
            for interval in &plan.candidates {
                let refs = self.arrays.write(
                    &series_id,
                    plan.target_version,
                    interval,
                    &dataset.payload,
                    &self.config.chunk_hints(),
                )?;
                written.push(VersionEntry::new(*interval, refs).with_attributes(attributes.clone()));
            }
            if let Some(bytes) = &dataset.source {
                self.sources.put(&bytes.bytes)?;
            }
            let applied = apply_plan(&series, &plan, written, now).map_err(|e| with_keys(e, &keys))?;

            debug!(stage = %Stage::Persist, series = %series_id, base_revision = base.revision);
            let staged = base.updated(applied.record);
            let mut txn = Transaction::new();
            txn.put(staged);
            let committed = match commit(index, &txn)? {
                Attempt::Done(committed) => committed,
                Attempt::Conflict(e) => return Ok(Attempt::Conflict(e)),
            };
            let revision = committed.first().map_or(base.revision + 1, |r| r.revision);

            let (action, superseded) = match (&plan.action, created) {
                (_, true) => (IngestAction::Created, Vec::new()),
                (AddDataAction::Append, false) => (IngestAction::Appended, Vec::new()),
                (AddDataAction::NewVersion { superseded }, false) => {
                    (IngestAction::NewVersion, superseded.clone())
                }
                (AddDataAction::ReplaceInPlace { superseded }, false) => {
                    (IngestAction::ReplacedInPlace, superseded.clone())
                }
            };
            Ok(Attempt::Done(IngestOutcome {
                series_id,
                data_kind: data_kind.to_string(),
                version: plan.target_version,
                action,
                revision,
                superseded,
                released_chunks: applied.released.len(),
                attributes,
            }))
        })
    }

    // ---- Reads ----

    /// Current metadata record of a series.
    pub fn info(&self, data_kind: &str, series: &SeriesId) -> SdkResult<MetadataRecord> {
        self.index(data_kind)?
            .get(series)?
            .ok_or(SdkError::SeriesNotFound(*series))
    }

    /// Read payload rows of a series. `version` defaults to the latest;
    /// `window` restricts the rows returned. The payload carries the
    /// attributes stored with the entries it was read from.
    pub fn retrieve(
        &self,
        data_kind: &str,
        series: &SeriesId,
        version: Option<VersionLabel>,
        window: Option<&Interval>,
    ) -> SdkResult<ArrayPayload> {
        let record = self.info(data_kind, series)?;
        let label = version.unwrap_or(record.latest_version);
        let version = record.series.version(label)?;
        let entries: Vec<&VersionEntry> = match window {
            Some(w) => version.entries_in(w).collect(),
            None => version.entries.iter().collect(),
        };
        let mut parts = Vec::with_capacity(entries.len());
        for entry in entries {
            let span = match window {
                Some(w) => entry.interval.intersection(w).unwrap_or(entry.interval),
                None => entry.interval,
            };
            let mut part = self.arrays.read(series, &entry.refs, Some(&span))?;
            part.attributes = entry.attributes.clone();
            parts.push(part);
        }
        debug!(series = %series, version = %label, parts = parts.len(), "payload retrieved");
        Ok(ArrayPayload::concat(parts))
    }

    /// Cached original source file, if it was stored.
    pub fn source_bytes(&self, hash: &ghg_types::ContentHash) -> SdkResult<Option<Vec<u8>>> {
        Ok(self.sources.get(hash)?)
    }

    /// Series of `data_kind` matching every filter.
    pub fn lookup(&self, data_kind: &str, filters: &[Filter]) -> SdkResult<Vec<SeriesId>> {
        Ok(self.index(data_kind)?.lookup(filters)?)
    }

    /// Series of `data_kind` matching none of the filters.
    pub fn negate(&self, data_kind: &str, filters: &[Filter]) -> SdkResult<Vec<SeriesId>> {
        Ok(self.index(data_kind)?.negate(filters)?)
    }

    /// Records matching every filter, in one data kind or all of them.
    pub fn search(&self, data_kind: Option<&str>, filters: &[Filter]) -> SdkResult<Vec<MetadataRecord>> {
        let indexes = self.selected(data_kind)?;
        Ok(lookup_many(&indexes, filters)?
            .into_iter()
            .map(|hit| hit.record)
            .collect())
    }

    /// Records matching none of the filters, in one data kind or all of them.
    pub fn search_excluding(
        &self,
        data_kind: Option<&str>,
        filters: &[Filter],
    ) -> SdkResult<Vec<MetadataRecord>> {
        let indexes = self.selected(data_kind)?;
        Ok(negate_many(&indexes, filters)?
            .into_iter()
            .map(|hit| hit.record)
            .collect())
    }

    // ---- Metadata edits ----

    /// Change descriptive metadata. The prior record is saved in `undo`.
    pub fn edit_metadata(
        &self,
        data_kind: &str,
        series: &SeriesId,
        updates: &Attributes,
        removals: &[String],
        undo: &mut UndoLog,
    ) -> SdkResult<MetadataRecord> {
        let schema = self.schema(data_kind)?;
        let index = self.index(data_kind)?;
        let mut changes = Attributes::new();
        for (key, value) in updates {
            changes.insert(protect(schema, key)?, value.clone());
        }
        let removals = removals
            .iter()
            .map(|key| protect(schema, key))
            .collect::<SdkResult<Vec<_>>>()?;

        let record = self.with_retries("edit metadata", || {
            let current = self.info(data_kind, series)?;
            undo.record(&current);
            let mut next = current.series.clone();
            for key in &removals {
                next.descriptive_metadata.remove(key);
            }
            next.descriptive_metadata.extend(changes.clone());
            next.updated_at = Utc::now();
            let mut txn = Transaction::new();
            txn.put(current.updated(next));
            Ok(match commit(index, &txn)? {
                Attempt::Done(mut committed) => Attempt::Done(committed.remove(0)),
                Attempt::Conflict(e) => Attempt::Conflict(e),
            })
        })?;
        info!(series = %series, revision = record.revision, "metadata edited");
        Ok(record)
    }

    /// Bring back the descriptive metadata saved in `undo` at `revision`.
    /// The restore is itself a new revision and is recorded in `undo`.
    pub fn restore_metadata(
        &self,
        data_kind: &str,
        series: &SeriesId,
        revision: u64,
        undo: &mut UndoLog,
    ) -> SdkResult<MetadataRecord> {
        let index = self.index(data_kind)?;
        let record = self.with_retries("restore metadata", || {
            let current = self.info(data_kind, series)?;
            let staged = undo.restore(&current, revision)?;
            undo.record(&current);
            let mut txn = Transaction::new();
            txn.put(staged);
            Ok(match commit(index, &txn)? {
                Attempt::Done(mut committed) => Attempt::Done(committed.remove(0)),
                Attempt::Conflict(e) => Attempt::Conflict(e),
            })
        })?;
        info!(series = %series, from = revision, revision = record.revision, "metadata restored");
        Ok(record)
    }

    /// Make a copy of an older version the new latest version.
    pub fn restore_version(
        &self,
        data_kind: &str,
        series: &SeriesId,
        version: VersionLabel,
    ) -> SdkResult<MetadataRecord> {
        let index = self.index(data_kind)?;
        self.with_retries("restore version", || {
            let current = self.info(data_kind, series)?;
            let next = current.series.restore_version(version, Utc::now())?;
            let mut txn = Transaction::new();
            txn.put(current.updated(next));
            Ok(match commit(index, &txn)? {
                Attempt::Done(mut committed) => Attempt::Done(committed.remove(0)),
                Attempt::Conflict(e) => Attempt::Conflict(e),
            })
        })
    }

    // ---- Deletion ----

    /// Remove a series: its metadata first, then its payload folder.
    /// Irreversible. Returns the record as it was before deletion.
    pub fn delete_series(
        &self,
        data_kind: &str,
        series: &SeriesId,
        confirmation: DeleteConfirmation,
    ) -> SdkResult<MetadataRecord> {
        if confirmation.series != *series {
            return Err(SdkError::DeleteNotConfirmed {
                expected: *series,
                given: confirmation.series,
            });
        }
        let index = self.index(data_kind)?;
        let removed = self.with_retries("delete series", || {
            let current = self.info(data_kind, series)?;
            let mut txn = Transaction::new();
            txn.delete(&current);
            Ok(match commit(index, &txn)? {
                Attempt::Done(_) => Attempt::Done(current),
                Attempt::Conflict(e) => Attempt::Conflict(e),
            })
        })?;
        let had_data = self.arrays.delete_series(series)?;
        info!(data_kind, series = %series, had_data, "series deleted");
        Ok(removed)
    }

    // ---- Consistency ----

    /// Cross-check every index against the payload and source stores.
    pub fn check(&self) -> SdkResult<ConsistencyReport> {
        let indexes: Vec<&dyn MetadataIndex> = self.indexes.values().map(|i| i.as_ref()).collect();
        let report = check::run(
            &indexes,
            self.arrays.as_ref(),
            self.sources.as_ref(),
            self.config.prune_grace(),
        )?;
        if report.is_clean() {
            info!(series = report.series_checked, pending = report.pending_chunks, "consistency check clean");
        } else {
            warn!(series = report.series_checked, issues = report.issues.len(), "consistency check found issues");
        }
        Ok(report)
    }

    /// Remove the unreferenced chunks and orphaned folders named in `report`.
    ///
    /// Each item is checked again first: anything referenced by the index or
    /// written within `prune_grace_secs` since the check is kept.
    pub fn prune(&self, report: &ConsistencyReport) -> SdkResult<PruneSummary> {
        let indexes: Vec<&dyn MetadataIndex> = self.indexes.values().map(|i| i.as_ref()).collect();
        check::prune(report, &indexes, self.arrays.as_ref(), self.config.prune_grace())
    }

    // ---- Commit plumbing ----

    fn with_retries<T>(
        &self,
        operation: &str,
        mut attempt: impl FnMut() -> SdkResult<Attempt<T>>,
    ) -> SdkResult<T> {
        let mut last = None;
        for n in 1..=self.config.commit_retries {
            match attempt()? {
                Attempt::Done(value) => return Ok(value),
                Attempt::Conflict(e) => {
                    warn!(operation, attempt = n, error = %e, "commit conflict, re-reading");
                    last = Some(e);
                }
            }
        }
        let reason = format!(
            "{operation} gave up after {} commit attempts",
            self.config.commit_retries
        );
        Err(match last {
            Some(e) => SdkError::object_store(reason, e),
            None => SdkError::object_store(reason, "no commit attempted"),
        })
    }
}

impl fmt::Debug for DataStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DataStore")
            .field("backend", &self.backend)
            .field("data_kinds", &self.data_kinds())
            .finish()
    }
}

/// Records matching every filter across several stores.
pub fn search_many(
    stores: &[&DataStore],
    data_kind: Option<&str>,
    filters: &[Filter],
) -> SdkResult<Vec<StoreHit>> {
    let mut owners = Vec::new();
    let mut indexes: Vec<&dyn MetadataIndex> = Vec::new();
    for (position, store) in stores.iter().enumerate() {
        let selected = match data_kind {
            // A store without the kind simply has no hits.
            Some(kind) if !store.indexes.contains_key(kind) => continue,
            _ => store.selected(data_kind)?,
        };
        owners.extend(std::iter::repeat(position).take(selected.len()));
        indexes.extend(selected);
    }
    Ok(lookup_many(&indexes, filters)?
        .into_iter()
        .map(|hit| StoreHit {
            store: owners[hit.source],
            record: hit.record,
        })
        .collect())
}

fn schema_path(root: &Path, data_kind: &str) -> PathBuf {
    root.join(CONFIG_DIR).join(format!("{data_kind}.toml"))
}

fn commit(index: &dyn MetadataIndex, txn: &Transaction) -> SdkResult<Attempt<Vec<MetadataRecord>>> {
    match index.commit(txn) {
        Ok(committed) => Ok(Attempt::Done(committed)),
        Err(e @ (IndexError::Conflict { .. } | IndexError::FingerprintTaken { .. })) => {
            Ok(Attempt::Conflict(e))
        }
        Err(e) => Err(e.into()),
    }
}

/// Normalised key, refused if it is distinguishing or derived.
fn protect(schema: &KeySchema, key: &str) -> SdkResult<String> {
    let key = normalize_key(key)?;
    if schema.is_distinguishing(&key) || DERIVED_KEYS.contains(&key.as_str()) {
        return Err(SdkError::ProtectedKey(key));
    }
    Ok(key)
}

/// Attribute keys normalised, and schema-typed values normalised the same
/// way distinguishing keys are.
fn normalize_attributes(schema: &KeySchema, attributes: &Attributes) -> Attributes {
    attributes
        .iter()
        .map(|(key, value)| {
            let key = normalize_key(key).unwrap_or_else(|_| key.trim().to_lowercase());
            let value = schema
                .key_type(&key)
                .and_then(|ty| crate::schema::normalize_value(&key, ty, value).ok())
                .unwrap_or_else(|| value.clone());
            (key, value)
        })
        .collect()
}

/// Reconcile embedded attributes with the series metadata, updating the
/// descriptive metadata when the source side wins. Returns the attributes
/// as they should now read.
fn reconcile_attributes(
    series: &mut SeriesRecord,
    attributes: &Attributes,
    choice: UpdateMismatch,
) -> SdkResult<Attributes> {
    let mut known = series.descriptive_metadata.clone();
    known.extend(series.distinguishing_keys.clone());
    let reconciled = reconcile(series.series_id, &known, attributes, choice)?;
    if choice == UpdateMismatch::FromSource {
        let protected: Vec<_> = reconciled
            .resolved
            .iter()
            .filter(|c| series.distinguishing_keys.contains_key(&c.key))
            .cloned()
            .collect();
        if !protected.is_empty() {
            return Err(SdkError::AttrMismatch {
                series: series.series_id,
                conflicts: protected,
            });
        }
        for conflict in &reconciled.resolved {
            series
                .descriptive_metadata
                .insert(conflict.key.clone(), conflict.attribute.clone());
        }
    }
    Ok(reconciled.attributes)
}

fn with_keys(e: SeriesError, keys: &DerivedKeys) -> SdkError {
    match SdkError::from(e) {
        SdkError::DataOverlap {
            series,
            conflicting,
            candidates,
            ..
        } => SdkError::DataOverlap {
            series,
            keys: keys.distinguishing.clone(),
            conflicting,
            candidates,
        },
        other => other,
    }
}
