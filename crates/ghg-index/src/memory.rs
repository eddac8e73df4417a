//! In-memory metadata index for tests and embedding.

use std::collections::BTreeMap;
use std::sync::RwLock;

use ghg_types::SeriesId;

use crate::error::IndexResult;
use crate::names::validate_data_kind;
use crate::record::MetadataRecord;
use crate::staging::Transaction;
use crate::traits::MetadataIndex;

/// A [`MetadataIndex`] held in a `BTreeMap` behind a `RwLock`.
#[derive(Debug)]
pub struct InMemoryIndex {
    data_kind: String,
    records: RwLock<BTreeMap<SeriesId, MetadataRecord>>,
}

impl InMemoryIndex {
    pub fn new(data_kind: impl Into<String>) -> IndexResult<Self> {
        let data_kind = data_kind.into();
        validate_data_kind(&data_kind)?;
        Ok(Self {
            data_kind,
            records: RwLock::new(BTreeMap::new()),
        })
    }

    pub fn len(&self) -> usize {
        self.records.read().expect("lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl MetadataIndex for InMemoryIndex {
    fn data_kind(&self) -> &str {
        &self.data_kind
    }

    fn all(&self) -> IndexResult<Vec<MetadataRecord>> {
        Ok(self
            .records
            .read()
            .expect("lock poisoned")
            .values()
            .cloned()
            .collect())
    }

    fn get(&self, series: &SeriesId) -> IndexResult<Option<MetadataRecord>> {
        Ok(self.records.read().expect("lock poisoned").get(series).cloned())
    }

    fn commit(&self, transaction: &Transaction) -> IndexResult<Vec<MetadataRecord>> {
        let mut records = self.records.write().expect("lock poisoned");
        let mut next = records.clone();
        let committed = transaction.apply_to(&self.data_kind, &mut next)?;
        *records = next;
        Ok(committed)
    }
}
