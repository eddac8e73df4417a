//! Flat key/value search filters.
//!
//! Keys and text values are normalised (trimmed, lowercased) on both sides.
//! A record lacking the filtered key never matches a filter; negative
//! searches therefore include it. [`Filter::NotEq`] is the positive form of
//! "present and different", which excludes records lacking the key.

use std::cmp::Ordering;

use ghg_types::value::normalize_text;
use ghg_types::MetaValue;
use serde::{Deserialize, Serialize};

use crate::record::MetadataRecord;

/// One search condition.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Filter {
    /// Field equals the value.
    Eq { key: String, value: MetaValue },
    /// Field is present and differs from the value.
    NotEq { key: String, value: MetaValue },
    /// Field equals any of the values.
    AnyOf { key: String, values: Vec<MetaValue> },
    /// Field lies in `[lo, hi]`; a missing bound is open.
    Range {
        key: String,
        lo: Option<MetaValue>,
        hi: Option<MetaValue>,
    },
    /// Field is present.
    Exists { key: String },
}

impl Filter {
    pub fn eq(key: impl Into<String>, value: impl Into<MetaValue>) -> Self {
        Self::Eq {
            key: key.into(),
            value: value.into(),
        }
    }

    pub fn not_eq(key: impl Into<String>, value: impl Into<MetaValue>) -> Self {
        Self::NotEq {
            key: key.into(),
            value: value.into(),
        }
    }

    pub fn any_of<V: Into<MetaValue>>(key: impl Into<String>, values: impl IntoIterator<Item = V>) -> Self {
        Self::AnyOf {
            key: key.into(),
            values: values.into_iter().map(Into::into).collect(),
        }
    }

    pub fn range(key: impl Into<String>, lo: Option<MetaValue>, hi: Option<MetaValue>) -> Self {
        Self::Range {
            key: key.into(),
            lo,
            hi,
        }
    }

    pub fn exists(key: impl Into<String>) -> Self {
        Self::Exists { key: key.into() }
    }

    /// The filtered key, normalised.
    pub fn key(&self) -> String {
        let key = match self {
            Self::Eq { key, .. }
            | Self::NotEq { key, .. }
            | Self::AnyOf { key, .. }
            | Self::Range { key, .. }
            | Self::Exists { key } => key,
        };
        normalize_text(key)
    }

    /// Whether `record` satisfies this filter.
    pub fn matches(&self, record: &MetadataRecord) -> bool {
        let Some(field) = record.field(&self.key()) else {
            return false;
        };
        match self {
            Self::Eq { value, .. } => field.equivalent(value),
            Self::NotEq { value, .. } => !field.equivalent(value),
            Self::AnyOf { values, .. } => values.iter().any(|v| field.equivalent(v)),
            Self::Range { lo, hi, .. } => {
                let above = lo
                    .as_ref()
                    .map_or(true, |lo| matches!(field.compare(lo), Some(Ordering::Greater | Ordering::Equal)));
                let below = hi
                    .as_ref()
                    .map_or(true, |hi| matches!(field.compare(hi), Some(Ordering::Less | Ordering::Equal)));
                above && below
            }
            Self::Exists { .. } => true,
        }
    }
}

/// Records matching every filter. An empty filter list matches everything.
pub fn matches_all(filters: &[Filter], record: &MetadataRecord) -> bool {
    filters.iter().all(|f| f.matches(record))
}

/// Records matching none of the filters.
pub fn matches_none(filters: &[Filter], record: &MetadataRecord) -> bool {
    !filters.iter().any(|f| f.matches(record))
}
