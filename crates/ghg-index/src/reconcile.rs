//! Reconciling embedded data attributes with stored metadata.
//!
//! A key present in both places must carry equivalent values. When they
//! differ the caller picks a side; the default is to reject.

use std::fmt;
use std::str::FromStr;

use ghg_types::value::normalize_text;
use ghg_types::{Attributes, MetaValue, SeriesId};
use serde::{Deserialize, Serialize};

use crate::error::{IndexError, IndexResult};

/// Which side wins when attributes and metadata disagree.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpdateMismatch {
    /// Reject the ingest.
    #[default]
    Never,
    /// Embedded attributes overwrite metadata.
    FromSource,
    /// Metadata overwrites embedded attributes.
    FromDefinition,
}

/// One disagreeing key.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AttrConflict {
    pub key: String,
    pub metadata: MetaValue,
    pub attribute: MetaValue,
}

/// Both maps after reconciliation, plus what was overridden.
#[derive(Clone, Debug, PartialEq)]
pub struct Reconciled {
    pub metadata: Attributes,
    pub attributes: Attributes,
    pub resolved: Vec<AttrConflict>,
}

/// Keys present in both maps with non-equivalent values.
pub fn find_conflicts(metadata: &Attributes, attributes: &Attributes) -> Vec<AttrConflict> {
    let attributes: Attributes = attributes
        .iter()
        .map(|(k, v)| (normalize_text(k), v.clone()))
        .collect();
    metadata
        .iter()
        .filter_map(|(key, meta)| {
            let attr = attributes.get(&normalize_text(key))?;
            (!meta.equivalent(attr)).then(|| AttrConflict {
                key: normalize_text(key),
                metadata: meta.clone(),
                attribute: attr.clone(),
            })
        })
        .collect()
}

/// Apply `choice` to the disagreements between `metadata` and `attributes`.
pub fn reconcile(
    series: SeriesId,
    metadata: &Attributes,
    attributes: &Attributes,
    choice: UpdateMismatch,
) -> IndexResult<Reconciled> {
    let conflicts = find_conflicts(metadata, attributes);
    let mut metadata = metadata.clone();
    let mut attributes: Attributes = attributes
        .iter()
        .map(|(k, v)| (normalize_text(k), v.clone()))
        .collect();
    if conflicts.is_empty() {
        return Ok(Reconciled {
            metadata,
            attributes,
            resolved: conflicts,
        });
    }
    match choice {
        UpdateMismatch::Never => return Err(IndexError::AttrMismatch { series, conflicts }),
        UpdateMismatch::FromSource => {
            for c in &conflicts {
                metadata.insert(c.key.clone(), c.attribute.clone());
            }
        }
        UpdateMismatch::FromDefinition => {
            for c in &conflicts {
                attributes.insert(c.key.clone(), c.metadata.clone());
            }
        }
    }
    tracing::info!(series = %series, choice = %choice, keys = conflicts.len(), "attribute mismatch reconciled");
    Ok(Reconciled {
        metadata,
        attributes,
        resolved: conflicts,
    })
}

impl fmt::Display for UpdateMismatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Never => "never",
            Self::FromSource => "from_source",
            Self::FromDefinition => "from_definition",
        })
    }
}

impl FromStr for UpdateMismatch {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "never" => Ok(Self::Never),
            "from_source" | "attributes" => Ok(Self::FromSource),
            "from_definition" | "metadata" => Ok(Self::FromDefinition),
            other => Err(format!("unknown update_mismatch value: {other}")),
        }
    }
}
