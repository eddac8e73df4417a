//! Overlap policies for the add-data procedure.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// What to do when candidate data overlaps the latest version.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictPolicy {
    /// Reject overlapping data.
    #[default]
    Auto,
    /// Let the candidate supersede the overlapping portion.
    New,
}

/// Whether the current latest version is kept when data is superseded.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetainCurrent {
    /// Let the store decide. Resolves to [`Retention::Retain`].
    #[default]
    Auto,
    Yes,
    No,
}

/// Resolved form of [`RetainCurrent`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Retention {
    /// Create a new version; the old one stays addressable.
    Retain,
    /// Mutate the latest version in place.
    Discard,
}

impl RetainCurrent {
    /// Resolve to a concrete retention choice.
    pub fn resolve(self) -> Retention {
        match self {
            Self::Auto | Self::Yes => Retention::Retain,
            Self::No => Retention::Discard,
        }
    }
}

impl fmt::Display for ConflictPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Auto => "auto",
            Self::New => "new",
        })
    }
}

impl FromStr for ConflictPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "auto" => Ok(Self::Auto),
            "new" => Ok(Self::New),
            other => Err(format!("unknown conflict policy: {other}")),
        }
    }
}

impl fmt::Display for RetainCurrent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Auto => "auto",
            Self::Yes => "yes",
            Self::No => "no",
        })
    }
}

impl FromStr for RetainCurrent {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "auto" => Ok(Self::Auto),
            "yes" | "true" => Ok(Self::Yes),
            "no" | "false" => Ok(Self::No),
            other => Err(format!("unknown retain_current value: {other}")),
        }
    }
}
