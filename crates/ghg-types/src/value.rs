//! Typed metadata and attribute values.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::interval::{format_timestamp, parse_timestamp, Timestamp};

/// Key/value attributes as handed over by a parser, or stored in a record.
pub type Attributes = BTreeMap<String, MetaValue>;

/// A single metadata or embedded-attribute value.
///
/// Persisted with an explicit type tag so that a text value which happens to
/// look like a timestamp round-trips as text.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum MetaValue {
    Text(String),
    Number(f64),
    Bool(bool),
    Time(Timestamp),
}

impl MetaValue {
    /// Text values lowercased and trimmed; other kinds unchanged.
    pub fn normalized(&self) -> MetaValue {
        match self {
            Self::Text(s) => Self::Text(normalize_text(s)),
            other => other.clone(),
        }
    }

    /// Borrow the text content, if this is a text value.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Numeric view: numbers directly, text if it parses as a number.
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Self::Number(n) => Some(*n),
            Self::Text(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    /// Timestamp view: times directly, text if it parses as RFC3339.
    pub fn as_time(&self) -> Option<Timestamp> {
        match self {
            Self::Time(t) => Some(*t),
            Self::Text(s) => parse_timestamp(s).ok(),
            _ => None,
        }
    }

    /// Boolean view: bools directly, text `true`/`false`/`yes`/`no`/`1`/`0`.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            Self::Text(s) => parse_bool(s),
            _ => None,
        }
    }

    /// Equality after normalisation, allowing a text value to match a
    /// number, time or bool it spells out (`"10"` equals `10.0`).
    ///
    /// Timestamps compare exactly; numbers compare exactly after parsing.
    pub fn equivalent(&self, other: &MetaValue) -> bool {
        match (self, other) {
            (Self::Text(a), Self::Text(b)) => normalize_text(a) == normalize_text(b),
            (Self::Number(a), b) | (b, Self::Number(a)) => b.as_number() == Some(*a),
            (Self::Time(a), b) | (b, Self::Time(a)) => b.as_time() == Some(*a),
            (Self::Bool(a), b) | (b, Self::Bool(a)) => b.as_bool() == Some(*a),
        }
    }

    /// Ordering used by range filters. Values are compared as the kind of
    /// `self`, except that text against a number or time is read as that
    /// kind (`"100"` sorts above `20.0`). `None` when no common view exists.
    pub fn compare(&self, other: &MetaValue) -> Option<Ordering> {
        match (self, other) {
            (Self::Number(a), b) => a.partial_cmp(&b.as_number()?),
            (Self::Time(a), b) => Some(a.cmp(&b.as_time()?)),
            (Self::Bool(a), b) => Some(a.cmp(&b.as_bool()?)),
            (Self::Text(a), Self::Text(b)) => Some(normalize_text(a).cmp(&normalize_text(b))),
            (Self::Text(_), Self::Number(b)) => self.as_number()?.partial_cmp(b),
            (Self::Text(_), Self::Time(b)) => Some(self.as_time()?.cmp(b)),
            (Self::Text(_), Self::Bool(_)) => None,
        }
    }
}

impl fmt::Display for MetaValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Text(s) => write!(f, "{s}"),
            Self::Number(n) => write!(f, "{n}"),
            Self::Bool(b) => write!(f, "{b}"),
            Self::Time(t) => write!(f, "{}", format_timestamp(t)),
        }
    }
}

impl From<&str> for MetaValue {
    fn from(s: &str) -> Self {
        Self::Text(s.to_string())
    }
}

impl From<String> for MetaValue {
    fn from(s: String) -> Self {
        Self::Text(s)
    }
}

impl From<f64> for MetaValue {
    fn from(n: f64) -> Self {
        Self::Number(n)
    }
}

impl From<i64> for MetaValue {
    fn from(n: i64) -> Self {
        Self::Number(n as f64)
    }
}

impl From<bool> for MetaValue {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<Timestamp> for MetaValue {
    fn from(t: Timestamp) -> Self {
        Self::Time(t)
    }
}

/// Lowercase and trim, the normal form for keys and text values.
pub fn normalize_text(s: &str) -> String {
    s.trim().to_lowercase()
}

/// Parse the common spellings of a boolean.
pub fn parse_bool(s: &str) -> Option<bool> {
    match normalize_text(s).as_str() {
        "true" | "yes" | "y" | "1" => Some(true),
        "false" | "no" | "n" | "0" => Some(false),
        _ => None,
    }
}
