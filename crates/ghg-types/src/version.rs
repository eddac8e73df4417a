use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::TypeError;

/// Label of one version of a series: `v1`, `v2`, ...
///
/// Labels are strictly ordered by creation and never reused. Serialized in
/// the `vN` string form.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VersionLabel(u32);

impl VersionLabel {
    /// The label given to the first version of every series.
    pub const fn first() -> Self {
        Self(1)
    }

    /// Create a label from its ordinal. Ordinal zero is invalid.
    pub fn new(ordinal: u32) -> Result<Self, TypeError> {
        if ordinal == 0 {
            return Err(TypeError::InvalidVersion("v0".to_string()));
        }
        Ok(Self(ordinal))
    }

    /// The numeric ordinal (1 for `v1`).
    pub fn ordinal(&self) -> u32 {
        self.0
    }

    /// The label immediately following this one.
    pub fn next(&self) -> Self {
        Self(self.0 + 1)
    }

    /// Parse from `vN` (a bare `N` is also accepted).
    pub fn parse(s: &str) -> Result<Self, TypeError> {
        let trimmed = s.trim();
        let digits = trimmed
            .strip_prefix('v')
            .or_else(|| trimmed.strip_prefix('V'))
            .unwrap_or(trimmed);
        let ordinal: u32 = digits
            .parse()
            .map_err(|_| TypeError::InvalidVersion(s.to_string()))?;
        Self::new(ordinal).map_err(|_| TypeError::InvalidVersion(s.to_string()))
    }
}

impl fmt::Debug for VersionLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}", self.0)
    }
}

impl fmt::Display for VersionLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}", self.0)
    }
}

impl FromStr for VersionLabel {
    type Err = TypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl Serialize for VersionLabel {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for VersionLabel {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::parse(&s).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_is_v1() {
        assert_eq!(VersionLabel::first().to_string(), "v1");
    }

    #[test]
    fn next_advances_by_one() {
        let v1 = VersionLabel::first();
        assert_eq!(v1.next().ordinal(), 2);
        assert!(v1.next() > v1);
    }

    #[test]
    fn parse_accepts_prefixed_and_bare() {
        assert_eq!(VersionLabel::parse("v3").unwrap().ordinal(), 3);
        assert_eq!(VersionLabel::parse("12").unwrap().ordinal(), 12);
    }

    #[test]
    fn parse_rejects_zero_and_junk() {
        assert!(VersionLabel::parse("v0").is_err());
        assert!(VersionLabel::parse("latest").is_err());
    }

    #[test]
    fn ordering_is_numeric_not_lexical() {
        let v2 = VersionLabel::parse("v2").unwrap();
        let v10 = VersionLabel::parse("v10").unwrap();
        assert!(v2 < v10);
    }

    #[test]
    fn serde_uses_label_form() {
        let v = VersionLabel::parse("v7").unwrap();
        let json = serde_json::to_string(&v).unwrap();
        assert_eq!(json, "\"v7\"");
        assert_eq!(serde_json::from_str::<VersionLabel>(&json).unwrap(), v);
    }
}
