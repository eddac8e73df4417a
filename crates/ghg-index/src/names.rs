//! Data kind and key name validation.
//!
//! A data kind names files on disk (`metadata/<kind>.json`,
//! `config/<kind>.toml`), so it is held to a filename-safe subset:
//! - must be non-empty and at most 64 characters
//! - ASCII lowercase letters, digits, `_` and `-` only
//! - must not start with `-` or `_`
//!
//! Metadata keys are looser: any non-empty text without control characters,
//! normalised to lowercase with surrounding whitespace removed.

use ghg_types::value::normalize_text;

use crate::error::{IndexError, IndexResult};

const MAX_KIND_LEN: usize = 64;

/// Validate a data kind name, returning `Ok(())` if valid.
///
/// ```
/// use ghg_index::names::validate_data_kind;
///
/// assert!(validate_data_kind("surface").is_ok());
/// assert!(validate_data_kind("column-obs").is_ok());
/// assert!(validate_data_kind("").is_err());
/// assert!(validate_data_kind("../etc").is_err());
/// ```
pub fn validate_data_kind(name: &str) -> IndexResult<()> {
    let invalid = |reason: &str| IndexError::InvalidName {
        name: name.to_string(),
        reason: reason.to_string(),
    };
    if name.is_empty() {
        return Err(invalid("data kind must not be empty"));
    }
    if name.len() > MAX_KIND_LEN {
        return Err(invalid("data kind longer than 64 characters"));
    }
    if let Some(ch) = name
        .chars()
        .find(|c| !(c.is_ascii_lowercase() || c.is_ascii_digit() || *c == '_' || *c == '-'))
    {
        return Err(IndexError::InvalidName {
            name: name.to_string(),
            reason: format!("contains forbidden character: {ch:?}"),
        });
    }
    if name.starts_with('-') || name.starts_with('_') {
        return Err(invalid("must not start with '-' or '_'"));
    }
    Ok(())
}

/// Normalise a metadata key, rejecting empty keys and control characters.
pub fn normalize_key(key: &str) -> IndexResult<String> {
    let normalized = normalize_text(key);
    if normalized.is_empty() {
        return Err(IndexError::InvalidName {
            name: key.to_string(),
            reason: "key must not be empty".into(),
        });
    }
    if normalized.chars().any(char::is_control) {
        return Err(IndexError::InvalidName {
            name: key.to_string(),
            reason: "key contains control characters".into(),
        });
    }
    Ok(normalized)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn valid_kinds() {
        for kind in ["surface", "footprints", "flux_2", "column-obs"] {
            assert!(validate_data_kind(kind).is_ok(), "{kind}");
        }
    }

    #[test]
    fn invalid_kinds() {
        for kind in ["", "Surface", "a/b", "a.b", "-x", "_x", "a b"] {
            assert!(validate_data_kind(kind).is_err(), "{kind}");
        }
        assert!(validate_data_kind(&"x".repeat(65)).is_err());
    }

    #[test]
    fn keys_are_normalised() {
        assert_eq!(normalize_key("  Site ").unwrap(), "site");
        assert!(normalize_key("   ").is_err());
        assert!(normalize_key("a\tb").is_err());
    }
}
