//! Distinguishing-key schemas.
//!
//! Each data kind has a schema naming its required and optional keys and the
//! coarse type of each. The schema is data, stored as
//! `<root>/config/<kind>.toml`:
//!
//! ```toml
//! [required]
//! site = "string"
//! species = "species-name"
//! inlet = "numeric-height"
//!
//! [optional]
//! instrument = "string"
//! ```

use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::Path;

use ghg_index::names::normalize_key;
use ghg_store::fsutil;
use ghg_types::interval::parse_timestamp;
use ghg_types::value::{normalize_text, parse_bool};
use ghg_types::{Attributes, ContentHash, ContentHasher, MetaValue};
use serde::{Deserialize, Serialize};

use crate::error::{SdkError, SdkResult};

/// Coarse value type of a key; decides how values are normalised.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum KeyType {
    String,
    NumericHeight,
    SpeciesName,
    Timestamp,
    Boolean,
}

impl fmt::Display for KeyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::String => "string",
            Self::NumericHeight => "numeric-height",
            Self::SpeciesName => "species-name",
            Self::Timestamp => "timestamp",
            Self::Boolean => "boolean",
        })
    }
}

/// Common spellings mapped to the canonical species label.
const SPECIES_SYNONYMS: &[(&str, &str)] = &[
    ("carbondioxide", "co2"),
    ("methane", "ch4"),
    ("nitrousoxide", "n2o"),
    ("carbonmonoxide", "co"),
    ("sulfurhexafluoride", "sf6"),
    ("sulphurhexafluoride", "sf6"),
    ("hydrogen", "h2"),
    ("deltac13co2", "dco2c13"),
    ("radon", "rn"),
];

/// Required and optional keys of one data kind.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeySchema {
    #[serde(default)]
    pub required: BTreeMap<String, KeyType>,
    #[serde(default)]
    pub optional: BTreeMap<String, KeyType>,
}

/// Keys of one dataset after schema application.
#[derive(Clone, Debug, PartialEq)]
pub struct DerivedKeys {
    /// Required keys plus whichever optional keys were supplied.
    pub distinguishing: Attributes,
    /// Everything else, kept as non-distinguishing metadata.
    pub informational: Attributes,
    pub fingerprint: ContentHash,
}

impl KeySchema {
    /// Default schema for surface observations.
    pub fn surface() -> Self {
        Self {
            required: BTreeMap::from([
                ("site".into(), KeyType::String),
                ("species".into(), KeyType::SpeciesName),
                ("inlet".into(), KeyType::NumericHeight),
            ]),
            optional: BTreeMap::from([
                ("instrument".into(), KeyType::String),
                ("network".into(), KeyType::String),
                ("sampling_period".into(), KeyType::String),
            ]),
        }
    }

    /// Default schema for footprints.
    pub fn footprints() -> Self {
        Self {
            required: BTreeMap::from([
                ("site".into(), KeyType::String),
                ("domain".into(), KeyType::String),
                ("inlet".into(), KeyType::NumericHeight),
            ]),
            optional: BTreeMap::from([
                ("model".into(), KeyType::String),
                ("met_model".into(), KeyType::String),
                ("species".into(), KeyType::SpeciesName),
                ("high_time_resolution".into(), KeyType::Boolean),
            ]),
        }
    }

    pub fn from_toml_str(s: &str) -> SdkResult<Self> {
        let raw: Self = toml::from_str(s).map_err(|e| SdkError::Config(e.to_string()))?;
        let mut schema = Self::default();
        for (key, ty) in raw.required {
            schema.required.insert(normalize_key(&key)?, ty);
        }
        for (key, ty) in raw.optional {
            let key = normalize_key(&key)?;
            if schema.required.contains_key(&key) {
                return Err(SdkError::Config(format!("key {key} is both required and optional")));
            }
            schema.optional.insert(key, ty);
        }
        Ok(schema)
    }

    pub fn to_toml_string(&self) -> SdkResult<String> {
        toml::to_string_pretty(self).map_err(|e| SdkError::Config(e.to_string()))
    }

    pub fn load(path: &Path) -> SdkResult<Self> {
        Self::from_toml_str(&fs::read_to_string(path)?)
    }

    pub fn save(&self, path: &Path) -> SdkResult<()> {
        fsutil::write_atomic(path, self.to_toml_string()?.as_bytes())?;
        Ok(())
    }

    /// Type of a key, if the schema names it.
    pub fn key_type(&self, key: &str) -> Option<KeyType> {
        let key = normalize_text(key);
        self.required
            .get(&key)
            .or_else(|| self.optional.get(&key))
            .copied()
    }

    pub fn is_distinguishing(&self, key: &str) -> bool {
        self.key_type(key).is_some()
    }

    /// Split candidate metadata into distinguishing and informational keys
    /// and compute the fingerprint.
    pub fn derive(&self, data_kind: &str, metadata: &Attributes) -> SdkResult<DerivedKeys> {
        let mut normalized = Attributes::new();
        for (key, value) in metadata {
            normalized.insert(normalize_key(key)?, value.clone());
        }

        let mut distinguishing = Attributes::new();
        for (key, ty) in &self.required {
            let value = normalized.remove(key).ok_or_else(|| SdkError::MissingKey {
                data_kind: data_kind.to_string(),
                key: key.clone(),
            })?;
            distinguishing.insert(key.clone(), normalize_value(key, *ty, &value)?);
        }
        for (key, ty) in &self.optional {
            if let Some(value) = normalized.remove(key) {
                distinguishing.insert(key.clone(), normalize_value(key, *ty, &value)?);
            }
        }

        let fingerprint = fingerprint(&distinguishing)?;
        Ok(DerivedKeys {
            distinguishing,
            informational: normalized,
            fingerprint,
        })
    }
}

/// Stable hash of normalised distinguishing keys.
pub fn fingerprint(distinguishing: &Attributes) -> SdkResult<ContentHash> {
    ContentHasher::FINGERPRINT
        .hash_json(distinguishing)
        .map_err(|e| SdkError::Config(e.to_string()))
}

/// Normalise one value according to its key type.
pub fn normalize_value(key: &str, ty: KeyType, value: &MetaValue) -> SdkResult<MetaValue> {
    let invalid = |reason: &str| SdkError::InvalidKey {
        key: key.to_string(),
        value: value.to_string(),
        reason: reason.to_string(),
    };
    match ty {
        KeyType::String => Ok(MetaValue::Text(normalize_text(&value.to_string()))),
        KeyType::NumericHeight => match value {
            MetaValue::Number(n) if n.is_finite() => Ok(MetaValue::Number(*n)),
            MetaValue::Text(s) => parse_height(s)
                .map(MetaValue::Number)
                .ok_or_else(|| invalid("expected a height such as 10, 10m or 10magl")),
            _ => Err(invalid("expected a finite height")),
        },
        KeyType::SpeciesName => {
            let compact: String = value
                .to_string()
                .to_lowercase()
                .chars()
                .filter(char::is_ascii_alphanumeric)
                .collect();
            if compact.is_empty() {
                return Err(invalid("empty species name"));
            }
            let canonical = SPECIES_SYNONYMS
                .iter()
                .find(|(alias, _)| *alias == compact)
                .map_or(compact.as_str(), |(_, name)| *name);
            Ok(MetaValue::Text(canonical.to_string()))
        }
        KeyType::Timestamp => match value {
            MetaValue::Time(t) => Ok(MetaValue::Time(*t)),
            MetaValue::Text(s) => parse_timestamp(s)
                .map(MetaValue::Time)
                .map_err(|e| invalid(&e.to_string())),
            _ => Err(invalid("expected a timestamp")),
        },
        KeyType::Boolean => value
            .as_bool()
            .map(MetaValue::Bool)
            .ok_or_else(|| invalid("expected a boolean")),
    }
}

fn parse_height(s: &str) -> Option<f64> {
    let s = normalize_text(s);
    let digits = s
        .strip_suffix("magl")
        .or_else(|| s.strip_suffix('m'))
        .unwrap_or(&s)
        .trim();
    digits.parse::<f64>().ok().filter(|n| n.is_finite())
}

/// Parse a bare command-line style value into the best-fitting kind.
pub fn infer_value(text: &str) -> MetaValue {
    let trimmed = text.trim();
    if let Ok(n) = trimmed.parse::<f64>() {
        return MetaValue::Number(n);
    }
    if let Some(b) = parse_bool(trimmed).filter(|_| trimmed.len() > 1) {
        return MetaValue::Bool(b);
    }
    if trimmed.len() >= 10 {
        if let Ok(t) = parse_timestamp(trimmed) {
            return MetaValue::Time(t);
        }
    }
    MetaValue::Text(trimmed.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn attrs(pairs: &[(&str, MetaValue)]) -> Attributes {
        pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
    }

    #[test]
    fn heights_normalise() {
        for text in ["10m", "10 m", "10magl", "10.0", " 10 "] {
            assert_eq!(
                normalize_value("inlet", KeyType::NumericHeight, &MetaValue::from(text)).unwrap(),
                MetaValue::Number(10.0),
                "{text}"
            );
        }
        assert!(normalize_value("inlet", KeyType::NumericHeight, &"tall".into()).is_err());
    }

    #[test]
    fn species_synonyms() {
        let norm = |s: &str| normalize_value("species", KeyType::SpeciesName, &s.into()).unwrap();
        assert_eq!(norm("Carbon Dioxide"), MetaValue::from("co2"));
        assert_eq!(norm("CH4"), MetaValue::from("ch4"));
        assert_eq!(norm("sulphur hexafluoride"), MetaValue::from("sf6"));
        assert_eq!(norm("HFC-134a"), MetaValue::from("hfc134a"));
    }

    #[test]
    fn derive_splits_keys_and_fingerprints() {
        let schema = KeySchema::surface();
        let a = schema
            .derive(
                "surface",
                &attrs(&[
                    ("Site", "MHD".into()),
                    ("species", "methane".into()),
                    ("inlet", "10m".into()),
                    ("station_long_name", "Mace Head".into()),
                ]),
            )
            .unwrap();
        let b = schema
            .derive(
                "surface",
                &attrs(&[
                    ("site", "mhd".into()),
                    ("species", "CH4".into()),
                    ("inlet", 10.0.into()),
                ]),
            )
            .unwrap();
        assert_eq!(a.fingerprint, b.fingerprint);
        assert_eq!(a.distinguishing.len(), 3);
        assert!(a.informational.contains_key("station_long_name"));
    }

    #[test]
    fn optional_keys_distinguish_when_present() {
        let schema = KeySchema::surface();
        let base = [("site", MetaValue::from("mhd")), ("species", "co2".into()), ("inlet", 10.0.into())];
        let plain = schema.derive("surface", &attrs(&base)).unwrap();
        let mut with_instrument = base.to_vec();
        with_instrument.push(("instrument", "picarro".into()));
        let tagged = schema.derive("surface", &attrs(&with_instrument)).unwrap();
        assert_ne!(plain.fingerprint, tagged.fingerprint);
    }

    #[test]
    fn missing_required_key() {
        let err = KeySchema::surface()
            .derive("surface", &attrs(&[("site", "mhd".into())]))
            .unwrap_err();
        assert!(matches!(err, SdkError::MissingKey { .. }));
    }

    #[test]
    fn toml_roundtrip_and_validation() {
        let schema = KeySchema::footprints();
        let text = schema.to_toml_string().unwrap();
        assert!(text.contains("numeric-height"));
        assert_eq!(KeySchema::from_toml_str(&text).unwrap(), schema);

        let clash = "[required]\nsite = \"string\"\n[optional]\nSITE = \"string\"\n";
        assert!(KeySchema::from_toml_str(clash).is_err());
        assert!(KeySchema::from_toml_str("[required]\nsite = \"colour\"\n").is_err());
    }

    #[test]
    fn infer_value_kinds() {
        assert_eq!(infer_value("10"), MetaValue::Number(10.0));
        assert_eq!(infer_value("true"), MetaValue::Bool(true));
        assert!(matches!(infer_value("2010-01-01"), MetaValue::Time(_)));
        assert_eq!(infer_value("mhd"), MetaValue::from("mhd"));
    }
}
