//! Array payloads and the references the array store hands back for them.

use std::collections::BTreeMap;

use ghg_types::{Attributes, ContentHash, Interval, MetaValue, Timestamp};
use serde::{Deserialize, Serialize};

use crate::error::{StoreError, StoreResult};

/// A block of time-indexed numeric data: one timestamp axis plus any number
/// of named variables of the same length.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ArrayPayload {
    /// Strictly increasing timestamps.
    pub times: Vec<Timestamp>,
    /// Variable name to values, one value per timestamp.
    pub variables: BTreeMap<String, Vec<f64>>,
    /// Dataset-level attributes. Kept in the series metadata, not in chunks.
    #[serde(default)]
    pub attributes: Attributes,
}

impl ArrayPayload {
    /// Create an empty payload.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a payload from a timestamp axis and variables.
    pub fn from_parts(times: Vec<Timestamp>, variables: BTreeMap<String, Vec<f64>>) -> Self {
        Self {
            times,
            variables,
            attributes: Attributes::new(),
        }
    }

    /// Builder-style variable insertion.
    pub fn with_variable(mut self, name: impl Into<String>, values: Vec<f64>) -> Self {
        self.variables.insert(name.into(), values);
        self
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<MetaValue>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    /// Number of rows (timestamps).
    pub fn len(&self) -> usize {
        self.times.len()
    }

    /// Returns `true` if the payload has no rows.
    pub fn is_empty(&self) -> bool {
        self.times.is_empty()
    }

    /// Check shape and ordering.
    pub fn validate(&self) -> StoreResult<()> {
        for (name, values) in &self.variables {
            if values.len() != self.times.len() {
                return Err(StoreError::InvalidPayload(format!(
                    "variable {name} has {} values for {} timestamps",
                    values.len(),
                    self.times.len()
                )));
            }
        }
        if let Some(pos) = self.times.windows(2).position(|w| w[0] >= w[1]) {
            return Err(StoreError::InvalidPayload(format!(
                "timestamps not strictly increasing at row {}",
                pos + 1
            )));
        }
        Ok(())
    }

    /// The interval covered by this payload: from the first timestamp to the
    /// last timestamp plus one sampling period.
    pub fn span(&self, sampling_period: chrono::Duration) -> Option<Interval> {
        let first = *self.times.first()?;
        let last = *self.times.last()?;
        Interval::new(first, last + sampling_period).ok()
    }

    /// Rows whose timestamp falls inside `window`.
    pub fn slice(&self, window: &Interval) -> ArrayPayload {
        let lo = self.times.partition_point(|t| *t < window.start());
        let hi = self.times.partition_point(|t| *t < window.end());
        self.rows(lo, hi)
    }

    /// Rows `lo..hi`.
    pub fn rows(&self, lo: usize, hi: usize) -> ArrayPayload {
        let hi = hi.min(self.times.len());
        let lo = lo.min(hi);
        ArrayPayload {
            times: self.times[lo..hi].to_vec(),
            variables: self
                .variables
                .iter()
                .map(|(k, v)| (k.clone(), v[lo..hi].to_vec()))
                .collect(),
            attributes: self.attributes.clone(),
        }
    }

    /// Concatenate payloads and order rows by time.
    ///
    /// Variables missing from a part are filled with `NaN` for its rows.
    /// Attributes are merged in part order, later parts winning.
    pub fn concat(parts: Vec<ArrayPayload>) -> ArrayPayload {
        let names: Vec<String> = {
            let mut all: Vec<String> = parts
                .iter()
                .flat_map(|p| p.variables.keys().cloned())
                .collect();
            all.sort();
            all.dedup();
            all
        };
        let mut rows: Vec<(Timestamp, Vec<f64>)> = Vec::new();
        for part in &parts {
            for (i, t) in part.times.iter().enumerate() {
                let values = names
                    .iter()
                    .map(|n| part.variables.get(n).map_or(f64::NAN, |v| v[i]))
                    .collect();
                rows.push((*t, values));
            }
        }
        rows.sort_by(|a, b| a.0.cmp(&b.0));

        let mut out = ArrayPayload::new();
        for part in &parts {
            out.attributes.extend(part.attributes.clone());
        }
        let mut columns: Vec<Vec<f64>> = vec![Vec::with_capacity(rows.len()); names.len()];
        for (t, values) in rows {
            out.times.push(t);
            for (col, v) in columns.iter_mut().zip(values) {
                col.push(v);
            }
        }
        out.variables = names.into_iter().zip(columns).collect();
        out
    }
}

/// Hints controlling how the array store chunks a payload.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkHints {
    /// Maximum number of rows per chunk.
    pub max_rows: usize,
}

impl Default for ChunkHints {
    fn default() -> Self {
        Self { max_rows: 50_000 }
    }
}

/// Opaque handle to one persisted chunk of a series payload.
///
/// Returned by [`ArrayStore::write`](crate::ArrayStore::write) only after the
/// chunk is durable; version entries may share references.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PayloadRef {
    /// Location of the chunk within the series folder.
    pub key: String,
    /// Hash of the encoded chunk body.
    pub hash: ContentHash,
    /// Time span the chunk is responsible for.
    pub interval: Interval,
    /// Number of rows in the chunk.
    pub rows: usize,
}

/// A chunk as found in storage, whether or not any version references it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StoredChunk {
    pub key: String,
    /// When the chunk was last written or rewritten.
    pub written_at: Timestamp,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};

    fn hourly(n: usize) -> Vec<Timestamp> {
        let base = Utc.with_ymd_and_hms(2010, 1, 1, 0, 0, 0).unwrap();
        (0..n).map(|i| base + Duration::hours(i as i64)).collect()
    }

    #[test]
    fn validate_rejects_ragged_variables() {
        let p = ArrayPayload::from_parts(hourly(3), BTreeMap::new())
            .with_variable("co2", vec![1.0, 2.0]);
        assert!(matches!(p.validate(), Err(StoreError::InvalidPayload(_))));
    }

    #[test]
    fn validate_rejects_unsorted_times() {
        let mut times = hourly(3);
        times.swap(0, 2);
        let p = ArrayPayload::from_parts(times, BTreeMap::new());
        assert!(p.validate().is_err());
    }

    #[test]
    fn span_adds_sampling_period() {
        let p = ArrayPayload::from_parts(hourly(24), BTreeMap::new());
        let span = p.span(Duration::hours(1)).unwrap();
        assert_eq!(span.start(), p.times[0]);
        assert_eq!(span.end(), p.times[23] + Duration::hours(1));
        assert!(ArrayPayload::new().span(Duration::hours(1)).is_none());
    }

    #[test]
    fn slice_is_half_open() {
        let p = ArrayPayload::from_parts(hourly(10), BTreeMap::new())
            .with_variable("ch4", (0..10).map(f64::from).collect());
        let window = Interval::new(p.times[2], p.times[5]).unwrap();
        let s = p.slice(&window);
        assert_eq!(s.len(), 3);
        assert_eq!(s.variables["ch4"], vec![2.0, 3.0, 4.0]);
    }

    #[test]
    fn concat_orders_rows_and_fills_missing() {
        let times = hourly(4);
        let late = ArrayPayload::from_parts(times[2..].to_vec(), BTreeMap::new())
            .with_variable("co2", vec![3.0, 4.0]);
        let early = ArrayPayload::from_parts(times[..2].to_vec(), BTreeMap::new())
            .with_variable("co2", vec![1.0, 2.0])
            .with_variable("co2_variability", vec![0.1, 0.2]);
        let joined = ArrayPayload::concat(vec![late, early]);
        assert_eq!(joined.times, times);
        assert_eq!(joined.variables["co2"], vec![1.0, 2.0, 3.0, 4.0]);
        assert!(joined.variables["co2_variability"][3].is_nan());
    }

    #[test]
    fn attributes_follow_slices_and_merge_on_concat() {
        let p = ArrayPayload::from_parts(hourly(4), BTreeMap::new())
            .with_attribute("units", "ppm")
            .with_attribute("calibration_scale", "WMO-X2007");
        let window = Interval::new(p.times[0], p.times[2]).unwrap();
        let first = p.slice(&window);
        assert_eq!(first.attributes["units"], MetaValue::from("ppm"));

        let mut second = p.rows(2, 4);
        second.attributes.insert("units".into(), MetaValue::from("ppb"));
        let joined = ArrayPayload::concat(vec![first, second]);
        assert_eq!(joined.attributes["units"], MetaValue::from("ppb"));
        assert_eq!(joined.attributes["calibration_scale"], MetaValue::from("WMO-X2007"));
    }
}
