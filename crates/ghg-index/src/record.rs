//! Metadata records: the searchable projection of a series record.

use ghg_series::SeriesRecord;
use ghg_types::value::normalize_text;
use ghg_types::{Attributes, ContentHash, MetaValue, SeriesId, Timestamp, VersionLabel};
use serde::{Deserialize, Serialize};

/// Derived field names every record answers to.
pub const SERIES_ID_KEY: &str = "series_id";
pub const DATA_KIND_KEY: &str = "data_kind";
pub const START_DATE_KEY: &str = "start_date";
pub const END_DATE_KEY: &str = "end_date";
pub const LATEST_VERSION_KEY: &str = "latest_version";

/// One durable index entry.
///
/// Carries the full [`SeriesRecord`] so a commit persists series state and
/// its searchable projection in a single write.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MetadataRecord {
    pub series_id: SeriesId,
    pub data_kind: String,
    pub fingerprint: ContentHash,
    /// Earliest timestamp of the latest version.
    pub start_date: Option<Timestamp>,
    /// End of the latest version's coverage (exclusive).
    pub end_date: Option<Timestamp>,
    pub latest_version: VersionLabel,
    /// Committed revision. Zero for a record never committed.
    pub revision: u64,
    pub series: SeriesRecord,
}

impl MetadataRecord {
    /// Project a series record into an uncommitted metadata record.
    pub fn project(series: SeriesRecord) -> Self {
        Self::with_revision(series, 0)
    }

    /// Replace the series state, keeping the revision this record was read at.
    pub fn updated(&self, series: SeriesRecord) -> Self {
        Self::with_revision(series, self.revision)
    }

    fn with_revision(series: SeriesRecord, revision: u64) -> Self {
        let span = series.latest_span();
        Self {
            series_id: series.series_id,
            data_kind: series.data_kind.clone(),
            fingerprint: series.fingerprint,
            start_date: span.map(|s| s.start()),
            end_date: span.map(|s| s.end()),
            latest_version: series.latest_version,
            revision,
            series,
        }
    }

    /// Value of a searchable field.
    ///
    /// Derived fields are consulted first, then distinguishing keys, then
    /// descriptive metadata. Keys are matched case-insensitively.
    pub fn field(&self, key: &str) -> Option<MetaValue> {
        let key = normalize_text(key);
        match key.as_str() {
            SERIES_ID_KEY => return Some(MetaValue::Text(self.series_id.to_string())),
            DATA_KIND_KEY => return Some(MetaValue::Text(self.data_kind.clone())),
            START_DATE_KEY => return self.start_date.map(MetaValue::Time),
            END_DATE_KEY => return self.end_date.map(MetaValue::Time),
            LATEST_VERSION_KEY => return Some(MetaValue::Text(self.latest_version.to_string())),
            _ => {}
        }
        self.series
            .distinguishing_keys
            .get(&key)
            .or_else(|| self.series.descriptive_metadata.get(&key))
            .cloned()
    }

    /// Every searchable field, flattened.
    pub fn fields(&self) -> Attributes {
        let mut out = self.series.descriptive_metadata.clone();
        out.extend(self.series.distinguishing_keys.clone());
        out.insert(SERIES_ID_KEY.into(), MetaValue::Text(self.series_id.to_string()));
        out.insert(DATA_KIND_KEY.into(), MetaValue::Text(self.data_kind.clone()));
        out.insert(
            LATEST_VERSION_KEY.into(),
            MetaValue::Text(self.latest_version.to_string()),
        );
        if let Some(start) = self.start_date {
            out.insert(START_DATE_KEY.into(), MetaValue::Time(start));
        }
        if let Some(end) = self.end_date {
            out.insert(END_DATE_KEY.into(), MetaValue::Time(end));
        }
        out
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use ghg_series::{Version, VersionEntry};
    use ghg_types::Interval;

    pub(crate) fn sample(site: &str, species: &str) -> MetadataRecord {
        let keys = Attributes::from([
            ("site".to_string(), MetaValue::from(site)),
            ("species".to_string(), MetaValue::from(species)),
            ("inlet".to_string(), MetaValue::from(10.0)),
        ]);
        let descriptive = Attributes::from([("network".to_string(), MetaValue::from("agage"))]);
        let now = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let fingerprint = ContentHash::from_bytes(format!("{site}/{species}").as_bytes());
        let mut series = SeriesRecord::new(SeriesId::new(), "surface", keys, fingerprint, descriptive, now);
        series.versions.insert(
            VersionLabel::first(),
            Version {
                entries: vec![VersionEntry::new(
                    Interval::new(
                        Utc.with_ymd_and_hms(2010, 1, 1, 0, 0, 0).unwrap(),
                        Utc.with_ymd_and_hms(2012, 1, 1, 0, 0, 0).unwrap(),
                    )
                    .unwrap(),
                    Vec::new(),
                )],
                created_at: now,
            },
        );
        MetadataRecord::project(series)
    }

    #[test]
    fn projection_derives_dates() {
        let r = sample("mhd", "ch4");
        assert_eq!(r.start_date, Some(Utc.with_ymd_and_hms(2010, 1, 1, 0, 0, 0).unwrap()));
        assert_eq!(r.end_date, Some(Utc.with_ymd_and_hms(2012, 1, 1, 0, 0, 0).unwrap()));
        assert_eq!(r.revision, 0);
    }

    #[test]
    fn field_lookup_order_and_case() {
        let r = sample("mhd", "ch4");
        assert_eq!(r.field("SITE"), Some(MetaValue::from("mhd")));
        assert_eq!(r.field("network"), Some(MetaValue::from("agage")));
        assert_eq!(r.field("latest_version"), Some(MetaValue::from("v1")));
        assert!(r.field("missing").is_none());
        assert!(r.fields().contains_key("start_date"));
    }

    #[test]
    fn updated_keeps_base_revision() {
        let mut r = sample("tac", "co2");
        r.revision = 4;
        let next = r.updated(r.series.clone());
        assert_eq!(next.revision, 4);
    }
}
