//! Half-open time intervals and the interval algebra.
//!
//! An [`Interval`] is `[start, end)` with `start < end`, compared at the full
//! nanosecond resolution of [`Timestamp`]. Two intervals that merely touch
//! (`a.end == b.start`) do not overlap.
//!
//! The free functions in this module are pure and total over well-formed
//! intervals:
//!
//! - [`overlaps`] / [`contains`] -- pairwise predicates
//! - [`gaps`] -- holes between consecutive covered intervals
//! - [`split_on_overlap`] -- cut an existing interval around an incoming one
//! - [`merge`] -- minimal covering set (idempotent)
//! - [`subtract`] -- remove a set of intervals from another set
//! - [`conflicts`] -- which existing intervals a candidate set collides with

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use crate::error::TypeError;

/// Timestamp resolution used for every interval endpoint (nanoseconds, UTC).
pub type Timestamp = DateTime<Utc>;

/// A half-open time range `[start, end)`.
///
/// Ordering is by `start`, then `end`.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "RawInterval")]
pub struct Interval {
    start: Timestamp,
    end: Timestamp,
}

#[derive(Deserialize)]
struct RawInterval {
    start: Timestamp,
    end: Timestamp,
}

impl TryFrom<RawInterval> for Interval {
    type Error = TypeError;

    fn try_from(raw: RawInterval) -> Result<Self, Self::Error> {
        Interval::new(raw.start, raw.end)
    }
}

impl Interval {
    /// Create an interval, rejecting empty (`start == end`) or inverted ranges.
    pub fn new(start: Timestamp, end: Timestamp) -> Result<Self, TypeError> {
        if start >= end {
            return Err(TypeError::EmptyInterval {
                start: format_timestamp(&start),
                end: format_timestamp(&end),
            });
        }
        Ok(Self { start, end })
    }

    /// Inclusive start.
    pub fn start(&self) -> Timestamp {
        self.start
    }

    /// Exclusive end.
    pub fn end(&self) -> Timestamp {
        self.end
    }

    /// Length of the interval.
    pub fn duration(&self) -> chrono::Duration {
        self.end - self.start
    }

    /// Whether `instant` lies inside `[start, end)`.
    pub fn contains_instant(&self, instant: &Timestamp) -> bool {
        self.start <= *instant && *instant < self.end
    }

    /// Whether this interval overlaps `other`.
    pub fn overlaps(&self, other: &Interval) -> bool {
        overlaps(self, other)
    }

    /// Whether this interval fully contains `other`.
    pub fn contains(&self, other: &Interval) -> bool {
        contains(self, other)
    }

    /// The common part of two intervals, if any.
    pub fn intersection(&self, other: &Interval) -> Option<Interval> {
        let start = self.start.max(other.start);
        let end = self.end.min(other.end);
        (start < end).then_some(Interval { start, end })
    }

    /// Parse the `start_end` form produced by [`Display`](fmt::Display).
    pub fn parse(s: &str) -> Result<Self, TypeError> {
        let (start, end) = s
            .trim()
            .split_once('_')
            .ok_or_else(|| TypeError::InvalidInterval(s.to_string()))?;
        Self::new(parse_timestamp(start)?, parse_timestamp(end)?)
    }
}

impl fmt::Debug for Interval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}, {})",
            format_timestamp(&self.start),
            format_timestamp(&self.end)
        )
    }
}

impl fmt::Display for Interval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}_{}",
            format_timestamp(&self.start),
            format_timestamp(&self.end)
        )
    }
}

impl FromStr for Interval {
    type Err = TypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// RFC3339 with as many fractional digits as the value needs.
pub fn format_timestamp(ts: &Timestamp) -> String {
    ts.to_rfc3339_opts(SecondsFormat::AutoSi, true)
}

/// Parse an RFC3339 timestamp (any offset) into UTC.
///
/// A bare date (`2010-01-01`) or a naive date-time (`2010-01-01T06:00:00`)
/// is read as UTC.
pub fn parse_timestamp(s: &str) -> Result<Timestamp, TypeError> {
    let trimmed = s.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(trimmed) {
        return Ok(dt.with_timezone(&Utc));
    }
    if let Ok(naive) = chrono::NaiveDateTime::parse_from_str(trimmed, "%Y-%m-%dT%H:%M:%S%.f") {
        return Ok(naive.and_utc());
    }
    chrono::NaiveDate::parse_from_str(trimmed, "%Y-%m-%d")
        .map(|d| d.and_time(chrono::NaiveTime::MIN).and_utc())
        .map_err(|e| TypeError::InvalidTimestamp(format!("{s}: {e}")))
}

/// True iff `a.start < b.end and b.start < a.end`.
pub fn overlaps(a: &Interval, b: &Interval) -> bool {
    a.start < b.end && b.start < a.end
}

/// True iff `a.start <= b.start and b.end <= a.end`.
pub fn contains(a: &Interval, b: &Interval) -> bool {
    a.start <= b.start && b.end <= a.end
}

/// Holes between consecutive entries of a covered set.
///
/// Nothing is reported before the first or after the last interval. Input
/// is sorted first, so the result does not depend on argument order.
pub fn gaps(covered: &[Interval]) -> Vec<Interval> {
    let mut sorted = covered.to_vec();
    sorted.sort();
    let mut out = Vec::new();
    let mut reach: Option<Timestamp> = None;
    for iv in sorted {
        if let Some(end) = reach {
            if end < iv.start {
                out.push(Interval {
                    start: end,
                    end: iv.start,
                });
            }
            reach = Some(end.max(iv.end));
        } else {
            reach = Some(iv.end);
        }
    }
    out
}

/// The three pieces of an existing interval cut around an incoming one.
///
/// A piece is `None` when it would be empty.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Split {
    /// Part of `existing` strictly before `incoming.start`.
    pub before: Option<Interval>,
    /// Part of `existing` covered by `incoming`.
    pub overlap: Option<Interval>,
    /// Part of `existing` at or after `incoming.end`.
    pub after: Option<Interval>,
}

impl Split {
    /// The pieces of `existing` that survive once the overlap is replaced.
    pub fn kept(&self) -> impl Iterator<Item = Interval> {
        [self.before, self.after].into_iter().flatten()
    }
}

/// Divide `existing` into the pieces before, inside and after `incoming`.
///
/// When the two do not overlap the whole of `existing` ends up in `before`
/// or `after`.
pub fn split_on_overlap(existing: &Interval, incoming: &Interval) -> Split {
    let before = (existing.start < incoming.start).then(|| Interval {
        start: existing.start,
        end: existing.end.min(incoming.start),
    });
    let after = (existing.end > incoming.end).then(|| Interval {
        start: existing.start.max(incoming.end),
        end: existing.end,
    });
    Split {
        before,
        overlap: existing.intersection(incoming),
        after,
    }
}

/// Sort and fuse adjacent or overlapping intervals into a minimal covering set.
pub fn merge(intervals: &[Interval]) -> Vec<Interval> {
    let mut sorted = intervals.to_vec();
    sorted.sort();
    let mut out: Vec<Interval> = Vec::with_capacity(sorted.len());
    for iv in sorted {
        match out.last_mut() {
            Some(last) if iv.start <= last.end => {
                last.end = last.end.max(iv.end);
            }
            _ => out.push(iv),
        }
    }
    out
}

/// Remove every part of `existing` covered by any interval in `removals`.
///
/// The result is sorted; pieces are not fused.
pub fn subtract(existing: &[Interval], removals: &[Interval]) -> Vec<Interval> {
    let mut remaining = existing.to_vec();
    for cut in removals {
        remaining = remaining
            .into_iter()
            .flat_map(|piece| split_on_overlap(&piece, cut).kept().collect::<Vec<_>>())
            .collect();
    }
    remaining.sort();
    remaining
}

/// Entries of `existing` that overlap at least one candidate.
pub fn conflicts(existing: &[Interval], candidates: &[Interval]) -> Vec<Interval> {
    existing
        .iter()
        .filter(|e| candidates.iter().any(|c| overlaps(e, c)))
        .copied()
        .collect()
}

/// Whether a set is sorted and pairwise non-overlapping.
pub fn is_disjoint_sorted(intervals: &[Interval]) -> bool {
    intervals
        .windows(2)
        .all(|w| w[0] < w[1] && w[0].end <= w[1].start)
}

/// Earliest start and latest end across a set.
pub fn covering(intervals: &[Interval]) -> Option<Interval> {
    let start = intervals.iter().map(|i| i.start).min()?;
    let end = intervals.iter().map(|i| i.end).max()?;
    Some(Interval { start, end })
}
