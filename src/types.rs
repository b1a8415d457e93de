//! Core data types shared by the splitter, cache, and orchestrator
//!
//! # Key Types
//!
//! - **`Window`**: a contiguous span of calendar dates queried as one unit of computation
//! - **`DatasetBounds`**: the dataset-wide date range used when a request omits a bound
//! - **`ConceptRef`**: a parsed concept token, with the self-only marker split off
//! - **`GroupKey` / `GroupResult`**: one bucket of a grouped aggregation
//! - **`WindowValue` / `ConceptResult`**: per-window and final per-concept values
//!
//! # Example
//!
//! ```rust
//! use windowed_analytics::types::{ConceptRef, Window};
//! use chrono::NaiveDate;
//!
//! let feb = NaiveDate::from_ymd_opt(2019, 2, 1).unwrap();
//! let window = Window::whole(feb);
//! assert!(window.is_cacheable());
//!
//! let concept = ConceptRef::parse("!44054006");
//! assert_eq!(concept.id, "44054006");
//! assert!(concept.self_only);
//! ```

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::fmt;

/// Marker prefix on a concept token meaning "the concept itself, without descendants"
pub const SELF_ONLY_MARKER: char = '!';

/// A contiguous span of dates computed as a single unit
///
/// `end` is `None` when the window covers exactly one whole [`TimeUnit`]
/// instance starting at `start`; such windows are cacheable and identified by
/// `start` alone. A window with `end` set is an exact partial span (both
/// bounds inclusive) and is always computed live.
///
/// [`TimeUnit`]: crate::timeline::TimeUnit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Window {
    /// First date covered
    pub start: NaiveDate,
    /// Last date covered, for partial windows
    pub end: Option<NaiveDate>,
}

impl Window {
    /// A cacheable window covering the whole unit starting at `start`
    pub fn whole(start: NaiveDate) -> Self {
        Self { start, end: None }
    }

    /// An exact window covering `start..=end`
    pub fn exact(start: NaiveDate, end: NaiveDate) -> Self {
        Self {
            start,
            end: Some(end),
        }
    }

    /// Whether this window may be read from or written to the cache
    pub fn is_cacheable(&self) -> bool {
        self.end.is_none()
    }

    /// Short label used in logs and metrics
    pub fn kind(&self) -> &'static str {
        if self.is_cacheable() {
            "whole"
        } else {
            "partial"
        }
    }
}

impl fmt::Display for Window {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.end {
            Some(end) => write!(f, "{}..{}", self.start, end),
            None => write!(f, "{}", self.start),
        }
    }
}

/// Dataset-wide date range used as the default request range
///
/// Held by the orchestrator for the life of the process and replaced only by an
/// explicit refresh; it may go stale until then.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatasetBounds {
    /// Earliest date, aligned to the start of its unit
    pub min: NaiveDate,
    /// Latest date, aligned to the end of its unit
    pub max: NaiveDate,
}

impl DatasetBounds {
    /// Create bounds from raw dates
    pub fn new(min: NaiveDate, max: NaiveDate) -> Self {
        Self { min, max }
    }
}

/// A concept token as received in a request
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConceptRef {
    /// The token exactly as supplied, marker included
    ///
    /// Used as the cache concept id so self-only and descendant-inclusive
    /// results never share entries.
    pub token: String,
    /// The concept id with the marker stripped
    pub id: String,
    /// Whether descendants are excluded
    pub self_only: bool,
}

impl ConceptRef {
    /// Parse a concept token, splitting off a leading self-only marker
    pub fn parse(token: &str) -> Self {
        match token.strip_prefix(SELF_ONLY_MARKER) {
            Some(id) => Self {
                token: token.to_string(),
                id: id.to_string(),
                self_only: true,
            },
            None => Self {
                token: token.to_string(),
                id: token.to_string(),
                self_only: false,
            },
        }
    }
}

/// Canonical group key: dimension name → bucket value
///
/// Backed by a `BTreeMap` so serialization is independent of the order in
/// which a backend emitted the dimensions.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GroupKey(pub BTreeMap<String, Value>);

impl GroupKey {
    /// Build a key from `(dimension, value)` pairs
    pub fn from_pairs<I, K>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, Value)>,
        K: Into<String>,
    {
        Self(pairs.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }

    /// Whether the key has no dimensions
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// One bucket of a grouped aggregation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupResult {
    /// Bucket identity
    pub key: GroupKey,
    /// Display labels for the bucket, keyed like `key`
    pub label: GroupKey,
    /// Merge identity, derived from `key`
    pub hash_id: String,
    /// Aggregated value for the bucket
    pub value: Value,
}

impl GroupResult {
    /// Create a bucket, deriving its merge identity from `key`
    pub fn new(key: GroupKey, label: GroupKey, value: Value) -> Self {
        let hash_id = crate::params::canonical_hash(&key);
        Self {
            key,
            label,
            hash_id,
            value,
        }
    }

    /// The placeholder bucket emitted when a grouped concept has no rows
    pub fn placeholder(value: Value) -> Self {
        Self {
            key: GroupKey::default(),
            label: GroupKey::default(),
            hash_id: String::new(),
            value,
        }
    }
}

/// Output of a single compute call
#[derive(Debug, Clone, PartialEq)]
pub enum WindowValue {
    /// Opaque value folded with the visualization's reducer
    Plain(Value),
    /// Grouped buckets merged by hash id
    Grouped(Vec<GroupResult>),
}

impl WindowValue {
    /// Shape name used in error messages
    pub fn shape(&self) -> &'static str {
        match self {
            WindowValue::Plain(_) => "plain",
            WindowValue::Grouped(_) => "grouped",
        }
    }
}

/// Final value for one concept
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ConceptResult {
    /// Folded and transformed accumulator
    Plain(Value),
    /// Merged buckets, each transformed
    Grouped(Vec<GroupResult>),
}

impl ConceptResult {
    /// The plain value, if this result is ungrouped
    pub fn as_plain(&self) -> Option<&Value> {
        match self {
            ConceptResult::Plain(v) => Some(v),
            ConceptResult::Grouped(_) => None,
        }
    }

    /// The buckets, if this result is grouped
    pub fn as_grouped(&self) -> Option<&[GroupResult]> {
        match self {
            ConceptResult::Plain(_) => None,
            ConceptResult::Grouped(g) => Some(g),
        }
    }
}

/// Result of a query: stripped concept id → value
pub type QueryResult = HashMap<String, ConceptResult>;

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_window_kinds() {
        let whole = Window::whole(date(2019, 2, 1));
        assert!(whole.is_cacheable());
        assert_eq!(whole.kind(), "whole");
        assert_eq!(whole.to_string(), "2019-02-01");

        let exact = Window::exact(date(2019, 1, 15), date(2019, 1, 31));
        assert!(!exact.is_cacheable());
        assert_eq!(exact.to_string(), "2019-01-15..2019-01-31");
    }

    #[test]
    fn test_concept_parse() {
        let plain = ConceptRef::parse("73211002");
        assert_eq!(plain.id, "73211002");
        assert_eq!(plain.token, "73211002");
        assert!(!plain.self_only);

        let own = ConceptRef::parse("!44054006");
        assert_eq!(own.id, "44054006");
        assert_eq!(own.token, "!44054006");
        assert!(own.self_only);
    }

    #[test]
    fn test_group_hash_ignores_dimension_order() {
        let a = GroupResult::new(
            GroupKey::from_pairs([("sexo", json!("F")), ("decada", json!(3))]),
            GroupKey::default(),
            json!(1),
        );
        let b = GroupResult::new(
            GroupKey::from_pairs([("decada", json!(3)), ("sexo", json!("F"))]),
            GroupKey::default(),
            json!(2),
        );
        assert_eq!(a.hash_id, b.hash_id);
        assert_eq!(a.hash_id.len(), 16);
    }

    #[test]
    fn test_placeholder_is_empty() {
        let p = GroupResult::placeholder(json!(0));
        assert!(p.key.is_empty());
        assert!(p.hash_id.is_empty());
    }

    #[test]
    fn test_concept_result_serializes_untagged() {
        let plain = ConceptResult::Plain(json!({"total": 3}));
        assert_eq!(serde_json::to_value(&plain).unwrap(), json!({"total": 3}));
    }
}
