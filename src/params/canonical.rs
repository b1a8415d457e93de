//! Filter canonicalization and cache-key hashing

use super::dates::parse_date;
use super::schema::FilterSchema;
use crate::timeline::TimeUnit;
use crate::types::DatasetBounds;
use chrono::NaiveDate;
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use tracing::debug;

/// Filter key holding the range start
pub const START_KEY: &str = "start";
/// Filter key holding the range end
pub const END_KEY: &str = "end";

const HASHER: crc::Crc<u64> = crc::Crc::<u64>::new(&crc::CRC_64_ECMA_182);

/// Hash a value's canonical JSON serialization
///
/// Maps serialize with sorted keys, so the result does not depend on
/// insertion order. Returns 16 lowercase hex digits.
pub fn canonical_hash<T: Serialize + ?Sized>(value: &T) -> String {
    let bytes = serde_json::to_vec(value).unwrap_or_default();
    format!("{:016x}", HASHER.checksum(&bytes))
}

/// Canonical parameter set resolved from a filter
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Params {
    values: BTreeMap<String, Value>,
    cache_key: String,
    fine_grain: bool,
}

impl Params {
    /// Resolve a raw filter against a schema
    pub fn resolve(filter: &Map<String, Value>, schema: &FilterSchema) -> Self {
        let mut values = BTreeMap::new();
        let mut keyed = BTreeMap::new();
        let mut fine_grain = false;

        for field in schema.fields() {
            let value = field.resolve(filter.get(&field.name));
            if field.fine_grain && is_set(&value) {
                fine_grain = true;
            }
            if field.cache_key {
                keyed.insert(field.name.clone(), value.clone());
            }
            values.insert(field.name.clone(), value);
        }

        Self {
            cache_key: canonical_hash(&keyed),
            values,
            fine_grain,
        }
    }

    /// Resolved value of a declared field
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.values.get(name)
    }

    /// All resolved values, keyed by field name
    pub fn values(&self) -> &BTreeMap<String, Value> {
        &self.values
    }

    /// Hash of the cache-key fields
    pub fn cache_key(&self) -> &str {
        &self.cache_key
    }

    /// Whether any fine-grain field is set
    pub fn fine_grain_active(&self) -> bool {
        self.fine_grain
    }
}

fn is_set(value: &Value) -> bool {
    !matches!(value, Value::Null | Value::Bool(false))
}

/// A filter resolved into parameters and a concrete date range
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedFilter {
    /// Canonical parameters
    pub params: Params,
    /// Range start, inclusive
    pub start: NaiveDate,
    /// Range end, inclusive
    pub end: NaiveDate,
}

/// Canonicalizes freeform filters against a declared schema
#[derive(Debug, Clone, Default)]
pub struct ParamCanonicalizer {
    schema: FilterSchema,
}

impl ParamCanonicalizer {
    /// Create a canonicalizer for a schema
    pub fn new(schema: FilterSchema) -> Self {
        Self { schema }
    }

    /// The declared schema
    pub fn schema(&self) -> &FilterSchema {
        &self.schema
    }

    /// Resolve a filter
    ///
    /// Missing or malformed `start`/`end` fall back to the dataset bounds,
    /// aligned outward to `unit`.
    pub fn canonicalize(
        &self,
        filter: &Map<String, Value>,
        bounds: &DatasetBounds,
        unit: TimeUnit,
    ) -> ResolvedFilter {
        let start = resolve_date(filter, START_KEY)
            .unwrap_or_else(|| unit.start_of(bounds.min));
        let end = resolve_date(filter, END_KEY).unwrap_or_else(|| unit.end_of(bounds.max));

        ResolvedFilter {
            params: Params::resolve(filter, &self.schema),
            start,
            end,
        }
    }
}

fn resolve_date(filter: &Map<String, Value>, key: &str) -> Option<NaiveDate> {
    let raw = filter.get(key)?;
    if raw.is_null() {
        return None;
    }
    let parsed = parse_date(raw);
    if parsed.is_none() {
        debug!(key, value = %raw, "Ignoring unparseable filter date");
    }
    parsed
}
