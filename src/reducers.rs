//! Built-in reducers
//!
//! Seed/combine pairs for the common visualization shapes:
//!
//! - [`CountReducer`]: field-wise numeric sum of count objects
//!   (`{"total", "exact", "children"}`)
//! - [`DistinctReducer`]: set union of ids, with a cardinality transform
//! - [`TermFrequencyReducer`]: per-term count sum
//!
//! All three are associative and tolerate duplicate input, so cached and
//! freshly computed windows can be mixed freely.

use crate::engine::Reducer;
use serde_json::{json, Map, Number, Value};
use std::collections::HashSet;

// ============================================================================
// Numeric helpers
// ============================================================================

fn add_numbers(a: &Value, b: &Value) -> Value {
    match (a.as_i64(), b.as_i64()) {
        (Some(x), Some(y)) => Value::Number(Number::from(x.saturating_add(y))),
        _ => {
            let sum = a.as_f64().unwrap_or(0.0) + b.as_f64().unwrap_or(0.0);
            Number::from_f64(sum).map(Value::Number).unwrap_or(Value::Null)
        },
    }
}

fn into_object(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}

// ============================================================================
// CountReducer
// ============================================================================

/// Sums count objects field by field
///
/// Fields missing on one side count as zero; non-numeric fields are dropped.
#[derive(Debug, Clone, Copy, Default)]
pub struct CountReducer;

impl Reducer for CountReducer {
    fn seed(&self) -> Value {
        json!({"total": 0, "exact": 0, "children": 0})
    }

    fn reduce(&self, acc: Value, value: Value) -> Value {
        if acc.is_number() && value.is_number() {
            return add_numbers(&acc, &value);
        }

        let mut acc = into_object(acc);
        for (field, v) in into_object(value) {
            if !v.is_number() {
                continue;
            }
            let current = acc.get(&field).cloned().unwrap_or(json!(0));
            acc.insert(field, add_numbers(&current, &v));
        }
        Value::Object(acc)
    }
}

// ============================================================================
// DistinctReducer
// ============================================================================

/// Union of id lists, preserving first-seen order
#[derive(Debug, Clone, Copy, Default)]
pub struct DistinctReducer;

impl DistinctReducer {
    /// Transform returning the number of distinct ids
    pub fn cardinality(acc: Value) -> Value {
        match acc {
            Value::Array(ids) => json!(ids.len()),
            _ => json!(0),
        }
    }
}

impl Reducer for DistinctReducer {
    fn seed(&self) -> Value {
        Value::Array(Vec::new())
    }

    fn reduce(&self, acc: Value, value: Value) -> Value {
        let mut ids = match acc {
            Value::Array(ids) => ids,
            _ => Vec::new(),
        };
        let mut seen: HashSet<String> = ids.iter().map(Value::to_string).collect();

        let incoming = match value {
            Value::Array(items) => items,
            Value::Null => Vec::new(),
            single => vec![single],
        };
        for id in incoming {
            if seen.insert(id.to_string()) {
                ids.push(id);
            }
        }
        Value::Array(ids)
    }
}

// ============================================================================
// TermFrequencyReducer
// ============================================================================

/// Sums counts per term
///
/// Window values may be a `term → count` object or a list of
/// `{"term", "count"}` rows; the accumulator is always an object.
#[derive(Debug, Clone, Copy, Default)]
pub struct TermFrequencyReducer;

impl Reducer for TermFrequencyReducer {
    fn seed(&self) -> Value {
        Value::Object(Map::new())
    }

    fn reduce(&self, acc: Value, value: Value) -> Value {
        let mut acc = into_object(acc);
        let mut add = |term: String, count: &Value| {
            let current = acc.get(&term).cloned().unwrap_or(json!(0));
            acc.insert(term, add_numbers(&current, count));
        };

        match value {
            Value::Object(terms) => {
                for (term, count) in terms {
                    add(term, &count);
                }
            },
            Value::Array(rows) => {
                for row in rows {
                    let term = match row.get("term") {
                        Some(Value::String(s)) => s.clone(),
                        Some(Value::Null) | None => continue,
                        Some(other) => other.to_string(),
                    };
                    add(term, row.get("count").unwrap_or(&json!(1)));
                }
            },
            _ => {},
        }
        Value::Object(acc)
    }
}
