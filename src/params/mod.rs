//! Filter canonicalization
//!
//! Turns a freeform request filter into a declared parameter set, a stable
//! cache key, and a concrete date range.
//!
//! # Example
//!
//! ```rust
//! use windowed_analytics::params::{FilterField, FilterSchema, ParamCanonicalizer};
//! use windowed_analytics::timeline::TimeUnit;
//! use windowed_analytics::types::DatasetBounds;
//! use chrono::NaiveDate;
//! use serde_json::json;
//!
//! let schema = FilterSchema::new().field(FilterField::new("type").default_value(json!("stated")));
//! let canon = ParamCanonicalizer::new(schema);
//! let bounds = DatasetBounds::new(
//!     NaiveDate::from_ymd_opt(2018, 1, 1).unwrap(),
//!     NaiveDate::from_ymd_opt(2019, 8, 31).unwrap(),
//! );
//!
//! let filter = json!({"start": "2019-01-15", "ignored": true});
//! let resolved = canon.canonicalize(filter.as_object().unwrap(), &bounds, TimeUnit::Month);
//! assert_eq!(resolved.params.get("type"), Some(&json!("stated")));
//! ```

pub mod canonical;
pub mod dates;
pub mod schema;

pub use canonical::{canonical_hash, ParamCanonicalizer, Params, ResolvedFilter, END_KEY, START_KEY};
pub use dates::parse_date;
pub use schema::{transforms, FieldTransform, FilterField, FilterSchema};
