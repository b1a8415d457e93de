//! Declared filter schema
//!
//! The schema is the only thing that decides which filter keys are read. Keys
//! outside it are ignored, and missing or null values fall back to the field
//! default.

use serde_json::Value;
use std::fmt;
use std::sync::Arc;

/// Per-field value transform applied to supplied (non-null) values
pub type FieldTransform = Arc<dyn Fn(Value) -> Value + Send + Sync>;

/// One declared filter field
#[derive(Clone)]
pub struct FilterField {
    /// Filter key
    pub name: String,
    /// Value used when the key is absent or null
    pub default: Value,
    /// Transform applied to supplied values
    pub transform: Option<FieldTransform>,
    /// Whether the resolved value contributes to the cache key
    pub cache_key: bool,
    /// Whether a set value forces per-record counting in the backend
    pub fine_grain: bool,
}

impl FilterField {
    /// Declare a field defaulting to `null` that participates in the cache key
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            default: Value::Null,
            transform: None,
            cache_key: true,
            fine_grain: false,
        }
    }

    /// Set the default value
    pub fn default_value(mut self, value: Value) -> Self {
        self.default = value;
        self
    }

    /// Set the transform applied to supplied values
    pub fn transform<F>(mut self, f: F) -> Self
    where
        F: Fn(Value) -> Value + Send + Sync + 'static,
    {
        self.transform = Some(Arc::new(f));
        self
    }

    /// Keep this field out of the cache key
    pub fn exclude_from_cache_key(mut self) -> Self {
        self.cache_key = false;
        self
    }

    /// Mark this field as requiring fine-grained (per-record) computation
    pub fn fine_grain(mut self) -> Self {
        self.fine_grain = true;
        self
    }

    /// Resolve a raw value against this field
    pub fn resolve(&self, raw: Option<&Value>) -> Value {
        match raw {
            None | Some(Value::Null) => self.default.clone(),
            Some(v) => match &self.transform {
                Some(t) => t(v.clone()),
                None => v.clone(),
            },
        }
    }
}

impl fmt::Debug for FilterField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FilterField")
            .field("name", &self.name)
            .field("default", &self.default)
            .field("transform", &self.transform.is_some())
            .field("cache_key", &self.cache_key)
            .field("fine_grain", &self.fine_grain)
            .finish()
    }
}

/// Ordered list of declared filter fields
#[derive(Debug, Clone, Default)]
pub struct FilterSchema {
    fields: Vec<FilterField>,
}

impl FilterSchema {
    /// Create an empty schema
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a field; a later field with the same name replaces the earlier one
    pub fn field(mut self, field: FilterField) -> Self {
        self.fields.retain(|f| f.name != field.name);
        self.fields.push(field);
        self
    }

    /// Declared fields in declaration order
    pub fn fields(&self) -> &[FilterField] {
        &self.fields
    }

    /// Look up a field by name
    pub fn get(&self, name: &str) -> Option<&FilterField> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Number of declared fields
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Whether no fields are declared
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

/// Stock transforms for common filter shapes
pub mod transforms {
    use super::FieldTransform;
    use serde_json::Value;
    use std::sync::Arc;

    /// Render scalars as strings (ids often arrive as numbers or strings)
    pub fn to_string() -> FieldTransform {
        Arc::new(|v| match v {
            Value::String(_) => v,
            Value::Number(n) => Value::String(n.to_string()),
            Value::Bool(b) => Value::String(b.to_string()),
            other => other,
        })
    }

    /// Lowercase string values
    pub fn to_lowercase() -> FieldTransform {
        Arc::new(|v| match v {
            Value::String(s) => Value::String(s.to_lowercase()),
            other => other,
        })
    }

    /// Coerce common truthy spellings to a boolean
    pub fn to_bool() -> FieldTransform {
        Arc::new(|v| match v {
            Value::Bool(_) => v,
            Value::Number(n) => Value::Bool(n.as_f64().map_or(false, |x| x != 0.0)),
            Value::String(s) => Value::Bool(matches!(
                s.trim().to_ascii_lowercase().as_str(),
                "true" | "1" | "yes" | "on"
            )),
            _ => Value::Bool(false),
        })
    }

    /// Accept a single value or a list, always producing a list of strings
    pub fn to_string_list() -> FieldTransform {
        let scalar = to_string();
        Arc::new(move |v| match v {
            Value::Array(items) => Value::Array(items.into_iter().map(|i| scalar(i)).collect()),
            other => Value::Array(vec![scalar(other)]),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_resolve_defaults_on_missing_and_null() {
        let field = FilterField::new("type").default_value(json!("inferred"));
        assert_eq!(field.resolve(None), json!("inferred"));
        assert_eq!(field.resolve(Some(&Value::Null)), json!("inferred"));
        assert_eq!(field.resolve(Some(&json!("stated"))), json!("stated"));
    }

    #[test]
    fn test_resolve_applies_transform() {
        let field = FilterField::new("sexo").transform(|v| match v {
            Value::String(s) => Value::String(s.to_uppercase()),
            other => other,
        });
        assert_eq!(field.resolve(Some(&json!("f"))), json!("F"));
        // Defaults bypass the transform
        assert_eq!(field.resolve(None), Value::Null);
    }

    #[test]
    fn test_schema_replaces_duplicate_names() {
        let schema = FilterSchema::new()
            .field(FilterField::new("a").default_value(json!(1)))
            .field(FilterField::new("b"))
            .field(FilterField::new("a").default_value(json!(2)));
        assert_eq!(schema.len(), 2);
        assert_eq!(schema.get("a").unwrap().default, json!(2));
        assert_eq!(schema.fields()[0].name, "b");
    }

    #[test]
    fn test_stock_transforms() {
        assert_eq!(transforms::to_string()(json!(42)), json!("42"));
        assert_eq!(transforms::to_lowercase()(json!("ABC")), json!("abc"));
        assert_eq!(transforms::to_bool()(json!("Yes")), json!(true));
        assert_eq!(transforms::to_bool()(json!(0)), json!(false));
        assert_eq!(transforms::to_string_list()(json!(7)), json!(["7"]));
        assert_eq!(
            transforms::to_string_list()(json!(["a", 1])),
            json!(["a", "1"])
        );
    }
}
