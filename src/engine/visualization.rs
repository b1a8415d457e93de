//! Visualization definitions
//!
//! A visualization bundles the backend compute functions for whole-unit and
//! partial windows, a reducer, an optional final transform, and whether its
//! whole-unit results are cached. The capability set is validated once, when
//! the visualization is built.
//!
//! # Example
//!
//! ```rust
//! use windowed_analytics::engine::{ComputeRequest, VisualizationBuilder, WindowCompute};
//! use windowed_analytics::error::BackendError;
//! use windowed_analytics::reducers::CountReducer;
//! use windowed_analytics::types::WindowValue;
//! use async_trait::async_trait;
//! use serde_json::json;
//!
//! struct Zero;
//!
//! #[async_trait]
//! impl WindowCompute for Zero {
//!     async fn compute(&self, _: &ComputeRequest) -> Result<WindowValue, BackendError> {
//!         Ok(WindowValue::Plain(json!({"total": 0, "exact": 0, "children": 0})))
//!     }
//! }
//!
//! let count = VisualizationBuilder::new("count")
//!     .compute(Zero)
//!     .reducer(CountReducer)
//!     .cacheable(true)
//!     .build()
//!     .unwrap();
//!
//! assert!(count.capabilities().compute_partial);
//! assert!(count.is_cacheable());
//! ```

use super::traits::{Reducer, WindowCompute};
use crate::error::{Error, Result};
use crate::types::Window;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;

/// Final transform applied to a folded accumulator
pub type ValueTransform = Arc<dyn Fn(Value) -> Value + Send + Sync>;

/// What a visualization can do
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Capabilities {
    /// Can compute whole-unit windows
    pub compute_whole: bool,
    /// Can compute exact partial windows
    pub compute_partial: bool,
    /// Whole-unit results are read from and written to the cache
    pub cacheable: bool,
}

impl Capabilities {
    /// Check that every window shape has a way to be served
    pub fn validate(&self, name: &str) -> Result<()> {
        if !self.compute_whole && !self.compute_partial {
            return Err(Error::Configuration(format!(
                "Visualization [{}] has no compute function",
                name
            )));
        }
        if !self.compute_whole && !self.cacheable {
            return Err(Error::Configuration(format!(
                "Visualization [{}] can serve whole-unit windows neither from compute nor from cache",
                name
            )));
        }
        Ok(())
    }

    /// Whether a window of this shape can be served
    pub fn supports(&self, window: &Window) -> bool {
        if window.is_cacheable() {
            self.compute_whole || self.cacheable
        } else {
            self.compute_partial
        }
    }
}

/// A validated visualization
pub struct Visualization {
    name: String,
    whole: Option<Arc<dyn WindowCompute>>,
    partial: Option<Arc<dyn WindowCompute>>,
    reducer: Arc<dyn Reducer>,
    transform: Option<ValueTransform>,
    cacheable: bool,
}

impl Visualization {
    /// Registered name, also the cache type
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Capability set
    pub fn capabilities(&self) -> Capabilities {
        Capabilities {
            compute_whole: self.whole.is_some(),
            compute_partial: self.partial.is_some(),
            cacheable: self.cacheable,
        }
    }

    /// Whether whole-unit results use the cache
    pub fn is_cacheable(&self) -> bool {
        self.cacheable
    }

    /// Compute function for a window shape
    pub fn compute_for(&self, window: &Window) -> Option<&Arc<dyn WindowCompute>> {
        if window.is_cacheable() {
            self.whole.as_ref()
        } else {
            self.partial.as_ref()
        }
    }

    /// The reducer
    pub fn reducer(&self) -> &dyn Reducer {
        self.reducer.as_ref()
    }

    /// Apply the final transform, or return the accumulator unchanged
    pub fn finish(&self, acc: Value) -> Value {
        match &self.transform {
            Some(transform) => transform(acc),
            None => acc,
        }
    }
}

impl fmt::Debug for Visualization {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Visualization")
            .field("name", &self.name)
            .field("capabilities", &self.capabilities())
            .field("transform", &self.transform.is_some())
            .finish()
    }
}

/// Builder for [`Visualization`]
pub struct VisualizationBuilder {
    name: String,
    whole: Option<Arc<dyn WindowCompute>>,
    partial: Option<Arc<dyn WindowCompute>>,
    reducer: Option<Arc<dyn Reducer>>,
    transform: Option<ValueTransform>,
    cacheable: bool,
}

impl VisualizationBuilder {
    /// Start a visualization with the given name
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            whole: None,
            partial: None,
            reducer: None,
            transform: None,
            cacheable: false,
        }
    }

    /// Use one backend for both whole-unit and partial windows
    pub fn compute<C: WindowCompute>(mut self, compute: C) -> Self {
        let compute: Arc<dyn WindowCompute> = Arc::new(compute);
        self.whole = Some(compute.clone());
        self.partial = Some(compute);
        self
    }

    /// Backend for whole-unit windows
    pub fn compute_whole<C: WindowCompute>(mut self, compute: C) -> Self {
        self.whole = Some(Arc::new(compute));
        self
    }

    /// Backend for exact partial windows
    pub fn compute_partial<C: WindowCompute>(mut self, compute: C) -> Self {
        self.partial = Some(Arc::new(compute));
        self
    }

    /// Seed and combine functions
    pub fn reducer<R: Reducer>(mut self, reducer: R) -> Self {
        self.reducer = Some(Arc::new(reducer));
        self
    }

    /// Final transform applied after folding
    pub fn transform<F>(mut self, transform: F) -> Self
    where
        F: Fn(Value) -> Value + Send + Sync + 'static,
    {
        self.transform = Some(Arc::new(transform));
        self
    }

    /// Cache whole-unit results
    pub fn cacheable(mut self, cacheable: bool) -> Self {
        self.cacheable = cacheable;
        self
    }

    /// Validate and build
    pub fn build(self) -> Result<Visualization> {
        if self.name.is_empty() {
            return Err(Error::Configuration(
                "Visualization name cannot be empty".to_string(),
            ));
        }

        let reducer = self.reducer.ok_or_else(|| {
            Error::Configuration(format!("Visualization [{}] has no reducer", self.name))
        })?;

        let visualization = Visualization {
            name: self.name,
            whole: self.whole,
            partial: self.partial,
            reducer,
            transform: self.transform,
            cacheable: self.cacheable,
        };
        visualization
            .capabilities()
            .validate(visualization.name())?;

        Ok(visualization)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::traits::ComputeRequest;
    use crate::error::BackendError;
    use crate::reducers::CountReducer;
    use crate::types::WindowValue;
    use async_trait::async_trait;
    use chrono::NaiveDate;
    use serde_json::json;

    struct Nothing;

    #[async_trait]
    impl WindowCompute for Nothing {
        async fn compute(&self, _: &ComputeRequest) -> std::result::Result<WindowValue, BackendError> {
            Ok(WindowValue::Plain(Value::Null))
        }
    }

    fn feb() -> NaiveDate {
        NaiveDate::from_ymd_opt(2019, 2, 1).unwrap()
    }

    #[test]
    fn test_requires_reducer() {
        let err = VisualizationBuilder::new("count")
            .compute(Nothing)
            .build()
            .unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
    }

    #[test]
    fn test_requires_some_compute() {
        let err = VisualizationBuilder::new("count")
            .reducer(CountReducer)
            .cacheable(true)
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("no compute"));
    }

    #[test]
    fn test_whole_windows_need_compute_or_cache() {
        let err = VisualizationBuilder::new("partial-only")
            .compute_partial(Nothing)
            .reducer(CountReducer)
            .build()
            .unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));

        let ok = VisualizationBuilder::new("cache-backed")
            .compute_partial(Nothing)
            .reducer(CountReducer)
            .cacheable(true)
            .build()
            .unwrap();
        assert!(ok.capabilities().supports(&Window::whole(feb())));
        assert!(ok.compute_for(&Window::whole(feb())).is_none());
    }

    #[test]
    fn test_whole_only_rejects_partial_windows() {
        let viz = VisualizationBuilder::new("term")
            .compute_whole(Nothing)
            .reducer(CountReducer)
            .build()
            .unwrap();
        let partial = Window::exact(feb(), feb().succ_opt().unwrap());
        assert!(!viz.capabilities().supports(&partial));
        assert!(viz.compute_for(&partial).is_none());
        assert!(viz.compute_for(&Window::whole(feb())).is_some());
    }

    #[test]
    fn test_finish_applies_transform() {
        let plain = VisualizationBuilder::new("a")
            .compute(Nothing)
            .reducer(CountReducer)
            .build()
            .unwrap();
        assert_eq!(plain.finish(json!(3)), json!(3));

        let doubled = VisualizationBuilder::new("b")
            .compute(Nothing)
            .reducer(CountReducer)
            .transform(|v| json!(v.as_i64().unwrap_or(0) * 2))
            .build()
            .unwrap();
        assert_eq!(doubled.finish(json!(3)), json!(6));
    }
}
