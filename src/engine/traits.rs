//! Trait seams between the orchestrator and its collaborators

use crate::error::BackendError;
use crate::params::Params;
use crate::types::{DatasetBounds, Window, WindowValue};
use async_trait::async_trait;
use chrono::NaiveDate;
use serde_json::Value;
use std::sync::Arc;

// =============================================================================
// WindowCompute Trait
// =============================================================================

/// Everything a backend needs to compute one (concept, window) value
#[derive(Debug, Clone)]
pub struct ComputeRequest {
    /// Concept id with any self-only marker stripped
    pub concept_id: String,
    /// Whether descendants of the concept are excluded
    pub self_only: bool,
    /// The window being computed
    pub window: Window,
    /// Last date covered by `window`, inclusive
    pub window_end: NaiveDate,
    /// Canonical request parameters
    pub params: Arc<Params>,
    /// Grouping dimensions, when grouping is requested
    pub group_dims: Option<Arc<[String]>>,
}

impl ComputeRequest {
    /// Whether the backend must return grouped buckets
    pub fn is_grouped(&self) -> bool {
        self.group_dims.is_some()
    }
}

/// Core trait for per-window compute backends
#[async_trait]
pub trait WindowCompute: Send + Sync + 'static {
    /// Compute the value of one concept over one window
    ///
    /// Must return [`WindowValue::Grouped`] when the request carries grouping
    /// dimensions and [`WindowValue::Plain`] otherwise.
    async fn compute(&self, request: &ComputeRequest) -> Result<WindowValue, BackendError>;
}

#[async_trait]
impl<T: WindowCompute + ?Sized> WindowCompute for Arc<T> {
    async fn compute(&self, request: &ComputeRequest) -> Result<WindowValue, BackendError> {
        (**self).compute(request).await
    }
}

// =============================================================================
// Reducer Trait
// =============================================================================

/// Associative combiner folding per-window values into a concept value
///
/// `reduce` must tolerate being applied to values in window order with
/// `seed()` as the left-most accumulator.
pub trait Reducer: Send + Sync + 'static {
    /// Identity accumulator
    fn seed(&self) -> Value;

    /// Combine an accumulator with the next window value
    fn reduce(&self, acc: Value, value: Value) -> Value;
}

// =============================================================================
// BoundsSource Trait
// =============================================================================

/// Source of the dataset-wide date range
#[async_trait]
pub trait BoundsSource: Send + Sync + 'static {
    /// Fetch the earliest and latest dates present in the dataset
    async fn fetch_bounds(&self) -> Result<DatasetBounds, BackendError>;
}

/// Bounds source returning a fixed range
#[derive(Debug, Clone, Copy)]
pub struct StaticBounds(pub DatasetBounds);

#[async_trait]
impl BoundsSource for StaticBounds {
    async fn fetch_bounds(&self) -> Result<DatasetBounds, BackendError> {
        Ok(self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_static_bounds() {
        let bounds = DatasetBounds::new(
            NaiveDate::from_ymd_opt(2020, 1, 1).unwrap(),
            NaiveDate::from_ymd_opt(2020, 12, 31).unwrap(),
        );
        assert_eq!(StaticBounds(bounds).fetch_bounds().await.unwrap(), bounds);
    }
}
