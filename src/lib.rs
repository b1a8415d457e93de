//! Windowed Analytics - cache-aware orchestration of time-windowed aggregate queries
//!
//! This library answers "aggregate of records matching concept X over
//! `[start, end]`, optionally grouped by some dimensions" by:
//! - Splitting the range into calendar-aligned windows
//! - Serving whole-unit windows from a cache keyed by canonical parameters
//! - Computing everything else through pluggable backends, concurrently
//! - Folding per-window values with a visualization's reducer
//!
//! # Example
//!
//! ```rust
//! use windowed_analytics::engine::{
//!     ComputeRequest, QueryOrchestrator, VisualizationBuilder, VisualizationRegistry,
//!     WindowCompute,
//! };
//! use windowed_analytics::error::BackendError;
//! use windowed_analytics::reducers::CountReducer;
//! use windowed_analytics::types::WindowValue;
//! use async_trait::async_trait;
//! use serde_json::json;
//!
//! struct OnePerWindow;
//!
//! #[async_trait]
//! impl WindowCompute for OnePerWindow {
//!     async fn compute(&self, _: &ComputeRequest) -> Result<WindowValue, BackendError> {
//!         Ok(WindowValue::Plain(json!({"total": 1, "exact": 1, "children": 0})))
//!     }
//! }
//!
//! # #[tokio::main]
//! # async fn main() -> windowed_analytics::Result<()> {
//! let registry = VisualizationRegistry::new().with(
//!     VisualizationBuilder::new("count")
//!         .compute(OnePerWindow)
//!         .reducer(CountReducer)
//!         .cacheable(true)
//!         .build()?,
//! )?;
//!
//! let engine = QueryOrchestrator::builder()
//!     .with_registry(registry)
//!     .build()
//!     .await?;
//!
//! let filter = json!({"start": "2019-01-15", "end": "2019-03-10"});
//! let result = engine
//!     .execute_query("count", &["73211002".to_string()], filter.as_object().unwrap(), None)
//!     .await?;
//!
//! // Three windows: Jan 15..31, February, Mar 1..10
//! assert_eq!(result["73211002"].as_plain().unwrap()["total"], 3);
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod params;
pub mod reducers;
pub mod timeline;
pub mod types;

/// Window value caching
pub mod cache;

/// Redis cache backend with key expiry
pub mod redis;

/// Visualizations, registry, and the query orchestrator
pub mod engine;

/// Prometheus metrics and telemetry
pub mod metrics;

/// Configuration management with TOML support
pub mod config;

/// Tracing subscriber setup
pub mod logging;

// Re-export main types
pub use engine::{QueryOrchestrator, QueryOrchestratorBuilder, VisualizationBuilder};
pub use error::{Error, Result};
pub use types::{ConceptResult, QueryResult, Window};
