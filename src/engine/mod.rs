//! Query engine: visualizations, registry, group merging, and orchestration

pub mod group;
pub mod orchestrator;
pub mod registry;
pub mod traits;
pub mod visualization;

pub use group::GroupMerger;
pub use orchestrator::{OrchestratorStats, QueryOrchestrator, QueryOrchestratorBuilder};
pub use registry::VisualizationRegistry;
pub use traits::{BoundsSource, ComputeRequest, Reducer, StaticBounds, WindowCompute};
pub use visualization::{Capabilities, ValueTransform, Visualization, VisualizationBuilder};
