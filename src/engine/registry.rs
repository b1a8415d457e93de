//! Name → visualization registry

use super::visualization::Visualization;
use crate::error::{Error, Result};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::info;

/// Registered visualizations, keyed by name
#[derive(Debug, Default)]
pub struct VisualizationRegistry {
    entries: HashMap<String, Arc<Visualization>>,
}

impl VisualizationRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a visualization
    ///
    /// Fails if the name is taken or the capability set cannot serve every
    /// window shape.
    pub fn register(&mut self, visualization: Visualization) -> Result<()> {
        let name = visualization.name().to_string();
        if name.contains(':') {
            return Err(Error::Configuration(format!(
                "Visualization name [{}] cannot contain ':'",
                name
            )));
        }
        if self.entries.contains_key(&name) {
            return Err(Error::Configuration(format!(
                "Visualization [{}] is already registered",
                name
            )));
        }

        let capabilities = visualization.capabilities();
        capabilities.validate(&name)?;

        info!(
            visualization = %name,
            compute_whole = capabilities.compute_whole,
            compute_partial = capabilities.compute_partial,
            cacheable = capabilities.cacheable,
            "Registered visualization"
        );
        self.entries.insert(name, Arc::new(visualization));
        Ok(())
    }

    /// Builder-style registration
    pub fn with(mut self, visualization: Visualization) -> Result<Self> {
        self.register(visualization)?;
        Ok(self)
    }

    /// Look up a visualization by name
    pub fn get(&self, name: &str) -> Result<Arc<Visualization>> {
        self.entries
            .get(name)
            .cloned()
            .ok_or_else(|| Error::UnknownVisualization(name.to_string()))
    }

    /// Registered names, sorted
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.entries.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Number of registered visualizations
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether nothing is registered
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
