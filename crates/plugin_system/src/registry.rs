//! Static plugin registry.
//!
//! Bound once at process start; lookups afterwards need no locking.

use crate::definition::{Plugin, PluginDefinition};
use std::collections::HashMap;
use std::sync::Arc;

/// Immutable map from plugin type id to its implementation.
pub struct PluginRegistry {
    plugins: HashMap<&'static str, Arc<dyn Plugin>>,
}

impl PluginRegistry {
    pub fn builder() -> PluginRegistryBuilder {
        PluginRegistryBuilder {
            plugins: HashMap::new(),
        }
    }

    /// The plugin registered under a type id.
    pub fn get(&self, plugin_type_id: &str) -> Option<Arc<dyn Plugin>> {
        self.plugins.get(plugin_type_id).cloned()
    }

    /// Definitions of every registered plugin, sorted by type id.
    pub fn definitions(&self) -> Vec<PluginDefinition> {
        let mut definitions: Vec<_> =
            self.plugins.values().map(|p| p.definition()).collect();
        definitions.sort_by_key(|d| d.id);
        definitions
    }

    pub fn len(&self) -> usize {
        self.plugins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.plugins.is_empty()
    }
}

impl std::fmt::Debug for PluginRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginRegistry")
            .field("plugins", &self.plugins.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Builder collecting registrations before the registry is frozen.
pub struct PluginRegistryBuilder {
    plugins: HashMap<&'static str, Arc<dyn Plugin>>,
}

impl PluginRegistryBuilder {
    /// Registers a plugin under its definition's type id.
    ///
    /// Later registrations of the same id replace earlier ones; startup
    /// wiring is expected to register each plugin exactly once.
    pub fn register(mut self, plugin: Arc<dyn Plugin>) -> Self {
        self.plugins.insert(plugin.definition().id, plugin);
        self
    }

    pub fn build(self) -> PluginRegistry {
        PluginRegistry {
            plugins: self.plugins,
        }
    }
}
