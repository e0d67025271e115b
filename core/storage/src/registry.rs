//! Store registry for resolving a key-value store by name.

use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::warn;

use crate::memory::MemoryStore;
use crate::store::KeyValueStore;
use strongbox_common::{Error, Result};

/// Factory function type for creating stores.
pub type StoreFactory = Box<dyn Fn(Value) -> Result<Arc<dyn KeyValueStore>> + Send + Sync>;

/// Registry for key-value store factories.
///
/// Allows the hosting environment to pick a store by name and
/// configuration.
pub struct StoreRegistry {
    factories: HashMap<String, StoreFactory>,
}

impl StoreRegistry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    /// Register a store factory.
    ///
    /// # Errors
    /// - `InvalidInput` if name is already registered
    pub fn register(&mut self, name: impl Into<String>, factory: StoreFactory) -> Result<()> {
        let name = name.into();
        if self.factories.contains_key(&name) {
            return Err(Error::InvalidInput(format!(
                "Store '{}' is already registered",
                name
            )));
        }
        self.factories.insert(name, factory);
        Ok(())
    }

    /// Resolve a store by name and configuration.
    ///
    /// # Errors
    /// - `Configuration` if the store is not registered
    /// - Whatever the factory reports for an invalid configuration
    pub fn resolve(&self, name: &str, config: Value) -> Result<Arc<dyn KeyValueStore>> {
        let factory = self.factories.get(name).ok_or_else(|| {
            Error::Configuration(format!("Store '{}' is not registered", name))
        })?;
        factory(config)
    }

    /// Resolve a store, degrading to an ephemeral [`MemoryStore`] when the
    /// durable store is unreachable.
    ///
    /// Only configuration failures degrade; any other error is returned.
    pub fn resolve_or_memory(&self, name: &str, config: Value) -> Result<Arc<dyn KeyValueStore>> {
        match self.resolve(name, config) {
            Ok(store) => Ok(store),
            Err(Error::Configuration(reason)) => {
                warn!(store = name, %reason, "Durable store unavailable, using in-memory store");
                Ok(Arc::new(MemoryStore::new()))
            }
            Err(e) => Err(e),
        }
    }

    /// Get list of registered store names.
    pub fn stores(&self) -> Vec<String> {
        let mut names: Vec<String> = self.factories.keys().cloned().collect();
        names.sort();
        names
    }

    /// Check if a store is registered.
    pub fn has_store(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }
}

impl Default for StoreRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Create a registry with the built-in stores.
///
/// - `memory`: ignores its configuration
/// - `local`: requires `{"root": "<directory>"}`
pub fn create_default_registry() -> StoreRegistry {
    let mut factories: HashMap<String, StoreFactory> = HashMap::new();

    factories.insert(
        "memory".to_string(),
        Box::new(|_config| Ok(Arc::new(MemoryStore::new()))),
    );

    factories.insert(
        "local".to_string(),
        Box::new(|config| {
            let root = config.get("root").and_then(|v| v.as_str()).ok_or_else(|| {
                Error::Configuration("Local store requires a 'root' path".to_string())
            })?;
            Ok(Arc::new(crate::local::LocalStore::new(root)?))
        }),
    );

    StoreRegistry { factories }
}
