//! Definition storage for the container
//!
//! Uses DashMap for lock-free concurrent access to registered definitions.

use crate::definition::BeanDefinition;
use ahash::RandomState;
use dashmap::DashMap;
use std::sync::Arc;

/// Where the container reads bean definitions from.
///
/// Configuration readers populate a source; the container only ever asks
/// whether a name is defined and for the definition itself. Names passed
/// in are canonical (aliases already resolved).
pub trait DefinitionSource: Send + Sync {
    /// Whether a definition is registered under this exact name.
    fn contains_definition(&self, name: &str) -> bool;

    /// The definition registered under this exact name.
    fn definition(&self, name: &str) -> Option<Arc<BeanDefinition>>;

    /// All registered names, in no particular order.
    fn definition_names(&self) -> Vec<String>;
}

/// Thread-safe in-memory definition source.
///
/// Uses `DashMap` with `ahash`. Registration order is tracked separately so
/// eager singleton creation is deterministic.
pub struct DefinitionRegistry {
    /// Map from canonical name to definition
    definitions: DashMap<String, Arc<BeanDefinition>, RandomState>,
    /// Names in first-registration order
    order: parking_lot::Mutex<Vec<String>>,
}

impl DefinitionRegistry {
    /// Create new empty storage with optimized shard count.
    ///
    /// Uses 8 shards; default DashMap uses num_cpus * 4 shards which is
    /// overkill for typical containers with <50 definitions.
    #[inline]
    pub fn new() -> Self {
        Self::with_capacity(0)
    }

    /// Create with pre-allocated capacity, scaling shards with it.
    #[inline]
    pub fn with_capacity(capacity: usize) -> Self {
        let shard_amount = if capacity <= 16 {
            8
        } else if capacity <= 64 {
            16
        } else {
            32
        };
        Self {
            definitions: DashMap::with_capacity_and_hasher_and_shard_amount(
                capacity,
                RandomState::new(),
                shard_amount,
            ),
            order: parking_lot::Mutex::new(Vec::with_capacity(capacity)),
        }
    }

    /// Insert a definition, giving it a fresh identity.
    ///
    /// Returns the previous definition bound to the name, if any.
    pub fn insert(&self, name: &str, mut definition: BeanDefinition) -> Option<Arc<BeanDefinition>> {
        definition.reidentify();
        let previous = self.definitions.insert(name.to_string(), Arc::new(definition));
        if previous.is_none() {
            self.order.lock().push(name.to_string());
        }
        previous
    }

    /// Remove a definition
    pub fn remove(&self, name: &str) -> Option<Arc<BeanDefinition>> {
        let removed = self.definitions.remove(name).map(|(_, d)| d);
        if removed.is_some() {
            self.order.lock().retain(|n| n != name);
        }
        removed
    }

    /// Get number of registered definitions
    #[inline]
    pub fn len(&self) -> usize {
        self.definitions.len()
    }

    /// Check if empty
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.definitions.is_empty()
    }

    /// Clear all definitions
    pub fn clear(&self) {
        self.definitions.clear();
        self.order.lock().clear();
    }
}

impl DefinitionSource for DefinitionRegistry {
    #[inline]
    fn contains_definition(&self, name: &str) -> bool {
        self.definitions.contains_key(name)
    }

    #[inline]
    fn definition(&self, name: &str) -> Option<Arc<BeanDefinition>> {
        self.definitions.get(name).map(|d| Arc::clone(d.value()))
    }

    fn definition_names(&self) -> Vec<String> {
        self.order.lock().clone()
    }
}

impl Default for DefinitionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for DefinitionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DefinitionRegistry")
            .field("count", &self.len())
            .finish()
    }
}
