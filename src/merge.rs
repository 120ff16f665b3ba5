//! Definition merging
//!
//! Flattens a definition against its ancestor chain. Results are cached by
//! the identity of the originating definition, but only for names the
//! container has committed to instantiating; speculative merges (type
//! inspection, scope queries) are computed fresh and never cached.

use crate::definition::{BeanDefinition, DefinitionId, MergedDefinition};
use crate::{DiError, Result};
use ahash::RandomState;
use dashmap::DashSet;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

#[cfg(feature = "logging")]
use tracing::trace;

/// Lookups the merger needs from the owning container.
pub trait ParentDefinitions {
    /// Resolve aliases for a parent reference.
    fn canonical_name(&self, name: &str) -> String;

    /// Merged definition of `name`, searching this container and then its
    /// ancestors.
    fn merged_including_ancestors(&self, name: &str) -> Result<Arc<MergedDefinition>>;

    /// Merged definition of `name` from the parent container only.
    fn merged_from_parent_container(&self, name: &str) -> Result<Arc<MergedDefinition>>;
}

/// Merge cache of one container.
pub struct DefinitionMerger {
    /// Guarded separately from singleton construction
    cache: Mutex<HashMap<DefinitionId, Arc<MergedDefinition>>>,
    /// Names the container has started to instantiate
    created: DashSet<String, RandomState>,
    cache_enabled: bool,
}

impl DefinitionMerger {
    pub fn new(cache_enabled: bool) -> Self {
        Self {
            cache: Mutex::new(HashMap::new()),
            created: DashSet::with_hasher(RandomState::new()),
            cache_enabled,
        }
    }

    /// Record that `name` is about to be instantiated.
    #[inline]
    pub fn mark_created(&self, name: &str) {
        if !self.created.contains(name) {
            self.created.insert(name.to_string());
        }
    }

    #[inline]
    pub fn is_created(&self, name: &str) -> bool {
        self.created.contains(name)
    }

    /// Merge a top-level or inner definition.
    ///
    /// `containing` is the merged definition of the outer bean for inner
    /// beans; an inner bean of a non-singleton is demoted to prototype and
    /// never cached.
    pub fn merge(
        &self,
        name: &str,
        definition: &BeanDefinition,
        containing: Option<&MergedDefinition>,
        parents: &dyn ParentDefinitions,
    ) -> Result<Arc<MergedDefinition>> {
        if containing.is_none() {
            if let Some(hit) = self.cache.lock().get(&definition.id()) {
                #[cfg(feature = "logging")]
                trace!(target: "bean_factory", bean = name, "Merged definition cache hit");
                return Ok(Arc::clone(hit));
            }
        }

        let mut merged = match definition.parent_name() {
            None => MergedDefinition::from_root(name, definition),
            Some(parent) => {
                let parent_name = parents.canonical_name(parent);
                let resolved = if parent_name != name {
                    parents.merged_including_ancestors(&parent_name)
                } else {
                    parents.merged_from_parent_container(&parent_name)
                };
                let parent_merged = resolved.map_err(|cause| DiError::InvalidDefinition {
                    name: name.to_string(),
                    reason: format!("could not resolve parent bean definition '{parent}'"),
                    source: Some(Box::new(cause)),
                })?;
                parent_merged.derive_child(name, definition)
            }
        };

        if let Some(outer) = containing {
            if !outer.is_singleton() && merged.is_singleton() {
                merged.demote_to_prototype();
            }
        }

        let merged = Arc::new(merged);
        if containing.is_none() && self.cache_enabled && self.is_created(name) {
            let mut cache = self.cache.lock();
            let winner = cache
                .entry(definition.id())
                .or_insert_with(|| Arc::clone(&merged));
            return Ok(Arc::clone(winner));
        }
        Ok(merged)
    }

    /// Drop the cached merge for a definition identity.
    pub fn evict(&self, id: DefinitionId) {
        self.cache.lock().remove(&id);
    }

    /// Forget that a name was instantiated (after redefinition).
    pub fn forget_created(&self, name: &str) {
        self.created.remove(name);
    }

    /// Number of cached merged definitions.
    pub fn cached_len(&self) -> usize {
        self.cache.lock().len()
    }

    pub fn clear(&self) {
        self.cache.lock().clear();
    }
}

impl std::fmt::Debug for DefinitionMerger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DefinitionMerger")
            .field("cached", &self.cached_len())
            .field("cache_enabled", &self.cache_enabled)
            .finish()
    }
}
