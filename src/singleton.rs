//! Singleton registry
//!
//! Finished singletons live in a `DashMap` and are read without locking.
//! Construction is serialized per name through a [`BuildGate`]: a second
//! thread asking for a singleton that is being built waits for it, while
//! lookups of other names carry on. Early references, registration order
//! and the shutdown flag sit behind a short-held mutex that is never kept
//! across bean code.

use crate::factory::BeanInstance;
use crate::gate::{BuildGate, Building, Claim};
use crate::{DiError, Result};
use ahash::RandomState;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::HashMap;

#[cfg(feature = "logging")]
use tracing::{debug, trace};

/// Supplier of an early reference to a singleton still being built.
pub type EarlySupplier = Box<dyn FnOnce() -> Result<BeanInstance> + Send>;

enum EarlyReference {
    /// Registered at allocation time, not requested yet
    Pending(EarlySupplier),
    /// Handed out to at least one dependent
    Ready(BeanInstance),
}

#[derive(Default)]
struct RegistryState {
    early: HashMap<String, EarlyReference>,
    /// Names in registration order, for shutdown
    order: Vec<String>,
    destroying: bool,
}

/// Single-instance cache of one container.
pub struct SingletonRegistry {
    objects: DashMap<String, BeanInstance, RandomState>,
    building: BuildGate,
    state: Mutex<RegistryState>,
}

impl SingletonRegistry {
    pub fn new() -> Self {
        Self::with_capacity(0)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let shard_amount = if capacity <= 16 { 8 } else { 16 };
        Self {
            objects: DashMap::with_capacity_and_hasher_and_shard_amount(
                capacity,
                RandomState::new(),
                shard_amount,
            ),
            building: BuildGate::new(),
            state: Mutex::new(RegistryState::default()),
        }
    }

    #[inline]
    fn cached(&self, name: &str) -> Option<BeanInstance> {
        self.objects.get(name).map(|found| found.value().clone())
    }

    /// Look up a singleton.
    ///
    /// With `allow_early`, a singleton being built by another thread is
    /// waited for; one in creation on this thread yields its early
    /// reference, materializing a pending supplier on first request.
    pub fn get(&self, name: &str, allow_early: bool) -> Result<Option<BeanInstance>> {
        if let Some(found) = self.cached(name) {
            #[cfg(feature = "logging")]
            trace!(target: "bean_factory", bean = name, "Singleton cache hit");
            return Ok(Some(found));
        }
        if !allow_early {
            return Ok(None);
        }

        // Only names in creation touch the gate at all
        if self.building.wait_for(name) == Building::Nobody {
            return Ok(self.cached(name));
        }
        if let Some(found) = self.cached(name) {
            return Ok(Some(found));
        }

        let supplier = {
            let mut state = self.state.lock();
            match state.early.remove(name) {
                Some(EarlyReference::Ready(instance)) => {
                    state
                        .early
                        .insert(name.to_string(), EarlyReference::Ready(instance.clone()));
                    return Ok(Some(instance));
                }
                Some(EarlyReference::Pending(supplier)) => supplier,
                None => return Ok(None),
            }
        };

        // The supplier may run hooks that look up other beans
        let instance = supplier()?;

        #[cfg(feature = "logging")]
        debug!(
            target: "bean_factory",
            bean = name,
            "Exposing early reference to singleton in creation"
        );

        let mut state = self.state.lock();
        if let Some(EarlyReference::Ready(existing)) = state.early.get(name) {
            return Ok(Some(existing.clone()));
        }
        if self.building.is_building(name) {
            state
                .early
                .insert(name.to_string(), EarlyReference::Ready(instance.clone()));
        }
        Ok(Some(instance))
    }

    /// Return the singleton, creating it with `create` if absent.
    ///
    /// Only callers asking for the same name wait for a build in progress.
    /// Any early reference left behind by a failed build is discarded.
    pub fn get_or_create<F>(&self, name: &str, create: F) -> Result<BeanInstance>
    where
        F: FnOnce() -> Result<BeanInstance>,
    {
        let _owner = loop {
            if let Some(found) = self.cached(name) {
                return Ok(found);
            }
            match self.building.claim(name, || self.objects.contains_key(name)) {
                Claim::Owner(guard) => break guard,
                Claim::Finished => continue,
                Claim::Reentrant => {
                    return Err(DiError::in_creation(
                        name,
                        "requested while its construction is in progress and no early reference \
                         is available; is there a depends-on cycle?",
                    ));
                }
                Claim::WouldDeadlock => {
                    return Err(DiError::in_creation(
                        name,
                        "being built by another thread that is waiting on a bean this thread is building",
                    ));
                }
            }
        };

        if self.state.lock().destroying {
            return Err(DiError::DestroyInProgress {
                name: name.to_string(),
            });
        }

        #[cfg(feature = "logging")]
        debug!(target: "bean_factory", bean = name, "Creating shared instance of singleton");

        let result = create();

        let mut state = self.state.lock();
        state.early.remove(name);
        let instance = result?;
        self.objects.insert(name.to_string(), instance.clone());
        if !state.order.iter().any(|n| n == name) {
            state.order.push(name.to_string());
        }
        Ok(instance)
    }

    /// Register an externally built singleton.
    pub fn register(&self, name: &str, instance: BeanInstance) -> Result<()> {
        let mut state = self.state.lock();
        if self.objects.contains_key(name) {
            return Err(DiError::AlreadyRegistered {
                name: name.to_string(),
            });
        }
        self.objects.insert(name.to_string(), instance);
        state.early.remove(name);
        if !state.order.iter().any(|n| n == name) {
            state.order.push(name.to_string());
        }
        Ok(())
    }

    /// Register an early-reference supplier for a singleton in creation.
    pub fn add_early_supplier(&self, name: &str, supplier: EarlySupplier) {
        let mut state = self.state.lock();
        if !self.objects.contains_key(name) {
            state
                .early
                .insert(name.to_string(), EarlyReference::Pending(supplier));
        }
    }

    /// The early reference handed out for `name`, if one was requested.
    pub fn exposed_early_reference(&self, name: &str) -> Option<BeanInstance> {
        match self.state.lock().early.get(name) {
            Some(EarlyReference::Ready(instance)) => Some(instance.clone()),
            _ => None,
        }
    }

    /// Remove a singleton and any partial state for its name.
    pub fn remove(&self, name: &str) -> Option<BeanInstance> {
        let mut state = self.state.lock();
        let removed = self.objects.remove(name).map(|(_, i)| i);
        state.early.remove(name);
        state.order.retain(|n| n != name);
        removed
    }

    #[inline]
    pub fn contains(&self, name: &str) -> bool {
        self.objects.contains_key(name)
    }

    /// Whether `name` is being built right now (on any thread).
    pub fn is_in_creation(&self, name: &str) -> bool {
        self.building.is_building(name)
    }

    /// Singleton names in registration order.
    pub fn names(&self) -> Vec<String> {
        self.state.lock().order.clone()
    }

    pub fn set_destroying(&self, destroying: bool) {
        self.state.lock().destroying = destroying;
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.objects.len()
    }

    /// Drop every cached singleton and all partial state.
    pub fn clear(&self) {
        let mut state = self.state.lock();
        self.objects.clear();
        state.early.clear();
        state.order.clear();
    }
}

impl Default for SingletonRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for SingletonRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SingletonRegistry")
            .field("count", &self.len())
            .finish()
    }
}
