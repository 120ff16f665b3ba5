//! Lifecycle hooks
//!
//! Hooks observe and may replace beans at fixed points of construction and
//! destruction. They run in ascending [`LifecycleHook::order`]; hooks with
//! equal order keep their registration order.

use crate::definition::{AnyBean, MergedDefinition};
use crate::factory::BeanInstance;
use crate::Result;
use parking_lot::RwLock;
use std::sync::Arc;

#[cfg(feature = "logging")]
use tracing::debug;

/// Extension point invoked by the container around each bean's lifecycle.
///
/// Every method has a pass-through default, so implementors override only
/// the phases they care about.
///
/// # Examples
///
/// ```rust
/// use bean_factory::{AnyBean, LifecycleHook, Result};
/// use std::sync::atomic::{AtomicUsize, Ordering};
///
/// #[derive(Default)]
/// struct CountInits(AtomicUsize);
///
/// impl LifecycleHook for CountInits {
///     fn after_initialization(&self, _name: &str, bean: AnyBean) -> Result<AnyBean> {
///         self.0.fetch_add(1, Ordering::Relaxed);
///         Ok(bean)
///     }
/// }
/// ```
pub trait LifecycleHook: Send + Sync {
    /// Called before the strategy instantiates the bean. Returning an
    /// instance skips instantiation, property injection and init callbacks;
    /// only `after_initialization` hooks still run.
    fn before_instantiation(
        &self,
        _name: &str,
        _definition: &MergedDefinition,
    ) -> Result<Option<BeanInstance>> {
        Ok(None)
    }

    /// Called when an early reference to a singleton in creation is handed
    /// out. May wrap the raw object.
    fn early_reference(&self, _name: &str, bean: AnyBean) -> Result<AnyBean> {
        Ok(bean)
    }

    /// Called after properties are applied, before init callbacks.
    fn before_initialization(&self, _name: &str, bean: AnyBean) -> Result<AnyBean> {
        Ok(bean)
    }

    /// Called after init callbacks, and on objects obtained from shared
    /// producers.
    fn after_initialization(&self, _name: &str, bean: AnyBean) -> Result<AnyBean> {
        Ok(bean)
    }

    /// Whether this hook wants `before_destruction` calls.
    fn requires_destruction(&self) -> bool {
        false
    }

    /// Called before a bean's own teardown.
    fn before_destruction(&self, _name: &str, _bean: &AnyBean) -> Result<()> {
        Ok(())
    }

    /// Name used in log output.
    fn name(&self) -> &str {
        "LifecycleHook"
    }

    /// Lower values run first.
    fn order(&self) -> i32 {
        1000
    }
}

/// Ordered set of hooks registered with one container.
#[derive(Default)]
pub struct HookChain {
    hooks: RwLock<Vec<Arc<dyn LifecycleHook>>>,
}

impl HookChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, hook: Arc<dyn LifecycleHook>) {
        #[cfg(feature = "logging")]
        debug!(
            target: "bean_factory",
            hook = hook.name(),
            order = hook.order(),
            "Registering lifecycle hook"
        );

        let mut hooks = self.hooks.write();
        let at = hooks.partition_point(|h| h.order() <= hook.order());
        hooks.insert(at, hook);
    }

    /// Snapshot of the current hooks; callers never hold the lock while a
    /// hook runs.
    pub fn snapshot(&self) -> Vec<Arc<dyn LifecycleHook>> {
        self.hooks.read().clone()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.hooks.read().len()
    }

    /// Hooks that asked for destruction callbacks.
    pub fn destruction_aware(&self) -> Vec<Arc<dyn LifecycleHook>> {
        self.hooks
            .read()
            .iter()
            .filter(|h| h.requires_destruction())
            .cloned()
            .collect()
    }

    pub fn before_instantiation(
        &self,
        name: &str,
        definition: &MergedDefinition,
    ) -> Result<Option<BeanInstance>> {
        for hook in self.snapshot() {
            if let Some(instance) = hook.before_instantiation(name, definition)? {
                return Ok(Some(instance));
            }
        }
        Ok(None)
    }

    pub fn early_reference(&self, name: &str, bean: AnyBean) -> Result<AnyBean> {
        self.snapshot()
            .iter()
            .try_fold(bean, |bean, hook| hook.early_reference(name, bean))
    }

    pub fn before_initialization(&self, name: &str, bean: AnyBean) -> Result<AnyBean> {
        self.snapshot()
            .iter()
            .try_fold(bean, |bean, hook| hook.before_initialization(name, bean))
    }

    pub fn after_initialization(&self, name: &str, bean: AnyBean) -> Result<AnyBean> {
        self.snapshot()
            .iter()
            .try_fold(bean, |bean, hook| hook.after_initialization(name, bean))
    }
}

impl std::fmt::Debug for HookChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<String> = self.hooks.read().iter().map(|h| h.name().to_string()).collect();
        f.debug_struct("HookChain").field("hooks", &names).finish()
    }
}
