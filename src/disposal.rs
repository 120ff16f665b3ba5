//! Ordered teardown
//!
//! Beans needing teardown are recorded with their dependency edges. A bean
//! is destroyed only after every bean that depends on it; unrelated beans go
//! in reverse registration order. Teardown failures are logged and never
//! stop the rest of the shutdown.

use crate::definition::{AnyBean, MergedDefinition};
use crate::factory::{BeanInstance, DisposableBean};
use crate::hooks::LifecycleHook;
use crate::strategy::InstantiationStrategy;
use crate::DiError;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

#[cfg(feature = "logging")]
use tracing::{debug, warn};

/// Teardown of one bean: destruction-aware hooks, the bean's own teardown,
/// then the definition's destroy method.
pub struct DisposableAdapter {
    name: String,
    bean: AnyBean,
    teardown: Option<Arc<dyn DisposableBean>>,
    destroy_method: Option<String>,
    hooks: Vec<Arc<dyn LifecycleHook>>,
    strategy: Arc<dyn InstantiationStrategy>,
}

impl DisposableAdapter {
    pub fn new(
        name: &str,
        instance: &BeanInstance,
        definition: &MergedDefinition,
        hooks: Vec<Arc<dyn LifecycleHook>>,
        strategy: Arc<dyn InstantiationStrategy>,
    ) -> Self {
        Self {
            name: name.to_string(),
            bean: Arc::clone(instance.object()),
            teardown: instance.teardown().cloned(),
            destroy_method: definition.destroy_method().map(str::to_string),
            hooks,
            strategy,
        }
    }

    /// Whether a bean built from `definition` needs an adapter at all.
    pub fn is_required(
        instance: &BeanInstance,
        definition: &MergedDefinition,
        hooks: &[Arc<dyn LifecycleHook>],
    ) -> bool {
        instance.teardown().is_some() || definition.destroy_method().is_some() || !hooks.is_empty()
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Run every teardown step, collecting failures.
    pub fn destroy(&self) -> Vec<DiError> {
        let mut failures = Vec::new();

        for hook in &self.hooks {
            if let Err(e) = hook.before_destruction(&self.name, &self.bean) {
                failures.push(e);
            }
        }

        if let Some(teardown) = &self.teardown {
            #[cfg(feature = "logging")]
            debug!(target: "bean_factory", bean = %self.name, "Invoking destroy on bean");
            if let Err(e) = teardown.destroy() {
                failures.push(e);
            }
        }

        if let Some(method) = &self.destroy_method {
            #[cfg(feature = "logging")]
            debug!(
                target: "bean_factory",
                bean = %self.name,
                method = %method,
                "Invoking destroy method"
            );
            if let Err(e) = self.strategy.invoke_destroy_method(&self.name, &self.bean, method) {
                failures.push(e);
            }
        }

        failures
    }

    /// Run teardown and log failures.
    pub fn destroy_logged(&self) {
        for failure in self.destroy() {
            log_failure(&self.name, &failure);
        }
    }
}

impl std::fmt::Debug for DisposableAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DisposableAdapter")
            .field("name", &self.name)
            .field("destroy_method", &self.destroy_method)
            .field("hooks", &self.hooks.len())
            .finish()
    }
}

fn log_failure(name: &str, failure: &DiError) {
    #[cfg(feature = "logging")]
    warn!(
        target: "bean_factory",
        bean = name,
        error = %failure,
        "Destruction of bean threw an error"
    );
    #[cfg(not(feature = "logging"))]
    let _ = (name, failure);
}

#[derive(Default)]
struct DisposalState {
    /// Disposable names in registration order
    order: Vec<String>,
    disposables: HashMap<String, DisposableAdapter>,
    /// name -> beans depending on it
    dependents: HashMap<String, Vec<String>>,
    /// name -> beans it depends on
    dependencies: HashMap<String, Vec<String>>,
}

/// Teardown bookkeeping of one container.
#[derive(Default)]
pub struct DisposalRegistry {
    state: Mutex<DisposalState>,
}

impl DisposalRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a bean's teardown, replacing any previous one for the name.
    pub fn register(&self, adapter: DisposableAdapter) {
        let mut state = self.state.lock();
        let name = adapter.name.clone();
        if state.disposables.insert(name.clone(), adapter).is_none() {
            state.order.push(name);
        }
    }

    /// Record that `dependent` depends on `name`.
    pub fn register_dependent(&self, name: &str, dependent: &str) {
        if name == dependent {
            return;
        }
        let mut state = self.state.lock();
        let dependents = state.dependents.entry(name.to_string()).or_default();
        if dependents.iter().any(|d| d == dependent) {
            return;
        }
        dependents.push(dependent.to_string());
        state
            .dependencies
            .entry(dependent.to_string())
            .or_default()
            .push(name.to_string());
    }

    /// Whether `dependent` transitively depends on `name`.
    pub fn is_dependent(&self, name: &str, dependent: &str) -> bool {
        let state = self.state.lock();
        let mut seen = HashSet::new();
        let mut stack = vec![name.to_string()];
        while let Some(current) = stack.pop() {
            if !seen.insert(current.clone()) {
                continue;
            }
            if let Some(direct) = state.dependents.get(&current) {
                if direct.iter().any(|d| d == dependent) {
                    return true;
                }
                stack.extend(direct.iter().cloned());
            }
        }
        false
    }

    pub fn dependents_of(&self, name: &str) -> Vec<String> {
        self.state
            .lock()
            .dependents
            .get(name)
            .cloned()
            .unwrap_or_default()
    }

    pub fn dependencies_of(&self, name: &str) -> Vec<String> {
        self.state
            .lock()
            .dependencies
            .get(name)
            .cloned()
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.state.lock().disposables.len()
    }

    /// Tear down `name` after everything depending on it.
    ///
    /// `evict` removes a name from the singleton caches; it is called before
    /// the name's own teardown so nothing can fetch a half-destroyed bean.
    pub fn destroy(&self, name: &str, evict: &dyn Fn(&str)) {
        let mut visiting = HashSet::new();
        self.destroy_inner(name, evict, &mut visiting);
    }

    fn destroy_inner(&self, name: &str, evict: &dyn Fn(&str), visiting: &mut HashSet<String>) {
        if !visiting.insert(name.to_string()) {
            return;
        }
        evict(name);

        // Take everything for this name out before running foreign code
        let (adapter, dependents) = {
            let mut state = self.state.lock();
            let adapter = state.disposables.remove(name);
            if adapter.is_some() {
                state.order.retain(|n| n != name);
            }
            let dependents = state.dependents.remove(name).unwrap_or_default();
            (adapter, dependents)
        };

        if !dependents.is_empty() {
            #[cfg(feature = "logging")]
            debug!(
                target: "bean_factory",
                bean = name,
                dependents = ?dependents,
                "Destroying dependent beans first"
            );
        }
        for dependent in &dependents {
            self.destroy_inner(dependent, evict, visiting);
        }

        if let Some(adapter) = adapter {
            adapter.destroy_logged();
        }

        let mut state = self.state.lock();
        for deps in state.dependents.values_mut() {
            deps.retain(|d| d != name);
        }
        state.dependencies.remove(name);
    }

    /// Tear down everything in reverse registration order, dependents first.
    pub fn destroy_all(&self, evict: &dyn Fn(&str)) {
        let names: Vec<String> = {
            let state = self.state.lock();
            state.order.iter().rev().cloned().collect()
        };

        #[cfg(feature = "logging")]
        debug!(
            target: "bean_factory",
            count = names.len(),
            "Destroying disposable beans"
        );

        for name in names {
            self.destroy(&name, evict);
        }

        let mut state = self.state.lock();
        state.order.clear();
        state.disposables.clear();
        state.dependents.clear();
        state.dependencies.clear();
    }
}

impl std::fmt::Debug for DisposalRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DisposalRegistry")
            .field("count", &self.len())
            .finish()
    }
}
