//! Container facade
//!
//! [`Container`] answers every retrieval request by walking a small state
//! machine per name: cached singleton (or early reference), prototype
//! already in creation, not defined here (ask the parent), or defined (merge,
//! validate, build in its scope). Producer beans are then resolved to the
//! object they produce unless the caller asked for the producer itself.

use crate::alias::AliasRegistry;
use crate::config::ContainerConfig;
use crate::context::CreationContext;
use crate::definition::{
    AnyBean, BeanDefinition, BeanScope, InnerBean, MergedDefinition, PRODUCER_DEREFERENCE,
    PropertyValue, TypeDescriptor, is_dereference,
};
use crate::disposal::{DisposableAdapter, DisposalRegistry};
use crate::factory::{BeanInstance, NullBean, ProducedObjectCache, ProducerBean, produce_object};
use crate::hooks::{HookChain, LifecycleHook};
use crate::merge::{DefinitionMerger, ParentDefinitions};
use crate::scope::{Scope, ScopeRegistry};
use crate::singleton::SingletonRegistry;
use crate::storage::{DefinitionRegistry, DefinitionSource};
use crate::strategy::{BlueprintStrategy, Construction, InstantiationStrategy, ResolvedValue};
use crate::{DiError, Result};
use std::any::Any;
use std::sync::Arc;

#[cfg(feature = "logging")]
use tracing::{debug, trace};

struct Inner {
    definitions: DefinitionRegistry,
    aliases: AliasRegistry,
    merger: DefinitionMerger,
    singletons: SingletonRegistry,
    produced: ProducedObjectCache,
    scopes: ScopeRegistry,
    disposals: DisposalRegistry,
    hooks: HookChain,
    strategy: Arc<dyn InstantiationStrategy>,
    parent: Option<Container>,
    config: ContainerConfig,
    depth: u32,
}

/// Bean container.
///
/// Cheap to clone; clones share all state.
///
/// # Examples
///
/// ```rust
/// use bean_factory::{BeanDefinition, Blueprint, BlueprintStrategy, Container, PropertyValue};
/// use std::sync::{Arc, OnceLock};
///
/// struct Database {
///     url: String,
/// }
///
/// #[derive(Default)]
/// struct UserService {
///     db: OnceLock<Arc<Database>>,
/// }
///
/// let blueprints = Arc::new(BlueprintStrategy::new());
/// blueprints.register(Blueprint::of(|c| {
///     let url = c.arg(0)?.and_then(|v| v.parse::<String>()).unwrap_or_default();
///     Ok(Database { url })
/// }));
/// blueprints.register(Blueprint::of(|_| Ok(UserService::default())).inject(
///     |svc: &UserService, _prop, value| {
///         if let Some(db) = value.downcast::<Database>() {
///             let _ = svc.db.set(db);
///         }
///         Ok(())
///     },
/// ));
///
/// let container = Container::with_strategy(blueprints);
/// container
///     .register_definition(
///         "db",
///         BeanDefinition::of::<Database>()
///             .constructor_arg(0, PropertyValue::literal("postgres://localhost")),
///     )
///     .unwrap();
/// container
///     .register_definition(
///         "users",
///         BeanDefinition::of::<UserService>().property("db", PropertyValue::reference("db")),
///     )
///     .unwrap();
///
/// let users = container.get_typed::<UserService>("users").unwrap();
/// let db = container.get_typed::<Database>("db").unwrap();
/// assert!(Arc::ptr_eq(users.db.get().unwrap(), &db));
/// assert_eq!(db.url, "postgres://localhost");
/// ```
#[derive(Clone)]
pub struct Container {
    inner: Arc<Inner>,
}

impl Container {
    /// Create a root container with an empty [`BlueprintStrategy`].
    #[inline]
    pub fn new() -> Self {
        Self::builder().build()
    }

    /// Create a root container using `strategy` to build beans.
    #[inline]
    pub fn with_strategy(strategy: Arc<dyn InstantiationStrategy>) -> Self {
        Self::builder().strategy(strategy).build()
    }

    /// Create a root container with the given configuration.
    #[inline]
    pub fn with_config(config: ContainerConfig) -> Self {
        Self::builder().config(config).build()
    }

    #[inline]
    pub fn builder() -> ContainerBuilder {
        ContainerBuilder::new()
    }

    /// Create a child container.
    ///
    /// The child shares this container's strategy and configuration, sees
    /// its scopes, and delegates names it does not define to this container.
    pub fn child(&self) -> Self {
        Self::builder().parent(self).build()
    }

    #[inline]
    pub fn parent(&self) -> Option<&Container> {
        self.inner.parent.as_ref()
    }

    #[inline]
    pub fn depth(&self) -> u32 {
        self.inner.depth
    }

    #[inline]
    pub fn config(&self) -> &ContainerConfig {
        &self.inner.config
    }

    // =========================================================================
    // Registration
    // =========================================================================

    /// Register a definition under `name`.
    ///
    /// Replacing a definition evicts its merged form and destroys any
    /// singleton built from it. Fails with [`DiError::DefinitionOverride`]
    /// when overriding is disabled.
    pub fn register_definition(&self, name: &str, definition: BeanDefinition) -> Result<()> {
        if name.is_empty() {
            return Err(DiError::invalid_definition(name, "bean name must not be empty"));
        }
        if is_dereference(name) {
            return Err(DiError::invalid_definition(
                name,
                format!("bean name must not start with '{PRODUCER_DEREFERENCE}'"),
            ));
        }
        if !self.inner.config.definition_overriding()
            && self.inner.definitions.contains_definition(name)
        {
            return Err(DiError::DefinitionOverride {
                name: name.to_string(),
            });
        }

        #[cfg(feature = "logging")]
        debug!(
            target: "bean_factory",
            bean = name,
            type_name = definition.type_name().unwrap_or("<inherited>"),
            depth = self.inner.depth,
            "Registering bean definition"
        );

        self.inner.aliases.remove(name);
        let previous = self.inner.definitions.insert(name, definition);
        if previous.is_some() || self.inner.singletons.contains(name) {
            self.reset_definition(name, previous.as_deref());
        }
        Ok(())
    }

    /// Remove the definition registered under `name`.
    pub fn remove_definition(&self, name: &str) -> Result<()> {
        let removed = self
            .inner
            .definitions
            .remove(name)
            .ok_or_else(|| DiError::no_such_definition(name))?;

        #[cfg(feature = "logging")]
        debug!(target: "bean_factory", bean = name, "Removing bean definition");

        self.reset_definition(name, Some(&removed));
        Ok(())
    }

    fn reset_definition(&self, name: &str, previous: Option<&BeanDefinition>) {
        if let Some(previous) = previous {
            self.inner.merger.evict(previous.id());
        }
        self.inner.merger.forget_created(name);
        self.destroy_singleton(name);
    }

    /// Register `alias` for the bean named `name`.
    pub fn register_alias(&self, name: &str, alias: &str) -> Result<()> {
        self.inner.aliases.register(name, alias)
    }

    /// Register an externally built singleton.
    pub fn register_singleton(&self, name: &str, instance: BeanInstance) -> Result<()> {
        #[cfg(feature = "logging")]
        debug!(target: "bean_factory", bean = name, "Registering singleton instance");

        self.inner.singletons.register(name, instance)
    }

    /// Add a lifecycle hook. Applies to beans built from now on.
    pub fn add_hook(&self, hook: Arc<dyn LifecycleHook>) {
        self.inner.hooks.add(hook);
    }

    /// Register a custom scope under `id`.
    pub fn register_scope(&self, id: &str, scope: Arc<dyn Scope>) -> Result<()> {
        self.inner.scopes.register(id, scope)
    }

    /// Ids of all scopes visible to this container, sorted.
    pub fn registered_scope_names(&self) -> Vec<String> {
        let mut names = self.inner.scopes.names();
        if let Some(parent) = &self.inner.parent {
            names.extend(parent.registered_scope_names());
            names.sort();
            names.dedup();
        }
        names
    }

    /// The scope registered under `id`, here or in an ancestor.
    pub fn registered_scope(&self, id: &str) -> Option<Arc<dyn Scope>> {
        self.inner
            .scopes
            .get(id)
            .or_else(|| self.inner.parent.as_ref().and_then(|p| p.registered_scope(id)))
    }

    /// Copy the hooks and locally registered scopes of `other` into this
    /// container.
    ///
    /// Hooks already present are not added twice; scopes with the same id
    /// are replaced. Strategy and [`ContainerConfig`] are fixed when a
    /// container is built, see [`ContainerBuilder::config`].
    pub fn copy_configuration_from(&self, other: &Container) -> Result<()> {
        let present = self.inner.hooks.snapshot();
        for hook in other.inner.hooks.snapshot() {
            if !present.iter().any(|h| Arc::ptr_eq(h, &hook)) {
                self.inner.hooks.add(hook);
            }
        }
        for id in other.inner.scopes.names() {
            if let Some(scope) = other.inner.scopes.get(&id) {
                self.inner.scopes.register(&id, scope)?;
            }
        }
        Ok(())
    }

    // =========================================================================
    // Retrieval
    // =========================================================================

    /// Return the bean named `name`, building it if needed.
    ///
    /// A `&`-prefixed name returns a producer itself instead of the object it
    /// produces.
    pub fn get(&self, name: &str) -> Result<AnyBean> {
        self.do_get(name, None, &CreationContext::new())
    }

    /// Return the bean as `T`, failing with [`DiError::TypeMismatch`] if it
    /// is something else.
    pub fn get_typed<T: Any + Send + Sync>(&self, name: &str) -> Result<Arc<T>> {
        let bean = self.get(name)?;
        self.downcast_bean(name, bean)
    }

    /// Build a bean with explicit arguments.
    ///
    /// Only valid for non-singleton definitions built through a factory
    /// method.
    pub fn get_with_args(&self, name: &str, args: &[AnyBean]) -> Result<AnyBean> {
        self.do_get(name, Some(args), &CreationContext::new())
    }

    /// Like [`get`](Self::get), discarding the error.
    #[inline]
    pub fn try_get(&self, name: &str) -> Option<AnyBean> {
        self.get(name).ok()
    }

    fn downcast_bean<T: Any + Send + Sync>(&self, name: &str, bean: AnyBean) -> Result<Arc<T>> {
        bean.downcast::<T>().map_err(|bean| {
            let actual = if NullBean::is_null(&bean) {
                std::any::type_name::<NullBean>().to_string()
            } else {
                self.get_type(name)
                    .ok()
                    .flatten()
                    .map(|t| t.name().to_string())
                    .unwrap_or_else(|| "<unknown>".to_string())
            };
            DiError::TypeMismatch {
                name: name.to_string(),
                required: std::any::type_name::<T>().to_string(),
                actual,
            }
        })
    }

    pub(crate) fn do_get(
        &self,
        name: &str,
        args: Option<&[AnyBean]>,
        context: &CreationContext,
    ) -> Result<AnyBean> {
        let bean_name = self.canonical_name(name);
        match self.lookup_local(&bean_name, args, context)? {
            Some((instance, definition)) => {
                self.object_for_instance(instance, name, &bean_name, definition.as_deref())
            }
            None => match &self.inner.parent {
                Some(parent) => {
                    #[cfg(feature = "logging")]
                    trace!(
                        target: "bean_factory",
                        bean = %bean_name,
                        depth = self.inner.depth,
                        "Bean not defined locally, delegating to parent container"
                    );
                    parent.do_get(&original_name(name, &bean_name), args, &CreationContext::new())
                }
                None => Err(DiError::no_such_definition(name)),
            },
        }
    }

    /// Resolve `bean_name` in this container only.
    ///
    /// `Ok(None)` means the name is neither cached nor defined here.
    fn lookup_local(
        &self,
        bean_name: &str,
        args: Option<&[AnyBean]>,
        context: &CreationContext,
    ) -> Result<Option<(BeanInstance, Option<Arc<MergedDefinition>>)>> {
        if let Some(shared) = self.inner.singletons.get(bean_name, true)? {
            #[cfg(feature = "logging")]
            {
                if self.inner.singletons.is_in_creation(bean_name) {
                    debug!(
                        target: "bean_factory",
                        bean = bean_name,
                        "Returning early reference to singleton that is not fully initialized yet"
                    );
                }
            }

            let definition = if self.inner.definitions.contains_definition(bean_name) {
                Some(self.merged_local(bean_name)?)
            } else {
                None
            };
            return Ok(Some((shared, definition)));
        }

        if context.is_prototype_in_creation(bean_name) {
            return Err(DiError::in_creation(
                bean_name,
                "requested while its construction is in progress; is there an unresolvable circular reference?",
            ));
        }

        if !self.inner.definitions.contains_definition(bean_name) {
            return Ok(None);
        }

        self.inner.merger.mark_created(bean_name);
        let definition = self.merged_local(bean_name)?;
        check_merged(&definition, bean_name, args)?;
        self.resolve_depends_on(bean_name, &definition, context)?;

        let instance = match definition.scope() {
            BeanScope::Singleton => self.inner.singletons.get_or_create(bean_name, || {
                self.create_bean(bean_name, &definition, args, context)
                    .inspect_err(|_| self.destroy_singleton(bean_name))
            })?,
            BeanScope::Prototype => {
                let _guard = context.enter_prototype(bean_name)?;
                self.create_bean(bean_name, &definition, args, context)?
            }
            BeanScope::Custom(id) => {
                let scope = self.registered_scope(id).ok_or_else(|| DiError::NoSuchScope {
                    name: bean_name.to_string(),
                    scope: id.clone(),
                })?;
                scope
                    .get(bean_name, &mut || {
                        let _guard = context.enter_prototype(bean_name)?;
                        self.create_bean(bean_name, &definition, args, context)
                    })
                    .map_err(|e| match e {
                        DiError::ScopeNotActive { .. } => DiError::ScopeNotActive {
                            name: bean_name.to_string(),
                            scope: id.clone(),
                        },
                        other => other,
                    })?
            }
        };
        Ok(Some((instance, Some(definition))))
    }

    fn resolve_depends_on(
        &self,
        bean_name: &str,
        definition: &MergedDefinition,
        context: &CreationContext,
    ) -> Result<()> {
        for dependency in definition.dependencies() {
            let dependency = self.canonical_name(dependency);
            if self.inner.disposals.is_dependent(bean_name, &dependency) {
                return Err(DiError::in_creation(
                    bean_name,
                    format!("circular depends-on relationship between '{bean_name}' and '{dependency}'"),
                ));
            }
            self.inner.disposals.register_dependent(&dependency, bean_name);
            self.do_get(&dependency, None, context).map_err(|e| {
                DiError::construction_caused_by(
                    bean_name,
                    format!("depends on bean '{dependency}' which could not be resolved"),
                    e,
                )
            })?;
        }
        Ok(())
    }

    // =========================================================================
    // Construction
    // =========================================================================

    fn create_bean(
        &self,
        bean_name: &str,
        definition: &Arc<MergedDefinition>,
        args: Option<&[AnyBean]>,
        context: &CreationContext,
    ) -> Result<BeanInstance> {
        #[cfg(feature = "logging")]
        debug!(
            target: "bean_factory",
            bean = bean_name,
            scope = %definition.scope(),
            "Creating instance of bean"
        );

        match self.inner.hooks.before_instantiation(bean_name, definition) {
            Ok(Some(instance)) => {
                let object = self
                    .inner
                    .hooks
                    .after_initialization(bean_name, Arc::clone(instance.object()))
                    .map_err(|e| {
                        DiError::construction_caused_by(bean_name, "lifecycle hook after initialization failed", e)
                    })?;
                return Ok(instance.with_object(object));
            }
            Ok(None) => {}
            Err(e) => {
                return Err(DiError::construction_caused_by(
                    bean_name,
                    "lifecycle hook before instantiation failed",
                    e,
                ));
            }
        }

        self.do_create_bean(bean_name, definition, args, context)
            .map_err(|e| DiError::construction_caused_by(bean_name, "construction failed", e))
    }

    fn do_create_bean(
        &self,
        bean_name: &str,
        definition: &Arc<MergedDefinition>,
        args: Option<&[AnyBean]>,
        context: &CreationContext,
    ) -> Result<BeanInstance> {
        let resolver = BeanResolver {
            container: self,
            context,
            bean_name,
            definition,
        };
        let raw = {
            let construction = Construction::new(bean_name, definition, args, &resolver);
            self.inner.strategy.instantiate(&construction)?
        };

        let early_exposure = definition.is_singleton()
            && self.inner.config.circular_references()
            && self.inner.singletons.is_in_creation(bean_name);
        if early_exposure {
            #[cfg(feature = "logging")]
            trace!(
                target: "bean_factory",
                bean = bean_name,
                "Eagerly caching bean to allow for resolving potential circular references"
            );

            let inner = Arc::clone(&self.inner);
            let name = bean_name.to_string();
            let early = raw.clone();
            self.inner.singletons.add_early_supplier(
                bean_name,
                Box::new(move || {
                    let object = inner
                        .hooks
                        .early_reference(&name, Arc::clone(early.object()))?;
                    Ok(early.with_object(object))
                }),
            );
        }

        let mut properties = Vec::with_capacity(definition.properties().len());
        for (property, value) in definition.properties().iter() {
            let resolved = resolver.resolve_value(value).map_err(|e| {
                DiError::construction_caused_by(
                    bean_name,
                    format!("cannot resolve value of property '{property}'"),
                    e,
                )
            })?;
            properties.push((property.to_string(), resolved));
        }
        self.inner
            .strategy
            .apply_properties(bean_name, definition, &raw, &properties)?;

        let object = self
            .inner
            .hooks
            .before_initialization(bean_name, Arc::clone(raw.object()))?;
        let current = raw.clone().with_object(object);
        self.inner.strategy.initialize(bean_name, definition, &current)?;
        let object = self
            .inner
            .hooks
            .after_initialization(bean_name, Arc::clone(current.object()))?;
        let mut exposed = current.with_object(object);

        if early_exposure {
            if let Some(early) = self.inner.singletons.exposed_early_reference(bean_name) {
                if exposed.same_object(&raw) {
                    exposed = early;
                } else if !self.inner.config.raw_injection_despite_wrapping() {
                    let dependents = self.inner.disposals.dependents_of(bean_name);
                    if !dependents.is_empty() {
                        return Err(DiError::in_creation(
                            bean_name,
                            format!(
                                "bean has been injected into other beans [{}] in its raw version as part \
                                 of a circular reference, but has eventually been wrapped",
                                dependents.join(", ")
                            ),
                        ));
                    }
                }
            }
        }

        self.register_disposable_if_necessary(bean_name, &raw, definition)?;
        Ok(exposed)
    }

    fn register_disposable_if_necessary(
        &self,
        bean_name: &str,
        raw: &BeanInstance,
        definition: &MergedDefinition,
    ) -> Result<()> {
        if definition.is_prototype() {
            return Ok(());
        }
        let hooks = self.inner.hooks.destruction_aware();
        if !DisposableAdapter::is_required(raw, definition, &hooks) {
            return Ok(());
        }
        let adapter = DisposableAdapter::new(
            bean_name,
            raw,
            definition,
            hooks,
            Arc::clone(&self.inner.strategy),
        );

        match definition.scope() {
            BeanScope::Custom(id) => {
                let scope = self.registered_scope(id).ok_or_else(|| DiError::NoSuchScope {
                    name: bean_name.to_string(),
                    scope: id.clone(),
                })?;
                scope.register_destruction_callback(bean_name, Box::new(move || adapter.destroy_logged()))
            }
            _ => {
                #[cfg(feature = "logging")]
                trace!(target: "bean_factory", bean = bean_name, "Registering disposable bean");
                self.inner.disposals.register(adapter);
                Ok(())
            }
        }
    }

    fn resolve_inner(
        &self,
        outer_name: &str,
        outer: &MergedDefinition,
        inner: &InnerBean,
        context: &CreationContext,
    ) -> Result<ResolvedValue> {
        let inner_name = inner
            .name
            .clone()
            .unwrap_or_else(|| format!("(inner bean)#{}", inner.definition.id().id()));
        let definition = self
            .inner
            .merger
            .merge(&inner_name, &inner.definition, Some(outer), self)?;
        check_merged(&definition, &inner_name, None)?;

        for dependency in definition.dependencies() {
            let dependency = self.canonical_name(dependency);
            self.inner.disposals.register_dependent(&dependency, &inner_name);
            self.do_get(&dependency, None, context)?;
        }

        let instance = self.create_bean(&inner_name, &definition, None, context)?;
        if definition.is_singleton() {
            self.inner.disposals.register_dependent(&inner_name, outer_name);
        }
        let object = self.object_for_instance(instance, &inner_name, &inner_name, Some(&*definition))?;
        Ok(ResolvedValue::Bean(object))
    }

    // =========================================================================
    // Producers
    // =========================================================================

    /// Expose a raw instance: the instance itself, or the object its producer
    /// yields.
    fn object_for_instance(
        &self,
        instance: BeanInstance,
        name: &str,
        bean_name: &str,
        definition: Option<&MergedDefinition>,
    ) -> Result<AnyBean> {
        if is_dereference(name) {
            if !instance.is_producer() && !NullBean::is_null(instance.object()) {
                return Err(DiError::NotAProducer {
                    name: bean_name.to_string(),
                });
            }
            return Ok(instance.into_object());
        }
        let Some(producer) = instance.producer_handle().cloned() else {
            return Ok(instance.into_object());
        };

        let shared = definition.is_none_or(|d| d.is_singleton());
        let post_process = shared && !definition.is_some_and(|d| d.is_synthetic());

        if shared && producer.is_singleton() {
            return self.inner.produced.get_or_produce(bean_name, || {
                let in_creation = self.inner.singletons.is_in_creation(bean_name);
                self.produce(producer.as_ref(), bean_name, in_creation, post_process)
            });
        }
        let in_creation = self.inner.singletons.is_in_creation(bean_name);
        self.produce(producer.as_ref(), bean_name, in_creation, post_process)
    }

    fn produce(
        &self,
        producer: &dyn ProducerBean,
        bean_name: &str,
        in_creation: bool,
        post_process: bool,
    ) -> Result<AnyBean> {
        let object = produce_object(producer, bean_name, in_creation)?;
        if !post_process || NullBean::is_null(&object) {
            return Ok(object);
        }
        self.inner
            .hooks
            .after_initialization(bean_name, object)
            .map_err(|e| {
                DiError::construction_caused_by(bean_name, "post-processing of producer's object failed", e)
            })
    }

    /// The producer behind a locally defined bean, building it if needed.
    fn local_producer(&self, bean_name: &str) -> Result<Option<Arc<dyn ProducerBean>>> {
        let found = self.lookup_local(bean_name, None, &CreationContext::new())?;
        Ok(found.and_then(|(instance, _)| instance.producer_handle().cloned()))
    }

    // =========================================================================
    // Introspection
    // =========================================================================

    /// Canonical name for a user-facing name: dereference prefix stripped,
    /// aliases followed.
    #[inline]
    pub fn canonical_name(&self, name: &str) -> String {
        self.inner.aliases.canonical_name(name)
    }

    /// Whether a bean with this name exists here or in an ancestor.
    pub fn contains_bean(&self, name: &str) -> bool {
        if self.contains_local_bean(name) {
            return true;
        }
        let bean_name = self.canonical_name(name);
        self.inner
            .parent
            .as_ref()
            .is_some_and(|p| p.contains_bean(&original_name(name, &bean_name)))
    }

    /// Whether this container itself holds a definition or singleton for
    /// the name.
    pub fn contains_local_bean(&self, name: &str) -> bool {
        let bean_name = self.canonical_name(name);
        self.inner.singletons.contains(&bean_name)
            || self.inner.definitions.contains_definition(&bean_name)
    }

    /// Whether a definition is registered locally under the exact name.
    #[inline]
    pub fn contains_definition(&self, name: &str) -> bool {
        self.inner.definitions.contains_definition(name)
    }

    /// Locally registered definition names, in registration order.
    #[inline]
    pub fn definition_names(&self) -> Vec<String> {
        self.inner.definitions.definition_names()
    }

    /// Whether lookups of `name` return one shared object.
    pub fn is_singleton(&self, name: &str) -> Result<bool> {
        let bean_name = self.canonical_name(name);
        if let Some(instance) = self.inner.singletons.get(&bean_name, false)? {
            return Ok(match instance.producer_handle() {
                Some(producer) if !is_dereference(name) => producer.is_singleton(),
                _ => true,
            });
        }
        if !self.inner.definitions.contains_definition(&bean_name) {
            return match &self.inner.parent {
                Some(parent) => parent.is_singleton(&original_name(name, &bean_name)),
                None => Err(DiError::no_such_definition(name)),
            };
        }

        let definition = self.merged_local(&bean_name)?;
        if definition.is_singleton()
            && !is_dereference(name)
            && self.inner.strategy.is_producer(&bean_name, &definition)
        {
            if let Some(producer) = self.local_producer(&bean_name)? {
                return Ok(producer.is_singleton());
            }
        }
        Ok(definition.is_singleton())
    }

    /// Whether every lookup of `name` returns an independent object.
    pub fn is_prototype(&self, name: &str) -> Result<bool> {
        let bean_name = self.canonical_name(name);
        if !self.inner.definitions.contains_definition(&bean_name) {
            if self.inner.singletons.contains(&bean_name) {
                return Ok(false);
            }
            return match &self.inner.parent {
                Some(parent) => parent.is_prototype(&original_name(name, &bean_name)),
                None => Err(DiError::no_such_definition(name)),
            };
        }

        let definition = self.merged_local(&bean_name)?;
        if definition.is_singleton()
            && !is_dereference(name)
            && self.inner.strategy.is_producer(&bean_name, &definition)
        {
            if let Some(producer) = self.local_producer(&bean_name)? {
                return Ok(producer.is_prototype() || !producer.is_singleton());
            }
        }
        Ok(definition.is_prototype())
    }

    /// Type of the object a lookup of `name` would return, if determinable
    /// without building a non-producer bean.
    pub fn get_type(&self, name: &str) -> Result<Option<TypeDescriptor>> {
        let bean_name = self.canonical_name(name);
        if let Some(instance) = self.inner.singletons.get(&bean_name, false)? {
            return Ok(match instance.producer_handle() {
                Some(producer) if !is_dereference(name) => producer.object_type(),
                _ => Some(instance_type(&instance)),
            });
        }
        if !self.inner.definitions.contains_definition(&bean_name) {
            return match &self.inner.parent {
                Some(parent) => parent.get_type(&original_name(name, &bean_name)),
                None => Err(DiError::no_such_definition(name)),
            };
        }

        let definition = self.merged_local(&bean_name)?;
        if !is_dereference(name) && self.inner.strategy.is_producer(&bean_name, &definition) {
            // A producer that cannot be built yet has no known object type
            return Ok(self
                .local_producer(&bean_name)
                .ok()
                .flatten()
                .and_then(|p| p.object_type()));
        }
        Ok(definition.resolved_type(|| self.inner.strategy.predict_type(&bean_name, &definition)))
    }

    /// Whether a lookup of `name` would return something of type `target`.
    pub fn is_type_match(&self, name: &str, target: &TypeDescriptor) -> Result<bool> {
        Ok(self.get_type(name)?.is_some_and(|t| target.accepts(&t)))
    }

    /// Whether `name` is backed by a producer.
    pub fn is_factory_bean(&self, name: &str) -> Result<bool> {
        let bean_name = self.canonical_name(name);
        if let Some(instance) = self.inner.singletons.get(&bean_name, false)? {
            return Ok(instance.is_producer());
        }
        if !self.inner.definitions.contains_definition(&bean_name) {
            return match &self.inner.parent {
                Some(parent) => parent.is_factory_bean(&bean_name),
                None => Err(DiError::no_such_definition(name)),
            };
        }
        let definition = self.merged_local(&bean_name)?;
        Ok(self.inner.strategy.is_producer(&bean_name, &definition))
    }

    /// Aliases of a bean, plus its canonical name when `name` is an alias.
    pub fn get_aliases(&self, name: &str) -> Vec<String> {
        let bean_name = self.canonical_name(name);
        let prefix = if is_dereference(name) { PRODUCER_DEREFERENCE } else { "" };
        let full_name = format!("{prefix}{bean_name}");

        let mut aliases = Vec::new();
        if full_name != name {
            aliases.push(full_name.clone());
        }
        for alias in self.inner.aliases.aliases_of(&bean_name) {
            let key = format!("{prefix}{alias}");
            if key != name {
                aliases.push(key);
            }
        }

        if !self.inner.singletons.contains(&bean_name)
            && !self.inner.definitions.contains_definition(&bean_name)
        {
            if let Some(parent) = &self.inner.parent {
                aliases.extend(parent.get_aliases(&full_name));
            }
        }
        aliases
    }

    /// Whether `name` is registered as an alias.
    #[inline]
    pub fn is_alias(&self, name: &str) -> bool {
        self.inner.aliases.is_alias(name)
    }

    /// Names of the singletons built or registered so far, in order.
    #[inline]
    pub fn singleton_names(&self) -> Vec<String> {
        self.inner.singletons.names()
    }

    /// Beans recorded as depending on `name`.
    pub fn dependent_beans(&self, name: &str) -> Vec<String> {
        self.inner.disposals.dependents_of(&self.canonical_name(name))
    }

    /// Beans `name` was recorded as depending on.
    pub fn dependencies_for_bean(&self, name: &str) -> Vec<String> {
        self.inner.disposals.dependencies_of(&self.canonical_name(name))
    }

    #[inline]
    pub fn hook_count(&self) -> usize {
        self.inner.hooks.len()
    }

    /// Drop cached merged definitions; they are rebuilt on next use.
    pub fn clear_metadata_cache(&self) {
        self.inner.merger.clear();
    }

    /// Whether the singleton `name` is being built right now.
    pub fn is_currently_in_creation(&self, name: &str) -> bool {
        self.inner.singletons.is_in_creation(&self.canonical_name(name))
    }

    /// Merged definition of `name`, searching ancestors.
    pub fn merged_definition(&self, name: &str) -> Result<Arc<MergedDefinition>> {
        self.merged_including_ancestors(&self.canonical_name(name))
    }

    fn merged_local(&self, bean_name: &str) -> Result<Arc<MergedDefinition>> {
        let definition = self
            .inner
            .definitions
            .definition(bean_name)
            .ok_or_else(|| DiError::no_such_definition(bean_name))?;
        self.inner.merger.merge(bean_name, &definition, None, self)
    }

    /// Build every non-lazy, non-abstract singleton now.
    pub fn pre_instantiate_singletons(&self) -> Result<()> {
        #[cfg(feature = "logging")]
        debug!(
            target: "bean_factory",
            definitions = self.inner.definitions.len(),
            "Pre-instantiating singletons"
        );

        for name in self.inner.definitions.definition_names() {
            let definition = self.merged_local(&name)?;
            if definition.is_abstract() || !definition.is_singleton() || definition.is_lazy_init() {
                continue;
            }
            if self.inner.strategy.is_producer(&name, &definition) {
                self.get(&format!("{PRODUCER_DEREFERENCE}{name}"))?;
            } else {
                self.get(&name)?;
            }
        }
        Ok(())
    }

    // =========================================================================
    // Destruction
    // =========================================================================

    /// Destroy all singletons, dependents before their dependencies.
    ///
    /// Individual teardown failures are logged and do not stop the rest.
    pub fn destroy_singletons(&self) {
        #[cfg(feature = "logging")]
        debug!(
            target: "bean_factory",
            singletons = self.inner.singletons.len(),
            depth = self.inner.depth,
            "Destroying singletons"
        );

        self.inner.singletons.set_destroying(true);
        self.inner.disposals.destroy_all(&|name| self.evict_singleton(name));
        self.inner.singletons.clear();
        self.inner.produced.clear();
        self.inner.singletons.set_destroying(false);
    }

    /// Destroy one singleton, after everything that depends on it.
    pub fn destroy_singleton(&self, name: &str) {
        self.inner
            .disposals
            .destroy(name, &|evicted| self.evict_singleton(evicted));
    }

    fn evict_singleton(&self, name: &str) {
        self.inner.singletons.remove(name);
        self.inner.produced.remove(name);
    }

    /// Tear down an instance built from the definition of `name`, typically
    /// a prototype.
    pub fn destroy_bean(&self, name: &str, instance: &BeanInstance) -> Result<()> {
        let bean_name = self.canonical_name(name);
        let definition = self.merged_including_ancestors(&bean_name)?;
        DisposableAdapter::new(
            &bean_name,
            instance,
            &definition,
            self.inner.hooks.destruction_aware(),
            Arc::clone(&self.inner.strategy),
        )
        .destroy_logged();
        Ok(())
    }

    /// Remove the current instance of a custom-scoped bean from its scope
    /// and tear it down.
    pub fn destroy_scoped_instance(&self, name: &str) -> Result<()> {
        let bean_name = self.canonical_name(name);
        let definition = self.merged_including_ancestors(&bean_name)?;
        let BeanScope::Custom(id) = definition.scope() else {
            return Err(DiError::NotScoped { name: bean_name });
        };
        let scope = self.registered_scope(id).ok_or_else(|| DiError::NoSuchScope {
            name: bean_name.clone(),
            scope: id.clone(),
        })?;
        if let Some(instance) = scope.remove(&bean_name) {
            self.destroy_bean(&bean_name, &instance)?;
        }
        Ok(())
    }
}

/// Validate a merged definition before building from it.
fn check_merged(definition: &MergedDefinition, bean_name: &str, args: Option<&[AnyBean]>) -> Result<()> {
    if definition.is_abstract() {
        return Err(DiError::AbstractDefinition {
            name: bean_name.to_string(),
        });
    }
    if args.is_some() {
        if definition.is_singleton() {
            return Err(DiError::InvalidArguments {
                name: bean_name.to_string(),
                reason: "explicit arguments cannot be passed for a singleton definition".to_string(),
            });
        }
        if definition.factory_method().is_none() {
            return Err(DiError::InvalidArguments {
                name: bean_name.to_string(),
                reason: "explicit arguments require a factory method".to_string(),
            });
        }
    }
    Ok(())
}

/// The name to ask a parent container for, keeping a dereference prefix.
fn original_name(name: &str, bean_name: &str) -> String {
    if is_dereference(name) {
        format!("{PRODUCER_DEREFERENCE}{bean_name}")
    } else {
        bean_name.to_string()
    }
}

fn instance_type(instance: &BeanInstance) -> TypeDescriptor {
    TypeDescriptor::named(instance.type_name()).with_type_id(Any::type_id(instance.object().as_ref()))
}

impl ParentDefinitions for Container {
    fn canonical_name(&self, name: &str) -> String {
        Container::canonical_name(self, name)
    }

    fn merged_including_ancestors(&self, name: &str) -> Result<Arc<MergedDefinition>> {
        if !self.inner.definitions.contains_definition(name) {
            if let Some(parent) = &self.inner.parent {
                return parent.merged_including_ancestors(name);
            }
        }
        self.merged_local(name)
    }

    fn merged_from_parent_container(&self, name: &str) -> Result<Arc<MergedDefinition>> {
        match &self.inner.parent {
            Some(parent) => parent.merged_including_ancestors(name),
            None => Err(DiError::invalid_definition(
                name,
                "parent name is equal to bean name and there is no parent container",
            )),
        }
    }
}

impl Default for Container {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Container {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Container")
            .field("definitions", &self.inner.definitions.len())
            .field("singletons", &self.inner.singletons.len())
            .field("produced", &self.inner.produced.len())
            .field("depth", &self.inner.depth)
            .field("has_parent", &self.inner.parent.is_some())
            .finish()
    }
}

// =============================================================================
// Builder
// =============================================================================

/// Builder for [`Container`].
#[derive(Default)]
pub struct ContainerBuilder {
    config: Option<ContainerConfig>,
    strategy: Option<Arc<dyn InstantiationStrategy>>,
    parent: Option<Container>,
    capacity: usize,
}

impl ContainerBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn config(mut self, config: ContainerConfig) -> Self {
        self.config = Some(config);
        self
    }

    pub fn strategy(mut self, strategy: Arc<dyn InstantiationStrategy>) -> Self {
        self.strategy = Some(strategy);
        self
    }

    /// Make the built container a child of `parent`. Strategy and
    /// configuration default to the parent's.
    pub fn parent(mut self, parent: &Container) -> Self {
        self.parent = Some(parent.clone());
        self
    }

    /// Expected number of definitions.
    pub fn capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    pub fn build(self) -> Container {
        let parent_inner = self.parent.as_ref().map(|p| Arc::clone(&p.inner));
        let config = self
            .config
            .or_else(|| parent_inner.as_ref().map(|p| p.config))
            .unwrap_or_default();
        let strategy = self
            .strategy
            .or_else(|| parent_inner.as_ref().map(|p| Arc::clone(&p.strategy)))
            .unwrap_or_else(|| Arc::new(BlueprintStrategy::new()));
        let depth = parent_inner.as_ref().map_or(0, |p| p.depth + 1);

        #[cfg(feature = "logging")]
        debug!(
            target: "bean_factory",
            depth = depth,
            has_parent = self.parent.is_some(),
            "Creating bean container"
        );

        Container {
            inner: Arc::new(Inner {
                definitions: DefinitionRegistry::with_capacity(self.capacity),
                aliases: AliasRegistry::new(),
                merger: DefinitionMerger::new(config.metadata_caching()),
                singletons: SingletonRegistry::with_capacity(self.capacity),
                produced: ProducedObjectCache::new(),
                scopes: ScopeRegistry::new(),
                disposals: DisposalRegistry::new(),
                hooks: HookChain::new(),
                strategy,
                parent: self.parent,
                config,
                depth,
            }),
        }
    }
}

// =============================================================================
// Resolver handed to strategies
// =============================================================================

/// Resolves references while a bean is being built.
///
/// Lookups share the creation context of the bean under construction, so
/// prototype cycles are caught, and each resolved reference is recorded as
/// a dependency for shutdown ordering.
pub struct BeanResolver<'a> {
    container: &'a Container,
    context: &'a CreationContext,
    bean_name: &'a str,
    definition: &'a MergedDefinition,
}

impl BeanResolver<'_> {
    /// Name of the bean being built.
    #[inline]
    pub fn bean_name(&self) -> &str {
        self.bean_name
    }

    /// Look up another bean.
    pub fn get(&self, name: &str) -> Result<AnyBean> {
        let object = self
            .container
            .do_get(name, None, self.context)
            .map_err(|e| {
                DiError::construction_caused_by(
                    self.bean_name,
                    format!("cannot resolve reference to bean '{name}'"),
                    e,
                )
            })?;
        let dependency = self.container.canonical_name(name);
        self.container
            .inner
            .disposals
            .register_dependent(&dependency, self.bean_name);
        Ok(object)
    }

    /// Look up another bean as `T`.
    pub fn get_typed<T: Any + Send + Sync>(&self, name: &str) -> Result<Arc<T>> {
        let bean = self.get(name)?;
        self.container.downcast_bean(name, bean)
    }

    /// Resolve a literal, reference or inner bean.
    pub fn resolve_value(&self, value: &PropertyValue) -> Result<ResolvedValue> {
        match value {
            PropertyValue::Literal(s) => Ok(ResolvedValue::Literal(s.clone())),
            PropertyValue::Reference(name) => self.get(name).map(ResolvedValue::Bean),
            PropertyValue::Inner(inner) => {
                self.container
                    .resolve_inner(self.bean_name, self.definition, inner, self.context)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::definition::SCOPE_SINGLETON;
    use crate::factory::{DisposableBean, ProduceError};
    use crate::scope::StoreScope;
    use crate::strategy::Blueprint;
    use parking_lot::Mutex;
    use std::sync::OnceLock;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    type Log = Arc<Mutex<Vec<String>>>;

    struct Service {
        serial: usize,
    }

    #[derive(Default)]
    struct Node {
        peer: OnceLock<AnyBean>,
    }

    impl Node {
        fn peer(&self) -> Arc<Node> {
            Arc::clone(self.peer.get().unwrap()).downcast::<Node>().unwrap()
        }
    }

    struct Tracker {
        name: String,
        log: Log,
    }

    impl DisposableBean for Tracker {
        fn destroy(&self) -> Result<()> {
            self.log.lock().push(self.name.clone());
            if self.name.starts_with("bad") {
                return Err(DiError::destruction(&self.name, "refused to close"));
            }
            Ok(())
        }
    }

    #[derive(Default, Debug)]
    struct Settings {
        url: OnceLock<String>,
        pool: OnceLock<usize>,
    }

    #[derive(Default)]
    struct Pool {
        started: AtomicBool,
        closed: AtomicBool,
    }

    #[derive(Debug)]
    struct Conn {
        serial: usize,
    }

    #[derive(Default)]
    struct ConnFactory {
        produced: AtomicUsize,
    }

    impl ProducerBean for ConnFactory {
        fn produce(&self) -> std::result::Result<Option<AnyBean>, ProduceError> {
            let serial = self.produced.fetch_add(1, Ordering::SeqCst);
            Ok(Some(Arc::new(Conn { serial }) as AnyBean))
        }

        fn object_type(&self) -> Option<TypeDescriptor> {
            Some(TypeDescriptor::of::<Conn>())
        }
    }

    #[derive(Default)]
    struct PerCallFactory {
        produced: AtomicUsize,
    }

    impl ProducerBean for PerCallFactory {
        fn produce(&self) -> std::result::Result<Option<AnyBean>, ProduceError> {
            let serial = self.produced.fetch_add(1, Ordering::SeqCst);
            Ok(Some(Arc::new(Conn { serial }) as AnyBean))
        }

        fn is_singleton(&self) -> bool {
            false
        }
    }

    struct EmptyFactory;

    impl ProducerBean for EmptyFactory {
        fn produce(&self) -> std::result::Result<Option<AnyBean>, ProduceError> {
            Ok(None)
        }
    }

    /// Yields its target once one has been injected.
    #[derive(Default)]
    struct LazyFactory {
        target: OnceLock<AnyBean>,
    }

    impl ProducerBean for LazyFactory {
        fn produce(&self) -> std::result::Result<Option<AnyBean>, ProduceError> {
            Ok(self.target.get().cloned())
        }
    }

    struct Wrapper(#[allow(dead_code)] AnyBean);

    struct Fixture {
        container: Container,
        blueprints: Arc<BlueprintStrategy>,
        log: Log,
        builds: Arc<AtomicUsize>,
    }

    fn fixture() -> Fixture {
        fixture_with(ContainerConfig::default())
    }

    fn fixture_with(config: ContainerConfig) -> Fixture {
        let log: Log = Arc::default();
        let builds = Arc::new(AtomicUsize::new(0));
        let blueprints = Arc::new(BlueprintStrategy::new());

        let counter = Arc::clone(&builds);
        blueprints.register(Blueprint::of(move |_| {
            Ok(Service {
                serial: counter.fetch_add(1, Ordering::SeqCst),
            })
        }));
        blueprints.register(Blueprint::of(|_| Ok(Node::default())).inject(
            |node: &Node, _prop, value| {
                if let Some(bean) = value.as_bean() {
                    let _ = node.peer.set(Arc::clone(bean));
                }
                Ok(())
            },
        ));
        let tracker_log = Arc::clone(&log);
        blueprints.register(Blueprint::disposable(move |c| {
            Ok(Tracker {
                name: c.name().to_string(),
                log: Arc::clone(&tracker_log),
            })
        }));
        blueprints.register(Blueprint::of(|_| Ok(Settings::default())).inject(
            |settings: &Settings, prop, value| {
                match prop {
                    "url" => {
                        let _ = settings.url.set(value.parse().unwrap_or_default());
                    }
                    "pool" => {
                        let _ = settings.pool.set(value.parse().unwrap_or(1));
                    }
                    other => {
                        return Err(DiError::construction("settings", format!("unknown property '{other}'")));
                    }
                }
                Ok(())
            },
        ));
        blueprints.register(
            Blueprint::of(|_| Ok(Pool::default()))
                .on_init("start", |pool: &Pool| {
                    pool.started.store(true, Ordering::SeqCst);
                    Ok(())
                })
                .on_destroy("close", |pool: &Pool| {
                    pool.closed.store(true, Ordering::SeqCst);
                    Ok(())
                }),
        );
        blueprints.register(Blueprint::producer(|_| Ok(ConnFactory::default())));
        blueprints.register(Blueprint::producer(|_| Ok(PerCallFactory::default())));
        blueprints.register(Blueprint::producer(|_| Ok(EmptyFactory)));
        blueprints.register(Blueprint::producer(|_| Ok(LazyFactory::default())).inject(
            |factory: &LazyFactory, _prop, value| {
                if let Some(bean) = value.as_bean() {
                    let _ = factory.target.set(Arc::clone(bean));
                }
                Ok(())
            },
        ));
        blueprints.register_factory_method(
            "count_args",
            Blueprint::of(|c| Ok(c.explicit_args().map_or(0, <[AnyBean]>::len))),
        );

        let container = Container::builder()
            .strategy(Arc::clone(&blueprints) as Arc<dyn InstantiationStrategy>)
            .config(config)
            .build();
        Fixture {
            container,
            blueprints,
            log,
            builds,
        }
    }

    fn node_pair(container: &Container, prototype: bool) {
        let mut a = BeanDefinition::of::<Node>().property("peer", PropertyValue::reference("b"));
        let mut b = BeanDefinition::of::<Node>().property("peer", PropertyValue::reference("a"));
        if prototype {
            a = a.prototype();
            b = b.prototype();
        }
        container.register_definition("a", a).unwrap();
        container.register_definition("b", b).unwrap();
    }

    // =========================================================================
    // Scopes
    // =========================================================================

    #[test]
    fn test_singleton_identity() {
        let f = fixture();
        f.container
            .register_definition("svc", BeanDefinition::of::<Service>())
            .unwrap();

        let a = f.container.get_typed::<Service>("svc").unwrap();
        let b = f.container.get_typed::<Service>("svc").unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(f.builds.load(Ordering::SeqCst), 1);
        assert!(f.container.is_singleton("svc").unwrap());
    }

    #[test]
    fn test_prototype_freshness() {
        let f = fixture();
        f.container
            .register_definition("svc", BeanDefinition::of::<Service>().prototype())
            .unwrap();

        let a = f.container.get_typed::<Service>("svc").unwrap();
        let b = f.container.get_typed::<Service>("svc").unwrap();
        assert_ne!(a.serial, b.serial);
        assert!(f.container.is_prototype("svc").unwrap());
        assert!(!f.container.is_singleton("svc").unwrap());
    }

    #[test]
    fn test_concurrent_singleton_built_once() {
        let f = fixture();
        f.container
            .register_definition("svc", BeanDefinition::of::<Service>())
            .unwrap();

        let container = &f.container;
        let serials: Vec<usize> = std::thread::scope(|s| {
            let handles: Vec<_> = (0..8)
                .map(|_| s.spawn(move || container.get_typed::<Service>("svc").unwrap().serial))
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        assert!(serials.iter().all(|s| *s == serials[0]));
        assert_eq!(f.builds.load(Ordering::SeqCst), 1);
    }

    struct Slow;

    #[test]
    fn test_unrelated_lookups_do_not_wait_for_slow_singleton() {
        let f = fixture();
        let (started_tx, started_rx) = std::sync::mpsc::channel();
        let (release_tx, release_rx) = std::sync::mpsc::channel::<()>();
        let started_tx = Mutex::new(started_tx);
        let release_rx = Mutex::new(release_rx);
        f.blueprints.register(Blueprint::of(move |_| {
            started_tx.lock().send(()).unwrap();
            release_rx.lock().recv().unwrap();
            Ok(Slow)
        }));
        f.container
            .register_definition("slow", BeanDefinition::of::<Slow>())
            .unwrap();
        f.container
            .register_definition("proto", BeanDefinition::of::<Service>().prototype())
            .unwrap();
        f.container
            .register_definition("svc", BeanDefinition::of::<Service>())
            .unwrap();

        let container = &f.container;
        std::thread::scope(|s| {
            let slow = s.spawn(move || container.get_typed::<Slow>("slow").unwrap());
            started_rx.recv().unwrap();

            // The slow build is parked until released; these must not wait for it
            assert!(container.is_currently_in_creation("slow"));
            container.get_typed::<Service>("proto").unwrap();
            container.get_typed::<Service>("svc").unwrap();
            assert!(container.is_singleton("slow").unwrap());
            assert!(!container.is_currently_in_creation("svc"));

            release_tx.send(()).unwrap();
            let built = slow.join().unwrap();
            assert!(Arc::ptr_eq(&built, &container.get_typed::<Slow>("slow").unwrap()));
        });
        assert!(!f.container.is_currently_in_creation("slow"));
    }

    #[test]
    fn test_failed_build_rolls_back_and_retries() {
        let f = fixture();
        let attempts = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&attempts);
        f.blueprints.register(Blueprint::of(|_| Ok(Node::default())).inject(
            move |node: &Node, _prop, value| {
                if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                    return Err(DiError::construction("flaky", "first attempt refused"));
                }
                if let Some(bean) = value.as_bean() {
                    let _ = node.peer.set(Arc::clone(bean));
                }
                Ok(())
            },
        ));
        f.container
            .register_definition(
                "flaky",
                BeanDefinition::of::<Node>().property("peer", PropertyValue::reference("flaky")),
            )
            .unwrap();

        let err = f.container.get("flaky").unwrap_err();
        assert!(matches!(err.root_cause(), DiError::Construction { .. }));
        assert!(!f.container.is_currently_in_creation("flaky"));
        assert!(f.container.singleton_names().is_empty());

        let first = f.container.get_typed::<Node>("flaky").unwrap();
        let again = f.container.get_typed::<Node>("flaky").unwrap();
        assert!(Arc::ptr_eq(&first, &again));
        assert!(Arc::ptr_eq(&first.peer(), &first));
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
    }

    // =========================================================================
    // Definitions
    // =========================================================================

    #[test]
    fn test_child_definition_merges_parent_properties() {
        let f = fixture();
        f.container
            .register_definition(
                "settingsBase",
                BeanDefinition::of::<Settings>()
                    .abstract_definition()
                    .property("url", PropertyValue::literal("postgres://base"))
                    .property("pool", PropertyValue::literal("4")),
            )
            .unwrap();
        f.container
            .register_definition(
                "settings",
                BeanDefinition::child_of("settingsBase").property("pool", PropertyValue::literal("16")),
            )
            .unwrap();

        let settings = f.container.get_typed::<Settings>("settings").unwrap();
        assert_eq!(settings.url.get().map(String::as_str), Some("postgres://base"));
        assert_eq!(settings.pool.get(), Some(&16));

        f.container.clear_metadata_cache();
        let merged = f.container.merged_definition("settings").unwrap();
        assert!(!merged.is_abstract());
        assert_eq!(merged.type_name(), Some(std::any::type_name::<Settings>()));

        let err = f.container.get("settingsBase").unwrap_err();
        assert!(matches!(err, DiError::AbstractDefinition { .. }));
    }

    #[test]
    fn test_unknown_name_and_missing_parent() {
        let f = fixture();
        assert!(matches!(
            f.container.get("ghost").unwrap_err(),
            DiError::NoSuchDefinition { .. }
        ));
        assert!(f.container.try_get("ghost").is_none());

        f.container
            .register_definition("orphan", BeanDefinition::child_of("missing"))
            .unwrap();
        let err = f.container.get("orphan").unwrap_err();
        assert!(matches!(err, DiError::InvalidDefinition { .. }));
    }

    #[test]
    fn test_reregistration_replaces_singleton() {
        let f = fixture();
        f.container
            .register_definition("tracker", BeanDefinition::of::<Tracker>())
            .unwrap();
        let first = f.container.get("tracker").unwrap();

        f.container
            .register_definition("tracker", BeanDefinition::of::<Tracker>())
            .unwrap();
        assert_eq!(*f.log.lock(), vec!["tracker".to_string()]);

        let second = f.container.get("tracker").unwrap();
        assert!(!Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn test_overriding_disabled() {
        let f = fixture_with(ContainerConfig::new().allow_definition_overriding(false));
        f.container
            .register_definition("svc", BeanDefinition::of::<Service>())
            .unwrap();
        let err = f
            .container
            .register_definition("svc", BeanDefinition::of::<Service>())
            .unwrap_err();
        assert!(matches!(err, DiError::DefinitionOverride { .. }));
    }

    #[test]
    fn test_remove_definition() {
        let f = fixture();
        f.container
            .register_definition("svc", BeanDefinition::of::<Service>())
            .unwrap();
        f.container.get("svc").unwrap();

        f.container.remove_definition("svc").unwrap();
        assert!(!f.container.contains_bean("svc"));
        assert!(matches!(
            f.container.remove_definition("svc").unwrap_err(),
            DiError::NoSuchDefinition { .. }
        ));
    }

    #[test]
    fn test_empty_name_rejected() {
        let f = fixture();
        let err = f
            .container
            .register_definition("", BeanDefinition::of::<Service>())
            .unwrap_err();
        assert!(matches!(err, DiError::InvalidDefinition { .. }));
    }

    // =========================================================================
    // Circular references
    // =========================================================================

    #[test]
    fn test_singleton_reference_cycle_resolves() {
        let f = fixture();
        node_pair(&f.container, false);

        let a = f.container.get_typed::<Node>("a").unwrap();
        let b = f.container.get_typed::<Node>("b").unwrap();
        assert!(Arc::ptr_eq(&a.peer(), &b));
        assert!(Arc::ptr_eq(&b.peer(), &a));
    }

    #[test]
    fn test_prototype_reference_cycle_fails() {
        let f = fixture();
        node_pair(&f.container, true);

        let err = f.container.get("a").unwrap_err();
        assert!(err.is_currently_in_creation(), "unexpected error: {err}");
    }

    #[test]
    fn test_cycle_fails_without_early_references() {
        let f = fixture_with(ContainerConfig::new().allow_circular_references(false));
        node_pair(&f.container, false);

        let err = f.container.get("a").unwrap_err();
        assert!(err.is_currently_in_creation());
        assert!(!f.container.is_currently_in_creation("a"));
        assert!(!f.container.is_currently_in_creation("b"));
    }

    #[test]
    fn test_depends_on_cycle_fails() {
        let f = fixture();
        f.container
            .register_definition("a", BeanDefinition::of::<Service>().depends_on("b"))
            .unwrap();
        f.container
            .register_definition("b", BeanDefinition::of::<Service>().depends_on("a"))
            .unwrap();

        let err = f.container.get("a").unwrap_err();
        assert!(err.is_currently_in_creation());
    }

    #[test]
    fn test_wrapped_early_reference_rejected() {
        struct WrapA;
        impl LifecycleHook for WrapA {
            fn after_initialization(&self, name: &str, bean: AnyBean) -> Result<AnyBean> {
                if name == "a" {
                    return Ok(Arc::new(Wrapper(bean)) as AnyBean);
                }
                Ok(bean)
            }
        }

        let f = fixture();
        f.container.add_hook(Arc::new(WrapA));
        node_pair(&f.container, false);
        let err = f.container.get("a").unwrap_err();
        assert!(err.is_currently_in_creation());
        assert!(!f.container.is_currently_in_creation("a"));

        assert_eq!(f.container.hook_count(), 1);

        let lenient = fixture_with(ContainerConfig::new().allow_raw_injection_despite_wrapping(true));
        lenient.container.add_hook(Arc::new(WrapA));
        node_pair(&lenient.container, false);
        assert!(lenient.container.get_typed::<Wrapper>("a").is_ok());
    }

    // =========================================================================
    // Aliases and hierarchy
    // =========================================================================

    #[test]
    fn test_alias_chain_resolves() {
        let f = fixture();
        f.container
            .register_definition("db", BeanDefinition::of::<Service>())
            .unwrap();
        f.container.register_alias("db", "database").unwrap();
        f.container.register_alias("database", "primary").unwrap();

        assert!(f.container.is_alias("primary"));
        assert!(!f.container.is_alias("db"));

        let direct = f.container.get("db").unwrap();
        let aliased = f.container.get("primary").unwrap();
        assert!(Arc::ptr_eq(&direct, &aliased));

        assert_eq!(
            f.container.get_aliases("db"),
            vec!["database".to_string(), "primary".to_string()]
        );
        assert_eq!(
            f.container.get_aliases("primary"),
            vec!["db".to_string(), "database".to_string()]
        );
    }

    #[test]
    fn test_child_delegates_to_parent() {
        let f = fixture();
        f.container
            .register_definition("svc", BeanDefinition::of::<Service>())
            .unwrap();

        let child = f.container.child();
        assert_eq!(child.depth(), 1);
        assert!(child.contains_bean("svc"));
        assert!(!child.contains_local_bean("svc"));
        assert!(child.is_singleton("svc").unwrap());
        assert!(
            child
                .is_type_match("svc", &TypeDescriptor::of::<Service>())
                .unwrap()
        );

        let from_parent = f.container.get("svc").unwrap();
        let from_child = child.get("svc").unwrap();
        assert!(Arc::ptr_eq(&from_parent, &from_child));

        child
            .register_definition("svc", BeanDefinition::of::<Service>())
            .unwrap();
        let shadowed = child.get("svc").unwrap();
        assert!(!Arc::ptr_eq(&from_parent, &shadowed));
    }

    #[test]
    fn test_child_definition_with_parent_in_ancestor() {
        let f = fixture();
        f.container
            .register_definition(
                "settingsBase",
                BeanDefinition::of::<Settings>()
                    .abstract_definition()
                    .property("url", PropertyValue::literal("mysql://parent")),
            )
            .unwrap();

        let child = f.container.child();
        child
            .register_definition("settings", BeanDefinition::child_of("settingsBase"))
            .unwrap();
        let settings = child.get_typed::<Settings>("settings").unwrap();
        assert_eq!(settings.url.get().map(String::as_str), Some("mysql://parent"));
    }

    // =========================================================================
    // Producers
    // =========================================================================

    #[test]
    fn test_producer_dereference() {
        let f = fixture();
        f.container
            .register_definition("conn", BeanDefinition::of::<ConnFactory>())
            .unwrap();
        f.container
            .register_definition("svc", BeanDefinition::of::<Service>())
            .unwrap();

        assert!(f.container.is_factory_bean("conn").unwrap());
        assert_eq!(
            f.container.get_type("conn").unwrap(),
            Some(TypeDescriptor::of::<Conn>())
        );

        let a = f.container.get_typed::<Conn>("conn").unwrap();
        let b = f.container.get_typed::<Conn>("conn").unwrap();
        assert!(Arc::ptr_eq(&a, &b));

        let factory = f.container.get_typed::<ConnFactory>("&conn").unwrap();
        assert_eq!(factory.produced.load(Ordering::SeqCst), 1);
        assert!(
            f.container
                .is_type_match("&conn", &TypeDescriptor::of::<ConnFactory>())
                .unwrap()
        );

        let err = f.container.get("&svc").unwrap_err();
        assert!(matches!(err, DiError::NotAProducer { .. }));
    }

    #[test]
    fn test_non_singleton_producer() {
        let f = fixture();
        f.container
            .register_definition("conn", BeanDefinition::of::<PerCallFactory>())
            .unwrap();

        let a = f.container.get_typed::<Conn>("conn").unwrap();
        let b = f.container.get_typed::<Conn>("conn").unwrap();
        assert_ne!(a.serial, b.serial);
        assert!(!f.container.is_singleton("conn").unwrap());
        assert!(f.container.is_prototype("conn").unwrap());
        assert!(f.container.is_singleton("&conn").unwrap());
    }

    #[test]
    fn test_empty_producer_yields_null_bean() {
        let f = fixture();
        f.container
            .register_definition("nothing", BeanDefinition::of::<EmptyFactory>())
            .unwrap();

        let object = f.container.get("nothing").unwrap();
        assert!(NullBean::is_null(&object));

        let err = f.container.get_typed::<Conn>("nothing").unwrap_err();
        assert!(matches!(err, DiError::TypeMismatch { ref actual, .. } if actual.ends_with("NullBean")));
    }

    #[test]
    fn test_empty_producer_in_creation_fails() {
        let f = fixture();
        f.container
            .register_definition(
                "conn",
                BeanDefinition::of::<LazyFactory>().property("target", PropertyValue::reference("holder")),
            )
            .unwrap();
        f.container
            .register_definition(
                "holder",
                BeanDefinition::of::<Node>().property("peer", PropertyValue::reference("conn")),
            )
            .unwrap();

        // The holder asks for the producer's object before the producer is wired
        let err = f.container.get("conn").unwrap_err();
        assert!(err.is_currently_in_creation(), "unexpected error: {err}");
        assert!(!f.container.is_currently_in_creation("conn"));
        assert!(!f.container.is_currently_in_creation("holder"));

        // Starting from the holder, the producer is complete when asked
        let holder = f.container.get_typed::<Node>("holder").unwrap();
        assert!(Arc::ptr_eq(&holder.peer(), &holder));
        let conn = f.container.get_typed::<Node>("conn").unwrap();
        assert!(Arc::ptr_eq(&conn, &holder));
    }

    // =========================================================================
    // Arguments and types
    // =========================================================================

    #[test]
    fn test_type_mismatch() {
        let f = fixture();
        f.container
            .register_definition("svc", BeanDefinition::of::<Service>())
            .unwrap();

        let err = f.container.get_typed::<Settings>("svc").unwrap_err();
        match err {
            DiError::TypeMismatch {
                name,
                required,
                actual,
            } => {
                assert_eq!(name, "svc");
                assert!(required.ends_with("Settings"));
                assert!(actual.ends_with("Service"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_explicit_arguments() {
        let f = fixture();
        f.container
            .register_definition("svc", BeanDefinition::of::<Service>())
            .unwrap();
        f.container
            .register_definition("proto", BeanDefinition::of::<Service>().prototype())
            .unwrap();
        f.container
            .register_definition(
                "counted",
                BeanDefinition::untyped().factory_method("count_args").prototype(),
            )
            .unwrap();

        let args: Vec<AnyBean> = vec![Arc::new(1_u8) as AnyBean, Arc::new("two") as AnyBean];
        for name in ["svc", "proto"] {
            let err = f.container.get_with_args(name, &args).unwrap_err();
            assert!(matches!(err, DiError::InvalidArguments { .. }), "{name}: {err}");
        }

        let counted = f.container.get_with_args("counted", &args).unwrap();
        assert_eq!(counted.downcast_ref::<usize>(), Some(&2));
    }

    #[test]
    fn test_inner_bean_injected() {
        let f = fixture();
        f.container
            .register_definition(
                "outer",
                BeanDefinition::of::<Node>()
                    .property("peer", PropertyValue::inner(None, BeanDefinition::of::<Service>())),
            )
            .unwrap();

        let outer = f.container.get_typed::<Node>("outer").unwrap();
        let inner = outer.peer.get().unwrap();
        assert!(inner.is::<Service>());
    }

    #[test]
    fn test_singleton_inner_bean_of_prototype_is_not_shared() {
        let f = fixture();
        f.container
            .register_definition(
                "outer",
                BeanDefinition::of::<Node>().prototype().property(
                    "peer",
                    PropertyValue::inner(
                        Some("tracker"),
                        BeanDefinition::of::<Tracker>().scoped(SCOPE_SINGLETON),
                    ),
                ),
            )
            .unwrap();

        let first = f.container.get_typed::<Node>("outer").unwrap();
        let second = f.container.get_typed::<Node>("outer").unwrap();
        let (a, b) = (first.peer.get().unwrap(), second.peer.get().unwrap());
        assert!(a.is::<Tracker>());
        assert!(!Arc::ptr_eq(a, b));

        // Merged as prototype, so nothing was registered for teardown
        assert!(f.container.singleton_names().is_empty());
        assert!(f.container.dependent_beans("tracker").is_empty());
        f.container.destroy_singletons();
        assert!(f.log.lock().is_empty());
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    #[test]
    fn test_init_and_destroy_methods() {
        let f = fixture();
        f.container
            .register_definition(
                "pool",
                BeanDefinition::of::<Pool>()
                    .init_method("start")
                    .destroy_method("close"),
            )
            .unwrap();

        let pool = f.container.get_typed::<Pool>("pool").unwrap();
        assert!(pool.started.load(Ordering::SeqCst));
        assert!(!pool.closed.load(Ordering::SeqCst));

        f.container.destroy_singletons();
        assert!(pool.closed.load(Ordering::SeqCst));

        let rebuilt = f.container.get_typed::<Pool>("pool").unwrap();
        assert!(!Arc::ptr_eq(&pool, &rebuilt));
    }

    #[test]
    fn test_missing_init_method_fails_construction() {
        let f = fixture();
        f.container
            .register_definition("svc", BeanDefinition::of::<Pool>().init_method("warm_up"))
            .unwrap();
        let err = f.container.get("svc").unwrap_err();
        assert!(matches!(err, DiError::Construction { .. }));
    }

    #[test]
    fn test_shutdown_destroys_dependents_first() {
        let f = fixture();
        f.container
            .register_definition("repo", BeanDefinition::of::<Tracker>().depends_on("db"))
            .unwrap();
        f.container
            .register_definition("db", BeanDefinition::of::<Tracker>())
            .unwrap();
        f.container
            .register_definition("cache", BeanDefinition::of::<Tracker>())
            .unwrap();

        f.container.get("repo").unwrap();
        f.container.get("cache").unwrap();
        assert_eq!(f.container.dependent_beans("db"), vec!["repo".to_string()]);
        assert_eq!(f.container.dependencies_for_bean("repo"), vec!["db".to_string()]);
        assert_eq!(f.container.singleton_names(), vec!["db", "repo", "cache"]);

        f.container.destroy_singletons();
        assert!(f.container.singleton_names().is_empty());

        assert_eq!(
            *f.log.lock(),
            vec!["cache".to_string(), "repo".to_string(), "db".to_string()]
        );
    }

    #[test]
    fn test_destroying_dependency_destroys_dependents() {
        let f = fixture();
        f.container
            .register_definition("db", BeanDefinition::of::<Tracker>())
            .unwrap();
        f.container
            .register_definition("repo", BeanDefinition::of::<Tracker>().depends_on("db"))
            .unwrap();
        let repo = f.container.get("repo").unwrap();

        f.container.destroy_singleton("db");
        assert_eq!(*f.log.lock(), vec!["repo".to_string(), "db".to_string()]);

        let rebuilt = f.container.get("repo").unwrap();
        assert!(!Arc::ptr_eq(&repo, &rebuilt));
    }

    #[test]
    fn test_failed_teardown_does_not_stop_shutdown() {
        let f = fixture();
        for name in ["first", "bad", "last"] {
            f.container
                .register_definition(name, BeanDefinition::of::<Tracker>())
                .unwrap();
            f.container.get(name).unwrap();
        }

        f.container.destroy_singletons();
        assert_eq!(
            *f.log.lock(),
            vec!["last".to_string(), "bad".to_string(), "first".to_string()]
        );
    }

    #[test]
    fn test_pre_instantiate_singletons() {
        let f = fixture();
        f.container
            .register_definition("eager", BeanDefinition::of::<Service>())
            .unwrap();
        f.container
            .register_definition("lazy", BeanDefinition::of::<Service>().lazy())
            .unwrap();
        f.container
            .register_definition("proto", BeanDefinition::of::<Service>().prototype())
            .unwrap();
        f.container
            .register_definition("base", BeanDefinition::of::<Service>().abstract_definition())
            .unwrap();
        f.container
            .register_definition("conn", BeanDefinition::of::<ConnFactory>())
            .unwrap();

        f.container.pre_instantiate_singletons().unwrap();
        assert_eq!(f.builds.load(Ordering::SeqCst), 1);

        let factory = f.container.get_typed::<ConnFactory>("&conn").unwrap();
        assert_eq!(factory.produced.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_hook_short_circuits_instantiation() {
        struct Shortcut;
        impl LifecycleHook for Shortcut {
            fn before_instantiation(
                &self,
                name: &str,
                _definition: &MergedDefinition,
            ) -> Result<Option<BeanInstance>> {
                Ok((name == "answer").then(|| BeanInstance::plain(42_u32)))
            }
        }

        let f = fixture();
        f.container.add_hook(Arc::new(Shortcut));
        f.container
            .register_definition("answer", BeanDefinition::new("app::Unregistered"))
            .unwrap();

        let answer = f.container.get_typed::<u32>("answer").unwrap();
        assert_eq!(*answer, 42);
    }

    #[test]
    fn test_registered_singleton_and_prototype_teardown() {
        let f = fixture();
        f.container
            .register_singleton("manual", BeanInstance::plain(7_i64))
            .unwrap();
        assert_eq!(*f.container.get_typed::<i64>("manual").unwrap(), 7);
        assert!(f.container.is_singleton("manual").unwrap());
        assert!(!f.container.is_prototype("manual").unwrap());
        assert!(matches!(
            f.container
                .register_singleton("manual", BeanInstance::plain(8_i64))
                .unwrap_err(),
            DiError::AlreadyRegistered { .. }
        ));

        f.container
            .register_definition(
                "pooled",
                BeanDefinition::of::<Pool>().prototype().destroy_method("close"),
            )
            .unwrap();
        let object = f.container.get("pooled").unwrap();
        f.container
            .destroy_bean("pooled", &BeanInstance::from_any(Arc::clone(&object)))
            .unwrap();
        let pool = object.downcast::<Pool>().unwrap();
        assert!(pool.closed.load(Ordering::SeqCst));
    }

    // =========================================================================
    // Custom scopes
    // =========================================================================

    #[test]
    fn test_store_scope_lifecycle() {
        let f = fixture();
        let session = Arc::new(StoreScope::new("session"));
        f.container.register_scope("session", session.clone()).unwrap();
        f.container
            .register_definition("cart", BeanDefinition::of::<Tracker>().scoped("session"))
            .unwrap();

        let err = f.container.get("cart").unwrap_err();
        assert!(matches!(err, DiError::ScopeNotActive { ref name, .. } if name == "cart"));

        session.begin();
        let a = f.container.get("cart").unwrap();
        let b = f.container.get("cart").unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert!(!f.container.is_singleton("cart").unwrap());
        assert!(!f.container.is_prototype("cart").unwrap());

        assert_eq!(session.end(), 1);
        assert_eq!(*f.log.lock(), vec!["cart".to_string()]);

        session.begin();
        let c = f.container.get("cart").unwrap();
        assert!(!Arc::ptr_eq(&a, &c));

        f.container.destroy_scoped_instance("cart").unwrap();
        assert_eq!(session.end(), 0);
        assert_eq!(f.log.lock().len(), 2);
    }

    #[test]
    fn test_scope_errors() {
        let f = fixture();
        f.container
            .register_definition("req", BeanDefinition::of::<Service>().scoped("request"))
            .unwrap();
        f.container
            .register_definition("svc", BeanDefinition::of::<Service>())
            .unwrap();

        assert!(matches!(
            f.container.get("req").unwrap_err(),
            DiError::NoSuchScope { .. }
        ));
        assert!(matches!(
            f.container.destroy_scoped_instance("svc").unwrap_err(),
            DiError::NotScoped { .. }
        ));
        assert!(matches!(
            f.container
                .register_scope(SCOPE_SINGLETON, Arc::new(StoreScope::new("x")))
                .unwrap_err(),
            DiError::ReservedScope { .. }
        ));
    }

    #[test]
    fn test_copy_configuration_from() {
        struct WrapEverything;
        impl LifecycleHook for WrapEverything {
            fn after_initialization(&self, _name: &str, bean: AnyBean) -> Result<AnyBean> {
                Ok(Arc::new(Wrapper(bean)) as AnyBean)
            }
        }

        let source = fixture();
        let session = Arc::new(StoreScope::new("session"));
        source.container.register_scope("session", session.clone()).unwrap();
        source.container.add_hook(Arc::new(WrapEverything));

        let target = fixture();
        target.container.copy_configuration_from(&source.container).unwrap();
        target.container.copy_configuration_from(&source.container).unwrap();

        assert_eq!(target.container.hook_count(), 1);
        assert_eq!(target.container.registered_scope_names(), vec!["session".to_string()]);

        target
            .container
            .register_definition("cart", BeanDefinition::of::<Service>().scoped("session"))
            .unwrap();
        session.begin();
        let cart = target.container.get("cart").unwrap();
        assert!(cart.is::<Wrapper>());
        session.end();
    }

    #[test]
    fn test_child_sees_parent_scopes() {
        let f = fixture();
        f.container
            .register_scope("session", Arc::new(StoreScope::new("session")))
            .unwrap();
        let child = f.container.child();
        child
            .register_scope("request", Arc::new(StoreScope::new("request")))
            .unwrap();

        assert_eq!(
            child.registered_scope_names(),
            vec!["request".to_string(), "session".to_string()]
        );
        assert!(child.registered_scope("session").is_some());
        assert!(f.container.registered_scope("request").is_none());
    }
}
