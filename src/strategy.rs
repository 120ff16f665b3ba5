//! Instantiation strategies
//!
//! The container never constructs objects itself. An
//! [`InstantiationStrategy`] turns a merged definition into a raw instance,
//! injects resolved property values, runs init and destroy methods, and
//! predicts types without instantiating.
//!
//! [`BlueprintStrategy`] is the strategy shipped with the crate: closures
//! registered per type name (or per factory method name).

use crate::container::BeanResolver;
use crate::definition::{AnyBean, MergedDefinition, PropertyValue, TypeDescriptor};
use crate::factory::{BeanInstance, DisposableBean, ProducerBean};
use crate::{DiError, Result};
use ahash::RandomState;
use dashmap::DashMap;
use std::any::Any;
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;

#[cfg(feature = "logging")]
use tracing::debug;

// =============================================================================
// Resolved values
// =============================================================================

/// A property or constructor argument after references are resolved.
#[derive(Clone)]
pub enum ResolvedValue {
    Literal(String),
    Bean(AnyBean),
}

impl ResolvedValue {
    #[inline]
    pub fn as_literal(&self) -> Option<&str> {
        match self {
            Self::Literal(s) => Some(s),
            Self::Bean(_) => None,
        }
    }

    #[inline]
    pub fn as_bean(&self) -> Option<&AnyBean> {
        match self {
            Self::Bean(b) => Some(b),
            Self::Literal(_) => None,
        }
    }

    /// The referenced bean as a concrete type.
    pub fn downcast<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        self.as_bean()
            .and_then(|b| Arc::clone(b).downcast::<T>().ok())
    }

    /// The literal parsed into `T`.
    pub fn parse<T: FromStr>(&self) -> Option<T> {
        self.as_literal().and_then(|s| s.parse().ok())
    }
}

impl std::fmt::Debug for ResolvedValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Literal(s) => f.debug_tuple("Literal").field(s).finish(),
            Self::Bean(_) => f.write_str("Bean(..)"),
        }
    }
}

// =============================================================================
// Construction request
// =============================================================================

/// Everything a strategy gets to build one bean.
pub struct Construction<'a> {
    name: &'a str,
    definition: &'a MergedDefinition,
    explicit_args: Option<&'a [AnyBean]>,
    resolver: &'a BeanResolver<'a>,
}

impl<'a> Construction<'a> {
    pub(crate) fn new(
        name: &'a str,
        definition: &'a MergedDefinition,
        explicit_args: Option<&'a [AnyBean]>,
        resolver: &'a BeanResolver<'a>,
    ) -> Self {
        Self {
            name,
            definition,
            explicit_args,
            resolver,
        }
    }

    #[inline]
    pub fn name(&self) -> &str {
        self.name
    }

    #[inline]
    pub fn definition(&self) -> &MergedDefinition {
        self.definition
    }

    /// Arguments passed to `get_with_args`, if any.
    #[inline]
    pub fn explicit_args(&self) -> Option<&[AnyBean]> {
        self.explicit_args
    }

    /// Resolves other beans inside the current creation context.
    #[inline]
    pub fn resolver(&self) -> &BeanResolver<'a> {
        self.resolver
    }

    /// Declared constructor arguments, resolved, in index order.
    pub fn constructor_args(&self) -> Result<Vec<ResolvedValue>> {
        self.definition
            .constructor_args()
            .values()
            .map(|v| self.resolver.resolve_value(v))
            .collect()
    }

    /// One declared constructor argument, resolved.
    pub fn arg(&self, index: usize) -> Result<Option<ResolvedValue>> {
        self.definition
            .constructor_args()
            .get(&index)
            .map(|v: &PropertyValue| self.resolver.resolve_value(v))
            .transpose()
    }
}

// =============================================================================
// Strategy trait
// =============================================================================

/// Builds raw bean instances for the container.
pub trait InstantiationStrategy: Send + Sync {
    /// Create the raw instance.
    fn instantiate(&self, construction: &Construction<'_>) -> Result<BeanInstance>;

    /// Inject resolved property values into a fresh instance.
    fn apply_properties(
        &self,
        name: &str,
        _definition: &MergedDefinition,
        _instance: &BeanInstance,
        properties: &[(String, ResolvedValue)],
    ) -> Result<()> {
        if properties.is_empty() {
            return Ok(());
        }
        Err(DiError::construction(
            name,
            "instantiation strategy does not support property injection",
        ))
    }

    /// Run init callbacks, including the definition's init method.
    fn initialize(&self, name: &str, definition: &MergedDefinition, _instance: &BeanInstance) -> Result<()> {
        match definition.init_method() {
            None => Ok(()),
            Some(method) => Err(DiError::construction(
                name,
                format!("init method '{method}' cannot be invoked by this strategy"),
            )),
        }
    }

    /// Type the definition will produce, without instantiating it.
    fn predict_type(&self, _name: &str, definition: &MergedDefinition) -> Option<TypeDescriptor> {
        definition.type_name().map(TypeDescriptor::named)
    }

    /// Whether the definition builds a producer.
    fn is_producer(&self, _name: &str, _definition: &MergedDefinition) -> bool {
        false
    }

    /// Invoke a named destroy method on a bean.
    fn invoke_destroy_method(&self, name: &str, _bean: &AnyBean, method: &str) -> Result<()> {
        Err(DiError::destruction(
            name,
            format!("destroy method '{method}' cannot be invoked by this strategy"),
        ))
    }
}

// =============================================================================
// Blueprint strategy
// =============================================================================

type ConstructFn = Box<dyn Fn(&Construction<'_>) -> Result<BeanInstance> + Send + Sync>;
type InjectFn = Box<dyn Fn(&str, &AnyBean, &str, &ResolvedValue) -> Result<()> + Send + Sync>;
type CallbackFn = Box<dyn Fn(&str, &AnyBean) -> Result<()> + Send + Sync>;

/// How to build, wire and tear down beans of one type.
///
/// Property injection and callbacks receive `&T`: beans are shared, so
/// injectable state uses interior mutability.
///
/// # Examples
///
/// ```rust
/// use bean_factory::{Blueprint, BlueprintStrategy};
/// use std::sync::Mutex;
///
/// #[derive(Default)]
/// struct Pool {
///     size: Mutex<usize>,
/// }
///
/// let strategy = BlueprintStrategy::new();
/// strategy.register(
///     Blueprint::of(|_| Ok(Pool::default())).inject(|pool: &Pool, prop, value| {
///         if prop == "size" {
///             *pool.size.lock().unwrap() = value.parse().unwrap_or(1);
///         }
///         Ok(())
///     }),
/// );
/// assert_eq!(strategy.len(), 1);
/// ```
pub struct Blueprint {
    produces: TypeDescriptor,
    producer: bool,
    construct: ConstructFn,
    inject: Option<InjectFn>,
    init_methods: HashMap<String, CallbackFn>,
    destroy_methods: HashMap<String, CallbackFn>,
}

impl Blueprint {
    /// Blueprint for a plain bean of type `T`.
    pub fn of<T, F>(construct: F) -> Self
    where
        T: Any + Send + Sync,
        F: Fn(&Construction<'_>) -> Result<T> + Send + Sync + 'static,
    {
        Self::custom(TypeDescriptor::of::<T>(), move |c| {
            construct(c).map(BeanInstance::plain)
        })
    }

    /// Blueprint for a bean with its own teardown.
    pub fn disposable<T, F>(construct: F) -> Self
    where
        T: DisposableBean + Any,
        F: Fn(&Construction<'_>) -> Result<T> + Send + Sync + 'static,
    {
        Self::custom(TypeDescriptor::of::<T>(), move |c| {
            construct(c).map(BeanInstance::disposable)
        })
    }

    /// Blueprint for a producer of type `P`.
    pub fn producer<P, F>(construct: F) -> Self
    where
        P: ProducerBean + Any,
        F: Fn(&Construction<'_>) -> Result<P> + Send + Sync + 'static,
    {
        let mut blueprint = Self::custom(TypeDescriptor::of::<P>(), move |c| {
            construct(c).map(BeanInstance::producer)
        });
        blueprint.producer = true;
        blueprint
    }

    /// Blueprint building instances directly.
    pub fn custom<F>(produces: TypeDescriptor, construct: F) -> Self
    where
        F: Fn(&Construction<'_>) -> Result<BeanInstance> + Send + Sync + 'static,
    {
        Self {
            produces,
            producer: false,
            construct: Box::new(construct),
            inject: None,
            init_methods: HashMap::new(),
            destroy_methods: HashMap::new(),
        }
    }

    /// Mark a custom blueprint as building producers.
    pub fn as_producer(mut self) -> Self {
        self.producer = true;
        self
    }

    /// Property injection for beans of type `T`.
    pub fn inject<T, F>(mut self, inject: F) -> Self
    where
        T: Any + Send + Sync,
        F: Fn(&T, &str, &ResolvedValue) -> Result<()> + Send + Sync + 'static,
    {
        self.inject = Some(Box::new(move |name, bean, property, value| {
            let target = downcast_target::<T>(name, bean)?;
            inject(target, property, value)
        }));
        self
    }

    /// Named init method for beans of type `T`.
    pub fn on_init<T, F>(mut self, method: impl Into<String>, callback: F) -> Self
    where
        T: Any + Send + Sync,
        F: Fn(&T) -> Result<()> + Send + Sync + 'static,
    {
        self.init_methods.insert(
            method.into(),
            Box::new(move |name, bean| callback(downcast_target::<T>(name, bean)?)),
        );
        self
    }

    /// Named destroy method for beans of type `T`.
    pub fn on_destroy<T, F>(mut self, method: impl Into<String>, callback: F) -> Self
    where
        T: Any + Send + Sync,
        F: Fn(&T) -> Result<()> + Send + Sync + 'static,
    {
        self.destroy_methods.insert(
            method.into(),
            Box::new(move |name, bean| callback(downcast_target::<T>(name, bean)?)),
        );
        self
    }

    #[inline]
    pub fn produces(&self) -> &TypeDescriptor {
        &self.produces
    }

    #[inline]
    pub fn is_producer(&self) -> bool {
        self.producer
    }
}

fn downcast_target<'b, T: Any>(name: &str, bean: &'b AnyBean) -> Result<&'b T> {
    bean.downcast_ref::<T>().ok_or_else(|| {
        DiError::construction(
            name,
            format!("bean is not a {}", std::any::type_name::<T>()),
        )
    })
}

/// Strategy backed by registered [`Blueprint`]s.
///
/// Definitions with a factory method resolve by method name, all others by
/// type name.
pub struct BlueprintStrategy {
    by_type: DashMap<String, Arc<Blueprint>, RandomState>,
    by_factory_method: DashMap<String, Arc<Blueprint>, RandomState>,
}

impl BlueprintStrategy {
    pub fn new() -> Self {
        Self {
            by_type: DashMap::with_hasher(RandomState::new()),
            by_factory_method: DashMap::with_hasher(RandomState::new()),
        }
    }

    /// Register a blueprint under the name of the type it produces.
    pub fn register(&self, blueprint: Blueprint) -> &Self {
        let type_name = blueprint.produces.name().to_string();
        self.register_as(type_name, blueprint)
    }

    /// Register a blueprint under an explicit type name.
    pub fn register_as(&self, type_name: impl Into<String>, blueprint: Blueprint) -> &Self {
        let type_name = type_name.into();

        #[cfg(feature = "logging")]
        debug!(
            target: "bean_factory",
            type_name = %type_name,
            producer = blueprint.producer,
            "Registering blueprint"
        );

        self.by_type.insert(type_name, Arc::new(blueprint));
        self
    }

    /// Register a blueprint for definitions naming `method` as factory method.
    pub fn register_factory_method(&self, method: impl Into<String>, blueprint: Blueprint) -> &Self {
        self.by_factory_method.insert(method.into(), Arc::new(blueprint));
        self
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.by_type.len() + self.by_factory_method.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lookup(&self, definition: &MergedDefinition) -> Option<Arc<Blueprint>> {
        let found = match definition.factory_method() {
            Some(method) => self.by_factory_method.get(method),
            None => definition.type_name().and_then(|t| self.by_type.get(t)),
        };
        found.map(|b| Arc::clone(b.value()))
    }

    fn require(&self, name: &str, definition: &MergedDefinition) -> Result<Arc<Blueprint>> {
        self.lookup(definition).ok_or_else(|| {
            let key = match (definition.factory_method(), definition.type_name()) {
                (Some(method), _) => format!("factory method '{method}'"),
                (None, Some(type_name)) => format!("type '{type_name}'"),
                (None, None) => "a definition without type or factory method".to_string(),
            };
            DiError::construction(name, format!("no blueprint registered for {key}"))
        })
    }
}

impl Default for BlueprintStrategy {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for BlueprintStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlueprintStrategy")
            .field("types", &self.by_type.len())
            .field("factory_methods", &self.by_factory_method.len())
            .finish()
    }
}

impl InstantiationStrategy for BlueprintStrategy {
    fn instantiate(&self, construction: &Construction<'_>) -> Result<BeanInstance> {
        let blueprint = self.require(construction.name(), construction.definition())?;
        (blueprint.construct)(construction)
    }

    fn apply_properties(
        &self,
        name: &str,
        definition: &MergedDefinition,
        instance: &BeanInstance,
        properties: &[(String, ResolvedValue)],
    ) -> Result<()> {
        if properties.is_empty() {
            return Ok(());
        }
        let blueprint = self.require(name, definition)?;
        let inject = blueprint.inject.as_ref().ok_or_else(|| {
            DiError::construction(name, "definition has properties but its blueprint accepts none")
        })?;
        for (property, value) in properties {
            inject(name, instance.object(), property, value)?;
        }
        Ok(())
    }

    fn initialize(&self, name: &str, definition: &MergedDefinition, instance: &BeanInstance) -> Result<()> {
        let Some(method) = definition.init_method() else {
            return Ok(());
        };
        let blueprint = self.require(name, definition)?;
        let callback = blueprint.init_methods.get(method).ok_or_else(|| {
            DiError::construction(name, format!("no init method named '{method}'"))
        })?;
        callback(name, instance.object())
    }

    fn predict_type(&self, _name: &str, definition: &MergedDefinition) -> Option<TypeDescriptor> {
        match self.lookup(definition) {
            Some(blueprint) => Some(blueprint.produces.clone()),
            None => definition.type_name().map(TypeDescriptor::named),
        }
    }

    fn is_producer(&self, _name: &str, definition: &MergedDefinition) -> bool {
        self.lookup(definition).is_some_and(|b| b.producer)
    }

    fn invoke_destroy_method(&self, name: &str, bean: &AnyBean, method: &str) -> Result<()> {
        // Matched by the bean's runtime type; the definition is gone by now
        let owner = self
            .by_type
            .iter()
            .chain(self.by_factory_method.iter())
            .map(|entry| Arc::clone(entry.value()))
            .find(|b| b.produces.matches_instance(bean) && b.destroy_methods.contains_key(method));
        let callback = owner
            .as_ref()
            .and_then(|b| b.destroy_methods.get(method))
            .ok_or_else(|| DiError::destruction(name, format!("no destroy method named '{method}'")))?;
        callback(name, bean)
    }
}
