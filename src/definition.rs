//! Bean definitions and their merged (flattened) form
//!
//! A [`BeanDefinition`] is the declarative recipe for one named bean. It may
//! be self-contained or name a parent definition it inherits from. Before a
//! bean is built, the definition is flattened against its ancestor chain into
//! a [`MergedDefinition`] (see [`crate::merge`]).

use once_cell::sync::OnceCell;
use std::any::{Any, TypeId};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// A managed object instance, type-erased for storage.
pub type AnyBean = Arc<dyn Any + Send + Sync>;

/// Scope identifier of the built-in singleton scope.
pub const SCOPE_SINGLETON: &str = "singleton";

/// Scope identifier of the built-in prototype scope.
pub const SCOPE_PROTOTYPE: &str = "prototype";

/// Prefix that asks for a producer itself rather than the object it produces.
pub const PRODUCER_DEREFERENCE: &str = "&";

// =============================================================================
// Scope identifiers
// =============================================================================

/// The scope a definition is built in.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub enum BeanScope {
    /// One instance per container
    #[default]
    Singleton,
    /// A new instance on every request
    Prototype,
    /// A pluggable scope registered with the container under this id
    Custom(String),
}

impl BeanScope {
    /// Parse a scope identifier, mapping the reserved ids to built-ins.
    pub fn parse(id: &str) -> Self {
        match id {
            SCOPE_SINGLETON => Self::Singleton,
            SCOPE_PROTOTYPE => Self::Prototype,
            other => Self::Custom(other.to_string()),
        }
    }

    /// The string identifier of this scope.
    pub fn id(&self) -> &str {
        match self {
            Self::Singleton => SCOPE_SINGLETON,
            Self::Prototype => SCOPE_PROTOTYPE,
            Self::Custom(id) => id,
        }
    }

    #[inline]
    pub fn is_singleton(&self) -> bool {
        matches!(self, Self::Singleton)
    }

    #[inline]
    pub fn is_prototype(&self) -> bool {
        matches!(self, Self::Prototype)
    }
}

impl fmt::Display for BeanScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.id())
    }
}

// =============================================================================
// Identity
// =============================================================================

/// Identity of one registered definition.
///
/// Merged definitions are cached by this id, so re-registering a name always
/// yields a fresh id and can never hit a stale merge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DefinitionId(u64);

impl DefinitionId {
    /// Generate a new unique definition id.
    #[inline]
    pub fn next() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the raw id value.
    #[inline]
    pub fn id(&self) -> u64 {
        self.0
    }
}

// =============================================================================
// Type descriptors
// =============================================================================

/// Describes the runtime type of a bean.
///
/// Definitions only know a type *name*; the `TypeId` is present when the
/// descriptor came from a Rust type or from a live instance.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TypeDescriptor {
    name: String,
    id: Option<TypeId>,
}

impl TypeDescriptor {
    /// Descriptor for a concrete Rust type.
    #[inline]
    pub fn of<T: Any>() -> Self {
        Self {
            name: std::any::type_name::<T>().to_string(),
            id: Some(TypeId::of::<T>()),
        }
    }

    /// Descriptor known only by name.
    #[inline]
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            id: None,
        }
    }

    /// Attach a `TypeId` to a named descriptor.
    #[inline]
    pub fn with_type_id(mut self, id: TypeId) -> Self {
        self.id = Some(id);
        self
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    pub fn type_id(&self) -> Option<TypeId> {
        self.id
    }

    /// Whether a bean of type `other` satisfies this descriptor.
    ///
    /// Compares `TypeId`s when both sides carry one, names otherwise.
    pub fn accepts(&self, other: &TypeDescriptor) -> bool {
        match (self.id, other.id) {
            (Some(a), Some(b)) => a == b,
            _ => self.name == other.name,
        }
    }

    /// Whether a live instance is of this type.
    pub fn matches_instance(&self, bean: &AnyBean) -> bool {
        match self.id {
            Some(id) => Any::type_id(bean.as_ref()) == id,
            None => false,
        }
    }
}

impl fmt::Display for TypeDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

// =============================================================================
// Property values
// =============================================================================

/// A value assigned to a property or constructor argument.
#[derive(Debug, Clone)]
pub enum PropertyValue {
    /// A plain string value, converted by the instantiation strategy
    Literal(String),
    /// A reference to another bean by name (aliases allowed)
    Reference(String),
    /// A bean defined inline, owned by the containing bean
    Inner(Box<InnerBean>),
}

impl PropertyValue {
    #[inline]
    pub fn literal(value: impl Into<String>) -> Self {
        Self::Literal(value.into())
    }

    #[inline]
    pub fn reference(name: impl Into<String>) -> Self {
        Self::Reference(name.into())
    }

    #[inline]
    pub fn inner(name: Option<&str>, definition: BeanDefinition) -> Self {
        Self::Inner(Box::new(InnerBean {
            name: name.map(str::to_string),
            definition,
        }))
    }
}

/// A definition nested inside another definition's property.
#[derive(Debug, Clone)]
pub struct InnerBean {
    pub name: Option<String>,
    pub definition: BeanDefinition,
}

/// Ordered property assignments; assigning a name twice replaces the value.
#[derive(Debug, Clone, Default)]
pub struct PropertyValues(Vec<(String, PropertyValue)>);

impl PropertyValues {
    pub fn set(&mut self, name: impl Into<String>, value: PropertyValue) {
        let name = name.into();
        match self.0.iter_mut().find(|(n, _)| *n == name) {
            Some(slot) => slot.1 = value,
            None => self.0.push((name, value)),
        }
    }

    pub fn get(&self, name: &str) -> Option<&PropertyValue> {
        self.0.iter().find(|(n, _)| n == name).map(|(_, v)| v)
    }

    /// Overlay `other` on top of these values.
    pub fn merge_from(&mut self, other: &PropertyValues) {
        for (name, value) in &other.0 {
            self.set(name.clone(), value.clone());
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &PropertyValue)> {
        self.0.iter().map(|(n, v)| (n.as_str(), v))
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

// =============================================================================
// BeanDefinition
// =============================================================================

/// Declarative recipe for one named bean.
///
/// # Examples
///
/// ```rust
/// use bean_factory::{BeanDefinition, PropertyValue};
///
/// let base = BeanDefinition::new("app::DataSource")
///     .abstract_definition()
///     .property("url", PropertyValue::literal("postgres://localhost"));
///
/// let pooled = BeanDefinition::child_of("dataSourceBase")
///     .property("pool_size", PropertyValue::literal("8"));
///
/// assert!(base.is_abstract());
/// assert_eq!(pooled.parent_name(), Some("dataSourceBase"));
/// ```
#[derive(Debug, Clone)]
pub struct BeanDefinition {
    id: DefinitionId,
    type_name: Option<String>,
    parent: Option<String>,
    scope: Option<BeanScope>,
    is_abstract: bool,
    lazy_init: bool,
    synthetic: bool,
    depends_on: Vec<String>,
    properties: PropertyValues,
    constructor_args: BTreeMap<usize, PropertyValue>,
    factory_bean: Option<String>,
    factory_method: Option<String>,
    init_method: Option<String>,
    destroy_method: Option<String>,
    description: Option<String>,
}

impl BeanDefinition {
    fn blank() -> Self {
        Self {
            id: DefinitionId::next(),
            type_name: None,
            parent: None,
            scope: None,
            is_abstract: false,
            lazy_init: false,
            synthetic: false,
            depends_on: Vec::new(),
            properties: PropertyValues::default(),
            constructor_args: BTreeMap::new(),
            factory_bean: None,
            factory_method: None,
            init_method: None,
            destroy_method: None,
            description: None,
        }
    }

    /// Self-contained definition for the named target type.
    pub fn new(type_name: impl Into<String>) -> Self {
        Self {
            type_name: Some(type_name.into()),
            ..Self::blank()
        }
    }

    /// Self-contained definition whose type name is that of `T`.
    pub fn of<T: Any>() -> Self {
        Self::new(std::any::type_name::<T>())
    }

    /// Child definition inheriting from the named parent definition.
    pub fn child_of(parent: impl Into<String>) -> Self {
        Self {
            parent: Some(parent.into()),
            ..Self::blank()
        }
    }

    /// Definition with no target type, e.g. one built by an instance factory.
    pub fn untyped() -> Self {
        Self::blank()
    }

    pub fn with_type_name(mut self, type_name: impl Into<String>) -> Self {
        self.type_name = Some(type_name.into());
        self
    }

    pub fn with_parent(mut self, parent: impl Into<String>) -> Self {
        self.parent = Some(parent.into());
        self
    }

    pub fn with_scope(mut self, scope: BeanScope) -> Self {
        self.scope = Some(scope);
        self
    }

    /// Scope by identifier (`"singleton"`, `"prototype"` or a custom id).
    pub fn scoped(self, id: &str) -> Self {
        self.with_scope(BeanScope::parse(id))
    }

    pub fn prototype(self) -> Self {
        self.with_scope(BeanScope::Prototype)
    }

    pub fn abstract_definition(mut self) -> Self {
        self.is_abstract = true;
        self
    }

    pub fn lazy(mut self) -> Self {
        self.lazy_init = true;
        self
    }

    /// Mark as container-internal; synthetic beans skip producer post-processing.
    pub fn synthetic(mut self) -> Self {
        self.synthetic = true;
        self
    }

    pub fn depends_on(mut self, name: impl Into<String>) -> Self {
        self.depends_on.push(name.into());
        self
    }

    pub fn property(mut self, name: impl Into<String>, value: PropertyValue) -> Self {
        self.properties.set(name, value);
        self
    }

    pub fn constructor_arg(mut self, index: usize, value: PropertyValue) -> Self {
        self.constructor_args.insert(index, value);
        self
    }

    pub fn factory_bean(mut self, name: impl Into<String>) -> Self {
        self.factory_bean = Some(name.into());
        self
    }

    pub fn factory_method(mut self, name: impl Into<String>) -> Self {
        self.factory_method = Some(name.into());
        self
    }

    pub fn init_method(mut self, name: impl Into<String>) -> Self {
        self.init_method = Some(name.into());
        self
    }

    pub fn destroy_method(mut self, name: impl Into<String>) -> Self {
        self.destroy_method = Some(name.into());
        self
    }

    pub fn description(mut self, text: impl Into<String>) -> Self {
        self.description = Some(text.into());
        self
    }

    /// Give this definition a fresh identity (done on registration).
    pub(crate) fn reidentify(&mut self) {
        self.id = DefinitionId::next();
    }

    #[inline]
    pub fn id(&self) -> DefinitionId {
        self.id
    }

    #[inline]
    pub fn type_name(&self) -> Option<&str> {
        self.type_name.as_deref()
    }

    #[inline]
    pub fn parent_name(&self) -> Option<&str> {
        self.parent.as_deref()
    }

    /// Declared scope, `None` when left at the default.
    #[inline]
    pub fn declared_scope(&self) -> Option<&BeanScope> {
        self.scope.as_ref()
    }

    #[inline]
    pub fn is_abstract(&self) -> bool {
        self.is_abstract
    }

    #[inline]
    pub fn is_lazy_init(&self) -> bool {
        self.lazy_init
    }

    #[inline]
    pub fn dependencies(&self) -> &[String] {
        &self.depends_on
    }

    #[inline]
    pub fn properties(&self) -> &PropertyValues {
        &self.properties
    }
}

// =============================================================================
// MergedDefinition
// =============================================================================

/// A definition flattened against its ancestor chain.
///
/// Immutable once built; shared behind an `Arc` by the merge cache.
#[derive(Debug, Clone)]
pub struct MergedDefinition {
    name: String,
    source: DefinitionId,
    type_name: Option<String>,
    scope: BeanScope,
    is_abstract: bool,
    lazy_init: bool,
    synthetic: bool,
    depends_on: Vec<String>,
    properties: PropertyValues,
    constructor_args: BTreeMap<usize, PropertyValue>,
    factory_bean: Option<String>,
    factory_method: Option<String>,
    init_method: Option<String>,
    destroy_method: Option<String>,
    description: Option<String>,
    resolved_type: OnceCell<Option<TypeDescriptor>>,
}

impl MergedDefinition {
    /// Copy a self-contained definition.
    pub fn from_root(name: &str, def: &BeanDefinition) -> Self {
        Self {
            name: name.to_string(),
            source: def.id,
            type_name: def.type_name.clone(),
            scope: def.scope.clone().unwrap_or_default(),
            is_abstract: def.is_abstract,
            lazy_init: def.lazy_init,
            synthetic: def.synthetic,
            depends_on: def.depends_on.clone(),
            properties: def.properties.clone(),
            constructor_args: def.constructor_args.clone(),
            factory_bean: def.factory_bean.clone(),
            factory_method: def.factory_method.clone(),
            init_method: def.init_method.clone(),
            destroy_method: def.destroy_method.clone(),
            description: def.description.clone(),
            resolved_type: OnceCell::new(),
        }
    }

    /// Deep-copy this (parent) definition and overlay `child` on top.
    ///
    /// Type, factory and callback names are inherited unless the child sets
    /// them. Properties merge by name and constructor arguments by index.
    /// Scope, abstract, lazy-init, depends-on and synthetic always come from
    /// the child.
    pub fn derive_child(&self, name: &str, child: &BeanDefinition) -> Self {
        let mut merged = self.clone();
        merged.name = name.to_string();
        merged.source = child.id;
        merged.resolved_type = OnceCell::new();

        if child.type_name.is_some() {
            merged.type_name = child.type_name.clone();
        }
        if child.factory_bean.is_some() {
            merged.factory_bean = child.factory_bean.clone();
        }
        if child.factory_method.is_some() {
            merged.factory_method = child.factory_method.clone();
        }
        if child.init_method.is_some() {
            merged.init_method = child.init_method.clone();
        }
        if child.destroy_method.is_some() {
            merged.destroy_method = child.destroy_method.clone();
        }
        if child.description.is_some() {
            merged.description = child.description.clone();
        }

        merged.properties.merge_from(&child.properties);
        for (index, value) in &child.constructor_args {
            merged.constructor_args.insert(*index, value.clone());
        }

        merged.scope = child.scope.clone().unwrap_or_default();
        merged.is_abstract = child.is_abstract;
        merged.lazy_init = child.lazy_init;
        merged.depends_on = child.depends_on.clone();
        merged.synthetic = child.synthetic;
        merged
    }

    /// Demote to prototype (inner bean of a non-singleton container).
    pub(crate) fn demote_to_prototype(&mut self) {
        self.scope = BeanScope::Prototype;
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Identity of the definition this was merged from.
    #[inline]
    pub fn source_id(&self) -> DefinitionId {
        self.source
    }

    #[inline]
    pub fn type_name(&self) -> Option<&str> {
        self.type_name.as_deref()
    }

    #[inline]
    pub fn scope(&self) -> &BeanScope {
        &self.scope
    }

    #[inline]
    pub fn is_singleton(&self) -> bool {
        self.scope.is_singleton()
    }

    #[inline]
    pub fn is_prototype(&self) -> bool {
        self.scope.is_prototype()
    }

    #[inline]
    pub fn is_abstract(&self) -> bool {
        self.is_abstract
    }

    #[inline]
    pub fn is_lazy_init(&self) -> bool {
        self.lazy_init
    }

    #[inline]
    pub fn is_synthetic(&self) -> bool {
        self.synthetic
    }

    #[inline]
    pub fn dependencies(&self) -> &[String] {
        &self.depends_on
    }

    #[inline]
    pub fn properties(&self) -> &PropertyValues {
        &self.properties
    }

    #[inline]
    pub fn constructor_args(&self) -> &BTreeMap<usize, PropertyValue> {
        &self.constructor_args
    }

    #[inline]
    pub fn factory_bean(&self) -> Option<&str> {
        self.factory_bean.as_deref()
    }

    #[inline]
    pub fn factory_method(&self) -> Option<&str> {
        self.factory_method.as_deref()
    }

    #[inline]
    pub fn init_method(&self) -> Option<&str> {
        self.init_method.as_deref()
    }

    #[inline]
    pub fn destroy_method(&self) -> Option<&str> {
        self.destroy_method.as_deref()
    }

    #[inline]
    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    /// The predicted bean type, computed once by `predict`.
    pub fn resolved_type<F>(&self, predict: F) -> Option<TypeDescriptor>
    where
        F: FnOnce() -> Option<TypeDescriptor>,
    {
        self.resolved_type.get_or_init(predict).clone()
    }
}

/// Strip every leading dereference prefix from a name.
pub(crate) fn strip_dereference(name: &str) -> &str {
    name.trim_start_matches(PRODUCER_DEREFERENCE)
}

/// Whether a name asks for the producer itself.
#[inline]
pub(crate) fn is_dereference(name: &str) -> bool {
    name.starts_with(PRODUCER_DEREFERENCE)
}
