//! Bean instances and factory indirection
//!
//! A built bean is either a plain object or a *producer*: an object whose job
//! is to yield the real bean. The distinction is a closed enum decided by the
//! instantiation strategy, never by runtime type inspection.
//!
//! Objects obtained from singleton producers are cached here, separately
//! from the producer instances themselves (which live in the singleton
//! registry).

use crate::definition::{AnyBean, TypeDescriptor};
use crate::gate::{BuildGate, Claim};
use crate::{DiError, Result};
use ahash::RandomState;
use dashmap::DashMap;
use once_cell::sync::Lazy;
use std::any::Any;
use std::sync::Arc;
use thiserror::Error;

#[cfg(feature = "logging")]
use tracing::trace;

/// Failure reported by a producer.
#[derive(Error, Debug, Clone)]
pub enum ProduceError {
    /// The producer is not fully initialized yet
    #[error("producer not initialized: {0}")]
    NotInitialized(String),

    /// Object creation failed
    #[error("{0}")]
    Failed(String),
}

/// An object that yields another object (the bean exposed under its name).
///
/// Ask for the producer itself with a `&`-prefixed name.
pub trait ProducerBean: Send + Sync {
    /// Produce the object. `Ok(None)` means "nothing to expose".
    fn produce(&self) -> std::result::Result<Option<AnyBean>, ProduceError>;

    /// Type of the produced object, if known ahead of time.
    fn object_type(&self) -> Option<TypeDescriptor> {
        None
    }

    /// Whether every `produce` call returns the same shared object.
    fn is_singleton(&self) -> bool {
        true
    }

    /// Whether every `produce` call returns an independent object.
    fn is_prototype(&self) -> bool {
        false
    }
}

/// Teardown capability of a bean.
pub trait DisposableBean: Send + Sync {
    fn destroy(&self) -> Result<()>;
}

/// Marker exposed when a producer legitimately yields nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct NullBean;

static NULL_BEAN: Lazy<AnyBean> = Lazy::new(|| Arc::new(NullBean) as AnyBean);

impl NullBean {
    /// The shared null object.
    #[inline]
    pub fn shared() -> AnyBean {
        Arc::clone(&NULL_BEAN)
    }

    /// Whether `bean` is the null object.
    #[inline]
    pub fn is_null(bean: &AnyBean) -> bool {
        bean.is::<NullBean>()
    }
}

// =============================================================================
// BeanInstance
// =============================================================================

#[derive(Clone)]
enum InstanceKind {
    Plain,
    Producer(Arc<dyn ProducerBean>),
}

/// A raw bean as built by the instantiation strategy.
///
/// # Examples
///
/// ```rust
/// use bean_factory::{BeanInstance, DisposableBean, Result};
///
/// struct Pool;
/// impl DisposableBean for Pool {
///     fn destroy(&self) -> Result<()> {
///         Ok(())
///     }
/// }
///
/// let plain = BeanInstance::plain(String::from("config"));
/// assert!(!plain.is_producer());
///
/// let pool = BeanInstance::disposable(Pool);
/// assert!(pool.teardown().is_some());
/// ```
#[derive(Clone)]
pub struct BeanInstance {
    /// Object exposed to callers (may be replaced by lifecycle hooks)
    object: AnyBean,
    kind: InstanceKind,
    teardown: Option<Arc<dyn DisposableBean>>,
    type_name: &'static str,
}

impl BeanInstance {
    /// A plain bean.
    #[inline]
    pub fn plain<T: Any + Send + Sync>(value: T) -> Self {
        Self::from_arc(Arc::new(value))
    }

    /// A plain bean from an existing `Arc`.
    #[inline]
    pub fn from_arc<T: Any + Send + Sync>(value: Arc<T>) -> Self {
        Self {
            object: value as AnyBean,
            kind: InstanceKind::Plain,
            teardown: None,
            type_name: std::any::type_name::<T>(),
        }
    }

    /// A plain bean from an already type-erased object.
    #[inline]
    pub fn from_any(object: AnyBean) -> Self {
        Self {
            object,
            kind: InstanceKind::Plain,
            teardown: None,
            type_name: "<erased>",
        }
    }

    /// A plain bean that must be torn down at shutdown.
    pub fn disposable<T: DisposableBean + Any>(value: T) -> Self {
        let value = Arc::new(value);
        Self {
            teardown: Some(Arc::clone(&value) as Arc<dyn DisposableBean>),
            object: value as AnyBean,
            kind: InstanceKind::Plain,
            type_name: std::any::type_name::<T>(),
        }
    }

    /// A producer. The producer itself is what a `&name` lookup returns.
    pub fn producer<P: ProducerBean + Any>(producer: P) -> Self {
        let producer = Arc::new(producer);
        Self {
            kind: InstanceKind::Producer(Arc::clone(&producer) as Arc<dyn ProducerBean>),
            object: producer as AnyBean,
            teardown: None,
            type_name: std::any::type_name::<P>(),
        }
    }

    /// Attach a teardown capability.
    pub fn with_teardown(mut self, teardown: Arc<dyn DisposableBean>) -> Self {
        self.teardown = Some(teardown);
        self
    }

    /// Replace the exposed object, keeping producer and teardown handles.
    pub fn with_object(mut self, object: AnyBean) -> Self {
        if !Arc::ptr_eq(&self.object, &object) {
            self.type_name = "<wrapped>";
        }
        self.object = object;
        self
    }

    /// The exposed object.
    #[inline]
    pub fn object(&self) -> &AnyBean {
        &self.object
    }

    #[inline]
    pub fn into_object(self) -> AnyBean {
        self.object
    }

    #[inline]
    pub fn is_producer(&self) -> bool {
        matches!(self.kind, InstanceKind::Producer(_))
    }

    #[inline]
    pub fn producer_handle(&self) -> Option<&Arc<dyn ProducerBean>> {
        match &self.kind {
            InstanceKind::Producer(p) => Some(p),
            InstanceKind::Plain => None,
        }
    }

    #[inline]
    pub fn teardown(&self) -> Option<&Arc<dyn DisposableBean>> {
        self.teardown.as_ref()
    }

    /// Name of the concrete type the instance was built from.
    #[inline]
    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    /// Whether two instances expose the same object.
    #[inline]
    pub fn same_object(&self, other: &BeanInstance) -> bool {
        Arc::ptr_eq(&self.object, &other.object)
    }
}

impl std::fmt::Debug for BeanInstance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BeanInstance")
            .field("type_name", &self.type_name)
            .field("producer", &self.is_producer())
            .field("disposable", &self.teardown.is_some())
            .finish()
    }
}

// =============================================================================
// Produced-object cache
// =============================================================================

/// Objects produced by singleton producers, keyed by bean name.
///
/// Production is gated per name, which gives get-or-produce its
/// at-most-once guarantee.
pub struct ProducedObjectCache {
    objects: DashMap<String, AnyBean, RandomState>,
    producing: BuildGate,
}

impl ProducedObjectCache {
    pub fn new() -> Self {
        Self {
            objects: DashMap::with_capacity_and_hasher_and_shard_amount(0, RandomState::new(), 8),
            producing: BuildGate::new(),
        }
    }

    #[inline]
    pub fn get(&self, name: &str) -> Option<AnyBean> {
        self.objects.get(name).map(|o| Arc::clone(o.value()))
    }

    /// Return the cached object or produce and cache it.
    ///
    /// Concurrent callers for the same name wait for one production. A null
    /// result is returned but not cached.
    pub fn get_or_produce<F>(&self, name: &str, produce: F) -> Result<AnyBean>
    where
        F: FnOnce() -> Result<AnyBean>,
    {
        let _producing = loop {
            if let Some(hit) = self.get(name) {
                #[cfg(feature = "logging")]
                trace!(target: "bean_factory", bean = name, "Produced object cache hit");
                return Ok(hit);
            }
            match self.producing.claim(name, || self.objects.contains_key(name)) {
                Claim::Owner(guard) => break guard,
                Claim::Finished => continue,
                Claim::Reentrant | Claim::WouldDeadlock => {
                    return Err(DiError::in_creation(
                        name,
                        "producer's object was requested again while it is being produced",
                    ));
                }
            }
        };
        let object = produce()?;
        if !NullBean::is_null(&object) {
            self.objects.insert(name.to_string(), Arc::clone(&object));
        }
        Ok(object)
    }

    #[inline]
    pub fn remove(&self, name: &str) -> Option<AnyBean> {
        self.objects.remove(name).map(|(_, o)| o)
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn clear(&self) {
        self.objects.clear();
    }
}

impl Default for ProducedObjectCache {
    fn default() -> Self {
        Self::new()
    }
}

/// Ask a producer for its object.
///
/// An empty result while the producer's own singleton is still in creation
/// means "not ready", not "intentionally empty", and is refused.
pub(crate) fn produce_object(
    producer: &dyn ProducerBean,
    name: &str,
    singleton_in_creation: bool,
) -> Result<AnyBean> {
    match producer.produce() {
        Ok(Some(object)) => Ok(object),
        Ok(None) if singleton_in_creation => Err(DiError::in_creation(
            name,
            "producer which is currently in creation returned no object",
        )),
        Ok(None) => Ok(NullBean::shared()),
        Err(ProduceError::NotInitialized(reason)) => Err(DiError::in_creation(name, reason)),
        Err(ProduceError::Failed(reason)) => Err(DiError::construction(
            name,
            format!("producer threw on object creation: {reason}"),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct Counting {
        calls: AtomicU32,
        empty: bool,
    }

    impl ProducerBean for Counting {
        fn produce(&self) -> std::result::Result<Option<AnyBean>, ProduceError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if self.empty {
                Ok(None)
            } else {
                Ok(Some(Arc::new(n) as AnyBean))
            }
        }
    }

    #[test]
    fn test_producer_instance_exposes_itself() {
        let instance = BeanInstance::producer(Counting {
            calls: AtomicU32::new(0),
            empty: false,
        });
        assert!(instance.is_producer());
        assert!(instance.object().is::<Counting>());
    }

    #[test]
    fn test_cache_produces_once() {
        let cache = ProducedObjectCache::new();
        let producer = Counting {
            calls: AtomicU32::new(0),
            empty: false,
        };

        let a = cache
            .get_or_produce("svc", || produce_object(&producer, "svc", false))
            .unwrap();
        let b = cache
            .get_or_produce("svc", || produce_object(&producer, "svc", false))
            .unwrap();

        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(producer.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_empty_result_is_null_unless_in_creation() {
        let producer = Counting {
            calls: AtomicU32::new(0),
            empty: true,
        };

        let object = produce_object(&producer, "svc", false).unwrap();
        assert!(NullBean::is_null(&object));

        let err = produce_object(&producer, "svc", true).unwrap_err();
        assert!(err.is_currently_in_creation());
    }

    #[test]
    fn test_null_results_are_not_cached() {
        let cache = ProducedObjectCache::new();
        let producer = Counting {
            calls: AtomicU32::new(0),
            empty: true,
        };
        for _ in 0..2 {
            cache
                .get_or_produce("svc", || produce_object(&producer, "svc", false))
                .unwrap();
        }
        assert_eq!(cache.len(), 0);
        assert_eq!(producer.calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_with_object_keeps_handles() {
        struct Res;
        impl DisposableBean for Res {
            fn destroy(&self) -> Result<()> {
                Ok(())
            }
        }

        let raw = BeanInstance::disposable(Res);
        let wrapped = raw.clone().with_object(Arc::new("proxy") as AnyBean);
        assert!(wrapped.teardown().is_some());
        assert!(!wrapped.same_object(&raw));
        assert_eq!(wrapped.type_name(), "<wrapped>");
    }
}
