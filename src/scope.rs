//! Pluggable scopes
//!
//! Beyond the built-in singleton and prototype scopes, beans may live in a
//! custom [`Scope`] registered with the container under a string id. The
//! scope decides where instances are kept and when they are torn down.

use crate::definition::{SCOPE_PROTOTYPE, SCOPE_SINGLETON};
use crate::factory::BeanInstance;
use crate::{DiError, Result};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

#[cfg(feature = "logging")]
use tracing::{debug, warn};

/// Callback run when a scoped bean is removed or its scope ends.
pub type DestructionCallback = Box<dyn FnOnce() + Send>;

/// Storage strategy for beans of one custom scope.
pub trait Scope: Send + Sync {
    /// Return the instance for `name`, creating it with `supplier` if the
    /// scope has none.
    ///
    /// Fails with [`DiError::ScopeNotActive`] outside the scope's context.
    fn get(
        &self,
        name: &str,
        supplier: &mut dyn FnMut() -> Result<BeanInstance>,
    ) -> Result<BeanInstance>;

    /// Remove the instance for `name`, dropping its destruction callback.
    fn remove(&self, name: &str) -> Option<BeanInstance>;

    /// Run `callback` when `name` is torn down by the scope.
    fn register_destruction_callback(&self, name: &str, callback: DestructionCallback) -> Result<()>;

    /// Identifier of the current underlying context, if any.
    fn conversation_id(&self) -> Option<String> {
        None
    }
}

// =============================================================================
// Registry
// =============================================================================

/// Custom scopes of one container, keyed by id.
#[derive(Default)]
pub struct ScopeRegistry {
    scopes: RwLock<HashMap<String, Arc<dyn Scope>>>,
}

impl ScopeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `scope` under `id`, replacing any previous one.
    ///
    /// The built-in ids are reserved.
    pub fn register(&self, id: &str, scope: Arc<dyn Scope>) -> Result<()> {
        if id == SCOPE_SINGLETON || id == SCOPE_PROTOTYPE {
            return Err(DiError::ReservedScope {
                scope: id.to_string(),
            });
        }

        #[cfg(feature = "logging")]
        debug!(target: "bean_factory", scope = id, "Registering scope");

        if self.scopes.write().insert(id.to_string(), scope).is_some() {
            #[cfg(feature = "logging")]
            debug!(target: "bean_factory", scope = id, "Replaced previously registered scope");
        }
        Ok(())
    }

    #[inline]
    pub fn get(&self, id: &str) -> Option<Arc<dyn Scope>> {
        self.scopes.read().get(id).cloned()
    }

    /// Registered ids, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.scopes.read().keys().cloned().collect();
        names.sort();
        names
    }
}

impl std::fmt::Debug for ScopeRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScopeRegistry")
            .field("scopes", &self.names())
            .finish()
    }
}

// =============================================================================
// StoreScope
// =============================================================================

/// Unique conversation identifier.
///
/// Each [`StoreScope::begin`] gets a fresh one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConversationId(u64);

impl ConversationId {
    #[inline]
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    #[inline]
    pub fn id(&self) -> u64 {
        self.0
    }
}

impl Default for ConversationId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ConversationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "conversation-{}", self.0)
    }
}

struct Conversation {
    id: ConversationId,
    objects: HashMap<String, BeanInstance>,
    callbacks: Vec<(String, DestructionCallback)>,
}

/// Session-like scope backed by an in-memory store.
///
/// Active between [`begin`](Self::begin) and [`end`](Self::end). Ending runs
/// destruction callbacks in reverse registration order.
///
/// # Examples
///
/// ```rust
/// use bean_factory::{BeanInstance, Scope, StoreScope};
///
/// let session = StoreScope::new("session");
/// assert!(session.get("cart", &mut || Ok(BeanInstance::plain(0_u32))).is_err());
///
/// session.begin();
/// let a = session.get("cart", &mut || Ok(BeanInstance::plain(0_u32))).unwrap();
/// let b = session.get("cart", &mut || Ok(BeanInstance::plain(1_u32))).unwrap();
/// assert!(a.same_object(&b));
/// session.end();
/// ```
pub struct StoreScope {
    id: String,
    current: Mutex<Option<Conversation>>,
}

impl StoreScope {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            current: Mutex::new(None),
        }
    }

    /// The id this scope is meant to be registered under.
    #[inline]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Start a conversation. An already active one is kept.
    pub fn begin(&self) -> ConversationId {
        let mut current = self.current.lock();
        if let Some(active) = current.as_ref() {
            return active.id;
        }
        let id = ConversationId::new();

        #[cfg(feature = "logging")]
        debug!(target: "bean_factory", scope = %self.id, conversation = %id, "Beginning conversation");

        *current = Some(Conversation {
            id,
            objects: HashMap::new(),
            callbacks: Vec::new(),
        });
        id
    }

    /// End the conversation, running destruction callbacks in reverse order.
    ///
    /// Returns the number of callbacks run.
    pub fn end(&self) -> usize {
        let Some(conversation) = self.current.lock().take() else {
            return 0;
        };

        #[cfg(feature = "logging")]
        debug!(
            target: "bean_factory",
            scope = %self.id,
            conversation = %conversation.id,
            callbacks = conversation.callbacks.len(),
            "Ending conversation"
        );

        let count = conversation.callbacks.len();
        for (_name, callback) in conversation.callbacks.into_iter().rev() {
            callback();
        }
        count
    }

    #[inline]
    pub fn is_active(&self) -> bool {
        self.current.lock().is_some()
    }

    /// Number of instances held by the active conversation.
    pub fn len(&self) -> usize {
        self.current.lock().as_ref().map_or(0, |c| c.objects.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn not_active(&self, name: &str) -> DiError {
        DiError::ScopeNotActive {
            name: name.to_string(),
            scope: self.id.clone(),
        }
    }
}

impl Scope for StoreScope {
    fn get(
        &self,
        name: &str,
        supplier: &mut dyn FnMut() -> Result<BeanInstance>,
    ) -> Result<BeanInstance> {
        let conversation = {
            let current = self.current.lock();
            let active = current.as_ref().ok_or_else(|| self.not_active(name))?;
            if let Some(existing) = active.objects.get(name) {
                return Ok(existing.clone());
            }
            active.id
        };

        // The supplier may register callbacks or look up sibling beans
        let created = supplier()?;

        let mut current = self.current.lock();
        match current.as_mut() {
            Some(active) if active.id == conversation => Ok(active
                .objects
                .entry(name.to_string())
                .or_insert(created)
                .clone()),
            _ => Err(self.not_active(name)),
        }
    }

    fn remove(&self, name: &str) -> Option<BeanInstance> {
        let mut current = self.current.lock();
        let active = current.as_mut()?;
        active.callbacks.retain(|(n, _)| n != name);
        active.objects.remove(name)
    }

    fn register_destruction_callback(&self, name: &str, callback: DestructionCallback) -> Result<()> {
        let mut current = self.current.lock();
        match current.as_mut() {
            Some(active) => {
                active.callbacks.push((name.to_string(), callback));
                Ok(())
            }
            None => {
                #[cfg(feature = "logging")]
                warn!(
                    target: "bean_factory",
                    scope = %self.id,
                    bean = name,
                    "Destruction callback registered outside an active conversation"
                );
                Err(self.not_active(name))
            }
        }
    }

    fn conversation_id(&self) -> Option<String> {
        self.current.lock().as_ref().map(|c| c.id.to_string())
    }
}

impl std::fmt::Debug for StoreScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreScope")
            .field("id", &self.id)
            .field("active", &self.is_active())
            .field("objects", &self.len())
            .finish()
    }
}
