//! # bean-factory - Named Object Graphs with Managed Lifecycles
//!
//! A container that builds objects ("beans") from named, declarative
//! definitions, shares or re-creates them according to their scope, wires
//! them to each other by name, and tears them down in dependency order.
//!
//! ## Features
//!
//! - **Definition inheritance** - child definitions overlay an abstract or concrete parent
//! - **Scopes** - singleton, prototype, and pluggable custom scopes
//! - **Circular references** - singleton cycles resolve through early references
//! - **Producers** - a bean may yield another object; `&name` returns the producer itself
//! - **Aliases** - chains collapse to one canonical name
//! - **Hierarchy** - child containers delegate unknown names to their parent
//! - **Ordered teardown** - dependents are destroyed before what they depend on
//! - **Lock-free reads** - finished singletons come out of a `DashMap` without locking
//! - **Observable** - optional `tracing` events under the `bean_factory` target
//!
//! ## Quick Start
//!
//! ```rust
//! use bean_factory::{BeanDefinition, Blueprint, BlueprintStrategy, Container};
//! use std::sync::Arc;
//!
//! struct Clock;
//!
//! let blueprints = Arc::new(BlueprintStrategy::new());
//! blueprints.register(Blueprint::of(|_| Ok(Clock)));
//!
//! let container = Container::with_strategy(blueprints);
//! container.register_definition("clock", BeanDefinition::of::<Clock>()).unwrap();
//! container.register_alias("clock", "time").unwrap();
//!
//! let a = container.get_typed::<Clock>("clock").unwrap();
//! let b = container.get_typed::<Clock>("time").unwrap();
//! assert!(Arc::ptr_eq(&a, &b));
//! ```
//!
//! ## Scopes
//!
//! ```rust
//! use bean_factory::{BeanDefinition, Blueprint, BlueprintStrategy, Container, StoreScope};
//! use std::sync::Arc;
//! use std::sync::atomic::{AtomicU64, Ordering};
//!
//! static NEXT: AtomicU64 = AtomicU64::new(0);
//! struct RequestId(u64);
//!
//! let blueprints = Arc::new(BlueprintStrategy::new());
//! blueprints.register(Blueprint::of(|_| Ok(RequestId(NEXT.fetch_add(1, Ordering::SeqCst)))));
//!
//! let container = Container::with_strategy(blueprints);
//! let session = Arc::new(StoreScope::new("session"));
//! container.register_scope("session", session.clone()).unwrap();
//!
//! container
//!     .register_definition("fresh", BeanDefinition::of::<RequestId>().prototype())
//!     .unwrap();
//! container
//!     .register_definition("per_session", BeanDefinition::of::<RequestId>().scoped("session"))
//!     .unwrap();
//!
//! let a = container.get_typed::<RequestId>("fresh").unwrap();
//! let b = container.get_typed::<RequestId>("fresh").unwrap();
//! assert_ne!(a.0, b.0);
//!
//! session.begin();
//! let s1 = container.get_typed::<RequestId>("per_session").unwrap();
//! let s2 = container.get_typed::<RequestId>("per_session").unwrap();
//! assert!(Arc::ptr_eq(&s1, &s2));
//! session.end();
//! ```
//!
//! ## Container Hierarchy
//!
//! ```rust
//! use bean_factory::{BeanDefinition, Blueprint, BlueprintStrategy, Container};
//! use std::sync::Arc;
//!
//! struct AppConfig;
//!
//! let blueprints = Arc::new(BlueprintStrategy::new());
//! blueprints.register(Blueprint::of(|_| Ok(AppConfig)));
//!
//! let root = Container::with_strategy(blueprints);
//! root.register_definition("config", BeanDefinition::of::<AppConfig>()).unwrap();
//!
//! let child = root.child();
//! assert!(child.contains_bean("config"));
//! assert!(!child.contains_local_bean("config"));
//! assert!(Arc::ptr_eq(&root.get("config").unwrap(), &child.get("config").unwrap()));
//! ```

mod alias;
mod config;
mod container;
mod context;
mod definition;
mod disposal;
mod error;
mod factory;
mod gate;
mod hooks;
#[cfg(feature = "logging")]
pub mod logging;
mod merge;
mod scope;
mod singleton;
mod storage;
mod strategy;

pub use config::ContainerConfig;
pub use container::{BeanResolver, Container, ContainerBuilder};
pub use context::CreationContext;
pub use definition::{
    AnyBean, BeanDefinition, BeanScope, DefinitionId, InnerBean, MergedDefinition,
    PRODUCER_DEREFERENCE, PropertyValue, PropertyValues, SCOPE_PROTOTYPE, SCOPE_SINGLETON,
    TypeDescriptor,
};
pub use error::*;
pub use factory::{BeanInstance, DisposableBean, NullBean, ProduceError, ProducerBean};
pub use hooks::LifecycleHook;
pub use scope::{ConversationId, DestructionCallback, Scope, ScopeRegistry, StoreScope};
pub use storage::{DefinitionRegistry, DefinitionSource};
pub use strategy::{Blueprint, BlueprintStrategy, Construction, InstantiationStrategy, ResolvedValue};

// Re-export tracing macros for convenience when logging feature is enabled
#[cfg(feature = "logging")]
pub use tracing::{debug, error, info, trace, warn};

pub use std::sync::Arc;

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::{
        AnyBean, BeanDefinition, BeanInstance, Blueprint, BlueprintStrategy, Container, DiError,
        LifecycleHook, ProducerBean, PropertyValue, Result, Scope, StoreScope,
    };
    pub use std::sync::Arc;
}
