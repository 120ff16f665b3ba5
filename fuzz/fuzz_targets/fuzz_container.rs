#![no_main]

//! Fuzz target for random definition graphs
//!
//! Registers definitions with arbitrary references, parents, scopes and
//! depends-on edges, resolves them in arbitrary order and shuts down. Any
//! outcome is acceptable except a panic, a hang, or a broken singleton
//! identity.

use arbitrary::Arbitrary;
use bean_factory::{
    AnyBean, BeanDefinition, Blueprint, BlueprintStrategy, Container, DisposableBean, PropertyValue,
    Result,
};
use libfuzzer_sys::fuzz_target;
use std::sync::{Arc, OnceLock};

const NAMES: [&str; 6] = ["a", "b", "c", "d", "e", "f"];

#[derive(Default)]
struct Node {
    peers: OnceLock<Vec<AnyBean>>,
}

impl DisposableBean for Node {
    fn destroy(&self) -> Result<()> {
        Ok(())
    }
}

#[derive(Debug, Arbitrary)]
enum Scope {
    Singleton,
    Prototype,
}

#[derive(Debug, Arbitrary)]
struct Definition {
    name: u8,
    parent: Option<u8>,
    references: Vec<u8>,
    depends_on: Vec<u8>,
    scope: Scope,
    is_abstract: bool,
}

#[derive(Debug, Arbitrary)]
enum Op {
    Register(Definition),
    Remove(u8),
    Alias(u8, u8),
    Get(u8),
    Dereference(u8),
    IsSingleton(u8),
    GetType(u8),
    DestroySingleton(u8),
    PreInstantiate,
    Shutdown,
}

fn name(index: u8) -> &'static str {
    NAMES[index as usize % NAMES.len()]
}

fn definition(def: &Definition) -> BeanDefinition {
    // Parents only point at earlier names so inheritance chains stay acyclic
    let parent = def
        .parent
        .filter(|p| (*p as usize % NAMES.len()) < (def.name as usize % NAMES.len()));
    let mut bean = match parent {
        Some(parent) => BeanDefinition::child_of(name(parent)),
        None => BeanDefinition::of::<Node>(),
    };
    for (i, reference) in def.references.iter().take(4).enumerate() {
        bean = bean.property(format!("p{i}"), PropertyValue::reference(name(*reference)));
    }
    for dependency in def.depends_on.iter().take(2) {
        bean = bean.depends_on(name(*dependency));
    }
    if matches!(def.scope, Scope::Prototype) {
        bean = bean.prototype();
    }
    if def.is_abstract {
        bean = bean.abstract_definition();
    }
    bean
}

fuzz_target!(|ops: Vec<Op>| {
    let blueprints = Arc::new(BlueprintStrategy::new());
    blueprints.register(Blueprint::disposable(|_| Ok(Node::default())).inject(
        |node: &Node, _prop, value| {
            if let Some(bean) = value.as_bean() {
                let _ = node.peers.set(vec![Arc::clone(bean)]);
            }
            Ok(())
        },
    ));
    let container = Container::with_strategy(blueprints);

    for op in ops.into_iter().take(64) {
        match op {
            Op::Register(def) => {
                let _ = container.register_definition(name(def.name), definition(&def));
            }
            Op::Remove(n) => {
                let _ = container.remove_definition(name(n));
            }
            Op::Alias(n, alias) => {
                let _ = container.register_alias(name(n), &format!("alias_{}", name(alias)));
            }
            Op::Get(n) => {
                let first = container.get(name(n));
                if let (Ok(first), Ok(true)) = (&first, container.is_singleton(name(n))) {
                    if let Ok(second) = container.get(name(n)) {
                        assert!(Arc::ptr_eq(first, &second), "singleton identity broken");
                    }
                }
            }
            Op::Dereference(n) => {
                let _ = container.get(&format!("&{}", name(n)));
            }
            Op::IsSingleton(n) => {
                let _ = container.is_singleton(name(n));
            }
            Op::GetType(n) => {
                let _ = container.get_type(name(n));
            }
            Op::DestroySingleton(n) => container.destroy_singleton(name(n)),
            Op::PreInstantiate => {
                let _ = container.pre_instantiate_singletons();
            }
            Op::Shutdown => container.destroy_singletons(),
        }
    }

    container.destroy_singletons();
});
