//! Alias resolution
//!
//! Maps user-facing names to canonical bean names. Aliases may point at
//! other aliases; lookups follow the chain to its end. Registrations that
//! would close a loop are rejected, so every lookup terminates.

use crate::definition::strip_dereference;
use crate::{DiError, Result};
use parking_lot::RwLock;
use std::collections::HashMap;

#[cfg(feature = "logging")]
use tracing::debug;

/// Alias table of one container.
#[derive(Debug, Default)]
pub struct AliasRegistry {
    /// alias -> target (a canonical name or another alias)
    aliases: RwLock<HashMap<String, String>>,
}

impl AliasRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `alias` for `name`.
    ///
    /// Re-registering the same pair is a no-op. An alias equal to the name
    /// itself removes any previous alias entry under that name.
    pub fn register(&self, name: &str, alias: &str) -> Result<()> {
        let mut aliases = self.aliases.write();

        if alias == name {
            aliases.remove(alias);
            return Ok(());
        }

        if let Some(existing) = aliases.get(alias) {
            if existing == name {
                return Ok(());
            }
            return Err(DiError::AliasConflict {
                alias: alias.to_string(),
                name: name.to_string(),
                existing: existing.clone(),
            });
        }

        if resolve_in(&aliases, name) == alias {
            return Err(DiError::AliasCycle {
                alias: alias.to_string(),
                name: name.to_string(),
            });
        }

        #[cfg(feature = "logging")]
        debug!(
            target: "bean_factory",
            alias = alias,
            bean = name,
            "Registering alias"
        );

        aliases.insert(alias.to_string(), name.to_string());
        Ok(())
    }

    /// Remove an alias. Returns whether it existed.
    pub fn remove(&self, alias: &str) -> bool {
        self.aliases.write().remove(alias).is_some()
    }

    /// Whether `name` is registered as an alias.
    pub fn is_alias(&self, name: &str) -> bool {
        self.aliases.read().contains_key(name)
    }

    /// Resolve a user-facing name: strip dereference prefixes, follow aliases.
    pub fn canonical_name(&self, name: &str) -> String {
        let aliases = self.aliases.read();
        resolve_in(&aliases, strip_dereference(name)).to_string()
    }

    /// Every alias that resolves (directly or through a chain) to `canonical`.
    ///
    /// Sorted for stable output.
    pub fn aliases_of(&self, canonical: &str) -> Vec<String> {
        let aliases = self.aliases.read();
        let mut found: Vec<String> = aliases
            .keys()
            .filter(|alias| resolve_in(&aliases, alias) == canonical)
            .cloned()
            .collect();
        found.sort();
        found
    }
}

/// Follow the alias chain starting at `name`.
///
/// Registration keeps the table acyclic; the step bound only guards against
/// a table corrupted some other way.
fn resolve_in<'a>(aliases: &'a HashMap<String, String>, name: &'a str) -> &'a str {
    let mut current = name;
    for _ in 0..=aliases.len() {
        match aliases.get(current) {
            Some(next) => current = next,
            None => break,
        }
    }
    current
}
