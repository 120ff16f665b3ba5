//! Error types for bean construction and lifecycle

use thiserror::Error;

/// Errors that can occur while defining, resolving or destroying beans
#[derive(Error, Debug, Clone)]
pub enum DiError {
    /// Name not resolvable anywhere in the container hierarchy
    #[error("No bean named '{name}' is defined")]
    NoSuchDefinition { name: String },

    /// Attempted to instantiate a definition marked abstract
    #[error("Bean definition '{name}' is abstract and cannot be instantiated")]
    AbstractDefinition { name: String },

    /// Definition is malformed or its parent definition cannot be resolved
    #[error("Invalid bean definition '{name}': {reason}")]
    InvalidDefinition {
        name: String,
        reason: String,
        #[source]
        source: Option<Box<DiError>>,
    },

    /// Explicit arguments passed where the definition does not accept them
    #[error("Invalid arguments for bean '{name}': {reason}")]
    InvalidArguments { name: String, reason: String },

    /// Genuine unresolvable cycle, or a producer that is not ready yet
    #[error("Bean '{name}' is currently in creation: {reason}")]
    CurrentlyInCreation { name: String, reason: String },

    /// A custom scope is referenced outside of its active context
    #[error(
        "Scope '{scope}' is not active for bean '{name}'; consider defining a scoped proxy \
         for this bean if you intend to refer to it from a singleton"
    )]
    ScopeNotActive { name: String, scope: String },

    /// No scope registered under the definition's scope identifier
    #[error("No scope registered for scope '{scope}' (bean '{name}')")]
    NoSuchScope { name: String, scope: String },

    /// Attempted to override one of the built-in scopes
    #[error("Cannot replace built-in scope '{scope}'")]
    ReservedScope { scope: String },

    /// Operation requires a custom-scoped bean
    #[error("Bean '{name}' does not correspond to an object in a custom scope")]
    NotScoped { name: String },

    /// Resolved object does not satisfy the requested type
    #[error("Bean '{name}' is of type {actual} but {required} was required")]
    TypeMismatch {
        name: String,
        required: String,
        actual: String,
    },

    /// Dereference-prefixed lookup of something that is not a producer
    #[error("Bean '{name}' is not a producer and cannot be dereferenced")]
    NotAProducer { name: String },

    /// Instantiation strategy or lifecycle hook failed during build
    #[error("Error creating bean '{name}': {reason}")]
    Construction {
        name: String,
        reason: String,
        #[source]
        source: Option<Box<DiError>>,
    },

    /// Teardown of a single bean failed (logged, never propagated by shutdown)
    #[error("Error destroying bean '{name}': {reason}")]
    Destruction { name: String, reason: String },

    /// Alias already points at a different bean
    #[error("Cannot register alias '{alias}' for bean '{name}': already registered for '{existing}'")]
    AliasConflict {
        alias: String,
        name: String,
        existing: String,
    },

    /// Alias registration would close a loop
    #[error("Cannot register alias '{alias}' for bean '{name}': circular alias reference")]
    AliasCycle { alias: String, name: String },

    /// A definition with this name exists and overriding is disabled
    #[error("Cannot register bean definition '{name}': a definition is already bound and overriding is disabled")]
    DefinitionOverride { name: String },

    /// Manual singleton registration of an occupied name
    #[error("Singleton already registered: {name}")]
    AlreadyRegistered { name: String },

    /// Singleton creation requested during shutdown
    #[error("Singleton '{name}' cannot be created while singletons are being destroyed")]
    DestroyInProgress { name: String },
}

impl DiError {
    /// Create a NoSuchDefinition error
    #[inline]
    pub fn no_such_definition(name: impl Into<String>) -> Self {
        Self::NoSuchDefinition { name: name.into() }
    }

    /// Create a CurrentlyInCreation error
    #[inline]
    pub fn in_creation(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::CurrentlyInCreation {
            name: name.into(),
            reason: reason.into(),
        }
    }

    /// Create a Construction error without a nested cause
    #[inline]
    pub fn construction(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Construction {
            name: name.into(),
            reason: reason.into(),
            source: None,
        }
    }

    /// Wrap `cause` as the reason a bean could not be created.
    ///
    /// A cause that is already a construction error for the same bean is
    /// passed through unchanged so nested failures do not stack up.
    pub fn construction_caused_by(name: &str, reason: impl Into<String>, cause: DiError) -> Self {
        if let Self::Construction { name: inner, .. } = &cause {
            if inner == name {
                return cause;
            }
        }
        Self::Construction {
            name: name.to_string(),
            reason: reason.into(),
            source: Some(Box::new(cause)),
        }
    }

    /// Create an InvalidDefinition error
    #[inline]
    pub fn invalid_definition(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidDefinition {
            name: name.into(),
            reason: reason.into(),
            source: None,
        }
    }

    /// Create a Destruction error
    #[inline]
    pub fn destruction(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Destruction {
            name: name.into(),
            reason: reason.into(),
        }
    }

    /// Follow nested causes down to the innermost error
    pub fn root_cause(&self) -> &DiError {
        let mut current = self;
        loop {
            match current {
                Self::Construction {
                    source: Some(inner), ..
                }
                | Self::InvalidDefinition {
                    source: Some(inner), ..
                } => current = inner,
                _ => return current,
            }
        }
    }

    /// Whether this error, or any cause it wraps, reports a creation cycle
    pub fn is_currently_in_creation(&self) -> bool {
        matches!(self.root_cause(), Self::CurrentlyInCreation { .. })
    }
}

/// Result type alias for container operations
pub type Result<T> = std::result::Result<T, DiError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_root_cause_walks_nested_construction_errors() {
        let inner = DiError::in_creation("a", "cycle");
        let mid = DiError::construction_caused_by("b", "reference to 'a'", inner);
        let outer = DiError::construction_caused_by("c", "reference to 'b'", mid);

        assert!(outer.is_currently_in_creation());
        assert!(matches!(outer.root_cause(), DiError::CurrentlyInCreation { name, .. } if name == "a"));
    }

    #[test]
    fn test_same_bean_construction_is_not_rewrapped() {
        let first = DiError::construction("a", "boom");
        let again = DiError::construction_caused_by("a", "outer", first);
        match again {
            DiError::Construction { reason, source, .. } => {
                assert_eq!(reason, "boom");
                assert!(source.is_none());
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_scope_not_active_message_suggests_proxy() {
        let err = DiError::ScopeNotActive {
            name: "cart".into(),
            scope: "session".into(),
        };
        assert!(err.to_string().contains("scoped proxy"));
    }
}
