//! Container configuration

/// Container-level switches.
///
/// # Examples
///
/// ```rust
/// use bean_factory::{Container, ContainerConfig};
///
/// let config = ContainerConfig::new()
///     .allow_definition_overriding(false)
///     .allow_circular_references(false);
///
/// let container = Container::with_config(config);
/// assert!(!container.config().definition_overriding());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContainerConfig {
    definition_overriding: bool,
    circular_references: bool,
    cache_metadata: bool,
    raw_injection_despite_wrapping: bool,
}

impl ContainerConfig {
    #[inline]
    pub const fn new() -> Self {
        Self {
            definition_overriding: true,
            circular_references: true,
            cache_metadata: true,
            raw_injection_despite_wrapping: false,
        }
    }

    /// Whether registering a definition under a taken name replaces it.
    pub const fn allow_definition_overriding(mut self, allow: bool) -> Self {
        self.definition_overriding = allow;
        self
    }

    /// Whether singletons expose early references to resolve cycles.
    pub const fn allow_circular_references(mut self, allow: bool) -> Self {
        self.circular_references = allow;
        self
    }

    /// Whether merged definitions are cached.
    pub const fn cache_metadata(mut self, cache: bool) -> Self {
        self.cache_metadata = cache;
        self
    }

    /// Whether a singleton may end up wrapped by hooks after its raw
    /// early reference was injected elsewhere.
    pub const fn allow_raw_injection_despite_wrapping(mut self, allow: bool) -> Self {
        self.raw_injection_despite_wrapping = allow;
        self
    }

    #[inline]
    pub const fn definition_overriding(&self) -> bool {
        self.definition_overriding
    }

    #[inline]
    pub const fn circular_references(&self) -> bool {
        self.circular_references
    }

    #[inline]
    pub const fn metadata_caching(&self) -> bool {
        self.cache_metadata
    }

    #[inline]
    pub const fn raw_injection_despite_wrapping(&self) -> bool {
        self.raw_injection_despite_wrapping
    }
}

impl Default for ContainerConfig {
    fn default() -> Self {
        Self::new()
    }
}
