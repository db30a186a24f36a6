//! Service descriptors for registration and introspection.

use std::fmt;

use crate::phase::Phase;
use crate::registration::ServiceFactory;

/// Registered metadata for a named service
///
/// Created by [`ServiceRegistry::register`] and replaced wholesale when the
/// same name is registered again. The factory is private; everything else is
/// available for diagnostics.
///
/// # Examples
///
/// ```rust
/// use ferrous_lifecycle::{ServiceRegistry, RegisterOptions, Service, Phase};
///
/// struct Cache;
/// impl Service for Cache {}
///
/// let registry = ServiceRegistry::new();
/// registry.register("cache", |_| async { Ok(Cache) },
///     RegisterOptions::new().depends_on(["logger"]).phase(Phase::Feature).lazy());
///
/// let descriptor = registry.descriptor("cache").unwrap();
/// assert_eq!(descriptor.name, "cache");
/// assert_eq!(descriptor.dependencies, vec!["logger".to_string()]);
/// assert_eq!(descriptor.phase, Phase::Feature);
/// assert!(descriptor.lazy);
/// ```
///
/// [`ServiceRegistry::register`]: crate::ServiceRegistry::register
#[derive(Clone)]
pub struct ServiceDescriptor {
    /// Unique service name
    pub name: String,
    /// Declared dependencies, resolved depth-first in this order
    pub dependencies: Vec<String>,
    /// Classification label
    pub phase: Phase,
    /// Constructed without running `initialize()`
    pub lazy: bool,
    pub(crate) factory: ServiceFactory,
}

impl ServiceDescriptor {
    /// True if `name` is among the declared dependencies.
    pub fn depends_on(&self, name: &str) -> bool {
        self.dependencies.iter().any(|d| d == name)
    }
}

impl fmt::Debug for ServiceDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceDescriptor")
            .field("name", &self.name)
            .field("dependencies", &self.dependencies)
            .field("phase", &self.phase)
            .field("lazy", &self.lazy)
            .finish_non_exhaustive()
    }
}
