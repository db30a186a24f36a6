//! Registration options, type-erased factories and descriptor storage.

use std::collections::HashMap;
use std::sync::Arc;

use futures::future::BoxFuture;

use crate::descriptors::ServiceDescriptor;
use crate::error::DiResult;
use crate::phase::Phase;
use crate::registry::ResolveContext;
use crate::traits::Service;

/// Type-erased instance as held by the registry.
pub(crate) type AnyService = Arc<dyn Service>;

/// Type-erased async factory.
pub(crate) type ServiceFactory =
    Arc<dyn Fn(ResolveContext) -> BoxFuture<'static, DiResult<AnyService>> + Send + Sync>;

/// Options accepted by [`ServiceRegistry::register`].
///
/// ```
/// use ferrous_lifecycle::{RegisterOptions, Phase};
///
/// let options = RegisterOptions::new()
///     .depends_on(["logger", "cache"])
///     .phase("feature")
///     .lazy();
/// assert_eq!(options.dependencies(), ["logger", "cache"]);
/// assert_eq!(options.phase_label(), &Phase::Feature);
/// assert!(options.is_lazy());
/// ```
///
/// [`ServiceRegistry::register`]: crate::ServiceRegistry::register
#[derive(Debug, Clone, Default)]
pub struct RegisterOptions {
    dependencies: Vec<String>,
    lazy: bool,
    phase: Phase,
}

impl RegisterOptions {
    /// No dependencies, eager, phase `core`.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends declared dependencies, keeping their order.
    pub fn depends_on<I, S>(mut self, dependencies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.dependencies.extend(dependencies.into_iter().map(Into::into));
        self
    }

    /// Construct on resolve but defer `initialize()`.
    pub fn lazy(mut self) -> Self {
        self.lazy = true;
        self
    }

    pub fn phase(mut self, phase: impl Into<Phase>) -> Self {
        self.phase = phase.into();
        self
    }

    pub fn dependencies(&self) -> &[String] {
        &self.dependencies
    }

    pub fn is_lazy(&self) -> bool {
        self.lazy
    }

    pub fn phase_label(&self) -> &Phase {
        &self.phase
    }

    pub(crate) fn into_descriptor(self, name: String, factory: ServiceFactory) -> ServiceDescriptor {
        ServiceDescriptor {
            name,
            dependencies: self.dependencies,
            phase: self.phase,
            lazy: self.lazy,
            factory,
        }
    }
}

/// Descriptor storage that remembers first-registration order.
#[derive(Default)]
pub(crate) struct Descriptors {
    order: Vec<String>,
    by_name: HashMap<String, Arc<ServiceDescriptor>>,
}

impl Descriptors {
    /// Inserts or replaces; returns true when `name` was already registered.
    pub(crate) fn insert(&mut self, descriptor: ServiceDescriptor) -> bool {
        let name = descriptor.name.clone();
        let replaced = self.by_name.insert(name.clone(), Arc::new(descriptor)).is_some();
        if !replaced {
            self.order.push(name);
        }
        replaced
    }

    pub(crate) fn get(&self, name: &str) -> Option<&Arc<ServiceDescriptor>> {
        self.by_name.get(name)
    }

    pub(crate) fn contains(&self, name: &str) -> bool {
        self.by_name.contains_key(name)
    }

    pub(crate) fn dependencies_of(&self, name: &str) -> Option<&[String]> {
        self.by_name.get(name).map(|d| d.dependencies.as_slice())
    }

    /// Descriptors in registration order.
    pub(crate) fn iter(&self) -> impl Iterator<Item = &Arc<ServiceDescriptor>> {
        self.order.iter().filter_map(|name| self.by_name.get(name))
    }

    pub(crate) fn names(&self) -> impl Iterator<Item = &str> {
        self.order.iter().map(String::as_str)
    }
}
