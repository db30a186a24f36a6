//! Resolution context handed to factories.

use std::collections::HashMap;
use std::sync::Arc;

use crate::error::{DiError, DiResult};
use crate::registration::AnyService;
use crate::traits::{downcast, Service};

use super::ServiceRegistry;

/// What a factory sees while its service is being constructed.
///
/// Declared dependencies are already resolved (and initialized, unless the
/// service being built is lazy) and can be fetched synchronously with
/// [`get`](ResolveContext::get). Anything else can be resolved on demand with
/// [`resolve`](ResolveContext::resolve); those resolutions share the active
/// path, so a factory that reaches back to a service still under construction
/// gets [`DiError::Circular`] instead of hanging.
///
/// # Examples
///
/// ```
/// use ferrous_lifecycle::{ServiceRegistry, RegisterOptions, Service};
/// use std::sync::Arc;
///
/// struct Logger;
/// impl Service for Logger {}
///
/// struct Api {
///     logger: Arc<Logger>,
/// }
/// impl Service for Api {}
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> ferrous_lifecycle::DiResult<()> {
/// let registry = ServiceRegistry::new();
/// registry.register("logger", |_| async { Ok(Logger) }, RegisterOptions::new());
/// registry.register(
///     "api",
///     |ctx| async move { Ok(Api { logger: ctx.get::<Logger>("logger")? }) },
///     RegisterOptions::new().depends_on(["logger"]),
/// );
///
/// let api = registry.resolve_as::<Api>("api").await?;
/// let logger = registry.resolve_as::<Logger>("logger").await?;
/// assert!(Arc::ptr_eq(&api.logger, &logger));
/// # Ok(())
/// # }
/// ```
pub struct ResolveContext {
    registry: ServiceRegistry,
    path: Vec<String>,
    dependencies: HashMap<String, AnyService>,
}

impl ResolveContext {
    pub(crate) fn new(registry: ServiceRegistry, path: Vec<String>, dependencies: HashMap<String, AnyService>) -> Self {
        Self {
            registry,
            path,
            dependencies,
        }
    }

    /// Name of the service being constructed.
    pub fn name(&self) -> &str {
        self.path.last().map(String::as_str).unwrap_or_default()
    }

    /// The active resolution path, outermost first, ending with [`name`].
    ///
    /// [`name`]: ResolveContext::name
    pub fn path(&self) -> &[String] {
        &self.path
    }

    /// A declared dependency, downcast to `T`.
    ///
    /// Fails with [`DiError::NotFound`] if `name` was not declared.
    pub fn get<T: Service>(&self, name: &str) -> DiResult<Arc<T>> {
        let instance = self.get_any(name).ok_or_else(|| DiError::NotFound(name.to_string()))?;
        downcast(name, instance)
    }

    /// A declared dependency, type-erased.
    pub fn get_any(&self, name: &str) -> Option<AnyService> {
        self.dependencies.get(name).cloned()
    }

    /// Resolves `name` on the active path.
    pub async fn resolve(&self, name: &str) -> DiResult<AnyService> {
        let instance = self
            .registry
            .resolve_on_path(name.to_string(), self.path.clone())
            .await?;
        self.registry.record_edge(self.name(), name);
        Ok(instance)
    }

    /// Resolves `name` on the active path, downcast to `T`.
    pub async fn resolve_as<T: Service>(&self, name: &str) -> DiResult<Arc<T>> {
        let instance = self.resolve(name).await?;
        downcast(name, instance)
    }
}
