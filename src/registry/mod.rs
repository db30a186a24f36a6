//! The service registry: named descriptors, on-demand resolution in
//! dependency order and reverse-order teardown.

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;

use futures::future::{BoxFuture, FutureExt, Shared};

use crate::descriptors::ServiceDescriptor;
use crate::error::{DiError, DiResult, TeardownFailure};
use crate::internal::{find_cycle, lock, reentry};
use crate::observer::{DiObserver, Observers};
use crate::phase::Phase;
use crate::registration::{AnyService, Descriptors, RegisterOptions, ServiceFactory};
use crate::traits::{downcast, Service};

pub mod context;

pub use context::ResolveContext;

type InFlight = Shared<BoxFuture<'static, DiResult<AnyService>>>;
type Initializing = Shared<BoxFuture<'static, DiResult<()>>>;

/// Dependency container for named, interdependent services.
///
/// A registry maps names to [`ServiceDescriptor`]s and holds at most one live
/// instance per name. Instances are built on the first [`resolve`], after all
/// of their declared dependencies, and are torn down by [`teardown_all`] in
/// the exact reverse of the order they were actually built.
///
/// # Thread Safety
///
/// `ServiceRegistry` is a cheap handle (`Arc` inside); clones share the same
/// state. Concurrent resolutions of the same name share a single in-flight
/// construction, so a factory runs at most once per epoch.
///
/// # Examples
///
/// ```
/// use ferrous_lifecycle::{ServiceRegistry, RegisterOptions, Service};
///
/// struct Named(&'static str);
/// impl Service for Named {}
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> ferrous_lifecycle::DiResult<()> {
/// let registry = ServiceRegistry::new();
/// registry
///     .register("logger", |_| async { Ok(Named("logger")) }, RegisterOptions::new())
///     .register("cache", |_| async { Ok(Named("cache")) }, RegisterOptions::new().depends_on(["logger"]))
///     .register("api", |_| async { Ok(Named("api")) }, RegisterOptions::new().depends_on(["logger", "cache"]));
///
/// registry.resolve("api").await?;
/// assert_eq!(registry.construction_order(), vec!["logger", "cache", "api"]);
///
/// registry.teardown_all().await?;
/// assert!(registry.construction_order().is_empty());
/// # Ok(())
/// # }
/// ```
///
/// [`resolve`]: ServiceRegistry::resolve
/// [`teardown_all`]: ServiceRegistry::teardown_all
#[derive(Clone, Default)]
pub struct ServiceRegistry {
    inner: Arc<RegistryInner>,
}

#[derive(Default)]
struct RegistryInner {
    state: Mutex<RegistryState>,
    observers: Observers,
}

#[derive(Default)]
struct RegistryState {
    descriptors: Descriptors,
    instances: HashMap<String, AnyService>,
    initialized: HashSet<String>,
    in_flight: HashMap<String, InFlight>,
    initializing: HashMap<String, Initializing>,
    construction_order: Vec<String>,
    edges: Vec<(String, String)>,
    epoch: u64,
}

impl RegistryState {
    fn record_edge(&mut self, dependent: &str, dependency: &str) {
        if !self.edges.iter().any(|(a, b)| a == dependent && b == dependency) {
            self.edges.push((dependent.to_string(), dependency.to_string()));
        }
    }

    fn clear(&mut self) -> (Vec<String>, HashMap<String, AnyService>) {
        self.epoch += 1;
        self.in_flight.clear();
        self.initializing.clear();
        self.initialized.clear();
        self.edges.clear();
        (
            std::mem::take(&mut self.construction_order),
            std::mem::take(&mut self.instances),
        )
    }
}

/// Outcome of caching a finished construction.
enum Settled {
    Cached(AnyService),
    Failed(DiError),
    Stale(Option<AnyService>, DiError),
}

impl ServiceRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, RegistryState> {
        lock(&self.inner.state)
    }

    /// Attaches an observer for lifecycle events.
    pub fn add_observer(&self, observer: Arc<dyn DiObserver>) -> &Self {
        self.inner.observers.add(observer);
        self
    }

    /// Stores (or replaces) the descriptor for `name`. Nothing is built here.
    ///
    /// Replacing a descriptor does not affect an instance that already
    /// exists; the new factory is used after the next teardown or reset.
    pub fn register<T, F, Fut>(&self, name: impl Into<String>, factory: F, options: RegisterOptions) -> &Self
    where
        T: Service,
        F: Fn(ResolveContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = DiResult<T>> + Send + 'static,
    {
        let erased: ServiceFactory = Arc::new(move |ctx: ResolveContext| {
            let fut = factory(ctx);
            async move {
                let service = fut.await?;
                Ok::<AnyService, DiError>(Arc::new(service))
            }
            .boxed()
        });
        self.register_descriptor(options.into_descriptor(name.into(), erased))
    }

    fn register_descriptor(&self, descriptor: ServiceDescriptor) -> &Self {
        let mut state = self.state();
        for dependency in &descriptor.dependencies {
            if !state.descriptors.contains(dependency) && *dependency != descriptor.name {
                tracing::debug!(
                    service = %descriptor.name,
                    %dependency,
                    "registered with a dependency that is not registered yet"
                );
            }
        }
        let name = descriptor.name.clone();
        let replaced = state.descriptors.insert(descriptor);
        if replaced && state.instances.contains_key(&name) {
            tracing::debug!(service = %name, "descriptor replaced; live instance kept until teardown");
        }
        tracing::trace!(service = %name, replaced, "registered");
        self
    }

    /// Returns the instance for `name`, building it and its dependencies
    /// first if needed.
    ///
    /// # Errors
    ///
    /// - [`DiError::NotFound`] if `name` (or a dependency) is unregistered
    /// - [`DiError::Circular`] if the dependency chain re-enters a name
    /// - [`DiError::Initialization`] if a factory or initialize hook fails
    pub async fn resolve(&self, name: &str) -> DiResult<AnyService> {
        {
            let state = self.state();
            if let Some(instance) = state.instances.get(name) {
                return Ok(instance.clone());
            }
            if !state.descriptors.contains(name) {
                return Err(DiError::NotFound(name.to_string()));
            }
            if let Some(cycle) = find_cycle(name, |n| state.descriptors.dependencies_of(n)) {
                return Err(DiError::Circular(cycle));
            }
        }
        self.resolve_on_path(name.to_string(), Vec::new()).await
    }

    /// Like [`resolve`](Self::resolve), downcast to `T`.
    pub async fn resolve_as<T: Service>(&self, name: &str) -> DiResult<Arc<T>> {
        let instance = self.resolve(name).await?;
        downcast(name, instance)
    }

    pub(crate) fn resolve_on_path(&self, name: String, path: Vec<String>) -> BoxFuture<'static, DiResult<AnyService>> {
        let registry = self.clone();
        async move {
            if let Some(cycle) = reentry(&path, &name) {
                return Err(DiError::Circular(cycle));
            }
            let pending = {
                let mut state = registry.state();
                if let Some(instance) = state.instances.get(&name) {
                    return Ok(instance.clone());
                }
                match state.in_flight.get(&name) {
                    Some(pending) => pending.clone(),
                    None => {
                        let descriptor = state
                            .descriptors
                            .get(&name)
                            .cloned()
                            .ok_or_else(|| DiError::NotFound(name.clone()))?;
                        let pending = registry.clone().construct(descriptor, path, state.epoch).boxed().shared();
                        state.in_flight.insert(name.clone(), pending.clone());
                        pending
                    }
                }
            };
            pending.await
        }
        .boxed()
    }

    async fn construct(self, descriptor: Arc<ServiceDescriptor>, path: Vec<String>, epoch: u64) -> DiResult<AnyService> {
        let name = descriptor.name.clone();
        let started = Instant::now();
        self.inner.observers.resolving(&name);
        tracing::debug!(service = %name, "constructing");

        let result = self.build(&descriptor, path).await;

        let settled = {
            let mut state = self.state();
            if state.epoch != epoch {
                match result {
                    Ok(instance) => Settled::Stale(Some(instance), DiError::Interrupted(name.clone())),
                    Err(error) => Settled::Stale(None, error),
                }
            } else {
                state.in_flight.remove(&name);
                match result {
                    Ok(instance) => {
                        state.instances.insert(name.clone(), instance.clone());
                        state.construction_order.push(name.clone());
                        if !descriptor.lazy {
                            state.initialized.insert(name.clone());
                        }
                        for dependency in &descriptor.dependencies {
                            state.record_edge(&name, dependency);
                        }
                        Settled::Cached(instance)
                    }
                    Err(error) => Settled::Failed(error),
                }
            }
        };

        match settled {
            Settled::Cached(instance) => {
                self.inner.observers.resolved(&name, started.elapsed());
                Ok(instance)
            }
            Settled::Failed(error) => {
                tracing::error!(service = %name, %error, "resolution failed");
                self.inner.observers.initialization_failed(&name, &error);
                Err(error)
            }
            Settled::Stale(instance, error) => {
                tracing::debug!(service = %name, "registry torn down during construction; discarding instance");
                if let Some(instance) = instance {
                    if let Err(cleanup_error) = instance.cleanup().await {
                        tracing::warn!(service = %name, error = %cleanup_error, "cleanup of discarded instance failed");
                    }
                }
                Err(error)
            }
        }
    }

    async fn build(&self, descriptor: &ServiceDescriptor, mut path: Vec<String>) -> DiResult<AnyService> {
        let name = descriptor.name.as_str();
        path.push(name.to_string());

        let mut dependencies = HashMap::with_capacity(descriptor.dependencies.len());
        for dependency in &descriptor.dependencies {
            let instance = self.resolve_on_path(dependency.clone(), path.clone()).await?;
            if !descriptor.lazy {
                self.ensure_initialized(dependency.clone(), instance.clone()).await?;
            }
            dependencies.insert(dependency.clone(), instance);
        }

        let ctx = ResolveContext::new(self.clone(), path, dependencies);
        let instance = (descriptor.factory)(ctx)
            .await
            .map_err(|e| DiError::initialization(name, e))?;

        if !descriptor.lazy {
            if let Err(error) = instance.initialize().await {
                rollback(name, &instance).await;
                return Err(DiError::initialization(name, error));
            }
            tracing::debug!(service = %name, "initialized");
        }
        Ok(instance)
    }

    /// Brings `instance` to initialized, sharing one deferred `initialize()`
    /// among concurrent callers for the same name.
    fn ensure_initialized(&self, name: String, instance: AnyService) -> BoxFuture<'static, DiResult<()>> {
        let registry = self.clone();
        async move {
            let pending = {
                let mut state = registry.state();
                if state.initialized.contains(&name) {
                    return Ok(());
                }
                match state.initializing.get(&name) {
                    Some(pending) => pending.clone(),
                    None => {
                        let pending = registry
                            .clone()
                            .initialize_deferred(name.clone(), instance, state.epoch)
                            .boxed()
                            .shared();
                        state.initializing.insert(name.clone(), pending.clone());
                        pending
                    }
                }
            };
            pending.await
        }
        .boxed()
    }

    async fn initialize_deferred(self, name: String, instance: AnyService, epoch: u64) -> DiResult<()> {
        let result = self.run_deferred(&name, &instance).await;

        let stale = {
            let mut state = self.state();
            if state.epoch == epoch {
                state.initializing.remove(&name);
            }
            let live = state.epoch == epoch
                && state
                    .instances
                    .get(&name)
                    .is_some_and(|cached| Arc::ptr_eq(cached, &instance));
            if live && result.is_ok() {
                state.initialized.insert(name.clone());
            }
            !live
        };

        match result {
            Ok(()) if stale => {
                tracing::debug!(service = %name, "registry torn down during deferred initialization");
                Err(DiError::Interrupted(name))
            }
            other => other,
        }
    }

    /// Initializes declared dependencies depth-first, then the instance
    /// itself. On failure the instance is rolled back and evicted so the
    /// next resolve builds a fresh one.
    async fn run_deferred(&self, name: &str, instance: &AnyService) -> DiResult<()> {
        let dependencies = self
            .state()
            .descriptors
            .dependencies_of(name)
            .map(<[String]>::to_vec)
            .unwrap_or_default();
        for dependency in dependencies {
            let resolved = self.resolve_on_path(dependency.clone(), vec![name.to_string()]).await?;
            self.ensure_initialized(dependency, resolved).await?;
        }

        if let Err(error) = instance.initialize().await {
            rollback(name, instance).await;
            self.evict(name, instance);
            return Err(DiError::initialization(name, error));
        }
        tracing::debug!(service = %name, "initialized");
        Ok(())
    }

    pub(crate) fn record_edge(&self, dependent: &str, dependency: &str) {
        self.state().record_edge(dependent, dependency);
    }

    /// Resolves `name` and forces its `initialize()` if it was built lazily.
    ///
    /// Declared dependencies are initialized first, depth-first in declared
    /// order. An instance whose deferred initialization fails is rolled back
    /// and evicted, so the next call builds a fresh one. A teardown that lands
    /// while the hook runs yields [`DiError::Interrupted`].
    pub async fn initialize_service(&self, name: &str) -> DiResult<AnyService> {
        let instance = self.resolve(name).await?;
        if let Err(error) = self.ensure_initialized(name.to_string(), instance.clone()).await {
            self.inner.observers.initialization_failed(name, &error);
            return Err(error);
        }
        Ok(instance)
    }

    fn evict(&self, name: &str, instance: &AnyService) {
        let mut state = self.state();
        let same = state
            .instances
            .get(name)
            .is_some_and(|cached| Arc::ptr_eq(cached, instance));
        if same {
            state.instances.remove(name);
            state.construction_order.retain(|n| n != name);
            state.edges.retain(|(a, _)| a != name);
        }
    }

    /// Names registered under `phase`, in registration order.
    pub fn services_by_phase(&self, phase: &Phase) -> Vec<String> {
        self.state()
            .descriptors
            .iter()
            .filter(|d| &d.phase == phase)
            .map(|d| d.name.clone())
            .collect()
    }

    /// Cleans up every built instance in reverse construction order, then
    /// clears all instances, in-flight markers and the construction order.
    ///
    /// Every cleanup runs even if earlier ones fail; failures are logged and
    /// returned together as [`DiError::Teardown`]. The registry is empty and
    /// usable again in either case.
    pub async fn teardown_all(&self) -> DiResult<()> {
        let (order, instances) = self.state().clear();
        tracing::info!(count = order.len(), "tearing down services");

        let mut failures = Vec::new();
        for name in order.iter().rev() {
            let Some(instance) = instances.get(name) else {
                continue;
            };
            match instance.cleanup().await {
                Ok(()) => {
                    tracing::debug!(service = %name, "torn down");
                    self.inner.observers.torn_down(name);
                }
                Err(error) => {
                    tracing::error!(service = %name, %error, "cleanup failed during teardown");
                    self.inner.observers.teardown_failed(name, &error);
                    failures.push(TeardownFailure {
                        name: name.clone(),
                        error,
                    });
                }
            }
        }

        if failures.is_empty() {
            Ok(())
        } else {
            Err(DiError::Teardown(failures))
        }
    }

    /// Drops all instances and in-flight state without running cleanup.
    ///
    /// Returns how many instances were dropped.
    pub fn reset(&self) -> usize {
        let (order, _instances) = self.state().clear();
        tracing::debug!(dropped = order.len(), "registry reset");
        order.len()
    }

    /// Names in the order their instances were built.
    pub fn construction_order(&self) -> Vec<String> {
        self.state().construction_order.clone()
    }

    /// `(dependent, dependency)` pairs observed while building.
    pub fn dependency_edges(&self) -> Vec<(String, String)> {
        self.state().edges.clone()
    }

    pub fn descriptor(&self, name: &str) -> Option<ServiceDescriptor> {
        self.state().descriptors.get(name).map(|d| (**d).clone())
    }

    pub fn is_registered(&self, name: &str) -> bool {
        self.state().descriptors.contains(name)
    }

    pub fn is_instantiated(&self, name: &str) -> bool {
        self.state().instances.contains_key(name)
    }

    /// True once `initialize()` ran for the current instance of `name`.
    pub fn is_initialized(&self, name: &str) -> bool {
        self.state().initialized.contains(name)
    }

    /// All registered names, in registration order.
    pub fn registered_names(&self) -> Vec<String> {
        self.state().descriptors.names().map(str::to_string).collect()
    }

    pub(crate) fn with_descriptors<R>(&self, f: impl FnOnce(&Descriptors) -> R) -> R {
        f(&self.state().descriptors)
    }
}

async fn rollback(name: &str, instance: &AnyService) {
    if let Err(error) = instance.cleanup().await {
        tracing::warn!(service = %name, %error, "rollback cleanup failed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Plain;
    impl Service for Plain {}

    struct Flaky {
        cleanups: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Service for Flaky {
        async fn initialize(&self) -> DiResult<()> {
            Err(DiError::failed("not today"))
        }

        async fn cleanup(&self) -> DiResult<()> {
            self.cleanups.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test]
    async fn unregistered_name_is_not_found() {
        let registry = ServiceRegistry::new();
        let err = registry.resolve("ghost").await.err().unwrap();
        assert!(matches!(err, DiError::NotFound(ref n) if n == "ghost"));
    }

    #[tokio::test]
    async fn missing_dependency_is_not_found() {
        let registry = ServiceRegistry::new();
        registry.register("api", |_| async { Ok(Plain) }, RegisterOptions::new().depends_on(["db"]));
        let err = registry.resolve("api").await.err().unwrap();
        assert!(matches!(err, DiError::NotFound(ref n) if n == "db"));
        assert!(!registry.is_instantiated("api"));
    }

    #[tokio::test]
    async fn failed_initialize_is_rolled_back_and_not_cached() {
        let cleanups = Arc::new(AtomicUsize::new(0));
        let registry = ServiceRegistry::new();
        let c = cleanups.clone();
        registry.register("flaky", move |_| {
            let cleanups = c.clone();
            async move { Ok(Flaky { cleanups }) }
        }, RegisterOptions::new());

        let err = registry.resolve("flaky").await.err().unwrap();
        match err {
            DiError::Initialization { name, cause } => {
                assert_eq!(name, "flaky");
                assert!(matches!(&*cause, DiError::Failed(m) if m == "not today"));
            }
            other => panic!("unexpected: {other:?}"),
        }
        assert_eq!(cleanups.load(Ordering::SeqCst), 1);
        assert!(!registry.is_instantiated("flaky"));
        assert!(registry.construction_order().is_empty());
    }

    #[tokio::test]
    async fn factory_error_names_the_service() {
        let registry = ServiceRegistry::new();
        registry.register::<Plain, _, _>("db", |_| async { Err(DiError::failed("refused")) }, RegisterOptions::new());
        registry.register("api", |_| async { Ok(Plain) }, RegisterOptions::new().depends_on(["db"]));

        let err = registry.resolve("api").await.err().unwrap();
        assert_eq!(err.service_name(), Some("db"));
    }

    #[tokio::test]
    async fn reregistration_replaces_descriptor() {
        let registry = ServiceRegistry::new();
        registry.register("svc", |_| async { Ok(Plain) }, RegisterOptions::new().phase("core"));
        registry.register("svc", |_| async { Ok(Plain) }, RegisterOptions::new().phase("feature"));

        assert_eq!(registry.registered_names(), vec!["svc"]);
        assert_eq!(registry.services_by_phase(&Phase::Feature), vec!["svc"]);
        assert!(registry.services_by_phase(&Phase::Core).is_empty());
    }

    #[tokio::test]
    async fn reset_drops_without_cleanup() {
        let cleanups = Arc::new(AtomicUsize::new(0));
        let registry = ServiceRegistry::new();
        let c = cleanups.clone();
        registry.register("flaky", move |_| {
            let cleanups = c.clone();
            async move { Ok(Flaky { cleanups }) }
        }, RegisterOptions::new().lazy());

        registry.resolve("flaky").await.unwrap();
        assert_eq!(registry.reset(), 1);
        assert_eq!(cleanups.load(Ordering::SeqCst), 0);
        assert!(!registry.is_instantiated("flaky"));
    }

    #[tokio::test]
    async fn deferred_initialize_failure_evicts_instance() {
        let cleanups = Arc::new(AtomicUsize::new(0));
        let registry = ServiceRegistry::new();
        let c = cleanups.clone();
        registry.register("flaky", move |_| {
            let cleanups = c.clone();
            async move { Ok(Flaky { cleanups }) }
        }, RegisterOptions::new().lazy());

        registry.resolve("flaky").await.unwrap();
        assert!(registry.is_instantiated("flaky"));
        assert!(!registry.is_initialized("flaky"));

        let err = registry.initialize_service("flaky").await.err().unwrap();
        assert!(matches!(err, DiError::Initialization { .. }));
        assert!(!registry.is_instantiated("flaky"));
        assert_eq!(cleanups.load(Ordering::SeqCst), 1);
    }
}
