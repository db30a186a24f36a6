//! Component lifecycle state machine.
//!
//! ```text
//! Uninitialized --initialize()--> Initializing --ok--> Ready
//!                                      |
//!                                      +--err--> (cleanup) --> Destroyed
//! Ready --cleanup()--> CleaningUp --> Destroyed
//! ```
//!
//! A [`Component`] wraps application-defined [`LifecycleHooks`] with this
//! state machine, owns the component's [`ResourceTracker`] and reacts to
//! memory-pressure snapshots.

use std::fmt;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::AbortHandle;

use crate::error::{DiError, DiResult};
use crate::internal::lock;
use crate::memory::{MemorySnapshot, MemoryThresholds, PressureTier};
use crate::resources::ResourceTracker;
use crate::traits::Service;

/// Lifecycle state of a single component.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ComponentState {
    Uninitialized,
    Initializing,
    Ready,
    CleaningUp,
    Destroyed,
}

impl fmt::Display for ComponentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Application logic driven by a [`Component`].
///
/// Both required hooks default to [`DiError::NotImplemented`] naming the
/// missing hook, so a component that forgets one fails loudly instead of
/// silently doing nothing.
///
/// Hooks must not call [`Component::cleanup`] on their own component; the
/// transition lock is held while they run.
#[async_trait]
pub trait LifecycleHooks: Send + Sync + 'static {
    /// Acquires resources, preferably through `resources` so they are
    /// released automatically.
    async fn perform_initialization(&self, _resources: &ResourceTracker) -> DiResult<()> {
        Err(DiError::NotImplemented("perform_initialization"))
    }

    /// Releases whatever the tracker does not cover.
    async fn perform_cleanup(&self) -> DiResult<()> {
        Err(DiError::NotImplemented("perform_cleanup"))
    }

    /// Drops caches and similar state under memory pressure.
    async fn release_non_essential(&self) {}
}

/// A stateful unit with idempotent initialize/cleanup and rollback on failure.
///
/// # Examples
///
/// ```
/// use ferrous_lifecycle::{Component, ComponentState, LifecycleHooks, ResourceTracker, DiResult};
/// use async_trait::async_trait;
/// use std::time::Duration;
///
/// struct Poller;
///
/// #[async_trait]
/// impl LifecycleHooks for Poller {
///     async fn perform_initialization(&self, resources: &ResourceTracker) -> DiResult<()> {
///         resources.track_recurring_timer(|| println!("poll"), Duration::from_secs(5))?;
///         Ok(())
///     }
///
///     async fn perform_cleanup(&self) -> DiResult<()> {
///         Ok(())
///     }
/// }
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> DiResult<()> {
/// let poller = Component::new("poller", Poller);
/// poller.initialize().await?;
/// assert_eq!(poller.state(), ComponentState::Ready);
/// assert_eq!(poller.resources().resource_counts().intervals, 1);
///
/// poller.cleanup().await?;
/// assert_eq!(poller.state(), ComponentState::Destroyed);
/// assert_eq!(poller.resources().resource_counts().total(), 0);
/// # Ok(())
/// # }
/// ```
pub struct Component<H> {
    name: String,
    hooks: H,
    state: Mutex<ComponentState>,
    transition: tokio::sync::Mutex<()>,
    resources: ResourceTracker,
    thresholds: MemoryThresholds,
    peak: Mutex<Option<MemorySnapshot>>,
    memory_watch: Mutex<Option<AbortHandle>>,
}

impl<H> fmt::Debug for Component<H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Component")
            .field("name", &self.name)
            .field("state", &self.state())
            .field("resources", &self.resources)
            .finish()
    }
}

impl<H> Component<H> {
    /// Component with a default tracker and default memory watermarks.
    pub fn new(name: impl Into<String>, hooks: H) -> Self {
        Self {
            name: name.into(),
            hooks,
            state: Mutex::new(ComponentState::Uninitialized),
            transition: tokio::sync::Mutex::new(()),
            resources: ResourceTracker::new(),
            thresholds: MemoryThresholds::default(),
            peak: Mutex::new(None),
            memory_watch: Mutex::new(None),
        }
    }

    /// Replaces the resource tracker (e.g. one with a custom scheduler).
    pub fn with_tracker(mut self, resources: ResourceTracker) -> Self {
        self.resources = resources;
        self
    }

    pub fn with_thresholds(mut self, thresholds: MemoryThresholds) -> Self {
        self.thresholds = thresholds;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn hooks(&self) -> &H {
        &self.hooks
    }

    pub fn resources(&self) -> &ResourceTracker {
        &self.resources
    }

    pub fn thresholds(&self) -> MemoryThresholds {
        self.thresholds
    }

    pub fn state(&self) -> ComponentState {
        *lock(&self.state)
    }

    pub fn is_ready(&self) -> bool {
        self.state() == ComponentState::Ready
    }

    /// Highest-ratio snapshot seen so far.
    pub fn peak_memory(&self) -> Option<MemorySnapshot> {
        *lock(&self.peak)
    }

    fn set_state(&self, state: ComponentState) {
        let mut current = lock(&self.state);
        tracing::debug!(component = %self.name, from = %*current, to = %state, "state transition");
        *current = state;
    }

    fn stop_memory_watch(&self) {
        if let Some(task) = lock(&self.memory_watch).take() {
            task.abort();
        }
    }
}

impl<H: LifecycleHooks> Component<H> {
    /// Runs `perform_initialization` unless already `Ready`.
    ///
    /// A call that arrives while another initialize is running waits for it
    /// and returns `Ok` once the component is `Ready`. On failure the component is rolled back through [`cleanup`] and ends
    /// `Destroyed`; the original error is returned.
    ///
    /// [`cleanup`]: Component::cleanup
    pub async fn initialize(&self) -> DiResult<()> {
        if self.state() == ComponentState::Ready {
            return Ok(());
        }
        let _transition = self.transition.lock().await;
        if self.state() == ComponentState::Ready {
            return Ok(());
        }

        self.set_state(ComponentState::Initializing);
        match self.hooks.perform_initialization(&self.resources).await {
            Ok(()) => {
                self.set_state(ComponentState::Ready);
                Ok(())
            }
            Err(error) => {
                tracing::error!(component = %self.name, %error, "initialization failed, rolling back");
                if let Err(cleanup_error) = self.cleanup_locked().await {
                    tracing::warn!(component = %self.name, error = %cleanup_error, "rollback cleanup failed");
                }
                Err(error)
            }
        }
    }

    /// Runs `perform_cleanup`, then always releases the tracker.
    ///
    /// Waits for an in-flight [`initialize`](Component::initialize) to finish
    /// first. A `perform_cleanup` failure is returned only after every
    /// tracked resource has been released.
    pub async fn cleanup(&self) -> DiResult<()> {
        if self.state() == ComponentState::Destroyed {
            return Ok(());
        }
        let _transition = self.transition.lock().await;
        self.cleanup_locked().await
    }

    async fn cleanup_locked(&self) -> DiResult<()> {
        if self.state() == ComponentState::Destroyed {
            return Ok(());
        }
        self.set_state(ComponentState::CleaningUp);
        self.stop_memory_watch();

        let hook_result = self.hooks.perform_cleanup().await;
        if let Err(error) = &hook_result {
            tracing::error!(component = %self.name, %error, "perform_cleanup failed");
        }

        let report = self.resources.cleanup();
        tracing::debug!(
            component = %self.name,
            released = report.released,
            failed = report.failed,
            "resources released"
        );

        self.set_state(ComponentState::Destroyed);
        hook_result
    }

    /// Releases only non-essential resources: the hooks' own caches and
    /// tracker entries marked non-essential.
    pub async fn cleanup_non_essential(&self) {
        self.hooks.release_non_essential().await;
        let report = self.resources.cleanup_non_essential();
        tracing::debug!(component = %self.name, released = report.released, "non-essential resources released");
    }

    /// Applies the tiered memory-pressure response for one snapshot.
    pub async fn on_memory_snapshot(&self, snapshot: MemorySnapshot) -> PressureTier {
        let ratio = snapshot.ratio();
        {
            let mut peak = lock(&self.peak);
            if peak.map_or(true, |p| ratio > p.ratio()) {
                *peak = Some(snapshot);
            }
        }

        let tier = self.thresholds.classify(ratio);
        match tier {
            PressureTier::Critical => {
                tracing::warn!(component = %self.name, ratio, "critical memory pressure, releasing all tracked resources");
                self.cleanup_non_essential().await;
                let report = self.resources.cleanup();
                tracing::debug!(
                    component = %self.name,
                    released = report.released,
                    failed = report.failed,
                    "tracked resources released under critical pressure"
                );
            }
            PressureTier::Moderate => {
                tracing::info!(component = %self.name, ratio, "moderate memory pressure");
                self.cleanup_non_essential().await;
            }
            PressureTier::None => {}
        }
        tier
    }
}

impl<H: LifecycleHooks> Component<H> {
    /// Feeds snapshots from `signal` into [`on_memory_snapshot`] on a
    /// background task until the component is cleaned up or dropped.
    ///
    /// [`on_memory_snapshot`]: Component::on_memory_snapshot
    pub fn watch_memory(self: &Arc<Self>, mut signal: broadcast::Receiver<MemorySnapshot>) {
        let component = Arc::downgrade(self);
        let task = tokio::spawn(async move {
            loop {
                match signal.recv().await {
                    Ok(snapshot) => {
                        let Some(component) = component.upgrade() else {
                            break;
                        };
                        component.on_memory_snapshot(snapshot).await;
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        tracing::debug!(skipped, "memory signal lagged");
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        });
        if let Some(previous) = lock(&self.memory_watch).replace(task.abort_handle()) {
            previous.abort();
        }
    }
}

impl<H> Drop for Component<H> {
    fn drop(&mut self) {
        self.stop_memory_watch();
    }
}

#[async_trait]
impl<H: LifecycleHooks> Service for Component<H> {
    async fn initialize(&self) -> DiResult<()> {
        Component::initialize(self).await
    }

    async fn cleanup(&self) -> DiResult<()> {
        Component::cleanup(self).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resources::{EventBus, ReleaseReport};
    use std::any::Any;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[derive(Default)]
    struct Probe {
        inits: AtomicUsize,
        cleanups: AtomicUsize,
        shed: AtomicUsize,
        fail_init: bool,
        fail_cleanup: bool,
        bus: Arc<EventBus>,
    }

    #[async_trait]
    impl LifecycleHooks for Arc<Probe> {
        async fn perform_initialization(&self, resources: &ResourceTracker) -> DiResult<()> {
            self.inits.fetch_add(1, Ordering::SeqCst);
            resources.track_listener(self.bus.clone(), "change", Arc::new(|_: &dyn Any| {}))?;
            resources.track_non_essential(Arc::new(|| -> DiResult<()> { Ok(()) }));
            if self.fail_init {
                return Err(DiError::failed("boom"));
            }
            Ok(())
        }

        async fn perform_cleanup(&self) -> DiResult<()> {
            self.cleanups.fetch_add(1, Ordering::SeqCst);
            if self.fail_cleanup {
                return Err(DiError::failed("cleanup boom"));
            }
            Ok(())
        }

        async fn release_non_essential(&self) {
            self.shed.fetch_add(1, Ordering::SeqCst);
        }
    }

    struct Bare;
    impl LifecycleHooks for Bare {}

    #[tokio::test]
    async fn initialize_twice_runs_hook_once() {
        let probe = Arc::new(Probe::default());
        let component = Component::new("probe", probe.clone());

        component.initialize().await.unwrap();
        component.initialize().await.unwrap();

        assert_eq!(probe.inits.load(Ordering::SeqCst), 1);
        assert!(component.is_ready());
    }

    #[tokio::test]
    async fn failed_initialize_rolls_back() {
        let probe = Arc::new(Probe { fail_init: true, ..Probe::default() });
        let component = Component::new("probe", probe.clone());

        let err = component.initialize().await.unwrap_err();
        assert!(matches!(err, DiError::Failed(ref m) if m == "boom"));
        assert_eq!(component.state(), ComponentState::Destroyed);
        assert_eq!(probe.cleanups.load(Ordering::SeqCst), 1);
        assert_eq!(probe.bus.listener_count("change"), 0);
        assert!(component.resources().is_empty());
    }

    #[tokio::test]
    async fn cleanup_failure_still_releases_tracker() {
        let probe = Arc::new(Probe { fail_cleanup: true, ..Probe::default() });
        let component = Component::new("probe", probe.clone());
        component.initialize().await.unwrap();
        assert_eq!(probe.bus.listener_count("change"), 1);

        let err = component.cleanup().await.unwrap_err();
        assert!(matches!(err, DiError::Failed(ref m) if m == "cleanup boom"));
        assert_eq!(probe.bus.listener_count("change"), 0);
        assert_eq!(component.resources().cleanup(), ReleaseReport::default());
        assert_eq!(component.state(), ComponentState::Destroyed);
    }

    #[tokio::test]
    async fn cleanup_is_idempotent() {
        let probe = Arc::new(Probe::default());
        let component = Component::new("probe", probe.clone());
        component.initialize().await.unwrap();

        component.cleanup().await.unwrap();
        component.cleanup().await.unwrap();
        assert_eq!(probe.cleanups.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn missing_hooks_are_reported_by_name() {
        let component = Component::new("bare", Bare);
        let err = component.initialize().await.unwrap_err();
        assert!(matches!(err, DiError::NotImplemented("perform_initialization")));

        let component = Component::new("bare", Bare);
        let err = component.cleanup().await.unwrap_err();
        assert!(matches!(err, DiError::NotImplemented("perform_cleanup")));
        assert_eq!(component.state(), ComponentState::Destroyed);
    }

    struct Slow {
        log: Arc<Mutex<Vec<&'static str>>>,
    }

    #[async_trait]
    impl LifecycleHooks for Slow {
        async fn perform_initialization(&self, _resources: &ResourceTracker) -> DiResult<()> {
            self.log.lock().unwrap().push("init-start");
            tokio::time::sleep(Duration::from_millis(20)).await;
            self.log.lock().unwrap().push("init-end");
            Ok(())
        }

        async fn perform_cleanup(&self) -> DiResult<()> {
            self.log.lock().unwrap().push("cleanup");
            Ok(())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn cleanup_waits_for_inflight_initialize() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let component = Arc::new(Component::new("slow", Slow { log: log.clone() }));

        let init = tokio::spawn({
            let component = component.clone();
            async move { component.initialize().await }
        });
        tokio::task::yield_now().await;
        assert_eq!(component.state(), ComponentState::Initializing);

        // A second initialize waits for the running one.
        component.initialize().await.unwrap();
        assert_eq!(component.state(), ComponentState::Ready);
        assert_eq!(*log.lock().unwrap(), vec!["init-start", "init-end"]);

        component.cleanup().await.unwrap();
        init.await.unwrap().unwrap();

        assert_eq!(*log.lock().unwrap(), vec!["init-start", "init-end", "cleanup"]);
        assert_eq!(component.state(), ComponentState::Destroyed);
    }

    #[tokio::test]
    async fn memory_tiers_drive_shedding() {
        let probe = Arc::new(Probe::default());
        let component = Component::new("probe", probe.clone());
        component.initialize().await.unwrap();

        assert_eq!(component.on_memory_snapshot(MemorySnapshot::new(50, 100)).await, PressureTier::None);
        assert_eq!(probe.shed.load(Ordering::SeqCst), 0);
        assert_eq!(component.resources().resource_counts().total(), 2);

        assert_eq!(component.on_memory_snapshot(MemorySnapshot::new(85, 100)).await, PressureTier::Moderate);
        assert_eq!(probe.shed.load(Ordering::SeqCst), 1);
        assert_eq!(component.resources().resource_counts().handles, 0);
        assert_eq!(component.resources().resource_counts().listeners, 1);

        assert_eq!(component.on_memory_snapshot(MemorySnapshot::new(95, 100)).await, PressureTier::Critical);
        assert!(component.resources().is_empty());
        assert_eq!(probe.bus.listener_count("change"), 0);

        assert_eq!(component.peak_memory(), Some(MemorySnapshot::new(95, 100)));
    }

    #[tokio::test]
    async fn watch_memory_reacts_to_signal() {
        let probe = Arc::new(Probe::default());
        let component = Arc::new(Component::new("probe", probe.clone()));
        component.initialize().await.unwrap();

        let (tx, rx) = broadcast::channel(4);
        component.watch_memory(rx);
        tx.send(MemorySnapshot::new(96, 100)).unwrap();

        for _ in 0..50 {
            if component.resources().is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        assert!(component.resources().is_empty());

        component.cleanup().await.unwrap();
        assert_eq!(component.state(), ComponentState::Destroyed);
        assert_eq!(component.peak_memory(), Some(MemorySnapshot::new(96, 100)));
    }
}
