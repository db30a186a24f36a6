//! Per-component tracking of externally acquired resources.
//!
//! A [`ResourceTracker`] is owned by exactly one component. Every listener,
//! timer and opaque handle the component acquires goes through it, so that a
//! single [`ResourceTracker::cleanup`] call releases all of them, even when
//! some individual releases fail.

use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use crate::error::{DiError, DiResult};
use crate::internal::lock;

pub mod platform;

pub use platform::{EventBus, EventHandler, EventSource, Release, Scheduler, TimerCallback, TimerId, TokioScheduler};

/// Kind of a tracked resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    /// Event subscription
    Listener,
    /// One-shot timer
    Timer,
    /// Recurring timer
    Interval,
    /// Opaque external reference
    Handle,
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ResourceKind::Listener => "listener",
            ResourceKind::Timer => "timer",
            ResourceKind::Interval => "interval",
            ResourceKind::Handle => "handle",
        })
    }
}

/// Whether a resource survives moderate memory pressure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Retention {
    /// Needed for correctness; released only by a full cleanup
    #[default]
    Essential,
    /// Caches, history buffers and the like; shed under moderate pressure
    NonEssential,
}

/// Diagnostic snapshot of what a tracker currently holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ResourceCounts {
    pub listeners: usize,
    pub timers: usize,
    pub intervals: usize,
    pub handles: usize,
}

impl ResourceCounts {
    /// Sum over all kinds.
    pub fn total(&self) -> usize {
        self.listeners + self.timers + self.intervals + self.handles
    }
}

/// Outcome of a release pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ReleaseReport {
    /// Resources released successfully
    pub released: usize,
    /// Resources whose release failed (already logged)
    pub failed: usize,
}

type ReleaseAction = Box<dyn FnOnce() -> DiResult<()> + Send>;

/// A (kind, target, release-action) entry.
struct TrackedResource {
    kind: ResourceKind,
    target: String,
    retention: Retention,
    release: ReleaseAction,
}

/// Registry of externally acquired resources with guaranteed bulk release.
///
/// # Examples
///
/// ```
/// use ferrous_lifecycle::{ResourceTracker, EventBus, EventSource, EventHandler};
/// use std::any::Any;
/// use std::sync::Arc;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> ferrous_lifecycle::DiResult<()> {
/// let bus = Arc::new(EventBus::new());
/// let tracker = ResourceTracker::new();
///
/// let handler: EventHandler = Arc::new(|_: &dyn Any| {});
/// tracker.track_listener(bus.clone(), "resize", handler)?;
/// tracker.track_timer(|| println!("tick"), std::time::Duration::from_secs(60))?;
/// assert_eq!(tracker.resource_counts().total(), 2);
///
/// tracker.cleanup();
/// assert_eq!(bus.listener_count("resize"), 0);
/// assert_eq!(tracker.resource_counts().total(), 0);
/// # Ok(())
/// # }
/// ```
pub struct ResourceTracker {
    scheduler: Arc<dyn Scheduler>,
    entries: Mutex<Vec<TrackedResource>>,
}

impl Default for ResourceTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ResourceTracker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResourceTracker")
            .field("counts", &self.resource_counts())
            .finish()
    }
}

impl ResourceTracker {
    /// Tracker scheduling timers on the current tokio runtime.
    pub fn new() -> Self {
        Self::with_scheduler(Arc::new(TokioScheduler::new()))
    }

    /// Tracker scheduling timers through `scheduler`.
    pub fn with_scheduler(scheduler: Arc<dyn Scheduler>) -> Self {
        Self {
            scheduler,
            entries: Mutex::new(Vec::new()),
        }
    }

    fn entries(&self) -> MutexGuard<'_, Vec<TrackedResource>> {
        lock(&self.entries)
    }

    fn record(&self, kind: ResourceKind, target: String, retention: Retention, release: ReleaseAction) {
        tracing::trace!(%kind, %target, "tracking resource");
        self.entries().push(TrackedResource {
            kind,
            target,
            retention,
            release,
        });
    }

    /// Subscribes `handler` to `event` on `source` and records the
    /// subscription. Tracking the same tuple twice records two entries.
    pub fn track_listener(
        &self,
        source: Arc<dyn EventSource>,
        event: &str,
        handler: EventHandler,
    ) -> DiResult<()> {
        source.subscribe(event, handler.clone())?;
        let event_name = event.to_string();
        self.record(
            ResourceKind::Listener,
            event.to_string(),
            Retention::Essential,
            Box::new(move || source.unsubscribe(&event_name, &handler)),
        );
        Ok(())
    }

    /// Schedules `callback` once after `delay` and records the timer.
    pub fn track_timer<F>(&self, callback: F, delay: Duration) -> DiResult<TimerId>
    where
        F: FnOnce() + Send + 'static,
    {
        self.track_timer_with(callback, delay, Retention::Essential)
    }

    /// Like [`track_timer`](Self::track_timer) with an explicit retention.
    pub fn track_timer_with<F>(&self, callback: F, delay: Duration, retention: Retention) -> DiResult<TimerId>
    where
        F: FnOnce() + Send + 'static,
    {
        let id = self.scheduler.schedule_once(Box::new(callback), delay)?;
        let scheduler = self.scheduler.clone();
        self.record(
            ResourceKind::Timer,
            format!("timer#{}", id.0),
            retention,
            Box::new(move || scheduler.cancel(id)),
        );
        Ok(id)
    }

    /// Schedules `callback` every `interval` and records the timer.
    pub fn track_recurring_timer<F>(&self, callback: F, interval: Duration) -> DiResult<TimerId>
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.track_recurring_timer_with(callback, interval, Retention::Essential)
    }

    /// Like [`track_recurring_timer`](Self::track_recurring_timer) with an
    /// explicit retention.
    pub fn track_recurring_timer_with<F>(
        &self,
        callback: F,
        interval: Duration,
        retention: Retention,
    ) -> DiResult<TimerId>
    where
        F: Fn() + Send + Sync + 'static,
    {
        let id = self.scheduler.schedule_recurring(Arc::new(callback), interval)?;
        let scheduler = self.scheduler.clone();
        self.record(
            ResourceKind::Interval,
            format!("interval#{}", id.0),
            retention,
            Box::new(move || scheduler.cancel(id)),
        );
        Ok(id)
    }

    /// Records an opaque reference to release on cleanup.
    pub fn track_handle(&self, handle: Arc<dyn Release>) {
        self.track_handle_with(handle, Retention::Essential)
    }

    /// Records a cache-like reference that moderate memory pressure may shed.
    pub fn track_non_essential(&self, handle: Arc<dyn Release>) {
        self.track_handle_with(handle, Retention::NonEssential)
    }

    /// Records an opaque reference with an explicit retention.
    pub fn track_handle_with(&self, handle: Arc<dyn Release>, retention: Retention) {
        self.record(
            ResourceKind::Handle,
            "handle".to_string(),
            retention,
            Box::new(move || handle.release()),
        );
    }

    /// Releases every tracked resource, newest first.
    ///
    /// Individual failures (errors or panics) are logged and skipped. The
    /// tracker is empty afterwards. Safe to call repeatedly.
    pub fn cleanup(&self) -> ReleaseReport {
        let drained = std::mem::take(&mut *self.entries());
        release_all(drained)
    }

    /// Releases only resources tracked as [`Retention::NonEssential`].
    pub fn cleanup_non_essential(&self) -> ReleaseReport {
        let shed = {
            let mut entries = self.entries();
            let (shed, kept): (Vec<_>, Vec<_>) = std::mem::take(&mut *entries)
                .into_iter()
                .partition(|e| e.retention == Retention::NonEssential);
            *entries = kept;
            shed
        };
        release_all(shed)
    }

    /// Counts of currently tracked resources by kind.
    pub fn resource_counts(&self) -> ResourceCounts {
        let mut counts = ResourceCounts::default();
        for entry in self.entries().iter() {
            match entry.kind {
                ResourceKind::Listener => counts.listeners += 1,
                ResourceKind::Timer => counts.timers += 1,
                ResourceKind::Interval => counts.intervals += 1,
                ResourceKind::Handle => counts.handles += 1,
            }
        }
        counts
    }

    /// True when nothing is tracked.
    pub fn is_empty(&self) -> bool {
        self.entries().is_empty()
    }
}

fn release_all(mut entries: Vec<TrackedResource>) -> ReleaseReport {
    let mut report = ReleaseReport::default();
    while let Some(entry) = entries.pop() {
        let TrackedResource { kind, target, release, .. } = entry;
        let outcome = catch_unwind(AssertUnwindSafe(release)).unwrap_or_else(|payload| {
            Err(DiError::Release(panic_message(payload.as_ref())))
        });
        match outcome {
            Ok(()) => report.released += 1,
            Err(error) => {
                tracing::warn!(%kind, %target, %error, "failed to release tracked resource");
                report.failed += 1;
            }
        }
    }
    report
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&'static str>() {
        (*msg).to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "release panicked".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::any::Any;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Counter(Arc<AtomicUsize>);

    impl Release for Counter {
        fn release(&self) -> DiResult<()> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[test]
    fn cleanup_on_empty_tracker_is_noop() {
        let tracker = ResourceTracker::new();
        assert_eq!(tracker.cleanup(), ReleaseReport::default());
        assert_eq!(tracker.cleanup(), ReleaseReport::default());
        assert!(tracker.is_empty());
    }

    #[test]
    fn duplicate_listeners_are_tracked_separately() {
        let bus = Arc::new(EventBus::new());
        let tracker = ResourceTracker::new();
        let handler: EventHandler = Arc::new(|_: &dyn Any| {});

        tracker.track_listener(bus.clone(), "scroll", handler.clone()).unwrap();
        tracker.track_listener(bus.clone(), "scroll", handler).unwrap();
        assert_eq!(tracker.resource_counts().listeners, 2);
        assert_eq!(bus.listener_count("scroll"), 2);

        let report = tracker.cleanup();
        assert_eq!(report.released, 2);
        assert_eq!(bus.listener_count("scroll"), 0);
    }

    #[test]
    fn failing_release_does_not_block_others() {
        let released = Arc::new(AtomicUsize::new(0));
        let tracker = ResourceTracker::new();

        tracker.track_handle(Arc::new(Counter(released.clone())));
        tracker.track_handle(Arc::new(|| -> DiResult<()> { Err(DiError::failed("busy")) }));
        tracker.track_handle(Arc::new(|| -> DiResult<()> { panic!("broken handle") }));
        tracker.track_handle(Arc::new(Counter(released.clone())));

        let report = tracker.cleanup();
        assert_eq!(report, ReleaseReport { released: 2, failed: 2 });
        assert_eq!(released.load(Ordering::SeqCst), 2);
        assert!(tracker.is_empty());
    }

    #[test]
    fn non_essential_cleanup_keeps_essential_entries() {
        let released = Arc::new(AtomicUsize::new(0));
        let bus = Arc::new(EventBus::new());
        let tracker = ResourceTracker::new();

        tracker.track_listener(bus.clone(), "input", Arc::new(|_: &dyn Any| {})).unwrap();
        tracker.track_handle(Arc::new(Counter(released.clone())));
        tracker.track_non_essential(Arc::new(Counter(released.clone())));

        let report = tracker.cleanup_non_essential();
        assert_eq!(report.released, 1);
        assert_eq!(released.load(Ordering::SeqCst), 1);
        assert_eq!(
            tracker.resource_counts(),
            ResourceCounts { listeners: 1, timers: 0, intervals: 0, handles: 1 }
        );
        assert_eq!(bus.listener_count("input"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn cleanup_cancels_pending_timers() {
        let fired = Arc::new(AtomicUsize::new(0));
        let tracker = ResourceTracker::new();

        let f1 = fired.clone();
        tracker.track_timer(move || { f1.fetch_add(1, Ordering::SeqCst); }, Duration::from_millis(20)).unwrap();
        let f2 = fired.clone();
        tracker
            .track_recurring_timer(move || { f2.fetch_add(1, Ordering::SeqCst); }, Duration::from_millis(5))
            .unwrap();
        assert_eq!(tracker.resource_counts(), ResourceCounts { listeners: 0, timers: 1, intervals: 1, handles: 0 });

        tracker.cleanup();
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }
}
