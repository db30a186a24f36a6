//! Platform primitives wrapped by the resource tracker.
//!
//! The tracker never talks to a concrete event system or timer facility
//! directly. It goes through the traits below, so hosts can plug in their own
//! implementations and tests can observe every subscribe/cancel/release call.

use std::any::Any;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::task::AbortHandle;

use crate::error::{DiError, DiResult};
use crate::internal::lock;

/// Callback invoked when a subscribed event fires.
pub type EventHandler = Arc<dyn Fn(&dyn Any) + Send + Sync>;

/// Callback invoked every time a recurring timer fires.
pub type TimerCallback = Arc<dyn Fn() + Send + Sync>;

/// Something that can be subscribed to by event name.
///
/// Handlers are identified by pointer identity, mirroring how most event
/// systems remove listeners: `unsubscribe` removes one registration of the
/// exact same `Arc`.
pub trait EventSource: Send + Sync {
    /// Adds `handler` for `event`.
    fn subscribe(&self, event: &str, handler: EventHandler) -> DiResult<()>;

    /// Removes one registration of `handler` for `event`.
    fn unsubscribe(&self, event: &str, handler: &EventHandler) -> DiResult<()>;
}

/// Opaque external reference that must be released on cleanup.
pub trait Release: Send + Sync {
    /// Releases the underlying resource.
    fn release(&self) -> DiResult<()>;
}

impl<F> Release for F
where
    F: Fn() -> DiResult<()> + Send + Sync,
{
    fn release(&self) -> DiResult<()> {
        self()
    }
}

/// Identifier of a scheduled timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimerId(pub u64);

/// One-shot and recurring scheduling with cancellation.
pub trait Scheduler: Send + Sync {
    /// Runs `callback` once after `delay`.
    fn schedule_once(&self, callback: Box<dyn FnOnce() + Send>, delay: Duration) -> DiResult<TimerId>;

    /// Runs `callback` every `interval`, first firing one interval from now.
    fn schedule_recurring(&self, callback: TimerCallback, interval: Duration) -> DiResult<TimerId>;

    /// Cancels a timer. Cancelling a timer that already fired is a no-op.
    fn cancel(&self, id: TimerId) -> DiResult<()>;
}

/// In-process [`EventSource`] with synchronous dispatch.
///
/// ```
/// use ferrous_lifecycle::{EventBus, EventSource, EventHandler};
/// use std::sync::Arc;
/// use std::sync::atomic::{AtomicUsize, Ordering};
///
/// let bus = EventBus::new();
/// let hits = Arc::new(AtomicUsize::new(0));
/// let h = hits.clone();
/// let handler: EventHandler = Arc::new(move |_: &dyn std::any::Any| { h.fetch_add(1, Ordering::SeqCst); });
///
/// bus.subscribe("resize", handler.clone()).unwrap();
/// bus.emit("resize", &());
/// bus.unsubscribe("resize", &handler).unwrap();
/// bus.emit("resize", &());
///
/// assert_eq!(hits.load(Ordering::SeqCst), 1);
/// ```
#[derive(Default)]
pub struct EventBus {
    handlers: Mutex<HashMap<String, Vec<EventHandler>>>,
}

impl EventBus {
    /// Creates an empty bus.
    pub fn new() -> Self {
        Self::default()
    }

    /// Dispatches `payload` to every handler subscribed to `event`.
    pub fn emit(&self, event: &str, payload: &dyn Any) {
        // Snapshot so handlers may subscribe/unsubscribe while dispatching.
        let handlers: Vec<EventHandler> = lock(&self.handlers)
            .get(event)
            .cloned()
            .unwrap_or_default();
        for handler in handlers {
            handler(payload);
        }
    }

    /// Number of handlers currently subscribed to `event`.
    pub fn listener_count(&self, event: &str) -> usize {
        lock(&self.handlers).get(event).map_or(0, Vec::len)
    }
}

impl EventSource for EventBus {
    fn subscribe(&self, event: &str, handler: EventHandler) -> DiResult<()> {
        lock(&self.handlers)
            .entry(event.to_string())
            .or_default()
            .push(handler);
        Ok(())
    }

    fn unsubscribe(&self, event: &str, handler: &EventHandler) -> DiResult<()> {
        let mut handlers = lock(&self.handlers);
        if let Some(list) = handlers.get_mut(event) {
            if let Some(pos) = list.iter().position(|h| Arc::ptr_eq(h, handler)) {
                list.remove(pos);
            }
            if list.is_empty() {
                handlers.remove(event);
            }
        }
        Ok(())
    }
}

/// [`Scheduler`] backed by tokio tasks; cancellation aborts the task.
///
/// Scheduling requires a tokio runtime: either the one current when the call
/// is made, or the handle passed to [`TokioScheduler::with_handle`].
#[derive(Default)]
pub struct TokioScheduler {
    inner: Arc<SchedulerInner>,
}

#[derive(Default)]
struct SchedulerInner {
    next_id: AtomicU64,
    handle: Option<Handle>,
    tasks: Mutex<HashMap<TimerId, AbortHandle>>,
}

impl SchedulerInner {
    fn tasks(&self) -> MutexGuard<'_, HashMap<TimerId, AbortHandle>> {
        lock(&self.tasks)
    }

    fn runtime(&self) -> DiResult<Handle> {
        match &self.handle {
            Some(handle) => Ok(handle.clone()),
            None => Handle::try_current()
                .map_err(|_| DiError::Failed("timer scheduled outside of a tokio runtime".to_string())),
        }
    }
}

impl TokioScheduler {
    /// Scheduler that spawns on the runtime current at each call.
    pub fn new() -> Self {
        Self::default()
    }

    /// Scheduler that always spawns on `handle`.
    pub fn with_handle(handle: Handle) -> Self {
        Self {
            inner: Arc::new(SchedulerInner {
                handle: Some(handle),
                ..SchedulerInner::default()
            }),
        }
    }

    /// Number of timers scheduled and not yet fired or cancelled.
    pub fn pending(&self) -> usize {
        self.inner.tasks().len()
    }

    fn next_id(&self) -> TimerId {
        TimerId(self.inner.next_id.fetch_add(1, Ordering::Relaxed))
    }
}

impl Scheduler for TokioScheduler {
    fn schedule_once(&self, callback: Box<dyn FnOnce() + Send>, delay: Duration) -> DiResult<TimerId> {
        let runtime = self.inner.runtime()?;
        let id = self.next_id();
        let inner = self.inner.clone();
        // Hold the map lock across spawn so a zero-delay task cannot remove
        // its entry before it is inserted.
        let mut tasks = self.inner.tasks();
        let task = runtime.spawn(async move {
            tokio::time::sleep(delay).await;
            inner.tasks().remove(&id);
            callback();
        });
        tasks.insert(id, task.abort_handle());
        Ok(id)
    }

    fn schedule_recurring(&self, callback: TimerCallback, interval: Duration) -> DiResult<TimerId> {
        if interval.is_zero() {
            return Err(DiError::InvalidConfig("recurring timer interval must be non-zero".to_string()));
        }
        let runtime = self.inner.runtime()?;
        let id = self.next_id();
        let task = runtime.spawn(async move {
            let start = tokio::time::Instant::now() + interval;
            let mut ticker = tokio::time::interval_at(start, interval);
            loop {
                ticker.tick().await;
                callback();
            }
        });
        self.inner.tasks().insert(id, task.abort_handle());
        Ok(id)
    }

    fn cancel(&self, id: TimerId) -> DiResult<()> {
        if let Some(task) = self.inner.tasks().remove(&id) {
            task.abort();
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[tokio::test(start_paused = true)]
    async fn one_shot_fires_once_and_forgets_itself() {
        let scheduler = TokioScheduler::new();
        let fired = Arc::new(AtomicUsize::new(0));
        let f = fired.clone();

        scheduler
            .schedule_once(Box::new(move || { f.fetch_add(1, Ordering::SeqCst); }), Duration::from_millis(50))
            .unwrap();
        assert_eq!(scheduler.pending(), 1);

        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert_eq!(scheduler.pending(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_recurring_timer_stops_firing() {
        let scheduler = TokioScheduler::new();
        let fired = Arc::new(AtomicUsize::new(0));
        let f = fired.clone();

        let id = scheduler
            .schedule_recurring(Arc::new(move || { f.fetch_add(1, Ordering::SeqCst); }), Duration::from_millis(10))
            .unwrap();

        tokio::time::sleep(Duration::from_millis(35)).await;
        let seen = fired.load(Ordering::SeqCst);
        assert_eq!(seen, 3);

        scheduler.cancel(id).unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(fired.load(Ordering::SeqCst), seen);
    }

    #[test]
    fn scheduling_without_runtime_fails() {
        let scheduler = TokioScheduler::new();
        let err = scheduler.schedule_once(Box::new(|| {}), Duration::from_millis(1)).unwrap_err();
        assert!(matches!(err, DiError::Failed(_)));
    }

    #[test]
    fn unsubscribe_removes_one_registration() {
        let bus = EventBus::new();
        let handler: EventHandler = Arc::new(|_: &dyn Any| {});
        bus.subscribe("tick", handler.clone()).unwrap();
        bus.subscribe("tick", handler.clone()).unwrap();
        bus.unsubscribe("tick", &handler).unwrap();
        assert_eq!(bus.listener_count("tick"), 1);
    }

    #[test]
    fn bus_survives_a_poisoned_lock() {
        let bus = Arc::new(EventBus::new());
        let poisoner = bus.clone();
        let _ = std::thread::spawn(move || {
            let _guard = poisoner.handlers.lock().unwrap();
            panic!("handler table poisoned");
        })
        .join();
        assert!(bus.handlers.is_poisoned());

        bus.subscribe("tick", Arc::new(|_: &dyn Any| {})).unwrap();
        assert_eq!(bus.listener_count("tick"), 1);
    }
}
