//! Diagnostic observers for registry lifecycle events.
//!
//! Observers receive a callback for every resolution, initialization failure
//! and teardown step. They are attached to a [`ServiceRegistry`] before use
//! and are invoked synchronously, so implementations should stay cheap.
//!
//! [`ServiceRegistry`]: crate::ServiceRegistry

use std::sync::{Arc, RwLock};
use std::time::Duration;

use crate::error::DiError;
use crate::internal::{read, write};

/// Observer trait for registry lifecycle events.
///
/// All methods except [`resolving`](DiObserver::resolving) and
/// [`resolved`](DiObserver::resolved) have empty default implementations.
///
/// # Examples
///
/// ```
/// use ferrous_lifecycle::{DiObserver, ServiceRegistry};
/// use std::sync::{Arc, Mutex};
/// use std::time::Duration;
///
/// #[derive(Default)]
/// struct Recorder {
///     events: Mutex<Vec<String>>,
/// }
///
/// impl DiObserver for Recorder {
///     fn resolving(&self, name: &str) {
///         self.events.lock().unwrap().push(format!("resolving {name}"));
///     }
///
///     fn resolved(&self, name: &str, _duration: Duration) {
///         self.events.lock().unwrap().push(format!("resolved {name}"));
///     }
/// }
///
/// let registry = ServiceRegistry::new();
/// registry.add_observer(Arc::new(Recorder::default()));
/// ```
pub trait DiObserver: Send + Sync {
    /// A construction for `name` is about to start.
    fn resolving(&self, name: &str);

    /// `name` was constructed (and initialized unless lazy) in `duration`.
    fn resolved(&self, name: &str, duration: Duration);

    /// Factory or initialize hook for `name` failed.
    fn initialization_failed(&self, _name: &str, _error: &DiError) {}

    /// `name` was cleaned up during teardown.
    fn torn_down(&self, _name: &str) {}

    /// Cleanup of `name` failed during teardown; teardown continues.
    fn teardown_failed(&self, _name: &str, _error: &DiError) {}
}

/// Container for attached observers.
///
/// Cheap when empty: every notification is a single read lock and an empty
/// iteration.
#[derive(Default)]
pub(crate) struct Observers {
    observers: RwLock<Vec<Arc<dyn DiObserver>>>,
}

impl Observers {
    pub(crate) fn add(&self, observer: Arc<dyn DiObserver>) {
        write(&self.observers).push(observer);
    }

    fn each(&self, f: impl Fn(&dyn DiObserver)) {
        let observers = read(&self.observers);
        for observer in observers.iter() {
            f(observer.as_ref());
        }
    }

    pub(crate) fn resolving(&self, name: &str) {
        self.each(|o| o.resolving(name));
    }

    pub(crate) fn resolved(&self, name: &str, duration: Duration) {
        self.each(|o| o.resolved(name, duration));
    }

    pub(crate) fn initialization_failed(&self, name: &str, error: &DiError) {
        self.each(|o| o.initialization_failed(name, error));
    }

    pub(crate) fn torn_down(&self, name: &str) {
        self.each(|o| o.torn_down(name));
    }

    pub(crate) fn teardown_failed(&self, name: &str, error: &DiError) {
        self.each(|o| o.teardown_failed(name, error));
    }
}

/// Built-in observer that forwards events to `tracing`.
///
/// The registry already emits its own debug-level events; this observer adds
/// per-resolution timing at info level under a configurable target label.
///
/// ```
/// use ferrous_lifecycle::{ServiceRegistry, TracingObserver};
/// use std::sync::Arc;
///
/// let registry = ServiceRegistry::new();
/// registry.add_observer(Arc::new(TracingObserver::with_label("app")));
/// ```
pub struct TracingObserver {
    label: String,
}

impl TracingObserver {
    pub fn new() -> Self {
        Self::with_label("ferrous-lifecycle")
    }

    pub fn with_label(label: impl Into<String>) -> Self {
        Self { label: label.into() }
    }
}

impl Default for TracingObserver {
    fn default() -> Self {
        Self::new()
    }
}

impl DiObserver for TracingObserver {
    fn resolving(&self, name: &str) {
        tracing::debug!(label = %self.label, service = %name, "resolving");
    }

    fn resolved(&self, name: &str, duration: Duration) {
        tracing::info!(label = %self.label, service = %name, ?duration, "resolved");
    }

    fn initialization_failed(&self, name: &str, error: &DiError) {
        tracing::error!(label = %self.label, service = %name, %error, "initialization failed");
    }

    fn torn_down(&self, name: &str) {
        tracing::debug!(label = %self.label, service = %name, "torn down");
    }

    fn teardown_failed(&self, name: &str, error: &DiError) {
        tracing::error!(label = %self.label, service = %name, %error, "teardown failed");
    }
}
