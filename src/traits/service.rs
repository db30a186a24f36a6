//! The trait every registry-held instance implements.

use std::any::Any;
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::DiResult;

/// Upcast helper so `Arc<dyn Service>` can be downcast to its concrete type.
///
/// Implemented for every sized `Any + Send + Sync` type; never implement it
/// by hand.
pub trait AsAny: Any + Send + Sync {
    /// Converts the shared instance into `Arc<dyn Any>`.
    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync>;
}

impl<T: Any + Send + Sync> AsAny for T {
    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }
}

/// A named, registry-managed instance.
///
/// Both hooks default to no-ops, so plain value services only need an empty
/// `impl Service for T {}`. Stateful units usually wrap their logic in a
/// [`Component`](crate::Component), which implements this trait with the full
/// lifecycle state machine.
///
/// # Examples
///
/// ```
/// use ferrous_lifecycle::{Service, DiResult};
/// use async_trait::async_trait;
/// use std::sync::atomic::{AtomicBool, Ordering};
///
/// struct Connection {
///     open: AtomicBool,
/// }
///
/// #[async_trait]
/// impl Service for Connection {
///     async fn initialize(&self) -> DiResult<()> {
///         self.open.store(true, Ordering::SeqCst);
///         Ok(())
///     }
///
///     async fn cleanup(&self) -> DiResult<()> {
///         self.open.store(false, Ordering::SeqCst);
///         Ok(())
///     }
/// }
/// ```
#[async_trait]
pub trait Service: AsAny {
    /// Brings the instance to its ready state. Must be idempotent.
    async fn initialize(&self) -> DiResult<()> {
        Ok(())
    }

    /// Releases everything the instance holds. Must be idempotent.
    async fn cleanup(&self) -> DiResult<()> {
        Ok(())
    }
}

/// Downcasts a registry instance to its concrete type.
pub(crate) fn downcast<T: Service>(name: &str, instance: Arc<dyn Service>) -> DiResult<Arc<T>> {
    instance
        .into_any()
        .downcast::<T>()
        .map_err(|_| crate::DiError::TypeMismatch(name.to_string()))
}
