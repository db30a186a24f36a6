//! # ferrous-lifecycle
//!
//! Service lifecycle and dependency-resolution runtime for long-lived async
//! applications.
//!
//! ## Features
//!
//! - **Named service registry**: async factories, declared dependencies, one instance per name
//! - **Ordered construction**: dependencies are built and initialized before their dependents
//! - **Reverse teardown**: cleanup runs in the exact reverse of the order instances were built
//! - **Circular dependency detection**: reported with the full cycle path, never a hang
//! - **Resource tracking**: listeners, timers and handles released automatically on cleanup
//! - **Memory pressure**: tiered shedding driven by a pluggable memory probe
//!
//! ## Quick Start
//!
//! ```rust
//! use ferrous_lifecycle::{RegisterOptions, Service, ServiceRegistry, DiResult};
//! use async_trait::async_trait;
//! use std::sync::Arc;
//!
//! struct Database {
//!     url: String,
//! }
//!
//! #[async_trait]
//! impl Service for Database {
//!     async fn initialize(&self) -> DiResult<()> {
//!         // open connections
//!         Ok(())
//!     }
//! }
//!
//! struct UserService {
//!     db: Arc<Database>,
//! }
//! impl Service for UserService {}
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> DiResult<()> {
//! let registry = ServiceRegistry::new();
//! registry.register(
//!     "db",
//!     |_| async { Ok(Database { url: "postgres://localhost".to_string() }) },
//!     RegisterOptions::new(),
//! );
//! registry.register(
//!     "users",
//!     |ctx| async move { Ok(UserService { db: ctx.get("db")? }) },
//!     RegisterOptions::new().depends_on(["db"]),
//! );
//!
//! let users = registry.resolve_as::<UserService>("users").await?;
//! assert_eq!(users.db.url, "postgres://localhost");
//!
//! registry.teardown_all().await?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Components
//!
//! [`Component`] wraps [`LifecycleHooks`] with an idempotent
//! initialize/cleanup state machine, rollback on failed initialization and a
//! [`ResourceTracker`] whose entries are released on cleanup. Components are
//! services, so the registry drives them directly.
//!
//! ## Feature flags
//!
//! - `config`: serde support and JSON loading for [`config::LifecycleConfig`]
//! - `graph-export`: JSON export of [`DependencyGraph`] with RFC 3339 timestamps

pub mod config;
pub mod descriptors;
pub mod error;
pub mod graph_export;
pub mod lifecycle;
pub mod memory;
pub mod observer;
pub mod phase;
pub mod registry;
pub mod resources;
pub mod startup;
pub mod traits;
pub mod validation;

mod internal;
mod registration;

pub use descriptors::ServiceDescriptor;
pub use error::{DiError, DiResult, TeardownFailure};
pub use graph_export::{DependencyGraph, EdgeKind, GraphEdge, GraphMetadata, GraphNode};
pub use lifecycle::{Component, ComponentState, LifecycleHooks};
pub use memory::{
    MemoryMonitor, MemoryProbe, MemorySignalConfig, MemorySnapshot, MemoryThresholds, PressureTier,
};
pub use observer::{DiObserver, TracingObserver};
pub use phase::Phase;
pub use registration::RegisterOptions;
pub use registry::{ResolveContext, ServiceRegistry};
pub use resources::{
    EventBus, EventHandler, EventSource, Release, ReleaseReport, ResourceCounts, ResourceKind, ResourceTracker,
    Retention, Scheduler, TimerCallback, TimerId, TokioScheduler,
};
pub use startup::{StartupReport, StartupResult};
pub use traits::{AsAny, Service};
pub use validation::{ValidationError, ValidationResult, ValidationWarning};
