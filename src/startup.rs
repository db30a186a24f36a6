//! Phase startup and readiness reporting.
//!
//! [`ServiceRegistry::start_phase`] eagerly resolves every non-lazy service of
//! one phase so the first request does not pay construction cost. Failures do
//! not abort the phase; they are collected into a [`StartupReport`].

use std::time::{Duration, Instant};

use crate::error::DiError;
use crate::phase::Phase;
use crate::registry::ServiceRegistry;

/// Outcome of starting a single service.
#[derive(Debug, Clone)]
pub struct StartupResult {
    pub name: String,
    /// `None` when the service is ready
    pub error: Option<DiError>,
    pub duration: Duration,
}

impl StartupResult {
    pub fn is_ready(&self) -> bool {
        self.error.is_none()
    }
}

/// Readiness report for one phase.
#[derive(Debug, Clone)]
pub struct StartupReport {
    pub phase: Phase,
    /// One entry per non-lazy service of the phase, in registration order
    pub services: Vec<StartupResult>,
    pub total_duration: Duration,
}

impl StartupReport {
    pub fn all_ready(&self) -> bool {
        self.services.iter().all(StartupResult::is_ready)
    }

    pub fn ready_count(&self) -> usize {
        self.services.iter().filter(|r| r.is_ready()).count()
    }

    pub fn failed_count(&self) -> usize {
        self.services.len() - self.ready_count()
    }

    pub fn failures(&self) -> Vec<&StartupResult> {
        self.services.iter().filter(|r| !r.is_ready()).collect()
    }
}

impl ServiceRegistry {
    /// Resolves every non-lazy service registered under `phase`.
    ///
    /// Services are started one at a time in registration order, so a later
    /// service finds its same-phase dependencies already built.
    ///
    /// # Examples
    ///
    /// ```
    /// use ferrous_lifecycle::{ServiceRegistry, RegisterOptions, Service, Phase};
    ///
    /// struct Db;
    /// impl Service for Db {}
    ///
    /// # #[tokio::main(flavor = "current_thread")]
    /// # async fn main() {
    /// let registry = ServiceRegistry::new();
    /// registry.register("db", |_| async { Ok(Db) }, RegisterOptions::new());
    /// registry.register("search", |_| async { Ok(Db) }, RegisterOptions::new().phase("feature"));
    ///
    /// let report = registry.start_phase(Phase::Core).await;
    /// assert!(report.all_ready());
    /// assert_eq!(report.ready_count(), 1);
    /// assert!(!registry.is_instantiated("search"));
    /// # }
    /// ```
    pub async fn start_phase(&self, phase: impl Into<Phase>) -> StartupReport {
        let phase = phase.into();
        let started = Instant::now();
        let names: Vec<String> = self.with_descriptors(|descriptors| {
            descriptors
                .iter()
                .filter(|d| d.phase == phase && !d.lazy)
                .map(|d| d.name.clone())
                .collect()
        });

        let mut services = Vec::with_capacity(names.len());
        for name in names {
            let begin = Instant::now();
            let error = self.resolve(&name).await.err();
            if let Some(error) = &error {
                tracing::warn!(service = %name, %phase, %error, "service failed to start");
            }
            services.push(StartupResult {
                name,
                error,
                duration: begin.elapsed(),
            });
        }

        let report = StartupReport {
            phase,
            services,
            total_duration: started.elapsed(),
        };
        tracing::info!(
            phase = %report.phase,
            ready = report.ready_count(),
            failed = report.failed_count(),
            duration = ?report.total_duration,
            "phase started"
        );
        report
    }
}
