//! Static validation of registered descriptors.
//!
//! Catches configuration mistakes before anything is built: dependencies on
//! names nobody registered and declared cycles. A few legal but surprising
//! shapes are reported as warnings.

use std::fmt;

use crate::internal::find_all_cycles;
use crate::registry::ServiceRegistry;

/// Result of [`ServiceRegistry::validate`].
#[derive(Debug, Clone, Default)]
pub struct ValidationResult {
    /// Problems that will make resolution fail
    pub errors: Vec<ValidationError>,
    /// Legal configurations that are probably not intended
    pub warnings: Vec<ValidationWarning>,
}

/// A problem that makes resolution of some service fail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// `service` declares `dependency`, which is not registered
    MissingDependency { service: String, dependency: String },
    /// Declared dependencies form a cycle, as a closed path
    CircularDependency { cycle: Vec<String> },
}

/// A legal configuration that is likely a mistake.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationWarning {
    /// An eager service depends on a lazy one, which forces the lazy one to
    /// initialize whenever the eager one is built
    EagerDependsOnLazy { service: String, dependency: String },
    /// A service depends on a service of a different phase, so starting its
    /// own phase also builds part of the other one
    CrossPhaseDependency {
        service: String,
        phase: String,
        dependency: String,
        dependency_phase: String,
    },
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValidationError::MissingDependency { service, dependency } => {
                write!(f, "{service} depends on unregistered service {dependency}")
            }
            ValidationError::CircularDependency { cycle } => {
                write!(f, "circular dependency: {}", cycle.join(" -> "))
            }
        }
    }
}

impl fmt::Display for ValidationWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValidationWarning::EagerDependsOnLazy { service, dependency } => {
                write!(f, "eager {service} forces lazy {dependency} to initialize")
            }
            ValidationWarning::CrossPhaseDependency {
                service,
                phase,
                dependency,
                dependency_phase,
            } => write!(
                f,
                "{service} ({phase}) depends on {dependency} ({dependency_phase})"
            ),
        }
    }
}

impl ValidationResult {
    /// True when there are no errors. Warnings do not count.
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn has_warnings(&self) -> bool {
        !self.warnings.is_empty()
    }

    /// Multi-line human readable summary; empty when there is nothing to say.
    pub fn format_issues(&self) -> String {
        let mut out = String::new();
        for error in &self.errors {
            out.push_str("error: ");
            out.push_str(&error.to_string());
            out.push('\n');
        }
        for warning in &self.warnings {
            out.push_str("warning: ");
            out.push_str(&warning.to_string());
            out.push('\n');
        }
        out
    }
}

impl ServiceRegistry {
    /// Checks all registered descriptors without building anything.
    ///
    /// ```
    /// use ferrous_lifecycle::{ServiceRegistry, RegisterOptions, Service};
    ///
    /// struct S;
    /// impl Service for S {}
    ///
    /// let registry = ServiceRegistry::new();
    /// registry.register("api", |_| async { Ok(S) }, RegisterOptions::new().depends_on(["db"]));
    ///
    /// let result = registry.validate();
    /// assert!(!result.is_valid());
    /// assert_eq!(result.format_issues(), "error: api depends on unregistered service db\n");
    /// ```
    pub fn validate(&self) -> ValidationResult {
        self.with_descriptors(|descriptors| {
            let mut result = ValidationResult::default();

            for descriptor in descriptors.iter() {
                for dependency in &descriptor.dependencies {
                    let Some(target) = descriptors.get(dependency) else {
                        result.errors.push(ValidationError::MissingDependency {
                            service: descriptor.name.clone(),
                            dependency: dependency.clone(),
                        });
                        continue;
                    };
                    if !descriptor.lazy && target.lazy {
                        result.warnings.push(ValidationWarning::EagerDependsOnLazy {
                            service: descriptor.name.clone(),
                            dependency: dependency.clone(),
                        });
                    }
                    if descriptor.phase != target.phase {
                        result.warnings.push(ValidationWarning::CrossPhaseDependency {
                            service: descriptor.name.clone(),
                            phase: descriptor.phase.to_string(),
                            dependency: dependency.clone(),
                            dependency_phase: target.phase.to_string(),
                        });
                    }
                }
            }

            let cycles = find_all_cycles(descriptors.names(), |name| descriptors.dependencies_of(name));
            result
                .errors
                .extend(cycles.into_iter().map(|cycle| ValidationError::CircularDependency { cycle }));

            if !result.is_valid() {
                tracing::debug!(errors = result.errors.len(), "registry validation failed");
            }
            result
        })
    }
}
