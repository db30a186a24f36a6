//! Error types for the service registry and component lifecycle.

use std::fmt;
use std::sync::Arc;

use thiserror::Error;

/// Lifecycle and resolution errors
///
/// Represents the failure conditions that can occur while registering,
/// resolving, initializing or tearing down services.
///
/// The type is `Clone` because a single in-flight resolution hands its
/// outcome to every caller awaiting the same name.
///
/// # Examples
///
/// ```rust
/// use ferrous_lifecycle::DiError;
///
/// let not_found = DiError::NotFound("cache".to_string());
/// let circular = DiError::Circular(vec!["a".into(), "b".into(), "a".into()]);
///
/// assert_eq!(not_found.to_string(), "Service not found: cache");
/// assert_eq!(circular.to_string(), "Circular dependency: a -> b -> a");
/// ```
#[derive(Debug, Clone, Error)]
pub enum DiError {
    /// No descriptor registered under the requested name
    #[error("Service not found: {0}")]
    NotFound(String),
    /// Name re-entered on the active resolution path (includes the cycle)
    #[error("Circular dependency: {}", .0.join(" -> "))]
    Circular(Vec<String>),
    /// Factory or initialize hook failed for `name`
    #[error("Failed to initialize '{name}': {cause}")]
    Initialization {
        name: String,
        #[source]
        cause: Arc<DiError>,
    },
    /// One or more cleanups failed during teardown; teardown still completed
    #[error("Teardown completed with {} failure(s): {}", .0.len(), TeardownList(.0))]
    Teardown(Vec<TeardownFailure>),
    /// A lifecycle hook was not provided by the implementor
    #[error("Lifecycle hook not implemented: {0}")]
    NotImplemented(&'static str),
    /// Instance registered under a name is not of the requested type
    #[error("Type mismatch for: {0}")]
    TypeMismatch(String),
    /// A teardown or reset started a new epoch while this resolution ran
    #[error("Resolution of '{0}' was interrupted by teardown")]
    Interrupted(String),
    /// Configuration value missing, malformed or out of range
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
    /// Releasing a tracked resource failed
    #[error("Release failed: {0}")]
    Release(String),
    /// Failure raised by application code inside a factory or hook
    #[error("{0}")]
    Failed(String),
}

impl DiError {
    /// Wraps an arbitrary error raised by application code.
    pub fn failed(err: impl fmt::Display) -> Self {
        DiError::Failed(err.to_string())
    }

    pub(crate) fn initialization(name: &str, cause: DiError) -> Self {
        match cause {
            // Already attributed to the failing service further down the path.
            DiError::Initialization { .. } | DiError::Circular(_) | DiError::NotFound(_) => cause,
            other => DiError::Initialization {
                name: name.to_string(),
                cause: Arc::new(other),
            },
        }
    }

    /// Name of the service this error is attributed to, when there is one.
    pub fn service_name(&self) -> Option<&str> {
        match self {
            DiError::NotFound(name)
            | DiError::TypeMismatch(name)
            | DiError::Interrupted(name)
            | DiError::Initialization { name, .. } => Some(name),
            _ => None,
        }
    }
}

/// A single failed cleanup recorded by `teardown_all()`.
#[derive(Debug, Clone)]
pub struct TeardownFailure {
    /// Service whose cleanup failed
    pub name: String,
    /// The error returned by its cleanup
    pub error: DiError,
}

impl fmt::Display for TeardownFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.name, self.error)
    }
}

struct TeardownList<'a>(&'a [TeardownFailure]);

impl fmt::Display for TeardownList<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, failure) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str("; ")?;
            }
            write!(f, "{}", failure)?;
        }
        Ok(())
    }
}

/// Result type for registry and lifecycle operations
///
/// A convenience alias for `Result<T, DiError>` used throughout the crate.
///
/// ```rust
/// use ferrous_lifecycle::{DiError, DiResult};
///
/// fn lookup(known: bool) -> DiResult<&'static str> {
///     if known {
///         Ok("logger")
///     } else {
///         Err(DiError::NotFound("logger".to_string()))
///     }
/// }
///
/// assert!(lookup(true).is_ok());
/// assert!(lookup(false).is_err());
/// ```
pub type DiResult<T> = Result<T, DiError>;
