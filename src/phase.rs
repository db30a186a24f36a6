//! Service phase classification.

use std::fmt;
use std::str::FromStr;

/// Classification label attached to every service descriptor
///
/// Phases group services for startup and introspection. The registry never
/// orders construction by phase; dependency order always wins. Phases only
/// decide which services `start_phase` brings up eagerly and what
/// `services_by_phase` returns.
///
/// # Examples
///
/// ```rust
/// use ferrous_lifecycle::Phase;
///
/// assert_eq!("core".parse::<Phase>().unwrap(), Phase::Core);
/// assert_eq!("feature".parse::<Phase>().unwrap(), Phase::Feature);
/// assert_eq!("plugins".parse::<Phase>().unwrap(), Phase::Custom("plugins".to_string()));
/// assert_eq!(Phase::default(), Phase::Core);
/// assert_eq!(Phase::Feature.to_string(), "feature");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(into = "String", from = "String"))]
pub enum Phase {
    /// Infrastructure every other service builds on (loggers, stores)
    #[default]
    Core,
    /// Application features layered on top of core services
    Feature,
    /// Any other application-defined label
    Custom(String),
}

impl Phase {
    /// The label as a string slice.
    pub fn as_str(&self) -> &str {
        match self {
            Phase::Core => "core",
            Phase::Feature => "feature",
            Phase::Custom(label) => label,
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<&str> for Phase {
    fn from(label: &str) -> Self {
        match label {
            "core" => Phase::Core,
            "feature" => Phase::Feature,
            other => Phase::Custom(other.to_string()),
        }
    }
}

impl From<String> for Phase {
    fn from(label: String) -> Self {
        Phase::from(label.as_str())
    }
}

impl From<Phase> for String {
    fn from(phase: Phase) -> Self {
        phase.as_str().to_string()
    }
}

impl FromStr for Phase {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Phase::from(s))
    }
}
