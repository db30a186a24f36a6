//! Configuration for lifecycle tuning.
//!
//! Values come from pluggable [`ConfigSource`]s (environment variables or an
//! in-memory map) and are gathered into a [`LifecycleConfig`]. With the
//! `config` feature the same structure can be deserialized from JSON.

use std::collections::HashMap;
use std::env;
use std::time::Duration;

#[cfg(feature = "config")]
use serde::{Deserialize, Serialize};

use crate::error::{DiError, DiResult};
use crate::memory::{MemorySignalConfig, MemoryThresholds, DEFAULT_HIGH_WATERMARK, DEFAULT_MEDIUM_WATERMARK};

/// A configuration value that can be various types
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "config", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "config", serde(untagged))]
pub enum ConfigValue {
    Boolean(bool),
    Integer(i64),
    Float(f64),
    String(String),
}

impl ConfigValue {
    /// Infers the narrowest type for a raw string.
    pub fn parse(raw: &str) -> Self {
        if let Ok(i) = raw.parse::<i64>() {
            ConfigValue::Integer(i)
        } else if let Ok(f) = raw.parse::<f64>() {
            ConfigValue::Float(f)
        } else if let Ok(b) = raw.parse::<bool>() {
            ConfigValue::Boolean(b)
        } else {
            ConfigValue::String(raw.to_string())
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            ConfigValue::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            ConfigValue::Integer(i) => Some(*i),
            _ => None,
        }
    }

    /// Integers widen to floats.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            ConfigValue::Float(f) => Some(*f),
            ConfigValue::Integer(i) => Some(*i as f64),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            ConfigValue::Boolean(b) => Some(*b),
            _ => None,
        }
    }
}

/// Where configuration values come from.
///
/// Keys are dotted and lower case, e.g. `memory.medium`.
pub trait ConfigSource: Send + Sync + std::fmt::Debug {
    fn get(&self, key: &str) -> Option<ConfigValue>;
}

/// Reads environment variables.
///
/// `memory.medium` is looked up as `MEMORY_MEDIUM`, or `LIFECYCLE_MEMORY_MEDIUM`
/// with prefix `lifecycle`.
#[derive(Debug, Default, Clone)]
pub struct EnvironmentConfigSource {
    prefix: Option<String>,
}

impl EnvironmentConfigSource {
    pub fn new() -> Self {
        Self { prefix: None }
    }

    pub fn with_prefix(prefix: impl Into<String>) -> Self {
        Self {
            prefix: Some(prefix.into()),
        }
    }

    fn variable(&self, key: &str) -> String {
        let key = key.replace('.', "_").to_uppercase();
        match &self.prefix {
            Some(prefix) => format!("{}_{}", prefix.to_uppercase(), key),
            None => key,
        }
    }
}

impl ConfigSource for EnvironmentConfigSource {
    fn get(&self, key: &str) -> Option<ConfigValue> {
        env::var(self.variable(key)).ok().map(|raw| ConfigValue::parse(&raw))
    }
}

/// In-memory source, mostly for tests and embedding.
#[derive(Debug, Default, Clone)]
pub struct MapConfigSource {
    values: HashMap<String, ConfigValue>,
}

impl MapConfigSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: impl Into<String>, value: ConfigValue) -> Self {
        self.values.insert(key.into(), value);
        self
    }

    pub fn insert(&mut self, key: impl Into<String>, value: ConfigValue) {
        self.values.insert(key.into(), value);
    }
}

impl ConfigSource for MapConfigSource {
    fn get(&self, key: &str) -> Option<ConfigValue> {
        self.values.get(key).cloned()
    }
}

/// Memory-pressure tuning.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "config", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "config", serde(default))]
pub struct MemoryPressureConfig {
    /// Ratio at which non-essential resources are shed
    pub medium: f64,
    /// Ratio at which everything tracked is released
    pub high: f64,
    /// Samples below this ratio are not broadcast
    pub signal_threshold: f64,
    pub sample_interval_ms: u64,
}

impl Default for MemoryPressureConfig {
    fn default() -> Self {
        let signal = MemorySignalConfig::default();
        Self {
            medium: DEFAULT_MEDIUM_WATERMARK,
            high: DEFAULT_HIGH_WATERMARK,
            signal_threshold: signal.threshold,
            sample_interval_ms: signal.sample_interval.as_millis() as u64,
        }
    }
}

impl MemoryPressureConfig {
    pub fn thresholds(&self) -> MemoryThresholds {
        MemoryThresholds {
            medium: self.medium,
            high: self.high,
        }
    }

    pub fn signal(&self) -> MemorySignalConfig {
        MemorySignalConfig {
            threshold: self.signal_threshold,
            sample_interval: Duration::from_millis(self.sample_interval_ms),
        }
    }
}

/// Top-level lifecycle configuration.
///
/// ```
/// use ferrous_lifecycle::config::{ConfigValue, LifecycleConfig, MapConfigSource};
///
/// let source = MapConfigSource::new()
///     .with("memory.medium", ConfigValue::Float(0.7))
///     .with("memory.sample_interval_ms", ConfigValue::Integer(500));
///
/// let config = LifecycleConfig::from_source(&source).unwrap();
/// assert_eq!(config.memory.medium, 0.7);
/// assert_eq!(config.memory.high, 0.9);
/// assert_eq!(config.memory.signal().sample_interval.as_millis(), 500);
/// ```
#[derive(Debug, Clone, PartialEq, Default)]
#[cfg_attr(feature = "config", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "config", serde(default))]
pub struct LifecycleConfig {
    pub memory: MemoryPressureConfig,
}

impl LifecycleConfig {
    /// Defaults overridden by whatever `source` provides, then validated.
    pub fn from_source(source: &dyn ConfigSource) -> DiResult<Self> {
        let mut config = Self::default();
        let memory = &mut config.memory;
        if let Some(v) = float(source, "memory.medium")? {
            memory.medium = v;
        }
        if let Some(v) = float(source, "memory.high")? {
            memory.high = v;
        }
        if let Some(v) = float(source, "memory.signal_threshold")? {
            memory.signal_threshold = v;
        }
        if let Some(value) = source.get("memory.sample_interval_ms") {
            memory.sample_interval_ms = value
                .as_i64()
                .and_then(|ms| u64::try_from(ms).ok())
                .ok_or_else(|| mismatch("memory.sample_interval_ms", "a non-negative integer", &value))?;
        }
        config.validate()?;
        tracing::debug!(?config, "lifecycle configuration loaded");
        Ok(config)
    }

    /// Reads variables prefixed with `prefix`, e.g. `LIFECYCLE_MEMORY_HIGH`.
    pub fn from_env(prefix: &str) -> DiResult<Self> {
        Self::from_source(&EnvironmentConfigSource::with_prefix(prefix))
    }

    pub fn validate(&self) -> DiResult<()> {
        self.memory.thresholds().validate()?;
        if !(0.0..=1.0).contains(&self.memory.signal_threshold) {
            return Err(DiError::InvalidConfig(format!(
                "memory.signal_threshold must be within [0, 1], got {}",
                self.memory.signal_threshold
            )));
        }
        if self.memory.sample_interval_ms == 0 {
            return Err(DiError::InvalidConfig("memory.sample_interval_ms must be non-zero".to_string()));
        }
        Ok(())
    }

    /// Parses and validates a JSON document. Missing fields take defaults.
    #[cfg(feature = "config")]
    pub fn from_json(json: &str) -> DiResult<Self> {
        let config: Self =
            serde_json::from_str(json).map_err(|e| DiError::InvalidConfig(format!("invalid JSON configuration: {e}")))?;
        config.validate()?;
        Ok(config)
    }
}

fn float(source: &dyn ConfigSource, key: &str) -> DiResult<Option<f64>> {
    match source.get(key) {
        None => Ok(None),
        Some(value) => value
            .as_f64()
            .map(Some)
            .ok_or_else(|| mismatch(key, "a number", &value)),
    }
}

fn mismatch(key: &str, expected: &str, value: &ConfigValue) -> DiError {
    DiError::InvalidConfig(format!("{key} must be {expected}, got {value:?}"))
}
