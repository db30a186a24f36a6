//! Memory-pressure signal and tier classification.
//!
//! The core never reads heap statistics itself. A host supplies a
//! [`MemoryProbe`]; [`MemoryMonitor`] samples it periodically and broadcasts
//! [`MemorySnapshot`]s to subscribed components, which map the used/limit
//! ratio onto a [`PressureTier`].

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use crate::error::{DiError, DiResult};

/// Default ratio at which moderate shedding starts.
pub const DEFAULT_MEDIUM_WATERMARK: f64 = 0.8;
/// Default ratio at which a full release is forced.
pub const DEFAULT_HIGH_WATERMARK: f64 = 0.9;

/// Point-in-time memory usage.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct MemorySnapshot {
    pub used_size: u64,
    pub limit_size: u64,
}

impl MemorySnapshot {
    pub fn new(used_size: u64, limit_size: u64) -> Self {
        Self { used_size, limit_size }
    }

    /// `used_size / limit_size`; zero when no limit is known.
    pub fn ratio(&self) -> f64 {
        if self.limit_size == 0 {
            0.0
        } else {
            self.used_size as f64 / self.limit_size as f64
        }
    }
}

/// Proportional response derived from a memory ratio.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum PressureTier {
    /// Below the medium watermark; nothing is released
    None,
    /// Between the watermarks; non-essential resources are shed
    Moderate,
    /// At or above the high watermark; everything tracked is released
    Critical,
}

/// The two watermarks that split ratios into tiers.
///
/// ```
/// use ferrous_lifecycle::{MemoryThresholds, PressureTier};
///
/// let t = MemoryThresholds::default();
/// assert_eq!(t.classify(0.95), PressureTier::Critical);
/// assert_eq!(t.classify(0.85), PressureTier::Moderate);
/// assert_eq!(t.classify(0.5), PressureTier::None);
/// ```
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct MemoryThresholds {
    pub medium: f64,
    pub high: f64,
}

impl Default for MemoryThresholds {
    fn default() -> Self {
        Self {
            medium: DEFAULT_MEDIUM_WATERMARK,
            high: DEFAULT_HIGH_WATERMARK,
        }
    }
}

impl MemoryThresholds {
    /// Validated constructor: requires `0 < medium < high <= 1`.
    pub fn new(medium: f64, high: f64) -> DiResult<Self> {
        let thresholds = Self { medium, high };
        thresholds.validate()?;
        Ok(thresholds)
    }

    pub fn validate(&self) -> DiResult<()> {
        if !(self.medium > 0.0 && self.medium < self.high && self.high <= 1.0) {
            return Err(DiError::InvalidConfig(format!(
                "memory watermarks must satisfy 0 < medium < high <= 1 (medium={}, high={})",
                self.medium, self.high
            )));
        }
        Ok(())
    }

    pub fn classify(&self, ratio: f64) -> PressureTier {
        if ratio >= self.high {
            PressureTier::Critical
        } else if ratio >= self.medium {
            PressureTier::Moderate
        } else {
            PressureTier::None
        }
    }
}

/// Host capability that reports current memory usage.
pub trait MemoryProbe: Send + Sync {
    /// Current usage, or `None` when the host cannot tell.
    fn snapshot(&self) -> Option<MemorySnapshot>;
}

impl<F> MemoryProbe for F
where
    F: Fn() -> Option<MemorySnapshot> + Send + Sync,
{
    fn snapshot(&self) -> Option<MemorySnapshot> {
        self()
    }
}

/// Sampling configuration for [`MemoryMonitor`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MemorySignalConfig {
    /// Samples with a ratio below this are not broadcast
    pub threshold: f64,
    pub sample_interval: Duration,
}

impl Default for MemorySignalConfig {
    fn default() -> Self {
        Self {
            threshold: 0.0,
            sample_interval: Duration::from_secs(30),
        }
    }
}

const SIGNAL_CAPACITY: usize = 16;

/// Periodic memory-snapshot broadcaster.
///
/// Dropping the monitor stops sampling.
pub struct MemoryMonitor {
    sender: broadcast::Sender<MemorySnapshot>,
    task: JoinHandle<()>,
}

impl MemoryMonitor {
    /// Starts sampling `probe` on the current tokio runtime.
    pub fn spawn(probe: Arc<dyn MemoryProbe>, config: MemorySignalConfig) -> DiResult<Self> {
        if config.sample_interval.is_zero() {
            return Err(DiError::InvalidConfig("memory sample interval must be non-zero".to_string()));
        }
        let (sender, _) = broadcast::channel(SIGNAL_CAPACITY);
        let tx = sender.clone();
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(config.sample_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let Some(snapshot) = probe.snapshot() else {
                    continue;
                };
                if snapshot.ratio() >= config.threshold {
                    // No subscribers is not an error; the next sample may find some.
                    let _ = tx.send(snapshot);
                }
            }
        });
        Ok(Self { sender, task })
    }

    /// New receiver for subsequent snapshots.
    pub fn subscribe(&self) -> broadcast::Receiver<MemorySnapshot> {
        self.sender.subscribe()
    }
}

impl Drop for MemoryMonitor {
    fn drop(&mut self) {
        self.task.abort();
    }
}
