//! Observer status reporting

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{Level, Phase};

/// Result of a start request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StartOutcome {
    /// The loop was stopped and is now running with fresh state
    Started,
    /// The loop was already running; nothing changed
    AlreadyRunning,
}

/// Result of a stop request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopOutcome {
    /// The loop was running and has been halted
    Stopped,
    /// The loop was not running
    NotRunning,
}

/// Counters accumulated over the observer's lifetime
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObserverStats {
    /// Cycles executed
    pub cycles: u64,
    /// Samples that failed or timed out
    pub sample_failures: u64,
    /// Samples at WARN or CRIT
    pub limits_reached: u64,
    /// Messages handed to the sink
    pub notifications_sent: u64,
    /// Messages the sink failed to deliver
    pub delivery_failures: u64,
    /// Metrics that recovered after a notification
    pub recoveries: u64,
}

/// Status of one configured metric
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricStatus {
    /// Configured metric id
    pub id: String,
    /// Human readable label
    pub label: String,
    /// Level of the last successful sample
    pub last_level: Option<Level>,
    /// Current hysteresis phase
    pub phase: Phase,
    /// Current streak length
    pub consecutive_exceed_count: u32,
    /// Time of the last notification
    pub last_notified_at: Option<DateTime<Utc>>,
}

/// Snapshot returned by `status()`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObserverStatus {
    /// Whether cycles are being scheduled
    pub running: bool,
    /// Local machine name
    pub host: String,
    /// Cycle interval
    #[serde(with = "humantime_serde")]
    pub interval: std::time::Duration,
    /// Time until the next cycle, if running
    #[serde(default, with = "humantime_serde")]
    pub next_cycle_in: Option<std::time::Duration>,
    /// Per-metric state in configuration order
    pub metrics: Vec<MetricStatus>,
    /// Lifetime counters
    pub stats: ObserverStats,
}
