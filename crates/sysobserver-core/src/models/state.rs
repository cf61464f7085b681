//! Per-metric exceedance state

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{Level, NotifyReason};

/// Hysteresis phase of a single metric
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    /// No exceedance in progress
    #[default]
    Quiet,
    /// Exceeding, but not yet worth a notification
    Warning,
    /// A notification was emitted on the last evaluated cycle
    Notified,
}

/// Mutable streak record for one metric, owned by the observer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExceedanceState {
    /// Configured metric id
    pub metric_id: String,

    /// Current hysteresis phase
    pub phase: Phase,

    /// Non-OK cycles since the last OK cycle or the last notification
    pub consecutive_exceed_count: u32,

    /// Time of the last notification for this metric
    pub last_notified_at: Option<DateTime<Utc>>,

    /// Level seen on the last successful sample (`None` before the first one)
    pub last_level: Option<Level>,

    /// A notification went out since the metric was last OK
    pub notified_in_episode: bool,

    /// Highest reason notified since the metric was last OK
    #[serde(default)]
    pub episode_reason: Option<NotifyReason>,
}

impl ExceedanceState {
    /// Fresh state in the quiet phase
    pub fn new(metric_id: impl Into<String>) -> Self {
        Self {
            metric_id: metric_id.into(),
            phase: Phase::Quiet,
            consecutive_exceed_count: 0,
            last_notified_at: None,
            last_level: None,
            notified_in_episode: false,
            episode_reason: None,
        }
    }

    /// Forget any accumulated streak
    pub fn reset(&mut self) {
        self.phase = Phase::Quiet;
        self.consecutive_exceed_count = 0;
        self.last_notified_at = None;
        self.last_level = None;
        self.notified_in_episode = false;
        self.episode_reason = None;
    }
}
