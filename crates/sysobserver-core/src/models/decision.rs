//! Per-cycle notification decisions

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::BadnessScore;

/// Why a notification is (or is not) sent.
///
/// Variants are ordered by priority, so the highest reason of a cycle is `max()`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NotifyReason {
    /// Nothing worth reporting
    #[default]
    None,
    /// A warn streak reached the repeat limit
    RepeatedWarn,
    /// A critical reading
    ImmediateCrit,
}

impl NotifyReason {
    /// Whether this reason warrants a notification
    pub fn is_notify(self) -> bool {
        self != NotifyReason::None
    }

    /// Label used in metric labels and logs
    pub fn as_str(self) -> &'static str {
        match self {
            NotifyReason::None => "none",
            NotifyReason::RepeatedWarn => "repeated_warn",
            NotifyReason::ImmediateCrit => "immediate_crit",
        }
    }
}

/// Outcome of feeding one score into the exceedance tracker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TrackerOutcome {
    /// Notification reason produced by this metric this cycle
    pub reason: NotifyReason,

    /// The metric went back to OK after a notification in the same episode
    pub recovered: bool,

    /// A notification was held back by the cooldown
    pub suppressed: bool,
}

/// Aggregated decision for one cycle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct NotificationDecision {
    /// Whether any metric produced a notify-worthy reason
    pub should_send: bool,

    /// Highest-priority reason across metrics
    pub reason: NotifyReason,

    /// All non-OK metrics of this cycle, in configuration order
    pub metrics: Vec<BadnessScore>,
}

/// A metric that could not be sampled this cycle
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SampleFailure {
    /// Configured metric id
    pub metric_id: String,

    /// Human readable reason
    pub reason: String,
}

/// Everything one cycle produced
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct CycleReport {
    /// Sequence number of the cycle since the observer was created
    pub cycle: u64,

    /// When the cycle started
    pub started_at: Option<DateTime<Utc>>,

    /// Aggregated notification decision
    pub decision: NotificationDecision,

    /// Metric ids that recovered after having been notified
    pub recovered: Vec<String>,

    /// Metrics whose sample failed (state held)
    pub failures: Vec<SampleFailure>,
}

impl CycleReport {
    /// Whether this report carries anything a sink should receive
    pub fn wants_delivery(&self, include_recovery: bool) -> bool {
        self.decision.should_send || (include_recovery && !self.recovered.is_empty())
    }

    /// Label for a delivered message: the decision's reason, or `recovery`
    /// when only recoveries are reported
    pub fn delivery_label(&self) -> &'static str {
        if self.decision.should_send {
            self.decision.reason.as_str()
        } else {
            "recovery"
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delivery_label() {
        let mut report = CycleReport {
            recovered: vec!["mem".to_string()],
            ..CycleReport::default()
        };
        assert!(report.wants_delivery(true));
        assert!(!report.wants_delivery(false));
        assert_eq!(report.delivery_label(), "recovery");

        report.decision.should_send = true;
        report.decision.reason = NotifyReason::RepeatedWarn;
        assert_eq!(report.delivery_label(), "repeated_warn");
    }
}
