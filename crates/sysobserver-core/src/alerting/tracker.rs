//! Exceedance tracking with hysteresis
//!
//! Each metric moves through `Quiet -> Warning -> Notified`. A critical
//! reading notifies at once; warnings only notify after `repeat_limit`
//! consecutive non-OK cycles. `Notified` lasts for exactly one cycle and then
//! folds back into `Warning` or `Quiet`, so a condition that persists keeps
//! producing fresh crossing events instead of being muted forever.

use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::models::{ExceedanceState, Level, NotifyReason, Phase, TrackerOutcome};

/// Default number of consecutive warn cycles before notifying
pub const DEFAULT_REPEAT_LIMIT: u32 = 3;

/// Per-metric notify/suppress state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExceedanceTracker {
    repeat_limit: u32,
    cooldown: Option<Duration>,
}

impl Default for ExceedanceTracker {
    fn default() -> Self {
        Self::new(DEFAULT_REPEAT_LIMIT)
    }
}

impl ExceedanceTracker {
    /// Create a tracker; a limit of 0 behaves like 1
    pub fn new(repeat_limit: u32) -> Self {
        Self {
            repeat_limit: repeat_limit.max(1),
            cooldown: None,
        }
    }

    /// Hold back repeat notifications within one episode for `cooldown`.
    ///
    /// Only reasons no higher than the episode's previous one are held back,
    /// so an escalation from a warn streak to CRIT is always reported.
    pub fn with_cooldown(mut self, cooldown: Option<Duration>) -> Self {
        self.cooldown = cooldown;
        self
    }

    /// Configured repeat limit
    pub fn repeat_limit(&self) -> u32 {
        self.repeat_limit
    }

    /// Feed one successfully sampled level into `state`.
    ///
    /// Failed samples must not call this; the state is simply left as it was.
    pub fn observe(
        &self,
        state: &mut ExceedanceState,
        level: Level,
        now: DateTime<Utc>,
    ) -> TrackerOutcome {
        state.last_level = Some(level);

        if state.phase == Phase::Notified {
            state.phase = if level.is_exceeded() {
                Phase::Warning
            } else {
                Phase::Quiet
            };
        }

        match level {
            Level::Ok => {
                let recovered = state.notified_in_episode;
                state.phase = Phase::Quiet;
                state.consecutive_exceed_count = 0;
                state.notified_in_episode = false;
                state.episode_reason = None;
                TrackerOutcome {
                    recovered,
                    ..TrackerOutcome::default()
                }
            }
            Level::Warn => {
                state.consecutive_exceed_count = state.consecutive_exceed_count.saturating_add(1);
                if state.consecutive_exceed_count >= self.repeat_limit {
                    self.notify(state, NotifyReason::RepeatedWarn, now)
                } else {
                    state.phase = Phase::Warning;
                    TrackerOutcome::default()
                }
            }
            Level::Crit => {
                state.consecutive_exceed_count = state.consecutive_exceed_count.saturating_add(1);
                self.notify(state, NotifyReason::ImmediateCrit, now)
            }
        }
    }

    fn notify(
        &self,
        state: &mut ExceedanceState,
        reason: NotifyReason,
        now: DateTime<Utc>,
    ) -> TrackerOutcome {
        if self.in_cooldown(state, reason, now) {
            state.phase = Phase::Warning;
            return TrackerOutcome {
                suppressed: true,
                ..TrackerOutcome::default()
            };
        }

        state.phase = Phase::Notified;
        state.consecutive_exceed_count = 0;
        state.last_notified_at = Some(now);
        state.notified_in_episode = true;
        state.episode_reason = state.episode_reason.max(Some(reason));

        TrackerOutcome {
            reason,
            ..TrackerOutcome::default()
        }
    }

    fn in_cooldown(
        &self,
        state: &ExceedanceState,
        reason: NotifyReason,
        now: DateTime<Utc>,
    ) -> bool {
        let (Some(cooldown), Some(last)) = (self.cooldown, state.last_notified_at) else {
            return false;
        };
        if !state.notified_in_episode || state.episode_reason < Some(reason) {
            return false;
        }
        match (now - last).to_std() {
            Ok(elapsed) => elapsed < cooldown,
            // clock went backwards
            Err(_) => true,
        }
    }
}
