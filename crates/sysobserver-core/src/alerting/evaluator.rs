//! Badness scoring

use crate::error::{Error, Result};
use crate::models::{BadnessScore, Level, MetricReading, ThresholdConfig};

/// Maps raw readings onto a bounded severity score for one metric
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BadnessEvaluator {
    thresholds: ThresholdConfig,
}

impl BadnessEvaluator {
    /// Create an evaluator, rejecting thresholds that violate `0 <= warn < crit <= max`
    pub fn new(thresholds: ThresholdConfig) -> Result<Self> {
        thresholds.validate()?;
        Ok(Self { thresholds })
    }

    /// The thresholds this evaluator scores against
    pub fn thresholds(&self) -> &ThresholdConfig {
        &self.thresholds
    }

    /// Score a reading.
    ///
    /// Non-finite values are rejected as unavailable samples; they never reach the tracker.
    pub fn score(&self, reading: &MetricReading) -> Result<BadnessScore> {
        if !reading.value.is_finite() {
            return Err(Error::sample_unavailable(
                &reading.metric_id,
                format!("non-finite reading {}", reading.value),
            ));
        }

        let ThresholdConfig {
            warn_level,
            crit_level,
            max_level,
        } = self.thresholds;

        let value = reading.value;
        let score = ((value - warn_level) / (max_level - warn_level)).clamp(0.0, 1.0);

        let level = if value < warn_level {
            Level::Ok
        } else if value < crit_level {
            Level::Warn
        } else {
            Level::Crit
        };

        Ok(BadnessScore {
            metric_id: reading.metric_id.clone(),
            value,
            score,
            level,
        })
    }
}

/// Score a reading against thresholds in one step
pub fn evaluate(reading: &MetricReading, thresholds: &ThresholdConfig) -> Result<BadnessScore> {
    BadnessEvaluator::new(*thresholds)?.score(reading)
}
