//! Metric readings, thresholds and scores

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// A single sample of one metric, taken once per cycle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricReading {
    /// Configured metric id
    pub metric_id: String,

    /// Raw value (percent, degrees, ...; interpreted per metric)
    pub value: f64,

    /// When the sample was taken
    pub timestamp: DateTime<Utc>,
}

impl MetricReading {
    /// Create a reading stamped with the current time
    pub fn now(metric_id: impl Into<String>, value: f64) -> Self {
        Self {
            metric_id: metric_id.into(),
            value,
            timestamp: Utc::now(),
        }
    }
}

/// Warn/crit/max bounds for one metric.
///
/// Must satisfy `0 <= warn < crit <= max`; see [`ThresholdConfig::validate`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ThresholdConfig {
    /// Level at which a reading stops being OK
    #[serde(rename = "warn")]
    pub warn_level: f64,

    /// Level at which a reading is critical
    #[serde(rename = "crit")]
    pub crit_level: f64,

    /// Level at which the badness score saturates at 1
    #[serde(rename = "max")]
    pub max_level: f64,
}

impl ThresholdConfig {
    /// Create a new threshold triple (unvalidated)
    pub fn new(warn_level: f64, crit_level: f64, max_level: f64) -> Self {
        Self {
            warn_level,
            crit_level,
            max_level,
        }
    }

    /// Check the ordering invariant
    pub fn validate(&self) -> Result<()> {
        let Self {
            warn_level,
            crit_level,
            max_level,
        } = *self;

        if !(warn_level.is_finite() && crit_level.is_finite() && max_level.is_finite()) {
            return Err(Error::config(format!(
                "thresholds must be finite (warn={warn_level}, crit={crit_level}, max={max_level})"
            )));
        }

        if warn_level < 0.0 || warn_level >= crit_level || crit_level > max_level {
            return Err(Error::config(format!(
                "thresholds must satisfy 0 <= warn < crit <= max (warn={warn_level}, crit={crit_level}, max={max_level})"
            )));
        }

        Ok(())
    }
}

/// Qualitative severity bucket
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "UPPERCASE")]
pub enum Level {
    /// Below the warn level
    #[default]
    Ok,
    /// Between warn and crit
    Warn,
    /// At or above crit
    Crit,
}

impl Level {
    /// Whether this level counts as an exceedance
    pub fn is_exceeded(self) -> bool {
        self != Level::Ok
    }

    /// Upper-case label used in messages and metric labels
    pub fn as_str(self) -> &'static str {
        match self {
            Level::Ok => "OK",
            Level::Warn => "WARN",
            Level::Crit => "CRIT",
        }
    }
}

impl std::fmt::Display for Level {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Bounded severity derived from one reading
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BadnessScore {
    /// Configured metric id
    pub metric_id: String,

    /// The raw reading this score was computed from
    pub value: f64,

    /// Normalized position of the value between warn and max, in `[0, 1]`
    pub score: f64,

    /// Discretized level
    pub level: Level,
}

/// Static description of a monitored metric, used for messages and status
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricDescriptor {
    /// Configured metric id
    pub id: String,

    /// Human readable label
    pub label: String,

    /// Unit suffix for values (`%`, `°C`, ...)
    pub unit: String,

    /// Configured thresholds
    pub thresholds: ThresholdConfig,
}
