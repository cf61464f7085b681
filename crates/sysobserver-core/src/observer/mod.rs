//! Observer module - the sampling loop
//!
//! [`ObserverContext`] owns everything a cycle needs (metrics, per-metric
//! state, tracker, counters). [`Observer`] moves a context onto a background
//! task that is driven by start/stop/status commands and a single timer.

mod cycle;
mod handle;

pub use cycle::{run_cycle, ObserverContext};
pub use handle::Observer;

use std::sync::Arc;

use tracing::info;

use crate::alerting::BadnessEvaluator;
use crate::collector::{build_source, discover_metrics, HostProbe, MetricSource};
use crate::config::{Config, MetricConfig};
use crate::error::{Error, Result};
use crate::models::MetricDescriptor;

/// A configured metric: what it is, where it comes from and how it is scored
#[derive(Clone)]
pub struct MonitoredMetric {
    /// Id, label, unit and thresholds
    pub descriptor: MetricDescriptor,
    /// Where readings come from
    pub source: Arc<dyn MetricSource>,
    /// Scores readings against the descriptor's thresholds
    pub evaluator: BadnessEvaluator,
}

impl std::fmt::Debug for MonitoredMetric {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MonitoredMetric")
            .field("descriptor", &self.descriptor)
            .finish_non_exhaustive()
    }
}

impl MonitoredMetric {
    /// Pair a descriptor with a source; fails on invalid thresholds
    pub fn new(descriptor: MetricDescriptor, source: Arc<dyn MetricSource>) -> Result<Self> {
        let evaluator = BadnessEvaluator::new(descriptor.thresholds).map_err(|e| {
            Error::config(format!("metric '{}': {e}", descriptor.id))
        })?;
        Ok(Self {
            descriptor,
            source,
            evaluator,
        })
    }

    /// Build from a `[[metrics]]` entry
    pub fn from_config(config: &MetricConfig, probe: &HostProbe) -> Result<Self> {
        let source = build_source(&config.source, probe);
        let descriptor = MetricDescriptor {
            id: config.id.clone(),
            label: config.name.clone().unwrap_or_else(|| source.label()),
            unit: source.unit().to_string(),
            thresholds: config.thresholds(),
        };
        Self::new(descriptor, source)
    }

    /// Configured id
    pub fn id(&self) -> &str {
        &self.descriptor.id
    }
}

/// Build the metric set from configuration, falling back to discovery when
/// no metrics are listed
pub async fn build_metrics(config: &Config, probe: &HostProbe) -> Result<Vec<MonitoredMetric>> {
    let configs = if config.metrics.is_empty() && config.discovery.enabled {
        discover_metrics(&config.discovery, probe).await
    } else {
        config.metrics.clone()
    };

    if configs.is_empty() {
        return Err(Error::config(
            "no metrics configured and discovery is disabled",
        ));
    }

    let metrics = configs
        .iter()
        .map(|m| MonitoredMetric::from_config(m, probe))
        .collect::<Result<Vec<_>>>()?;

    info!(
        metrics = ?metrics.iter().map(MonitoredMetric::id).collect::<Vec<_>>(),
        "Metrics configured"
    );
    Ok(metrics)
}
