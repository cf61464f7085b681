//! Collector module - metric sources
//!
//! Every monitored metric is backed by a [`MetricSource`] that produces one
//! number per call. Host sources read from `sysinfo`, GPU sources from
//! `nvidia-smi`. Sampling is always bounded by a timeout; anything that fails
//! or takes too long is a transient gap, never a fatal error.

mod gpu;
mod host;
mod info;
mod scripted;

pub use gpu::{parse_nvidia_smi, query_gpus, GpuField, GpuReading, GpuSource};
pub use host::{
    bytes_to_gb, host_name, DiskUsageSource, DiskUsedGbSource, HostProbe, LoadAverageSource,
    MemoryUsageSource, MemoryUsedGbSource,
};
pub use info::{DiskInfo, MemoryInfo, SystemInfo};
pub use scripted::ScriptedSource;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, info};

use crate::config::{DiscoveryConfig, LoadWindow, MetricConfig, SourceSpec};

/// Produces a reading for one resource dimension on demand
#[async_trait]
pub trait MetricSource: Send + Sync {
    /// Human readable label (`Memory-Utilisation`, `Disk-Usage-/`, ...)
    fn label(&self) -> String;

    /// Unit suffix for values
    fn unit(&self) -> &'static str {
        "%"
    }

    /// Take one sample
    async fn sample(&self) -> Result<f64, SampleError>;
}

/// Why a sample could not be taken
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SampleError {
    #[error("unavailable: {0}")]
    Unavailable(String),

    #[error("timed out after {0:?}")]
    Timeout(Duration),

    #[error("invalid reading: {0}")]
    Invalid(f64),
}

/// Sample `source`, bounding the call by `timeout` and rejecting non-finite values
pub async fn sample_with_timeout(
    source: &dyn MetricSource,
    timeout: Duration,
) -> Result<f64, SampleError> {
    let value = tokio::time::timeout(timeout, source.sample())
        .await
        .map_err(|_| SampleError::Timeout(timeout))??;

    if value.is_finite() {
        Ok(value)
    } else {
        Err(SampleError::Invalid(value))
    }
}

/// Build the source described by `spec`
pub fn build_source(spec: &SourceSpec, probe: &HostProbe) -> Arc<dyn MetricSource> {
    match spec {
        SourceSpec::LoadAverage { window } => {
            Arc::new(LoadAverageSource::new(probe.clone(), *window))
        }
        SourceSpec::MemoryUsage => Arc::new(MemoryUsageSource::new(probe.clone())),
        SourceSpec::DiskUsage { path } => {
            Arc::new(DiskUsageSource::new(probe.clone(), path.clone()))
        }
        SourceSpec::DiskUsedGb { path } => {
            Arc::new(DiskUsedGbSource::new(probe.clone(), path.clone()))
        }
        SourceSpec::MemoryUsedGb => Arc::new(MemoryUsedGbSource::new(probe.clone())),
        SourceSpec::GpuUtilization { index } => {
            Arc::new(GpuSource::new(*index, GpuField::Utilization))
        }
        SourceSpec::GpuMemory { index } => Arc::new(GpuSource::new(*index, GpuField::Memory)),
        SourceSpec::GpuTemperature { index } => {
            Arc::new(GpuSource::new(*index, GpuField::Temperature))
        }
    }
}

/// Default metric set: load, memory, every real disk and (optionally) every GPU.
///
/// The thresholds are starting points, meant to be tuned in the config file.
pub async fn discover_metrics(discovery: &DiscoveryConfig, probe: &HostProbe) -> Vec<MetricConfig> {
    let mut metrics = vec![
        MetricConfig {
            id: "cpu_load_5min".to_string(),
            name: None,
            warn: 95.0,
            crit: 150.0,
            max: 200.0,
            source: SourceSpec::LoadAverage {
                window: LoadWindow::FiveMinutes,
            },
        },
        MetricConfig {
            id: "mem_util".to_string(),
            name: None,
            warn: 85.0,
            crit: 95.0,
            max: 100.0,
            source: SourceSpec::MemoryUsage,
        },
    ];

    let disks = {
        let probe = probe.clone();
        tokio::task::spawn_blocking(move || probe.disks())
            .await
            .unwrap_or_default()
    };
    for (i, (path, total_bytes)) in disks.into_iter().enumerate() {
        metrics.extend(disk_metrics(i, path, total_bytes));
    }

    if discovery.gpu {
        match query_gpus().await {
            Ok(gpus) => {
                for gpu in gpus {
                    metrics.push(MetricConfig {
                        id: format!("gpu{}_mem", gpu.index),
                        name: None,
                        warn: 90.0,
                        crit: 98.0,
                        max: 100.0,
                        source: SourceSpec::GpuMemory { index: gpu.index },
                    });
                    metrics.push(MetricConfig {
                        id: format!("gpu{}_temp", gpu.index),
                        name: None,
                        warn: 80.0,
                        crit: 90.0,
                        max: 100.0,
                        source: SourceSpec::GpuTemperature { index: gpu.index },
                    });
                }
            }
            Err(e) => debug!(error = %e, "No GPUs discovered"),
        }
    }

    info!(count = metrics.len(), "Discovered default metrics");
    metrics
}

/// Free space every disk should keep, in GB
const MIN_FREE_DISK_GB: f64 = 30.0;

/// Metrics for the `index`th disk: used percentage, plus used GB when the disk
/// is large enough to keep [`MIN_FREE_DISK_GB`] free
pub(crate) fn disk_metrics(index: usize, path: PathBuf, total_bytes: u64) -> Vec<MetricConfig> {
    let mut metrics = vec![MetricConfig {
        id: format!("disk_usage_{index}"),
        name: None,
        warn: 90.0,
        crit: 95.0,
        max: 100.0,
        source: SourceSpec::DiskUsage { path: path.clone() },
    }];

    if let Some((warn, crit, max)) = disk_space_thresholds(bytes_to_gb(total_bytes)) {
        metrics.push(MetricConfig {
            id: format!("disk_used_gb_{index}"),
            name: None,
            warn,
            crit,
            max,
            source: SourceSpec::DiskUsedGb { path },
        });
    }
    metrics
}

/// `(warn, crit, max)` in GB for a disk of `total_gb`.
///
/// CRIT fires once less than [`MIN_FREE_DISK_GB`] is left, WARN another 30 GB
/// earlier (or halfway to CRIT on small disks). `None` when the disk is too
/// small to keep that much free.
pub(crate) fn disk_space_thresholds(total_gb: f64) -> Option<(f64, f64, f64)> {
    let total = round_tenth(total_gb);
    let crit = round_tenth(total - MIN_FREE_DISK_GB);
    if crit <= 0.0 {
        return None;
    }
    let warn = round_tenth(crit - MIN_FREE_DISK_GB.min(crit / 2.0));
    Some((warn, crit, total))
}

fn round_tenth(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

/// Mount points that are worth watching
pub(crate) fn is_watchable_mount(device: &str, mount: &Path) -> bool {
    !device.contains("loop") && !mount.starts_with("/boot")
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[tokio::test(start_paused = true)]
    async fn test_timeout_is_sample_error() {
        let source = ScriptedSource::new("slow", vec![Ok(1.0)]).with_delay(Duration::from_secs(60));

        let err = sample_with_timeout(&source, Duration::from_secs(5))
            .await
            .unwrap_err();

        assert_eq!(err, SampleError::Timeout(Duration::from_secs(5)));
    }

    #[tokio::test]
    async fn test_non_finite_is_invalid() {
        let source = ScriptedSource::new("nan", vec![Ok(f64::INFINITY)]);

        let err = sample_with_timeout(&source, Duration::from_secs(1))
            .await
            .unwrap_err();

        assert!(matches!(err, SampleError::Invalid(_)));
    }

    #[tokio::test]
    async fn test_passes_value_through() {
        let source = ScriptedSource::new("ok", vec![Ok(42.5)]);
        let value = sample_with_timeout(&source, Duration::from_secs(1)).await.unwrap();
        assert_eq!(value, 42.5);
    }

    #[test]
    fn test_watchable_mounts() {
        assert!(is_watchable_mount("/dev/sda1", Path::new("/")));
        assert!(is_watchable_mount("/dev/nvme0n1p2", Path::new("/home")));
        assert!(!is_watchable_mount("/dev/loop3", Path::new("/snap/core/1")));
        assert!(!is_watchable_mount("/dev/sda2", Path::new("/boot/efi")));
    }

    #[test]
    fn test_build_source_labels() {
        let probe = HostProbe::new();
        let cases = [
            (
                SourceSpec::LoadAverage {
                    window: LoadWindow::FiveMinutes,
                },
                "CPU-Load-Avg-5min",
            ),
            (SourceSpec::MemoryUsage, "Memory-Utilisation"),
            (
                SourceSpec::DiskUsage {
                    path: "/data".into(),
                },
                "Disk-Usage-/data",
            ),
            (
                SourceSpec::DiskUsedGb {
                    path: "/data".into(),
                },
                "Disk-Space-Used-/data",
            ),
            (SourceSpec::MemoryUsedGb, "Memory-Used"),
            (SourceSpec::GpuTemperature { index: 1 }, "GPU1-Temperature"),
        ];

        for (spec, label) in cases {
            assert_eq!(build_source(&spec, &probe).label(), label);
        }

        let gb = build_source(&SourceSpec::MemoryUsedGb, &probe);
        assert_eq!(gb.unit(), "GB");
    }

    #[rstest]
    #[case(500.0, Some((440.0, 470.0, 500.0)))]
    #[case(100.0, Some((40.0, 70.0, 100.0)))]
    #[case(40.0, Some((5.0, 10.0, 40.0)))]
    #[case(30.0, None)]
    #[case(8.0, None)]
    fn test_disk_space_thresholds(
        #[case] total_gb: f64,
        #[case] expected: Option<(f64, f64, f64)>,
    ) {
        assert_eq!(disk_space_thresholds(total_gb), expected);
    }

    #[test]
    fn test_disk_metrics_for_large_disk() {
        let total_bytes = 500 * 1024 * 1024 * 1024;
        let metrics = disk_metrics(1, PathBuf::from("/data"), total_bytes);

        assert_eq!(metrics.len(), 2);
        assert_eq!(metrics[0].id, "disk_usage_1");
        assert_eq!(
            metrics[0].source,
            SourceSpec::DiskUsage {
                path: "/data".into()
            }
        );

        let used = &metrics[1];
        assert_eq!(used.id, "disk_used_gb_1");
        assert_eq!((used.warn, used.crit, used.max), (440.0, 470.0, 500.0));
        assert_eq!(
            used.source,
            SourceSpec::DiskUsedGb {
                path: "/data".into()
            }
        );
        assert!(used.thresholds().validate().is_ok());
    }

    #[test]
    fn test_disk_metrics_for_small_disk() {
        let metrics = disk_metrics(0, PathBuf::from("/"), 16 * 1024 * 1024 * 1024);
        let ids: Vec<_> = metrics.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, vec!["disk_usage_0"]);
    }
}
