//! Host metric sources backed by `sysinfo`

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use sysinfo::{Disks, System};

use super::{is_watchable_mount, MetricSource, SampleError};
use crate::config::LoadWindow;

const GIB: f64 = 1024.0 * 1024.0 * 1024.0;

/// Convert bytes to GB (GiB, as `df -h` reports them)
pub fn bytes_to_gb(bytes: u64) -> f64 {
    bytes as f64 / GIB
}

/// Local machine name
pub fn host_name() -> String {
    System::host_name().unwrap_or_else(|| "unknown-host".to_string())
}

/// Shared handle to the local system, reused across samples
#[derive(Clone)]
pub struct HostProbe {
    system: Arc<Mutex<System>>,
}

impl Default for HostProbe {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for HostProbe {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HostProbe").finish_non_exhaustive()
    }
}

impl HostProbe {
    /// Create a probe; nothing is read until the first sample
    pub fn new() -> Self {
        Self {
            system: Arc::new(Mutex::new(System::new())),
        }
    }

    /// Number of logical CPUs (at least 1)
    pub fn logical_cpus(&self) -> usize {
        let mut sys = self.system.lock();
        if sys.cpus().is_empty() {
            sys.refresh_cpu_all();
        }
        sys.cpus().len().max(1)
    }

    /// Load averages (1, 5, 15 min) as a percentage of logical CPUs
    pub fn load_percent(&self) -> [f64; 3] {
        let cpus = self.logical_cpus() as f64;
        let load = System::load_average();
        [load.one, load.five, load.fifteen].map(|l| l / cpus * 100.0)
    }

    /// Raw memory figures in bytes: (total, used, available)
    pub fn memory_bytes(&self) -> (u64, u64, u64) {
        let mut sys = self.system.lock();
        sys.refresh_memory();
        (sys.total_memory(), sys.used_memory(), sys.available_memory())
    }

    /// Used memory as a percentage of total
    pub fn memory_percent(&self) -> Option<f64> {
        let (total, used, _) = self.memory_bytes();
        (total > 0).then(|| used as f64 / total as f64 * 100.0)
    }

    /// Used memory in GB
    pub fn memory_used_gb(&self) -> Option<f64> {
        let (total, used, _) = self.memory_bytes();
        (total > 0).then(|| bytes_to_gb(used))
    }

    /// `(total, available)` bytes of the disk mounted at `path`
    pub fn disk_space(&self, path: &Path) -> Option<(u64, u64)> {
        let disks = Disks::new_with_refreshed_list();
        disks
            .list()
            .iter()
            .find(|d| d.mount_point() == path)
            .map(|d| (d.total_space(), d.available_space()))
    }

    /// Used space of the disk mounted at `path`, as a percentage
    pub fn disk_percent(&self, path: &Path) -> Option<f64> {
        self.disk_space(path)
            .and_then(|(total, available)| used_percent(total, available))
    }

    /// Used space of the disk mounted at `path`, in GB
    pub fn disk_used_gb(&self, path: &Path) -> Option<f64> {
        self.disk_space(path)
            .map(|(total, available)| bytes_to_gb(total.saturating_sub(available)))
    }

    /// Real disks (no loop devices, nothing under `/boot`) with their total size in bytes
    pub fn disks(&self) -> Vec<(PathBuf, u64)> {
        let disks = Disks::new_with_refreshed_list();
        let mut mounts: Vec<(PathBuf, u64)> = disks
            .list()
            .iter()
            .filter(|d| is_watchable_mount(&d.name().to_string_lossy(), d.mount_point()))
            .map(|d| (d.mount_point().to_path_buf(), d.total_space()))
            .collect();
        mounts.sort_by(|a, b| a.0.cmp(&b.0));
        mounts.dedup_by(|a, b| a.0 == b.0);
        mounts
    }
}

pub(crate) fn used_percent(total: u64, available: u64) -> Option<f64> {
    (total > 0).then(|| total.saturating_sub(available) as f64 / total as f64 * 100.0)
}

async fn blocking<F>(f: F) -> Result<f64, SampleError>
where
    F: FnOnce() -> Option<f64> + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| SampleError::Unavailable(e.to_string()))?
        .ok_or_else(|| SampleError::Unavailable("no data".to_string()))
}

/// Load average over a window, as a percentage of logical CPUs
#[derive(Debug, Clone)]
pub struct LoadAverageSource {
    probe: HostProbe,
    window: LoadWindow,
}

impl LoadAverageSource {
    /// Create a new load average source
    pub fn new(probe: HostProbe, window: LoadWindow) -> Self {
        Self { probe, window }
    }
}

#[async_trait]
impl MetricSource for LoadAverageSource {
    fn label(&self) -> String {
        let window = match self.window {
            LoadWindow::OneMinute => "1min",
            LoadWindow::FiveMinutes => "5min",
            LoadWindow::FifteenMinutes => "15min",
        };
        format!("CPU-Load-Avg-{window}")
    }

    async fn sample(&self) -> Result<f64, SampleError> {
        let probe = self.probe.clone();
        let idx = match self.window {
            LoadWindow::OneMinute => 0,
            LoadWindow::FiveMinutes => 1,
            LoadWindow::FifteenMinutes => 2,
        };
        blocking(move || Some(probe.load_percent()[idx])).await
    }
}

/// Used memory percentage
#[derive(Debug, Clone)]
pub struct MemoryUsageSource {
    probe: HostProbe,
}

impl MemoryUsageSource {
    /// Create a new memory source
    pub fn new(probe: HostProbe) -> Self {
        Self { probe }
    }
}

#[async_trait]
impl MetricSource for MemoryUsageSource {
    fn label(&self) -> String {
        "Memory-Utilisation".to_string()
    }

    async fn sample(&self) -> Result<f64, SampleError> {
        let probe = self.probe.clone();
        blocking(move || probe.memory_percent()).await
    }
}

/// Used space percentage of one mount point
#[derive(Debug, Clone)]
pub struct DiskUsageSource {
    probe: HostProbe,
    path: PathBuf,
}

impl DiskUsageSource {
    /// Create a new disk source for `path`
    pub fn new(probe: HostProbe, path: PathBuf) -> Self {
        Self { probe, path }
    }
}

#[async_trait]
impl MetricSource for DiskUsageSource {
    fn label(&self) -> String {
        format!("Disk-Usage-{}", self.path.display())
    }

    async fn sample(&self) -> Result<f64, SampleError> {
        let probe = self.probe.clone();
        let path = self.path.clone();
        blocking(move || probe.disk_percent(&path))
            .await
            .map_err(|_| {
                SampleError::Unavailable(format!("no disk mounted at {}", self.path.display()))
            })
    }
}

/// Used space of one mount point in GB
#[derive(Debug, Clone)]
pub struct DiskUsedGbSource {
    probe: HostProbe,
    path: PathBuf,
}

impl DiskUsedGbSource {
    /// Create a new used-space source for `path`
    pub fn new(probe: HostProbe, path: PathBuf) -> Self {
        Self { probe, path }
    }
}

#[async_trait]
impl MetricSource for DiskUsedGbSource {
    fn label(&self) -> String {
        format!("Disk-Space-Used-{}", self.path.display())
    }

    fn unit(&self) -> &'static str {
        "GB"
    }

    async fn sample(&self) -> Result<f64, SampleError> {
        let probe = self.probe.clone();
        let path = self.path.clone();
        blocking(move || probe.disk_used_gb(&path))
            .await
            .map_err(|_| {
                SampleError::Unavailable(format!("no disk mounted at {}", self.path.display()))
            })
    }
}

/// Used memory in GB
#[derive(Debug, Clone)]
pub struct MemoryUsedGbSource {
    probe: HostProbe,
}

impl MemoryUsedGbSource {
    /// Create a new used-memory source
    pub fn new(probe: HostProbe) -> Self {
        Self { probe }
    }
}

#[async_trait]
impl MetricSource for MemoryUsedGbSource {
    fn label(&self) -> String {
        "Memory-Used".to_string()
    }

    fn unit(&self) -> &'static str {
        "GB"
    }

    async fn sample(&self) -> Result<f64, SampleError> {
        let probe = self.probe.clone();
        blocking(move || probe.memory_used_gb()).await
    }
}
