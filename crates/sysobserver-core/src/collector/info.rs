//! One-shot host snapshot for the `info` command and the control API

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sysinfo::{Disks, System};

use super::host::{bytes_to_gb, used_percent};
use super::{host_name, is_watchable_mount, query_gpus, GpuReading, HostProbe};

/// Memory summary
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryInfo {
    /// Total memory in GiB
    pub total_gb: f64,
    /// Used memory in GiB
    pub used_gb: f64,
    /// Available memory in GiB
    pub available_gb: f64,
    /// Used percentage
    pub percent: f64,
}

/// One mounted disk
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiskInfo {
    /// Device name
    pub device: String,
    /// Mount point
    pub mount: String,
    /// Used percentage
    pub percent: f64,
    /// Total bytes
    pub total_bytes: u64,
    /// Available bytes
    pub available_bytes: u64,
}

/// Snapshot of the local machine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemInfo {
    /// Host name
    pub host: String,
    /// Operating system description
    pub os: Option<String>,
    /// Kernel version
    pub kernel: Option<String>,
    /// Time since boot
    #[serde(with = "humantime_serde")]
    pub uptime: Duration,
    /// Logical CPUs
    pub cpus: usize,
    /// Load averages (1, 5, 15 min) in percent of logical CPUs
    pub load_percent: [f64; 3],
    /// Memory summary
    pub memory: MemoryInfo,
    /// Watched disks
    pub disks: Vec<DiskInfo>,
    /// GPUs (empty without `nvidia-smi`)
    pub gpus: Vec<GpuReading>,
    /// When the snapshot was taken
    pub collected_at: DateTime<Utc>,
}

impl SystemInfo {
    /// Collect a snapshot; GPU data only when `include_gpu` is set
    pub async fn collect(probe: &HostProbe, include_gpu: bool) -> Self {
        let host_probe = probe.clone();
        let snapshot = tokio::task::spawn_blocking(move || Self::collect_host(&host_probe)).await;

        let mut info = match snapshot {
            Ok(info) => info,
            Err(e) => {
                tracing::warn!(error = %e, "Host snapshot task failed");
                Self::empty()
            }
        };

        if include_gpu {
            info.gpus = query_gpus().await.unwrap_or_default();
        }
        info
    }

    fn collect_host(probe: &HostProbe) -> Self {
        let (total, used, available) = probe.memory_bytes();
        let disks = Disks::new_with_refreshed_list();

        Self {
            host: host_name(),
            os: System::long_os_version(),
            kernel: System::kernel_version(),
            uptime: Duration::from_secs(System::uptime()),
            cpus: probe.logical_cpus(),
            load_percent: probe.load_percent(),
            memory: MemoryInfo {
                total_gb: bytes_to_gb(total),
                used_gb: bytes_to_gb(used),
                available_gb: bytes_to_gb(available),
                percent: used_percent(total, total.saturating_sub(used)).unwrap_or(0.0),
            },
            disks: disks
                .list()
                .iter()
                .filter(|d| is_watchable_mount(&d.name().to_string_lossy(), d.mount_point()))
                .map(|d| DiskInfo {
                    device: d.name().to_string_lossy().into_owned(),
                    mount: d.mount_point().display().to_string(),
                    percent: used_percent(d.total_space(), d.available_space()).unwrap_or(0.0),
                    total_bytes: d.total_space(),
                    available_bytes: d.available_space(),
                })
                .collect(),
            gpus: Vec::new(),
            collected_at: Utc::now(),
        }
    }

    fn empty() -> Self {
        Self {
            host: host_name(),
            os: None,
            kernel: None,
            uptime: Duration::ZERO,
            cpus: 0,
            load_percent: [0.0; 3],
            memory: MemoryInfo {
                total_gb: 0.0,
                used_gb: 0.0,
                available_gb: 0.0,
                percent: 0.0,
            },
            disks: Vec::new(),
            gpus: Vec::new(),
            collected_at: Utc::now(),
        }
    }
}

impl fmt::Display for SystemInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Status of {}", self.host)?;
        writeln!(f, "Date:    {}", self.collected_at.to_rfc3339())?;
        if let Some(os) = &self.os {
            writeln!(f, "OS:      {os}")?;
        }
        writeln!(f, "Uptime:  {}", humantime::format_duration(self.uptime))?;
        writeln!(f, "CPUs:    {}", self.cpus)?;
        writeln!(f, "RAM:     {:.1} GB", self.memory.total_gb)?;
        writeln!(
            f,
            "Load:    1min: {:.1}%, 5min: {:.1}%, 15min: {:.1}%",
            self.load_percent[0], self.load_percent[1], self.load_percent[2]
        )?;
        writeln!(
            f,
            "Memory:  {:.1}% [used: {:.1} / {:.1} GB] [available: {:.1} GB]",
            self.memory.percent, self.memory.used_gb, self.memory.total_gb, self.memory.available_gb
        )?;

        if !self.disks.is_empty() {
            writeln!(f)?;
            let rows: Vec<[String; 5]> = self
                .disks
                .iter()
                .map(|d| {
                    [
                        d.device.clone(),
                        d.mount.clone(),
                        format!("{:.1} %", d.percent),
                        format!("{:.1} GB", bytes_to_gb(d.total_bytes)),
                        format!("{:.1} GB", bytes_to_gb(d.available_bytes)),
                    ]
                })
                .collect();
            write_table(f, ["Device", "Mount", "Use", "Total", "Free"], &rows)?;
        }

        if !self.gpus.is_empty() {
            writeln!(f)?;
            let na = |v: Option<f64>, unit: &str| v.map_or("N/A".to_string(), |v| format!("{v:.1} {unit}"));
            let rows: Vec<[String; 4]> = self
                .gpus
                .iter()
                .map(|g| {
                    [
                        g.index.to_string(),
                        na(g.utilization, "%"),
                        na(g.memory_percent(), "%"),
                        na(g.temperature, "°C"),
                    ]
                })
                .collect();
            write_table(f, ["ID", "Util", "Mem", "Temp"], &rows)?;
        }

        Ok(())
    }
}

fn write_table<const N: usize>(
    f: &mut fmt::Formatter<'_>,
    header: [&str; N],
    rows: &[[String; N]],
) -> fmt::Result {
    let widths: Vec<usize> = (0..N)
        .map(|i| {
            rows.iter()
                .map(|r| r[i].chars().count())
                .chain(std::iter::once(header[i].chars().count()))
                .max()
                .unwrap_or(0)
        })
        .collect();

    let line = |cells: Vec<&str>| {
        cells
            .iter()
            .zip(&widths)
            .map(|(c, w)| format!("{c:<w$}"))
            .collect::<Vec<_>>()
            .join(" | ")
    };

    writeln!(f, "{}", line(header.to_vec()).trim_end())?;
    writeln!(
        f,
        "{}",
        widths.iter().map(|w| "-".repeat(*w)).collect::<Vec<_>>().join(" | ")
    )?;
    for row in rows {
        writeln!(f, "{}", line(row.iter().map(String::as_str).collect()).trim_end())?;
    }
    Ok(())
}
