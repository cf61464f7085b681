//! GPU metric sources backed by `nvidia-smi`

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::process::Command;

use super::{MetricSource, SampleError};

const QUERY: &str = "--query-gpu=index,utilization.gpu,memory.used,memory.total,temperature.gpu";

/// One GPU as reported by `nvidia-smi`; fields it reports as `[N/A]` are `None`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GpuReading {
    /// GPU index
    pub index: u32,
    /// Utilization in percent
    pub utilization: Option<f64>,
    /// Used memory in MiB
    pub memory_used_mb: Option<f64>,
    /// Total memory in MiB
    pub memory_total_mb: Option<f64>,
    /// Temperature in degrees Celsius
    pub temperature: Option<f64>,
}

impl GpuReading {
    /// Used memory as a percentage of total
    pub fn memory_percent(&self) -> Option<f64> {
        match (self.memory_used_mb, self.memory_total_mb) {
            (Some(used), Some(total)) if total > 0.0 => Some(used / total * 100.0),
            _ => None,
        }
    }
}

/// Parse `nvidia-smi --format=csv,noheader,nounits` output
pub fn parse_nvidia_smi(output: &str) -> Vec<GpuReading> {
    output
        .lines()
        .filter_map(|line| {
            let fields: Vec<&str> = line.split(',').map(str::trim).collect();
            if fields.len() < 5 {
                return None;
            }
            let num = |s: &str| s.parse::<f64>().ok();
            Some(GpuReading {
                index: fields[0].parse().ok()?,
                utilization: num(fields[1]),
                memory_used_mb: num(fields[2]),
                memory_total_mb: num(fields[3]),
                temperature: num(fields[4]),
            })
        })
        .collect()
}

/// Query all GPUs. A missing `nvidia-smi` is reported as unavailable.
pub async fn query_gpus() -> Result<Vec<GpuReading>, SampleError> {
    let output = Command::new("nvidia-smi")
        .arg(QUERY)
        .arg("--format=csv,noheader,nounits")
        .kill_on_drop(true)
        .output()
        .await
        .map_err(|e| SampleError::Unavailable(format!("nvidia-smi: {e}")))?;

    if !output.status.success() {
        return Err(SampleError::Unavailable(format!(
            "nvidia-smi exited with {}",
            output.status
        )));
    }

    Ok(parse_nvidia_smi(&String::from_utf8_lossy(&output.stdout)))
}

/// Which GPU figure a [`GpuSource`] reports
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GpuField {
    /// Utilization percent
    Utilization,
    /// Memory percent
    Memory,
    /// Temperature in °C
    Temperature,
}

/// One figure of one GPU
#[derive(Debug, Clone)]
pub struct GpuSource {
    index: u32,
    field: GpuField,
}

impl GpuSource {
    /// Create a new GPU source
    pub fn new(index: u32, field: GpuField) -> Self {
        Self { index, field }
    }

    fn pick(&self, gpu: &GpuReading) -> Option<f64> {
        match self.field {
            GpuField::Utilization => gpu.utilization,
            GpuField::Memory => gpu.memory_percent(),
            GpuField::Temperature => gpu.temperature,
        }
    }
}

#[async_trait]
impl MetricSource for GpuSource {
    fn label(&self) -> String {
        let what = match self.field {
            GpuField::Utilization => "Utilisation",
            GpuField::Memory => "Memory",
            GpuField::Temperature => "Temperature",
        };
        format!("GPU{}-{what}", self.index)
    }

    fn unit(&self) -> &'static str {
        match self.field {
            GpuField::Temperature => "°C",
            GpuField::Utilization | GpuField::Memory => "%",
        }
    }

    async fn sample(&self) -> Result<f64, SampleError> {
        let gpus = query_gpus().await?;
        gpus.iter()
            .find(|g| g.index == self.index)
            .and_then(|g| self.pick(g))
            .ok_or_else(|| SampleError::Unavailable(format!("no data for GPU {}", self.index)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_parse_output() {
        let out = "0, 35, 2048, 8192, 54\n1, [N/A], 100, 16384, 61\n";
        let gpus = parse_nvidia_smi(out);

        assert_eq!(gpus.len(), 2);
        assert_eq!(
            gpus[0],
            GpuReading {
                index: 0,
                utilization: Some(35.0),
                memory_used_mb: Some(2048.0),
                memory_total_mb: Some(8192.0),
                temperature: Some(54.0),
            }
        );
        assert_eq!(gpus[0].memory_percent(), Some(25.0));
        assert_eq!(gpus[1].utilization, None);
    }

    #[test]
    fn test_parse_skips_garbage() {
        assert!(parse_nvidia_smi("").is_empty());
        assert!(parse_nvidia_smi("No devices were found").is_empty());
        assert!(parse_nvidia_smi("x, 1, 2, 3, 4").is_empty());
    }

    #[test]
    fn test_source_pick_and_unit() {
        let gpu = parse_nvidia_smi("3, 90, 10, 0, 70").remove(0);

        assert_eq!(GpuSource::new(3, GpuField::Utilization).pick(&gpu), Some(90.0));
        assert_eq!(GpuSource::new(3, GpuField::Memory).pick(&gpu), None);
        assert_eq!(GpuSource::new(3, GpuField::Temperature).unit(), "°C");
    }
}
