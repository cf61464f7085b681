//! Configuration management for sysobserver
//!
//! Configuration is layered with the `config` crate: built-in defaults, then
//! the first configuration file found on the search path, then
//! `SYSOBSERVER__SECTION__KEY` environment variables.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::Duration;

use config::{Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::models::ThresholdConfig;

/// Environment variable naming an explicit configuration file
pub const CONFIG_ENV_VAR: &str = "SYSOBSERVER_CONFIG";

/// Prefix for per-key environment overrides
pub const ENV_PREFIX: &str = "SYSOBSERVER";

/// Main configuration struct
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Observer loop configuration
    pub observer: ObserverConfig,

    /// Notification channel configuration
    pub notification: NotificationConfig,

    /// Control API configuration
    pub server: ServerConfig,

    /// Logging configuration
    pub logging: LoggingConfig,

    /// Default metric discovery
    pub discovery: DiscoveryConfig,

    /// Explicitly configured metrics, in evaluation order
    pub metrics: Vec<MetricConfig>,
}

/// Observer loop configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ObserverConfig {
    /// Time between the end of one cycle and the start of the next
    #[serde(with = "humantime_serde")]
    pub interval: Duration,

    /// Consecutive WARN cycles before a repeated-warn notification
    pub repeat_limit: u32,

    /// Upper bound for a single metric sample
    #[serde(with = "humantime_serde")]
    pub sample_timeout: Duration,

    /// Start cycling as soon as the server is up
    pub autostart: bool,

    /// Send a one-off message when the server comes up
    pub announce: bool,

    /// Report metrics that recovered after a notification
    pub notify_recovery: bool,

    /// Hold back further notifications for a metric within one episode
    #[serde(default, with = "humantime_serde")]
    pub notify_cooldown: Option<Duration>,
}

impl Default for ObserverConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(5 * 60),
            repeat_limit: 3,
            sample_timeout: Duration::from_secs(5),
            autostart: false,
            announce: true,
            notify_recovery: false,
            notify_cooldown: None,
        }
    }
}

/// Kind of notification channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SinkKind {
    /// Discord channel webhook
    Discord,
    /// Slack incoming webhook
    Slack,
    /// Generic JSON webhook
    Webhook,
    /// Write notifications to the log only
    #[default]
    Log,
}

/// Notification channel configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NotificationConfig {
    /// Channel kind
    pub kind: SinkKind,

    /// Webhook URL (required unless `kind = "log"`)
    pub url: Option<String>,

    /// HTTP timeout for a single delivery
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,

    /// Extra headers for generic webhooks
    pub headers: HashMap<String, String>,
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            kind: SinkKind::Log,
            url: None,
            timeout: Duration::from_secs(10),
            headers: HashMap::new(),
        }
    }
}

/// Control API configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Host to bind to
    pub host: String,
    /// HTTP port
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8787,
        }
    }
}

impl ServerConfig {
    /// `host:port` bind address
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human readable
    #[default]
    Pretty,
    /// One JSON object per line
    Json,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter directive when `RUST_LOG` is unset
    pub level: String,
    /// Output format
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Pretty,
        }
    }
}

/// Default metric discovery
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscoveryConfig {
    /// Add default metrics when no `[[metrics]]` are configured
    pub enabled: bool,
    /// Include GPUs reported by `nvidia-smi`
    pub gpu: bool,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            gpu: true,
        }
    }
}

/// Load average window
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum LoadWindow {
    /// One minute average
    #[serde(rename = "1m")]
    OneMinute,
    /// Five minute average
    #[default]
    #[serde(rename = "5m")]
    FiveMinutes,
    /// Fifteen minute average
    #[serde(rename = "15m")]
    FifteenMinutes,
}

/// Where a metric's readings come from
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SourceSpec {
    /// Load average as a percentage of logical CPUs
    LoadAverage {
        #[serde(default)]
        window: LoadWindow,
    },
    /// Used memory percentage
    MemoryUsage,
    /// Used space percentage of a mount point
    DiskUsage { path: PathBuf },
    /// Used space of a mount point in GB
    DiskUsedGb { path: PathBuf },
    /// Used memory in GB
    MemoryUsedGb,
    /// GPU utilization percentage
    GpuUtilization { index: u32 },
    /// GPU memory percentage
    GpuMemory { index: u32 },
    /// GPU temperature in degrees Celsius
    GpuTemperature { index: u32 },
}

/// One monitored metric
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricConfig {
    /// Unique id
    pub id: String,

    /// Display name (defaults to a name derived from the source)
    #[serde(default)]
    pub name: Option<String>,

    /// Warn level
    pub warn: f64,

    /// Crit level
    pub crit: f64,

    /// Saturation level
    pub max: f64,

    /// Reading source
    pub source: SourceSpec,
}

impl MetricConfig {
    /// Threshold triple for the evaluator
    pub fn thresholds(&self) -> ThresholdConfig {
        ThresholdConfig::new(self.warn, self.crit, self.max)
    }
}

impl Config {
    /// Load configuration from the first file on the search path plus environment overrides.
    ///
    /// An explicitly given `path` must exist.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let (config, source) = Self::load_with_source(path)?;
        log_source(source.as_deref());
        Ok(config)
    }

    /// Like [`Config::load`], but returns the file that was used instead of
    /// logging it, for callers that set up logging from the result
    pub fn load_with_source(path: Option<&Path>) -> Result<(Self, Option<PathBuf>)> {
        let file = match path {
            Some(p) if !p.is_file() => {
                return Err(Error::config(format!(
                    "configuration file not found: {}",
                    p.display()
                )));
            }
            Some(p) => Some(p.to_path_buf()),
            None => find_config_file(),
        };

        let mut builder = config::Config::builder();
        if let Some(f) = &file {
            builder = builder.add_source(File::from(f.as_path()).format(file_format(f)));
        }

        let config: Config = builder
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__"),
            )
            .build()?
            .try_deserialize()?;

        config.validate()?;
        Ok((config, file))
    }

    /// Parse a TOML document (no environment overrides)
    pub fn from_toml_str(toml: &str) -> Result<Self> {
        let config: Config = config::Config::builder()
            .add_source(File::from_str(toml, FileFormat::Toml))
            .build()?
            .try_deserialize()?;

        config.validate()?;
        Ok(config)
    }

    /// Validate cross-field invariants
    pub fn validate(&self) -> Result<()> {
        if self.observer.interval.is_zero() {
            return Err(Error::config("observer.interval must be greater than zero"));
        }
        if self.observer.repeat_limit == 0 {
            return Err(Error::config("observer.repeat_limit must be at least 1"));
        }
        if self.observer.sample_timeout.is_zero() {
            return Err(Error::config(
                "observer.sample_timeout must be greater than zero",
            ));
        }

        if self.notification.kind != SinkKind::Log {
            let url = self.notification.url.as_deref().ok_or_else(|| {
                Error::config(format!(
                    "notification.url is required for {:?} notifications",
                    self.notification.kind
                ))
            })?;
            reqwest::Url::parse(url)
                .map_err(|e| Error::config(format!("invalid notification.url: {e}")))?;
        }

        let mut seen = HashSet::new();
        for metric in &self.metrics {
            if metric.id.trim().is_empty() {
                return Err(Error::config("metric id must not be empty"));
            }
            if !seen.insert(metric.id.as_str()) {
                return Err(Error::config(format!("duplicate metric id: {}", metric.id)));
            }
            metric
                .thresholds()
                .validate()
                .map_err(|e| Error::config(format!("metric {}: {e}", metric.id)))?;
        }

        Ok(())
    }
}

/// Log which configuration file is in effect
pub fn log_source(source: Option<&Path>) {
    match source {
        Some(path) => info!(path = %path.display(), "Loaded configuration file"),
        None => info!("No configuration file found, using defaults"),
    }
}

/// Candidate configuration files, in lookup order
pub fn search_paths() -> Vec<PathBuf> {
    let mut paths = Vec::new();

    if let Ok(p) = std::env::var(CONFIG_ENV_VAR) {
        paths.push(PathBuf::from(p));
    }

    paths.push(PathBuf::from("sysobserver.toml"));
    paths.push(PathBuf::from(".sysobserver.toml"));

    if let Some(dirs) = directories::ProjectDirs::from("", "", "sysobserver") {
        paths.push(dirs.config_dir().join("config.toml"));
    }

    paths.push(PathBuf::from("/etc/sysobserver.toml"));
    paths
}

fn find_config_file() -> Option<PathBuf> {
    let found = search_paths().into_iter().find(|p| p.is_file());
    if found.is_none() {
        debug!("No configuration file in search path");
    }
    found
}

fn file_format(path: &Path) -> FileFormat {
    match path.extension().and_then(|e| e.to_str()) {
        Some("json") => FileFormat::Json,
        Some("yaml" | "yml") => FileFormat::Yaml,
        Some("ini" | "conf") => FileFormat::Ini,
        _ => FileFormat::Toml,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const SAMPLE: &str = r#"
[observer]
interval = "1m"
repeat_limit = 4
notify_cooldown = "30m"

[notification]
kind = "discord"
url = "https://discord.com/api/webhooks/1/abc"

[[metrics]]
id = "mem"
warn = 85.0
crit = 95.0
max = 100.0
source = { kind = "memory_usage" }

[[metrics]]
id = "root"
name = "Disk-Usage-/"
warn = 90
crit = 95
max = 100
source = { kind = "disk_usage", path = "/" }

[[metrics]]
id = "root_gb"
warn = 440
crit = 470
max = 500
source = { kind = "disk_used_gb", path = "/" }
"#;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.observer.interval, Duration::from_secs(300));
        assert_eq!(config.observer.repeat_limit, 3);
        assert_eq!(config.notification.kind, SinkKind::Log);
        assert!(config.metrics.is_empty());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_toml() {
        let config = Config::from_toml_str(SAMPLE).unwrap();

        assert_eq!(config.observer.interval, Duration::from_secs(60));
        assert_eq!(config.observer.repeat_limit, 4);
        assert_eq!(config.observer.notify_cooldown, Some(Duration::from_secs(1800)));
        assert_eq!(config.notification.kind, SinkKind::Discord);

        let ids: Vec<_> = config.metrics.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, vec!["mem", "root", "root_gb"]);
        assert_eq!(config.metrics[0].source, SourceSpec::MemoryUsage);
        assert_eq!(
            config.metrics[1].source,
            SourceSpec::DiskUsage {
                path: PathBuf::from("/")
            }
        );
        assert_eq!(config.metrics[1].thresholds(), ThresholdConfig::new(90.0, 95.0, 100.0));
        assert_eq!(
            config.metrics[2].source,
            SourceSpec::DiskUsedGb {
                path: PathBuf::from("/")
            }
        );
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        file.write_all(SAMPLE.as_bytes()).unwrap();

        let config = Config::load(Some(file.path())).unwrap();
        assert_eq!(config.metrics.len(), 3);

        let (_, source) = Config::load_with_source(Some(file.path())).unwrap();
        assert_eq!(source.as_deref(), Some(file.path()));
    }

    #[test]
    fn test_missing_explicit_file() {
        let err = Config::load(Some(Path::new("/definitely/not/here.toml"))).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_invalid_threshold_order() {
        let toml = r#"
[[metrics]]
id = "mem"
warn = 95.0
crit = 85.0
max = 100.0
source = { kind = "memory_usage" }
"#;
        let err = Config::from_toml_str(toml).unwrap_err();
        assert!(err.is_fatal());
        assert!(err.to_string().contains("mem"));
    }

    #[test]
    fn test_duplicate_metric_ids() {
        let toml = r#"
[[metrics]]
id = "mem"
warn = 80.0
crit = 90.0
max = 100.0
source = { kind = "memory_usage" }

[[metrics]]
id = "mem"
warn = 80.0
crit = 90.0
max = 100.0
source = { kind = "load_average", window = "15m" }
"#;
        let err = Config::from_toml_str(toml).unwrap_err();
        assert!(err.to_string().contains("duplicate"));
    }

    #[test]
    fn test_webhook_requires_url() {
        let toml = r#"
[notification]
kind = "slack"
"#;
        assert!(Config::from_toml_str(toml).is_err());
    }

    #[test]
    fn test_zero_repeat_limit_rejected() {
        let toml = r#"
[observer]
repeat_limit = 0
"#;
        assert!(Config::from_toml_str(toml).is_err());
    }
}
