use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use keepup_types::SuspensionInterval;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON5 parse error: {0}")]
    Json5(#[from] json5::Error),
    #[error("Config directory not found")]
    NoDirFound,
}

/// Probe worker pool settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Upper bound on probes executing at the same time.
    #[serde(default = "default_max_concurrent_probes")]
    pub max_concurrent_probes: usize,
}

fn default_max_concurrent_probes() -> usize {
    8
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            max_concurrent_probes: default_max_concurrent_probes(),
        }
    }
}

/// Ping probe settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PingConfig {
    #[serde(default = "default_ping_count")]
    pub count: u32,
    /// ICMP payload size in bytes.
    #[serde(default = "default_packet_size")]
    pub packet_size: u32,
    #[serde(default = "default_ping_timeout")]
    pub timeout_secs: u64,
}

fn default_ping_count() -> u32 {
    3
}

fn default_packet_size() -> u32 {
    56
}

fn default_ping_timeout() -> u64 {
    10
}

impl Default for PingConfig {
    fn default() -> Self {
        Self {
            count: default_ping_count(),
            packet_size: default_packet_size(),
            timeout_secs: default_ping_timeout(),
        }
    }
}

/// TCP connect probe settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectConfig {
    #[serde(default = "default_connect_count")]
    pub count: u32,
    #[serde(default = "default_connect_timeout")]
    pub timeout_secs: u64,
}

fn default_connect_count() -> u32 {
    1
}

fn default_connect_timeout() -> u64 {
    5
}

impl Default for ConnectConfig {
    fn default() -> Self {
        Self {
            count: default_connect_count(),
            timeout_secs: default_connect_timeout(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DnsConfig {
    #[serde(default = "default_dns_timeout")]
    pub timeout_secs: u64,
}

fn default_dns_timeout() -> u64 {
    5
}

impl Default for DnsConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_dns_timeout(),
        }
    }
}

/// Download probe settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DownloadConfig {
    /// Destination folder. Falls back to the platform download dir.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub folder: Option<PathBuf>,
    /// Keep downloaded files instead of deleting them after the probe.
    #[serde(default)]
    pub keep_files: bool,
    #[serde(default = "default_read_timeout")]
    pub read_timeout_secs: u64,
    /// How often a running download re-checks that its task is still current.
    #[serde(default = "default_validity_check")]
    pub validity_check_secs: u64,
}

fn default_read_timeout() -> u64 {
    15
}

fn default_validity_check() -> u64 {
    5
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            folder: None,
            keep_files: false,
            read_timeout_secs: default_read_timeout(),
            validity_check_secs: default_validity_check(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// Log entries retained per task.
    #[serde(default = "default_log_limit")]
    pub limit: usize,
}

fn default_log_limit() -> usize {
    100
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            limit: default_log_limit(),
        }
    }
}

/// Quiet hours.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SuspensionConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub intervals: Vec<SuspensionInterval>,
}

impl SuspensionConfig {
    /// Intervals in effect, empty when suspension is disabled.
    pub fn active_intervals(&self) -> Vec<SuspensionInterval> {
        if self.enabled {
            self.intervals.clone()
        } else {
            Vec::new()
        }
    }
}

/// Top-level keepup configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct KeepUpConfig {
    /// SQLite database path. Defaults to `~/.keepup/keepup.db`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database: Option<PathBuf>,
    #[serde(default)]
    pub worker: WorkerConfig,
    #[serde(default)]
    pub ping: PingConfig,
    #[serde(default)]
    pub connect: ConnectConfig,
    #[serde(default)]
    pub dns: DnsConfig,
    #[serde(default)]
    pub download: DownloadConfig,
    #[serde(default)]
    pub log: LogConfig,
    #[serde(default)]
    pub suspension: SuspensionConfig,
}

impl KeepUpConfig {
    pub fn ping_timeout(&self) -> Duration {
        Duration::from_secs(self.ping.timeout_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect.timeout_secs)
    }

    pub fn dns_timeout(&self) -> Duration {
        Duration::from_secs(self.dns.timeout_secs)
    }

    /// Resolve the database path, falling back to the config directory.
    pub fn database_path(&self) -> Result<PathBuf, ConfigError> {
        match &self.database {
            Some(path) => Ok(path.clone()),
            None => Ok(config_dir()?.join("keepup.db")),
        }
    }

    /// Resolve the download destination folder.
    pub fn download_folder(&self) -> Result<PathBuf, ConfigError> {
        if let Some(folder) = &self.download.folder {
            return Ok(folder.clone());
        }
        match dirs::download_dir() {
            Some(dir) => Ok(dir),
            None => Ok(config_dir()?.join("downloads")),
        }
    }
}

/// Resolve the keepup config directory (~/.keepup/).
pub fn config_dir() -> Result<PathBuf, ConfigError> {
    dirs::home_dir()
        .map(|h| h.join(".keepup"))
        .ok_or(ConfigError::NoDirFound)
}

/// Resolve the config file path (~/.keepup/config.json5).
pub fn config_file_path() -> Result<PathBuf, ConfigError> {
    Ok(config_dir()?.join("config.json5"))
}

/// Load configuration from the default path, falling back to defaults.
pub fn load_config() -> Result<KeepUpConfig, ConfigError> {
    let _ = dotenvy::dotenv();

    let path = config_file_path()?;
    load_config_from(&path)
}

/// Load configuration from a specific path, falling back to defaults if not found.
pub fn load_config_from(path: &Path) -> Result<KeepUpConfig, ConfigError> {
    if !path.exists() {
        tracing::debug!("Config file not found at {}, using defaults", path.display());
        return Ok(KeepUpConfig::default());
    }

    let content = std::fs::read_to_string(path)?;
    let config: KeepUpConfig = json5::from_str(&content)?;
    Ok(config)
}

/// Ensure the config directory exists.
pub fn ensure_config_dir() -> Result<PathBuf, ConfigError> {
    let dir = config_dir()?;
    if !dir.exists() {
        std::fs::create_dir_all(&dir)?;
    }
    Ok(dir)
}

/// Save configuration to a specific path.
pub fn save_config_to(config: &KeepUpConfig, path: &Path) -> Result<(), ConfigError> {
    let content = serde_json::to_string_pretty(config)
        .map_err(|e| ConfigError::Io(std::io::Error::other(e)))?;
    std::fs::write(path, content)?;
    Ok(())
}

/// Save configuration to the default path.
pub fn save_config(config: &KeepUpConfig) -> Result<(), ConfigError> {
    let dir = ensure_config_dir()?;
    save_config_to(config, &dir.join("config.json5"))
}
