//! Collaborator traits consumed by the worker.

use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use keepup_config::KeepUpConfig;

use crate::error::ProbeError;

/// Probe tuning taken from the configuration.
#[derive(Debug, Clone)]
pub struct ProbeSettings {
    pub ping_count: u32,
    pub ping_packet_size: u32,
    pub connect_count: u32,
    /// Download folder from the configuration, `None` when it cannot be resolved.
    pub download_folder: Option<PathBuf>,
    pub keep_downloaded_files: bool,
    pub validity_check_interval: Duration,
}

impl Default for ProbeSettings {
    fn default() -> Self {
        Self::from(&KeepUpConfig::default())
    }
}

impl From<&KeepUpConfig> for ProbeSettings {
    fn from(config: &KeepUpConfig) -> Self {
        Self {
            ping_count: config.ping.count,
            ping_packet_size: config.ping.packet_size,
            connect_count: config.connect.count,
            download_folder: config.download_folder().ok(),
            keep_downloaded_files: config.download.keep_files,
            validity_check_interval: Duration::from_secs(config.download.validity_check_secs.max(1)),
        }
    }
}

#[async_trait]
pub trait DnsResolver: Send + Sync {
    /// Resolve a host to at least one address.
    async fn resolve(&self, host: &str) -> Result<Vec<IpAddr>, ProbeError>;
}

/// Completed run of the ping binary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PingOutput {
    pub return_code: i32,
    pub output: String,
}

#[async_trait]
pub trait PingProbe: Send + Sync {
    /// Run a ping. `Err` means the probe itself could not be carried out.
    async fn ping(&self, address: &str, count: u32, packet_size: u32)
    -> Result<PingOutput, ProbeError>;
}

#[derive(Debug)]
pub struct ConnectOutcome {
    pub success: bool,
    pub error: Option<ProbeError>,
}

#[async_trait]
pub trait ConnectProbe: Send + Sync {
    async fn connect(&self, address: IpAddr, port: u16, count: u32) -> ConnectOutcome;
}

/// Input of one download probe.
#[derive(Debug, Clone)]
pub struct DownloadRequest {
    pub url: String,
    pub destination: PathBuf,
    /// Tripped when the task is stopped.
    pub stop: CancellationToken,
    /// Tripped when the task is deleted or superseded.
    pub invalidated: CancellationToken,
}

/// Raw signals reported by a download probe.
#[derive(Debug, Default)]
pub struct DownloadResult {
    pub connected: bool,
    pub succeeded: bool,
    /// `None` for schemes where an HTTP code does not apply.
    pub http_code: Option<u16>,
    pub http_message: Option<String>,
    /// File created on storage, complete or partial.
    pub file: Option<PathBuf>,
    pub elapsed: Option<Duration>,
    pub error: Option<ProbeError>,
}

#[async_trait]
pub trait DownloadProbe: Send + Sync {
    async fn download(&self, request: DownloadRequest) -> DownloadResult;
}

pub trait Connectivity: Send + Sync {
    fn is_connected(&self) -> bool;
    fn is_wifi(&self) -> bool;
}

pub trait FileOps: Send + Sync {
    fn exists(&self, path: &Path) -> bool;
    /// Returns whether the file is gone afterwards.
    fn delete(&self, path: &Path) -> bool;
    fn resolve_download_destination(&self, settings: &ProbeSettings) -> PathBuf;
}
