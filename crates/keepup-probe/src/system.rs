//! Host-backed connectivity and file collaborators.

use std::net::UdpSocket;
use std::path::{Path, PathBuf};

use crate::types::{Connectivity, FileOps, ProbeSettings};

/// Probe address used to detect a default route. Nothing is sent.
const ROUTE_PROBE_ADDR: &str = "8.8.8.8:53";

/// Connectivity derived from the host's routing table.
///
/// Wi-Fi is detected from `/sys/class/net/<iface>/wireless` for the
/// interface carrying the default route; hosts without that information
/// report no Wi-Fi.
#[derive(Debug, Default)]
pub struct SystemConnectivity;

impl SystemConnectivity {
    fn default_route_interface() -> Option<String> {
        let table = std::fs::read_to_string("/proc/net/route").ok()?;
        table.lines().skip(1).find_map(|line| {
            let mut fields = line.split_whitespace();
            let iface = fields.next()?;
            let destination = fields.next()?;
            (destination == "00000000").then(|| iface.to_string())
        })
    }
}

impl Connectivity for SystemConnectivity {
    fn is_connected(&self) -> bool {
        UdpSocket::bind("0.0.0.0:0")
            .and_then(|socket| socket.connect(ROUTE_PROBE_ADDR))
            .is_ok()
    }

    fn is_wifi(&self) -> bool {
        match Self::default_route_interface() {
            Some(iface) => Path::new("/sys/class/net")
                .join(iface)
                .join("wireless")
                .exists(),
            None => false,
        }
    }
}

/// Local filesystem access.
#[derive(Debug, Default)]
pub struct LocalFiles;

impl FileOps for LocalFiles {
    fn exists(&self, path: &Path) -> bool {
        path.exists()
    }

    fn delete(&self, path: &Path) -> bool {
        match std::fs::remove_file(path) {
            Ok(()) => true,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => true,
            Err(e) => {
                tracing::warn!("Failed to delete {}: {e}", path.display());
                false
            }
        }
    }

    fn resolve_download_destination(&self, settings: &ProbeSettings) -> PathBuf {
        settings
            .download_folder
            .clone()
            .unwrap_or_else(|| std::env::temp_dir().join("keepup"))
    }
}
