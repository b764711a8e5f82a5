//! Ping probe backed by the system `ping` binary.

use std::time::Duration;

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::ProbeError;
use crate::types::{PingOutput, PingProbe};

static PACKETS_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(\d+) packets transmitted, (\d+) (?:packets )?received,(?: \+\d+ \w+,)* ([\d.]+)% packet loss")
        .unwrap()
});

static RTT_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?:rtt|round-trip) min/avg/max/(?:mdev|stddev) = [\d.]+/([\d.]+)/").unwrap()
});

/// Statistics summary printed by `ping`.
#[derive(Debug, Clone, PartialEq)]
pub struct PingStats {
    pub transmitted: u32,
    pub received: u32,
    pub loss_percent: f64,
    /// Absent when no reply was received.
    pub average_rtt_ms: Option<f64>,
}

/// Parse the summary lines of Linux and BSD `ping` output.
pub fn parse_ping_output(output: &str) -> Option<PingStats> {
    let packets = PACKETS_RE.captures(output)?;
    let transmitted = packets[1].parse().ok()?;
    let received = packets[2].parse().ok()?;
    let loss_percent = packets[3].parse().ok()?;
    let average_rtt_ms = RTT_RE
        .captures(output)
        .and_then(|c| c[1].parse().ok());
    Some(PingStats {
        transmitted,
        received,
        loss_percent,
        average_rtt_ms,
    })
}

pub struct SystemPing {
    timeout: Duration,
}

impl SystemPing {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

#[async_trait]
impl PingProbe for SystemPing {
    async fn ping(
        &self,
        address: &str,
        count: u32,
        packet_size: u32,
    ) -> Result<PingOutput, ProbeError> {
        let mut cmd = tokio::process::Command::new("ping");
        cmd.arg("-c")
            .arg(count.max(1).to_string())
            .arg("-s")
            .arg(packet_size.to_string())
            .arg(address)
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .kill_on_drop(true);

        let output = match tokio::time::timeout(self.timeout, cmd.output()).await {
            Ok(result) => result?,
            Err(_) => return Err(ProbeError::Timeout(self.timeout)),
        };

        let mut text = String::from_utf8_lossy(&output.stdout).to_string();
        let stderr = String::from_utf8_lossy(&output.stderr);
        if !stderr.trim().is_empty() {
            text.push_str(&stderr);
        }
        Ok(PingOutput {
            return_code: output.status.code().unwrap_or(-1),
            output: text,
        })
    }
}
