use std::fmt;
use std::str::FromStr;

use chrono::NaiveTime;
use serde::{Deserialize, Serialize};

// ──────────────────── Task Types ────────────────────

/// How a task probes its endpoint.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "snake_case")]
pub enum AccessType {
    /// No probe configured. Always reported as a configuration error.
    #[default]
    None,
    /// ICMP echo via the system `ping` binary.
    Ping,
    /// TCP connect to `address:port`.
    Connect,
    /// HTTP(S) download of the URL in `address`.
    Download,
}

impl AccessType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AccessType::None => "none",
            AccessType::Ping => "ping",
            AccessType::Connect => "connect",
            AccessType::Download => "download",
        }
    }
}

impl fmt::Display for AccessType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

impl FromStr for AccessType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "none" => Ok(AccessType::None),
            "ping" => Ok(AccessType::Ping),
            "connect" => Ok(AccessType::Connect),
            "download" => Ok(AccessType::Download),
            other => Err(format!("unknown access type: {other}")),
        }
    }
}

/// A periodically probed endpoint.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NetworkTask {
    /// Stable task identity (assigned by the store on insert).
    pub id: i64,
    /// Generation id of the current arming. Changes on every reschedule.
    pub scheduler_id: i32,
    /// Position in the task list.
    pub index: i32,
    /// Host name, IP address, or URL for download tasks.
    pub address: String,
    /// Port used by connect probes.
    pub port: u16,
    pub access_type: AccessType,
    /// Probe interval in minutes. Always positive.
    pub interval_minutes: u32,
    #[serde(default)]
    pub wifi_only: bool,
    #[serde(default)]
    pub notify_on_failure: bool,
    #[serde(default)]
    pub high_priority: bool,
    /// Persisted intent to be scheduled.
    #[serde(default)]
    pub running: bool,
    /// Probes currently executing.
    #[serde(default)]
    pub instances: i32,
    /// Consecutive failed probes.
    #[serde(default)]
    pub failure_count: i32,
    /// Unix millis of the last armed trigger, 0 if never.
    #[serde(default)]
    pub last_scheduled: i64,
}

impl NetworkTask {
    /// Create an unsaved, stopped task.
    pub fn new(address: impl Into<String>, port: u16, access_type: AccessType) -> Self {
        Self {
            id: 0,
            scheduler_id: 0,
            index: 0,
            address: address.into(),
            port,
            access_type,
            interval_minutes: 15,
            wifi_only: false,
            notify_on_failure: false,
            high_priority: false,
            running: false,
            instances: 0,
            failure_count: 0,
            last_scheduled: 0,
        }
    }

    pub fn with_interval(mut self, minutes: u32) -> Self {
        self.interval_minutes = minutes.max(1);
        self
    }
}

// ──────────────────── Log Types ────────────────────

/// The outcome of one probe execution.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LogEntry {
    /// Row id, 0 until persisted.
    #[serde(default)]
    pub id: i64,
    pub task_id: i64,
    /// Unix millis when the probe finished.
    pub timestamp: i64,
    pub success: bool,
    pub message: String,
}

impl LogEntry {
    pub fn new(task_id: i64, timestamp: i64, success: bool, message: impl Into<String>) -> Self {
        Self {
            id: 0,
            task_id,
            timestamp,
            success,
            message: message.into(),
        }
    }
}

// ──────────────────── Suspension Types ────────────────────

/// A daily wall-clock window during which scheduling is paused.
///
/// `start > end` denotes a window that wraps past midnight.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct SuspensionInterval {
    #[serde(with = "wall_clock")]
    pub start: NaiveTime,
    #[serde(with = "wall_clock")]
    pub end: NaiveTime,
}

impl SuspensionInterval {
    pub fn new(start: NaiveTime, end: NaiveTime) -> Self {
        Self { start, end }
    }

    /// Half-open containment: `start <= now < end`, wrapping at midnight.
    pub fn contains(&self, now: NaiveTime) -> bool {
        if self.start <= self.end {
            self.start <= now && now < self.end
        } else {
            now >= self.start || now < self.end
        }
    }
}

/// `HH:MM` wall-clock times; `HH:MM:SS` is accepted on input.
mod wall_clock {
    use chrono::NaiveTime;
    use serde::{Deserialize, Deserializer, Serializer, de::Error};

    pub fn serialize<S: Serializer>(time: &NaiveTime, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(&time.format("%H:%M"))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<NaiveTime, D::Error> {
        let raw = String::deserialize(deserializer)?;
        NaiveTime::parse_from_str(&raw, "%H:%M")
            .or_else(|_| NaiveTime::parse_from_str(&raw, "%H:%M:%S"))
            .map_err(|e| D::Error::custom(format!("invalid time {raw:?}: {e}")))
    }
}

impl fmt::Display for SuspensionInterval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}-{}",
            self.start.format("%H:%M"),
            self.end.format("%H:%M")
        )
    }
}
