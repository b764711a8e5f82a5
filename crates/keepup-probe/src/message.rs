//! Composition of human-readable probe outcomes.
//!
//! Every probe ends in exactly one [`Outcome`]: a success flag plus a
//! message assembled from independent clauses.

use std::path::PathBuf;
use std::time::Duration;

use crate::error::ProbeError;
use crate::ping::parse_ping_output;
use crate::types::{ConnectOutcome, PingOutput};

pub const NO_NETWORK: &str = "No active network connection.";
pub const NO_WIFI: &str = "Skipped. No active wifi connection.";
pub const TYPE_NOT_SPECIFIED: &str = "Type not specified.";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outcome {
    pub success: bool,
    pub message: String,
}

impl Outcome {
    pub fn success(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
        }
    }
}

pub fn dns_failure(host: &str, error: &ProbeError) -> Outcome {
    Outcome::failure(format!("DNS lookup for {host} failed. {}", error.clause()))
}

/// `999 msec` below one second, `3,600 sec` at or above.
pub fn format_duration(elapsed: Duration) -> String {
    let millis = elapsed.as_millis();
    if millis < 1000 {
        format!("{millis} msec")
    } else {
        format!("{} sec", thousands(millis / 1000))
    }
}

fn thousands(value: u128) -> String {
    let digits = value.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(c);
    }
    out
}

// ─── Ping ───────────────────────────────────────────────

pub fn ping_outcome(host: &str, result: &Result<PingOutput, ProbeError>) -> Outcome {
    let output = match result {
        Ok(output) => output,
        Err(e) => return Outcome::failure(format!("Ping to {host} failed. {}", e.clause())),
    };
    let success = output.return_code == 0;
    let mut message = if success {
        format!("Ping to {host} was successful.")
    } else {
        format!("Ping to {host} failed.")
    };
    match parse_ping_output(&output.output) {
        Some(stats) => {
            message.push_str(&format!(
                " {} packets transmitted, {} received, {}% packet loss.",
                stats.transmitted, stats.received, stats.loss_percent
            ));
            if let Some(avg) = stats.average_rtt_ms {
                message.push_str(&format!(" Average round-trip time: {avg:.3} msec."));
            }
        }
        None => {
            let raw = output.output.trim();
            if !raw.is_empty() {
                message.push(' ');
                message.push_str(raw);
            }
        }
    }
    Outcome {
        success,
        message,
    }
}

// ─── Connect ────────────────────────────────────────────

pub fn connect_outcome(host: &str, port: u16, outcome: &ConnectOutcome) -> Outcome {
    if outcome.success {
        return Outcome::success(format!("Connected to {host}:{port} successfully."));
    }
    let mut message = format!("Connection to {host}:{port} failed.");
    if let Some(e) = &outcome.error {
        message.push(' ');
        message.push_str(&e.clause());
    }
    Outcome::failure(message)
}

// ─── Download ───────────────────────────────────────────

/// Outcome phase of a download, in priority order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DownloadPhase {
    Stopped,
    Invalidated,
    ConnectionFailed,
    HttpError,
    UnknownError,
    Success,
}

/// What happened to a file that materialized during the download.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileClause {
    Kept(PathBuf),
    Deleted,
    DeletionFailed,
}

/// Signals gathered by the download worker.
#[derive(Debug, Default)]
pub struct DownloadReport<'a> {
    pub url: &'a str,
    pub connected: bool,
    pub succeeded: bool,
    pub http_code: Option<u16>,
    pub http_message: Option<&'a str>,
    pub stopped: bool,
    pub invalidated: bool,
    pub file: Option<FileClause>,
    pub elapsed: Option<Duration>,
    pub error: Option<&'a ProbeError>,
}

impl DownloadReport<'_> {
    pub fn phase(&self) -> DownloadPhase {
        if self.stopped {
            DownloadPhase::Stopped
        } else if self.invalidated {
            DownloadPhase::Invalidated
        } else if !self.connected {
            DownloadPhase::ConnectionFailed
        } else if self.http_code.is_some_and(|code| !(200..300).contains(&code)) {
            DownloadPhase::HttpError
        } else if !self.succeeded {
            DownloadPhase::UnknownError
        } else {
            DownloadPhase::Success
        }
    }
}

pub fn download_outcome(report: &DownloadReport<'_>) -> Outcome {
    let url = report.url;
    let phase = report.phase();
    let mut clauses = vec![match phase {
        DownloadPhase::Stopped => format!("Download from {url} was stopped."),
        DownloadPhase::Invalidated => {
            format!("Download from {url} was interrupted. The task is no longer valid.")
        }
        DownloadPhase::ConnectionFailed => {
            format!("Download from {url} failed. Connection could not be established.")
        }
        DownloadPhase::HttpError => {
            let code = report.http_code.unwrap_or_default();
            match report.http_message {
                Some(msg) if !msg.is_empty() => format!(
                    "Download from {url} failed. HTTP return code: {code}, message: {msg}."
                ),
                _ => format!("Download from {url} failed. HTTP return code: {code}."),
            }
        }
        DownloadPhase::UnknownError => format!("Download from {url} failed. Unknown error."),
        DownloadPhase::Success => format!("Download from {url} was successful."),
    }];

    match &report.file {
        Some(FileClause::Kept(path)) => {
            clauses.push(format!("The file was kept as {}.", path.display()))
        }
        Some(FileClause::Deleted) => clauses.push("The file was deleted after download.".into()),
        Some(FileClause::DeletionFailed) => {
            clauses.push("Deleting the file after download failed.".into())
        }
        None => {}
    }

    if report.connected {
        if let Some(elapsed) = report.elapsed {
            clauses.push(format!("{} download time.", format_duration(elapsed)));
        }
    }

    if let Some(e) = report.error {
        clauses.push(format!("Exception: {}", e.clause()));
    }

    Outcome {
        success: phase == DownloadPhase::Success,
        message: clauses.join(" "),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const URL: &str = "http://example.com/file.bin";

    fn successful(elapsed_ms: u64) -> DownloadReport<'static> {
        DownloadReport {
            url: URL,
            connected: true,
            succeeded: true,
            http_code: Some(200),
            http_message: Some("OK"),
            file: Some(FileClause::Deleted),
            elapsed: Some(Duration::from_millis(elapsed_ms)),
            ..Default::default()
        }
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(Duration::from_millis(0)), "0 msec");
        assert_eq!(format_duration(Duration::from_millis(999)), "999 msec");
        assert_eq!(format_duration(Duration::from_millis(1000)), "1 sec");
        assert_eq!(format_duration(Duration::from_millis(1999)), "1 sec");
        assert_eq!(format_duration(Duration::from_millis(3_600_000)), "3,600 sec");
        assert_eq!(format_duration(Duration::from_secs(1_234_567)), "1,234,567 sec");
    }

    #[test]
    fn test_download_success_with_deleted_file() {
        let outcome = download_outcome(&successful(999));
        assert!(outcome.success);
        assert!(outcome.message.ends_with(
            "was successful. The file was deleted after download. 999 msec download time."
        ));

        let outcome = download_outcome(&successful(1000));
        assert!(outcome.message.ends_with(
            "was successful. The file was deleted after download. 1 sec download time."
        ));
    }

    #[test]
    fn test_download_kept_file() {
        let mut report = successful(10);
        report.file = Some(FileClause::Kept(PathBuf::from("/tmp/file.bin")));
        let outcome = download_outcome(&report);
        assert_eq!(
            outcome.message,
            "Download from http://example.com/file.bin was successful. The file was kept as /tmp/file.bin. 10 msec download time."
        );
    }

    #[test]
    fn test_download_phase_priority() {
        let mut report = successful(5);
        report.http_code = Some(500);
        report.succeeded = false;
        assert_eq!(report.phase(), DownloadPhase::HttpError);

        report.connected = false;
        assert_eq!(report.phase(), DownloadPhase::ConnectionFailed);

        report.invalidated = true;
        assert_eq!(report.phase(), DownloadPhase::Invalidated);

        report.stopped = true;
        assert_eq!(report.phase(), DownloadPhase::Stopped);
    }

    #[test]
    fn test_download_unknown_error_without_http_code() {
        let report = DownloadReport {
            url: URL,
            connected: true,
            succeeded: false,
            ..Default::default()
        };
        assert_eq!(report.phase(), DownloadPhase::UnknownError);
        let outcome = download_outcome(&report);
        assert!(!outcome.success);
        assert_eq!(
            outcome.message,
            "Download from http://example.com/file.bin failed. Unknown error."
        );
    }

    #[test]
    fn test_download_http_error_message() {
        let report = DownloadReport {
            url: URL,
            connected: true,
            http_code: Some(404),
            http_message: Some("Not Found"),
            elapsed: Some(Duration::from_millis(42)),
            ..Default::default()
        };
        let outcome = download_outcome(&report);
        assert!(!outcome.success);
        assert_eq!(
            outcome.message,
            "Download from http://example.com/file.bin failed. HTTP return code: 404, message: Not Found. 42 msec download time."
        );
    }

    #[test]
    fn test_download_exception_clause_is_last() {
        let error = ProbeError::Io(std::io::Error::new(
            std::io::ErrorKind::ConnectionRefused,
            "Connection refused",
        ));
        let report = DownloadReport {
            url: URL,
            error: Some(&error),
            ..Default::default()
        };
        let outcome = download_outcome(&report);
        assert_eq!(
            outcome.message,
            "Download from http://example.com/file.bin failed. Connection could not be established. Exception: ConnectionRefused: Connection refused"
        );
    }

    #[test]
    fn test_download_stopped_with_failed_deletion() {
        let report = DownloadReport {
            url: URL,
            connected: true,
            stopped: true,
            file: Some(FileClause::DeletionFailed),
            elapsed: Some(Duration::from_millis(2500)),
            ..Default::default()
        };
        let outcome = download_outcome(&report);
        assert!(!outcome.success);
        assert_eq!(
            outcome.message,
            "Download from http://example.com/file.bin was stopped. Deleting the file after download failed. 2 sec download time."
        );
    }

    #[test]
    fn test_ping_success_with_stats() {
        let output = PingOutput {
            return_code: 0,
            output: "3 packets transmitted, 3 received, 0% packet loss, time 2003ms\nrtt min/avg/max/mdev = 1.000/2.500/4.000/0.100 ms\n".into(),
        };
        let outcome = ping_outcome("example.com", &Ok(output));
        assert!(outcome.success);
        assert_eq!(
            outcome.message,
            "Ping to example.com was successful. 3 packets transmitted, 3 received, 0% packet loss. Average round-trip time: 2.500 msec."
        );
    }

    #[test]
    fn test_ping_failure_falls_back_to_raw_output() {
        let output = PingOutput {
            return_code: 2,
            output: "ping: unknown host nowhere\n".into(),
        };
        let outcome = ping_outcome("nowhere", &Ok(output));
        assert!(!outcome.success);
        assert_eq!(
            outcome.message,
            "Ping to nowhere failed. ping: unknown host nowhere"
        );
    }

    #[test]
    fn test_ping_nonzero_with_stats() {
        let output = PingOutput {
            return_code: 1,
            output: "3 packets transmitted, 0 received, 100% packet loss, time 2040ms\n".into(),
        };
        let outcome = ping_outcome("10.0.0.9", &Ok(output));
        assert!(!outcome.success);
        assert_eq!(
            outcome.message,
            "Ping to 10.0.0.9 failed. 3 packets transmitted, 0 received, 100% packet loss."
        );
    }

    #[test]
    fn test_ping_probe_error() {
        let error = ProbeError::Timeout(Duration::from_secs(10));
        let outcome = ping_outcome("example.com", &Err(error));
        assert_eq!(
            outcome.message,
            "Ping to example.com failed. Timeout: timed out after 10000 msec"
        );
    }

    #[test]
    fn test_connect_messages() {
        let ok = ConnectOutcome {
            success: true,
            error: None,
        };
        assert_eq!(
            connect_outcome("example.com", 443, &ok).message,
            "Connected to example.com:443 successfully."
        );

        let bare = ConnectOutcome {
            success: false,
            error: None,
        };
        assert_eq!(
            connect_outcome("example.com", 443, &bare).message,
            "Connection to example.com:443 failed."
        );

        let refused = ConnectOutcome {
            success: false,
            error: Some(ProbeError::Io(std::io::Error::new(
                std::io::ErrorKind::ConnectionRefused,
                "Connection refused",
            ))),
        };
        let outcome = connect_outcome("example.com", 443, &refused);
        assert!(!outcome.success);
        assert_eq!(
            outcome.message,
            "Connection to example.com:443 failed. ConnectionRefused: Connection refused"
        );
    }

    #[test]
    fn test_dns_failure_message() {
        let error = ProbeError::NoAddress("nowhere.invalid".into());
        assert_eq!(
            dns_failure("nowhere.invalid", &error).message,
            "DNS lookup for nowhere.invalid failed. NoAddress: no address associated with nowhere.invalid"
        );
    }
}
