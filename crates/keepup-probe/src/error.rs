//! Probe failure taxonomy.

use std::time::Duration;

use thiserror::Error;

/// A failure raised by one of the probe collaborators.
///
/// Never surfaced raw: the worker folds it into a log message through
/// [`ProbeError::clause`].
#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("{0}")]
    Io(#[from] std::io::Error),
    #[error("timed out after {} msec", .0.as_millis())]
    Timeout(Duration),
    #[error("no address associated with {0}")]
    NoAddress(String),
    #[error("{0}")]
    Http(#[from] reqwest::Error),
    #[error("{0}")]
    InvalidUrl(#[from] url::ParseError),
    #[error("scheme {0} is not supported")]
    UnsupportedScheme(String),
}

impl ProbeError {
    /// Short type name used in `<kind>: <message>` clauses.
    pub fn kind(&self) -> String {
        match self {
            ProbeError::Io(e) => format!("{:?}", e.kind()),
            ProbeError::Timeout(_) => "Timeout".to_string(),
            ProbeError::NoAddress(_) => "NoAddress".to_string(),
            ProbeError::Http(e) if e.is_timeout() => "Timeout".to_string(),
            ProbeError::Http(e) if e.is_connect() => "ConnectError".to_string(),
            ProbeError::Http(_) => "HttpError".to_string(),
            ProbeError::InvalidUrl(_) => "InvalidUrl".to_string(),
            ProbeError::UnsupportedScheme(_) => "UnsupportedScheme".to_string(),
        }
    }

    pub fn clause(&self) -> String {
        format!("{}: {}", self.kind(), self)
    }
}
