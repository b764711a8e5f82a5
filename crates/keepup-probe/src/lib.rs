//! keepup-probe: turns one probe attempt into a single log entry.
//!
//! The protocol actions (DNS, ping, TCP connect, HTTP download) sit behind
//! small collaborator traits so the [`NetworkTaskWorker`] state machine can
//! run against the host or against scripted fakes.

pub mod connect;
pub mod dns;
pub mod download;
pub mod error;
pub mod message;
pub mod ping;
pub mod system;
pub mod types;
pub mod worker;

pub use error::ProbeError;
pub use types::*;
pub use worker::{Collaborators, NetworkTaskWorker, ProbeContext, ProbeWorker, is_current};
