//! TCP connect probe.

use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use async_trait::async_trait;
use tokio::net::TcpStream;

use crate::error::ProbeError;
use crate::types::{ConnectOutcome, ConnectProbe};

pub struct TcpConnectProbe {
    timeout: Duration,
}

impl TcpConnectProbe {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    async fn attempt(&self, addr: SocketAddr) -> Result<(), ProbeError> {
        match tokio::time::timeout(self.timeout, TcpStream::connect(addr)).await {
            Ok(Ok(_stream)) => Ok(()),
            Ok(Err(e)) => Err(e.into()),
            Err(_) => Err(ProbeError::Timeout(self.timeout)),
        }
    }
}

#[async_trait]
impl ConnectProbe for TcpConnectProbe {
    /// Try up to `count` times; the first established connection wins.
    async fn connect(&self, address: IpAddr, port: u16, count: u32) -> ConnectOutcome {
        let addr = SocketAddr::new(address, port);
        let mut last_error = None;
        for attempt in 1..=count.max(1) {
            match self.attempt(addr).await {
                Ok(()) => {
                    tracing::debug!(%addr, attempt, "Connection established");
                    return ConnectOutcome {
                        success: true,
                        error: None,
                    };
                }
                Err(e) => {
                    tracing::debug!(%addr, attempt, "Connection attempt failed: {e}");
                    last_error = Some(e);
                }
            }
        }
        ConnectOutcome {
            success: false,
            error: last_error,
        }
    }
}
