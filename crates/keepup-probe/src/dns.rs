//! Host name resolution through the system resolver.

use std::net::IpAddr;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::ProbeError;
use crate::types::DnsResolver;

pub struct SystemResolver {
    timeout: Duration,
}

impl SystemResolver {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

#[async_trait]
impl DnsResolver for SystemResolver {
    async fn resolve(&self, host: &str) -> Result<Vec<IpAddr>, ProbeError> {
        if let Ok(ip) = host.parse::<IpAddr>() {
            return Ok(vec![ip]);
        }
        let lookup = tokio::net::lookup_host((host, 0));
        let addrs = match tokio::time::timeout(self.timeout, lookup).await {
            Ok(result) => result?,
            Err(_) => return Err(ProbeError::Timeout(self.timeout)),
        };
        let mut ips: Vec<IpAddr> = addrs.map(|a| a.ip()).collect();
        ips.dedup();
        if ips.is_empty() {
            return Err(ProbeError::NoAddress(host.to_string()));
        }
        tracing::debug!(host, count = ips.len(), "Resolved host");
        Ok(ips)
    }
}

/// Host part of a task address: the URL host for URLs, the address itself otherwise.
pub fn host_of(address: &str) -> String {
    match url::Url::parse(address) {
        Ok(url) if url.has_host() => url
            .host_str()
            .map(|h| h.trim_start_matches('[').trim_end_matches(']').to_string())
            .unwrap_or_else(|| address.to_string()),
        _ => address.to_string(),
    }
}
