//! Probe module for reachability checks.
//!
//! Supports ICMP ping and ARP presence, with MAC-to-IP discovery and custom
//! DNS resolution as an explicit step before each probe.

pub mod arp;
mod dns;
mod ping;

pub use dns::*;
pub use ping::*;

use std::net::IpAddr;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::config::TargetConfig;

/// Probe error types.
#[derive(Error, Debug)]
pub enum ProbeError {
    #[error("probe timed out after {0:?}")]
    Timeout(Duration),
    #[error("network error: {0}")]
    Network(String),
    #[error("permission denied: {0}")]
    PermissionDenied(String),
    #[error("invalid configuration: {0}")]
    Config(String),
    #[error("command failed: {0}")]
    Command(String),
    #[error("resolution failed: {0}")]
    Resolution(String),
}

/// What kind of identity a target carries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TargetAddress {
    Ip(IpAddr),
    Mac(String),
    Host(String),
}

impl TargetAddress {
    pub fn parse(target: &str) -> Self {
        if let Ok(ip) = target.parse::<IpAddr>() {
            TargetAddress::Ip(ip)
        } else if arp::is_mac_address(target) {
            TargetAddress::Mac(target.to_string())
        } else {
            TargetAddress::Host(target.to_string())
        }
    }
}

/// Active reachability check against one target.
///
/// Ordinary network failure is reported as `false`, never as an error.
#[async_trait]
pub trait ReachabilityProbe: Send + Sync {
    /// Turn the configured identity into an address the probe can reach.
    ///
    /// `Err` means the target cannot be resolved this cycle.
    async fn resolve(&self, target: &TargetConfig) -> Result<String, ProbeError>;

    /// Probe `address` once.
    async fn probe(&self, address: &str, use_arp: bool, timeout: Duration) -> bool;
}

/// Probe backed by the host network stack.
#[derive(Debug, Default, Clone)]
pub struct SystemProbe;

#[async_trait]
impl ReachabilityProbe for SystemProbe {
    async fn resolve(&self, target: &TargetConfig) -> Result<String, ProbeError> {
        match TargetAddress::parse(&target.target) {
            TargetAddress::Ip(ip) => Ok(ip.to_string()),
            TargetAddress::Mac(mac) => arp::lookup_ip(&mac)
                .await?
                .map(|ip| ip.to_string())
                .ok_or_else(|| {
                    ProbeError::Resolution(format!("no ARP entry for MAC {}", mac))
                }),
            TargetAddress::Host(host) if !target.custom_dns.is_empty() => {
                resolve_a(&host, &target.custom_dns, target.probe_timeout)
                    .await
                    .map(|ip| ip.to_string())
            }
            TargetAddress::Host(host) => Ok(host),
        }
    }

    async fn probe(&self, address: &str, use_arp: bool, timeout: Duration) -> bool {
        let result = if use_arp {
            arp_probe(address, timeout).await
        } else {
            ping(address, timeout).await.map(|_| true)
        };

        match result {
            Ok(reachable) => reachable,
            Err(e) => {
                tracing::debug!("Probe of {} failed: {}", address, e);
                false
            }
        }
    }
}

/// Refresh the neighbour cache with one ping, then check for a MAC entry.
async fn arp_probe(address: &str, timeout: Duration) -> Result<bool, ProbeError> {
    let ip = match address.parse::<IpAddr>() {
        Ok(ip) => ip,
        Err(_) => tokio::net::lookup_host(format!("{}:0", address))
            .await
            .map_err(|e| ProbeError::Resolution(format!("{}: {}", address, e)))?
            .next()
            .map(|sa| sa.ip())
            .ok_or_else(|| ProbeError::Resolution(format!("no addresses found for {}", address)))?,
    };

    // the reply itself is irrelevant, only the neighbour entry it leaves behind
    let _ = ping(&ip.to_string(), timeout).await;

    Ok(arp::lookup_mac(ip).await?.is_some())
}
