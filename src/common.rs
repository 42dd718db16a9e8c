//! Common types and functions shared by the client and server roles.

use crate::error::{Error, Result};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

/// Buffer size for reading data from QUIC streams.
pub const READ_BUFFER_SIZE: usize = 16 * 1024;

/// Splits a `host:port` string, stripping brackets from IPv6 literals.
pub fn split_host_port(address: &str) -> Result<(String, u16)> {
    let Some(colon_pos) = address.rfind(':') else {
        return Err(Error::Config(format!(
            "address must include port: '{}'",
            address
        )));
    };

    let host_part = &address[..colon_pos];
    let port_part = &address[colon_pos + 1..];

    let host = if host_part.starts_with('[') && host_part.ends_with(']') {
        &host_part[1..host_part.len() - 1]
    } else if host_part.contains(':') {
        // Unbracketed IPv6 literal: the last colon belongs to the address.
        return Err(Error::Config(format!(
            "address must include port: '{}'",
            address
        )));
    } else {
        host_part
    };

    if host.is_empty() {
        return Err(Error::Config(format!(
            "address must include host: '{}'",
            address
        )));
    }

    let port: u16 = port_part
        .parse()
        .map_err(|_| Error::Config(format!("invalid port in address '{}'", address)))?;

    Ok((host.to_string(), port))
}

/// Resolves a dial address into a SocketAddr plus the host name used for TLS.
pub async fn parse_connect_address(
    address: &str,
    resolver: &DnsResolver,
) -> Result<(SocketAddr, String)> {
    let (host, port) = split_host_port(address)?;
    let addr = resolver.resolve(&host, port).await?;
    Ok((addr, host))
}

/// Lazily constructed DNS resolver.
pub struct DnsResolver {
    resolver: Arc<Mutex<Option<hickory_resolver::Resolver<hickory_resolver::name_server::TokioConnectionProvider>>>>,
}

impl DnsResolver {
    /// Creates a new DNS resolver.
    pub fn new() -> Self {
        Self {
            resolver: Arc::new(Mutex::new(None)),
        }
    }

    /// Resolves a hostname to a SocketAddr asynchronously using hickory-resolver.
    ///
    /// IP literals never touch the resolver.
    pub async fn resolve(&self, host: &str, port: u16) -> Result<SocketAddr> {
        if let Ok(ip) = host.parse::<std::net::IpAddr>() {
            return Ok(SocketAddr::new(ip, port));
        }

        let mut resolver_guard = self.resolver.lock().await;
        let resolver = match resolver_guard.take() {
            Some(resolver) => resolver,
            None => hickory_resolver::Resolver::builder_tokio()
                .map_err(|e| Error::Config(format!("failed to create DNS resolver: {}", e)))?
                .build(),
        };
        let resolver = &*resolver_guard.insert(resolver);

        let response = resolver
            .lookup_ip(host)
            .await
            .map_err(|e| Error::DialFailed(format!("failed to resolve '{}': {}", host, e)))?;

        response
            .iter()
            .next()
            .map(|ip| SocketAddr::new(ip, port))
            .ok_or_else(|| Error::DialFailed(format!("no addresses found for '{}'", host)))
    }
}

impl Default for DnsResolver {
    fn default() -> Self {
        Self::new()
    }
}

/// Formats a duration in a compact human-readable form (`1h30m10s`, `500ms`).
pub fn format_duration(d: Duration) -> String {
    let secs = d.as_secs();
    let nanos = d.subsec_nanos();

    if secs == 0 && nanos == 0 {
        return "0s".to_string();
    }

    let mut result = String::new();

    let hours = secs / 3600;
    let mins = (secs % 3600) / 60;
    let secs_remainder = secs % 60;

    if hours > 0 {
        result.push_str(&format!("{}h", hours));
    }
    if mins > 0 {
        result.push_str(&format!("{}m", mins));
    }
    if secs_remainder > 0 {
        result.push_str(&format!("{}s", secs_remainder));
    } else if secs == 0 {
        let ms = nanos / 1_000_000;
        if ms > 0 {
            result.push_str(&format!("{}ms", ms));
        }
    }

    if result.is_empty() {
        "0s".to_string()
    } else {
        result
    }
}
