//! Outbound address-safety checks for tool clients.
//!
//! Every upstream fetch validates its URL first: http(s) scheme only,
//! blocked hostnames rejected, and both literal and DNS-resolved addresses
//! checked against loopback, private, link-local, CGNAT, documentation,
//! and cloud-metadata ranges.

use std::net::IpAddr;

use ipnet::IpNet;
use once_cell::sync::Lazy;
use reqwest::Url;
use thiserror::Error;
use tokio::net::lookup_host;
use tracing::warn;

#[derive(Debug, Error)]
pub enum SsrfError {
    #[error("invalid URL: {0}")]
    InvalidUrl(String),
    #[error("scheme '{0}' is not allowed, only http and https")]
    BlockedScheme(String),
    #[error("URL has no hostname")]
    MissingHost,
    #[error("blocked hostname: {0}")]
    BlockedHostname(String),
    #[error("blocked IP address: {0}")]
    BlockedIp(IpAddr),
    #[error("hostname {host} resolves to blocked IP {ip}")]
    ResolvesToBlockedIp { host: String, ip: IpAddr },
    #[error("could not resolve hostname: {0}")]
    UnresolvableHost(String),
}

static BLOCKED_NETWORKS: Lazy<Vec<IpNet>> = Lazy::new(|| {
    [
        // loopback
        "127.0.0.0/8",
        "::1/128",
        // RFC 1918 private ranges
        "10.0.0.0/8",
        "172.16.0.0/12",
        "192.168.0.0/16",
        // link-local, including the cloud metadata endpoint
        "169.254.0.0/16",
        "fe80::/10",
        // carrier-grade NAT (RFC 6598)
        "100.64.0.0/10",
        // documentation ranges
        "192.0.2.0/24",
        "198.51.100.0/24",
        "203.0.113.0/24",
        "2001:db8::/32",
        // broadcast and unspecified
        "255.255.255.255/32",
        "0.0.0.0/8",
        "::/128",
    ]
    .iter()
    .map(|network| network.parse().expect("static network table parses"))
    .collect()
});

const BLOCKED_HOSTNAMES: &[&str] = &[
    "localhost",
    "localhost.localdomain",
    "metadata.google.internal",
    "metadata",
];

pub fn is_ip_blocked(ip: IpAddr) -> bool {
    BLOCKED_NETWORKS.iter().any(|network| network.contains(&ip))
}

pub fn is_hostname_blocked(hostname: &str) -> bool {
    let lowered = hostname.to_ascii_lowercase();
    BLOCKED_HOSTNAMES.contains(&lowered.as_str())
}

/// Synchronous checks: URL shape, scheme, hostname, and literal addresses.
pub fn check_url(raw_url: &str) -> Result<Url, SsrfError> {
    let url: Url = raw_url
        .parse()
        .map_err(|err| SsrfError::InvalidUrl(format!("{err}")))?;

    match url.scheme() {
        "http" | "https" => {}
        other => return Err(SsrfError::BlockedScheme(other.to_string())),
    }

    let host = bare_host(&url).ok_or(SsrfError::MissingHost)?;
    if is_hostname_blocked(&host) {
        return Err(SsrfError::BlockedHostname(host));
    }
    if let Ok(ip) = host.parse::<IpAddr>() {
        if is_ip_blocked(ip) {
            return Err(SsrfError::BlockedIp(ip));
        }
    }

    Ok(url)
}

/// Full validation, including DNS resolution of hostname targets.
pub async fn ensure_url_allowed(raw_url: &str) -> Result<(), SsrfError> {
    let result = resolve_and_check(raw_url).await;
    if let Err(reason) = &result {
        warn!(url = %raw_url, reason = %reason, "blocked outbound request");
    }
    result
}

async fn resolve_and_check(raw_url: &str) -> Result<(), SsrfError> {
    let url = check_url(raw_url)?;
    let host = bare_host(&url).ok_or(SsrfError::MissingHost)?;

    // Literal addresses were already vetted by check_url.
    if host.parse::<IpAddr>().is_ok() {
        return Ok(());
    }

    let port = url.port_or_known_default().unwrap_or(443);
    let resolved: Vec<_> = lookup_host((host.as_str(), port))
        .await
        .map_err(|_| SsrfError::UnresolvableHost(host.clone()))?
        .collect();
    if resolved.is_empty() {
        return Err(SsrfError::UnresolvableHost(host));
    }

    for address in resolved {
        if is_ip_blocked(address.ip()) {
            return Err(SsrfError::ResolvesToBlockedIp {
                host,
                ip: address.ip(),
            });
        }
    }

    Ok(())
}

fn bare_host(url: &Url) -> Option<String> {
    url.host_str()
        .map(|host| host.trim_start_matches('[').trim_end_matches(']').to_string())
}
