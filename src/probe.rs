// src/probe.rs

use reqwest::header::{ACCEPT_RANGES, CONTENT_LENGTH};
use reqwest::Client;
use std::net::{IpAddr, Ipv4Addr};
use thiserror::Error;
use tracing::{info, warn};
use url::Url;

/// Length reported when the server does not send one. Never trusted as a
/// real byte count; it only keeps progress output non-degenerate.
pub const UNKNOWN_LENGTH: u64 = 1;

#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("malformed url {0:?}: {1}")]
    InvalidUrl(String, #[source] url::ParseError),
    #[error("url {0:?} has no host")]
    NoHost(String),
    #[error("failed to resolve {host}: {source}")]
    Resolve {
        host: String,
        #[source]
        source: std::io::Error,
    },
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),
    #[error("invalid Content-Length header {0:?}")]
    InvalidLength(String),
}

/// What a single preliminary request told us about the resource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Capability {
    pub length: u64,
    pub range_supported: bool,
    /// Whether the length was reported at all.
    pub length_known: bool,
    /// IPv4 addresses of the host, for display only.
    pub addresses: Vec<Ipv4Addr>,
}

impl Capability {
    /// Partial progress is only worth persisting when the server supports
    /// ranges and reported a length.
    pub fn resumable(&self) -> bool {
        self.range_supported && self.length_known
    }

    /// Connections to actually use for a requested count.
    pub fn parallelism(&self, requested: usize) -> usize {
        if self.resumable() {
            requested.max(1)
        } else {
            1
        }
    }
}

/// Resolves the host and issues one request to learn the length and range
/// support of `url`.
pub async fn probe(client: &Client, url: &str) -> Result<Capability, ProbeError> {
    let parsed = Url::parse(url).map_err(|e| ProbeError::InvalidUrl(url.to_string(), e))?;
    let addresses = resolve_ipv4(&parsed).await?;
    let shown: Vec<String> = addresses.iter().map(ToString::to_string).collect();
    info!("Resolve ip: {}", shown.join(" | "));

    let resp = client.get(parsed).send().await?.error_for_status()?;

    let range_supported = resp
        .headers()
        .get(ACCEPT_RANGES)
        .and_then(|v| v.to_str().ok())
        .map(|v| !v.trim().is_empty() && !v.trim().eq_ignore_ascii_case("none"))
        .unwrap_or(false);
    if !range_supported {
        warn!("Target url does not support range download, falling back to 1 connection");
    }

    let length = match resp.headers().get(CONTENT_LENGTH) {
        Some(value) => {
            let text = value.to_str().unwrap_or_default().trim().to_string();
            Some(
                text.parse::<u64>()
                    .map_err(|_| ProbeError::InvalidLength(text))?,
            )
        }
        None => None,
    };
    // Dropping the response closes the connection before the body is read.
    drop(resp);

    let capability = match length {
        Some(length) => {
            log_size(length);
            Capability {
                length,
                range_supported,
                length_known: true,
                addresses,
            }
        }
        None => {
            warn!("Target url has no Content-Length header, falling back to 1 connection");
            info!("Download size: not specified");
            Capability {
                length: UNKNOWN_LENGTH,
                range_supported,
                length_known: false,
                addresses,
            }
        }
    };
    Ok(capability)
}

async fn resolve_ipv4(url: &Url) -> Result<Vec<Ipv4Addr>, ProbeError> {
    let host = url
        .host_str()
        .ok_or_else(|| ProbeError::NoHost(url.to_string()))?
        .trim_start_matches('[')
        .trim_end_matches(']')
        .to_string();
    let port = url.port_or_known_default().unwrap_or(80);

    let resolved = tokio::net::lookup_host((host.as_str(), port))
        .await
        .map_err(|source| ProbeError::Resolve {
            host: host.clone(),
            source,
        })?;
    Ok(filter_ipv4(resolved.map(|addr| addr.ip())))
}

/// Keeps IPv4 addresses only, deduplicated in resolution order.
pub fn filter_ipv4(ips: impl IntoIterator<Item = IpAddr>) -> Vec<Ipv4Addr> {
    let mut out = Vec::new();
    for ip in ips {
        if let IpAddr::V4(v4) = ip {
            if !out.contains(&v4) {
                out.push(v4);
            }
        }
    }
    out
}

fn log_size(length: u64) {
    let mb = length as f64 / (1024.0 * 1024.0);
    if mb < 1024.0 {
        info!("Download target size: {mb:.1} MB");
    } else {
        info!("Download target size: {:.1} GB", mb / 1024.0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv6Addr;

    fn capability(range_supported: bool, length_known: bool) -> Capability {
        Capability {
            length: 100,
            range_supported,
            length_known,
            addresses: Vec::new(),
        }
    }

    #[test]
    fn filter_keeps_v4_only() {
        let ips = vec![
            IpAddr::V6(Ipv6Addr::LOCALHOST),
            IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1)),
            IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1)),
            IpAddr::V4(Ipv4Addr::new(192, 168, 1, 2)),
        ];
        assert_eq!(
            filter_ipv4(ips),
            vec![Ipv4Addr::new(10, 0, 0, 1), Ipv4Addr::new(192, 168, 1, 2)]
        );
    }

    #[test]
    fn parallelism_falls_back_without_ranges() {
        assert_eq!(capability(true, true).parallelism(8), 8);
        assert_eq!(capability(false, true).parallelism(8), 1);
        assert_eq!(capability(true, false).parallelism(8), 1);
        assert!(!capability(true, false).resumable());
    }

    #[tokio::test]
    async fn malformed_url_is_setup_error() {
        let client = Client::new();
        assert!(matches!(
            probe(&client, "not a url").await,
            Err(ProbeError::InvalidUrl(..))
        ));
    }
}
