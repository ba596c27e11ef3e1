// src/transport.rs

use reqwest::{Client, Proxy};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("invalid proxy {0:?}: {1}")]
    Proxy(String, #[source] reqwest::Error),
    #[error("failed to build http client: {0}")]
    Build(#[from] reqwest::Error),
}

/// Connection settings for one transfer. Every transfer builds its own
/// client, so transfers with different proxies never share a pool.
#[derive(Debug, Clone, Default)]
pub struct ClientSettings {
    pub insecure_tls: bool,
    /// `scheme://host:port`, or a bare `host:port` taken as SOCKS5.
    pub proxy: Option<String>,
}

impl ClientSettings {
    pub fn build(&self) -> Result<Client, TransportError> {
        let mut builder = Client::builder()
            .user_agent(concat!("hget/", env!("CARGO_PKG_VERSION")))
            .danger_accept_invalid_certs(self.insecure_tls);

        builder = match self.proxy.as_deref().map(proxy_url) {
            Some(url) => {
                let proxy = Proxy::all(&url).map_err(|e| TransportError::Proxy(url.clone(), e))?;
                builder.proxy(proxy)
            }
            None => builder.no_proxy(),
        };

        Ok(builder.build()?)
    }
}

fn proxy_url(addr: &str) -> String {
    if addr.contains("://") {
        addr.to_string()
    } else {
        format!("socks5://{addr}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bare_proxy_is_socks5() {
        assert_eq!(proxy_url("127.0.0.1:12345"), "socks5://127.0.0.1:12345");
        assert_eq!(proxy_url("http://proxy.com:8080"), "http://proxy.com:8080");
    }

    #[test]
    fn builds_with_and_without_proxy() {
        ClientSettings::default().build().unwrap();
        ClientSettings {
            insecure_tls: true,
            proxy: Some("127.0.0.1:1080".into()),
        }
        .build()
        .unwrap();
    }
}
