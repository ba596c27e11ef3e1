// src/config.rs

use crate::transport::ClientSettings;
use crate::workspace::{PathError, Workspace};
use std::path::PathBuf;

/// Settings for fetching, resuming and listing transfers.
#[derive(Debug, Clone)]
pub struct Config {
    /// Requested number of parallel connections per transfer.
    pub connections: usize,
    /// Skip TLS certificate verification.
    pub insecure_tls: bool,
    pub proxy: Option<String>,
    /// Bandwidth limit in bytes per second shared by all connections.
    pub rate_limit: Option<u64>,
    /// Root of the per-transfer working directories. `None` means
    /// `$HOME/.hget`.
    pub data_root: Option<PathBuf>,
    /// Directory the joined file is written to.
    pub output_dir: PathBuf,
    /// Render per-chunk progress bars.
    pub progress: bool,
    /// Expected SHA-256 of the final file.
    pub sha256: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            connections: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1),
            insecure_tls: true,
            proxy: None,
            rate_limit: None,
            data_root: None,
            output_dir: PathBuf::from("."),
            progress: false,
            sha256: None,
        }
    }
}

impl Config {
    pub fn workspace(&self) -> Result<Workspace, PathError> {
        match &self.data_root {
            Some(root) => Workspace::new(root),
            None => Workspace::from_home(),
        }
    }

    pub fn client_settings(&self) -> ClientSettings {
        ClientSettings {
            insecure_tls: self.insecure_tls,
            proxy: self.proxy.clone(),
        }
    }
}
