// src/queue.rs

use crate::manager::{ManagerError, TransferCoordinator, TransferOutcome};
use std::collections::VecDeque;
use std::path::Path;
use thiserror::Error;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::info;

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("failed to read url list: {0}")]
    Io(#[from] std::io::Error),
    #[error("download of {url} failed: {source}")]
    Transfer {
        url: String,
        #[source]
        source: ManagerError,
    },
}

/// URLs downloaded strictly one after another.
#[derive(Debug, Default)]
pub struct DownloadQueue {
    queue: Mutex<VecDeque<String>>,
}

impl DownloadQueue {
    /// Create a new empty download queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Reads one URL per line. Blank lines and `#` comments are skipped.
    pub async fn from_file(path: &Path) -> Result<Self, QueueError> {
        let text = tokio::fs::read_to_string(path).await?;
        let queue = Self::new();
        for line in text.lines().map(str::trim) {
            if !line.is_empty() && !line.starts_with('#') {
                queue.push(line.to_string()).await;
            }
        }
        Ok(queue)
    }

    pub async fn push(&self, url: String) {
        self.queue.lock().await.push_back(url);
    }

    pub async fn len(&self) -> usize {
        self.queue.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.queue.lock().await.is_empty()
    }

    /// Downloads every queued URL in order.
    ///
    /// The first failure stops the batch. So does an interrupt: the current
    /// transfer is suspended and the rest stay queued.
    pub async fn start(
        &self,
        coordinator: &TransferCoordinator,
        interrupt: CancellationToken,
    ) -> Result<Vec<TransferOutcome>, QueueError> {
        let mut outcomes = Vec::new();
        loop {
            let url = {
                let mut queue = self.queue.lock().await;
                queue.pop_front()
            };
            let Some(url) = url else { break };
            info!("Batch: starting {}", url);

            let outcome = coordinator
                .fetch(&url, interrupt.clone())
                .await
                .map_err(|source| QueueError::Transfer {
                    url: url.clone(),
                    source,
                })?;
            let stop = !matches!(outcome, TransferOutcome::Completed { .. });
            outcomes.push(outcome);
            if stop {
                info!("Batch: stopping after {}", url);
                break;
            }
        }
        Ok(outcomes)
    }
}
