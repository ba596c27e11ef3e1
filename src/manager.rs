// src/manager.rs

use crate::config::Config;
use crate::downloader::{ChunkFetcher, DownloadError, FetchContext, FetchSignal};
use crate::integrity::{verify_sha256, IntegrityError};
use crate::joiner::{join_files, JoinError};
use crate::limiter::SpeedLimiter;
use crate::models::{Chunk, TransferState};
use crate::planner::{plan, PlanError};
use crate::probe::{probe, ProbeError};
use crate::progress::ChunkBars;
use crate::state_manager::{StateError, StateStore};
use crate::transport::TransportError;
use crate::workspace::{task_name, PathError};
use reqwest::Client;
use std::path::PathBuf;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

#[derive(Debug, Error)]
pub enum ManagerError {
    #[error("path error: {0}")]
    Path(#[from] PathError),
    #[error("probe failed: {0}")]
    Probe(#[from] ProbeError),
    #[error("planning failed: {0}")]
    Plan(#[from] PlanError),
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),
    #[error("state error: {0}")]
    State(#[from] StateError),
    #[error("chunk {index} failed: {source}")]
    Fetch {
        index: u64,
        #[source]
        source: DownloadError,
    },
    #[error("{0} chunk worker(s) exited without reporting")]
    WorkerLost(usize),
    #[error("join failed: {0}")]
    Join(#[from] JoinError),
    #[error("integrity check failed: {0}")]
    Integrity(#[from] IntegrityError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Whether the worker loop still treats a chunk failure as fatal. The
/// terminal states are the variants of [`TransferOutcome`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Running,
    Interrupted,
}

/// How a transfer ended when it did not fail.
#[derive(Debug)]
pub enum TransferOutcome {
    /// All chunks joined into `output`.
    Completed { output: PathBuf, bytes: u64 },
    /// Interrupted and checkpointed for a later resume.
    Suspended {
        checkpoint: PathBuf,
        state: TransferState,
    },
    /// Interrupted, resumable, but the checkpoint could not be written.
    CheckpointFailed {
        state: TransferState,
        error: StateError,
    },
    /// Interrupted and not resumable: partial data was dropped.
    Abandoned,
}

/// A planned transfer, either fresh from a probe or loaded from a checkpoint.
#[derive(Debug, Clone)]
pub struct Transfer {
    pub url: String,
    pub chunks: Vec<Chunk>,
    /// Whether an interruption should be checkpointed.
    pub resumable: bool,
}

impl Transfer {
    pub fn from_state(state: TransferState) -> Self {
        Self {
            url: state.url,
            chunks: state.chunks,
            resumable: true,
        }
    }

    /// Single-connection transfers fetch the full body without a range.
    pub fn ranged(&self) -> bool {
        self.chunks.len() > 1
    }
}

/// Owns the chunk workers of a transfer and decides how it ends.
pub struct TransferCoordinator {
    config: Config,
    store: StateStore,
    client: Client,
    limiter: Option<SpeedLimiter>,
}

impl TransferCoordinator {
    pub fn new(config: Config) -> Result<Self, ManagerError> {
        let store = StateStore::new(config.workspace()?);
        let client = config.client_settings().build()?;
        let limiter = config.rate_limit.filter(|r| *r > 0).map(SpeedLimiter::new);
        Ok(Self {
            config,
            store,
            client,
            limiter,
        })
    }

    pub fn store(&self) -> &StateStore {
        &self.store
    }

    /// Fresh download of `url`. An existing working directory for the same
    /// task is discarded first.
    pub async fn fetch(
        &self,
        url: &str,
        interrupt: CancellationToken,
    ) -> Result<TransferOutcome, ManagerError> {
        if self.store.exists(url).await? {
            warn!("Downloading task already exists, removing it first");
            self.store.remove(url).await?;
        }
        let transfer = self.prepare(url).await?;
        self.run(transfer, interrupt).await
    }

    /// Continues a suspended transfer named by its URL or task name.
    pub async fn resume(
        &self,
        url_or_task: &str,
        interrupt: CancellationToken,
    ) -> Result<TransferOutcome, ManagerError> {
        let transfer = self.load(url_or_task).await?;
        self.run(transfer, interrupt).await
    }

    /// Probes `url` and partitions it.
    pub async fn prepare(&self, url: &str) -> Result<Transfer, ManagerError> {
        debug!(url, "planning fresh transfer");
        // Refuse traversal before touching the network.
        self.store.workspace().folder_of(url)?;

        let capability = probe(&self.client, url).await?;
        let parallelism = capability.parallelism(self.config.connections);
        let chunks = plan(self.store.workspace(), parallelism, capability.length, url).await?;
        info!("Start download with {} connections", chunks.len());

        Ok(Transfer {
            url: url.to_string(),
            chunks,
            resumable: capability.resumable(),
        })
    }

    /// Loads a checkpoint; its chunks carry over verbatim.
    pub async fn load(&self, url_or_task: &str) -> Result<Transfer, ManagerError> {
        debug!(task = url_or_task, "loading checkpoint");
        let state = self.store.load(url_or_task).await?;
        info!(
            "Resuming {} with {} connections, {} bytes left",
            state.url,
            state.chunks.len(),
            state.remaining_bytes()
        );
        Ok(Transfer::from_state(state))
    }

    /// Runs every chunk of `transfer` until each worker has reported once.
    ///
    /// A failed chunk aborts the whole transfer unless an interrupt already
    /// arrived, in which case its partial snapshot is kept like any other.
    pub async fn run(
        &self,
        transfer: Transfer,
        interrupt: CancellationToken,
    ) -> Result<TransferOutcome, ManagerError> {
        let ranged = transfer.ranged();
        let Transfer {
            url,
            chunks,
            resumable,
        } = transfer;
        let workers = chunks.len();
        let ctx = FetchContext {
            client: self.client.clone(),
            ranged,
            limiter: self.limiter.clone(),
        };
        let bars = self.config.progress.then(ChunkBars::new);
        let name = task_name(&url);

        let (tx, mut rx) = mpsc::channel::<FetchSignal>(workers.max(1));
        let mut tasks = JoinSet::new();
        let mut tokens = Vec::with_capacity(workers);
        for chunk in chunks {
            let token = CancellationToken::new();
            tokens.push(token.clone());

            let mut fetcher = ChunkFetcher::new(ctx.clone(), chunk.clone());
            if let Some(bars) = &bars {
                if !chunk.is_satisfied() {
                    let label = format!("{}-{}", name, chunk.index);
                    fetcher = fetcher.with_progress(bars.add(label, chunk.remaining_bytes()));
                }
            }

            let tx = tx.clone();
            tasks.spawn(async move {
                let signal = fetcher.run(token).await;
                let _ = tx.send(signal).await;
            });
        }
        drop(tx);

        let mut phase = Phase::Running;
        debug!(?phase, workers, "transfer running");
        let mut snapshots = Vec::with_capacity(workers);
        let mut completed = Vec::with_capacity(workers);
        let mut reported = 0;

        while reported < workers {
            tokio::select! {
                _ = interrupt.cancelled(), if phase == Phase::Running => {
                    phase = Phase::Interrupted;
                    info!("Interrupted, stopping {} connections", workers);
                    for token in &tokens {
                        token.cancel();
                    }
                }
                signal = rx.recv() => {
                    let Some(signal) = signal else {
                        break;
                    };
                    reported += 1;
                    match signal {
                        FetchSignal::Completed(chunk) => {
                            completed.push(chunk.path.clone());
                            snapshots.push(chunk);
                        }
                        FetchSignal::Interrupted(chunk) => snapshots.push(chunk),
                        FetchSignal::Failed { snapshot, error } if phase == Phase::Running => {
                            error!("chunk {} failed: {}", snapshot.index, error);
                            tasks.abort_all();
                            return Err(ManagerError::Fetch {
                                index: snapshot.index,
                                source: error,
                            });
                        }
                        FetchSignal::Failed { snapshot, error } => {
                            warn!("chunk {} failed while stopping: {}", snapshot.index, error);
                            snapshots.push(snapshot);
                        }
                    }
                }
            }
        }

        while tasks.join_next().await.is_some() {}
        if reported < workers {
            return Err(ManagerError::WorkerLost(workers - reported));
        }

        match phase {
            Phase::Interrupted => Ok(self.suspend(url, resumable, snapshots).await),
            Phase::Running => self.finish(&url, completed).await,
        }
    }

    async fn suspend(&self, url: String, resumable: bool, snapshots: Vec<Chunk>) -> TransferOutcome {
        if !resumable {
            warn!("Interrupted, but {} is not resumable; dropping partial data", url);
            if let Err(e) = self.store.remove(&url).await {
                warn!("could not remove working directory: {}", e);
            }
            return TransferOutcome::Abandoned;
        }

        info!("Interrupted, saving state ...");
        let state = TransferState::new(url, snapshots);
        match self.store.save(&state).await {
            Ok(checkpoint) => {
                debug!(checkpoint = %checkpoint.display(), "transfer suspended");
                TransferOutcome::Suspended { checkpoint, state }
            }
            Err(error) => {
                error!("failed to save state: {}", error);
                TransferOutcome::CheckpointFailed { state, error }
            }
        }
    }

    async fn finish(&self, url: &str, parts: Vec<PathBuf>) -> Result<TransferOutcome, ManagerError> {
        debug!(parts = parts.len(), "joining transfer");
        tokio::fs::create_dir_all(&self.config.output_dir).await?;
        let output = self.config.output_dir.join(task_name(url));

        let bytes = join_files(parts, &output).await?;
        self.store.remove(url).await?;

        if let Some(expected) = &self.config.sha256 {
            verify_sha256(&output, expected).await?;
            info!("sha256 verified");
        }

        debug!(output = %output.display(), "transfer done");
        Ok(TransferOutcome::Completed { output, bytes })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn coordinator(dir: &std::path::Path) -> TransferCoordinator {
        TransferCoordinator::new(Config {
            data_root: Some(dir.join("data")),
            output_dir: dir.join("out"),
            connections: 4,
            ..Config::default()
        })
        .unwrap()
    }

    fn done_chunk(coord: &TransferCoordinator, url: &str, index: u64, body: &[u8], last: bool) -> Chunk {
        let path = coord.store().workspace().spill_path(url, index).unwrap();
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, body).unwrap();
        Chunk {
            index,
            url: url.to_string(),
            path,
            range_from: 10,
            range_to: if last { 10 } else { 9 },
            last,
        }
    }

    #[tokio::test]
    async fn satisfied_transfer_joins_without_network() {
        let dir = tempfile::tempdir().unwrap();
        let coord = coordinator(dir.path());
        let url = "http://127.0.0.1:9/joined.bin";
        let chunks = vec![
            done_chunk(&coord, url, 1, b"world", true),
            done_chunk(&coord, url, 0, b"hello ", false),
        ];
        let transfer = Transfer {
            url: url.into(),
            chunks,
            resumable: true,
        };

        match coord.run(transfer, CancellationToken::new()).await.unwrap() {
            TransferOutcome::Completed { output, bytes } => {
                assert_eq!(bytes, 11);
                assert_eq!(std::fs::read(&output).unwrap(), b"hello world");
            }
            other => panic!("unexpected outcome {other:?}"),
        }
        assert!(!coord.store().exists(url).await.unwrap());
    }

    #[tokio::test]
    async fn traversal_is_refused_before_probing() {
        let dir = tempfile::tempdir().unwrap();
        let coord = coordinator(dir.path());
        assert!(matches!(
            coord.prepare("http://127.0.0.1:9/..").await,
            Err(ManagerError::Path(PathError::Traversal(_)))
        ));
    }

    #[tokio::test]
    async fn resume_without_checkpoint_fails() {
        let dir = tempfile::tempdir().unwrap();
        let coord = coordinator(dir.path());
        assert!(matches!(
            coord.resume("ghost.iso", CancellationToken::new()).await,
            Err(ManagerError::State(StateError::NotFound { .. }))
        ));
    }

    #[tokio::test]
    async fn failure_after_interrupt_is_still_checkpointed() {
        let dir = tempfile::tempdir().unwrap();
        let coord = coordinator(dir.path());
        let url = "http://127.0.0.1:9/late.bin";
        let kept = done_chunk(&coord, url, 0, b"kept", false);
        // A directory where the spill file belongs makes the worker fail.
        let blocked = coord.store().workspace().spill_path(url, 1).unwrap();
        std::fs::create_dir_all(&blocked).unwrap();
        let failing = Chunk {
            index: 1,
            url: url.into(),
            path: blocked,
            range_from: 10,
            range_to: 10,
            last: true,
        };
        let transfer = Transfer {
            url: url.into(),
            chunks: vec![kept.clone(), failing.clone()],
            resumable: true,
        };

        // Workers only get polled after the loop has broadcast the stop.
        let interrupt = CancellationToken::new();
        interrupt.cancel();
        match coord.run(transfer, interrupt).await.unwrap() {
            TransferOutcome::Suspended { state, .. } => {
                assert_eq!(state.chunks, vec![kept.clone(), failing.clone()]);
            }
            other => panic!("unexpected outcome {other:?}"),
        }
        let saved = coord.store().load("late.bin").await.unwrap();
        assert!(saved.chunks.contains(&failing));
        assert!(saved.chunks.contains(&kept));
    }

    #[tokio::test]
    async fn checksum_mismatch_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let coord = TransferCoordinator::new(Config {
            data_root: Some(dir.path().join("data")),
            output_dir: dir.path().join("out"),
            sha256: Some("00".repeat(32)),
            ..Config::default()
        })
        .unwrap();
        let url = "http://127.0.0.1:9/sum.bin";
        let transfer = Transfer {
            url: url.into(),
            chunks: vec![done_chunk(&coord, url, 0, b"abc", true)],
            resumable: true,
        };
        assert!(matches!(
            coord.run(transfer, CancellationToken::new()).await,
            Err(ManagerError::Integrity(IntegrityError::Mismatch { .. }))
        ));
    }
}
