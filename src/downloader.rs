// src/downloader.rs

use crate::limiter::SpeedLimiter;
use crate::models::Chunk;
use crate::progress::ProgressSink;
use futures_util::StreamExt;
use reqwest::header::RANGE;
use reqwest::{Client, Response, StatusCode};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::task::JoinHandle;
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::debug;

/// Custom errors for chunk fetches.
#[derive(Debug, Error)]
pub enum DownloadError {
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("server answered a range request with status {0}")]
    RangeIgnored(StatusCode),
    #[error("copy task stopped abnormally: {0}")]
    CopyTask(#[from] tokio::task::JoinError),
}

/// Inputs shared by every chunk of one transfer.
#[derive(Clone)]
pub struct FetchContext {
    pub client: Client,
    /// Whether chunks are fetched with `Range` headers. Off for
    /// single-connection transfers, which fetch the full body.
    pub ranged: bool,
    pub limiter: Option<SpeedLimiter>,
}

/// The single terminal report of one chunk worker. Every variant carries
/// the chunk advanced by exactly the bytes that reached disk.
#[derive(Debug)]
pub enum FetchSignal {
    Completed(Chunk),
    Interrupted(Chunk),
    Failed { snapshot: Chunk, error: DownloadError },
}

/// How a copy loop ended.
#[derive(Debug)]
enum CopyEnd {
    Eof,
    Stopped,
    Failed(DownloadError),
}

/// What a stopped copy loop persisted.
#[derive(Debug)]
struct CopyReport {
    written: u64,
    end: CopyEnd,
}

/// The running body-to-file copy of one chunk.
///
/// Stopping is two-phase: [`CopyHandle::request_stop`] drops the inbound
/// stream, [`CopyHandle::stopped`] resolves only once the loop has let go
/// of the file. The written byte count is only readable from the latter.
struct CopyHandle {
    stop: CancellationToken,
    finished: CancellationToken,
    task: JoinHandle<CopyEnd>,
    written: Arc<AtomicU64>,
    // Stops the loop if the owning worker is aborted mid-copy.
    _stop_on_drop: DropGuard,
}

impl CopyHandle {
    fn spawn(
        resp: Response,
        file: File,
        limiter: Option<SpeedLimiter>,
        progress: Option<Arc<dyn ProgressSink>>,
    ) -> Self {
        let stop = CancellationToken::new();
        let finished = CancellationToken::new();
        let written = Arc::new(AtomicU64::new(0));

        let task = {
            let stop = stop.clone();
            let finished = finished.clone();
            let written = written.clone();
            tokio::spawn(async move {
                // Fires even if the loop panics.
                let _done = finished.drop_guard();
                copy_body(resp, file, limiter, progress, stop, written).await
            })
        };

        Self {
            _stop_on_drop: stop.clone().drop_guard(),
            stop,
            finished,
            task,
            written,
        }
    }

    fn request_stop(&self) {
        self.stop.cancel();
    }

    async fn finished(&self) {
        self.finished.cancelled().await;
    }

    async fn stopped(self) -> CopyReport {
        let end = match self.task.await {
            Ok(end) => end,
            Err(e) => CopyEnd::Failed(e.into()),
        };
        CopyReport {
            written: self.written.load(Ordering::SeqCst),
            end,
        }
    }
}

async fn copy_body(
    resp: Response,
    mut file: File,
    limiter: Option<SpeedLimiter>,
    progress: Option<Arc<dyn ProgressSink>>,
    stop: CancellationToken,
    written: Arc<AtomicU64>,
) -> CopyEnd {
    let mut stream = resp.bytes_stream();

    let end = loop {
        let next = tokio::select! {
            biased;
            _ = stop.cancelled() => break CopyEnd::Stopped,
            next = stream.next() => next,
        };
        let bytes = match next {
            None => break CopyEnd::Eof,
            Some(Ok(bytes)) => bytes,
            Some(Err(e)) => break CopyEnd::Failed(e.into()),
        };
        let len = bytes.len() as u64;

        if let Some(limiter) = &limiter {
            tokio::select! {
                biased;
                _ = stop.cancelled() => break CopyEnd::Stopped,
                _ = limiter.take(len) => {}
            }
        }

        if let Err(e) = file.write_all(&bytes).await {
            break CopyEnd::Failed(e.into());
        }
        written.fetch_add(len, Ordering::SeqCst);
        if let Some(progress) = &progress {
            progress.advance(len);
        }
    };
    // Closes the connection.
    drop(stream);

    match (file.flush().await, end) {
        (Err(e), CopyEnd::Eof | CopyEnd::Stopped) => CopyEnd::Failed(e.into()),
        (_, end) => end,
    }
}

/// Fetches one chunk into its spill file.
pub struct ChunkFetcher {
    ctx: FetchContext,
    chunk: Chunk,
    progress: Option<Arc<dyn ProgressSink>>,
}

impl ChunkFetcher {
    pub fn new(ctx: FetchContext, chunk: Chunk) -> Self {
        Self {
            ctx,
            chunk,
            progress: None,
        }
    }

    pub fn with_progress(mut self, progress: Arc<dyn ProgressSink>) -> Self {
        self.progress = Some(progress);
        self
    }

    /// Runs the fetch to its single terminal signal.
    ///
    /// Cancellation is cooperative: the copy loop is asked to stop and the
    /// snapshot is taken only after it confirmed, so it never undercounts.
    pub async fn run(self, cancel: CancellationToken) -> FetchSignal {
        let chunk = self.chunk.clone();
        let progress = self.progress.clone();

        let signal = if chunk.is_satisfied() {
            match touch(&chunk.path).await {
                Ok(()) => FetchSignal::Completed(chunk),
                Err(e) => FetchSignal::Failed {
                    snapshot: chunk,
                    error: e.into(),
                },
            }
        } else {
            self.transfer(cancel).await
        };

        if let Some(progress) = progress {
            progress.finish();
        }
        signal
    }

    async fn transfer(self, cancel: CancellationToken) -> FetchSignal {
        let resp = tokio::select! {
            biased;
            _ = cancel.cancelled() => return FetchSignal::Interrupted(self.chunk.clone()),
            resp = self.open() => resp,
        };
        let resp = match resp {
            Ok(resp) => resp,
            Err(error) => {
                return FetchSignal::Failed {
                    snapshot: self.chunk,
                    error,
                }
            }
        };

        // Append, never truncate: a resumed chunk's start is already past
        // the bytes on disk.
        let file = match OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.chunk.path)
            .await
        {
            Ok(file) => file,
            Err(e) => {
                return FetchSignal::Failed {
                    snapshot: self.chunk,
                    error: e.into(),
                }
            }
        };

        let copy = CopyHandle::spawn(resp, file, self.ctx.limiter.clone(), self.progress.clone());
        tokio::select! {
            _ = cancel.cancelled() => copy.request_stop(),
            _ = copy.finished() => {}
        }
        let report = copy.stopped().await;

        let snapshot = self.chunk.advanced(report.written);
        debug!(
            index = snapshot.index,
            written = report.written,
            range_from = snapshot.range_from,
            "chunk copy stopped: {:?}",
            report.end
        );
        match report.end {
            CopyEnd::Eof => FetchSignal::Completed(snapshot),
            CopyEnd::Stopped => FetchSignal::Interrupted(snapshot),
            CopyEnd::Failed(error) => FetchSignal::Failed { snapshot, error },
        }
    }

    async fn open(&self) -> Result<Response, DownloadError> {
        // A resumed single-connection chunk still needs its remainder only.
        let ranged = self.ctx.ranged || self.chunk.range_from > 0;

        let mut req = self.ctx.client.get(&self.chunk.url);
        if ranged {
            req = req.header(RANGE, self.chunk.range_header());
        }
        let resp = req.send().await?.error_for_status()?;

        if ranged && resp.status() != StatusCode::PARTIAL_CONTENT {
            return Err(DownloadError::RangeIgnored(resp.status()));
        }
        Ok(resp)
    }
}

async fn touch(path: &Path) -> std::io::Result<()> {
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await
        .map(drop)
}
