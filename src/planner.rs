// src/planner.rs

use crate::models::Chunk;
use crate::workspace::{PathError, Workspace, MAX_CHUNKS};
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum PlanError {
    #[error("parallelism must be at least 1")]
    InvalidParallelism,
    #[error("{0} chunks exceed the limit of {}", MAX_CHUNKS)]
    TooManyChunks(u64),
    #[error("path error: {0}")]
    Path(#[from] PathError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Splits `[0, total_length)` into `parallelism` contiguous chunks.
///
/// The last chunk absorbs the division remainder and its `range_to` is
/// `total_length` itself. The working directory is created up front since
/// callers start writing spill files right after planning.
pub async fn plan(
    workspace: &Workspace,
    parallelism: usize,
    total_length: u64,
    url: &str,
) -> Result<Vec<Chunk>, PlanError> {
    if parallelism == 0 {
        return Err(PlanError::InvalidParallelism);
    }

    // Fewer bytes than connections: every inner chunk still gets one byte.
    let par = (parallelism as u64).min(total_length.max(1));
    if par < parallelism as u64 {
        debug!(parallelism, total_length, "shrinking partition to {par} chunks");
    }
    if par > MAX_CHUNKS {
        return Err(PlanError::TooManyChunks(par));
    }

    let folder = workspace.folder_of(url)?;
    tokio::fs::create_dir_all(&folder).await?;

    let step = total_length / par;
    let mut chunks = Vec::with_capacity(par as usize);
    for index in 0..par {
        let last = index == par - 1;
        let range_from = step * index;
        let range_to = if last {
            total_length
        } else {
            step * (index + 1) - 1
        };
        chunks.push(Chunk {
            index,
            url: url.to_string(),
            path: workspace.spill_path(url, index)?,
            range_from,
            range_to,
            last,
        });
    }

    Ok(chunks)
}
