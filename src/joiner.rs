// src/joiner.rs

use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tracing::info;

#[derive(Debug, Error)]
pub enum JoinError {
    #[error("failed to open output {path}: {source}")]
    Output {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to append {path}: {source}")]
    Part {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Concatenates spill files into `out`, ordered by file name.
///
/// Sorting is lexical on the file name alone, never by chunk index or
/// directory, which is why spill names are zero padded. A failure leaves
/// `out` partially written.
pub async fn join_files(mut files: Vec<PathBuf>, out: &Path) -> Result<u64, JoinError> {
    files.sort_by(|a, b| a.file_name().cmp(&b.file_name()));
    info!("Start joining {} parts into {}", files.len(), out.display());

    let output_err = |source| JoinError::Output {
        path: out.to_path_buf(),
        source,
    };
    let mut output = OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .open(out)
        .await
        .map_err(output_err)?;

    let mut total = 0;
    for path in &files {
        let part_err = |source| JoinError::Part {
            path: path.clone(),
            source,
        };
        let mut part = File::open(path).await.map_err(part_err)?;
        total += tokio::io::copy(&mut part, &mut output)
            .await
            .map_err(part_err)?;
    }
    output.flush().await.map_err(output_err)?;

    info!("Joined {} bytes into {}", total, out.display());
    Ok(total)
}
