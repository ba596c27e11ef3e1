// src/state_manager.rs

use crate::models::TransferState;
use crate::workspace::{task_name, PathError, Workspace};
use std::io;
use std::path::PathBuf;
use thiserror::Error;
use tracing::{info, warn};

#[derive(Debug, Error)]
pub enum StateError {
    #[error("no saved state for task {task:?} at {path}")]
    NotFound { task: String, path: PathBuf },
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("path error: {0}")]
    Path(#[from] PathError),
    #[error("io error: {0}")]
    Io(#[from] io::Error),
}

/// Persists transfer checkpoints as JSON inside each working directory.
#[derive(Debug, Clone)]
pub struct StateStore {
    workspace: Workspace,
}

impl StateStore {
    pub fn new(workspace: Workspace) -> Self {
        Self { workspace }
    }

    pub fn workspace(&self) -> &Workspace {
        &self.workspace
    }

    /// Moves every spill file into the working directory, then writes the
    /// checkpoint there. Returns the checkpoint path.
    pub async fn save(&self, state: &TransferState) -> Result<PathBuf, StateError> {
        let folder = self.workspace.folder_of(&state.url)?;
        info!("Saving current download data in {}", folder.display());
        tokio::fs::create_dir_all(&folder).await?;

        let mut saved = state.clone();
        for chunk in &mut saved.chunks {
            let Some(name) = chunk.path.file_name() else {
                continue;
            };
            let target = folder.join(name);
            if target != chunk.path {
                if let Err(e) = tokio::fs::rename(&chunk.path, &target).await {
                    warn!(
                        "could not move {} into {}: {}",
                        chunk.path.display(),
                        folder.display(),
                        e
                    );
                    continue;
                }
            }
            chunk.path = target;
        }

        let path = folder.join(crate::workspace::STATE_FILE_NAME);
        let tmp = path.with_extension("json.tmp");
        let data = serde_json::to_vec_pretty(&saved)?;
        tokio::fs::write(&tmp, data).await?;
        tokio::fs::rename(&tmp, &path).await?;
        Ok(path)
    }

    /// Loads the checkpoint of a task, named either by its URL or by its
    /// bare task name.
    pub async fn load(&self, url_or_task: &str) -> Result<TransferState, StateError> {
        let path = self.workspace.state_file(url_or_task)?;
        info!("Getting data from {}", path.display());
        let data = match tokio::fs::read(&path).await {
            Ok(data) => data,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(StateError::NotFound {
                    task: task_name(url_or_task),
                    path,
                })
            }
            Err(e) => return Err(e.into()),
        };
        Ok(serde_json::from_slice(&data)?)
    }

    /// Deletes the working directory of a transfer, if any.
    pub async fn remove(&self, url_or_task: &str) -> Result<(), StateError> {
        let folder = self.workspace.folder_of(url_or_task)?;
        match tokio::fs::remove_dir_all(&folder).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    pub async fn exists(&self, url_or_task: &str) -> Result<bool, StateError> {
        let folder = self.workspace.folder_of(url_or_task)?;
        Ok(tokio::fs::try_exists(&folder).await?)
    }

    /// Task names of every suspended transfer.
    pub async fn list_tasks(&self) -> Result<Vec<String>, StateError> {
        Ok(self.workspace.list_tasks().await?)
    }
}
