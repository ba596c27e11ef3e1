// src/workspace.rs

use std::io;
use std::path::{Component, Path, PathBuf};
use thiserror::Error;

/// Folder under the user's home that holds every working directory.
pub const DATA_FOLDER: &str = ".hget";
/// Checkpoint file kept inside a working directory.
pub const STATE_FILE_NAME: &str = "state.json";
/// Most chunks whose spill names still sort in index order.
pub const MAX_CHUNKS: u64 = 1_000_000;

#[derive(Debug, Error)]
pub enum PathError {
    #[error("could not locate the home directory")]
    NoHome,
    #[error("working directory for {0:?} escapes the data root (directory traversal attempt)")]
    Traversal(String),
    #[error("io error: {0}")]
    Io(#[from] io::Error),
}

/// The fixed root that contains one working directory per transfer.
#[derive(Debug, Clone)]
pub struct Workspace {
    root: PathBuf,
}

impl Workspace {
    /// Creates a workspace rooted at `root`, made absolute and normalized.
    pub fn new(root: impl AsRef<Path>) -> Result<Self, PathError> {
        let root = normalize(&std::path::absolute(root.as_ref())?);
        Ok(Self { root })
    }

    /// `$HOME/.hget`.
    pub fn from_home() -> Result<Self, PathError> {
        let home = home::home_dir().ok_or(PathError::NoHome)?;
        Self::new(home.join(DATA_FOLDER))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Working directory of the transfer named by `url_or_task`.
    ///
    /// The result must be a strict descendant of the root, otherwise the
    /// request is refused.
    pub fn folder_of(&self, url_or_task: &str) -> Result<PathBuf, PathError> {
        let name = task_name(url_or_task);
        if Path::new(&name).has_root() {
            return Err(PathError::Traversal(url_or_task.to_string()));
        }
        let candidate = normalize(&self.root.join(&name));
        if candidate == self.root || !candidate.starts_with(&self.root) {
            return Err(PathError::Traversal(url_or_task.to_string()));
        }
        Ok(candidate)
    }

    /// Checkpoint path for a URL or bare task name.
    pub fn state_file(&self, url_or_task: &str) -> Result<PathBuf, PathError> {
        Ok(self.folder_of(url_or_task)?.join(STATE_FILE_NAME))
    }

    /// Spill file of chunk `index`. The zero padding keeps lexical order
    /// equal to chunk order for indexes below [`MAX_CHUNKS`].
    pub fn spill_path(&self, url: &str, index: u64) -> Result<PathBuf, PathError> {
        let folder = self.folder_of(url)?;
        Ok(folder.join(format!("{}.part{:06}", task_name(url), index)))
    }

    /// Names of all transfers that currently have a working directory.
    pub async fn list_tasks(&self) -> Result<Vec<String>, PathError> {
        let mut entries = match tokio::fs::read_dir(&self.root).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut tasks = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            if entry.file_type().await?.is_dir() {
                tasks.push(entry.file_name().to_string_lossy().into_owned());
            }
        }
        tasks.sort();
        Ok(tasks)
    }
}

/// The task name of a transfer is the last path element of its URL, so a
/// raw URL and its bare task name resolve to the same working directory.
pub fn task_name(url_or_task: &str) -> String {
    if url_or_task.is_empty() {
        return ".".to_string();
    }
    let trimmed = url_or_task.trim_end_matches('/');
    if trimmed.is_empty() {
        return "/".to_string();
    }
    match trimmed.rsplit_once('/') {
        Some((_, base)) => base.to_string(),
        None => trimmed.to_string(),
    }
}

/// Lexically resolves `.` and `..` without touching the filesystem.
fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}
