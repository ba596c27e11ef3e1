pub mod config;
pub mod downloader;
pub mod integrity;
pub mod joiner;
pub mod limiter;
pub mod manager;
pub mod models;
pub mod planner;
pub mod probe;
pub mod progress;
pub mod queue;
pub mod state_manager;
pub mod transport;
pub mod workspace;

/// Convenient type alias exposing common structs.
pub mod prelude {
    pub use crate::config::Config;
    pub use crate::downloader::{ChunkFetcher, DownloadError, FetchContext, FetchSignal};
    pub use crate::joiner::join_files;
    pub use crate::limiter::{parse_rate, SpeedLimiter};
    pub use crate::manager::{ManagerError, Transfer, TransferCoordinator, TransferOutcome};
    pub use crate::models::{Chunk, TransferState};
    pub use crate::planner::plan;
    pub use crate::probe::{probe, Capability};
    pub use crate::queue::DownloadQueue;
    pub use crate::state_manager::{StateError, StateStore};
    pub use crate::transport::ClientSettings;
    pub use crate::workspace::{task_name, Workspace};
}
