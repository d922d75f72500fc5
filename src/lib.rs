//! M3U8 Workflow - Core Library
//!
//! Resumable download of segmented HLS playlists: resolve the playlist once,
//! fetch every segment into a per-playlist workspace, then concatenate them
//! into a single `.ts` file. Interrupted runs pick up where they stopped.

pub mod core;
pub mod parsers;
pub mod utils;

// Re-export commonly used types
pub use core::{
    config::WorkflowConfig,
    downloader::{DownloadClient, FetchProgressCallback, HttpDownloader},
    models::{
        CacheError, DownloadProgress, FetchError, WorkflowError, WorkflowPhase, WorkflowResult,
        WorkflowState, WorkspaceLayout,
    },
    workflow::{Completion, ProgressCallback, Workflow, WorkflowListener},
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");

/// Initialize the library with default settings
pub fn init() -> anyhow::Result<()> {
    utils::logging::init_tracing();
    tracing::info!("📚 {} v{} initialized", NAME, VERSION);
    Ok(())
}
