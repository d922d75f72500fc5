//! Core data models for the playlist workflow

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use url::Url;

/// Resume marker file name inside a workspace directory
pub const CACHE_FILE_NAME: &str = "m3uObj";

/// Informational file holding the original playlist URL
pub const URL_FILE_NAME: &str = "URL";

/// Fixed temporary path the playlist body is fetched into during attach
pub const TEMP_PLAYLIST_FILE_NAME: &str = "playlist.m3u8.tmp";

/// Extension of the combined output file
pub const OUTPUT_EXTENSION: &str = "ts";

/// Segments directory used when the first segment has no path prefix
pub const DEFAULT_SEGMENTS_DIR: &str = "segments";

/// Persisted model of one playlist workflow.
///
/// Created by the first successful `attach` of a URL and written to the
/// resume marker; reloaded verbatim on later runs. Never mutated once the
/// download phase begins.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowState {
    /// Absolute playlist URL
    pub source_url: Url,
    /// `source_url` with its last path component stripped
    pub base_uri: Url,
    /// Last path component of `source_url` without extension
    pub name: String,
    /// Relative segment paths in playback order
    pub segments: Vec<String>,
    /// Sum of declared `segment_size` values, used as progress denominator
    pub total_size: u64,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

impl WorkflowState {
    pub fn new(source_url: Url, base_uri: Url, name: String, segments: Vec<String>, total_size: u64) -> Self {
        Self {
            source_url,
            base_uri,
            name,
            segments,
            total_size,
            created_at: chrono::Utc::now(),
        }
    }

    /// Directory name for downloaded segments, taken from the first segment's path prefix
    pub fn segments_dir_name(&self) -> &str {
        self.segments
            .first()
            .and_then(|segment| segment.split_once('/'))
            .map(|(prefix, _)| prefix)
            .filter(|prefix| !prefix.is_empty())
            .unwrap_or(DEFAULT_SEGMENTS_DIR)
    }

    /// Absolute URL of a segment, resolved against `base_uri`
    pub fn segment_url(&self, segment: &str) -> Result<Url, url::ParseError> {
        self.base_uri.join(segment)
    }

    /// Local file name of a segment (its final path component)
    pub fn segment_file_name(segment: &str) -> &str {
        segment.rsplit('/').next().unwrap_or(segment)
    }
}

/// On-disk layout of a single workflow under the workspace root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkspaceLayout {
    dir: PathBuf,
    name: String,
}

impl WorkspaceLayout {
    pub fn new(workspace_root: &Path, name: &str) -> Self {
        Self {
            dir: workspace_root.join(name),
            name: name.to_string(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn url_file(&self) -> PathBuf {
        self.dir.join(URL_FILE_NAME)
    }

    pub fn cache_file(&self) -> PathBuf {
        self.dir.join(CACHE_FILE_NAME)
    }

    pub fn temp_playlist_file(&self) -> PathBuf {
        self.dir.join(TEMP_PLAYLIST_FILE_NAME)
    }

    pub fn segments_dir(&self, state: &WorkflowState) -> PathBuf {
        self.dir.join(state.segments_dir_name())
    }

    pub fn segment_file(&self, state: &WorkflowState, segment: &str) -> PathBuf {
        self.segments_dir(state)
            .join(WorkflowState::segment_file_name(segment))
    }

    pub fn output_file(&self) -> PathBuf {
        self.dir.join(format!("{}.{}", self.name, OUTPUT_EXTENSION))
    }
}

/// Lifecycle phase of a workflow instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WorkflowPhase {
    Detached,
    Attached,
    Downloading,
    Downloaded,
    Combining,
    Combined,
    Cancelled,
    Failed,
}

impl WorkflowPhase {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Combined | Self::Cancelled | Self::Failed)
    }

    /// `Cancelled` and `Combined` are absorbing; `Failed` is left only by a
    /// successful re-attach.
    pub fn can_transition_to(&self, next: WorkflowPhase) -> bool {
        match self {
            Self::Cancelled | Self::Combined => false,
            Self::Failed => next == Self::Attached,
            _ => true,
        }
    }
}

/// Aggregate download progress, in bytes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DownloadProgress {
    pub completed: u64,
    pub total: u64,
}

impl DownloadProgress {
    /// Completed fraction (0.0 - 1.0)
    pub fn fraction(&self) -> f64 {
        if self.total == 0 {
            return 0.0;
        }
        (self.completed as f64 / self.total as f64).min(1.0)
    }
}

/// Progress record of a single segment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SegmentProgress {
    pub completed: u64,
    pub expected: Option<u64>,
}

impl SegmentProgress {
    /// Record for a segment that is already fully on disk
    pub fn finished(size: u64) -> Self {
        Self {
            completed: size,
            expected: Some(size),
        }
    }
}

/// Filesystem and (de)serialization failures
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("IO error at {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl CacheError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// Transport-level failures reported by a download client
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("request was cancelled")]
    Cancelled,

    #[error("HTTP status {status} for {url}")]
    Status { status: u16, url: String },

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl FetchError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

/// Workflow error types
#[derive(Debug, thiserror::Error)]
pub enum WorkflowError {
    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),

    #[error("Download error: {0}")]
    Download(#[from] FetchError),

    #[error("Invalid playlist content: {0}")]
    InvalidContent(String),

    #[error("Logic error: {0}")]
    Logic(String),

    #[error("Invalid playlist URL: {0}")]
    InvalidUrl(String),

    #[error("Combine failed at {}: {source}", path.display())]
    Combine {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Operation cancelled")]
    Cancelled,
}

impl WorkflowError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled | Self::Download(FetchError::Cancelled))
    }
}

/// Result type alias for workflow operations
pub type WorkflowResult<T> = Result<T, WorkflowError>;
