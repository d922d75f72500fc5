//! Core workflow logic
//!
//! Domain models, configuration, the HTTP fetch seam, progress aggregation,
//! the command router and the attach/download/combine workflow itself.

pub mod config;
pub mod downloader;
pub mod merger;
pub mod models;
pub mod progress_tracker;
pub mod runtime;
pub mod workflow;



// Re-export commonly used types
pub use config::WorkflowConfig;
pub use downloader::{DownloadClient, HttpDownloader};
pub use workflow::{Workflow, WorkflowListener};
