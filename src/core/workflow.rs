//! Playlist workflow: attach → download → combine
//!
//! One [`Workflow`] drives one playlist URL inside one workspace directory.
//!
//! - `attach` resolves the playlist, either from the resume marker on disk or
//!   by fetching and parsing it, and persists the resulting [`WorkflowState`].
//! - `download` fetches every segment sequentially. Segments already on disk
//!   are skipped, failed requests are retried in place, and progress is
//!   sampled on a fixed cadence.
//! - `combine` concatenates the segments in playlist order into
//!   `<name>.ts` and removes the segments directory and the resume marker.
//!
//! Download and combine run on a capacity-1 queue (see
//! [`crate::core::runtime`]); every callback is delivered from one dispatcher
//! task. `cancel` stops the running unit and drops queued ones but leaves all
//! on-disk artifacts in place so a later attach + download resumes.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::RwLock;
use tokio::runtime::Handle;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use url::Url;

use crate::core::config::WorkflowConfig;
use crate::core::downloader::{no_progress, DownloadClient, FetchProgressCallback, HttpDownloader};
use crate::core::merger::merge_segments;
use crate::core::models::{
    CacheError, DownloadProgress, WorkflowError, WorkflowPhase, WorkflowResult, WorkflowState,
    WorkspaceLayout,
};
use crate::core::progress_tracker::{progress_interval, ProgressAggregator, ProgressSample};
use crate::core::runtime::{CallbackDispatcher, DropReason, WorkQueue, WorkflowCommand};
use crate::parsers::m3u8_parser::parse_segment_list;
use crate::utils::file_utils;
use crate::utils::validation::{derive_base_uri, derive_name, validate_playlist_url};

/// Progress callback: (cumulative progress, bytes completed since the previous sample)
pub type ProgressCallback = Arc<dyn Fn(DownloadProgress, u64) + Send + Sync>;

/// One-shot phase completion
pub type Completion<T> = Box<dyn FnOnce(WorkflowResult<T>) + Send + 'static>;

/// Observer notified once the workflow's queue drains.
///
/// Held as a [`Weak`] reference; the owner of the listener decides its lifetime.
pub trait WorkflowListener: Send + Sync {
    fn workflow_finished(&self, name: &str);
}

/// State shared between the public handle, the attach task and the router.
pub struct WorkflowCore {
    config: WorkflowConfig,
    client: Arc<dyn DownloadClient>,
    source_url: Url,
    base_uri: Url,
    name: String,
    layout: WorkspaceLayout,
    state: RwLock<Option<Arc<WorkflowState>>>,
    phase: RwLock<WorkflowPhase>,
    dispatcher: CallbackDispatcher,
}

impl WorkflowCore {
    fn set_phase(&self, phase: WorkflowPhase) {
        let mut current = self.phase.write();
        if *current == phase {
            return;
        }
        if !current.can_transition_to(phase) {
            debug!("{}: ignoring {:?} -> {:?}", self.name, *current, phase);
            return;
        }
        debug!("{}: {:?} -> {:?}", self.name, *current, phase);
        *current = phase;
    }

    fn mark_cancelled(&self) {
        let mut current = self.phase.write();
        if !current.is_terminal() {
            debug!("{}: {:?} -> Cancelled", self.name, *current);
            *current = WorkflowPhase::Cancelled;
        }
    }

    /// Refuse to start work on a cancelled or combined workflow. A failed one
    /// only accepts a fresh attach.
    fn admit(&self, operation: &str, retries_failed: bool) -> WorkflowResult<()> {
        match *self.phase.read() {
            WorkflowPhase::Cancelled => Err(WorkflowError::Cancelled),
            WorkflowPhase::Combined => Err(WorkflowError::Logic(format!(
                "{} after the workflow was combined",
                operation
            ))),
            WorkflowPhase::Failed if !retries_failed => Err(WorkflowError::Logic(format!(
                "{} after the workflow failed; attach again first",
                operation
            ))),
            _ => Ok(()),
        }
    }

    fn finish_phase<T>(&self, result: &WorkflowResult<T>, success: WorkflowPhase) {
        match result {
            Ok(_) => self.set_phase(success),
            Err(e) if e.is_cancelled() => self.set_phase(WorkflowPhase::Cancelled),
            Err(_) => self.set_phase(WorkflowPhase::Failed),
        }
    }

    fn required_state(&self, operation: &str) -> WorkflowResult<Arc<WorkflowState>> {
        self.state.read().clone().ok_or_else(|| {
            WorkflowError::Logic(format!("{} requires a successful attach", operation))
        })
    }

    pub(crate) async fn run_attach(
        &self,
        cancel: CancellationToken,
    ) -> WorkflowResult<Arc<WorkflowState>> {
        self.admit("attach", true)?;
        let result = self.attach_inner(cancel).await;
        self.finish_phase(&result, WorkflowPhase::Attached);
        result
    }

    async fn attach_inner(&self, cancel: CancellationToken) -> WorkflowResult<Arc<WorkflowState>> {
        let cache_file = self.layout.cache_file();

        if file_utils::path_exists(&cache_file).await? {
            let bytes = file_utils::read_file(&cache_file).await?;
            let state: WorkflowState =
                serde_json::from_slice(&bytes).map_err(CacheError::Serialization)?;
            if state.source_url != self.source_url {
                warn!(
                    "Workspace {} was created for {}, resuming it for {}",
                    self.layout.dir().display(),
                    state.source_url,
                    self.source_url
                );
            }

            info!(
                "♻️ Resuming {} from cache: {} segments",
                self.name,
                state.segments.len()
            );
            let state = Arc::new(state);
            *self.state.write() = Some(Arc::clone(&state));
            return Ok(state);
        }

        info!("📥 Attaching playlist: {}", self.source_url);
        file_utils::ensure_dir_exists(self.layout.dir()).await?;
        file_utils::write_file(&self.layout.url_file(), self.source_url.as_str()).await?;

        let temp_playlist = self.layout.temp_playlist_file();
        self.client
            .fetch(&self.source_url, &temp_playlist, no_progress(), cancel)
            .await?;

        let content = file_utils::read_to_string(&temp_playlist).await?;
        let list = parse_segment_list(&content)?;

        let state = WorkflowState::new(
            self.source_url.clone(),
            self.base_uri.clone(),
            self.name.clone(),
            list.segments,
            list.total_size,
        );

        let encoded = serde_json::to_vec(&state).map_err(CacheError::Serialization)?;
        file_utils::write_file(&self.layout.cache_file(), encoded).await?;
        file_utils::ensure_dir_exists(&self.layout.segments_dir(&state)).await?;
        file_utils::remove_path(&temp_playlist).await?;

        info!(
            "✅ Attached {}: {} segments, {} bytes declared",
            self.name,
            state.segments.len(),
            state.total_size
        );

        let state = Arc::new(state);
        *self.state.write() = Some(Arc::clone(&state));
        Ok(state)
    }

    pub(crate) async fn run_download(
        &self,
        on_progress: ProgressCallback,
        cancel: CancellationToken,
    ) -> WorkflowResult<PathBuf> {
        let result = match self
            .admit("download", false)
            .and_then(|_| self.required_state("download"))
        {
            Ok(state) => {
                self.set_phase(WorkflowPhase::Downloading);
                self.download_segments(&state, &on_progress, &cancel).await
            }
            Err(e) => Err(e),
        };

        match &result {
            Ok(dir) => info!("✅ All segments downloaded into {}", dir.display()),
            Err(e) if e.is_cancelled() => info!("🚫 Download of {} cancelled", self.name),
            Err(e) => error!("❌ Download of {} failed: {}", self.name, e),
        }
        self.finish_phase(&result, WorkflowPhase::Downloaded);
        result
    }

    fn emit_progress(&self, on_progress: &ProgressCallback, sample: ProgressSample) {
        let on_progress = Arc::clone(on_progress);
        self.dispatcher
            .dispatch(move || on_progress(sample.progress, sample.delta));
    }

    /// Sequential fetch loop. The waiting list, the progress records and the
    /// sampler all live on this one task; dropping them is the cleanup.
    async fn download_segments(
        &self,
        state: &WorkflowState,
        on_progress: &ProgressCallback,
        cancel: &CancellationToken,
    ) -> WorkflowResult<PathBuf> {
        let segments_dir = self.layout.segments_dir(state);
        file_utils::ensure_dir_exists(&segments_dir).await?;

        let mut waiting: VecDeque<String> = state.segments.iter().cloned().collect();
        let mut aggregator = ProgressAggregator::new(state.total_size);
        let mut ticker =
            progress_interval(Duration::from_millis(self.config.progress_interval_ms));
        let (progress_tx, mut progress_rx) = mpsc::unbounded_channel::<(String, u64, Option<u64>)>();

        info!(
            "开始下载 {} 个片段 -> {}",
            waiting.len(),
            segments_dir.display()
        );

        while let Some(segment) = waiting.pop_front() {
            if cancel.is_cancelled() {
                return Err(WorkflowError::Cancelled);
            }

            let url = state.segment_url(&segment).map_err(|e| {
                WorkflowError::InvalidContent(format!("segment path {}: {}", segment, e))
            })?;
            let destination = self.layout.segment_file(state, &segment);

            if file_utils::is_regular_file(&destination).await? {
                let size = file_utils::file_size(&destination).await?;
                debug!("⏭️ Segment already on disk: {} ({} bytes)", segment, size);
                aggregator.mark_finished(&segment, size);
                continue;
            }

            let progress: FetchProgressCallback = {
                let tx = progress_tx.clone();
                let segment = segment.clone();
                Arc::new(move |completed, expected| {
                    let _ = tx.send((segment.clone(), completed, expected));
                })
            };

            debug!("GET segment {}", url);
            let mut fetch = self
                .client
                .fetch(&url, &destination, progress, cancel.clone());

            // the client observes `cancel` itself and cleans up its partial file
            let outcome = loop {
                tokio::select! {
                    result = &mut fetch => break result,
                    Some((seg, completed, expected)) = progress_rx.recv() => {
                        aggregator.update(&seg, completed, expected);
                    }
                    _ = ticker.tick() => self.emit_progress(on_progress, aggregator.sample()),
                }
            };

            match outcome {
                Ok(path) => {
                    let size = file_utils::file_size(&path).await?;
                    debug!("片段下载完成: {} ({} bytes)", segment, size);
                    aggregator.mark_finished(&segment, size);
                }
                Err(e) if e.is_cancelled() => {
                    // an external cancel owns the workflow now
                    return Err(WorkflowError::Cancelled);
                }
                Err(e) => {
                    warn!("🔁 片段下载失败，立即重试: {} - {}", segment, e);
                    waiting.push_front(segment);
                }
            }
        }

        self.emit_progress(on_progress, aggregator.sample());
        Ok(segments_dir)
    }

    pub(crate) async fn run_combine(&self) -> WorkflowResult<PathBuf> {
        let result = match self
            .admit("combine", false)
            .and_then(|_| self.required_state("combine"))
        {
            Ok(state) => {
                self.set_phase(WorkflowPhase::Combining);
                self.combine_segments(state).await
            }
            Err(e) => Err(e),
        };

        match &result {
            Ok(path) => info!("🎬 Combined {} into {}", self.name, path.display()),
            Err(e) => error!("❌ Combine of {} failed: {}", self.name, e),
        }
        self.finish_phase(&result, WorkflowPhase::Combined);
        result
    }

    async fn combine_segments(&self, state: Arc<WorkflowState>) -> WorkflowResult<PathBuf> {
        let layout = self.layout.clone();
        let buffer_size = self.config.buffer_size;
        let segments_dir = layout.segments_dir(&state);

        let merge_state = Arc::clone(&state);
        let output = tokio::task::spawn_blocking(move || {
            merge_segments(&layout, &merge_state, buffer_size)
        })
        .await
        .map_err(|e| WorkflowError::Logic(format!("combine worker failed: {}", e)))??;

        file_utils::remove_path(&segments_dir).await?;
        file_utils::remove_path(&self.layout.cache_file()).await?;
        Ok(output)
    }
}

/// Public handle of one playlist workflow.
pub struct Workflow {
    core: Arc<WorkflowCore>,
    queue: WorkQueue,
}

impl Workflow {
    /// Create a workflow for `playlist_url`. Must be called inside a tokio runtime.
    pub fn new(
        playlist_url: &str,
        config: WorkflowConfig,
        client: Arc<dyn DownloadClient>,
    ) -> WorkflowResult<Self> {
        let handle = Handle::try_current().map_err(|_| {
            WorkflowError::Logic("Workflow requires a running tokio runtime".to_string())
        })?;

        let source_url = validate_playlist_url(playlist_url)?;
        let name = derive_name(&source_url)?;
        let base_uri = derive_base_uri(&source_url)?;
        let layout = WorkspaceLayout::new(&config.workspace_root, &name);
        let dispatcher = CallbackDispatcher::spawn(&handle);

        let core = Arc::new(WorkflowCore {
            config,
            client,
            source_url,
            base_uri,
            name: name.clone(),
            layout,
            state: RwLock::new(None),
            phase: RwLock::new(WorkflowPhase::Detached),
            dispatcher: dispatcher.clone(),
        });
        let queue = WorkQueue::spawn(handle, Arc::clone(&core), dispatcher, name);

        Ok(Self { core, queue })
    }

    /// Create a workflow backed by the reqwest [`HttpDownloader`]
    pub fn with_http_client(playlist_url: &str, config: WorkflowConfig) -> WorkflowResult<Self> {
        let client = HttpDownloader::new(&config)?;
        Self::new(playlist_url, config, Arc::new(client))
    }

    pub fn name(&self) -> &str {
        &self.core.name
    }

    pub fn source_url(&self) -> &Url {
        &self.core.source_url
    }

    pub fn workspace_dir(&self) -> &Path {
        self.core.layout.dir()
    }

    pub fn layout(&self) -> &WorkspaceLayout {
        &self.core.layout
    }

    pub fn phase(&self) -> WorkflowPhase {
        *self.core.phase.read()
    }

    /// State resolved by the last successful attach
    pub fn state(&self) -> Option<Arc<WorkflowState>> {
        self.core.state.read().clone()
    }

    pub fn set_listener(&self, listener: Weak<dyn WorkflowListener>) {
        self.queue.set_listener(listener);
    }

    /// Resolve the playlist. Suspends the queue until it succeeds; on failure
    /// everything queued behind it is dropped with `WorkflowError::Cancelled`.
    pub fn attach<F>(&self, completion: F)
    where
        F: FnOnce(WorkflowResult<Arc<WorkflowState>>) + Send + 'static,
    {
        self.queue.suspend();
        self.queue.begin_unit();

        let core = Arc::clone(&self.core);
        let queue = self.queue.clone();
        let token = self.queue.current_token();

        self.queue.handle().spawn(async move {
            let result = core.run_attach(token.clone()).await;
            match &result {
                Ok(_) => queue.resume(),
                Err(e) if e.is_cancelled() || token.is_cancelled() => {
                    // later units run and are refused by the cancelled phase
                    debug!("Attach of {} cancelled", core.name);
                    queue.resume();
                }
                Err(e) => {
                    error!("❌ Attach of {} failed: {}", core.name, e);
                    queue.cancel_queued(DropReason::AttachFailed);
                }
            }
            queue.deliver(&token, Box::new(completion), result);
            queue.finish_unit();
        });
    }

    /// Queue the segment download. `on_progress` fires once per sampling period
    /// and once more at the end; `completion` receives the segments directory.
    pub fn download<P, F>(&self, on_progress: P, completion: F)
    where
        P: Fn(DownloadProgress, u64) + Send + Sync + 'static,
        F: FnOnce(WorkflowResult<PathBuf>) + Send + 'static,
    {
        self.queue.enqueue(WorkflowCommand::Download {
            on_progress: Arc::new(on_progress),
            respond_to: Box::new(completion),
        });
    }

    /// Queue the combine step; `completion` receives the output file path
    pub fn combine<F>(&self, completion: F)
    where
        F: FnOnce(WorkflowResult<PathBuf>) + Send + 'static,
    {
        self.queue.enqueue(WorkflowCommand::Combine {
            respond_to: Box::new(completion),
        });
    }

    /// Stop the running unit and drop queued ones. On-disk artifacts stay.
    ///
    /// A cancelled workflow stays cancelled: later phases complete with
    /// `WorkflowError::Cancelled` without touching the network. Idempotent.
    pub fn cancel(&self) {
        info!("🚫 Cancelling workflow {}", self.core.name);
        self.core.mark_cancelled();
        self.queue.cancel_all();
    }

    pub async fn attach_async(&self) -> WorkflowResult<Arc<WorkflowState>> {
        let (tx, rx) = oneshot::channel();
        self.attach(move |result| {
            let _ = tx.send(result);
        });
        rx.await.unwrap_or(Err(WorkflowError::Cancelled))
    }

    pub async fn download_async<P>(&self, on_progress: P) -> WorkflowResult<PathBuf>
    where
        P: Fn(DownloadProgress, u64) + Send + Sync + 'static,
    {
        let (tx, rx) = oneshot::channel();
        self.download(on_progress, move |result| {
            let _ = tx.send(result);
        });
        rx.await.unwrap_or(Err(WorkflowError::Cancelled))
    }

    pub async fn combine_async(&self) -> WorkflowResult<PathBuf> {
        let (tx, rx) = oneshot::channel();
        self.combine(move |result| {
            let _ = tx.send(result);
        });
        rx.await.unwrap_or(Err(WorkflowError::Cancelled))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::models::FetchError;
    use async_trait::async_trait;
    use tempfile::tempdir;

    struct UnreachableClient;

    #[async_trait]
    impl DownloadClient for UnreachableClient {
        async fn fetch(
            &self,
            url: &Url,
            _destination: &Path,
            _progress: FetchProgressCallback,
            _cancel: CancellationToken,
        ) -> Result<PathBuf, FetchError> {
            panic!("unexpected request for {}", url);
        }
    }

    #[tokio::test]
    async fn test_new_derives_name_and_workspace() {
        let dir = tempdir().unwrap();
        let workflow = Workflow::new(
            "https://cdn.example.com/course/lesson-07.m3u8",
            WorkflowConfig::with_workspace(dir.path()),
            Arc::new(UnreachableClient),
        )
        .unwrap();

        assert_eq!(workflow.name(), "lesson-07");
        assert_eq!(workflow.workspace_dir(), dir.path().join("lesson-07"));
        assert_eq!(workflow.phase(), WorkflowPhase::Detached);
        assert!(workflow.state().is_none());
    }

    #[tokio::test]
    async fn test_new_rejects_invalid_url() {
        let result = Workflow::new(
            "https://cdn.example.com/",
            WorkflowConfig::default(),
            Arc::new(UnreachableClient),
        );
        assert!(matches!(result, Err(WorkflowError::InvalidUrl(_))));
    }

    #[test]
    fn test_new_requires_runtime() {
        let result = Workflow::new(
            "https://cdn.example.com/a.m3u8",
            WorkflowConfig::default(),
            Arc::new(UnreachableClient),
        );
        assert!(matches!(result, Err(WorkflowError::Logic(_))));
    }

    #[tokio::test]
    async fn test_download_before_attach_is_logic_error() {
        let dir = tempdir().unwrap();
        let workflow = Workflow::new(
            "https://cdn.example.com/a.m3u8",
            WorkflowConfig::with_workspace(dir.path()),
            Arc::new(UnreachableClient),
        )
        .unwrap();

        let result = workflow.download_async(|_, _| {}).await;
        assert!(matches!(result, Err(WorkflowError::Logic(_))));
        assert_eq!(workflow.phase(), WorkflowPhase::Failed);

        let result = workflow.combine_async().await;
        assert!(matches!(result, Err(WorkflowError::Logic(_))));
    }

    #[tokio::test]
    async fn test_corrupt_cache_is_cache_error_without_network() {
        let dir = tempdir().unwrap();
        let workflow = Workflow::new(
            "https://cdn.example.com/a.m3u8",
            WorkflowConfig::with_workspace(dir.path()),
            Arc::new(UnreachableClient),
        )
        .unwrap();

        std::fs::create_dir_all(workflow.workspace_dir()).unwrap();
        std::fs::write(workflow.layout().cache_file(), b"{ not json").unwrap();

        let result = workflow.attach_async().await;
        assert!(matches!(result, Err(WorkflowError::Cache(_))));
        assert_eq!(workflow.phase(), WorkflowPhase::Failed);
    }
}
