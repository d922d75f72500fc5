//! HTTP 下载客户端
//!
//! The workflow talks to the network only through [`DownloadClient`]: fetch
//! one URL into one destination path, reporting cumulative progress and
//! honouring client-initiated cancellation. [`HttpDownloader`] is the
//! reqwest-backed implementation.

use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::Client;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::core::config::WorkflowConfig;
use crate::core::models::FetchError;

/// 进度回调：参数为 (已下载字节数, 预期总字节数)
pub type FetchProgressCallback = Arc<dyn Fn(u64, Option<u64>) + Send + Sync>;

/// Suffix of the in-progress file next to a destination
pub const PART_FILE_SUFFIX: &str = "part";

/// Fetches a single URL to a destination path.
///
/// Implementations must only create `destination` once the body is complete,
/// and must return [`FetchError::Cancelled`] when `cancel` fires so callers
/// can tell caller intent apart from transport failures.
#[async_trait]
pub trait DownloadClient: Send + Sync + 'static {
    async fn fetch(
        &self,
        url: &Url,
        destination: &Path,
        progress: FetchProgressCallback,
        cancel: CancellationToken,
    ) -> Result<PathBuf, FetchError>;
}

/// Progress callback that ignores every update
pub fn no_progress() -> FetchProgressCallback {
    Arc::new(|_, _| {})
}

/// reqwest 下载引擎
#[derive(Clone)]
pub struct HttpDownloader {
    client: Client,
}

impl HttpDownloader {
    /// 创建新的下载器实例
    pub fn new(config: &WorkflowConfig) -> Result<Self, FetchError> {
        let mut headers = HeaderMap::new();
        for (name, value) in &config.headers {
            match (
                HeaderName::from_bytes(name.as_bytes()),
                HeaderValue::from_str(value),
            ) {
                (Ok(name), Ok(value)) => {
                    headers.insert(name, value);
                }
                _ => tracing::warn!("Skipping invalid request header: {}", name),
            }
        }

        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .user_agent(&config.user_agent)
            .default_headers(headers)
            .build()?;

        Ok(Self { client })
    }

    fn part_path(destination: &Path) -> PathBuf {
        let mut name = destination
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(".");
        name.push(PART_FILE_SUFFIX);
        destination.with_file_name(name)
    }

    async fn stream_to_part(
        &self,
        url: &Url,
        part_path: &Path,
        progress: &FetchProgressCallback,
        cancel: &CancellationToken,
    ) -> Result<u64, FetchError> {
        let response = self.client.get(url.clone()).send().await?;

        if !response.status().is_success() {
            return Err(FetchError::Status {
                status: response.status().as_u16(),
                url: url.to_string(),
            });
        }

        let expected = response.content_length();
        let mut file = File::create(part_path).await?;
        let mut stream = response.bytes_stream();
        let mut downloaded = 0u64;

        while let Some(chunk) = stream.next().await {
            if cancel.is_cancelled() {
                return Err(FetchError::Cancelled);
            }

            let chunk = chunk?;
            file.write_all(&chunk).await?;
            downloaded += chunk.len() as u64;
            progress(downloaded, expected);
        }

        // 确保文件数据写入磁盘
        file.flush().await?;
        file.sync_all().await?;
        Ok(downloaded)
    }
}

#[async_trait]
impl DownloadClient for HttpDownloader {
    async fn fetch(
        &self,
        url: &Url,
        destination: &Path,
        progress: FetchProgressCallback,
        cancel: CancellationToken,
    ) -> Result<PathBuf, FetchError> {
        let part_path = Self::part_path(destination);
        tracing::debug!("GET {} -> {}", url, destination.display());

        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(FetchError::Cancelled),
            result = self.stream_to_part(url, &part_path, &progress, &cancel) => result,
        };

        match result {
            Ok(bytes) => {
                tokio::fs::rename(&part_path, destination).await?;
                tracing::debug!("文件下载完成: {} ({} 字节)", destination.display(), bytes);
                Ok(destination.to_path_buf())
            }
            Err(e) => {
                let _ = tokio::fs::remove_file(&part_path).await;
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_downloader_creation() {
        let mut config = WorkflowConfig::default();
        config
            .headers
            .insert("Referer".to_string(), "https://example.com/".to_string());
        config
            .headers
            .insert("bad header".to_string(), "value".to_string());

        assert!(HttpDownloader::new(&config).is_ok());
    }

    #[test]
    fn test_part_path_sits_next_to_destination() {
        let part = HttpDownloader::part_path(Path::new("/ws/lesson/ts/0001.ts"));
        assert_eq!(part, Path::new("/ws/lesson/ts/0001.ts.part"));
    }

    #[tokio::test]
    async fn test_cancelled_fetch_leaves_no_destination() {
        let dir = tempdir().unwrap();
        let destination = dir.path().join("segment.ts");
        let downloader = HttpDownloader::new(&WorkflowConfig::default()).unwrap();

        let cancel = CancellationToken::new();
        cancel.cancel();

        // 10.255.255.1 is non-routable, the request can only end through cancellation
        let url = Url::parse("http://10.255.255.1/segment.ts").unwrap();
        let result = downloader
            .fetch(&url, &destination, no_progress(), cancel)
            .await;

        assert!(matches!(result, Err(FetchError::Cancelled)));
        assert!(!destination.exists());
        assert!(!HttpDownloader::part_path(&destination).exists());
    }

    #[tokio::test]
    async fn test_cancel_mid_stream_removes_part_file() {
        use tokio::io::AsyncReadExt;
        use tokio::net::TcpListener;
        use tokio::sync::Notify;
        use tokio::time::timeout;

        // serves 10 of 100 promised bytes, then stalls
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut request = [0u8; 1024];
            let _ = socket.read(&mut request).await;
            socket
                .write_all(b"HTTP/1.1 200 OK\r\nContent-Length: 100\r\n\r\n0123456789")
                .await
                .unwrap();
            socket.flush().await.unwrap();
            tokio::time::sleep(Duration::from_secs(30)).await;
        });

        let dir = tempdir().unwrap();
        let destination = dir.path().join("0.ts");
        let part = HttpDownloader::part_path(&destination);
        let downloader = HttpDownloader {
            client: Client::builder().no_proxy().build().unwrap(),
        };

        let first_chunk = Arc::new(Notify::new());
        let progress: FetchProgressCallback = {
            let first_chunk = Arc::clone(&first_chunk);
            Arc::new(move |_, _| first_chunk.notify_one())
        };
        let cancel = CancellationToken::new();
        let url = Url::parse(&format!("http://{}/0.ts", addr)).unwrap();

        let fetch = {
            let cancel = cancel.clone();
            let destination = destination.clone();
            tokio::spawn(async move { downloader.fetch(&url, &destination, progress, cancel).await })
        };

        timeout(Duration::from_secs(5), first_chunk.notified())
            .await
            .unwrap();
        assert!(part.exists());

        cancel.cancel();
        let result = timeout(Duration::from_secs(5), fetch).await.unwrap().unwrap();

        assert!(matches!(result, Err(FetchError::Cancelled)));
        assert!(!part.exists());
        assert!(!destination.exists());
        server.abort();
    }
}
