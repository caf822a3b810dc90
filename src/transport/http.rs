//! HTTP transport
//!
//! Streams a GET response into `<destination>.<job>.part`, renaming it into place
//! only after the body was fully written and synced. Partial files are
//! removed on failure or cancellation; transfers always start from zero.

use super::{JobRegistry, ProgressFn, TransferHandle, TransferRequest, Transport};
use crate::config::QueueConfig;
use crate::error::{NetworkErrorKind, QueueError, Result, StorageErrorKind};
use crate::protocol::JobId;
use async_trait::async_trait;
use futures::{FutureExt, StreamExt};
use reqwest::{Client, Response, StatusCode};
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;
use url::Url;

/// reqwest-backed [`Transport`]
pub struct HttpTransport {
    client: Client,
    user_agent: String,
    progress_interval: Duration,
    jobs: Arc<JobRegistry>,
}

impl HttpTransport {
    /// Create a transport from the queue configuration
    pub fn new(config: &QueueConfig) -> Result<Self> {
        let http = &config.http;
        let mut builder = Client::builder()
            .connect_timeout(Duration::from_secs(http.connect_timeout))
            .read_timeout(Duration::from_secs(http.read_timeout))
            .redirect(reqwest::redirect::Policy::limited(http.max_redirects))
            .danger_accept_invalid_certs(http.accept_invalid_certs);

        if let Some(ref proxy_url) = http.proxy_url {
            let proxy = reqwest::Proxy::all(proxy_url)
                .map_err(|e| QueueError::Internal(format!("Invalid proxy URL: {}", e)))?;
            builder = builder.proxy(proxy);
        }

        let client = builder
            .build()
            .map_err(|e| QueueError::Internal(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            user_agent: http.user_agent.clone(),
            progress_interval: config.progress_interval(),
            jobs: Arc::new(JobRegistry::new()),
        })
    }

    /// Number of transfers still running
    pub fn active_jobs(&self) -> usize {
        self.jobs.len()
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn transfer(&self, request: TransferRequest) -> Result<TransferHandle> {
        let url = Url::parse(&request.source)?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(QueueError::invalid_input(
                "source",
                format!("Unsupported scheme: {}", url.scheme()),
            ));
        }

        let (job_id, token) = self.jobs.register();
        let job = HttpJob {
            job_id,
            client: self.client.clone(),
            url,
            destination: request.destination,
            headers: request.headers,
            user_agent: self.user_agent.clone(),
            progress_interval: self.progress_interval,
            on_progress: request.on_progress,
            cancel_token: token,
        };

        let jobs = self.jobs.clone();
        let task = tokio::spawn(async move {
            let result = job.run().await;
            jobs.finish(job_id);
            result
        });

        let completion = async move {
            task.await
                .map_err(|e| QueueError::Internal(format!("Transfer task failed: {}", e)))?
        }
        .boxed();

        tracing::debug!(%job_id, "Transfer accepted");
        Ok(TransferHandle { job_id, completion })
    }

    async fn cancel(&self, job_id: JobId) {
        if self.jobs.cancel(job_id) {
            tracing::debug!(%job_id, "Transfer cancelled");
        }
    }
}

impl Drop for HttpTransport {
    fn drop(&mut self) {
        self.jobs.cancel_all();
    }
}

struct HttpJob {
    job_id: JobId,
    client: Client,
    url: Url,
    destination: PathBuf,
    headers: Vec<(String, String)>,
    user_agent: String,
    progress_interval: Duration,
    on_progress: ProgressFn,
    cancel_token: CancellationToken,
}

impl HttpJob {
    async fn run(self) -> Result<u16> {
        let mut request = self
            .client
            .get(self.url.clone())
            .header("User-Agent", self.user_agent.as_str());
        for (name, value) in &self.headers {
            request = request.header(name.as_str(), value.as_str());
        }

        let response = tokio::select! {
            response = request.send() => response?,
            _ = self.cancel_token.cancelled() => return Err(QueueError::Cancelled),
        };

        // Only a plain 200 counts as success; anything else leaves no file behind
        let status = response.status();
        if status != StatusCode::OK {
            tracing::debug!(url = %self.url, %status, "Transfer rejected by server");
            return Ok(status.as_u16());
        }

        if let Some(parent) = self.destination.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                tokio::fs::create_dir_all(parent).await.map_err(|e| {
                    QueueError::storage(
                        StorageErrorKind::Io,
                        parent,
                        format!("Failed to create directory: {}", e),
                    )
                })?;
            }
        }

        let part_path = part_path(&self.destination, self.job_id);
        let file = File::create(&part_path).await.map_err(|e| {
            QueueError::storage(
                StorageErrorKind::Io,
                &part_path,
                format!("Failed to create file: {}", e),
            )
        })?;

        let total = response.content_length();
        match self.stream_to_file(response, file, total).await {
            Ok(()) => {
                tokio::fs::rename(&part_path, &self.destination)
                    .await
                    .map_err(|e| {
                        QueueError::storage(
                            StorageErrorKind::Io,
                            &self.destination,
                            format!("Failed to rename file: {}", e),
                        )
                    })?;
                Ok(status.as_u16())
            }
            Err(e) => {
                // No resume support, so the partial file is useless
                let _ = tokio::fs::remove_file(&part_path).await;
                Err(e)
            }
        }
    }

    /// Stream response body to file with throttled progress
    async fn stream_to_file(
        &self,
        response: Response,
        mut file: File,
        total: Option<u64>,
    ) -> Result<()> {
        let mut stream = response.bytes_stream();
        let mut written: u64 = 0;
        let mut last_update = Instant::now();

        while let Some(chunk_result) = tokio::select! {
            chunk = stream.next() => chunk,
            _ = self.cancel_token.cancelled() => {
                file.flush().await.ok();
                return Err(QueueError::Cancelled);
            }
        } {
            let chunk: bytes::Bytes = chunk_result.map_err(|e: reqwest::Error| {
                QueueError::network(NetworkErrorKind::ConnectionReset, format!("Stream error: {}", e))
            })?;

            file.write_all(&chunk).await.map_err(|e| {
                QueueError::storage(
                    StorageErrorKind::Io,
                    PathBuf::new(),
                    format!("Failed to write: {}", e),
                )
            })?;
            written += chunk.len() as u64;

            let now = Instant::now();
            if now.duration_since(last_update) >= self.progress_interval {
                (self.on_progress)(written, total);
                last_update = now;
            }
        }

        file.flush().await.map_err(|e| {
            QueueError::storage(
                StorageErrorKind::Io,
                PathBuf::new(),
                format!("Failed to flush: {}", e),
            )
        })?;
        file.sync_all().await.map_err(|e| {
            QueueError::storage(
                StorageErrorKind::Io,
                PathBuf::new(),
                format!("Failed to sync: {}", e),
            )
        })?;

        (self.on_progress)(written, total);

        if let Some(expected) = total {
            if written < expected {
                return Err(QueueError::network(
                    NetworkErrorKind::Other,
                    format!(
                        "Incomplete download: received {} bytes, expected {} bytes",
                        written, expected
                    ),
                ));
            }
        }

        Ok(())
    }
}

/// `<destination>.<job>.part`. A job never shares its partial file, so a
/// cancelled job's cleanup cannot remove the file of a newer job.
fn part_path(destination: &Path, job_id: JobId) -> PathBuf {
    let mut name = destination
        .file_name()
        .map(OsString::from)
        .unwrap_or_default();
    name.push(format!(".{}.part", job_id.get()));
    destination.with_file_name(name)
}
