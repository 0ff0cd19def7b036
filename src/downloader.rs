// src/downloader.rs

use crate::integrity::{IntegrityError, IntegrityVerifier, Mismatch, VerifyResult};
use crate::models::{CanonicalFile, DownloadTask, TaskState};
use crate::paths::PathError;
use async_trait::async_trait;
use bytes::Bytes;
use futures_util::stream::BoxStream;
use futures_util::StreamExt;
use reqwest::Client;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const USER_AGENT: &str = "Apache-HttpClient/UNAVAILABLE (java 1.4)";

/// Errors raised by the transport while opening or reading a body.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),
    #[error("server answered with status {0}")]
    Status(u16),
    #[error("no data received for {0:?}")]
    Stalled(Duration),
}

/// Terminal failure of one download task.
#[derive(Debug, Error)]
pub enum TransferError {
    #[error("giving up after {attempts} attempts: {source}")]
    Transient {
        attempts: u32,
        #[source]
        source: TransportError,
    },
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("{0}")]
    Integrity(Mismatch),
    #[error("{0}")]
    Path(#[from] PathError),
    #[error("transfer cancelled")]
    Cancelled,
}

impl From<IntegrityError> for TransferError {
    fn from(err: IntegrityError) -> Self {
        match err {
            IntegrityError::Io(e) => TransferError::Io(e),
        }
    }
}

pub type ByteStream = BoxStream<'static, Result<Bytes, TransportError>>;

/// A response body being streamed.
pub struct Body {
    pub content_length: Option<u64>,
    pub stream: ByteStream,
}

/// The network side of a transfer.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn get(&self, url: &str) -> Result<Body, TransportError>;
}

/// [`Transport`] over HTTP(S).
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
}

impl HttpTransport {
    pub fn new(connect_timeout: Duration) -> Result<Self, TransportError> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .connect_timeout(connect_timeout)
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn get(&self, url: &str) -> Result<Body, TransportError> {
        let resp = self.client.get(url).send().await?;
        if !resp.status().is_success() {
            return Err(TransportError::Status(resp.status().as_u16()));
        }
        Ok(Body {
            content_length: resp.content_length(),
            stream: resp
                .bytes_stream()
                .map(|chunk| chunk.map_err(TransportError::from))
                .boxed(),
        })
    }
}

/// How often a failing transfer is retried before it is reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub retries: u32,
    pub delay: Duration,
    /// Longest wait for response headers or for the next chunk of a body.
    pub stall_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            retries: 3,
            delay: Duration::from_secs(2),
            stall_timeout: Duration::from_secs(60),
        }
    }
}

/// Successful end state of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Completion {
    /// The destination already verified; nothing was fetched.
    AlreadyPresent,
    Downloaded { bytes: u64 },
}

enum AttemptError {
    Transport(TransportError),
    Mismatch(Mismatch),
    Fatal(TransferError),
}

impl From<std::io::Error> for AttemptError {
    fn from(err: std::io::Error) -> Self {
        AttemptError::Fatal(err.into())
    }
}

impl From<IntegrityError> for AttemptError {
    fn from(err: IntegrityError) -> Self {
        AttemptError::Fatal(err.into())
    }
}

/// Executes one download task end to end: check, fetch, verify, place.
#[derive(Clone)]
pub struct DownloadWorker {
    transport: Arc<dyn Transport>,
    verifier: IntegrityVerifier,
    retry: RetryPolicy,
    cancel: CancellationToken,
}

impl DownloadWorker {
    pub fn new(
        transport: Arc<dyn Transport>,
        verifier: IntegrityVerifier,
        retry: RetryPolicy,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            transport,
            verifier,
            retry,
            cancel,
        }
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Runs `task` to a terminal state. A destination that already verifies is
    /// left untouched and costs no network traffic.
    pub async fn run(&self, task: &mut DownloadTask) -> Result<Completion, TransferError> {
        let result = self.check_then_fetch(task).await;
        task.state = match &result {
            Ok(_) => TaskState::Done,
            Err(e) => TaskState::Failed(Some(e.to_string())),
        };
        result
    }

    async fn check_then_fetch(&self, task: &mut DownloadTask) -> Result<Completion, TransferError> {
        task.state = TaskState::Verifying;
        match self.verifier.verify(&task.destination, &task.file).await? {
            VerifyResult::Match => {
                debug!(path = %task.destination.display(), "already downloaded");
                return Ok(Completion::AlreadyPresent);
            }
            VerifyResult::Missing => {}
            VerifyResult::Mismatch(mismatch) => {
                warn!(path = %task.destination.display(), "{mismatch}, downloading again");
            }
        }
        self.fetch(task).await
    }

    /// Streams the remote body into a temporary file next to the destination,
    /// verifies it, then renames it into place.
    pub async fn fetch(&self, task: &mut DownloadTask) -> Result<Completion, TransferError> {
        if let Some(parent) = task.destination.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let temp = task.temporary_path();
        let mut network_failures = 0;
        let mut refetched_after_mismatch = false;

        loop {
            if self.cancel.is_cancelled() {
                return Err(TransferError::Cancelled);
            }
            task.attempt_count += 1;
            task.state = TaskState::InFlight;
            debug!(file = %task.file.file_name, attempt = task.attempt_count, "download start");

            let mismatch = match self.attempt(task, &temp).await {
                Ok(bytes) => {
                    info!(
                        path = %task.destination.display(),
                        size = %crate::models::human_size(bytes),
                        "downloaded"
                    );
                    return Ok(Completion::Downloaded { bytes });
                }
                Err(AttemptError::Mismatch(mismatch)) => mismatch,
                Err(AttemptError::Transport(err)) => {
                    remove_quietly(&temp).await;
                    network_failures += 1;
                    if network_failures > self.retry.retries {
                        return Err(TransferError::Transient {
                            attempts: task.attempt_count,
                            source: err,
                        });
                    }
                    warn!(file = %task.file.file_name, attempt = task.attempt_count, "{err}, retrying");
                    tokio::select! {
                        _ = self.cancel.cancelled() => return Err(TransferError::Cancelled),
                        _ = tokio::time::sleep(self.retry.delay) => {}
                    }
                    continue;
                }
                // an interrupted transfer keeps its temporary file
                Err(AttemptError::Fatal(TransferError::Cancelled)) => {
                    return Err(TransferError::Cancelled)
                }
                Err(AttemptError::Fatal(err)) => {
                    remove_quietly(&temp).await;
                    return Err(err);
                }
            };

            remove_quietly(&temp).await;
            if refetched_after_mismatch {
                return Err(TransferError::Integrity(mismatch));
            }
            refetched_after_mismatch = true;
            warn!(file = %task.file.file_name, "{mismatch}, fetching once more");
        }
    }

    /// One fetch into `temp`, verified and renamed into place on success.
    async fn attempt(&self, task: &mut DownloadTask, temp: &Path) -> Result<u64, AttemptError> {
        let bytes = self.stream_to(&task.file, temp).await?;
        task.state = TaskState::Verifying;
        match self.verifier.verify(temp, &task.file).await? {
            VerifyResult::Match => {
                tokio::fs::rename(temp, &task.destination).await?;
                Ok(bytes)
            }
            VerifyResult::Missing => Err(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("{} vanished before verification", temp.display()),
            )
            .into()),
            VerifyResult::Mismatch(mismatch) => Err(AttemptError::Mismatch(mismatch)),
        }
    }

    async fn stream_to(&self, file: &CanonicalFile, temp: &Path) -> Result<u64, AttemptError> {
        let stall = self.retry.stall_timeout;
        let body = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => {
                return Err(AttemptError::Fatal(TransferError::Cancelled));
            }
            body = tokio::time::timeout(stall, self.transport.get(&file.url)) => body,
        };
        let body = body
            .map_err(|_| AttemptError::Transport(TransportError::Stalled(stall)))?
            .map_err(AttemptError::Transport)?;

        if let Some(reported) = body.content_length {
            if reported != file.size_bytes && !self.verifier.tolerance().size {
                return Err(AttemptError::Mismatch(Mismatch::Size {
                    expected: file.size_bytes,
                    actual: reported,
                }));
            }
        }

        let mut out = File::create(temp).await?;
        let mut stream = body.stream;
        let mut written = 0u64;
        loop {
            let chunk = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => {
                    return Err(AttemptError::Fatal(TransferError::Cancelled));
                }
                chunk = tokio::time::timeout(stall, stream.next()) => chunk,
            };
            match chunk {
                Ok(Some(Ok(bytes))) => {
                    out.write_all(&bytes).await?;
                    written += bytes.len() as u64;
                }
                Ok(Some(Err(err))) => return Err(AttemptError::Transport(err)),
                Ok(None) => break,
                Err(_) => return Err(AttemptError::Transport(TransportError::Stalled(stall))),
            }
        }
        out.flush().await?;
        Ok(written)
    }
}

async fn remove_quietly(path: &Path) {
    let _ = tokio::fs::remove_file(path).await;
}
