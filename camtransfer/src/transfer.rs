//! Concrete transfer targets: HTTP `PUT` and a plain destination directory.
//!
//! Both stream the file in fixed-size chunks and report progress per chunk.

use crate::load_config::TargetSection;
use async_trait::async_trait;
use camtransfer_core::contract::{ProgressFn, Transfer};
use camtransfer_core::error::TransferError;
use futures::stream::{self, Stream};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_LENGTH};
use reqwest::{Body, Client};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::{debug, info, warn};

pub const CHUNK_SIZE: usize = 64 * 1024;
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Build the transfer for a configured target.
pub fn from_target(
    target: &TargetSection,
    token: Option<String>,
) -> Result<Arc<dyn Transfer>, TransferError> {
    match target {
        TargetSection::Http { base_url } => Ok(Arc::new(HttpTransfer::new(base_url, token)?)),
        TargetSection::Directory { root } => Ok(Arc::new(DirectoryTransfer::new(root))),
    }
}

#[derive(Debug, Clone)]
pub struct HttpTransfer {
    client: Client,
    base_url: String,
}

impl HttpTransfer {
    pub fn new(base_url: &str, token: Option<String>) -> Result<Self, TransferError> {
        let mut headers = HeaderMap::new();
        match &token {
            Some(token) => {
                let value = HeaderValue::from_str(&format!("Bearer {token}"))
                    .map_err(|e| TransferError::Other(format!("invalid upload token: {e}")))?;
                headers.insert(AUTHORIZATION, value);
            }
            None => warn!(base_url, "No upload token set, sending unauthenticated requests"),
        }

        let client = Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .default_headers(headers)
            .build()
            .map_err(|e| TransferError::Other(format!("failed to build HTTP client: {e}")))?;

        info!(base_url, "Initialized HTTP transfer");
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn url_for(&self, remote: &str) -> String {
        format!("{}/{}", self.base_url, remote.trim_start_matches('/'))
    }
}

#[async_trait]
impl Transfer for HttpTransfer {
    async fn probe(&self) -> Result<(), TransferError> {
        let response = self
            .client
            .head(&self.base_url)
            .send()
            .await
            .map_err(|e| TransferError::Other(format!("{} unreachable: {e}", self.base_url)))?;
        if response.status().is_server_error() {
            return Err(TransferError::Rejected {
                destination: self.base_url.clone(),
                reason: response.status().to_string(),
            });
        }
        info!(base_url = %self.base_url, status = %response.status(), "Upload target reachable");
        Ok(())
    }

    async fn send(
        &self,
        local: &Path,
        remote: &str,
        on_progress: ProgressFn,
    ) -> Result<(), TransferError> {
        let file = tokio::fs::File::open(local).await?;
        let total = file.metadata().await?.len();
        let url = self.url_for(remote);
        debug!(local = %local.display(), %url, total, "Starting HTTP upload");

        let body = file_chunks(file, total, on_progress.clone());

        let response = self
            .client
            .put(&url)
            .header(CONTENT_LENGTH, total)
            .body(Body::wrap_stream(body))
            .send()
            .await
            .map_err(|e| TransferError::Other(format!("upload to {url} failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(TransferError::Rejected {
                destination: url,
                reason: status.to_string(),
            });
        }
        on_progress(total, total);
        Ok(())
    }
}

/// Read `file` lazily in [`CHUNK_SIZE`] pieces, reporting progress as each
/// piece is handed to the consumer. At most one chunk is held in memory.
pub fn file_chunks(
    file: tokio::fs::File,
    total: u64,
    on_progress: ProgressFn,
) -> impl Stream<Item = io::Result<Vec<u8>>> + Send + 'static {
    stream::try_unfold((file, 0u64), move |(mut file, sent)| {
        let progress = on_progress.clone();
        async move {
            let mut chunk = vec![0u8; CHUNK_SIZE];
            let n = file.read(&mut chunk).await?;
            if n == 0 {
                return Ok(None);
            }
            chunk.truncate(n);
            let sent = sent + n as u64;
            progress(sent, total);
            Ok::<_, io::Error>(Some((chunk, (file, sent))))
        }
    })
}

/// Copies into a destination root, typically a network mount.
#[derive(Debug, Clone)]
pub struct DirectoryTransfer {
    root: PathBuf,
}

impl DirectoryTransfer {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn path_for(&self, remote: &str) -> PathBuf {
        self.root.join(remote.trim_start_matches('/'))
    }
}

#[async_trait]
impl Transfer for DirectoryTransfer {
    async fn probe(&self) -> Result<(), TransferError> {
        let meta = tokio::fs::metadata(&self.root).await?;
        if !meta.is_dir() {
            return Err(TransferError::Rejected {
                destination: self.root.display().to_string(),
                reason: "not a directory".into(),
            });
        }
        info!(root = %self.root.display(), "Upload directory reachable");
        Ok(())
    }

    async fn send(
        &self,
        local: &Path,
        remote: &str,
        on_progress: ProgressFn,
    ) -> Result<(), TransferError> {
        let dest = self.path_for(remote);
        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut part_name = dest.file_name().unwrap_or_default().to_os_string();
        part_name.push(".part");
        let part = dest.with_file_name(part_name);

        let mut src = tokio::fs::File::open(local).await?;
        let total = src.metadata().await?.len();
        let mut out = tokio::fs::File::create(&part).await?;

        let mut buf = vec![0u8; CHUNK_SIZE];
        let mut sent = 0u64;
        loop {
            let n = src.read(&mut buf).await?;
            if n == 0 {
                break;
            }
            out.write_all(&buf[..n]).await?;
            sent += n as u64;
            on_progress(sent, total);
        }
        out.flush().await?;
        out.sync_all().await?;
        drop(out);

        tokio::fs::rename(&part, &dest).await?;
        debug!(local = %local.display(), dest = %dest.display(), "Copied to upload directory");
        on_progress(total, total);
        Ok(())
    }
}
