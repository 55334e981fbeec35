use std::path::PathBuf;
use std::pin::Pin;

use async_trait::async_trait;
use bytes::Bytes;
use futures::Stream;
use serde::{Deserialize, Serialize};

use crate::ids::SessionId;

/// Lazy, forward-only sequence of file chunks.
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, DownloadError>> + Send>>;

#[derive(Debug, thiserror::Error)]
pub enum DownloadError {
    #[error("download with key '{0}' not found")]
    NotFound(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("download source failed: {0}")]
    Source(String),
}

/// What the browser is told about a file before the bytes arrive.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownloadMetadata {
    pub file_name: String,
    pub mime_type: String,
    pub encoding: Option<String>,
    /// `"browser"` opens inline; anything else saves as an attachment.
    pub open_method: String,
}

impl DownloadMetadata {
    pub fn opens_in_browser(&self) -> bool {
        self.open_method == "browser"
    }
}

/// A file the application has offered for download.
#[derive(Clone, Debug)]
pub struct Download {
    pub metadata: DownloadMetadata,
    pub path: PathBuf,
}

/// Resolves opaque download keys to metadata and chunk streams.
///
/// Shared by every session; implementations hold no per-request state.
#[async_trait]
pub trait DownloadManager: Send + Sync {
    async fn metadata(&self, key: &str) -> Result<DownloadMetadata, DownloadError>;

    /// Stream the file's bytes. Each call starts from the beginning.
    fn download(&self, key: &str) -> ByteStream;

    /// Offer a file under `key` on behalf of `session`.
    fn register(&self, session: &SessionId, key: String, download: Download);

    /// Forget every key registered by `session`. Returns how many were dropped.
    fn release_session(&self, session: &SessionId) -> usize;
}
