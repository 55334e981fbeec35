//! Download manager backed by files the application has written to disk.

use std::path::PathBuf;

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use futures::{Stream, StreamExt};
use termserve_core::{ByteStream, Download, DownloadError, DownloadManager, DownloadMetadata, SessionId};
use tokio_util::io::ReaderStream;
use tracing::debug;

/// Bytes read per chunk when streaming a file.
pub const CHUNK_SIZE: usize = 64 * 1024;

struct Entry {
    owner: SessionId,
    download: Download,
}

/// Registry of offered files, keyed by the application's delivery key.
#[derive(Default)]
pub struct FileDownloads {
    entries: DashMap<String, Entry>,
}

impl FileDownloads {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DownloadManager for FileDownloads {
    async fn metadata(&self, key: &str) -> Result<DownloadMetadata, DownloadError> {
        self.entries
            .get(key)
            .map(|e| e.download.metadata.clone())
            .ok_or_else(|| DownloadError::NotFound(key.to_owned()))
    }

    fn download(&self, key: &str) -> ByteStream {
        let path = self.entries.get(key).map(|e| e.download.path.clone());
        Box::pin(file_chunks(key.to_owned(), path))
    }

    fn register(&self, session: &SessionId, key: String, download: Download) {
        debug!(session_id = %session, key = %key, file_name = %download.metadata.file_name, "download registered");
        let _ = self.entries.insert(
            key,
            Entry {
                owner: session.clone(),
                download,
            },
        );
    }

    fn release_session(&self, session: &SessionId) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, e| &e.owner != session);
        before.saturating_sub(self.entries.len())
    }
}

/// Open the file lazily on first poll and yield it in `CHUNK_SIZE` pieces.
fn file_chunks(key: String, path: Option<PathBuf>) -> impl Stream<Item = Result<Bytes, DownloadError>> {
    async_stream::try_stream! {
        let path = path.ok_or_else(|| DownloadError::NotFound(key.clone()))?;
        let file = tokio::fs::File::open(&path).await?;
        debug!(key = %key, path = %path.display(), "streaming download");
        let mut chunks = ReaderStream::with_capacity(file, CHUNK_SIZE);
        while let Some(chunk) = chunks.next().await {
            yield chunk?;
        }
    }
}
