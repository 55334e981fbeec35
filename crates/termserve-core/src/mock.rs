//! In-memory collaborators for deterministic tests without processes,
//! sockets, or files.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream;
use parking_lot::Mutex;

use crate::download::{ByteStream, Download, DownloadError, DownloadManager, DownloadMetadata};
use crate::frame::Frame;
use crate::ids::SessionId;
use crate::params::TerminalSize;
use crate::service::{AppService, AppServiceFactory, ServiceContext, ServiceError};
use crate::transport::{Transport, TransportError};

/// Something written to a [`RecordingTransport`].
#[derive(Clone, Debug, PartialEq)]
pub enum Sent {
    Binary(Bytes),
    Text(String),
}

/// Transport that records every write and close.
#[derive(Default)]
pub struct RecordingTransport {
    sent: Mutex<Vec<Sent>>,
    close_calls: AtomicUsize,
}

impl RecordingTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sent(&self) -> Vec<Sent> {
        self.sent.lock().clone()
    }

    pub fn texts(&self) -> Vec<String> {
        self.sent
            .lock()
            .iter()
            .filter_map(|s| match s {
                Sent::Text(t) => Some(t.clone()),
                Sent::Binary(_) => None,
            })
            .collect()
    }

    pub fn binaries(&self) -> Vec<Bytes> {
        self.sent
            .lock()
            .iter()
            .filter_map(|s| match s {
                Sent::Binary(b) => Some(b.clone()),
                Sent::Text(_) => None,
            })
            .collect()
    }

    pub fn close_calls(&self) -> usize {
        self.close_calls.load(Ordering::SeqCst)
    }

    pub fn is_closed(&self) -> bool {
        self.close_calls() > 0
    }
}

#[async_trait]
impl Transport for RecordingTransport {
    async fn send_binary(&self, data: Bytes) -> Result<(), TransportError> {
        if self.is_closed() {
            return Err(TransportError::Closed);
        }
        self.sent.lock().push(Sent::Binary(data));
        Ok(())
    }

    async fn send_text(&self, text: String) -> Result<(), TransportError> {
        if self.is_closed() {
            return Err(TransportError::Closed);
        }
        self.sent.lock().push(Sent::Text(text));
        Ok(())
    }

    async fn close(&self) -> Result<(), TransportError> {
        let _ = self.close_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// How a [`MockService`] reacts to its lifecycle calls.
#[derive(Clone, Debug, Default)]
pub struct MockBehavior {
    /// `start` returns an error.
    pub fail_start: bool,
    /// `send` returns an error on the Nth frame (1-based).
    pub fail_on_frame: Option<usize>,
    /// Signal "finished" after receiving this many frames.
    pub finish_after: Option<usize>,
    /// Echo text and structured frames back as text.
    pub echo: bool,
    /// Delay inside `start`, to hold a session in the starting state.
    pub start_delay: Option<Duration>,
    /// Delay inside `send` after the frame is recorded, to hold a write in flight.
    pub send_delay: Option<Duration>,
    /// Delay inside `stop` after the call is counted.
    pub stop_delay: Option<Duration>,
}

/// Application service that records calls instead of running anything.
pub struct MockService {
    ctx: ServiceContext,
    behavior: MockBehavior,
    start_calls: AtomicUsize,
    stop_calls: AtomicUsize,
    size: Mutex<Option<TerminalSize>>,
    frames: Mutex<Vec<Frame>>,
}

impl MockService {
    pub fn start_calls(&self) -> usize {
        self.start_calls.load(Ordering::SeqCst)
    }

    pub fn stop_calls(&self) -> usize {
        self.stop_calls.load(Ordering::SeqCst)
    }

    pub fn size(&self) -> Option<TerminalSize> {
        *self.size.lock()
    }

    pub fn frames(&self) -> Vec<Frame> {
        self.frames.lock().clone()
    }

    pub fn session_id(&self) -> &SessionId {
        &self.ctx.session_id
    }

    pub fn command(&self) -> &str {
        &self.ctx.command
    }
}

#[async_trait]
impl AppService for MockService {
    async fn start(&self, size: TerminalSize) -> Result<(), ServiceError> {
        let _ = self.start_calls.fetch_add(1, Ordering::SeqCst);
        *self.size.lock() = Some(size);
        if let Some(delay) = self.behavior.start_delay {
            tokio::time::sleep(delay).await;
        }
        if self.behavior.fail_start {
            return Err(ServiceError::Internal("mock start failure".into()));
        }
        Ok(())
    }

    async fn send(&self, frame: Frame) -> Result<(), ServiceError> {
        let count = {
            let mut frames = self.frames.lock();
            frames.push(frame.clone());
            frames.len()
        };
        if let Some(delay) = self.behavior.send_delay {
            tokio::time::sleep(delay).await;
        }
        if self.behavior.fail_on_frame == Some(count) {
            return Err(ServiceError::Protocol(format!("mock failure on frame {count}")));
        }
        if self.behavior.echo {
            match &frame {
                Frame::Text(text) => self.ctx.transport.send_text(text.clone()).await?,
                Frame::Structured(value) => self.ctx.transport.send_json(value).await?,
                Frame::Binary(data) => self.ctx.transport.send_binary(data.clone()).await?,
            }
        }
        if self.behavior.finish_after == Some(count) {
            self.ctx.finished.cancel();
        }
        Ok(())
    }

    async fn stop(&self) {
        let _ = self.stop_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.behavior.stop_delay {
            tokio::time::sleep(delay).await;
        }
    }
}

/// Factory that hands out [`MockService`]s and keeps them for inspection.
#[derive(Default)]
pub struct MockServiceFactory {
    behavior: MockBehavior,
    fail_create: bool,
    created: Mutex<Vec<Arc<MockService>>>,
}

impl MockServiceFactory {
    pub fn new(behavior: MockBehavior) -> Self {
        Self {
            behavior,
            ..Self::default()
        }
    }

    /// A factory whose `create` always fails.
    pub fn failing() -> Self {
        Self {
            fail_create: true,
            ..Self::default()
        }
    }

    pub fn services(&self) -> Vec<Arc<MockService>> {
        self.created.lock().clone()
    }

    pub fn last(&self) -> Option<Arc<MockService>> {
        self.created.lock().last().cloned()
    }
}

impl AppServiceFactory for MockServiceFactory {
    fn create(&self, ctx: ServiceContext) -> Result<Arc<dyn AppService>, ServiceError> {
        if self.fail_create {
            return Err(ServiceError::Internal("mock create failure".into()));
        }
        let service = Arc::new(MockService {
            ctx,
            behavior: self.behavior.clone(),
            start_calls: AtomicUsize::new(0),
            stop_calls: AtomicUsize::new(0),
            size: Mutex::new(None),
            frames: Mutex::new(Vec::new()),
        });
        self.created.lock().push(Arc::clone(&service));
        Ok(service)
    }
}

struct MemoryEntry {
    metadata: DownloadMetadata,
    chunks: Vec<Bytes>,
    fail_after: Option<usize>,
}

/// Observes how far a download stream has been pulled and whether it
/// has been dropped.
#[derive(Clone, Default)]
pub struct StreamGauge {
    produced: Arc<AtomicUsize>,
    released: Arc<AtomicBool>,
}

impl StreamGauge {
    pub fn produced(&self) -> usize {
        self.produced.load(Ordering::SeqCst)
    }

    pub fn released(&self) -> bool {
        self.released.load(Ordering::SeqCst)
    }
}

struct ReleaseOnDrop(Arc<AtomicBool>);

impl Drop for ReleaseOnDrop {
    fn drop(&mut self) {
        self.0.store(true, Ordering::SeqCst);
    }
}

/// Download manager backed by in-memory chunk lists.
#[derive(Default)]
pub struct MemoryDownloads {
    entries: Mutex<HashMap<String, MemoryEntry>>,
    registered: Mutex<Vec<(SessionId, String, Download)>>,
    gauge: StreamGauge,
    download_calls: AtomicUsize,
}

impl MemoryDownloads {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, key: &str, metadata: DownloadMetadata, chunks: Vec<Bytes>) {
        let entry = MemoryEntry {
            metadata,
            chunks,
            fail_after: None,
        };
        self.entries.lock().insert(key.to_owned(), entry);
    }

    /// Like [`insert`](Self::insert), but the stream errors after `fail_after` chunks.
    pub fn insert_failing(&self, key: &str, metadata: DownloadMetadata, chunks: Vec<Bytes>, fail_after: usize) {
        let entry = MemoryEntry {
            metadata,
            chunks,
            fail_after: Some(fail_after),
        };
        self.entries.lock().insert(key.to_owned(), entry);
    }

    pub fn gauge(&self) -> StreamGauge {
        self.gauge.clone()
    }

    pub fn download_calls(&self) -> usize {
        self.download_calls.load(Ordering::SeqCst)
    }

    pub fn registered(&self) -> Vec<(SessionId, String, Download)> {
        self.registered.lock().clone()
    }
}

#[async_trait]
impl DownloadManager for MemoryDownloads {
    async fn metadata(&self, key: &str) -> Result<DownloadMetadata, DownloadError> {
        self.entries
            .lock()
            .get(key)
            .map(|e| e.metadata.clone())
            .ok_or_else(|| DownloadError::NotFound(key.to_owned()))
    }

    fn download(&self, key: &str) -> ByteStream {
        let _ = self.download_calls.fetch_add(1, Ordering::SeqCst);
        let (chunks, fail_after) = match self.entries.lock().get(key) {
            Some(e) => (e.chunks.clone(), e.fail_after),
            None => {
                let err = DownloadError::NotFound(key.to_owned());
                return Box::pin(stream::once(async move { Err(err) }));
            }
        };
        let produced = Arc::clone(&self.gauge.produced);
        let guard = ReleaseOnDrop(Arc::clone(&self.gauge.released));
        let state = (chunks.into_iter(), 0usize, guard);
        Box::pin(stream::unfold(state, move |(mut chunks, index, guard)| {
            let produced = Arc::clone(&produced);
            async move {
                if fail_after == Some(index) {
                    let err = DownloadError::Source(format!("failed after {index} chunks"));
                    // Yield the error once, then end.
                    let exhausted = Vec::new().into_iter();
                    return Some((Err(err), (exhausted, usize::MAX, guard)));
                }
                let chunk = chunks.next()?;
                let _ = produced.fetch_add(1, Ordering::SeqCst);
                Some((Ok(chunk), (chunks, index.saturating_add(1), guard)))
            }
        }))
    }

    fn register(&self, session: &SessionId, key: String, download: Download) {
        let metadata = download.metadata.clone();
        self.registered.lock().push((session.clone(), key.clone(), download));
        self.entries.lock().insert(
            key,
            MemoryEntry {
                metadata,
                chunks: Vec::new(),
                fail_after: None,
            },
        );
    }

    fn release_session(&self, session: &SessionId) -> usize {
        let mut registered = self.registered.lock();
        let before = registered.len();
        let mut entries = self.entries.lock();
        registered.retain(|(owner, key, _)| {
            if owner == session {
                let _ = entries.remove(key);
                false
            } else {
                true
            }
        });
        before - registered.len()
    }
}
