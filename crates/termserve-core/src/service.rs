use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::download::DownloadManager;
use crate::frame::Frame;
use crate::ids::SessionId;
use crate::params::TerminalSize;
use crate::transport::{Transport, TransportError};

#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("failed to spawn `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },
    #[error("service not started")]
    NotStarted,
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),
    #[error("protocol error: {0}")]
    Protocol(String),
    #[error("{0}")]
    Internal(String),
}

/// Everything a service instance is bound to when it is created.
#[derive(Clone)]
pub struct ServiceContext {
    pub session_id: SessionId,
    /// Shell command line that runs the application.
    pub command: String,
    /// Sink for binary/text frames and the close primitive.
    pub transport: Arc<dyn Transport>,
    pub downloads: Arc<dyn DownloadManager>,
    /// Cancelled by the service once the application has finished.
    pub finished: CancellationToken,
    pub debug: bool,
}

/// A running terminal application attached to one session.
#[async_trait]
pub trait AppService: Send + Sync {
    async fn start(&self, size: TerminalSize) -> Result<(), ServiceError>;

    /// Inject one inbound frame from the browser.
    async fn send(&self, frame: Frame) -> Result<(), ServiceError>;

    /// Stop the application and release its resources.
    async fn stop(&self);
}

/// Builds one [`AppService`] per session.
pub trait AppServiceFactory: Send + Sync {
    fn create(&self, ctx: ServiceContext) -> Result<Arc<dyn AppService>, ServiceError>;
}
