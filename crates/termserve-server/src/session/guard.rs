//! Scoped ownership of a session's application service.

use std::sync::Arc;

use termserve_core::{AppService, SessionId};
use tracing::{debug, error, warn};

/// Holds the service from the moment it exists and stops it exactly once.
///
/// The normal path calls [`release`](Self::release). If the owning future
/// is dropped first (the session task was aborted), `Drop` hands the stop
/// to the runtime instead.
pub struct ServiceGuard {
    service: Option<Arc<dyn AppService>>,
    session_id: SessionId,
}

impl ServiceGuard {
    pub fn new(service: Arc<dyn AppService>, session_id: SessionId) -> Self {
        Self {
            service: Some(service),
            session_id,
        }
    }

    /// The guarded service. `None` only after release.
    pub fn service(&self) -> Option<&Arc<dyn AppService>> {
        self.service.as_ref()
    }

    /// Stop the service and wait for it.
    pub async fn release(mut self) {
        if let Some(service) = self.service.take() {
            debug!(session_id = %self.session_id, "stopping application service");
            service.stop().await;
        }
    }
}

impl Drop for ServiceGuard {
    fn drop(&mut self) {
        let Some(service) = self.service.take() else {
            return;
        };
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                warn!(session_id = %self.session_id, "session dropped before teardown, stopping service in background");
                let _ = handle.spawn(async move { service.stop().await });
            }
            Err(_) => {
                error!(session_id = %self.session_id, "no runtime available to stop application service");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use termserve_core::mock::{MemoryDownloads, MockServiceFactory, RecordingTransport};
    use termserve_core::{AppServiceFactory, ServiceContext};
    use tokio_util::sync::CancellationToken;

    fn make() -> (Arc<MockServiceFactory>, Arc<dyn AppService>) {
        let factory = Arc::new(MockServiceFactory::default());
        let ctx = ServiceContext {
            session_id: SessionId::new(),
            command: "app".into(),
            transport: Arc::new(RecordingTransport::new()),
            downloads: Arc::new(MemoryDownloads::new()),
            finished: CancellationToken::new(),
            debug: false,
        };
        let service = factory.create(ctx).unwrap();
        (factory, service)
    }

    #[tokio::test]
    async fn release_stops_once() {
        let (factory, service) = make();
        let guard = ServiceGuard::new(service, SessionId::new());
        assert!(guard.service().is_some());
        guard.release().await;
        assert_eq!(factory.last().unwrap().stop_calls(), 1);
    }

    #[tokio::test]
    async fn drop_without_release_stops_in_background() {
        let (factory, service) = make();
        drop(ServiceGuard::new(service, SessionId::new()));
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(factory.last().unwrap().stop_calls(), 1);
    }
}
