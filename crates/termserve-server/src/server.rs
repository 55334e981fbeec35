//! `TermServer`: Axum HTTP + WebSocket server.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use askama::Template;
use async_trait::async_trait;
use axum::extract::ws::WebSocket;
use axum::http::StatusCode;
use axum::response::{Html, IntoResponse, Response};
use axum::Router;
use termserve_core::{AppServiceFactory, DownloadManager, TerminalSize};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::bootstrap::IndexPage;
use crate::config::ServerConfig;
use crate::download;
use crate::routes::{build_router, Handlers};
use crate::session::{SessionBridge, SessionError};
use crate::shutdown::ShutdownCoordinator;

/// The termserve server.
pub struct TermServer {
    config: ServerConfig,
    bridge: SessionBridge,
    downloads: Arc<dyn DownloadManager>,
    shutdown: ShutdownCoordinator,
}

impl TermServer {
    pub fn new(
        config: ServerConfig,
        factory: Arc<dyn AppServiceFactory>,
        downloads: Arc<dyn DownloadManager>,
    ) -> Self {
        let shutdown = ShutdownCoordinator::new();
        let bridge = SessionBridge::new(
            factory,
            Arc::clone(&downloads),
            config.command.clone(),
            config.debug,
            shutdown.token(),
        );
        Self {
            config,
            bridge,
            downloads,
            shutdown,
        }
    }

    /// Build the Axum router with all routes.
    pub fn router(self: &Arc<Self>) -> Router {
        build_router(Arc::clone(self), &self.config.static_dir)
    }

    /// Get the server configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Get the shutdown coordinator.
    pub fn shutdown(&self) -> &ShutdownCoordinator {
        &self.shutdown
    }

    /// Bind the configured address and serve in the background.
    pub async fn listen(self: Arc<Self>) -> io::Result<ServerHandle> {
        let listener = TcpListener::bind(self.config.bind_addr()).await?;
        let addr = listener.local_addr()?;
        let router = self.router();
        let token = self.shutdown.token();

        info!(%addr, command = %self.config.command, "termserve listening");

        let server = tokio::spawn(async move {
            axum::serve(listener, router)
                .with_graceful_shutdown(async move { token.cancelled().await })
                .await
        });

        Ok(ServerHandle {
            addr,
            shutdown: self.shutdown.clone(),
            timeout: Duration::from_secs(self.config.shutdown_timeout_secs),
            server,
        })
    }
}

#[async_trait]
impl Handlers for TermServer {
    async fn render_index(&self, base_url: String, font_size: u32) -> Response {
        let page = IndexPage::new(&self.config.title, &base_url, font_size);
        debug!(ws_url = %page.ws_url, font_size, "rendering index");
        match page.render() {
            Ok(html) => Html(html).into_response(),
            Err(e) => {
                error!(error = %e, "failed to render index page");
                StatusCode::INTERNAL_SERVER_ERROR.into_response()
            }
        }
    }

    async fn handle_download(&self, key: String) -> Response {
        download::handle_download(&self.downloads, &key).await
    }

    async fn handle_websocket(&self, socket: WebSocket, size: TerminalSize) {
        let session = self.bridge.handle_connection(socket, size);
        match self.shutdown.track(session).await {
            Ok(outcome) => debug!(?outcome, "session ended"),
            Err(SessionError::Cancelled) => debug!("session cancelled by shutdown"),
        }
    }

    fn max_message_size(&self) -> usize {
        self.config.max_message_size
    }
}

/// Handle to a running server.
pub struct ServerHandle {
    addr: SocketAddr,
    shutdown: ShutdownCoordinator,
    timeout: Duration,
    server: JoinHandle<io::Result<()>>,
}

impl ServerHandle {
    /// Address the listener is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    /// Stop accepting, cancel every session, and wait for them to wind down.
    pub async fn shutdown(self) -> io::Result<()> {
        if !self.shutdown.graceful_shutdown(Some(self.timeout)).await {
            warn!("sessions still running at shutdown deadline");
        }
        match tokio::time::timeout(self.timeout, self.server).await {
            Ok(joined) => joined.map_err(io::Error::other)?,
            Err(_) => {
                warn!("listener did not stop in time");
                Ok(())
            }
        }
    }
}
