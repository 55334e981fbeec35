//! Session bridge: one browser WebSocket bound to one application service.
//!
//! Lifecycle: `Idle → Accepting → Starting → Relaying → {Closing,
//! Cancelling, Failing} → Stopped`. The socket handshake itself happens in
//! the router; a session is `Accepting` while it binds the accepted socket
//! to a new service.
//!
//! - Inbound frames are read here and forwarded to the service in order.
//! - Outbound frames never pass through the bridge; the service writes them
//!   straight to the [`Transport`] it was built with.
//! - The relay ends when the socket closes, the service cancels its
//!   `finished` token, or the server shuts down.
//! - The service is stopped exactly once on every exit path.
//! - Shutdown is the only outcome reported as an error to the caller.

pub mod guard;
pub mod transport;

use std::fmt;
use std::fmt::Display;
use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use futures::{Stream, StreamExt};
use termserve_core::{
    AppService, AppServiceFactory, DownloadManager, Frame, ServiceContext, ServiceError, SessionId, TerminalSize,
    Transport,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument};

use self::guard::ServiceGuard;
use self::transport::WsTransport;

/// Where a session is in its lifecycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Accepting,
    Starting,
    Relaying,
    Closing,
    Cancelling,
    Failing,
    Stopped,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Idle => "idle",
            Self::Accepting => "accepting",
            Self::Starting => "starting",
            Self::Relaying => "relaying",
            Self::Closing => "closing",
            Self::Cancelling => "cancelling",
            Self::Failing => "failing",
            Self::Stopped => "stopped",
        };
        f.write_str(s)
    }
}

impl SessionState {
    /// Whether a session in this state may move to `next`.
    pub fn can_advance_to(self, next: SessionState) -> bool {
        use SessionState::*;
        matches!(
            (self, next),
            (Idle, Accepting)
                | (Accepting, Starting)
                | (Starting, Relaying)
                | (Relaying, Closing)
                | (Starting | Relaying, Cancelling | Failing)
                | (Closing | Cancelling | Failing, Stopped)
        )
    }
}

/// The current state of one session. Every move is checked and logged.
#[derive(Debug)]
struct Lifecycle {
    state: SessionState,
}

impl Lifecycle {
    fn new() -> Self {
        Self {
            state: SessionState::Idle,
        }
    }

    fn advance(&mut self, next: SessionState) {
        debug_assert!(
            self.state.can_advance_to(next),
            "illegal session transition {} -> {next}",
            self.state
        );
        debug!(from = %self.state, to = %next, "session state");
        self.state = next;
    }
}

/// How a session ended, when it was not cancelled.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionOutcome {
    /// The browser closed the socket or the connection dropped.
    ClientClosed,
    /// The application signalled that it finished.
    ServiceFinished,
    /// Creating, starting, or feeding the service failed. Already logged.
    Failed,
}

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("session cancelled by server shutdown")]
    Cancelled,
}

/// One decoded inbound WebSocket message.
#[derive(Clone, Debug, PartialEq)]
pub enum Inbound {
    Frame(Frame),
    Close,
    /// Control traffic the bridge does not forward (ping/pong).
    Ignore,
}

impl From<Message> for Inbound {
    fn from(message: Message) -> Self {
        match message {
            Message::Text(text) => Self::Frame(Frame::from_text(text.as_str())),
            Message::Binary(data) => Self::Frame(Frame::Binary(data)),
            Message::Close(_) => Self::Close,
            Message::Ping(_) | Message::Pong(_) => Self::Ignore,
        }
    }
}

/// Why the relay loop returned.
enum Exit {
    Closed,
    Finished,
    Cancelled,
}

/// Builds and supervises sessions. Shared by every connection.
pub struct SessionBridge {
    factory: Arc<dyn AppServiceFactory>,
    downloads: Arc<dyn DownloadManager>,
    command: String,
    debug: bool,
    shutdown: CancellationToken,
}

impl SessionBridge {
    pub fn new(
        factory: Arc<dyn AppServiceFactory>,
        downloads: Arc<dyn DownloadManager>,
        command: impl Into<String>,
        debug: bool,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            factory,
            downloads,
            command: command.into(),
            debug,
            shutdown,
        }
    }

    /// Run a session over an upgraded axum socket.
    pub async fn handle_connection(
        &self,
        socket: WebSocket,
        size: TerminalSize,
    ) -> Result<SessionOutcome, SessionError> {
        let (sink, stream) = socket.split();
        let transport: Arc<dyn Transport> = Arc::new(WsTransport::new(sink));
        let incoming = stream.map(|m| m.map(Inbound::from));
        self.run(SessionId::new(), incoming, transport, size).await
    }

    /// Run a session over any inbound stream and transport.
    #[instrument(skip_all, fields(session_id = %session_id, width = size.width, height = size.height))]
    pub async fn run<S, E>(
        &self,
        session_id: SessionId,
        incoming: S,
        transport: Arc<dyn Transport>,
        size: TerminalSize,
    ) -> Result<SessionOutcome, SessionError>
    where
        S: Stream<Item = Result<Inbound, E>> + Unpin + Send,
        E: Display + Send,
    {
        let mut lifecycle = Lifecycle::new();
        lifecycle.advance(SessionState::Accepting);
        info!("session opened");

        let finished = CancellationToken::new();
        let ctx = ServiceContext {
            session_id: session_id.clone(),
            command: self.command.clone(),
            transport: Arc::clone(&transport),
            downloads: Arc::clone(&self.downloads),
            finished: finished.clone(),
            debug: self.debug,
        };

        lifecycle.advance(SessionState::Starting);
        let result = match self.factory.create(ctx) {
            Ok(service) => {
                let guard = ServiceGuard::new(service, session_id.clone());
                let relayed = match guard.service() {
                    Some(service) => {
                        self.relay(&mut lifecycle, service.as_ref(), incoming, &finished, size)
                            .await
                    }
                    None => Err(ServiceError::NotStarted),
                };
                let result = self.settle(&mut lifecycle, &session_id, &transport, relayed).await;
                guard.release().await;
                result
            }
            Err(e) => {
                lifecycle.advance(SessionState::Failing);
                error!(session_id = %session_id, error = %e, "failed to create application service");
                Ok(SessionOutcome::Failed)
            }
        };

        if let Err(e) = transport.close().await {
            debug!(error = %e, "transport already gone at teardown");
        }
        let end = lifecycle.state;
        lifecycle.advance(SessionState::Stopped);
        info!(end = %end, "session closed");
        result
    }

    /// Turn the relay result into the terminal state, closing the socket
    /// first on cancellation.
    async fn settle(
        &self,
        lifecycle: &mut Lifecycle,
        session_id: &SessionId,
        transport: &Arc<dyn Transport>,
        relayed: Result<Exit, ServiceError>,
    ) -> Result<SessionOutcome, SessionError> {
        match relayed {
            Ok(Exit::Closed) => {
                lifecycle.advance(SessionState::Closing);
                Ok(SessionOutcome::ClientClosed)
            }
            Ok(Exit::Finished) => {
                lifecycle.advance(SessionState::Closing);
                Ok(SessionOutcome::ServiceFinished)
            }
            Ok(Exit::Cancelled) => {
                lifecycle.advance(SessionState::Cancelling);
                if let Err(e) = transport.close().await {
                    debug!(error = %e, "close during cancellation failed");
                }
                Err(SessionError::Cancelled)
            }
            Err(e) => {
                lifecycle.advance(SessionState::Failing);
                error!(session_id = %session_id, error = %e, detail = ?e, "error in websocket session");
                Ok(SessionOutcome::Failed)
            }
        }
    }

    async fn relay<S, E>(
        &self,
        lifecycle: &mut Lifecycle,
        service: &dyn AppService,
        mut incoming: S,
        finished: &CancellationToken,
        size: TerminalSize,
    ) -> Result<Exit, ServiceError>
    where
        S: Stream<Item = Result<Inbound, E>> + Unpin + Send,
        E: Display + Send,
    {
        tokio::select! {
            biased;
            () = self.shutdown.cancelled() => return Ok(Exit::Cancelled),
            started = service.start(size) => started?,
        }

        lifecycle.advance(SessionState::Relaying);
        loop {
            tokio::select! {
                biased;
                () = self.shutdown.cancelled() => return Ok(Exit::Cancelled),
                () = finished.cancelled() => return Ok(Exit::Finished),
                next = incoming.next() => match next {
                    None | Some(Ok(Inbound::Close)) => return Ok(Exit::Closed),
                    Some(Err(e)) => {
                        debug!(error = %e, "websocket read failed, treating as disconnect");
                        return Ok(Exit::Closed);
                    }
                    Some(Ok(Inbound::Ignore)) => {}
                    Some(Ok(Inbound::Frame(frame))) => tokio::select! {
                        biased;
                        () = self.shutdown.cancelled() => return Ok(Exit::Cancelled),
                        sent = service.send(frame) => sent?,
                    },
                },
            }
        }
    }
}
