//! [`Transport`] over the write half of a WebSocket.

use std::fmt::Display;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use axum::extract::ws::Message;
use bytes::Bytes;
use futures::{Sink, SinkExt};
use termserve_core::{Transport, TransportError};
use tokio::sync::Mutex;
use tracing::debug;

/// Serializes writes from the application service onto the socket.
///
/// The async mutex keeps frames in call order; once closed, further
/// writes fail with [`TransportError::Closed`].
pub struct WsTransport<S> {
    sink: Mutex<S>,
    closed: AtomicBool,
}

impl<S> WsTransport<S> {
    pub fn new(sink: S) -> Self {
        Self {
            sink: Mutex::new(sink),
            closed: AtomicBool::new(false),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

impl<S> WsTransport<S>
where
    S: Sink<Message> + Unpin + Send,
    S::Error: Display + Send,
{
    async fn send_message(&self, message: Message) -> Result<(), TransportError> {
        if self.is_closed() {
            return Err(TransportError::Closed);
        }
        self.sink
            .lock()
            .await
            .send(message)
            .await
            .map_err(|e| TransportError::Send(e.to_string()))
    }
}

#[async_trait]
impl<S> Transport for WsTransport<S>
where
    S: Sink<Message> + Unpin + Send,
    S::Error: Display + Send,
{
    async fn send_binary(&self, data: Bytes) -> Result<(), TransportError> {
        self.send_message(Message::Binary(data)).await
    }

    async fn send_text(&self, text: String) -> Result<(), TransportError> {
        self.send_message(Message::Text(text.into())).await
    }

    async fn close(&self) -> Result<(), TransportError> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        let mut sink = self.sink.lock().await;
        let sent = sink
            .send(Message::Close(None))
            .await
            .map_err(|e| TransportError::Send(e.to_string()));
        if let Err(e) = sink.close().await {
            debug!(error = %e, "websocket sink close failed");
        }
        sent
    }
}
