use async_trait::async_trait;
use bytes::Bytes;

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("transport closed")]
    Closed,
    #[error("send failed: {0}")]
    Send(String),
}

/// Outbound half of a browser connection, handed to the application
/// service so it can write without going through the bridge.
///
/// Writes on one transport are delivered in call order.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send_binary(&self, data: Bytes) -> Result<(), TransportError>;

    async fn send_text(&self, text: String) -> Result<(), TransportError>;

    /// Close the connection. Repeated calls are no-ops.
    async fn close(&self) -> Result<(), TransportError>;

    /// Serialize `value` and send it as a text frame.
    async fn send_json(&self, value: &serde_json::Value) -> Result<(), TransportError> {
        let text = serde_json::to_string(value).map_err(|e| TransportError::Send(e.to_string()))?;
        self.send_text(text).await
    }
}
