use bytes::Bytes;
use serde_json::Value;

/// One unit of relay traffic between the browser and the application.
///
/// The bridge never looks inside a frame; only the application service
/// interprets payloads.
#[derive(Clone, Debug, PartialEq)]
pub enum Frame {
    /// A decoded JSON value (the browser's envelope format).
    Structured(Value),
    /// Opaque binary payload.
    Binary(Bytes),
    /// Text that is not valid JSON.
    Text(String),
}

impl Frame {
    /// Decode a text message: JSON when it parses, plain text otherwise.
    pub fn from_text(text: impl Into<String>) -> Self {
        let text = text.into();
        match serde_json::from_str::<Value>(&text) {
            Ok(value) => Self::Structured(value),
            Err(_) => Self::Text(text),
        }
    }
}
