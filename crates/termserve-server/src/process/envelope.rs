//! Browser envelopes: JSON arrays of `[type, payload?]`.

use serde_json::Value;

#[derive(Clone, Debug, PartialEq)]
pub enum ClientMessage {
    Stdin(String),
    Resize { width: u16, height: u16 },
    Ping(Value),
    Blur,
    Focus,
}

impl ClientMessage {
    /// Parse an envelope. Unknown types and malformed payloads yield `None`.
    pub fn parse(value: &Value) -> Option<Self> {
        let items = value.as_array()?;
        let kind = items.first()?.as_str()?;
        let payload = items.get(1);
        match kind {
            "stdin" => payload?.as_str().map(|s| Self::Stdin(s.to_owned())),
            "resize" => {
                let payload = payload?;
                let width = u16::try_from(payload.get("width")?.as_u64()?).ok()?;
                let height = u16::try_from(payload.get("height")?.as_u64()?).ok()?;
                Some(Self::Resize { width, height })
            }
            "ping" => Some(Self::Ping(payload.cloned().unwrap_or(Value::Null))),
            "blur" => Some(Self::Blur),
            "focus" => Some(Self::Focus),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_known_envelopes() {
        assert_eq!(ClientMessage::parse(&json!(["stdin", "q"])), Some(ClientMessage::Stdin("q".into())));
        assert_eq!(
            ClientMessage::parse(&json!(["resize", {"width": 100, "height": 30}])),
            Some(ClientMessage::Resize { width: 100, height: 30 })
        );
        assert_eq!(ClientMessage::parse(&json!(["ping", "t1"])), Some(ClientMessage::Ping(json!("t1"))));
        assert_eq!(ClientMessage::parse(&json!(["blur"])), Some(ClientMessage::Blur));
        assert_eq!(ClientMessage::parse(&json!(["focus"])), Some(ClientMessage::Focus));
    }

    #[test]
    fn rejects_malformed() {
        assert_eq!(ClientMessage::parse(&json!({"stdin": "x"})), None);
        assert_eq!(ClientMessage::parse(&json!([])), None);
        assert_eq!(ClientMessage::parse(&json!(["stdin"])), None);
        assert_eq!(ClientMessage::parse(&json!(["stdin", 5])), None);
        assert_eq!(ClientMessage::parse(&json!(["resize", {"width": -1, "height": 3}])), None);
        assert_eq!(ClientMessage::parse(&json!(["resize", {"width": 70000, "height": 3}])), None);
        assert_eq!(ClientMessage::parse(&json!(["teleport", {}])), None);
    }

    #[test]
    fn ping_without_payload() {
        assert_eq!(ClientMessage::parse(&json!(["ping"])), Some(ClientMessage::Ping(Value::Null)));
    }
}
