//! SignalR JSON hub protocol: record framing, handshake and the chat payloads.

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::common::types::{MessageKey, UserId, parse_timestamp};
use crate::error::{ChatError, Result};

pub const RECORD_SEPARATOR: char = '\u{1e}';

pub const RECEIVE_MESSAGE: &str = "ReceiveMessage";
pub const SEND_MESSAGE: &str = "SendMessage";

const INVOCATION: u64 = 1;
const COMPLETION: u64 = 3;
const PING: u64 = 6;
const CLOSE: u64 = 7;

/// Frame decoded from the hub.
#[derive(Debug, Clone, PartialEq)]
pub enum HubMessage {
    Invocation(HubInvocation),
    Completion {
        invocation_id: Option<String>,
        error: Option<String>,
    },
    Ping,
    Close {
        error: Option<String>,
    },
    /// Stream items, cancel and anything newer than this client.
    Other(u64),
}

#[derive(Debug, Clone, PartialEq)]
pub struct HubInvocation {
    pub target: String,
    pub arguments: Vec<Value>,
}

/// Client-to-hub calls.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutboundEvent {
    SendMessage { receiver_id: UserId, content: String },
}

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct SendMessageRequest<'a> {
    receiver_id: UserId,
    content: &'a str,
}

pub fn handshake_request() -> String {
    frame(&json!({ "protocol": "json", "version": 1 }))
}

/// Checks the server's handshake reply (`{}` or `{"error": ...}`).
pub fn check_handshake(payload: &str) -> Result<()> {
    let record = split_records(payload)
        .next()
        .ok_or_else(|| ChatError::transport("empty handshake response"))?;
    let value: Value = serde_json::from_str(record)
        .map_err(|err| ChatError::transport(format!("invalid handshake response: {err}")))?;
    match value.get("error").and_then(Value::as_str) {
        Some(error) => Err(ChatError::transport(format!("handshake rejected: {error}"))),
        None => Ok(()),
    }
}

pub fn ping() -> String {
    frame(&json!({ "type": PING }))
}

pub fn encode(event: &OutboundEvent) -> String {
    match event {
        OutboundEvent::SendMessage {
            receiver_id,
            content,
        } => {
            let request = SendMessageRequest {
                receiver_id: *receiver_id,
                content,
            };
            frame(&json!({
                "type": INVOCATION,
                "target": SEND_MESSAGE,
                "arguments": [request],
            }))
        }
    }
}

fn frame(value: &Value) -> String {
    let mut out = value.to_string();
    out.push(RECORD_SEPARATOR);
    out
}

/// A single text frame may carry several records.
pub fn split_records(payload: &str) -> impl Iterator<Item = &str> {
    payload
        .split(RECORD_SEPARATOR)
        .filter(|record| !record.trim().is_empty())
}

pub fn decode(record: &str) -> Result<HubMessage> {
    let value: Value = serde_json::from_str(record)
        .map_err(|err| ChatError::MalformedEvent(format!("invalid hub record: {err}")))?;
    let kind = value
        .get("type")
        .and_then(Value::as_u64)
        .ok_or_else(|| ChatError::MalformedEvent("hub record without type".into()))?;
    let text = |field: &str| value.get(field).and_then(Value::as_str).map(str::to_owned);

    let message = match kind {
        INVOCATION => {
            let target = text("target")
                .ok_or_else(|| ChatError::MalformedEvent("invocation without target".into()))?;
            let arguments = match value.get("arguments") {
                Some(Value::Array(items)) => items.clone(),
                _ => Vec::new(),
            };
            HubMessage::Invocation(HubInvocation { target, arguments })
        }
        COMPLETION => HubMessage::Completion {
            invocation_id: text("invocationId"),
            error: text("error"),
        },
        PING => HubMessage::Ping,
        CLOSE => HubMessage::Close {
            error: text("error"),
        },
        other => HubMessage::Other(other),
    };
    Ok(message)
}

/// Raw `ReceiveMessage` payload as the server sends it; every field may be absent.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawReceiveMessage {
    sender_id: Option<UserId>,
    receiver_id: Option<UserId>,
    content: Option<String>,
    sent_at: Option<String>,
    sender_name: Option<String>,
}

/// A validated `ReceiveMessage` event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    pub key: MessageKey,
    pub content: String,
    pub sender_name: Option<String>,
}

impl InboundMessage {
    pub fn sender_id(&self) -> UserId {
        self.key.sender_id
    }

    pub fn receiver_id(&self) -> UserId {
        self.key.receiver_id
    }

    /// Validates the first argument of a `ReceiveMessage` invocation.
    pub fn parse(arguments: &[Value]) -> Result<Self> {
        let payload = arguments
            .first()
            .ok_or_else(|| ChatError::MalformedEvent("no payload".into()))?;
        let raw: RawReceiveMessage = serde_json::from_value(payload.clone())
            .map_err(|err| ChatError::MalformedEvent(err.to_string()))?;

        let content = raw
            .content
            .filter(|content| !content.is_empty())
            .ok_or_else(|| ChatError::MalformedEvent("missing content".into()))?;
        let sender_id = raw
            .sender_id
            .ok_or_else(|| ChatError::MalformedEvent("missing senderId".into()))?;
        let receiver_id = raw
            .receiver_id
            .ok_or_else(|| ChatError::MalformedEvent("missing receiverId".into()))?;
        let sent_at = raw
            .sent_at
            .as_deref()
            .and_then(parse_timestamp)
            .ok_or_else(|| ChatError::MalformedEvent("missing or invalid sentAt".into()))?;

        Ok(Self {
            key: MessageKey {
                sent_at,
                sender_id,
                receiver_id,
            },
            content,
            sender_name: raw.sender_name,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn send_message_uses_pascal_case_arguments() {
        let encoded = encode(&OutboundEvent::SendMessage {
            receiver_id: 2,
            content: "hi".into(),
        });
        assert!(encoded.ends_with(RECORD_SEPARATOR));

        let value: Value = serde_json::from_str(encoded.trim_end_matches(RECORD_SEPARATOR)).unwrap();
        assert_eq!(value["type"], 1);
        assert_eq!(value["target"], "SendMessage");
        assert_eq!(value["arguments"][0]["ReceiverId"], 2);
        assert_eq!(value["arguments"][0]["Content"], "hi");
    }

    #[test]
    fn one_frame_can_hold_several_records() {
        let payload = "{\"type\":6}\u{1e}{\"type\":1,\"target\":\"ReceiveMessage\",\"arguments\":[]}\u{1e}";
        let decoded: Vec<_> = split_records(payload).map(|r| decode(r).unwrap()).collect();

        assert_eq!(decoded.len(), 2);
        assert_eq!(decoded[0], HubMessage::Ping);
        assert!(matches!(&decoded[1], HubMessage::Invocation(inv) if inv.target == RECEIVE_MESSAGE));
    }

    #[test]
    fn handshake_error_is_reported() {
        assert!(check_handshake("{}\u{1e}").is_ok());
        let err = check_handshake("{\"error\":\"Requested protocol 'json' is not available.\"}\u{1e}")
            .unwrap_err();
        assert!(matches!(err, ChatError::Transport(_)));
    }

    #[test]
    fn close_frame_keeps_server_error() {
        let decoded = decode("{\"type\":7,\"error\":\"Server is shutting down\"}").unwrap();
        assert_eq!(
            decoded,
            HubMessage::Close {
                error: Some("Server is shutting down".into())
            }
        );
    }

    #[test]
    fn receive_message_is_validated() {
        let valid = json!({
            "senderId": 3,
            "receiverId": 1,
            "content": "yo",
            "sentAt": "2025-03-01T10:15:00",
            "senderName": "carol"
        });
        let parsed = InboundMessage::parse(&[valid]).unwrap();
        assert_eq!(parsed.sender_id(), 3);
        assert_eq!(parsed.receiver_id(), 1);
        assert_eq!(parsed.sender_name.as_deref(), Some("carol"));

        for bad in [
            json!({}),
            json!({"senderId": 3, "receiverId": 1, "content": "", "sentAt": "2025-03-01T10:15:00"}),
            json!({"receiverId": 1, "content": "yo", "sentAt": "2025-03-01T10:15:00"}),
            json!({"senderId": 3, "receiverId": 1, "content": "yo"}),
            json!({"senderId": "three", "receiverId": 1, "content": "yo", "sentAt": "2025-03-01T10:15:00"}),
        ] {
            let err = InboundMessage::parse(&[bad]).unwrap_err();
            assert!(matches!(err, ChatError::MalformedEvent(_)));
        }
        assert!(InboundMessage::parse(&[]).is_err());
    }
}
