use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub type UserId = i64;

const ID_SUFFIX_LEN: usize = 6;

/// Whether a message was sent by the local user or received from the peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Provenance {
    Mine,
    Other,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum DeliveryStatus {
    Sent,
    Delivered,
    Read,
}

impl DeliveryStatus {
    /// Status only moves forward.
    pub fn advance(self, next: DeliveryStatus) -> DeliveryStatus {
        self.max(next)
    }
}

/// Observation identity of a chat event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MessageKey {
    pub sent_at: DateTime<Utc>,
    pub sender_id: UserId,
    pub receiver_id: UserId,
}

impl MessageKey {
    /// Builds an id for a newly observed message: the key plus a random suffix.
    pub fn new_message_id(&self) -> String {
        let suffix = Uuid::new_v4().simple().to_string();
        format!("{}-{}", self, &suffix[..ID_SUFFIX_LEN])
    }
}

impl fmt::Display for MessageKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}-{}-{}",
            self.sent_at.to_rfc3339_opts(SecondsFormat::Millis, true),
            self.sender_id,
            self.receiver_id
        )
    }
}

/// One chat message as shown in a transcript.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub id: String,
    pub sender_id: UserId,
    pub receiver_id: UserId,
    pub sender_name: Option<String>,
    pub content: String,
    pub sent_at: DateTime<Utc>,
    pub provenance: Provenance,
    pub status: DeliveryStatus,
}

impl Message {
    pub fn new(
        key: MessageKey,
        sender_name: Option<String>,
        content: impl Into<String>,
        provenance: Provenance,
        status: DeliveryStatus,
    ) -> Self {
        Self {
            id: key.new_message_id(),
            sender_id: key.sender_id,
            receiver_id: key.receiver_id,
            sender_name,
            content: content.into(),
            sent_at: key.sent_at,
            provenance,
            status,
        }
    }

    pub fn key(&self) -> MessageKey {
        MessageKey {
            sent_at: self.sent_at,
            sender_id: self.sender_id,
            receiver_id: self.receiver_id,
        }
    }

    pub fn is_mine(&self) -> bool {
        self.provenance == Provenance::Mine
    }
}

/// Entry of the server's user list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub username: String,
}

/// Who the local session is. Used for self-echo detection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalIdentity {
    pub user_id: UserId,
    pub username: String,
}

impl LocalIdentity {
    /// Either signal is enough: matching id or matching display name.
    pub fn is_me(&self, sender_id: UserId, sender_name: Option<&str>) -> bool {
        sender_id == self.user_id || sender_name == Some(self.username.as_str())
    }
}

/// State the UI renders for the chat pane.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ViewSnapshot {
    pub active_peer: Option<UserId>,
    pub transcript: Vec<Message>,
    pub unread: HashMap<UserId, u32>,
    pub loading: bool,
}

/// Parses the server's `sentAt`: RFC 3339, or an offset-less ISO timestamp taken as UTC.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
        return Some(parsed.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .map(|naive| naive.and_utc())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key() -> MessageKey {
        MessageKey {
            sent_at: parse_timestamp("2025-03-01T10:15:00Z").unwrap(),
            sender_id: 1,
            receiver_id: 2,
        }
    }

    #[test]
    fn message_ids_share_the_key_prefix_but_not_the_suffix() {
        let first = key().new_message_id();
        let second = key().new_message_id();

        assert!(first.starts_with("2025-03-01T10:15:00.000Z-1-2-"));
        assert_eq!(first.len(), second.len());
        assert_ne!(first, second);
    }

    #[test]
    fn parses_server_timestamps_with_and_without_offset() {
        let with_offset = parse_timestamp("2025-03-01T10:15:00.250+00:00").unwrap();
        let naive = parse_timestamp("2025-03-01T10:15:00.250").unwrap();
        assert_eq!(with_offset, naive);

        assert!(parse_timestamp("yesterday").is_none());
        assert!(parse_timestamp("").is_none());
    }

    #[test]
    fn delivery_status_never_goes_back() {
        assert_eq!(DeliveryStatus::Read.advance(DeliveryStatus::Sent), DeliveryStatus::Read);
        assert_eq!(DeliveryStatus::Sent.advance(DeliveryStatus::Delivered), DeliveryStatus::Delivered);
    }

    #[test]
    fn self_identification_accepts_id_or_name() {
        let me = LocalIdentity {
            user_id: 1,
            username: "alice".into(),
        };
        assert!(me.is_me(1, None));
        assert!(me.is_me(7, Some("alice")));
        assert!(!me.is_me(7, Some("bob")));
        assert!(!me.is_me(7, None));
    }
}
