use std::sync::Arc;

use crate::common::types::{
    DeliveryStatus, LocalIdentity, Message, MessageKey, Provenance, UserId, parse_timestamp,
};
use crate::error::Result;
use crate::network::{ChatApi, HistoryRecord};

/// Fetches a conversation's history and turns it into transcript entries.
#[derive(Clone)]
pub struct HistoryLoader {
    api: Arc<dyn ChatApi>,
    local: LocalIdentity,
}

impl HistoryLoader {
    pub fn new(api: Arc<dyn ChatApi>, local: LocalIdentity) -> Self {
        Self { api, local }
    }

    /// History comes back in server order; it is not re-sorted here.
    pub async fn load_history(&self, peer: UserId) -> Result<Vec<Message>> {
        let records = self.api.fetch_messages(peer).await?;
        let total = records.len();
        let messages: Vec<Message> = records
            .into_iter()
            .filter_map(|record| to_message(record, &self.local))
            .collect();
        log::debug!(
            "Loaded {} of {total} history records for peer {peer}",
            messages.len()
        );
        Ok(messages)
    }
}

fn to_message(record: HistoryRecord, local: &LocalIdentity) -> Option<Message> {
    let Some(sent_at) = parse_timestamp(&record.sent_at) else {
        log::warn!("Skipping history record with bad sentAt {:?}", record.sent_at);
        return None;
    };

    let provenance = if local.is_me(record.sender_id, record.sender_name.as_deref()) {
        Provenance::Mine
    } else {
        Provenance::Other
    };
    let status = match (record.is_read, provenance) {
        (true, _) => DeliveryStatus::Read,
        (false, Provenance::Mine) => DeliveryStatus::Sent,
        (false, Provenance::Other) => DeliveryStatus::Delivered,
    };
    let key = MessageKey {
        sent_at,
        sender_id: record.sender_id,
        receiver_id: record.receiver_id,
    };
    Some(Message::new(key, record.sender_name, record.content, provenance, status))
}
