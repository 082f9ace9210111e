//! Reconciliation of history, optimistic sends and pushed events into one
//! transcript per peer.
//!
//! A logical message is identified by its [`MessageKey`] (sent time, sender,
//! receiver). The first observation of a key creates the entry and its id; any
//! later observation of the same key resolves to that entry and is dropped.
//! Own messages are recognised by id or by username, and their server echo is
//! never rendered a second time.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::common::types::{
    DeliveryStatus, LocalIdentity, Message, MessageKey, Provenance, UserId, ViewSnapshot,
};
use crate::error::{ChatError, Result};
use crate::network::protocol::InboundMessage;

use super::view::ConversationView;

/// What happened to one inbound event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InboundOutcome {
    /// Malformed payload.
    Ignored,
    /// Own message to self.
    SelfLoopback,
    /// Server copy of an own message to the open conversation.
    SelfEcho,
    /// Already present in the transcript.
    Duplicate,
    Appended,
    /// Counted against a background conversation.
    Unread,
    /// Not for the open conversation and nothing to count.
    Background,
}

impl InboundOutcome {
    pub fn changes_view(self) -> bool {
        matches!(self, InboundOutcome::Appended | InboundOutcome::Unread)
    }
}

/// Identifies one history request. Only the latest ticket may apply its result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchTicket {
    pub peer: UserId,
    seq: u64,
}

#[derive(Debug)]
struct PendingFetch {
    ticket: FetchTicket,
    /// Transcript length when the fetch started; later entries arrived live.
    live_from: usize,
    started_at: DateTime<Utc>,
}

pub struct ReconciliationEngine {
    local: LocalIdentity,
    view: ConversationView,
    transcripts: HashMap<UserId, Vec<Message>>,
    pending: Option<PendingFetch>,
    next_ticket: u64,
    ignored: u64,
}

impl ReconciliationEngine {
    pub fn new(local: LocalIdentity) -> Self {
        Self {
            local,
            view: ConversationView::new(),
            transcripts: HashMap::new(),
            pending: None,
            next_ticket: 0,
            ignored: 0,
        }
    }

    pub fn local(&self) -> &LocalIdentity {
        &self.local
    }

    pub fn view(&self) -> &ConversationView {
        &self.view
    }

    pub fn active_peer(&self) -> Option<UserId> {
        self.view.active_peer()
    }

    pub fn transcript(&self, peer: UserId) -> &[Message] {
        self.transcripts.get(&peer).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn is_loading(&self) -> bool {
        self.pending.is_some()
    }

    /// Number of inbound events rejected as malformed.
    pub fn ignored_count(&self) -> u64 {
        self.ignored
    }

    pub fn snapshot(&self) -> ViewSnapshot {
        let active_peer = self.view.active_peer();
        ViewSnapshot {
            active_peer,
            transcript: active_peer
                .map(|peer| self.transcript(peer).to_vec())
                .unwrap_or_default(),
            unread: self.view.unread_counts().clone(),
            loading: self.is_loading(),
        }
    }

    /// Handles the arguments of a `ReceiveMessage` invocation.
    pub fn handle_event(&mut self, arguments: &[Value]) -> InboundOutcome {
        match InboundMessage::parse(arguments) {
            Ok(event) => self.apply_inbound(event),
            Err(err) => {
                self.ignored += 1;
                log::debug!("Ignoring inbound event: {err}");
                InboundOutcome::Ignored
            }
        }
    }

    pub fn apply_inbound(&mut self, event: InboundMessage) -> InboundOutcome {
        let sender = event.sender_id();
        let receiver = event.receiver_id();
        let is_me = self.local.is_me(sender, event.sender_name.as_deref());

        if is_me && sender == receiver {
            log::debug!("Dropping own message to self");
            return InboundOutcome::SelfLoopback;
        }
        if is_me && self.view.is_active(receiver) {
            log::debug!("Dropping echo of own message to peer {receiver}");
            return InboundOutcome::SelfEcho;
        }

        let mut outcome = InboundOutcome::Background;
        if !is_me && !self.view.is_active(sender) {
            self.view.increment_unread(sender);
            outcome = InboundOutcome::Unread;
        }

        // Own events for the open conversation were dropped above, so only the
        // active peer's messages are rendered.
        if !self.view.is_active(sender) {
            return outcome;
        }

        let transcript = self.transcripts.entry(sender).or_default();
        if transcript.iter().any(|message| message.key() == event.key) {
            log::debug!("Message {} already in transcript", event.key);
            return InboundOutcome::Duplicate;
        }

        let (provenance, status) = if is_me {
            (Provenance::Mine, DeliveryStatus::Sent)
        } else {
            (Provenance::Other, DeliveryStatus::Delivered)
        };
        transcript.push(Message::new(
            event.key,
            event.sender_name,
            event.content,
            provenance,
            status,
        ));
        InboundOutcome::Appended
    }

    /// Appends an optimistic entry for text typed into the open conversation.
    /// The caller transmits it; the entry is not rolled back if that fails.
    pub fn send_message(&mut self, text: &str) -> Result<Message> {
        let Some(peer) = self.view.active_peer() else {
            return Err(ChatError::InvalidCommand("select a conversation first".into()));
        };
        if text.trim().is_empty() {
            return Err(ChatError::InvalidCommand("message is empty".into()));
        }

        let key = MessageKey {
            sent_at: Utc::now(),
            sender_id: self.local.user_id,
            receiver_id: peer,
        };
        let message = Message::new(
            key,
            Some(self.local.username.clone()),
            text,
            Provenance::Mine,
            DeliveryStatus::Sent,
        );
        self.transcripts.entry(peer).or_default().push(message.clone());
        Ok(message)
    }

    /// Opens a conversation: clears its unread count and starts a history fetch.
    pub fn select_peer(&mut self, peer: UserId) -> FetchTicket {
        self.view.set_active_peer(peer);
        self.next_ticket += 1;
        let ticket = FetchTicket {
            peer,
            seq: self.next_ticket,
        };
        let live_from = self.transcripts.get(&peer).map_or(0, Vec::len);
        let pending = PendingFetch {
            ticket,
            live_from,
            started_at: Utc::now(),
        };
        if let Some(previous) = self.pending.replace(pending) {
            log::debug!("History fetch for peer {} superseded", previous.ticket.peer);
        }
        ticket
    }

    /// Replaces the transcript with fetched history, keeping entries that arrived
    /// while the fetch was in flight. Returns false for a superseded fetch.
    pub fn apply_history(&mut self, ticket: FetchTicket, history: Vec<Message>) -> bool {
        let (live_from, started_at) = match &self.pending {
            Some(pending) if pending.ticket == ticket && self.view.is_active(ticket.peer) => {
                (pending.live_from, pending.started_at)
            }
            _ => {
                log::debug!("Discarding stale history for peer {}", ticket.peer);
                return false;
            }
        };
        self.pending = None;

        let mut seen = HashSet::with_capacity(history.len());
        let mut merged: Vec<Message> = history
            .into_iter()
            .filter(|message| seen.insert(message.key()))
            .collect();

        let stored_len = merged.len();
        let mut claimed = HashSet::new();
        let previous = self.transcripts.remove(&ticket.peer).unwrap_or_default();
        for live in previous.into_iter().skip(live_from) {
            let key = live.key();
            let stored = if seen.contains(&key) {
                merged.iter().position(|message| message.key() == key)
            } else if live.is_mine() {
                stored_copy_of_send(&merged[..stored_len], &live, started_at, &claimed)
            } else {
                None
            };

            match stored {
                Some(index) => {
                    claimed.insert(index);
                    let existing = &mut merged[index];
                    existing.id = live.id;
                    existing.status = existing.status.advance(live.status);
                }
                None => {
                    seen.insert(key);
                    merged.push(live);
                }
            }
        }

        log::debug!(
            "Transcript for peer {} reloaded with {} messages",
            ticket.peer,
            merged.len()
        );
        self.transcripts.insert(ticket.peer, merged);
        true
    }

    /// Drops the pending state of a failed fetch; the transcript stays as it was.
    pub fn abandon_fetch(&mut self, ticket: FetchTicket) -> bool {
        match &self.pending {
            Some(pending) if pending.ticket == ticket => {
                self.pending = None;
                true
            }
            _ => false,
        }
    }
}

/// An optimistic entry carries the local send time while the server stores its
/// own, so a send made during the fetch is matched by receiver and content among
/// own history entries stored since the fetch started.
fn stored_copy_of_send(
    stored: &[Message],
    sent: &Message,
    since: DateTime<Utc>,
    claimed: &HashSet<usize>,
) -> Option<usize> {
    stored.iter().enumerate().position(|(index, message)| {
        !claimed.contains(&index)
            && message.is_mine()
            && message.receiver_id == sent.receiver_id
            && message.content == sent.content
            && message.sent_at >= since
    })
}
