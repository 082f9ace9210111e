use std::collections::HashMap;

use crate::common::types::UserId;

/// Which conversation is open, and unread counts for the rest.
///
/// The active peer's unread count is always zero: increments for it are ignored
/// and selecting a peer clears its count.
#[derive(Debug, Default, Clone)]
pub struct ConversationView {
    active: Option<UserId>,
    unread: HashMap<UserId, u32>,
}

impl ConversationView {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn active_peer(&self) -> Option<UserId> {
        self.active
    }

    pub fn is_active(&self, peer: UserId) -> bool {
        self.active == Some(peer)
    }

    pub fn set_active_peer(&mut self, peer: UserId) {
        self.active = Some(peer);
        self.clear_unread(peer);
    }

    pub fn unread_for(&self, peer: UserId) -> u32 {
        self.unread.get(&peer).copied().unwrap_or(0)
    }

    pub fn increment_unread(&mut self, peer: UserId) {
        if self.is_active(peer) {
            return;
        }
        *self.unread.entry(peer).or_insert(0) += 1;
    }

    pub fn unread_counts(&self) -> &HashMap<UserId, u32> {
        &self.unread
    }

    // Only selection clears a counter.
    fn clear_unread(&mut self, peer: UserId) {
        self.unread.remove(&peer);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_with_no_active_peer() {
        let view = ConversationView::new();
        assert_eq!(view.active_peer(), None);
        assert_eq!(view.unread_for(3), 0);
    }

    #[test]
    fn selecting_a_peer_resets_its_count() {
        let mut view = ConversationView::new();
        view.increment_unread(3);
        view.increment_unread(3);
        view.increment_unread(4);
        assert_eq!(view.unread_for(3), 2);

        view.set_active_peer(3);
        assert_eq!(view.active_peer(), Some(3));
        assert_eq!(view.unread_for(3), 0);
        assert_eq!(view.unread_for(4), 1);
    }

    #[test]
    fn active_peer_never_accumulates_unread() {
        let mut view = ConversationView::new();
        view.set_active_peer(5);
        view.increment_unread(5);
        assert_eq!(view.unread_for(5), 0);

        view.set_active_peer(6);
        view.increment_unread(5);
        assert_eq!(view.unread_for(5), 1);
    }
}
