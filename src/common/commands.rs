use super::types::UserId;

/// Commands the UI sends down to the sync loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UiCommand {
    /// Open the conversation with a peer and reload its history.
    SelectPeer(UserId),
    /// Send text to the active peer.
    SendMessage(String),
    RefreshUsers,
    /// Start the realtime connection again after it gave up.
    Reconnect,
    Logout,
}
