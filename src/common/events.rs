use crate::network::ConnectionState;

use super::types::{User, ViewSnapshot};

/// Events the sync loop publishes to the UI.
#[derive(Debug, Clone)]
pub enum SyncEvent {
    Connection(ConnectionState),
    Users(Vec<User>),
    View(ViewSnapshot),
    /// Recoverable failure the user should see (send refused, history fetch failed).
    Failure(String),
    /// Credential rejected; the session is over.
    SessionExpired,
    LoggedOut,
}
