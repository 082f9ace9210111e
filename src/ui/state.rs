use chrono::{DateTime, Utc};

use crate::common::{LocalIdentity, SyncEvent, User, UserId, ViewSnapshot};
use crate::network::ConnectionState;

const MAX_ACTIVITY: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActivityKind {
    Connection,
    Failure,
    Session,
}

/// One line of the activity panel.
#[derive(Debug, Clone)]
pub struct ActivityEntry {
    pub timestamp: DateTime<Utc>,
    pub kind: ActivityKind,
    pub message: String,
}

/// Local UI state.
pub struct AppState {
    pub local: LocalIdentity,
    pub users: Vec<User>,
    pub search: String,
    pub view: ViewSnapshot,
    pub connection: ConnectionState,
    pub input_text: String,
    pub activity: Vec<ActivityEntry>,
    /// Set once the session ended; the UI stops sending commands.
    pub session_ended: Option<String>,
}

impl AppState {
    pub fn new(local: LocalIdentity) -> Self {
        Self {
            local,
            users: Vec::new(),
            search: String::new(),
            view: ViewSnapshot::default(),
            connection: ConnectionState::Disconnected,
            input_text: String::new(),
            activity: Vec::new(),
            session_ended: None,
        }
    }

    pub fn apply(&mut self, event: SyncEvent) {
        match event {
            SyncEvent::Connection(state) => {
                if state != self.connection {
                    self.connection = state;
                    self.add_activity(ActivityKind::Connection, format!("Connection {state}"));
                }
            }
            SyncEvent::Users(users) => self.users = users,
            SyncEvent::View(view) => self.view = view,
            SyncEvent::Failure(reason) => self.add_activity(ActivityKind::Failure, reason),
            SyncEvent::SessionExpired => self.end_session("Session expired, please log in again"),
            SyncEvent::LoggedOut => self.end_session("Logged out"),
        }
    }

    /// Users whose name contains the search text, case-insensitively.
    pub fn filtered_users(&self) -> impl Iterator<Item = &User> {
        let needle = self.search.trim().to_lowercase();
        self.users
            .iter()
            .filter(move |user| needle.is_empty() || user.username.to_lowercase().contains(&needle))
    }

    pub fn unread_for(&self, peer: UserId) -> u32 {
        self.view.unread.get(&peer).copied().unwrap_or(0)
    }

    pub fn peer_name(&self, peer: UserId) -> String {
        self.users
            .iter()
            .find(|user| user.id == peer)
            .map(|user| user.username.clone())
            .unwrap_or_else(|| format!("User {peer}"))
    }

    pub fn can_send(&self) -> bool {
        self.session_ended.is_none()
            && self.view.active_peer.is_some()
            && self.connection == ConnectionState::Connected
    }

    pub fn add_activity(&mut self, kind: ActivityKind, message: String) {
        self.activity.push(ActivityEntry {
            timestamp: Utc::now(),
            kind,
            message,
        });

        // keep at most MAX_ACTIVITY lines
        if self.activity.len() > MAX_ACTIVITY {
            self.activity.remove(0);
        }
    }

    fn end_session(&mut self, reason: &str) {
        self.add_activity(ActivityKind::Session, reason.to_string());
        self.session_ended = Some(reason.to_string());
        self.connection = ConnectionState::Disconnected;
    }
}
