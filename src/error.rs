use thiserror::Error;

pub type Result<T> = std::result::Result<T, ChatError>;

/// Errors of the chat client.
#[derive(Debug, Error)]
pub enum ChatError {
    /// Credential missing, expired or rejected. Fatal to the session.
    #[error("authentication failed: {0}")]
    Auth(String),

    /// The realtime link is not usable (not connected, dropped, handshake refused).
    #[error("transport error: {0}")]
    Transport(String),

    /// A REST call failed for a reason other than authentication.
    #[error("network error: {message}")]
    Network {
        message: String,
        #[source]
        source: Option<reqwest::Error>,
    },

    /// Inbound hub event missing required fields.
    #[error("malformed event: {0}")]
    MalformedEvent(String),

    /// A user command that cannot be carried out as given.
    #[error("{0}")]
    InvalidCommand(String),

    #[error("configuration error: {0}")]
    Config(String),
}

impl ChatError {
    pub fn transport(message: impl Into<String>) -> Self {
        ChatError::Transport(message.into())
    }

    pub fn network(message: impl Into<String>) -> Self {
        ChatError::Network {
            message: message.into(),
            source: None,
        }
    }

    pub fn is_auth(&self) -> bool {
        matches!(self, ChatError::Auth(_))
    }
}

impl From<reqwest::Error> for ChatError {
    fn from(err: reqwest::Error) -> Self {
        if err.status() == Some(reqwest::StatusCode::UNAUTHORIZED) {
            return ChatError::Auth(err.to_string());
        }
        ChatError::Network {
            message: err.to_string(),
            source: Some(err),
        }
    }
}
