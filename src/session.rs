use crate::common::{LocalIdentity, UserId};
use crate::error::{ChatError, Result};
use crate::network::ApiClient;

/// Where the sync layer reads the authenticated session from.
pub trait SessionStore {
    fn token(&self) -> &str;
    fn local_user_id(&self) -> UserId;
    fn local_username(&self) -> &str;

    fn identity(&self) -> LocalIdentity {
        LocalIdentity {
            user_id: self.local_user_id(),
            username: self.local_username().to_owned(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub token: String,
    pub user_id: UserId,
    pub username: String,
}

impl Session {
    pub fn new(token: impl Into<String>, user_id: UserId, username: impl Into<String>) -> Result<Self> {
        let token = token.into();
        if token.trim().is_empty() {
            return Err(ChatError::Auth("session has no access token".into()));
        }
        Ok(Self {
            token,
            user_id,
            username: username.into(),
        })
    }

    pub async fn login(api: &ApiClient, username: &str, password: &str) -> Result<Self> {
        let response = api.login(username, password).await?;
        log::info!("Logged in as {username} (user {})", response.user_id);
        Self::new(response.token, response.user_id, username)
    }

    /// Creates the account, then uses the token it comes back with.
    pub async fn register(api: &ApiClient, username: &str, password: &str) -> Result<Self> {
        let response = api.register(username, password).await?;
        log::info!("Registered {username} as user {}", response.user_id);
        Self::new(response.token, response.user_id, username)
    }
}

impl SessionStore for Session {
    fn token(&self) -> &str {
        &self.token
    }

    fn local_user_id(&self) -> UserId {
        self.user_id
    }

    fn local_username(&self) -> &str {
        &self.username
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    #[test]
    fn blank_token_is_rejected() {
        assert!(Session::new("  ", 1, "alice").unwrap_err().is_auth());
    }

    #[tokio::test]
    async fn register_builds_a_session_from_the_response() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/auth/register"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"token": "fresh", "userId": 7})))
            .mount(&server)
            .await;

        let api = ApiClient::new(format!("{}/api", server.uri()));
        let session = Session::register(&api, "dora", "pw").await.unwrap();

        assert_eq!(session.token(), "fresh");
        assert_eq!(
            session.identity(),
            LocalIdentity {
                user_id: 7,
                username: "dora".into()
            }
        );
    }

    #[tokio::test]
    async fn rejected_login_is_an_auth_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/auth/login"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;

        let api = ApiClient::new(format!("{}/api", server.uri()));
        let err = Session::login(&api, "dora", "wrong").await.unwrap_err();
        assert!(err.is_auth());
    }
}
