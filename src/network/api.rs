use futures::FutureExt;
use futures::future::BoxFuture;
use reqwest::header::CONTENT_TYPE;
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::common::types::{User, UserId};
use crate::error::{ChatError, Result};

/// One entry of `GET /messages/{peerId}` as the server sends it.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryRecord {
    pub sender_id: UserId,
    pub receiver_id: UserId,
    #[serde(default)]
    pub sender_name: Option<String>,
    #[serde(default)]
    pub content: String,
    pub sent_at: String,
    #[serde(default)]
    pub is_read: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginResponse {
    pub token: String,
    pub user_id: UserId,
}

#[derive(Serialize)]
struct Credentials<'a> {
    username: &'a str,
    password: &'a str,
}

/// REST endpoints the sync client reads from.
pub trait ChatApi: Send + Sync + 'static {
    fn fetch_users(&self) -> BoxFuture<'static, Result<Vec<User>>>;
    fn fetch_messages(&self, peer: UserId) -> BoxFuture<'static, Result<Vec<HistoryRecord>>>;
}

#[derive(Clone)]
pub struct ApiClient {
    http: Client,
    base_url: String,
    token: Option<String>,
}

impl ApiClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            http: Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token: None,
        }
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    pub async fn login(&self, username: &str, password: &str) -> Result<LoginResponse> {
        self.authenticate("auth/login", username, password).await
    }

    pub async fn register(&self, username: &str, password: &str) -> Result<LoginResponse> {
        self.authenticate("auth/register", username, password).await
    }

    pub async fn users(&self) -> Result<Vec<User>> {
        self.get_json("users").await
    }

    pub async fn messages(&self, peer: UserId) -> Result<Vec<HistoryRecord>> {
        self.get_json(&format!("messages/{peer}")).await
    }

    async fn authenticate(&self, path: &str, username: &str, password: &str) -> Result<LoginResponse> {
        let request = self
            .http
            .post(self.url(path))
            .json(&Credentials { username, password });
        self.execute(request).await
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let mut request = self.http.get(self.url(path));
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }
        self.execute(request).await
    }

    async fn execute<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T> {
        let response = request.send().await?;
        let status = response.status();
        if status == StatusCode::UNAUTHORIZED {
            return Err(ChatError::Auth(format!("server answered {status}")));
        }

        // An expired session gets redirected to the login page, which comes back as HTML.
        let is_html = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .is_some_and(|value| value.starts_with("text/html"));
        if is_html {
            return Err(ChatError::Auth("server returned an HTML page instead of JSON".into()));
        }

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            log::warn!("Request failed with {status}: {body}");
            return Err(ChatError::network(format!("server answered {status}")));
        }

        Ok(response.json::<T>().await?)
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path)
    }
}

impl ChatApi for ApiClient {
    fn fetch_users(&self) -> BoxFuture<'static, Result<Vec<User>>> {
        let client = self.clone();
        async move { client.users().await }.boxed()
    }

    fn fetch_messages(&self, peer: UserId) -> BoxFuture<'static, Result<Vec<HistoryRecord>>> {
        let client = self.clone();
        async move { client.messages(peer).await }.boxed()
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use wiremock::matchers::{body_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    fn client(server: &MockServer) -> ApiClient {
        ApiClient::new(format!("{}/api", server.uri())).with_token("secret")
    }

    #[tokio::test]
    async fn messages_are_fetched_with_bearer_token() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/messages/2"))
            .and(header("authorization", "Bearer secret"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                {"senderId": 1, "receiverId": 2, "senderName": "alice", "content": "hi", "sentAt": "2025-03-01T10:00:00", "isRead": true},
                {"senderId": 2, "receiverId": 1, "content": "hey", "sentAt": "2025-03-01T10:01:00"}
            ])))
            .mount(&server)
            .await;

        let records = client(&server).messages(2).await.unwrap();

        assert_eq!(records.len(), 2);
        assert!(records[0].is_read);
        assert_eq!(records[1].sender_name, None);
        assert!(!records[1].is_read);
    }

    #[tokio::test]
    async fn unauthorized_is_an_auth_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/users"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;

        let err = client(&server).users().await.unwrap_err();
        assert!(err.is_auth());
    }

    #[tokio::test]
    async fn html_login_page_is_an_auth_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/users"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_raw("<html><body>Login</body></html>", "text/html; charset=utf-8"),
            )
            .mount(&server)
            .await;

        let err = client(&server).users().await.unwrap_err();
        assert!(err.is_auth());
    }

    #[tokio::test]
    async fn server_errors_are_network_errors() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/messages/9"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let err = client(&server).messages(9).await.unwrap_err();
        assert!(matches!(err, ChatError::Network { .. }));
    }

    #[tokio::test]
    async fn login_posts_credentials() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/auth/login"))
            .and(body_json(json!({"username": "alice", "password": "pw"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"token": "t0k", "userId": 1})))
            .mount(&server)
            .await;

        let response = ApiClient::new(format!("{}/api", server.uri()))
            .login("alice", "pw")
            .await
            .unwrap();
        assert_eq!(response.token, "t0k");
        assert_eq!(response.user_id, 1);
    }

    #[tokio::test]
    async fn users_are_listed() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/users"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                {"id": 2, "username": "bob"},
                {"id": 3, "username": "carol"}
            ])))
            .mount(&server)
            .await;

        let users = client(&server).fetch_users().await.unwrap();
        assert_eq!(
            users,
            vec![
                User { id: 2, username: "bob".into() },
                User { id: 3, username: "carol".into() },
            ]
        );
    }
}
