use std::pin::Pin;

use futures::future::{self, BoxFuture};
use futures::{FutureExt, Sink, SinkExt, Stream, StreamExt};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::{self, Message as WsMessage, http::StatusCode};

use crate::error::{ChatError, Result};

use super::protocol;

pub type FrameSink = Pin<Box<dyn Sink<String, Error = ChatError> + Send>>;
pub type FrameStream = Pin<Box<dyn Stream<Item = Result<String>> + Send>>;

/// An open, handshaken link to the hub carrying raw text frames.
pub struct HubLink {
    pub sink: FrameSink,
    pub stream: FrameStream,
}

/// Opens hub links. The connection manager reconnects through this.
pub trait Connector: Send + Sync + 'static {
    fn connect(&self, token: &str) -> BoxFuture<'static, Result<HubLink>>;
}

/// WebSocket transport (`/chat?access_token=...`).
pub struct WebSocketConnector {
    hub_url: String,
}

impl WebSocketConnector {
    pub fn new(hub_url: impl Into<String>) -> Self {
        Self {
            hub_url: hub_url.into(),
        }
    }
}

impl Connector for WebSocketConnector {
    fn connect(&self, token: &str) -> BoxFuture<'static, Result<HubLink>> {
        let url = format!("{}?access_token={}", self.hub_url, token);
        let hub_url = self.hub_url.clone();

        async move {
            log::info!("Opening hub connection to {hub_url}");
            let (socket, _response) = connect_async(url.as_str()).await.map_err(map_ws_error)?;
            let (mut write, mut read) = socket.split();

            write
                .send(WsMessage::text(protocol::handshake_request()))
                .await
                .map_err(map_ws_error)?;

            loop {
                match read.next().await {
                    Some(Ok(WsMessage::Text(text))) => {
                        protocol::check_handshake(text.as_str())?;
                        break;
                    }
                    Some(Ok(WsMessage::Close(_))) | None => {
                        return Err(ChatError::transport("hub closed during handshake"));
                    }
                    Some(Ok(_)) => continue,
                    Some(Err(err)) => return Err(map_ws_error(err)),
                }
            }
            log::debug!("Hub handshake completed");

            let sink = write
                .with(|frame: String| {
                    future::ready(Ok::<_, tungstenite::Error>(WsMessage::text(frame)))
                })
                .sink_map_err(map_ws_error);
            let stream = read.filter_map(|message| {
                future::ready(match message {
                    Ok(WsMessage::Text(text)) => Some(Ok(text.as_str().to_owned())),
                    Ok(WsMessage::Close(frame)) => Some(Err(ChatError::transport(format!(
                        "hub closed the socket: {frame:?}"
                    )))),
                    Ok(_) => None,
                    Err(err) => Some(Err(map_ws_error(err))),
                })
            });

            Ok(HubLink {
                sink: Box::pin(sink),
                stream: Box::pin(stream),
            })
        }
        .boxed()
    }
}

fn map_ws_error(err: tungstenite::Error) -> ChatError {
    match &err {
        tungstenite::Error::Http(response) if response.status() == StatusCode::UNAUTHORIZED => {
            ChatError::Auth("hub rejected the access token".into())
        }
        _ => ChatError::transport(err.to_string()),
    }
}

/// Derives the hub WebSocket URL from the HTTP server URL.
pub fn hub_url(server_url: &str, hub_path: &str) -> String {
    let base = server_url.trim_end_matches('/');
    let base = if let Some(rest) = base.strip_prefix("https://") {
        format!("wss://{rest}")
    } else if let Some(rest) = base.strip_prefix("http://") {
        format!("ws://{rest}")
    } else {
        base.to_string()
    };
    format!("{}/{}", base, hub_path.trim_start_matches('/'))
}
