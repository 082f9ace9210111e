//! Owner of the single realtime hub connection.
//!
//! The manager holds at most one live link. A driver task pumps frames between
//! the link and the rest of the client, reconnects on transport failure with the
//! configured backoff schedule, and dispatches hub invocations to subscribers.
//! Subscriptions live in the manager, not in the link, so they survive reconnects.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;

use crate::error::{ChatError, Result};

use super::protocol::{self, HubInvocation, HubMessage, OutboundEvent};
use super::transport::{Connector, HubLink};

const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Reconnecting => "reconnecting",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone)]
pub struct ConnectionSettings {
    /// Delay before each reconnect attempt; the connection gives up after the last one.
    pub reconnect_delays: Vec<Duration>,
    pub keep_alive: Duration,
    pub outbound_capacity: usize,
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self {
            reconnect_delays: [0, 2, 10, 30].into_iter().map(Duration::from_secs).collect(),
            keep_alive: Duration::from_secs(15),
            outbound_capacity: 100,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionToken(u64);

pub type InvocationHandler = mpsc::Sender<HubInvocation>;

#[derive(Default)]
struct Registry {
    next_token: u64,
    entries: Vec<(SubscriptionToken, String, InvocationHandler)>,
}

impl Registry {
    fn matching(&self, target: &str) -> Vec<(SubscriptionToken, InvocationHandler)> {
        self.entries
            .iter()
            .filter(|(_, entry_target, _)| entry_target == target)
            .map(|(token, _, handler)| (*token, handler.clone()))
            .collect()
    }

    fn remove(&mut self, token: SubscriptionToken) -> bool {
        let before = self.entries.len();
        self.entries.retain(|(entry, _, _)| *entry != token);
        self.entries.len() != before
    }
}

fn lock(registry: &Mutex<Registry>) -> MutexGuard<'_, Registry> {
    registry.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Debug)]
struct Outbound {
    frame: String,
    ack: oneshot::Sender<Result<()>>,
}

/// Cheap handle to the live connection.
#[derive(Clone, Debug)]
pub struct ConnectionHandle {
    outbound: mpsc::Sender<Outbound>,
    state: watch::Receiver<ConnectionState>,
}

impl ConnectionHandle {
    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    pub fn same_connection(&self, other: &ConnectionHandle) -> bool {
        self.outbound.same_channel(&other.outbound)
    }

    /// Writes one event to the hub. Fails fast unless connected; nothing is queued
    /// for a later reconnect.
    pub async fn send(&self, event: &OutboundEvent) -> Result<()> {
        let state = self.state();
        if state != ConnectionState::Connected {
            return Err(ChatError::transport(format!("cannot send while {state}")));
        }

        let (ack, written) = oneshot::channel();
        self.outbound
            .send(Outbound {
                frame: protocol::encode(event),
                ack,
            })
            .await
            .map_err(|_| ChatError::transport("connection task stopped"))?;
        written
            .await
            .map_err(|_| ChatError::transport("connection dropped before the message was written"))?
    }
}

struct LiveConnection {
    handle: ConnectionHandle,
    shutdown: Option<oneshot::Sender<()>>,
    task: JoinHandle<()>,
}

pub struct ConnectionManager {
    connector: Arc<dyn Connector>,
    settings: ConnectionSettings,
    registry: Arc<Mutex<Registry>>,
    state: Arc<watch::Sender<ConnectionState>>,
    live: Option<LiveConnection>,
}

impl ConnectionManager {
    pub fn new(connector: Arc<dyn Connector>, settings: ConnectionSettings) -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            connector,
            settings,
            registry: Arc::new(Mutex::new(Registry::default())),
            state: Arc::new(state),
            live: None,
        }
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    /// Opens the hub connection, or returns the existing handle when one is
    /// already connecting or connected.
    pub async fn connect(&mut self, token: &str) -> Result<ConnectionHandle> {
        if token.trim().is_empty() {
            return Err(ChatError::Auth("no access token for the hub connection".into()));
        }

        if let Some(live) = &self.live {
            if self.state() != ConnectionState::Disconnected && !live.task.is_finished() {
                log::debug!("Hub connection already {}; reusing it", self.state());
                return Ok(live.handle.clone());
            }
        }
        if let Some(stale) = self.live.take() {
            stale.task.abort();
        }

        self.state.send_replace(ConnectionState::Connecting);
        let link = match self.connector.connect(token).await {
            Ok(link) => link,
            Err(err) => {
                log::warn!("Hub connection failed: {err}");
                self.state.send_replace(ConnectionState::Disconnected);
                return Err(err);
            }
        };
        self.state.send_replace(ConnectionState::Connected);
        log::info!("Hub connected");

        let (outbound_tx, outbound_rx) = mpsc::channel(self.settings.outbound_capacity.max(1));
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let driver = Driver {
            connector: Arc::clone(&self.connector),
            token: token.to_owned(),
            settings: self.settings.clone(),
            registry: Arc::clone(&self.registry),
            state: Arc::clone(&self.state),
        };
        let task = tokio::spawn(driver.run(link, outbound_rx, shutdown_rx));

        let handle = ConnectionHandle {
            outbound: outbound_tx,
            state: self.state.subscribe(),
        };
        self.live = Some(LiveConnection {
            handle: handle.clone(),
            shutdown: Some(shutdown_tx),
            task,
        });
        Ok(handle)
    }

    pub async fn send(&self, event: &OutboundEvent) -> Result<()> {
        match &self.live {
            Some(live) => live.handle.send(event).await,
            None => Err(ChatError::transport(format!("cannot send while {}", self.state()))),
        }
    }

    /// Registers a handler for invocations of `target`. Kept across reconnects.
    pub fn subscribe(&self, target: &str, handler: InvocationHandler) -> SubscriptionToken {
        let mut registry = lock(&self.registry);
        registry.next_token += 1;
        let token = SubscriptionToken(registry.next_token);
        registry.entries.push((token, target.to_owned(), handler));
        token
    }

    pub fn unsubscribe(&self, token: SubscriptionToken) -> bool {
        lock(&self.registry).remove(token)
    }

    pub fn subscription_count(&self) -> usize {
        lock(&self.registry).entries.len()
    }

    /// Closes the link and drops every subscription so the next `connect`
    /// starts from a clean slate.
    pub async fn disconnect(&mut self) {
        if let Some(mut live) = self.live.take() {
            if let Some(shutdown) = live.shutdown.take() {
                let _ = shutdown.send(());
            }
            if tokio::time::timeout(SHUTDOWN_GRACE, &mut live.task).await.is_err() {
                log::warn!("Hub connection task did not stop in time; aborting it");
                live.task.abort();
            }
        }
        lock(&self.registry).entries.clear();
        self.state.send_replace(ConnectionState::Disconnected);
        log::info!("Hub disconnected");
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        if let Some(live) = &self.live {
            live.task.abort();
        }
    }
}

enum LinkEnd {
    Shutdown,
    Lost(ChatError),
}

struct Driver {
    connector: Arc<dyn Connector>,
    token: String,
    settings: ConnectionSettings,
    registry: Arc<Mutex<Registry>>,
    state: Arc<watch::Sender<ConnectionState>>,
}

impl Driver {
    async fn run(
        self,
        mut link: HubLink,
        mut outbound: mpsc::Receiver<Outbound>,
        mut shutdown: oneshot::Receiver<()>,
    ) {
        loop {
            match self.pump(&mut link, &mut outbound, &mut shutdown).await {
                LinkEnd::Shutdown => {
                    if let Err(err) = link.sink.close().await {
                        log::debug!("Error while closing hub link: {err}");
                    }
                    break;
                }
                LinkEnd::Lost(err) => {
                    log::warn!("Hub connection lost: {err}");
                    self.state.send_replace(ConnectionState::Reconnecting);
                    fail_pending(&mut outbound);

                    match self.reconnect(&mut shutdown).await {
                        Some(next) => {
                            fail_pending(&mut outbound);
                            link = next;
                            self.state.send_replace(ConnectionState::Connected);
                            log::info!("Hub connection restored");
                        }
                        None => {
                            self.state.send_replace(ConnectionState::Disconnected);
                            break;
                        }
                    }
                }
            }
        }
    }

    async fn pump(
        &self,
        link: &mut HubLink,
        outbound: &mut mpsc::Receiver<Outbound>,
        shutdown: &mut oneshot::Receiver<()>,
    ) -> LinkEnd {
        let mut keep_alive = tokio::time::interval(self.settings.keep_alive);
        keep_alive.tick().await;

        loop {
            tokio::select! {
                _ = &mut *shutdown => return LinkEnd::Shutdown,
                request = outbound.recv() => {
                    let Some(Outbound { frame, ack }) = request else {
                        return LinkEnd::Shutdown;
                    };
                    match link.sink.send(frame).await {
                        Ok(()) => {
                            let _ = ack.send(Ok(()));
                        }
                        Err(err) => {
                            let _ = ack.send(Err(ChatError::transport(err.to_string())));
                            return LinkEnd::Lost(err);
                        }
                    }
                }
                frame = link.stream.next() => match frame {
                    Some(Ok(payload)) => {
                        if let Some(end) = self.dispatch(&payload).await {
                            return end;
                        }
                    }
                    Some(Err(err)) => return LinkEnd::Lost(err),
                    None => return LinkEnd::Lost(ChatError::transport("hub closed the connection")),
                },
                _ = keep_alive.tick() => {
                    if let Err(err) = link.sink.send(protocol::ping()).await {
                        return LinkEnd::Lost(err);
                    }
                }
            }
        }
    }

    async fn dispatch(&self, payload: &str) -> Option<LinkEnd> {
        for record in protocol::split_records(payload) {
            match protocol::decode(record) {
                Ok(HubMessage::Invocation(invocation)) => self.deliver(invocation).await,
                Ok(HubMessage::Close { error }) => {
                    let reason = error.unwrap_or_else(|| "no reason given".into());
                    return Some(LinkEnd::Lost(ChatError::transport(format!(
                        "hub sent close: {reason}"
                    ))));
                }
                Ok(HubMessage::Completion {
                    error: Some(error),
                    invocation_id,
                }) => {
                    log::warn!("Hub invocation {invocation_id:?} failed: {error}");
                }
                Ok(HubMessage::Ping | HubMessage::Completion { .. } | HubMessage::Other(_)) => {}
                Err(err) => log::debug!("Skipping hub record: {err}"),
            }
        }
        None
    }

    async fn deliver(&self, invocation: HubInvocation) {
        let handlers = lock(&self.registry).matching(&invocation.target);
        if handlers.is_empty() {
            log::debug!("No subscriber for hub target {}", invocation.target);
            return;
        }

        for (token, handler) in handlers {
            if handler.send(invocation.clone()).await.is_err() {
                log::debug!("Dropping closed subscription {token:?}");
                lock(&self.registry).remove(token);
            }
        }
    }

    async fn reconnect(&self, shutdown: &mut oneshot::Receiver<()>) -> Option<HubLink> {
        for (attempt, delay) in self.settings.reconnect_delays.iter().enumerate() {
            let attempt = attempt + 1;
            tokio::select! {
                _ = &mut *shutdown => return None,
                _ = tokio::time::sleep(*delay) => {}
            }

            log::info!("Reconnecting to hub (attempt {attempt})");
            let result = tokio::select! {
                _ = &mut *shutdown => return None,
                result = self.connector.connect(&self.token) => result,
            };
            match result {
                Ok(link) => return Some(link),
                Err(err) if err.is_auth() => {
                    log::error!("Hub rejected the credential while reconnecting: {err}");
                    return None;
                }
                Err(err) => log::warn!("Reconnect attempt {attempt} failed: {err}"),
            }
        }

        log::error!(
            "Giving up on the hub after {} reconnect attempts",
            self.settings.reconnect_delays.len()
        );
        None
    }
}

fn fail_pending(outbound: &mut mpsc::Receiver<Outbound>) {
    while let Ok(Outbound { ack, .. }) = outbound.try_recv() {
        let _ = ack.send(Err(ChatError::transport(
            "connection lost before the message was written",
        )));
    }
}
