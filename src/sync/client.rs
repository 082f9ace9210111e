use std::sync::Arc;

use tokio::sync::mpsc;

use crate::common::{LocalIdentity, Message, SyncEvent, UiCommand, User};
use crate::error::{ChatError, Result};
use crate::network::connection::{ConnectionHandle, InvocationHandler};
use crate::network::protocol::{self, HubInvocation, OutboundEvent};
use crate::network::{ChatApi, ConnectionManager, ConnectionState};
use crate::session::SessionStore;

use super::engine::{FetchTicket, ReconciliationEngine};
use super::history::HistoryLoader;

/// Results reported back to the loop by spawned tasks.
enum Completion {
    Users(Result<Vec<User>>),
    History {
        ticket: FetchTicket,
        result: Result<Vec<Message>>,
    },
    Sent(Result<()>),
}

enum Flow {
    Continue,
    Stop,
}

/// Single task that owns the engine and the hub connection for one session.
pub struct SyncClient {
    event_sender: mpsc::Sender<SyncEvent>,
    command_receiver: mpsc::Receiver<UiCommand>,
    connection: ConnectionManager,
    handle: Option<ConnectionHandle>,
    api: Arc<dyn ChatApi>,
    history: HistoryLoader,
    engine: ReconciliationEngine,
    token: String,
    channel_capacity: usize,
}

impl SyncClient {
    pub fn new(
        event_sender: mpsc::Sender<SyncEvent>,
        command_receiver: mpsc::Receiver<UiCommand>,
        connection: ConnectionManager,
        api: Arc<dyn ChatApi>,
        session: &impl SessionStore,
        channel_capacity: usize,
    ) -> Self {
        let local = session.identity();
        Self {
            event_sender,
            command_receiver,
            connection,
            handle: None,
            history: HistoryLoader::new(Arc::clone(&api), local.clone()),
            api,
            engine: ReconciliationEngine::new(local),
            token: session.token().to_owned(),
            channel_capacity: channel_capacity.max(1),
        }
    }

    pub fn local(&self) -> &LocalIdentity {
        self.engine.local()
    }

    /// Runs until logout, session expiry, or the UI dropping its command sender.
    /// The connection is torn down before returning.
    pub async fn run(mut self) -> Result<()> {
        let (inbound_tx, mut inbound_rx): (InvocationHandler, _) =
            mpsc::channel(self.channel_capacity);
        let subscription = self.connection.subscribe(protocol::RECEIVE_MESSAGE, inbound_tx);
        let (done_tx, mut done_rx) = mpsc::channel(self.channel_capacity);
        let mut state_rx = self.connection.watch_state();

        log::info!(
            "Sync loop started for {} (user {})",
            self.local().username,
            self.local().user_id
        );

        let mut flow = self.connect().await;
        if matches!(flow, Flow::Continue) {
            self.spawn_user_fetch(&done_tx);
        }

        while matches!(flow, Flow::Continue) {
            flow = tokio::select! {
                command = self.command_receiver.recv() => match command {
                    Some(command) => self.handle_command(command, &done_tx).await,
                    None => {
                        log::info!("UI closed; stopping sync loop");
                        Flow::Stop
                    }
                },
                Some(invocation) = inbound_rx.recv() => self.handle_invocation(invocation).await,
                Some(done) = done_rx.recv() => self.handle_completion(done).await,
                changed = state_rx.changed() => match changed {
                    Ok(()) => {
                        let state = *state_rx.borrow_and_update();
                        self.handle_state(state).await
                    }
                    Err(_) => Flow::Stop,
                },
            };
        }

        self.connection.unsubscribe(subscription);
        self.connection.disconnect().await;
        log::info!("Sync loop stopped");
        Ok(())
    }

    async fn connect(&mut self) -> Flow {
        match self.connection.connect(&self.token).await {
            Ok(handle) => {
                self.handle = Some(handle);
                Flow::Continue
            }
            Err(err) => self.report(err).await,
        }
    }

    async fn handle_command(&mut self, command: UiCommand, done: &mpsc::Sender<Completion>) -> Flow {
        match command {
            UiCommand::SelectPeer(peer) => {
                let ticket = self.engine.select_peer(peer);
                self.publish_view().await;
                self.spawn_history_fetch(ticket, done);
                Flow::Continue
            }
            UiCommand::SendMessage(text) => match self.engine.send_message(&text) {
                Ok(message) => {
                    self.publish_view().await;
                    self.spawn_send(message, done).await
                }
                Err(err) => self.report(err).await,
            },
            UiCommand::RefreshUsers => {
                self.spawn_user_fetch(done);
                Flow::Continue
            }
            UiCommand::Reconnect => {
                if self.connection.state() == ConnectionState::Disconnected {
                    self.connect().await
                } else {
                    log::debug!("Reconnect ignored; hub is {}", self.connection.state());
                    Flow::Continue
                }
            }
            UiCommand::Logout => {
                log::info!("Logging out");
                self.emit(SyncEvent::LoggedOut).await;
                Flow::Stop
            }
        }
    }

    async fn handle_invocation(&mut self, invocation: HubInvocation) -> Flow {
        let outcome = self.engine.handle_event(&invocation.arguments);
        log::debug!("Inbound {} -> {outcome:?}", invocation.target);
        if outcome.changes_view() {
            self.publish_view().await;
        }
        Flow::Continue
    }

    async fn handle_completion(&mut self, completion: Completion) -> Flow {
        match completion {
            Completion::Users(Ok(users)) => {
                let local_id = self.local().user_id;
                let users = users.into_iter().filter(|user| user.id != local_id).collect();
                self.emit(SyncEvent::Users(users)).await;
                Flow::Continue
            }
            Completion::History { ticket, result } => match result {
                Ok(messages) => {
                    if self.engine.apply_history(ticket, messages) {
                        self.publish_view().await;
                    }
                    Flow::Continue
                }
                Err(err) => {
                    if self.engine.abandon_fetch(ticket) {
                        self.publish_view().await;
                        self.report(err).await
                    } else if err.is_auth() {
                        self.report(err).await
                    } else {
                        log::debug!("Ignoring failure of superseded history fetch: {err}");
                        Flow::Continue
                    }
                }
            },
            Completion::Sent(Ok(())) => Flow::Continue,
            Completion::Users(Err(err)) | Completion::Sent(Err(err)) => self.report(err).await,
        }
    }

    async fn handle_state(&mut self, state: ConnectionState) -> Flow {
        log::debug!("Hub connection is {state}");
        self.emit(SyncEvent::Connection(state)).await;
        Flow::Continue
    }

    /// Auth failures end the session; everything else is shown and the loop goes on.
    async fn report(&mut self, err: ChatError) -> Flow {
        match err {
            ChatError::Auth(reason) => {
                log::warn!("Session expired: {reason}");
                self.emit(SyncEvent::SessionExpired).await;
                Flow::Stop
            }
            ChatError::MalformedEvent(reason) => {
                log::debug!("Malformed event: {reason}");
                Flow::Continue
            }
            other => {
                log::warn!("{other}");
                self.emit(SyncEvent::Failure(other.to_string())).await;
                Flow::Continue
            }
        }
    }

    fn spawn_user_fetch(&self, done: &mpsc::Sender<Completion>) {
        let api = Arc::clone(&self.api);
        let done = done.clone();
        tokio::spawn(async move {
            let result = api.fetch_users().await;
            let _ = done.send(Completion::Users(result)).await;
        });
    }

    fn spawn_history_fetch(&self, ticket: FetchTicket, done: &mpsc::Sender<Completion>) {
        let loader = self.history.clone();
        let done = done.clone();
        tokio::spawn(async move {
            let result = loader.load_history(ticket.peer).await;
            let _ = done.send(Completion::History { ticket, result }).await;
        });
    }

    /// The write is awaited off the loop so inbound delivery never waits on it.
    async fn spawn_send(&mut self, message: Message, done: &mpsc::Sender<Completion>) -> Flow {
        let Some(handle) = self.handle.clone() else {
            return self
                .report(ChatError::transport("not connected to the chat server"))
                .await;
        };
        let Message {
            id,
            receiver_id,
            content,
            ..
        } = message;
        let event = OutboundEvent::SendMessage { receiver_id, content };
        let done = done.clone();
        tokio::spawn(async move {
            let result = handle.send(&event).await;
            if let Err(err) = &result {
                log::warn!("Message {id} not sent: {err}");
            }
            let _ = done.send(Completion::Sent(result)).await;
        });
        Flow::Continue
    }

    async fn publish_view(&self) {
        self.emit(SyncEvent::View(self.engine.snapshot())).await;
    }

    async fn emit(&self, event: SyncEvent) {
        if self.event_sender.send(event).await.is_err() {
            log::debug!("UI event receiver dropped");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::time::Duration;

    use futures::FutureExt;
    use futures::future::{self, BoxFuture};
    use tokio::task::JoinHandle;
    use tokio::time::timeout;

    use super::*;
    use crate::common::{UserId, ViewSnapshot};
    use crate::network::ConnectionSettings;
    use crate::network::HistoryRecord;
    use crate::network::transport::testing::{MemoryConnector, ServerEnd, memory_link};
    use crate::session::Session;

    const WAIT: Duration = Duration::from_secs(2);

    #[derive(Default)]
    struct FakeApi {
        users: Vec<User>,
        history: HashMap<UserId, Vec<HistoryRecord>>,
        expired: bool,
    }

    impl ChatApi for FakeApi {
        fn fetch_users(&self) -> BoxFuture<'static, Result<Vec<User>>> {
            let result = if self.expired {
                Err(ChatError::Auth("expired".into()))
            } else {
                Ok(self.users.clone())
            };
            future::ready(result).boxed()
        }

        fn fetch_messages(&self, peer: UserId) -> BoxFuture<'static, Result<Vec<HistoryRecord>>> {
            let records = self.history.get(&peer).cloned().unwrap_or_default();
            future::ready(Ok(records)).boxed()
        }
    }

    struct Harness {
        commands: mpsc::Sender<UiCommand>,
        events: mpsc::Receiver<SyncEvent>,
        server: ServerEnd,
        connector: Arc<MemoryConnector>,
        task: JoinHandle<Result<()>>,
    }

    impl Harness {
        async fn next_matching(&mut self, mut want: impl FnMut(&SyncEvent) -> bool) -> SyncEvent {
            loop {
                let event = timeout(WAIT, self.events.recv())
                    .await
                    .expect("no event in time")
                    .expect("event channel closed");
                if want(&event) {
                    return event;
                }
            }
        }

        async fn next_view(&mut self, mut want: impl FnMut(&ViewSnapshot) -> bool) -> ViewSnapshot {
            match self
                .next_matching(|event| matches!(event, SyncEvent::View(view) if want(view)))
                .await
            {
                SyncEvent::View(view) => view,
                _ => unreachable!(),
            }
        }
    }

    fn start(api: FakeApi) -> Harness {
        let connector = Arc::new(MemoryConnector::default());
        let server = connector.queue_link();
        let settings = ConnectionSettings {
            reconnect_delays: vec![Duration::ZERO],
            ..ConnectionSettings::default()
        };
        let connection = ConnectionManager::new(connector.clone(), settings);
        let (cmd_tx, cmd_rx) = mpsc::channel(16);
        let (event_tx, event_rx) = mpsc::channel(64);
        let session = Session::new("token", 1, "alice").unwrap();

        let client = SyncClient::new(event_tx, cmd_rx, connection, Arc::new(api), &session, 16);
        Harness {
            commands: cmd_tx,
            events: event_rx,
            server,
            connector,
            task: tokio::spawn(client.run()),
        }
    }

    fn push(sender: UserId, receiver: UserId, content: &str, sent_at: &str) -> String {
        format!(
            "{{\"type\":1,\"target\":\"ReceiveMessage\",\"arguments\":[{{\"senderId\":{sender},\"receiverId\":{receiver},\"content\":\"{content}\",\"sentAt\":\"{sent_at}\"}}]}}\u{1e}"
        )
    }

    fn users() -> Vec<User> {
        vec![
            User { id: 1, username: "alice".into() },
            User { id: 2, username: "bob".into() },
        ]
    }

    #[tokio::test]
    async fn publishes_connection_state_and_peers() {
        let mut harness = start(FakeApi {
            users: users(),
            ..FakeApi::default()
        });

        harness
            .next_matching(|event| matches!(event, SyncEvent::Connection(ConnectionState::Connected)))
            .await;
        let event = harness
            .next_matching(|event| matches!(event, SyncEvent::Users(_)))
            .await;
        let SyncEvent::Users(listed) = event else { unreachable!() };
        assert_eq!(listed, vec![User { id: 2, username: "bob".into() }]);
    }

    #[tokio::test]
    async fn refresh_lists_users_again_and_reconnect_is_ignored_while_connected() {
        let mut harness = start(FakeApi {
            users: users(),
            ..FakeApi::default()
        });
        harness
            .next_matching(|event| matches!(event, SyncEvent::Connection(ConnectionState::Connected)))
            .await;
        harness
            .next_matching(|event| matches!(event, SyncEvent::Users(_)))
            .await;

        harness.commands.send(UiCommand::Reconnect).await.unwrap();
        harness.commands.send(UiCommand::RefreshUsers).await.unwrap();

        let event = harness
            .next_matching(|event| matches!(event, SyncEvent::Users(_)))
            .await;
        let SyncEvent::Users(listed) = event else { unreachable!() };
        assert_eq!(listed.len(), 1);
        assert_eq!(harness.connector.attempts(), 1);
    }

    #[tokio::test]
    async fn reconnect_command_reopens_a_connection_that_gave_up() {
        let mut harness = start(FakeApi::default());
        harness
            .next_matching(|event| matches!(event, SyncEvent::Connection(ConnectionState::Connected)))
            .await;

        // lose the link; the single scheduled retry finds nothing queued
        let (_, idle) = memory_link();
        drop(std::mem::replace(&mut harness.server, idle));
        harness
            .next_matching(|event| matches!(event, SyncEvent::Connection(ConnectionState::Disconnected)))
            .await;

        harness.server = harness.connector.queue_link();
        harness.commands.send(UiCommand::Reconnect).await.unwrap();
        harness
            .next_matching(|event| matches!(event, SyncEvent::Connection(ConnectionState::Connected)))
            .await;
        assert_eq!(harness.connector.attempts(), 3);

        // the subscription outlived the old link
        harness.server.push(push(3, 1, "back", "2025-03-01T10:15:00"));
        let view = harness.next_view(|view| !view.unread.is_empty()).await;
        assert_eq!(view.unread.get(&3), Some(&1));
    }

    #[tokio::test]
    async fn background_push_raises_unread() {
        let mut harness = start(FakeApi::default());
        harness.server.push(push(3, 1, "yo", "2025-03-01T10:15:00"));

        let view = harness.next_view(|view| !view.unread.is_empty()).await;
        assert_eq!(view.unread.get(&3), Some(&1));
        assert!(view.transcript.is_empty());
    }

    #[tokio::test]
    async fn send_is_written_once_and_echo_is_not_duplicated() {
        let mut history = HashMap::new();
        history.insert(
            2,
            vec![HistoryRecord {
                sender_id: 2,
                receiver_id: 1,
                sender_name: Some("bob".into()),
                content: "earlier".into(),
                sent_at: "2025-03-01T09:00:00".into(),
                is_read: true,
            }],
        );
        let mut harness = start(FakeApi {
            history,
            ..FakeApi::default()
        });

        harness.commands.send(UiCommand::SelectPeer(2)).await.unwrap();
        let loaded = harness.next_view(|view| !view.loading && view.active_peer == Some(2)).await;
        assert_eq!(loaded.transcript.len(), 1);

        harness
            .commands
            .send(UiCommand::SendMessage("hi".into()))
            .await
            .unwrap();
        let sent = harness.next_view(|view| view.transcript.len() == 2).await;
        let mine = &sent.transcript[1];
        assert!(mine.is_mine());

        let frame = timeout(WAIT, harness.server.next_frame()).await.unwrap().unwrap();
        assert!(frame.contains("\"ReceiverId\":2"));
        assert!(frame.contains("\"Content\":\"hi\""));

        let echo_time = mine.sent_at.to_rfc3339();
        harness.server.push(push(1, 2, "hi", &echo_time));
        harness.server.push(push(2, 1, "back", "2025-03-01T11:00:00"));

        let latest = harness
            .next_view(|view| view.transcript.iter().any(|m| m.content == "back"))
            .await;
        assert_eq!(latest.transcript.len(), 3);
        assert_eq!(latest.transcript.iter().filter(|m| m.content == "hi").count(), 1);
    }

    #[tokio::test]
    async fn empty_send_surfaces_a_failure() {
        let mut harness = start(FakeApi::default());
        harness.commands.send(UiCommand::SelectPeer(2)).await.unwrap();
        harness
            .commands
            .send(UiCommand::SendMessage("   ".into()))
            .await
            .unwrap();

        harness
            .next_matching(|event| matches!(event, SyncEvent::Failure(_)))
            .await;
    }

    #[tokio::test]
    async fn expired_session_stops_the_loop() {
        let mut harness = start(FakeApi {
            expired: true,
            ..FakeApi::default()
        });

        harness
            .next_matching(|event| matches!(event, SyncEvent::SessionExpired))
            .await;
        let result = timeout(WAIT, harness.task).await.unwrap().unwrap();
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn logout_stops_the_loop_and_closes_the_link() {
        let mut harness = start(FakeApi::default());
        harness.commands.send(UiCommand::Logout).await.unwrap();

        harness
            .next_matching(|event| matches!(event, SyncEvent::LoggedOut))
            .await;
        assert!(timeout(WAIT, harness.task).await.unwrap().unwrap().is_ok());
        // the client end of the link is gone
        assert!(timeout(WAIT, harness.server.next_frame()).await.unwrap().is_none());
    }
}
