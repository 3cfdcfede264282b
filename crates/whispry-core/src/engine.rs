use std::sync::Arc;

use tokio::sync::{mpsc, watch, Mutex};
use tracing::{debug, info, warn};

use crate::{
    config::Config,
    dedup::DedupCache,
    domain::{ConnectionState, UserId},
    message::{normalize, parse_push_body, Message, OutgoingMessage},
    ports::{HistoryClient, PushChannel, PushDelivery, PushEvent, SendClient},
    session::Session,
    utils::iso_timestamp_utc,
    Result,
};

/// Destinations the engine uses on the push channel.
#[derive(Clone, Debug)]
pub struct EngineSettings {
    pub inbound_destination: String,
    pub outbound_destination: String,
}

impl EngineSettings {
    pub fn from_config(cfg: &Config) -> Self {
        Self {
            inbound_destination: cfg.inbound_destination.clone(),
            outbound_destination: cfg.outbound_destination.clone(),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NoticeKind {
    HistoryUnavailable,
    SendFailed,
}

/// Non-blocking, user-visible notice. The UI drains them with
/// [`SyncEngine::take_notices`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Notice {
    pub kind: NoticeKind,
    pub text: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SendOutcome {
    /// Blank text, no active peer or no session. Nothing happened.
    Skipped,
    /// Published on the push channel; the optimistic entry is the final record.
    Pushed,
    /// Stored through the REST fallback. `echo_appended` is false when the
    /// server's record matched the optimistic entry and was suppressed.
    Fallback { echo_appended: bool },
    /// Both channels failed. The optimistic entry stays rendered.
    Failed { notice: String },
}

/// Consistent view of the thread for rendering.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ThreadSnapshot {
    /// Changes whenever the thread is replaced instead of appended to.
    pub epoch: u64,
    pub peer: Option<UserId>,
    pub messages: Vec<Message>,
}

#[derive(Debug, Default)]
struct EngineState {
    session: Option<Session>,
    peer: Option<UserId>,
    messages: Vec<Message>,
    thread_epoch: u64,
    cache: DedupCache,
    // Bumped on every history request and session change; a response is only
    // applied if its generation is still current.
    load_generation: u64,
    local_seq: u64,
    notices: Vec<Notice>,
    torn_down: bool,
}

impl EngineState {
    fn in_active_conversation(&self, msg: &Message) -> bool {
        match (&self.session, &self.peer) {
            (Some(session), Some(peer)) => msg.is_between(session.user_id(), peer),
            _ => false,
        }
    }
}

/// Reconciles REST history, push delivery and local sends into one
/// deduplicated thread for the active peer.
///
/// All state sits behind a single mutex that is never held across a network
/// call, so each callback (push event, history completion, send step) applies
/// its mutation atomically.
pub struct SyncEngine {
    settings: EngineSettings,
    history: Arc<dyn HistoryClient>,
    sender: Arc<dyn SendClient>,
    push: Arc<dyn PushChannel>,
    state: Mutex<EngineState>,
    revision: watch::Sender<u64>,
}

impl SyncEngine {
    pub fn new(
        settings: EngineSettings,
        history: Arc<dyn HistoryClient>,
        sender: Arc<dyn SendClient>,
        push: Arc<dyn PushChannel>,
        session: Option<Session>,
    ) -> Self {
        let (revision, _) = watch::channel(0);
        Self {
            settings,
            history,
            sender,
            push,
            state: Mutex::new(EngineState {
                session,
                ..EngineState::default()
            }),
            revision,
        }
    }

    /// Open the push connection for the session given at construction.
    pub async fn start(&self) -> Result<()> {
        let session = self.state.lock().await.session.clone();
        match session {
            Some(session) => self.push.connect(&session).await,
            None => Ok(()),
        }
    }

    // ============== View ==============

    pub async fn messages(&self) -> Vec<Message> {
        self.state.lock().await.messages.clone()
    }

    pub async fn snapshot(&self) -> ThreadSnapshot {
        let st = self.state.lock().await;
        ThreadSnapshot {
            epoch: st.thread_epoch,
            peer: st.peer.clone(),
            messages: st.messages.clone(),
        }
    }

    pub async fn active_peer(&self) -> Option<UserId> {
        self.state.lock().await.peer.clone()
    }

    pub async fn session(&self) -> Option<Session> {
        self.state.lock().await.session.clone()
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.push.state()
    }

    pub async fn take_notices(&self) -> Vec<Notice> {
        std::mem::take(&mut self.state.lock().await.notices)
    }

    /// Revision counter bumped whenever the rendered list, the notices or the
    /// connection state change.
    pub fn subscribe_changes(&self) -> watch::Receiver<u64> {
        self.revision.subscribe()
    }

    pub async fn is_torn_down(&self) -> bool {
        self.state.lock().await.torn_down
    }

    fn bump(&self) {
        self.revision.send_modify(|r| *r += 1);
    }

    // ============== Session ==============

    /// Replace the session context (login, logout, token refresh).
    ///
    /// An identity change drops the conversation state and recreates the push
    /// connection with the new credentials.
    pub async fn set_session(&self, session: Option<Session>) -> Result<()> {
        {
            let mut st = self.state.lock().await;
            if st.torn_down {
                return Ok(());
            }
            let changed = match (&st.session, &session) {
                (Some(old), Some(new)) => !old.same_identity(new),
                (None, None) => false,
                _ => true,
            };
            if !changed {
                // Same user and credential; keep profile fields fresh.
                st.session = session;
                return Ok(());
            }
        }

        // Deliveries still queued from the old connection go stale here,
        // before any state of the new session exists.
        self.push.disconnect().await?;
        {
            let mut st = self.state.lock().await;
            if st.torn_down {
                return Ok(());
            }
            st.session = session.clone();
            st.peer = None;
            st.messages.clear();
            st.thread_epoch += 1;
            st.cache.clear();
            st.notices.clear();
            st.load_generation += 1;
        }
        self.bump();

        if let Some(session) = session {
            info!(user = %session.user_id(), "session changed; reconnecting push channel");
            self.push.connect(&session).await?;
        } else {
            info!("session ended; push channel released");
        }
        Ok(())
    }

    /// Release the push channel. No event is processed after this begins.
    pub async fn shutdown(&self) -> Result<()> {
        {
            let mut st = self.state.lock().await;
            if st.torn_down {
                return Ok(());
            }
            st.torn_down = true;
        }
        self.push.disconnect().await
    }

    // ============== History ==============

    /// Make `peer` the active conversation and load its history.
    ///
    /// The list and dedup cache are cleared before the fetch is issued, so the
    /// previous peer's messages are never visible under the new peer.
    pub async fn select_peer(&self, peer: Option<UserId>) {
        {
            let mut st = self.state.lock().await;
            if st.torn_down {
                return;
            }
            st.peer = peer.clone();
            st.messages.clear();
            st.thread_epoch += 1;
            st.cache.clear();
        }
        self.bump();
        self.load_history(peer).await;
    }

    /// Reload the active peer's history.
    pub async fn reload(&self) {
        let peer = self.active_peer().await;
        self.load_history(peer).await;
    }

    /// Fetch `peer`'s backlog and replace the thread with it.
    ///
    /// The response is applied only if `peer` is still the active peer and no
    /// newer load was issued meanwhile. Failures leave an empty thread and a
    /// notice; they are never returned.
    pub async fn load_history(&self, peer: Option<UserId>) {
        let (session, generation, peer) = {
            let mut st = self.state.lock().await;
            if st.torn_down {
                return;
            }
            let Some(peer) = peer else {
                st.messages.clear();
                st.thread_epoch += 1;
                st.cache.clear();
                drop(st);
                self.bump();
                return;
            };
            st.load_generation += 1;
            (st.session.clone(), st.load_generation, peer)
        };

        let result = match &session {
            Some(session) => self.history.fetch_history(session, &peer).await,
            None => Err(crate::errors::Error::Auth("no active session".to_string())),
        };

        let mut st = self.state.lock().await;
        if st.torn_down || st.load_generation != generation || st.peer.as_ref() != Some(&peer) {
            debug!(peer = %peer, "discarding stale history response");
            return;
        }

        match result {
            Ok(records) => {
                let messages: Vec<Message> = records.iter().map(normalize).collect();
                st.cache.rebuild(&messages);
                st.messages = messages;
                st.thread_epoch += 1;
                info!(peer = %peer, count = st.messages.len(), "history loaded");
            }
            Err(e) => {
                warn!(peer = %peer, "history load failed: {e}");
                st.messages.clear();
                st.thread_epoch += 1;
                st.cache.clear();
                st.notices.push(Notice {
                    kind: NoticeKind::HistoryUnavailable,
                    text: format!("Could not load conversation history: {e}"),
                });
            }
        }
        drop(st);
        self.bump();
    }

    // ============== Push ==============

    /// Drive the engine from a transport's event stream until the stream
    /// closes or the engine is shut down.
    ///
    /// Deliveries whose epoch is not the channel's current one belong to a
    /// connection released by [`SyncEngine::set_session`] and are dropped.
    pub async fn run_push_events(&self, mut events: mpsc::Receiver<PushDelivery>) {
        while let Some(PushDelivery { epoch, event }) = events.recv().await {
            if self.is_torn_down().await {
                break;
            }
            let current = self.push.epoch();
            if epoch != current {
                debug!(epoch, current, "dropping delivery from a released connection");
                continue;
            }
            self.handle_push_event(event).await;
        }
        debug!("push event loop finished");
    }

    pub async fn handle_push_event(&self, event: PushEvent) {
        if self.is_torn_down().await {
            return;
        }

        match event {
            PushEvent::Connected => {
                // Subscriptions do not survive a reconnect; make a fresh one.
                let dest = &self.settings.inbound_destination;
                match self.push.subscribe(dest).await {
                    Ok(id) => info!(destination = %dest, subscription = %id.0, "subscribed"),
                    Err(e) => warn!(destination = %dest, "subscribe failed: {e}"),
                }
                self.bump();
            }
            PushEvent::Message { body } => match parse_push_body(&body) {
                Ok(msg) => self.ingest_push(msg).await,
                Err(e) => warn!("dropping malformed push payload: {e}"),
            },
            PushEvent::ProtocolError { message } => {
                warn!("push protocol error: {message}");
            }
            PushEvent::Disconnected { reason } => {
                info!("push channel disconnected: {reason}");
                self.bump();
            }
        }
    }

    async fn ingest_push(&self, msg: Message) {
        let mut st = self.state.lock().await;
        if st.torn_down {
            return;
        }
        if !st.cache.insert(msg.dedup_key()) {
            debug!("duplicate push delivery dropped");
            return;
        }
        if !st.in_active_conversation(&msg) {
            // Cached so it cannot be shown twice later, but not rendered.
            return;
        }
        st.messages.push(msg);
        drop(st);
        self.bump();
    }

    // ============== Send ==============

    /// Send `text` to the active peer.
    ///
    /// The optimistic copy is rendered before any network call. Push is tried
    /// first when connected; otherwise (or if publishing fails) the REST
    /// endpoint is used.
    pub async fn send(&self, text: &str) -> SendOutcome {
        let content = text.trim();
        if content.is_empty() {
            return SendOutcome::Skipped;
        }

        let (session, payload) = {
            let mut st = self.state.lock().await;
            if st.torn_down {
                return SendOutcome::Skipped;
            }
            let (Some(session), Some(peer)) = (st.session.clone(), st.peer.clone()) else {
                return SendOutcome::Skipped;
            };

            let payload = OutgoingMessage {
                sender_id: session.user_id().clone(),
                receiver_id: peer,
                content: content.to_string(),
                timestamp: iso_timestamp_utc(),
            };

            st.local_seq += 1;
            let optimistic = payload.to_optimistic(format!("local-{}", st.local_seq));
            st.cache.insert(optimistic.dedup_key());
            st.messages.push(optimistic);
            (session, payload)
        };
        self.bump();

        if self.try_publish(&payload).await {
            return SendOutcome::Pushed;
        }

        match self.sender.send_message(&session, &payload).await {
            Ok(raw) => {
                let echo = normalize(&raw);
                let mut st = self.state.lock().await;
                if st.torn_down || !st.cache.insert(echo.dedup_key()) {
                    return SendOutcome::Fallback {
                        echo_appended: false,
                    };
                }
                let visible = st.in_active_conversation(&echo);
                if visible {
                    st.messages.push(echo);
                }
                drop(st);
                if visible {
                    self.bump();
                }
                SendOutcome::Fallback {
                    echo_appended: visible,
                }
            }
            Err(e) => {
                warn!(peer = %payload.receiver_id, "send fallback failed: {e}");
                let notice = format!("Message could not be sent: {e}");
                self.state.lock().await.notices.push(Notice {
                    kind: NoticeKind::SendFailed,
                    text: notice.clone(),
                });
                self.bump();
                SendOutcome::Failed { notice }
            }
        }
    }

    async fn try_publish(&self, payload: &OutgoingMessage) -> bool {
        if self.push.state() != ConnectionState::Connected {
            debug!("push not connected; using REST fallback");
            return false;
        }
        let body = match payload.to_json() {
            Ok(b) => b,
            Err(e) => {
                warn!("could not encode outgoing message: {e}");
                return false;
            }
        };
        match self
            .push
            .publish(&self.settings.outbound_destination, &body)
            .await
        {
            Ok(()) => true,
            Err(e) => {
                warn!("push publish failed, falling back to REST: {e}");
                false
            }
        }
    }
}
