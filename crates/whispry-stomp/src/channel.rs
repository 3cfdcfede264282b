use std::{
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::{
    sync::{mpsc, Mutex},
    task::JoinHandle,
};
use tokio_tungstenite::{
    connect_async,
    tungstenite::{
        client::IntoClientRequest,
        http::{header::AUTHORIZATION, HeaderValue},
        Message as WsMessage,
    },
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use url::Url;

use whispry_core::{
    config::Config,
    domain::{ConnectionState, SubscriptionId},
    errors::Error,
    ports::{PushChannel, PushDelivery, PushEvent},
    session::Session,
    Result,
};

use crate::frame::{parse_frames, Frame};

const EVENT_BUFFER: usize = 256;

#[derive(Clone, Debug)]
pub struct StompSettings {
    pub ws_url: Url,
    /// Value of the STOMP `host` header.
    pub host: String,
    pub reconnect_delay: Duration,
}

impl StompSettings {
    pub fn from_config(cfg: &Config) -> Self {
        Self {
            ws_url: cfg.ws_url.clone(),
            // Config only accepts ws urls that carry a host.
            host: cfg.ws_url.host_str().unwrap_or_default().to_string(),
            reconnect_delay: cfg.reconnect_delay,
        }
    }
}

/// State shared between the channel handle and its connection task.
#[derive(Debug, Default)]
struct Shared {
    state: std::sync::Mutex<ConnectionState>,
    outbound: std::sync::Mutex<Option<mpsc::UnboundedSender<Frame>>>,
    next_subscription: AtomicU64,
    epoch: AtomicU64,
}

impl Shared {
    fn state(&self) -> ConnectionState {
        *self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn set_state(&self, state: ConnectionState) {
        *self.state.lock().unwrap_or_else(|e| e.into_inner()) = state;
    }

    fn set_outbound(&self, tx: Option<mpsc::UnboundedSender<Frame>>) {
        *self.outbound.lock().unwrap_or_else(|e| e.into_inner()) = tx;
    }

    fn bump_epoch(&self) -> u64 {
        self.epoch.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn send(&self, frame: Frame) -> Result<()> {
        let guard = self.outbound.lock().unwrap_or_else(|e| e.into_inner());
        let Some(tx) = guard.as_ref() else {
            return Err(Error::Transport("push channel is not connected".to_string()));
        };
        tx.send(frame)
            .map_err(|_| Error::Transport("push connection closed".to_string()))
    }
}

/// `PushChannel` over STOMP 1.2 on a WebSocket.
///
/// One background task per session owns the socket. It reconnects after
/// `reconnect_delay` whenever the connection drops, forever, until
/// [`PushChannel::disconnect`] cancels it. Events go to the receiver returned
/// by [`StompChannel::new`].
pub struct StompChannel {
    settings: StompSettings,
    events: mpsc::Sender<PushDelivery>,
    shared: Arc<Shared>,
    task: Mutex<Option<(CancellationToken, JoinHandle<()>)>>,
}

impl StompChannel {
    pub fn new(settings: StompSettings) -> (Self, mpsc::Receiver<PushDelivery>) {
        let (events, rx) = mpsc::channel(EVENT_BUFFER);
        (
            Self {
                settings,
                events,
                shared: Arc::new(Shared::default()),
                task: Mutex::new(None),
            },
            rx,
        )
    }
}

#[async_trait]
impl PushChannel for StompChannel {
    fn state(&self) -> ConnectionState {
        self.shared.state()
    }

    fn epoch(&self) -> u64 {
        self.shared.epoch.load(Ordering::SeqCst)
    }

    async fn connect(&self, session: &Session) -> Result<()> {
        self.disconnect().await?;

        let token = CancellationToken::new();
        let emitter = Emitter {
            epoch: self.shared.bump_epoch(),
            tx: self.events.clone(),
        };
        let handle = tokio::spawn(connection_loop(
            self.settings.clone(),
            session.clone(),
            self.shared.clone(),
            emitter,
            token.clone(),
        ));
        *self.task.lock().await = Some((token, handle));
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        self.shared.bump_epoch();
        let Some((token, handle)) = self.task.lock().await.take() else {
            return Ok(());
        };
        token.cancel();
        if let Err(e) = handle.await {
            if !e.is_cancelled() {
                warn!("push connection task ended abnormally: {e}");
            }
        }
        self.shared.set_outbound(None);
        self.shared.set_state(ConnectionState::Disconnected);
        info!("push channel released");
        Ok(())
    }

    async fn subscribe(&self, destination: &str) -> Result<SubscriptionId> {
        let n = self.shared.next_subscription.fetch_add(1, Ordering::SeqCst);
        let id = format!("sub-{n}");
        self.shared.send(Frame::subscribe(&id, destination))?;
        Ok(SubscriptionId(id))
    }

    async fn publish(&self, destination: &str, body: &str) -> Result<()> {
        if self.shared.state() != ConnectionState::Connected {
            return Err(Error::Transport("push channel is not connected".to_string()));
        }
        self.shared.send(Frame::send(destination, body))
    }
}

/// Sends events stamped with the epoch of the connect call that spawned the
/// task.
struct Emitter {
    epoch: u64,
    tx: mpsc::Sender<PushDelivery>,
}

impl Emitter {
    /// Returns false once the receiver is gone.
    async fn emit(&self, event: PushEvent) -> bool {
        self.tx
            .send(PushDelivery {
                epoch: self.epoch,
                event,
            })
            .await
            .is_ok()
    }
}

async fn connection_loop(
    settings: StompSettings,
    session: Session,
    shared: Arc<Shared>,
    events: Emitter,
    token: CancellationToken,
) {
    loop {
        shared.set_state(ConnectionState::Connecting);
        debug!(url = %settings.ws_url, "push connecting");

        let result = tokio::select! {
            _ = token.cancelled() => break,
            r = run_connection(&settings, &session, &shared, &events) => r,
        };

        shared.set_outbound(None);
        shared.set_state(ConnectionState::Disconnected);
        let reason = match result {
            Ok(()) => "closed by server".to_string(),
            Err(e) => e.to_string(),
        };
        warn!(
            "push disconnected ({reason}); reconnecting in {:?}",
            settings.reconnect_delay
        );
        events.emit(PushEvent::Disconnected { reason }).await;

        tokio::select! {
            _ = token.cancelled() => break,
            _ = tokio::time::sleep(settings.reconnect_delay) => {}
        }
    }

    shared.set_outbound(None);
    shared.set_state(ConnectionState::Disconnected);
}

/// One connection lifetime: handshake, then pump frames until the socket
/// closes. Returns `Ok(())` on an orderly close.
async fn run_connection(
    settings: &StompSettings,
    session: &Session,
    shared: &Shared,
    events: &Emitter,
) -> Result<()> {
    let mut request = settings
        .ws_url
        .as_str()
        .into_client_request()
        .map_err(|e| Error::Transport(format!("invalid websocket url: {e}")))?;
    let bearer = session.bearer();
    let auth = HeaderValue::from_str(&bearer)
        .map_err(|e| Error::Auth(format!("token is not a valid header value: {e}")))?;
    request.headers_mut().insert(AUTHORIZATION, auth);

    let (ws, _response) = connect_async(request)
        .await
        .map_err(|e| Error::Transport(format!("websocket connect failed: {e}")))?;
    let (mut write, mut read) = ws.split();

    write
        .send(WsMessage::Text(Frame::connect(&settings.host, &bearer).encode()))
        .await
        .map_err(|e| Error::Transport(format!("stomp CONNECT failed: {e}")))?;

    // Frames the broker sent in the same message right after CONNECTED.
    let early = 'handshake: loop {
        let text = match read.next().await {
            Some(Ok(WsMessage::Text(t))) => t,
            Some(Ok(WsMessage::Close(_))) | None => {
                return Err(Error::Transport("closed during stomp handshake".to_string()))
            }
            Some(Err(e)) => return Err(Error::Transport(format!("websocket error: {e}"))),
            Some(Ok(_)) => continue,
        };
        let mut frames = parse_frames(&text)?.into_iter();
        while let Some(frame) = frames.next() {
            match frame.command.as_str() {
                "CONNECTED" => break 'handshake frames.collect::<Vec<_>>(),
                "ERROR" => return Err(Error::Protocol(frame.error_message())),
                other => debug!("ignoring {other} frame before CONNECTED"),
            }
        }
    };

    let (tx, mut outbound) = mpsc::unbounded_channel::<Frame>();
    shared.set_outbound(Some(tx));
    shared.set_state(ConnectionState::Connected);
    info!(url = %settings.ws_url, "push connected");
    events.emit(PushEvent::Connected).await;
    dispatch_frames(early, events).await;

    loop {
        tokio::select! {
            Some(frame) = outbound.recv() => {
                write
                    .send(WsMessage::Text(frame.encode()))
                    .await
                    .map_err(|e| Error::Transport(format!("websocket send failed: {e}")))?;
            }
            msg = read.next() => {
                let text = match msg {
                    Some(Ok(WsMessage::Text(t))) => t,
                    Some(Ok(WsMessage::Binary(b))) => String::from_utf8_lossy(&b).into_owned(),
                    Some(Ok(WsMessage::Close(_))) | None => return Ok(()),
                    Some(Err(e)) => return Err(Error::Transport(format!("websocket error: {e}"))),
                    Some(Ok(_)) => continue,
                };
                dispatch(&text, events).await;
            }
        }
    }
}

async fn dispatch(text: &str, events: &Emitter) {
    match parse_frames(text) {
        Ok(frames) => dispatch_frames(frames, events).await,
        Err(e) => warn!("dropping unparsable stomp frame: {e}"),
    }
}

async fn dispatch_frames(frames: Vec<Frame>, events: &Emitter) {
    for frame in frames {
        let event = match frame.command.as_str() {
            "MESSAGE" => PushEvent::Message { body: frame.body },
            "ERROR" => PushEvent::ProtocolError {
                message: frame.error_message(),
            },
            other => {
                debug!("ignoring {other} frame");
                continue;
            }
        };
        if !events.emit(event).await {
            debug!("push event receiver dropped");
            return;
        }
    }
}
