use std::sync::{Arc, Mutex, MutexGuard};

use futures::{SinkExt, StreamExt};
use serde::Serialize;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::time::{sleep, timeout};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use super::config::ClientConfig;
use super::handler::{HandlerSet, SessionEventHandler, Subscription};
use crate::error::{RelayError, Result};
use crate::relay::protocol::{
    ChatMessagePayload, ClientEvent, EndSessionPayload, JoinSessionPayload, LeaveSessionPayload,
    ServerEvent, TypingPayload,
};
use crate::relay::Role;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ClientState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
}

#[derive(Debug, PartialEq, Eq)]
enum SessionEnd {
    /// The outbound queue was dropped by `disconnect()` or a newer connect
    Closed,
    Lost,
}

/// The live socket's outbound queue, tagged with the connect generation that
/// owns it. Every connect/disconnect bumps the generation; a task from an
/// older generation may not touch the slot or the published state.
#[derive(Default)]
struct Link {
    generation: u64,
    outbound: Option<mpsc::UnboundedSender<Message>>,
}

struct Inner {
    config: ClientConfig,
    state: watch::Sender<ClientState>,
    link: Mutex<Link>,
    handlers: Arc<HandlerSet>,
    connect_lock: tokio::sync::Mutex<()>,
}

impl Inner {
    fn link(&self) -> MutexGuard<'_, Link> {
        self.link.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Handlers run after the link lock is released so they may emit
    fn notify(&self, previous: ClientState, state: ClientState) {
        if previous != state {
            tracing::debug!(from = ?previous, to = ?state, "Client state changed");
            self.handlers.dispatch_state(state);
        }
    }

    /// Starts a new generation, orphaning any current socket or reconnect loop
    fn begin(&self, state: ClientState) -> u64 {
        let (generation, previous) = {
            let mut link = self.link();
            link.generation += 1;
            link.outbound = None;
            (link.generation, self.state.send_replace(state))
        };
        self.notify(previous, state);
        generation
    }

    /// Publishes `state`, clearing the outbound slot, if `generation` still owns the link
    fn release(&self, generation: u64, state: ClientState) -> bool {
        let previous = {
            let mut link = self.link();
            if link.generation != generation {
                return false;
            }
            link.outbound = None;
            self.state.send_replace(state)
        };
        self.notify(previous, state);
        true
    }

    /// Installs a fresh outbound queue and publishes `Connected`, if `generation`
    /// still owns the link
    fn attach(&self, generation: u64, tx: mpsc::UnboundedSender<Message>) -> bool {
        let previous = {
            let mut link = self.link();
            if link.generation != generation {
                return false;
            }
            link.outbound = Some(tx);
            self.state.send_replace(ClientState::Connected)
        };
        self.notify(previous, ClientState::Connected);
        true
    }

    fn is_current(&self, generation: u64) -> bool {
        self.link().generation == generation
    }

    fn dispatch(&self, text: &str) {
        match ServerEvent::from_text(text) {
            Ok(event) => self.handlers.dispatch(&event),
            Err(e) => {
                tracing::warn!(error = %e, raw_message = %text, "Failed to parse server event");
            }
        }
    }
}

/// Shared handle to one relay connection. Cloning shares the connection.
#[derive(Clone)]
pub struct RelayClient {
    inner: Arc<Inner>,
}

impl RelayClient {
    pub fn new(config: ClientConfig) -> Self {
        let (state, _) = watch::channel(ClientState::Disconnected);
        Self {
            inner: Arc::new(Inner {
                config,
                state,
                link: Mutex::new(Link::default()),
                handlers: Arc::new(HandlerSet::default()),
                connect_lock: tokio::sync::Mutex::new(()),
            }),
        }
    }

    pub fn state(&self) -> ClientState {
        *self.inner.state.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<ClientState> {
        self.inner.state.subscribe()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ClientState::Connected
    }

    /// Connects if not already connected. Concurrent callers share one handshake.
    /// A `disconnect()` issued while the handshake is pending wins: the new
    /// socket is closed and `ConnectionClosed` is returned.
    pub async fn connect(&self) -> Result<()> {
        if self.is_connected() {
            return Ok(());
        }

        let _guard = self.inner.connect_lock.lock().await;
        if self.is_connected() {
            return Ok(());
        }

        let generation = self.inner.begin(ClientState::Connecting);

        let mut stream = match open(&self.inner.config).await {
            Ok(stream) => stream,
            Err(e) => {
                tracing::warn!(url = %self.inner.config.url, error = %e, "Failed to connect to relay");
                self.inner.release(generation, ClientState::Disconnected);
                return Err(e);
            }
        };

        let (tx, rx) = mpsc::unbounded_channel();
        if !self.inner.attach(generation, tx) {
            tracing::info!(url = %self.inner.config.url, "Connect cancelled by disconnect");
            let _ = stream.close(None).await;
            return Err(RelayError::ConnectionClosed("connect cancelled".to_string()));
        }
        tracing::info!(url = %self.inner.config.url, "Connected to relay");

        tokio::spawn(drive(self.inner.clone(), generation, stream, rx));
        Ok(())
    }

    /// Closes the connection and stops any pending connect or reconnection
    pub fn disconnect(&self) {
        self.inner.begin(ClientState::Disconnected);
    }

    /// Connects if needed, then announces presence. There is no server
    /// acknowledgment; a rejection arrives later as an `error` event.
    pub async fn join_session(&self, session_id: &str, user_id: &str, role: Role) -> Result<()> {
        self.connect().await?;

        let sent = self.emit(ClientEvent::JoinSession(JoinSessionPayload {
            session_id: session_id.to_string(),
            user_id: user_id.to_string(),
            role,
        }));

        if sent {
            Ok(())
        } else {
            Err(RelayError::NotConnected)
        }
    }

    /// Returns `false` when dropped because the client is not connected
    pub fn leave_session(&self, session_id: &str) -> bool {
        self.emit(ClientEvent::LeaveSession(LeaveSessionPayload {
            session_id: session_id.to_string(),
        }))
    }

    pub fn send_message(
        &self,
        session_id: &str,
        message: &str,
        sender_id: &str,
        sender_name: Option<&str>,
    ) -> bool {
        self.emit(ClientEvent::ChatMessage(ChatMessagePayload {
            session_id: session_id.to_string(),
            message: message.to_string(),
            sender_id: sender_id.to_string(),
            sender_name: sender_name.map(str::to_string),
        }))
    }

    pub fn send_typing_indicator(&self, session_id: &str, user_id: &str, is_typing: bool) -> bool {
        self.emit(ClientEvent::Typing(TypingPayload {
            session_id: session_id.to_string(),
            user_id: user_id.to_string(),
            is_typing,
        }))
    }

    pub fn end_session(&self, session_id: &str, reason: Option<&str>) -> bool {
        self.emit(ClientEvent::EndSession(EndSessionPayload {
            session_id: session_id.to_string(),
            reason: reason.map(str::to_string),
        }))
    }

    pub fn subscribe(&self, handler: Arc<dyn SessionEventHandler>) -> Subscription {
        self.inner.handlers.subscribe(handler)
    }

    /// Sends now or drops; nothing is queued for a later connection
    fn emit(&self, event: ClientEvent) -> bool {
        if !self.is_connected() {
            tracing::debug!(event = event.kind().as_str(), "Not connected, event dropped");
            return false;
        }

        let text = match event.to_text() {
            Ok(text) => text,
            Err(e) => {
                tracing::error!(error = %e, "Failed to serialize event");
                return false;
            }
        };

        match self.inner.link().outbound.as_ref() {
            Some(tx) => tx.send(Message::Text(text)).is_ok(),
            None => false,
        }
    }
}

async fn open(config: &ClientConfig) -> Result<WsStream> {
    match timeout(config.timeout, connect_async(config.url.as_str())).await {
        Ok(Ok((stream, _))) => Ok(stream),
        Ok(Err(e)) => Err(RelayError::Transport(e)),
        Err(_) => Err(RelayError::ConnectTimeout(config.timeout)),
    }
}

/// Owns the socket for one generation: pumps frames, then reconnects on loss
async fn drive(
    inner: Arc<Inner>,
    generation: u64,
    mut stream: WsStream,
    mut rx: mpsc::UnboundedReceiver<Message>,
) {
    loop {
        if run_session(&inner, stream, &mut rx).await == SessionEnd::Closed {
            tracing::info!("Relay connection closed");
            return;
        }

        let next_state = if inner.config.reconnection {
            ClientState::Reconnecting
        } else {
            ClientState::Disconnected
        };
        if !inner.release(generation, next_state) {
            return;
        }
        tracing::warn!("Relay connection lost");

        let Some(mut next) = reconnect(&inner, generation).await else {
            inner.release(generation, ClientState::Disconnected);
            return;
        };

        let (tx, next_rx) = mpsc::unbounded_channel();
        if !inner.attach(generation, tx) {
            let _ = next.close(None).await;
            return;
        }
        tracing::info!("Reconnected to relay");
        stream = next;
        rx = next_rx;
    }
}

async fn run_session(
    inner: &Inner,
    stream: WsStream,
    rx: &mut mpsc::UnboundedReceiver<Message>,
) -> SessionEnd {
    let (mut write, mut read) = stream.split();

    loop {
        tokio::select! {
            outgoing = rx.recv() => match outgoing {
                Some(message) => {
                    if let Err(e) = write.send(message).await {
                        tracing::error!(error = %e, "Failed to send frame");
                        return SessionEnd::Lost;
                    }
                }
                None => {
                    let _ = write.send(Message::Close(None)).await;
                    return SessionEnd::Closed;
                }
            },
            incoming = read.next() => match incoming {
                Some(Ok(Message::Text(text))) => inner.dispatch(&text),
                Some(Ok(Message::Close(_))) | None => return SessionEnd::Lost,
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    tracing::error!(error = %e, "WebSocket error");
                    return SessionEnd::Lost;
                }
            },
        }
    }
}

/// Retries with capped backoff. Returns `None` when attempts run out, when
/// reconnection is disabled, or once `generation` is superseded.
async fn reconnect(inner: &Inner, generation: u64) -> Option<WsStream> {
    let config = &inner.config;
    if !config.reconnection {
        return None;
    }

    for attempt in 0..config.reconnection_attempts {
        sleep(config.backoff(attempt)).await;
        if !inner.is_current(generation) {
            return None;
        }

        match open(config).await {
            Ok(stream) => return Some(stream),
            Err(e) => {
                tracing::warn!(attempt = attempt + 1, error = %e, "Reconnect attempt failed");
            }
        }
    }

    tracing::error!(
        attempts = config.reconnection_attempts,
        "Giving up on relay connection"
    );
    None
}
