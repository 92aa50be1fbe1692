//! Client Session Manager
//!
//! Presents a single logical "connected, authenticated session" to callers
//! despite transport churn. On transport loss the session goes NotReady and
//! schedules exactly one reconnect attempt after a fixed delay, forever,
//! until it succeeds or the session is shut down.

use std::time::Duration;

use anyhow::{Context, Result, bail};
use futures::{sink::SinkExt, stream::StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::{
    MaybeTlsStream, WebSocketStream, connect_async, tungstenite::Message as WsMessage,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::models::StoredMessage;
use crate::ws::{ClientEvent, ServerEvent};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    /// A connection attempt is in flight
    Connecting,
    /// Authenticated and routable
    Ready,
    /// Transport lost; a reconnect is pending (or the session was shut down)
    Disconnected,
}

/// User-visible signals surfaced by the session.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// Auth acknowledged; the session is usable
    Connected { user_id: i64 },
    /// Transport lost; the session will retry after the reconnect delay
    Disconnected,
    /// Echo of a message this session sent
    MessageSent(StoredMessage),
    /// A message addressed to this session's identity
    MessageReceived(StoredMessage),
    /// A non-fatal fault; the session keeps running
    SessionError { message: String },
}

#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Full WebSocket URL of the relay endpoint, e.g. `ws://127.0.0.1:8080/ws`
    pub server_url: String,
    pub user_id: i64,
    pub reconnect_delay: Duration,
}

/// Handle to a running chat session.
pub struct ChatSession {
    outbound_tx: mpsc::Sender<ClientEvent>,
    status_rx: watch::Receiver<SessionStatus>,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl ChatSession {
    /// Start the session task. Returns the handle and the stream of
    /// user-visible session events.
    pub fn connect(config: SessionConfig) -> (Self, mpsc::Receiver<SessionEvent>) {
        let (event_tx, event_rx) = mpsc::channel(64);
        let (outbound_tx, outbound_rx) = mpsc::channel(64);
        let (status_tx, status_rx) = watch::channel(SessionStatus::Connecting);
        let cancel = CancellationToken::new();

        let task = tokio::spawn(run_session(
            config,
            outbound_rx,
            event_tx,
            status_tx,
            cancel.clone(),
        ));

        (
            Self {
                outbound_tx,
                status_rx,
                cancel,
                task,
            },
            event_rx,
        )
    }

    /// Current session status; the receiver can also be awaited for changes.
    #[allow(dead_code)]
    pub fn status(&self) -> watch::Receiver<SessionStatus> {
        self.status_rx.clone()
    }

    /// Send a message to a peer. Fails immediately while the session is not
    /// Ready rather than queueing into an outage.
    pub async fn send(&self, content: String, receiver_id: i64) -> Result<()> {
        if *self.status_rx.borrow() != SessionStatus::Ready {
            bail!("session is not connected");
        }
        self.outbound_tx
            .send(ClientEvent::Message {
                content,
                receiver_id,
            })
            .await
            .context("session task has stopped")
    }

    /// Close the active transport and cancel any pending reconnect. No
    /// reconnect fires after this returns.
    pub async fn shutdown(self) {
        self.cancel.cancel();
        let _ = self.task.await;
    }
}

async fn run_session(
    config: SessionConfig,
    mut outbound_rx: mpsc::Receiver<ClientEvent>,
    event_tx: mpsc::Sender<SessionEvent>,
    status_tx: watch::Sender<SessionStatus>,
    cancel: CancellationToken,
) {
    loop {
        if cancel.is_cancelled() {
            break;
        }
        let _ = status_tx.send(SessionStatus::Connecting);

        match connect_async(config.server_url.as_str()).await {
            Ok((stream, _)) => {
                run_connection(
                    &config,
                    stream,
                    &mut outbound_rx,
                    &event_tx,
                    &status_tx,
                    &cancel,
                )
                .await;
            }
            Err(err) => {
                warn!("failed to connect to {}: {}", config.server_url, err);
                let _ = event_tx
                    .send(SessionEvent::SessionError {
                        message: format!("connection failed: {err}"),
                    })
                    .await;
            }
        }

        if cancel.is_cancelled() {
            break;
        }
        let _ = status_tx.send(SessionStatus::Disconnected);
        let _ = event_tx.send(SessionEvent::Disconnected).await;

        // Exactly one reconnect attempt is outstanding at any time; shutdown
        // aborts the pending sleep.
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(config.reconnect_delay) => {
                debug!("reconnecting to {}", config.server_url);
            }
        }
    }

    let _ = status_tx.send(SessionStatus::Disconnected);
}

/// Drive one transport connection until it closes or the session shuts down.
async fn run_connection(
    config: &SessionConfig,
    stream: WsStream,
    outbound_rx: &mut mpsc::Receiver<ClientEvent>,
    event_tx: &mpsc::Sender<SessionEvent>,
    status_tx: &watch::Sender<SessionStatus>,
    cancel: &CancellationToken,
) {
    let (mut sink, mut source) = stream.split();

    // Authenticate immediately on transport open
    let auth = ClientEvent::Auth {
        user_id: config.user_id,
    };
    let Ok(json) = serde_json::to_string(&auth) else {
        return;
    };
    if sink.send(WsMessage::text(json)).await.is_err() {
        return;
    }

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                let _ = sink.close().await;
                return;
            }
            outgoing = outbound_rx.recv() => {
                let Some(event) = outgoing else { return };
                let Ok(json) = serde_json::to_string(&event) else { continue };
                if sink.send(WsMessage::text(json)).await.is_err() {
                    return;
                }
            }
            incoming = source.next() => {
                match incoming {
                    Some(Ok(WsMessage::Text(text))) => {
                        handle_server_event(&text, config, event_tx, status_tx).await;
                    }
                    Some(Ok(WsMessage::Close(_))) | None => return,
                    Some(Ok(_)) => {}
                    Some(Err(err)) => {
                        warn!("websocket error: {}", err);
                        let _ = event_tx
                            .send(SessionEvent::SessionError {
                                message: format!("transport error: {err}"),
                            })
                            .await;
                        return;
                    }
                }
            }
        }
    }
}

async fn handle_server_event(
    text: &str,
    config: &SessionConfig,
    event_tx: &mpsc::Sender<SessionEvent>,
    status_tx: &watch::Sender<SessionStatus>,
) {
    let event = match serde_json::from_str::<ServerEvent>(text) {
        Ok(event) => event,
        Err(err) => {
            debug!("ignoring unparseable server event: {}", err);
            return;
        }
    };

    match event {
        ServerEvent::AuthSuccess { user_id } => {
            info!(user_id, "session ready");
            let _ = status_tx.send(SessionStatus::Ready);
            let _ = event_tx.send(SessionEvent::Connected { user_id }).await;
        }
        ServerEvent::MessageSent { message } => {
            let _ = event_tx.send(SessionEvent::MessageSent(message)).await;
        }
        ServerEvent::NewMessage { message } => {
            let _ = event_tx.send(SessionEvent::MessageReceived(message)).await;
        }
        // Non-fatal: surfaced, but the session stays up
        ServerEvent::Error { message } => {
            warn!(user_id = config.user_id, "server error: {}", message);
            let _ = event_tx.send(SessionEvent::SessionError { message }).await;
        }
    }
}
