//! Relay Engine
//!
//! Per-connection protocol state machine. Consumes typed client events and
//! emits server events on the connection's outbound channel, so the whole
//! protocol is testable without a live socket: feed events, assert emissions.

use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::metrics::ServerMetrics;
use crate::repository::MessageRepository;

use super::protocol::{ClientEvent, ServerEvent};
use super::registry::{ConnectionRegistry, RegisteredPeer};

/// Faults recovered locally and surfaced to the originating connection only.
/// None of these tear down the connection or escape the relay.
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    #[error("invalid {0}: expected a non-negative integer id")]
    InvalidId(&'static str),
    #[error("unparseable event: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("failed to store message")]
    Store(#[source] anyhow::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SessionState {
    Unauthenticated,
    Authenticated { user_id: i64 },
    Closed,
}

/// The protocol state machine for one connection.
///
/// States: Unauthenticated → Authenticated → Closed, never out of Closed.
pub struct RelaySession {
    connection_id: String,
    state: SessionState,
    registry: Arc<ConnectionRegistry>,
    repository: MessageRepository,
    metrics: Arc<ServerMetrics>,
    /// Outbound channel to this connection's own socket
    tx: mpsc::Sender<ServerEvent>,
}

impl RelaySession {
    pub fn new(
        registry: Arc<ConnectionRegistry>,
        repository: MessageRepository,
        metrics: Arc<ServerMetrics>,
        tx: mpsc::Sender<ServerEvent>,
    ) -> Self {
        Self {
            connection_id: uuid::Uuid::new_v4().to_string(),
            state: SessionState::Unauthenticated,
            registry,
            repository,
            metrics,
            tx,
        }
    }

    pub fn connection_id(&self) -> &str {
        &self.connection_id
    }

    /// The identity this connection is currently bound to, if authenticated.
    #[allow(dead_code)]
    pub fn user_id(&self) -> Option<i64> {
        match self.state {
            SessionState::Authenticated { user_id } => Some(user_id),
            _ => None,
        }
    }

    /// Handle one raw text frame from the transport.
    pub async fn handle_text(&mut self, text: &str) {
        match serde_json::from_str::<ClientEvent>(text) {
            Ok(event) => self.handle_event(event).await,
            Err(err) => {
                // A well-formed event of a type the dispatch does not handle
                // is ignored; only frames that fail to parse as a handled
                // event shape are answered with an error.
                if let Some(kind) = unhandled_event_type(text) {
                    debug!(conn_id = %self.connection_id, kind = %kind, "ignoring unhandled event type");
                    return;
                }
                self.fault(RelayError::Malformed(err)).await;
            }
        }
    }

    /// Handle one typed client event.
    pub async fn handle_event(&mut self, event: ClientEvent) {
        match self.state {
            SessionState::Closed => {}
            SessionState::Unauthenticated => match event {
                ClientEvent::Auth { user_id } => self.handle_auth(user_id).await,
                // Only auth is handled before the identity is bound
                ClientEvent::Message { .. } => {
                    debug!(conn_id = %self.connection_id, "ignoring message event before auth");
                }
            },
            SessionState::Authenticated { user_id } => match event {
                // Re-auth is permitted and simply rebinds (last writer wins)
                ClientEvent::Auth { user_id } => self.handle_auth(user_id).await,
                ClientEvent::Message {
                    content,
                    receiver_id,
                } => self.handle_message(user_id, content, receiver_id).await,
            },
        }
    }

    async fn handle_auth(&mut self, user_id: i64) {
        if user_id < 0 {
            self.fault(RelayError::InvalidId("userId")).await;
            return;
        }

        self.registry
            .bind(
                user_id,
                RegisteredPeer {
                    connection_id: self.connection_id.clone(),
                    tx: self.tx.clone(),
                },
            )
            .await;
        self.state = SessionState::Authenticated { user_id };

        info!(user_id, conn_id = %self.connection_id, "user authenticated");
        self.emit(ServerEvent::AuthSuccess { user_id }).await;
    }

    async fn handle_message(&mut self, sender_id: i64, content: String, receiver_id: i64) {
        if receiver_id < 0 {
            self.fault(RelayError::InvalidId("receiverId")).await;
            return;
        }

        let stored = match self
            .repository
            .insert_message(sender_id, receiver_id, &content)
            .await
        {
            Ok(message) => message,
            Err(err) => {
                error!(sender_id, receiver_id, "failed to store message: {err:#}");
                self.metrics.store_failure();
                // A store fault suppresses fan-out; the receiver never sees
                // a message that was not persisted.
                self.fault(RelayError::Store(err)).await;
                return;
            }
        };
        self.metrics.message_stored();

        debug!(sender_id, receiver_id, message_id = stored.id, "message stored");

        // Echo to the sender first, then fan out to the receiver if online.
        self.emit(ServerEvent::MessageSent {
            message: stored.clone(),
        })
        .await;

        if let Some(peer) = self.registry.lookup(receiver_id).await {
            // Never stall this sender on a slow receiver; a saturated or
            // closing receiver channel drops the delivery.
            match peer.tx.try_send(ServerEvent::NewMessage { message: stored }) {
                Ok(()) => self.metrics.message_relayed(),
                Err(_) => {
                    warn!(
                        receiver_id,
                        "receiver channel unavailable, dropping fan-out"
                    );
                    self.metrics.message_dropped();
                }
            }
        }
    }

    /// Transition to Closed, unbinding the identity if this connection still
    /// owns its registry entry. Idempotent; no events are processed afterward.
    pub async fn close(&mut self) {
        let prev = std::mem::replace(&mut self.state, SessionState::Closed);
        if let SessionState::Authenticated { user_id } = prev {
            if self.registry.unbind(user_id, &self.connection_id).await {
                info!(user_id, conn_id = %self.connection_id, "user disconnected");
            }
        }
    }

    async fn fault(&self, err: RelayError) {
        warn!(conn_id = %self.connection_id, "relay fault: {err}");
        self.emit(ServerEvent::Error {
            message: err.to_string(),
        })
        .await;
    }

    /// Send an event to this connection's own socket. The socket may already
    /// be gone (close racing an in-flight persistence); that is not an error.
    async fn emit(&self, event: ServerEvent) {
        let _ = self.tx.send(event).await;
    }
}

/// Returns the type tag of a well-formed event the dispatch does not handle,
/// or None when the frame is a handled type (or not an event at all).
fn unhandled_event_type(text: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(text).ok()?;
    let kind = value.get("type")?.as_str()?;
    match kind {
        // Handled types that failed to parse carry malformed payloads
        "auth" | "message" => None,
        other => Some(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::test_helpers;
    use tokio::sync::mpsc::error::TryRecvError;

    struct TestPeer {
        session: RelaySession,
        rx: mpsc::Receiver<ServerEvent>,
    }

    async fn test_peer(registry: &Arc<ConnectionRegistry>, repo: &MessageRepository) -> TestPeer {
        let (tx, rx) = mpsc::channel(16);
        let session = RelaySession::new(
            registry.clone(),
            repo.clone(),
            Arc::new(ServerMetrics::new()),
            tx,
        );
        TestPeer { session, rx }
    }

    async fn authed_peer(
        registry: &Arc<ConnectionRegistry>,
        repo: &MessageRepository,
        user_id: i64,
    ) -> TestPeer {
        let mut peer = test_peer(registry, repo).await;
        peer.session
            .handle_event(ClientEvent::Auth { user_id })
            .await;
        match peer.rx.recv().await.unwrap() {
            ServerEvent::AuthSuccess { user_id: id } => assert_eq!(id, user_id),
            other => panic!("Expected AuthSuccess, got {:?}", other),
        }
        peer
    }

    #[tokio::test]
    async fn auth_binds_identity_and_acknowledges() {
        let registry = Arc::new(ConnectionRegistry::new());
        let repo = test_helpers::test_repository().await;

        let peer = authed_peer(&registry, &repo, 1).await;

        assert_eq!(peer.session.user_id(), Some(1));
        let entry = registry.lookup(1).await.unwrap();
        assert_eq!(entry.connection_id, peer.session.connection_id());
        assert_eq!(registry.online_count().await, 1);
    }

    #[tokio::test]
    async fn invalid_auth_errors_and_stays_unauthenticated() {
        let registry = Arc::new(ConnectionRegistry::new());
        let repo = test_helpers::test_repository().await;
        let mut peer = test_peer(&registry, &repo).await;

        peer.session
            .handle_event(ClientEvent::Auth { user_id: -1 })
            .await;

        match peer.rx.recv().await.unwrap() {
            ServerEvent::Error { message } => assert!(message.contains("userId")),
            other => panic!("Expected Error, got {:?}", other),
        }
        assert_eq!(peer.session.user_id(), None);
        assert!(registry.lookup(-1).await.is_none());

        // The connection is still usable: a valid auth now succeeds
        peer.session
            .handle_event(ClientEvent::Auth { user_id: 1 })
            .await;
        match peer.rx.recv().await.unwrap() {
            ServerEvent::AuthSuccess { user_id } => assert_eq!(user_id, 1),
            other => panic!("Expected AuthSuccess, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn message_before_auth_is_silently_ignored() {
        let registry = Arc::new(ConnectionRegistry::new());
        let repo = test_helpers::test_repository().await;
        let mut peer = test_peer(&registry, &repo).await;

        peer.session
            .handle_event(ClientEvent::Message {
                content: "hi".to_string(),
                receiver_id: 2,
            })
            .await;

        assert!(matches!(peer.rx.try_recv(), Err(TryRecvError::Empty)));
        let msgs = repo.get_conversation(1, 2, 10).await.unwrap();
        assert!(msgs.is_empty());
    }

    #[tokio::test]
    async fn message_relays_to_online_receiver() {
        let registry = Arc::new(ConnectionRegistry::new());
        let repo = test_helpers::test_repository().await;

        let mut alice = authed_peer(&registry, &repo, 1).await;
        let mut bob = authed_peer(&registry, &repo, 2).await;

        alice
            .session
            .handle_event(ClientEvent::Message {
                content: "hi".to_string(),
                receiver_id: 2,
            })
            .await;

        let sent = match alice.rx.recv().await.unwrap() {
            ServerEvent::MessageSent { message } => message,
            other => panic!("Expected MessageSent, got {:?}", other),
        };
        assert_eq!(sent.id, 1);
        assert_eq!(sent.sender_id, 1);
        assert_eq!(sent.receiver_id, 2);
        assert_eq!(sent.content, "hi");

        let received = match bob.rx.recv().await.unwrap() {
            ServerEvent::NewMessage { message } => message,
            other => panic!("Expected NewMessage, got {:?}", other),
        };
        assert_eq!(received, sent);
    }

    #[tokio::test]
    async fn offline_receiver_still_acknowledges_sender() {
        let registry = Arc::new(ConnectionRegistry::new());
        let repo = test_helpers::test_repository().await;

        let mut alice = authed_peer(&registry, &repo, 1).await;

        alice
            .session
            .handle_event(ClientEvent::Message {
                content: "anyone there?".to_string(),
                receiver_id: 2,
            })
            .await;

        match alice.rx.recv().await.unwrap() {
            ServerEvent::MessageSent { message } => {
                assert_eq!(message.receiver_id, 2);
            }
            other => panic!("Expected MessageSent, got {:?}", other),
        }
        // No error for receiver absence, and nothing else emitted
        assert!(matches!(alice.rx.try_recv(), Err(TryRecvError::Empty)));
        // The message is persisted regardless
        let msgs = repo.get_conversation(1, 2, 10).await.unwrap();
        assert_eq!(msgs.len(), 1);
    }

    #[tokio::test]
    async fn invalid_receiver_errors_and_keeps_session() {
        let registry = Arc::new(ConnectionRegistry::new());
        let repo = test_helpers::test_repository().await;

        let mut alice = authed_peer(&registry, &repo, 1).await;
        let mut bob = authed_peer(&registry, &repo, 2).await;

        alice
            .session
            .handle_event(ClientEvent::Message {
                content: "hi".to_string(),
                receiver_id: -5,
            })
            .await;

        match alice.rx.recv().await.unwrap() {
            ServerEvent::Error { message } => assert!(message.contains("receiverId")),
            other => panic!("Expected Error, got {:?}", other),
        }

        // Session remains Authenticated and can send further valid messages
        assert_eq!(alice.session.user_id(), Some(1));
        alice
            .session
            .handle_event(ClientEvent::Message {
                content: "still here".to_string(),
                receiver_id: 2,
            })
            .await;
        assert!(matches!(
            alice.rx.recv().await.unwrap(),
            ServerEvent::MessageSent { .. }
        ));
        assert!(matches!(
            bob.rx.recv().await.unwrap(),
            ServerEvent::NewMessage { .. }
        ));
    }

    #[tokio::test]
    async fn malformed_frame_errors_without_state_change() {
        let registry = Arc::new(ConnectionRegistry::new());
        let repo = test_helpers::test_repository().await;

        let mut alice = authed_peer(&registry, &repo, 1).await;

        alice
            .session
            .handle_text(r#"{"type":"message","receiverId":"x"}"#)
            .await;
        match alice.rx.recv().await.unwrap() {
            ServerEvent::Error { .. } => {}
            other => panic!("Expected Error, got {:?}", other),
        }

        alice.session.handle_text("not json at all").await;
        match alice.rx.recv().await.unwrap() {
            ServerEvent::Error { .. } => {}
            other => panic!("Expected Error, got {:?}", other),
        }

        // Still Authenticated and functional
        assert_eq!(alice.session.user_id(), Some(1));
        alice
            .session
            .handle_text(r#"{"type":"message","content":"ok","receiverId":2}"#)
            .await;
        assert!(matches!(
            alice.rx.recv().await.unwrap(),
            ServerEvent::MessageSent { .. }
        ));
    }

    #[tokio::test]
    async fn unknown_event_type_is_ignored() {
        let registry = Arc::new(ConnectionRegistry::new());
        let repo = test_helpers::test_repository().await;

        let mut peer = test_peer(&registry, &repo).await;
        peer.session
            .handle_text(r#"{"type":"presence","userId":1}"#)
            .await;
        assert!(matches!(peer.rx.try_recv(), Err(TryRecvError::Empty)));
    }

    #[tokio::test]
    async fn store_failure_errors_sender_and_suppresses_fanout() {
        let registry = Arc::new(ConnectionRegistry::new());
        let repo = test_helpers::test_repository().await;

        let mut alice = authed_peer(&registry, &repo, 1).await;
        let mut bob = authed_peer(&registry, &repo, 2).await;

        // Break persistence out from under the relay
        sqlx::query("DROP TABLE messages")
            .execute(&repo.pool)
            .await
            .unwrap();

        alice
            .session
            .handle_event(ClientEvent::Message {
                content: "doomed".to_string(),
                receiver_id: 2,
            })
            .await;

        match alice.rx.recv().await.unwrap() {
            ServerEvent::Error { message } => assert!(message.contains("store")),
            other => panic!("Expected Error, got {:?}", other),
        }
        // No partial fan-out
        assert!(matches!(bob.rx.try_recv(), Err(TryRecvError::Empty)));
        // Connection stays alive
        assert_eq!(alice.session.user_id(), Some(1));
    }

    #[tokio::test]
    async fn close_unbinds_exactly_once_and_is_idempotent() {
        let registry = Arc::new(ConnectionRegistry::new());
        let repo = test_helpers::test_repository().await;

        let mut alice = authed_peer(&registry, &repo, 1).await;
        alice.session.close().await;
        assert!(registry.lookup(1).await.is_none());

        // Closing again is a no-op, and no further events are processed
        alice.session.close().await;
        alice
            .session
            .handle_event(ClientEvent::Auth { user_id: 1 })
            .await;
        assert!(matches!(alice.rx.try_recv(), Err(TryRecvError::Empty)));
        assert!(registry.lookup(1).await.is_none());
    }

    #[tokio::test]
    async fn close_before_auth_is_a_noop() {
        let registry = Arc::new(ConnectionRegistry::new());
        let repo = test_helpers::test_repository().await;

        let mut peer = test_peer(&registry, &repo).await;
        peer.session.close().await;
        assert_eq!(registry.online_count().await, 0);
    }

    #[tokio::test]
    async fn reauth_rebinds_last_writer_wins() {
        let registry = Arc::new(ConnectionRegistry::new());
        let repo = test_helpers::test_repository().await;

        let mut alice = authed_peer(&registry, &repo, 1).await;

        // Re-auth under a different identity rebinds without tearing down
        alice
            .session
            .handle_event(ClientEvent::Auth { user_id: 3 })
            .await;
        match alice.rx.recv().await.unwrap() {
            ServerEvent::AuthSuccess { user_id } => assert_eq!(user_id, 3),
            other => panic!("Expected AuthSuccess, got {:?}", other),
        }
        assert_eq!(alice.session.user_id(), Some(3));
        assert!(registry.lookup(3).await.is_some());
        // The prior identity's entry is abandoned in place, not cleared
        assert!(registry.lookup(1).await.is_some());
    }

    #[tokio::test]
    async fn displaced_connection_close_keeps_new_binding_routable() {
        let registry = Arc::new(ConnectionRegistry::new());
        let repo = test_helpers::test_repository().await;

        // Old transport drops, new transport re-auths as the same identity
        let mut stale = authed_peer(&registry, &repo, 1).await;
        let fresh = authed_peer(&registry, &repo, 1).await;

        stale.session.close().await;

        let entry = registry.lookup(1).await.unwrap();
        assert_eq!(entry.connection_id, fresh.session.connection_id());
    }
}
