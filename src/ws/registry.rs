//! Connection Registry
//!
//! The live mapping of online identities to their connections. Shared by all
//! connection tasks; owned by server startup and passed by `Arc`.

use std::collections::HashMap;
use tokio::sync::{RwLock, mpsc};
use tracing::debug;

use super::protocol::ServerEvent;

/// A connection's registry entry: its id (for ownership checks on unbind)
/// and the channel that delivers events to its socket.
#[derive(Debug, Clone)]
pub struct RegisteredPeer {
    pub connection_id: String,
    pub tx: mpsc::Sender<ServerEvent>,
}

/// Identity → live connection. At most one entry per identity; binding over
/// an existing identity overwrites it (last writer wins) and abandons the
/// prior connection's record without closing its transport.
#[derive(Default)]
pub struct ConnectionRegistry {
    peers: RwLock<HashMap<i64, RegisteredPeer>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or overwrite the entry for an identity.
    pub async fn bind(&self, user_id: i64, peer: RegisteredPeer) {
        let mut peers = self.peers.write().await;
        if let Some(prev) = peers.insert(user_id, peer) {
            debug!(
                user_id,
                prev_conn = %prev.connection_id,
                "rebinding identity, abandoning prior connection's entry"
            );
        }
    }

    /// Look up the live connection for an identity, if online.
    pub async fn lookup(&self, user_id: i64) -> Option<RegisteredPeer> {
        self.peers.read().await.get(&user_id).cloned()
    }

    /// Remove the entry for an identity, but only while it still belongs to
    /// the given connection. A connection displaced by a later bind was
    /// abandoned; its close must not evict the new owner. Returns whether an
    /// entry was removed; no-op when absent.
    pub async fn unbind(&self, user_id: i64, connection_id: &str) -> bool {
        let mut peers = self.peers.write().await;
        match peers.get(&user_id) {
            Some(peer) if peer.connection_id == connection_id => {
                peers.remove(&user_id);
                true
            }
            _ => false,
        }
    }

    /// Number of identities currently online.
    pub async fn online_count(&self) -> usize {
        self.peers.read().await.len()
    }
}
