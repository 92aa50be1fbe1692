//! Server metrics for observability
//!
//! Runtime counters for monitoring relay health, exposed via the health endpoint.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

/// Server-wide metrics
#[derive(Debug, Default)]
pub struct ServerMetrics {
    /// Currently active WebSocket connections
    pub active_connections: AtomicU64,
    /// Total connections since server start
    pub total_connections: AtomicU64,

    /// Client events received over WebSocket
    pub events_received: AtomicU64,
    /// Messages successfully persisted
    pub messages_stored: AtomicU64,
    /// Messages delivered to an online receiver
    pub messages_relayed: AtomicU64,
    /// Fan-out deliveries dropped (receiver channel saturated or closing)
    pub messages_dropped: AtomicU64,
    /// Persistence failures surfaced to senders
    pub store_failures: AtomicU64,

    /// Server start time (for uptime calculation)
    start_time: Option<Instant>,
}

impl ServerMetrics {
    pub fn new() -> Self {
        Self {
            start_time: Some(Instant::now()),
            ..Default::default()
        }
    }

    pub fn connection_opened(&self) {
        self.active_connections.fetch_add(1, Ordering::Relaxed);
        self.total_connections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn connection_closed(&self) {
        self.active_connections.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn event_received(&self) {
        self.events_received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn message_stored(&self) {
        self.messages_stored.fetch_add(1, Ordering::Relaxed);
    }

    pub fn message_relayed(&self) {
        self.messages_relayed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn message_dropped(&self) {
        self.messages_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn store_failure(&self) {
        self.store_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            connections: ConnectionMetrics {
                active: self.active_connections.load(Ordering::Relaxed),
                total: self.total_connections.load(Ordering::Relaxed),
            },
            relay: RelayMetrics {
                events_received: self.events_received.load(Ordering::Relaxed),
                messages_stored: self.messages_stored.load(Ordering::Relaxed),
                messages_relayed: self.messages_relayed.load(Ordering::Relaxed),
                messages_dropped: self.messages_dropped.load(Ordering::Relaxed),
                store_failures: self.store_failures.load(Ordering::Relaxed),
            },
            uptime_secs: self
                .start_time
                .map(|t| t.elapsed().as_secs())
                .unwrap_or(0),
        }
    }
}

/// Point-in-time view of the metrics (for serialization)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub connections: ConnectionMetrics,
    pub relay: RelayMetrics,
    pub uptime_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionMetrics {
    pub active: u64,
    pub total: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayMetrics {
    pub events_received: u64,
    pub messages_stored: u64,
    pub messages_relayed: u64,
    pub messages_dropped: u64,
    pub store_failures: u64,
}

/// Health check response body
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthStatus {
    pub status: String,
    /// Identities currently bound in the registry
    pub online_users: usize,
    pub connections: ConnectionMetrics,
    pub uptime_secs: u64,
}
