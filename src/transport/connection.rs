//! Connection bookkeeping shared by every `Transport` implementation:
//! state machine, activity timestamps, byte/frame counters.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tokio::sync::RwLock;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Active,
    Idle,
    Closing,
    Closed,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportKind {
    Tcp,
    InProcess,
}

/// Tracks one worker connection's state and traffic counters. Held by the
/// czar's connection pool, one per worker name.
#[derive(Debug)]
pub struct Connection {
    peer: String,
    kind: TransportKind,
    state: RwLock<ConnectionState>,
    created_at: Instant,
    last_activity: RwLock<Instant>,
    bytes_sent: AtomicU64,
    bytes_received: AtomicU64,
    frames_sent: AtomicU64,
    frames_received: AtomicU64,
}

impl Connection {
    pub fn new(peer: String, kind: TransportKind) -> Self {
        let now = Instant::now();
        Self {
            peer,
            kind,
            state: RwLock::new(ConnectionState::Connecting),
            created_at: now,
            last_activity: RwLock::new(now),
            bytes_sent: AtomicU64::new(0),
            bytes_received: AtomicU64::new(0),
            frames_sent: AtomicU64::new(0),
            frames_received: AtomicU64::new(0),
        }
    }

    pub fn peer(&self) -> &str {
        &self.peer
    }

    pub fn kind(&self) -> TransportKind {
        self.kind
    }

    pub async fn state(&self) -> ConnectionState {
        *self.state.read().await
    }

    pub async fn set_state(&self, new_state: ConnectionState) {
        *self.state.write().await = new_state;
    }

    pub fn uptime(&self) -> std::time::Duration {
        self.created_at.elapsed()
    }

    pub async fn idle_time(&self) -> std::time::Duration {
        self.last_activity.read().await.elapsed()
    }

    pub async fn touch(&self) {
        *self.last_activity.write().await = Instant::now();
    }

    pub fn record_sent(&self, bytes: u64) {
        self.bytes_sent.fetch_add(bytes, Ordering::Relaxed);
        self.frames_sent.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_received(&self, bytes: u64) {
        self.bytes_received.fetch_add(bytes, Ordering::Relaxed);
        self.frames_received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn bytes_sent(&self) -> u64 {
        self.bytes_sent.load(Ordering::Relaxed)
    }

    pub fn bytes_received(&self) -> u64 {
        self.bytes_received.load(Ordering::Relaxed)
    }

    pub async fn is_healthy(&self) -> bool {
        matches!(self.state().await, ConnectionState::Active | ConnectionState::Idle)
    }

    pub async fn should_close_idle(&self, idle_timeout: std::time::Duration) -> bool {
        self.idle_time().await > idle_timeout
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn connection_starts_connecting_and_transitions() {
        let conn = Connection::new("worker1".to_string(), TransportKind::Tcp);
        assert_eq!(conn.state().await, ConnectionState::Connecting);
        conn.set_state(ConnectionState::Active).await;
        assert!(conn.is_healthy().await);
        conn.set_state(ConnectionState::Closed).await;
        assert!(!conn.is_healthy().await);
    }

    #[tokio::test]
    async fn byte_counters_accumulate() {
        let conn = Connection::new("worker1".to_string(), TransportKind::Tcp);
        conn.record_sent(100);
        conn.record_sent(50);
        conn.record_received(30);
        assert_eq!(conn.bytes_sent(), 150);
        assert_eq!(conn.bytes_received(), 30);
    }
}
