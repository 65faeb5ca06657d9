use std::{collections::HashMap, sync::Arc, time::Instant};

use tokio::{sync::RwLock, task::JoinHandle};

/// Connection lifecycle states (§4.6). `Closed` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    New,
    AwaitingSignature,
    Authenticated,
    Closed,
}

/// Per-WebSocket server-side state (§3 "Connection").
pub struct Connection {
    pub id: String,
    pub peer: String,
    pub connected_at: Instant,
    state: ConnectionState,
    pub client_id: Option<String>,
    auth_deadline: Option<JoinHandle<()>>,
}

impl Connection {
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    fn cancel_auth_deadline(&mut self) {
        if let Some(handle) = self.auth_deadline.take() {
            handle.abort();
        }
    }

    pub fn transition_to_authenticated(&mut self, client_id: String) {
        self.cancel_auth_deadline();
        self.client_id = Some(client_id);
        self.state = ConnectionState::Authenticated;
    }

    pub fn transition_to_closed(&mut self) {
        self.cancel_auth_deadline();
        self.state = ConnectionState::Closed;
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.cancel_auth_deadline();
    }
}

/// Shared registry of live connections (C5). One lock over the whole map,
/// same shape as the teacher's `GatewayState::clients` (§4.6, §5).
#[derive(Default)]
pub struct ConnectionManager {
    inner: RwLock<HashMap<String, Connection>>,
}

impl ConnectionManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new connection in `AwaitingSignature`, with `on_deadline`
    /// spawned as its auth-deadline timer (§4.6 `NEW -> AWAITING_SIGNATURE`).
    pub async fn accept(&self, id: String, peer: String, auth_deadline: JoinHandle<()>) {
        let mut map = self.inner.write().await;
        map.insert(id.clone(), Connection {
            id,
            peer,
            connected_at: Instant::now(),
            state: ConnectionState::AwaitingSignature,
            client_id: None,
            auth_deadline: Some(auth_deadline),
        });
    }

    pub async fn mark_authenticated(&self, id: &str, client_id: &str) {
        if let Some(conn) = self.inner.write().await.get_mut(id) {
            conn.transition_to_authenticated(client_id.to_string());
        }
    }

    pub async fn state_of(&self, id: &str) -> Option<ConnectionState> {
        self.inner.read().await.get(id).map(|c| c.state())
    }

    pub async fn client_id_of(&self, id: &str) -> Option<String> {
        self.inner.read().await.get(id).and_then(|c| c.client_id.clone())
    }

    pub async fn peer_of(&self, id: &str) -> Option<String> {
        self.inner.read().await.get(id).map(|c| c.peer.clone())
    }

    /// Remove and tear down a connection. Cancels its auth-deadline timer as
    /// part of `Connection`'s `Drop` (§4.6 teardown).
    pub async fn close(&self, id: &str) -> Option<Connection> {
        let mut map = self.inner.write().await;
        if let Some(mut conn) = map.remove(id) {
            conn.transition_to_closed();
            Some(conn)
        } else {
            None
        }
    }

    pub async fn count(&self) -> usize {
        self.inner.read().await.len()
    }
}

pub type SharedConnectionManager = Arc<ConnectionManager>;

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn accept_starts_in_awaiting_signature() {
        let mgr = ConnectionManager::new();
        let handle = tokio::spawn(async {});
        mgr.accept("c1".into(), "1.2.3.4".into(), handle).await;
        assert_eq!(mgr.state_of("c1").await, Some(ConnectionState::AwaitingSignature));
    }

    #[tokio::test]
    async fn mark_authenticated_transitions_and_binds_client() {
        let mgr = ConnectionManager::new();
        let handle = tokio::spawn(async {});
        mgr.accept("c1".into(), "1.2.3.4".into(), handle).await;
        mgr.mark_authenticated("c1", "client-xyz").await;
        assert_eq!(mgr.state_of("c1").await, Some(ConnectionState::Authenticated));
        assert_eq!(mgr.client_id_of("c1").await, Some("client-xyz".to_string()));
    }

    #[tokio::test]
    async fn close_removes_connection() {
        let mgr = ConnectionManager::new();
        let handle = tokio::spawn(async {});
        mgr.accept("c1".into(), "1.2.3.4".into(), handle).await;
        assert!(mgr.close("c1").await.is_some());
        assert_eq!(mgr.state_of("c1").await, None);
    }
}
