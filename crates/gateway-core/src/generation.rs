use std::{collections::HashMap, time::Instant};

use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

/// An upstream streaming request in progress, owned by one connection (§3).
///
/// Cancellation is cooperative (a [`CancellationToken`]) rather than a hard
/// task abort, so the streaming task can still emit the required
/// `STREAM_END{isCancelled:true}` frame instead of being killed mid-flight
/// (§4.8, §5 "exactly one of STREAM_END/ERROR").
pub struct Generation {
    pub request_id: String,
    pub connection_id: String,
    pub model: String,
    pub start_time: Instant,
    cancel: CancellationToken,
}

impl Generation {
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    fn cancel(&self) {
        self.cancel.cancel();
    }
}

/// Table of active generations keyed by `requestId` (§3, §5 "Generation
/// table is keyed by requestId; lookups and removals are O(1)").
#[derive(Default)]
pub struct GenerationTable {
    inner: RwLock<HashMap<String, Generation>>,
}

impl GenerationTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new generation before upstream I/O starts (§4.8
    /// "Ownership and cancellation"). Returns the generation's cancellation
    /// token on success, or `None` if `request_id` is already in use.
    pub async fn register(
        &self,
        request_id: &str,
        connection_id: &str,
        model: &str,
    ) -> Option<CancellationToken> {
        let mut map = self.inner.write().await;
        if map.contains_key(request_id) {
            return None;
        }
        let cancel = CancellationToken::new();
        map.insert(request_id.to_string(), Generation {
            request_id: request_id.to_string(),
            connection_id: connection_id.to_string(),
            model: model.to_string(),
            start_time: Instant::now(),
            cancel: cancel.clone(),
        });
        Some(cancel)
    }

    pub async fn remove(&self, request_id: &str) -> Option<Generation> {
        self.inner.write().await.remove(request_id)
    }

    /// Cancel `request_id` iff it is owned by `connection_id` (§4.7 `STOP`,
    /// §8 "Ownership"). Leaves the entry in the table — the streaming task
    /// removes it once it has emitted its final frame.
    pub async fn stop(&self, request_id: &str, connection_id: &str) -> StopOutcome {
        let map = self.inner.read().await;
        match map.get(request_id) {
            None => StopOutcome::NotFound,
            Some(g) if g.connection_id != connection_id => StopOutcome::NotOwner,
            Some(g) => {
                g.cancel();
                StopOutcome::Stopped
            }
        }
    }

    /// Cancel every generation owned by `connection_id` (§4.6 "teardown
    /// cancels all owned generations"); does not wait for them to finish.
    pub async fn cancel_owned_by(&self, connection_id: &str) {
        let map = self.inner.read().await;
        for g in map.values().filter(|g| g.connection_id == connection_id) {
            g.cancel();
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    Stopped,
    NotFound,
    NotOwner,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn stop_by_owner_succeeds() {
        let table = GenerationTable::new();
        let token = table.register("g1", "conn-a", "llama3").await.unwrap();
        assert_eq!(table.stop("g1", "conn-a").await, StopOutcome::Stopped);
        assert!(token.is_cancelled());
    }

    #[tokio::test]
    async fn stop_by_non_owner_fails() {
        let table = GenerationTable::new();
        let token = table.register("g1", "conn-a", "llama3").await.unwrap();
        assert_eq!(table.stop("g1", "conn-b").await, StopOutcome::NotOwner);
        assert!(!token.is_cancelled());
    }

    #[tokio::test]
    async fn duplicate_request_id_rejected() {
        let table = GenerationTable::new();
        assert!(table.register("g1", "conn-a", "llama3").await.is_some());
        assert!(table.register("g1", "conn-b", "llama3").await.is_none());
    }

    #[tokio::test]
    async fn cancel_owned_by_only_affects_that_connection() {
        let table = GenerationTable::new();
        let a = table.register("g1", "conn-a", "llama3").await.unwrap();
        let b = table.register("g2", "conn-b", "llama3").await.unwrap();
        table.cancel_owned_by("conn-a").await;
        assert!(a.is_cancelled());
        assert!(!b.is_cancelled());
    }
}
