use std::{collections::HashMap, sync::Arc, time::Duration};

use rand::RngCore;
use tokio::{sync::RwLock, task::JoinHandle};

use gateway_protocol::CHALLENGE_TTL_MS;

struct ChallengeEntry {
    value: String,
    expiry_task: JoinHandle<()>,
}

impl Drop for ChallengeEntry {
    fn drop(&mut self) {
        self.expiry_task.abort();
    }
}

/// Per-connection nonces with expiry and single-use consumption (C2).
///
/// Mirrors the teacher's `DedupeCache` in shape (a single lock over a map)
/// but each entry schedules its own expiry task instead of sweeping lazily,
/// since a challenge must disappear exactly at its deadline rather than on
/// the next unrelated check (§4.4).
pub struct ChallengeStore {
    entries: Arc<RwLock<HashMap<String, ChallengeEntry>>>,
    ttl: Duration,
}

impl Default for ChallengeStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ChallengeStore {
    pub fn new() -> Self {
        Self {
            entries: Arc::new(RwLock::new(HashMap::new())),
            ttl: Duration::from_millis(CHALLENGE_TTL_MS),
        }
    }

    /// Generate a fresh 256-bit hex challenge for `connection_id`, replacing
    /// (and cancelling the timer of) any prior entry.
    pub async fn issue(&self, connection_id: &str) -> String {
        let mut bytes = [0u8; 32];
        rand::rng().fill_bytes(&mut bytes);
        let challenge: String = bytes.iter().map(|b| format!("{b:02x}")).collect();

        let entries = Arc::clone(&self.entries);
        let conn_id = connection_id.to_string();
        let ttl = self.ttl;
        let expire_challenge = challenge.clone();
        let expiry_task = tokio::spawn(async move {
            tokio::time::sleep(ttl).await;
            let mut map = entries.write().await;
            if let Some(entry) = map.get(&conn_id) {
                if entry.value == expire_challenge {
                    map.remove(&conn_id);
                }
            }
        });

        let mut map = self.entries.write().await;
        map.insert(connection_id.to_string(), ChallengeEntry {
            value: challenge.clone(),
            expiry_task,
        });
        challenge
    }

    /// Read the currently stored challenge for `connection_id` without
    /// consuming it. The `authenticate` frame carries only a signature, so
    /// the handler needs this to recover the bytes the client signed before
    /// calling [`ChallengeStore::verify`] (§4.6, §6.1).
    pub async fn peek(&self, connection_id: &str) -> Option<String> {
        self.entries.read().await.get(connection_id).map(|e| e.value.clone())
    }

    /// Verify `challenge` against the stored value for `connection_id`.
    /// Consumes the entry unconditionally on a match; leaves a mismatched
    /// entry in place (so a lookup-miss vs. wrong-value is indistinguishable
    /// to the caller, matching "single-use" semantics in §4.4 and §8).
    pub async fn verify(&self, connection_id: &str, challenge: &str) -> bool {
        let mut map = self.entries.write().await;
        match map.get(connection_id) {
            Some(entry) if entry.value == challenge => {
                map.remove(connection_id);
                true
            }
            _ => false,
        }
    }

    /// Cancel the timer and remove the entry, if any.
    pub async fn clear(&self, connection_id: &str) {
        self.entries.write().await.remove(connection_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn verify_succeeds_once_then_fails() {
        let store = ChallengeStore::new();
        let challenge = store.issue("conn-1").await;
        assert!(store.verify("conn-1", &challenge).await);
        assert!(!store.verify("conn-1", &challenge).await);
    }

    #[tokio::test]
    async fn wrong_value_does_not_consume() {
        let store = ChallengeStore::new();
        let challenge = store.issue("conn-1").await;
        assert!(!store.verify("conn-1", "deadbeef").await);
        assert!(store.verify("conn-1", &challenge).await);
    }

    #[tokio::test]
    async fn issuing_twice_replaces_prior_challenge() {
        let store = ChallengeStore::new();
        let first = store.issue("conn-1").await;
        let second = store.issue("conn-1").await;
        assert_ne!(first, second);
        assert!(!store.verify("conn-1", &first).await);
        assert!(store.verify("conn-1", &second).await);
    }

    #[tokio::test]
    async fn peek_does_not_consume() {
        let store = ChallengeStore::new();
        let challenge = store.issue("conn-1").await;
        assert_eq!(store.peek("conn-1").await, Some(challenge.clone()));
        assert!(store.verify("conn-1", &challenge).await);
    }

    #[tokio::test]
    async fn clear_removes_entry() {
        let store = ChallengeStore::new();
        let challenge = store.issue("conn-1").await;
        store.clear("conn-1").await;
        assert!(!store.verify("conn-1", &challenge).await);
    }
}
