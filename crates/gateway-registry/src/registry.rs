use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::{
    error::RegistryError,
    fingerprint::fingerprint,
    write::{atomic_write, read_if_exists},
};

/// An authorized client identity (§3 "AuthorizedClient").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthorizedClient {
    pub id: String,
    pub name: String,
    #[serde(rename = "publicKey")]
    pub public_key: String,
    #[serde(rename = "signatureAlgorithm")]
    pub signature_algorithm: String,
    #[serde(rename = "createdAt")]
    pub created_at: DateTime<Utc>,
    #[serde(rename = "lastConnected", skip_serializing_if = "Option::is_none")]
    pub last_connected: Option<DateTime<Utc>>,
    #[serde(rename = "lastIP", skip_serializing_if = "Option::is_none")]
    pub last_ip: Option<String>,
}

impl AuthorizedClient {
    /// Short, human-displayed fingerprint of this client's public key (§3
    /// "Fingerprint: ... used for duplicate detection and display").
    pub fn human_fingerprint(&self) -> Result<String, RegistryError> {
        crate::fingerprint::fingerprint(&self.public_key)
            .map(|full| crate::fingerprint::human_fingerprint(&full))
    }
}

/// Audit fields recorded on a successful authentication (§4.1 `recordConnection`).
#[derive(Debug, Clone)]
pub struct ConnectionAudit {
    pub time: DateTime<Utc>,
    pub peer: String,
}

#[derive(Debug, Clone, Serialize)]
struct RevokedRecord<'a> {
    client: &'a AuthorizedClient,
    #[serde(rename = "revokedAt")]
    revoked_at: DateTime<Utc>,
    reason: &'a str,
}

/// The authoritative set of identities (C1). Holds the parsed list in
/// memory behind a single lock and invalidates it on every successful
/// write, the way the teacher's `GatewayState` wraps its maps (§4.1).
pub struct ClientRegistry {
    data_dir: PathBuf,
    backup_keep_n: usize,
    cache: RwLock<Vec<AuthorizedClient>>,
}

impl ClientRegistry {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            backup_keep_n: gateway_protocol::DEFAULT_BACKUP_KEEP,
            cache: RwLock::new(Vec::new()),
        }
    }

    pub fn with_backup_keep_n(mut self, n: usize) -> Self {
        self.backup_keep_n = n;
        self
    }

    fn clients_path(&self) -> PathBuf {
        self.data_dir.join("authorized_clients.json")
    }

    fn backups_dir(&self) -> PathBuf {
        self.data_dir.join("backups")
    }

    fn revoked_dir(&self) -> PathBuf {
        self.data_dir.join("revoked")
    }

    /// Load the registry from disk into the in-memory cache. Missing file
    /// is treated as an empty registry, not an error.
    pub async fn load(&self) -> Result<(), RegistryError> {
        let bytes = read_if_exists(&self.clients_path())?;
        let clients: Vec<AuthorizedClient> = match bytes {
            Some(b) if !b.is_empty() => serde_json::from_slice(&b)?,
            _ => Vec::new(),
        };
        debug!(count = clients.len(), "loaded client registry");
        *self.cache.write().await = clients;
        Ok(())
    }

    pub async fn lookup(&self, id: &str) -> Option<AuthorizedClient> {
        self.cache.read().await.iter().find(|c| c.id == id).cloned()
    }

    pub async fn list(&self) -> Vec<AuthorizedClient> {
        self.cache.read().await.clone()
    }

    /// Register a new client. Validates the PEM key, the digest algorithm,
    /// and uniqueness of name/key before writing (§4.1).
    pub async fn register(
        &self,
        name: &str,
        public_key: &str,
        algorithm: Option<&str>,
    ) -> Result<String, RegistryError> {
        let algorithm = algorithm.unwrap_or(gateway_protocol::DEFAULT_SIGNATURE_ALGORITHM);
        if !gateway_protocol::is_supported_signature_algorithm(algorithm) {
            return Err(RegistryError::UnsupportedAlgorithm(algorithm.to_string()));
        }

        validate_public_key(public_key)?;
        let new_fingerprint = fingerprint(public_key)?;

        let mut clients = self.cache.write().await;

        if clients
            .iter()
            .any(|c| c.name.eq_ignore_ascii_case(name))
        {
            return Err(RegistryError::DuplicateName(name.to_string()));
        }
        for existing in clients.iter() {
            if let Ok(existing_fp) = fingerprint(&existing.public_key) {
                if existing_fp == new_fingerprint {
                    return Err(RegistryError::DuplicateKey(existing.id.clone()));
                }
            }
        }

        let id = random_id();
        let client = AuthorizedClient {
            id: id.clone(),
            name: name.to_string(),
            public_key: public_key.to_string(),
            signature_algorithm: algorithm.to_string(),
            created_at: Utc::now(),
            last_connected: None,
            last_ip: None,
        };
        clients.push(client);
        self.persist_locked(&clients)?;
        info!(client_id = %id, name, "registered client");
        Ok(id)
    }

    /// Revoke a client: copies it to the append-only audit directory, backs
    /// up the registry, then removes it (§3 lifecycle, §4.1).
    pub async fn revoke(&self, id: &str) -> Result<bool, RegistryError> {
        let mut clients = self.cache.write().await;
        let Some(pos) = clients.iter().position(|c| c.id == id) else {
            return Ok(false);
        };

        self.backup_locked(&clients)?;

        let client = &clients[pos];
        let revoked = RevokedRecord {
            client,
            revoked_at: Utc::now(),
            reason: "revoked",
        };
        let revoked_path = self
            .revoked_dir()
            .join(format!("{}_{}.json", id, dashed_now()));
        atomic_write(&revoked_path, serde_json::to_string_pretty(&revoked)?.as_bytes())?;

        clients.remove(pos);
        self.persist_locked(&clients)?;
        warn!(client_id = %id, "revoked client");
        Ok(true)
    }

    /// Update audit fields on a successful authentication (§3, §4.6).
    pub async fn record_connection(&self, id: &str, audit: ConnectionAudit) -> Result<(), RegistryError> {
        let mut clients = self.cache.write().await;
        let Some(client) = clients.iter_mut().find(|c| c.id == id) else {
            return Err(RegistryError::NotFound);
        };
        client.last_connected = Some(audit.time);
        client.last_ip = Some(audit.peer);
        self.persist_locked(&clients)
    }

    /// Write an explicit backup of the current registry state (§4.2 "on an
    /// explicit backup command").
    pub async fn backup_now(&self) -> Result<PathBuf, RegistryError> {
        let clients = self.cache.read().await;
        self.backup_locked(&clients)
    }

    fn backup_locked(&self, clients: &[AuthorizedClient]) -> Result<PathBuf, RegistryError> {
        let bytes = serde_json::to_vec_pretty(clients)?;
        crate::backup::create_backup(
            &self.backups_dir(),
            "authorized_clients.json",
            &bytes,
            clients.len(),
            self.backup_keep_n,
        )
    }

    fn persist_locked(&self, clients: &[AuthorizedClient]) -> Result<(), RegistryError> {
        let bytes = serde_json::to_vec_pretty(clients)?;
        atomic_write(&self.clients_path(), &bytes)?;
        Ok(())
    }
}

fn validate_public_key(pem: &str) -> Result<(), RegistryError> {
    openssl::pkey::PKey::public_key_from_pem(pem.as_bytes())
        .map(|_| ())
        .map_err(|_| RegistryError::InvalidPublicKey)
}

fn random_id() -> String {
    use rand::RngCore;
    let mut bytes = [0u8; 16];
    rand::rng().fill_bytes(&mut bytes);
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

fn dashed_now() -> String {
    Utc::now()
        .to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
        .replace(':', "-")
        .replace('.', "-")
}

#[cfg(test)]
mod tests {
    use super::*;

    const RSA_PUB: &str = include_str!("../tests/fixtures/rsa_pub.pem");

    #[tokio::test]
    async fn register_then_lookup() {
        let dir = tempfile::tempdir().unwrap();
        let reg = ClientRegistry::new(dir.path());
        reg.load().await.unwrap();
        let id = reg.register("alice", RSA_PUB, None).await.unwrap();
        let found = reg.lookup(&id).await.unwrap();
        assert_eq!(found.name, "alice");
        assert_eq!(found.signature_algorithm, "SHA256");
    }

    #[tokio::test]
    async fn human_fingerprint_is_displayable() {
        let dir = tempfile::tempdir().unwrap();
        let reg = ClientRegistry::new(dir.path());
        reg.load().await.unwrap();
        let id = reg.register("erin", RSA_PUB, None).await.unwrap();
        let found = reg.lookup(&id).await.unwrap();
        let human = found.human_fingerprint().unwrap();
        assert_eq!(human.split(':').count(), 8);
    }

    #[tokio::test]
    async fn duplicate_name_is_case_insensitive() {
        let dir = tempfile::tempdir().unwrap();
        let reg = ClientRegistry::new(dir.path());
        reg.load().await.unwrap();
        reg.register("Alice", RSA_PUB, None).await.unwrap();
        let err = reg.register("alice", RSA_PUB, None).await;
        assert!(matches!(err, Err(RegistryError::DuplicateName(_))));
    }

    #[tokio::test]
    async fn unsupported_algorithm_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let reg = ClientRegistry::new(dir.path());
        reg.load().await.unwrap();
        let err = reg.register("bob", RSA_PUB, Some("MD5")).await;
        assert!(matches!(err, Err(RegistryError::UnsupportedAlgorithm(_))));
    }

    #[tokio::test]
    async fn revoke_removes_and_audits() {
        let dir = tempfile::tempdir().unwrap();
        let reg = ClientRegistry::new(dir.path());
        reg.load().await.unwrap();
        let id = reg.register("carol", RSA_PUB, None).await.unwrap();
        assert!(reg.revoke(&id).await.unwrap());
        assert!(reg.lookup(&id).await.is_none());
        let revoked_files: Vec<_> = std::fs::read_dir(dir.path().join("revoked"))
            .unwrap()
            .collect();
        assert_eq!(revoked_files.len(), 1);
    }

    #[tokio::test]
    async fn reload_survives_restart() {
        let dir = tempfile::tempdir().unwrap();
        let id = {
            let reg = ClientRegistry::new(dir.path());
            reg.load().await.unwrap();
            reg.register("dave", RSA_PUB, None).await.unwrap()
        };
        let reg2 = ClientRegistry::new(dir.path());
        reg2.load().await.unwrap();
        assert!(reg2.lookup(&id).await.is_some());
    }
}
