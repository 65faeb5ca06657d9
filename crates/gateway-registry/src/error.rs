/// Errors the client registry can fail with (§4.1).
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("public key is not parseable PEM")]
    InvalidPublicKey,
    #[error("signature algorithm '{0}' is not accepted")]
    UnsupportedAlgorithm(String),
    #[error("a client named '{0}' already exists")]
    DuplicateName(String),
    #[error("a client with this public key already exists (id {0})")]
    DuplicateKey(String),
    #[error("client not found")]
    NotFound,
    #[error("registry I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("registry serialization error: {0}")]
    Json(#[from] serde_json::Error),
}
