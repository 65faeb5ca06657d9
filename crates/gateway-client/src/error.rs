/// Errors surfaced to callers of the client runtime (§4.9, §7).
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
    #[error("frame serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("signing error: {0}")]
    Signing(String),
    #[error("request timed out")]
    Timeout,
    #[error("authentication failed: {0}")]
    AuthFailed(String),
    #[error("not connected")]
    Disconnected,
    #[error("server rejected request: {0}")]
    Rejected(String),
}
