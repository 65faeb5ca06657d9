use gateway_protocol::ErrorCode;

/// Errors raised by the gateway's internal services and mapped onto wire
/// frames by the WebSocket handler (C6) (§7 "Propagation"). Other
/// authentication/request failures are represented by their own
/// purpose-built result types ([`crate::rate_limit::CheckResult`],
/// [`crate::generation::StopOutcome`]) rather than folded into this enum.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("signature verification failed")]
    InvalidSignature,
    #[error("server error: {0}")]
    Server(String),
}

impl CoreError {
    pub fn code(&self) -> ErrorCode {
        match self {
            CoreError::InvalidSignature => ErrorCode::InvalidAuthentication,
            CoreError::Server(_) => ErrorCode::ServerError,
        }
    }
}
