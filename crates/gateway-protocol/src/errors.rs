use serde::{Deserialize, Serialize};

/// Wire error codes (§6.1). Serialized exactly as the spec's literals.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    #[error("invalid authentication")]
    InvalidAuthentication,
    #[error("authentication timeout")]
    AuthenticationTimeout,
    #[error("rate limited")]
    RateLimited,
    #[error("invalid request")]
    InvalidRequest,
    #[error("missing parameters")]
    MissingParameters,
    #[error("generation failed")]
    GenerationFailed,
    #[error("server error")]
    ServerError,
    #[error("reconnect failed")]
    ReconnectFailed,
    #[error("connection timeout")]
    ConnectionTimeout,
    #[error("auth challenge timeout")]
    AuthChallengeTimeout,
    #[error("invalid auth")]
    InvalidAuth,
}

/// WebSocket close codes (§6.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseCode {
    Normal,
    Policy,
    ServerError,
    AuthFailed,
    AuthTimeout,
    RateLimited,
    ServerShutdown,
}

impl CloseCode {
    pub const fn code(self) -> u16 {
        match self {
            CloseCode::Normal => 1000,
            CloseCode::Policy => 1008,
            CloseCode::ServerError => 1011,
            CloseCode::AuthFailed => 4000,
            CloseCode::AuthTimeout => 4001,
            CloseCode::RateLimited => 4002,
            CloseCode::ServerShutdown => 4003,
        }
    }

    pub const fn reason(self) -> &'static str {
        match self {
            CloseCode::Normal => "normal",
            CloseCode::Policy => "policy",
            CloseCode::ServerError => "server_error",
            CloseCode::AuthFailed => "auth_failed",
            CloseCode::AuthTimeout => "auth_timeout",
            CloseCode::RateLimited => "rate_limited",
            CloseCode::ServerShutdown => "server_shutdown",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_code_serializes_to_spec_literal() {
        assert_eq!(
            serde_json::to_string(&ErrorCode::MissingParameters).unwrap(),
            "\"missing_parameters\""
        );
        assert_eq!(
            serde_json::to_string(&ErrorCode::AuthChallengeTimeout).unwrap(),
            "\"auth_challenge_timeout\""
        );
    }

    #[test]
    fn close_code_values_match_spec() {
        assert_eq!(CloseCode::AuthFailed.code(), 4000);
        assert_eq!(CloseCode::AuthTimeout.code(), 4001);
        assert_eq!(CloseCode::RateLimited.code(), 4002);
        assert_eq!(CloseCode::ServerShutdown.code(), 4003);
    }
}
