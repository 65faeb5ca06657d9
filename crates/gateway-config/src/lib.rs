//! Validated runtime configuration (§6.5), read once from the environment
//! and passed to the gateway by construction — no global singleton, no
//! config-file discovery.

use std::path::PathBuf;

use gateway_protocol::{
    DEFAULT_AUTH_CHALLENGE_TIMEOUT_MS, DEFAULT_AUTH_WINDOW_MS, DEFAULT_MAX_AUTH_ATTEMPTS,
    DEFAULT_PING_INTERVAL_MS, DEFAULT_RECONNECT_DELAY_MS, DEFAULT_REQUEST_TIMEOUT_MS,
    DEFAULT_SIGNATURE_ALGORITHM,
};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

/// The gateway server's validated configuration.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub host: String,
    pub port: u16,
    pub ollama_api_url: String,
    pub ollama_default_model: Option<String>,
    pub data_dir: PathBuf,
    pub auth_timeout_ms: u64,
    pub max_auth_attempts: u32,
    pub auth_window_ms: u64,
    pub default_signature_algorithm: String,
    pub log_level: String,
    /// Optional bearer token required on `/api/auth/register` (§11 supplement).
    pub register_token: Option<String>,
}

impl GatewayConfig {
    /// Read and validate configuration from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        let host = env_or("HOST", "0.0.0.0");
        let port = parse_env("PORT", 3000)?;
        let ollama_api_url = env_or("OLLAMA_API_URL", "http://localhost:11434");
        let ollama_default_model = std::env::var("OLLAMA_DEFAULT_MODEL").ok();
        let data_dir = PathBuf::from(env_or("DATA_DIR", "./data"));
        let auth_timeout_ms = parse_env("AUTH_TIMEOUT_MS", DEFAULT_AUTH_CHALLENGE_TIMEOUT_MS * 3)?;
        let max_auth_attempts = parse_env("MAX_AUTH_ATTEMPTS", DEFAULT_MAX_AUTH_ATTEMPTS)?;
        let auth_window_ms = parse_env("AUTH_WINDOW_MS", DEFAULT_AUTH_WINDOW_MS)?;
        let default_signature_algorithm =
            env_or("DEFAULT_SIGNATURE_ALGORITHM", DEFAULT_SIGNATURE_ALGORITHM);
        let log_level = env_or("LOG_LEVEL", "info");
        let register_token = std::env::var("REGISTER_TOKEN").ok();

        if !gateway_protocol::is_supported_signature_algorithm(&default_signature_algorithm) {
            return Err(ConfigError::Invalid {
                field: "DEFAULT_SIGNATURE_ALGORITHM",
                reason: format!("'{default_signature_algorithm}' is not an accepted digest"),
            });
        }
        if max_auth_attempts == 0 {
            return Err(ConfigError::Invalid {
                field: "MAX_AUTH_ATTEMPTS",
                reason: "must be at least 1".to_string(),
            });
        }

        Ok(Self {
            host,
            port,
            ollama_api_url,
            ollama_default_model,
            data_dir,
            auth_timeout_ms,
            max_auth_attempts,
            auth_window_ms,
            default_signature_algorithm,
            log_level,
            register_token,
        })
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Reference defaults for the client runtime's own knobs (§4.9), exposed so
/// `gateway-client` callers can build a config without duplicating numbers.
#[derive(Debug, Clone)]
pub struct ClientRuntimeConfig {
    pub url: String,
    pub client_id: String,
    pub private_key_pem: String,
    pub signature_algorithm: String,
    pub auth_challenge_timeout_ms: u64,
    pub request_timeout_ms: u64,
    pub ping_interval_ms: u64,
    pub reconnect_delay_ms: u64,
}

impl ClientRuntimeConfig {
    pub fn new(url: impl Into<String>, client_id: impl Into<String>, private_key_pem: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            client_id: client_id.into(),
            private_key_pem: private_key_pem.into(),
            signature_algorithm: DEFAULT_SIGNATURE_ALGORITHM.to_string(),
            auth_challenge_timeout_ms: DEFAULT_AUTH_CHALLENGE_TIMEOUT_MS,
            request_timeout_ms: DEFAULT_REQUEST_TIMEOUT_MS,
            ping_interval_ms: DEFAULT_PING_INTERVAL_MS,
            reconnect_delay_ms: DEFAULT_RECONNECT_DELAY_MS,
        }
    }
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn parse_env<T: std::str::FromStr>(key: &str, default: T) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(raw) => raw.parse::<T>().map_err(|e| ConfigError::Invalid {
            field: "env",
            reason: format!("{key}='{raw}': {e}"),
        }),
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    #[allow(unsafe_code)]
    fn defaults_apply_when_unset() {
        // Env vars are process-global; safe here because tests in this
        // module run serially and don't share these keys with other tests.
        unsafe {
            std::env::remove_var("PORT");
            std::env::remove_var("HOST");
        }
        let cfg = GatewayConfig::from_env().unwrap();
        assert_eq!(cfg.port, 3000);
        assert_eq!(cfg.host, "0.0.0.0");
    }

    #[test]
    #[allow(unsafe_code)]
    fn rejects_unsupported_algorithm() {
        unsafe {
            std::env::set_var("DEFAULT_SIGNATURE_ALGORITHM", "MD5");
        }
        let err = GatewayConfig::from_env();
        unsafe {
            std::env::remove_var("DEFAULT_SIGNATURE_ALGORITHM");
        }
        assert!(err.is_err());
    }
}
