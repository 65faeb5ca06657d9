use std::{net::SocketAddr, sync::Arc};

use axum::{
    Json, Router,
    extract::{ConnectInfo, State, WebSocketUpgrade},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    routing::{get, post},
};
use serde::Deserialize;
use tower_http::cors::{Any, CorsLayer};

use crate::{ws::handle_connection, GatewayState};

/// Constant-time string comparison (prevents timing attacks on `REGISTER_TOKEN`).
fn safe_equal(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let diff = a
        .as_bytes()
        .iter()
        .zip(b.as_bytes())
        .fold(0u8, |acc, (x, y)| acc | (x ^ y));
    diff == 0
}

/// Build the gateway router (shared between production startup and tests),
/// the same shape as the teacher's `build_gateway_app`.
pub fn build_app(state: Arc<GatewayState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health_handler))
        .route("/ws", get(ws_upgrade_handler))
        .route("/api/auth/register", post(register_handler))
        .layer(cors)
        .with_state(state)
}

pub async fn health_handler(State(state): State<Arc<GatewayState>>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "protocol": gateway_protocol::PROTOCOL_VERSION,
        "connections": state.connections.count().await,
    }))
}

async fn ws_upgrade_handler(
    ws: WebSocketUpgrade,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    State(state): State<Arc<GatewayState>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_connection(socket, state, addr))
}

#[derive(Debug, Deserialize)]
struct RegisterRequest {
    name: String,
    #[serde(rename = "publicKey")]
    public_key: String,
    #[serde(rename = "signatureAlgorithm")]
    signature_algorithm: Option<String>,
}

/// `POST /api/auth/register` (§6.3). Gated by `REGISTER_TOKEN` via a bearer
/// `Authorization` header when that's configured.
async fn register_handler(
    State(state): State<Arc<GatewayState>>,
    headers: HeaderMap,
    Json(req): Json<RegisterRequest>,
) -> impl IntoResponse {
    if let Some(expected) = &state.config.register_token {
        let presented = headers
            .get(axum::http::header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "));
        if !presented.is_some_and(|p| safe_equal(p, expected)) {
            return (
                StatusCode::UNAUTHORIZED,
                Json(serde_json::json!({"error": "missing or invalid registration token"})),
            )
                .into_response();
        }
    }

    match state
        .registry
        .register(&req.name, &req.public_key, req.signature_algorithm.as_deref())
        .await
    {
        Ok(client_id) => {
            let fingerprint = state
                .registry
                .lookup(&client_id)
                .await
                .and_then(|c| c.human_fingerprint().ok());
            (
                StatusCode::CREATED,
                Json(serde_json::json!({"clientId": client_id, "fingerprint": fingerprint})),
            )
                .into_response()
        }
        Err(e) => {
            let code = match e {
                gateway_registry::RegistryError::DuplicateName(_)
                | gateway_registry::RegistryError::DuplicateKey(_)
                | gateway_registry::RegistryError::UnsupportedAlgorithm(_)
                | gateway_registry::RegistryError::InvalidPublicKey => StatusCode::BAD_REQUEST,
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            };
            (code, Json(serde_json::json!({"error": e.to_string()}))).into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn safe_equal_rejects_mismatched_length() {
        assert!(!safe_equal("short", "much-longer-token"));
    }

    #[test]
    fn safe_equal_accepts_identical_strings() {
        assert!(safe_equal("register-token-123", "register-token-123"));
    }

    #[test]
    fn safe_equal_rejects_single_byte_difference() {
        assert!(!safe_equal("register-token-123", "register-token-124"));
    }
}
