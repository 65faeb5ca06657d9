use std::{net::SocketAddr, sync::Arc, time::Duration};

use axum::extract::ws::{CloseFrame, Message, WebSocket};
use futures::{SinkExt, StreamExt};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use gateway_protocol::{
    ClientMessage, CloseCode, ErrorCode, GenerateOptions, ModelInfo, ServerMessage,
};
use gateway_registry::ConnectionAudit;

use crate::{connection::ConnectionState, generation::StopOutcome, signature, time::now_ms, GatewayState};

/// A frame queued for the one task that owns the WebSocket sink.
enum Outbound {
    Text(String),
    Close(CloseCode),
}

type FrameSender = mpsc::UnboundedSender<Outbound>;

fn ts() -> i64 {
    now_ms() as i64
}

/// Drive one accepted WebSocket connection end to end: challenge, auth,
/// authenticated dispatch, and teardown (C5/C6).
pub async fn handle_connection(socket: WebSocket, state: Arc<GatewayState>, peer: SocketAddr) {
    let conn_id = uuid::Uuid::new_v4().to_string();
    // Rate-limiter key and audit `lastIP` are per source address, not per
    // ephemeral TCP port (§3 `lastIP`, §4.5 "peer:clientId").
    let peer_str = peer.ip().to_string();

    let (mut ws_tx, mut ws_rx) = socket.split();
    let (frame_tx, mut frame_rx) = mpsc::unbounded_channel::<Outbound>();

    let writer = tokio::spawn(async move {
        while let Some(frame) = frame_rx.recv().await {
            let sent = match frame {
                Outbound::Text(text) => ws_tx.send(Message::Text(text.into())).await,
                Outbound::Close(code) => {
                    let result = ws_tx
                        .send(Message::Close(Some(CloseFrame {
                            code: code.code(),
                            reason: code.reason().into(),
                        })))
                        .await;
                    let _ = ws_tx.close().await;
                    result
                }
            };
            if sent.is_err() {
                break;
            }
        }
    });

    let (timeout_tx, mut timeout_rx) = oneshot::channel::<()>();
    let auth_timeout = Duration::from_millis(state.config.auth_timeout_ms);
    let auth_deadline = tokio::spawn(async move {
        tokio::time::sleep(auth_timeout).await;
        let _ = timeout_tx.send(());
    });

    state
        .connections
        .accept(conn_id.clone(), peer_str.clone(), auth_deadline)
        .await;

    let challenge = state.challenges.issue(&conn_id).await;
    send(&frame_tx, ServerMessage::Challenge { challenge, timestamp: ts() });

    let mut close_code = CloseCode::Normal;
    let mut shutdown_rx = state.subscribe_shutdown();

    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => {
                close_code = CloseCode::ServerShutdown;
                break;
            }
            _ = &mut timeout_rx => {
                if state.connections.state_of(&conn_id).await == Some(ConnectionState::AwaitingSignature) {
                    send(&frame_tx, ServerMessage::error(None, ErrorCode::AuthenticationTimeout, "Authentication timeout", ts()));
                    close_code = CloseCode::AuthTimeout;
                }
                break;
            }
            incoming = ws_rx.next() => {
                match incoming {
                    Some(Ok(Message::Text(text))) => {
                        if let Some(code) = handle_text(&state, &conn_id, &peer_str, &frame_tx, &text).await {
                            close_code = code;
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        debug!(error = %e, "websocket read error");
                        break;
                    }
                }
            }
        }
    }

    state.generations.cancel_owned_by(&conn_id).await;
    state.challenges.clear(&conn_id).await;
    state.connections.close(&conn_id).await;

    let _ = frame_tx.send(Outbound::Close(close_code));
    drop(frame_tx);
    let _ = writer.await;
    info!(conn_id = %conn_id, peer = %peer_str, code = close_code.code(), "connection closed");
}

async fn handle_text(
    state: &Arc<GatewayState>,
    conn_id: &str,
    peer: &str,
    tx: &FrameSender,
    text: &str,
) -> Option<CloseCode> {
    let conn_state = state.connections.state_of(conn_id).await?;

    let msg: ClientMessage = match serde_json::from_str(text) {
        Ok(m) => m,
        Err(_) => {
            send(tx, ServerMessage::error(None, ErrorCode::InvalidRequest, "Malformed message", ts()));
            return match conn_state {
                ConnectionState::AwaitingSignature => Some(CloseCode::AuthFailed),
                _ => None,
            };
        }
    };

    match conn_state {
        ConnectionState::AwaitingSignature => handle_pre_auth(state, conn_id, peer, tx, msg).await,
        ConnectionState::Authenticated => Box::pin(handle_authenticated(state, conn_id, tx, msg)).await,
        ConnectionState::New | ConnectionState::Closed => None,
    }
}

async fn handle_pre_auth(
    state: &Arc<GatewayState>,
    conn_id: &str,
    peer: &str,
    tx: &FrameSender,
    msg: ClientMessage,
) -> Option<CloseCode> {
    let ClientMessage::Authenticate { client_id, signature: signature_b64, .. } = msg else {
        send(tx, ServerMessage::error(None, ErrorCode::InvalidRequest, "Unexpected message before authentication", ts()));
        return None;
    };

    let key = format!("{peer}:{client_id}");

    let check = state.rate_limiter.check(&key).await;
    if check.limited {
        send(tx, auth_result_failure("Too many attempts", Some(check.wait_seconds), None));
        return Some(CloseCode::RateLimited);
    }

    let Some(challenge) = state.challenges.peek(conn_id).await else {
        send(tx, auth_result_failure("Challenge expired or invalid", None, None));
        let record = state.rate_limiter.record_failure(&key).await;
        return Some(close_code_for(record));
    };

    let client = state.registry.lookup(&client_id).await;
    state.challenges.verify(conn_id, &challenge).await;

    let Some(client) = client else {
        send(tx, auth_result_failure("Client not found or has been revoked", None, None));
        state.rate_limiter.record_failure(&key).await;
        // Open question: a lookup miss does not close the connection —
        // only the auth deadline can end it, since a revoked/unknown
        // client gives the caller no new challenge to retry with.
        return None;
    };

    let verified = signature::verify(
        &client.public_key,
        &client.signature_algorithm,
        challenge.as_bytes(),
        &signature_b64,
    )
    .is_ok();

    if !verified {
        let record = state.rate_limiter.record_failure(&key).await;
        if record.limited {
            send(tx, auth_result_failure("Invalid signature", Some(record.wait_seconds), None));
        } else {
            let remaining = state.rate_limiter.remaining(&key).await;
            send(tx, auth_result_failure("Invalid signature", None, Some(remaining)));
        }
        return Some(close_code_for(record));
    }

    state.rate_limiter.record_success(&key).await;
    state.connections.mark_authenticated(conn_id, &client.id).await;
    if let Err(e) = state
        .registry
        .record_connection(&client.id, ConnectionAudit { time: chrono::Utc::now(), peer: peer.to_string() })
        .await
    {
        warn!(error = %e, "failed to record connection audit");
    }

    send(tx, ServerMessage::AuthResult {
        success: true,
        error: None,
        retry_after: None,
        remaining_attempts: None,
        timestamp: ts(),
    });
    None
}

fn close_code_for(check: crate::rate_limit::CheckResult) -> CloseCode {
    if check.limited { CloseCode::RateLimited } else { CloseCode::AuthFailed }
}

fn auth_result_failure(message: &str, retry_after: Option<u64>, remaining_attempts: Option<u32>) -> ServerMessage {
    ServerMessage::AuthResult {
        success: false,
        error: Some(message.to_string()),
        retry_after,
        remaining_attempts,
        timestamp: ts(),
    }
}

async fn handle_authenticated(
    state: &Arc<GatewayState>,
    conn_id: &str,
    tx: &FrameSender,
    msg: ClientMessage,
) -> Option<CloseCode> {
    match msg {
        ClientMessage::Ping { id, .. } => {
            send(tx, ServerMessage::Pong { id, timestamp: ts() });
            None
        }
        ClientMessage::Models { id, .. } => {
            match state.upstream.list_models().await {
                Ok(models) => send(tx, models_result(id, models)),
                Err(e) => send(tx, ServerMessage::error(Some(id), e.code(), e.to_string(), ts())),
            }
            None
        }
        ClientMessage::Generate { id, prompt, model, options, .. } => {
            let prompt = match prompt {
                Some(p) if !p.trim().is_empty() => p,
                _ => {
                    send(tx, ServerMessage::error(Some(id), ErrorCode::MissingParameters, "Missing required parameters", ts()));
                    return None;
                }
            };
            let model = model.or_else(|| state.config.ollama_default_model.clone()).unwrap_or_default();
            spawn_generation(Arc::clone(state), conn_id.to_string(), tx.clone(), id, prompt, model, options).await;
            None
        }
        ClientMessage::Stop { id, request_id, .. } => {
            match state.generations.stop(&request_id, conn_id).await {
                StopOutcome::Stopped => send(tx, ServerMessage::Ack {
                    id,
                    request_id,
                    success: true,
                    action: "stop".to_string(),
                    message: None,
                    timestamp: ts(),
                }),
                StopOutcome::NotFound => send(tx, ServerMessage::error(Some(id), ErrorCode::InvalidRequest, "No active generation with that ID", ts())),
                StopOutcome::NotOwner => send(tx, ServerMessage::error(Some(id), ErrorCode::InvalidRequest, "Not authorized to stop this generation", ts())),
            }
            None
        }
        ClientMessage::Batch { messages, .. } => {
            for inner in messages {
                Box::pin(handle_authenticated(state, conn_id, tx, inner)).await;
            }
            None
        }
        ClientMessage::Authenticate { .. } => {
            send(tx, ServerMessage::error(None, ErrorCode::InvalidRequest, "Already authenticated", ts()));
            None
        }
    }
}

fn models_result(id: String, models: Vec<ModelInfo>) -> ServerMessage {
    ServerMessage::ModelsResult { id: id.clone(), request_id: id, models, timestamp: ts() }
}

async fn spawn_generation(
    state: Arc<GatewayState>,
    conn_id: String,
    tx: FrameSender,
    id: String,
    prompt: String,
    model: String,
    options: Option<GenerateOptions>,
) {
    let Some(cancel) = state.generations.register(&id, &conn_id, &model).await else {
        send(&tx, ServerMessage::error(Some(id), ErrorCode::InvalidRequest, "duplicate request id", ts()));
        return;
    };

    tokio::spawn(async move {
        send(&tx, ServerMessage::StreamStart {
            id: id.clone(),
            request_id: id.clone(),
            model: model.clone(),
            timestamp: ts(),
        });

        let start = std::time::Instant::now();
        let mut stream = state.upstream.generate(&model, &prompt, options);
        let mut total_tokens: u64 = 0;
        let mut cancelled = false;

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    cancelled = true;
                    break;
                }
                event = stream.next() => {
                    match event {
                        Some(crate::upstream::UpstreamEvent::Token(token)) => {
                            total_tokens += 1;
                            send(&tx, ServerMessage::StreamToken {
                                id: id.clone(),
                                request_id: id.clone(),
                                token,
                                timestamp: ts(),
                            });
                        }
                        Some(crate::upstream::UpstreamEvent::Done) | None => break,
                        Some(crate::upstream::UpstreamEvent::Error(message)) => {
                            send(&tx, ServerMessage::generation_error(Some(id.clone()), id.clone(), message, ts()));
                            state.generations.remove(&id).await;
                            return;
                        }
                    }
                }
            }
        }

        if cancelled {
            send(&tx, ServerMessage::StreamEnd {
                id: id.clone(),
                request_id: id.clone(),
                total_tokens: None,
                elapsed_time: None,
                is_cancelled: Some(true),
                timestamp: ts(),
            });
        } else {
            send(&tx, ServerMessage::StreamEnd {
                id: id.clone(),
                request_id: id.clone(),
                total_tokens: Some(total_tokens),
                elapsed_time: Some(start.elapsed().as_millis() as u64),
                is_cancelled: None,
                timestamp: ts(),
            });
        }
        state.generations.remove(&id).await;
    });
}

fn send(tx: &FrameSender, msg: ServerMessage) {
    match msg.to_frame() {
        Ok(frame) => {
            let _ = tx.send(Outbound::Text(frame));
        }
        Err(e) => warn!(error = %e, "failed to serialize server frame"),
    }
}
