use std::{
    collections::HashMap,
    time::{Duration, Instant, SystemTime, UNIX_EPOCH},
};

use futures::{SinkExt, StreamExt};
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async, tungstenite::Message};
use tokio_util::sync::CancellationToken;
use tracing::warn;

use gateway_config::ClientRuntimeConfig;
use gateway_protocol::{
    ClientMessage, ErrorPayload, GenerateOptions, MAX_RECONNECT_ATTEMPTS, MAX_RECONNECT_DELAY_MS,
    ModelInfo, RECONNECT_JITTER, ServerMessage,
};

use crate::{backoff::reconnect_delay_ms, error::ClientError, events::ClientEvent, sign};

type WsStream = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

enum Command {
    ListModels(oneshot::Sender<Result<Vec<ModelInfo>, ClientError>>),
    Generate {
        prompt: String,
        model: Option<String>,
        options: Option<GenerateOptions>,
        reply: oneshot::Sender<String>,
    },
    Stop {
        request_id: String,
        reply: oneshot::Sender<Result<(), ClientError>>,
    },
}

/// Handle to a running client session (C8). Cheap to clone; every clone
/// shares the same cooperative socket/timer task via an unbounded command
/// channel, mirroring the stdio transport's request-correlation shape.
#[derive(Clone)]
pub struct GatewayClient {
    cmd_tx: mpsc::UnboundedSender<Command>,
    cancel: CancellationToken,
    request_timeout: Duration,
}

impl GatewayClient {
    /// Spawn the connect/auth/reconnect loop and return a handle plus the
    /// channel of lifecycle and domain events it emits (§4.9).
    pub fn spawn(config: ClientRuntimeConfig) -> (Self, mpsc::UnboundedReceiver<ClientEvent>) {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        let request_timeout = Duration::from_millis(config.request_timeout_ms);
        tokio::spawn(run(config, cmd_rx, event_tx, cancel.clone()));
        (Self { cmd_tx, cancel, request_timeout }, event_rx)
    }

    pub async fn list_models(&self) -> Result<Vec<ModelInfo>, ClientError> {
        let (tx, rx) = oneshot::channel();
        self.cmd_tx
            .send(Command::ListModels(tx))
            .map_err(|_| ClientError::Disconnected)?;
        tokio::time::timeout(self.request_timeout, rx)
            .await
            .map_err(|_| ClientError::Timeout)?
            .map_err(|_| ClientError::Disconnected)?
    }

    /// Queue a generation request; returns the request id immediately, with
    /// tokens and completion delivered as events on the same id (§4.9).
    pub async fn generate(
        &self,
        prompt: impl Into<String>,
        model: Option<String>,
        options: Option<GenerateOptions>,
    ) -> Result<String, ClientError> {
        let (tx, rx) = oneshot::channel();
        self.cmd_tx
            .send(Command::Generate { prompt: prompt.into(), model, options, reply: tx })
            .map_err(|_| ClientError::Disconnected)?;
        rx.await.map_err(|_| ClientError::Disconnected)
    }

    pub async fn stop_generation(&self, request_id: impl Into<String>) -> Result<(), ClientError> {
        let (tx, rx) = oneshot::channel();
        self.cmd_tx
            .send(Command::Stop { request_id: request_id.into(), reply: tx })
            .map_err(|_| ClientError::Disconnected)?;
        tokio::time::timeout(self.request_timeout, rx)
            .await
            .map_err(|_| ClientError::Timeout)?
            .map_err(|_| ClientError::Disconnected)?
    }

    /// Stop reconnecting and close the current session, if any.
    pub fn disconnect(&self) {
        self.cancel.cancel();
    }
}

#[derive(Default)]
struct Pending {
    models: HashMap<String, oneshot::Sender<Result<Vec<ModelInfo>, ClientError>>>,
    stops: HashMap<String, oneshot::Sender<Result<(), ClientError>>>,
    pings: HashMap<String, Instant>,
}

enum AuthFailure {
    Permanent(String),
    Retryable { hint_secs: Option<u64> },
}

async fn run(
    config: ClientRuntimeConfig,
    mut cmd_rx: mpsc::UnboundedReceiver<Command>,
    event_tx: mpsc::UnboundedSender<ClientEvent>,
    cancel: CancellationToken,
) {
    let mut attempt: u32 = 0;

    loop {
        if cancel.is_cancelled() {
            return;
        }
        let _ = event_tx.send(ClientEvent::Connecting);

        let connected = tokio::select! {
            _ = cancel.cancelled() => return,
            result = connect_and_authenticate(&config) => result,
        };

        let mut ws = match connected {
            Ok(ws) => ws,
            Err(AuthFailure::Permanent(reason)) => {
                let _ = event_tx.send(ClientEvent::AuthFailed { reason });
                return;
            }
            Err(AuthFailure::Retryable { hint_secs }) => {
                drain_disconnected(&mut cmd_rx);
                attempt += 1;
                if attempt > MAX_RECONNECT_ATTEMPTS {
                    let _ = event_tx.send(ClientEvent::ReconnectFailed);
                    return;
                }
                let delay = hint_secs.map(|s| s * 1000).unwrap_or_else(|| {
                    reconnect_delay_ms(
                        attempt,
                        config.reconnect_delay_ms,
                        MAX_RECONNECT_DELAY_MS,
                        RECONNECT_JITTER,
                        rand::random::<f64>(),
                    )
                });
                let _ = event_tx.send(ClientEvent::Reconnecting {
                    attempt,
                    delay_ms: delay,
                    max_attempts: MAX_RECONNECT_ATTEMPTS,
                });
                tokio::select! {
                    _ = cancel.cancelled() => return,
                    _ = tokio::time::sleep(Duration::from_millis(delay)) => {},
                }
                continue;
            }
        };

        attempt = 0;
        let _ = event_tx.send(ClientEvent::Connected);
        let _ = event_tx.send(ClientEvent::Authenticated);

        session_loop(&mut ws, &mut cmd_rx, &event_tx, &cancel, &config).await;
        let _ = event_tx.send(ClientEvent::Disconnected);

        if cancel.is_cancelled() {
            return;
        }
    }
}

fn drain_disconnected(cmd_rx: &mut mpsc::UnboundedReceiver<Command>) {
    while let Ok(cmd) = cmd_rx.try_recv() {
        match cmd {
            Command::ListModels(tx) => {
                let _ = tx.send(Err(ClientError::Disconnected));
            }
            Command::Generate { reply, .. } => drop(reply),
            Command::Stop { reply, .. } => {
                let _ = reply.send(Err(ClientError::Disconnected));
            }
        }
    }
}

async fn connect_and_authenticate(config: &ClientRuntimeConfig) -> Result<WsStream, AuthFailure> {
    let (mut ws, _) = connect_async(config.url.as_str()).await.map_err(|e| {
        warn!(error = %e, "connect failed");
        AuthFailure::Retryable { hint_secs: None }
    })?;

    let challenge = read_challenge(&mut ws, config.auth_challenge_timeout_ms).await?;
    let signature = sign::sign(&config.private_key_pem, &config.signature_algorithm, challenge.as_bytes())
        .map_err(|e| AuthFailure::Permanent(e.to_string()))?;

    send_frame(&mut ws, &ClientMessage::Authenticate {
        client_id: config.client_id.clone(),
        signature,
        timestamp: now_ms(),
    })
    .await
    .map_err(|_| AuthFailure::Retryable { hint_secs: None })?;

    match read_auth_result(&mut ws, config.auth_challenge_timeout_ms).await? {
        AuthOutcome::Success => Ok(ws),
        AuthOutcome::Failure { retry_after } if retry_after.is_some() => {
            Err(AuthFailure::Retryable { hint_secs: retry_after })
        }
        AuthOutcome::Failure { .. } => Err(AuthFailure::Permanent("invalid_authentication".to_string())),
    }
}

enum AuthOutcome {
    Success,
    Failure { retry_after: Option<u64> },
}

async fn read_challenge(ws: &mut WsStream, timeout_ms: u64) -> Result<String, AuthFailure> {
    match parse_frame(&next_text(ws, timeout_ms).await?) {
        Some(ServerMessage::Challenge { challenge, .. }) => Ok(challenge),
        _ => Err(AuthFailure::Retryable { hint_secs: None }),
    }
}

async fn read_auth_result(ws: &mut WsStream, timeout_ms: u64) -> Result<AuthOutcome, AuthFailure> {
    match parse_frame(&next_text(ws, timeout_ms).await?) {
        Some(ServerMessage::AuthResult { success: true, .. }) => Ok(AuthOutcome::Success),
        Some(ServerMessage::AuthResult { success: false, retry_after, .. }) => {
            Ok(AuthOutcome::Failure { retry_after })
        }
        _ => Err(AuthFailure::Retryable { hint_secs: None }),
    }
}

fn parse_frame(text: &str) -> Option<ServerMessage> {
    serde_json::from_str(text).ok()
}

async fn next_text(ws: &mut WsStream, timeout_ms: u64) -> Result<String, AuthFailure> {
    let read = async {
        loop {
            match ws.next().await {
                Some(Ok(Message::Text(t))) => return Ok(t.to_string()),
                Some(Ok(_)) => continue,
                Some(Err(e)) => return Err(e),
                None => return Err(tokio_tungstenite::tungstenite::Error::ConnectionClosed),
            }
        }
    };
    match tokio::time::timeout(Duration::from_millis(timeout_ms), read).await {
        Ok(Ok(text)) => Ok(text),
        Ok(Err(e)) => {
            warn!(error = %e, "error awaiting frame");
            Err(AuthFailure::Retryable { hint_secs: None })
        }
        Err(_) => Err(AuthFailure::Retryable { hint_secs: None }),
    }
}

async fn send_frame(ws: &mut WsStream, msg: &ClientMessage) -> Result<(), ClientError> {
    let json = serde_json::to_string(msg)?;
    ws.send(Message::Text(json.into())).await?;
    Ok(())
}

async fn session_loop(
    ws: &mut WsStream,
    cmd_rx: &mut mpsc::UnboundedReceiver<Command>,
    event_tx: &mpsc::UnboundedSender<ClientEvent>,
    cancel: &CancellationToken,
    config: &ClientRuntimeConfig,
) {
    let mut pending = Pending::default();
    let mut ping_interval = tokio::time::interval(Duration::from_millis(config.ping_interval_ms));
    ping_interval.tick().await;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                let _ = ws.close(None).await;
                return;
            }
            _ = ping_interval.tick() => {
                let id = uuid::Uuid::new_v4().to_string();
                pending.pings.insert(id.clone(), Instant::now());
                if send_frame(ws, &ClientMessage::Ping { id: id.clone(), timestamp: now_ms() }).await.is_err() {
                    pending.pings.remove(&id);
                }
            }
            cmd = cmd_rx.recv() => {
                match cmd {
                    None => return,
                    Some(command) => if dispatch_command(ws, command, &mut pending).await.is_err() {
                        return;
                    },
                }
            }
            incoming = ws.next() => {
                match incoming {
                    Some(Ok(Message::Text(text))) => handle_server_frame(&text.to_string(), &mut pending, event_tx),
                    Some(Ok(Message::Close(_))) | None => return,
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        warn!(error = %e, "websocket read error");
                        return;
                    }
                }
            }
        }
    }
}

async fn dispatch_command(ws: &mut WsStream, command: Command, pending: &mut Pending) -> Result<(), ClientError> {
    match command {
        Command::ListModels(reply) => {
            let id = uuid::Uuid::new_v4().to_string();
            pending.models.insert(id.clone(), reply);
            if let Err(e) = send_frame(ws, &ClientMessage::Models { id: id.clone(), timestamp: now_ms() }).await {
                if let Some(tx) = pending.models.remove(&id) {
                    let _ = tx.send(Err(ClientError::Disconnected));
                }
                return Err(e);
            }
        }
        Command::Generate { prompt, model, options, reply } => {
            let id = uuid::Uuid::new_v4().to_string();
            let frame = ClientMessage::Generate { id: id.clone(), prompt: Some(prompt), model, options, timestamp: now_ms() };
            let sent = send_frame(ws, &frame).await;
            let _ = reply.send(id);
            sent?;
        }
        Command::Stop { request_id, reply } => {
            let id = uuid::Uuid::new_v4().to_string();
            pending.stops.insert(request_id.clone(), reply);
            if let Err(e) = send_frame(ws, &ClientMessage::Stop { id, request_id: request_id.clone(), timestamp: now_ms() }).await {
                if let Some(tx) = pending.stops.remove(&request_id) {
                    let _ = tx.send(Err(ClientError::Disconnected));
                }
                return Err(e);
            }
        }
    }
    Ok(())
}

fn handle_server_frame(text: &str, pending: &mut Pending, event_tx: &mpsc::UnboundedSender<ClientEvent>) {
    let Some(msg) = parse_frame(text) else {
        warn!(raw = %text, "malformed server frame");
        return;
    };
    match msg {
        ServerMessage::Challenge { .. } | ServerMessage::AuthResult { .. } => {}
        ServerMessage::Pong { id, .. } => {
            let latency_ms = pending
                .pings
                .remove(&id)
                .map(|sent| sent.elapsed().as_millis() as u64)
                .unwrap_or(0);
            let _ = event_tx.send(ClientEvent::Pong { id, latency_ms });
        }
        ServerMessage::Error { id, error, code, request_id, .. } => {
            let message = error_payload_to_string(error);
            if let Some(rid) = &request_id {
                if let Some(tx) = pending.stops.remove(rid) {
                    let _ = tx.send(Err(ClientError::Rejected(message.clone())));
                }
            }
            if let Some(rid) = &id {
                if let Some(tx) = pending.models.remove(rid) {
                    let _ = tx.send(Err(ClientError::Rejected(message.clone())));
                }
            }
            let _ = event_tx.send(ClientEvent::Error { code: format!("{code:?}"), message });
        }
        ServerMessage::ModelsResult { id, request_id, models, .. } => {
            if let Some(tx) = pending.models.remove(&id) {
                let _ = tx.send(Ok(models.clone()));
            }
            let _ = event_tx.send(ClientEvent::ModelsResult { request_id, models });
        }
        ServerMessage::StreamStart { request_id, model, .. } => {
            let _ = event_tx.send(ClientEvent::GenerationStart { request_id, model });
        }
        ServerMessage::StreamToken { request_id, token, .. } => {
            let _ = event_tx.send(ClientEvent::Token { request_id, token });
        }
        ServerMessage::StreamEnd { request_id, total_tokens, elapsed_time, is_cancelled, .. } => {
            let _ = event_tx.send(ClientEvent::GenerationEnd {
                request_id,
                total_tokens,
                elapsed_time,
                is_cancelled: is_cancelled.unwrap_or(false),
            });
        }
        ServerMessage::Ack { request_id, success, message, .. } => {
            if let Some(tx) = pending.stops.remove(&request_id) {
                let _ = tx.send(if success {
                    Ok(())
                } else {
                    Err(ClientError::Rejected(message.clone().unwrap_or_default()))
                });
            }
            let _ = event_tx.send(ClientEvent::Ack { request_id, success, message });
        }
    }
}

fn error_payload_to_string(payload: ErrorPayload) -> String {
    match payload {
        ErrorPayload::Message(m) => m,
        ErrorPayload::Detail(v) => v.to_string(),
    }
}
