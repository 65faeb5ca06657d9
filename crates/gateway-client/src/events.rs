use gateway_protocol::ModelInfo;

/// Lifecycle and domain events the client runtime emits (§4.9). Consumers
/// drain these from the channel returned by [`crate::GatewayClient::spawn`]
/// instead of registering callbacks, the idiomatic Rust shape of the
/// original's `on(event, handler)` emitter.
#[derive(Debug, Clone)]
pub enum ClientEvent {
    Connecting,
    Connected,
    Authenticated,
    AuthFailed { reason: String },
    Disconnected,
    Reconnecting { attempt: u32, delay_ms: u64, max_attempts: u32 },
    ReconnectFailed,
    Error { code: String, message: String },
    ModelsResult { request_id: String, models: Vec<ModelInfo> },
    GenerationStart { request_id: String, model: String },
    Token { request_id: String, token: String },
    GenerationEnd {
        request_id: String,
        total_tokens: Option<u64>,
        elapsed_time: Option<u64>,
        is_cancelled: bool,
    },
    Ack { request_id: String, success: bool, message: Option<String> },
    Pong { id: String, latency_ms: u64 },
}
