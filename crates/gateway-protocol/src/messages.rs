use serde::{Deserialize, Serialize};

use crate::errors::ErrorCode;

/// Options accompanying a `generate` request.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GenerateOptions {
    pub temperature: Option<f64>,
    #[serde(rename = "topP")]
    pub top_p: Option<f64>,
    #[serde(rename = "topK")]
    pub top_k: Option<u32>,
    #[serde(rename = "maxTokens")]
    pub max_tokens: Option<u32>,
    #[serde(rename = "systemPrompt")]
    pub system_prompt: Option<String>,
}

/// One entry of a `models_result` frame, shaped after the upstream's model
/// listing payload (§6.2) and passed through largely unchanged.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelInfo {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub modified_at: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub quantization_level: Option<String>,
}

/// `error.error` may be a plain string or a structured object (§6.1).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ErrorPayload {
    Message(String),
    Detail(serde_json::Value),
}

impl From<&str> for ErrorPayload {
    fn from(s: &str) -> Self {
        ErrorPayload::Message(s.to_string())
    }
}

impl From<String> for ErrorPayload {
    fn from(s: String) -> Self {
        ErrorPayload::Message(s)
    }
}

/// Frames sent by the client to the gateway.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    Authenticate {
        #[serde(rename = "clientId")]
        client_id: String,
        signature: String,
        timestamp: i64,
    },
    Ping {
        id: String,
        timestamp: i64,
    },
    Models {
        id: String,
        timestamp: i64,
    },
    Generate {
        id: String,
        #[serde(default)]
        prompt: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        model: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        options: Option<GenerateOptions>,
        timestamp: i64,
    },
    Stop {
        id: String,
        #[serde(rename = "requestId")]
        request_id: String,
        timestamp: i64,
    },
    Batch {
        timestamp: i64,
        messages: Vec<ClientMessage>,
    },
}

impl ClientMessage {
    /// The message's own correlation id, when it has one (`batch` does not).
    pub fn id(&self) -> Option<&str> {
        match self {
            ClientMessage::Authenticate { .. } | ClientMessage::Batch { .. } => None,
            ClientMessage::Ping { id, .. }
            | ClientMessage::Models { id, .. }
            | ClientMessage::Generate { id, .. }
            | ClientMessage::Stop { id, .. } => Some(id),
        }
    }
}

/// Frames sent by the gateway to the client.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    Challenge {
        challenge: String,
        timestamp: i64,
    },
    Pong {
        id: String,
        timestamp: i64,
    },
    AuthResult {
        success: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
        #[serde(rename = "retryAfter", skip_serializing_if = "Option::is_none")]
        retry_after: Option<u64>,
        #[serde(
            rename = "remainingAttempts",
            skip_serializing_if = "Option::is_none"
        )]
        remaining_attempts: Option<u32>,
        timestamp: i64,
    },
    Error {
        #[serde(skip_serializing_if = "Option::is_none")]
        id: Option<String>,
        error: ErrorPayload,
        code: ErrorCode,
        #[serde(rename = "requestId", skip_serializing_if = "Option::is_none")]
        request_id: Option<String>,
        timestamp: i64,
    },
    ModelsResult {
        id: String,
        #[serde(rename = "requestId")]
        request_id: String,
        models: Vec<ModelInfo>,
        timestamp: i64,
    },
    StreamStart {
        id: String,
        #[serde(rename = "requestId")]
        request_id: String,
        model: String,
        timestamp: i64,
    },
    StreamToken {
        id: String,
        #[serde(rename = "requestId")]
        request_id: String,
        token: String,
        timestamp: i64,
    },
    StreamEnd {
        id: String,
        #[serde(rename = "requestId")]
        request_id: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        total_tokens: Option<u64>,
        #[serde(skip_serializing_if = "Option::is_none")]
        elapsed_time: Option<u64>,
        #[serde(rename = "isCancelled", skip_serializing_if = "Option::is_none")]
        is_cancelled: Option<bool>,
        timestamp: i64,
    },
    Ack {
        id: String,
        #[serde(rename = "requestId")]
        request_id: String,
        success: bool,
        action: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        message: Option<String>,
        timestamp: i64,
    },
}

impl ServerMessage {
    pub fn error(
        id: Option<String>,
        code: ErrorCode,
        message: impl Into<ErrorPayload>,
        timestamp: i64,
    ) -> Self {
        ServerMessage::Error {
            id,
            error: message.into(),
            code,
            request_id: None,
            timestamp,
        }
    }

    pub fn generation_error(
        id: Option<String>,
        request_id: String,
        message: impl Into<ErrorPayload>,
        timestamp: i64,
    ) -> Self {
        ServerMessage::Error {
            id,
            error: message.into(),
            code: ErrorCode::GenerationFailed,
            request_id: Some(request_id),
            timestamp,
        }
    }

    /// Serialize to a single JSON text frame.
    pub fn to_frame(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn authenticate_round_trips() {
        let raw = r#"{"type":"authenticate","clientId":"abc","signature":"sig==","timestamp":1}"#;
        let msg: ClientMessage = serde_json::from_str(raw).unwrap();
        match msg {
            ClientMessage::Authenticate {
                client_id,
                signature,
                ..
            } => {
                assert_eq!(client_id, "abc");
                assert_eq!(signature, "sig==");
            },
            other => panic!("wrong variant: {other:?}"),
        }
    }

    #[test]
    fn batch_nests_client_messages() {
        let raw = r#"{"type":"batch","timestamp":1,"messages":[{"type":"ping","id":"p1","timestamp":2}]}"#;
        let msg: ClientMessage = serde_json::from_str(raw).unwrap();
        match msg {
            ClientMessage::Batch { messages, .. } => assert_eq!(messages.len(), 1),
            other => panic!("wrong variant: {other:?}"),
        }
    }

    #[test]
    fn generate_without_prompt_still_deserializes() {
        let raw = r#"{"type":"generate","id":"g1","timestamp":1}"#;
        let msg: ClientMessage = serde_json::from_str(raw).unwrap();
        match msg {
            ClientMessage::Generate { prompt, .. } => assert!(prompt.is_none()),
            other => panic!("wrong variant: {other:?}"),
        }
    }

    #[test]
    fn stream_token_serializes_with_request_id() {
        let frame = ServerMessage::StreamToken {
            id: "g1".into(),
            request_id: "g1".into(),
            token: "He".into(),
            timestamp: 0,
        };
        let json = frame.to_frame().unwrap();
        assert!(json.contains("\"requestId\":\"g1\""));
        assert!(json.contains("\"type\":\"stream_token\""));
    }

    #[test]
    fn error_payload_accepts_string_or_object() {
        let s: ErrorPayload = serde_json::from_str("\"boom\"").unwrap();
        assert!(matches!(s, ErrorPayload::Message(m) if m == "boom"));
        let o: ErrorPayload = serde_json::from_str(r#"{"reason":"boom"}"#).unwrap();
        assert!(matches!(o, ErrorPayload::Detail(_)));
    }
}
