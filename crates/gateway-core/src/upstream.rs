use std::pin::Pin;

use futures::StreamExt;
use tokio_stream::Stream;
use tracing::warn;

use gateway_protocol::{GenerateOptions, ModelInfo};

use crate::error::CoreError;

/// One event parsed from the upstream NDJSON stream (§4.8, §6.2).
#[derive(Debug, Clone)]
pub enum UpstreamEvent {
    Token(String),
    Done,
    Error(String),
}

/// Thin client over the upstream streaming generation API, treated as an
/// opaque NDJSON byte source (§1 Non-goals, §6.2). The buffering/line-split
/// loop is the same shape as the teacher's codex provider `stream()`.
pub struct UpstreamClient {
    base_url: String,
    client: reqwest::Client,
}

impl UpstreamClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            client: reqwest::Client::new(),
        }
    }

    pub async fn list_models(&self) -> Result<Vec<ModelInfo>, CoreError> {
        #[derive(serde::Deserialize)]
        struct TagsResponse {
            models: Vec<ModelInfo>,
        }

        let resp = self
            .client
            .get(format!("{}/api/tags", self.base_url))
            .send()
            .await
            .map_err(|e| CoreError::Server(e.to_string()))?
            .error_for_status()
            .map_err(|e| CoreError::Server(e.to_string()))?
            .json::<TagsResponse>()
            .await
            .map_err(|e| CoreError::Server(e.to_string()))?;

        Ok(resp.models)
    }

    /// Open a streaming generation request and yield parsed NDJSON events.
    pub fn generate(
        &self,
        model: &str,
        prompt: &str,
        options: Option<GenerateOptions>,
    ) -> Pin<Box<dyn Stream<Item = UpstreamEvent> + Send>> {
        let url = format!("{}/api/generate", self.base_url);
        let mut body = serde_json::json!({
            "model": model,
            "prompt": prompt,
            "stream": true,
        });
        if let Some(opts) = options {
            if let serde_json::Value::Object(ref mut map) = body {
                if let Some(t) = opts.temperature {
                    map.insert("temperature".into(), t.into());
                }
                if let Some(t) = opts.top_p {
                    map.insert("top_p".into(), t.into());
                }
                if let Some(t) = opts.top_k {
                    map.insert("top_k".into(), t.into());
                }
                if let Some(t) = opts.max_tokens {
                    map.insert("num_predict".into(), t.into());
                }
                if let Some(s) = opts.system_prompt {
                    map.insert("system".into(), s.into());
                }
            }
        }

        let client = self.client.clone();

        Box::pin(async_stream::stream! {
            let resp = match client.post(&url).json(&body).send().await {
                Ok(r) => match r.error_for_status() {
                    Ok(r) => r,
                    Err(e) => {
                        yield UpstreamEvent::Error(e.to_string());
                        return;
                    }
                },
                Err(e) => {
                    yield UpstreamEvent::Error(e.to_string());
                    return;
                }
            };

            let mut byte_stream = resp.bytes_stream();
            let mut buf = String::new();

            while let Some(chunk) = byte_stream.next().await {
                let chunk = match chunk {
                    Ok(c) => c,
                    Err(e) => {
                        yield UpstreamEvent::Error(e.to_string());
                        return;
                    }
                };
                buf.push_str(&String::from_utf8_lossy(&chunk));

                while let Some(pos) = buf.find('\n') {
                    let line = buf[..pos].trim().to_string();
                    buf = buf[pos + 1..].to_string();
                    if line.is_empty() {
                        continue;
                    }
                    match parse_record(&line) {
                        Some(ParsedRecord::Token(t)) => yield UpstreamEvent::Token(t),
                        Some(ParsedRecord::Done) => {
                            yield UpstreamEvent::Done;
                            return;
                        }
                        None => warn!(line = %line, "skipping malformed NDJSON record"),
                    }
                }
            }

            // Tolerate a final unterminated record at stream end (§4.8).
            let tail = buf.trim();
            if !tail.is_empty() {
                match parse_record(tail) {
                    Some(ParsedRecord::Token(t)) => yield UpstreamEvent::Token(t),
                    Some(ParsedRecord::Done) => {
                        yield UpstreamEvent::Done;
                        return;
                    }
                    None => warn!(line = %tail, "skipping malformed trailing NDJSON record"),
                }
            }
            yield UpstreamEvent::Done;
        })
    }
}

enum ParsedRecord {
    Token(String),
    Done,
}

fn parse_record(line: &str) -> Option<ParsedRecord> {
    let value: serde_json::Value = serde_json::from_str(line).ok()?;
    if value.get("done").and_then(|d| d.as_bool()) == Some(true) {
        return Some(ParsedRecord::Done);
    }
    match value.get("response").and_then(|r| r.as_str()) {
        Some(token) if !token.is_empty() => Some(ParsedRecord::Token(token.to_string())),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_token_record() {
        let record = parse_record(r#"{"response":"He"}"#);
        assert!(matches!(record, Some(ParsedRecord::Token(t)) if t == "He"));
    }

    #[test]
    fn parses_done_record() {
        let record = parse_record(r#"{"done":true}"#);
        assert!(matches!(record, Some(ParsedRecord::Done)));
    }

    #[test]
    fn empty_response_is_skipped() {
        let record = parse_record(r#"{"response":""}"#);
        assert!(record.is_none());
    }

    #[test]
    fn malformed_json_is_skipped() {
        assert!(parse_record("not json").is_none());
    }

    #[tokio::test]
    async fn streams_tokens_then_done() {
        let mut server = mockito::Server::new_async().await;
        let body = "{\"response\":\"He\"}\n{\"response\":\"llo\"}\n{\"done\":true}\n";
        let _m = server
            .mock("POST", "/api/generate")
            .with_status(200)
            .with_body(body)
            .create_async()
            .await;

        let client = UpstreamClient::new(server.url());
        let mut stream = client.generate("llama3", "hi", None);
        let mut tokens = Vec::new();
        let mut saw_done = false;
        while let Some(event) = futures::StreamExt::next(&mut stream).await {
            match event {
                UpstreamEvent::Token(t) => tokens.push(t),
                UpstreamEvent::Done => {
                    saw_done = true;
                    break;
                }
                UpstreamEvent::Error(e) => panic!("unexpected error: {e}"),
            }
        }
        assert_eq!(tokens, vec!["He".to_string(), "llo".to_string()]);
        assert!(saw_done);
    }
}
