//! Ollama-compatible chat client.
//!
//! Talks to `POST {base}/api/chat`. Atomic calls use `stream: false` and a
//! single JSON body; streaming calls consume the NDJSON response line by
//! line and forward each fragment over an mpsc channel.

use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use super::{GenerationError, LanguageModel, PromptMessage, SamplingOptions};

const STREAM_CHANNEL_CAPACITY: usize = 32;

pub struct OllamaClient {
    http: reqwest::Client,
    base_url: String,
    model: String,
    options: SamplingOptions,
    request_timeout: Duration,
}

impl OllamaClient {
    pub fn new(
        base_url: impl Into<String>,
        model: impl Into<String>,
        options: SamplingOptions,
        connect_timeout: Duration,
        request_timeout: Duration,
    ) -> Result<Self, GenerationError> {
        // No overall client timeout: it would cut streaming responses short.
        // Atomic calls get their own deadline in `generate`.
        let http = reqwest::Client::builder()
            .connect_timeout(connect_timeout)
            .build()
            .map_err(|e| GenerationError::Request(e.to_string()))?;

        Ok(Self {
            http,
            base_url: base_url.into(),
            model: model.into(),
            options,
            request_timeout,
        })
    }

    fn endpoint(&self) -> String {
        format!("{}/api/chat", self.base_url.trim_end_matches('/'))
    }

    fn request_body(&self, messages: &[PromptMessage], stream: bool) -> ChatRequest<'_> {
        ChatRequest {
            model: &self.model,
            messages: messages
                .iter()
                .map(|m| WireMessage {
                    role: match m.role {
                        super::PromptRole::System => "system",
                        super::PromptRole::User => "user",
                        super::PromptRole::Assistant => "assistant",
                    },
                    content: m.content.clone(),
                })
                .collect(),
            stream,
            options: self.options,
        }
    }

    async fn post(
        &self,
        messages: &[PromptMessage],
        stream: bool,
    ) -> Result<reqwest::Response, GenerationError> {
        let response = self
            .http
            .post(self.endpoint())
            .json(&self.request_body(messages, stream))
            .send()
            .await
            .map_err(|e| GenerationError::Request(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(GenerationError::Http {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response)
    }
}

#[async_trait]
impl LanguageModel for OllamaClient {
    async fn generate(&self, messages: &[PromptMessage]) -> Result<String, GenerationError> {
        let deadline = self.request_timeout;
        let call = async {
            let response = self.post(messages, false).await?;
            let chunk: ChatChunk = response
                .json()
                .await
                .map_err(|e| GenerationError::Malformed(e.to_string()))?;
            chunk_error(&chunk)?;
            Ok(chunk.message.map(|m| m.content).unwrap_or_default())
        };

        tokio::time::timeout(deadline, call)
            .await
            .map_err(|_| GenerationError::Timeout(deadline.as_millis() as u64))?
    }

    async fn generate_stream(
        &self,
        messages: &[PromptMessage],
    ) -> Result<mpsc::Receiver<Result<String, GenerationError>>, GenerationError> {
        let response = self.post(messages, true).await?;
        let (tx, rx) = mpsc::channel(STREAM_CHANNEL_CAPACITY);

        tokio::spawn(async move {
            let mut bytes = response.bytes_stream();
            let mut buffer = Vec::new();

            'outer: while let Some(chunk) = bytes.next().await {
                let chunk = match chunk {
                    Ok(chunk) => chunk,
                    Err(e) => {
                        let _ = tx.send(Err(GenerationError::Stream(e.to_string()))).await;
                        return;
                    }
                };

                buffer.extend_from_slice(&chunk);
                while let Some(newline) = buffer.iter().position(|b| *b == b'\n') {
                    let line: Vec<u8> = buffer.drain(..=newline).collect();
                    match forward_line(&line, &tx).await {
                        LineOutcome::Continue => {}
                        LineOutcome::Done | LineOutcome::ReceiverGone => break 'outer,
                        LineOutcome::Failed => return,
                    }
                }
            }
            // Channel closes when tx drops; the consumer sees end-of-stream.
        });

        Ok(rx)
    }
}

enum LineOutcome {
    Continue,
    Done,
    Failed,
    ReceiverGone,
}

async fn forward_line(
    line: &[u8],
    tx: &mpsc::Sender<Result<String, GenerationError>>,
) -> LineOutcome {
    let text = String::from_utf8_lossy(line);
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return LineOutcome::Continue;
    }

    let chunk = match parse_chunk_line(trimmed) {
        Ok(chunk) => chunk,
        Err(e) => {
            let _ = tx.send(Err(e)).await;
            return LineOutcome::Failed;
        }
    };

    if let Err(e) = chunk_error(&chunk) {
        let _ = tx.send(Err(e)).await;
        return LineOutcome::Failed;
    }

    if let Some(message) = chunk.message {
        if !message.content.is_empty() && tx.send(Ok(message.content)).await.is_err() {
            // Caller abandoned the turn; stop reading.
            return LineOutcome::ReceiverGone;
        }
    }

    if chunk.done {
        LineOutcome::Done
    } else {
        LineOutcome::Continue
    }
}

fn parse_chunk_line(line: &str) -> Result<ChatChunk, GenerationError> {
    serde_json::from_str(line).map_err(|e| GenerationError::Malformed(e.to_string()))
}

fn chunk_error(chunk: &ChatChunk) -> Result<(), GenerationError> {
    match &chunk.error {
        Some(message) => Err(GenerationError::Stream(message.clone())),
        None => Ok(()),
    }
}

// ============================================================================
// Wire format
// ============================================================================

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<WireMessage>,
    stream: bool,
    options: SamplingOptions,
}

#[derive(Debug, Serialize)]
struct WireMessage {
    role: &'static str,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatChunk {
    #[serde(default)]
    message: Option<WireReply>,
    #[serde(default)]
    done: bool,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WireReply {
    content: String,
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_fragment_line() {
        let chunk = parse_chunk_line(
            r#"{"model":"mistral:7b-instruct","message":{"role":"assistant","content":"Pour "},"done":false}"#,
        )
        .unwrap();
        assert_eq!(chunk.message.unwrap().content, "Pour ");
        assert!(!chunk.done);
    }

    #[test]
    fn test_parse_done_line() {
        let chunk = parse_chunk_line(r#"{"model":"m","done":true,"total_duration":12}"#).unwrap();
        assert!(chunk.done);
        assert!(chunk.message.is_none());
    }

    #[test]
    fn test_parse_error_line() {
        let chunk = parse_chunk_line(r#"{"error":"model not found"}"#).unwrap();
        assert!(matches!(
            chunk_error(&chunk),
            Err(GenerationError::Stream(msg)) if msg == "model not found"
        ));
    }

    #[test]
    fn test_parse_garbage_is_malformed() {
        assert!(matches!(
            parse_chunk_line("not json"),
            Err(GenerationError::Malformed(_))
        ));
    }

    #[test]
    fn test_request_body_shape() {
        let client = OllamaClient::new(
            "http://localhost:11434/",
            "mistral:7b-instruct",
            SamplingOptions::default(),
            Duration::from_secs(5),
            Duration::from_secs(120),
        )
        .unwrap();

        assert_eq!(client.endpoint(), "http://localhost:11434/api/chat");

        let body = client.request_body(
            &[
                PromptMessage::system("tu es un coach"),
                PromptMessage::user("squat ?"),
            ],
            true,
        );
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["model"], "mistral:7b-instruct");
        assert_eq!(json["stream"], true);
        assert_eq!(json["messages"][0]["role"], "system");
        assert_eq!(json["messages"][1]["role"], "user");
        assert_eq!(json["options"]["num_predict"], 512);
    }
}
