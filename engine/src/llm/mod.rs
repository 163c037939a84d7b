//! Language-model service boundary.
//!
//! The engine treats the model as an opaque service with two entry points:
//! an atomic call and a finite, non-restartable fragment stream. Callers
//! inject an implementation (production: [`OllamaClient`]; tests: fakes).

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

pub mod ollama;

pub use ollama::OllamaClient;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PromptRole {
    System,
    User,
    Assistant,
}

/// One role-tagged message of a model prompt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromptMessage {
    pub role: PromptRole,
    pub content: String,
}

impl PromptMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: PromptRole::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: PromptRole::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: PromptRole::Assistant,
            content: content.into(),
        }
    }
}

/// Sampling knobs forwarded to the model.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SamplingOptions {
    pub temperature: f32,
    /// Token cap for the reply.
    pub num_predict: u32,
    pub top_p: f32,
    pub repeat_penalty: f32,
}

impl Default for SamplingOptions {
    fn default() -> Self {
        Self {
            temperature: 0.7,
            num_predict: 512,
            top_p: 0.9,
            repeat_penalty: 1.1,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum GenerationError {
    #[error("model request failed: {0}")]
    Request(String),

    #[error("model returned HTTP {status}: {body}")]
    Http { status: u16, body: String },

    #[error("model stream failed: {0}")]
    Stream(String),

    #[error("model call timed out after {0} ms")]
    Timeout(u64),

    #[error("malformed model response: {0}")]
    Malformed(String),
}

/// An opaque conversational model.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    /// Produce the whole reply atomically.
    async fn generate(&self, messages: &[PromptMessage]) -> Result<String, GenerationError>;

    /// Produce the reply as an ordered, finite stream of text fragments.
    ///
    /// The stream is not restartable; an `Err` item ends it. The channel
    /// closes once the model signals completion.
    async fn generate_stream(
        &self,
        messages: &[PromptMessage],
    ) -> Result<mpsc::Receiver<Result<String, GenerationError>>, GenerationError>;
}
