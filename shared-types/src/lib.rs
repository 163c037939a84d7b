//! Shared types between the coach engine and its callers
//!
//! These types cross the engine boundary:
//! - conversation messages handed into a turn
//! - streamed turn events handed back out
//!
//! Serializable with serde for JSON over whatever transport the caller uses.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

// ============================================================================
// Messages
// ============================================================================

/// A single conversational turn unit, tagged by role.
///
/// Each variant carries only the fields valid for its role: only tool-result
/// messages carry an artifact, only assistant messages carry pending tool
/// requests. Messages are created once per turn and never mutated.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "role", rename_all = "snake_case")]
pub enum Message {
    /// Something the human asked.
    User { content: String },

    /// An instruction injected ahead of the conversation.
    System { content: String },

    /// A model reply. `requested_tools` is non-empty when the model deferred
    /// to tooling instead of answering; such messages are excluded from the
    /// final composition prompt.
    Assistant {
        content: String,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        requested_tools: Vec<ToolRequest>,
    },

    /// Output of a tool invocation, with the structured artifact it produced.
    ToolResult {
        content: String,
        #[serde(default)]
        artifact: RecommendationMap,
    },
}

impl Message {
    pub fn user(content: impl Into<String>) -> Self {
        Message::User {
            content: content.into(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Message::System {
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Message::Assistant {
            content: content.into(),
            requested_tools: Vec::new(),
        }
    }

    pub fn assistant_with_tools(content: impl Into<String>, requested_tools: Vec<ToolRequest>) -> Self {
        Message::Assistant {
            content: content.into(),
            requested_tools,
        }
    }

    pub fn tool_result(content: impl Into<String>, artifact: RecommendationMap) -> Self {
        Message::ToolResult {
            content: content.into(),
            artifact,
        }
    }

    /// The message text, independent of role.
    pub fn content(&self) -> &str {
        match self {
            Message::User { content }
            | Message::System { content }
            | Message::Assistant { content, .. }
            | Message::ToolResult { content, .. } => content,
        }
    }

    pub fn is_user(&self) -> bool {
        matches!(self, Message::User { .. })
    }
}

/// A pending tool invocation requested by an assistant message.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolRequest {
    pub tool: String,
    pub args: serde_json::Value,
}

// ============================================================================
// Retrieval
// ============================================================================

/// One ranked search hit from the vector index.
///
/// Within one query's result set, `rank` is strictly increasing with
/// `distance` and unique.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RetrievedPassage {
    pub title: String,
    pub body: String,
    pub media_url: Option<String>,
    /// Cosine distance — lower is closer.
    pub distance: f32,
    /// 0-based position among the top-k results for this query.
    pub rank: usize,
}

/// A deduplicated media suggestion derived from a retrieved passage.
///
/// Only passages ranked in the top 3 with a non-empty media URL produce one.
/// `thumbnail_url` is empty when the media host has no predictable thumbnail
/// path.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Recommendation {
    pub id: String,
    pub title: String,
    pub video_url: String,
    pub thumbnail_url: String,
}

/// Recommendations keyed by their positional id (`"vid_0"`..`"vid_2"`).
pub type RecommendationMap = HashMap<String, Recommendation>;

// ============================================================================
// Turn protocol
// ============================================================================

/// One item on the engine → caller stream for an in-flight turn.
///
/// Fragments arrive in generation order; a recommendations event may arrive
/// at any point relative to the fragments and never blocks them.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TurnEvent {
    Fragment { text: String },
    Recommendations { recommendations: RecommendationMap },
}

/// Outcome of one conversation turn.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TurnResult {
    /// The final assistant message, or `None` for a no-op turn (history
    /// contained no user message to answer).
    pub message: Option<Message>,
    /// All recommendations surfaced while producing the answer.
    pub recommendations: RecommendationMap,
    /// Wall-clock duration of the turn.
    pub elapsed_ms: u64,
}

// ============================================================================
// Tests
// ============================================================================
