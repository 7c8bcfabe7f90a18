//! OpenAI chat-completions wire types, inbound and outbound.

use serde::{Deserialize, Serialize};

use crate::AppError;

/// `object` value of a streaming frame.
pub const CHUNK_OBJECT: &str = "chat.completion.chunk";
/// `object` value of a non-streaming response.
pub const COMPLETION_OBJECT: &str = "chat.completion";
/// Completion reason reported on the terminal frame.
pub const FINISH_STOP: &str = "stop";
/// Role carried on the first delta of a stream.
pub const ROLE_ASSISTANT: &str = "assistant";

// ── Inbound ──────────────────────────────────────────────────────────────────

/// Body of `POST /v1/chat/completions`.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct ChatCompletionRequest {
    /// Requested model identifier; resolved to a tier, never rejected.
    #[serde(default)]
    pub model: Option<String>,
    /// Conversation so far.
    #[serde(default)]
    pub messages: Vec<ChatMessage>,
    /// Whether the caller wants an SSE stream.
    #[serde(default)]
    pub stream: bool,
    /// Caller-supplied end-user id, forwarded as the session-correlation id.
    #[serde(default)]
    pub user: Option<String>,
}

/// One message of the inbound conversation.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct ChatMessage {
    /// `system`, `developer`, `user`, `assistant`, or `tool`.
    pub role: String,
    /// Message body; `null` for assistant turns that only carried tool calls.
    #[serde(default)]
    pub content: Option<MessageContent>,
}

/// Message content: either a plain string or an array of typed parts.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(untagged)]
pub enum MessageContent {
    /// Plain text content.
    Text(String),
    /// Multi-part content (text, images, …).
    Parts(Vec<ContentPart>),
}

/// One part of multi-part content.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct ContentPart {
    /// Part kind (`text`, `image_url`, …).
    #[serde(rename = "type")]
    pub kind: String,
    /// Text payload for `text` parts.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
}

impl MessageContent {
    /// Flatten the content to text, joining text parts with newlines.
    ///
    /// Non-text parts are dropped.
    #[must_use]
    pub fn to_text(&self) -> String {
        match self {
            Self::Text(text) => text.clone(),
            Self::Parts(parts) => parts
                .iter()
                .filter(|part| part.kind == "text")
                .filter_map(|part| part.text.as_deref())
                .collect::<Vec<_>>()
                .join("\n"),
        }
    }
}

// ── Outbound: streaming ──────────────────────────────────────────────────────

/// Token accounting attached to terminal frames and full responses.
#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq)]
pub struct Usage {
    /// Input tokens consumed.
    pub prompt_tokens: u64,
    /// Output tokens produced.
    pub completion_tokens: u64,
    /// Sum of the two.
    pub total_tokens: u64,
}

impl Usage {
    /// Build usage from input and output counts, summing the total.
    #[must_use]
    pub fn new(input_tokens: u64, output_tokens: u64) -> Self {
        Self {
            prompt_tokens: input_tokens,
            completion_tokens: output_tokens,
            total_tokens: input_tokens.saturating_add(output_tokens),
        }
    }
}

/// Incremental delta inside a streaming choice.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
pub struct Delta {
    /// Present only on the first frame.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    /// Text fragment.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
}

/// The single choice carried by every streaming frame.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct ChunkChoice {
    /// Always `0`.
    pub index: u32,
    /// Incremental delta.
    pub delta: Delta,
    /// `null` until the terminal frame.
    pub finish_reason: Option<String>,
}

/// One `chat.completion.chunk` frame.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct ChatCompletionChunk {
    /// Stream identifier, shared by every frame of one request.
    pub id: String,
    /// Always [`CHUNK_OBJECT`].
    pub object: String,
    /// Unix seconds at request start.
    pub created: i64,
    /// Public model label.
    pub model: String,
    /// Exactly one choice.
    pub choices: Vec<ChunkChoice>,
    /// Present only on the terminal frame.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
}

impl ChatCompletionChunk {
    /// Build a frame with a single choice.
    #[must_use]
    pub fn new(id: &str, created: i64, model: &str, delta: Delta) -> Self {
        Self {
            id: id.to_owned(),
            object: CHUNK_OBJECT.to_owned(),
            created,
            model: model.to_owned(),
            choices: vec![ChunkChoice {
                index: 0,
                delta,
                finish_reason: None,
            }],
            usage: None,
        }
    }

    /// Text carried by this frame's delta, if any.
    #[must_use]
    pub fn content(&self) -> Option<&str> {
        self.choices
            .first()
            .and_then(|choice| choice.delta.content.as_deref())
    }
}

// ── Outbound: non-streaming ──────────────────────────────────────────────────

/// Complete assistant message of a non-streaming response.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct ReplyMessage {
    /// Always `assistant`.
    pub role: String,
    /// Full response text.
    pub content: String,
}

/// The single choice of a non-streaming response.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct CompletionChoice {
    /// Always `0`.
    pub index: u32,
    /// Assistant reply.
    pub message: ReplyMessage,
    /// Always [`FINISH_STOP`].
    pub finish_reason: String,
}

/// A `chat.completion` response object.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct ChatCompletion {
    /// Response identifier.
    pub id: String,
    /// Always [`COMPLETION_OBJECT`].
    pub object: String,
    /// Unix seconds at request start.
    pub created: i64,
    /// Public model label.
    pub model: String,
    /// Exactly one choice.
    pub choices: Vec<CompletionChoice>,
    /// Aggregate usage.
    pub usage: Usage,
}

impl ChatCompletion {
    /// Build a completed response around `content`.
    #[must_use]
    pub fn new(id: &str, created: i64, model: &str, content: String, usage: Usage) -> Self {
        Self {
            id: id.to_owned(),
            object: COMPLETION_OBJECT.to_owned(),
            created,
            model: model.to_owned(),
            choices: vec![CompletionChoice {
                index: 0,
                message: ReplyMessage {
                    role: ROLE_ASSISTANT.to_owned(),
                    content,
                },
                finish_reason: FINISH_STOP.to_owned(),
            }],
            usage,
        }
    }
}

// ── Errors and listings ──────────────────────────────────────────────────────

/// Error detail in the OpenAI error envelope.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct ErrorDetail {
    /// Human-readable message.
    pub message: String,
    /// Error category.
    #[serde(rename = "type")]
    pub kind: String,
    /// Stable machine code.
    pub code: String,
}

/// `{"error": {...}}` body used both as an SSE frame and as a response.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct ErrorBody {
    /// Error detail.
    pub error: ErrorDetail,
}

impl From<&AppError> for ErrorBody {
    fn from(err: &AppError) -> Self {
        let kind = match err {
            AppError::BadRequest(_) => "invalid_request_error",
            _ => "server_error",
        };
        Self {
            error: ErrorDetail {
                message: err.to_string(),
                kind: kind.to_owned(),
                code: err.code().to_owned(),
            },
        }
    }
}

/// One entry of `GET /v1/models`.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct ModelEntry {
    /// Public label.
    pub id: String,
    /// Always `model`.
    pub object: String,
    /// Owner string.
    pub owned_by: String,
    /// Unix seconds.
    pub created: i64,
}

/// Body of `GET /v1/models`.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct ModelList {
    /// Always `list`.
    pub object: String,
    /// Available models.
    pub data: Vec<ModelEntry>,
}
