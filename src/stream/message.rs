//! Classification of decoded `stream-json` values.
//!
//! # Discrimination order
//!
//! | Top-level `type` | Nested discriminator                 | Maps to                         |
//! |------------------|--------------------------------------|---------------------------------|
//! | `system`         | `subtype` = `init`                   | [`AgentMessage::Init`]          |
//! | `system`         | `subtype` = `hook_started`           | [`AgentMessage::HookStarted`]   |
//! | `system`         | `subtype` = `hook_response`          | [`AgentMessage::HookResponse`]  |
//! | `assistant`      | -                                    | [`AgentMessage::Assistant`]     |
//! | `result`         | -                                    | [`AgentMessage::Result`]        |
//! | `stream_event`   | `event.type` (+ `delta.type`, `content_block.type`) | [`AgentMessage::StreamEvent`] |
//! | *(anything else)*| -                                    | [`AgentMessage::System`]        |
//!
//! Classification is total: a value that matches no known shape becomes
//! [`AgentMessage::System`] carrying the raw value. Nothing here returns an
//! error.

use std::collections::BTreeMap;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

// ── Typed payloads ────────────────────────────────────────────────────────────

/// Token counters reported by the agent.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct TokenUsage {
    /// Uncached input tokens.
    #[serde(default)]
    pub input_tokens: u64,
    /// Output tokens.
    #[serde(default)]
    pub output_tokens: u64,
    /// Input tokens written to the prompt cache.
    #[serde(default)]
    pub cache_creation_input_tokens: Option<u64>,
    /// Input tokens served from the prompt cache.
    #[serde(default)]
    pub cache_read_input_tokens: Option<u64>,
}

/// `system/init` bootstrap metadata.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct InitMessage {
    /// Agent-side session id.
    #[serde(default)]
    pub session_id: Option<String>,
    /// Model the agent resolved for this run.
    #[serde(default)]
    pub model: Option<String>,
    /// Working directory of the run.
    #[serde(default)]
    pub cwd: Option<String>,
    /// Built-in tools available to the agent.
    #[serde(default)]
    pub tools: Vec<String>,
}

/// `system/hook_started` and `system/hook_response` payloads.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct HookMessage {
    /// Hook identifier.
    #[serde(default)]
    pub hook_id: Option<String>,
    /// Configured hook name.
    #[serde(default)]
    pub hook_name: Option<String>,
    /// Lifecycle event the hook is attached to.
    #[serde(default)]
    pub hook_event: Option<String>,
}

/// One content block of a complete assistant turn.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    /// Plain text.
    Text {
        /// Block text.
        text: String,
    },
    /// Tool invocation made by the agent itself.
    ToolUse {
        /// Tool call id.
        #[serde(default)]
        id: String,
        /// Tool name.
        #[serde(default)]
        name: String,
        /// Tool arguments.
        #[serde(default)]
        input: Value,
    },
    /// Extended-thinking text.
    Thinking {
        /// Thinking text.
        #[serde(default)]
        thinking: String,
    },
    /// Any other block kind.
    #[serde(other)]
    Other,
}

/// Inner `message` object of an assistant turn.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct AssistantBody {
    /// Message id.
    #[serde(default)]
    pub id: Option<String>,
    /// Model that produced the turn.
    #[serde(default)]
    pub model: Option<String>,
    /// Content blocks in order.
    #[serde(default)]
    pub content: Vec<ContentBlock>,
    /// Why the turn ended.
    #[serde(default)]
    pub stop_reason: Option<String>,
    /// Per-turn usage.
    #[serde(default)]
    pub usage: Option<TokenUsage>,
}

/// A complete assistant turn.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct AssistantMessage {
    /// Turn body.
    pub message: AssistantBody,
    /// Agent-side session id.
    #[serde(default)]
    pub session_id: Option<String>,
    /// Set when the turn belongs to a sub-agent tool call.
    #[serde(default)]
    pub parent_tool_use_id: Option<String>,
}

impl AssistantMessage {
    /// Concatenated text of all text blocks.
    #[must_use]
    pub fn text(&self) -> String {
        self.message
            .content
            .iter()
            .filter_map(|block| match block {
                ContentBlock::Text { text } => Some(text.as_str()),
                _ => None,
            })
            .collect()
    }
}

/// Per-model usage and cost entry of a `result` message.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelUsage {
    /// Input tokens.
    #[serde(default)]
    pub input_tokens: u64,
    /// Output tokens.
    #[serde(default)]
    pub output_tokens: u64,
    /// Cache-read input tokens.
    #[serde(default)]
    pub cache_read_input_tokens: u64,
    /// Cache-creation input tokens.
    #[serde(default)]
    pub cache_creation_input_tokens: u64,
    /// Cost in US dollars.
    #[serde(default, rename = "costUSD")]
    pub cost_usd: f64,
}

/// Terminal turn summary.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct ResultMessage {
    /// `success`, `error_max_turns`, `error_during_execution`, …
    #[serde(default)]
    pub subtype: Option<String>,
    /// Whether the run failed.
    #[serde(default)]
    pub is_error: bool,
    /// Final response text.
    #[serde(default)]
    pub result: Option<String>,
    /// Agent-side session id.
    #[serde(default)]
    pub session_id: Option<String>,
    /// Wall-clock duration of the run.
    #[serde(default)]
    pub duration_ms: Option<u64>,
    /// Number of agent turns.
    #[serde(default)]
    pub num_turns: Option<u32>,
    /// Total cost in US dollars.
    #[serde(default)]
    pub total_cost_usd: Option<f64>,
    /// Aggregate usage.
    #[serde(default)]
    pub usage: TokenUsage,
    /// Usage and cost broken down by model.
    #[serde(default, rename = "modelUsage")]
    pub model_usage: BTreeMap<String, ModelUsage>,
}

impl ResultMessage {
    /// Model with the largest output-token count in `modelUsage`.
    #[must_use]
    pub fn primary_model(&self) -> Option<&str> {
        self.model_usage
            .iter()
            .max_by_key(|(_, usage)| usage.output_tokens)
            .map(|(model, _)| model.as_str())
    }

    /// Result text, or an empty string when absent.
    #[must_use]
    pub fn text(&self) -> &str {
        self.result.as_deref().unwrap_or_default()
    }
}

/// Catch-all for unrecognized messages and unknown system subtypes.
#[derive(Debug, Clone, PartialEq)]
pub struct SystemMessage {
    /// Top-level `type`, when present.
    pub kind: Option<String>,
    /// `subtype`, when present.
    pub subtype: Option<String>,
    /// The untouched value.
    pub raw: Value,
}

// ── Stream events ─────────────────────────────────────────────────────────────

/// Kind of a newly started content block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BlockStart {
    /// A text block.
    Text,
    /// A tool invocation block.
    ToolUse {
        /// Tool call id.
        id: String,
        /// Tool name.
        name: String,
    },
}

/// Incremental payload of a content block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BlockDelta {
    /// Text fragment.
    Text(String),
    /// Fragment of a tool call's JSON arguments.
    InputJson(String),
}

/// Partial-message event wrapped in a `stream_event` line.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    /// A new message begins.
    MessageStart {
        /// Model producing the message.
        model: Option<String>,
    },
    /// A content block begins.
    ContentBlockStart {
        /// Block index within the message.
        index: u64,
        /// Block kind.
        block: BlockStart,
    },
    /// A content block receives a fragment.
    ContentBlockDelta {
        /// Block index within the message.
        index: u64,
        /// Fragment.
        delta: BlockDelta,
    },
    /// A content block ends.
    ContentBlockStop {
        /// Block index within the message.
        index: u64,
    },
    /// Message-level update (stop reason, usage).
    MessageDelta {
        /// Why the message ended.
        stop_reason: Option<String>,
        /// Cumulative usage.
        usage: Option<TokenUsage>,
    },
    /// The message ends.
    MessageStop,
}

// ── Tagged union ──────────────────────────────────────────────────────────────

/// One classified line of agent output.
#[derive(Debug, Clone, PartialEq)]
pub enum AgentMessage {
    /// Session bootstrap metadata.
    Init(InitMessage),
    /// A tool hook started; passed through untranslated.
    HookStarted(HookMessage),
    /// A tool hook finished; passed through untranslated.
    HookResponse(HookMessage),
    /// A complete assistant turn.
    Assistant(AssistantMessage),
    /// A partial-message event.
    StreamEvent(StreamEvent),
    /// Terminal turn summary.
    Result(ResultMessage),
    /// Anything else.
    System(SystemMessage),
}

impl AgentMessage {
    /// Short name of the variant, for logging.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Init(_) => "init",
            Self::HookStarted(_) => "hook_started",
            Self::HookResponse(_) => "hook_response",
            Self::Assistant(_) => "assistant",
            Self::StreamEvent(_) => "stream_event",
            Self::Result(_) => "result",
            Self::System(_) => "system",
        }
    }

    /// Text of a text-delta event.
    #[must_use]
    pub fn text_delta(&self) -> Option<&str> {
        match self {
            Self::StreamEvent(StreamEvent::ContentBlockDelta {
                delta: BlockDelta::Text(text),
                ..
            }) => Some(text),
            _ => None,
        }
    }

    /// Arguments fragment of a partial tool-argument event.
    #[must_use]
    pub fn input_json_delta(&self) -> Option<&str> {
        match self {
            Self::StreamEvent(StreamEvent::ContentBlockDelta {
                delta: BlockDelta::InputJson(json),
                ..
            }) => Some(json),
            _ => None,
        }
    }

    /// Whether this event starts a text block.
    #[must_use]
    pub fn is_text_block_start(&self) -> bool {
        matches!(
            self,
            Self::StreamEvent(StreamEvent::ContentBlockStart {
                block: BlockStart::Text,
                ..
            })
        )
    }

    /// Whether this event starts a tool-use block.
    #[must_use]
    pub fn is_tool_use_start(&self) -> bool {
        self.tool_use_start().is_some()
    }

    /// `(id, name)` of a tool-use block start.
    #[must_use]
    pub fn tool_use_start(&self) -> Option<(&str, &str)> {
        match self {
            Self::StreamEvent(StreamEvent::ContentBlockStart {
                block: BlockStart::ToolUse { id, name },
                ..
            }) => Some((id, name)),
            _ => None,
        }
    }

    /// Model reported by a `message_start` event or a complete assistant turn.
    #[must_use]
    pub fn reported_model(&self) -> Option<&str> {
        match self {
            Self::StreamEvent(StreamEvent::MessageStart { model }) => model.as_deref(),
            Self::Assistant(message) => message.message.model.as_deref(),
            _ => None,
        }
    }

    /// The terminal summary, if this is one.
    #[must_use]
    pub fn as_result(&self) -> Option<&ResultMessage> {
        match self {
            Self::Result(result) => Some(result),
            _ => None,
        }
    }

    /// Whether this message ends a run.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Result(_))
    }
}

// ── Classification ────────────────────────────────────────────────────────────

/// Classify one decoded JSON value. Never fails.
#[must_use]
pub fn classify(value: Value) -> AgentMessage {
    match str_at(&value, &["type"]) {
        Some("system") => classify_system(value),
        Some("assistant") => typed(value, AgentMessage::Assistant),
        Some("result") => typed(value, AgentMessage::Result),
        Some("stream_event") => classify_stream_event(value),
        _ => unrecognized(value),
    }
}

fn classify_system(value: Value) -> AgentMessage {
    match str_at(&value, &["subtype"]) {
        Some("init") => typed(value, AgentMessage::Init),
        Some("hook_started") => typed(value, AgentMessage::HookStarted),
        Some("hook_response") => typed(value, AgentMessage::HookResponse),
        _ => unrecognized(value),
    }
}

fn classify_stream_event(value: Value) -> AgentMessage {
    let Some(event) = value.get("event") else {
        return unrecognized(value);
    };
    let index = event.get("index").and_then(Value::as_u64).unwrap_or_default();

    let classified = match str_at(event, &["type"]) {
        Some("message_start") => Some(StreamEvent::MessageStart {
            model: str_at(event, &["message", "model"]).map(str::to_owned),
        }),
        Some("content_block_start") => match str_at(event, &["content_block", "type"]) {
            Some("text") => Some(StreamEvent::ContentBlockStart {
                index,
                block: BlockStart::Text,
            }),
            Some("tool_use") => Some(StreamEvent::ContentBlockStart {
                index,
                block: BlockStart::ToolUse {
                    id: owned_at(event, &["content_block", "id"]),
                    name: owned_at(event, &["content_block", "name"]),
                },
            }),
            _ => None,
        },
        Some("content_block_delta") => {
            let delta = match str_at(event, &["delta", "type"]) {
                Some("text_delta") => {
                    str_at(event, &["delta", "text"]).map(|t| BlockDelta::Text(t.to_owned()))
                }
                Some("input_json_delta") => str_at(event, &["delta", "partial_json"])
                    .map(|j| BlockDelta::InputJson(j.to_owned())),
                _ => None,
            };
            delta.map(|delta| StreamEvent::ContentBlockDelta { index, delta })
        }
        Some("content_block_stop") => Some(StreamEvent::ContentBlockStop { index }),
        Some("message_delta") => Some(StreamEvent::MessageDelta {
            stop_reason: str_at(event, &["delta", "stop_reason"]).map(str::to_owned),
            usage: event
                .get("usage")
                .and_then(|usage| TokenUsage::deserialize(usage).ok()),
        }),
        Some("message_stop") => Some(StreamEvent::MessageStop),
        _ => None,
    };

    match classified {
        Some(event) => AgentMessage::StreamEvent(event),
        None => unrecognized(value),
    }
}

/// Deserialize into a typed payload, falling back to the catch-all.
fn typed<T: DeserializeOwned>(value: Value, wrap: fn(T) -> AgentMessage) -> AgentMessage {
    match T::deserialize(&value) {
        Ok(payload) => wrap(payload),
        Err(err) => {
            debug!(error = %err, "classifier: payload shape mismatch, passing through");
            unrecognized(value)
        }
    }
}

fn unrecognized(value: Value) -> AgentMessage {
    AgentMessage::System(SystemMessage {
        kind: str_at(&value, &["type"]).map(str::to_owned),
        subtype: str_at(&value, &["subtype"]).map(str::to_owned),
        raw: value,
    })
}

/// Walk `path` through nested objects and return the string found there.
fn str_at<'a>(value: &'a Value, path: &[&str]) -> Option<&'a str> {
    path.iter()
        .try_fold(value, |node, key| node.get(key))
        .and_then(Value::as_str)
}

fn owned_at(value: &Value, path: &[&str]) -> String {
    str_at(value, path).unwrap_or_default().to_owned()
}
