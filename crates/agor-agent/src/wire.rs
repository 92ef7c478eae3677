//! The agent's streaming wire protocol (`--output-format stream-json`).
//!
//! Every line on the subprocess's stdout is one JSON message,
//! discriminated by its `"type"` field. Unknown message shapes must
//! parse (to a catch-all) rather than fail: the protocol grows fields
//! and subtypes faster than consumers update.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Every message the agent emits.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SdkMessage {
    /// Daemon-relevant lifecycle notices (`init`, `compact_boundary`).
    System(SystemMessage),
    /// A complete assistant turn.
    Assistant(AssistantMessage),
    /// Tool results and replays fed back through the agent.
    User(UserMessage),
    /// The terminal cost/usage/duration message.
    Result(ResultMessage),
    /// Partial-message deltas (`--include-partial-messages`).
    StreamEvent(StreamEventMessage),
    /// Anything newer than this enum; ignored.
    #[serde(other)]
    Unknown,
}

impl SdkMessage {
    /// The agent's conversation handle carried on this message, if any.
    #[must_use]
    pub fn session_id(&self) -> Option<&str> {
        match self {
            Self::System(m) => m.session_id.as_deref(),
            Self::Assistant(m) => m.session_id.as_deref(),
            Self::User(m) => m.session_id.as_deref(),
            Self::Result(m) => m.session_id.as_deref(),
            Self::StreamEvent(m) => m.session_id.as_deref(),
            Self::Unknown => None,
        }
    }
}

/// `type = "system"` — discriminated further by `subtype`.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SystemMessage {
    /// Conversation handle.
    #[serde(default)]
    pub session_id: Option<String>,
    /// The subtype payload.
    #[serde(flatten)]
    pub payload: SystemPayload,
}

/// System subtypes the driver cares about.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(tag = "subtype", rename_all = "snake_case")]
pub enum SystemPayload {
    /// First message: model, tools, MCP servers, permission mode.
    Init {
        /// Model in effect.
        #[serde(default)]
        model: Option<String>,
        /// Tool names available to the agent.
        #[serde(default)]
        tools: Vec<String>,
    },
    /// The agent compacted its context.
    CompactBoundary {
        /// Compaction details.
        #[serde(default)]
        compact_metadata: Option<Value>,
    },
    /// Any other subtype; ignored.
    #[serde(other)]
    Unknown,
}

/// `type = "assistant"` — a complete assistant turn.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AssistantMessage {
    /// The turn body.
    pub message: AssistantContent,
    /// Conversation handle.
    #[serde(default)]
    pub session_id: Option<String>,
    /// Set when this turn belongs to a subtask.
    #[serde(default)]
    pub parent_tool_use_id: Option<String>,
    /// Agent-reported error for this turn.
    #[serde(default)]
    pub error: Option<String>,
}

/// The assistant turn body.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AssistantContent {
    /// Message id.
    #[serde(default)]
    pub id: Option<String>,
    /// Always `"assistant"`.
    pub role: String,
    /// Content blocks.
    pub content: Vec<ContentBlock>,
    /// Model that produced the turn.
    #[serde(default)]
    pub model: Option<String>,
    /// Why generation stopped.
    #[serde(default)]
    pub stop_reason: Option<String>,
    /// Token usage, when reported.
    #[serde(default)]
    pub usage: Option<Value>,
}

/// Content blocks within an assistant message.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    /// Plain text.
    Text {
        /// The text.
        text: String,
    },
    /// A tool invocation.
    ToolUse {
        /// The agent's invocation id.
        id: String,
        /// Tool name.
        name: String,
        /// Tool input; schema-polymorphic, so `Value` is correct here.
        input: Value,
    },
    /// Extended thinking.
    Thinking {
        /// The thinking text.
        thinking: String,
    },
    /// Any newer block kind; ignored.
    #[serde(other)]
    Unknown,
}

/// `type = "user"` — tool results (and replays, which are discarded).
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct UserMessage {
    /// The message body.
    pub message: UserContent,
    /// Conversation handle.
    #[serde(default)]
    pub session_id: Option<String>,
    /// Set when this message belongs to a subtask.
    #[serde(default)]
    pub parent_tool_use_id: Option<String>,
    /// Replayed history on resume; carries no new information.
    #[serde(default)]
    pub is_replay: Option<bool>,
}

/// The user message body.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct UserContent {
    /// Always `"user"`.
    pub role: String,
    /// Content blocks.
    #[serde(default)]
    pub content: Vec<UserContentBlock>,
}

/// Content blocks within a user message.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum UserContentBlock {
    /// Plain text.
    Text {
        /// The text.
        text: String,
    },
    /// A tool result.
    ToolResult {
        /// Matches the invocation's id.
        tool_use_id: String,
        /// Result payload; string or structured.
        #[serde(default)]
        content: Option<Value>,
        /// Whether the tool failed.
        #[serde(default)]
        is_error: Option<bool>,
    },
    /// Any newer block kind; ignored.
    #[serde(other)]
    Unknown,
}

/// `type = "result"` — the terminal message of every prompt.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ResultMessage {
    /// `success`, `error_during_execution`, `error_max_turns`, ...
    pub subtype: String,
    /// Conversation handle.
    #[serde(default)]
    pub session_id: Option<String>,
    /// Wall-clock duration.
    #[serde(default)]
    pub duration_ms: Option<u64>,
    /// Total cost in USD.
    #[serde(default)]
    pub total_cost_usd: Option<f64>,
    /// Token usage.
    #[serde(default)]
    pub usage: Option<Value>,
    /// Whether the agent reports failure.
    #[serde(default)]
    pub is_error: Option<bool>,
    /// Final result text on success.
    #[serde(default)]
    pub result: Option<String>,
}

/// `type = "stream_event"` — a partial-message delta.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StreamEventMessage {
    /// Conversation handle.
    #[serde(default)]
    pub session_id: Option<String>,
    /// The wrapped streaming event.
    pub event: StreamEventPayload,
}

/// Streaming events within a `stream_event` message.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEventPayload {
    /// A new assistant message begins.
    MessageStart {},
    /// A content block opens at `index`.
    ContentBlockStart {
        /// Block position within the message.
        index: u64,
        /// The opening block (tool-use blocks matter here).
        content_block: ContentBlock,
    },
    /// A delta for the block at `index`.
    ContentBlockDelta {
        /// Block position within the message.
        index: u64,
        /// The delta.
        delta: StreamDelta,
    },
    /// The block at `index` is complete.
    ContentBlockStop {
        /// Block position within the message.
        index: u64,
    },
    /// Top-level message metadata changed.
    MessageDelta {},
    /// The assistant message is complete.
    MessageStop {},
    /// Any newer event kind; ignored.
    #[serde(other)]
    Unknown,
}

/// Deltas within a content block.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamDelta {
    /// Text chunk.
    TextDelta {
        /// The chunk.
        text: String,
    },
    /// Partial tool-input JSON.
    InputJsonDelta {
        /// The partial JSON string.
        partial_json: String,
    },
    /// Thinking chunk.
    ThinkingDelta {
        /// The chunk.
        thinking: String,
    },
    /// Any newer delta kind; ignored.
    #[serde(other)]
    Unknown,
}

/// Encode a user prompt as the stream-json stdin frame the agent
/// expects.
#[must_use]
pub fn user_prompt_frame(text: &str) -> String {
    serde_json::json!({
        "type": "user",
        "message": {
            "role": "user",
            "content": [{ "type": "text", "text": text }],
        },
    })
    .to_string()
}
