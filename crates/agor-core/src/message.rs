//! Messages: units of a session's conversation stream.

use crate::id::{MessageId, RequestId, SessionId, TaskId, UserId};
use crate::types::{MessageRole, MessageType, PermissionScope, PermissionStatus, Timestamp};
use serde::{Deserialize, Serialize};

/// One unit of a session's conversation stream.
///
/// Indices are assigned by the store and are gap-free and strictly
/// increasing per session, starting at 0.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    /// Entity id.
    pub id: MessageId,
    /// Owning session.
    pub session_id: SessionId,
    /// Task this message belongs to.
    pub task_id: TaskId,
    /// Per-session sequence number.
    pub index: u64,
    /// Author.
    pub role: MessageRole,
    /// Typed content.
    pub content: MessageContent,
    /// Creation time.
    pub created_at: Timestamp,
}

impl Message {
    /// The content's shape tag.
    #[must_use]
    pub const fn message_type(&self) -> MessageType {
        self.content.message_type()
    }
}

/// Typed message content.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MessageContent {
    /// Plain text from the user, agent, or daemon.
    Text {
        /// The text.
        text: String,
    },
    /// The agent invoking a tool.
    ToolUse {
        /// Tool name (e.g. `"Bash"`).
        tool_name: String,
        /// The agent's id for this invocation, when it sent one.
        tool_use_id: Option<String>,
        /// Tool input; schema varies per tool.
        input: serde_json::Value,
    },
    /// The outcome of a tool invocation.
    ToolResult {
        /// Matches the invocation's `tool_use_id`.
        tool_use_id: Option<String>,
        /// Result payload.
        content: serde_json::Value,
        /// Whether the tool reported failure.
        #[serde(default)]
        is_error: bool,
    },
    /// A permission prompt, patched in place as it resolves.
    PermissionRequest {
        /// The arbiter's request id.
        request_id: RequestId,
        /// Tool being gated.
        tool_name: String,
        /// Tool input shown to the deciding human.
        tool_input: serde_json::Value,
        /// Pending, approved, or denied.
        status: PermissionStatus,
        /// Scope of the decision, once made.
        #[serde(default)]
        scope: Option<PermissionScope>,
        /// Who decided, once decided.
        #[serde(default)]
        decided_by: Option<UserId>,
    },
}

impl MessageContent {
    /// The shape tag for this content.
    #[must_use]
    pub const fn message_type(&self) -> MessageType {
        match self {
            Self::Text { .. } => MessageType::Text,
            Self::ToolUse { .. } => MessageType::ToolUse,
            Self::ToolResult { .. } => MessageType::ToolResult,
            Self::PermissionRequest { .. } => MessageType::PermissionRequest,
        }
    }
}
