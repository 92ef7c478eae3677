//! The typed event stream a running prompt produces.

use crate::wire::{ContentBlock, UserContentBlock};
use serde_json::Value;

/// Events emitted by the driver, in stream order:
/// `(partial | tool_start | tool_complete)*` interleaved with
/// `(message_start … message_complete)*`, then `result`, then `end`.
#[derive(Debug, Clone)]
pub enum AgentEvent {
    /// The agent's conversation handle was observed for the first time
    /// (or changed). Must be persisted before the next resume.
    SessionIdCaptured {
        /// The handle.
        handle: String,
    },
    /// A streamed text chunk (only when token streaming is enabled).
    Partial {
        /// The chunk.
        text: String,
    },
    /// A tool-use block opened.
    ToolStart {
        /// Tool name.
        name: String,
        /// The agent's invocation id.
        tool_use_id: Option<String>,
        /// Tool input as known at block start (often still empty; it
        /// streams in through input-json deltas).
        input: Value,
    },
    /// A tool-use block closed.
    ToolComplete {
        /// The agent's invocation id.
        tool_use_id: Option<String>,
    },
    /// A streamed assistant message began.
    MessageStart,
    /// A streamed assistant message finished.
    MessageComplete,
    /// A complete turn arrived (assistant, or a text/tool-result user
    /// message).
    Complete {
        /// Who authored it.
        role: CompletedRole,
        /// The turn's blocks.
        blocks: Vec<CompletedBlock>,
    },
    /// The terminal result message.
    Result(ResultSummary),
    /// The stream is over.
    End {
        /// Why.
        reason: EndReason,
    },
}

/// Author of a completed turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompletedRole {
    /// The agent.
    Assistant,
    /// A tool result or text relayed as the user.
    User,
}

/// A block of a completed turn, already flattened for persistence.
#[derive(Debug, Clone)]
pub enum CompletedBlock {
    /// Text.
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
        /// Tool input.
        input: Value,
    },
    /// A tool result.
    ToolResult {
        /// Matches the invocation's id.
        tool_use_id: String,
        /// Result payload.
        content: Value,
        /// Whether the tool failed.
        is_error: bool,
    },
}

impl CompletedBlock {
    /// Flatten an assistant content block; thinking and unknown blocks
    /// carry nothing persistable.
    #[must_use]
    pub fn from_assistant(block: &ContentBlock) -> Option<Self> {
        match block {
            ContentBlock::Text { text } => Some(Self::Text { text: text.clone() }),
            ContentBlock::ToolUse { id, name, input } => Some(Self::ToolUse {
                id: id.clone(),
                name: name.clone(),
                input: input.clone(),
            }),
            ContentBlock::Thinking { .. } | ContentBlock::Unknown => None,
        }
    }

    /// Flatten a user content block.
    #[must_use]
    pub fn from_user(block: &UserContentBlock) -> Option<Self> {
        match block {
            UserContentBlock::Text { text } => Some(Self::Text { text: text.clone() }),
            UserContentBlock::ToolResult {
                tool_use_id,
                content,
                is_error,
            } => Some(Self::ToolResult {
                tool_use_id: tool_use_id.clone(),
                content: content.clone().unwrap_or(Value::Null),
                is_error: is_error.unwrap_or(false),
            }),
            UserContentBlock::Unknown => None,
        }
    }
}

/// The terminal result, summarised.
#[derive(Debug, Clone)]
pub struct ResultSummary {
    /// `success`, `error_during_execution`, ...
    pub subtype: String,
    /// Wall-clock duration.
    pub duration_ms: Option<u64>,
    /// Total cost in USD.
    pub cost_usd: Option<f64>,
    /// Token usage.
    pub usage: Option<Value>,
    /// Whether the agent reports failure.
    pub is_error: bool,
}

/// Why a prompt's event stream ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EndReason {
    /// The result message arrived.
    Result,
    /// No activity for the idle timeout (armed after the fifth
    /// message).
    Timeout,
    /// Cancellation was requested.
    StopRequested,
    /// The subprocess closed its stream without a result.
    AgentExit {
        /// Exit code, when the process was reapable.
        exitcode: i32,
        /// Tail of captured stderr.
        stderr: String,
    },
}
