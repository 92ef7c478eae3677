//! Permission requests: the record of each gated tool invocation.

use crate::id::{RequestId, SessionId, TaskId, UserId};
use crate::types::{PermissionScope, PermissionStatus, Timestamp};
use serde::{Deserialize, Serialize};

/// One gated tool invocation and its (eventual) human decision.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PermissionRequest {
    /// Entity id.
    pub id: RequestId,
    /// Session the agent ran in.
    pub session_id: SessionId,
    /// Task the tool call belonged to.
    pub task_id: TaskId,
    /// Gated tool name.
    pub tool_name: String,
    /// Tool input shown to the deciding human.
    pub tool_input: serde_json::Value,
    /// The agent's id for this invocation, when present.
    #[serde(default)]
    pub tool_use_id: Option<String>,
    /// Pending until the first decision arrives.
    #[serde(default)]
    pub status: PermissionStatus,
    /// Who decided.
    #[serde(default)]
    pub decided_by: Option<UserId>,
    /// When the decision arrived.
    #[serde(default)]
    pub decided_at: Option<Timestamp>,
    /// Scope of the decision.
    #[serde(default)]
    pub scope: PermissionScope,
    /// Whether the decision is persisted beyond this call.
    #[serde(default)]
    pub remember: bool,
    /// Creation time.
    pub created_at: Timestamp,
}

impl PermissionRequest {
    /// Create a pending request.
    #[must_use]
    pub fn new(
        session_id: SessionId,
        task_id: TaskId,
        tool_name: impl Into<String>,
        tool_input: serde_json::Value,
        tool_use_id: Option<String>,
    ) -> Self {
        Self {
            id: RequestId::generate(),
            session_id,
            task_id,
            tool_name: tool_name.into(),
            tool_input,
            tool_use_id,
            status: PermissionStatus::Pending,
            decided_by: None,
            decided_at: None,
            scope: PermissionScope::Once,
            remember: false,
            created_at: Timestamp::now(),
        }
    }
}
