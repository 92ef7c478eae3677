//! Sessions: one conversation between one user and one agent, bound to
//! one worktree.

use crate::error::{CoreError, CoreResult};
use crate::id::{ServerId, SessionId, TaskId, UserId, WorktreeId};
use crate::types::{AgentKind, PermissionMode, SessionStatus, ThinkingMode, Timestamp};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// A session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    /// Entity id.
    pub id: SessionId,
    /// The worktree this session works in.
    pub worktree_id: WorktreeId,
    /// The user who opened the session.
    pub created_by: UserId,
    /// Which agent family drives it.
    pub agentic_tool: AgentKind,
    /// Lifecycle status.
    #[serde(default)]
    pub status: SessionStatus,
    /// Remembered permission decisions plus the agent permission mode.
    #[serde(default)]
    pub permission_config: PermissionConfig,
    /// Model selection and thinking configuration.
    #[serde(default)]
    pub model_config: ModelConfig,
    /// Enumerated per-agent extras; unknown keys are rejected.
    #[serde(default)]
    pub agentic_config: AgenticConfig,
    /// Opaque token the session's self-access MCP server authenticates with.
    pub mcp_token: String,
    /// The agent's own conversation handle, captured from its stream and
    /// persisted for resume. `None` until first captured.
    #[serde(default)]
    pub sdk_session_id: Option<String>,
    /// When `sdk_session_id` was last captured.
    #[serde(default)]
    pub sdk_session_captured_at: Option<Timestamp>,
    /// How this session relates to other sessions.
    #[serde(default)]
    pub genealogy: Genealogy,
    /// Number of persisted messages; equals the next message index.
    #[serde(default)]
    pub message_count: u64,
    /// Total tool invocations across all tasks.
    #[serde(default)]
    pub tool_use_count: u64,
    /// Ordered task ids.
    #[serde(default)]
    pub tasks: Vec<TaskId>,
    /// Creation time.
    pub created_at: Timestamp,
}

impl Session {
    /// Create a fresh session (no genealogy).
    #[must_use]
    pub fn new(
        worktree_id: WorktreeId,
        created_by: UserId,
        agentic_tool: AgentKind,
        mcp_token: impl Into<String>,
    ) -> Self {
        Self {
            id: SessionId::generate(),
            worktree_id,
            created_by,
            agentic_tool,
            status: SessionStatus::Idle,
            permission_config: PermissionConfig::default(),
            model_config: ModelConfig::default(),
            agentic_config: AgenticConfig::default(),
            mcp_token: mcp_token.into(),
            sdk_session_id: None,
            sdk_session_captured_at: None,
            genealogy: Genealogy::default(),
            message_count: 0,
            tool_use_count: 0,
            tasks: Vec::new(),
            created_at: Timestamp::now(),
        }
    }

    /// How this session came to exist.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::CorruptGenealogy`] when both a spawn and a
    /// fork link are set; exactly one origin must apply.
    pub fn origin(&self) -> CoreResult<SessionOrigin> {
        self.genealogy.origin().map_err(|detail| {
            CoreError::CorruptGenealogy {
                detail: format!("session {}: {detail}", self.id),
            }
        })
    }
}

/// Remembered permission decisions plus the agent permission mode.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PermissionConfig {
    /// The agent's own permission policy.
    #[serde(default)]
    pub mode: PermissionMode,
    /// Tools allowed without prompting (session-scope grants land here).
    #[serde(default)]
    pub allowed_tools: BTreeSet<String>,
}

impl PermissionConfig {
    /// Whether `tool` is pre-approved for this session.
    #[must_use]
    pub fn allows(&self, tool: &str) -> bool {
        self.allowed_tools.contains(tool)
    }
}

/// Model selection and thinking configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Model name; the agent default is used when unset.
    #[serde(default)]
    pub model: Option<String>,
    /// How the thinking budget is chosen.
    #[serde(default)]
    pub thinking_mode: ThinkingMode,
    /// Fixed budget for [`ThinkingMode::Manual`].
    #[serde(default)]
    pub manual_tokens: Option<u32>,
}

/// Enumerated per-agent configuration extras.
///
/// This is a boundary type: unknown keys in an incoming config are an
/// error, not silently dropped.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AgenticConfig {
    /// MCP servers attached to this session, beyond scope composition.
    #[serde(default)]
    pub mcp_server_ids: Vec<ServerId>,
    /// Codex sandbox mode (e.g. `"workspace-write"`).
    #[serde(default)]
    pub codex_sandbox_mode: Option<String>,
    /// Codex approval policy (e.g. `"on-request"`).
    #[serde(default)]
    pub codex_approval_policy: Option<String>,
    /// Whether Codex may reach the network from its sandbox.
    #[serde(default)]
    pub codex_network_access: Option<bool>,
}

/// Links between sessions.
///
/// A **spawn** shares ancestry metadata but no conversation history; a
/// **fork** continues the parent agent conversation from a point.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Genealogy {
    /// Set on spawned sessions.
    #[serde(default)]
    pub parent_session_id: Option<SessionId>,
    /// Set on forked sessions.
    #[serde(default)]
    pub forked_from_session_id: Option<SessionId>,
    /// The task in the parent after which the spawn happened.
    #[serde(default)]
    pub spawn_point_task_id: Option<TaskId>,
    /// The task in the parent at which the fork happened.
    #[serde(default)]
    pub fork_point_task_id: Option<TaskId>,
}

impl Genealogy {
    /// Which origin these links describe, or a description of why they
    /// are inconsistent.
    fn origin(&self) -> Result<SessionOrigin, String> {
        match (self.parent_session_id, self.forked_from_session_id) {
            (Some(_), Some(_)) => {
                Err("both parent_session_id and forked_from_session_id set".to_string())
            },
            (Some(parent), None) => Ok(SessionOrigin::Spawned { parent }),
            (None, Some(parent)) => Ok(SessionOrigin::Forked { parent }),
            (None, None) => Ok(SessionOrigin::Fresh),
        }
    }

    /// The linked predecessor, whichever link kind is set.
    #[must_use]
    pub fn predecessor(&self) -> Option<SessionId> {
        self.forked_from_session_id.or(self.parent_session_id)
    }
}

/// How a session came to exist. Exactly one applies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionOrigin {
    /// Opened directly by a user.
    Fresh,
    /// Spawned from a parent: ancestry only, no history.
    Spawned {
        /// The parent session.
        parent: SessionId,
    },
    /// Forked from a parent: continues the agent conversation.
    Forked {
        /// The forked-from session.
        parent: SessionId,
    },
}
