//! Common enums and the timestamp type shared across the daemon.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A UTC timestamp.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Timestamp(pub DateTime<Utc>);

impl Timestamp {
    /// The current time.
    #[must_use]
    pub fn now() -> Self {
        Self(Utc::now())
    }

    /// The underlying chrono value.
    #[must_use]
    pub const fn as_datetime(&self) -> &DateTime<Utc> {
        &self.0
    }

    /// Signed duration from `earlier` to `self`.
    #[must_use]
    pub fn since(&self, earlier: Timestamp) -> chrono::Duration {
        self.0.signed_duration_since(earlier.0)
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.to_rfc3339())
    }
}

/// Role of a daemon user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UserRole {
    /// Host owner; full control.
    Owner,
    /// Administrator.
    Admin,
    /// Regular member.
    Member,
    /// Read-only viewer.
    Viewer,
}

/// What a worktree ref points at.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RefType {
    /// A branch head.
    #[default]
    Branch,
    /// A tag.
    Tag,
    /// A pinned commit.
    Sha,
}

/// What non-owners may do with a worktree through the daemon.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OthersCan {
    /// Invisible to non-owners.
    #[default]
    None,
    /// Non-owners can watch sessions.
    View,
    /// Non-owners can send prompts.
    Prompt,
    /// Full access.
    All,
}

/// Filesystem access non-owners get to the worktree directory.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OthersFsAccess {
    /// Owner only.
    #[default]
    None,
    /// Group-readable.
    Read,
    /// Group-writable.
    Write,
}

impl OthersFsAccess {
    /// Canonical POSIX mode for the worktree directory. The SGID bit is
    /// always set so new files inherit the worktree group.
    #[must_use]
    pub const fn dir_mode(&self) -> u32 {
        match self {
            Self::None => 0o2700,
            Self::Read => 0o2750,
            Self::Write => 0o2770,
        }
    }

    /// The mode as the octal string handed to `chmod`.
    #[must_use]
    pub const fn mode_str(&self) -> &'static str {
        match self {
            Self::None => "2700",
            Self::Read => "2750",
            Self::Write => "2770",
        }
    }
}

/// Lifecycle status of a session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    /// No prompt in flight.
    #[default]
    Idle,
    /// A prompt is being driven.
    Running,
    /// Blocked on a human permission decision.
    AwaitingPermission,
    /// Last prompt finished successfully.
    Completed,
    /// Last prompt failed.
    Failed,
}

impl SessionStatus {
    /// Whether a prompt is currently in flight.
    #[must_use]
    pub const fn is_busy(&self) -> bool {
        matches!(self, Self::Running | Self::AwaitingPermission)
    }

    /// Whether a new prompt may start from this status.
    #[must_use]
    pub const fn accepts_prompt(&self) -> bool {
        !self.is_busy()
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Idle => "idle",
            Self::Running => "running",
            Self::AwaitingPermission => "awaiting_permission",
            Self::Completed => "completed",
            Self::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Lifecycle status of a task (one prompt).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Created, not yet driven.
    #[default]
    Pending,
    /// The agent is working.
    Running,
    /// Blocked on a permission decision.
    AwaitingPermission,
    /// Finished successfully.
    Completed,
    /// Finished with an error, denial, or timeout.
    Failed,
}

/// Who authored a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageRole {
    /// The human (or a tool result relayed on their behalf).
    User,
    /// The agent.
    Assistant,
    /// The daemon itself.
    System,
}

/// Shape of a message's content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    /// Plain text.
    Text,
    /// A tool invocation by the agent.
    ToolUse,
    /// The result of a tool invocation.
    ToolResult,
    /// A pending or resolved permission prompt.
    PermissionRequest,
}

/// Scope of a remembered permission decision.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PermissionScope {
    /// This call only.
    #[default]
    Once,
    /// Remembered in the session's permission config.
    Session,
    /// Remembered in the worktree's `.claude/settings.json`.
    Project,
}

/// Status of a permission request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PermissionStatus {
    /// Awaiting a decision.
    #[default]
    Pending,
    /// Allowed.
    Approved,
    /// Denied.
    Denied,
}

/// The agent's own permission policy, passed through on spawn.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PermissionMode {
    /// Prompt for dangerous operations.
    #[default]
    Default,
    /// Auto-accept file edits.
    AcceptEdits,
    /// Skip all permission checks.
    BypassPermissions,
    /// Plan only; no tool execution.
    Plan,
}

impl PermissionMode {
    /// The flag value the agent CLI expects.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Default => "default",
            Self::AcceptEdits => "acceptEdits",
            Self::BypassPermissions => "bypassPermissions",
            Self::Plan => "plan",
        }
    }
}

/// How the thinking-token budget is chosen.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThinkingMode {
    /// Keyword detection on the prompt.
    #[default]
    Auto,
    /// Fixed token count from the session config.
    Manual,
    /// Never allocate thinking tokens.
    Off,
}

/// Which agent family a session drives.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AgentKind {
    /// Anthropic Claude Code CLI.
    #[default]
    #[serde(rename = "claude-code")]
    ClaudeCode,
    /// OpenAI Codex CLI.
    #[serde(rename = "codex")]
    Codex,
    /// Google Gemini CLI.
    #[serde(rename = "gemini")]
    Gemini,
}

impl AgentKind {
    /// Canonical name, as stored and shown.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::ClaudeCode => "claude-code",
            Self::Codex => "codex",
            Self::Gemini => "gemini",
        }
    }

    /// The executable to spawn.
    #[must_use]
    pub const fn binary(&self) -> &'static str {
        match self {
            Self::ClaudeCode => "claude",
            Self::Codex => "codex",
            Self::Gemini => "gemini",
        }
    }

    /// Model used when the session config does not name one.
    #[must_use]
    pub const fn default_model(&self) -> &'static str {
        match self {
            Self::ClaudeCode => "claude-sonnet-4-5",
            Self::Codex => "gpt-5-codex",
            Self::Gemini => "gemini-2.5-pro",
        }
    }

    /// Environment variable carrying the vendor api key.
    #[must_use]
    pub const fn api_key_env(&self) -> &'static str {
        match self {
            Self::ClaudeCode => "ANTHROPIC_API_KEY",
            Self::Codex => "OPENAI_API_KEY",
            Self::Gemini => "GEMINI_API_KEY",
        }
    }

    /// Vendor key used in the per-user api-key store.
    #[must_use]
    pub const fn vendor(&self) -> &'static str {
        match self {
            Self::ClaudeCode => "anthropic",
            Self::Codex => "openai",
            Self::Gemini => "google",
        }
    }
}

impl fmt::Display for AgentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Scope an MCP server is registered at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum McpScope {
    /// Visible to every session.
    Global,
    /// Visible to sessions in one repo's worktrees.
    Repo,
    /// Attached to one session.
    Session,
}

/// Transport an MCP server speaks.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum McpTransport {
    /// Spawned child process over stdio.
    #[default]
    Stdio,
    /// Streamable HTTP.
    Http,
    /// Server-sent events.
    Sse,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fs_access_modes_are_canonical() {
        assert_eq!(OthersFsAccess::None.dir_mode(), 0o2700);
        assert_eq!(OthersFsAccess::Read.dir_mode(), 0o2750);
        assert_eq!(OthersFsAccess::Write.dir_mode(), 0o2770);
        assert_eq!(OthersFsAccess::Read.mode_str(), "2750");
    }

    #[test]
    fn session_status_prompt_gating() {
        assert!(SessionStatus::Idle.accepts_prompt());
        assert!(SessionStatus::Completed.accepts_prompt());
        assert!(SessionStatus::Failed.accepts_prompt());
        assert!(!SessionStatus::Running.accepts_prompt());
        assert!(!SessionStatus::AwaitingPermission.accepts_prompt());
    }

    #[test]
    fn agent_kind_serde_uses_canonical_names() {
        let json = serde_json::to_string(&AgentKind::ClaudeCode).unwrap();
        assert_eq!(json, "\"claude-code\"");
        let back: AgentKind = serde_json::from_str("\"codex\"").unwrap();
        assert_eq!(back, AgentKind::Codex);
    }

    #[test]
    fn permission_mode_flag_values() {
        assert_eq!(PermissionMode::AcceptEdits.as_str(), "acceptEdits");
        assert_eq!(PermissionMode::Default.as_str(), "default");
    }
}
