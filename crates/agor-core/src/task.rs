//! Tasks: one prompt and its agent turns, within a session.

use crate::id::{SessionId, TaskId};
use crate::types::{TaskStatus, Timestamp};
use serde::{Deserialize, Serialize};

/// Maximum length of a task description, in characters.
pub const DESCRIPTION_MAX_CHARS: usize = 120;

/// One prompt plus everything the agent did for it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    /// Entity id.
    pub id: TaskId,
    /// Owning session.
    pub session_id: SessionId,
    /// The prompt exactly as submitted.
    pub full_prompt: String,
    /// First 120 chars of the cleaned prompt.
    pub description: String,
    /// Lifecycle status.
    #[serde(default)]
    pub status: TaskStatus,
    /// Which message indices this task covers.
    pub message_range: MessageRange,
    /// Git snapshot at task start, when the worktree is a repo.
    #[serde(default)]
    pub git_state: Option<GitState>,
    /// Model the agent ran with.
    #[serde(default)]
    pub model: Option<String>,
    /// Tool invocations during this task.
    #[serde(default)]
    pub tool_use_count: u64,
    /// Failure report (captured stderr, denial reason, timeout note).
    #[serde(default)]
    pub report: Option<String>,
    /// Creation time.
    pub created_at: Timestamp,
    /// Last update time.
    pub updated_at: Timestamp,
}

impl Task {
    /// Create a pending task for a prompt, starting at `start_index`.
    #[must_use]
    pub fn new(session_id: SessionId, full_prompt: impl Into<String>, start_index: u64) -> Self {
        let full_prompt = full_prompt.into();
        let now = Timestamp::now();
        Self {
            id: TaskId::generate(),
            session_id,
            description: describe_prompt(&full_prompt),
            full_prompt,
            status: TaskStatus::Pending,
            message_range: MessageRange {
                start_index,
                end_index: None,
                start_ts: now,
                end_ts: None,
            },
            git_state: None,
            model: None,
            tool_use_count: 0,
            report: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// The span of session message indices a task covers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageRange {
    /// First index belonging to the task.
    pub start_index: u64,
    /// Last index, set when the task finishes.
    #[serde(default)]
    pub end_index: Option<u64>,
    /// When the task started.
    pub start_ts: Timestamp,
    /// When the task finished.
    #[serde(default)]
    pub end_ts: Option<Timestamp>,
}

/// Git repository state snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GitState {
    /// Current branch name.
    pub branch: Option<String>,
    /// Current commit hash.
    pub commit: Option<String>,
}

impl GitState {
    /// Capture the current git state for a worktree path.
    ///
    /// Returns `None` if the path is not in a git repository or git is
    /// not available.
    #[must_use]
    pub fn capture(worktree_path: &std::path::Path) -> Option<Self> {
        let run = |args: &[&str]| {
            std::process::Command::new("git")
                .arg("-C")
                .arg(worktree_path)
                .args(args)
                .stdout(std::process::Stdio::piped())
                .stderr(std::process::Stdio::null())
                .output()
                .ok()
                .filter(|o| o.status.success())
                .and_then(|o| String::from_utf8(o.stdout).ok())
                .map(|s| s.trim().to_string())
        };

        let branch = run(&["rev-parse", "--abbrev-ref", "HEAD"]);
        let commit = run(&["rev-parse", "HEAD"]);

        if branch.is_some() || commit.is_some() {
            Some(Self { branch, commit })
        } else {
            None
        }
    }
}

/// Derive a task description: whitespace collapsed, trimmed, truncated
/// to [`DESCRIPTION_MAX_CHARS`] characters.
#[must_use]
pub fn describe_prompt(prompt: &str) -> String {
    let cleaned: String = prompt.split_whitespace().collect::<Vec<_>>().join(" ");
    cleaned.chars().take(DESCRIPTION_MAX_CHARS).collect()
}
