//! Invocation building: the per-agent capability seam.
//!
//! The agent families are a tagged variant, not a class hierarchy:
//! extending Agor for a new agent means adding an [`AgentKind`] arm to
//! `build_spawn_spec` and `map_permission_mode`, nothing more.

use crate::error::{AgentError, AgentResult};
use crate::spawn::SpawnSpec;
use agor_core::{AgentKind, AgenticConfig, PermissionMode, Session, Timestamp};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::warn;

/// Directories every agent may touch beyond the worktree.
const EXTRA_ALLOWED_DIRS: &[&str] = &["/tmp", "/var/tmp"];

/// Parameters assembled by the kernel for one prompt.
#[derive(Debug, Clone)]
pub struct InvocationParams {
    /// Which agent family.
    pub kind: AgentKind,
    /// Model to run (already defaulted per agent).
    pub model: String,
    /// The agent's permission mode.
    pub permission_mode: PermissionMode,
    /// Worktree path.
    pub cwd: PathBuf,
    /// Thinking-token budget, when allocated.
    pub max_thinking_tokens: Option<u32>,
    /// The `--mcp-config` document, when any servers resolved.
    pub mcp_config: Option<serde_json::Value>,
    /// Pre-approved tool names.
    pub allowed_tools: Vec<String>,
    /// Resume behavior.
    pub resume: ResumeDirective,
    /// Full child environment (resolved env + api key + agent extras).
    pub env: BTreeMap<String, String>,
    /// Unix identity.
    pub uid: Option<u32>,
    /// Primary gid.
    pub gid: Option<u32>,
    /// Supplementary groups.
    pub supplementary_groups: Vec<u32>,
    /// Enumerated per-agent extras.
    pub agentic_config: AgenticConfig,
}

/// How the agent joins its prior conversation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResumeDirective {
    /// Start a new conversation.
    Fresh,
    /// Resume an existing conversation handle.
    Resume {
        /// The stored `sdk_session_id`.
        handle: String,
    },
    /// Resume the parent's handle, letting the agent mint a new one
    /// (fork).
    ResumeFork {
        /// The parent's `sdk_session_id`.
        handle: String,
    },
}

/// The outcome of the resume decision table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResumeDecision {
    /// What to pass to the agent.
    pub directive: ResumeDirective,
    /// The stored handle is stale or unusable and should be cleared.
    pub clear_stored_handle: bool,
}

/// Apply the resume/fork/spawn decision table.
///
/// | Session state | Action |
/// |---|---|
/// | own handle, fresh, has worktree | resume it |
/// | own handle, stale or worktreeless | clear it; fresh |
/// | forked, no own handle, parent has one | resume parent's with fork |
/// | spawned, no own handle | fresh — no history inheritance |
/// | otherwise | fresh |
#[must_use]
pub fn decide_resume(
    session: &Session,
    parent: Option<&Session>,
    has_worktree: bool,
    now: Timestamp,
    staleness: chrono::Duration,
) -> ResumeDecision {
    if let Some(handle) = &session.sdk_session_id {
        let fresh = session
            .sdk_session_captured_at
            .is_some_and(|at| now.since(at) < staleness);
        if fresh && has_worktree {
            return ResumeDecision {
                directive: ResumeDirective::Resume {
                    handle: handle.clone(),
                },
                clear_stored_handle: false,
            };
        }
        return ResumeDecision {
            directive: ResumeDirective::Fresh,
            clear_stored_handle: true,
        };
    }

    if session.genealogy.forked_from_session_id.is_some()
        && let Some(parent_handle) = parent.and_then(|p| p.sdk_session_id.clone())
    {
        return ResumeDecision {
            directive: ResumeDirective::ResumeFork {
                handle: parent_handle,
            },
            clear_stored_handle: false,
        };
    }

    // Pure spawns and everything else start clean.
    ResumeDecision {
        directive: ResumeDirective::Fresh,
        clear_stored_handle: false,
    }
}

/// Validate the working directory. Missing or non-directory paths are
/// fatal; a directory without `.git`, or an empty one, only warns.
///
/// # Errors
///
/// Returns [`AgentError::BadWorkdir`] when the path does not exist or
/// is not a directory.
pub fn validate_cwd(path: &Path) -> AgentResult<()> {
    if !path.exists() {
        return Err(AgentError::BadWorkdir {
            path: path.display().to_string(),
            reason: "does not exist".to_string(),
        });
    }
    if !path.is_dir() {
        return Err(AgentError::BadWorkdir {
            path: path.display().to_string(),
            reason: "not a directory".to_string(),
        });
    }

    if !path.join(".git").exists() {
        warn!(path = %path.display(), "worktree has no .git; proceeding anyway");
    }
    if path.read_dir().map(|mut d| d.next().is_none()).unwrap_or(false) {
        warn!(path = %path.display(), "worktree directory is empty; proceeding anyway");
    }
    Ok(())
}

/// Map the daemon permission mode onto the agent family's own flag
/// vocabulary.
#[must_use]
pub fn map_permission_mode(kind: AgentKind, mode: PermissionMode) -> &'static str {
    match kind {
        AgentKind::ClaudeCode => mode.as_str(),
        AgentKind::Codex => match mode {
            PermissionMode::Default | PermissionMode::Plan => "untrusted",
            PermissionMode::AcceptEdits => "on-request",
            PermissionMode::BypassPermissions => "never",
        },
        AgentKind::Gemini => match mode {
            PermissionMode::Default => "default",
            PermissionMode::AcceptEdits => "auto_edit",
            PermissionMode::BypassPermissions => "yolo",
            PermissionMode::Plan => "plan",
        },
    }
}

/// Build the full spawn spec for an invocation.
#[must_use]
pub fn build_spawn_spec(params: &InvocationParams) -> SpawnSpec {
    let mut env = params.env.clone();
    let args = match params.kind {
        AgentKind::ClaudeCode => claude_args(params, &mut env),
        AgentKind::Codex => codex_args(params, &mut env),
        AgentKind::Gemini => gemini_args(params, &mut env),
    };

    SpawnSpec {
        command: params.kind.binary().to_string(),
        args,
        env,
        cwd: params.cwd.clone(),
        uid: params.uid,
        gid: params.gid,
        supplementary_groups: params.supplementary_groups.clone(),
    }
}

fn claude_args(params: &InvocationParams, env: &mut BTreeMap<String, String>) -> Vec<String> {
    let mut args: Vec<String> = vec![
        "--print".into(),
        "--output-format".into(),
        "stream-json".into(),
        "--input-format".into(),
        "stream-json".into(),
        "--verbose".into(),
        "--include-partial-messages".into(),
        "--model".into(),
        params.model.clone(),
        "--permission-mode".into(),
        map_permission_mode(params.kind, params.permission_mode).into(),
    ];
    for dir in EXTRA_ALLOWED_DIRS {
        args.push("--add-dir".into());
        args.push((*dir).into());
    }
    if let Some(tokens) = params.max_thinking_tokens {
        env.insert("MAX_THINKING_TOKENS".into(), tokens.to_string());
    }
    if let Some(mcp) = &params.mcp_config {
        args.push("--mcp-config".into());
        args.push(mcp.to_string());
    }
    if !params.allowed_tools.is_empty() {
        args.push("--allowedTools".into());
        args.push(params.allowed_tools.join(","));
    }
    match &params.resume {
        ResumeDirective::Fresh => {},
        ResumeDirective::Resume { handle } => {
            args.push("--resume".into());
            args.push(handle.clone());
        },
        ResumeDirective::ResumeFork { handle } => {
            args.push("--resume".into());
            args.push(handle.clone());
            args.push("--fork-session".into());
        },
    }
    args
}

fn codex_args(params: &InvocationParams, _env: &mut BTreeMap<String, String>) -> Vec<String> {
    let mut args: Vec<String> = vec![
        "exec".into(),
        "--json".into(),
        "--model".into(),
        params.model.clone(),
    ];
    let sandbox = params
        .agentic_config
        .codex_sandbox_mode
        .clone()
        .unwrap_or_else(|| "workspace-write".to_string());
    args.push("--sandbox".into());
    args.push(sandbox);

    let approval = params
        .agentic_config
        .codex_approval_policy
        .clone()
        .unwrap_or_else(|| map_permission_mode(params.kind, params.permission_mode).to_string());
    args.push("--ask-for-approval".into());
    args.push(approval);

    if params.agentic_config.codex_network_access == Some(true) {
        args.push("--config".into());
        args.push("sandbox_workspace_write.network_access=true".into());
    }
    match &params.resume {
        ResumeDirective::Fresh => {},
        ResumeDirective::Resume { handle } | ResumeDirective::ResumeFork { handle } => {
            args.push("resume".into());
            args.push(handle.clone());
        },
    }
    args
}

fn gemini_args(params: &InvocationParams, _env: &mut BTreeMap<String, String>) -> Vec<String> {
    let mut args: Vec<String> = vec![
        "--output-format".into(),
        "stream-json".into(),
        "--model".into(),
        params.model.clone(),
        "--approval-mode".into(),
        map_permission_mode(params.kind, params.permission_mode).into(),
    ];
    match &params.resume {
        ResumeDirective::Fresh => {},
        ResumeDirective::Resume { handle } | ResumeDirective::ResumeFork { handle } => {
            args.push("--resume".into());
            args.push(handle.clone());
        },
    }
    args
}

#[cfg(test)]
mod tests {
    use super::*;
    use agor_core::{SessionId, UserId, WorktreeId};

    fn session() -> Session {
        Session::new(
            WorktreeId::generate(),
            UserId::generate(),
            AgentKind::ClaudeCode,
            "tok",
        )
    }

    fn params(resume: ResumeDirective) -> InvocationParams {
        InvocationParams {
            kind: AgentKind::ClaudeCode,
            model: "claude-sonnet-4-5".into(),
            permission_mode: PermissionMode::Default,
            cwd: "/srv/wt".into(),
            max_thinking_tokens: None,
            mcp_config: None,
            allowed_tools: vec![],
            resume,
            env: BTreeMap::new(),
            uid: Some(10_000),
            gid: Some(10_000),
            supplementary_groups: vec![5_000],
            agentic_config: AgenticConfig::default(),
        }
    }

    #[test]
    fn fresh_session_spawns_fresh() {
        let s = session();
        let d = decide_resume(
            &s,
            None,
            true,
            Timestamp::now(),
            chrono::Duration::hours(24),
        );
        assert_eq!(d.directive, ResumeDirective::Fresh);
        assert!(!d.clear_stored_handle);
    }

    #[test]
    fn own_fresh_handle_resumes() {
        let mut s = session();
        s.sdk_session_id = Some("sdk-1".into());
        s.sdk_session_captured_at = Some(Timestamp::now());
        let d = decide_resume(
            &s,
            None,
            true,
            Timestamp::now(),
            chrono::Duration::hours(24),
        );
        assert_eq!(
            d.directive,
            ResumeDirective::Resume {
                handle: "sdk-1".into()
            }
        );
    }

    #[test]
    fn stale_handle_clears_and_starts_fresh() {
        let mut s = session();
        s.sdk_session_id = Some("sdk-1".into());
        let captured = Timestamp::now();
        s.sdk_session_captured_at = Some(captured);

        let later = Timestamp(captured.0 + chrono::Duration::hours(25));
        let d = decide_resume(&s, None, true, later, chrono::Duration::hours(24));
        assert_eq!(d.directive, ResumeDirective::Fresh);
        assert!(d.clear_stored_handle);

        // Worktreeless sessions clear too, even when fresh.
        let d = decide_resume(
            &s,
            None,
            false,
            Timestamp(captured.0 + chrono::Duration::minutes(1)),
            chrono::Duration::hours(24),
        );
        assert!(d.clear_stored_handle);
    }

    #[test]
    fn fork_resumes_parent_handle() {
        let mut parent = session();
        parent.sdk_session_id = Some("parent-sdk".into());

        let mut child = session();
        child.genealogy.forked_from_session_id = Some(parent.id);

        let d = decide_resume(
            &child,
            Some(&parent),
            true,
            Timestamp::now(),
            chrono::Duration::hours(24),
        );
        assert_eq!(
            d.directive,
            ResumeDirective::ResumeFork {
                handle: "parent-sdk".into()
            }
        );
    }

    #[test]
    fn spawn_never_inherits_history() {
        let mut parent = session();
        parent.sdk_session_id = Some("parent-sdk".into());

        let mut child = session();
        child.genealogy.parent_session_id = Some(SessionId::generate());

        let d = decide_resume(
            &child,
            Some(&parent),
            true,
            Timestamp::now(),
            chrono::Duration::hours(24),
        );
        assert_eq!(d.directive, ResumeDirective::Fresh);
        assert!(!d.clear_stored_handle);
    }

    #[test]
    fn claude_args_carry_the_contract() {
        let mut p = params(ResumeDirective::ResumeFork {
            handle: "sdk-9".into(),
        });
        p.max_thinking_tokens = Some(10_000);
        p.allowed_tools = vec!["mcp__fs__read_file".into(), "Bash".into()];
        p.mcp_config = Some(serde_json::json!({"mcpServers": {}}));

        let spec = build_spawn_spec(&p);
        assert_eq!(spec.command, "claude");
        let joined = spec.args.join(" ");
        assert!(joined.contains("--output-format stream-json"));
        assert!(joined.contains("--permission-mode default"));
        assert!(joined.contains("--add-dir /tmp"));
        assert!(joined.contains("--add-dir /var/tmp"));
        assert!(joined.contains("--allowedTools mcp__fs__read_file,Bash"));
        assert!(joined.contains("--resume sdk-9"));
        assert!(joined.contains("--fork-session"));
        assert_eq!(
            spec.env.get("MAX_THINKING_TOKENS").map(String::as_str),
            Some("10000")
        );
        assert_eq!(spec.uid, Some(10_000));
        assert_eq!(spec.supplementary_groups, vec![5_000]);
    }

    #[test]
    fn codex_args_use_sandbox_knobs() {
        let mut p = params(ResumeDirective::Fresh);
        p.kind = AgentKind::Codex;
        p.model = "gpt-5-codex".into();
        p.agentic_config.codex_sandbox_mode = Some("read-only".into());
        p.agentic_config.codex_network_access = Some(true);

        let spec = build_spawn_spec(&p);
        assert_eq!(spec.command, "codex");
        let joined = spec.args.join(" ");
        assert!(joined.contains("--sandbox read-only"));
        assert!(joined.contains("network_access=true"));
    }

    #[test]
    fn cwd_validation() {
        let dir = tempfile_dir();
        validate_cwd(&dir).unwrap();

        let missing = dir.join("nope");
        assert!(matches!(
            validate_cwd(&missing),
            Err(AgentError::BadWorkdir { .. })
        ));
    }

    fn tempfile_dir() -> PathBuf {
        let dir = std::env::temp_dir().join(format!("agor-cwd-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }
}
