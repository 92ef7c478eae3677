//! The session kernel.

use crate::claude_md::append_session_context;
use crate::error::{KernelError, KernelResult};
use crate::state::ensure_transition;
use agor_agent::{
    AgentDriver, AgentEvent, CompletedBlock, CompletedRole, EndReason, ResumeDecision,
    build_spawn_spec, decide_resume, wire,
};
use agor_approval::{Decision, PermissionArbiter, Verdict};
use agor_core::{
    AgentKind, BroadcastEvent, Broadcaster, Clock, GitState, MessageContent, MessageRole,
    RequestId, Session, SessionId, SessionStatus, Task, TaskId, TaskStatus, UserId,
};
use agor_mcp::McpResolver;
use agor_secrets::SecretResolver;
use agor_store::{EntityStore as _, Stores};
use agor_unix::UnixController;
use dashmap::DashMap;
use rand::RngCore as _;
use serde_json::json;
use std::collections::BTreeSet;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Kernel configuration.
#[derive(Debug, Clone)]
pub struct KernelConfig {
    /// Maintain the `CLAUDE.md` session-context section per worktree.
    pub maintain_claude_md: bool,
    /// Snapshot git state onto each task.
    pub capture_git_state: bool,
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self {
            maintain_claude_md: true,
            capture_git_state: true,
        }
    }
}

/// Owns sessions: their state machine, tasks, genealogy, and the
/// per-prompt execution loop.
pub struct SessionKernel {
    stores: Arc<Stores>,
    arbiter: Arc<PermissionArbiter>,
    mcp: Arc<McpResolver>,
    secrets: Arc<SecretResolver>,
    unix: Arc<UnixController>,
    driver: Arc<AgentDriver>,
    broadcaster: Arc<dyn Broadcaster>,
    clock: Arc<dyn Clock>,
    config: KernelConfig,
    /// In-flight prompt cancellation tokens, one per busy session.
    cancels: DashMap<SessionId, CancellationToken>,
}

impl SessionKernel {
    /// Wire up a kernel.
    #[allow(clippy::too_many_arguments)]
    #[must_use]
    pub fn new(
        stores: Arc<Stores>,
        arbiter: Arc<PermissionArbiter>,
        mcp: Arc<McpResolver>,
        secrets: Arc<SecretResolver>,
        unix: Arc<UnixController>,
        driver: Arc<AgentDriver>,
        broadcaster: Arc<dyn Broadcaster>,
        clock: Arc<dyn Clock>,
        config: KernelConfig,
    ) -> Self {
        Self {
            stores,
            arbiter,
            mcp,
            secrets,
            unix,
            driver,
            broadcaster,
            clock,
            config,
            cancels: DashMap::new(),
        }
    }

    /// The stores this kernel works over.
    #[must_use]
    pub fn stores(&self) -> &Arc<Stores> {
        &self.stores
    }

    // ------------------------------------------------------------------
    // Session lifecycle
    // ------------------------------------------------------------------

    /// Open a fresh session in a worktree.
    ///
    /// # Errors
    ///
    /// Fails when the worktree cannot be resolved or the session cannot
    /// be persisted.
    pub async fn create_session(
        &self,
        worktree_ref: &str,
        created_by: UserId,
        agentic_tool: AgentKind,
    ) -> KernelResult<Session> {
        let worktree = self.stores.worktrees.find_by_id(worktree_ref).await?;
        let session = Session::new(worktree.id, created_by, agentic_tool, mint_mcp_token());
        let session = self.stores.create_session(session).await?;

        if self.config.maintain_claude_md
            && let Err(e) = append_session_context(&worktree.path, session.id)
        {
            warn!(session = %session.id, error = %e, "could not write CLAUDE.md session context");
        }

        info!(session = %session.id, worktree = %worktree.id, agent = %agentic_tool,
            "session created");
        Ok(session)
    }

    /// Fork a session: the child continues the parent's agent
    /// conversation from `at_task` (default: the parent's latest task).
    ///
    /// # Errors
    ///
    /// Fails when the parent cannot be resolved or persistence fails.
    pub async fn fork(&self, parent_ref: &str, at_task: Option<TaskId>) -> KernelResult<Session> {
        let parent = self.stores.sessions.find_by_id(parent_ref).await?;
        let mut session = Session::new(
            parent.worktree_id,
            parent.created_by,
            parent.agentic_tool,
            mint_mcp_token(),
        );
        session.genealogy.forked_from_session_id = Some(parent.id);
        session.genealogy.fork_point_task_id = at_task.or_else(|| parent.tasks.last().copied());
        let session = self.stores.create_session(session).await?;
        info!(parent = %parent.id, child = %session.id, "session forked");
        Ok(session)
    }

    /// Spawn a child session: ancestry metadata only, no conversation
    /// history, fresh agent session.
    ///
    /// # Errors
    ///
    /// Fails when the parent cannot be resolved or persistence fails.
    pub async fn spawn(&self, parent_ref: &str, at_task: Option<TaskId>) -> KernelResult<Session> {
        let parent = self.stores.sessions.find_by_id(parent_ref).await?;
        let mut session = Session::new(
            parent.worktree_id,
            parent.created_by,
            parent.agentic_tool,
            mint_mcp_token(),
        );
        session.genealogy.parent_session_id = Some(parent.id);
        session.genealogy.spawn_point_task_id = at_task.or_else(|| parent.tasks.last().copied());
        let session = self.stores.create_session(session).await?;
        info!(parent = %parent.id, child = %session.id, "session spawned");
        Ok(session)
    }

    /// Cancel a session's in-flight prompt, if any. Returns whether a
    /// prompt was actually cancelled.
    ///
    /// # Errors
    ///
    /// Fails when the session cannot be resolved.
    pub async fn stop(&self, session_ref: &str) -> KernelResult<bool> {
        let session = self.stores.sessions.find_by_id(session_ref).await?;
        match self.cancels.get(&session.id) {
            Some(token) => {
                token.cancel();
                info!(session = %session.id, "stop requested");
                Ok(true)
            },
            None => Ok(false),
        }
    }

    /// Archive the session's worktree when requested. Session state is
    /// untouched either way.
    ///
    /// # Errors
    ///
    /// Fails when the session cannot be resolved or the update fails.
    pub async fn archive(&self, session_ref: &str, archive_worktree: bool) -> KernelResult<()> {
        let session = self.stores.sessions.find_by_id(session_ref).await?;
        if archive_worktree {
            self.stores
                .worktrees
                .update(session.worktree_id.as_id(), json!({ "archived": true }))
                .await?;
        }
        Ok(())
    }

    /// Direct children (spawns and forks) of a session. Accepts short
    /// ids.
    ///
    /// # Errors
    ///
    /// Propagates lookup failures.
    pub async fn find_children(&self, session_ref: &str) -> KernelResult<Vec<Session>> {
        Ok(self.stores.find_children(session_ref).await?)
    }

    /// Ancestors of a session, nearest first. Accepts short ids.
    ///
    /// # Errors
    ///
    /// Propagates lookup failures; a genealogy cycle is an error.
    pub async fn find_ancestors(&self, session_ref: &str) -> KernelResult<Vec<Session>> {
        Ok(self.stores.find_ancestors(session_ref).await?)
    }

    /// Deliver a permission decision (the transport's single entry
    /// point).
    ///
    /// # Errors
    ///
    /// Fails when the request is unknown or already decided.
    pub async fn decide(&self, request_id: RequestId, decision: Decision) -> KernelResult<()> {
        Ok(self.arbiter.decide(request_id, decision).await?)
    }

    // ------------------------------------------------------------------
    // Prompt execution
    // ------------------------------------------------------------------

    /// Start a prompt on a session. Validates the session is not
    /// already driving one, mints the task, and returns immediately;
    /// progress is observed through the broadcaster.
    ///
    /// # Errors
    ///
    /// Fails when the session is busy or persistence fails.
    pub async fn send_prompt(
        self: &Arc<Self>,
        session_ref: &str,
        text: &str,
    ) -> KernelResult<TaskId> {
        let session = self.stores.sessions.find_by_id(session_ref).await?;
        if !session.status.accepts_prompt() {
            return Err(KernelError::SessionBusy {
                session_id: session.id.to_string(),
                status: session.status,
            });
        }
        let worktree = self
            .stores
            .worktrees
            .get(session.worktree_id.as_id())
            .await?;

        let mut task = Task::new(session.id, text, session.message_count);
        task.model = Some(self.model_for(&session));
        if self.config.capture_git_state {
            task.git_state = GitState::capture(&worktree.path);
        }
        let task = self.stores.tasks.create(task).await?;

        let mut tasks = session.tasks.clone();
        tasks.push(task.id);
        ensure_transition(session.status, SessionStatus::Running)?;
        self.stores
            .sessions
            .update(
                session.id.as_id(),
                json!({ "tasks": tasks, "status": SessionStatus::Running }),
            )
            .await?;
        self.broadcaster.emit_to_session(
            session.id,
            &BroadcastEvent::SessionStatus {
                session_id: session.id,
                status: SessionStatus::Running,
            },
        );

        // The prompt itself is message zero of the task's range.
        let message = self
            .stores
            .append_message(
                session.id,
                task.id,
                MessageRole::User,
                MessageContent::Text {
                    text: text.to_string(),
                },
            )
            .await?;
        self.broadcaster
            .emit_to_session(session.id, &BroadcastEvent::MessageAppended { message });

        self.set_task_status(session.id, task.id, TaskStatus::Running)
            .await?;

        let cancel = CancellationToken::new();
        self.cancels.insert(session.id, cancel.clone());

        let kernel = Arc::clone(self);
        let session_id = session.id;
        let task_id = task.id;
        let prompt = text.to_string();
        tokio::spawn(async move {
            kernel.run_prompt(session_id, task_id, prompt, cancel).await;
        });

        Ok(task.id)
    }

    /// The outer prompt runner: drives the prompt and guarantees the
    /// session lands in a terminal state and the cancel token is
    /// cleared, whatever happens inside.
    async fn run_prompt(
        self: Arc<Self>,
        session_id: SessionId,
        task_id: TaskId,
        prompt: String,
        cancel: CancellationToken,
    ) {
        if let Err(e) = self
            .drive_prompt(session_id, task_id, &prompt, &cancel)
            .await
        {
            warn!(session = %session_id, task = %task_id, error = %e, "prompt failed");
            let report = e.to_string();
            if let Err(e) = self
                .finish_task(session_id, task_id, TaskStatus::Failed, Some(report))
                .await
            {
                warn!(task = %task_id, error = %e, "could not record task failure");
            }
            if let Err(e) = self
                .set_session_status(session_id, SessionStatus::Failed)
                .await
            {
                warn!(session = %session_id, error = %e, "could not record session failure");
            }
        }
        self.cancels.remove(&session_id);
    }

    /// Assemble invocation parameters, spawn the agent, and pump its
    /// event stream to completion.
    async fn drive_prompt(
        &self,
        session_id: SessionId,
        task_id: TaskId,
        prompt: &str,
        cancel: &CancellationToken,
    ) -> KernelResult<()> {
        let mut session = self.stores.sessions.get(session_id.as_id()).await?;
        let worktree = self
            .stores
            .worktrees
            .get(session.worktree_id.as_id())
            .await?;
        let user = self.stores.users.get(session.created_by.as_id()).await?;

        // Thinking budget, MCP composition, secrets.
        let thinking = agor_agent::resolve_thinking_budget(prompt, &session.model_config);
        let resolved_mcp = self.mcp.assemble_servers(&session).await?;
        let mut env = self.secrets.resolve_env(&user);
        if let Some(key) = self
            .secrets
            .resolve_api_key(session.agentic_tool.vendor(), &user)
        {
            env.insert(session.agentic_tool.api_key_env().to_string(), key);
        }

        // Unix identity: run as the owning user, in the worktree group
        // and the agor group.
        let (_username, uid) = self.unix.ensure_user(user.id).await?;
        self.unix
            .add_user_to_worktree_group(worktree.id, user.id)
            .await?;
        let worktree_gid = self.unix.resolve_gid(&worktree.unix_group()).await?;
        let agor_gid = self
            .unix
            .resolve_gid(&self.unix.config().agor_group)
            .await?;

        // Resume decision; stale handles are cleared before spawn.
        let parent = match session.genealogy.predecessor() {
            Some(parent_id) => Some(self.stores.sessions.get(parent_id.as_id()).await?),
            None => None,
        };
        let ResumeDecision {
            directive,
            clear_stored_handle,
        } = decide_resume(
            &session,
            parent.as_ref(),
            true,
            self.clock.now(),
            self.driver.config().resume_staleness,
        );
        if clear_stored_handle {
            session = self
                .stores
                .sessions
                .update(
                    session_id.as_id(),
                    json!({ "sdk_session_id": null, "sdk_session_captured_at": null }),
                )
                .await?;
        }

        let mut allowed_tools: BTreeSet<String> = resolved_mcp.allowed_tools.clone();
        allowed_tools.extend(session.permission_config.allowed_tools.iter().cloned());

        let params = agor_agent::InvocationParams {
            kind: session.agentic_tool,
            model: self.model_for(&session),
            permission_mode: session.permission_config.mode,
            cwd: worktree.path.clone(),
            max_thinking_tokens: thinking,
            mcp_config: if resolved_mcp.servers.is_empty() {
                None
            } else {
                Some(resolved_mcp.to_mcp_config_json())
            },
            allowed_tools: allowed_tools.into_iter().collect(),
            resume: directive,
            env,
            uid: Some(uid),
            gid: Some(uid),
            supplementary_groups: vec![worktree_gid, agor_gid],
            agentic_config: session.agentic_config.clone(),
        };
        let spec = build_spawn_spec(&params);

        let mut handle = self
            .driver
            .run(
                spec,
                Some(wire::user_prompt_frame(prompt)),
                session.sdk_session_id.clone(),
                cancel.clone(),
            )
            .await?;

        // Pump the stream.
        let mut result_ok = false;
        let mut result_seen = false;
        while let Some(event) = handle.next_event().await {
            match event {
                AgentEvent::SessionIdCaptured { handle } => {
                    // Persisted immediately: the next prompt may resume.
                    self.stores
                        .sessions
                        .update(
                            session_id.as_id(),
                            json!({
                                "sdk_session_id": handle,
                                "sdk_session_captured_at": self.clock.now(),
                            }),
                        )
                        .await?;
                },
                AgentEvent::Partial { text } => {
                    self.broadcaster.emit_to_session(
                        session_id,
                        &BroadcastEvent::Partial { session_id, text },
                    );
                },
                AgentEvent::MessageStart | AgentEvent::MessageComplete => {},
                AgentEvent::ToolStart {
                    name,
                    tool_use_id,
                    input,
                } => {
                    self.bump_tool_counts(session_id, task_id).await?;

                    self.set_session_status(session_id, SessionStatus::AwaitingPermission)
                        .await?;
                    let verdict = self
                        .arbiter
                        .pre_tool_use(
                            session_id,
                            task_id,
                            &name,
                            input,
                            tool_use_id.clone(),
                            cancel,
                        )
                        .await;
                    // Denials fail the task but the agent continues; the
                    // session returns to running either way.
                    self.set_session_status(session_id, SessionStatus::Running)
                        .await?;

                    let frame = permission_response_frame(tool_use_id.as_deref(), &verdict);
                    if !handle.send_frame(frame).await {
                        warn!(session = %session_id, "agent gone before permission response");
                    }
                },
                AgentEvent::ToolComplete { .. } => {},
                AgentEvent::Complete { role, blocks } => {
                    self.persist_blocks(session_id, task_id, role, blocks)
                        .await?;
                },
                AgentEvent::Result(summary) => {
                    result_seen = true;
                    result_ok = !summary.is_error && summary.subtype == "success";
                    let session_now = self.stores.sessions.get(session_id.as_id()).await?;
                    let status = if result_ok {
                        TaskStatus::Completed
                    } else {
                        TaskStatus::Failed
                    };
                    self.stores
                        .tasks
                        .update(
                            task_id.as_id(),
                            json!({
                                "status": status,
                                "message_range": {
                                    "end_index": session_now.message_count.saturating_sub(1),
                                    "end_ts": self.clock.now(),
                                },
                                "updated_at": self.clock.now(),
                            }),
                        )
                        .await?;
                    self.broadcaster.emit_to_session(
                        session_id,
                        &BroadcastEvent::AgentResult {
                            session_id,
                            task_id,
                            subtype: summary.subtype.clone(),
                            cost_usd: summary.cost_usd,
                            duration_ms: summary.duration_ms,
                        },
                    );
                },
                AgentEvent::End { reason } => {
                    self.finish_prompt(session_id, task_id, &reason, result_seen, result_ok)
                        .await?;
                    break;
                },
            }
        }
        Ok(())
    }

    /// Settle session and task when the stream ends.
    async fn finish_prompt(
        &self,
        session_id: SessionId,
        task_id: TaskId,
        reason: &EndReason,
        result_seen: bool,
        result_ok: bool,
    ) -> KernelResult<()> {
        match reason {
            EndReason::Result => {
                let status = if result_ok {
                    SessionStatus::Completed
                } else {
                    SessionStatus::Failed
                };
                self.set_session_status(session_id, status).await?;
            },
            EndReason::Timeout => {
                self.finish_task(
                    session_id,
                    task_id,
                    TaskStatus::Failed,
                    Some("idle timeout".to_string()),
                )
                .await?;
                self.set_session_status(session_id, SessionStatus::Failed)
                    .await?;
            },
            EndReason::StopRequested => {
                // Completed if the result already arrived, else failed.
                if result_seen {
                    self.set_session_status(session_id, SessionStatus::Completed)
                        .await?;
                } else {
                    self.finish_task(
                        session_id,
                        task_id,
                        TaskStatus::Failed,
                        Some("stopped before completion".to_string()),
                    )
                    .await?;
                    self.set_session_status(session_id, SessionStatus::Failed)
                        .await?;
                }
            },
            EndReason::AgentExit { exitcode, stderr } => {
                self.finish_task(
                    session_id,
                    task_id,
                    TaskStatus::Failed,
                    Some(format!("agent exited with {exitcode}: {stderr}")),
                )
                .await?;
                self.set_session_status(session_id, SessionStatus::Failed)
                    .await?;
            },
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Helpers
    // ------------------------------------------------------------------

    fn model_for(&self, session: &Session) -> String {
        session
            .model_config
            .model
            .clone()
            .unwrap_or_else(|| session.agentic_tool.default_model().to_string())
    }

    async fn persist_blocks(
        &self,
        session_id: SessionId,
        task_id: TaskId,
        role: CompletedRole,
        blocks: Vec<CompletedBlock>,
    ) -> KernelResult<()> {
        for block in blocks {
            let (msg_role, content) = match block {
                CompletedBlock::Text { text } => {
                    let msg_role = match role {
                        CompletedRole::Assistant => MessageRole::Assistant,
                        CompletedRole::User => MessageRole::User,
                    };
                    (msg_role, MessageContent::Text { text })
                },
                CompletedBlock::ToolUse { id, name, input } => (
                    MessageRole::Assistant,
                    MessageContent::ToolUse {
                        tool_name: name,
                        tool_use_id: Some(id),
                        input,
                    },
                ),
                CompletedBlock::ToolResult {
                    tool_use_id,
                    content,
                    is_error,
                } => (
                    MessageRole::User,
                    MessageContent::ToolResult {
                        tool_use_id: Some(tool_use_id),
                        content,
                        is_error,
                    },
                ),
            };
            let message = self
                .stores
                .append_message(session_id, task_id, msg_role, content)
                .await?;
            self.broadcaster
                .emit_to_session(session_id, &BroadcastEvent::MessageAppended { message });
        }
        Ok(())
    }

    async fn bump_tool_counts(
        &self,
        session_id: SessionId,
        task_id: TaskId,
    ) -> KernelResult<()> {
        let session = self.stores.sessions.get(session_id.as_id()).await?;
        self.stores
            .sessions
            .update(
                session_id.as_id(),
                json!({ "tool_use_count": session.tool_use_count.saturating_add(1) }),
            )
            .await?;
        let task = self.stores.tasks.get(task_id.as_id()).await?;
        self.stores
            .tasks
            .update(
                task_id.as_id(),
                json!({ "tool_use_count": task.tool_use_count.saturating_add(1) }),
            )
            .await?;
        Ok(())
    }

    async fn set_session_status(
        &self,
        session_id: SessionId,
        to: SessionStatus,
    ) -> KernelResult<()> {
        let session = self.stores.sessions.get(session_id.as_id()).await?;
        ensure_transition(session.status, to)?;
        self.stores
            .sessions
            .update(session_id.as_id(), json!({ "status": to }))
            .await?;
        self.broadcaster.emit_to_session(
            session_id,
            &BroadcastEvent::SessionStatus {
                session_id,
                status: to,
            },
        );
        Ok(())
    }

    async fn set_task_status(
        &self,
        session_id: SessionId,
        task_id: TaskId,
        status: TaskStatus,
    ) -> KernelResult<()> {
        self.stores
            .tasks
            .update(
                task_id.as_id(),
                json!({ "status": status, "updated_at": self.clock.now() }),
            )
            .await?;
        self.broadcaster.emit_to_session(
            session_id,
            &BroadcastEvent::TaskStatus {
                session_id,
                task_id,
                status,
            },
        );
        Ok(())
    }

    async fn finish_task(
        &self,
        session_id: SessionId,
        task_id: TaskId,
        status: TaskStatus,
        report: Option<String>,
    ) -> KernelResult<()> {
        let session = self.stores.sessions.get(session_id.as_id()).await?;
        self.stores
            .tasks
            .update(
                task_id.as_id(),
                json!({
                    "status": status,
                    "report": report,
                    "message_range": {
                        "end_index": session.message_count.saturating_sub(1),
                        "end_ts": self.clock.now(),
                    },
                    "updated_at": self.clock.now(),
                }),
            )
            .await?;
        self.broadcaster.emit_to_session(
            session_id,
            &BroadcastEvent::TaskStatus {
                session_id,
                task_id,
                status,
            },
        );
        Ok(())
    }
}

impl std::fmt::Debug for SessionKernel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionKernel")
            .field("config", &self.config)
            .field("busy_sessions", &self.cancels.len())
            .finish_non_exhaustive()
    }
}

/// An opaque bearer the session's self-access MCP server authenticates
/// with.
fn mint_mcp_token() -> String {
    let mut bytes = [0u8; 24];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// The stdin frame answering an agent's tool-permission request.
fn permission_response_frame(tool_use_id: Option<&str>, verdict: &Verdict) -> String {
    let (behavior, message) = match verdict {
        Verdict::Allow { reason } => ("allow", reason.as_str()),
        Verdict::Deny { reason } => ("deny", reason.as_str()),
    };
    json!({
        "type": "control_response",
        "response": {
            "subtype": "permission",
            "tool_use_id": tool_use_id,
            "behavior": behavior,
            "message": message,
        },
    })
    .to_string()
}
