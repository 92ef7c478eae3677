//! The permission arbiter.
//!
//! Concurrency contract: at most one in-flight permission request per
//! session; multiple sessions proceed in parallel. Callers queueing
//! behind the per-session lock re-read the session config once they
//! hold it — a prior request may have granted a session-scope allow for
//! the same tool, in which case they short-circuit without prompting.

use crate::decision::{Decision, Verdict};
use crate::error::{ApprovalError, ApprovalResult};
use crate::settings::update_project_settings;
use agor_core::{
    BroadcastEvent, Broadcaster, MessageContent, MessageId, MessageRole, PermissionRequest,
    PermissionScope, PermissionStatus, RequestId, SessionId, TaskId, TaskStatus, Timestamp,
};
use agor_store::{EntityStore as _, Stores};
use dashmap::DashMap;
use serde_json::json;
use std::collections::BTreeSet;
use std::sync::Arc;
use tokio::sync::{Mutex, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

struct PendingDecision {
    tx: Mutex<Option<oneshot::Sender<Decision>>>,
}

/// Serialises permission prompts per session and persists decisions by
/// scope.
///
/// One arbiter exists per daemon process; the lock map and the pending
/// map are process singletons living inside it (no module-level state).
pub struct PermissionArbiter {
    stores: Arc<Stores>,
    broadcaster: Arc<dyn Broadcaster>,
    locks: DashMap<SessionId, Arc<Mutex<()>>>,
    pending: DashMap<RequestId, Arc<PendingDecision>>,
}

impl PermissionArbiter {
    /// Create an arbiter.
    #[must_use]
    pub fn new(stores: Arc<Stores>, broadcaster: Arc<dyn Broadcaster>) -> Self {
        Self {
            stores,
            broadcaster,
            locks: DashMap::new(),
            pending: DashMap::new(),
        }
    }

    /// Gate one tool invocation.
    ///
    /// Awaits any in-flight request on the same session, re-reads the
    /// session config, and either short-circuits on a remembered allow
    /// or prompts every viewer and awaits the first decision. Any
    /// internal failure resolves conservatively to a deny and forces
    /// the task to `failed`; the lock is released on every path.
    pub async fn pre_tool_use(
        &self,
        session_id: SessionId,
        task_id: TaskId,
        tool_name: &str,
        tool_input: serde_json::Value,
        tool_use_id: Option<String>,
        cancel: &CancellationToken,
    ) -> Verdict {
        // Step 1: serialise per session. Waiting here means a prior
        // request for this session is still undecided.
        let lock = self
            .locks
            .entry(session_id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let _guard = lock.lock().await;

        // Step 2: re-read now that we hold the lock; the prior holder
        // may have written a session-scope grant for this tool.
        let created_by = match self.stores.sessions.get(session_id.as_id()).await {
            Ok(session) if session.permission_config.allows(tool_name) => {
                return Verdict::Allow {
                    reason: "session config".to_string(),
                };
            },
            Ok(session) => session.created_by,
            Err(e) => {
                return self
                    .fail_conservatively(session_id, task_id, format!("session read failed: {e}"))
                    .await;
            },
        };

        // Steps 3-7, with the conservative-deny policy on any error.
        match self
            .prompt_and_await(
                session_id,
                task_id,
                tool_name,
                tool_input,
                tool_use_id,
                created_by,
                cancel,
            )
            .await
        {
            Ok(verdict) => verdict,
            Err(e) => {
                self.fail_conservatively(session_id, task_id, e.to_string())
                    .await
            },
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn prompt_and_await(
        &self,
        session_id: SessionId,
        task_id: TaskId,
        tool_name: &str,
        tool_input: serde_json::Value,
        tool_use_id: Option<String>,
        created_by: agor_core::UserId,
        cancel: &CancellationToken,
    ) -> ApprovalResult<Verdict> {
        // Step 3: persist the request and its pending message, move the
        // task to awaiting_permission, and prompt every viewer.
        let request = PermissionRequest::new(
            session_id,
            task_id,
            tool_name,
            tool_input.clone(),
            tool_use_id,
        );
        let request_id = request.id;
        let request = self.stores.permission_requests.create(request).await?;

        let message = self
            .stores
            .append_message(
                session_id,
                task_id,
                MessageRole::System,
                MessageContent::PermissionRequest {
                    request_id,
                    tool_name: tool_name.to_string(),
                    tool_input: tool_input.clone(),
                    status: PermissionStatus::Pending,
                    scope: None,
                    decided_by: None,
                },
            )
            .await?;

        self.set_task_status(session_id, task_id, TaskStatus::AwaitingPermission)
            .await?;

        let (tx, rx) = oneshot::channel();
        self.pending.insert(
            request_id,
            Arc::new(PendingDecision {
                tx: Mutex::new(Some(tx)),
            }),
        );

        self.broadcaster.emit_to_session(
            session_id,
            &BroadcastEvent::MessageAppended {
                message: message.clone(),
            },
        );
        self.broadcaster.emit_to_session(
            session_id,
            &BroadcastEvent::PermissionRequested {
                session_id,
                request_id,
                tool_name: tool_name.to_string(),
                tool_input,
            },
        );
        info!(session = %session_id, tool = tool_name, request = %request_id,
            "permission requested");

        // Step 4: first decision wins; cancellation denies.
        let decision = tokio::select! {
            decision = rx => decision.ok(),
            () = cancel.cancelled() => None,
        };
        self.pending.remove(&request_id);

        let decision = decision.unwrap_or(Decision {
            allow: false,
            remember: false,
            scope: PermissionScope::Once,
            decided_by: created_by,
            reason: Some("cancelled".to_string()),
        });

        // Steps 5-6: patch the message and request, persist remembered
        // grants, settle the task.
        self.resolve(session_id, task_id, &request, message.id, tool_name, &decision)
            .await?;

        Ok(if decision.allow {
            Verdict::Allow {
                reason: decision
                    .reason
                    .unwrap_or_else(|| "approved by user".to_string()),
            }
        } else {
            Verdict::Deny {
                reason: decision
                    .reason
                    .unwrap_or_else(|| "denied by user".to_string()),
            }
        })
    }

    async fn resolve(
        &self,
        session_id: SessionId,
        task_id: TaskId,
        request: &PermissionRequest,
        message_id: MessageId,
        tool_name: &str,
        decision: &Decision,
    ) -> ApprovalResult<()> {
        let status = if decision.allow {
            PermissionStatus::Approved
        } else {
            PermissionStatus::Denied
        };

        self.stores
            .patch_message(
                message_id,
                json!({
                    "content": {
                        "status": status,
                        "scope": decision.scope,
                        "decided_by": decision.decided_by,
                    }
                }),
            )
            .await?;

        self.stores
            .permission_requests
            .update(
                request.id.as_id(),
                json!({
                    "status": status,
                    "decided_by": decision.decided_by,
                    "decided_at": Timestamp::now(),
                    "scope": decision.scope,
                    "remember": decision.remember,
                }),
            )
            .await?;

        if decision.allow && decision.remember {
            self.persist_grant(session_id, tool_name, decision.scope)
                .await?;
        }

        let task_status = if decision.allow {
            TaskStatus::Running
        } else {
            TaskStatus::Failed
        };
        self.set_task_status(session_id, task_id, task_status).await?;

        self.broadcaster.emit_to_session(
            session_id,
            &BroadcastEvent::PermissionResolved {
                session_id,
                request_id: request.id,
                approved: decision.allow,
                scope: decision.scope,
                decided_by: decision.decided_by,
            },
        );
        info!(session = %session_id, request = %request.id, approved = decision.allow,
            scope = ?decision.scope, "permission resolved");
        Ok(())
    }

    /// Persist a remembered grant at its scope.
    async fn persist_grant(
        &self,
        session_id: SessionId,
        tool_name: &str,
        scope: PermissionScope,
    ) -> ApprovalResult<()> {
        match scope {
            PermissionScope::Once => Ok(()),
            PermissionScope::Session => {
                // Re-read before writing: the config may have moved
                // while the prompt was pending.
                let session = self.stores.sessions.get(session_id.as_id()).await?;
                let mut allowed: BTreeSet<String> =
                    session.permission_config.allowed_tools.clone();
                allowed.insert(tool_name.to_string());
                self.stores
                    .sessions
                    .update(
                        session_id.as_id(),
                        json!({ "permission_config": { "allowed_tools": allowed } }),
                    )
                    .await?;
                Ok(())
            },
            PermissionScope::Project => {
                let session = self.stores.sessions.get(session_id.as_id()).await?;
                let worktree = self
                    .stores
                    .worktrees
                    .get(session.worktree_id.as_id())
                    .await?;
                update_project_settings(&worktree.path, &[tool_name.to_string()])
            },
        }
    }

    async fn set_task_status(
        &self,
        session_id: SessionId,
        task_id: TaskId,
        status: TaskStatus,
    ) -> ApprovalResult<()> {
        self.stores
            .tasks
            .update(
                task_id.as_id(),
                json!({ "status": status, "updated_at": Timestamp::now() }),
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

    /// The conservative failure path: deny, mark the task failed, log.
    async fn fail_conservatively(
        &self,
        session_id: SessionId,
        task_id: TaskId,
        reason: String,
    ) -> Verdict {
        error!(session = %session_id, task = %task_id, %reason,
            "permission flow failed; denying conservatively");
        if let Err(e) = self
            .set_task_status(session_id, task_id, TaskStatus::Failed)
            .await
        {
            warn!(task = %task_id, error = %e, "failed to mark task failed");
        }
        Verdict::Deny { reason }
    }

    /// Deliver a decision for a pending request. The first decision
    /// wins; later deciders get [`ApprovalError::AlreadyDecided`].
    ///
    /// # Errors
    ///
    /// Fails when the request is unknown or already decided.
    pub async fn decide(&self, request_id: RequestId, decision: Decision) -> ApprovalResult<()> {
        let pending = self
            .pending
            .get(&request_id)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| ApprovalError::UnknownRequest {
                request_id: request_id.to_string(),
            })?;

        let tx = pending
            .tx
            .lock()
            .await
            .take()
            .ok_or_else(|| ApprovalError::AlreadyDecided {
                request_id: request_id.to_string(),
            })?;

        // A dropped receiver means the caller gave up (cancelled); the
        // decision is moot but not an error for the decider.
        let _ = tx.send(decision);
        Ok(())
    }

    /// Request ids currently awaiting a decision.
    #[must_use]
    pub fn pending_requests(&self) -> Vec<RequestId> {
        self.pending.iter().map(|entry| *entry.key()).collect()
    }
}

impl std::fmt::Debug for PermissionArbiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PermissionArbiter")
            .field("pending", &self.pending.len())
            .finish_non_exhaustive()
    }
}
