//! Broadcast events and the broadcaster seam.
//!
//! The transport layer (WebSocket, whatever else) implements
//! [`Broadcaster`]; the core only ever emits through it. Emission is
//! non-blocking: implementations buffer per subscriber and drop oldest
//! on overflow rather than stall the emitting task.

use crate::id::{RequestId, SessionId, TaskId, UserId};
use crate::message::Message;
use crate::types::{PermissionScope, SessionStatus, TaskStatus};
use serde::{Deserialize, Serialize};

/// Events fanned out to session viewers and users.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum BroadcastEvent {
    /// A session changed status.
    SessionStatus {
        /// The session.
        session_id: SessionId,
        /// New status.
        status: SessionStatus,
    },
    /// A task changed status.
    TaskStatus {
        /// The session.
        session_id: SessionId,
        /// The task.
        task_id: TaskId,
        /// New status.
        status: TaskStatus,
    },
    /// A message was appended to the session stream.
    MessageAppended {
        /// The message, index included.
        message: Message,
    },
    /// A streamed text chunk.
    Partial {
        /// The session.
        session_id: SessionId,
        /// The chunk.
        text: String,
    },
    /// A permission decision is needed; every viewer gets the prompt.
    PermissionRequested {
        /// The session.
        session_id: SessionId,
        /// The request id decisions must reference.
        request_id: RequestId,
        /// Tool being gated.
        tool_name: String,
        /// Tool input to display.
        tool_input: serde_json::Value,
    },
    /// A pending permission request was decided.
    PermissionResolved {
        /// The session.
        session_id: SessionId,
        /// The request.
        request_id: RequestId,
        /// Whether it was approved.
        approved: bool,
        /// Scope of the decision.
        scope: PermissionScope,
        /// Who decided.
        decided_by: UserId,
    },
    /// The agent's terminal result for a prompt.
    AgentResult {
        /// The session.
        session_id: SessionId,
        /// The task.
        task_id: TaskId,
        /// `success`, `error_during_execution`, ...
        subtype: String,
        /// Cost in USD, when reported.
        cost_usd: Option<f64>,
        /// Duration, when reported.
        duration_ms: Option<u64>,
    },
}

/// The fan-out seam to connected clients.
pub trait Broadcaster: Send + Sync {
    /// Emit to every viewer of a session.
    fn emit_to_session(&self, session_id: SessionId, event: &BroadcastEvent);

    /// Emit to one user's connections.
    fn emit_to_user(&self, user_id: UserId, event: &BroadcastEvent);
}

/// A broadcaster that drops everything (headless operation, tests).
#[derive(Debug, Clone, Copy, Default)]
pub struct NullBroadcaster;

impl Broadcaster for NullBroadcaster {
    fn emit_to_session(&self, _session_id: SessionId, _event: &BroadcastEvent) {}

    fn emit_to_user(&self, _user_id: UserId, _event: &BroadcastEvent) {}
}
