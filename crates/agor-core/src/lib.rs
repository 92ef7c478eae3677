//! Agor Core - Foundation types for the Agor agent-orchestration daemon.
//!
//! This crate provides:
//! - Time-ordered entity identifiers with short-prefix rendering
//! - The entity types shared across the daemon (users, worktrees,
//!   sessions, tasks, messages, MCP servers, permission requests)
//! - Structural deep-merge used by every repository `update`
//! - Error types for core operations
//! - The `Clock` seam

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

pub mod clock;
pub mod error;
pub mod event;
pub mod id;
pub mod mcp_server;
pub mod merge;
pub mod message;
pub mod permission;
pub mod repo;
pub mod session;
pub mod task;
pub mod types;
pub mod user;
pub mod worktree;

pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{CoreError, CoreResult};
pub use event::{BroadcastEvent, Broadcaster, NullBroadcaster};
pub use id::{
    Id, MessageId, RepoId, RequestId, ServerId, SessionId, TaskId, UserId, WorktreeId,
};
pub use mcp_server::{Discovered, McpAuth, McpEndpoint, McpServer};
pub use merge::{deep_merge, merge_entity_patch};
pub use message::{Message, MessageContent};
pub use permission::PermissionRequest;
pub use repo::Repo;
pub use session::{
    AgenticConfig, Genealogy, ModelConfig, PermissionConfig, Session, SessionOrigin,
};
pub use task::{GitState, Task, describe_prompt};
pub use types::{
    AgentKind, McpScope, McpTransport, MessageRole, MessageType, OthersCan, OthersFsAccess,
    PermissionMode, PermissionScope, PermissionStatus, RefType, SessionStatus, TaskStatus,
    ThinkingMode, Timestamp, UserRole,
};
pub use user::{SealedSecret, User, validate_unix_username};
pub use worktree::Worktree;
