//! Kernel error types.

use agor_core::SessionStatus;
use thiserror::Error;

/// Errors raised by kernel operations.
#[derive(Debug, Error)]
pub enum KernelError {
    /// A prompt was sent to a session that is already driving one.
    #[error("session {session_id} is busy ({status})")]
    SessionBusy {
        /// The session.
        session_id: String,
        /// Its current status.
        status: SessionStatus,
    },

    /// The repository layer failed.
    #[error(transparent)]
    Store(#[from] agor_store::StoreError),

    /// A core invariant failed.
    #[error(transparent)]
    Core(#[from] agor_core::CoreError),

    /// Host provisioning failed.
    #[error(transparent)]
    Unix(#[from] agor_unix::UnixError),

    /// MCP composition failed.
    #[error(transparent)]
    Mcp(#[from] agor_mcp::McpError),

    /// The agent driver failed before producing a stream.
    #[error(transparent)]
    Agent(#[from] agor_agent::AgentError),

    /// The arbiter failed.
    #[error(transparent)]
    Approval(#[from] agor_approval::ApprovalError),

    /// Session-context file maintenance failed.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for kernel operations.
pub type KernelResult<T> = Result<T, KernelError>;
