//! Approval error types.

use thiserror::Error;

/// Errors raised by the arbiter and settings writer.
#[derive(Debug, Error)]
pub enum ApprovalError {
    /// A decision already arrived for this request; later deciders are
    /// rejected.
    #[error("request {request_id} already decided")]
    AlreadyDecided {
        /// The request.
        request_id: String,
    },

    /// No pending request with this id.
    #[error("no pending request {request_id}")]
    UnknownRequest {
        /// The request.
        request_id: String,
    },

    /// `.claude/settings.json` exists but is not valid JSON; refusing to
    /// clobber it.
    #[error("unreadable settings file {path}: {reason}")]
    MalformedSettings {
        /// The file.
        path: String,
        /// Parse failure.
        reason: String,
    },

    /// Filesystem failure while editing project settings.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// The repository layer failed.
    #[error(transparent)]
    Store(#[from] agor_store::StoreError),
}

/// Result type for approval operations.
pub type ApprovalResult<T> = Result<T, ApprovalError>;
