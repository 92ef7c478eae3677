//! Agent-driver error types.

use thiserror::Error;

/// Errors raised while spawning and driving an agent subprocess.
#[derive(Debug, Error)]
pub enum AgentError {
    /// The subprocess could not be spawned.
    #[error("agent spawn failed: {stderr}")]
    SpawnFailed {
        /// Captured stderr or the OS error.
        stderr: String,
    },

    /// The subprocess exited abnormally.
    #[error("agent exited with {exitcode}: {stderr}")]
    StderrExit {
        /// Exit code.
        exitcode: i32,
        /// Captured stderr tail.
        stderr: String,
    },

    /// A frame could not be parsed as a protocol message.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The working directory is unusable.
    #[error("invalid working directory {path}: {reason}")]
    BadWorkdir {
        /// The directory.
        path: String,
        /// Why it is unusable.
        reason: String,
    },

    /// stdin/stdout plumbing failed.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for agent operations.
pub type AgentResult<T> = Result<T, AgentError>;
