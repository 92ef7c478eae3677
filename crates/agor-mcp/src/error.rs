//! MCP error types.

use thiserror::Error;

/// Errors raised during composition, auth, and discovery.
#[derive(Debug, Error)]
pub enum McpError {
    /// Authentication against a server failed.
    #[error("auth failed for {server}: {reason}")]
    AuthFailed {
        /// Server name.
        server: String,
        /// What went wrong.
        reason: String,
    },

    /// Capability discovery failed; tolerated by composition (the
    /// server is included with no discovered tools).
    #[error("discovery failed for {server}: {cause}")]
    DiscoveryFailed {
        /// Server name.
        server: String,
        /// What went wrong.
        cause: String,
    },

    /// A server registration is unusable as configured.
    #[error("config error: {0}")]
    ConfigError(String),

    /// An HTTP call failed.
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// The repository layer failed.
    #[error(transparent)]
    Store(#[from] agor_store::StoreError),
}

/// Result type for MCP operations.
pub type McpResult<T> = Result<T, McpError>;
