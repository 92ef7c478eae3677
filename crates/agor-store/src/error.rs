//! Store error types.

use thiserror::Error;

/// Errors raised by the repository layer.
#[derive(Debug, Error)]
pub enum StoreError {
    /// No entity of the given kind has the given id or prefix.
    #[error("{kind} not found: {id}")]
    NotFound {
        /// Entity kind.
        kind: &'static str,
        /// The id or prefix looked up.
        id: String,
    },

    /// A short-id prefix matched more than one entity.
    #[error("ambiguous {kind} id prefix {prefix:?}: matches {matches:?}")]
    AmbiguousId {
        /// Entity kind.
        kind: &'static str,
        /// The prefix.
        prefix: String,
        /// Full ids of every match.
        matches: Vec<String>,
    },

    /// A uniqueness or state constraint was violated.
    #[error("conflict: {0}")]
    Conflict(String),

    /// A core invariant failed (genealogy corruption, bad patch, ...).
    #[error(transparent)]
    Core(#[from] agor_core::CoreError),
}

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;
