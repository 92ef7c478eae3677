//! Core error types.

use thiserror::Error;

/// Errors raised by core types and the entity-patch machinery.
#[derive(Debug, Error)]
pub enum CoreError {
    /// No entity of the given kind has the given id.
    #[error("{kind} not found: {id}")]
    EntityNotFound {
        /// Entity kind (e.g. `"session"`).
        kind: &'static str,
        /// Full or short id that was looked up.
        id: String,
    },

    /// A short-id prefix matched more than one entity.
    #[error("ambiguous {kind} id prefix {prefix:?}: matches {matches:?}")]
    AmbiguousId {
        /// Entity kind.
        kind: &'static str,
        /// The prefix that was looked up.
        prefix: String,
        /// Full ids of every match, for disambiguation.
        matches: Vec<String>,
    },

    /// A unix username failed format validation.
    #[error("invalid unix username: {name:?}")]
    InvalidUsername {
        /// The rejected name.
        name: String,
    },

    /// Session genealogy carries both a spawn and a fork link, or a
    /// traversal found a cycle.
    #[error("corrupt session genealogy: {detail}")]
    CorruptGenealogy {
        /// What was found.
        detail: String,
    },

    /// A status transition that the state machine forbids.
    #[error("invalid session transition: {from} -> {to}")]
    InvalidTransition {
        /// Status before.
        from: String,
        /// Requested status.
        to: String,
    },

    /// Generic validation failure at an entity boundary.
    #[error("validation failed: {0}")]
    Validation(String),

    /// JSON (de)serialization failure during a patch merge.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;
