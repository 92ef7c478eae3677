//! Decision and verdict types.

use agor_core::{PermissionScope, UserId};
use serde::{Deserialize, Serialize};

/// A human's answer to a permission prompt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Decision {
    /// Allow or deny.
    pub allow: bool,
    /// Persist beyond this call.
    pub remember: bool,
    /// Where a remembered decision lands.
    pub scope: PermissionScope,
    /// Who decided.
    pub decided_by: UserId,
    /// Free-text rationale, shown to the agent on deny.
    #[serde(default)]
    pub reason: Option<String>,
}

impl Decision {
    /// An ephemeral allow.
    #[must_use]
    pub fn allow_once(decided_by: UserId) -> Self {
        Self {
            allow: true,
            remember: false,
            scope: PermissionScope::Once,
            decided_by,
            reason: None,
        }
    }

    /// A remembered allow at the given scope.
    #[must_use]
    pub fn allow_remembered(decided_by: UserId, scope: PermissionScope) -> Self {
        Self {
            allow: true,
            remember: true,
            scope,
            decided_by,
            reason: None,
        }
    }

    /// A deny with a reason.
    #[must_use]
    pub fn deny(decided_by: UserId, reason: impl Into<String>) -> Self {
        Self {
            allow: false,
            remember: false,
            scope: PermissionScope::Once,
            decided_by,
            reason: Some(reason.into()),
        }
    }
}

/// What the arbiter tells the driver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    /// Proceed with the tool call.
    Allow {
        /// How the call was authorized.
        reason: String,
    },
    /// Refuse the tool call.
    Deny {
        /// Why.
        reason: String,
    },
}

impl Verdict {
    /// Whether the tool call may proceed.
    #[must_use]
    pub const fn is_allow(&self) -> bool {
        matches!(self, Self::Allow { .. })
    }
}
