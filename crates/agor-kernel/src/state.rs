//! The session state machine.

use agor_core::{CoreError, CoreResult, SessionStatus};

/// Validate a status transition per the session lifecycle:
///
/// ```text
///            startPrompt                tool req
/// idle ─────────────────► running ────────────────► awaiting_permission
///   ▲                       │                              │
///   │  end(result)          │  decision(allow)             │
///   └───────── completed ◄──┤  ─────────────────────────── │
///              failed ◄─────┘  decision(deny) / error / cancel
/// ```
///
/// `completed` and `failed` are terminal only for the current prompt;
/// a new prompt re-enters `running`.
///
/// # Errors
///
/// Returns [`CoreError::InvalidTransition`] for anything the diagram
/// does not allow.
pub fn ensure_transition(from: SessionStatus, to: SessionStatus) -> CoreResult<()> {
    use SessionStatus::{AwaitingPermission, Completed, Failed, Idle, Running};

    let allowed = matches!(
        (from, to),
        (Idle | Completed | Failed, Running)
            | (Running, AwaitingPermission | Completed | Failed | Idle)
            | (AwaitingPermission, Running | Completed | Failed)
    );

    if allowed || from == to {
        Ok(())
    } else {
        Err(CoreError::InvalidTransition {
            from: from.to_string(),
            to: to.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use SessionStatus::{AwaitingPermission, Completed, Failed, Idle, Running};

    #[test]
    fn prompt_lifecycle_is_allowed() {
        ensure_transition(Idle, Running).unwrap();
        ensure_transition(Running, AwaitingPermission).unwrap();
        ensure_transition(AwaitingPermission, Running).unwrap();
        ensure_transition(Running, Completed).unwrap();
        ensure_transition(Completed, Running).unwrap();
        ensure_transition(Running, Failed).unwrap();
        ensure_transition(Failed, Running).unwrap();
        ensure_transition(AwaitingPermission, Failed).unwrap();
    }

    #[test]
    fn shortcuts_are_rejected() {
        assert!(ensure_transition(Idle, AwaitingPermission).is_err());
        assert!(ensure_transition(Idle, Completed).is_err());
        assert!(ensure_transition(Completed, AwaitingPermission).is_err());
        assert!(ensure_transition(Failed, Completed).is_err());
    }

    #[test]
    fn self_transitions_are_noops() {
        ensure_transition(Running, Running).unwrap();
        ensure_transition(Idle, Idle).unwrap();
    }
}
