//! Agor Approval — the permission arbiter.
//!
//! Gates every agent tool invocation behind a human decision, with one
//! in-flight prompt per session (multiple sessions proceed in
//! parallel), first-decision-wins resolution, and scope persistence:
//! `once` is ephemeral, `session` lands in the session's permission
//! config, `project` lands in the worktree's `.claude/settings.json`.

#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

pub mod arbiter;
pub mod decision;
pub mod error;
pub mod settings;

#[cfg(test)]
mod arbiter_tests;

pub use arbiter::PermissionArbiter;
pub use decision::{Decision, Verdict};
pub use error::{ApprovalError, ApprovalResult};
pub use settings::update_project_settings;
