//! Agor Unix — host-level isolation between daemon users.
//!
//! Every managed user gets a real Unix account; every worktree gets a
//! posix group with an SGID directory mode derived from its sharing
//! level. All host mutations go through the [`CommandExecutor`] seam:
//! the production backend shells out to a privileged helper, tests run
//! against an in-memory host model.

#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

pub mod controller;
pub mod error;
pub mod executor;
pub mod identity;
pub mod zellij;

pub use controller::{UnixConfig, UnixController};
pub use error::{UnixError, UnixResult};
pub use executor::{CommandExecutor, FakeHost, HelperExecutor, NoopExecutor};
pub use identity::{IdentityStore, UidRange};
