//! Agor Kernel — the session/tool-execution core.
//!
//! Owns the session state machine (idle → running →
//! awaiting-permission → …), task records, genealogy (fork/spawn), and
//! the per-prompt execution loop that wires the thinking budget, MCP
//! composition, secret resolution, Unix identity, agent driver, and
//! permission arbiter together.
//!
//! Per-session work is serialised (one prompt at a time, one pending
//! permission at a time, atomic message indices); across sessions
//! everything proceeds in parallel.

#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

pub mod broadcast;
pub mod claude_md;
pub mod error;
pub mod kernel;
pub mod state;

pub use broadcast::ChannelBroadcaster;
pub use claude_md::{append_session_context, remove_session_context};
pub use error::{KernelError, KernelResult};
pub use kernel::{KernelConfig, SessionKernel};
pub use state::ensure_transition;
