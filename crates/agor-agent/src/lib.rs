//! Agor Agent — drives one agent subprocess per prompt.
//!
//! The driver spawns the agent under the session owner's Unix identity,
//! feeds it the prompt over stdin, ingests its `stream-json` output into
//! a typed [`AgentEvent`] stream, captures stderr into a ring buffer,
//! enforces an idle timeout, and honours cancellation with a graceful
//! signal followed by SIGKILL.
//!
//! Also home to the thinking-budget resolver and the per-agent
//! invocation builder (the `AgentKind` capability seam: build spawn
//! args, map permission modes).

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

pub mod driver;
pub mod error;
pub mod event;
pub mod invocation;
pub mod spawn;
pub mod testing;
pub mod thinking;
pub mod wire;

pub use driver::{AgentDriver, DriverConfig, PromptHandle};
pub use error::{AgentError, AgentResult};
pub use event::{AgentEvent, CompletedBlock, CompletedRole, EndReason, ResultSummary};
pub use invocation::{
    InvocationParams, ResumeDecision, ResumeDirective, build_spawn_spec, decide_resume,
    validate_cwd,
};
pub use spawn::{AgentProcess, ProcessSpawner, SpawnSpec, TermSignal, TokioSpawner};
pub use thinking::{ThinkingBudget, resolve_thinking_budget};
