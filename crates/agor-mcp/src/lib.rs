//! Agor MCP — composes scoped MCP server registrations into agent-ready
//! configurations.
//!
//! For a session, [`McpResolver::assemble_servers`] walks the scope
//! chain (global → repo → session), resolves each server's auth
//! (bearer / JWT / OAuth 2.1), wraps remote servers into a local
//! `mcp-remote` stdio shim where needed, injects the daemon's own
//! self-access server, and aggregates discovered tool names into the
//! agent's allowed-tools set.
//!
//! Capability discovery speaks real MCP through the official `rmcp`
//! client behind the [`CapabilityProber`] seam.

#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

pub mod config;
pub mod discovery;
pub mod error;
pub mod oauth;
pub mod resolver;

pub use config::{AgentMcpConfig, ResolvedServers};
pub use discovery::{CapabilityProber, ProbedCapabilities, RmcpProber};
pub use error::{McpError, McpResult};
pub use oauth::PendingOAuth;
pub use resolver::{McpResolver, McpResolverConfig};
