//! Capability discovery: connect to a server, list its tools, resources,
//! and prompts.
//!
//! The real prober speaks MCP through the official `rmcp` client over a
//! child-process transport; tests inject a scripted prober.

use crate::error::{McpError, McpResult};
use agor_core::{McpEndpoint, McpServer};
use async_trait::async_trait;
use rmcp::ServiceExt;
use rmcp::model::{ClientCapabilities, ClientInfo, Implementation};
use rmcp::transport::TokioChildProcess;
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::{info, warn};

/// What a probe found on a server.
#[derive(Debug, Clone, Default)]
pub struct ProbedCapabilities {
    /// Tool names.
    pub tools: Vec<String>,
    /// Resource URIs.
    pub resources: Vec<String>,
    /// Prompt names.
    pub prompts: Vec<String>,
}

/// Connects to an MCP server and lists its capabilities.
#[async_trait]
pub trait CapabilityProber: Send + Sync {
    /// Probe a server. `env` is the server's environment with templates
    /// already resolved.
    ///
    /// # Errors
    ///
    /// Returns [`McpError::DiscoveryFailed`] when the server cannot be
    /// reached or the handshake fails.
    async fn probe(
        &self,
        server: &McpServer,
        env: &BTreeMap<String, String>,
    ) -> McpResult<ProbedCapabilities>;
}

/// The handler passed to `rmcp::ServiceExt::serve()`. Discovery needs no
/// client capabilities; everything stays at the protocol defaults.
#[derive(Debug, Clone)]
struct DiscoveryHandler;

impl rmcp::ClientHandler for DiscoveryHandler {
    fn get_info(&self) -> ClientInfo {
        ClientInfo {
            meta: None,
            protocol_version: serde_json::from_value(serde_json::json!("2025-11-25"))
                .expect("valid protocol version"),
            capabilities: ClientCapabilities::default(),
            client_info: Implementation {
                name: "agor".to_string(),
                title: Some("Agor Orchestration Daemon".to_string()),
                version: env!("CARGO_PKG_VERSION").to_string(),
                description: None,
                icons: None,
                website_url: None,
            },
        }
    }
}

/// The production prober: spawns stdio servers as child processes and
/// performs the MCP handshake via `rmcp`.
#[derive(Debug, Clone)]
pub struct RmcpProber {
    /// Graceful-close timeout after listing.
    shutdown_timeout: Duration,
}

impl RmcpProber {
    /// Create a prober with the default shutdown timeout.
    #[must_use]
    pub fn new() -> Self {
        Self {
            shutdown_timeout: Duration::from_secs(5),
        }
    }
}

impl Default for RmcpProber {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CapabilityProber for RmcpProber {
    async fn probe(
        &self,
        server: &McpServer,
        env: &BTreeMap<String, String>,
    ) -> McpResult<ProbedCapabilities> {
        let McpEndpoint::Command { command, args } = &server.endpoint else {
            return Err(McpError::ConfigError(format!(
                "discovery over {:?} transport is not supported; only stdio servers are probed \
                 directly",
                server.transport
            )));
        };

        let mut cmd = tokio::process::Command::new(command);
        cmd.args(args);
        for (key, value) in env {
            cmd.env(key, value);
        }

        let transport =
            TokioChildProcess::new(cmd).map_err(|e| McpError::DiscoveryFailed {
                server: server.name.clone(),
                cause: format!("spawn failed: {e}"),
            })?;

        let mut service =
            DiscoveryHandler
                .serve(transport)
                .await
                .map_err(|e| McpError::DiscoveryFailed {
                    server: server.name.clone(),
                    cause: format!("handshake failed: {e}"),
                })?;

        let tools = service
            .list_all_tools()
            .await
            .map_err(|e| McpError::DiscoveryFailed {
                server: server.name.clone(),
                cause: format!("tools/list failed: {e}"),
            })?
            .iter()
            .map(|t| t.name.to_string())
            .collect();

        // Resources and prompts are optional server features; a refusal
        // is not a discovery failure.
        let resources = match service.list_all_resources().await {
            Ok(resources) => resources.iter().map(|r| r.uri.to_string()).collect(),
            Err(e) => {
                warn!(server = %server.name, error = %e, "resources/list refused");
                Vec::new()
            },
        };
        let prompts = match service.list_all_prompts().await {
            Ok(prompts) => prompts.iter().map(|p| p.name.to_string()).collect(),
            Err(e) => {
                warn!(server = %server.name, error = %e, "prompts/list refused");
                Vec::new()
            },
        };

        match service.close_with_timeout(self.shutdown_timeout).await {
            Ok(Some(reason)) => {
                info!(server = %server.name, ?reason, "discovery session closed");
            },
            Ok(None) => {
                warn!(server = %server.name, "discovery session close timed out; dropping");
            },
            Err(e) => {
                warn!(server = %server.name, error = %e, "discovery session close join error");
            },
        }

        Ok(ProbedCapabilities {
            tools,
            resources,
            prompts,
        })
    }
}
