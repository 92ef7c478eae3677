//! Agent-ready MCP configuration shapes.

use agor_core::ServerId;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// One server entry as handed to the agent CLI's `--mcp-config`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum AgentMcpConfig {
    /// A child process speaking stdio.
    Stdio {
        /// Executable.
        command: String,
        /// Arguments.
        #[serde(default)]
        args: Vec<String>,
        /// Environment, templates already resolved.
        #[serde(default)]
        env: BTreeMap<String, String>,
    },
    /// A remote HTTP endpoint the agent connects to directly.
    Http {
        /// Endpoint URL.
        url: String,
        /// Extra request headers (e.g. `Authorization`).
        #[serde(default)]
        headers: BTreeMap<String, String>,
    },
}

/// The result of assembling a session's servers.
#[derive(Debug, Clone, Default)]
pub struct ResolvedServers {
    /// name → agent-ready config.
    pub servers: BTreeMap<String, AgentMcpConfig>,
    /// Aggregated `mcp__<server>__<tool>` names for the agent's
    /// allowed-tools set. Servers without recent discovery contribute
    /// nothing; the agent discovers their tools itself at session start.
    pub allowed_tools: BTreeSet<String>,
    /// OAuth servers that cannot connect until the user completes a
    /// browser flow; surfaced to the UI.
    pub requires_browser_flow: Vec<ServerId>,
}

impl ResolvedServers {
    /// The JSON document passed to the agent CLI.
    #[must_use]
    pub fn to_mcp_config_json(&self) -> serde_json::Value {
        serde_json::json!({ "mcpServers": self.servers })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stdio_config_shape() {
        let config = AgentMcpConfig::Stdio {
            command: "mcp-fs".into(),
            args: vec!["--root".into(), "/srv".into()],
            env: BTreeMap::new(),
        };
        let value = serde_json::to_value(&config).unwrap();
        assert_eq!(value["type"], "stdio");
        assert_eq!(value["command"], "mcp-fs");
    }

    #[test]
    fn mcp_config_json_wraps_servers() {
        let mut resolved = ResolvedServers::default();
        resolved.servers.insert(
            "remote".into(),
            AgentMcpConfig::Http {
                url: "https://mcp.example.com".into(),
                headers: BTreeMap::from([(
                    "Authorization".to_string(),
                    "Bearer x".to_string(),
                )]),
            },
        );
        let json = resolved.to_mcp_config_json();
        assert_eq!(json["mcpServers"]["remote"]["type"], "http");
        assert_eq!(
            json["mcpServers"]["remote"]["headers"]["Authorization"],
            "Bearer x"
        );
    }
}
