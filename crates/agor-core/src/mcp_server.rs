//! MCP server registrations.

use crate::id::{Id, ServerId};
use crate::types::{McpScope, McpTransport, Timestamp};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A registered MCP server.
///
/// `(scope, scope_id, name)` is unique; the store enforces it. Servers
/// are shared by reference — no session owns one.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct McpServer {
    /// Entity id.
    pub id: ServerId,
    /// Name, unique within its scope.
    pub name: String,
    /// Registration scope.
    pub scope: McpScope,
    /// The repo or session this server is scoped to; `None` for global.
    #[serde(default)]
    pub scope_id: Option<Id>,
    /// Transport the server speaks.
    #[serde(default)]
    pub transport: McpTransport,
    /// How to reach it.
    pub endpoint: McpEndpoint,
    /// Authentication.
    #[serde(default)]
    pub auth: McpAuth,
    /// Environment for stdio servers; values may be `{{ user.env.* }}`
    /// templates.
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    /// Disabled servers are skipped during composition.
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// What the last discovery found.
    #[serde(default)]
    pub discovered: Discovered,
    /// Creation time.
    pub created_at: Timestamp,
}

fn default_enabled() -> bool {
    true
}

impl McpServer {
    /// Create an enabled stdio server.
    #[must_use]
    pub fn stdio(
        name: impl Into<String>,
        scope: McpScope,
        scope_id: Option<Id>,
        command: impl Into<String>,
        args: Vec<String>,
    ) -> Self {
        Self {
            id: ServerId::generate(),
            name: name.into(),
            scope,
            scope_id,
            transport: McpTransport::Stdio,
            endpoint: McpEndpoint::Command {
                command: command.into(),
                args,
            },
            auth: McpAuth::None,
            env: BTreeMap::new(),
            enabled: true,
            discovered: Discovered::default(),
            created_at: Timestamp::now(),
        }
    }

    /// Create an enabled HTTP server.
    #[must_use]
    pub fn http(
        name: impl Into<String>,
        scope: McpScope,
        scope_id: Option<Id>,
        url: impl Into<String>,
    ) -> Self {
        Self {
            id: ServerId::generate(),
            name: name.into(),
            scope,
            scope_id,
            transport: McpTransport::Http,
            endpoint: McpEndpoint::Url { url: url.into() },
            auth: McpAuth::None,
            env: BTreeMap::new(),
            enabled: true,
            discovered: Discovered::default(),
            created_at: Timestamp::now(),
        }
    }
}

/// Where an MCP server lives.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum McpEndpoint {
    /// A command to spawn (stdio transport).
    Command {
        /// Executable.
        command: String,
        /// Arguments.
        #[serde(default)]
        args: Vec<String>,
    },
    /// A remote URL (http/sse transports).
    Url {
        /// The endpoint URL.
        url: String,
    },
}

/// Authentication for an MCP server.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum McpAuth {
    /// No authentication.
    #[default]
    None,
    /// Static bearer token.
    Bearer {
        /// The token; may be a `{{ user.env.* }}` template.
        token: String,
    },
    /// Token/secret exchanged for a bearer at a login endpoint.
    Jwt {
        /// Login endpoint.
        api_url: String,
        /// API token.
        api_token: String,
        /// API secret.
        api_secret: String,
    },
    /// OAuth 2.1.
    #[serde(rename = "oauth2.1")]
    OAuth {
        /// Client id, when doing client-credentials.
        #[serde(default)]
        client_id: Option<String>,
        /// Client secret, when doing client-credentials.
        #[serde(default)]
        client_secret: Option<String>,
        /// Token endpoint; discovered via RFC 9728 when unset.
        #[serde(default)]
        token_url: Option<String>,
        /// Persisted access token from a completed flow.
        #[serde(default)]
        access_token: Option<String>,
        /// Persisted refresh token.
        #[serde(default)]
        refresh_token: Option<String>,
        /// Access-token expiry.
        #[serde(default)]
        expires_at: Option<Timestamp>,
    },
}

/// What capability discovery last found on a server.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Discovered {
    /// Tool names.
    #[serde(default)]
    pub tools: Vec<String>,
    /// Resource URIs.
    #[serde(default)]
    pub resources: Vec<String>,
    /// Prompt names.
    #[serde(default)]
    pub prompts: Vec<String>,
    /// When discovery last ran.
    #[serde(default)]
    pub discovered_at: Option<Timestamp>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn oauth_tag_is_oauth21() {
        let auth = McpAuth::OAuth {
            client_id: None,
            client_secret: None,
            token_url: None,
            access_token: None,
            refresh_token: None,
            expires_at: None,
        };
        let value = serde_json::to_value(&auth).unwrap();
        assert_eq!(value["kind"], "oauth2.1");
    }

    #[test]
    fn servers_default_enabled() {
        let json = serde_json::json!({
            "id": ServerId::generate(),
            "name": "fs",
            "scope": "global",
            "endpoint": {"kind": "command", "command": "mcp-fs"},
            "created_at": Timestamp::now(),
        });
        let server: McpServer = serde_json::from_value(json).unwrap();
        assert!(server.enabled);
        assert!(matches!(server.auth, McpAuth::None));
    }
}
