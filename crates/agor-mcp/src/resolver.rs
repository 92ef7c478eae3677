//! Scope composition and auth resolution.

use crate::config::{AgentMcpConfig, ResolvedServers};
use crate::discovery::CapabilityProber;
use crate::error::{McpError, McpResult};
use crate::oauth::{
    PendingOAuth, TokenResponse, discover_from_challenge, generate_pkce, generate_state,
};
use agor_core::{
    Clock, Discovered, McpAuth, McpEndpoint, McpScope, McpServer, ServerId, Session, Timestamp,
    User, UserId,
};
use agor_secrets::SecretResolver;
use agor_store::{EntityStore as _, Stores};
use dashmap::DashMap;
use serde_json::json;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{info, warn};

/// Name of the built-in self-access server.
pub const SELF_ACCESS_SERVER_NAME: &str = "agor";

/// Resolver configuration.
#[derive(Debug, Clone)]
pub struct McpResolverConfig {
    /// Inject the daemon's own MCP endpoint as server `agor`.
    pub self_access_enabled: bool,
    /// The daemon's MCP endpoint URL.
    pub daemon_mcp_url: String,
    /// Default `mcp-remote` shim binary.
    pub mcp_remote_bin: String,
    /// User-local shim wrapper, preferred over the default when present.
    pub user_shim_path: Option<PathBuf>,
    /// Timeout for auth and discovery HTTP calls.
    pub http_timeout: Duration,
    /// JWT bearers are refreshed this long before nominal expiry.
    pub token_expiry_slack: chrono::Duration,
    /// Discovery results newer than this satisfy concurrent callers.
    pub discovery_coalesce_window: chrono::Duration,
}

impl Default for McpResolverConfig {
    fn default() -> Self {
        Self {
            self_access_enabled: true,
            daemon_mcp_url: "http://127.0.0.1:4518/mcp".to_string(),
            mcp_remote_bin: "mcp-remote".to_string(),
            user_shim_path: None,
            http_timeout: Duration::from_secs(10),
            token_expiry_slack: chrono::Duration::seconds(60),
            discovery_coalesce_window: chrono::Duration::seconds(5),
        }
    }
}

#[derive(Debug, Clone)]
struct CachedBearer {
    token: String,
    expires_at: Timestamp,
}

/// Composes scoped server registrations into agent-ready configs.
///
/// One resolver exists per daemon process; the JWT cache and the
/// discovery in-flight map are process singletons living inside it.
pub struct McpResolver {
    stores: Arc<Stores>,
    secrets: Arc<SecretResolver>,
    clock: Arc<dyn Clock>,
    prober: Arc<dyn CapabilityProber>,
    http: reqwest::Client,
    config: McpResolverConfig,
    jwt_cache: DashMap<(ServerId, UserId), CachedBearer>,
    discovery_locks: DashMap<ServerId, Arc<Mutex<()>>>,
}

impl McpResolver {
    /// Create a resolver.
    #[must_use]
    pub fn new(
        stores: Arc<Stores>,
        secrets: Arc<SecretResolver>,
        clock: Arc<dyn Clock>,
        prober: Arc<dyn CapabilityProber>,
        config: McpResolverConfig,
    ) -> Self {
        let http = reqwest::Client::builder()
            .timeout(config.http_timeout)
            .build()
            .expect("http client builds");
        Self {
            stores,
            secrets,
            clock,
            prober,
            http,
            config,
            jwt_cache: DashMap::new(),
            discovery_locks: DashMap::new(),
        }
    }

    // ------------------------------------------------------------------
    // Composition
    // ------------------------------------------------------------------

    /// Assemble the agent-ready server map for a session.
    ///
    /// Collection order is global → repo → session → explicit session
    /// attachments; later scopes shadow earlier entries by server id,
    /// and duplicates collapse to the last occurrence.
    ///
    /// # Errors
    ///
    /// Propagates store failures. Per-server auth failures degrade the
    /// affected server rather than failing the assembly.
    pub async fn assemble_servers(&self, session: &Session) -> McpResult<ResolvedServers> {
        let user = self.stores.users.get(session.created_by.as_id()).await?;
        let worktree = self
            .stores
            .worktrees
            .get(session.worktree_id.as_id())
            .await?;

        let mut chain: Vec<McpServer> = Vec::new();
        chain.extend(
            self.stores
                .servers_in_scope(McpScope::Global, None)
                .await?,
        );
        chain.extend(
            self.stores
                .servers_in_scope(McpScope::Repo, Some(worktree.repo_id.as_id()))
                .await?,
        );
        chain.extend(
            self.stores
                .servers_in_scope(McpScope::Session, Some(session.id.as_id()))
                .await?,
        );
        for server_id in &session.agentic_config.mcp_server_ids {
            match self.stores.mcp_servers.get(server_id.as_id()).await {
                Ok(server) if server.enabled => chain.push(server),
                Ok(_) => {},
                Err(e) => {
                    warn!(server = %server_id, error = %e, "attached server missing; skipping");
                },
            }
        }

        // Deduplicate by id, keeping the last (highest-scope) occurrence
        // while preserving chain order for name shadowing.
        let mut last_index: BTreeMap<ServerId, usize> = BTreeMap::new();
        for (i, server) in chain.iter().enumerate() {
            last_index.insert(server.id, i);
        }

        let mut resolved = ResolvedServers::default();
        for (i, server) in chain.iter().enumerate() {
            if last_index.get(&server.id) != Some(&i) {
                continue;
            }
            match self.resolve_server(server, &user).await {
                Ok(Some(config)) => {
                    for tool in &server.discovered.tools {
                        resolved
                            .allowed_tools
                            .insert(format!("mcp__{}__{}", server.name, tool));
                    }
                    resolved.servers.insert(server.name.clone(), config);
                },
                Ok(None) => {
                    info!(server = %server.name, "server requires browser oauth flow");
                    resolved.requires_browser_flow.push(server.id);
                },
                Err(e) => {
                    warn!(server = %server.name, error = %e, "server excluded from config");
                },
            }
        }

        if self.config.self_access_enabled {
            resolved.servers.insert(
                SELF_ACCESS_SERVER_NAME.to_string(),
                self.self_access_config(session)?,
            );
        }

        Ok(resolved)
    }

    fn self_access_config(&self, session: &Session) -> McpResult<AgentMcpConfig> {
        let mut url = url::Url::parse(&self.config.daemon_mcp_url)
            .map_err(|e| McpError::ConfigError(format!("bad daemon mcp url: {e}")))?;
        url.query_pairs_mut()
            .append_pair("token", &session.mcp_token);
        Ok(AgentMcpConfig::Http {
            url: url.to_string(),
            headers: BTreeMap::new(),
        })
    }

    /// Resolve one server to its agent-ready config.
    ///
    /// Returns `Ok(None)` when the server needs a browser OAuth flow
    /// before it can connect.
    async fn resolve_server(
        &self,
        server: &McpServer,
        user: &User,
    ) -> McpResult<Option<AgentMcpConfig>> {
        match (&server.endpoint, &server.auth) {
            (McpEndpoint::Command { command, args }, _) => {
                let env = server
                    .env
                    .iter()
                    .map(|(k, v)| (k.clone(), self.secrets.resolve_template(v, user)))
                    .collect();
                Ok(Some(AgentMcpConfig::Stdio {
                    command: command.clone(),
                    args: args.clone(),
                    env,
                }))
            },
            (McpEndpoint::Url { url }, McpAuth::None) => Ok(Some(AgentMcpConfig::Http {
                url: url.clone(),
                headers: BTreeMap::new(),
            })),
            (McpEndpoint::Url { url }, McpAuth::Bearer { token }) => {
                let token = self.secrets.resolve_template(token, user);
                Ok(Some(self.bearer_shim(url, &token)))
            },
            (McpEndpoint::Url { url }, McpAuth::Jwt { .. }) => {
                match self.jwt_bearer(server, user).await {
                    Ok(token) => Ok(Some(self.bearer_shim(url, &token))),
                    Err(e) => {
                        // Degrade to a direct connection so the user sees
                        // the remote's own error, not a local one.
                        warn!(server = %server.name, error = %e,
                            "jwt login failed; falling back to direct http");
                        Ok(Some(AgentMcpConfig::Http {
                            url: url.clone(),
                            headers: BTreeMap::new(),
                        }))
                    },
                }
            },
            (McpEndpoint::Url { url }, McpAuth::OAuth { .. }) => {
                self.oauth_config(server, url).await
            },
        }
    }

    /// Wrap a remote URL into a local `mcp-remote` stdio shim carrying a
    /// bearer header.
    fn bearer_shim(&self, url: &str, token: &str) -> AgentMcpConfig {
        AgentMcpConfig::Stdio {
            command: self.shim_command(),
            args: vec![
                url.to_string(),
                "--header".to_string(),
                format!("Authorization: Bearer {token}"),
            ],
            env: BTreeMap::new(),
        }
    }

    /// The shim binary: a user-local wrapper when present, else the
    /// configured default (resolved through `PATH` when possible).
    fn shim_command(&self) -> String {
        if let Some(shim) = &self.config.user_shim_path
            && shim.exists()
        {
            return shim.display().to_string();
        }
        which::which(&self.config.mcp_remote_bin).map_or_else(
            |_| self.config.mcp_remote_bin.clone(),
            |p| p.display().to_string(),
        )
    }

    // ------------------------------------------------------------------
    // JWT
    // ------------------------------------------------------------------

    /// A bearer for a JWT-auth server, cached per (server, user) until
    /// shortly before expiry.
    async fn jwt_bearer(&self, server: &McpServer, user: &User) -> McpResult<String> {
        let McpAuth::Jwt {
            api_url,
            api_token,
            api_secret,
        } = &server.auth
        else {
            return Err(McpError::ConfigError("not a jwt server".to_string()));
        };

        let key = (server.id, user.id);
        let now = self.clock.now();
        if let Some(cached) = self.jwt_cache.get(&key)
            && cached.expires_at > now
        {
            return Ok(cached.token.clone());
        }

        let api_token = self.secrets.resolve_template(api_token, user);
        let api_secret = self.secrets.resolve_template(api_secret, user);

        let response = self
            .http
            .post(api_url)
            .json(&json!({ "api_token": api_token, "api_secret": api_secret }))
            .send()
            .await
            .map_err(|e| McpError::AuthFailed {
                server: server.name.clone(),
                reason: format!("jwt login request failed: {e}"),
            })?;

        if !response.status().is_success() {
            return Err(McpError::AuthFailed {
                server: server.name.clone(),
                reason: format!("jwt login returned {}", response.status()),
            });
        }

        let token: TokenResponse =
            response.json().await.map_err(|e| McpError::AuthFailed {
                server: server.name.clone(),
                reason: format!("jwt login response unparseable: {e}"),
            })?;

        let lifetime = chrono::Duration::seconds(token.expires_in.unwrap_or(3600));
        let expires_at = Timestamp(now.0 + lifetime - self.config.token_expiry_slack);
        self.jwt_cache.insert(
            key,
            CachedBearer {
                token: token.access_token.clone(),
                expires_at,
            },
        );
        Ok(token.access_token)
    }

    // ------------------------------------------------------------------
    // OAuth 2.1
    // ------------------------------------------------------------------

    /// Resolve an OAuth server: persisted token, client-credentials, or
    /// `None` when only a browser flow can authorize it.
    async fn oauth_config(
        &self,
        server: &McpServer,
        url: &str,
    ) -> McpResult<Option<AgentMcpConfig>> {
        let McpAuth::OAuth {
            client_id,
            client_secret,
            token_url,
            access_token,
            expires_at,
            ..
        } = &server.auth
        else {
            return Err(McpError::ConfigError("not an oauth server".to_string()));
        };

        let now = self.clock.now();
        if let Some(token) = access_token
            && expires_at.is_none_or(|exp| exp > now)
        {
            return Ok(Some(authorized_http(url, token)));
        }

        if let (Some(id), Some(secret)) = (client_id, client_secret) {
            match self
                .client_credentials(server, token_url.as_deref(), id, secret)
                .await
            {
                Ok(token) => return Ok(Some(authorized_http(url, &token))),
                Err(e) => {
                    warn!(server = %server.name, error = %e,
                        "client-credentials failed; falling back to direct http");
                    return Ok(Some(AgentMcpConfig::Http {
                        url: url.to_string(),
                        headers: BTreeMap::new(),
                    }));
                },
            }
        }

        Ok(None)
    }

    /// Client-credentials grant; persists the token on the server record.
    async fn client_credentials(
        &self,
        server: &McpServer,
        token_url: Option<&str>,
        client_id: &str,
        client_secret: &str,
    ) -> McpResult<String> {
        let token_url = match token_url {
            Some(u) => u.to_string(),
            None => {
                let McpEndpoint::Url { url } = &server.endpoint else {
                    return Err(McpError::ConfigError(
                        "oauth server without a url endpoint".to_string(),
                    ));
                };
                discover_from_challenge(&self.http, &server.name, url)
                    .await?
                    .token_endpoint
            },
        };

        let response = self
            .http
            .post(&token_url)
            .form(&[
                ("grant_type", "client_credentials"),
                ("client_id", client_id),
                ("client_secret", client_secret),
            ])
            .send()
            .await
            .map_err(|e| McpError::AuthFailed {
                server: server.name.clone(),
                reason: format!("token request failed: {e}"),
            })?;

        if !response.status().is_success() {
            return Err(McpError::AuthFailed {
                server: server.name.clone(),
                reason: format!("token endpoint returned {}", response.status()),
            });
        }

        let token: TokenResponse =
            response.json().await.map_err(|e| McpError::AuthFailed {
                server: server.name.clone(),
                reason: format!("token response unparseable: {e}"),
            })?;

        self.persist_tokens(server.id, &token_url, &token).await?;
        Ok(token.access_token)
    }

    /// Begin an Authorization-Code + PKCE flow for a server. The
    /// endpoints are discovered from the server's `WWW-Authenticate`
    /// challenge when not configured (RFC 9728).
    ///
    /// # Errors
    ///
    /// Fails when the server is not OAuth, discovery finds no
    /// authorization server, or HTTP fails.
    pub async fn start_oauth_flow(
        &self,
        server_id: ServerId,
        redirect_uri: &str,
    ) -> McpResult<PendingOAuth> {
        let server = self.stores.mcp_servers.get(server_id.as_id()).await?;
        let McpAuth::OAuth { client_id, .. } = &server.auth else {
            return Err(McpError::ConfigError(format!(
                "server {:?} is not oauth-authenticated",
                server.name
            )));
        };
        let McpEndpoint::Url { url } = &server.endpoint else {
            return Err(McpError::ConfigError(
                "oauth server without a url endpoint".to_string(),
            ));
        };

        let metadata = discover_from_challenge(&self.http, &server.name, url).await?;
        let pkce = generate_pkce();
        let state = generate_state();
        let client_id = client_id.clone().unwrap_or_else(|| "agor".to_string());

        let mut authorization_url = url::Url::parse(&metadata.authorization_endpoint)
            .map_err(|e| McpError::ConfigError(format!("bad authorization endpoint: {e}")))?;
        authorization_url
            .query_pairs_mut()
            .append_pair("response_type", "code")
            .append_pair("client_id", &client_id)
            .append_pair("redirect_uri", redirect_uri)
            .append_pair("code_challenge", &pkce.challenge)
            .append_pair("code_challenge_method", "S256")
            .append_pair("state", &state);

        Ok(PendingOAuth {
            authorization_url: authorization_url.to_string(),
            state,
            verifier: pkce.verifier,
            token_url: metadata.token_endpoint,
        })
    }

    /// Exchange an authorization code and persist the tokens on the
    /// server record. A subsequent [`Self::assemble_servers`] yields an
    /// authorized configuration.
    ///
    /// # Errors
    ///
    /// Fails when the token exchange is rejected or HTTP fails.
    pub async fn complete_oauth_flow(
        &self,
        server_id: ServerId,
        pending: &PendingOAuth,
        code: &str,
        redirect_uri: &str,
    ) -> McpResult<()> {
        let server = self.stores.mcp_servers.get(server_id.as_id()).await?;
        let client_id = match &server.auth {
            McpAuth::OAuth { client_id, .. } => {
                client_id.clone().unwrap_or_else(|| "agor".to_string())
            },
            _ => {
                return Err(McpError::ConfigError(format!(
                    "server {:?} is not oauth-authenticated",
                    server.name
                )));
            },
        };

        let response = self
            .http
            .post(&pending.token_url)
            .form(&[
                ("grant_type", "authorization_code"),
                ("code", code),
                ("redirect_uri", redirect_uri),
                ("code_verifier", &pending.verifier),
                ("client_id", &client_id),
            ])
            .send()
            .await
            .map_err(|e| McpError::AuthFailed {
                server: server.name.clone(),
                reason: format!("code exchange failed: {e}"),
            })?;

        if !response.status().is_success() {
            return Err(McpError::AuthFailed {
                server: server.name.clone(),
                reason: format!("code exchange returned {}", response.status()),
            });
        }

        let token: TokenResponse =
            response.json().await.map_err(|e| McpError::AuthFailed {
                server: server.name.clone(),
                reason: format!("token response unparseable: {e}"),
            })?;

        self.persist_tokens(server_id, &pending.token_url, &token)
            .await?;
        info!(server = %server.name, "oauth flow completed; tokens persisted");
        Ok(())
    }

    async fn persist_tokens(
        &self,
        server_id: ServerId,
        token_url: &str,
        token: &TokenResponse,
    ) -> McpResult<()> {
        let expires_at = token
            .expires_in
            .map(|secs| Timestamp(self.clock.now().0 + chrono::Duration::seconds(secs)));
        self.stores
            .mcp_servers
            .update(
                server_id.as_id(),
                json!({
                    "auth": {
                        "kind": "oauth2.1",
                        "token_url": token_url,
                        "access_token": token.access_token,
                        "refresh_token": token.refresh_token,
                        "expires_at": expires_at,
                    }
                }),
            )
            .await?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Discovery
    // ------------------------------------------------------------------

    /// Connect to a server and persist its tool/resource/prompt lists.
    ///
    /// Concurrent discovery on the same server is coalesced: callers
    /// arriving while a probe is in flight wait for it and reuse its
    /// freshly persisted result.
    ///
    /// # Errors
    ///
    /// Returns [`McpError::DiscoveryFailed`] when the probe fails;
    /// nothing is persisted in that case.
    pub async fn discover_capabilities(
        &self,
        server_id: ServerId,
        acting_user: Option<&User>,
    ) -> McpResult<Discovered> {
        let lock = self
            .discovery_locks
            .entry(server_id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let _guard = lock.lock().await;

        let server = self.stores.mcp_servers.get(server_id.as_id()).await?;

        // A probe that just finished satisfies this call.
        let now = self.clock.now();
        if let Some(at) = server.discovered.discovered_at
            && now.since(at) < self.config.discovery_coalesce_window
        {
            return Ok(server.discovered);
        }

        let env: BTreeMap<String, String> = match acting_user {
            Some(user) => server
                .env
                .iter()
                .map(|(k, v)| (k.clone(), self.secrets.resolve_template(v, user)))
                .collect(),
            None => server.env.clone(),
        };

        let probed = self.prober.probe(&server, &env).await?;
        let discovered = Discovered {
            tools: probed.tools,
            resources: probed.resources,
            prompts: probed.prompts,
            discovered_at: Some(now),
        };

        self.stores
            .mcp_servers
            .update(
                server_id.as_id(),
                json!({ "discovered": discovered }),
            )
            .await?;

        info!(
            server = %server.name,
            tools = discovered.tools.len(),
            resources = discovered.resources.len(),
            prompts = discovered.prompts.len(),
            "capabilities discovered"
        );
        Ok(discovered)
    }
}

fn authorized_http(url: &str, token: &str) -> AgentMcpConfig {
    AgentMcpConfig::Http {
        url: url.to_string(),
        headers: BTreeMap::from([(
            "Authorization".to_string(),
            format!("Bearer {token}"),
        )]),
    }
}

impl std::fmt::Debug for McpResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("McpResolver")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::discovery::ProbedCapabilities;
    use agor_core::{
        AgentKind, OthersCan, OthersFsAccess, RefType, Repo, SystemClock, UserRole, Worktree,
        WorktreeId,
    };
    use agor_secrets::{DaemonCipher, SecretCipher};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// A prober returning a fixed tool list and counting probes.
    struct ScriptedProber {
        tools: Vec<String>,
        probes: AtomicUsize,
    }

    impl ScriptedProber {
        fn new(tools: &[&str]) -> Arc<Self> {
            Arc::new(Self {
                tools: tools.iter().map(ToString::to_string).collect(),
                probes: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl CapabilityProber for ScriptedProber {
        async fn probe(
            &self,
            _server: &McpServer,
            _env: &BTreeMap<String, String>,
        ) -> McpResult<ProbedCapabilities> {
            self.probes.fetch_add(1, Ordering::SeqCst);
            Ok(ProbedCapabilities {
                tools: self.tools.clone(),
                resources: Vec::new(),
                prompts: Vec::new(),
            })
        }
    }

    struct Fixture {
        stores: Arc<Stores>,
        resolver: McpResolver,
        session: Session,
        cipher: Arc<DaemonCipher>,
        user: User,
    }

    async fn fixture_with(prober: Arc<dyn CapabilityProber>) -> Fixture {
        let stores = Stores::in_memory();
        let cipher = Arc::new(DaemonCipher::new(&DaemonCipher::generate_key()));
        let secrets = Arc::new(
            SecretResolver::new(Arc::clone(&cipher) as Arc<dyn SecretCipher>)
                .with_process_env(BTreeMap::new()),
        );

        let user = stores
            .users
            .create(User::new("a@b.c", UserRole::Member))
            .await
            .unwrap();
        let repo = stores
            .repos
            .create(Repo::new("acme/widgets", "git@x:acme/widgets", "/srv/repo"))
            .await
            .unwrap();
        let worktree = stores
            .create_worktree(Worktree {
                id: WorktreeId::generate(),
                repo_id: repo.id,
                worktree_unique_id: 0,
                name: "main".into(),
                ref_name: "main".into(),
                ref_type: RefType::Branch,
                path: "/srv/wt/main".into(),
                archived: false,
                others_can: OthersCan::None,
                others_fs_access: OthersFsAccess::None,
                created_at: Timestamp::now(),
            })
            .await
            .unwrap();

        let session = stores
            .create_session(Session::new(
                worktree.id,
                user.id,
                AgentKind::ClaudeCode,
                "mcp-tok-1",
            ))
            .await
            .unwrap();

        let resolver = McpResolver::new(
            Arc::clone(&stores),
            secrets,
            Arc::new(SystemClock),
            prober,
            McpResolverConfig::default(),
        );
        Fixture {
            stores,
            resolver,
            session,
            cipher,
            user,
        }
    }

    async fn fixture() -> Fixture {
        fixture_with(ScriptedProber::new(&[])).await
    }

    #[tokio::test]
    async fn scope_chain_shadows_by_name_and_dedupes_by_id() {
        let f = fixture().await;
        let worktree = f
            .stores
            .worktrees
            .get(f.session.worktree_id.as_id())
            .await
            .unwrap();

        f.stores
            .create_mcp_server(McpServer::stdio(
                "fs",
                McpScope::Global,
                None,
                "global-fs",
                vec![],
            ))
            .await
            .unwrap();
        f.stores
            .create_mcp_server(McpServer::stdio(
                "fs",
                McpScope::Repo,
                Some(worktree.repo_id.as_id()),
                "repo-fs",
                vec![],
            ))
            .await
            .unwrap();
        let session_fs = f
            .stores
            .create_mcp_server(McpServer::stdio(
                "fs",
                McpScope::Session,
                Some(f.session.id.as_id()),
                "session-fs",
                vec![],
            ))
            .await
            .unwrap();

        // Also attach the session server explicitly: dedupe on id.
        let mut session = f.session.clone();
        session.agentic_config.mcp_server_ids.push(session_fs.id);

        let resolved = f.resolver.assemble_servers(&session).await.unwrap();
        match resolved.servers.get("fs").unwrap() {
            AgentMcpConfig::Stdio { command, .. } => assert_eq!(command, "session-fs"),
            other => panic!("wrong config: {other:?}"),
        }
        // fs + the built-in self-access server.
        assert_eq!(resolved.servers.len(), 2);
    }

    #[tokio::test]
    async fn disabled_servers_are_skipped() {
        let f = fixture().await;
        let mut server = McpServer::stdio("fs", McpScope::Global, None, "mcp-fs", vec![]);
        server.enabled = false;
        f.stores.create_mcp_server(server).await.unwrap();

        let resolved = f.resolver.assemble_servers(&f.session).await.unwrap();
        assert!(!resolved.servers.contains_key("fs"));
    }

    #[tokio::test]
    async fn bearer_servers_wrap_into_remote_shim() {
        let f = fixture().await;
        let mut user = f.user.clone();
        user.env_vars
            .insert("API_TOKEN".into(), f.cipher.seal("tok-xyz").unwrap());
        f.stores
            .users
            .update(
                f.user.id.as_id(),
                serde_json::to_value(&user).unwrap(),
            )
            .await
            .unwrap();

        let mut server =
            McpServer::http("remote", McpScope::Global, None, "https://mcp.example.com");
        server.auth = McpAuth::Bearer {
            token: "{{ user.env.API_TOKEN }}".into(),
        };
        f.stores.create_mcp_server(server).await.unwrap();

        let resolved = f.resolver.assemble_servers(&f.session).await.unwrap();
        match resolved.servers.get("remote").unwrap() {
            AgentMcpConfig::Stdio { command, args, .. } => {
                assert!(command.ends_with("mcp-remote"));
                assert_eq!(args[0], "https://mcp.example.com");
                assert_eq!(args[1], "--header");
                assert_eq!(args[2], "Authorization: Bearer tok-xyz");
            },
            other => panic!("wrong config: {other:?}"),
        }
    }

    #[tokio::test]
    async fn jwt_failure_degrades_to_direct_http() {
        let f = fixture().await;
        let mut server =
            McpServer::http("jwt-srv", McpScope::Global, None, "https://mcp.example.com");
        server.auth = McpAuth::Jwt {
            // Nothing listens here; the login fails fast.
            api_url: "http://127.0.0.1:9/login".into(),
            api_token: "t".into(),
            api_secret: "s".into(),
        };
        f.stores.create_mcp_server(server).await.unwrap();

        let resolved = f.resolver.assemble_servers(&f.session).await.unwrap();
        match resolved.servers.get("jwt-srv").unwrap() {
            AgentMcpConfig::Http { url, headers } => {
                assert_eq!(url, "https://mcp.example.com");
                assert!(headers.is_empty());
            },
            other => panic!("wrong config: {other:?}"),
        }
    }

    #[tokio::test]
    async fn oauth_without_credentials_requires_browser_flow() {
        let f = fixture().await;
        let mut server =
            McpServer::http("oauth-srv", McpScope::Global, None, "https://mcp.example.com");
        server.auth = McpAuth::OAuth {
            client_id: None,
            client_secret: None,
            token_url: None,
            access_token: None,
            refresh_token: None,
            expires_at: None,
        };
        let server = f.stores.create_mcp_server(server).await.unwrap();

        let resolved = f.resolver.assemble_servers(&f.session).await.unwrap();
        assert!(!resolved.servers.contains_key("oauth-srv"));
        assert_eq!(resolved.requires_browser_flow, vec![server.id]);
    }

    #[tokio::test]
    async fn oauth_with_persisted_token_is_authorized() {
        let f = fixture().await;
        let mut server =
            McpServer::http("oauth-srv", McpScope::Global, None, "https://mcp.example.com");
        server.auth = McpAuth::OAuth {
            client_id: None,
            client_secret: None,
            token_url: Some("https://auth.example.com/token".into()),
            access_token: Some("persisted".into()),
            refresh_token: None,
            expires_at: None,
        };
        f.stores.create_mcp_server(server).await.unwrap();

        let resolved = f.resolver.assemble_servers(&f.session).await.unwrap();
        match resolved.servers.get("oauth-srv").unwrap() {
            AgentMcpConfig::Http { headers, .. } => {
                assert_eq!(
                    headers.get("Authorization").map(String::as_str),
                    Some("Bearer persisted")
                );
            },
            other => panic!("wrong config: {other:?}"),
        }
    }

    #[tokio::test]
    async fn self_access_server_carries_session_token() {
        let f = fixture().await;
        let resolved = f.resolver.assemble_servers(&f.session).await.unwrap();
        match resolved.servers.get(SELF_ACCESS_SERVER_NAME).unwrap() {
            AgentMcpConfig::Http { url, .. } => {
                assert!(url.contains("token=mcp-tok-1"), "url was {url}");
            },
            other => panic!("wrong config: {other:?}"),
        }
    }

    #[tokio::test]
    async fn allowed_tools_aggregate_discovered_names() {
        let f = fixture().await;
        let mut server = McpServer::stdio("fs", McpScope::Global, None, "mcp-fs", vec![]);
        server.discovered.tools = vec!["read_file".into(), "write_file".into()];
        f.stores.create_mcp_server(server).await.unwrap();

        let resolved = f.resolver.assemble_servers(&f.session).await.unwrap();
        assert!(resolved.allowed_tools.contains("mcp__fs__read_file"));
        assert!(resolved.allowed_tools.contains("mcp__fs__write_file"));
    }

    #[tokio::test]
    async fn discovery_persists_and_coalesces() {
        let prober = ScriptedProber::new(&["alpha", "beta"]);
        let f = fixture_with(Arc::clone(&prober) as Arc<dyn CapabilityProber>).await;
        let server = f
            .stores
            .create_mcp_server(McpServer::stdio("fs", McpScope::Global, None, "mcp-fs", vec![]))
            .await
            .unwrap();

        let first = f
            .resolver
            .discover_capabilities(server.id, None)
            .await
            .unwrap();
        assert_eq!(first.tools, vec!["alpha", "beta"]);

        // Immediately after, a second call reuses the fresh result.
        let second = f
            .resolver
            .discover_capabilities(server.id, None)
            .await
            .unwrap();
        assert_eq!(second.tools, first.tools);
        assert_eq!(prober.probes.load(Ordering::SeqCst), 1);

        let stored = f.stores.mcp_servers.get(server.id.as_id()).await.unwrap();
        assert_eq!(stored.discovered.tools, vec!["alpha", "beta"]);
        assert!(stored.discovered.discovered_at.is_some());
    }
}
