//! OAuth 2.1 support: client-credentials, Authorization-Code + PKCE, and
//! RFC 9728 token-endpoint auto-discovery.

use crate::error::{McpError, McpResult};
use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use rand::RngCore as _;
use serde::Deserialize;
use sha2::{Digest as _, Sha256};

/// A token response from an OAuth token endpoint.
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct TokenResponse {
    /// The bearer token.
    pub access_token: String,
    /// Refresh token, when issued.
    #[serde(default)]
    pub refresh_token: Option<String>,
    /// Lifetime in seconds.
    #[serde(default)]
    pub expires_in: Option<i64>,
}

/// Authorization-server metadata (RFC 8414), as far as we need it.
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct AuthServerMetadata {
    /// Where the browser is sent.
    pub authorization_endpoint: String,
    /// Where codes are exchanged.
    pub token_endpoint: String,
}

/// Protected-resource metadata (RFC 9728), as far as we need it.
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct ResourceMetadata {
    /// Authorization servers protecting the resource.
    #[serde(default)]
    pub authorization_servers: Vec<String>,
}

/// State carried between starting a browser flow and completing it with
/// the authorization code.
#[derive(Debug, Clone)]
pub struct PendingOAuth {
    /// The URL to open in the user's browser.
    pub authorization_url: String,
    /// CSRF state; must round-trip through the redirect.
    pub state: String,
    /// PKCE code verifier; needed at code exchange.
    pub verifier: String,
    /// Token endpoint resolved for this flow.
    pub token_url: String,
}

/// A freshly generated PKCE pair.
#[derive(Debug, Clone)]
pub(crate) struct PkcePair {
    pub verifier: String,
    pub challenge: String,
}

/// Generate a PKCE verifier and its S256 challenge.
pub(crate) fn generate_pkce() -> PkcePair {
    let mut bytes = [0u8; 48];
    rand::thread_rng().fill_bytes(&mut bytes);
    let verifier = URL_SAFE_NO_PAD.encode(bytes);
    let challenge = URL_SAFE_NO_PAD.encode(Sha256::digest(verifier.as_bytes()));
    PkcePair {
        verifier,
        challenge,
    }
}

/// Generate a random CSRF state value.
pub(crate) fn generate_state() -> String {
    let mut bytes = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Extract the `resource_metadata` URL from a `WWW-Authenticate`
/// challenge (RFC 9728 §5.1), e.g.
/// `Bearer resource_metadata="https://mcp.example.com/.well-known/..."`.
pub(crate) fn parse_resource_metadata(www_authenticate: &str) -> Option<String> {
    let marker = "resource_metadata=";
    let start = www_authenticate.find(marker)?.checked_add(marker.len())?;
    let rest = www_authenticate.get(start..)?;
    let rest = rest.strip_prefix('"')?;
    let end = rest.find('"')?;
    Some(rest[..end].to_string())
}

/// Resolve an authorization server's metadata from its issuer URL.
pub(crate) async fn fetch_auth_server_metadata(
    http: &reqwest::Client,
    issuer: &str,
) -> McpResult<AuthServerMetadata> {
    let base = issuer.trim_end_matches('/');
    let url = format!("{base}/.well-known/oauth-authorization-server");
    let metadata = http
        .get(&url)
        .send()
        .await?
        .error_for_status()?
        .json::<AuthServerMetadata>()
        .await?;
    Ok(metadata)
}

/// Discover the authorization-server metadata protecting `server_url`:
/// probe the server, read the `WWW-Authenticate` challenge, follow the
/// resource metadata to its first authorization server.
pub(crate) async fn discover_from_challenge(
    http: &reqwest::Client,
    server_name: &str,
    server_url: &str,
) -> McpResult<AuthServerMetadata> {
    let probe = http.get(server_url).send().await?;
    let challenge = probe
        .headers()
        .get(reqwest::header::WWW_AUTHENTICATE)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| McpError::AuthFailed {
            server: server_name.to_string(),
            reason: "no WWW-Authenticate challenge to discover from".to_string(),
        })?;

    let metadata_url =
        parse_resource_metadata(challenge).ok_or_else(|| McpError::AuthFailed {
            server: server_name.to_string(),
            reason: format!("challenge carries no resource_metadata: {challenge:?}"),
        })?;

    let resource = http
        .get(&metadata_url)
        .send()
        .await?
        .error_for_status()?
        .json::<ResourceMetadata>()
        .await?;

    let issuer = resource
        .authorization_servers
        .first()
        .ok_or_else(|| McpError::AuthFailed {
            server: server_name.to_string(),
            reason: "resource metadata lists no authorization servers".to_string(),
        })?;

    fetch_auth_server_metadata(http, issuer).await
}
