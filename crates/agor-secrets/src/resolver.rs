//! Template, environment, and api-key resolution.

use crate::cipher::SecretCipher;
use crate::error::SecretResult;
use agor_core::User;
use regex::{Captures, Regex};
use std::collections::BTreeMap;
use std::sync::{Arc, LazyLock};
use tracing::warn;

/// Matches `{{ user.env.NAME }}` (whitespace-tolerant). Only this exact
/// prefix is recognised; any other `{{ ... }}` passes through untouched.
static TEMPLATE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\{\{\s*user\.env\.([A-Za-z_][A-Za-z0-9_]*)\s*\}\}")
        .expect("template regex compiles")
});

/// Resolves secrets for spawn-time use: templates, merged environments,
/// and vendor api keys.
pub struct SecretResolver {
    cipher: Arc<dyn SecretCipher>,
    /// Daemon-level api keys, keyed by vendor.
    global_api_keys: BTreeMap<String, String>,
    /// The daemon process environment, captured once (injectable for
    /// tests).
    process_env: BTreeMap<String, String>,
}

impl SecretResolver {
    /// Build a resolver over the daemon's cipher, capturing the current
    /// process environment.
    #[must_use]
    pub fn new(cipher: Arc<dyn SecretCipher>) -> Self {
        Self {
            cipher,
            global_api_keys: BTreeMap::new(),
            process_env: std::env::vars().collect(),
        }
    }

    /// Replace the captured process environment (tests).
    #[must_use]
    pub fn with_process_env(mut self, env: BTreeMap<String, String>) -> Self {
        self.process_env = env;
        self
    }

    /// Set daemon-level api keys (vendor → key).
    #[must_use]
    pub fn with_global_api_keys(mut self, keys: BTreeMap<String, String>) -> Self {
        self.global_api_keys = keys;
        self
    }

    /// Seal a plaintext value for storage on a user record.
    ///
    /// # Errors
    ///
    /// Propagates cipher failures.
    pub fn seal(&self, plaintext: &str) -> SecretResult<agor_core::SealedSecret> {
        self.cipher.seal(plaintext)
    }

    /// Resolve `{{ user.env.NAME }}` templates in `input` against the
    /// user's sealed env-var store.
    ///
    /// Unknown names substitute the empty string and emit a warning;
    /// values that fail to decrypt are treated the same way.
    #[must_use]
    pub fn resolve_template(&self, input: &str, user: &User) -> String {
        TEMPLATE_RE
            .replace_all(input, |caps: &Captures<'_>| {
                let name = &caps[1];
                match user.env_vars.get(name) {
                    Some(sealed) => match self.cipher.open(sealed) {
                        Ok(value) => value,
                        Err(e) => {
                            warn!(user = %user.id, var = name, error = %e,
                                "failed to decrypt env var referenced by template");
                            String::new()
                        },
                    },
                    None => {
                        warn!(user = %user.id, var = name,
                            "template references unknown env var");
                        String::new()
                    },
                }
            })
            .into_owned()
    }

    /// The merged environment for a user: process env (lowest
    /// precedence) overlaid with the user's sealed env-var store
    /// (highest).
    ///
    /// Variables that fail to decrypt are skipped with a warning rather
    /// than poisoning the whole environment.
    #[must_use]
    pub fn resolve_env(&self, user: &User) -> BTreeMap<String, String> {
        let mut env = self.process_env.clone();
        for (name, sealed) in &user.env_vars {
            match self.cipher.open(sealed) {
                Ok(value) => {
                    env.insert(name.clone(), value);
                },
                Err(e) => {
                    warn!(user = %user.id, var = name, error = %e,
                        "failed to decrypt user env var");
                },
            }
        }
        env
    }

    /// The api key for a vendor: per-user > global config > process env
    /// (`<VENDOR>_API_KEY`).
    #[must_use]
    pub fn resolve_api_key(&self, vendor: &str, user: &User) -> Option<String> {
        if let Some(sealed) = user.api_keys.get(vendor) {
            match self.cipher.open(sealed) {
                Ok(key) => return Some(key),
                Err(e) => {
                    warn!(user = %user.id, vendor, error = %e,
                        "failed to decrypt user api key; falling back");
                },
            }
        }

        if let Some(key) = self.global_api_keys.get(vendor) {
            return Some(key.clone());
        }

        let env_name = format!("{}_API_KEY", vendor.to_ascii_uppercase());
        self.process_env.get(&env_name).cloned()
    }
}

impl std::fmt::Debug for SecretResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecretResolver")
            .field("global_api_keys", &self.global_api_keys.keys())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cipher::DaemonCipher;
    use agor_core::UserRole;

    fn resolver_and_user() -> (SecretResolver, User, Arc<DaemonCipher>) {
        let cipher = Arc::new(DaemonCipher::new(&DaemonCipher::generate_key()));
        let resolver = SecretResolver::new(Arc::clone(&cipher) as Arc<dyn SecretCipher>)
            .with_process_env(BTreeMap::new());
        let user = User::new("a@b.c", UserRole::Member);
        (resolver, user, cipher)
    }

    #[test]
    fn template_substitutes_decrypted_value() {
        let (resolver, mut user, cipher) = resolver_and_user();
        user.env_vars
            .insert("GH_TOKEN".into(), cipher.seal("tok123").unwrap());

        let out = resolver.resolve_template("Bearer {{ user.env.GH_TOKEN }}", &user);
        assert_eq!(out, "Bearer tok123");

        // Whitespace-tolerant.
        let out = resolver.resolve_template("{{user.env.GH_TOKEN}}", &user);
        assert_eq!(out, "tok123");
    }

    #[test]
    fn unknown_template_names_become_empty() {
        let (resolver, user, _) = resolver_and_user();
        let out = resolver.resolve_template("x={{ user.env.MISSING }};", &user);
        assert_eq!(out, "x=;");
    }

    #[test]
    fn only_the_exact_prefix_is_recognised() {
        let (resolver, user, _) = resolver_and_user();
        let input = "{{ user.secret.X }} {{ env.Y }} {{ something }}";
        assert_eq!(resolver.resolve_template(input, &user), input);
    }

    #[test]
    fn resolve_env_user_store_wins() {
        let (resolver, mut user, cipher) = resolver_and_user();
        let resolver = resolver.with_process_env(BTreeMap::from([
            ("PATH".to_string(), "/usr/bin".to_string()),
            ("SHARED".to_string(), "process".to_string()),
        ]));
        user.env_vars
            .insert("SHARED".into(), cipher.seal("user").unwrap());

        let env = resolver.resolve_env(&user);
        assert_eq!(env.get("PATH").map(String::as_str), Some("/usr/bin"));
        assert_eq!(env.get("SHARED").map(String::as_str), Some("user"));
    }

    #[test]
    fn api_key_precedence_user_global_process() {
        let (resolver, mut user, cipher) = resolver_and_user();
        let resolver = resolver
            .with_process_env(BTreeMap::from([(
                "ANTHROPIC_API_KEY".to_string(),
                "from-process".to_string(),
            )]))
            .with_global_api_keys(BTreeMap::from([(
                "anthropic".to_string(),
                "from-global".to_string(),
            )]));

        // Process env only reached when nothing else matches.
        assert_eq!(
            resolver.resolve_api_key("anthropic", &user).as_deref(),
            Some("from-global")
        );

        user.api_keys
            .insert("anthropic".into(), cipher.seal("from-user").unwrap());
        assert_eq!(
            resolver.resolve_api_key("anthropic", &user).as_deref(),
            Some("from-user")
        );

        // Unknown vendor falls through to process env naming.
        let resolver = resolver.with_global_api_keys(BTreeMap::new());
        assert_eq!(
            resolver.resolve_api_key("anthropic", &user).as_deref(),
            Some("from-user")
        );
        let plain = User::new("x@y.z", UserRole::Member);
        assert_eq!(
            resolver.resolve_api_key("anthropic", &plain).as_deref(),
            Some("from-process")
        );
    }
}
