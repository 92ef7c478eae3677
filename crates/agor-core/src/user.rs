//! Daemon users and their sealed secrets.

use crate::error::{CoreError, CoreResult};
use crate::id::UserId;
use crate::types::{Timestamp, UserRole};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Maximum length of a unix username.
pub const MAX_UNIX_USERNAME_LEN: usize = 32;

/// A human user of the daemon.
///
/// `unix_username` / `unix_uid` start unset and are assigned exactly once
/// by the identity store; once set they never change, and a uid is never
/// reused even after the user is deleted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    /// Entity id.
    pub id: UserId,
    /// Login email.
    pub email: String,
    /// Daemon role.
    pub role: UserRole,
    /// Assigned unix account name (lowercase `[a-z0-9_-]{1,32}`).
    #[serde(default)]
    pub unix_username: Option<String>,
    /// Assigned unix uid, unique within the configured range.
    #[serde(default)]
    pub unix_uid: Option<u32>,
    /// Sealed api keys, keyed by vendor (`"anthropic"`, `"openai"`, ...).
    #[serde(default)]
    pub api_keys: BTreeMap<String, SealedSecret>,
    /// Sealed environment variables.
    #[serde(default)]
    pub env_vars: BTreeMap<String, SealedSecret>,
    /// Creation time.
    pub created_at: Timestamp,
}

impl User {
    /// Create a user with no unix identity yet.
    #[must_use]
    pub fn new(email: impl Into<String>, role: UserRole) -> Self {
        Self {
            id: UserId::generate(),
            email: email.into(),
            role,
            unix_username: None,
            unix_uid: None,
            api_keys: BTreeMap::new(),
            env_vars: BTreeMap::new(),
            created_at: Timestamp::now(),
        }
    }
}

/// An opaque ciphertext blob, sealed by the daemon's secret cipher.
///
/// Serialized as base64 so entities stay JSON-friendly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SealedSecret(pub Vec<u8>);

impl Serialize for SealedSecret {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        use base64::Engine as _;
        let encoded = base64::engine::general_purpose::STANDARD.encode(&self.0);
        serializer.serialize_str(&encoded)
    }
}

impl<'de> Deserialize<'de> for SealedSecret {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        use base64::Engine as _;
        let encoded = String::deserialize(deserializer)?;
        base64::engine::general_purpose::STANDARD
            .decode(encoded.as_bytes())
            .map(Self)
            .map_err(serde::de::Error::custom)
    }
}

/// Validate a unix username: lowercase `[a-z0-9_-]`, 1..=32 chars, must
/// not start with a hyphen.
///
/// # Errors
///
/// Returns [`CoreError::InvalidUsername`] when the name is malformed.
pub fn validate_unix_username(name: &str) -> CoreResult<()> {
    let valid = !name.is_empty()
        && name.len() <= MAX_UNIX_USERNAME_LEN
        && !name.starts_with('-')
        && name
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_' || c == '-');
    if valid {
        Ok(())
    } else {
        Err(CoreError::InvalidUsername {
            name: name.to_string(),
        })
    }
}
