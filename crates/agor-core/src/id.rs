//! Entity identifiers.
//!
//! Every entity id is a 128-bit time-ordered UUID (v7), rendered
//! canonically as the 36-char hyphenated form and abbreviated to an
//! 8-char prefix for human-facing use. Prefix lookup lives in the store
//! layer; this module only answers "does this id match that prefix".

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Length of the human-facing short id (hex chars, hyphens stripped).
pub const SHORT_ID_LEN: usize = 8;

/// A 128-bit time-ordered entity identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Id(Uuid);

impl Id {
    /// Generate a fresh time-ordered id.
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::now_v7())
    }

    /// Wrap an existing UUID.
    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// The underlying UUID.
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }

    /// The 8-char short form: first hex chars of the id, hyphens stripped.
    #[must_use]
    pub fn short(&self) -> String {
        let simple = self.0.simple().to_string();
        simple[..SHORT_ID_LEN].to_string()
    }

    /// Whether this id starts with `prefix` (full or short form, hyphens
    /// ignored, case-insensitive).
    #[must_use]
    pub fn matches_prefix(&self, prefix: &str) -> bool {
        let needle: String = prefix
            .chars()
            .filter(|c| *c != '-')
            .flat_map(char::to_lowercase)
            .collect();
        if needle.is_empty() {
            return false;
        }
        self.0.simple().to_string().starts_with(&needle)
    }
}

impl fmt::Display for Id {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.hyphenated())
    }
}

impl FromStr for Id {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

macro_rules! entity_id {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(pub Id);

        impl $name {
            /// Generate a fresh id.
            #[must_use]
            pub fn generate() -> Self {
                Self(Id::generate())
            }

            /// The untyped id.
            #[must_use]
            pub const fn as_id(&self) -> Id {
                self.0
            }

            /// The 8-char short form.
            #[must_use]
            pub fn short(&self) -> String {
                self.0.short()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                self.0.fmt(f)
            }
        }

        impl FromStr for $name {
            type Err = uuid::Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Id::from_str(s).map(Self)
            }
        }

        impl From<Id> for $name {
            fn from(id: Id) -> Self {
                Self(id)
            }
        }

        impl From<$name> for Id {
            fn from(id: $name) -> Self {
                id.0
            }
        }
    };
}

entity_id!(
    /// Identifier of a [`crate::User`].
    UserId
);
entity_id!(
    /// Identifier of a [`crate::Repo`].
    RepoId
);
entity_id!(
    /// Identifier of a [`crate::Worktree`].
    WorktreeId
);
entity_id!(
    /// Identifier of a [`crate::Session`].
    SessionId
);
entity_id!(
    /// Identifier of a [`crate::Task`].
    TaskId
);
entity_id!(
    /// Identifier of a [`crate::Message`].
    MessageId
);
entity_id!(
    /// Identifier of a [`crate::McpServer`].
    ServerId
);
entity_id!(
    /// Identifier of a [`crate::PermissionRequest`].
    RequestId
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_ids_are_time_ordered() {
        let a = Id::generate();
        std::thread::sleep(std::time::Duration::from_millis(2));
        let b = Id::generate();
        assert!(a < b);
        assert!(a.to_string() < b.to_string());
    }

    #[test]
    fn short_is_eight_hex_chars() {
        let id = Id::generate();
        let short = id.short();
        assert_eq!(short.len(), 8);
        assert!(short.chars().all(|c| c.is_ascii_hexdigit()));
        assert!(!short.contains('-'));
    }

    #[test]
    fn prefix_matching_ignores_hyphens_and_case() {
        let id: Id = "0192aabb-ccdd-7eef-8011-223344556677".parse().unwrap();
        assert!(id.matches_prefix("0192aabb"));
        assert!(id.matches_prefix("0192AABB"));
        assert!(id.matches_prefix("0192aabb-ccdd"));
        assert!(!id.matches_prefix("0192aabc"));
        assert!(!id.matches_prefix(""));
    }

    #[test]
    fn display_is_canonical_hyphenated() {
        let id = Id::generate();
        let s = id.to_string();
        assert_eq!(s.len(), 36);
        assert_eq!(s.matches('-').count(), 4);
        let back: Id = s.parse().unwrap();
        assert_eq!(back, id);
    }

    #[test]
    fn typed_ids_round_trip_serde() {
        let id = SessionId::generate();
        let json = serde_json::to_string(&id).unwrap();
        let back: SessionId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
    }
}
