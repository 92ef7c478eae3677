//! Git repositories known to the daemon.

use crate::id::RepoId;
use crate::types::Timestamp;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// A git repository; worktrees hang off it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Repo {
    /// Entity id.
    pub id: RepoId,
    /// Human slug (e.g. `"acme/widgets"`).
    pub slug: String,
    /// Remote URL.
    pub remote_url: String,
    /// Local clone path.
    pub local_path: PathBuf,
    /// Creation time.
    pub created_at: Timestamp,
}

impl Repo {
    /// Create a repo record.
    #[must_use]
    pub fn new(
        slug: impl Into<String>,
        remote_url: impl Into<String>,
        local_path: impl Into<PathBuf>,
    ) -> Self {
        Self {
            id: RepoId::generate(),
            slug: slug.into(),
            remote_url: remote_url.into(),
            local_path: local_path.into(),
            created_at: Timestamp::now(),
        }
    }
}
