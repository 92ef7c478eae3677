//! Worktrees: checked-out refs living in their own directories.

use crate::id::{RepoId, WorktreeId};
use crate::types::{OthersCan, OthersFsAccess, RefType, Timestamp};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// A checked-out branch/tag/sha in its own directory. Sessions bind to
/// exactly one worktree; owners are a separate many-to-many link held by
/// the store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Worktree {
    /// Entity id.
    pub id: WorktreeId,
    /// Owning repo. Immutable after creation.
    pub repo_id: RepoId,
    /// Monotonic per-repo counter, assigned by the store.
    pub worktree_unique_id: u64,
    /// Display name; also the symlink name under `~user/agor/worktrees/`.
    pub name: String,
    /// The checked-out ref.
    pub ref_name: String,
    /// What kind of ref.
    pub ref_type: RefType,
    /// Directory on disk.
    pub path: PathBuf,
    /// Archived worktrees take no new sessions.
    #[serde(default)]
    pub archived: bool,
    /// What non-owners may do through the daemon.
    #[serde(default)]
    pub others_can: OthersCan,
    /// Filesystem access for non-owners; drives the directory mode.
    #[serde(default)]
    pub others_fs_access: OthersFsAccess,
    /// Creation time.
    pub created_at: Timestamp,
}

impl Worktree {
    /// The posix group name for this worktree, derived from its id.
    #[must_use]
    pub fn unix_group(&self) -> String {
        format!("agor-wt-{}", self.id.short())
    }

    /// Canonical directory mode for the current `others_fs_access`.
    #[must_use]
    pub const fn dir_mode(&self) -> u32 {
        self.others_fs_access.dir_mode()
    }
}
