//! The Unix controller: provisioning users, worktree groups, modes, and
//! symlink fan-out. Every mutation is check-then-mutate, so repeated
//! runs converge without side effects.

use crate::error::UnixResult;
use crate::executor::CommandExecutor;
use crate::identity::IdentityStore;
use crate::zellij::{ZELLIJ_CONFIG, ZELLIJ_CONFIG_RELPATH};
use agor_core::{UserId, Worktree, WorktreeId};
use agor_store::{EntityStore as _, Stores};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

/// Controller configuration.
#[derive(Debug, Clone)]
pub struct UnixConfig {
    /// Host-wide group every managed user joins. The impersonation
    /// layer refuses to setuid to accounts outside it.
    pub agor_group: String,
    /// Base directory for managed homes.
    pub home_base: PathBuf,
    /// Login shell for managed users.
    pub shell: String,
    /// Maintain `~user/agor/worktrees/<name>` symlinks on group
    /// membership changes.
    pub auto_manage_symlinks: bool,
}

impl Default for UnixConfig {
    fn default() -> Self {
        Self {
            agor_group: "agor_users".to_string(),
            home_base: PathBuf::from("/home"),
            shell: "/bin/bash".to_string(),
            auto_manage_symlinks: true,
        }
    }
}

/// Provisions and reconciles host-level state.
pub struct UnixController {
    stores: Arc<Stores>,
    executor: Arc<dyn CommandExecutor>,
    identity: Arc<IdentityStore>,
    config: UnixConfig,
}

impl UnixController {
    /// Create a controller.
    #[must_use]
    pub fn new(
        stores: Arc<Stores>,
        executor: Arc<dyn CommandExecutor>,
        identity: Arc<IdentityStore>,
        config: UnixConfig,
    ) -> Self {
        Self {
            stores,
            executor,
            identity,
            config,
        }
    }

    fn home_of(&self, username: &str) -> PathBuf {
        self.config.home_base.join(username)
    }

    /// Ensure the host-wide agor group exists.
    ///
    /// # Errors
    ///
    /// Propagates command failures.
    pub async fn ensure_agor_group(&self) -> UnixResult<()> {
        let group = self.config.agor_group.as_str();
        if !self.executor.check(&["getent", "group", group]).await {
            self.executor.exec(&["groupadd", "--system", group]).await?;
            info!(group, "created agor group");
        }
        Ok(())
    }

    /// Ensure a daemon user has a provisioned Unix account: identity,
    /// account, home skeleton, zellij config, agor-group membership.
    /// Idempotent — `useradd` runs at most once per user.
    ///
    /// # Errors
    ///
    /// Propagates identity, store, and command failures.
    pub async fn ensure_user(&self, user_id: UserId) -> UnixResult<(String, u32)> {
        self.ensure_agor_group().await?;
        let (username, uid) = self.identity.ensure(user_id).await?;
        let home = self.home_of(&username);

        if !self
            .executor
            .check(&["getent", "passwd", username.as_str()])
            .await
        {
            self.executor
                .exec(&[
                    "useradd",
                    "--uid",
                    &uid.to_string(),
                    "--create-home",
                    "--home-dir",
                    &path_str(&home),
                    "--shell",
                    &self.config.shell,
                    &username,
                ])
                .await?;
            info!(user = %user_id, %username, uid, "created unix account");
        }

        // Home skeleton for worktree symlinks.
        let worktrees_dir = home.join("agor/worktrees");
        self.executor
            .exec(&["mkdir", "-p", &path_str(&worktrees_dir)])
            .await?;
        self.executor
            .exec(&["chown", &username, &path_str(&worktrees_dir)])
            .await?;

        self.write_zellij_config(&username, &home).await?;

        self.executor
            .exec(&["usermod", "-aG", &self.config.agor_group, &username])
            .await?;

        Ok((username, uid))
    }

    /// Write the zellij config once; never overwrite user edits.
    async fn write_zellij_config(&self, username: &str, home: &Path) -> UnixResult<()> {
        let config_path = home.join(ZELLIJ_CONFIG_RELPATH);
        if self
            .executor
            .check(&["test", "-f", &path_str(&config_path)])
            .await
        {
            return Ok(());
        }
        let parent = config_path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| home.to_path_buf());
        self.executor
            .exec(&["mkdir", "-p", &path_str(&parent)])
            .await?;
        self.executor
            .exec_with_input(&["tee", &path_str(&config_path)], ZELLIJ_CONFIG)
            .await?;
        self.executor
            .exec(&["chown", username, &path_str(&config_path)])
            .await?;
        Ok(())
    }

    /// Ensure the worktree's group exists and its directory carries the
    /// canonical group and mode for its sharing level. Returns the group
    /// name.
    ///
    /// # Errors
    ///
    /// Propagates store and command failures.
    pub async fn create_worktree_group(&self, worktree_id: WorktreeId) -> UnixResult<String> {
        let worktree = self.stores.worktrees.get(worktree_id.as_id()).await?;
        let group = worktree.unix_group();

        if !self.executor.check(&["getent", "group", &group]).await {
            self.executor.exec(&["groupadd", &group]).await?;
            info!(%group, worktree = %worktree_id, "created worktree group");
        }

        let path = path_str(&worktree.path);
        self.executor.exec(&["chgrp", &group, &path]).await?;
        self.executor
            .exec(&["chmod", worktree.others_fs_access.mode_str(), &path])
            .await?;

        Ok(group)
    }

    /// Add a user to a worktree's group; maintain the home symlink when
    /// enabled. Idempotent.
    ///
    /// # Errors
    ///
    /// Propagates identity, store, and command failures.
    pub async fn add_user_to_worktree_group(
        &self,
        worktree_id: WorktreeId,
        user_id: UserId,
    ) -> UnixResult<()> {
        let worktree = self.stores.worktrees.get(worktree_id.as_id()).await?;
        let group = self.create_worktree_group(worktree_id).await?;
        let (username, _) = self.identity.ensure(user_id).await?;

        self.executor
            .exec(&["usermod", "-aG", &group, &username])
            .await?;

        if self.config.auto_manage_symlinks {
            let link = self.worktree_link(&username, &worktree);
            self.executor
                .exec(&["ln", "-sfn", &path_str(&worktree.path), &path_str(&link)])
                .await?;
        }
        Ok(())
    }

    /// Remove a user from a worktree's group; drop the symlink when
    /// enabled. Idempotent.
    ///
    /// # Errors
    ///
    /// Propagates identity, store, and command failures.
    pub async fn remove_user_from_worktree_group(
        &self,
        worktree_id: WorktreeId,
        user_id: UserId,
    ) -> UnixResult<()> {
        let worktree = self.stores.worktrees.get(worktree_id.as_id()).await?;
        let group = worktree.unix_group();
        let Some((username, _)) = self.identity.lookup(user_id).await? else {
            // Never provisioned; nothing to remove.
            return Ok(());
        };

        self.executor
            .exec(&["gpasswd", "-d", &username, &group])
            .await?;

        if self.config.auto_manage_symlinks {
            let link = self.worktree_link(&username, &worktree);
            self.executor.exec(&["rm", "-f", &path_str(&link)]).await?;
        }
        Ok(())
    }

    /// Set a user's login password. The plaintext travels via
    /// `chpasswd` stdin only — never on a command line.
    ///
    /// # Errors
    ///
    /// Propagates identity and command failures.
    pub async fn sync_password(&self, user_id: UserId, plaintext: &str) -> UnixResult<()> {
        let (username, _) = self.identity.ensure(user_id).await?;
        self.executor
            .exec_with_input(&["chpasswd"], &format!("{username}:{plaintext}\n"))
            .await?;
        Ok(())
    }

    /// Reconcile one worktree: group, mode, and owner memberships.
    ///
    /// # Errors
    ///
    /// Propagates store and command failures.
    pub async fn sync_worktree(&self, worktree_id: WorktreeId) -> UnixResult<()> {
        self.create_worktree_group(worktree_id).await?;
        for owner in self.stores.get_owners(worktree_id).await {
            self.add_user_to_worktree_group(worktree_id, owner).await?;
        }
        Ok(())
    }

    /// Reconcile one user: account, skeleton, group membership.
    ///
    /// # Errors
    ///
    /// Propagates identity, store, and command failures.
    pub async fn sync_user(&self, user_id: UserId) -> UnixResult<()> {
        self.ensure_user(user_id).await?;
        Ok(())
    }

    /// Reconcile everything from stored truth. Idempotent over repeated
    /// runs; individual worktree failures are logged and skipped so one
    /// bad path cannot wedge the whole pass.
    ///
    /// # Errors
    ///
    /// Propagates store failures and user-provisioning failures.
    pub async fn sync_all(&self) -> UnixResult<()> {
        self.ensure_agor_group().await?;

        for user in self.stores.users.find_all().await? {
            self.sync_user(user.id).await?;
        }
        for worktree in self.stores.worktrees.find_all().await? {
            if let Err(e) = self.sync_worktree(worktree.id).await {
                warn!(worktree = %worktree.id, error = %e, "worktree sync failed; continuing");
            }
        }
        Ok(())
    }

    /// The identity store this controller provisions through.
    #[must_use]
    pub fn identity(&self) -> &IdentityStore {
        &self.identity
    }

    /// The numeric gid of a group, via `getent`.
    ///
    /// # Errors
    ///
    /// Fails when the group does not exist or `getent` output is
    /// malformed.
    pub async fn resolve_gid(&self, group: &str) -> UnixResult<u32> {
        let line = self.executor.exec(&["getent", "group", group]).await?;
        line.trim()
            .split(':')
            .nth(2)
            .and_then(|gid| gid.parse().ok())
            .ok_or(crate::error::UnixError::UnparseableOutput {
                op: format!("getent group {group}"),
                output: line,
            })
    }

    /// The controller's configuration.
    #[must_use]
    pub fn config(&self) -> &UnixConfig {
        &self.config
    }

    fn worktree_link(&self, username: &str, worktree: &Worktree) -> PathBuf {
        self.home_of(username)
            .join("agor/worktrees")
            .join(&worktree.name)
    }
}

impl std::fmt::Debug for UnixController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UnixController")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

fn path_str(path: &Path) -> String {
    path.display().to_string()
}
