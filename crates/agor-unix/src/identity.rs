//! Identity store: maps daemon users to Unix usernames and uids.
//!
//! Stable uids keep file ownership correct across NFS/EFS mounts where
//! daemon hosts rotate. Allocation is append-only: a uid is assigned
//! exactly once and never reused, even after its user is deleted.

use crate::error::{UnixError, UnixResult};
use crate::executor::CommandExecutor;
use agor_core::{UserId, validate_unix_username};
use agor_store::{EntityStore as _, Stores};
use serde_json::json;
use std::collections::BTreeSet;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::info;

/// Inclusive uid allocation range.
#[derive(Debug, Clone, Copy)]
pub struct UidRange {
    /// First allocatable uid.
    pub start: u32,
    /// Last allocatable uid.
    pub end: u32,
}

impl Default for UidRange {
    fn default() -> Self {
        Self {
            start: 10_000,
            end: 60_000,
        }
    }
}

/// Maps daemon user ids to `(unix_username, uid)`, allocating uids from
/// the configured range.
pub struct IdentityStore {
    stores: Arc<Stores>,
    executor: Arc<dyn CommandExecutor>,
    range: UidRange,
    /// Serialises allocate-and-persist so two concurrent `ensure` calls
    /// cannot pick the same uid.
    alloc_lock: Mutex<()>,
}

impl IdentityStore {
    /// Create an identity store.
    #[must_use]
    pub fn new(stores: Arc<Stores>, executor: Arc<dyn CommandExecutor>, range: UidRange) -> Self {
        Self {
            stores,
            executor,
            range,
            alloc_lock: Mutex::new(()),
        }
    }

    /// Ensure a user has a unix identity, assigning one if needed.
    ///
    /// - Already assigned: returns it.
    /// - Username known but uid not recorded: queries the OS (`id -u`)
    ///   and records the answer.
    /// - Nothing assigned: synthesises `agor-<short>` and allocates the
    ///   lowest unused uid in the range, persisting atomically.
    ///
    /// # Errors
    ///
    /// Returns [`UnixError::NoUidAvailable`] when the range is
    /// exhausted; propagates store and command failures.
    pub async fn ensure(&self, user_id: UserId) -> UnixResult<(String, u32)> {
        let _guard = self.alloc_lock.lock().await;

        let user = self.stores.users.get(user_id.as_id()).await?;

        if let (Some(name), Some(uid)) = (&user.unix_username, user.unix_uid) {
            self.stores.record_uid(uid).await;
            return Ok((name.clone(), uid));
        }

        if let Some(name) = &user.unix_username {
            // Username exists but the uid was never recorded; ask the OS.
            let output = self.executor.exec(&["id", "-u", name]).await?;
            let uid: u32 =
                output
                    .trim()
                    .parse()
                    .map_err(|_| UnixError::UnparseableOutput {
                        op: format!("id -u {name}"),
                        output,
                    })?;
            self.persist(user_id, name.clone(), uid).await?;
            return Ok((name.clone(), uid));
        }

        let name = self.synthesize_username(&user).await?;
        validate_unix_username(&name)?;
        let uid = self.allocate().await?;
        self.persist(user_id, name.clone(), uid).await?;
        info!(user = %user_id, unix_username = %name, uid, "assigned unix identity");
        Ok((name, uid))
    }

    /// The user's unix identity, if assigned.
    ///
    /// # Errors
    ///
    /// Propagates store failures.
    pub async fn lookup(&self, user_id: UserId) -> UnixResult<Option<(String, u32)>> {
        let user = self.stores.users.get(user_id.as_id()).await?;
        Ok(match (user.unix_username, user.unix_uid) {
            (Some(name), Some(uid)) => Some((name, uid)),
            _ => None,
        })
    }

    /// `agor-<short>`, extended with further id chars when another user
    /// already claimed the prefix (time-ordered ids share their leading
    /// chars when minted close together; usernames must stay bijective
    /// with uids).
    async fn synthesize_username(&self, user: &agor_core::User) -> UnixResult<String> {
        let taken: BTreeSet<String> = self
            .stores
            .users
            .find_all()
            .await?
            .into_iter()
            .filter(|u| u.id != user.id)
            .filter_map(|u| u.unix_username)
            .collect();

        let hex = user.id.as_id().as_uuid().simple().to_string();
        for len in (8..=hex.len()).step_by(2) {
            let candidate = format!("agor-{}", &hex[..len.min(27)]);
            if !taken.contains(&candidate) {
                return Ok(candidate);
            }
        }
        // Full-id collision means the same user; unreachable in
        // practice, but fail loudly rather than alias an account.
        Err(UnixError::UnparseableOutput {
            op: "synthesize_username".to_string(),
            output: format!("no unique username for {}", user.id),
        })
    }

    /// Lowest unused uid in the range, considering every uid ever
    /// recorded and every uid on a live user record.
    async fn allocate(&self) -> UnixResult<u32> {
        let mut taken: BTreeSet<u32> = self.stores.recorded_uids().await;
        for user in self.stores.users.find_all().await? {
            if let Some(uid) = user.unix_uid {
                taken.insert(uid);
            }
        }

        (self.range.start..=self.range.end)
            .find(|uid| !taken.contains(uid))
            .ok_or(UnixError::NoUidAvailable {
                start: self.range.start,
                end: self.range.end,
            })
    }

    async fn persist(&self, user_id: UserId, name: String, uid: u32) -> UnixResult<()> {
        self.stores
            .users
            .update(
                user_id.as_id(),
                json!({ "unix_username": name, "unix_uid": uid }),
            )
            .await?;
        self.stores.record_uid(uid).await;
        Ok(())
    }
}

impl std::fmt::Debug for IdentityStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdentityStore")
            .field("range", &self.range)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::FakeHost;
    use agor_core::{User, UserRole};
    use agor_store::EntityStore as _;

    fn identity(stores: &Arc<Stores>, host: &Arc<FakeHost>) -> IdentityStore {
        IdentityStore::new(
            Arc::clone(stores),
            Arc::clone(host) as Arc<dyn CommandExecutor>,
            UidRange::default(),
        )
    }

    async fn new_user(stores: &Stores) -> User {
        stores
            .users
            .create(User::new("a@b.c", UserRole::Member))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn first_user_gets_range_start() {
        let stores = Stores::in_memory();
        let host = Arc::new(FakeHost::new());
        let identity = identity(&stores, &host);
        let user = new_user(&stores).await;

        let (name, uid) = identity.ensure(user.id).await.unwrap();
        assert_eq!(name, format!("agor-{}", user.id.short()));
        assert_eq!(uid, 10_000);

        let stored = stores.users.get(user.id.as_id()).await.unwrap();
        assert_eq!(stored.unix_uid, Some(10_000));
        assert_eq!(stored.unix_username, Some(name));
    }

    #[tokio::test]
    async fn ensure_is_idempotent() {
        let stores = Stores::in_memory();
        let host = Arc::new(FakeHost::new());
        let identity = identity(&stores, &host);
        let user = new_user(&stores).await;

        let first = identity.ensure(user.id).await.unwrap();
        let second = identity.ensure(user.id).await.unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn uids_allocate_sequentially_and_never_reuse() {
        let stores = Stores::in_memory();
        let host = Arc::new(FakeHost::new());
        let identity = identity(&stores, &host);

        let u1 = new_user(&stores).await;
        let u2 = new_user(&stores).await;

        let (_, uid1) = identity.ensure(u1.id).await.unwrap();
        assert_eq!(uid1, 10_000);

        // Delete u1; its uid stays burned.
        stores.users.delete(u1.id.as_id()).await.unwrap();
        let (_, uid2) = identity.ensure(u2.id).await.unwrap();
        assert_eq!(uid2, 10_001);

        let u3 = new_user(&stores).await;
        let (_, uid3) = identity.ensure(u3.id).await.unwrap();
        assert_eq!(uid3, 10_002);
    }

    #[tokio::test]
    async fn known_username_queries_the_os() {
        let stores = Stores::in_memory();
        let host = Arc::new(FakeHost::new());
        host.seed_user("legacy-user", 12_345, "/home/legacy-user");
        let identity = identity(&stores, &host);

        let user = new_user(&stores).await;
        stores
            .users
            .update(
                user.id.as_id(),
                json!({ "unix_username": "legacy-user" }),
            )
            .await
            .unwrap();

        let (name, uid) = identity.ensure(user.id).await.unwrap();
        assert_eq!(name, "legacy-user");
        assert_eq!(uid, 12_345);
        let stored = stores.users.get(user.id.as_id()).await.unwrap();
        assert_eq!(stored.unix_uid, Some(12_345));
    }

    #[tokio::test]
    async fn exhausted_range_errors() {
        let stores = Stores::in_memory();
        let host = Arc::new(FakeHost::new());
        let identity = IdentityStore::new(
            Arc::clone(&stores),
            Arc::clone(&host) as Arc<dyn CommandExecutor>,
            UidRange {
                start: 10_000,
                end: 10_001,
            },
        );

        let u1 = new_user(&stores).await;
        let u2 = new_user(&stores).await;
        let u3 = new_user(&stores).await;
        identity.ensure(u1.id).await.unwrap();
        identity.ensure(u2.id).await.unwrap();
        assert!(matches!(
            identity.ensure(u3.id).await,
            Err(UnixError::NoUidAvailable { .. })
        ));
    }
}
