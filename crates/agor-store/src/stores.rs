//! The `Stores` aggregate: every repository plus the cross-entity state
//! the daemon needs (owner links, the UID ledger, message sequencing).

use crate::error::{StoreError, StoreResult};
use crate::memory::MemStore;
use crate::store::EntityStore;
use agor_core::{
    CoreError, McpScope, McpServer, Message, MessageContent, MessageId, MessageRole,
    PermissionRequest, Repo, Session, SessionId, SessionStatus, Task, TaskId, Timestamp, User,
    UserId, Worktree, WorktreeId,
};
use dashmap::DashMap;
use serde_json::json;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};

/// Every repository, plus daemon-level cross-entity state.
///
/// One `Stores` exists per daemon process; components receive it as an
/// `Arc` at construction (no module-level globals).
pub struct Stores {
    /// Users.
    pub users: Arc<dyn EntityStore<User>>,
    /// Repos.
    pub repos: Arc<dyn EntityStore<Repo>>,
    /// Worktrees.
    pub worktrees: Arc<dyn EntityStore<Worktree>>,
    /// Sessions.
    pub sessions: Arc<dyn EntityStore<Session>>,
    /// Tasks.
    pub tasks: Arc<dyn EntityStore<Task>>,
    /// Messages.
    pub messages: Arc<dyn EntityStore<Message>>,
    /// MCP servers.
    pub mcp_servers: Arc<dyn EntityStore<McpServer>>,
    /// Permission requests.
    pub permission_requests: Arc<dyn EntityStore<PermissionRequest>>,

    /// Worktree ownership links (many-to-many).
    owners: RwLock<BTreeSet<(WorktreeId, UserId)>>,
    /// Every uid ever allocated. Append-only: deleting a user does not
    /// free its uid.
    uid_ledger: RwLock<BTreeSet<u32>>,
    /// Per-session message-append critical sections.
    message_locks: DashMap<SessionId, Arc<Mutex<()>>>,
}

impl Stores {
    /// Build an aggregate over in-memory stores.
    #[must_use]
    pub fn in_memory() -> Arc<Self> {
        Arc::new(Self {
            users: Arc::new(MemStore::new()),
            repos: Arc::new(MemStore::new()),
            worktrees: Arc::new(MemStore::new()),
            sessions: Arc::new(MemStore::new()),
            tasks: Arc::new(MemStore::new()),
            messages: Arc::new(MemStore::new()),
            mcp_servers: Arc::new(MemStore::new()),
            permission_requests: Arc::new(MemStore::new()),
            owners: RwLock::new(BTreeSet::new()),
            uid_ledger: RwLock::new(BTreeSet::new()),
            message_locks: DashMap::new(),
        })
    }

    // ------------------------------------------------------------------
    // Creation helpers that enforce cross-entity invariants
    // ------------------------------------------------------------------

    /// Create a session after validating its genealogy.
    ///
    /// # Errors
    ///
    /// Rejects sessions carrying both a spawn and a fork link.
    pub async fn create_session(&self, session: Session) -> StoreResult<Session> {
        session.origin()?;
        self.sessions.create(session).await
    }

    /// Create a worktree, assigning the next per-repo
    /// `worktree_unique_id`.
    ///
    /// # Errors
    ///
    /// Propagates store failures.
    pub async fn create_worktree(&self, mut worktree: Worktree) -> StoreResult<Worktree> {
        let next = self
            .worktrees
            .find_all()
            .await?
            .iter()
            .filter(|w| w.repo_id == worktree.repo_id)
            .map(|w| w.worktree_unique_id)
            .max()
            .map_or(1, |m| m.saturating_add(1));
        worktree.worktree_unique_id = next;
        self.worktrees.create(worktree).await
    }

    /// Create an MCP server, enforcing `(scope, scope_id, name)`
    /// uniqueness.
    ///
    /// # Errors
    ///
    /// Returns a conflict when another server already claims the name in
    /// that scope.
    pub async fn create_mcp_server(&self, server: McpServer) -> StoreResult<McpServer> {
        let taken = self.mcp_servers.find_all().await?.into_iter().any(|s| {
            s.scope == server.scope && s.scope_id == server.scope_id && s.name == server.name
        });
        if taken {
            return Err(StoreError::Conflict(format!(
                "mcp server {:?} already registered in scope {:?}",
                server.name, server.scope
            )));
        }
        self.mcp_servers.create(server).await
    }

    /// All enabled servers registered at a scope.
    ///
    /// # Errors
    ///
    /// Propagates store failures.
    pub async fn servers_in_scope(
        &self,
        scope: McpScope,
        scope_id: Option<agor_core::Id>,
    ) -> StoreResult<Vec<McpServer>> {
        Ok(self
            .mcp_servers
            .find_all()
            .await?
            .into_iter()
            .filter(|s| s.enabled && s.scope == scope && s.scope_id == scope_id)
            .collect())
    }

    // ------------------------------------------------------------------
    // Messages: gap-free per-session indexing
    // ------------------------------------------------------------------

    /// Append a message to a session, assigning the next index inside a
    /// per-session critical section and bumping `message_count`
    /// atomically with the insert.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` when the session is absent.
    pub async fn append_message(
        &self,
        session_id: SessionId,
        task_id: TaskId,
        role: MessageRole,
        content: MessageContent,
    ) -> StoreResult<Message> {
        let lock = self
            .message_locks
            .entry(session_id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let _guard = lock.lock().await;

        let session = self.sessions.get(session_id.as_id()).await?;
        let index = session.message_count;

        let message = Message {
            id: MessageId::generate(),
            session_id,
            task_id,
            index,
            role,
            content,
            created_at: Timestamp::now(),
        };
        let message = self.messages.create(message).await?;

        self.sessions
            .update(
                session_id.as_id(),
                json!({ "message_count": index.saturating_add(1) }),
            )
            .await?;

        Ok(message)
    }

    /// Patch a message in place (used to resolve permission prompts).
    ///
    /// # Errors
    ///
    /// Returns `NotFound` when the message is absent.
    pub async fn patch_message(
        &self,
        id: MessageId,
        patch: serde_json::Value,
    ) -> StoreResult<Message> {
        self.messages.update(id.as_id(), patch).await
    }

    /// A session's messages, ordered by index.
    ///
    /// # Errors
    ///
    /// Propagates store failures.
    pub async fn session_messages(&self, session_id: SessionId) -> StoreResult<Vec<Message>> {
        let mut messages: Vec<Message> = self
            .messages
            .find_all()
            .await?
            .into_iter()
            .filter(|m| m.session_id == session_id)
            .collect();
        messages.sort_by_key(|m| m.index);
        Ok(messages)
    }

    // ------------------------------------------------------------------
    // Session queries and cascade delete
    // ------------------------------------------------------------------

    /// Sessions currently in `status`.
    ///
    /// # Errors
    ///
    /// Propagates store failures.
    pub async fn find_sessions_by_status(
        &self,
        status: SessionStatus,
    ) -> StoreResult<Vec<Session>> {
        Ok(self
            .sessions
            .find_all()
            .await?
            .into_iter()
            .filter(|s| s.status == status)
            .collect())
    }

    /// Direct children of a session: spawns and forks pointing at it.
    /// Accepts a full or short id.
    ///
    /// # Errors
    ///
    /// Propagates lookup failures (including ambiguity).
    pub async fn find_children(&self, id_or_prefix: &str) -> StoreResult<Vec<Session>> {
        let parent = self.sessions.find_by_id(id_or_prefix).await?;
        Ok(self
            .sessions
            .find_all()
            .await?
            .into_iter()
            .filter(|s| {
                s.genealogy.parent_session_id == Some(parent.id)
                    || s.genealogy.forked_from_session_id == Some(parent.id)
            })
            .collect())
    }

    /// Ancestors of a session, nearest first, following either link kind.
    ///
    /// Iterative with a visited set; a revisit means the genealogy is
    /// corrupt and is an error, not a hang.
    ///
    /// # Errors
    ///
    /// Returns `CorruptGenealogy` on a cycle; propagates lookup failures.
    pub async fn find_ancestors(&self, id_or_prefix: &str) -> StoreResult<Vec<Session>> {
        let start = self.sessions.find_by_id(id_or_prefix).await?;
        let mut visited: BTreeSet<SessionId> = BTreeSet::new();
        visited.insert(start.id);

        let mut ancestors = Vec::new();
        let mut cursor = start.genealogy.predecessor();

        while let Some(next_id) = cursor {
            if !visited.insert(next_id) {
                return Err(CoreError::CorruptGenealogy {
                    detail: format!("cycle through session {next_id}"),
                }
                .into());
            }
            let ancestor = self.sessions.get(next_id.as_id()).await?;
            cursor = ancestor.genealogy.predecessor();
            ancestors.push(ancestor);
        }

        Ok(ancestors)
    }

    /// Delete a session and everything it exclusively owns: its tasks,
    /// messages, and permission requests.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` when the session is absent.
    pub async fn delete_session(&self, session_id: SessionId) -> StoreResult<()> {
        // Verify existence first so a bad id fails before any cascade.
        self.sessions.get(session_id.as_id()).await?;

        for task in self.tasks.find_all().await? {
            if task.session_id == session_id {
                self.tasks.delete(task.id.as_id()).await?;
            }
        }
        for message in self.messages.find_all().await? {
            if message.session_id == session_id {
                self.messages.delete(message.id.as_id()).await?;
            }
        }
        for request in self.permission_requests.find_all().await? {
            if request.session_id == session_id {
                self.permission_requests.delete(request.id.as_id()).await?;
            }
        }

        self.sessions.delete(session_id.as_id()).await?;
        self.message_locks.remove(&session_id);
        Ok(())
    }

    // ------------------------------------------------------------------
    // Worktree ownership
    // ------------------------------------------------------------------

    /// Link a user as owner of a worktree. Idempotent.
    pub async fn add_owner(&self, worktree_id: WorktreeId, user_id: UserId) {
        self.owners.write().await.insert((worktree_id, user_id));
    }

    /// Unlink a user from a worktree. Idempotent.
    pub async fn remove_owner(&self, worktree_id: WorktreeId, user_id: UserId) {
        self.owners.write().await.remove(&(worktree_id, user_id));
    }

    /// Whether a user owns a worktree.
    pub async fn is_owner(&self, worktree_id: WorktreeId, user_id: UserId) -> bool {
        self.owners.read().await.contains(&(worktree_id, user_id))
    }

    /// Owners of one worktree.
    pub async fn get_owners(&self, worktree_id: WorktreeId) -> Vec<UserId> {
        self.owners
            .read()
            .await
            .iter()
            .filter(|(w, _)| *w == worktree_id)
            .map(|(_, u)| *u)
            .collect()
    }

    /// Owners of many worktrees at once.
    pub async fn bulk_load_owners(
        &self,
        worktree_ids: &[WorktreeId],
    ) -> BTreeMap<WorktreeId, Vec<UserId>> {
        let owners = self.owners.read().await;
        let mut result: BTreeMap<WorktreeId, Vec<UserId>> = worktree_ids
            .iter()
            .map(|id| (*id, Vec::new()))
            .collect();
        for (w, u) in owners.iter() {
            if let Some(list) = result.get_mut(w) {
                list.push(*u);
            }
        }
        result
    }

    /// Worktrees a user can see: those they own, plus any whose
    /// `others_can` is not `none`.
    ///
    /// # Errors
    ///
    /// Propagates store failures.
    pub async fn find_accessible_worktrees(&self, user_id: UserId) -> StoreResult<Vec<Worktree>> {
        let owned: BTreeSet<WorktreeId> = self
            .owners
            .read()
            .await
            .iter()
            .filter(|(_, u)| *u == user_id)
            .map(|(w, _)| *w)
            .collect();

        Ok(self
            .worktrees
            .find_all()
            .await?
            .into_iter()
            .filter(|w| owned.contains(&w.id) || w.others_can != agor_core::OthersCan::None)
            .collect())
    }

    // ------------------------------------------------------------------
    // UID ledger
    // ------------------------------------------------------------------

    /// Record a uid as allocated, forever.
    pub async fn record_uid(&self, uid: u32) {
        self.uid_ledger.write().await.insert(uid);
    }

    /// Every uid ever allocated, including those of deleted users.
    pub async fn recorded_uids(&self) -> BTreeSet<u32> {
        self.uid_ledger.read().await.clone()
    }
}

impl std::fmt::Debug for Stores {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Stores").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agor_core::{AgentKind, OthersCan, RefType, UserRole};
    use std::path::PathBuf;

    fn worktree(repo_id: agor_core::RepoId) -> Worktree {
        Worktree {
            id: WorktreeId::generate(),
            repo_id,
            worktree_unique_id: 0,
            name: "main".into(),
            ref_name: "main".into(),
            ref_type: RefType::Branch,
            path: PathBuf::from("/srv/wt"),
            archived: false,
            others_can: OthersCan::None,
            others_fs_access: agor_core::OthersFsAccess::None,
            created_at: Timestamp::now(),
        }
    }

    async fn session(stores: &Stores) -> Session {
        let wt = WorktreeId::generate();
        let user = UserId::generate();
        let s = Session::new(wt, user, AgentKind::ClaudeCode, "tok");
        stores.create_session(s).await.unwrap()
    }

    #[tokio::test]
    async fn message_indices_are_gap_free() {
        let stores = Stores::in_memory();
        let s = session(&stores).await;
        let task = TaskId::generate();

        for i in 0..5u64 {
            let m = stores
                .append_message(
                    s.id,
                    task,
                    MessageRole::User,
                    MessageContent::Text {
                        text: format!("m{i}"),
                    },
                )
                .await
                .unwrap();
            assert_eq!(m.index, i);
        }

        let refreshed = stores.sessions.get(s.id.as_id()).await.unwrap();
        assert_eq!(refreshed.message_count, 5);
        let messages = stores.session_messages(s.id).await.unwrap();
        assert_eq!(messages.len(), 5);
        for (i, m) in messages.iter().enumerate() {
            assert_eq!(m.index, i as u64);
        }
    }

    #[tokio::test]
    async fn concurrent_appends_serialize_per_session() {
        let stores = Stores::in_memory();
        let s = session(&stores).await;
        let task = TaskId::generate();

        let mut handles = Vec::new();
        for i in 0..20u64 {
            let stores = Arc::clone(&stores);
            let sid = s.id;
            handles.push(tokio::spawn(async move {
                stores
                    .append_message(
                        sid,
                        task,
                        MessageRole::Assistant,
                        MessageContent::Text {
                            text: format!("c{i}"),
                        },
                    )
                    .await
                    .unwrap()
            }));
        }
        for h in handles {
            h.await.unwrap();
        }

        let messages = stores.session_messages(s.id).await.unwrap();
        let mut indices: Vec<u64> = messages.iter().map(|m| m.index).collect();
        indices.sort_unstable();
        assert_eq!(indices, (0..20).collect::<Vec<_>>());
        let refreshed = stores.sessions.get(s.id.as_id()).await.unwrap();
        assert_eq!(refreshed.message_count, 20);
    }

    #[tokio::test]
    async fn worktree_unique_ids_are_monotonic_per_repo() {
        let stores = Stores::in_memory();
        let repo = agor_core::RepoId::generate();
        let other = agor_core::RepoId::generate();

        let a = stores.create_worktree(worktree(repo)).await.unwrap();
        let b = stores.create_worktree(worktree(repo)).await.unwrap();
        let c = stores.create_worktree(worktree(other)).await.unwrap();
        assert_eq!(a.worktree_unique_id, 1);
        assert_eq!(b.worktree_unique_id, 2);
        assert_eq!(c.worktree_unique_id, 1);
    }

    #[tokio::test]
    async fn mcp_server_names_unique_per_scope() {
        let stores = Stores::in_memory();
        let a = McpServer::stdio("fs", McpScope::Global, None, "mcp-fs", vec![]);
        stores.create_mcp_server(a).await.unwrap();

        let dup = McpServer::stdio("fs", McpScope::Global, None, "mcp-fs2", vec![]);
        assert!(matches!(
            stores.create_mcp_server(dup).await,
            Err(StoreError::Conflict(_))
        ));

        // Same name under a different scope id is fine.
        let scoped = McpServer::stdio(
            "fs",
            McpScope::Repo,
            Some(agor_core::Id::generate()),
            "mcp-fs",
            vec![],
        );
        stores.create_mcp_server(scoped).await.unwrap();
    }

    #[tokio::test]
    async fn cascade_delete_removes_owned_entities() {
        let stores = Stores::in_memory();
        let s = session(&stores).await;
        let task = Task::new(s.id, "prompt", 0);
        let task = stores.tasks.create(task).await.unwrap();
        stores
            .append_message(
                s.id,
                task.id,
                MessageRole::User,
                MessageContent::Text { text: "hi".into() },
            )
            .await
            .unwrap();

        stores.delete_session(s.id).await.unwrap();
        assert!(stores.sessions.get(s.id.as_id()).await.is_err());
        assert_eq!(stores.session_messages(s.id).await.unwrap().len(), 0);
        assert!(stores.tasks.get(task.id.as_id()).await.is_err());
    }

    #[tokio::test]
    async fn ancestor_traversal_follows_both_links() {
        let stores = Stores::in_memory();
        let grandparent = session(&stores).await;

        let mut parent = Session::new(
            grandparent.worktree_id,
            grandparent.created_by,
            AgentKind::ClaudeCode,
            "tok",
        );
        parent.genealogy.forked_from_session_id = Some(grandparent.id);
        let parent = stores.create_session(parent).await.unwrap();

        let mut child = Session::new(
            parent.worktree_id,
            parent.created_by,
            AgentKind::ClaudeCode,
            "tok",
        );
        child.genealogy.parent_session_id = Some(parent.id);
        let child = stores.create_session(child).await.unwrap();

        let ancestors = stores.find_ancestors(&child.id.to_string()).await.unwrap();
        let ids: Vec<SessionId> = ancestors.iter().map(|s| s.id).collect();
        assert_eq!(ids, vec![parent.id, grandparent.id]);

        // Time-ordered ids minted together share their short prefix, so
        // genealogy lookups in bulk use full ids.
        let children = stores
            .find_children(&parent.id.to_string())
            .await
            .unwrap();
        assert_eq!(children.len(), 1);
        assert_eq!(children[0].id, child.id);
    }

    #[tokio::test]
    async fn genealogy_cycle_is_an_error() {
        let stores = Stores::in_memory();
        let a = session(&stores).await;
        let mut b = Session::new(a.worktree_id, a.created_by, AgentKind::ClaudeCode, "tok");
        b.genealogy.parent_session_id = Some(a.id);
        let b = stores.create_session(b).await.unwrap();

        // Corrupt: point a back at b.
        stores
            .sessions
            .update(
                a.id.as_id(),
                serde_json::json!({"genealogy": {"parent_session_id": b.id}}),
            )
            .await
            .unwrap();

        assert!(matches!(
            stores.find_ancestors(&b.id.to_string()).await,
            Err(StoreError::Core(CoreError::CorruptGenealogy { .. }))
        ));
    }

    #[tokio::test]
    async fn uid_ledger_is_append_only() {
        let stores = Stores::in_memory();
        let user = User::new("a@b.c", UserRole::Member);
        let id = user.id.as_id();
        stores.users.create(user).await.unwrap();
        stores.record_uid(10_000).await;

        stores.users.delete(id).await.unwrap();
        assert!(stores.recorded_uids().await.contains(&10_000));
    }

    #[tokio::test]
    async fn accessible_worktrees_union_owned_and_shared() {
        let stores = Stores::in_memory();
        let repo = agor_core::RepoId::generate();
        let user = UserId::generate();

        let owned = stores.create_worktree(worktree(repo)).await.unwrap();
        let mut shared = worktree(repo);
        shared.others_can = OthersCan::View;
        let shared = stores.create_worktree(shared).await.unwrap();
        let _hidden = stores.create_worktree(worktree(repo)).await.unwrap();

        stores.add_owner(owned.id, user).await;

        let accessible = stores.find_accessible_worktrees(user).await.unwrap();
        let ids: BTreeSet<WorktreeId> = accessible.iter().map(|w| w.id).collect();
        assert!(ids.contains(&owned.id));
        assert!(ids.contains(&shared.id));
        assert_eq!(ids.len(), 2);
    }
}
