use crate::arbiter::PermissionArbiter;
use crate::decision::{Decision, Verdict};
use crate::error::ApprovalError;
use crate::settings::SETTINGS_RELPATH;
use agor_core::{
    AgentKind, BroadcastEvent, Broadcaster, OthersCan, OthersFsAccess, PermissionScope,
    PermissionStatus, RefType, Session, SessionId, Task, TaskStatus, Timestamp, User, UserId,
    UserRole, Worktree, WorktreeId,
};
use agor_store::{EntityStore as _, Stores};
use serde_json::json;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Records every emission for assertions.
#[derive(Debug, Default)]
struct CollectingBroadcaster {
    events: Mutex<Vec<BroadcastEvent>>,
}

impl CollectingBroadcaster {
    fn prompts(&self) -> usize {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter(|e| matches!(e, BroadcastEvent::PermissionRequested { .. }))
            .count()
    }
}

impl Broadcaster for CollectingBroadcaster {
    fn emit_to_session(&self, _session_id: SessionId, event: &BroadcastEvent) {
        self.events.lock().unwrap().push(event.clone());
    }

    fn emit_to_user(&self, _user_id: UserId, event: &BroadcastEvent) {
        self.events.lock().unwrap().push(event.clone());
    }
}

struct Fixture {
    stores: Arc<Stores>,
    arbiter: Arc<PermissionArbiter>,
    broadcaster: Arc<CollectingBroadcaster>,
    session: Session,
    task: Task,
    user: User,
    _worktree_dir: tempfile::TempDir,
}

async fn fixture() -> Fixture {
    let stores = Stores::in_memory();
    let broadcaster = Arc::new(CollectingBroadcaster::default());
    let arbiter = Arc::new(PermissionArbiter::new(
        Arc::clone(&stores),
        Arc::clone(&broadcaster) as Arc<dyn Broadcaster>,
    ));

    let user = stores
        .users
        .create(User::new("a@b.c", UserRole::Member))
        .await
        .unwrap();

    let worktree_dir = tempfile::tempdir().unwrap();
    let worktree = stores
        .create_worktree(Worktree {
            id: WorktreeId::generate(),
            repo_id: agor_core::RepoId::generate(),
            worktree_unique_id: 0,
            name: "main".into(),
            ref_name: "main".into(),
            ref_type: RefType::Branch,
            path: worktree_dir.path().to_path_buf(),
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
            "tok",
        ))
        .await
        .unwrap();
    let task = stores
        .tasks
        .create(Task::new(session.id, "run things", 0))
        .await
        .unwrap();

    Fixture {
        stores,
        arbiter,
        broadcaster,
        session,
        task,
        user,
        _worktree_dir: worktree_dir,
    }
}

/// Drive one pre_tool_use in the background and decide it once the
/// prompt is visible.
async fn gate_and_decide(f: &Fixture, tool: &str, decision: Decision) -> Verdict {
    let arbiter = Arc::clone(&f.arbiter);
    let session_id = f.session.id;
    let task_id = f.task.id;
    let tool = tool.to_string();
    let handle = tokio::spawn(async move {
        arbiter
            .pre_tool_use(
                session_id,
                task_id,
                &tool,
                json!({"command": "ls"}),
                Some("tu_1".into()),
                &CancellationToken::new(),
            )
            .await
    });

    let request_id = wait_for_pending(&f.arbiter).await;
    f.arbiter.decide(request_id, decision).await.unwrap();
    handle.await.unwrap()
}

async fn wait_for_pending(arbiter: &PermissionArbiter) -> agor_core::RequestId {
    for _ in 0..200 {
        if let Some(id) = arbiter.pending_requests().first().copied() {
            return id;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("no pending request appeared");
}

#[tokio::test]
async fn once_scope_allows_without_persisting() {
    let f = fixture().await;
    let verdict = gate_and_decide(&f, "Bash", Decision::allow_once(f.user.id)).await;
    assert!(verdict.is_allow());

    let session = f.stores.sessions.get(f.session.id.as_id()).await.unwrap();
    assert!(!session.permission_config.allows("Bash"));

    // The task settled back to running.
    let task = f.stores.tasks.get(f.task.id.as_id()).await.unwrap();
    assert_eq!(task.status, TaskStatus::Running);
}

#[tokio::test]
async fn session_scope_persists_and_short_circuits() {
    let f = fixture().await;
    let verdict = gate_and_decide(
        &f,
        "Bash",
        Decision::allow_remembered(f.user.id, PermissionScope::Session),
    )
    .await;
    assert!(verdict.is_allow());

    let session = f.stores.sessions.get(f.session.id.as_id()).await.unwrap();
    assert!(session.permission_config.allows("Bash"));

    // Second call: no new prompt, allow via session config.
    let verdict = f
        .arbiter
        .pre_tool_use(
            f.session.id,
            f.task.id,
            "Bash",
            json!({}),
            None,
            &CancellationToken::new(),
        )
        .await;
    assert_eq!(
        verdict,
        Verdict::Allow {
            reason: "session config".into()
        }
    );
    assert_eq!(f.broadcaster.prompts(), 1);
}

#[tokio::test]
async fn project_scope_writes_worktree_settings() {
    let f = fixture().await;
    let verdict = gate_and_decide(
        &f,
        "Bash",
        Decision::allow_remembered(f.user.id, PermissionScope::Project),
    )
    .await;
    assert!(verdict.is_allow());

    let worktree = f
        .stores
        .worktrees
        .get(f.session.worktree_id.as_id())
        .await
        .unwrap();
    let raw = std::fs::read_to_string(worktree.path.join(SETTINGS_RELPATH)).unwrap();
    let settings: serde_json::Value = serde_json::from_str(&raw).unwrap();
    assert_eq!(
        settings["permissions"]["allow"]["tools"],
        json!(["Bash"])
    );
}

#[tokio::test]
async fn deny_fails_the_task_but_not_the_flow() {
    let f = fixture().await;
    let verdict = gate_and_decide(&f, "Bash", Decision::deny(f.user.id, "too risky")).await;
    assert_eq!(
        verdict,
        Verdict::Deny {
            reason: "too risky".into()
        }
    );

    let task = f.stores.tasks.get(f.task.id.as_id()).await.unwrap();
    assert_eq!(task.status, TaskStatus::Failed);

    // The pending message was patched in place.
    let messages = f.stores.session_messages(f.session.id).await.unwrap();
    assert_eq!(messages.len(), 1);
    match &messages[0].content {
        agor_core::MessageContent::PermissionRequest { status, .. } => {
            assert_eq!(*status, PermissionStatus::Denied);
        },
        other => panic!("wrong content: {other:?}"),
    }
}

#[tokio::test]
async fn concurrent_calls_produce_exactly_one_prompt() {
    let f = fixture().await;

    let spawn_call = |f: &Fixture| {
        let arbiter = Arc::clone(&f.arbiter);
        let session_id = f.session.id;
        let task_id = f.task.id;
        tokio::spawn(async move {
            arbiter
                .pre_tool_use(
                    session_id,
                    task_id,
                    "Bash",
                    json!({}),
                    None,
                    &CancellationToken::new(),
                )
                .await
        })
    };

    let first = spawn_call(&f);
    let second = spawn_call(&f);

    // Only one prompt may be pending at any instant.
    let request_id = wait_for_pending(&f.arbiter).await;
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(f.arbiter.pending_requests().len(), 1);

    f.arbiter
        .decide(
            request_id,
            Decision::allow_remembered(f.user.id, PermissionScope::Session),
        )
        .await
        .unwrap();

    let first = first.await.unwrap();
    let second = second.await.unwrap();
    assert!(first.is_allow());
    assert!(second.is_allow());

    // The queued caller's post-lock re-read short-circuited: one prompt
    // total, one permission-request message total.
    assert_eq!(f.broadcaster.prompts(), 1);
    let messages = f.stores.session_messages(f.session.id).await.unwrap();
    assert_eq!(messages.len(), 1);
}

#[tokio::test]
async fn first_decision_wins() {
    let f = fixture().await;
    let arbiter = Arc::clone(&f.arbiter);
    let session_id = f.session.id;
    let task_id = f.task.id;
    let handle = tokio::spawn(async move {
        arbiter
            .pre_tool_use(
                session_id,
                task_id,
                "Bash",
                json!({}),
                None,
                &CancellationToken::new(),
            )
            .await
    });

    let request_id = wait_for_pending(&f.arbiter).await;
    f.arbiter
        .decide(request_id, Decision::allow_once(f.user.id))
        .await
        .unwrap();
    let late = f
        .arbiter
        .decide(request_id, Decision::deny(f.user.id, "late"))
        .await;
    assert!(matches!(
        late,
        Err(ApprovalError::AlreadyDecided { .. }) | Err(ApprovalError::UnknownRequest { .. })
    ));

    assert!(handle.await.unwrap().is_allow());
}

#[tokio::test]
async fn cancellation_resolves_as_denied() {
    let f = fixture().await;
    let cancel = CancellationToken::new();

    let arbiter = Arc::clone(&f.arbiter);
    let session_id = f.session.id;
    let task_id = f.task.id;
    let cancel_clone = cancel.clone();
    let handle = tokio::spawn(async move {
        arbiter
            .pre_tool_use(session_id, task_id, "Bash", json!({}), None, &cancel_clone)
            .await
    });

    wait_for_pending(&f.arbiter).await;
    cancel.cancel();

    let verdict = handle.await.unwrap();
    assert!(!verdict.is_allow());

    let task = f.stores.tasks.get(f.task.id.as_id()).await.unwrap();
    assert_eq!(task.status, TaskStatus::Failed);
    let messages = f.stores.session_messages(f.session.id).await.unwrap();
    match &messages[0].content {
        agor_core::MessageContent::PermissionRequest { status, .. } => {
            assert_eq!(*status, PermissionStatus::Denied);
        },
        other => panic!("wrong content: {other:?}"),
    }
}
