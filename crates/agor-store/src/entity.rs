//! The `Entity` trait: what a type needs to live in an [`crate::EntityStore`].

use agor_core::{
    Id, McpServer, Message, PermissionRequest, Repo, Session, Task, User, Worktree,
};
use serde::Serialize;
use serde::de::DeserializeOwned;

/// A storable entity.
pub trait Entity: Clone + Send + Sync + Serialize + DeserializeOwned + 'static {
    /// Kind name used in error messages (`"session"`, `"user"`, ...).
    const KIND: &'static str;

    /// The entity's id.
    fn id(&self) -> Id;
}

impl Entity for User {
    const KIND: &'static str = "user";

    fn id(&self) -> Id {
        self.id.as_id()
    }
}

impl Entity for Repo {
    const KIND: &'static str = "repo";

    fn id(&self) -> Id {
        self.id.as_id()
    }
}

impl Entity for Worktree {
    const KIND: &'static str = "worktree";

    fn id(&self) -> Id {
        self.id.as_id()
    }
}

impl Entity for Session {
    const KIND: &'static str = "session";

    fn id(&self) -> Id {
        self.id.as_id()
    }
}

impl Entity for Task {
    const KIND: &'static str = "task";

    fn id(&self) -> Id {
        self.id.as_id()
    }
}

impl Entity for Message {
    const KIND: &'static str = "message";

    fn id(&self) -> Id {
        self.id.as_id()
    }
}

impl Entity for McpServer {
    const KIND: &'static str = "mcp_server";

    fn id(&self) -> Id {
        self.id.as_id()
    }
}

impl Entity for PermissionRequest {
    const KIND: &'static str = "permission_request";

    fn id(&self) -> Id {
        self.id.as_id()
    }
}
