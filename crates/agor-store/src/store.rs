//! The generic repository interface.

use crate::entity::Entity;
use crate::error::StoreResult;
use agor_core::Id;
use async_trait::async_trait;
use serde_json::Value;

/// Minimum repository surface, per entity.
///
/// Implementations must be safe for concurrent use; `update` must be
/// an atomic read-merge-write (structural deep-merge, immutable fields
/// ignored — see [`agor_core::merge_entity_patch`]).
#[async_trait]
pub trait EntityStore<T: Entity>: Send + Sync {
    /// Insert a new entity.
    ///
    /// # Errors
    ///
    /// Returns a conflict when the id already exists.
    async fn create(&self, entity: T) -> StoreResult<T>;

    /// Fetch by exact id.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` when absent.
    async fn get(&self, id: Id) -> StoreResult<T>;

    /// Fetch by full id or short prefix.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` when nothing matches and `AmbiguousId` —
    /// enumerating the matches — when a prefix matches more than one
    /// entity.
    async fn find_by_id(&self, id_or_prefix: &str) -> StoreResult<T>;

    /// All entities, in id (i.e. creation-time) order.
    async fn find_all(&self) -> StoreResult<Vec<T>>;

    /// Atomic read-merge-write.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` when absent, or a core error when the merged
    /// value no longer deserializes.
    async fn update(&self, id: Id, patch: Value) -> StoreResult<T>;

    /// Remove an entity.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` when absent.
    async fn delete(&self, id: Id) -> StoreResult<()>;
}
