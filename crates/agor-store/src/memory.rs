//! In-memory reference implementation of [`EntityStore`].

use crate::entity::Entity;
use crate::error::{StoreError, StoreResult};
use crate::store::EntityStore;
use agor_core::{Id, merge_entity_patch};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::BTreeMap;
use std::str::FromStr;
use tokio::sync::RwLock;

/// An in-memory entity store backed by an ordered map.
///
/// Ids are time-ordered, so map order is creation order.
#[derive(Debug, Default)]
pub struct MemStore<T: Entity> {
    entries: RwLock<BTreeMap<Id, T>>,
}

impl<T: Entity> MemStore<T> {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(BTreeMap::new()),
        }
    }

    /// Number of stored entities.
    pub async fn count(&self) -> usize {
        self.entries.read().await.len()
    }
}

#[async_trait]
impl<T: Entity> EntityStore<T> for MemStore<T> {
    async fn create(&self, entity: T) -> StoreResult<T> {
        let mut entries = self.entries.write().await;
        let id = entity.id();
        if entries.contains_key(&id) {
            return Err(StoreError::Conflict(format!(
                "{} {id} already exists",
                T::KIND
            )));
        }
        entries.insert(id, entity.clone());
        Ok(entity)
    }

    async fn get(&self, id: Id) -> StoreResult<T> {
        self.entries
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound {
                kind: T::KIND,
                id: id.to_string(),
            })
    }

    async fn find_by_id(&self, id_or_prefix: &str) -> StoreResult<T> {
        let entries = self.entries.read().await;

        // Full canonical id first.
        if let Ok(id) = Id::from_str(id_or_prefix)
            && let Some(entity) = entries.get(&id)
        {
            return Ok(entity.clone());
        }

        let matches: Vec<&T> = entries
            .values()
            .filter(|e| e.id().matches_prefix(id_or_prefix))
            .collect();

        match matches.as_slice() {
            [] => Err(StoreError::NotFound {
                kind: T::KIND,
                id: id_or_prefix.to_string(),
            }),
            [one] => Ok((*one).clone()),
            many => Err(StoreError::AmbiguousId {
                kind: T::KIND,
                prefix: id_or_prefix.to_string(),
                matches: many.iter().map(|e| e.id().to_string()).collect(),
            }),
        }
    }

    async fn find_all(&self) -> StoreResult<Vec<T>> {
        Ok(self.entries.read().await.values().cloned().collect())
    }

    async fn update(&self, id: Id, patch: Value) -> StoreResult<T> {
        let mut entries = self.entries.write().await;
        let current = entries.get(&id).ok_or_else(|| StoreError::NotFound {
            kind: T::KIND,
            id: id.to_string(),
        })?;
        let merged = merge_entity_patch(current, &patch)?;
        entries.insert(id, merged.clone());
        Ok(merged)
    }

    async fn delete(&self, id: Id) -> StoreResult<()> {
        let mut entries = self.entries.write().await;
        if entries.remove(&id).is_none() {
            return Err(StoreError::NotFound {
                kind: T::KIND,
                id: id.to_string(),
            });
        }
        Ok(())
    }
}
