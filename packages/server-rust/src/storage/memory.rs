//! In-memory stores backed by [`DashMap`].
//!
//! Mirrors the relational semantics of the `PostgreSQL` backend: ids come
//! from per-table sequences starting at 1, `(user_id, name)` is unique for
//! exercise groups, and writes that match nothing report `NotDeleted` /
//! `NotUpdated` instead of succeeding silently.

use std::sync::atomic::{AtomicI64, Ordering};

use async_trait::async_trait;
use chrono::Utc;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use trainings_core::{ExerciseGroup, Training};

use crate::storage::{StoreError, StoreResult};
use crate::traits::{ExerciseGroupStore, TrainingStore};

type NameKey = (i64, String);

/// In-memory implementation of [`ExerciseGroupStore`] and [`TrainingStore`].
///
/// Lock order is always `group_names` before `groups`.
pub struct MemoryStore {
    groups: DashMap<i64, ExerciseGroup>,
    group_names: DashMap<NameKey, i64>,
    next_group_id: AtomicI64,
    trainings: DashMap<i64, Training>,
    next_training_id: AtomicI64,
}

impl MemoryStore {
    /// Creates empty tables.
    #[must_use]
    pub fn new() -> Self {
        Self {
            groups: DashMap::new(),
            group_names: DashMap::new(),
            next_group_id: AtomicI64::new(1),
            trainings: DashMap::new(),
            next_training_id: AtomicI64::new(1),
        }
    }

    fn lookup_name(&self, user_id: i64, name: &str) -> Option<i64> {
        self.group_names
            .get(&(user_id, name.to_string()))
            .map(|entry| *entry.value())
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ExerciseGroupStore for MemoryStore {
    async fn save(&self, user_id: i64, name: &str) -> StoreResult<i64> {
        match self.group_names.entry((user_id, name.to_string())) {
            Entry::Occupied(_) => Err(StoreError::Duplicate {
                user_id,
                name: name.to_string(),
            }),
            Entry::Vacant(slot) => {
                let id = self.next_group_id.fetch_add(1, Ordering::Relaxed);
                self.groups.insert(
                    id,
                    ExerciseGroup {
                        id,
                        user_id,
                        name: name.to_string(),
                    },
                );
                slot.insert(id);
                Ok(id)
            }
        }
    }

    async fn find_by_id(&self, id: i64) -> StoreResult<ExerciseGroup> {
        self.groups
            .get(&id)
            .map(|g| g.value().clone())
            .ok_or(StoreError::NotFound)
    }

    async fn find_by_name(&self, user_id: i64, name: &str) -> StoreResult<ExerciseGroup> {
        let id = self.lookup_name(user_id, name).ok_or(StoreError::NotFound)?;
        ExerciseGroupStore::find_by_id(self, id).await
    }

    async fn delete_by_id(&self, id: i64) -> StoreResult<()> {
        let (_, group) = self.groups.remove(&id).ok_or(StoreError::NotDeleted)?;
        self.group_names.remove(&(group.user_id, group.name));
        Ok(())
    }

    async fn delete_by_name(&self, user_id: i64, name: &str) -> StoreResult<()> {
        let (_, id) = self
            .group_names
            .remove(&(user_id, name.to_string()))
            .ok_or(StoreError::NotDeleted)?;
        self.groups.remove(&id);
        Ok(())
    }

    async fn update(&self, group: &ExerciseGroup) -> StoreResult<()> {
        let current = self
            .groups
            .get(&group.id)
            .map(|g| g.value().clone())
            .ok_or(StoreError::NotUpdated)?;

        if current.user_id != group.user_id || current.name != group.name {
            match self.group_names.entry((group.user_id, group.name.clone())) {
                Entry::Occupied(_) => {
                    return Err(StoreError::Duplicate {
                        user_id: group.user_id,
                        name: group.name.clone(),
                    })
                }
                Entry::Vacant(slot) => {
                    slot.insert(group.id);
                }
            }
            self.group_names.remove(&(current.user_id, current.name));
        }
        self.groups.insert(group.id, group.clone());
        Ok(())
    }

    async fn update_by_name(&self, user_id: i64, name: &str, new_name: &str) -> StoreResult<()> {
        let id = self.lookup_name(user_id, name).ok_or(StoreError::NotUpdated)?;
        if name == new_name {
            return Ok(());
        }
        match self.group_names.entry((user_id, new_name.to_string())) {
            Entry::Occupied(_) => {
                return Err(StoreError::Duplicate {
                    user_id,
                    name: new_name.to_string(),
                })
            }
            Entry::Vacant(slot) => {
                slot.insert(id);
            }
        }
        self.group_names.remove(&(user_id, name.to_string()));
        if let Some(mut group) = self.groups.get_mut(&id) {
            group.name = new_name.to_string();
        }
        Ok(())
    }

    async fn find_by_user_id(&self, user_id: i64) -> StoreResult<Vec<ExerciseGroup>> {
        let mut groups: Vec<ExerciseGroup> = self
            .groups
            .iter()
            .filter(|g| g.user_id == user_id)
            .map(|g| g.value().clone())
            .collect();
        groups.sort_by_key(|g| g.id);
        Ok(groups)
    }
}

#[async_trait]
impl TrainingStore for MemoryStore {
    async fn start_training(&self, user_id: i64) -> StoreResult<i64> {
        let id = self.next_training_id.fetch_add(1, Ordering::Relaxed);
        self.trainings.insert(
            id,
            Training {
                id,
                user_id,
                begins: Utc::now(),
                finish: None,
            },
        );
        Ok(id)
    }

    async fn finish_training(&self, user_id: i64) -> StoreResult<()> {
        let now = Utc::now();
        let mut affected = 0_u64;
        for mut training in self.trainings.iter_mut() {
            if training.user_id == user_id && training.finish.is_none() {
                training.finish = Some(now);
                affected += 1;
            }
        }
        if affected == 0 {
            return Err(StoreError::AllTrainingsFinished);
        }
        Ok(())
    }

    async fn find_by_id(&self, id: i64) -> StoreResult<Training> {
        self.trainings
            .get(&id)
            .map(|t| t.value().clone())
            .ok_or(StoreError::NotFound)
    }

    async fn last_training(&self, user_id: i64) -> StoreResult<Training> {
        self.trainings
            .iter()
            .filter(|t| t.user_id == user_id)
            .max_by_key(|t| (t.begins, t.id))
            .map(|t| t.value().clone())
            .ok_or(StoreError::NotFound)
    }

    async fn trainings_by_user(&self, user_id: i64) -> StoreResult<Vec<Training>> {
        let mut trainings: Vec<Training> = self
            .trainings
            .iter()
            .filter(|t| t.user_id == user_id)
            .map(|t| t.value().clone())
            .collect();
        trainings.sort_by_key(|t| t.id);
        Ok(trainings)
    }
}
