use async_trait::async_trait;
use trainings_core::{ExerciseGroup, Training};

use crate::storage::StoreResult;

/// Persistence for exercise groups.
/// Implementations: `PostgreSQL`, memory (tests and database-less runs).
///
/// Every method executes a single statement. Writes report absence through
/// the affected-row count (`NotDeleted` / `NotUpdated`), never through a
/// preceding read.
#[async_trait]
pub trait ExerciseGroupStore: Send + Sync {
    /// Insert a new group and return the identifier assigned by the store.
    async fn save(&self, user_id: i64, name: &str) -> StoreResult<i64>;

    /// Load a group by id. `NotFound` when no row matches.
    async fn find_by_id(&self, id: i64) -> StoreResult<ExerciseGroup>;

    /// Load a group by owner and name. `NotFound` when no row matches.
    async fn find_by_name(&self, user_id: i64, name: &str) -> StoreResult<ExerciseGroup>;

    /// Delete a group by id. `NotDeleted` when no row matches.
    async fn delete_by_id(&self, id: i64) -> StoreResult<()>;

    /// Delete a group by owner and name. `NotDeleted` when no row matches.
    async fn delete_by_name(&self, user_id: i64, name: &str) -> StoreResult<()>;

    /// Replace the whole row addressed by `group.id`. `NotUpdated` when no row matches.
    async fn update(&self, group: &ExerciseGroup) -> StoreResult<()>;

    /// Rename the group `(user_id, name)` to `new_name`. `NotUpdated` when no row matches.
    async fn update_by_name(&self, user_id: i64, name: &str, new_name: &str) -> StoreResult<()>;

    /// All groups of an owner, ordered by id. Empty when the owner has none.
    async fn find_by_user_id(&self, user_id: i64) -> StoreResult<Vec<ExerciseGroup>>;
}

/// Persistence for training sessions.
#[async_trait]
pub trait TrainingStore: Send + Sync {
    /// Open a new training for the user starting now; returns its id.
    async fn start_training(&self, user_id: i64) -> StoreResult<i64>;

    /// Close every open training of the user.
    /// `AllTrainingsFinished` when none was open.
    async fn finish_training(&self, user_id: i64) -> StoreResult<()>;

    /// Load a training by id. `NotFound` when no row matches.
    async fn find_by_id(&self, id: i64) -> StoreResult<Training>;

    /// Most recently started training of the user. `NotFound` when the user has none.
    async fn last_training(&self, user_id: i64) -> StoreResult<Training>;

    /// All trainings of the user, ordered by id. Empty when the user has none.
    async fn trainings_by_user(&self, user_id: i64) -> StoreResult<Vec<Training>>;
}
