//! `PostgreSQL` stores over a shared [`PgPool`].
//!
//! One statement per method. Writes read `rows_affected()`; single-row reads
//! use `fetch_optional` so an empty result becomes [`StoreError::NotFound`]
//! rather than a driver error.

use async_trait::async_trait;
use chrono::Utc;
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::Row;
use tracing::info;
use trainings_core::{ExerciseGroup, Training};

use crate::storage::{StoreError, StoreResult};
use crate::traits::{ExerciseGroupStore, TrainingStore};

const UNIQUE_VIOLATION: &str = "23505";

const CREATE_EXERCISE_GROUPS: &str = "CREATE TABLE IF NOT EXISTS exercise_groups (
    id BIGSERIAL PRIMARY KEY,
    user_id BIGINT NOT NULL,
    name TEXT NOT NULL,
    UNIQUE (user_id, name)
)";

const CREATE_TRAININGS: &str = "CREATE TABLE IF NOT EXISTS trainings (
    id BIGSERIAL PRIMARY KEY,
    user_id BIGINT NOT NULL,
    begins TIMESTAMPTZ NOT NULL,
    finish TIMESTAMPTZ
)";

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => Self::NotFound,
            other => Self::Storage(other.to_string()),
        }
    }
}

/// Maps a unique violation on `(user_id, name)` to [`StoreError::Duplicate`].
fn write_error(err: sqlx::Error, user_id: i64, name: &str) -> StoreError {
    if let sqlx::Error::Database(db) = &err {
        if db.code().as_deref() == Some(UNIQUE_VIOLATION) {
            return StoreError::Duplicate {
                user_id,
                name: name.to_string(),
            };
        }
    }
    err.into()
}

/// Opens a connection pool.
///
/// # Errors
///
/// Returns [`StoreError::Storage`] when the database cannot be reached.
pub async fn connect(url: &str, max_connections: u32) -> StoreResult<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(max_connections)
        .connect(url)
        .await?;
    info!(max_connections, "Connected to PostgreSQL");
    Ok(pool)
}

/// Creates the tables if they do not exist yet.
///
/// # Errors
///
/// Returns [`StoreError::Storage`] when a DDL statement fails.
pub async fn migrate(pool: &PgPool) -> StoreResult<()> {
    sqlx::query(CREATE_EXERCISE_GROUPS).execute(pool).await?;
    sqlx::query(CREATE_TRAININGS).execute(pool).await?;
    info!("Database schema ready");
    Ok(())
}

fn group_from_row(row: &PgRow) -> Result<ExerciseGroup, sqlx::Error> {
    Ok(ExerciseGroup {
        id: row.try_get("id")?,
        user_id: row.try_get("user_id")?,
        name: row.try_get("name")?,
    })
}

fn training_from_row(row: &PgRow) -> Result<Training, sqlx::Error> {
    Ok(Training {
        id: row.try_get("id")?,
        user_id: row.try_get("user_id")?,
        begins: row.try_get("begins")?,
        finish: row.try_get("finish")?,
    })
}

// ---------------------------------------------------------------------------
// Exercise groups
// ---------------------------------------------------------------------------

/// [`ExerciseGroupStore`] over the `exercise_groups` table.
#[derive(Debug, Clone)]
pub struct PgExerciseGroupStore {
    pool: PgPool,
}

impl PgExerciseGroupStore {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ExerciseGroupStore for PgExerciseGroupStore {
    async fn save(&self, user_id: i64, name: &str) -> StoreResult<i64> {
        sqlx::query_scalar::<_, i64>(
            "INSERT INTO exercise_groups (user_id, name) VALUES ($1, $2) RETURNING id",
        )
        .bind(user_id)
        .bind(name)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| write_error(e, user_id, name))
    }

    async fn find_by_id(&self, id: i64) -> StoreResult<ExerciseGroup> {
        let row = sqlx::query("SELECT id, user_id, name FROM exercise_groups WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(StoreError::NotFound)?;
        Ok(group_from_row(&row)?)
    }

    async fn find_by_name(&self, user_id: i64, name: &str) -> StoreResult<ExerciseGroup> {
        let row = sqlx::query(
            "SELECT id, user_id, name FROM exercise_groups WHERE user_id = $1 AND name = $2",
        )
        .bind(user_id)
        .bind(name)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(StoreError::NotFound)?;
        Ok(group_from_row(&row)?)
    }

    async fn delete_by_id(&self, id: i64) -> StoreResult<()> {
        let result = sqlx::query("DELETE FROM exercise_groups WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotDeleted);
        }
        Ok(())
    }

    async fn delete_by_name(&self, user_id: i64, name: &str) -> StoreResult<()> {
        let result = sqlx::query("DELETE FROM exercise_groups WHERE user_id = $1 AND name = $2")
            .bind(user_id)
            .bind(name)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotDeleted);
        }
        Ok(())
    }

    async fn update(&self, group: &ExerciseGroup) -> StoreResult<()> {
        let result = sqlx::query("UPDATE exercise_groups SET name = $1, user_id = $2 WHERE id = $3")
            .bind(&group.name)
            .bind(group.user_id)
            .bind(group.id)
            .execute(&self.pool)
            .await
            .map_err(|e| write_error(e, group.user_id, &group.name))?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotUpdated);
        }
        Ok(())
    }

    async fn update_by_name(&self, user_id: i64, name: &str, new_name: &str) -> StoreResult<()> {
        let result =
            sqlx::query("UPDATE exercise_groups SET name = $1 WHERE user_id = $2 AND name = $3")
                .bind(new_name)
                .bind(user_id)
                .bind(name)
                .execute(&self.pool)
                .await
                .map_err(|e| write_error(e, user_id, new_name))?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotUpdated);
        }
        Ok(())
    }

    async fn find_by_user_id(&self, user_id: i64) -> StoreResult<Vec<ExerciseGroup>> {
        let rows = sqlx::query(
            "SELECT id, user_id, name FROM exercise_groups WHERE user_id = $1 ORDER BY id",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .iter()
            .map(group_from_row)
            .collect::<Result<Vec<_>, _>>()?)
    }
}

// ---------------------------------------------------------------------------
// Trainings
// ---------------------------------------------------------------------------

/// [`TrainingStore`] over the `trainings` table.
#[derive(Debug, Clone)]
pub struct PgTrainingStore {
    pool: PgPool,
}

impl PgTrainingStore {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl TrainingStore for PgTrainingStore {
    async fn start_training(&self, user_id: i64) -> StoreResult<i64> {
        let id = sqlx::query_scalar::<_, i64>(
            "INSERT INTO trainings (user_id, begins) VALUES ($1, $2) RETURNING id",
        )
        .bind(user_id)
        .bind(Utc::now())
        .fetch_one(&self.pool)
        .await?;
        Ok(id)
    }

    async fn finish_training(&self, user_id: i64) -> StoreResult<()> {
        let result =
            sqlx::query("UPDATE trainings SET finish = $1 WHERE finish IS NULL AND user_id = $2")
                .bind(Utc::now())
                .bind(user_id)
                .execute(&self.pool)
                .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::AllTrainingsFinished);
        }
        Ok(())
    }

    async fn find_by_id(&self, id: i64) -> StoreResult<Training> {
        let row = sqlx::query("SELECT id, user_id, begins, finish FROM trainings WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(StoreError::NotFound)?;
        Ok(training_from_row(&row)?)
    }

    async fn last_training(&self, user_id: i64) -> StoreResult<Training> {
        let row = sqlx::query(
            "SELECT id, user_id, begins, finish FROM trainings \
             WHERE user_id = $1 ORDER BY begins DESC, id DESC LIMIT 1",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(StoreError::NotFound)?;
        Ok(training_from_row(&row)?)
    }

    async fn trainings_by_user(&self, user_id: i64) -> StoreResult<Vec<Training>> {
        let rows = sqlx::query(
            "SELECT id, user_id, begins, finish FROM trainings WHERE user_id = $1 ORDER BY id",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .iter()
            .map(training_from_row)
            .collect::<Result<Vec<_>, _>>()?)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
