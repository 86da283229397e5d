//! Relational state behind the request handlers.
//!
//! Defines [`StoreError`], the outcome vocabulary shared by every store, and
//! the concrete backends:
//!
//! - [`MemoryStore`]: `DashMap`-backed, used by tests and when no database is
//!   configured
//! - [`postgres`]: `sqlx` + `PostgreSQL` (feature `postgres`)
//!
//! The store traits themselves live in [`crate::traits`].

pub mod memory;
#[cfg(feature = "postgres")]
pub mod postgres;

pub use memory::MemoryStore;

/// Outcome of a store call that did not succeed.
///
/// `NotFound`, `NotDeleted` and `NotUpdated` mean the statement ran and
/// matched zero rows; `Storage` means the statement could not run at all.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("no rows in result set")]
    NotFound,
    #[error("no rows deleted")]
    NotDeleted,
    #[error("no rows updated")]
    NotUpdated,
    #[error("Empty non-finished trainings list")]
    AllTrainingsFinished,
    #[error("exercise group {name:?} already exists for user {user_id}")]
    Duplicate { user_id: i64, name: String },
    #[error("storage error: {0}")]
    Storage(String),
}

pub type StoreResult<T> = Result<T, StoreError>;
