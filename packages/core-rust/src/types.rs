use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A named group of exercises owned by one user.
///
/// Addressed either by `id` or by the `(user_id, name)` pair; the store
/// assigns `id` on creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExerciseGroup {
    pub id: i64,
    pub user_id: i64,
    pub name: String,
}

/// A training session. `finish` is `None` while the session is open.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Training {
    pub id: i64,
    pub user_id: i64,
    pub begins: DateTime<Utc>,
    pub finish: Option<DateTime<Utc>>,
}

impl Training {
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.finish.is_none()
    }
}
