//! Handlers for the `exgroup` domain.

use std::sync::Arc;

use tracing::{info, warn};
use trainings_core::{
    decode, CreateExerciseGroup, DecodeError, Envelope, ExerciseGroupKey, RenameExerciseGroup,
    UserRequest,
};

use super::dispatcher::{DispatchError, DispatcherBuilder};
use super::handler::handler_fn;
use crate::storage::StoreError;
use crate::traits::ExerciseGroupStore;

pub const DOMAIN: &str = "exgroup";

pub const CREATE: &str = "create";
pub const DELETE: &str = "delete";
pub const FIND: &str = "find";
pub const UPDATE: &str = "update";
pub const FIND_BY_USER: &str = "findByUser";

/// Registers every exercise-group operation on a dispatcher builder.
pub struct ExerciseGroupHandlers {
    store: Arc<dyn ExerciseGroupStore>,
}

impl ExerciseGroupHandlers {
    #[must_use]
    pub fn new(store: Arc<dyn ExerciseGroupStore>) -> Self {
        Self { store }
    }

    /// # Errors
    ///
    /// Propagates [`DispatchError`] when one of the suffixes is already taken.
    pub fn register(&self, builder: &mut DispatcherBuilder) -> Result<(), DispatchError> {
        builder
            .register(CREATE, handler_fn(Arc::clone(&self.store), create))?
            .register(DELETE, handler_fn(Arc::clone(&self.store), delete))?
            .register(FIND, handler_fn(Arc::clone(&self.store), find))?
            .register(UPDATE, handler_fn(Arc::clone(&self.store), update))?
            .register(FIND_BY_USER, handler_fn(Arc::clone(&self.store), find_by_user))?;
        Ok(())
    }
}

fn wrong_input(operation: &'static str, err: &DecodeError) -> Envelope {
    warn!(operation, error = ?err, "Rejected exercise group request");
    Envelope::error(err)
}

fn store_failure(operation: &'static str, err: &StoreError) {
    if matches!(err, StoreError::Storage(_)) {
        warn!(operation, error = %err, "Exercise group store failed");
    }
}

/// `create`: `SUCCESS: id:<n>`.
pub async fn create(store: Arc<dyn ExerciseGroupStore>, body: Vec<u8>) -> Envelope {
    let request: CreateExerciseGroup = match decode(&body) {
        Ok(request) => request,
        Err(e) => return wrong_input(CREATE, &e),
    };
    info!(user_id = request.user_id, name = %request.name, "Request to create exercise group");
    match store.save(request.user_id, &request.name).await {
        Ok(id) => Envelope::created(id),
        Err(e) => {
            store_failure(CREATE, &e);
            Envelope::error(format_args!("internal server error: {e}"))
        }
    }
}

/// `delete`: bare `SUCCESS`.
pub async fn delete(store: Arc<dyn ExerciseGroupStore>, body: Vec<u8>) -> Envelope {
    let request: ExerciseGroupKey = match decode(&body) {
        Ok(request) => request,
        Err(e) => return wrong_input(DELETE, &e),
    };
    info!(user_id = request.user_id, name = %request.name, "Request to delete exercise group");
    match store.delete_by_name(request.user_id, &request.name).await {
        Ok(()) => Envelope::success(),
        Err(e) => {
            store_failure(DELETE, &e);
            Envelope::error(e)
        }
    }
}

/// `find`: the group as a JSON object.
pub async fn find(store: Arc<dyn ExerciseGroupStore>, body: Vec<u8>) -> Envelope {
    let request: ExerciseGroupKey = match decode(&body) {
        Ok(request) => request,
        Err(e) => return wrong_input(FIND, &e),
    };
    info!(user_id = request.user_id, name = %request.name, "Request to find exercise group");
    match store.find_by_name(request.user_id, &request.name).await {
        Ok(group) => Envelope::json(&group).unwrap_or_else(Envelope::error),
        Err(e) => {
            store_failure(FIND, &e);
            Envelope::error(e)
        }
    }
}

/// `update`: renames `(user_id, name)` to `newname`; bare `SUCCESS`.
pub async fn update(store: Arc<dyn ExerciseGroupStore>, body: Vec<u8>) -> Envelope {
    let request: RenameExerciseGroup = match decode(&body) {
        Ok(request) => request,
        Err(e) => return wrong_input(UPDATE, &e),
    };
    info!(
        user_id = request.user_id,
        name = %request.name,
        newname = %request.newname,
        "Request to rename exercise group"
    );
    match store
        .update_by_name(request.user_id, &request.name, &request.newname)
        .await
    {
        Ok(()) => Envelope::success(),
        Err(e) => {
            store_failure(UPDATE, &e);
            Envelope::error(e)
        }
    }
}

/// `findByUser`: every group of the user as a JSON array, possibly empty.
pub async fn find_by_user(store: Arc<dyn ExerciseGroupStore>, body: Vec<u8>) -> Envelope {
    let request: UserRequest = match decode(&body) {
        Ok(request) => request,
        Err(e) => return wrong_input(FIND_BY_USER, &e),
    };
    info!(user_id = request.user_id, "Request to list exercise groups");
    match store.find_by_user_id(request.user_id).await {
        Ok(groups) => Envelope::json(&groups).unwrap_or_else(Envelope::error),
        Err(e) => {
            store_failure(FIND_BY_USER, &e);
            Envelope::error(e)
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
