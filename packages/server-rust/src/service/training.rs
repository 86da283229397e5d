//! Handlers for the `training` domain.

use std::sync::Arc;

use tracing::{info, warn};
use trainings_core::{decode, Envelope, UserRequest};

use super::dispatcher::{DispatchError, DispatcherBuilder};
use super::handler::handler_fn;
use crate::storage::StoreError;
use crate::traits::TrainingStore;

pub const DOMAIN: &str = "training";

pub const START: &str = "start";
pub const FINISH: &str = "finish";
pub const GET: &str = "get";

/// Registers every training operation on a dispatcher builder.
pub struct TrainingHandlers {
    store: Arc<dyn TrainingStore>,
}

impl TrainingHandlers {
    #[must_use]
    pub fn new(store: Arc<dyn TrainingStore>) -> Self {
        Self { store }
    }

    /// # Errors
    ///
    /// Propagates [`DispatchError`] when one of the suffixes is already taken.
    pub fn register(&self, builder: &mut DispatcherBuilder) -> Result<(), DispatchError> {
        builder
            .register(START, handler_fn(Arc::clone(&self.store), start))?
            .register(FINISH, handler_fn(Arc::clone(&self.store), finish))?
            .register(GET, handler_fn(Arc::clone(&self.store), get))?;
        Ok(())
    }
}

/// Decodes the `{"user_id": n}` body shared by every training operation.
fn user_id(operation: &'static str, body: &[u8]) -> Result<i64, Envelope> {
    decode::<UserRequest>(body)
        .map(|request| request.user_id)
        .map_err(|e| {
            warn!(operation, error = ?e, "Rejected training request");
            Envelope::error(e)
        })
}

fn failure(operation: &'static str, context: &str, err: &StoreError) -> Envelope {
    if matches!(err, StoreError::Storage(_)) {
        warn!(operation, error = %err, "Training store failed");
    }
    Envelope::error(format_args!("{context}: {err}"))
}

/// `start`: opens a training, `SUCCESS: id:<n>`.
pub async fn start(store: Arc<dyn TrainingStore>, body: Vec<u8>) -> Envelope {
    let user_id = match user_id(START, &body) {
        Ok(id) => id,
        Err(envelope) => return envelope,
    };
    info!(user_id, "Request to start training");
    match store.start_training(user_id).await {
        Ok(id) => Envelope::created(id),
        Err(e) => failure(START, "error starting training", &e),
    }
}

/// `finish`: closes every open training of the user; bare `SUCCESS`.
pub async fn finish(store: Arc<dyn TrainingStore>, body: Vec<u8>) -> Envelope {
    let user_id = match user_id(FINISH, &body) {
        Ok(id) => id,
        Err(envelope) => return envelope,
    };
    info!(user_id, "Request to finish training");
    match store.finish_training(user_id).await {
        Ok(()) => Envelope::success(),
        Err(e) => failure(FINISH, "error finishing training", &e),
    }
}

/// `get`: every training of the user as a JSON array, possibly empty.
pub async fn get(store: Arc<dyn TrainingStore>, body: Vec<u8>) -> Envelope {
    let user_id = match user_id(GET, &body) {
        Ok(id) => id,
        Err(envelope) => return envelope,
    };
    info!(user_id, "Request to list trainings");
    match store.trainings_by_user(user_id).await {
        Ok(trainings) => Envelope::json(&trainings).unwrap_or_else(Envelope::error),
        Err(e) => failure(GET, "error getting trainings", &e),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
