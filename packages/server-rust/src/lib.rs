//! Trainings server: topic-routed request/response handlers over a pub/sub
//! bus, backed by relational stores.

pub mod app;
pub mod bus;
pub mod lifecycle;
pub mod logging;
pub mod router;
pub mod service;
pub mod storage;
pub mod traits;

pub use app::{Stores, TrainingService};
pub use lifecycle::{HealthState, ShutdownController};
pub use router::{DomainRouter, RouterConfig, RouterError};
pub use service::ServerConfig;
pub use traits::{ExerciseGroupStore, TrainingStore};
