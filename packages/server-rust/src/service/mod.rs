//! Request handling pipeline for one domain queue.
//!
//! 1. **Handlers** (`handler`, `exgroup`, `training`): message body -> `Envelope`
//! 2. **Dispatch** (`dispatcher`): routing-key suffix -> handler, frozen at startup
//! 3. **Middleware** (`middleware`): Tower layers around the dispatcher
//! 4. **Configuration** (`config`): process flags and environment

pub mod config;
pub mod dispatcher;
pub mod exgroup;
pub mod handler;
pub mod middleware;
pub mod training;

pub use config::{LogFormat, ServerConfig};
pub use dispatcher::{DispatchError, Dispatched, Dispatcher, DispatcherBuilder};
pub use exgroup::ExerciseGroupHandlers;
pub use handler::{boxed, handler_fn, BoxedHandler};
pub use middleware::TracingLayer;
pub use training::TrainingHandlers;
