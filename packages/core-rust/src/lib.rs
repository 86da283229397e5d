//! Trainings core: routing keys and binding patterns, the response envelope,
//! domain entities and request decoding.

pub mod envelope;
pub mod requests;
pub mod routing;
pub mod types;

pub use envelope::{Envelope, EnvelopeParseError};
pub use requests::{
    decode, CreateExerciseGroup, DecodeError, ExerciseGroupKey, RenameExerciseGroup, UserRequest,
    Validate,
};
pub use routing::{BindingPattern, RoutingError, RoutingKey, Segment};
pub use types::{ExerciseGroup, Training};
