//! Tower middleware around the dispatcher.
//!
//! - [`trace`]: dispatch span and completion log line

pub mod trace;

pub use trace::TracingLayer;
