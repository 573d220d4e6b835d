pub mod compose;
pub mod config;
pub mod error;
pub mod graph;
pub mod image;
pub mod infra;
pub mod phase;
pub mod report;
pub mod secrets;
pub mod services;
pub mod unit;
pub mod validation;

pub use compose::{CompositionResult, compose};
pub use config::StackConfig;
pub use error::CompositionError;
pub use phase::PhaseGate;
