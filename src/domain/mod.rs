//! Domain layer types and invariants.

pub mod credential;
pub mod error;
pub mod reactions;
pub mod thread;
