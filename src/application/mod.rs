//! Application services: read coordination, write orchestration and the remote API port.

pub mod batch;
pub mod coordinator;
pub mod discussions;
pub mod error;
pub mod inflight;
pub mod remote;
