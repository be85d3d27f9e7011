//! Data structures exchanged with the engine's callers.

pub mod ca;
pub mod provisioning;
pub mod roa;
pub mod ta;
