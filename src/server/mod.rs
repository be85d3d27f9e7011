//! The CA engine.

pub mod audit;
pub mod background;
pub mod ca;
pub mod command;
pub mod handlers;
pub mod manager;
pub mod metrics;
pub mod resources;
pub mod saga;
pub mod service;
pub mod signer;
pub mod store;
