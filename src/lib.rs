//! An engine for a hierarchy of RPKI certification authorities.

pub mod api;
pub mod commons;
pub mod config;
pub mod constants;
pub mod server;
pub mod test;
