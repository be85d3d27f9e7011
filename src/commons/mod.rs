//! Common types used by the various engine components.

pub mod actor;
pub mod error;
pub mod locks;
pub mod metrics;

//------------ Response Aliases ----------------------------------------------

pub type CaResult<T> = std::result::Result<T, self::error::Error>;
