//! Defines all engine errors.

use std::{error, fmt};
use rpki::crypto::KeyIdentifier;
use rpki::repository::resources::ResourceSet;
use crate::api::ca::{CaId, CaName, VersionedId};
use crate::config::ConfigError;
use crate::server::audit::CommandAuditData;


//------------ Error ---------------------------------------------------------

#[derive(Clone, Debug)]
pub enum Error {
    //-----------------------------------------------------------------
    // Outcomes that are not failures
    //-----------------------------------------------------------------

    /// The command had nothing to do.
    NoEffect,

    //-----------------------------------------------------------------
    // Concurrency
    //-----------------------------------------------------------------

    /// Commands were committed since the version the command was based on.
    ConcurrentModification {
        version: VersionedId,
        conflicting: Vec<CommandAuditData>,
    },

    /// A CA lock could not be acquired in time.
    LockTimeout(CaId),

    /// Two transactions tried to upgrade their shared lock on a CA.
    LockDeadlock(CaId),

    /// A CA modified without a lock was changed by someone else.
    OptimisticLock(VersionedId),

    //-----------------------------------------------------------------
    // Entities
    //-----------------------------------------------------------------

    CaNotFound(CaId),
    CaNameNotFound(CaName),
    CaExists(CaName),
    CaNotManaged(CaId),
    KeyNotFound(CaId, KeyIdentifier),

    /// The CA is not in a state that allows the command.
    InvalidCaState(CaId, String),

    //-----------------------------------------------------------------
    // Certificates
    //-----------------------------------------------------------------

    /// A child asked for resources its parent does not hold.
    ResourcesNotContained {
        parent: CaId,
        requested: ResourceSet,
    },

    /// A key may not have any certificates outstanding.
    IssuanceLimitExceeded(CaId, KeyIdentifier),

    //-----------------------------------------------------------------
    // Checks and batches
    //-----------------------------------------------------------------

    InvariantViolation(CaId, String),

    /// A batch job failed for too many CAs.
    TooManyBatchFailures(usize),

    //-----------------------------------------------------------------
    // Other
    //-----------------------------------------------------------------

    Config(String),
    Custom(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::NoEffect => {
                f.write_str("command had no effect")
            }
            Error::ConcurrentModification { version, conflicting } => {
                write!(
                    f,
                    "The CA was updated by someone else. Current \
                     version is {}, conflicting commands: [",
                    version
                )?;
                for (idx, cmd) in conflicting.iter().enumerate() {
                    if idx > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{}", cmd.summary())?;
                }
                f.write_str("]")
            }
            Error::LockTimeout(ca) => {
                write!(f, "Timed out waiting for lock on CA '{ca}'")
            }
            Error::LockDeadlock(ca) => {
                write!(f, "Deadlock detected upgrading lock on CA '{ca}'")
            }
            Error::OptimisticLock(id) => {
                write!(f, "CA '{id}' was modified concurrently")
            }
            Error::CaNotFound(ca) => {
                write!(f, "Unknown CA '{ca}'")
            }
            Error::CaNameNotFound(name) => {
                write!(f, "Unknown CA '{name}'")
            }
            Error::CaExists(name) => {
                write!(f, "CA '{name}' was already initialized")
            }
            Error::CaNotManaged(ca) => {
                write!(f, "CA '{ca}' does not hold its own keys here")
            }
            Error::KeyNotFound(ca, key) => {
                write!(f, "CA '{ca}' has no key '{key}'")
            }
            Error::InvalidCaState(ca, msg) => {
                write!(f, "Invalid state for CA '{ca}': {msg}")
            }
            Error::ResourcesNotContained { parent, requested } => {
                write!(
                    f,
                    "Parent CA '{parent}' does not hold requested \
                     resources '{requested}'"
                )
            }
            Error::IssuanceLimitExceeded(ca, key) => {
                write!(
                    f,
                    "Key '{key}' of CA '{ca}' may not issue any certificates"
                )
            }
            Error::InvariantViolation(ca, msg) => {
                write!(f, "Invariant violated for CA '{ca}': {msg}")
            }
            Error::TooManyBatchFailures(count) => {
                write!(
                    f,
                    "Too many exceptions encountered, suspecting problems \
                     that affect ALL CAs. ({count} failures)"
                )
            }
            Error::Config(msg) => {
                write!(f, "Configuration error: {msg}")
            }
            Error::Custom(msg) => f.write_str(msg),
        }
    }
}

impl Error {
    pub fn custom(msg: impl fmt::Display) -> Self {
        Error::Custom(msg.to_string())
    }

    pub fn invalid_ca_state(ca: CaId, msg: impl fmt::Display) -> Self {
        Error::InvalidCaState(ca, msg.to_string())
    }

    /// Returns whether this is the "nothing to do" signal.
    pub fn is_no_effect(&self) -> bool {
        matches!(self, Error::NoEffect)
    }

    /// Returns whether retrying the same command may succeed.
    ///
    /// These are failures to serialize with other transactions. A
    /// concurrent modification is not included: the caller must look at
    /// the new state before trying again.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Error::LockTimeout(_)
            | Error::LockDeadlock(_)
            | Error::OptimisticLock(_)
        )
    }

    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Error::CaNotFound(_)
            | Error::CaNameNotFound(_)
            | Error::KeyNotFound(..)
        )
    }

    /// Returns whether the error was caused by the user's input.
    pub fn is_user_error(&self) -> bool {
        matches!(
            self,
            Error::ConcurrentModification { .. }
            | Error::CaExists(_)
            | Error::CaNameNotFound(_)
            | Error::InvalidCaState(..)
        )
    }
}

impl error::Error for Error { }

impl From<ConfigError> for Error {
    fn from(err: ConfigError) -> Self {
        Error::Config(err.to_string())
    }
}


//============ Tests =========================================================
