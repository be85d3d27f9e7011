//! Various engine-wide constants.

use crate::commons::actor::Actor;


//------------ Handler Orders ------------------------------------------------

/// The order of the handler that acquires CA locks.
pub const HANDLER_ORDER_LOCK: u32 = 10;

/// The order of the handler that checks for concurrent modifications.
pub const HANDLER_ORDER_CONFLICT: u32 = 20;

/// The order of business handlers unless they say otherwise.
pub const HANDLER_ORDER_DEFAULT: u32 = 100;

/// The order of the handler that stores the command audit log.
pub const HANDLER_ORDER_AUDIT: u32 = 200;

/// The order of the handler that checks CA invariants.
pub const HANDLER_ORDER_INVARIANT: u32 = 1000;


//------------ Resource Classes ----------------------------------------------

/// The name of the single resource class every CA uses.
pub const DEFAULT_RESOURCE_CLASS: &str = "DEFAULT";


//------------ Issuance Limits -----------------------------------------------

/// The issuance limit for sagas that should never retire certificates.
pub const ISSUANCE_LIMIT_UNBOUNDED: usize = usize::MAX;


//------------ Manifests -----------------------------------------------------

/// The hours a manifest and CRL are valid for.
pub const MANIFEST_VALIDITY_HOURS: i64 = 24;

/// Manifests are replaced once they are valid for less than this.
pub const MANIFEST_REFRESH_HOURS: i64 = 16;


//------------ Config Defaults -----------------------------------------------

/// The default age in days after which a current key gets rolled.
pub const KEY_ROLLOVER_MAX_AGE_DAYS: u32 = 365;

/// The default staging time in hours before a pending key gets activated.
pub const KEY_ACTIVATION_STAGING_HOURS: u32 = 24;

/// The default maximum number of member CAs updated in one batch.
pub const CA_UPDATE_BATCH_SIZE: usize = 1000;

/// The default number of CA failures a batch tolerates.
pub const BATCH_MAX_FAILURES: usize = 10;

/// The default soft deadline of a batch after its first real update.
pub const BATCH_SOFT_DEADLINE_SECONDS: u64 = 10;

/// The default time to wait for a CA lock.
pub const LOCK_TIMEOUT_MS: u64 = 10_000;

/// The default number of retries for commands that failed transiently.
pub const COMMAND_MAX_RETRIES: u32 = 5;

/// The minimum backoff in milliseconds before retrying a command.
pub const COMMAND_RETRY_BASE_MS: u64 = 20;

/// The random jitter in milliseconds added to the retry backoff.
pub const COMMAND_RETRY_JITTER_MS: u64 = 30;

/// The default name of the all-resources CA.
pub const ALL_RESOURCES_CA_NAME: &str = "CN=All Resources CA";

/// The default name of the production CA.
pub const PRODUCTION_CA_NAME: &str = "CN=RIPE NCC Resources CA";


//------------ Built-in Actors -----------------------------------------------

/// The actor used for scheduled background work.
pub const ACTOR_DEF_SYSTEM: Actor = Actor::system("system");

/// The actor used for the offline trust anchor exchange.
pub const ACTOR_DEF_TRUST_ANCHOR: Actor = Actor::system("trust-anchor");

/// The actor used by tests.
#[cfg(test)]
pub const ACTOR_DEF_TEST: Actor = Actor::user("test");
