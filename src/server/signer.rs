//! Creating and archiving key pairs.
//!
//! The engine itself never touches private keys. It asks a
//! [`KeyPairFactory`] for new keys and hands revoked keys to a
//! [`KeyPairDeletion`] service which removes them from the key store once
//! it is safe to do so.

use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU32, Ordering};
use chrono::{DateTime, Utc};
use log::{debug, info};
use rpki::crypto::KeyIdentifier;
use uuid::Uuid;
use crate::api::ca::CaId;
use crate::commons::CaResult;
use crate::commons::error::Error;


//------------ KeyPairFactory ------------------------------------------------

/// Creates new key pairs for managed CAs.
pub trait KeyPairFactory: Send + Sync {
    /// Creates a new key pair and returns its identifier.
    fn create_key_pair(&self, ca: CaId) -> CaResult<KeyIdentifier>;
}


//------------ SoftKeyPairFactory --------------------------------------------

/// A key factory that makes up unique key identifiers.
///
/// This is used when keys live in a signer the engine does not manage, and
/// in tests.
#[derive(Debug, Default)]
pub struct SoftKeyPairFactory {
    counter: AtomicU32,
}

impl KeyPairFactory for SoftKeyPairFactory {
    fn create_key_pair(&self, ca: CaId) -> CaResult<KeyIdentifier> {
        let counter = self.counter.fetch_add(1, Ordering::Relaxed);
        let key = random_key_identifier(counter)?;
        debug!("Created key {key} for CA {ca}");
        Ok(key)
    }
}

/// Makes up a unique key identifier.
///
/// The identifier is a random UUID followed by the given suffix. This is
/// also used for the one-time keys of EE certificates.
pub fn random_key_identifier(suffix: u32) -> CaResult<KeyIdentifier> {
    let mut bytes = Vec::with_capacity(20);
    bytes.extend_from_slice(Uuid::new_v4().as_bytes());
    bytes.extend_from_slice(&suffix.to_be_bytes());
    KeyIdentifier::from_str(&hex::encode(bytes)).map_err(|_| {
        Error::custom("cannot create key identifier")
    })
}


//------------ KeyPairDeletion -----------------------------------------------

/// Schedules revoked key pairs for deletion.
pub trait KeyPairDeletion: Send + Sync {
    fn schedule_deletion(
        &self, ca: CaId, key: KeyIdentifier, now: DateTime<Utc>
    ) -> CaResult<()>;
}


//------------ MemoryKeyPairArchive ------------------------------------------

/// Keeps track of keys scheduled for deletion in memory.
#[derive(Debug, Default)]
pub struct MemoryKeyPairArchive {
    scheduled: Mutex<HashMap<KeyIdentifier, (CaId, DateTime<Utc>)>>,
}

impl MemoryKeyPairArchive {
    pub fn is_scheduled(&self, key: KeyIdentifier) -> bool {
        self.scheduled.lock().expect("poisoned lock").contains_key(&key)
    }

    pub fn scheduled_for(&self, ca: CaId) -> Vec<KeyIdentifier> {
        let mut res: Vec<_> = self.scheduled.lock().expect(
            "poisoned lock"
        ).iter().filter(|(_, (owner, _))| *owner == ca).map(|(key, _)| {
            *key
        }).collect();
        res.sort();
        res
    }

    pub fn len(&self) -> usize {
        self.scheduled.lock().expect("poisoned lock").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl KeyPairDeletion for MemoryKeyPairArchive {
    fn schedule_deletion(
        &self, ca: CaId, key: KeyIdentifier, now: DateTime<Utc>
    ) -> CaResult<()> {
        info!("Scheduled key {key} of CA {ca} for deletion");
        self.scheduled.lock().expect("poisoned lock").insert(key, (ca, now));
        Ok(())
    }
}


//============ Tests =========================================================
