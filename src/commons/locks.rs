//! Per CA locks held by transactions.
//!
//! Locks are owned by a transaction rather than by a guard value. A
//! transaction collects locks on several CAs while it runs and gives them
//! all up when it commits or rolls back.

use std::collections::{HashMap, HashSet};
use std::sync::{Condvar, Mutex};
use std::time::{Duration, Instant};
use log::trace;
use crate::api::ca::CaId;
use crate::commons::CaResult;
use crate::commons::error::Error;


//------------ TxId ----------------------------------------------------------

/// The identifier of a transaction holding locks.
pub type TxId = u64;


//------------ LockEntry -----------------------------------------------------

#[derive(Debug, Default)]
struct LockEntry {
    /// The transaction holding the lock exclusively.
    exclusive: Option<TxId>,

    /// The transactions sharing the lock.
    sharers: HashSet<TxId>,

    /// A sharer waiting to get the lock exclusively.
    upgrading: Option<TxId>,
}

impl LockEntry {
    fn is_free(&self) -> bool {
        self.exclusive.is_none()
            && self.sharers.is_empty()
            && self.upgrading.is_none()
    }
}


//------------ CaLocks -------------------------------------------------------

/// The lock table for all CAs.
#[derive(Debug)]
pub struct CaLocks {
    entries: Mutex<HashMap<CaId, LockEntry>>,
    released: Condvar,
    timeout: Duration,
}

impl CaLocks {
    pub fn new(timeout: Duration) -> Self {
        CaLocks {
            entries: Mutex::new(HashMap::new()),
            released: Condvar::new(),
            timeout,
        }
    }

    /// Acquires the lock on a CA exclusively.
    ///
    /// If the transaction already shares the lock, the lock is upgraded.
    /// If another sharer is already waiting to upgrade, neither could
    /// ever proceed, so this fails immediately.
    pub fn lock_exclusive(&self, tx: TxId, ca: CaId) -> CaResult<()> {
        let deadline = Instant::now() + self.timeout;
        let mut entries = self.entries.lock().expect("poisoned lock");
        loop {
            let entry = entries.entry(ca).or_default();
            if entry.exclusive == Some(tx) {
                return Ok(())
            }

            if entry.sharers.contains(&tx) {
                match entry.upgrading {
                    Some(other) if other != tx => {
                        return Err(Error::LockDeadlock(ca))
                    }
                    _ => entry.upgrading = Some(tx)
                }
            }

            let others_share = entry.sharers.iter().any(|id| *id != tx);
            let others_upgrade = entry.upgrading.is_some_and(|id| id != tx);
            if entry.exclusive.is_none() && !others_share && !others_upgrade {
                entry.exclusive = Some(tx);
                entry.sharers.remove(&tx);
                entry.upgrading = None;
                trace!("tx {tx} locked CA {ca} exclusively");
                return Ok(())
            }

            let now = Instant::now();
            if now >= deadline {
                if entry.upgrading == Some(tx) {
                    entry.upgrading = None;
                }
                return Err(Error::LockTimeout(ca))
            }
            entries = self.released.wait_timeout(
                entries, deadline - now
            ).expect("poisoned lock").0;
        }
    }

    /// Acquires the lock on a CA for sharing.
    ///
    /// Holding the lock exclusively already satisfies this.
    pub fn lock_shared(&self, tx: TxId, ca: CaId) -> CaResult<()> {
        let deadline = Instant::now() + self.timeout;
        let mut entries = self.entries.lock().expect("poisoned lock");
        loop {
            let entry = entries.entry(ca).or_default();
            if entry.exclusive == Some(tx) || entry.sharers.contains(&tx) {
                return Ok(())
            }
            if entry.exclusive.is_none() && entry.upgrading.is_none() {
                entry.sharers.insert(tx);
                trace!("tx {tx} locked CA {ca} for sharing");
                return Ok(())
            }

            let now = Instant::now();
            if now >= deadline {
                return Err(Error::LockTimeout(ca))
            }
            entries = self.released.wait_timeout(
                entries, deadline - now
            ).expect("poisoned lock").0;
        }
    }

    /// Releases all locks a transaction holds on the given CAs.
    pub fn release(&self, tx: TxId, cas: impl IntoIterator<Item = CaId>) {
        let mut entries = self.entries.lock().expect("poisoned lock");
        for ca in cas {
            let Some(entry) = entries.get_mut(&ca) else {
                continue
            };
            if entry.exclusive == Some(tx) {
                entry.exclusive = None;
            }
            entry.sharers.remove(&tx);
            if entry.upgrading == Some(tx) {
                entry.upgrading = None;
            }
            if entry.is_free() {
                entries.remove(&ca);
            }
        }
        self.released.notify_all();
    }

    /// Returns whether any transaction holds a lock on the CA.
    pub fn is_locked(&self, ca: CaId) -> bool {
        self.entries.lock().expect("poisoned lock").get(&ca).is_some_and(
            |entry| !entry.is_free()
        )
    }
}


//============ Tests =========================================================

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::thread;
    use super::*;

    fn locks() -> CaLocks {
        CaLocks::new(Duration::from_millis(50))
    }

    #[test]
    fn exclusive_is_reentrant() {
        let locks = locks();
        let ca = CaId::new(1);
        locks.lock_exclusive(1, ca).unwrap();
        locks.lock_exclusive(1, ca).unwrap();
        locks.lock_shared(1, ca).unwrap();
        locks.release(1, [ca]);
        assert!(!locks.is_locked(ca));
    }

    #[test]
    fn exclusive_times_out() {
        let locks = locks();
        let ca = CaId::new(1);
        locks.lock_exclusive(1, ca).unwrap();
        assert!(matches!(
            locks.lock_exclusive(2, ca), Err(Error::LockTimeout(_))
        ));
        assert!(matches!(
            locks.lock_shared(2, ca), Err(Error::LockTimeout(_))
        ));
    }

    #[test]
    fn shared_then_upgrade() {
        let locks = locks();
        let ca = CaId::new(1);
        locks.lock_shared(1, ca).unwrap();
        locks.lock_shared(2, ca).unwrap();

        // tx 2 is still sharing, so tx 1 cannot upgrade yet.
        assert!(matches!(
            locks.lock_exclusive(1, ca), Err(Error::LockTimeout(_))
        ));
        locks.release(2, [ca]);
        locks.lock_exclusive(1, ca).unwrap();
    }

    #[test]
    fn concurrent_upgrade_is_deadlock() {
        let locks = Arc::new(CaLocks::new(Duration::from_secs(5)));
        let ca = CaId::new(1);
        locks.lock_shared(1, ca).unwrap();
        locks.lock_shared(2, ca).unwrap();

        let waiter = {
            let locks = locks.clone();
            thread::spawn(move || locks.lock_exclusive(1, ca))
        };

        // Wait until tx 1 has registered its upgrade.
        loop {
            let registered = locks.entries.lock().unwrap().get(
                &ca
            ).is_some_and(|entry| entry.upgrading == Some(1));
            if registered {
                break
            }
            thread::yield_now();
        }

        assert!(matches!(
            locks.lock_exclusive(2, ca), Err(Error::LockDeadlock(_))
        ));
        locks.release(2, [ca]);
        waiter.join().unwrap().unwrap();
    }
}
