//! Storage of CAs and the transactions commands run in.
//!
//! A [`Transaction`] works on copies of the CAs it loads. Changes become
//! visible to others only when the transaction commits. Dropping a
//! transaction without committing rolls it back.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use chrono::{DateTime, Utc};
use log::{debug, trace, warn};
use rpki::crypto::KeyIdentifier;
use crate::api::ca::{CaId, CaName, CaType, VersionedId};
use crate::commons::CaResult;
use crate::commons::error::Error;
use crate::commons::locks::{CaLocks, TxId};
use crate::server::audit::{CommandAudit, CommandAuditData};
use crate::server::ca::{CaEvent, CertificateAuthority};
use crate::server::signer::KeyPairDeletion;


//------------ CaStore -------------------------------------------------------

/// The committed state of all CAs.
pub struct CaStore {
    cas: RwLock<HashMap<CaId, CertificateAuthority>>,
    locks: CaLocks,
    audit: Arc<dyn CommandAudit>,
    deletion: Arc<dyn KeyPairDeletion>,
    next_tx: AtomicU64,
    next_ca: AtomicU64,
}

impl CaStore {
    pub fn new(
        lock_timeout: Duration,
        audit: Arc<dyn CommandAudit>,
        deletion: Arc<dyn KeyPairDeletion>,
    ) -> Self {
        CaStore {
            cas: RwLock::new(HashMap::new()),
            locks: CaLocks::new(lock_timeout),
            audit,
            deletion,
            next_tx: AtomicU64::new(1),
            next_ca: AtomicU64::new(1),
        }
    }

    /// Starts a new transaction.
    pub fn begin(&self) -> Transaction<'_> {
        let id = self.next_tx.fetch_add(1, Ordering::Relaxed);
        trace!("tx {id} started");
        Transaction {
            store: self,
            id,
            loaded: HashMap::new(),
            exclusive: HashSet::new(),
            shared: HashSet::new(),
            created: HashSet::new(),
            removed: HashSet::new(),
            events: Vec::new(),
            audit: Vec::new(),
            deletions: Vec::new(),
        }
    }

    /// Reserves the identifier for a new CA.
    pub fn next_ca_id(&self) -> CaId {
        CaId::new(self.next_ca.fetch_add(1, Ordering::Relaxed))
    }

    pub fn audit(&self) -> &dyn CommandAudit {
        self.audit.as_ref()
    }

    pub fn locks(&self) -> &CaLocks {
        &self.locks
    }

    /// Returns a copy of the committed state of a CA.
    pub fn get(&self, ca: CaId) -> Option<CertificateAuthority> {
        self.cas.read().expect("poisoned lock").get(&ca).cloned()
    }

    pub fn get_versioned_id(&self, ca: CaId) -> CaResult<VersionedId> {
        self.cas.read().expect("poisoned lock").get(&ca).map(|ca| {
            ca.versioned_id()
        }).ok_or(Error::CaNotFound(ca))
    }

    pub fn find_by_name(&self, name: &CaName) -> Option<CertificateAuthority> {
        self.cas.read().expect("poisoned lock").values().find(|ca| {
            ca.name() == name
        }).cloned()
    }

    pub fn find_by_type(&self, ca_type: CaType) -> Vec<CertificateAuthority> {
        let mut res: Vec<_> = self.cas.read().expect(
            "poisoned lock"
        ).values().filter(|ca| ca.ca_type() == ca_type).cloned().collect();
        res.sort_by_key(|ca| ca.id());
        res
    }

    /// Returns copies of all CAs ordered by identifier.
    pub fn all(&self) -> Vec<CertificateAuthority> {
        let mut res: Vec<_> = self.cas.read().expect(
            "poisoned lock"
        ).values().cloned().collect();
        res.sort_by_key(|ca| ca.id());
        res
    }

    pub fn children_of(&self, parent: CaId) -> Vec<CaId> {
        let mut res: Vec<_> = self.cas.read().expect(
            "poisoned lock"
        ).values().filter(|ca| ca.parent() == Some(parent)).map(|ca| {
            ca.id()
        }).collect();
        res.sort();
        res
    }

    /// Returns the number of ancestors of a CA.
    pub fn depth(&self, ca: CaId) -> usize {
        let cas = self.cas.read().expect("poisoned lock");
        let mut depth = 0;
        let mut current = cas.get(&ca).and_then(|ca| ca.parent());
        while let Some(parent) = current {
            depth += 1;
            if depth > cas.len() {
                break
            }
            current = cas.get(&parent).and_then(|ca| ca.parent());
        }
        depth
    }

    pub fn len(&self) -> usize {
        self.cas.read().expect("poisoned lock").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}


//------------ Transaction ---------------------------------------------------

/// A unit of work on the CAs.
pub struct Transaction<'a> {
    store: &'a CaStore,
    id: TxId,
    loaded: HashMap<CaId, WorkingCopy>,
    exclusive: HashSet<CaId>,
    shared: HashSet<CaId>,
    created: HashSet<CaId>,
    removed: HashSet<CaId>,
    events: Vec<(CaId, CaEvent)>,
    audit: Vec<CommandAuditData>,
    deletions: Vec<(CaId, KeyIdentifier, DateTime<Utc>)>,
}

struct WorkingCopy {
    ca: CertificateAuthority,

    /// The committed version the copy was loaded at.
    base_version: u64,

    /// Whether the copy was changed.
    dirty: bool,
}

impl<'a> Transaction<'a> {
    pub fn id(&self) -> TxId {
        self.id
    }

    pub fn ca_store(&self) -> &'a CaStore {
        self.store
    }

    //--- Locking

    /// Locks a CA exclusively.
    ///
    /// A CA locked exclusively gets a new version when the transaction
    /// commits, even if it was not changed.
    pub fn lock(&mut self, ca: CaId) -> CaResult<()> {
        self.store.locks.lock_exclusive(self.id, ca)?;
        self.shared.remove(&ca);
        self.exclusive.insert(ca);
        Ok(())
    }

    /// Locks a CA exclusively and reloads it unless it was changed.
    pub fn lock_and_refresh(&mut self, ca: CaId) -> CaResult<()> {
        self.lock(ca)?;
        if self.loaded.get(&ca).is_some_and(|copy| !copy.dirty) {
            trace!("tx {} refreshing CA {}", self.id, ca);
            self.loaded.remove(&ca);
        }
        Ok(())
    }

    /// Locks a CA for sharing with other transactions.
    pub fn lock_for_sharing(&mut self, ca: CaId) -> CaResult<()> {
        if self.exclusive.contains(&ca) {
            return Ok(())
        }
        self.store.locks.lock_shared(self.id, ca)?;
        self.shared.insert(ca);
        Ok(())
    }

    pub fn is_locked_exclusively(&self, ca: CaId) -> bool {
        self.exclusive.contains(&ca)
    }

    pub fn is_shared(&self, ca: CaId) -> bool {
        self.shared.contains(&ca)
    }

    //--- Loading and storing

    /// Returns the transaction's copy of a CA.
    pub fn load(&mut self, ca: CaId) -> CaResult<CertificateAuthority> {
        if self.removed.contains(&ca) {
            return Err(Error::CaNotFound(ca))
        }
        if let Some(copy) = self.loaded.get(&ca) {
            return Ok(copy.ca.clone())
        }
        let committed = self.store.get(ca).ok_or(Error::CaNotFound(ca))?;
        self.loaded.insert(ca, WorkingCopy {
            base_version: committed.version(),
            ca: committed.clone(),
            dirty: false,
        });
        Ok(committed)
    }

    /// Stores a changed CA.
    ///
    /// The events the CA recorded are moved to the transaction.
    pub fn store(&mut self, mut ca: CertificateAuthority) {
        let id = ca.id();
        for event in ca.take_events() {
            self.events.push((id, event));
        }
        match self.loaded.get_mut(&id) {
            Some(copy) => {
                copy.ca = ca;
                copy.dirty = true;
            }
            None => {
                let base_version = self.store.get(id).map(|committed| {
                    committed.version()
                }).unwrap_or_default();
                self.loaded.insert(id, WorkingCopy {
                    ca, base_version, dirty: true
                });
            }
        }
    }

    /// Adds a new CA.
    pub fn create(&mut self, ca: CertificateAuthority) -> CaResult<()> {
        let id = ca.id();
        if self.store.get(id).is_some() || self.loaded.contains_key(&id) {
            return Err(Error::invalid_ca_state(id, "identifier is in use"))
        }
        if self.store.find_by_name(ca.name()).is_some() {
            return Err(Error::CaExists(ca.name().clone()))
        }
        self.created.insert(id);
        self.store(ca);
        Ok(())
    }

    /// Removes a CA.
    pub fn remove(&mut self, ca: CaId) {
        self.loaded.remove(&ca);
        self.created.remove(&ca);
        self.removed.insert(ca);
        self.events.push((ca, CaEvent::CaDeleted));
    }

    pub fn is_dirty(&self, ca: CaId) -> bool {
        self.loaded.get(&ca).is_some_and(|copy| copy.dirty)
    }

    //--- Side effects

    /// Returns all events recorded so far.
    pub fn events(&self) -> &[(CaId, CaEvent)] {
        &self.events
    }

    /// Stages an audit entry to be recorded on commit.
    ///
    /// The version of the entry is set to the version the CA ends up with.
    pub fn record_audit(&mut self, entry: CommandAuditData) {
        self.audit.push(entry)
    }

    /// Schedules a revoked key for deletion once the transaction commits.
    pub fn schedule_key_deletion(
        &mut self, ca: CaId, key: KeyIdentifier, now: DateTime<Utc>
    ) {
        self.deletions.push((ca, key, now))
    }

    //--- Commit

    /// Commits all changes.
    ///
    /// Returns the resulting versions of all CAs that got one.
    pub fn commit(mut self) -> CaResult<HashMap<CaId, VersionedId>> {
        let mut versions = HashMap::new();
        {
            let mut cas = self.store.cas.write().expect("poisoned lock");

            for (id, copy) in &self.loaded {
                if !copy.dirty
                    || self.exclusive.contains(id)
                    || self.created.contains(id)
                {
                    continue
                }
                let committed = cas.get(id).ok_or(Error::CaNotFound(*id))?;
                if committed.version() != copy.base_version {
                    return Err(Error::OptimisticLock(committed.versioned_id()))
                }
            }

            let mut bumped: HashSet<CaId> = self.exclusive.clone();
            bumped.extend(
                self.loaded.iter().filter(|(_, copy)| {
                    copy.dirty
                }).map(|(id, _)| *id)
            );

            for id in bumped {
                if self.removed.contains(&id) {
                    continue
                }
                if self.created.contains(&id) {
                    if let Some(mut copy) = self.loaded.remove(&id) {
                        copy.ca.set_version(0);
                        versions.insert(id, copy.ca.versioned_id());
                        cas.insert(id, copy.ca);
                    }
                    continue
                }
                let Some(committed) = cas.get_mut(&id) else {
                    continue
                };
                let version = committed.version() + 1;
                match self.loaded.remove(&id) {
                    Some(mut copy) if copy.dirty => {
                        copy.ca.set_version(version);
                        *committed = copy.ca;
                    }
                    _ => committed.set_version(version)
                }
                versions.insert(id, VersionedId::new(id, version));
            }

            for id in &self.removed {
                if let Some(committed) = cas.remove(id) {
                    versions.insert(*id, committed.versioned_id().next());
                }
            }
        }

        for mut entry in self.audit.drain(..) {
            if let Some(version) = versions.get(&entry.ca().id()) {
                entry.set_version(*version);
            }
            self.store.audit.record(entry)?;
        }
        for (ca, key, now) in self.deletions.drain(..) {
            if let Err(err) = self.store.deletion.schedule_deletion(ca, key, now) {
                warn!("Could not schedule deletion of key {key} of CA {ca}: {err}");
            }
        }
        debug!("tx {} committed {} CA versions", self.id, versions.len());
        Ok(versions)
    }
}

impl Drop for Transaction<'_> {
    fn drop(&mut self) {
        let cas = self.exclusive.iter().chain(self.shared.iter()).copied();
        self.store.locks.release(self.id, cas.collect::<Vec<_>>());
        trace!("tx {} finished", self.id);
    }
}


//============ Tests =========================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::audit::MemoryCommandAudit;
    use crate::server::signer::MemoryKeyPairArchive;
    use crate::test;

    fn store() -> CaStore {
        CaStore::new(
            Duration::from_millis(50),
            Arc::new(MemoryCommandAudit::default()),
            Arc::new(MemoryKeyPairArchive::default()),
        )
    }

    fn create(store: &CaStore, name: &str) -> CaId {
        let id = store.next_ca_id();
        let mut tx = store.begin();
        tx.create(CertificateAuthority::new_managed(
            id, CaName::from(name), CaType::Hosted, None, test::time(0)
        )).unwrap();
        tx.commit().unwrap();
        id
    }

    #[test]
    fn new_cas_start_at_version_zero() {
        let store = store();
        let id = create(&store, "CN=one");
        assert_eq!(store.get_versioned_id(id).unwrap().version(), 0);

        let mut tx = store.begin();
        assert!(matches!(
            tx.create(CertificateAuthority::new_managed(
                store.next_ca_id(), CaName::from("CN=one"), CaType::Hosted,
                None, test::time(0)
            )),
            Err(Error::CaExists(_))
        ));
    }

    #[test]
    fn exclusive_lock_bumps_version_once() {
        let store = store();
        let id = create(&store, "CN=one");

        let mut tx = store.begin();
        tx.lock(id).unwrap();
        let ca = tx.load(id).unwrap();
        tx.store(ca.clone());
        tx.store(ca);
        let versions = tx.commit().unwrap();
        assert_eq!(versions.get(&id).map(|v| v.version()), Some(1));
        assert_eq!(store.get_versioned_id(id).unwrap().version(), 1);
        assert!(!store.locks().is_locked(id));
    }

    #[test]
    fn rollback_on_drop() {
        let store = store();
        let id = create(&store, "CN=one");
        {
            let mut tx = store.begin();
            tx.lock(id).unwrap();
            let ca = tx.load(id).unwrap();
            tx.store(ca);
        }
        assert_eq!(store.get_versioned_id(id).unwrap().version(), 0);
        assert!(!store.locks().is_locked(id));
    }

    #[test]
    fn unlocked_change_is_checked_optimistically() {
        let store = store();
        let id = create(&store, "CN=one");

        let mut first = store.begin();
        let ca = first.load(id).unwrap();

        let mut second = store.begin();
        second.lock(id).unwrap();
        second.commit().unwrap();

        first.store(ca);
        assert!(matches!(first.commit(), Err(Error::OptimisticLock(_))));
    }

    #[test]
    fn depth_follows_parents() {
        let store = store();
        let root = create(&store, "CN=root");
        let child = store.next_ca_id();
        let mut tx = store.begin();
        tx.create(CertificateAuthority::new_managed(
            child, CaName::from("CN=child"), CaType::Hosted, Some(root),
            test::time(0)
        )).unwrap();
        tx.commit().unwrap();

        assert_eq!(store.depth(root), 0);
        assert_eq!(store.depth(child), 1);
        assert_eq!(store.children_of(root), vec![child]);
    }
}
