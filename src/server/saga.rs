//! Bringing the certificates of a child in line with its resources.

use std::sync::Arc;
use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use rpki::repository::resources::ResourceSet;
use crate::api::ca::CaId;
use crate::api::provisioning::{
    CertificateProvisioningMessage, ResourceClassListQuery,
};
use crate::commons::CaResult;
use crate::server::ca::{CertificateAuthority, CertificateRequestCreation};
use crate::server::metrics::EngineMetrics;
use crate::server::resources::ResourceLookup;
use crate::server::signer::KeyPairFactory;
use crate::server::store::Transaction;


//------------ ChildParentCertificateUpdateSaga ------------------------------

/// Reconciles the certificates a parent issued to a child.
///
/// The child asks its parent which resources it can have. It then
/// requests certificates for its keys or, if it may not have any
/// resources at all, the revocation of all its keys.
///
/// The work is first planned on copies without locking the parent. Only
/// if that finds something to do is the parent locked and the plan made
/// again on the live state.
pub struct ChildParentCertificateUpdateSaga {
    resources: Arc<dyn ResourceLookup>,
    keys: Arc<dyn KeyPairFactory>,
    requests: CertificateRequestCreation,
    metrics: Arc<EngineMetrics>,
}

impl ChildParentCertificateUpdateSaga {
    pub fn new(
        resources: Arc<dyn ResourceLookup>,
        keys: Arc<dyn KeyPairFactory>,
        requests: CertificateRequestCreation,
        metrics: Arc<EngineMetrics>,
    ) -> Self {
        ChildParentCertificateUpdateSaga { resources, keys, requests, metrics }
    }

    /// Runs the saga for a child within a transaction.
    ///
    /// The child must be locked by the transaction. Returns whether
    /// anything changed.
    pub fn execute(
        &self,
        tx: &mut Transaction,
        parent: CaId,
        child: CaId,
        issuance_limit: usize,
        now: DateTime<Utc>,
    ) -> CaResult<bool> {
        let child_ca = tx.load(child)?;
        let Some(resources) = self.requested_resources(&child_ca) else {
            return Ok(false)
        };

        let parent_ca = tx.load(parent)?;
        if !self.is_update_needed_for(&parent_ca, &child_ca, &resources, now)? {
            debug!("CA {child} is up to date with its parent {parent}");
            return Ok(false)
        }

        tx.lock_and_refresh(parent)?;
        let mut parent_ca = tx.load(parent)?;
        let mut child_ca = tx.load(child)?;
        let requests = self.confirmed_requests(
            &parent_ca, &mut child_ca, &resources, now
        )?;
        if requests.is_empty() {
            debug!("Update of CA {child} was done by someone else");
            return Ok(false)
        }

        for request in &requests {
            match request {
                CertificateProvisioningMessage::Issuance(request) => {
                    let response = parent_ca.process_certificate_issuance_request(
                        child, request, issuance_limit, now
                    )?;
                    child_ca.process_certificate_issuance_response(
                        &response, now
                    )?;
                }
                CertificateProvisioningMessage::Revocation(request) => {
                    let response = parent_ca
                        .process_certificate_revocation_request(request, now)?;
                    if child_ca.process_certificate_revocation_response(
                        &response, now
                    )? {
                        tx.schedule_key_deletion(
                            child, request.subject_key(), now
                        );
                    }
                }
            }
        }
        info!(
            "Processed {} certificate request(s) from CA {} at parent {}",
            requests.len(), child, parent
        );
        tx.store(parent_ca);
        tx.store(child_ca);
        Ok(true)
    }

    /// Checks whether the saga would change anything.
    ///
    /// This works on copies and does not need any locks. Batch jobs use it
    /// to skip CAs that are up to date.
    pub fn is_update_needed(
        &self,
        parent: &CertificateAuthority,
        child: &CertificateAuthority,
        now: DateTime<Utc>,
    ) -> CaResult<bool> {
        match self.requested_resources(child) {
            Some(resources) => {
                self.is_update_needed_for(parent, child, &resources, now)
            }
            None => Ok(false)
        }
    }

    /// Returns the resources the child should ask for.
    ///
    /// Resources still held by the child's own children are kept even if
    /// the child is no longer entitled to them.
    fn requested_resources(
        &self, child: &CertificateAuthority
    ) -> Option<ResourceSet> {
        let Some(certifiable) = self.resources.certifiable_resources(
            child.name()
        ) else {
            warn!(
                "No certifiable resources known for CA {} ({}), skipping \
                 certificate update",
                child.id(), child.name()
            );
            return None
        };
        let held_by_children = child.current_child_resources();
        let overclaiming = !certifiable.contains(&held_by_children);
        self.metrics.set_overclaiming(child.id(), overclaiming);
        if overclaiming {
            warn!(
                "CA {} is no longer entitled to resources '{}' held by its \
                 children",
                child.id(), held_by_children.difference(&certifiable)
            );
            Some(certifiable.union(&held_by_children))
        }
        else {
            Some(certifiable)
        }
    }

    fn is_update_needed_for(
        &self,
        parent: &CertificateAuthority,
        child: &CertificateAuthority,
        resources: &ResourceSet,
        now: DateTime<Utc>,
    ) -> CaResult<bool> {
        if parent.certified_resources().is_none() {
            debug!("Parent {} of CA {} is not certified", parent.id(), child.id());
            return Ok(false)
        }
        let response = parent.process_resource_class_list_query(
            &ResourceClassListQuery::new(Some(resources.clone()))
        );
        if response.resources().is_some()
            && child.as_managed().is_some_and(|managed| managed.keys().is_empty())
        {
            return Ok(true)
        }
        let mut child = child.clone();
        Ok(!self.confirmed_requests(parent, &mut child, resources, now)?.is_empty())
    }

    /// Returns the requests the parent still has to process.
    ///
    /// A child without keys gets a new one here.
    fn confirmed_requests(
        &self,
        parent: &CertificateAuthority,
        child: &mut CertificateAuthority,
        resources: &ResourceSet,
        now: DateTime<Utc>,
    ) -> CaResult<Vec<CertificateProvisioningMessage>> {
        if parent.certified_resources().is_none() {
            return Ok(Vec::new())
        }
        let response = parent.process_resource_class_list_query(
            &ResourceClassListQuery::new(Some(resources.clone()))
        );
        let requests = child.process_resource_class_list_response(
            &response, &self.requests, self.keys.as_ref(), now
        )?;
        Ok(requests.into_iter().filter(|request| {
            match request {
                CertificateProvisioningMessage::Issuance(request) => {
                    match parent.latest_certificate_for(request, now) {
                        None => true,
                        Some(latest) => {
                            child.incoming_certificate_for(
                                request.subject_key()
                            ) != Some(latest.certificate())
                        }
                    }
                }
                CertificateProvisioningMessage::Revocation(request) => {
                    let key = request.subject_key();
                    child.holds_key(key)
                        || parent.has_current_certificate_for(key)
                }
            }
        }).collect())
    }
}


//============ Tests =========================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use crate::api::ca::{CaName, CaType};
    use crate::constants::ISSUANCE_LIMIT_UNBOUNDED;
    use crate::server::audit::MemoryCommandAudit;
    use crate::server::resources::MemoryResourceCache;
    use crate::server::signer::{MemoryKeyPairArchive, SoftKeyPairFactory};
    use crate::server::store::CaStore;
    use crate::test;

    struct Fixture {
        store: CaStore,
        cache: Arc<MemoryResourceCache>,
        archive: Arc<MemoryKeyPairArchive>,
        metrics: Arc<EngineMetrics>,
        saga: ChildParentCertificateUpdateSaga,
        parent: CaId,
        child: CaId,
    }

    fn fixture() -> Fixture {
        let archive = Arc::new(MemoryKeyPairArchive::default());
        let store = CaStore::new(
            Duration::from_millis(100),
            Arc::new(MemoryCommandAudit::default()),
            archive.clone(),
        );
        let cache = Arc::new(MemoryResourceCache::loaded());
        let metrics = Arc::new(EngineMetrics::default());
        let saga = ChildParentCertificateUpdateSaga::new(
            cache.clone(),
            Arc::new(SoftKeyPairFactory::default()),
            CertificateRequestCreation::new(&test::config()),
            metrics.clone(),
        );

        let parent = store.next_ca_id();
        let child = store.next_ca_id();
        let mut tx = store.begin();
        tx.create(test::certified_parent(
            parent.into_u64(), "10.0.0.0/8, 2001:db8::/32", test::time(0)
        )).unwrap();
        tx.create(CertificateAuthority::new_managed(
            child, CaName::from("CN=child"), CaType::Intermediate,
            Some(parent), test::time(0)
        )).unwrap();
        tx.commit().unwrap();

        Fixture { store, cache, archive, metrics, saga, parent, child }
    }

    impl Fixture {
        fn run(&self, limit: usize, days: i64) -> bool {
            let mut tx = self.store.begin();
            tx.lock(self.child).unwrap();
            let res = self.saga.execute(
                &mut tx, self.parent, self.child, limit,
                test::time(0) + chrono::Duration::days(days)
            ).unwrap();
            if res {
                tx.commit().unwrap();
            }
            res
        }

        fn child(&self) -> CertificateAuthority {
            self.store.get(self.child).unwrap()
        }

        fn grant(&self, resources: &str) {
            self.cache.update(CaName::from("CN=child"), test::resources(resources));
        }
    }

    #[test]
    fn issue_and_stay_idempotent() {
        let fixture = fixture();
        fixture.grant("10.1.0.0/16");

        assert!(fixture.run(ISSUANCE_LIMIT_UNBOUNDED, 1));
        let child = fixture.child();
        assert_eq!(
            child.certified_resources(), Some(&test::resources("10.1.0.0/16"))
        );
        let version = child.version();

        assert!(!fixture.run(ISSUANCE_LIMIT_UNBOUNDED, 2));
        assert_eq!(fixture.child().version(), version);
    }

    #[test]
    fn absent_resources_do_nothing() {
        let fixture = fixture();
        fixture.cache.set_loaded(false);
        assert!(!fixture.run(ISSUANCE_LIMIT_UNBOUNDED, 1));
        assert!(fixture.child().managed().unwrap().keys().is_empty());
    }

    #[test]
    fn lost_resources_revoke_all_keys() {
        let fixture = fixture();
        fixture.grant("10.1.0.0/16");
        assert!(fixture.run(ISSUANCE_LIMIT_UNBOUNDED, 1));
        let key = fixture.child().managed().unwrap().keys()[0].key_id();

        fixture.grant("192.168.0.0/16");
        assert!(fixture.run(ISSUANCE_LIMIT_UNBOUNDED, 2));
        assert!(fixture.child().managed().unwrap().keys().is_empty());
        assert!(fixture.archive.is_scheduled(key));
        let parent = fixture.store.get(fixture.parent).unwrap();
        assert!(!parent.has_current_certificate_for(key));

        // Regaining resources creates a new key.
        fixture.grant("10.2.0.0/16");
        assert!(fixture.run(ISSUANCE_LIMIT_UNBOUNDED, 3));
        let child = fixture.child();
        let keys = child.managed().unwrap().keys();
        assert_eq!(keys.len(), 1);
        assert_ne!(keys[0].key_id(), key);
        assert_eq!(
            child.certified_resources(), Some(&test::resources("10.2.0.0/16"))
        );
    }

    #[test]
    fn keep_resources_held_by_grandchildren() {
        let fixture = fixture();
        fixture.grant("10.1.0.0/16");
        assert!(fixture.run(ISSUANCE_LIMIT_UNBOUNDED, 1));

        // The child issues part of its resources to a grandchild.
        let mut child = fixture.child();
        let grandchild = fixture.store.next_ca_id();
        let request = crate::api::provisioning::CertificateIssuanceRequest::new(
            test::resources("10.1.1.0/24"), "CN=grandchild".into(),
            test::key_identifier(99), test::sia(uuid::Uuid::new_v4(),
            test::key_identifier(99))
        );
        child.process_certificate_issuance_request(
            grandchild, &request, ISSUANCE_LIMIT_UNBOUNDED,
            test::time(0) + chrono::Duration::days(1)
        ).unwrap();
        let mut tx = fixture.store.begin();
        tx.lock(fixture.child).unwrap();
        tx.store(child);
        tx.commit().unwrap();

        fixture.grant("10.2.0.0/16");
        assert!(fixture.run(ISSUANCE_LIMIT_UNBOUNDED, 2));
        assert_eq!(
            fixture.child().certified_resources(),
            Some(&test::resources("10.1.1.0/24, 10.2.0.0/16"))
        );
        assert_eq!(fixture.metrics.overclaiming_cas(), 1);
    }

    fn current_child_certificates(fixture: &Fixture) -> usize {
        let parent = fixture.store.get(fixture.parent).unwrap();
        parent.managed().unwrap().outgoing().current().filter(|cert| {
            cert.kind().is_child()
        }).count()
    }

    fn start_key_roll(fixture: &Fixture) {
        let mut child = fixture.child();
        CertificateRequestCreation::new(&test::config()).initiate_key_roll(
            &mut child, 0, &SoftKeyPairFactory::default(),
            test::time(0) + chrono::Duration::days(2)
        ).unwrap().unwrap();
        let mut tx = fixture.store.begin();
        tx.lock(fixture.child).unwrap();
        tx.store(child);
        tx.commit().unwrap();
    }

    fn activate_pending_key(fixture: &Fixture, days: i64) {
        let mut child = fixture.child();
        assert!(child.activate_pending_keys(
            chrono::Duration::hours(24),
            test::time(0) + chrono::Duration::days(days)
        ).unwrap());
        let mut tx = fixture.store.begin();
        tx.lock(fixture.child).unwrap();
        tx.store(child);
        tx.commit().unwrap();
    }

    #[test]
    fn limit_retires_earlier_certificates() {
        let fixture = fixture();
        fixture.grant("10.1.0.0/16");
        assert!(fixture.run(1, 1));
        let key = fixture.child().managed().unwrap().keys()[0].key_id();

        fixture.grant("10.1.0.0/16, 10.2.0.0/16");
        assert!(fixture.run(1, 2));
        assert_eq!(current_child_certificates(&fixture), 1);
        let parent = fixture.store.get(fixture.parent).unwrap();
        let latest = parent.managed().unwrap().outgoing().current().find(|cert| {
            cert.subject_key() == key
        }).unwrap();
        assert_eq!(
            latest.resources(), &test::resources("10.1.0.0/16, 10.2.0.0/16")
        );
    }

    #[test]
    fn limit_keeps_certificates_of_rolling_keys() {
        let fixture = fixture();
        fixture.grant("10.1.0.0/16");
        assert!(fixture.run(1, 1));
        start_key_roll(&fixture);

        assert!(fixture.run(1, 2));
        assert_eq!(current_child_certificates(&fixture), 2);
        assert!(!fixture.run(1, 3));
        assert!(!fixture.run(1, 4));

        let child = fixture.child();
        let managed = child.managed().unwrap();
        let parent = fixture.store.get(fixture.parent).unwrap();
        for key in [managed.current_key(), managed.pending_key()] {
            let key = key.unwrap();
            assert!(key.incoming().is_some());
            assert!(parent.has_current_certificate_for(key.key_id()));
        }
    }

    #[test]
    fn old_keys_follow_resource_changes() {
        let fixture = fixture();
        fixture.grant("10.1.0.0/16");
        assert!(fixture.run(ISSUANCE_LIMIT_UNBOUNDED, 1));
        start_key_roll(&fixture);
        assert!(fixture.run(ISSUANCE_LIMIT_UNBOUNDED, 2));
        activate_pending_key(&fixture, 4);

        fixture.grant("10.1.0.0/16, 10.9.0.0/16");
        assert!(fixture.run(ISSUANCE_LIMIT_UNBOUNDED, 5));
        let child = fixture.child();
        let managed = child.managed().unwrap();
        assert_eq!(managed.old_keys().count(), 1);
        assert!(managed.keys().iter().all(|key| {
            key.certified_resources()
                == Some(&test::resources("10.1.0.0/16, 10.9.0.0/16"))
        }));
        assert!(crate::server::handlers::violations(
            &child, test::time(0) + chrono::Duration::days(5)
        ).is_empty());
    }

    #[test]
    fn unbounded_limit_keeps_all_certificates() {
        let fixture = fixture();
        fixture.grant("10.1.0.0/16");
        assert!(fixture.run(ISSUANCE_LIMIT_UNBOUNDED, 1));
        start_key_roll(&fixture);

        assert!(fixture.run(ISSUANCE_LIMIT_UNBOUNDED, 2));
        assert_eq!(current_child_certificates(&fixture), 2);
        assert!(fixture.child().managed().unwrap().pending_key().is_some());
    }
}
