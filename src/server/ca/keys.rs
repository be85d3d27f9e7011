//! CA key management.

use chrono::{DateTime, Duration, Utc};
use log::{debug, info};
use rpki::crypto::KeyIdentifier;
use rpki::repository::resources::ResourceSet;
use rpki::uri;
use crate::api::ca::{CaId, KeyPairStatus, ResourceCertificate};
use crate::commons::CaResult;
use crate::commons::error::Error;


//------------ IncomingCertificate -------------------------------------------

/// A certificate received from the parent for one of our keys.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct IncomingCertificate {
    certificate: ResourceCertificate,

    /// Where the parent publishes the certificate.
    publication_uri: uri::Rsync,
}

impl IncomingCertificate {
    pub fn new(
        certificate: ResourceCertificate, publication_uri: uri::Rsync
    ) -> Self {
        IncomingCertificate { certificate, publication_uri }
    }

    pub fn certificate(&self) -> &ResourceCertificate {
        &self.certificate
    }

    pub fn publication_uri(&self) -> &uri::Rsync {
        &self.publication_uri
    }

    pub fn resources(&self) -> &ResourceSet {
        &self.certificate.resources
    }
}


//------------ KeyStatusChange -----------------------------------------------

/// A moment in the life of a key.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct KeyStatusChange {
    pub status: KeyPairStatus,
    pub changed_at: DateTime<Utc>,
}


//------------ KeyPairEntity -------------------------------------------------

/// A key pair held by a managed CA.
///
/// Keys start out as pending. They can only become current once they are
/// certified, and only current keys can become old. Old keys are removed
/// from the CA after their certificates have been revoked.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct KeyPairEntity {
    key_id: KeyIdentifier,
    status: KeyPairStatus,
    status_history: Vec<KeyStatusChange>,
    created_at: DateTime<Utc>,
    incoming: Option<IncomingCertificate>,
}

impl KeyPairEntity {
    /// Creates a new pending key.
    pub fn new(key_id: KeyIdentifier, now: DateTime<Utc>) -> Self {
        KeyPairEntity {
            key_id,
            status: KeyPairStatus::Pending,
            status_history: vec![
                KeyStatusChange { status: KeyPairStatus::Pending, changed_at: now }
            ],
            created_at: now,
            incoming: None,
        }
    }

    pub fn key_id(&self) -> KeyIdentifier {
        self.key_id
    }

    pub fn status(&self) -> KeyPairStatus {
        self.status
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn status_history(&self) -> &[KeyStatusChange] {
        &self.status_history
    }

    /// Returns when the key most recently entered the given status.
    pub fn status_changed_at(
        &self, status: KeyPairStatus
    ) -> Option<DateTime<Utc>> {
        self.status_history.iter().rev().find(|change| {
            change.status == status
        }).map(|change| change.changed_at)
    }

    pub fn is_pending(&self) -> bool {
        self.status == KeyPairStatus::Pending
    }

    pub fn is_current(&self) -> bool {
        self.status == KeyPairStatus::Current
    }

    pub fn is_old(&self) -> bool {
        self.status == KeyPairStatus::Old
    }

    /// Returns whether products signed by this key may be published.
    pub fn is_publishable(&self) -> bool {
        self.incoming.is_some()
            && matches!(self.status, KeyPairStatus::Current | KeyPairStatus::Old)
    }

    pub fn incoming(&self) -> Option<&IncomingCertificate> {
        self.incoming.as_ref()
    }

    pub fn incoming_certificate(&self) -> Option<&ResourceCertificate> {
        self.incoming.as_ref().map(IncomingCertificate::certificate)
    }

    /// Returns the resources certified for this key, if any.
    pub fn certified_resources(&self) -> Option<&ResourceSet> {
        self.incoming.as_ref().map(IncomingCertificate::resources)
    }

    /// Returns whether the key was created more than `days` ago.
    pub fn is_older_than(&self, days: u32, now: DateTime<Utc>) -> bool {
        now.checked_sub_signed(Duration::days(days.into())).is_some_and(
            |cutoff| self.created_at < cutoff
        )
    }

    /// Returns whether the key has been pending for longer than `staging`.
    pub fn is_staged_longer_than(
        &self, staging: Duration, now: DateTime<Utc>
    ) -> bool {
        self.is_pending() && self.status_changed_at(
            KeyPairStatus::Pending
        ).is_some_and(|since| {
            now.checked_sub_signed(staging).is_some_and(|cutoff| {
                since < cutoff
            })
        })
    }

    /// Updates the incoming certificate.
    ///
    /// Returns whether anything changed.
    pub fn update_incoming_certificate(
        &mut self, incoming: IncomingCertificate
    ) -> bool {
        if self.incoming.as_ref() == Some(&incoming) {
            debug!(
                "Received unchanged certificate for key {}", self.key_id
            );
            return false
        }
        info!(
            "Received certificate for {} key {} with resources '{}'",
            self.status, self.key_id, incoming.resources()
        );
        self.incoming = Some(incoming);
        true
    }

    /// Removes the incoming certificate, returning it.
    pub fn remove_incoming_certificate(
        &mut self
    ) -> Option<IncomingCertificate> {
        self.incoming.take()
    }

    /// Makes a certified pending key current.
    pub fn activate(&mut self, ca: CaId, now: DateTime<Utc>) -> CaResult<()> {
        if !self.is_pending() {
            return Err(Error::invalid_ca_state(
                ca, format!("cannot activate {} key {}", self.status, self.key_id)
            ))
        }
        if self.incoming.is_none() {
            return Err(Error::invalid_ca_state(
                ca, format!("cannot activate uncertified key {}", self.key_id)
            ))
        }
        self.set_status(KeyPairStatus::Current, now);
        Ok(())
    }

    /// Makes a current key old.
    pub fn deactivate(
        &mut self, ca: CaId, now: DateTime<Utc>
    ) -> CaResult<()> {
        if !self.is_current() {
            return Err(Error::invalid_ca_state(
                ca,
                format!("cannot deactivate {} key {}", self.status, self.key_id)
            ))
        }
        self.set_status(KeyPairStatus::Old, now);
        Ok(())
    }

    fn set_status(&mut self, status: KeyPairStatus, now: DateTime<Utc>) {
        self.status = status;
        self.status_history.push(KeyStatusChange { status, changed_at: now });
    }

    /// The file name of the manifest published for this key.
    pub fn manifest_filename(&self) -> String {
        format!("{}.mft", self.key_id)
    }

    /// The file name of the CRL published for this key.
    pub fn crl_filename(&self) -> String {
        format!("{}.crl", self.key_id)
    }
}


//============ Tests =========================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test;

    #[test]
    fn key_life_cycle() {
        let ca = CaId::new(1);
        let t0 = test::time(0);
        let mut key = KeyPairEntity::new(test::key_identifier(1), t0);
        assert!(key.is_pending());
        assert!(!key.is_publishable());

        // Cannot activate without a certificate.
        assert!(key.activate(ca, t0).is_err());

        let cert = test::incoming_certificate(
            key.key_id(), test::resources("10.0.0.0/8"), t0
        );
        assert!(key.update_incoming_certificate(cert.clone()));
        assert!(!key.update_incoming_certificate(cert));

        let t1 = t0 + Duration::hours(25);
        assert!(key.is_staged_longer_than(Duration::hours(24), t1));
        key.activate(ca, t1).unwrap();
        assert!(key.is_current());
        assert!(key.is_publishable());
        assert_eq!(key.status_changed_at(KeyPairStatus::Current), Some(t1));

        key.deactivate(ca, t1).unwrap();
        assert!(key.is_old());
        assert!(key.is_publishable());
        assert!(key.deactivate(ca, t1).is_err());
        assert_eq!(key.status_history().len(), 3);
    }

    #[test]
    fn key_age() {
        let t0 = test::time(0);
        let key = KeyPairEntity::new(test::key_identifier(1), t0);
        assert!(!key.is_older_than(365, t0 + Duration::days(100)));
        assert!(key.is_older_than(365, t0 + Duration::days(400)));
        assert!(!key.is_older_than(u32::MAX, t0 + Duration::days(400)));
    }

    #[test]
    fn staging_out_of_range() {
        let t0 = test::time(0);
        let key = KeyPairEntity::new(test::key_identifier(1), t0);
        assert!(!key.is_staged_longer_than(
            Duration::MAX, t0 + Duration::hours(25)
        ));
        assert!(key.is_staged_longer_than(
            Duration::hours(24), t0 + Duration::hours(25)
        ));
    }
}
