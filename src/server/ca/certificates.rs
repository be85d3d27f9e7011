//! Certificates issued by a CA.

use chrono::{DateTime, Utc};
use rpki::crypto::KeyIdentifier;
use rpki::repository::resources::ResourceSet;
use rpki::uri;
use crate::api::ca::{CaId, ResourceCertificate};


//------------ OutgoingKind --------------------------------------------------

/// What an outgoing certificate was issued for.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum OutgoingKind {
    /// A CA certificate for a child CA.
    Child(CaId),

    /// The EE certificate of a manifest.
    ManifestEe,

    /// The EE certificate of a ROA.
    RoaEe,
}

impl OutgoingKind {
    pub fn is_child(self) -> bool {
        matches!(self, OutgoingKind::Child(_))
    }

    /// Returns whether this is the certificate of a signed object.
    pub fn is_rpki_object(self) -> bool {
        !self.is_child()
    }
}


//------------ OutgoingStatus ------------------------------------------------

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum OutgoingStatus {
    Current,
    Revoked(DateTime<Utc>),
    Expired,
}


//------------ OutgoingCertificate -------------------------------------------

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct OutgoingCertificate {
    certificate: ResourceCertificate,
    publication_uri: uri::Rsync,
    kind: OutgoingKind,
    status: OutgoingStatus,
    issued_at: DateTime<Utc>,
}

impl OutgoingCertificate {
    pub fn new(
        certificate: ResourceCertificate,
        publication_uri: uri::Rsync,
        kind: OutgoingKind,
        issued_at: DateTime<Utc>,
    ) -> Self {
        OutgoingCertificate {
            certificate, publication_uri, kind,
            status: OutgoingStatus::Current,
            issued_at,
        }
    }

    pub fn certificate(&self) -> &ResourceCertificate {
        &self.certificate
    }

    pub fn publication_uri(&self) -> &uri::Rsync {
        &self.publication_uri
    }

    pub fn kind(&self) -> OutgoingKind {
        self.kind
    }

    pub fn status(&self) -> OutgoingStatus {
        self.status
    }

    pub fn issued_at(&self) -> DateTime<Utc> {
        self.issued_at
    }

    pub fn serial(&self) -> u64 {
        self.certificate.serial
    }

    pub fn subject_key(&self) -> KeyIdentifier {
        self.certificate.subject_key
    }

    pub fn signing_key(&self) -> KeyIdentifier {
        self.certificate.issuer_key
    }

    pub fn resources(&self) -> &ResourceSet {
        &self.certificate.resources
    }

    pub fn is_current(&self) -> bool {
        self.status == OutgoingStatus::Current
    }

    /// Returns whether the certificate is current and inside its validity.
    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        self.is_current() && self.certificate.is_valid_at(now)
    }

    fn revoke(&mut self, now: DateTime<Utc>) {
        self.status = OutgoingStatus::Revoked(now);
    }
}


//------------ OutgoingCertificates ------------------------------------------

/// All certificates a CA has issued, in order of issuance.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct OutgoingCertificates {
    certificates: Vec<OutgoingCertificate>,
}

impl OutgoingCertificates {
    pub fn add(&mut self, certificate: OutgoingCertificate) {
        self.certificates.push(certificate)
    }

    pub fn iter(&self) -> impl Iterator<Item = &OutgoingCertificate> {
        self.certificates.iter()
    }

    pub fn current(&self) -> impl Iterator<Item = &OutgoingCertificate> {
        self.certificates.iter().filter(|cert| cert.is_current())
    }

    /// Returns the latest current certificate for a subject and signing key.
    pub fn find_latest(
        &self, subject: KeyIdentifier, signing_key: KeyIdentifier
    ) -> Option<&OutgoingCertificate> {
        self.current().filter(|cert| {
            cert.subject_key() == subject && cert.signing_key() == signing_key
        }).max_by_key(|cert| (cert.issued_at(), cert.serial()))
    }

    /// Returns whether there is a current certificate for the subject.
    pub fn has_current_for_subject(&self, subject: KeyIdentifier) -> bool {
        self.current().any(|cert| cert.subject_key() == subject)
    }

    /// Returns whether a key signed anything but its manifest.
    pub fn has_current_except_manifest(
        &self, signing_key: KeyIdentifier
    ) -> bool {
        self.current().any(|cert| {
            cert.signing_key() == signing_key
                && cert.kind() != OutgoingKind::ManifestEe
        })
    }

    /// Returns the union of resources on valid certificates of a kind.
    pub fn valid_resources(
        &self, now: DateTime<Utc>, child: bool
    ) -> ResourceSet {
        self.current().filter(|cert| {
            cert.is_valid_at(now) && cert.kind().is_child() == child
        }).fold(ResourceSet::default(), |res, cert| {
            res.union(cert.resources())
        })
    }

    /// Returns the union of resources on current child certificates.
    pub fn current_child_resources(&self) -> ResourceSet {
        self.current().filter(|cert| {
            cert.kind().is_child()
        }).fold(ResourceSet::default(), |res, cert| {
            res.union(cert.resources())
        })
    }

    /// Revokes all current certificates for a subject key.
    ///
    /// Returns the serials of the revoked certificates.
    pub fn revoke_subject(
        &mut self, subject: KeyIdentifier, now: DateTime<Utc>
    ) -> Vec<u64> {
        self.revoke_where(now, |cert| cert.subject_key() == subject)
    }

    /// Revokes the current certificates with the given serials.
    pub fn revoke_serials(
        &mut self, serials: &[u64], now: DateTime<Utc>
    ) -> Vec<u64> {
        self.revoke_where(now, |cert| serials.contains(&cert.serial()))
    }

    /// Revokes all current certificates of a kind signed by a key.
    pub fn revoke_kind(
        &mut self,
        signing_key: KeyIdentifier,
        kind: OutgoingKind,
        now: DateTime<Utc>,
    ) -> Vec<u64> {
        self.revoke_where(now, |cert| {
            cert.signing_key() == signing_key && cert.kind() == kind
        })
    }

    /// Revokes all current certificates signed by a key.
    pub fn revoke_signed_by(
        &mut self, signing_key: KeyIdentifier, now: DateTime<Utc>
    ) -> Vec<u64> {
        self.revoke_where(now, |cert| cert.signing_key() == signing_key)
    }

    fn revoke_where(
        &mut self,
        now: DateTime<Utc>,
        mut pred: impl FnMut(&OutgoingCertificate) -> bool,
    ) -> Vec<u64> {
        let mut res = Vec::new();
        for cert in self.certificates.iter_mut() {
            if cert.is_current() && pred(cert) {
                cert.revoke(now);
                res.push(cert.serial());
            }
        }
        res
    }

    /// Marks all certificates past their validity as expired.
    ///
    /// Returns the number of certificates that expired.
    pub fn expire(&mut self, now: DateTime<Utc>) -> usize {
        let mut count = 0;
        for cert in self.certificates.iter_mut() {
            if cert.status != OutgoingStatus::Expired
                && cert.certificate.validity.not_after() < now
            {
                cert.status = OutgoingStatus::Expired;
                count += 1;
            }
        }
        count
    }

    /// Returns the serials revoked but not yet expired under a key.
    ///
    /// These are the entries of the key's CRL.
    pub fn revoked_serials(&self, signing_key: KeyIdentifier) -> Vec<u64> {
        self.certificates.iter().filter(|cert| {
            cert.signing_key() == signing_key
                && matches!(cert.status(), OutgoingStatus::Revoked(_))
        }).map(OutgoingCertificate::serial).collect()
    }
}


//============ Tests =========================================================

#[cfg(test)]
mod tests {
    use chrono::Duration;
    use super::*;
    use crate::test;

    fn outgoing(
        serial: u64,
        subject: u8,
        signer: u8,
        kind: OutgoingKind,
        resources: &str,
        issued_at: DateTime<Utc>,
    ) -> OutgoingCertificate {
        let cert = test::resource_certificate(
            serial,
            test::key_identifier(subject),
            test::key_identifier(signer),
            test::resources(resources),
            issued_at,
        );
        OutgoingCertificate::new(
            cert, test::rsync("rsync://localhost/repo/ca/cert.cer"),
            kind, issued_at
        )
    }

    #[test]
    fn find_latest_and_revoke() {
        let t0 = test::time(0);
        let t1 = t0 + Duration::hours(1);
        let child = OutgoingKind::Child(CaId::new(2));
        let mut certs = OutgoingCertificates::default();
        certs.add(outgoing(1, 10, 1, child, "10.0.0.0/16", t0));
        certs.add(outgoing(2, 10, 1, child, "10.0.0.0/8", t1));
        certs.add(outgoing(3, 11, 1, OutgoingKind::ManifestEe, "", t1));

        let latest = certs.find_latest(
            test::key_identifier(10), test::key_identifier(1)
        ).unwrap();
        assert_eq!(latest.serial(), 2);
        assert_eq!(
            certs.current_child_resources(), test::resources("10.0.0.0/8")
        );
        assert!(certs.has_current_except_manifest(test::key_identifier(1)));

        assert_eq!(certs.revoke_subject(test::key_identifier(10), t1), vec![1, 2]);
        assert!(!certs.has_current_for_subject(test::key_identifier(10)));
        assert!(!certs.has_current_except_manifest(test::key_identifier(1)));
        assert_eq!(certs.revoked_serials(test::key_identifier(1)), vec![1, 2]);
    }

    #[test]
    fn expire_certificates() {
        let t0 = test::time(0);
        let mut certs = OutgoingCertificates::default();
        certs.add(outgoing(
            1, 10, 1, OutgoingKind::RoaEe, "10.0.0.0/8", t0
        ));
        assert_eq!(certs.expire(t0), 0);
        assert_eq!(certs.expire(t0 + Duration::days(600)), 1);
        assert_eq!(certs.expire(t0 + Duration::days(600)), 0);
        assert_eq!(certs.current().count(), 0);
    }
}
