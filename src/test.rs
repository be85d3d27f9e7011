//! Helper functions for testing the engine.

use std::str::FromStr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use chrono::{DateTime, TimeZone, Utc};
use rpki::crypto::KeyIdentifier;
use rpki::repository::resources::ResourceSet;
use rpki::uri;
use uuid::Uuid;
use crate::api::ca::{
    CaId, CaName, CaType, ResourceCertificate, SubjectInformationAccess,
    ValidityPeriod,
};
use crate::api::provisioning::CertificateIssuanceResponse;
use crate::api::roa::RoaConfigurationPrefix;
use crate::config::Config;
use crate::server::audit::MemoryCommandAudit;
use crate::server::ca::{CertificateAuthority, IncomingCertificate};
use crate::server::signer::{MemoryKeyPairArchive, SoftKeyPairFactory};
use crate::server::store::CaStore;

static SERIAL: AtomicU64 = AtomicU64::new(1_000_000);

/// Returns a fixed point in time plus the given number of hours.
pub fn time(hours: i64) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap()
        + chrono::Duration::hours(hours)
}

pub fn key_identifier(n: u8) -> KeyIdentifier {
    KeyIdentifier::from([n; 20])
}

/// Parses a comma separated list of IPv4 and IPv6 prefixes.
pub fn resources(s: &str) -> ResourceSet {
    let (v6, v4): (Vec<_>, Vec<_>) = s.split(',').map(str::trim).filter(|s| {
        !s.is_empty()
    }).partition(|s| s.contains(':'));
    ResourceSet::from_strs("", &v4.join(", "), &v6.join(", ")).unwrap()
}

pub fn rsync(s: &str) -> uri::Rsync {
    uri::Rsync::from_str(s).unwrap()
}

pub fn https(s: &str) -> uri::Https {
    uri::Https::from_str(s).unwrap()
}

pub fn roa(s: &str) -> RoaConfigurationPrefix {
    RoaConfigurationPrefix::from_str(s).unwrap()
}

pub fn sia(ca: Uuid, key: KeyIdentifier) -> SubjectInformationAccess {
    SubjectInformationAccess {
        ca_repository: rsync(&format!("rsync://localhost/repository/{ca}/")),
        rpki_manifest: rsync(
            &format!("rsync://localhost/repository/{ca}/{key}.mft")
        ),
        rpki_notify: None,
    }
}

pub fn config() -> Config {
    Config::default()
}

pub fn resource_certificate(
    serial: u64,
    subject: KeyIdentifier,
    issuer: KeyIdentifier,
    resources: ResourceSet,
    now: DateTime<Utc>,
) -> ResourceCertificate {
    ResourceCertificate {
        serial,
        subject_name: format!("CN={subject}"),
        subject_key: subject,
        issuer_key: issuer,
        resources,
        validity: ValidityPeriod::for_ca_certificate(now),
        sia: sia(Uuid::new_v4(), subject),
        issuer_certificate_uri: None,
    }
}

pub fn incoming_certificate(
    key: KeyIdentifier, resources: ResourceSet, now: DateTime<Utc>
) -> IncomingCertificate {
    IncomingCertificate::new(
        resource_certificate(
            SERIAL.fetch_add(1, Ordering::Relaxed), key, key_identifier(0),
            resources, now
        ),
        rsync(&format!("rsync://localhost/ta/{key}.cer")),
    )
}

/// Gives the current key of a CA, or its only key, a new certificate.
///
/// This is what a response from the trust anchor would do.
pub fn certify(ca: &mut CertificateAuthority, resources: &str, now: DateTime<Utc>) {
    let managed = ca.managed().unwrap();
    let key = managed.current_key().or_else(|| {
        managed.keys().first()
    }).unwrap().key_id();
    let mut certificate = resource_certificate(
        SERIAL.fetch_add(1, Ordering::Relaxed), key, key_identifier(0),
        self::resources(resources), now
    );
    certificate.sia = sia(ca.uuid(), key);
    ca.process_certificate_issuance_response(
        &CertificateIssuanceResponse::new(
            certificate, rsync(&format!("rsync://localhost/ta/{key}.cer"))
        ),
        now
    ).unwrap();
}

/// Creates a root level CA with a certified current key.
pub fn certified_parent(
    id: u64, resources: &str, now: DateTime<Utc>
) -> CertificateAuthority {
    let mut ca = CertificateAuthority::new_managed(
        CaId::new(id), CaName::new(format!("CN=parent-{id}")), CaType::Root,
        None, now
    );
    ca.create_key_pair(&SoftKeyPairFactory::default(), now).unwrap();
    certify(&mut ca, resources, now);
    ca
}

pub fn store() -> CaStore {
    CaStore::new(
        Duration::from_millis(100),
        Arc::new(MemoryCommandAudit::default()),
        Arc::new(MemoryKeyPairArchive::default()),
    )
}

/// Adds an uncertified managed CA to a store.
pub fn create_ca(
    store: &CaStore, name: &str, ca_type: CaType, parent: Option<CaId>
) -> CaId {
    let id = store.next_ca_id();
    let mut tx = store.begin();
    tx.create(CertificateAuthority::new_managed(
        id, CaName::from(name), ca_type, parent, time(0)
    )).unwrap();
    tx.commit().unwrap();
    id
}
