//! Things that happen to a CA.
//!
//! Events are collected by the transaction a command runs in and end up
//! in the command's audit entry.

use std::fmt;
use rpki::crypto::KeyIdentifier;
use rpki::repository::resources::ResourceSet;
use crate::api::ca::{CaId, CaName, CaType, KeyPairStatus};


//------------ CaEvent -------------------------------------------------------

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum CaEvent {
    CaCreated {
        name: CaName,
        ca_type: CaType,
    },
    CaDeleted,
    KeyPairCreated {
        key: KeyIdentifier,
    },
    KeyPairActivated {
        key: KeyIdentifier,
    },
    KeyPairStatusChanged {
        key: KeyIdentifier,
        status: KeyPairStatus,
    },
    KeyPairRevoked {
        key: KeyIdentifier,
    },
    IncomingCertificateUpdated {
        key: KeyIdentifier,
        resources: ResourceSet,
    },
    IncomingCertificateRevoked {
        key: KeyIdentifier,
    },
    OutgoingCertificateIssued {
        child: CaId,
        subject: KeyIdentifier,
        serial: u64,
        resources: ResourceSet,
    },
    OutgoingCertificatesRevoked {
        serials: Vec<u64>,
    },
    OutgoingCertificatesExpired {
        count: usize,
    },
    ManifestAndCrlIssued {
        key: KeyIdentifier,
    },
    PublishedObjectsWithdrawn {
        key: KeyIdentifier,
        count: usize,
    },
    TrustAnchorRequestCreated {
        requests: usize,
    },
    TrustAnchorResponseProcessed,
    RoaConfigurationUpdated {
        added: usize,
        deleted: usize,
    },
    RoaAlertIgnoredAnnouncedRoutesUpdated {
        added: usize,
        deleted: usize,
    },
}

impl fmt::Display for CaEvent {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            CaEvent::CaCreated { name, ca_type } => {
                write!(f, "created {ca_type} CA '{name}'")
            }
            CaEvent::CaDeleted => f.write_str("deleted CA"),
            CaEvent::KeyPairCreated { key } => {
                write!(f, "created key {key}")
            }
            CaEvent::KeyPairActivated { key } => {
                write!(f, "activated key {key}")
            }
            CaEvent::KeyPairStatusChanged { key, status } => {
                write!(f, "key {key} is now {status}")
            }
            CaEvent::KeyPairRevoked { key } => {
                write!(f, "revoked key {key}")
            }
            CaEvent::IncomingCertificateUpdated { key, resources } => {
                write!(
                    f, "received certificate for key {key} with \
                        resources '{resources}'"
                )
            }
            CaEvent::IncomingCertificateRevoked { key } => {
                write!(f, "incoming certificate for key {key} revoked")
            }
            CaEvent::OutgoingCertificateIssued {
                child, subject, serial, resources
            } => {
                write!(
                    f, "issued certificate serial {serial} to CA {child} \
                        for key {subject} with resources '{resources}'"
                )
            }
            CaEvent::OutgoingCertificatesRevoked { serials } => {
                write!(f, "revoked certificates with serials {serials:?}")
            }
            CaEvent::OutgoingCertificatesExpired { count } => {
                write!(f, "expired {count} certificates")
            }
            CaEvent::ManifestAndCrlIssued { key } => {
                write!(f, "issued manifest and CRL for key {key}")
            }
            CaEvent::PublishedObjectsWithdrawn { key, count } => {
                write!(f, "withdrew {count} objects signed by key {key}")
            }
            CaEvent::TrustAnchorRequestCreated { requests } => {
                write!(f, "created trust anchor request with {requests} entries")
            }
            CaEvent::TrustAnchorResponseProcessed => {
                f.write_str("processed trust anchor response")
            }
            CaEvent::RoaConfigurationUpdated { added, deleted } => {
                write!(
                    f, "updated ROA configuration: {added} added, \
                        {deleted} deleted"
                )
            }
            CaEvent::RoaAlertIgnoredAnnouncedRoutesUpdated {
                added, deleted
            } => {
                write!(
                    f, "updated ignored announcements: {added} added, \
                        {deleted} deleted"
                )
            }
        }
    }
}
