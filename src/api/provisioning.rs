//! Provisioning messages exchanged between a child and its parent CA.
//!
//! These are the already decoded equivalents of the RFC 6492 list, issue
//! and revoke exchanges. They never go over the wire here: the parent and
//! child both live in this engine.

use std::fmt;
use rpki::crypto::KeyIdentifier;
use rpki::repository::resources::ResourceSet;
use rpki::uri;
use serde::{Deserialize, Serialize};
use super::ca::{ResourceCertificate, SubjectInformationAccess};


//------------ ResourceClassListQuery ----------------------------------------

/// Asks the parent which resources it can certify for a child.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ResourceClassListQuery {
    resources: Option<ResourceSet>,
}

impl ResourceClassListQuery {
    pub fn new(resources: Option<ResourceSet>) -> Self {
        ResourceClassListQuery { resources }
    }

    pub fn resources(&self) -> Option<&ResourceSet> {
        self.resources.as_ref()
    }
}


//------------ ResourceClassListResponse -------------------------------------

/// The parent's view of what it can certify for a child.
///
/// If there is nothing to certify, there are no resources at all.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ResourceClassListResponse {
    resources: Option<ResourceSet>,
}

impl ResourceClassListResponse {
    pub fn new(resources: Option<ResourceSet>) -> Self {
        ResourceClassListResponse {
            resources: resources.filter(|set| !set.is_empty())
        }
    }

    pub fn resources(&self) -> Option<&ResourceSet> {
        self.resources.as_ref()
    }
}


//------------ CertificateIssuanceRequest ------------------------------------

/// A request to certify a child key for a set of resources.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct CertificateIssuanceRequest {
    resources: ResourceSet,
    subject_name: String,
    subject_key: KeyIdentifier,
    sia: SubjectInformationAccess,
}

impl CertificateIssuanceRequest {
    pub fn new(
        resources: ResourceSet,
        subject_name: String,
        subject_key: KeyIdentifier,
        sia: SubjectInformationAccess,
    ) -> Self {
        CertificateIssuanceRequest {
            resources, subject_name, subject_key, sia
        }
    }

    pub fn resources(&self) -> &ResourceSet {
        &self.resources
    }

    pub fn subject_name(&self) -> &str {
        &self.subject_name
    }

    pub fn subject_key(&self) -> KeyIdentifier {
        self.subject_key
    }

    pub fn sia(&self) -> &SubjectInformationAccess {
        &self.sia
    }
}

impl fmt::Display for CertificateIssuanceRequest {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f, "issue for key {} ('{}') resources '{}'",
            self.subject_key, self.subject_name, self.resources
        )
    }
}


//------------ CertificateRevocationRequest ----------------------------------

/// A request to revoke all certificates for a child key.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct CertificateRevocationRequest {
    subject_key: KeyIdentifier,
}

impl CertificateRevocationRequest {
    pub fn new(subject_key: KeyIdentifier) -> Self {
        CertificateRevocationRequest { subject_key }
    }

    pub fn subject_key(&self) -> KeyIdentifier {
        self.subject_key
    }
}

impl fmt::Display for CertificateRevocationRequest {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "revoke key {}", self.subject_key)
    }
}


//------------ CertificateProvisioningMessage --------------------------------

/// A request a child sends to its parent.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum CertificateProvisioningMessage {
    Issuance(CertificateIssuanceRequest),
    Revocation(CertificateRevocationRequest),
}

impl CertificateProvisioningMessage {
    pub fn subject_key(&self) -> KeyIdentifier {
        match self {
            CertificateProvisioningMessage::Issuance(req) => req.subject_key(),
            CertificateProvisioningMessage::Revocation(req) => {
                req.subject_key()
            }
        }
    }
}

impl From<CertificateIssuanceRequest> for CertificateProvisioningMessage {
    fn from(req: CertificateIssuanceRequest) -> Self {
        CertificateProvisioningMessage::Issuance(req)
    }
}

impl From<CertificateRevocationRequest> for CertificateProvisioningMessage {
    fn from(req: CertificateRevocationRequest) -> Self {
        CertificateProvisioningMessage::Revocation(req)
    }
}

impl fmt::Display for CertificateProvisioningMessage {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            CertificateProvisioningMessage::Issuance(req) => req.fmt(f),
            CertificateProvisioningMessage::Revocation(req) => req.fmt(f),
        }
    }
}


//------------ CertificateIssuanceResponse -----------------------------------

/// The certificate a parent issued in response to an issuance request.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct CertificateIssuanceResponse {
    certificate: ResourceCertificate,
    publication_uri: uri::Rsync,
}

impl CertificateIssuanceResponse {
    pub fn new(
        certificate: ResourceCertificate, publication_uri: uri::Rsync
    ) -> Self {
        CertificateIssuanceResponse { certificate, publication_uri }
    }

    pub fn certificate(&self) -> &ResourceCertificate {
        &self.certificate
    }

    /// Where the parent publishes the certificate.
    pub fn publication_uri(&self) -> &uri::Rsync {
        &self.publication_uri
    }

    pub fn subject_key(&self) -> KeyIdentifier {
        self.certificate.subject_key
    }
}


//------------ CertificateRevocationResponse ---------------------------------

/// Confirms that all certificates for a key were revoked.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct CertificateRevocationResponse {
    subject_key: KeyIdentifier,
}

impl CertificateRevocationResponse {
    pub fn new(subject_key: KeyIdentifier) -> Self {
        CertificateRevocationResponse { subject_key }
    }

    pub fn subject_key(&self) -> KeyIdentifier {
        self.subject_key
    }
}
