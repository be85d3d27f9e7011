//! Creating the requests a CA sends to its parent.

use chrono::{DateTime, Utc};
use log::debug;
use rpki::crypto::KeyIdentifier;
use rpki::repository::resources::ResourceSet;
use rpki::uri;
use uuid::Uuid;
use crate::api::ca::SubjectInformationAccess;
use crate::api::provisioning::{
    CertificateIssuanceRequest, CertificateProvisioningMessage,
    CertificateRevocationRequest,
};
use crate::api::ta::{SigningRequest, TaRequest, TrustAnchorRequest};
use crate::commons::CaResult;
use crate::commons::error::Error;
use crate::config::Config;
use crate::constants::DEFAULT_RESOURCE_CLASS;
use crate::server::signer::KeyPairFactory;
use super::certauth::{CaKind, CertificateAuthority, join_uri};
use super::keys::KeyPairEntity;


//------------ CertificateRequestCreation ------------------------------------

/// Creates certificate requests for CAs.
///
/// This knows where CAs publish and fills in the subject information
/// access accordingly.
#[derive(Clone, Debug)]
pub struct CertificateRequestCreation {
    public_repository_uri: uri::Rsync,
    ta_repository_uri: uri::Rsync,
    notification_uri: Option<uri::Https>,
}

impl CertificateRequestCreation {
    pub fn new(config: &Config) -> Self {
        CertificateRequestCreation {
            public_repository_uri: config.public_repository_uri.clone(),
            ta_repository_uri: config.ta_repository_uri.clone(),
            notification_uri: config.notification_uri.clone(),
        }
    }

    /// The directory a CA publishes its objects in.
    pub fn ca_repository_uri(
        &self, ca: &CertificateAuthority
    ) -> CaResult<uri::Rsync> {
        join_uri(&self.public_repository_uri, &format!("{}/", ca.uuid()))
    }

    /// The SIA for the certificate of a key.
    pub fn sia_for(
        &self, ca: &CertificateAuthority, key: &KeyPairEntity
    ) -> CaResult<SubjectInformationAccess> {
        let ca_repository = self.ca_repository_uri(ca)?;
        let rpki_manifest = join_uri(&ca_repository, &key.manifest_filename())?;
        Ok(SubjectInformationAccess {
            ca_repository,
            rpki_manifest,
            rpki_notify: self.notification_uri.clone(),
        })
    }

    /// Creates a new key and asks for it to be certified.
    pub fn issuance_request_for_new_key(
        &self,
        ca: &mut CertificateAuthority,
        keys: &dyn KeyPairFactory,
        resources: &ResourceSet,
        now: DateTime<Utc>,
    ) -> CaResult<CertificateIssuanceRequest> {
        let key = ca.create_key_pair(keys, now)?;
        self.issuance_request(ca, key, resources.clone())
    }

    /// Asks for certificates for all keys.
    ///
    /// Old keys are included until they are revoked.
    pub fn issuance_requests_for_all_keys(
        &self, ca: &CertificateAuthority, resources: &ResourceSet
    ) -> CaResult<Vec<CertificateProvisioningMessage>> {
        match ca.kind() {
            CaKind::Managed(managed) => {
                managed.keys().iter().map(|key| {
                    self.issuance_request(ca, key.key_id(), resources.clone())
                        .map(Into::into)
                }).collect()
            }
            CaKind::NonHosted(non_hosted) => {
                Ok(non_hosted.keys().iter().map(|key| {
                    let subject_name = key.incoming().map(|incoming| {
                        incoming.certificate().subject_name.clone()
                    }).unwrap_or_else(|| default_subject_name(key.key_id()));
                    CertificateIssuanceRequest::new(
                        resources.clone(), subject_name, key.key_id(),
                        key.sia().clone()
                    ).into()
                }).collect())
            }
        }
    }

    /// Asks for all keys to be revoked.
    pub fn revocation_requests_for_all_keys(
        &self, ca: &CertificateAuthority
    ) -> Vec<CertificateProvisioningMessage> {
        let keys: Vec<KeyIdentifier> = match ca.kind() {
            CaKind::Managed(managed) => {
                managed.keys().iter().map(KeyPairEntity::key_id).collect()
            }
            CaKind::NonHosted(non_hosted) => {
                non_hosted.keys().iter().map(|key| key.key_id()).collect()
            }
        };
        keys.into_iter().map(|key| {
            CertificateRevocationRequest::new(key).into()
        }).collect()
    }

    /// Starts a key roll if the current key is old enough.
    ///
    /// Creates a new pending key and returns the request to certify it
    /// with the resources of the current key. Returns `None` if a roll is
    /// already in progress, the current key is not old enough, or the
    /// current key is not certified.
    pub fn initiate_key_roll(
        &self,
        ca: &mut CertificateAuthority,
        max_age_days: u32,
        keys: &dyn KeyPairFactory,
        now: DateTime<Utc>,
    ) -> CaResult<Option<CertificateIssuanceRequest>> {
        let managed = ca.managed()?;
        if managed.is_key_roll_in_progress() {
            debug!("CA {} is already rolling its key", ca.id());
            return Ok(None)
        }
        let Some(current) = managed.current_key() else {
            return Ok(None)
        };
        if !current.is_older_than(max_age_days, now) {
            return Ok(None)
        }
        let Some(resources) = current.certified_resources().cloned() else {
            return Ok(None)
        };
        let key = ca.create_key_pair(keys, now)?;
        self.issuance_request(ca, key, resources).map(Some)
    }

    /// Creates a signing request for the offline trust anchor.
    pub fn signing_request(
        &self,
        ca: &CertificateAuthority,
        key: KeyIdentifier,
        resources: ResourceSet,
    ) -> CaResult<TaRequest> {
        let request = self.issuance_request(ca, key, resources)?;
        let sia = request.sia().clone();
        Ok(TaRequest::Signing(SigningRequest {
            resource_class: DEFAULT_RESOURCE_CLASS.into(),
            subject_name: request.subject_name().into(),
            subject_key: key,
            resources: request.resources().clone(),
            sia_ca_repository: sia.ca_repository,
            sia_manifest: sia.rpki_manifest,
            sia_notify: sia.rpki_notify,
        }))
    }

    /// Creates a revocation request for the offline trust anchor.
    pub fn ta_revocation_request(&self, key: KeyIdentifier) -> TaRequest {
        TaRequest::Revocation {
            resource_class: DEFAULT_RESOURCE_CLASS.into(),
            key,
        }
    }

    /// Wraps requests into a request for the offline trust anchor.
    pub fn trust_anchor_request(
        &self, requests: Vec<TaRequest>, now: DateTime<Utc>
    ) -> TrustAnchorRequest {
        TrustAnchorRequest {
            request_id: Uuid::new_v4(),
            creation_time: now,
            ta_repository_uri: self.ta_repository_uri.clone(),
            notification_uri: self.notification_uri.clone(),
            public_repository_uri: self.public_repository_uri.clone(),
            requests,
        }
    }

    fn issuance_request(
        &self,
        ca: &CertificateAuthority,
        key: KeyIdentifier,
        resources: ResourceSet,
    ) -> CaResult<CertificateIssuanceRequest> {
        let Some(entity) = ca.managed()?.key(key) else {
            return Err(Error::KeyNotFound(ca.id(), key))
        };
        let subject_name = entity.incoming_certificate().map(|cert| {
            cert.subject_name.clone()
        }).unwrap_or_else(|| default_subject_name(key));
        Ok(CertificateIssuanceRequest::new(
            resources, subject_name, key, self.sia_for(ca, entity)?
        ))
    }
}

fn default_subject_name(key: KeyIdentifier) -> String {
    format!("CN={key}")
}


//============ Tests =========================================================
