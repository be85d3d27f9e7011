//! The aggregate for an RPKI Certification Authority.

use std::collections::{BTreeMap, BTreeSet};
use chrono::{DateTime, Duration, Utc};
use log::{debug, info, trace};
use rpki::crypto::KeyIdentifier;
use rpki::repository::resources::ResourceSet;
use rpki::uri;
use uuid::Uuid;
use crate::api::ca::{
    CaId, CaName, CaType, KeyPairStatus, ResourceCertificate,
    SubjectInformationAccess, ValidityPeriod, VersionedId,
};
use crate::api::provisioning::{
    CertificateIssuanceRequest, CertificateIssuanceResponse,
    CertificateProvisioningMessage, CertificateRevocationRequest,
    CertificateRevocationResponse, ResourceClassListQuery,
    ResourceClassListResponse,
};
use crate::api::roa::{AnnouncedRoute, RoaConfigurationPrefix};
use crate::api::ta::{TrustAnchorRequest, TrustAnchorResponse};
use crate::commons::CaResult;
use crate::commons::error::Error;
use crate::constants::{MANIFEST_REFRESH_HOURS, MANIFEST_VALIDITY_HOURS};
use crate::server::command::NonHostedPublicKey;
use crate::server::signer::{KeyPairFactory, random_key_identifier};
use super::certificates::{
    OutgoingCertificate, OutgoingCertificates, OutgoingKind,
};
use super::events::CaEvent;
use super::keys::{IncomingCertificate, KeyPairEntity};
use super::publishing::PublishedObjects;
use super::requests::CertificateRequestCreation;


//------------ CertificateAuthority ------------------------------------------

/// A certificate authority.
///
/// The CA acts as a parent towards the CAs it issues certificates to and
/// as a child towards its own parent. Changes are recorded as events
/// which the transaction collects when the CA is stored.
#[derive(Clone, Debug)]
pub struct CertificateAuthority {
    id: VersionedId,
    name: CaName,
    uuid: Uuid,
    ca_type: CaType,
    parent: Option<CaId>,
    kind: CaKind,
    created_at: DateTime<Utc>,

    /// Events not yet picked up by the transaction.
    events: Vec<CaEvent>,
}

/// Whether the CA keeps its keys here.
#[derive(Clone, Debug)]
pub enum CaKind {
    Managed(ManagedCa),
    NonHosted(NonHostedCa),
}

/// # Creation and identity
///
impl CertificateAuthority {
    /// Creates a new CA that holds its keys here.
    pub fn new_managed(
        id: CaId,
        name: CaName,
        ca_type: CaType,
        parent: Option<CaId>,
        now: DateTime<Utc>,
    ) -> Self {
        let managed = ManagedCa {
            manifest_and_crl_check_needed: true,
            ..Default::default()
        };
        Self::new(id, name, ca_type, parent, CaKind::Managed(managed), now)
    }

    /// Creates a new CA that holds its own keys elsewhere.
    pub fn new_non_hosted(
        id: CaId,
        name: CaName,
        parent: CaId,
        public_keys: Vec<NonHostedPublicKey>,
        now: DateTime<Utc>,
    ) -> Self {
        let keys = public_keys.into_iter().map(|key| {
            NonHostedKey { key: key.key, sia: key.sia, incoming: None }
        }).collect();
        Self::new(
            id, name, CaType::NonHosted, Some(parent),
            CaKind::NonHosted(NonHostedCa { keys }), now
        )
    }

    fn new(
        id: CaId,
        name: CaName,
        ca_type: CaType,
        parent: Option<CaId>,
        kind: CaKind,
        now: DateTime<Utc>,
    ) -> Self {
        CertificateAuthority {
            id: VersionedId::initial(id),
            events: vec![
                CaEvent::CaCreated { name: name.clone(), ca_type }
            ],
            name,
            uuid: Uuid::new_v4(),
            ca_type,
            parent,
            kind,
            created_at: now,
        }
    }

    pub fn id(&self) -> CaId {
        self.id.id()
    }

    pub fn versioned_id(&self) -> VersionedId {
        self.id
    }

    pub fn version(&self) -> u64 {
        self.id.version()
    }

    pub(crate) fn set_version(&mut self, version: u64) {
        self.id = VersionedId::new(self.id.id(), version)
    }

    pub fn name(&self) -> &CaName {
        &self.name
    }

    /// The identifier used for the CA's publication directory.
    pub fn uuid(&self) -> Uuid {
        self.uuid
    }

    pub fn ca_type(&self) -> CaType {
        self.ca_type
    }

    pub fn is_all_resources(&self) -> bool {
        self.ca_type == CaType::AllResources
    }

    pub fn parent(&self) -> Option<CaId> {
        self.parent
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn kind(&self) -> &CaKind {
        &self.kind
    }

    pub fn is_managed(&self) -> bool {
        matches!(self.kind, CaKind::Managed(_))
    }

    pub fn managed(&self) -> CaResult<&ManagedCa> {
        match &self.kind {
            CaKind::Managed(managed) => Ok(managed),
            CaKind::NonHosted(_) => Err(Error::CaNotManaged(self.id()))
        }
    }

    pub fn as_managed(&self) -> Option<&ManagedCa> {
        self.managed().ok()
    }

    pub fn non_hosted(&self) -> Option<&NonHostedCa> {
        match &self.kind {
            CaKind::NonHosted(non_hosted) => Some(non_hosted),
            CaKind::Managed(_) => None,
        }
    }

    /// Takes the events recorded since the last call.
    pub fn take_events(&mut self) -> Vec<CaEvent> {
        std::mem::take(&mut self.events)
    }

    pub fn record_event(&mut self, event: CaEvent) {
        trace!("CA {}: {}", self.id, event);
        self.events.push(event)
    }

    /// Creates a new pending key.
    pub fn create_key_pair(
        &mut self, keys: &dyn KeyPairFactory, now: DateTime<Utc>
    ) -> CaResult<KeyIdentifier> {
        let id = self.id();
        let CaKind::Managed(managed) = &mut self.kind else {
            return Err(Error::CaNotManaged(id))
        };
        let key = keys.create_key_pair(id)?;
        managed.keys.push(KeyPairEntity::new(key, now));
        self.events.push(CaEvent::KeyPairCreated { key });
        Ok(key)
    }

    /// The resources certified for the current key.
    pub fn certified_resources(&self) -> Option<&ResourceSet> {
        self.as_managed().and_then(ManagedCa::certified_resources)
    }

    /// The resources on current certificates issued to child CAs.
    pub fn current_child_resources(&self) -> ResourceSet {
        self.as_managed().map(|managed| {
            managed.outgoing.current_child_resources()
        }).unwrap_or_default()
    }
}

/// # Acting as a parent
///
impl CertificateAuthority {
    /// Answers which of the child's resources this CA can certify.
    ///
    /// The answer is empty if the two have nothing in common.
    pub fn process_resource_class_list_query(
        &self, query: &ResourceClassListQuery
    ) -> ResourceClassListResponse {
        let resources = match (query.resources(), self.certified_resources()) {
            (Some(child), Some(mine)) => {
                Some(child.intersection(mine)).filter(|res| !res.is_empty())
            }
            _ => None
        };
        ResourceClassListResponse::new(resources)
    }

    /// Returns the certificate that already satisfies the request.
    ///
    /// This is the latest certificate for the subject key signed by the
    /// current key, unless a new certificate is needed.
    pub fn latest_certificate_for(
        &self, request: &CertificateIssuanceRequest, now: DateTime<Utc>
    ) -> Option<&OutgoingCertificate> {
        let managed = self.as_managed()?;
        let signing = managed.current_key()?;
        let incoming = signing.incoming()?;
        let latest = managed.outgoing.find_latest(
            request.subject_key(), signing.key_id()
        )?;
        if is_new_certificate_needed(
            latest.certificate(), request, incoming.publication_uri(),
            &ValidityPeriod::for_ca_certificate(now)
        ) {
            None
        }
        else {
            Some(latest)
        }
    }

    /// Returns whether there is a current certificate for the subject key.
    pub fn has_current_certificate_for(&self, subject: KeyIdentifier) -> bool {
        self.as_managed().is_some_and(|managed| {
            managed.outgoing.has_current_for_subject(subject)
        })
    }

    /// Issues a certificate to a child.
    ///
    /// The limit applies per subject key. Earlier certificates for the
    /// subject are revoked, so only the new one stays current. A limit
    /// of zero refuses issuance.
    pub fn process_certificate_issuance_request(
        &mut self,
        child: CaId,
        request: &CertificateIssuanceRequest,
        limit: usize,
        now: DateTime<Utc>,
    ) -> CaResult<CertificateIssuanceResponse> {
        let id = self.id();
        if !self.ca_type.is_parent() {
            return Err(Error::invalid_ca_state(
                id, format!("a {} CA cannot issue certificates", self.ca_type)
            ))
        }
        let CaKind::Managed(managed) = &mut self.kind else {
            return Err(Error::CaNotManaged(id))
        };
        let signing = managed.signing_key(id)?;

        let validity = ValidityPeriod::for_ca_certificate(now);
        if let Some(latest) = managed.outgoing.find_latest(
            request.subject_key(), signing.key
        ) {
            if !is_new_certificate_needed(
                latest.certificate(), request, &signing.publication_uri,
                &validity
            ) {
                debug!(
                    "CA {} already issued certificate for key {}",
                    id, request.subject_key()
                );
                return Ok(CertificateIssuanceResponse::new(
                    latest.certificate().clone(),
                    latest.publication_uri().clone()
                ))
            }
        }

        if !signing.resources.contains(request.resources()) {
            return Err(Error::ResourcesNotContained {
                parent: id,
                requested: request.resources().clone(),
            })
        }
        if limit == 0 {
            return Err(Error::IssuanceLimitExceeded(id, signing.key))
        }

        let revoked = managed.outgoing.revoke_subject(
            request.subject_key(), now
        );
        if !revoked.is_empty() {
            managed.withdraw_certificates(&revoked, now);
            self.events.push(
                CaEvent::OutgoingCertificatesRevoked { serials: revoked }
            );
        }

        let certificate = ResourceCertificate {
            serial: managed.next_serial(),
            subject_name: request.subject_name().into(),
            subject_key: request.subject_key(),
            issuer_key: signing.key,
            resources: request.resources().clone(),
            validity,
            sia: request.sia().clone(),
            issuer_certificate_uri: Some(signing.publication_uri.clone()),
        };
        let publication_uri = join_uri(
            &signing.ca_repository, &format!("{}.cer", request.subject_key())
        )?;
        managed.outgoing.add(OutgoingCertificate::new(
            certificate.clone(), publication_uri.clone(),
            OutgoingKind::Child(child), now
        ));
        managed.published.publish(signing.key, publication_uri.clone(), now);
        managed.manifest_and_crl_check_needed = true;

        info!(
            "CA {} issued certificate to CA {} for key {} with resources '{}'",
            id, child, certificate.subject_key, certificate.resources
        );
        self.events.push(CaEvent::OutgoingCertificateIssued {
            child,
            subject: certificate.subject_key,
            serial: certificate.serial,
            resources: certificate.resources.clone(),
        });
        Ok(CertificateIssuanceResponse::new(certificate, publication_uri))
    }

    /// Revokes all current certificates for a child key.
    pub fn process_certificate_revocation_request(
        &mut self,
        request: &CertificateRevocationRequest,
        now: DateTime<Utc>,
    ) -> CaResult<CertificateRevocationResponse> {
        let id = self.id();
        let CaKind::Managed(managed) = &mut self.kind else {
            return Err(Error::CaNotManaged(id))
        };
        let serials = managed.outgoing.revoke_subject(
            request.subject_key(), now
        );
        if !serials.is_empty() {
            info!(
                "CA {} revoked certificates for key {}",
                id, request.subject_key()
            );
            managed.withdraw_certificates(&serials, now);
            managed.manifest_and_crl_check_needed = true;
            self.events.push(CaEvent::OutgoingCertificatesRevoked { serials });
        }
        Ok(CertificateRevocationResponse::new(request.subject_key()))
    }
}

/// # Acting as a child
///
impl CertificateAuthority {
    /// Turns the parent's answer into requests for the parent.
    ///
    /// A managed CA without keys creates one. A CA the parent certifies
    /// nothing for asks for all its keys to be revoked.
    pub fn process_resource_class_list_response(
        &mut self,
        response: &ResourceClassListResponse,
        requests: &CertificateRequestCreation,
        keys: &dyn KeyPairFactory,
        now: DateTime<Utc>,
    ) -> CaResult<Vec<CertificateProvisioningMessage>> {
        if self.is_all_resources() {
            return Err(Error::invalid_ca_state(
                self.id(), "the all resources CA is certified by the trust anchor"
            ))
        }
        let Some(resources) = response.resources() else {
            return Ok(requests.revocation_requests_for_all_keys(self))
        };
        let has_keys = self.as_managed().is_none_or(|managed| {
            !managed.keys.is_empty()
        });
        if has_keys {
            requests.issuance_requests_for_all_keys(self, resources)
        }
        else {
            let request = requests.issuance_request_for_new_key(
                self, keys, resources, now
            )?;
            Ok(vec![request.into()])
        }
    }

    /// Returns whether the CA still holds the key as far as the parent
    /// is concerned.
    pub fn holds_key(&self, key: KeyIdentifier) -> bool {
        match &self.kind {
            CaKind::Managed(managed) => managed.key(key).is_some(),
            CaKind::NonHosted(non_hosted) => {
                non_hosted.key(key).is_some_and(|key| key.incoming.is_some())
            }
        }
    }

    pub fn incoming_certificate_for(
        &self, key: KeyIdentifier
    ) -> Option<&ResourceCertificate> {
        match &self.kind {
            CaKind::Managed(managed) => {
                managed.key(key).and_then(KeyPairEntity::incoming_certificate)
            }
            CaKind::NonHosted(non_hosted) => {
                non_hosted.key(key).and_then(|key| {
                    key.incoming.as_ref().map(IncomingCertificate::certificate)
                })
            }
        }
    }

    /// Stores a certificate issued by the parent.
    ///
    /// Returns whether the certificate changed. The key of a CA that has
    /// no other keys is activated right away.
    pub fn process_certificate_issuance_response(
        &mut self,
        response: &CertificateIssuanceResponse,
        now: DateTime<Utc>,
    ) -> CaResult<bool> {
        let id = self.id();
        let key_id = response.subject_key();
        let incoming = IncomingCertificate::new(
            response.certificate().clone(), response.publication_uri().clone()
        );
        match &mut self.kind {
            CaKind::Managed(managed) => {
                let sole_key = managed.keys.len() == 1;
                let Some(key) = managed.key_mut(key_id) else {
                    return Err(Error::KeyNotFound(id, key_id))
                };
                if !key.update_incoming_certificate(incoming) {
                    return Ok(false)
                }
                self.events.push(CaEvent::IncomingCertificateUpdated {
                    key: key_id,
                    resources: response.certificate().resources.clone(),
                });
                if sole_key && key.is_pending() {
                    key.activate(id, now)?;
                    info!("CA {id} activated its first key {key_id}");
                    self.events.push(CaEvent::KeyPairActivated { key: key_id });
                }
                managed.manifest_and_crl_check_needed = true;
                Ok(true)
            }
            CaKind::NonHosted(non_hosted) => {
                let Some(key) = non_hosted.key_mut(key_id) else {
                    return Err(Error::KeyNotFound(id, key_id))
                };
                if key.incoming.as_ref() == Some(&incoming) {
                    return Ok(false)
                }
                key.incoming = Some(incoming);
                self.events.push(CaEvent::IncomingCertificateUpdated {
                    key: key_id,
                    resources: response.certificate().resources.clone(),
                });
                Ok(true)
            }
        }
    }

    /// Processes the parent's confirmation that a key was revoked.
    ///
    /// A managed CA drops the key and withdraws everything it signed.
    /// Returns whether the key pair should be deleted.
    pub fn process_certificate_revocation_response(
        &mut self,
        response: &CertificateRevocationResponse,
        now: DateTime<Utc>,
    ) -> CaResult<bool> {
        let key_id = response.subject_key();
        match &mut self.kind {
            CaKind::Managed(managed) => {
                let Some(pos) = managed.keys.iter().position(|key| {
                    key.key_id() == key_id
                }) else {
                    return Ok(false)
                };
                managed.keys.remove(pos);
                let serials = managed.outgoing.revoke_signed_by(key_id, now);
                if !serials.is_empty() {
                    self.events.push(
                        CaEvent::OutgoingCertificatesRevoked { serials }
                    );
                }
                let count = managed.published.withdraw_for_key(key_id, now);
                managed.manifest_and_crl_check_needed = true;
                info!("CA {} revoked key {}", self.id, key_id);
                self.events.push(CaEvent::KeyPairRevoked { key: key_id });
                if count > 0 {
                    self.events.push(CaEvent::PublishedObjectsWithdrawn {
                        key: key_id, count
                    });
                }
                Ok(true)
            }
            CaKind::NonHosted(non_hosted) => {
                if let Some(key) = non_hosted.key_mut(key_id) {
                    if key.incoming.take().is_some() {
                        self.events.push(
                            CaEvent::IncomingCertificateRevoked { key: key_id }
                        );
                    }
                }
                Ok(false)
            }
        }
    }
}

/// # Key rollover
///
impl CertificateAuthority {
    /// Makes a pending key current if it was staged long enough.
    ///
    /// The current key becomes old. Returns whether a key was activated.
    pub fn activate_pending_keys(
        &mut self, min_staging: Duration, now: DateTime<Utc>
    ) -> CaResult<bool> {
        let id = self.id();
        let CaKind::Managed(managed) = &mut self.kind else {
            return Err(Error::CaNotManaged(id))
        };
        let Some(pos) = managed.keys.iter().position(|key| {
            key.incoming().is_some()
                && key.is_staged_longer_than(min_staging, now)
        }) else {
            return Ok(false)
        };

        if let Some(current) = managed.keys.iter_mut().find(|key| {
            key.is_current()
        }) {
            current.deactivate(id, now)?;
            self.events.push(CaEvent::KeyPairStatusChanged {
                key: current.key_id(), status: KeyPairStatus::Old
            });
        }
        let pending = &mut managed.keys[pos];
        pending.activate(id, now)?;
        info!("CA {} activated key {}", id, pending.key_id());
        self.events.push(CaEvent::KeyPairActivated { key: pending.key_id() });
        managed.manifest_and_crl_check_needed = true;
        Ok(true)
    }

    /// Returns the old keys that can be revoked.
    ///
    /// These are keys that signed nothing but their own manifest any more
    /// and for which no revocation is pending with the trust anchor.
    pub fn revocable_old_keys(&self) -> Vec<KeyIdentifier> {
        let Some(managed) = self.as_managed() else {
            return Vec::new()
        };
        managed.keys.iter().filter(|key| {
            key.is_old()
                && !managed.outgoing.has_current_except_manifest(key.key_id())
                && !managed.trust_anchor_request.as_ref().is_some_and(|req| {
                    req.contains_key(key.key_id())
                })
        }).map(KeyPairEntity::key_id).collect()
    }
}

/// # Manifests, CRLs and ROAs
///
impl CertificateAuthority {
    /// Returns whether manifests and CRLs need to be issued.
    pub fn is_manifest_and_crl_update_needed(&self, now: DateTime<Utc>) -> bool {
        self.as_managed().is_some_and(|managed| {
            managed.manifest_and_crl_check_needed
                || managed.publishable_keys().any(|key| {
                    managed.is_manifest_update_needed(key, now)
                })
        })
    }

    /// Issues new manifests and CRLs for all publishable keys.
    ///
    /// ROA EE certificates are brought in line with the ROA configuration
    /// and the resources of the current key first. Returns whether there
    /// was anything to do.
    pub fn issue_updated_manifest_and_crl(
        &mut self, now: DateTime<Utc>
    ) -> CaResult<bool> {
        if !self.is_manifest_and_crl_update_needed(now) {
            return Ok(false)
        }
        let id = self.id();
        let CaKind::Managed(managed) = &mut self.kind else {
            return Err(Error::CaNotManaged(id))
        };

        let publishable: Vec<_> = managed.publishable_keys().filter_map(|key| {
            key.incoming().map(|incoming| {
                (key.key_id(), key.is_current(), key.crl_filename(), incoming.clone())
            })
        }).collect();

        let mut revoked = Vec::new();
        for (key, is_current, _, incoming) in &publishable {
            if *is_current {
                revoked.extend(
                    managed.update_roa_certificates(*key, incoming, now)?
                );
            }
            else {
                revoked.extend(
                    managed.outgoing.revoke_kind(*key, OutgoingKind::RoaEe, now)
                );
            }
        }

        let manifest_validity = ValidityPeriod::new(
            now, now + Duration::hours(MANIFEST_VALIDITY_HOURS)
        );
        for (key, _, crl_filename, incoming) in &publishable {
            revoked.extend(
                managed.outgoing.revoke_kind(*key, OutgoingKind::ManifestEe, now)
            );
            let sia = &incoming.certificate().sia;
            let manifest_uri = sia.rpki_manifest.clone();
            let crl_uri = join_uri(&sia.ca_repository, crl_filename)?;
            managed.issue_ee_certificate(
                *key, incoming, "manifest".into(), ResourceSet::default(),
                manifest_validity, OutgoingKind::ManifestEe,
                manifest_uri, now
            )?;
            managed.published.publish(*key, crl_uri, now);
            self.events.push(CaEvent::ManifestAndCrlIssued { key: *key });
        }

        if !revoked.is_empty() {
            managed.withdraw_certificates(&revoked, now);
            self.events.push(
                CaEvent::OutgoingCertificatesRevoked { serials: revoked }
            );
        }
        managed.manifest_and_crl_check_needed = false;
        Ok(true)
    }

    /// Marks outgoing certificates past their validity as expired.
    pub fn expire_outgoing_certificates(
        &mut self, now: DateTime<Utc>
    ) -> CaResult<usize> {
        let id = self.id();
        let CaKind::Managed(managed) = &mut self.kind else {
            return Err(Error::CaNotManaged(id))
        };
        let count = managed.outgoing.expire(now);
        if count > 0 {
            debug!("CA {id} expired {count} outgoing certificates");
            self.events.push(CaEvent::OutgoingCertificatesExpired { count });
        }
        Ok(count)
    }

    /// Adds and removes configured ROA prefixes.
    ///
    /// Adding a prefix replaces an existing one for the same ASN and
    /// prefix. Returns whether the configuration changed.
    pub fn update_roa_configuration(
        &mut self,
        added: &[RoaConfigurationPrefix],
        deleted: &[RoaConfigurationPrefix],
    ) -> CaResult<bool> {
        let id = self.id();
        let CaKind::Managed(managed) = &mut self.kind else {
            return Err(Error::CaNotManaged(id))
        };
        let before = managed.roa_configuration.clone();
        for prefix in deleted {
            managed.roa_configuration.remove(prefix);
        }
        for prefix in added {
            managed.roa_configuration.retain(|existing| {
                existing.asn != prefix.asn || existing.prefix != prefix.prefix
            });
            managed.roa_configuration.insert(prefix.clone());
        }
        if managed.roa_configuration == before {
            return Ok(false)
        }
        managed.manifest_and_crl_check_needed = true;
        self.events.push(CaEvent::RoaConfigurationUpdated {
            added: added.len(), deleted: deleted.len()
        });
        Ok(true)
    }

    /// Adds and removes announcements that ROA alerts should ignore.
    pub fn update_ignored_announcements(
        &mut self, added: &[AnnouncedRoute], deleted: &[AnnouncedRoute]
    ) -> CaResult<bool> {
        let id = self.id();
        let CaKind::Managed(managed) = &mut self.kind else {
            return Err(Error::CaNotManaged(id))
        };
        let before = managed.ignored_announcements.clone();
        for route in deleted {
            managed.ignored_announcements.remove(route);
        }
        managed.ignored_announcements.extend(added.iter().cloned());
        if managed.ignored_announcements == before {
            return Ok(false)
        }
        self.events.push(CaEvent::RoaAlertIgnoredAnnouncedRoutesUpdated {
            added: added.len(), deleted: deleted.len()
        });
        Ok(true)
    }
}

/// # Trust anchor exchange
///
impl CertificateAuthority {
    /// Stores a request for the offline trust anchor.
    ///
    /// This replaces any request that is still pending.
    pub fn set_trust_anchor_request(
        &mut self, request: TrustAnchorRequest
    ) -> CaResult<()> {
        let id = self.id();
        if !self.is_all_resources() {
            return Err(Error::invalid_ca_state(
                id, "only the all resources CA talks to the trust anchor"
            ))
        }
        let CaKind::Managed(managed) = &mut self.kind else {
            return Err(Error::CaNotManaged(id))
        };
        info!(
            "CA {} created trust anchor request {} with {} entries",
            id, request.request_id, request.requests.len()
        );
        self.events.push(CaEvent::TrustAnchorRequestCreated {
            requests: request.requests.len()
        });
        managed.trust_anchor_request = Some(request);
        Ok(())
    }

    /// Applies the trust anchor's response to the pending request.
    ///
    /// Returns the keys that were revoked and should be deleted.
    pub fn process_trust_anchor_response(
        &mut self, response: &TrustAnchorResponse, now: DateTime<Utc>
    ) -> CaResult<Vec<KeyIdentifier>> {
        let id = self.id();
        let managed = self.managed()?;
        let Some(pending) = managed.trust_anchor_request.as_ref() else {
            return Err(Error::invalid_ca_state(
                id, "there is no pending trust anchor request"
            ))
        };
        if pending.request_id != response.request_id {
            return Err(Error::invalid_ca_state(
                id,
                format!(
                    "response {} does not match pending request {}",
                    response.request_id, pending.request_id
                )
            ))
        }

        let mut issued: Vec<_> = response.issued.iter().collect();
        issued.sort_by_key(|(key, _)| **key);
        for (_, cert) in issued {
            self.process_certificate_issuance_response(
                &CertificateIssuanceResponse::new(
                    cert.certificate.clone(), cert.publication_uri.clone()
                ),
                now
            )?;
        }

        let mut deleted = Vec::new();
        for key in &response.revoked {
            if self.process_certificate_revocation_response(
                &CertificateRevocationResponse::new(*key), now
            )? {
                deleted.push(*key);
            }
        }

        if let CaKind::Managed(managed) = &mut self.kind {
            managed.trust_anchor_request = None;
        }
        self.events.push(CaEvent::TrustAnchorResponseProcessed);
        Ok(deleted)
    }
}


//------------ ManagedCa -----------------------------------------------------

/// The state of a CA that holds its keys here.
#[derive(Clone, Debug, Default)]
pub struct ManagedCa {
    keys: Vec<KeyPairEntity>,
    outgoing: OutgoingCertificates,
    published: PublishedObjects,

    /// Set whenever something changed that may affect manifests or CRLs.
    manifest_and_crl_check_needed: bool,

    last_serial: u64,
    roa_configuration: BTreeSet<RoaConfigurationPrefix>,
    ignored_announcements: BTreeSet<AnnouncedRoute>,
    trust_anchor_request: Option<TrustAnchorRequest>,
}

/// The details of the key a parent signs with.
struct SigningKey {
    key: KeyIdentifier,
    resources: ResourceSet,
    publication_uri: uri::Rsync,
    ca_repository: uri::Rsync,
}

impl ManagedCa {
    pub fn keys(&self) -> &[KeyPairEntity] {
        &self.keys
    }

    pub fn key(&self, key: KeyIdentifier) -> Option<&KeyPairEntity> {
        self.keys.iter().find(|entity| entity.key_id() == key)
    }

    fn key_mut(&mut self, key: KeyIdentifier) -> Option<&mut KeyPairEntity> {
        self.keys.iter_mut().find(|entity| entity.key_id() == key)
    }

    pub fn current_key(&self) -> Option<&KeyPairEntity> {
        self.keys.iter().find(|key| key.is_current())
    }

    pub fn pending_key(&self) -> Option<&KeyPairEntity> {
        self.keys.iter().find(|key| key.is_pending())
    }

    pub fn old_keys(&self) -> impl Iterator<Item = &KeyPairEntity> {
        self.keys.iter().filter(|key| key.is_old())
    }

    pub fn publishable_keys(&self) -> impl Iterator<Item = &KeyPairEntity> {
        self.keys.iter().filter(|key| key.is_publishable())
    }

    /// Returns whether a key roll is in progress.
    pub fn is_key_roll_in_progress(&self) -> bool {
        self.keys.iter().any(|key| key.is_pending() || key.is_old())
    }

    pub fn certified_resources(&self) -> Option<&ResourceSet> {
        self.current_key().and_then(KeyPairEntity::certified_resources)
    }

    pub fn outgoing(&self) -> &OutgoingCertificates {
        &self.outgoing
    }

    pub fn published(&self) -> &PublishedObjects {
        &self.published
    }

    pub fn is_manifest_and_crl_check_needed(&self) -> bool {
        self.manifest_and_crl_check_needed
    }

    pub fn roa_configuration(
        &self
    ) -> impl Iterator<Item = &RoaConfigurationPrefix> {
        self.roa_configuration.iter()
    }

    pub fn ignored_announcements(&self) -> impl Iterator<Item = &AnnouncedRoute> {
        self.ignored_announcements.iter()
    }

    pub fn trust_anchor_request(&self) -> Option<&TrustAnchorRequest> {
        self.trust_anchor_request.as_ref()
    }

    fn next_serial(&mut self) -> u64 {
        self.last_serial += 1;
        self.last_serial
    }

    fn signing_key(&self, ca: CaId) -> CaResult<SigningKey> {
        let Some(current) = self.current_key() else {
            return Err(Error::invalid_ca_state(ca, "there is no current key"))
        };
        let Some(incoming) = current.incoming() else {
            return Err(Error::invalid_ca_state(
                ca, format!("current key {} is not certified", current.key_id())
            ))
        };
        Ok(SigningKey {
            key: current.key_id(),
            resources: incoming.resources().clone(),
            publication_uri: incoming.publication_uri().clone(),
            ca_repository: incoming.certificate().sia.ca_repository.clone(),
        })
    }

    fn withdraw_certificates(&mut self, serials: &[u64], now: DateTime<Utc>) {
        let uris: Vec<_> = self.outgoing.iter().filter(|cert| {
            serials.contains(&cert.serial())
        }).map(|cert| cert.publication_uri().clone()).collect();
        for uri in uris {
            self.published.withdraw(&uri, now);
        }
    }

    fn is_manifest_update_needed(
        &self, key: &KeyPairEntity, now: DateTime<Utc>
    ) -> bool {
        let Some(incoming) = key.incoming() else {
            return false
        };
        let manifest = self.outgoing.current().filter(|cert| {
            cert.signing_key() == key.key_id()
                && cert.kind() == OutgoingKind::ManifestEe
        }).max_by_key(|cert| cert.serial());
        match manifest {
            None => true,
            Some(manifest) => {
                let cert = manifest.certificate();
                cert.validity.not_after()
                    - Duration::hours(MANIFEST_REFRESH_HOURS) < now
                    || cert.issuer_certificate_uri.as_ref()
                        != Some(incoming.publication_uri())
            }
        }
    }

    /// Returns the resources to be authorized per ASN.
    fn roa_resources(&self) -> CaResult<BTreeMap<u32, ResourceSet>> {
        let mut prefixes: BTreeMap<u32, (Vec<&str>, Vec<&str>)> = BTreeMap::new();
        for prefix in &self.roa_configuration {
            let entry = prefixes.entry(prefix.asn).or_default();
            if prefix.prefix.contains(':') {
                entry.1.push(&prefix.prefix);
            }
            else {
                entry.0.push(&prefix.prefix);
            }
        }
        prefixes.into_iter().map(|(asn, (v4, v6))| -> CaResult<_> {
            let resources = ResourceSet::from_strs(
                "", &v4.join(", "), &v6.join(", ")
            ).map_err(|err| {
                Error::custom(format!("invalid ROA prefixes for AS{asn}: {err}"))
            })?;
            Ok((asn, resources))
        }).collect()
    }

    /// Brings the ROA EE certificates of the current key up to date.
    ///
    /// Returns the serials of the revoked certificates.
    fn update_roa_certificates(
        &mut self,
        key: KeyIdentifier,
        incoming: &IncomingCertificate,
        now: DateTime<Utc>,
    ) -> CaResult<Vec<u64>> {
        let mut wanted: BTreeMap<String, (u32, ResourceSet)> = self
            .roa_resources()?
            .into_iter()
            .map(|(asn, resources)| {
                (format!("AS{asn}"), (asn, resources.intersection(incoming.resources())))
            })
            .filter(|(_, (_, resources))| !resources.is_empty())
            .collect();

        let mut obsolete = Vec::new();
        for cert in self.outgoing.current().filter(|cert| {
            cert.signing_key() == key && cert.kind() == OutgoingKind::RoaEe
        }) {
            let issued = cert.certificate();
            let unchanged = wanted.get(&issued.subject_name).is_some_and(
                |(_, resources)| *resources == issued.resources
            ) && issued.issuer_certificate_uri.as_ref()
                == Some(incoming.publication_uri());
            if unchanged {
                wanted.remove(&issued.subject_name);
            }
            else {
                obsolete.push(cert.serial());
            }
        }
        let revoked = self.outgoing.revoke_serials(&obsolete, now);

        let validity = ValidityPeriod::for_ca_certificate(now);
        for (subject_name, (asn, resources)) in wanted {
            let uri = join_uri(
                &incoming.certificate().sia.ca_repository,
                &format!("AS{asn}.roa")
            )?;
            self.issue_ee_certificate(
                key, incoming, subject_name, resources, validity,
                OutgoingKind::RoaEe, uri, now
            )?;
        }
        Ok(revoked)
    }

    #[allow(clippy::too_many_arguments)]
    fn issue_ee_certificate(
        &mut self,
        key: KeyIdentifier,
        incoming: &IncomingCertificate,
        subject_name: String,
        resources: ResourceSet,
        validity: ValidityPeriod,
        kind: OutgoingKind,
        object_uri: uri::Rsync,
        now: DateTime<Utc>,
    ) -> CaResult<()> {
        let serial = self.next_serial();
        let certificate = ResourceCertificate {
            serial,
            subject_name,
            subject_key: random_key_identifier(serial as u32)?,
            issuer_key: key,
            resources,
            validity,
            sia: incoming.certificate().sia.clone(),
            issuer_certificate_uri: Some(incoming.publication_uri().clone()),
        };
        self.outgoing.add(OutgoingCertificate::new(
            certificate, object_uri.clone(), kind, now
        ));
        self.published.publish(key, object_uri, now);
        Ok(())
    }
}


//------------ NonHostedCa ---------------------------------------------------

/// The state of a CA that keeps its keys elsewhere.
#[derive(Clone, Debug, Default)]
pub struct NonHostedCa {
    keys: Vec<NonHostedKey>,
}

impl NonHostedCa {
    pub fn keys(&self) -> &[NonHostedKey] {
        &self.keys
    }

    pub fn key(&self, key: KeyIdentifier) -> Option<&NonHostedKey> {
        self.keys.iter().find(|entry| entry.key == key)
    }

    fn key_mut(&mut self, key: KeyIdentifier) -> Option<&mut NonHostedKey> {
        self.keys.iter_mut().find(|entry| entry.key == key)
    }
}


//------------ NonHostedKey --------------------------------------------------

/// A public key of a non-hosted CA and its certificate.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct NonHostedKey {
    key: KeyIdentifier,
    sia: SubjectInformationAccess,
    incoming: Option<IncomingCertificate>,
}

impl NonHostedKey {
    pub fn key_id(&self) -> KeyIdentifier {
        self.key
    }

    pub fn sia(&self) -> &SubjectInformationAccess {
        &self.sia
    }

    pub fn incoming(&self) -> Option<&IncomingCertificate> {
        self.incoming.as_ref()
    }
}


//------------ Helpers -------------------------------------------------------

/// Returns whether a child needs a new certificate.
///
/// This is the case if anything in the request differs from the latest
/// certificate or if the certificate would be valid for longer now.
fn is_new_certificate_needed(
    latest: &ResourceCertificate,
    request: &CertificateIssuanceRequest,
    signing_uri: &uri::Rsync,
    validity: &ValidityPeriod,
) -> bool {
    latest.resources != *request.resources()
        || latest.sia != *request.sia()
        || latest.issuer_certificate_uri.as_ref() != Some(signing_uri)
        || validity.not_after() > latest.validity.not_after()
        || validity.not_before() < latest.validity.not_before()
}

pub(super) fn join_uri(base: &uri::Rsync, path: &str) -> CaResult<uri::Rsync> {
    base.join(path.as_bytes()).map_err(|err| {
        Error::custom(format!("cannot join '{path}' to '{base}': {err}"))
    })
}


//============ Tests =========================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::signer::SoftKeyPairFactory;
    use crate::test;

    fn issuance_request(
        ca: &CertificateAuthority, key: KeyIdentifier, resources: &str
    ) -> CertificateIssuanceRequest {
        CertificateIssuanceRequest::new(
            test::resources(resources),
            format!("CN={key}"),
            key,
            test::sia(ca.uuid(), key),
        )
    }

    #[test]
    fn issue_child_certificates_within_limit() {
        let t0 = test::time(0);
        let mut parent = test::certified_parent(1, "10.0.0.0/8", t0);
        let child = CaId::new(2);
        let one = test::key_identifier(21);
        let two = test::key_identifier(22);

        let first = parent.process_certificate_issuance_request(
            child, &issuance_request(&parent, one, "10.0.0.0/16"),
            usize::MAX, t0
        ).unwrap();
        let again = parent.process_certificate_issuance_request(
            child, &issuance_request(&parent, one, "10.0.0.0/16"),
            usize::MAX, t0
        ).unwrap();
        assert_eq!(first, again);

        // Keys of a rolling child coexist without a limit.
        parent.process_certificate_issuance_request(
            child, &issuance_request(&parent, two, "10.0.0.0/16"),
            usize::MAX, t0
        ).unwrap();
        let managed = parent.managed().unwrap();
        assert!(managed.outgoing().has_current_for_subject(one));
        assert!(managed.outgoing().has_current_for_subject(two));

        // A limit of one retires the earlier certificate of the same key
        // and leaves the other key alone.
        let reissued = parent.process_certificate_issuance_request(
            child, &issuance_request(&parent, one, "10.0.0.0/12"),
            1, t0
        ).unwrap();
        let managed = parent.managed().unwrap();
        let current: Vec<_> = managed.outgoing().current().filter(|cert| {
            cert.subject_key() == one
        }).collect();
        assert_eq!(current.len(), 1);
        assert_eq!(current[0].certificate(), reissued.certificate());
        assert!(managed.outgoing().has_current_for_subject(two));

        assert!(matches!(
            parent.process_certificate_issuance_request(
                child, &issuance_request(&parent, two, "10.0.0.0/20"), 0, t0
            ),
            Err(Error::IssuanceLimitExceeded(..))
        ));
    }

    #[test]
    fn refuse_overclaiming_request() {
        let t0 = test::time(0);
        let mut parent = test::certified_parent(1, "10.0.0.0/8", t0);
        let res = parent.process_certificate_issuance_request(
            CaId::new(2),
            &issuance_request(&parent, test::key_identifier(5), "11.0.0.0/8"),
            usize::MAX, t0
        );
        assert!(matches!(res, Err(Error::ResourcesNotContained { .. })));
    }

    #[test]
    fn first_certificate_activates_key() {
        let t0 = test::time(0);
        let mut parent = test::certified_parent(1, "10.0.0.0/8", t0);
        let mut child = CertificateAuthority::new_managed(
            CaId::new(2), CaName::from("CN=child"), CaType::Hosted,
            Some(parent.id()), t0
        );
        let key = child.create_key_pair(
            &SoftKeyPairFactory::default(), t0
        ).unwrap();

        let response = parent.process_certificate_issuance_request(
            child.id(), &issuance_request(&child, key, "10.0.0.0/16"),
            usize::MAX, t0
        ).unwrap();
        assert!(child.process_certificate_issuance_response(&response, t0).unwrap());
        assert!(!child.process_certificate_issuance_response(&response, t0).unwrap());

        let managed = child.managed().unwrap();
        assert_eq!(managed.current_key().map(|k| k.key_id()), Some(key));
        assert!(managed.is_manifest_and_crl_check_needed());

        let revoked = parent.process_certificate_revocation_request(
            &CertificateRevocationRequest::new(key), t0
        ).unwrap();
        assert!(child.process_certificate_revocation_response(&revoked, t0).unwrap());
        assert!(child.managed().unwrap().keys().is_empty());
        assert!(!parent.has_current_certificate_for(key));
    }

    #[test]
    fn manifest_and_roas() {
        let t0 = test::time(0);
        let mut ca = test::certified_parent(1, "10.0.0.0/8", t0);
        assert!(ca.update_roa_configuration(
            &[test::roa("10.0.0.0/16 => 64496"), test::roa("11.0.0.0/16 => 64497")],
            &[]
        ).unwrap());
        assert!(ca.issue_updated_manifest_and_crl(t0).unwrap());
        assert!(!ca.issue_updated_manifest_and_crl(t0).unwrap());

        let managed = ca.managed().unwrap();
        let roas: Vec<_> = managed.outgoing().current().filter(|cert| {
            cert.kind() == OutgoingKind::RoaEe
        }).collect();
        assert_eq!(roas.len(), 1);
        assert_eq!(roas[0].resources(), &test::resources("10.0.0.0/16"));
        assert!(!managed.is_manifest_and_crl_check_needed());

        // The manifest gets replaced when it is about to expire.
        let later = t0 + Duration::hours(9);
        assert!(ca.is_manifest_and_crl_update_needed(later));
        assert!(ca.issue_updated_manifest_and_crl(later).unwrap());
        let managed = ca.managed().unwrap();
        assert_eq!(
            managed.outgoing().current().filter(|cert| {
                cert.kind() == OutgoingKind::ManifestEe
            }).count(),
            1
        );
    }

    #[test]
    fn roa_configuration_replaces_max_length() {
        let t0 = test::time(0);
        let mut ca = test::certified_parent(1, "10.0.0.0/8", t0);
        ca.update_roa_configuration(&[test::roa("10.0.0.0/16 => 64496")], &[])
            .unwrap();
        assert!(!ca.update_roa_configuration(
            &[test::roa("10.0.0.0/16 => 64496")], &[]
        ).unwrap());
        assert!(ca.update_roa_configuration(
            &[test::roa("10.0.0.0/16-24 => 64496")], &[]
        ).unwrap());
        assert_eq!(ca.managed().unwrap().roa_configuration().count(), 1);
    }
}
