#![allow(dead_code)] // Different tests use different parts.

use std::sync::Arc;
use chrono::{DateTime, Utc};
use rpki::repository::resources::ResourceSet;
use rpki_ca_engine::api::ca::{CaId, CaName};
use rpki_ca_engine::api::ta::{IssuedCertificate, TaRequest, TrustAnchorResponse};
use rpki_ca_engine::commons::actor::{Actor, CommandContext};
use rpki_ca_engine::config::Config;
use rpki_ca_engine::constants::ACTOR_DEF_SYSTEM;
use rpki_ca_engine::server::audit::MemoryCommandAudit;
use rpki_ca_engine::server::background::BackgroundJob;
use rpki_ca_engine::server::command::Command;
use rpki_ca_engine::server::manager::CaEngine;
use rpki_ca_engine::server::resources::MemoryResourceCache;
use rpki_ca_engine::server::signer::{MemoryKeyPairArchive, SoftKeyPairFactory};
use rpki_ca_engine::test;

pub const PRODUCTION_RESOURCES: &str = "10.0.0.0/8, 2001:db8::/32";


//------------ TestEngine ----------------------------------------------------

/// An engine with in-memory collaborators the tests can reach into.
pub struct TestEngine {
    pub engine: CaEngine,
    pub resources: Arc<MemoryResourceCache>,
    pub archive: Arc<MemoryKeyPairArchive>,
}

impl TestEngine {
    pub fn new() -> Self {
        Self::with_config(test::config())
    }

    pub fn with_config(config: Config) -> Self {
        let resources = Arc::new(MemoryResourceCache::loaded());
        let archive = Arc::new(MemoryKeyPairArchive::default());
        let engine = CaEngine::build(
            Arc::new(config),
            resources.clone(),
            Arc::new(SoftKeyPairFactory::default()),
            Arc::new(MemoryCommandAudit::default()),
            archive.clone(),
        ).unwrap();
        TestEngine { engine, resources, archive }
    }

    /// Sets the certifiable resources of a CA.
    pub fn entitle(&self, name: &str, resources: &str) {
        self.resources.update(CaName::from(name), test::resources(resources))
    }

    pub fn user(&self, hours: i64) -> CommandContext {
        CommandContext::new(Actor::user_named("operator"), test::time(hours))
    }

    pub fn system(&self, hours: i64) -> CommandContext {
        CommandContext::new(ACTOR_DEF_SYSTEM, test::time(hours))
    }

    pub fn certified_resources(&self, ca: CaId) -> Option<ResourceSet> {
        self.engine.ca(ca).unwrap().certified_resources().cloned()
    }

    pub fn version(&self, ca: CaId) -> u64 {
        self.engine.ca(ca).unwrap().version()
    }

    /// Creates the all resources CA and answers its trust anchor request.
    pub fn create_all_resources_ca(&self) -> CaId {
        let id = self.engine.next_ca_id();
        let name = CaName::from(self.engine.config().all_resources_ca_name.as_str());
        self.engine.execute(
            &Command::create_all_resources_ca(id, name), &self.user(0)
        ).unwrap();
        self.answer_trust_anchor(id, 0);
        id
    }

    /// Signs everything the all resources CA asked the trust anchor for.
    pub fn answer_trust_anchor(&self, ca: CaId, hours: i64) {
        let now = test::time(hours);
        let request = self.engine.trust_anchor_request(ca).unwrap().unwrap();
        let mut response = TrustAnchorResponse {
            request_id: request.request_id,
            .. Default::default()
        };
        for req in request.requests {
            match req {
                TaRequest::Signing(signing) => {
                    let mut certificate = test::resource_certificate(
                        1, signing.subject_key, test::key_identifier(0),
                        signing.resources.clone(), now
                    );
                    certificate.sia.ca_repository = signing.sia_ca_repository;
                    certificate.sia.rpki_manifest = signing.sia_manifest;
                    response.issued.insert(
                        signing.subject_key,
                        IssuedCertificate {
                            certificate,
                            publication_uri: test::rsync(&format!(
                                "rsync://localhost/ta/{}.cer",
                                signing.subject_key
                            )),
                        }
                    );
                }
                TaRequest::Revocation { key, .. } => {
                    response.revoked.push(key)
                }
            }
        }
        let version = self.engine.store().get_versioned_id(ca).unwrap();
        self.engine.execute(
            &Command::process_ta_response(version, response), &self.user(hours)
        ).unwrap();
    }

    /// Creates the production CA and has it certified.
    pub async fn create_production_ca(&self, all_resources: CaId) -> CaId {
        let name = self.engine.config().production_ca_name.clone();
        self.entitle(&name, PRODUCTION_RESOURCES);
        let id = self.engine.next_ca_id();
        self.engine.execute(
            &Command::create_root_ca(id, CaName::from(name.as_str()), all_resources),
            &self.user(0)
        ).unwrap();
        self.engine.run_job(
            BackgroundJob::AllCaCertificateUpdate, test::time(0)
        ).await.unwrap();
        id
    }

    /// Creates a hosted CA below the parent.
    pub fn create_member(&self, name: &str, resources: &str, parent: CaId) -> CaId {
        self.entitle(name, resources);
        let id = self.engine.next_ca_id();
        self.engine.execute(
            &Command::activate_hosted_ca(id, CaName::from(name), parent),
            &self.user(0)
        ).unwrap();
        id
    }

    /// Sets up the all resources CA and the production CA.
    pub async fn hierarchy(&self) -> (CaId, CaId) {
        let all_resources = self.create_all_resources_ca();
        let production = self.create_production_ca(all_resources).await;
        (all_resources, production)
    }

    pub fn update_all_incoming(&self, ca: CaId, hours: i64) -> bool {
        let version = self.engine.store().get_versioned_id(ca).unwrap();
        self.engine.execute(
            &Command::update_all_incoming(version, usize::MAX),
            &self.system(hours)
        ).unwrap().has_effect()
    }
}
