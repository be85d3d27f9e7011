//! The key rollover state machine.
//!
//! A roll starts with a new pending key certified by the parent. Once the
//! pending key was staged long enough it becomes current and the current
//! key becomes old. Old keys are revoked once they signed nothing but
//! their own manifest any more.
//!
//! The all resources CA is certified by the offline trust anchor. It does
//! not talk to a parent but stores requests for the trust anchor instead.

use std::sync::Arc;
use log::info;
use crate::api::provisioning::CertificateRevocationRequest;
use crate::commons::CaResult;
use crate::commons::actor::CommandContext;
use crate::commons::error::Error;
use crate::constants::ISSUANCE_LIMIT_UNBOUNDED;
use crate::server::command::{
    Command, CommandDetails, CommandStatus, CommandType,
};
use crate::server::store::Transaction;
use super::CaServices;
use super::dispatcher::{CommandHandler, HandlerScope};


//------------ InitiateRollHandler -------------------------------------------

pub struct InitiateRollHandler {
    services: Arc<CaServices>,
}

impl InitiateRollHandler {
    pub fn new(services: Arc<CaServices>) -> Self {
        InitiateRollHandler { services }
    }
}

impl CommandHandler for InitiateRollHandler {
    fn name(&self) -> &'static str {
        "InitiateRollHandler"
    }

    fn scope(&self) -> HandlerScope {
        HandlerScope::Command(CommandType::KeyManagementInitiateRoll)
    }

    fn handle(
        &self,
        command: &Command,
        context: &CommandContext,
        tx: &mut Transaction,
        _status: &mut CommandStatus,
    ) -> CaResult<()> {
        let CommandDetails::KeyManagementInitiateRoll { max_age_days }
            = command.details()
        else {
            return Err(Error::custom("unexpected command"))
        };
        let now = context.time();
        let id = command.ca_id();
        let mut ca = tx.load(id)?;
        let requests = &self.services.requests;

        let Some(request) = requests.initiate_key_roll(
            &mut ca, *max_age_days, self.services.keys.as_ref(), now
        )? else {
            return Err(Error::NoEffect)
        };
        info!(
            "CA {} started a key roll with new key {}",
            id, request.subject_key()
        );

        if ca.is_all_resources() {
            let signing = requests.signing_request(
                &ca, request.subject_key(), request.resources().clone()
            )?;
            ca.set_trust_anchor_request(
                requests.trust_anchor_request(vec![signing], now)
            )?;
            tx.store(ca);
            return Ok(())
        }

        let Some(parent) = ca.parent() else {
            return Err(Error::invalid_ca_state(id, "CA has no parent"))
        };
        tx.lock_and_refresh(parent)?;
        let mut parent_ca = tx.load(parent)?;
        let response = parent_ca.process_certificate_issuance_request(
            id, &request, ISSUANCE_LIMIT_UNBOUNDED, now
        )?;
        ca.process_certificate_issuance_response(&response, now)?;
        ca.issue_updated_manifest_and_crl(now)?;
        tx.store(parent_ca);
        tx.store(ca);
        Ok(())
    }
}


//------------ ActivatePendingKeysHandler ------------------------------------

#[derive(Debug, Default)]
pub struct ActivatePendingKeysHandler;

impl CommandHandler for ActivatePendingKeysHandler {
    fn name(&self) -> &'static str {
        "ActivatePendingKeysHandler"
    }

    fn scope(&self) -> HandlerScope {
        HandlerScope::Command(CommandType::KeyManagementActivatePendingKeys)
    }

    fn handle(
        &self,
        command: &Command,
        context: &CommandContext,
        tx: &mut Transaction,
        _status: &mut CommandStatus,
    ) -> CaResult<()> {
        let CommandDetails::KeyManagementActivatePendingKeys { min_staging }
            = command.details()
        else {
            return Err(Error::custom("unexpected command"))
        };
        let mut ca = tx.load(command.ca_id())?;
        if !ca.activate_pending_keys(*min_staging, context.time())? {
            return Err(Error::NoEffect)
        }
        tx.store(ca);
        Ok(())
    }
}


//------------ RevokeOldKeysHandler ------------------------------------------

pub struct RevokeOldKeysHandler {
    services: Arc<CaServices>,
}

impl RevokeOldKeysHandler {
    pub fn new(services: Arc<CaServices>) -> Self {
        RevokeOldKeysHandler { services }
    }
}

impl CommandHandler for RevokeOldKeysHandler {
    fn name(&self) -> &'static str {
        "RevokeOldKeysHandler"
    }

    fn scope(&self) -> HandlerScope {
        HandlerScope::Command(CommandType::KeyManagementRevokeOldKeys)
    }

    fn handle(
        &self,
        command: &Command,
        context: &CommandContext,
        tx: &mut Transaction,
        _status: &mut CommandStatus,
    ) -> CaResult<()> {
        let now = context.time();
        let id = command.ca_id();
        let mut ca = tx.load(id)?;
        let keys = ca.revocable_old_keys();
        if keys.is_empty() {
            return Err(Error::NoEffect)
        }

        if ca.is_all_resources() {
            let requests = &self.services.requests;
            ca.set_trust_anchor_request(requests.trust_anchor_request(
                keys.iter().map(|key| {
                    requests.ta_revocation_request(*key)
                }).collect(),
                now
            ))?;
            tx.store(ca);
            return Ok(())
        }

        let Some(parent) = ca.parent() else {
            return Err(Error::invalid_ca_state(id, "CA has no parent"))
        };
        tx.lock_and_refresh(parent)?;
        let mut parent_ca = tx.load(parent)?;
        for key in keys {
            let response = parent_ca.process_certificate_revocation_request(
                &CertificateRevocationRequest::new(key), now
            )?;
            if ca.process_certificate_revocation_response(&response, now)? {
                tx.schedule_key_deletion(id, key, now);
            }
        }
        tx.store(parent_ca);
        tx.store(ca);
        Ok(())
    }
}
