//! Deleting certificate authorities.

use std::sync::Arc;
use log::info;
use crate::api::provisioning::CertificateProvisioningMessage;
use crate::commons::CaResult;
use crate::commons::actor::CommandContext;
use crate::commons::error::Error;
use crate::server::ca::KeyPairEntity;
use crate::server::command::{Command, CommandStatus, CommandType};
use crate::server::store::Transaction;
use super::CaServices;
use super::dispatcher::{CommandHandler, HandlerScope};


//------------ DeleteCertificateAuthorityHandler -----------------------------

/// Deletes a CA after having its parent revoke all its keys.
pub struct DeleteCertificateAuthorityHandler {
    services: Arc<CaServices>,
}

impl DeleteCertificateAuthorityHandler {
    pub fn new(services: Arc<CaServices>) -> Self {
        DeleteCertificateAuthorityHandler { services }
    }
}

impl CommandHandler for DeleteCertificateAuthorityHandler {
    fn name(&self) -> &'static str {
        "DeleteCertificateAuthorityHandler"
    }

    fn scope(&self) -> HandlerScope {
        HandlerScope::Command(CommandType::DeleteCertificateAuthority)
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
        if !tx.ca_store().children_of(id).is_empty() {
            return Err(Error::invalid_ca_state(
                id, "cannot delete a CA that still has child CAs"
            ))
        }

        match ca.parent() {
            Some(parent) => {
                tx.lock_and_refresh(parent)?;
                let mut parent_ca = tx.load(parent)?;
                let requests = self.services.requests
                    .revocation_requests_for_all_keys(&ca);
                for message in requests {
                    let CertificateProvisioningMessage::Revocation(request)
                        = message
                    else {
                        continue
                    };
                    let response = parent_ca
                        .process_certificate_revocation_request(&request, now)?;
                    if ca.process_certificate_revocation_response(
                        &response, now
                    )? {
                        tx.schedule_key_deletion(id, request.subject_key(), now);
                    }
                }
                tx.store(parent_ca);
            }
            None => {
                if let Some(managed) = ca.as_managed() {
                    for key in managed.keys().iter().map(KeyPairEntity::key_id) {
                        tx.schedule_key_deletion(id, key, now);
                    }
                }
            }
        }

        info!("Deleting CA {} ({})", id, ca.name());
        tx.store(ca);
        tx.remove(id);
        Ok(())
    }
}
