//! Keeping incoming and outgoing certificates up to date.

use std::sync::Arc;
use log::debug;
use crate::commons::CaResult;
use crate::commons::actor::CommandContext;
use crate::commons::error::Error;
use crate::server::command::{
    Command, CommandDetails, CommandStatus, CommandType,
};
use crate::server::store::Transaction;
use super::CaServices;
use super::dispatcher::{CommandHandler, HandlerScope};


//------------ UpdateAllIncomingCertificatesHandler --------------------------

/// Asks the parent for certificates matching the CA's current resources.
pub struct UpdateAllIncomingCertificatesHandler {
    services: Arc<CaServices>,
}

impl UpdateAllIncomingCertificatesHandler {
    pub fn new(services: Arc<CaServices>) -> Self {
        UpdateAllIncomingCertificatesHandler { services }
    }
}

impl CommandHandler for UpdateAllIncomingCertificatesHandler {
    fn name(&self) -> &'static str {
        "UpdateAllIncomingCertificatesHandler"
    }

    fn scope(&self) -> HandlerScope {
        HandlerScope::Command(CommandType::UpdateAllIncomingResourceCertificates)
    }

    fn handle(
        &self,
        command: &Command,
        context: &CommandContext,
        tx: &mut Transaction,
        _status: &mut CommandStatus,
    ) -> CaResult<()> {
        let CommandDetails::UpdateAllIncomingResourceCertificates {
            issuance_limit
        } = command.details() else {
            return Err(Error::custom("unexpected command"))
        };
        let id = command.ca_id();
        let Some(parent) = tx.load(id)?.parent() else {
            debug!("CA {id} has no parent to update certificates with");
            return Err(Error::NoEffect)
        };
        if self.services.saga.execute(
            tx, parent, id, *issuance_limit, context.time()
        )? {
            Ok(())
        }
        else {
            Err(Error::NoEffect)
        }
    }
}


//------------ IssueUpdatedManifestAndCrlHandler -----------------------------

/// Reissues manifests and CRLs when they are due or content changed.
#[derive(Debug, Default)]
pub struct IssueUpdatedManifestAndCrlHandler;

impl CommandHandler for IssueUpdatedManifestAndCrlHandler {
    fn name(&self) -> &'static str {
        "IssueUpdatedManifestAndCrlHandler"
    }

    fn scope(&self) -> HandlerScope {
        HandlerScope::Command(CommandType::IssueUpdatedManifestAndCrl)
    }

    fn handle(
        &self,
        command: &Command,
        context: &CommandContext,
        tx: &mut Transaction,
        _status: &mut CommandStatus,
    ) -> CaResult<()> {
        let mut ca = tx.load(command.ca_id())?;
        if !ca.issue_updated_manifest_and_crl(context.time())? {
            return Err(Error::NoEffect)
        }
        tx.store(ca);
        Ok(())
    }
}


//------------ ExpireOutgoingCertificatesHandler -----------------------------

/// Marks certificates past their validity as expired.
#[derive(Debug, Default)]
pub struct ExpireOutgoingCertificatesHandler;

impl CommandHandler for ExpireOutgoingCertificatesHandler {
    fn name(&self) -> &'static str {
        "ExpireOutgoingCertificatesHandler"
    }

    fn scope(&self) -> HandlerScope {
        HandlerScope::Command(CommandType::ExpireOutgoingResourceCertificates)
    }

    fn handle(
        &self,
        command: &Command,
        context: &CommandContext,
        tx: &mut Transaction,
        _status: &mut CommandStatus,
    ) -> CaResult<()> {
        let mut ca = tx.load(command.ca_id())?;
        if ca.expire_outgoing_certificates(context.time())? == 0 {
            return Err(Error::NoEffect)
        }
        tx.store(ca);
        Ok(())
    }
}
