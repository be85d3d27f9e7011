//! Processing responses from the offline trust anchor.

use crate::commons::CaResult;
use crate::commons::actor::CommandContext;
use crate::commons::error::Error;
use crate::server::command::{
    Command, CommandDetails, CommandStatus, CommandType,
};
use crate::server::store::Transaction;
use super::dispatcher::{CommandHandler, HandlerScope};


//------------ ProcessTrustAnchorResponseHandler -----------------------------

/// Applies what the trust anchor signed to the all resources CA.
#[derive(Debug, Default)]
pub struct ProcessTrustAnchorResponseHandler;

impl CommandHandler for ProcessTrustAnchorResponseHandler {
    fn name(&self) -> &'static str {
        "ProcessTrustAnchorResponseHandler"
    }

    fn scope(&self) -> HandlerScope {
        HandlerScope::Command(CommandType::ProcessTrustAnchorResponse)
    }

    fn handle(
        &self,
        command: &Command,
        context: &CommandContext,
        tx: &mut Transaction,
        _status: &mut CommandStatus,
    ) -> CaResult<()> {
        let CommandDetails::ProcessTrustAnchorResponse { response }
            = command.details()
        else {
            return Err(Error::custom("unexpected command"))
        };
        let now = context.time();
        let id = command.ca_id();
        let mut ca = tx.load(id)?;
        for key in ca.process_trust_anchor_response(response, now)? {
            tx.schedule_key_deletion(id, key, now);
        }
        tx.store(ca);
        Ok(())
    }
}
