//! Changing the ROA configuration of a CA.

use crate::commons::CaResult;
use crate::commons::actor::CommandContext;
use crate::commons::error::Error;
use crate::server::command::{
    Command, CommandDetails, CommandStatus, CommandType,
};
use crate::server::store::Transaction;
use super::dispatcher::{CommandHandler, HandlerScope};


//------------ UpdateRoaConfigurationHandler ---------------------------------

#[derive(Debug, Default)]
pub struct UpdateRoaConfigurationHandler;

impl CommandHandler for UpdateRoaConfigurationHandler {
    fn name(&self) -> &'static str {
        "UpdateRoaConfigurationHandler"
    }

    fn scope(&self) -> HandlerScope {
        HandlerScope::Command(CommandType::UpdateRoaConfiguration)
    }

    fn handle(
        &self,
        command: &Command,
        _context: &CommandContext,
        tx: &mut Transaction,
        _status: &mut CommandStatus,
    ) -> CaResult<()> {
        let CommandDetails::UpdateRoaConfiguration { added, deleted }
            = command.details()
        else {
            return Err(Error::custom("unexpected command"))
        };
        let mut ca = tx.load(command.ca_id())?;
        if !ca.update_roa_configuration(added, deleted)? {
            return Err(Error::NoEffect)
        }
        tx.store(ca);
        Ok(())
    }
}


//------------ UpdateIgnoredAnnouncementsHandler -----------------------------

/// Changes the announcements ROA alerts should not report.
#[derive(Debug, Default)]
pub struct UpdateIgnoredAnnouncementsHandler;

impl CommandHandler for UpdateIgnoredAnnouncementsHandler {
    fn name(&self) -> &'static str {
        "UpdateIgnoredAnnouncementsHandler"
    }

    fn scope(&self) -> HandlerScope {
        HandlerScope::Command(
            CommandType::UpdateRoaAlertIgnoredAnnouncedRoutes
        )
    }

    fn handle(
        &self,
        command: &Command,
        _context: &CommandContext,
        tx: &mut Transaction,
        _status: &mut CommandStatus,
    ) -> CaResult<()> {
        let CommandDetails::UpdateRoaAlertIgnoredAnnouncedRoutes {
            added, deleted
        } = command.details() else {
            return Err(Error::custom("unexpected command"))
        };
        let mut ca = tx.load(command.ca_id())?;
        if !ca.update_ignored_announcements(added, deleted)? {
            return Err(Error::NoEffect)
        }
        tx.store(ca);
        Ok(())
    }
}
