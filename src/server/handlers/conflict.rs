//! Detecting commands based on an outdated view of a CA.

use std::sync::Arc;
use log::info;
use crate::commons::CaResult;
use crate::commons::actor::CommandContext;
use crate::commons::error::Error;
use crate::constants::HANDLER_ORDER_CONFLICT;
use crate::server::audit::CommandAuditData;
use crate::server::command::{
    Command, CommandGroup, CommandStatus, CommandType,
};
use crate::server::metrics::EngineMetrics;
use crate::server::store::Transaction;
use super::dispatcher::{CommandHandler, HandlerScope};


//------------ ConcurrentModificationHandler ---------------------------------

/// Rejects user commands if someone else changed the CA in the meantime.
///
/// A command carries the version of the CA the user saw. All commands
/// audited since then are checked. Commands issued by the system never
/// conflict.
pub struct ConcurrentModificationHandler {
    metrics: Arc<EngineMetrics>,
}

impl ConcurrentModificationHandler {
    pub fn new(metrics: Arc<EngineMetrics>) -> Self {
        ConcurrentModificationHandler { metrics }
    }
}

impl CommandHandler for ConcurrentModificationHandler {
    fn name(&self) -> &'static str {
        "ConcurrentModificationHandler"
    }

    fn scope(&self) -> HandlerScope {
        HandlerScope::Modification
    }

    fn order(&self) -> u32 {
        HANDLER_ORDER_CONFLICT
    }

    fn handle(
        &self,
        command: &Command,
        _context: &CommandContext,
        tx: &mut Transaction,
        _status: &mut CommandStatus,
    ) -> CaResult<()> {
        if command.is_system() {
            self.metrics.concurrent_modification("system_command");
            return Ok(())
        }

        let conflicting: Vec<_> = tx.ca_store().audit().find_commands_since(
            command.ca()
        ).into_iter().filter(|audited| {
            is_conflicting(command.command_type(), audited)
        }).collect();

        if conflicting.is_empty() {
            self.metrics.concurrent_modification("passed");
            return Ok(())
        }

        self.metrics.concurrent_modification("exception");
        let version = tx.ca_store().get_versioned_id(command.ca_id())?;
        info!(
            "Rejected {} based on version {}, current version is {}",
            command.command_type(), command.ca().version(), version.version()
        );
        Err(Error::ConcurrentModification { version, conflicting })
    }
}

fn is_conflicting(attempted: CommandType, audited: &CommandAuditData) -> bool {
    if audited.group() == CommandGroup::System {
        return false
    }
    !(attempted == CommandType::UpdateRoaConfiguration
        && audited.command_type()
            == CommandType::UpdateRoaAlertIgnoredAnnouncedRoutes)
}


//============ Tests =========================================================
