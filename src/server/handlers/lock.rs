//! Locking the CAs a command works on.

use log::trace;
use crate::api::ca::CaId;
use crate::commons::CaResult;
use crate::commons::actor::CommandContext;
use crate::commons::error::Error;
use crate::constants::HANDLER_ORDER_LOCK;
use crate::server::command::{Command, CommandCategory, CommandStatus};
use crate::server::store::Transaction;
use super::dispatcher::{CommandHandler, HandlerScope};


//------------ LockHandler ---------------------------------------------------

/// Acquires the locks for a command before anything else happens.
///
/// Activation commands lock the parent of the new CA. Commands that
/// change a child together with its parent lock both, child first.
/// Commands that only may change the parent lock the child exclusively
/// and share the parent's lock. Everything else locks the target CA.
#[derive(Debug, Default)]
pub struct LockHandler;

impl CommandHandler for LockHandler {
    fn name(&self) -> &'static str {
        "LockHandler"
    }

    fn scope(&self) -> HandlerScope {
        HandlerScope::AnyCommand
    }

    fn order(&self) -> u32 {
        HANDLER_ORDER_LOCK
    }

    fn handle(
        &self,
        command: &Command,
        _context: &CommandContext,
        tx: &mut Transaction,
        _status: &mut CommandStatus,
    ) -> CaResult<()> {
        let target = command.ca_id();
        match command.command_type().category() {
            CommandCategory::Activation => {
                match command.details().activation_parent() {
                    Some(parent) => tx.lock(parent)?,
                    None => tx.lock(target)?,
                }
            }
            CommandCategory::ChildParent => {
                let parent = parent_of(tx, command)?;
                tx.lock(target)?;
                if let Some(parent) = parent {
                    tx.lock(parent)?;
                }
            }
            CommandCategory::ChildSharedParent => {
                let parent = parent_of(tx, command)?;
                tx.lock(target)?;
                if let Some(parent) = parent {
                    tx.lock_for_sharing(parent)?;
                }
            }
            CommandCategory::Modification => {
                tx.lock(target)?;
            }
        }
        trace!("Acquired locks for {command}");
        Ok(())
    }
}

fn parent_of(tx: &Transaction, command: &Command) -> CaResult<Option<CaId>> {
    tx.ca_store().get(command.ca_id()).map(|ca| ca.parent()).ok_or(
        Error::CaNotFound(command.ca_id())
    )
}


//============ Tests =========================================================
