//! Recording executed commands.

use log::info;
use crate::commons::CaResult;
use crate::commons::actor::CommandContext;
use crate::constants::HANDLER_ORDER_AUDIT;
use crate::server::audit::CommandAuditData;
use crate::server::command::{Command, CommandStatus};
use crate::server::store::Transaction;
use super::dispatcher::{CommandHandler, HandlerScope};


//------------ AuditHandler --------------------------------------------------

/// Stages the audit entry for a command.
///
/// The entry lists the events of all CAs the command changed. It is
/// written with the resulting version of the target CA when the
/// transaction commits.
#[derive(Debug, Default)]
pub struct AuditHandler;

impl CommandHandler for AuditHandler {
    fn name(&self) -> &'static str {
        "AuditHandler"
    }

    fn scope(&self) -> HandlerScope {
        HandlerScope::AnyCommand
    }

    fn order(&self) -> u32 {
        HANDLER_ORDER_AUDIT
    }

    fn handle(
        &self,
        command: &Command,
        context: &CommandContext,
        tx: &mut Transaction,
        _status: &mut CommandStatus,
    ) -> CaResult<()> {
        let target = command.ca_id();
        let events = tx.events().iter().map(|(ca, event)| {
            if *ca == target {
                event.to_string()
            }
            else {
                format!("{event} (CA {ca})")
            }
        }).collect();
        let entry = CommandAuditData::new(
            command.ca(),
            context.actor().name(),
            command.command_type(),
            command.group(),
            command.summary(),
            events,
            context.time(),
        );
        info!("{entry}");
        tx.record_audit(entry);
        Ok(())
    }
}


//============ Tests =========================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::ca::{CaType, VersionedId};
    use crate::constants::ACTOR_DEF_TEST;
    use crate::test;

    #[test]
    fn record_with_resulting_version() {
        let store = test::store();
        let ca = test::create_ca(&store, "CN=member", CaType::Hosted, None);
        let command = Command::update_roa_configuration(
            VersionedId::new(ca, 0), vec![test::roa("10.0.0.0/16 => 64496")],
            vec![]
        );

        let mut tx = store.begin();
        tx.lock(ca).unwrap();
        let mut member = tx.load(ca).unwrap();
        member.update_roa_configuration(
            &[test::roa("10.0.0.0/16 => 64496")], &[]
        ).unwrap();
        tx.store(member);
        AuditHandler.handle(
            &command, &CommandContext::new(ACTOR_DEF_TEST, test::time(0)),
            &mut tx, &mut CommandStatus::default()
        ).unwrap();
        tx.commit().unwrap();

        let history = store.audit().history(ca);
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].ca(), VersionedId::new(ca, 1));
        assert_eq!(history[0].principal(), "test");
        assert_eq!(history[0].events().len(), 1);
        assert!(history[0].summary().starts_with("Updated ROA configuration."));
    }
}
