//! Dispatching commands to their handlers.

use std::collections::HashMap;
use std::sync::Arc;
use log::trace;
use crate::commons::CaResult;
use crate::commons::actor::CommandContext;
use crate::constants::HANDLER_ORDER_DEFAULT;
use crate::server::command::{
    Command, CommandCategory, CommandStatus, CommandType,
};
use crate::server::metrics::EngineMetrics;
use crate::server::store::Transaction;


//------------ CommandHandler ------------------------------------------------

/// A step in processing a command.
pub trait CommandHandler: Send + Sync {
    /// The name used in logs and metrics.
    fn name(&self) -> &'static str;

    /// The commands this handler is invoked for.
    fn scope(&self) -> HandlerScope;

    /// Handlers run in ascending order.
    fn order(&self) -> u32 {
        HANDLER_ORDER_DEFAULT
    }

    fn handle(
        &self,
        command: &Command,
        context: &CommandContext,
        tx: &mut Transaction,
        status: &mut CommandStatus,
    ) -> CaResult<()>;
}


//------------ HandlerScope --------------------------------------------------

/// The commands a handler is interested in.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum HandlerScope {
    AnyCommand,

    /// Everything but activation commands.
    Modification,

    Activation,
    ChildParent,
    ChildSharedParent,

    /// A single command type.
    Command(CommandType),
}

impl HandlerScope {
    pub fn covers(self, command_type: CommandType) -> bool {
        match self {
            HandlerScope::AnyCommand => true,
            HandlerScope::Modification => command_type.is_modification(),
            HandlerScope::Activation => {
                command_type.category() == CommandCategory::Activation
            }
            HandlerScope::ChildParent => {
                command_type.category() == CommandCategory::ChildParent
            }
            HandlerScope::ChildSharedParent => {
                command_type.category() == CommandCategory::ChildSharedParent
            }
            HandlerScope::Command(single) => single == command_type,
        }
    }
}


//------------ CommandDispatcher ---------------------------------------------

/// Runs the handlers registered for a command.
///
/// The handlers for each command type are determined once when the
/// dispatcher is created. They are sorted by their order, handlers with
/// the same order keep the order they were registered in.
pub struct CommandDispatcher {
    registry: HashMap<CommandType, Vec<Arc<dyn CommandHandler>>>,
    metrics: Arc<EngineMetrics>,
}

impl CommandDispatcher {
    pub fn new(
        handlers: Vec<Arc<dyn CommandHandler>>, metrics: Arc<EngineMetrics>
    ) -> Self {
        let registry = CommandType::ALL.iter().map(|command_type| {
            let mut matching: Vec<_> = handlers.iter().filter(|handler| {
                handler.scope().covers(*command_type)
            }).cloned().collect();
            matching.sort_by_key(|handler| handler.order());
            (*command_type, matching)
        }).collect();
        CommandDispatcher { registry, metrics }
    }

    /// Returns the names of the handlers for a command type in order.
    pub fn handler_names(&self, command_type: CommandType) -> Vec<&'static str> {
        self.registry.get(&command_type).map(|handlers| {
            handlers.iter().map(|handler| handler.name()).collect()
        }).unwrap_or_default()
    }

    /// Runs all handlers for a command.
    ///
    /// The first error stops processing and is returned.
    pub fn dispatch(
        &self,
        command: &Command,
        context: &CommandContext,
        tx: &mut Transaction,
        status: &mut CommandStatus,
    ) -> CaResult<()> {
        let Some(handlers) = self.registry.get(&command.command_type()) else {
            return Ok(())
        };
        for handler in handlers {
            trace!("Running {} for {}", handler.name(), command);
            let res = handler.handle(command, context, tx, status);
            self.metrics.handler_call(handler.name(), match &res {
                Ok(()) => "success",
                Err(err) if err.is_no_effect() => "noop",
                Err(err) if err.is_transient() => {
                    "transaction_not_serializable"
                }
                Err(_) => "failure",
            });
            res?;
        }
        Ok(())
    }
}


//============ Tests =========================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::time::Duration;
    use crate::api::ca::{CaId, VersionedId};
    use crate::commons::error::Error;
    use crate::constants::ACTOR_DEF_TEST;
    use crate::server::audit::MemoryCommandAudit;
    use crate::server::signer::MemoryKeyPairArchive;
    use crate::server::store::CaStore;
    use crate::test;

    struct Recording {
        name: &'static str,
        order: u32,
        scope: HandlerScope,
        result: fn() -> CaResult<()>,
        log: Arc<Mutex<Vec<&'static str>>>,
    }

    impl CommandHandler for Recording {
        fn name(&self) -> &'static str {
            self.name
        }

        fn scope(&self) -> HandlerScope {
            self.scope
        }

        fn order(&self) -> u32 {
            self.order
        }

        fn handle(
            &self,
            _command: &Command,
            _context: &CommandContext,
            _tx: &mut Transaction,
            _status: &mut CommandStatus,
        ) -> CaResult<()> {
            self.log.lock().unwrap().push(self.name);
            (self.result)()
        }
    }

    fn handler(
        name: &'static str,
        order: u32,
        scope: HandlerScope,
        result: fn() -> CaResult<()>,
        log: &Arc<Mutex<Vec<&'static str>>>,
    ) -> Arc<dyn CommandHandler> {
        Arc::new(Recording { name, order, scope, result, log: log.clone() })
    }

    fn store() -> CaStore {
        CaStore::new(
            Duration::from_millis(10),
            Arc::new(MemoryCommandAudit::default()),
            Arc::new(MemoryKeyPairArchive::default()),
        )
    }

    fn roa_command() -> Command {
        Command::update_roa_configuration(
            VersionedId::new(CaId::new(1), 0), vec![], vec![]
        )
    }

    #[test]
    fn run_in_order_and_scope() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let dispatcher = CommandDispatcher::new(
            vec![
                handler("late", 200, HandlerScope::AnyCommand, || Ok(()), &log),
                handler("first", 10, HandlerScope::AnyCommand, || Ok(()), &log),
                handler("second", 100, HandlerScope::Modification, || Ok(()), &log),
                handler("third", 100, HandlerScope::AnyCommand, || Ok(()), &log),
                handler(
                    "activation", 100, HandlerScope::Activation, || Ok(()), &log
                ),
                handler(
                    "delete", 100,
                    HandlerScope::Command(CommandType::DeleteCertificateAuthority),
                    || Ok(()), &log
                ),
            ],
            Arc::new(EngineMetrics::default()),
        );
        assert_eq!(
            dispatcher.handler_names(CommandType::UpdateRoaConfiguration),
            vec!["first", "second", "third", "late"]
        );
        assert_eq!(
            dispatcher.handler_names(CommandType::ActivateHostedCertificateAuthority),
            vec!["first", "third", "activation", "late"]
        );

        let store = store();
        let mut tx = store.begin();
        dispatcher.dispatch(
            &roa_command(), &CommandContext::new(ACTOR_DEF_TEST, test::time(0)),
            &mut tx, &mut CommandStatus::default()
        ).unwrap();
        assert_eq!(
            *log.lock().unwrap(), vec!["first", "second", "third", "late"]
        );
    }

    #[test]
    fn count_outcomes_and_stop_on_error() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let metrics = Arc::new(EngineMetrics::default());
        let dispatcher = CommandDispatcher::new(
            vec![
                handler("ok", 10, HandlerScope::AnyCommand, || Ok(()), &log),
                handler(
                    "noop", 20, HandlerScope::AnyCommand,
                    || Err(Error::NoEffect), &log
                ),
                handler("never", 30, HandlerScope::AnyCommand, || Ok(()), &log),
            ],
            metrics.clone(),
        );
        let store = store();
        let mut tx = store.begin();
        let res = dispatcher.dispatch(
            &roa_command(), &CommandContext::new(ACTOR_DEF_TEST, test::time(0)),
            &mut tx, &mut CommandStatus::default()
        );
        assert!(matches!(res, Err(Error::NoEffect)));
        assert_eq!(*log.lock().unwrap(), vec!["ok", "noop"]);
        assert_eq!(metrics.handler_calls("ok", "success"), 1);
        assert_eq!(metrics.handler_calls("noop", "noop"), 1);
        assert_eq!(metrics.handler_calls("never", "success"), 0);

        let dispatcher = CommandDispatcher::new(
            vec![
                handler(
                    "locked", 10, HandlerScope::AnyCommand,
                    || Err(Error::LockTimeout(CaId::new(1))), &log
                ),
            ],
            metrics.clone(),
        );
        assert!(dispatcher.dispatch(
            &roa_command(), &CommandContext::new(ACTOR_DEF_TEST, test::time(0)),
            &mut tx, &mut CommandStatus::default()
        ).is_err());
        assert_eq!(
            metrics.handler_calls("locked", "transaction_not_serializable"), 1
        );

        let dispatcher = CommandDispatcher::new(
            vec![
                handler(
                    "broken", 10, HandlerScope::AnyCommand,
                    || Err(Error::custom("broken")), &log
                ),
            ],
            metrics.clone(),
        );
        assert!(dispatcher.dispatch(
            &roa_command(), &CommandContext::new(ACTOR_DEF_TEST, test::time(0)),
            &mut tx, &mut CommandStatus::default()
        ).is_err());
        assert_eq!(metrics.handler_calls("broken", "failure"), 1);
    }
}
