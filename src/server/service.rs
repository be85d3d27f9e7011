//! Executing commands in transactions.

use std::sync::Arc;
use std::thread;
use std::time::Duration;
use log::{debug, info, warn};
use crate::commons::CaResult;
use crate::commons::actor::CommandContext;
use crate::commons::error::Error;
use crate::constants::{COMMAND_RETRY_BASE_MS, COMMAND_RETRY_JITTER_MS};
use crate::server::command::{Command, CommandStatus};
use crate::server::handlers::CommandDispatcher;
use crate::server::metrics::EngineMetrics;
use crate::server::store::CaStore;


//------------ CommandService ------------------------------------------------

/// Runs each command in its own transaction.
///
/// Commands that fail because of lock contention are retried with a
/// jittered exponential backoff. A command without effect is rolled back
/// and reported as such.
pub struct CommandService {
    store: Arc<CaStore>,
    dispatcher: CommandDispatcher,
    metrics: Arc<EngineMetrics>,
    max_retries: u32,
}

impl CommandService {
    pub fn new(
        store: Arc<CaStore>,
        dispatcher: CommandDispatcher,
        metrics: Arc<EngineMetrics>,
        max_retries: u32,
    ) -> Self {
        CommandService { store, dispatcher, metrics, max_retries }
    }

    pub fn store(&self) -> &Arc<CaStore> {
        &self.store
    }

    pub fn dispatcher(&self) -> &CommandDispatcher {
        &self.dispatcher
    }

    /// Executes a command.
    pub fn execute(
        &self, command: &Command, context: &CommandContext
    ) -> CaResult<CommandStatus> {
        let mut retry = 0;
        loop {
            match self.execute_once(command, context) {
                Ok(status) => return Ok(status),
                Err(err) if err.is_transient() && retry < self.max_retries => {
                    let delay = Self::backoff(retry);
                    debug!(
                        "Retrying {} in {}ms after: {}",
                        command, delay.as_millis(), err
                    );
                    self.metrics.command_retry();
                    thread::sleep(delay);
                    retry += 1;
                }
                Err(err) => {
                    if err.is_user_error() {
                        info!("Command {command} by {} rejected: {err}", context.actor());
                    }
                    else {
                        warn!("Command {command} by {} failed: {err}", context.actor());
                    }
                    return Err(err)
                }
            }
        }
    }

    fn execute_once(
        &self, command: &Command, context: &CommandContext
    ) -> CaResult<CommandStatus> {
        let mut tx = self.store.begin();
        let mut status = CommandStatus::default();
        match self.dispatcher.dispatch(command, context, &mut tx, &mut status) {
            Ok(()) => {
                tx.commit()?;
                Ok(status)
            }
            Err(Error::NoEffect) => {
                debug!("Command {command} had no effect");
                status.set_has_effect(false);
                Ok(status)
            }
            Err(err) => Err(err)
        }
    }

    /// The delay before the given retry.
    fn backoff(retry: u32) -> Duration {
        let millis = COMMAND_RETRY_BASE_MS as f64
            + rand::random::<f64>() * COMMAND_RETRY_JITTER_MS as f64;
        Duration::from_millis((millis as u64) << retry.min(16))
    }
}


//============ Tests =========================================================
