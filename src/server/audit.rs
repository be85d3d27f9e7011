//! The command audit log.
//!
//! Every command that changed a CA is recorded together with the version
//! of the CA it produced. The log is the source of truth for detecting
//! concurrent modifications.

use std::collections::HashMap;
use std::fmt;
use std::sync::RwLock;
use chrono::{DateTime, Utc};
use log::trace;
use crate::api::ca::{CaId, VersionedId};
use crate::commons::CaResult;
use crate::server::command::{CommandGroup, CommandType};


//------------ CommandAuditData ----------------------------------------------

/// An executed command and the CA version it resulted in.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CommandAuditData {
    ca: VersionedId,
    principal: String,
    command_type: CommandType,
    group: CommandGroup,
    summary: String,
    events: Vec<String>,
    executed_at: DateTime<Utc>,
}

impl CommandAuditData {
    pub fn new(
        ca: VersionedId,
        principal: impl Into<String>,
        command_type: CommandType,
        group: CommandGroup,
        summary: impl Into<String>,
        events: Vec<String>,
        executed_at: DateTime<Utc>,
    ) -> Self {
        CommandAuditData {
            ca,
            principal: principal.into(),
            command_type,
            group,
            summary: summary.into(),
            events,
            executed_at,
        }
    }

    /// The CA and the version the command produced.
    pub fn ca(&self) -> VersionedId {
        self.ca
    }

    pub fn principal(&self) -> &str {
        &self.principal
    }

    pub fn command_type(&self) -> CommandType {
        self.command_type
    }

    pub fn group(&self) -> CommandGroup {
        self.group
    }

    pub fn summary(&self) -> &str {
        &self.summary
    }

    pub fn events(&self) -> &[String] {
        &self.events
    }

    pub fn executed_at(&self) -> DateTime<Utc> {
        self.executed_at
    }

    /// Sets the version once the transaction knows it.
    pub(crate) fn set_version(&mut self, version: VersionedId) {
        self.ca = version
    }
}

impl fmt::Display for CommandAuditData {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "principal={} caId={} commandType={} commandGroup={} \
             commandSummary={}, events=[{}]",
            self.principal, self.ca.id(), self.command_type, self.group,
            self.summary, self.events.join(", ")
        )
    }
}


//------------ CommandAudit --------------------------------------------------

/// Storage of the command audit log.
pub trait CommandAudit: Send + Sync {
    fn record(&self, entry: CommandAuditData) -> CaResult<()>;

    /// Returns all entries for the CA with a version after the given one.
    ///
    /// Entries are returned in version order.
    fn find_commands_since(&self, ca: VersionedId) -> Vec<CommandAuditData>;

    /// Returns all entries for the CA.
    fn history(&self, ca: CaId) -> Vec<CommandAuditData>;
}


//------------ MemoryCommandAudit --------------------------------------------

#[derive(Debug, Default)]
pub struct MemoryCommandAudit {
    entries: RwLock<HashMap<CaId, Vec<CommandAuditData>>>,
}

impl CommandAudit for MemoryCommandAudit {
    fn record(&self, entry: CommandAuditData) -> CaResult<()> {
        trace!("Recording audit entry for {}", entry.ca());
        self.entries.write().expect("poisoned lock").entry(
            entry.ca().id()
        ).or_default().push(entry);
        Ok(())
    }

    fn find_commands_since(&self, ca: VersionedId) -> Vec<CommandAuditData> {
        let entries = self.entries.read().expect("poisoned lock");
        let Some(entries) = entries.get(&ca.id()) else {
            return Vec::new()
        };
        let mut res: Vec<_> = entries.iter().filter(|entry| {
            entry.ca().version() > ca.version()
        }).cloned().collect();
        res.sort_by_key(|entry| entry.ca().version());
        res
    }

    fn history(&self, ca: CaId) -> Vec<CommandAuditData> {
        self.entries.read().expect("poisoned lock").get(
            &ca
        ).cloned().unwrap_or_default()
    }
}


//============ Tests =========================================================
