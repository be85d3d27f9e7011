//! Checking CA invariants after a command.

use std::sync::Arc;
use chrono::{DateTime, Utc};
use log::{debug, warn};
use rpki::repository::resources::ResourceSet;
use crate::api::ca::CaId;
use crate::commons::CaResult;
use crate::commons::actor::CommandContext;
use crate::constants::HANDLER_ORDER_INVARIANT;
use crate::server::ca::CertificateAuthority;
use crate::server::command::{Command, CommandCategory, CommandStatus};
use crate::server::metrics::EngineMetrics;
use crate::server::store::Transaction;
use super::dispatcher::{CommandHandler, HandlerScope};


//------------ InvariantCheckHandler -----------------------------------------

/// Checks the resource invariants of the CAs a command changed.
///
/// Violations are logged and counted. They never stop the command.
pub struct InvariantCheckHandler {
    metrics: Arc<EngineMetrics>,
}

impl InvariantCheckHandler {
    pub fn new(metrics: Arc<EngineMetrics>) -> Self {
        InvariantCheckHandler { metrics }
    }

    fn check(
        &self, tx: &mut Transaction, ca: CaId, now: DateTime<Utc>
    ) {
        let Ok(ca) = tx.load(ca) else {
            debug!("Skipping invariant check of removed CA {ca}");
            return
        };
        for violation in violations(&ca, now) {
            warn!(
                "Invariant violation for CA {} ({}): {}",
                ca.id(), ca.name(), violation
            );
            self.metrics.invariant_violation();
        }
    }
}

impl CommandHandler for InvariantCheckHandler {
    fn name(&self) -> &'static str {
        "InvariantCheckHandler"
    }

    fn scope(&self) -> HandlerScope {
        HandlerScope::AnyCommand
    }

    fn order(&self) -> u32 {
        HANDLER_ORDER_INVARIANT
    }

    fn handle(
        &self,
        command: &Command,
        context: &CommandContext,
        tx: &mut Transaction,
        _status: &mut CommandStatus,
    ) -> CaResult<()> {
        let now = context.time();
        self.check(tx, command.ca_id(), now);

        let parent = match command.command_type().category() {
            CommandCategory::Activation => {
                command.details().activation_parent()
            }
            CommandCategory::ChildParent
            | CommandCategory::ChildSharedParent => {
                tx.ca_store().get(command.ca_id()).and_then(|ca| ca.parent())
            }
            CommandCategory::Modification => None,
        };
        if let Some(parent) = parent {
            self.check(tx, parent, now);
        }
        Ok(())
    }
}

/// Returns descriptions of all invariants the CA violates.
pub fn violations(
    ca: &CertificateAuthority, now: DateTime<Utc>
) -> Vec<String> {
    let Some(managed) = ca.as_managed() else {
        return Vec::new()
    };
    let mut res = Vec::new();

    let mut publishable = managed.publishable_keys().filter_map(|key| {
        key.certified_resources().map(|resources| (key.key_id(), resources))
    });
    if let Some((first_key, first)) = publishable.next() {
        for (key, resources) in publishable {
            if resources != first {
                res.push(format!(
                    "publishable keys {first_key} and {key} have different \
                     resources '{first}' and '{resources}'"
                ));
            }
        }
    }

    let incoming = managed.publishable_keys().filter_map(|key| {
        key.certified_resources()
    }).fold(ResourceSet::default(), |res, resources| res.union(resources));

    let children = managed.outgoing().valid_resources(now, true);
    if !incoming.contains(&children) {
        res.push(format!(
            "child certificates hold resources '{}' not certified to the CA",
            children.difference(&incoming)
        ));
    }

    if !managed.is_manifest_and_crl_check_needed() {
        let objects = managed.outgoing().valid_resources(now, false);
        if !incoming.contains(&objects) {
            res.push(format!(
                "RPKI objects hold resources '{}' not certified to the CA",
                objects.difference(&incoming)
            ));
        }
    }
    res
}


//============ Tests =========================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::ca::VersionedId;
    use crate::api::provisioning::{
        CertificateIssuanceRequest, CertificateIssuanceResponse
    };
    use crate::constants::{ACTOR_DEF_TEST, ISSUANCE_LIMIT_UNBOUNDED};
    use crate::server::signer::SoftKeyPairFactory;
    use crate::test;

    #[test]
    fn detect_without_aborting() {
        let t0 = test::time(0);
        let store = test::store();
        let mut parent = test::certified_parent(
            store.next_ca_id().into_u64(), "10.0.0.0/8", t0
        );
        let id = parent.id();
        let request = CertificateIssuanceRequest::new(
            test::resources("10.1.0.0/16"), "CN=child".into(),
            test::key_identifier(9),
            test::sia(parent.uuid(), test::key_identifier(9))
        );
        parent.process_certificate_issuance_request(
            CaId::new(99), &request, ISSUANCE_LIMIT_UNBOUNDED, t0
        ).unwrap();
        let mut tx = store.begin();
        tx.create(parent).unwrap();
        tx.commit().unwrap();

        let metrics = Arc::new(EngineMetrics::default());
        let handler = InvariantCheckHandler::new(metrics.clone());
        let command = Command::expire_outgoing_certificates(
            VersionedId::new(id, 0)
        );
        let context = CommandContext::new(ACTOR_DEF_TEST, t0);

        let mut tx = store.begin();
        handler.handle(
            &command, &context, &mut tx, &mut CommandStatus::default()
        ).unwrap();
        assert_eq!(metrics.invariant_violations(), 0);

        // Shrink the parent's own certificate below what it issued.
        let mut parent = tx.load(id).unwrap();
        test::certify(&mut parent, "192.168.0.0/16", t0);
        tx.store(parent);

        handler.handle(
            &command, &context, &mut tx, &mut CommandStatus::default()
        ).unwrap();
        assert_eq!(metrics.invariant_violations(), 1);
    }

    #[test]
    fn pending_keys_do_not_cover_children() {
        let t0 = test::time(0);
        let mut parent = test::certified_parent(
            1, "10.0.0.0/8, 192.168.0.0/16", t0
        );
        let request = CertificateIssuanceRequest::new(
            test::resources("192.168.1.0/24"), "CN=child".into(),
            test::key_identifier(9),
            test::sia(parent.uuid(), test::key_identifier(9))
        );
        parent.process_certificate_issuance_request(
            CaId::new(99), &request, ISSUANCE_LIMIT_UNBOUNDED, t0
        ).unwrap();
        assert!(violations(&parent, t0).is_empty());

        let pending = parent.create_key_pair(
            &SoftKeyPairFactory::default(), t0
        ).unwrap();
        let mut certificate = test::resource_certificate(
            1000, pending, test::key_identifier(0),
            test::resources("10.0.0.0/8, 192.168.0.0/16"), t0
        );
        certificate.sia = test::sia(parent.uuid(), pending);
        parent.process_certificate_issuance_response(
            &CertificateIssuanceResponse::new(
                certificate,
                test::rsync(&format!("rsync://localhost/ta/{pending}.cer"))
            ),
            t0
        ).unwrap();
        test::certify(&mut parent, "10.0.0.0/8", t0);
        assert!(parent.managed().unwrap().pending_key().is_some());

        let found = violations(&parent, t0);
        assert_eq!(found.len(), 1);
        assert!(found[0].starts_with("child certificates hold"));
    }
}
