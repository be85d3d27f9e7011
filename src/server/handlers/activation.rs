//! Creating certificate authorities.

use std::sync::Arc;
use chrono::{DateTime, Utc};
use log::info;
use rpki::repository::resources::ResourceSet;
use crate::api::ca::{CaId, CaName, CaType};
use crate::commons::CaResult;
use crate::commons::actor::CommandContext;
use crate::commons::error::Error;
use crate::constants::ISSUANCE_LIMIT_UNBOUNDED;
use crate::server::ca::CertificateAuthority;
use crate::server::command::{Command, CommandDetails, CommandStatus};
use crate::server::store::Transaction;
use super::CaServices;
use super::dispatcher::{CommandHandler, HandlerScope};


//------------ ActivationHandler ---------------------------------------------

/// Creates new CAs.
///
/// The all resources CA is certified by the offline trust anchor, so it
/// starts out with a request for it. The production CA gets its first key
/// and is certified by the regular certificate update. All other CAs are
/// certified by their parent right away.
pub struct ActivationHandler {
    services: Arc<CaServices>,
}

impl ActivationHandler {
    pub fn new(services: Arc<CaServices>) -> Self {
        ActivationHandler { services }
    }

    fn create_all_resources_ca(
        &self,
        tx: &mut Transaction,
        id: CaId,
        name: &CaName,
        now: DateTime<Utc>,
    ) -> CaResult<()> {
        let mut ca = CertificateAuthority::new_managed(
            id, name.clone(), CaType::AllResources, None, now
        );
        let key = ca.create_key_pair(self.services.keys.as_ref(), now)?;
        let signing = self.services.requests.signing_request(
            &ca, key, ResourceSet::all()
        )?;
        ca.set_trust_anchor_request(
            self.services.requests.trust_anchor_request(vec![signing], now)
        )?;
        tx.create(ca)
    }

    fn create_root_ca(
        &self,
        tx: &mut Transaction,
        id: CaId,
        name: &CaName,
        parent: CaId,
        now: DateTime<Utc>,
    ) -> CaResult<()> {
        if !tx.load(parent)?.is_all_resources() {
            return Err(Error::invalid_ca_state(
                parent, "the production CA must be a child of the all resources CA"
            ))
        }
        let mut ca = CertificateAuthority::new_managed(
            id, name.clone(), CaType::Root, Some(parent), now
        );
        ca.create_key_pair(self.services.keys.as_ref(), now)?;
        tx.create(ca)
    }

    /// Creates a CA below a parent and has the parent certify it.
    fn create_member_ca(
        &self,
        tx: &mut Transaction,
        mut ca: CertificateAuthority,
        with_key: bool,
        now: DateTime<Utc>,
    ) -> CaResult<()> {
        let id = ca.id();
        let Some(parent) = ca.parent() else {
            return Err(Error::invalid_ca_state(id, "a member CA needs a parent"))
        };
        if !tx.load(parent)?.ca_type().is_parent() {
            return Err(Error::invalid_ca_state(
                parent, "the CA cannot have child CAs"
            ))
        }
        if with_key {
            ca.create_key_pair(self.services.keys.as_ref(), now)?;
        }
        tx.create(ca)?;
        if !self.services.saga.execute(
            tx, parent, id, ISSUANCE_LIMIT_UNBOUNDED, now
        )? {
            info!("CA {id} was created but not certified yet");
        }
        Ok(())
    }
}

impl CommandHandler for ActivationHandler {
    fn name(&self) -> &'static str {
        "ActivationHandler"
    }

    fn scope(&self) -> HandlerScope {
        HandlerScope::Activation
    }

    fn handle(
        &self,
        command: &Command,
        context: &CommandContext,
        tx: &mut Transaction,
        _status: &mut CommandStatus,
    ) -> CaResult<()> {
        let id = command.ca_id();
        let now = context.time();
        match command.details() {
            CommandDetails::CreateAllResourcesCertificateAuthority { name } => {
                self.create_all_resources_ca(tx, id, name, now)
            }
            CommandDetails::CreateRootCertificateAuthority { name, parent } => {
                self.create_root_ca(tx, id, name, *parent, now)
            }
            CommandDetails::CreateIntermediateCertificateAuthority {
                name, parent
            } => {
                self.create_member_ca(
                    tx,
                    CertificateAuthority::new_managed(
                        id, name.clone(), CaType::Intermediate, Some(*parent),
                        now
                    ),
                    false,
                    now
                )
            }
            CommandDetails::ActivateHostedCertificateAuthority {
                name, parent
            } => {
                self.create_member_ca(
                    tx,
                    CertificateAuthority::new_managed(
                        id, name.clone(), CaType::Hosted, Some(*parent), now
                    ),
                    true,
                    now
                )
            }
            CommandDetails::ActivateNonHostedCertificateAuthority {
                name, parent, public_keys
            } => {
                self.create_member_ca(
                    tx,
                    CertificateAuthority::new_non_hosted(
                        id, name.clone(), *parent, public_keys.clone(), now
                    ),
                    false,
                    now
                )
            }
            _ => Err(Error::custom(format!(
                "{} is not an activation command", command.command_type()
            )))
        }
    }
}
