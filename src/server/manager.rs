//! The engine that ties all components together.

use std::sync::Arc;
use std::time::Duration;
use chrono::{DateTime, Utc};
use log::info;
use crate::api::ca::{CaId, CaName};
use crate::api::ta::TrustAnchorRequest;
use crate::commons::CaResult;
use crate::commons::actor::CommandContext;
use crate::commons::error::Error;
use crate::commons::metrics::Target;
use crate::config::Config;
use crate::server::audit::{CommandAudit, CommandAuditData};
use crate::server::background::{BackgroundJob, BackgroundTaskRunner};
use crate::server::ca::{CertificateAuthority, CertificateRequestCreation};
use crate::server::command::{Command, CommandStatus};
use crate::server::handlers::{
    ActivatePendingKeysHandler, ActivationHandler, AuditHandler, CaServices,
    CommandDispatcher, CommandHandler, ConcurrentModificationHandler,
    DeleteCertificateAuthorityHandler, ExpireOutgoingCertificatesHandler,
    InitiateRollHandler, InvariantCheckHandler,
    IssueUpdatedManifestAndCrlHandler, LockHandler,
    ProcessTrustAnchorResponseHandler, RevokeOldKeysHandler,
    UpdateAllIncomingCertificatesHandler, UpdateIgnoredAnnouncementsHandler,
    UpdateRoaConfigurationHandler,
};
use crate::server::metrics::EngineMetrics;
use crate::server::resources::ResourceLookup;
use crate::server::saga::ChildParentCertificateUpdateSaga;
use crate::server::service::CommandService;
use crate::server::signer::{KeyPairDeletion, KeyPairFactory};
use crate::server::store::CaStore;


//------------ CaEngine ------------------------------------------------------

/// The CA engine.
///
/// This owns the CA store and runs commands and background jobs against
/// it. Resources, keys, the audit log and key archival are provided by
/// the caller.
pub struct CaEngine {
    config: Arc<Config>,
    store: Arc<CaStore>,
    service: Arc<CommandService>,
    runner: BackgroundTaskRunner,
    metrics: Arc<EngineMetrics>,
}

/// # Set up
///
impl CaEngine {
    pub fn build(
        config: Arc<Config>,
        resources: Arc<dyn ResourceLookup>,
        keys: Arc<dyn KeyPairFactory>,
        audit: Arc<dyn CommandAudit>,
        deletion: Arc<dyn KeyPairDeletion>,
    ) -> CaResult<Self> {
        config.verify()?;
        info!("Starting RPKI CA engine v{}", env!("CARGO_PKG_VERSION"));

        let metrics = Arc::new(EngineMetrics::default());
        let store = Arc::new(CaStore::new(
            Duration::from_millis(config.lock_timeout_ms), audit, deletion
        ));
        let requests = CertificateRequestCreation::new(&config);
        let services = Arc::new(CaServices {
            saga: ChildParentCertificateUpdateSaga::new(
                resources, keys.clone(), requests.clone(), metrics.clone()
            ),
            keys,
            requests,
        });

        let dispatcher = CommandDispatcher::new(
            Self::handlers(&config, &services, &metrics), metrics.clone()
        );
        if config.invariant_checking_enabled {
            info!("Invariant checking is enabled");
        }
        let service = Arc::new(CommandService::new(
            store.clone(), dispatcher, metrics.clone(),
            config.command_max_retries
        ));
        let runner = BackgroundTaskRunner::new(
            &config, service.clone(), services
        );

        Ok(CaEngine { config, store, service, runner, metrics })
    }

    fn handlers(
        config: &Config,
        services: &Arc<CaServices>,
        metrics: &Arc<EngineMetrics>,
    ) -> Vec<Arc<dyn CommandHandler>> {
        let mut handlers: Vec<Arc<dyn CommandHandler>> = vec![
            Arc::new(LockHandler),
            Arc::new(ConcurrentModificationHandler::new(metrics.clone())),
            Arc::new(ActivationHandler::new(services.clone())),
            Arc::new(DeleteCertificateAuthorityHandler::new(services.clone())),
            Arc::new(
                UpdateAllIncomingCertificatesHandler::new(services.clone())
            ),
            Arc::new(InitiateRollHandler::new(services.clone())),
            Arc::new(ActivatePendingKeysHandler),
            Arc::new(RevokeOldKeysHandler::new(services.clone())),
            Arc::new(ProcessTrustAnchorResponseHandler),
            Arc::new(IssueUpdatedManifestAndCrlHandler),
            Arc::new(ExpireOutgoingCertificatesHandler),
            Arc::new(UpdateRoaConfigurationHandler),
            Arc::new(UpdateIgnoredAnnouncementsHandler),
            Arc::new(AuditHandler),
        ];
        if config.invariant_checking_enabled {
            handlers.push(Arc::new(InvariantCheckHandler::new(metrics.clone())));
        }
        handlers
    }

    pub fn config(&self) -> &Config {
        &self.config
    }
}

/// # Commands
///
impl CaEngine {
    /// Executes a command.
    pub fn execute(
        &self, command: &Command, context: &CommandContext
    ) -> CaResult<CommandStatus> {
        self.service.execute(command, context)
    }

    /// Reserves the identifier for a CA about to be activated.
    pub fn next_ca_id(&self) -> CaId {
        self.store.next_ca_id()
    }
}

/// # Queries
///
impl CaEngine {
    pub fn store(&self) -> &CaStore {
        &self.store
    }

    pub fn ca(&self, ca: CaId) -> CaResult<CertificateAuthority> {
        self.store.get(ca).ok_or(Error::CaNotFound(ca))
    }

    pub fn ca_by_name(&self, name: &CaName) -> CaResult<CertificateAuthority> {
        self.store.find_by_name(name).ok_or_else(|| {
            Error::CaNameNotFound(name.clone())
        })
    }

    /// Returns the executed commands for a CA, oldest first.
    pub fn history(&self, ca: CaId) -> Vec<CommandAuditData> {
        self.store.audit().history(ca)
    }

    /// Returns the request the all resources CA has for the trust anchor.
    pub fn trust_anchor_request(
        &self, ca: CaId
    ) -> CaResult<Option<TrustAnchorRequest>> {
        Ok(self.ca(ca)?.managed()?.trust_anchor_request().cloned())
    }

    /// Renders the engine's metrics in Prometheus text format.
    pub fn metrics(&self, target: &mut Target) {
        self.metrics.write(target)
    }

    pub fn engine_metrics(&self) -> &EngineMetrics {
        &self.metrics
    }
}

/// # Background jobs
///
impl CaEngine {
    pub async fn run_job(
        &self, job: BackgroundJob, now: DateTime<Utc>
    ) -> CaResult<usize> {
        self.runner.run(job, now).await
    }

    /// Stops starting new background work.
    pub fn stop(&self) {
        self.runner.stop()
    }
}
