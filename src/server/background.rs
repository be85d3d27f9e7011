//! Scheduled work across all CAs.
//!
//! Background jobs find the CAs that need attention and execute one
//! command per CA through the [`CommandService`]. The per-CA work is
//! synchronous. It runs on tokio's blocking pool, a bounded number of CAs
//! at a time.

use std::fmt;
use std::sync::{Arc, Mutex};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::{Duration, Instant};
use chrono::{DateTime, Utc};
use futures_util::stream::{self, StreamExt};
use log::{debug, error, info, warn};
use crate::api::ca::{CaId, CaName, CaType, VersionedId};
use crate::commons::CaResult;
use crate::commons::actor::CommandContext;
use crate::commons::error::Error;
use crate::config::Config;
use crate::constants::{ACTOR_DEF_SYSTEM, ISSUANCE_LIMIT_UNBOUNDED};
use crate::server::command::Command;
use crate::server::handlers::CaServices;
use crate::server::service::CommandService;


//------------ BackgroundJob -------------------------------------------------

/// The jobs the runner knows how to run.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum BackgroundJob {
    /// Brings the certificates of the production CA and its members in
    /// line with their certifiable resources.
    AllCaCertificateUpdate,

    /// Starts key rolls for CAs of the given type with old keys.
    KeyRolloverManagement(CaType),

    /// Activates staged keys and updates the children of the CAs that
    /// activated one.
    KeyPairActivationManagement,

    /// Revokes old keys that are no longer used.
    KeyPairRevocationManagement,

    /// Marks outgoing certificates past their validity as expired.
    CertificateExpiration,

    /// Reissues manifests and CRLs that are due.
    ManifestAndCrlUpdate,
}

impl fmt::Display for BackgroundJob {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            BackgroundJob::AllCaCertificateUpdate => {
                f.write_str("all CA certificate update")
            }
            BackgroundJob::KeyRolloverManagement(ca_type) => {
                write!(f, "{ca_type} key rollover management")
            }
            BackgroundJob::KeyPairActivationManagement => {
                f.write_str("key pair activation management")
            }
            BackgroundJob::KeyPairRevocationManagement => {
                f.write_str("key pair revocation management")
            }
            BackgroundJob::CertificateExpiration => {
                f.write_str("certificate expiration")
            }
            BackgroundJob::ManifestAndCrlUpdate => {
                f.write_str("manifest and CRL update")
            }
        }
    }
}


//------------ BackgroundTaskRunner ------------------------------------------

/// Runs background jobs.
pub struct BackgroundTaskRunner {
    service: Arc<CommandService>,
    services: Arc<CaServices>,

    parallelism: usize,
    max_failures: usize,
    batch_size: usize,
    soft_deadline: Duration,
    key_rollover_max_age_days: u32,
    key_activation_staging: chrono::Duration,
    all_resources_ca_name: CaName,
    production_ca_name: CaName,

    stopping: AtomicBool,
}

/// # Set up and control
///
impl BackgroundTaskRunner {
    pub fn new(
        config: &Config,
        service: Arc<CommandService>,
        services: Arc<CaServices>,
    ) -> Self {
        BackgroundTaskRunner {
            service,
            services,
            parallelism: config.batch_parallelism.max(1),
            max_failures: config.batch_max_failures,
            batch_size: config.ca_update_batch_size,
            soft_deadline: Duration::from_secs(
                config.batch_soft_deadline_seconds
            ),
            key_rollover_max_age_days: config.key_rollover_max_age_days,
            key_activation_staging: chrono::Duration::hours(
                config.key_activation_staging_hours.into()
            ),
            all_resources_ca_name: CaName::new(
                config.all_resources_ca_name.clone()
            ),
            production_ca_name: CaName::new(config.production_ca_name.clone()),
            stopping: AtomicBool::new(false),
        }
    }

    /// Stops starting new tasks.
    ///
    /// Tasks that are already running finish normally.
    pub fn stop(&self) {
        if !self.stopping.swap(true, Ordering::SeqCst) {
            info!("Stopping background jobs");
        }
    }

    pub fn is_stopping(&self) -> bool {
        self.stopping.load(Ordering::SeqCst)
    }

    /// Runs a task for every item and returns the results of those that
    /// succeeded.
    ///
    /// At most the configured number of tasks run at the same time. Failed
    /// tasks are logged. If more tasks fail than the configured budget
    /// allows, no further tasks are started and the batch fails.
    pub async fn run_parallel<T, R, F>(
        &self, name: &str, items: Vec<T>, task: F
    ) -> CaResult<Vec<R>>
    where
        T: fmt::Display + Send + 'static,
        R: Send + 'static,
        F: Fn(T) -> CaResult<R> + Send + Sync + 'static,
    {
        let task = Arc::new(task);
        let failures = AtomicUsize::new(0);
        let mut tasks = stream::iter(items).map(|item| {
            let task = task.clone();
            let skip = self.is_stopping()
                || failures.load(Ordering::SeqCst) > self.max_failures;
            async move {
                if skip {
                    return None
                }
                let label = item.to_string();
                let res = match tokio::task::spawn_blocking(move || {
                    task(item)
                }).await {
                    Ok(res) => res,
                    Err(err) => Err(Error::custom(err)),
                };
                Some((label, res))
            }
        }).buffer_unordered(self.parallelism);

        let mut results = Vec::new();
        while let Some(outcome) = tasks.next().await {
            match outcome {
                Some((_, Ok(res))) => results.push(res),
                Some((label, Err(err))) => {
                    failures.fetch_add(1, Ordering::SeqCst);
                    error!("{name} failed for {label}: {err}");
                }
                None => { }
            }
        }

        let failures = failures.load(Ordering::SeqCst);
        if failures > self.max_failures {
            error!("{name} aborted after {failures} failures");
            return Err(Error::TooManyBatchFailures(failures))
        }
        Ok(results)
    }
}

/// # Jobs
///
impl BackgroundTaskRunner {
    /// Runs a job and returns the number of CAs it changed.
    pub async fn run(
        &self, job: BackgroundJob, now: DateTime<Utc>
    ) -> CaResult<usize> {
        if self.is_stopping() {
            debug!("Not starting {job}, shutting down");
            return Ok(0)
        }
        let started = Instant::now();
        let res = match job {
            BackgroundJob::AllCaCertificateUpdate => {
                self.update_all_ca_certificates(now).await
            }
            BackgroundJob::KeyRolloverManagement(ca_type) => {
                self.initiate_key_rolls(ca_type, now).await
            }
            BackgroundJob::KeyPairActivationManagement => {
                self.activate_pending_keys(now).await
            }
            BackgroundJob::KeyPairRevocationManagement => {
                self.revoke_old_keys(now).await
            }
            BackgroundJob::CertificateExpiration => {
                self.expire_certificates(now).await
            }
            BackgroundJob::ManifestAndCrlUpdate => {
                self.update_manifests_and_crls(now).await
            }
        };
        match &res {
            Ok(count) => info!(
                "Finished {job} in {}ms, {count} CAs changed",
                started.elapsed().as_millis()
            ),
            Err(err) => error!("{job} failed: {err}"),
        }
        res
    }

    async fn update_all_ca_certificates(
        &self, now: DateTime<Utc>
    ) -> CaResult<usize> {
        let store = self.service.store();
        if store.find_by_name(&self.all_resources_ca_name).is_none() {
            error!("All resources CA '{}' not found", self.all_resources_ca_name);
            return Ok(0)
        }
        let Some(production) = store.find_by_name(&self.production_ca_name)
        else {
            error!("Production CA '{}' not found", self.production_ca_name);
            return Ok(0)
        };
        let production = production.id();

        let mut updated = self.update_production_ca(production, now).await?;

        let members = store.children_of(production);
        let total = members.len();
        let service = self.service.clone();
        let services = self.services.clone();
        let deadline = Arc::new(SoftDeadline::new(self.soft_deadline));
        let counter = Arc::new(AtomicUsize::new(0));
        let batch_size = self.batch_size;
        let members_updated = self.run_parallel(
            "updating member certificates", members, move |member| {
                if counter.load(Ordering::SeqCst) >= batch_size {
                    return Ok(false)
                }
                if deadline.is_passed() {
                    return Ok(false)
                }
                match update_incoming_certificates(
                    &service, &services, member, now
                ) {
                    Ok(true) => {
                        counter.fetch_add(1, Ordering::SeqCst);
                        deadline.start();
                        Ok(true)
                    }
                    Ok(false) => Ok(false),
                    Err(err) if err.is_not_found() => {
                        warn!(
                            "Could not update certificates of CA {member}: {err}"
                        );
                        Ok(false)
                    }
                    Err(err) => Err(err)
                }
            }
        ).await?.into_iter().filter(|updated| *updated).count();
        info!(
            "Updated incoming certificates of {members_updated} of {total} \
             member CAs"
        );

        if members_updated > 0 {
            // Picks up resources members no longer hold.
            updated += self.update_production_ca(production, now).await?;
        }
        Ok(updated + members_updated)
    }

    async fn update_production_ca(
        &self, production: CaId, now: DateTime<Utc>
    ) -> CaResult<usize> {
        let service = self.service.clone();
        let services = self.services.clone();
        Ok(self.run_parallel(
            "updating production CA certificates", vec![production],
            move |ca| update_incoming_certificates(&service, &services, ca, now)
        ).await?.into_iter().filter(|updated| *updated).count())
    }

    async fn initiate_key_rolls(
        &self, ca_type: CaType, now: DateTime<Utc>
    ) -> CaResult<usize> {
        let max_age_days = self.key_rollover_max_age_days;
        let eligible: Vec<_> = self.service.store().find_by_type(
            ca_type
        ).into_iter().filter(|ca| {
            ca.as_managed().is_some_and(|managed| {
                !managed.is_key_roll_in_progress()
                    && managed.current_key().is_some_and(|key| {
                        key.is_older_than(max_age_days, now)
                    })
            })
        }).map(|ca| ca.id()).collect();
        info!(
            "Initiating key roll for {} CAs of type {}", eligible.len(), ca_type
        );

        let service = self.service.clone();
        self.count_effective(
            "initiating key rolls", eligible, move |ca| {
                execute_for(&service, ca, now, |id| {
                    Command::initiate_roll(id, max_age_days)
                })
            }
        ).await
    }

    async fn activate_pending_keys(
        &self, now: DateTime<Utc>
    ) -> CaResult<usize> {
        let store = self.service.store();
        let mut pending: Vec<_> = store.all().into_iter().filter(|ca| {
            ca.as_managed().is_some_and(|managed| {
                managed.pending_key().is_some()
            })
        }).map(|ca| (store.depth(ca.id()), ca.id())).collect();
        pending.sort();
        info!("Checking {} CAs with pending keys for activation", pending.len());

        // Work top down, one level of the hierarchy at a time.
        let mut activated = Vec::new();
        let mut levels = pending.into_iter().peekable();
        while let Some((depth, first)) = levels.next() {
            let mut level = vec![first];
            while let Some((_, ca)) = levels.next_if(|(next, _)| *next == depth) {
                level.push(ca)
            }
            let service = self.service.clone();
            let staging = self.key_activation_staging;
            activated.extend(self.run_parallel(
                "activating pending keys", level, move |ca| {
                    execute_for(&service, ca, now, |id| {
                        Command::activate_pending_keys_planned(id, staging)
                    }).map(|effect| effect.then_some(ca))
                }
            ).await?.into_iter().flatten());
        }
        info!("Activated keys for {} CAs", activated.len());

        for parent in &activated {
            let children = store.children_of(*parent);
            let service = self.service.clone();
            self.run_parallel(
                "updating children after key activation", children,
                move |child| {
                    execute_for(&service, child, now, |id| {
                        Command::update_all_incoming(id, ISSUANCE_LIMIT_UNBOUNDED)
                    })
                }
            ).await?;
        }
        Ok(activated.len())
    }

    async fn revoke_old_keys(&self, now: DateTime<Utc>) -> CaResult<usize> {
        let revocable: Vec<_> = self.service.store().all().into_iter().filter(
            |ca| !ca.revocable_old_keys().is_empty()
        ).map(|ca| ca.id()).collect();
        let service = self.service.clone();
        self.count_effective(
            "revoking old keys", revocable, move |ca| {
                execute_for(&service, ca, now, Command::revoke_old_keys)
            }
        ).await
    }

    async fn expire_certificates(
        &self, now: DateTime<Utc>
    ) -> CaResult<usize> {
        let managed: Vec<_> = self.service.store().all().into_iter().filter(
            |ca| ca.is_managed()
        ).map(|ca| ca.id()).collect();
        let service = self.service.clone();
        self.count_effective(
            "expiring outgoing certificates", managed, move |ca| {
                execute_for(
                    &service, ca, now, Command::expire_outgoing_certificates
                )
            }
        ).await
    }

    async fn update_manifests_and_crls(
        &self, now: DateTime<Utc>
    ) -> CaResult<usize> {
        let due: Vec<_> = self.service.store().all().into_iter().filter(
            |ca| ca.is_manifest_and_crl_update_needed(now)
        ).map(|ca| ca.id()).collect();
        let service = self.service.clone();
        self.count_effective(
            "updating manifests and CRLs", due, move |ca| {
                execute_for(
                    &service, ca, now, Command::issue_updated_manifest_and_crl
                )
            }
        ).await
    }

    async fn count_effective<F>(
        &self, name: &str, cas: Vec<CaId>, task: F
    ) -> CaResult<usize>
    where F: Fn(CaId) -> CaResult<bool> + Send + Sync + 'static {
        Ok(self.run_parallel(name, cas, task).await?.into_iter().filter(
            |effect| *effect
        ).count())
    }
}


//------------ Helpers -------------------------------------------------------

/// Executes a system command for the current version of a CA.
fn execute_for(
    service: &CommandService,
    ca: CaId,
    now: DateTime<Utc>,
    command: impl FnOnce(VersionedId) -> Command,
) -> CaResult<bool> {
    let id = service.store().get_versioned_id(ca)?;
    service.execute(
        &command(id), &CommandContext::new(ACTOR_DEF_SYSTEM, now)
    ).map(|status| status.has_effect())
}

/// Updates a CA's incoming certificates if the parent's answer changed.
///
/// The check runs on the committed state without taking any locks.
fn update_incoming_certificates(
    service: &CommandService,
    services: &CaServices,
    ca: CaId,
    now: DateTime<Utc>,
) -> CaResult<bool> {
    let store = service.store();
    let child = store.get(ca).ok_or(Error::CaNotFound(ca))?;
    let Some(parent) = child.parent() else {
        return Ok(false)
    };
    let parent = store.get(parent).ok_or(Error::CaNotFound(parent))?;
    if !services.saga.is_update_needed(&parent, &child, now)? {
        return Ok(false)
    }
    service.execute(
        &Command::update_all_incoming(
            child.versioned_id(), ISSUANCE_LIMIT_UNBOUNDED
        ),
        &CommandContext::new(ACTOR_DEF_SYSTEM, now)
    ).map(|status| status.has_effect())
}


//------------ SoftDeadline --------------------------------------------------

/// A deadline that starts with the first real piece of work.
struct SoftDeadline {
    started: Mutex<Option<Instant>>,
    limit: Duration,
}

impl SoftDeadline {
    fn new(limit: Duration) -> Self {
        SoftDeadline { started: Mutex::new(None), limit }
    }

    fn start(&self) {
        self.started.lock().expect("poisoned lock").get_or_insert_with(
            Instant::now
        );
    }

    fn is_passed(&self) -> bool {
        self.started.lock().expect("poisoned lock").is_some_and(|started| {
            started.elapsed() > self.limit
        })
    }
}


//============ Tests =========================================================
