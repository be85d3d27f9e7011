//! The handlers a command passes through.
//!
//! Every command runs through the same pipeline: locking, the concurrent
//! modification check, the business logic for the command type, auditing
//! and, optionally, invariant checking. The [`CommandDispatcher`] decides
//! which handlers apply to a command and runs them in order.

use std::sync::Arc;
use crate::server::ca::CertificateRequestCreation;
use crate::server::saga::ChildParentCertificateUpdateSaga;
use crate::server::signer::KeyPairFactory;

mod dispatcher;
pub use self::dispatcher::{CommandDispatcher, CommandHandler, HandlerScope};

mod lock;
pub use self::lock::LockHandler;

mod conflict;
pub use self::conflict::ConcurrentModificationHandler;

mod audit;
pub use self::audit::AuditHandler;

mod invariant;
pub use self::invariant::{InvariantCheckHandler, violations};

mod activation;
pub use self::activation::ActivationHandler;

mod delete;
pub use self::delete::DeleteCertificateAuthorityHandler;

mod certificates;
pub use self::certificates::{
    ExpireOutgoingCertificatesHandler, IssueUpdatedManifestAndCrlHandler,
    UpdateAllIncomingCertificatesHandler,
};

mod keyroll;
pub use self::keyroll::{
    ActivatePendingKeysHandler, InitiateRollHandler, RevokeOldKeysHandler,
};

mod roa;
pub use self::roa::{
    UpdateIgnoredAnnouncementsHandler, UpdateRoaConfigurationHandler,
};

mod ta;
pub use self::ta::ProcessTrustAnchorResponseHandler;


//------------ CaServices ----------------------------------------------------

/// The collaborators the business handlers share.
pub struct CaServices {
    pub saga: ChildParentCertificateUpdateSaga,
    pub keys: Arc<dyn KeyPairFactory>,
    pub requests: CertificateRequestCreation,
}
