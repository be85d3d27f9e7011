//! Certificate Authority related code.
//!
mod certauth;
pub use self::certauth::{
    CaKind, CertificateAuthority, ManagedCa, NonHostedCa, NonHostedKey,
};

mod certificates;
pub use self::certificates::*;

mod events;
pub use self::events::*;

mod keys;
pub use self::keys::*;

mod publishing;
pub use self::publishing::*;

mod requests;
pub use self::requests::CertificateRequestCreation;
