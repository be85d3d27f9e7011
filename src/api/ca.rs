//! Identities and certificate data of certificate authorities.

use std::fmt;
use chrono::{DateTime, Datelike, TimeZone, Utc};
use rpki::crypto::KeyIdentifier;
use rpki::repository::resources::ResourceSet;
use rpki::uri;
use serde::{Deserialize, Serialize};


//------------ CaId ----------------------------------------------------------

/// The stable identifier of a certificate authority.
#[derive(
    Clone, Copy, Debug, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd,
    Serialize,
)]
#[serde(transparent)]
pub struct CaId(u64);

impl CaId {
    pub const fn new(id: u64) -> Self {
        CaId(id)
    }

    pub fn into_u64(self) -> u64 {
        self.0
    }
}

impl From<u64> for CaId {
    fn from(id: u64) -> Self {
        CaId(id)
    }
}

impl fmt::Display for CaId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        self.0.fmt(f)
    }
}


//------------ VersionedId ---------------------------------------------------

/// A CA identifier together with the version of the CA it refers to.
///
/// The version is used for optimistic concurrency: a command carries the
/// version its author last saw, and commits since then are checked for
/// conflicts before the command is applied.
#[derive(
    Clone, Copy, Debug, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd,
    Serialize,
)]
pub struct VersionedId {
    id: CaId,
    version: u64,
}

impl VersionedId {
    pub fn new(id: CaId, version: u64) -> Self {
        VersionedId { id, version }
    }

    /// The identity of a CA that does not exist yet.
    pub fn initial(id: CaId) -> Self {
        VersionedId { id, version: 0 }
    }

    pub fn id(&self) -> CaId {
        self.id
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn next(&self) -> Self {
        VersionedId { id: self.id, version: self.version + 1 }
    }
}

impl fmt::Display for VersionedId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}:{}", self.id, self.version)
    }
}


//------------ CaName --------------------------------------------------------

/// The distinguished name of a CA, e.g. `CN=production`.
#[derive(
    Clone, Debug, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd,
    Serialize,
)]
#[serde(transparent)]
pub struct CaName(String);

impl CaName {
    pub fn new(name: impl Into<String>) -> Self {
        CaName(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for CaName {
    fn from(name: &str) -> Self {
        CaName(name.to_string())
    }
}

impl fmt::Display for CaName {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(&self.0)
    }
}


//------------ CaType --------------------------------------------------------

/// The kind of a certificate authority.
#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, PartialEq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CaType {
    /// Holds all resources, certified by an offline trust anchor.
    AllResources,

    /// The production CA that delegates to members.
    Root,

    /// A managed CA between the production CA and members.
    Intermediate,

    /// A member CA whose keys we hold.
    Hosted,

    /// A member CA that holds its own keys.
    NonHosted,
}

impl CaType {
    /// Returns whether CAs of this type keep their keys here.
    pub fn is_managed(self) -> bool {
        !matches!(self, CaType::NonHosted)
    }

    /// Returns whether CAs of this type may issue to children.
    pub fn is_parent(self) -> bool {
        matches!(
            self,
            CaType::AllResources | CaType::Root | CaType::Intermediate
        )
    }
}

impl fmt::Display for CaType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(match self {
            CaType::AllResources => "ALL_RESOURCES",
            CaType::Root => "ROOT",
            CaType::Intermediate => "INTERMEDIATE",
            CaType::Hosted => "HOSTED",
            CaType::NonHosted => "NONHOSTED",
        })
    }
}


//------------ KeyPairStatus -------------------------------------------------

/// The life cycle state of a key pair.
#[derive(
    Clone, Copy, Debug, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd,
    Serialize,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum KeyPairStatus {
    Pending,
    Current,
    Old,
}

impl fmt::Display for KeyPairStatus {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(match self {
            KeyPairStatus::Pending => "PENDING",
            KeyPairStatus::Current => "CURRENT",
            KeyPairStatus::Old => "OLD",
        })
    }
}


//------------ ValidityPeriod ------------------------------------------------

/// The validity period of a certificate.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct ValidityPeriod {
    not_before: DateTime<Utc>,
    not_after: DateTime<Utc>,
}

impl ValidityPeriod {
    pub fn new(not_before: DateTime<Utc>, not_after: DateTime<Utc>) -> Self {
        ValidityPeriod { not_before, not_after }
    }

    /// The validity of a CA certificate issued at `now`.
    ///
    /// Certificates are valid until the end of the year plus a grace
    /// period of six months, i.e., until the first of July next year.
    pub fn for_ca_certificate(now: DateTime<Utc>) -> Self {
        let not_after = Utc
            .with_ymd_and_hms(now.year() + 1, 7, 1, 0, 0, 0)
            .single()
            .unwrap_or(now);
        ValidityPeriod { not_before: now, not_after }
    }

    pub fn not_before(&self) -> DateTime<Utc> {
        self.not_before
    }

    pub fn not_after(&self) -> DateTime<Utc> {
        self.not_after
    }

    pub fn contains(&self, time: DateTime<Utc>) -> bool {
        self.not_before <= time && time <= self.not_after
    }
}

impl fmt::Display for ValidityPeriod {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f, "{} - {}",
            self.not_before.to_rfc3339(), self.not_after.to_rfc3339()
        )
    }
}


//------------ SubjectInformationAccess --------------------------------------

/// The SIA of a CA certificate.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct SubjectInformationAccess {
    /// The directory where the CA publishes its products.
    pub ca_repository: uri::Rsync,

    /// The manifest of the key this certificate is for.
    pub rpki_manifest: uri::Rsync,

    /// The RRDP notification file, if RRDP is used.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rpki_notify: Option<uri::Https>,
}

impl fmt::Display for SubjectInformationAccess {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "repo: {}, mft: {}", self.ca_repository, self.rpki_manifest)?;
        if let Some(notify) = &self.rpki_notify {
            write!(f, ", notify: {}", notify)?;
        }
        Ok(())
    }
}


//------------ ResourceCertificate -------------------------------------------

/// An issued resource certificate.
///
/// The engine does not sign anything itself, so this holds the contents
/// of a certificate rather than its encoding.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct ResourceCertificate {
    pub serial: u64,
    pub subject_name: String,
    pub subject_key: KeyIdentifier,
    pub issuer_key: KeyIdentifier,
    pub resources: ResourceSet,
    pub validity: ValidityPeriod,
    pub sia: SubjectInformationAccess,

    /// The location of the issuer's own certificate.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub issuer_certificate_uri: Option<uri::Rsync>,
}

impl ResourceCertificate {
    pub fn is_valid_at(&self, time: DateTime<Utc>) -> bool {
        self.validity.contains(time)
    }
}

impl fmt::Display for ResourceCertificate {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f, "serial {} for key {} signed by {}, resources '{}'",
            self.serial, self.subject_key, self.issuer_key, self.resources
        )
    }
}


//============ Tests =========================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ca_certificate_valid_until_july_next_year() {
        let now = Utc.with_ymd_and_hms(2024, 3, 15, 12, 0, 0).unwrap();
        let validity = ValidityPeriod::for_ca_certificate(now);
        assert_eq!(validity.not_before(), now);
        assert_eq!(
            validity.not_after(),
            Utc.with_ymd_and_hms(2025, 7, 1, 0, 0, 0).unwrap()
        );
        assert!(validity.contains(now));
    }

    #[test]
    fn versioned_id_display() {
        let id = VersionedId::new(CaId::new(42), 7);
        assert_eq!(id.to_string(), "42:7");
        assert_eq!(id.next().version(), 8);
    }
}
