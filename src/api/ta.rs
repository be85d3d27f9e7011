//! Requests to and responses from the offline trust anchor.
//!
//! The all-resources CA has no parent inside the engine. Its certificates
//! are signed by an offline trust anchor which is reached through an
//! exchange of request and response files.

use std::collections::HashMap;
use std::fmt;
use chrono::{DateTime, Utc};
use rpki::crypto::KeyIdentifier;
use rpki::repository::resources::ResourceSet;
use rpki::uri;
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use super::ca::ResourceCertificate;


//------------ SigningRequest ------------------------------------------------

/// A request to sign a certificate for one of our keys.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct SigningRequest {
    pub resource_class: String,
    pub subject_name: String,
    pub subject_key: KeyIdentifier,
    pub resources: ResourceSet,
    pub sia_ca_repository: uri::Rsync,
    pub sia_manifest: uri::Rsync,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub sia_notify: Option<uri::Https>,
}


//------------ TaRequest -----------------------------------------------------

/// A single request contained in a trust anchor request.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case", tag = "type")]
pub enum TaRequest {
    Signing(SigningRequest),
    Revocation {
        resource_class: String,
        key: KeyIdentifier,
    },
}

impl TaRequest {
    pub fn key(&self) -> KeyIdentifier {
        match self {
            TaRequest::Signing(req) => req.subject_key,
            TaRequest::Revocation { key, .. } => *key,
        }
    }
}

impl fmt::Display for TaRequest {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            TaRequest::Signing(req) => {
                write!(f, "sign key {} for '{}'", req.subject_key, req.resources)
            }
            TaRequest::Revocation { key, .. } => {
                write!(f, "revoke key {key}")
            }
        }
    }
}


//------------ TrustAnchorRequest --------------------------------------------

/// A batch of requests for the offline trust anchor.
///
/// The all-resources CA keeps at most one of these pending. It is cleared
/// when the matching response is processed.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct TrustAnchorRequest {
    pub request_id: Uuid,
    pub creation_time: DateTime<Utc>,
    pub ta_repository_uri: uri::Rsync,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub notification_uri: Option<uri::Https>,

    pub public_repository_uri: uri::Rsync,
    pub requests: Vec<TaRequest>,
}

impl TrustAnchorRequest {
    /// Returns whether the batch contains a request for the given key.
    pub fn contains_key(&self, key: KeyIdentifier) -> bool {
        self.requests.iter().any(|req| req.key() == key)
    }
}


//------------ TrustAnchorResponse -------------------------------------------

/// The trust anchor's answer to a [`TrustAnchorRequest`].
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct TrustAnchorResponse {
    pub request_id: Uuid,

    /// Signed certificates by subject key.
    #[serde(default)]
    pub issued: HashMap<KeyIdentifier, IssuedCertificate>,

    /// Keys for which all certificates were revoked.
    #[serde(default)]
    pub revoked: Vec<KeyIdentifier>,
}


//------------ IssuedCertificate ---------------------------------------------

/// A certificate signed by the trust anchor and where it is published.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct IssuedCertificate {
    pub certificate: ResourceCertificate,
    pub publication_uri: uri::Rsync,
}


//============ Tests =========================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test;

    #[test]
    fn ta_request_serialize() {
        let key = test::key_identifier(1);
        let request = TaRequest::Revocation {
            resource_class: "DEFAULT".into(),
            key,
        };
        let json = serde_json::to_string(&request).unwrap();
        assert!(json.contains("\"type\":\"revocation\""));
        let parsed: TaRequest = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, request);
        assert_eq!(parsed.key(), key);
    }
}
