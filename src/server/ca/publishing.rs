//! Objects a CA publishes.
//!
//! The engine does not deliver anything to a repository. It keeps track
//! of what a CA wants to have published so that revoking a key can
//! withdraw everything it signed.

use chrono::{DateTime, Utc};
use rpki::crypto::KeyIdentifier;
use rpki::uri;


//------------ PublishedObjectStatus -----------------------------------------

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum PublishedObjectStatus {
    Published,
    Withdrawn(DateTime<Utc>),
}


//------------ PublishedObject -----------------------------------------------

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct PublishedObject {
    signing_key: KeyIdentifier,
    uri: uri::Rsync,
    status: PublishedObjectStatus,
    updated_at: DateTime<Utc>,
}

impl PublishedObject {
    pub fn signing_key(&self) -> KeyIdentifier {
        self.signing_key
    }

    pub fn uri(&self) -> &uri::Rsync {
        &self.uri
    }

    pub fn status(&self) -> PublishedObjectStatus {
        self.status
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    pub fn is_published(&self) -> bool {
        self.status == PublishedObjectStatus::Published
    }
}


//------------ PublishedObjects ----------------------------------------------

#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct PublishedObjects {
    objects: Vec<PublishedObject>,
}

impl PublishedObjects {
    pub fn iter(&self) -> impl Iterator<Item = &PublishedObject> {
        self.objects.iter()
    }

    pub fn published(&self) -> impl Iterator<Item = &PublishedObject> {
        self.objects.iter().filter(|obj| obj.is_published())
    }

    /// Publishes or updates the object at a URI.
    pub fn publish(
        &mut self,
        signing_key: KeyIdentifier,
        uri: uri::Rsync,
        now: DateTime<Utc>,
    ) {
        match self.objects.iter_mut().find(|obj| {
            obj.is_published() && obj.uri == uri
        }) {
            Some(obj) => {
                obj.signing_key = signing_key;
                obj.updated_at = now;
            }
            None => {
                self.objects.push(PublishedObject {
                    signing_key, uri,
                    status: PublishedObjectStatus::Published,
                    updated_at: now,
                })
            }
        }
    }

    /// Withdraws the object at a URI, if it is published.
    pub fn withdraw(&mut self, uri: &uri::Rsync, now: DateTime<Utc>) -> bool {
        let mut res = false;
        for obj in self.objects.iter_mut() {
            if obj.is_published() && obj.uri == *uri {
                obj.status = PublishedObjectStatus::Withdrawn(now);
                obj.updated_at = now;
                res = true;
            }
        }
        res
    }

    /// Withdraws all objects signed by a key.
    ///
    /// Returns the number of objects withdrawn.
    pub fn withdraw_for_key(
        &mut self, signing_key: KeyIdentifier, now: DateTime<Utc>
    ) -> usize {
        let mut count = 0;
        for obj in self.objects.iter_mut() {
            if obj.is_published() && obj.signing_key == signing_key {
                obj.status = PublishedObjectStatus::Withdrawn(now);
                obj.updated_at = now;
                count += 1;
            }
        }
        count
    }

    pub fn has_published_for_key(&self, signing_key: KeyIdentifier) -> bool {
        self.published().any(|obj| obj.signing_key == signing_key)
    }
}


//============ Tests =========================================================
