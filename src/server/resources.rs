//! Looking up the resources a CA may have certified.

use std::collections::HashMap;
use std::sync::RwLock;
use rpki::repository::resources::ResourceSet;
use crate::api::ca::CaName;


//------------ ResourceLookup ------------------------------------------------

/// Provides the resources each CA is entitled to.
pub trait ResourceLookup: Send + Sync {
    /// Returns the certifiable resources of a CA.
    ///
    /// Returns `None` if the information is not available, e.g. because
    /// the cache was not populated yet. This is different from a CA that
    /// holds no resources, which gets an empty set.
    fn certifiable_resources(&self, ca: &CaName) -> Option<ResourceSet>;
}


//------------ MemoryResourceCache -------------------------------------------

/// A resource cache kept in memory.
///
/// CAs without an explicit entry hold nothing once the cache is loaded.
#[derive(Debug, Default)]
pub struct MemoryResourceCache {
    inner: RwLock<CacheContent>,
}

#[derive(Debug, Default)]
struct CacheContent {
    loaded: bool,
    resources: HashMap<CaName, ResourceSet>,
}

impl MemoryResourceCache {
    /// Creates a cache that is already loaded but empty.
    pub fn loaded() -> Self {
        let res = Self::default();
        res.set_loaded(true);
        res
    }

    pub fn set_loaded(&self, loaded: bool) {
        self.inner.write().expect("poisoned lock").loaded = loaded;
    }

    pub fn update(&self, ca: CaName, resources: ResourceSet) {
        let mut inner = self.inner.write().expect("poisoned lock");
        inner.loaded = true;
        inner.resources.insert(ca, resources);
    }

    pub fn remove(&self, ca: &CaName) {
        self.inner.write().expect("poisoned lock").resources.remove(ca);
    }
}

impl ResourceLookup for MemoryResourceCache {
    fn certifiable_resources(&self, ca: &CaName) -> Option<ResourceSet> {
        let inner = self.inner.read().expect("poisoned lock");
        if !inner.loaded {
            return None
        }
        Some(inner.resources.get(ca).cloned().unwrap_or_default())
    }
}


//============ Tests =========================================================
