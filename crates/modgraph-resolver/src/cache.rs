//! Fetch caches with at most one in-flight fetch per key.
//!
//! A cache may be shared between resolution runs. Successful results are
//! kept. Errors, empty listings and lookups that found nothing are dropped
//! as soon as the fetch completes, so a later run asks the sources again.

use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures_util::future::{BoxFuture, FutureExt, Shared};
use modgraph_core::module::{ArtifactIdentifier, ModuleIdentity};

use crate::metadata::ComponentMetadata;
use crate::source::SourceError;

/// Map from key to a shared future; later callers attach to the first
/// caller's fetch instead of starting their own.
pub struct SingleFlight<K, V> {
    entries: Mutex<HashMap<K, Shared<BoxFuture<'static, V>>>>,
}

impl<K, V> Default for SingleFlight<K, V> {
    fn default() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }
}

impl<K, V> SingleFlight<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the cached or in-flight value for `key`, starting `fetch` only
    /// if neither exists.
    pub async fn get_or_fetch<F, Fut>(&self, key: K, fetch: F) -> V
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = V> + Send + 'static,
    {
        self.get_or_fetch_retaining(key, fetch, |_| true).await
    }

    /// Like [`get_or_fetch`](Self::get_or_fetch), but drops the entry once
    /// the fetch completes if `retain` rejects its value. Only the fetch that
    /// produced the value is dropped; a newer one started for the same key
    /// in the meantime stays.
    pub async fn get_or_fetch_retaining<F, Fut, R>(&self, key: K, fetch: F, retain: R) -> V
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = V> + Send + 'static,
        R: FnOnce(&V) -> bool,
    {
        let shared = self
            .lock()
            .entry(key.clone())
            .or_insert_with(|| fetch().boxed().shared())
            .clone();
        let value = shared.clone().await;
        if !retain(&value) {
            let mut entries = self.lock();
            if entries
                .get(&key)
                .is_some_and(|current| Shared::ptr_eq(current, &shared))
            {
                entries.remove(&key);
            }
        }
        value
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<K, Shared<BoxFuture<'static, V>>>> {
        // The map is never left half-updated, so a poisoned lock is still usable.
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

pub type VersionListing = Result<Arc<Vec<String>>, SourceError>;
pub type ComponentLookup = Result<Option<Arc<ComponentMetadata>>, SourceError>;
pub type ArtifactLookup = Result<Option<PathBuf>, SourceError>;

/// Cached metadata lookups for one repository chain.
#[derive(Default)]
pub struct MetadataCache {
    pub(crate) versions: SingleFlight<ModuleIdentity, VersionListing>,
    /// Keyed by module and selector notation.
    pub(crate) components: SingleFlight<(ModuleIdentity, String), ComponentLookup>,
}

impl MetadataCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cached_listings(&self) -> usize {
        self.versions.len()
    }

    pub fn cached_components(&self) -> usize {
        self.components.len()
    }
}

/// Cached artifact files for one set of artifact sources.
#[derive(Default)]
pub struct ArtifactCache {
    pub(crate) files: SingleFlight<ArtifactIdentifier, ArtifactLookup>,
}

impl ArtifactCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}
