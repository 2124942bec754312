//! Metadata resolution with an explicitly owned, process-lifetime cache
//!
//! At most one network lookup per distinct key is outstanding at any time:
//! concurrent callers for the same key await the same shared future.
//! Successes are kept forever; failures are dropped so the next call asks
//! the catalog again.

#![allow(clippy::uninlined_format_args)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures::future::{BoxFuture, FutureExt, Shared};
use tracing::{debug, info};

use crate::domain::{normalize_text, CatalogRecord, LookupFailure};
use crate::infrastructure::CatalogClient;

type LookupOutcome = Result<Arc<CatalogRecord>, LookupFailure>;
type SharedLookup = Shared<BoxFuture<'static, LookupOutcome>>;

enum Slot {
    Ready(Arc<CatalogRecord>),
    Pending { ticket: u64, lookup: SharedLookup },
}

/// Cache counters, monotonically increasing
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Served from a cached success
    pub hits: u64,
    /// Network lookups started
    pub lookups: u64,
    /// Callers that joined a lookup already in flight
    pub coalesced: u64,
    /// Lookups that settled with a failure
    pub failures: u64,
}

/// Normalized lookup text -> record, or an in-flight lookup
#[derive(Default)]
pub struct RecordCache {
    slots: Mutex<HashMap<String, Slot>>,
    next_ticket: AtomicU64,
    hits: AtomicU64,
    lookups: AtomicU64,
    coalesced: AtomicU64,
    failures: AtomicU64,
}

impl RecordCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            lookups: self.lookups.load(Ordering::Relaxed),
            coalesced: self.coalesced.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
        }
    }

    /// Cached success for `key`, if any
    pub fn get(&self, key: &str) -> Option<Arc<CatalogRecord>> {
        match self.lock().get(key) {
            Some(Slot::Ready(record)) => Some(Arc::clone(record)),
            _ => None,
        }
    }

    /// Number of cached successes
    pub fn len(&self) -> usize {
        self.lock()
            .values()
            .filter(|slot| matches!(slot, Slot::Ready(_)))
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn in_flight(&self) -> usize {
        self.lock()
            .values()
            .filter(|slot| matches!(slot, Slot::Pending { .. }))
            .count()
    }

    // The map holds no invariants a panicking holder could break halfway
    fn lock(&self) -> MutexGuard<'_, HashMap<String, Slot>> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Store the outcome of lookup `ticket` unless the slot moved on already
    fn settle(&self, key: &str, ticket: u64, outcome: &LookupOutcome) {
        let mut slots = self.lock();
        let current = matches!(slots.get(key), Some(Slot::Pending { ticket: t, .. }) if *t == ticket);
        if !current {
            return;
        }
        match outcome {
            Ok(record) => {
                slots.insert(key.to_string(), Slot::Ready(Arc::clone(record)));
            }
            Err(_) => {
                slots.remove(key);
                self.failures.fetch_add(1, Ordering::Relaxed);
            }
        }
    }
}

/// Resolves free text to catalog records through the cache
pub struct MetadataResolver {
    client: Arc<dyn CatalogClient>,
    cache: RecordCache,
}

impl MetadataResolver {
    pub fn new(client: Arc<dyn CatalogClient>) -> Self {
        info!("MetadataResolver created with {} client", client.name());
        Self {
            client,
            cache: RecordCache::new(),
        }
    }

    pub const fn cache(&self) -> &RecordCache {
        &self.cache
    }

    /// Cache key for raw entry text
    pub fn cache_key(text: &str) -> String {
        normalize_text(text)
    }

    /// Resolve `text` to its catalog record
    ///
    /// Cached successes return without a network call; a lookup already in
    /// flight for the same key is joined instead of duplicated.
    pub async fn resolve(&self, text: &str) -> Result<Arc<CatalogRecord>, LookupFailure> {
        let key = Self::cache_key(text);
        if key.is_empty() {
            return Err(LookupFailure::EmptyQuery);
        }

        let (ticket, lookup) = {
            let mut slots = self.cache.lock();
            match slots.get(&key) {
                Some(Slot::Ready(record)) => {
                    self.cache.hits.fetch_add(1, Ordering::Relaxed);
                    debug!("Cache hit for \"{}\"", key);
                    return Ok(Arc::clone(record));
                }
                Some(Slot::Pending { ticket, lookup }) => {
                    self.cache.coalesced.fetch_add(1, Ordering::Relaxed);
                    debug!("Joining in-flight lookup for \"{}\"", key);
                    (*ticket, lookup.clone())
                }
                None => {
                    let ticket = self.cache.next_ticket.fetch_add(1, Ordering::Relaxed);
                    let lookup = self.start_lookup(key.clone());
                    self.cache.lookups.fetch_add(1, Ordering::Relaxed);
                    slots.insert(
                        key.clone(),
                        Slot::Pending {
                            ticket,
                            lookup: lookup.clone(),
                        },
                    );
                    (ticket, lookup)
                }
            }
        };

        let outcome = lookup.await;
        self.cache.settle(&key, ticket, &outcome);
        outcome
    }

    fn start_lookup(&self, key: String) -> SharedLookup {
        let client = Arc::clone(&self.client);
        async move { client.search(&key).await.map(Arc::new) }
            .boxed()
            .shared()
    }
}
