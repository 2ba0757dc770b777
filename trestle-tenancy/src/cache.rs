//! Cached tenant resolution
//!
//! [`CachingTenantResolver`] wraps any [`TenantResolver`] and keeps one
//! [`TenantContext`] per tenant, shared by every request for that tenant until
//! it expires or is evicted. Entries are stored once under the tenant id and
//! reached through an alias table holding the request key plus every
//! identifier the tenant is known by.
//!
//! Expiry is sliding: every hit pushes the deadline out by
//! [`TenantCacheOptions::sliding_expiration`]. With
//! [`TenantCacheOptions::evict_all_on_expiry`] set, the first entry found
//! expired takes every other entry with it.

use crate::context::TenantContext;
use crate::resolver::{TenantError, TenantResolver};
use crate::tenant::Tenant;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use parking_lot::{Mutex, RwLock};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::OnceCell;
use tokio::time::Instant;
use trestle_core::{Disposable, HttpRequest};
use trestle_data::DataError;
use trestle_log::{debug, info, trace};

const DEFAULT_SLIDING_EXPIRATION: Duration = Duration::from_secs(60 * 60);

/// Cache tuning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TenantCacheOptions {
    /// Idle time after which an entry expires.
    pub sliding_expiration: Duration,
    /// Expire every entry as soon as one of them expires.
    pub evict_all_on_expiry: bool,
}

impl Default for TenantCacheOptions {
    fn default() -> Self {
        Self {
            sliding_expiration: DEFAULT_SLIDING_EXPIRATION,
            evict_all_on_expiry: false,
        }
    }
}

impl TenantCacheOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_sliding_expiration(mut self, sliding_expiration: Duration) -> Self {
        self.sliding_expiration = sliding_expiration;
        self
    }

    pub fn with_evict_all_on_expiry(mut self, evict_all: bool) -> Self {
        self.evict_all_on_expiry = evict_all;
        self
    }
}

/// Observer notified before an evicted context is disposed.
pub trait EvictionListener: Send + Sync {
    fn on_evicted(&self, context: &TenantContext);
}

struct CacheEntry {
    context: Arc<TenantContext>,
    last_access: Mutex<Instant>,
    generation: u64,
    aliases: Mutex<Vec<String>>,
}

impl CacheEntry {
    fn touch(&self) {
        *self.last_access.lock() = Instant::now();
    }

    fn idle(&self) -> Duration {
        self.last_access.lock().elapsed()
    }
}

type Inflight = Arc<OnceCell<Option<Arc<TenantContext>>>>;

/// Cache-aside tenant resolver.
///
/// ```
/// use std::sync::Arc;
/// use std::time::Duration;
/// use trestle_core::HttpRequest;
/// use trestle_tenancy::{
///     CachingTenantResolver, HostTenantResolver, InMemoryTenantStore, Tenant,
///     TenantCacheOptions, TenantStore,
/// };
///
/// # tokio_test::block_on(async {
/// let store: Arc<dyn TenantStore> = Arc::new(InMemoryTenantStore::with_tenants([
///     Tenant::new("acme", "acme").with_hostname("acme.example.com"),
/// ]));
/// let resolver = CachingTenantResolver::new(
///     HostTenantResolver::new(store),
///     TenantCacheOptions::new().with_sliding_expiration(Duration::from_secs(600)),
/// );
///
/// let request = HttpRequest::new("GET".into(), "/".into()).with_header("Host", "acme.example.com");
/// let context = resolver.resolve_context(&request).await.unwrap().unwrap();
/// assert_eq!(context.tenant_id(), "acme");
/// # });
/// ```
pub struct CachingTenantResolver<R: TenantResolver> {
    inner: R,
    options: TenantCacheOptions,
    aliases: DashMap<String, String>,
    entries: DashMap<String, Arc<CacheEntry>>,
    inflight: DashMap<String, Inflight>,
    generation: AtomicU64,
    listeners: RwLock<Vec<Arc<dyn EvictionListener>>>,
    backend_calls: AtomicU64,
}

impl<R: TenantResolver> CachingTenantResolver<R> {
    pub fn new(inner: R, options: TenantCacheOptions) -> Self {
        Self {
            inner,
            options,
            aliases: DashMap::new(),
            entries: DashMap::new(),
            inflight: DashMap::new(),
            generation: AtomicU64::new(0),
            listeners: RwLock::new(Vec::new()),
            backend_calls: AtomicU64::new(0),
        }
    }

    pub fn inner(&self) -> &R {
        &self.inner
    }

    pub fn options(&self) -> &TenantCacheOptions {
        &self.options
    }

    /// Register an observer for evicted contexts.
    pub fn add_eviction_listener(&self, listener: Arc<dyn EvictionListener>) {
        self.listeners.write().push(listener);
    }

    /// Resolve the request's tenant context.
    ///
    /// Returns `Ok(None)` when the request carries no tenant key or the
    /// wrapped resolver finds no (active) tenant. Misses are coalesced per
    /// request key, so concurrent requests share one backend lookup.
    pub async fn resolve_context(
        &self,
        request: &HttpRequest,
    ) -> Result<Option<Arc<TenantContext>>, TenantError> {
        let Some(key) = self.inner.request_key(request) else {
            trace!("Request {} {} carries no tenant key", request.method, request.path);
            return Ok(None);
        };

        if let Some(context) = self.lookup(&key) {
            trace!("Tenant cache hit for '{}'", key);
            return Ok(Some(context));
        }

        tokio::select! {
            biased;
            _ = request.cancellation().cancelled() => Err(TenantError::Data(DataError::Cancelled)),
            outcome = self.resolve_coalesced(request, &key) => outcome,
        }
    }

    async fn resolve_coalesced(
        &self,
        request: &HttpRequest,
        key: &str,
    ) -> Result<Option<Arc<TenantContext>>, TenantError> {
        let cell = self
            .inflight
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(OnceCell::new()))
            .clone();
        let generation = self.generation.load(Ordering::Acquire);

        let outcome = cell
            .get_or_try_init(|| self.load(request, key, generation))
            .await
            .cloned();

        self.inflight
            .remove_if(key, |_, current| Arc::ptr_eq(current, &cell));
        outcome
    }

    async fn load(
        &self,
        request: &HttpRequest,
        key: &str,
        generation: u64,
    ) -> Result<Option<Arc<TenantContext>>, TenantError> {
        // a flight that finished since our lookup may already have stored it
        if let Some(context) = self.lookup(key) {
            return Ok(Some(context));
        }
        self.backend_calls.fetch_add(1, Ordering::Relaxed);
        debug!("Tenant cache miss for '{}'", key);

        match self.inner.resolve(request).await? {
            Some(tenant) => Ok(Some(self.store(tenant, key, generation))),
            None => Ok(None),
        }
    }

    fn lookup(&self, key: &str) -> Option<Arc<TenantContext>> {
        let id = self.aliases.get(key).map(|alias| alias.value().clone())?;
        let entry = self.entries.get(&id).map(|entry| entry.value().clone());

        match entry {
            None => {
                self.aliases.remove_if(key, |_, target| *target == id);
                None
            }
            Some(entry) if self.is_expired(&entry) => {
                self.expire(&id, &entry);
                None
            }
            Some(entry) => {
                entry.touch();
                Some(entry.context.clone())
            }
        }
    }

    fn store(&self, tenant: Tenant, key: &str, generation: u64) -> Arc<TenantContext> {
        let id = tenant.id.clone();

        loop {
            match self.entries.entry(id.clone()) {
                Entry::Occupied(occupied) => {
                    let existing = occupied.get().clone();
                    drop(occupied);

                    if self.is_expired(&existing) {
                        self.expire(&id, &existing);
                        continue;
                    }
                    existing.touch();
                    existing.aliases.lock().push(key.to_string());
                    self.aliases.insert(key.to_string(), id);
                    return existing.context.clone();
                }
                Entry::Vacant(vacant) => {
                    let mut aliases: Vec<String> = Vec::new();
                    for alias in std::iter::once(key).chain(tenant.identifiers()) {
                        if !aliases.iter().any(|known| known == alias) {
                            aliases.push(alias.to_string());
                        }
                    }

                    let entry = Arc::new(CacheEntry {
                        context: Arc::new(TenantContext::new(tenant)),
                        last_access: Mutex::new(Instant::now()),
                        generation,
                        aliases: Mutex::new(aliases.clone()),
                    });
                    vacant.insert(entry.clone());

                    for alias in aliases {
                        self.aliases.insert(alias, id.clone());
                    }
                    debug!("Cached tenant '{}' as context {}", id, entry.context.id());
                    return entry.context.clone();
                }
            }
        }
    }

    fn is_expired(&self, entry: &CacheEntry) -> bool {
        entry.generation < self.generation.load(Ordering::Acquire)
            || entry.idle() >= self.options.sliding_expiration
    }

    fn expire(&self, id: &str, entry: &Arc<CacheEntry>) {
        if !self.remove_entry(id, Some(entry)) {
            return;
        }
        debug!("Tenant '{}' expired from cache", id);

        if self.options.evict_all_on_expiry {
            self.generation.fetch_add(1, Ordering::AcqRel);
            let evicted = self.clear();
            if evicted > 0 {
                info!(
                    "Expiry of tenant '{}' evicted {} other cached tenants",
                    id, evicted
                );
            }
        }
    }

    fn remove_entry(&self, id: &str, expected: Option<&Arc<CacheEntry>>) -> bool {
        let removed = match expected {
            Some(expected) => self
                .entries
                .remove_if(id, |_, current| Arc::ptr_eq(current, expected)),
            None => self.entries.remove(id),
        };
        let Some((_, entry)) = removed else {
            return false;
        };

        let aliases = std::mem::take(&mut *entry.aliases.lock());
        for alias in aliases {
            self.aliases.remove_if(&alias, |_, target| target == id);
        }
        self.retire(&entry);
        true
    }

    fn retire(&self, entry: &CacheEntry) {
        let listeners = self.listeners.read().clone();
        for listener in listeners {
            listener.on_evicted(&entry.context);
        }
        entry.context.dispose();
    }

    /// Evict a tenant now. Returns whether it was cached.
    pub fn evict(&self, tenant_id: &str) -> bool {
        let evicted = self.remove_entry(tenant_id, None);
        if evicted {
            debug!("Evicted tenant '{}' from cache", tenant_id);
        }
        evicted
    }

    /// Evict everything. Returns the number of tenants evicted.
    pub fn clear(&self) -> usize {
        let ids: Vec<String> = self.entries.iter().map(|entry| entry.key().clone()).collect();
        ids.iter().filter(|id| self.remove_entry(id, None)).count()
    }

    /// Evict every expired entry. Returns the number removed, including
    /// entries taken down by `evict_all_on_expiry`.
    pub fn purge_expired(&self) -> usize {
        let before = self.entries.len();
        let expired: Vec<(String, Arc<CacheEntry>)> = self
            .entries
            .iter()
            .filter(|entry| self.is_expired(entry.value()))
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect();

        for (id, entry) in &expired {
            self.expire(id, entry);
        }
        before.saturating_sub(self.entries.len())
    }

    pub fn contains(&self, tenant_id: &str) -> bool {
        self.entries.contains_key(tenant_id)
    }

    /// Number of cached tenants.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// How many times the wrapped resolver has been consulted.
    pub fn backend_calls(&self) -> u64 {
        self.backend_calls.load(Ordering::Relaxed)
    }
}
