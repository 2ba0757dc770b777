//! Tenant Resolution
//!
//! Strategies for resolving tenant from HTTP requests.

use crate::tenant::Tenant;
use async_trait::async_trait;
use parking_lot::RwLock;
use regex::Regex;
use std::collections::HashMap;
use std::sync::Arc;
use trestle_core::HttpRequest;
use trestle_data::DataError;
use trestle_log::debug;

/// Tenant resolution errors
#[derive(Debug, thiserror::Error)]
pub enum TenantError {
    #[error("Invalid tenant identifier: {0}")]
    Invalid(String),

    #[error("Tenant resolution failed: {0}")]
    ResolutionFailed(String),

    #[error("Tenant '{0}' is inactive")]
    Inactive(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Data(#[from] DataError),
}

impl From<TenantError> for trestle_core::Error {
    fn from(err: TenantError) -> Self {
        use trestle_core::Error;
        match err {
            TenantError::Invalid(_) => Error::BadRequest(err.to_string()),
            TenantError::Inactive(_) => Error::Forbidden(err.to_string()),
            TenantError::Data(data) => data.into(),
            TenantError::ResolutionFailed(_) | TenantError::Storage(_) => {
                Error::ServiceUnavailable(err.to_string())
            }
            TenantError::Config(_) => Error::Internal(err.to_string()),
        }
    }
}

/// Tenant registry lookups (implement with your database)
#[async_trait]
pub trait TenantStore: Send + Sync {
    /// Find tenant by ID
    async fn find_by_id(&self, id: &str) -> Result<Option<Tenant>, TenantError>;

    /// Find tenant by name/slug
    async fn find_by_name(&self, name: &str) -> Result<Option<Tenant>, TenantError>;

    /// Find tenant serving a host name
    async fn find_by_hostname(&self, hostname: &str) -> Result<Option<Tenant>, TenantError>;
}

/// Tenant registry held in memory, typically built from configuration.
#[derive(Default)]
pub struct InMemoryTenantStore {
    tenants: RwLock<HashMap<String, Tenant>>,
}

impl InMemoryTenantStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_tenants(tenants: impl IntoIterator<Item = Tenant>) -> Self {
        let store = Self::new();
        for tenant in tenants {
            store.insert(tenant);
        }
        store
    }

    /// Add or replace a tenant.
    pub fn insert(&self, mut tenant: Tenant) {
        tenant.normalize();
        self.tenants.write().insert(tenant.id.clone(), tenant);
    }

    pub fn remove(&self, id: &str) -> Option<Tenant> {
        self.tenants.write().remove(id)
    }

    pub fn len(&self) -> usize {
        self.tenants.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.tenants.read().is_empty()
    }
}

#[async_trait]
impl TenantStore for InMemoryTenantStore {
    async fn find_by_id(&self, id: &str) -> Result<Option<Tenant>, TenantError> {
        Ok(self.tenants.read().get(id).cloned())
    }

    async fn find_by_name(&self, name: &str) -> Result<Option<Tenant>, TenantError> {
        Ok(self
            .tenants
            .read()
            .values()
            .find(|t| t.name == name)
            .cloned())
    }

    async fn find_by_hostname(&self, hostname: &str) -> Result<Option<Tenant>, TenantError> {
        Ok(self
            .tenants
            .read()
            .values()
            .find(|t| t.serves_host(hostname))
            .cloned())
    }
}

/// Tenant resolver trait
///
/// A resolver derives a key from the request (host, header value, path
/// segment) and looks the tenant up by it. A request that names no known
/// tenant resolves to `Ok(None)`; errors are reserved for backend failures.
#[async_trait]
pub trait TenantResolver: Send + Sync {
    /// Key naming the tenant this request addresses, or `None` if the request
    /// carries none. Requests with equal keys resolve to the same tenant.
    fn request_key(&self, request: &HttpRequest) -> Option<String>;

    /// Resolve tenant from request
    async fn resolve(&self, request: &HttpRequest) -> Result<Option<Tenant>, TenantError>;
}

fn only_active(tenant: Option<Tenant>, key: &str) -> Option<Tenant> {
    match tenant {
        Some(tenant) if !tenant.active => {
            debug!("Tenant '{}' for key '{}' is inactive", tenant.id, key);
            None
        }
        other => other,
    }
}

/// Host-based tenant resolver
///
/// Resolves the tenant whose host names include the request's `Host`.
pub struct HostTenantResolver {
    store: Arc<dyn TenantStore>,
}

impl HostTenantResolver {
    pub fn new(store: Arc<dyn TenantStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl TenantResolver for HostTenantResolver {
    fn request_key(&self, request: &HttpRequest) -> Option<String> {
        request.host()
    }

    async fn resolve(&self, request: &HttpRequest) -> Result<Option<Tenant>, TenantError> {
        let Some(host) = self.request_key(request) else {
            return Ok(None);
        };
        let tenant = self.store.find_by_hostname(&host).await?;
        Ok(only_active(tenant, &host))
    }
}

/// Subdomain-based tenant resolver
///
/// Resolves tenant from subdomain (e.g., `acme.example.com` -> tenant "acme").
pub struct SubdomainTenantResolver {
    store: Arc<dyn TenantStore>,
    base_domain: String,
}

impl SubdomainTenantResolver {
    /// Create new subdomain-based resolver
    ///
    /// # Examples
    ///
    /// ```
    /// use trestle_tenancy::{InMemoryTenantStore, SubdomainTenantResolver, TenantStore};
    /// use std::sync::Arc;
    ///
    /// let store: Arc<dyn TenantStore> = Arc::new(InMemoryTenantStore::new());
    /// let resolver = SubdomainTenantResolver::new(store, "example.com");
    /// ```
    pub fn new(store: Arc<dyn TenantStore>, base_domain: impl Into<String>) -> Self {
        Self {
            store,
            base_domain: base_domain.into().to_lowercase(),
        }
    }

    /// Extract subdomain from a normalized host
    fn extract_subdomain(&self, host: &str) -> Option<String> {
        let subdomain = host.strip_suffix(&self.base_domain)?.strip_suffix('.')?;
        if !subdomain.is_empty() && !subdomain.contains('.') {
            Some(subdomain.to_string())
        } else {
            None
        }
    }
}

#[async_trait]
impl TenantResolver for SubdomainTenantResolver {
    fn request_key(&self, request: &HttpRequest) -> Option<String> {
        self.extract_subdomain(&request.host()?)
    }

    async fn resolve(&self, request: &HttpRequest) -> Result<Option<Tenant>, TenantError> {
        let Some(subdomain) = self.request_key(request) else {
            return Ok(None);
        };
        let tenant = self.store.find_by_name(&subdomain).await?;
        Ok(only_active(tenant, &subdomain))
    }
}

/// Header-based tenant resolver
///
/// Resolves tenant from a request header (e.g., `X-Tenant-ID`).
pub struct HeaderTenantResolver {
    store: Arc<dyn TenantStore>,
    header_name: String,
}

impl HeaderTenantResolver {
    pub fn new(store: Arc<dyn TenantStore>, header_name: impl Into<String>) -> Self {
        Self {
            store,
            header_name: header_name.into(),
        }
    }
}

#[async_trait]
impl TenantResolver for HeaderTenantResolver {
    fn request_key(&self, request: &HttpRequest) -> Option<String> {
        request
            .header(&self.header_name)
            .map(|value| value.trim())
            .filter(|value| !value.is_empty())
            .map(str::to_string)
    }

    async fn resolve(&self, request: &HttpRequest) -> Result<Option<Tenant>, TenantError> {
        let Some(tenant_id) = self.request_key(request) else {
            return Ok(None);
        };
        let tenant = self.store.find_by_id(&tenant_id).await?;
        Ok(only_active(tenant, &tenant_id))
    }
}

/// Path-based tenant resolver
///
/// Resolves tenant from URL path (e.g., `/tenants/acme/users`).
pub struct PathTenantResolver {
    store: Arc<dyn TenantStore>,
    pattern: Regex,
    group_index: usize,
}

impl PathTenantResolver {
    /// Create new path-based resolver
    ///
    /// # Examples
    ///
    /// ```
    /// use trestle_tenancy::{InMemoryTenantStore, PathTenantResolver, TenantStore};
    /// use std::sync::Arc;
    ///
    /// let store: Arc<dyn TenantStore> = Arc::new(InMemoryTenantStore::new());
    /// let resolver = PathTenantResolver::new(store, r"^/tenants/([^/]+)", 1).unwrap();
    /// ```
    pub fn new(
        store: Arc<dyn TenantStore>,
        pattern: &str,
        group_index: usize,
    ) -> Result<Self, TenantError> {
        let pattern = Regex::new(pattern)
            .map_err(|e| TenantError::Config(format!("invalid path pattern: {}", e)))?;
        Ok(Self {
            store,
            pattern,
            group_index,
        })
    }
}

#[async_trait]
impl TenantResolver for PathTenantResolver {
    fn request_key(&self, request: &HttpRequest) -> Option<String> {
        self.pattern
            .captures(&request.path)?
            .get(self.group_index)
            .map(|m| m.as_str().to_string())
    }

    async fn resolve(&self, request: &HttpRequest) -> Result<Option<Tenant>, TenantError> {
        let Some(tenant_name) = self.request_key(request) else {
            return Ok(None);
        };
        let tenant = self.store.find_by_name(&tenant_name).await?;
        Ok(only_active(tenant, &tenant_name))
    }
}
