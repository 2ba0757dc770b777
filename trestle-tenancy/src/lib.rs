//! Multi-Tenancy for Trestle
//!
//! Tenant resolution with a shared, cached tenant context per tenant,
//! per-tenant middleware pipelines, and a database per tenant.
//!
//! # Features
//!
//! - **Tenant resolution** - host, subdomain, header and path strategies
//! - **Cached contexts** - one [`TenantContext`] per tenant, sliding expiry,
//!   coalesced lookups, disposal on eviction
//! - **Auto middleware** - attaches the context to each request
//! - **Per-tenant pipelines** - middleware chains built once per tenant
//! - **Database per tenant** - units of work bound to the tenant's connection
//! - **Configuration** - TOML/JSON tenant registry with env overrides
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use trestle_tenancy::prelude::*;
//!
//! let config = TenancyConfig::from_file("tenants.toml")?.with_env_overrides()?;
//! config.validate()?;
//! let options = config.cache_options();
//! let store: Arc<dyn TenantStore> = Arc::new(config.into_store());
//!
//! let resolver = Arc::new(CachingTenantResolver::new(
//!     HostTenantResolver::new(store),
//!     options,
//! ));
//! let pipelines = Arc::new(TenantPipelineMiddleware::new(|tenant, chain| {
//!     // tenant-specific stages
//! }));
//! resolver.add_eviction_listener(pipelines.clone());
//!
//! let mut app = MiddlewareChain::new();
//! app.use_middleware(TenantMiddleware::new(resolver))
//!     .use_arc(pipelines);
//! ```
//!
//! Handlers then reach the tenant's database through the request:
//!
//! ```rust,ignore
//! let databases = TenantDatabaseManager::new(Arc::new(server));
//! let context = req.tenant_context().ok_or(Error::NotFound("tenant".into()))?;
//! let mut uow = databases.unit_of_work(&context, req.cancellation().clone()).await?;
//! ```

pub mod cache;
pub mod config;
pub mod context;
pub mod database;
pub mod middleware;
pub mod pipeline;
pub mod resolver;
pub mod tenant;

pub use cache::{CachingTenantResolver, EvictionListener, TenantCacheOptions};
pub use config::{CacheConfig, FileFormat, TenancyConfig};
pub use context::{Properties, TenantContext};
pub use database::{DatabaseProvider, TenantDatabaseManager};
pub use middleware::{TenantMiddleware, TenantRequestExt};
pub use pipeline::{TenantPipelineContext, TenantPipelineMiddleware};
pub use resolver::{
    HeaderTenantResolver, HostTenantResolver, InMemoryTenantStore, PathTenantResolver,
    SubdomainTenantResolver, TenantError, TenantResolver, TenantStore,
};
pub use tenant::{DbType, Tenant};

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::cache::{CachingTenantResolver, EvictionListener, TenantCacheOptions};
    pub use crate::config::TenancyConfig;
    pub use crate::context::TenantContext;
    pub use crate::database::{DatabaseProvider, TenantDatabaseManager};
    pub use crate::middleware::{TenantMiddleware, TenantRequestExt};
    pub use crate::pipeline::{TenantPipelineContext, TenantPipelineMiddleware};
    pub use crate::resolver::{
        HeaderTenantResolver, HostTenantResolver, InMemoryTenantStore, PathTenantResolver,
        SubdomainTenantResolver, TenantError, TenantResolver, TenantStore,
    };
    pub use crate::tenant::{DbType, Tenant};
}
