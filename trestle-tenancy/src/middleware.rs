//! Tenant Middleware
//!
//! Resolves the request's tenant and attaches its context.

use crate::cache::CachingTenantResolver;
use crate::context::TenantContext;
use crate::resolver::TenantResolver;
use crate::tenant::Tenant;
use async_trait::async_trait;
use std::sync::Arc;
use trestle_core::{Error, HttpRequest, HttpResponse, Middleware, Next};
use trestle_log::{trace, warn};

/// Tenant middleware
///
/// Resolves the tenant through a [`CachingTenantResolver`] and stores the
/// shared [`TenantContext`] in the request extensions. Requests that do not
/// resolve continue without a context; resolver failures end the request
/// with the mapped [`Error`].
pub struct TenantMiddleware<R: TenantResolver> {
    resolver: Arc<CachingTenantResolver<R>>,
}

impl<R: TenantResolver> TenantMiddleware<R> {
    /// ```rust,ignore
    /// let resolver = Arc::new(CachingTenantResolver::new(
    ///     HostTenantResolver::new(store),
    ///     TenantCacheOptions::default(),
    /// ));
    /// chain.use_middleware(TenantMiddleware::new(resolver));
    /// ```
    pub fn new(resolver: Arc<CachingTenantResolver<R>>) -> Self {
        Self { resolver }
    }

    pub fn resolver(&self) -> &Arc<CachingTenantResolver<R>> {
        &self.resolver
    }
}

#[async_trait]
impl<R: TenantResolver + 'static> Middleware for TenantMiddleware<R> {
    async fn handle(&self, mut request: HttpRequest, next: Next) -> Result<HttpResponse, Error> {
        match self.resolver.resolve_context(&request).await {
            Ok(Some(context)) => {
                trace!(
                    "Request {} {} bound to tenant '{}'",
                    request.method,
                    request.path,
                    context.tenant_id()
                );
                request.extensions.insert_arc(context);
                next(request).await
            }
            Ok(None) => next(request).await,
            Err(err) => {
                warn!(
                    "Tenant resolution failed for {} {}: {}",
                    request.method, request.path, err
                );
                Err(err.into())
            }
        }
    }
}

/// Typed access to the tenant attached by [`TenantMiddleware`].
pub trait TenantRequestExt {
    fn tenant_context(&self) -> Option<Arc<TenantContext>>;

    fn tenant(&self) -> Option<Arc<Tenant>> {
        self.tenant_context().map(|context| context.tenant_arc())
    }

    fn tenant_id(&self) -> Option<String> {
        self.tenant_context()
            .map(|context| context.tenant_id().to_string())
    }
}

impl TenantRequestExt for HttpRequest {
    fn tenant_context(&self) -> Option<Arc<TenantContext>> {
        self.extensions.get_arc::<TenantContext>()
    }
}
