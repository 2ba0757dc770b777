//! Per-tenant pipeline dispatch
//!
//! [`TenantPipelineMiddleware`] branches each request into a middleware chain
//! built for its tenant. A tenant's chain is configured on first use, exactly
//! once, and reused until the tenant is invalidated. The branch ends in the
//! outer pipeline's `next`, so requests rejoin the shared pipeline after the
//! tenant-specific stages.

use crate::cache::EvictionListener;
use crate::context::TenantContext;
use crate::middleware::TenantRequestExt;
use crate::tenant::Tenant;
use async_trait::async_trait;
use dashmap::DashMap;
use once_cell::sync::OnceCell;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use trestle_core::{Error, HttpRequest, HttpResponse, Middleware, MiddlewareChain, Next};
use trestle_log::{debug, info};

/// What a pipeline configurator sees about the tenant it builds for.
pub struct TenantPipelineContext {
    context: Arc<TenantContext>,
}

impl TenantPipelineContext {
    pub fn tenant(&self) -> &Tenant {
        self.context.tenant()
    }

    pub fn tenant_id(&self) -> &str {
        self.context.tenant_id()
    }

    /// The cached context, for stashing per-tenant services in its properties.
    pub fn context(&self) -> &Arc<TenantContext> {
        &self.context
    }
}

type Configure = dyn Fn(&TenantPipelineContext, &mut MiddlewareChain) + Send + Sync;

/// Middleware that dispatches into per-tenant chains.
///
/// ```rust,ignore
/// let pipelines = TenantPipelineMiddleware::new(|tenant, chain| {
///     if tenant.tenant().metadata.get("plan").map(String::as_str) == Some("premium") {
///         chain.use_middleware(PriorityQueue::default());
///     }
/// });
/// ```
pub struct TenantPipelineMiddleware {
    configure: Box<Configure>,
    pipelines: DashMap<String, Arc<OnceCell<Arc<MiddlewareChain>>>>,
    missing_status: u16,
    builds: AtomicUsize,
}

impl TenantPipelineMiddleware {
    pub fn new<F>(configure: F) -> Self
    where
        F: Fn(&TenantPipelineContext, &mut MiddlewareChain) + Send + Sync + 'static,
    {
        Self {
            configure: Box::new(configure),
            pipelines: DashMap::new(),
            missing_status: 404,
            builds: AtomicUsize::new(0),
        }
    }

    /// Status returned when a request reaches dispatch without a tenant.
    pub fn with_missing_tenant_status(mut self, status: u16) -> Self {
        self.missing_status = status;
        self
    }

    /// The chain for `context`'s tenant, building it on first use.
    pub fn pipeline_for(&self, context: &Arc<TenantContext>) -> Arc<MiddlewareChain> {
        let cell = self
            .pipelines
            .entry(context.tenant_id().to_string())
            .or_insert_with(|| Arc::new(OnceCell::new()))
            .clone();

        cell.get_or_init(|| {
            let mut chain = MiddlewareChain::new();
            let build = TenantPipelineContext {
                context: context.clone(),
            };
            (self.configure)(&build, &mut chain);
            self.builds.fetch_add(1, Ordering::Relaxed);
            info!(
                "Built pipeline for tenant '{}' ({} stages)",
                context.tenant_id(),
                chain.len()
            );
            Arc::new(chain)
        })
        .clone()
    }

    /// Drop a tenant's chain; the next request rebuilds it.
    pub fn invalidate(&self, tenant_id: &str) -> bool {
        let removed = self.pipelines.remove(tenant_id).is_some();
        if removed {
            debug!("Invalidated pipeline for tenant '{}'", tenant_id);
        }
        removed
    }

    pub fn clear(&self) {
        self.pipelines.clear();
    }

    /// Number of tenants with a built chain.
    pub fn built_pipelines(&self) -> usize {
        self.pipelines
            .iter()
            .filter(|entry| entry.value().get().is_some())
            .count()
    }

    /// Total configure callback runs, rebuilds included.
    pub fn build_count(&self) -> usize {
        self.builds.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl Middleware for TenantPipelineMiddleware {
    async fn handle(&self, req: HttpRequest, next: Next) -> Result<HttpResponse, Error> {
        let Some(context) = req.tenant_context() else {
            debug!(
                "No tenant for {} {}; answering {}",
                req.method, req.path, self.missing_status
            );
            return Ok(HttpResponse::new(self.missing_status));
        };

        let chain = self.pipeline_for(&context);
        chain.run(req, next).await
    }
}

impl EvictionListener for TenantPipelineMiddleware {
    fn on_evicted(&self, context: &TenantContext) {
        self.invalidate(context.tenant_id());
    }
}
