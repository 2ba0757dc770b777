//! Database Per Tenant
//!
//! Each tenant's connection string names its own database. The
//! [`TenantDatabaseManager`] connects a pool for a tenant the first time it is
//! needed and parks it in the tenant's [`TenantContext`] properties, so the
//! pool lives exactly as long as the cached context and is disposed with it.
//!
//! ```rust,ignore
//! let databases = TenantDatabaseManager::new(Arc::new(MemoryServer::new()));
//!
//! let context = request.tenant_context().ok_or(Error::NotFound("tenant".into()))?;
//! let mut uow = databases.unit_of_work(&context, request.cancellation().clone()).await?;
//! uow.repository::<Order>()?.save(order).await?;
//! uow.commit().await?;
//! ```

use crate::context::TenantContext;
use crate::resolver::TenantError;
use crate::tenant::{DbType, Tenant};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::OnceCell;
use trestle_core::{CancellationToken, Disposable};
use trestle_data::{
    DataError, IsolationLevel, MemoryPool, MemoryServer, MemorySession, Session, UnitOfWork,
};
use trestle_log::{debug, info};

/// Connects tenants to their databases.
///
/// Implement this for each storage engine; the crate ships one for the
/// in-memory engine.
#[async_trait]
pub trait DatabaseProvider: Send + Sync + 'static {
    /// Per-tenant connection pool.
    type Pool: Disposable + 'static;

    /// Session type units of work run on.
    type Session: Session;

    /// Whether this provider serves databases of `db_type`.
    fn supports(&self, db_type: DbType) -> bool;

    /// Open a pool for `tenant`'s connection string.
    async fn connect(&self, tenant: &Tenant) -> Result<Self::Pool, TenantError>;

    fn open_session(
        &self,
        pool: &Self::Pool,
        cancellation: CancellationToken,
    ) -> Result<Arc<Self::Session>, TenantError>;
}

#[async_trait]
impl DatabaseProvider for MemoryServer {
    type Pool = MemoryPool;
    type Session = MemorySession;

    fn supports(&self, db_type: DbType) -> bool {
        db_type == DbType::Memory
    }

    async fn connect(&self, tenant: &Tenant) -> Result<MemoryPool, TenantError> {
        Ok(MemoryServer::connect(self, &tenant.connection_string)?)
    }

    fn open_session(
        &self,
        pool: &MemoryPool,
        cancellation: CancellationToken,
    ) -> Result<Arc<MemorySession>, TenantError> {
        Ok(pool.open_session(cancellation)?)
    }
}

/// Context property holding a lazily connected pool.
///
/// A connect that finishes after the slot was disposed must not leave a live
/// pool behind, so disposal and publication are serialized on `disposed`.
struct PoolSlot<T> {
    pool: OnceCell<Arc<T>>,
    disposed: Mutex<bool>,
}

impl<T: Disposable> PoolSlot<T> {
    fn new() -> Self {
        Self {
            pool: OnceCell::new(),
            disposed: Mutex::new(false),
        }
    }

    /// Hand out `pool` unless the slot was disposed while it connected, in
    /// which case the pool is disposed here.
    fn publish(&self, pool: &Arc<T>) -> Result<(), DataError> {
        let disposed = self.disposed.lock();
        if *disposed {
            drop(disposed);
            pool.dispose();
            return Err(DataError::Disposed);
        }
        Ok(())
    }
}

impl<T: Disposable> Disposable for PoolSlot<T> {
    fn dispose(&self) {
        let mut disposed = self.disposed.lock();
        *disposed = true;
        let pool = self.pool.get().cloned();
        drop(disposed);

        if let Some(pool) = pool {
            pool.dispose();
        }
    }
}

/// Hands out units of work bound to the current tenant's database.
pub struct TenantDatabaseManager<P: DatabaseProvider> {
    provider: Arc<P>,
    default_isolation: IsolationLevel,
    property_key: String,
}

impl<P: DatabaseProvider> TenantDatabaseManager<P> {
    pub fn new(provider: Arc<P>) -> Self {
        Self {
            provider,
            default_isolation: IsolationLevel::default(),
            property_key: format!("trestle.database.pool.{}", std::any::type_name::<P>()),
        }
    }

    /// Isolation used when units of work begin implicitly.
    pub fn with_default_isolation(mut self, isolation: IsolationLevel) -> Self {
        self.default_isolation = isolation;
        self
    }

    pub fn provider(&self) -> &Arc<P> {
        &self.provider
    }

    /// The tenant's pool, connecting it on first use.
    ///
    /// Concurrent first calls for the same context connect once.
    pub async fn pool(&self, context: &TenantContext) -> Result<Arc<P::Pool>, TenantError> {
        if context.is_disposed() {
            return Err(DataError::Disposed.into());
        }

        let tenant = context.tenant();
        if tenant.connection_string.trim().is_empty() {
            return Err(DataError::InvalidConnection(format!(
                "tenant '{}' has no connection string",
                tenant.id
            ))
            .into());
        }
        if !self.provider.supports(tenant.db_type) {
            return Err(TenantError::Config(format!(
                "tenant '{}' uses {} databases, which this provider does not serve",
                tenant.id, tenant.db_type
            )));
        }

        let slot = context
            .properties()
            .get_or_insert_disposable_with(&self.property_key, PoolSlot::<P::Pool>::new);
        let pool = slot
            .pool
            .get_or_try_init(|| async {
                let pool = self.provider.connect(tenant).await?;
                info!("Connected database pool for tenant '{}'", tenant.id);
                Ok::<_, TenantError>(Arc::new(pool))
            })
            .await?;

        // the context may have been evicted while the connect was in flight
        if context.is_disposed() {
            slot.dispose();
        }
        slot.publish(pool)?;
        Ok(pool.clone())
    }

    /// A fresh unit of work on the tenant's database.
    pub async fn unit_of_work(
        &self,
        context: &TenantContext,
        cancellation: CancellationToken,
    ) -> Result<UnitOfWork<P::Session>, TenantError> {
        let pool = self.pool(context).await?;
        let session = self.provider.open_session(&pool, cancellation)?;
        debug!("Opened session for tenant '{}'", context.tenant_id());
        Ok(UnitOfWork::new(session).with_default_isolation(self.default_isolation))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use trestle_data::TransactionState;

    struct CountingProvider {
        server: MemoryServer,
        connects: AtomicUsize,
    }

    #[async_trait]
    impl DatabaseProvider for CountingProvider {
        type Pool = MemoryPool;
        type Session = MemorySession;

        fn supports(&self, db_type: DbType) -> bool {
            self.server.supports(db_type)
        }

        async fn connect(&self, tenant: &Tenant) -> Result<MemoryPool, TenantError> {
            self.connects.fetch_add(1, Ordering::SeqCst);
            tokio::task::yield_now().await;
            DatabaseProvider::connect(&self.server, tenant).await
        }

        fn open_session(
            &self,
            pool: &MemoryPool,
            cancellation: CancellationToken,
        ) -> Result<Arc<MemorySession>, TenantError> {
            self.server.open_session(pool, cancellation)
        }
    }

    fn counting() -> Arc<CountingProvider> {
        Arc::new(CountingProvider {
            server: MemoryServer::new().with_auto_create(true),
            connects: AtomicUsize::new(0),
        })
    }

    fn context(connection_string: &str) -> TenantContext {
        TenantContext::new(Tenant::new("t1", "acme").with_connection_string(connection_string))
    }

    #[tokio::test]
    async fn test_pool_is_connected_once_per_context() {
        let provider = counting();
        let manager = TenantDatabaseManager::new(provider.clone());
        let ctx = context("db_a");

        let first = manager.pool(&ctx).await.unwrap();
        let second = manager.pool(&ctx).await.unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(first.database().name(), "db_a");
        assert_eq!(provider.connects.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_first_use_connects_once() {
        let provider = counting();
        let manager = Arc::new(TenantDatabaseManager::new(provider.clone()));
        let ctx = Arc::new(context("db_a"));

        let mut tasks = Vec::new();
        for _ in 0..8 {
            let manager = manager.clone();
            let ctx = ctx.clone();
            tasks.push(tokio::spawn(async move {
                manager.pool(&ctx).await.map(|pool| Arc::as_ptr(&pool) as usize)
            }));
        }
        let mut pools = Vec::new();
        for task in tasks {
            pools.push(task.await.unwrap().unwrap());
        }
        pools.dedup();

        assert_eq!(pools.len(), 1);
        assert_eq!(provider.connects.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_disposing_context_disposes_pool() {
        let manager = TenantDatabaseManager::new(counting());
        let ctx = context("db_a");
        let pool = manager.pool(&ctx).await.unwrap();

        ctx.dispose();
        assert!(pool.is_disposed());
        assert!(matches!(
            manager.pool(&ctx).await,
            Err(TenantError::Data(DataError::Disposed))
        ));
    }

    struct SharedPool(Arc<MemoryPool>);

    impl Disposable for SharedPool {
        fn dispose(&self) {
            self.0.dispose();
        }
    }

    /// Holds every connect until `gate` opens and keeps a handle on the pools
    /// it hands out.
    struct GatedProvider {
        server: MemoryServer,
        entered: tokio::sync::Notify,
        gate: tokio::sync::Notify,
        connected: parking_lot::Mutex<Vec<Arc<MemoryPool>>>,
    }

    #[async_trait]
    impl DatabaseProvider for GatedProvider {
        type Pool = SharedPool;
        type Session = MemorySession;

        fn supports(&self, db_type: DbType) -> bool {
            self.server.supports(db_type)
        }

        async fn connect(&self, tenant: &Tenant) -> Result<SharedPool, TenantError> {
            self.entered.notify_one();
            self.gate.notified().await;
            let pool = Arc::new(DatabaseProvider::connect(&self.server, tenant).await?);
            self.connected.lock().push(pool.clone());
            Ok(SharedPool(pool))
        }

        fn open_session(
            &self,
            pool: &SharedPool,
            cancellation: CancellationToken,
        ) -> Result<Arc<MemorySession>, TenantError> {
            self.server.open_session(&pool.0, cancellation)
        }
    }

    fn gated() -> Arc<GatedProvider> {
        Arc::new(GatedProvider {
            server: MemoryServer::new().with_auto_create(true),
            entered: tokio::sync::Notify::new(),
            gate: tokio::sync::Notify::new(),
            connected: parking_lot::Mutex::new(Vec::new()),
        })
    }

    #[tokio::test]
    async fn test_eviction_during_connect_disposes_late_pool() {
        let provider = gated();
        let manager = Arc::new(TenantDatabaseManager::new(provider.clone()));
        let ctx = Arc::new(context("db_a"));

        let task = {
            let manager = manager.clone();
            let ctx = ctx.clone();
            tokio::spawn(async move { manager.pool(&ctx).await.map(|_| ()) })
        };

        provider.entered.notified().await;
        ctx.dispose();
        provider.gate.notify_one();

        let outcome = task.await.unwrap();
        assert!(matches!(outcome, Err(TenantError::Data(DataError::Disposed))));

        let connected = provider.connected.lock();
        assert_eq!(connected.len(), 1);
        assert!(connected[0].is_disposed());
    }

    #[tokio::test]
    async fn test_pool_connected_before_eviction_is_disposed_with_context() {
        let provider = gated();
        provider.gate.notify_one();
        let manager = TenantDatabaseManager::new(provider.clone());
        let ctx = context("db_a");

        manager.pool(&ctx).await.unwrap();
        ctx.dispose();

        assert!(provider.connected.lock()[0].is_disposed());
    }

    #[tokio::test]
    async fn test_unit_of_work_uses_default_isolation() {
        let manager = TenantDatabaseManager::new(Arc::new(MemoryServer::new().with_auto_create(true)))
            .with_default_isolation(IsolationLevel::Serializable);
        let ctx = context("db_a");

        let mut uow = manager.unit_of_work(&ctx, CancellationToken::new()).await.unwrap();
        uow.begin_transaction(None).await.unwrap();
        assert_eq!(
            uow.state(),
            TransactionState::InTransaction(IsolationLevel::Serializable)
        );
    }

    #[tokio::test]
    async fn test_rejects_missing_connection_string() {
        let manager = TenantDatabaseManager::new(counting());
        let err = manager.pool(&context("  ")).await.unwrap_err();
        assert!(matches!(err, TenantError::Data(DataError::InvalidConnection(_))));
    }

    #[tokio::test]
    async fn test_rejects_unsupported_db_type() {
        let manager = TenantDatabaseManager::new(counting());
        let ctx = TenantContext::new(
            Tenant::new("t1", "acme")
                .with_connection_string("postgres://db/acme")
                .with_db_type(DbType::Postgres),
        );
        assert!(matches!(manager.pool(&ctx).await, Err(TenantError::Config(_))));
    }

    #[tokio::test]
    async fn test_unknown_database_is_invalid_connection() {
        let manager = TenantDatabaseManager::new(Arc::new(MemoryServer::new()));
        let err = manager.pool(&context("db_missing")).await.unwrap_err();
        assert!(matches!(err, TenantError::Data(DataError::InvalidConnection(_))));
    }
}
