//! Unit of work: one session, one transaction boundary.

use crate::{
    DataError, DataResult, Entity, IsolationLevel, ProvidesRepository, Session, TransactionState,
};
use futures::future::BoxFuture;
use std::sync::Arc;
use trestle_core::DisposeFlag;
use trestle_log::{debug, warn};

/// Groups repository writes into a single atomic commit.
///
/// Every repository handed out by [`UnitOfWork::repository`] shares the unit's
/// session, so their staged writes commit or roll back together. The unit
/// owns the session and releases it exactly once, on [`UnitOfWork::close`] or
/// on drop.
///
/// ```rust,ignore
/// let mut uow = pool.unit_of_work(token)?;
/// let orders = uow.repository::<Order>()?;
/// orders.save(Order::new("A-1")).await?;
/// uow.commit().await?;
/// uow.close().await?;
/// ```
pub struct UnitOfWork<S: Session> {
    session: Arc<S>,
    state: TransactionState,
    default_isolation: IsolationLevel,
    closed: DisposeFlag,
}

impl<S: Session> UnitOfWork<S> {
    pub fn new(session: Arc<S>) -> Self {
        Self {
            session,
            state: TransactionState::Idle,
            default_isolation: IsolationLevel::default(),
            closed: DisposeFlag::new(),
        }
    }

    /// Isolation used when a transaction is opened without an explicit level.
    pub fn with_default_isolation(mut self, isolation: IsolationLevel) -> Self {
        self.default_isolation = isolation;
        self
    }

    pub fn state(&self) -> TransactionState {
        self.state
    }

    pub fn session(&self) -> &Arc<S> {
        &self.session
    }

    pub fn is_closed(&self) -> bool {
        self.closed.is_disposed()
    }

    fn ensure_open(&self) -> DataResult<()> {
        if self.closed.is_disposed() {
            Err(DataError::Disposed)
        } else {
            Ok(())
        }
    }

    /// Repository for `E` bound to this unit's session.
    pub fn repository<E: Entity>(&self) -> DataResult<<S as ProvidesRepository<E>>::Repository>
    where
        S: ProvidesRepository<E>,
    {
        self.ensure_open()?;
        Ok(ProvidesRepository::<E>::repository(&self.session))
    }

    /// Open a transaction. Fails with [`DataError::TransactionActive`] if one
    /// is already open.
    pub async fn begin_transaction(&mut self, isolation: Option<IsolationLevel>) -> DataResult<()> {
        self.ensure_open()?;
        if self.state.is_active() {
            return Err(DataError::TransactionActive);
        }
        if self.session.cancellation().is_cancelled() {
            return Err(DataError::Cancelled);
        }

        let isolation = isolation.unwrap_or(self.default_isolation);
        self.session.begin(isolation).await?;
        self.state = TransactionState::InTransaction(isolation);
        debug!("Began transaction ({})", isolation);
        Ok(())
    }

    /// Commit staged writes, opening a transaction first if none is active.
    pub async fn commit(&mut self) -> DataResult<()> {
        self.commit_with(None).await
    }

    /// Like [`UnitOfWork::commit`], using `isolation` for an implicit begin.
    ///
    /// On failure or cancellation the transaction is rolled back and the
    /// original error is returned.
    pub async fn commit_with(&mut self, isolation: Option<IsolationLevel>) -> DataResult<()> {
        self.ensure_open()?;
        if !self.state.is_active() {
            if let Err(err) = self.begin_transaction(isolation).await {
                self.discard("begin failed").await;
                return Err(err);
            }
        }

        let token = self.session.cancellation().clone();
        let outcome = tokio::select! {
            biased;
            _ = token.cancelled() => Err(DataError::Cancelled),
            written = self.session.commit() => written,
        };

        match outcome {
            Ok(written) => {
                self.state = TransactionState::Committed;
                debug!("Committed transaction ({} rows)", written);
                Ok(())
            }
            Err(err) => {
                warn!("Commit failed, rolling back: {}", err);
                self.discard("commit failed").await;
                self.state = TransactionState::RolledBack;
                Err(err)
            }
        }
    }

    /// Discard staged writes and close any open transaction.
    pub async fn rollback(&mut self) -> DataResult<()> {
        if self.closed.is_disposed() {
            return Ok(());
        }
        self.session.rollback().await?;
        if self.state.is_active() {
            self.state = TransactionState::RolledBack;
            debug!("Rolled back transaction");
        }
        Ok(())
    }

    /// Run `work` inside a transaction.
    ///
    /// Commits when `work` succeeds; rolls back and returns the error when it
    /// fails or the session's token is cancelled. The transaction is closed on
    /// every path.
    ///
    /// ```rust,ignore
    /// uow.in_transaction(None, |uow| Box::pin(async move {
    ///     let orders = uow.repository::<Order>()?;
    ///     orders.save(order).await?;
    ///     Ok::<_, DataError>(())
    /// })).await?;
    /// ```
    pub async fn in_transaction<T, E, F>(&mut self, isolation: Option<IsolationLevel>, work: F) -> Result<T, E>
    where
        F: for<'a> FnOnce(&'a Self) -> BoxFuture<'a, Result<T, E>>,
        E: From<DataError>,
    {
        self.begin_transaction(isolation).await?;

        let token = self.session.cancellation().clone();
        let outcome = {
            let this = &*self;
            tokio::select! {
                biased;
                _ = token.cancelled() => Err(E::from(DataError::Cancelled)),
                result = work(this) => result,
            }
        };

        match outcome {
            Ok(value) => {
                self.commit().await?;
                Ok(value)
            }
            Err(err) => {
                self.discard("work failed").await;
                self.state = TransactionState::RolledBack;
                Err(err)
            }
        }
    }

    async fn discard(&mut self, reason: &str) {
        if let Err(err) = self.session.rollback().await {
            warn!("Rollback after {} also failed: {}", reason, err);
        }
    }

    /// Roll back anything pending and release the session. Idempotent.
    pub async fn close(&mut self) -> DataResult<()> {
        if !self.closed.try_dispose() {
            return Ok(());
        }
        if self.state.is_active() || self.session.pending_changes() > 0 {
            debug!("Closing unit of work with uncommitted changes; discarding");
            self.discard("close").await;
        }
        self.session.release();
        self.state = TransactionState::Disposed;
        Ok(())
    }
}

impl<S: Session> Drop for UnitOfWork<S> {
    fn drop(&mut self) {
        if self.closed.try_dispose() {
            if self.state.is_active() {
                debug!("Unit of work dropped inside a transaction; discarding");
            }
            self.session.release();
        }
    }
}
