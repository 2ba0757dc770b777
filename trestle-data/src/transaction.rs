//! Sessions, isolation levels and transaction state.

use crate::{Capabilities, DataResult, Entity, Repository};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use trestle_core::CancellationToken;

/// Transaction isolation levels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IsolationLevel {
    /// Read uncommitted - lowest isolation.
    ReadUncommitted,
    /// Read committed.
    #[default]
    ReadCommitted,
    /// Repeatable read.
    RepeatableRead,
    /// Serializable - highest isolation.
    Serializable,
}

impl IsolationLevel {
    /// SQL spelling of the level.
    pub fn as_sql(&self) -> &'static str {
        match self {
            IsolationLevel::ReadUncommitted => "READ UNCOMMITTED",
            IsolationLevel::ReadCommitted => "READ COMMITTED",
            IsolationLevel::RepeatableRead => "REPEATABLE READ",
            IsolationLevel::Serializable => "SERIALIZABLE",
        }
    }
}

impl fmt::Display for IsolationLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_sql())
    }
}

/// Lifecycle of a unit of work's transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    Idle,
    InTransaction(IsolationLevel),
    Committed,
    RolledBack,
    Disposed,
}

impl TransactionState {
    pub fn is_active(&self) -> bool {
        matches!(self, TransactionState::InTransaction(_))
    }
}

/// One logical connection to a backend.
///
/// A session buffers the writes staged through its repositories and applies
/// them atomically on [`Session::commit`].
#[async_trait]
pub trait Session: Send + Sync + 'static {
    fn capabilities(&self) -> Capabilities;

    /// Token observed by every blocking operation on this session.
    fn cancellation(&self) -> &CancellationToken;

    async fn begin(&self, isolation: IsolationLevel) -> DataResult<()>;

    /// Flush staged writes and commit, returning the number of rows written.
    ///
    /// Either every staged write becomes durable or none does.
    async fn commit(&self) -> DataResult<usize>;

    /// Discard staged writes and end any open transaction.
    async fn rollback(&self) -> DataResult<()>;

    fn pending_changes(&self) -> usize;

    /// Return the connection. Repeated calls are no-ops.
    fn release(&self);
}

/// Sessions that can hand out a repository for `E`.
pub trait ProvidesRepository<E: Entity>: Session {
    type Repository: Repository<E>;

    fn repository(self: &Arc<Self>) -> Self::Repository;
}
