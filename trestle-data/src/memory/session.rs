//! Sessions over an in-memory database.

use super::MemoryDatabase;
use super::MemoryRepository;
use super::table::{AnyChangeSet, Change, ChangeSet, Table};
use crate::{
    Capabilities, Capability, DataError, DataResult, Entity, GeneratedId, IsolationLevel,
    ProvidesRepository, Session,
};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::any::TypeId;
use std::collections::HashMap;
use std::sync::Arc;
use trestle_core::{CancellationToken, DisposeFlag};
use trestle_log::{debug, trace};

/// One connection to a [`MemoryDatabase`].
///
/// Writes are staged per entity type and applied in a single atomic commit.
/// Reads overlay the staged writes on the committed rows, so a session always
/// sees its own uncommitted changes. Every isolation level behaves as read
/// committed with respect to other sessions.
pub struct MemorySession {
    database: Arc<MemoryDatabase>,
    pending: Mutex<HashMap<TypeId, Box<dyn AnyChangeSet>>>,
    isolation: Mutex<Option<IsolationLevel>>,
    cancellation: CancellationToken,
    released: DisposeFlag,
}

impl MemorySession {
    pub(crate) fn open(database: Arc<MemoryDatabase>, cancellation: CancellationToken) -> Arc<Self> {
        database.connection_opened();
        trace!("Opened session on '{}'", database.name());
        Arc::new(Self {
            database,
            pending: Mutex::new(HashMap::new()),
            isolation: Mutex::new(None),
            cancellation,
            released: DisposeFlag::new(),
        })
    }

    pub fn database(&self) -> &Arc<MemoryDatabase> {
        &self.database
    }

    /// Isolation of the open transaction, if any.
    pub fn isolation(&self) -> Option<IsolationLevel> {
        *self.isolation.lock()
    }

    pub fn is_released(&self) -> bool {
        self.released.is_disposed()
    }

    pub(crate) fn ensure_usable(&self) -> DataResult<()> {
        if self.released.is_disposed() {
            return Err(DataError::Disposed);
        }
        if self.cancellation.is_cancelled() {
            return Err(DataError::Cancelled);
        }
        Ok(())
    }

    pub(crate) fn next_sequence(&self) -> u64 {
        self.database.next_sequence()
    }

    pub(crate) fn stage<E: Entity>(&self, change: Change<E>) -> DataResult<()> {
        self.ensure_usable()?;
        let mut pending = self.pending.lock();
        let changes = pending
            .entry(TypeId::of::<E>())
            .or_insert_with(|| Box::new(ChangeSet::<E>::new()))
            .as_any_mut()
            .downcast_mut::<ChangeSet<E>>()
            .ok_or_else(|| DataError::Storage(format!("change set type mismatch for {}", E::entity_name())))?;
        changes.push(change);
        Ok(())
    }

    /// Committed rows with this session's staged writes applied.
    pub(crate) fn view<E: Entity>(&self) -> DataResult<Table<E>> {
        self.ensure_usable()?;
        let mut table = self.database.snapshot::<E>();
        let pending = self.pending.lock();
        if let Some(changes) = pending
            .get(&TypeId::of::<E>())
            .and_then(|changes| changes.as_any().downcast_ref::<ChangeSet<E>>())
        {
            changes.apply(&mut table, false)?;
        }
        Ok(table)
    }
}

#[async_trait]
impl Session for MemorySession {
    // Rows are plain values: includes resolve to the row itself, and there
    // are no proxies to load lazily or attached rows to track.
    fn capabilities(&self) -> Capabilities {
        Capabilities::all()
            .without(Capability::ChangeTracking)
            .without(Capability::LazyLoad)
    }

    fn cancellation(&self) -> &CancellationToken {
        &self.cancellation
    }

    async fn begin(&self, isolation: IsolationLevel) -> DataResult<()> {
        self.ensure_usable()?;
        *self.isolation.lock() = Some(isolation);
        Ok(())
    }

    async fn commit(&self) -> DataResult<usize> {
        self.ensure_usable()?;
        let changes: Vec<Box<dyn AnyChangeSet>> = std::mem::take(&mut *self.pending.lock())
            .into_values()
            .collect();
        *self.isolation.lock() = None;
        self.database.apply(&changes)
    }

    async fn rollback(&self) -> DataResult<()> {
        let discarded = self.pending_changes();
        self.pending.lock().clear();
        *self.isolation.lock() = None;
        if discarded > 0 {
            debug!("Discarded {} staged changes on '{}'", discarded, self.database.name());
        }
        Ok(())
    }

    fn pending_changes(&self) -> usize {
        self.pending.lock().values().map(|changes| changes.len()).sum()
    }

    fn release(&self) {
        if self.released.try_dispose() {
            self.pending.lock().clear();
            self.database.connection_released();
            trace!("Released session on '{}'", self.database.name());
        }
    }
}

impl<E> ProvidesRepository<E> for MemorySession
where
    E: Entity,
    E::Id: GeneratedId,
{
    type Repository = MemoryRepository<E>;

    fn repository(self: &Arc<Self>) -> MemoryRepository<E> {
        MemoryRepository::new(self.clone())
    }
}

impl Drop for MemorySession {
    fn drop(&mut self) {
        self.release();
    }
}
