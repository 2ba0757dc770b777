//! Repository over a [`MemorySession`].

use super::MemorySession;
use super::table::Change;
use crate::{
    Capabilities, Capability, DataError, DataResult, Entity, GeneratedId, Predicate, Query,
    QuerySource, QuerySpec, Repository, Session,
};
use async_trait::async_trait;
use std::marker::PhantomData;
use std::sync::Arc;
use trestle_log::debug;

/// [`Repository`] for `E`, staging writes in the shared session.
pub struct MemoryRepository<E: Entity> {
    session: Arc<MemorySession>,
    _entity: PhantomData<fn() -> E>,
}

impl<E: Entity> MemoryRepository<E> {
    pub fn new(session: Arc<MemorySession>) -> Self {
        Self {
            session,
            _entity: PhantomData,
        }
    }

    pub fn session(&self) -> &Arc<MemorySession> {
        &self.session
    }

    fn query(&self, read_only: bool) -> Query<E> {
        let source = MemorySource::<E> {
            session: self.session.clone(),
            _entity: PhantomData,
        };
        Query::new(Arc::new(source), read_only)
    }
}

impl<E: Entity> Clone for MemoryRepository<E> {
    fn clone(&self) -> Self {
        Self::new(self.session.clone())
    }
}

struct MemorySource<E: Entity> {
    session: Arc<MemorySession>,
    _entity: PhantomData<fn() -> E>,
}

#[async_trait]
impl<E: Entity> QuerySource<E> for MemorySource<E> {
    async fn fetch(&self, spec: &QuerySpec<E>) -> DataResult<Vec<E>> {
        let rows = self.session.view::<E>()?.rows();
        Ok(spec.apply(rows))
    }

    async fn count(&self, spec: &QuerySpec<E>) -> DataResult<usize> {
        let rows = self.session.view::<E>()?.rows();
        Ok(rows.iter().filter(|row| spec.matches(row)).count())
    }

    fn supports(&self, capability: Capability) -> bool {
        self.session.capabilities().contains(capability)
    }
}

#[async_trait]
impl<E> Repository<E> for MemoryRepository<E>
where
    E: Entity,
    E::Id: GeneratedId,
{
    fn all(&self) -> Query<E> {
        self.query(false)
    }

    fn all_read_only(&self) -> Query<E> {
        self.query(true)
    }

    fn capabilities(&self) -> Capabilities {
        self.session.capabilities()
    }

    async fn get(&self, id: &E::Id) -> DataResult<Option<E>> {
        if *id == E::Id::default() {
            return Ok(None);
        }
        Ok(self.session.view::<E>()?.get(id).cloned())
    }

    async fn save(&self, mut entity: E) -> DataResult<E> {
        self.session.ensure_usable()?;
        let seq = self.session.next_sequence();
        if entity.is_transient() {
            entity.set_id(E::Id::generate(seq)?);
        }
        debug!("Staging insert of {} {:?}", E::entity_name(), entity.id());
        self.session.stage(Change::Insert {
            seq,
            entity: entity.clone(),
        })?;
        Ok(entity)
    }

    async fn update(&self, entity: E) -> DataResult<()> {
        if entity.is_transient() {
            return Err(DataError::Precondition(format!(
                "cannot update a transient {}",
                E::entity_name()
            )));
        }
        debug!("Staging update of {} {:?}", E::entity_name(), entity.id());
        self.session.stage(Change::Update(entity))
    }

    async fn delete(&self, entity: &E) -> DataResult<()> {
        if entity.is_transient() {
            return Ok(());
        }
        debug!("Staging delete of {} {:?}", E::entity_name(), entity.id());
        self.session.stage(Change::<E>::Delete(entity.id().clone()))
    }

    async fn delete_where(&self, predicate: Predicate<E>) -> DataResult<usize> {
        let doomed: Vec<E::Id> = self
            .session
            .view::<E>()?
            .rows()
            .into_iter()
            .filter(|row| predicate(row))
            .map(|row| row.id().clone())
            .collect();
        for id in &doomed {
            self.session.stage(Change::<E>::Delete(id.clone()))?;
        }
        debug!("Staging delete of {} {} rows", doomed.len(), E::entity_name());
        Ok(doomed.len())
    }
}
