//! The generic repository contract.

use crate::{DataError, DataResult, Entity, Page, PageRequest, Predicate, Query};
use async_trait::async_trait;
use std::fmt;
use trestle_log::debug;

/// Optional backend features.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Capability {
    Transactions,
    Paging,
    EagerLoad,
    LazyLoad,
    BatchDelete,
    ChangeTracking,
}

impl Capability {
    pub const ALL: [Capability; 6] = [
        Capability::Transactions,
        Capability::Paging,
        Capability::EagerLoad,
        Capability::LazyLoad,
        Capability::BatchDelete,
        Capability::ChangeTracking,
    ];

    fn bit(self) -> u8 {
        1 << (self as u8)
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Capability::Transactions => "transactions",
            Capability::Paging => "paging",
            Capability::EagerLoad => "eager loading",
            Capability::LazyLoad => "lazy loading",
            Capability::BatchDelete => "batch delete",
            Capability::ChangeTracking => "change tracking",
        };
        f.write_str(name)
    }
}

/// Set of [`Capability`] values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Capabilities(u8);

impl Capabilities {
    pub fn none() -> Self {
        Self(0)
    }

    pub fn all() -> Self {
        Capability::ALL.into_iter().fold(Self::none(), Self::with)
    }

    pub fn with(self, capability: Capability) -> Self {
        Self(self.0 | capability.bit())
    }

    pub fn without(self, capability: Capability) -> Self {
        Self(self.0 & !capability.bit())
    }

    pub fn contains(&self, capability: Capability) -> bool {
        self.0 & capability.bit() != 0
    }

    /// Fail with [`DataError::Unsupported`] when `capability` is missing.
    pub fn require(&self, capability: Capability) -> DataResult<()> {
        if self.contains(capability) {
            Ok(())
        } else {
            Err(DataError::Unsupported(capability))
        }
    }
}

/// Uniform data access for one entity type.
///
/// Reads see committed rows plus the writes staged in the same unit of work.
/// Writes are staged only; nothing becomes durable until the owning
/// [`UnitOfWork`](crate::UnitOfWork) commits.
///
/// Write policies:
/// - `save` of an entity that already has an id inserts it under that id; a
///   duplicate surfaces as [`DataError::Conflict`] at commit.
/// - `update`/`merge` of a row missing at commit fails with
///   [`DataError::Missing`].
/// - `delete` of an absent row is a no-op.
///
/// Only async methods are offered; a synchronous caller drives them on its
/// own runtime (for example `Handle::block_on`).
#[async_trait]
pub trait Repository<E: Entity>: Send + Sync {
    /// Query over every row, tracked when the engine supports
    /// [`Capability::ChangeTracking`].
    fn all(&self) -> Query<E>;

    /// Untracked query over every row.
    fn all_read_only(&self) -> Query<E>;

    fn capabilities(&self) -> Capabilities {
        Capabilities::all()
    }

    fn filter<F>(&self, predicate: F) -> Query<E>
    where
        F: Fn(&E) -> bool + Send + Sync + 'static,
        Self: Sized,
    {
        self.all().filter(predicate)
    }

    fn filter_read_only<F>(&self, predicate: F) -> Query<E>
    where
        F: Fn(&E) -> bool + Send + Sync + 'static,
        Self: Sized,
    {
        self.all_read_only().filter(predicate)
    }

    /// One page of matching rows plus the total match count.
    ///
    /// A negative `index` is treated as 0 and a non-positive `size` as 1.
    async fn where_paged(&self, predicate: Predicate<E>, index: i64, size: i64) -> DataResult<Page<E>> {
        self.capabilities().require(Capability::Paging)?;
        let request = PageRequest::new(index, size);
        let total = self
            .all_read_only()
            .filter_by(predicate.clone())
            .count()
            .await?;
        let items = self
            .all_read_only()
            .filter_by(predicate)
            .skip(request.offset())
            .take(request.limit())
            .to_vec()
            .await?;
        Ok(Page::new(items, request, total))
    }

    /// The single row matching `predicate`.
    ///
    /// Returns `None` when nothing matches and [`DataError::Ambiguous`] when
    /// more than one row does.
    async fn find_one(&self, predicate: Predicate<E>) -> DataResult<Option<E>> {
        let mut rows = self.all().filter_by(predicate).to_vec().await?;
        match rows.len() {
            0 | 1 => Ok(rows.pop()),
            count => Err(DataError::Ambiguous {
                entity: E::entity_name(),
                count,
            }),
        }
    }

    async fn get(&self, id: &E::Id) -> DataResult<Option<E>>;

    /// Like [`Repository::get`]; engines with lazy proxies may defer the read.
    async fn load(&self, id: &E::Id) -> DataResult<Option<E>> {
        self.get(id).await
    }

    /// Stage an insert, assigning an id to transient entities.
    async fn save(&self, entity: E) -> DataResult<E>;

    /// Insert when transient, update otherwise.
    async fn save_or_update(&self, entity: E) -> DataResult<E> {
        if entity.is_transient() {
            self.save(entity).await
        } else {
            self.update(entity.clone()).await?;
            Ok(entity)
        }
    }

    /// Stage an update of a persisted entity.
    async fn update(&self, entity: E) -> DataResult<()>;

    /// Stage an update and return the entity that will be stored.
    async fn merge(&self, entity: E) -> DataResult<E> {
        debug!("Merging {} {:?}", E::entity_name(), entity.id());
        self.update(entity.clone()).await?;
        Ok(entity)
    }

    async fn delete(&self, entity: &E) -> DataResult<()>;

    /// Stage deletion of every matching row, returning how many matched.
    async fn delete_where(&self, predicate: Predicate<E>) -> DataResult<usize>;
}
