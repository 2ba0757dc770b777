//! Lazily evaluated query handles.

use crate::{Capability, DataError, DataResult, Entity};
use async_trait::async_trait;
use std::sync::Arc;
use trestle_log::trace;

/// Shared row predicate.
pub type Predicate<E> = Arc<dyn Fn(&E) -> bool + Send + Sync>;

/// Wrap a closure as a [`Predicate`].
pub fn predicate<E, F>(f: F) -> Predicate<E>
where
    F: Fn(&E) -> bool + Send + Sync + 'static,
{
    Arc::new(f)
}

/// Everything a backend needs to evaluate a query.
pub struct QuerySpec<E> {
    pub predicates: Vec<Predicate<E>>,
    /// Relations to load eagerly.
    pub includes: Vec<String>,
    /// Results will not be tracked for changes.
    pub read_only: bool,
    pub skip: usize,
    pub take: Option<usize>,
}

impl<E> QuerySpec<E> {
    pub fn new(read_only: bool) -> Self {
        Self {
            predicates: Vec::new(),
            includes: Vec::new(),
            read_only,
            skip: 0,
            take: None,
        }
    }

    /// True when the row passes every predicate.
    pub fn matches(&self, row: &E) -> bool {
        self.predicates.iter().all(|p| p(row))
    }

    pub fn is_windowed(&self) -> bool {
        self.skip > 0 || self.take.is_some()
    }

    /// Filter then window an ordered row set.
    pub fn apply<I>(&self, rows: I) -> Vec<E>
    where
        I: IntoIterator<Item = E>,
    {
        rows.into_iter()
            .filter(|row| self.matches(row))
            .skip(self.skip)
            .take(self.take.unwrap_or(usize::MAX))
            .collect()
    }
}

impl<E> Clone for QuerySpec<E> {
    fn clone(&self) -> Self {
        Self {
            predicates: self.predicates.clone(),
            includes: self.includes.clone(),
            read_only: self.read_only,
            skip: self.skip,
            take: self.take,
        }
    }
}

/// Backend side of a [`Query`].
#[async_trait]
pub trait QuerySource<E: Entity>: Send + Sync {
    /// Rows matching the spec, in stable storage order.
    async fn fetch(&self, spec: &QuerySpec<E>) -> DataResult<Vec<E>>;

    /// Number of rows matching the predicates, ignoring skip/take.
    async fn count(&self, spec: &QuerySpec<E>) -> DataResult<usize>;

    fn supports(&self, _capability: Capability) -> bool {
        true
    }
}

/// A deferred, composable query over one entity type.
///
/// Nothing runs until a materializer ([`Query::to_vec`], [`Query::first`],
/// [`Query::count`]) consumes the handle.
///
/// ```rust,ignore
/// let open = orders
///     .filter(|o: &Order| o.open)
///     .include("lines")
///     .take(20)
///     .to_vec()
///     .await?;
/// ```
pub struct Query<E: Entity> {
    source: Arc<dyn QuerySource<E>>,
    spec: QuerySpec<E>,
}

impl<E: Entity> Query<E> {
    pub fn new(source: Arc<dyn QuerySource<E>>, read_only: bool) -> Self {
        Self {
            source,
            spec: QuerySpec::new(read_only),
        }
    }

    pub fn filter<F>(self, f: F) -> Self
    where
        F: Fn(&E) -> bool + Send + Sync + 'static,
    {
        self.filter_by(Arc::new(f))
    }

    pub fn filter_by(mut self, predicate: Predicate<E>) -> Self {
        self.spec.predicates.push(predicate);
        self
    }

    /// Eagerly load a named relation.
    pub fn include(mut self, relation: impl Into<String>) -> Self {
        self.spec.includes.push(relation.into());
        self
    }

    pub fn skip(mut self, n: usize) -> Self {
        self.spec.skip = n;
        self
    }

    pub fn take(mut self, n: usize) -> Self {
        self.spec.take = Some(n);
        self
    }

    pub fn read_only(mut self) -> Self {
        self.spec.read_only = true;
        self
    }

    pub fn is_read_only(&self) -> bool {
        self.spec.read_only
    }

    pub fn spec(&self) -> &QuerySpec<E> {
        &self.spec
    }

    fn check_capabilities(&self) -> DataResult<()> {
        if !self.spec.includes.is_empty() && !self.source.supports(Capability::EagerLoad) {
            return Err(DataError::Unsupported(Capability::EagerLoad));
        }
        if self.spec.is_windowed() && !self.source.supports(Capability::Paging) {
            return Err(DataError::Unsupported(Capability::Paging));
        }
        Ok(())
    }

    /// Run the query and collect every row.
    pub async fn to_vec(self) -> DataResult<Vec<E>> {
        self.check_capabilities()?;
        trace!(
            "Fetching {} ({} predicates, skip {}, take {:?})",
            E::entity_name(),
            self.spec.predicates.len(),
            self.spec.skip,
            self.spec.take
        );
        self.source.fetch(&self.spec).await
    }

    /// Run the query and return the first row, if any.
    pub async fn first(mut self) -> DataResult<Option<E>> {
        if self.source.supports(Capability::Paging) {
            self.spec.take = Some(1);
        }
        Ok(self.to_vec().await?.into_iter().next())
    }

    /// Count rows matching the filters; skip and take are ignored.
    pub async fn count(self) -> DataResult<usize> {
        self.check_capabilities()?;
        self.source.count(&self.spec).await
    }
}
