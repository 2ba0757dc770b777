//! # Trestle Data
//!
//! Generic repository and unit-of-work contracts.
//!
//! ## Features
//!
//! - **Entity identity**: id-based equality for persisted entities, signature
//!   equality for transient ones
//! - **Deferred queries**: composable `filter`/`include`/`skip`/`take` handles
//! - **Repositories**: one contract over any backend, with capability checks
//! - **Unit of work**: atomic commit across repositories, rollback on failure,
//!   cancellation, exactly-once release
//! - **In-memory engine**: a complete reference backend
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use trestle_data::prelude::*;
//!
//! let server = MemoryServer::new().with_auto_create(true);
//! let pool = server.connect("db_a")?;
//!
//! let mut uow = pool.unit_of_work(CancellationToken::new())?;
//! let orders = uow.repository::<Order>()?;
//! let order = orders.save(Order::new("A-1")).await?;
//! uow.commit().await?;
//!
//! let open = orders.filter(|o: &Order| o.open).to_vec().await?;
//! ```

#![warn(clippy::all)]

mod entity;
mod error;
pub mod memory;
mod pagination;
mod query;
mod repository;
mod transaction;
mod unit_of_work;

pub use entity::*;
pub use error::*;
pub use memory::{MemoryDatabase, MemoryPool, MemoryRepository, MemoryServer, MemorySession};
pub use pagination::*;
pub use query::*;
pub use repository::*;
pub use transaction::*;
pub use unit_of_work::*;

pub use trestle_core::CancellationToken;

/// Prelude module for commonly used types.
pub mod prelude {
    pub use super::{CancellationToken, DataError, DataResult};
    pub use super::{Capabilities, Capability, Repository};
    pub use super::{Entity, EntityKey, GeneratedId};
    pub use super::{IsolationLevel, ProvidesRepository, Session, TransactionState, UnitOfWork};
    pub use super::{MemoryPool, MemoryServer, MemorySession};
    pub use super::{Page, PageRequest, Predicate, Query, predicate};
}
