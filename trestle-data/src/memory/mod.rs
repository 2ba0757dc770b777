//! In-memory reference engine.
//!
//! [`MemoryServer`] holds named databases; [`MemoryPool`] opens
//! [`MemorySession`]s on one of them; [`MemoryRepository`] reads and stages
//! writes through a session. It supports every [`Capability`](crate::Capability)
//! and is what the test suites and the tenancy crate's default provider use.

mod database;
mod repository;
mod server;
mod session;
mod table;

pub use database::MemoryDatabase;
pub use repository::MemoryRepository;
pub use server::{MemoryPool, MemoryServer};
pub use session::MemorySession;
