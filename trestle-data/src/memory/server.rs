//! Registry of in-memory databases and per-database pools.

use super::{MemoryDatabase, MemorySession};
use crate::{DataError, DataResult, UnitOfWork};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use trestle_core::{CancellationToken, Disposable, DisposeFlag};
use trestle_log::{debug, info};

const SCHEME: &str = "memory://";

/// Named in-memory databases addressed by connection string.
///
/// A connection string is either a bare database name (`"db_a"`) or the same
/// name behind a `memory://` scheme.
#[derive(Default)]
pub struct MemoryServer {
    databases: RwLock<HashMap<String, Arc<MemoryDatabase>>>,
    auto_create: bool,
}

impl MemoryServer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create unknown databases on first connect instead of failing.
    pub fn with_auto_create(mut self, auto_create: bool) -> Self {
        self.auto_create = auto_create;
        self
    }

    fn database_name(connection_string: &str) -> DataResult<&str> {
        let trimmed = connection_string.trim();
        let name = trimmed.strip_prefix(SCHEME).unwrap_or(trimmed);
        if name.is_empty() {
            return Err(DataError::InvalidConnection(
                "connection string is empty".into(),
            ));
        }
        Ok(name)
    }

    /// Create a database, or return the existing one with the same name.
    pub fn create_database(&self, connection_string: &str) -> DataResult<Arc<MemoryDatabase>> {
        let name = Self::database_name(connection_string)?;
        let mut databases = self.databases.write();
        if let Some(existing) = databases.get(name) {
            return Ok(existing.clone());
        }
        let database = Arc::new(MemoryDatabase::new(name)?);
        databases.insert(name.to_string(), database.clone());
        info!("Created in-memory database '{}'", name);
        Ok(database)
    }

    pub fn database(&self, connection_string: &str) -> Option<Arc<MemoryDatabase>> {
        let name = Self::database_name(connection_string).ok()?;
        self.databases.read().get(name).cloned()
    }

    pub fn database_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.databases.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// Open a pool for the database named by `connection_string`.
    pub fn connect(&self, connection_string: &str) -> DataResult<MemoryPool> {
        let name = Self::database_name(connection_string)?;
        let database = match self.database(name) {
            Some(database) => database,
            None if self.auto_create => self.create_database(name)?,
            None => {
                return Err(DataError::InvalidConnection(format!(
                    "unknown database '{}'",
                    name
                )));
            }
        };
        debug!("Connected pool to '{}'", name);
        Ok(MemoryPool::new(database))
    }
}

/// Source of sessions for one database.
///
/// Disposing the pool stops it from handing out sessions; sessions already
/// open keep working until they are released.
pub struct MemoryPool {
    database: Arc<MemoryDatabase>,
    sessions_opened: AtomicUsize,
    disposed: DisposeFlag,
}

impl MemoryPool {
    pub fn new(database: Arc<MemoryDatabase>) -> Self {
        Self {
            database,
            sessions_opened: AtomicUsize::new(0),
            disposed: DisposeFlag::new(),
        }
    }

    pub fn database(&self) -> &Arc<MemoryDatabase> {
        &self.database
    }

    pub fn sessions_opened(&self) -> usize {
        self.sessions_opened.load(Ordering::Acquire)
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.is_disposed()
    }

    pub fn open_session(&self, cancellation: CancellationToken) -> DataResult<Arc<MemorySession>> {
        if self.disposed.is_disposed() {
            return Err(DataError::Disposed);
        }
        self.sessions_opened.fetch_add(1, Ordering::AcqRel);
        Ok(MemorySession::open(self.database.clone(), cancellation))
    }

    /// Open a session wrapped in a [`UnitOfWork`].
    pub fn unit_of_work(&self, cancellation: CancellationToken) -> DataResult<UnitOfWork<MemorySession>> {
        Ok(UnitOfWork::new(self.open_session(cancellation)?))
    }
}

impl Disposable for MemoryPool {
    fn dispose(&self) {
        if self.disposed.try_dispose() {
            debug!(
                "Disposed pool for '{}' after {} sessions",
                self.database.name(),
                self.sessions_opened()
            );
        }
    }
}

impl std::fmt::Debug for MemoryPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryPool")
            .field("database", &self.database.name())
            .field("sessions_opened", &self.sessions_opened())
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connect_rejects_empty_and_unknown() {
        let server = MemoryServer::new();
        assert!(matches!(server.connect("  "), Err(DataError::InvalidConnection(_))));
        assert!(matches!(server.connect("memory://"), Err(DataError::InvalidConnection(_))));
        assert!(matches!(server.connect("db_a"), Err(DataError::InvalidConnection(_))));
    }

    #[test]
    fn test_scheme_is_optional() {
        let server = MemoryServer::new();
        let created = server.create_database("memory://db_a").unwrap();
        let pool = server.connect("db_a").unwrap();
        assert!(Arc::ptr_eq(&created, pool.database()));
        assert_eq!(server.database_names(), vec!["db_a".to_string()]);
    }

    #[test]
    fn test_auto_create() {
        let server = MemoryServer::new().with_auto_create(true);
        let pool = server.connect("fresh").unwrap();
        assert_eq!(pool.database().name(), "fresh");
        assert!(server.database("fresh").is_some());
    }

    #[test]
    fn test_pool_debug_names_database() {
        let server = MemoryServer::new().with_auto_create(true);
        let pool = server.connect("db_a").unwrap();
        pool.dispose();

        let rendered = format!("{pool:?}");
        assert!(rendered.contains("\"db_a\""));
        assert!(rendered.contains("disposed: true"));
        assert!(server.connect("").unwrap_err().to_string().starts_with("Invalid connection"));
    }

    #[test]
    fn test_disposed_pool_refuses_sessions() {
        let server = MemoryServer::new().with_auto_create(true);
        let pool = server.connect("db").unwrap();
        let session = pool.open_session(CancellationToken::new()).unwrap();

        pool.dispose();
        pool.dispose();
        assert!(pool.is_disposed());
        assert!(matches!(
            pool.open_session(CancellationToken::new()),
            Err(DataError::Disposed)
        ));
        assert!(!session.is_released());
    }
}
