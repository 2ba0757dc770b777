//! Committed storage for one in-memory database.

use super::table::{AnyChangeSet, AnyTable, Table};
use crate::{DataError, DataResult, Entity};
use parking_lot::RwLock;
use std::any::TypeId;
use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use trestle_log::trace;

/// A named database holding one table per entity type.
///
/// Commits are atomic across tables: staged changes are applied to copies of
/// the affected tables and the copies are swapped in only when every change
/// succeeded.
pub struct MemoryDatabase {
    name: String,
    tables: RwLock<HashMap<TypeId, Box<dyn AnyTable>>>,
    sequence: AtomicU64,
    commits: AtomicU64,
    opened: AtomicUsize,
    released: AtomicUsize,
}

impl MemoryDatabase {
    pub fn new(name: impl Into<String>) -> DataResult<Self> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(DataError::InvalidConnection("database name is empty".into()));
        }
        Ok(Self {
            name,
            tables: RwLock::new(HashMap::new()),
            sequence: AtomicU64::new(0),
            commits: AtomicU64::new(0),
            opened: AtomicUsize::new(0),
            released: AtomicUsize::new(0),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Committed rows of `E` in insertion order.
    pub fn rows<E: Entity>(&self) -> Vec<E> {
        self.tables
            .read()
            .get(&TypeId::of::<E>())
            .and_then(|table| table.as_any().downcast_ref::<Table<E>>())
            .map(Table::rows)
            .unwrap_or_default()
    }

    /// Number of committed rows of `E`.
    pub fn count<E: Entity>(&self) -> usize {
        self.tables
            .read()
            .get(&TypeId::of::<E>())
            .map(|table| table.len())
            .unwrap_or(0)
    }

    pub fn commit_count(&self) -> u64 {
        self.commits.load(Ordering::Acquire)
    }

    pub fn opened_connections(&self) -> usize {
        self.opened.load(Ordering::Acquire)
    }

    pub fn released_connections(&self) -> usize {
        self.released.load(Ordering::Acquire)
    }

    pub fn active_connections(&self) -> usize {
        self.opened_connections()
            .saturating_sub(self.released_connections())
    }

    pub(crate) fn connection_opened(&self) {
        self.opened.fetch_add(1, Ordering::AcqRel);
    }

    pub(crate) fn connection_released(&self) {
        self.released.fetch_add(1, Ordering::AcqRel);
    }

    pub(crate) fn next_sequence(&self) -> u64 {
        self.sequence.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Copy of the committed table for `E`, empty if it does not exist yet.
    pub(crate) fn snapshot<E: Entity>(&self) -> Table<E> {
        self.tables
            .read()
            .get(&TypeId::of::<E>())
            .and_then(|table| table.as_any().downcast_ref::<Table<E>>())
            .cloned()
            .unwrap_or_else(Table::new)
    }

    /// Apply every change set or none of them.
    pub(crate) fn apply(&self, changes: &[Box<dyn AnyChangeSet>]) -> DataResult<usize> {
        let mut tables = self.tables.write();
        let mut staged: HashMap<TypeId, Box<dyn AnyTable>> = HashMap::new();
        let mut written = 0;

        for change in changes {
            let type_id = change.entity_type();
            let table = match staged.entry(type_id) {
                Entry::Occupied(entry) => entry.into_mut(),
                Entry::Vacant(entry) => entry.insert(match tables.get(&type_id) {
                    Some(table) => table.clone_table(),
                    None => change.empty_table(),
                }),
            };
            written += change.apply_to(table.as_mut())?;
        }

        tables.extend(staged);
        let commit = self.commits.fetch_add(1, Ordering::AcqRel) + 1;
        trace!("Database '{}' commit #{} wrote {} rows", self.name, commit, written);
        Ok(written)
    }
}

impl std::fmt::Debug for MemoryDatabase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryDatabase")
            .field("name", &self.name)
            .field("tables", &self.tables.read().len())
            .field("active_connections", &self.active_connections())
            .finish()
    }
}
