// Typed tables and staged change sets, erased behind `Any` so one database
// can hold tables for any number of entity types.

use crate::{DataError, DataResult, Entity};
use std::any::{Any, TypeId};
use std::collections::HashMap;

#[derive(Clone)]
pub(crate) struct Row<E> {
    pub seq: u64,
    pub entity: E,
}

pub(crate) struct Table<E: Entity> {
    rows: HashMap<E::Id, Row<E>>,
}

impl<E: Entity> Clone for Table<E> {
    fn clone(&self) -> Self {
        Self {
            rows: self.rows.clone(),
        }
    }
}

impl<E: Entity> Table<E> {
    pub fn new() -> Self {
        Self {
            rows: HashMap::new(),
        }
    }

    pub fn get(&self, id: &E::Id) -> Option<&E> {
        self.rows.get(id).map(|row| &row.entity)
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Rows in insertion order.
    pub fn rows(&self) -> Vec<E> {
        let mut rows: Vec<&Row<E>> = self.rows.values().collect();
        rows.sort_by_key(|row| row.seq);
        rows.into_iter().map(|row| row.entity.clone()).collect()
    }

    fn insert(&mut self, seq: u64, entity: E) -> DataResult<()> {
        if self.rows.contains_key(entity.id()) {
            return Err(DataError::Conflict(format!(
                "{} {:?} already exists",
                E::entity_name(),
                entity.id()
            )));
        }
        self.rows.insert(entity.id().clone(), Row { seq, entity });
        Ok(())
    }

    fn update(&mut self, entity: E) -> DataResult<()> {
        match self.rows.get_mut(entity.id()) {
            Some(row) => {
                row.entity = entity;
                Ok(())
            }
            None => Err(DataError::Missing(format!(
                "{} {:?} does not exist",
                E::entity_name(),
                entity.id()
            ))),
        }
    }

    fn delete(&mut self, id: &E::Id) -> bool {
        self.rows.remove(id).is_some()
    }
}

pub(crate) trait AnyTable: Send + Sync {
    fn clone_table(&self) -> Box<dyn AnyTable>;
    fn len(&self) -> usize;
    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

impl<E: Entity> AnyTable for Table<E> {
    fn clone_table(&self) -> Box<dyn AnyTable> {
        Box::new(self.clone())
    }

    fn len(&self) -> usize {
        self.rows.len()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

pub(crate) enum Change<E: Entity> {
    Insert { seq: u64, entity: E },
    Update(E),
    Delete(E::Id),
}

/// Writes staged against one table, in the order they were made.
pub(crate) struct ChangeSet<E: Entity> {
    changes: Vec<Change<E>>,
}

impl<E: Entity> ChangeSet<E> {
    pub fn new() -> Self {
        Self {
            changes: Vec::new(),
        }
    }

    pub fn push(&mut self, change: Change<E>) {
        self.changes.push(change);
    }

    /// Apply to `table`. Strict application stops at the first conflict or
    /// missing row; lenient application (used to build read views) skips them.
    pub fn apply(&self, table: &mut Table<E>, strict: bool) -> DataResult<usize> {
        let mut written = 0;
        for change in &self.changes {
            let result = match change {
                Change::Insert { seq, entity } => table.insert(*seq, entity.clone()),
                Change::Update(entity) => table.update(entity.clone()),
                Change::Delete(id) => {
                    if table.delete(id) {
                        Ok(())
                    } else {
                        continue;
                    }
                }
            };
            match result {
                Ok(()) => written += 1,
                Err(err) if strict => return Err(err),
                Err(_) => {}
            }
        }
        Ok(written)
    }
}

pub(crate) trait AnyChangeSet: Send + Sync {
    fn entity_type(&self) -> TypeId;
    fn empty_table(&self) -> Box<dyn AnyTable>;
    fn apply_to(&self, table: &mut dyn AnyTable) -> DataResult<usize>;
    fn len(&self) -> usize;
    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

impl<E: Entity> AnyChangeSet for ChangeSet<E> {
    fn entity_type(&self) -> TypeId {
        TypeId::of::<E>()
    }

    fn empty_table(&self) -> Box<dyn AnyTable> {
        Box::new(Table::<E>::new())
    }

    fn apply_to(&self, table: &mut dyn AnyTable) -> DataResult<usize> {
        let table = table
            .as_any_mut()
            .downcast_mut::<Table<E>>()
            .ok_or_else(|| DataError::Storage(format!("table type mismatch for {}", E::entity_name())))?;
        self.apply(table, true)
    }

    fn len(&self) -> usize {
        self.changes.len()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}
