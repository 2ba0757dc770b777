//! Entity identity and equality.
//!
//! An entity is *transient* while its id still holds the type's default value
//! and *persisted* once an id has been assigned. Two entities are equal when
//! they share a concrete type and either
//!
//! - both are persisted and their ids are equal, or
//! - both are transient and their domain signatures are equal.
//!
//! A transient entity never equals a persisted one. The signature is declared
//! statically through [`Entity::Signature`]; a type that wants every
//! transient instance to compare equal says so with `type Signature = ();`.
//!
//! ```rust
//! use trestle_data::Entity;
//!
//! #[derive(Clone, Debug)]
//! struct Customer {
//!     id: u64,
//!     email: String,
//!     name: String,
//! }
//!
//! impl Entity for Customer {
//!     type Id = u64;
//!     type Signature = String;
//!
//!     fn id(&self) -> &u64 {
//!         &self.id
//!     }
//!
//!     fn set_id(&mut self, id: u64) {
//!         self.id = id;
//!     }
//!
//!     fn signature(&self) -> String {
//!         self.email.clone()
//!     }
//! }
//!
//! let a = Customer { id: 0, email: "a@x.io".into(), name: "A".into() };
//! let b = Customer { id: 0, email: "a@x.io".into(), name: "Other".into() };
//! assert!(a.entity_eq(&b));
//! ```

use crate::{DataError, DataResult};
use std::any::{Any, TypeId};
use std::collections::hash_map::DefaultHasher;
use std::fmt::Debug;
use std::hash::{Hash, Hasher};
use std::ops::Deref;
use std::sync::OnceLock;
use uuid::Uuid;

/// Identifier type of an entity. `Default::default()` is the transient id.
pub trait EntityId: Clone + Eq + Hash + Debug + Default + Send + Sync + 'static {}

impl<T> EntityId for T where T: Clone + Eq + Hash + Debug + Default + Send + Sync + 'static {}

/// Identifiers a storage engine can assign on insert.
pub trait GeneratedId: EntityId {
    /// Produce a fresh id. `sequence` is a per-database counter starting at 1.
    ///
    /// Fails with [`DataError::Storage`] once the sequence no longer fits the
    /// id type.
    fn generate(sequence: u64) -> DataResult<Self>;
}

macro_rules! sequence_ids {
    ($($ty:ty),*) => {
        $(
            impl GeneratedId for $ty {
                fn generate(sequence: u64) -> DataResult<Self> {
                    <$ty>::try_from(sequence).map_err(|_| {
                        DataError::Storage(format!(
                            "id sequence {} exceeds the range of {}",
                            sequence,
                            stringify!($ty)
                        ))
                    })
                }
            }
        )*
    };
}

sequence_ids!(u32, u64, i32, i64);

impl GeneratedId for Uuid {
    fn generate(_sequence: u64) -> DataResult<Self> {
        Ok(Uuid::new_v4())
    }
}

impl GeneratedId for String {
    fn generate(_sequence: u64) -> DataResult<Self> {
        Ok(Uuid::new_v4().to_string())
    }
}

/// A persistable domain object with identity.
pub trait Entity: Clone + Send + Sync + 'static {
    /// Identifier type.
    type Id: EntityId;

    /// Domain-equality key used while the entity is transient.
    type Signature: Eq + Hash;

    fn id(&self) -> &Self::Id;

    fn set_id(&mut self, id: Self::Id);

    fn signature(&self) -> Self::Signature;

    /// Short type name used in log lines and error messages.
    fn entity_name() -> &'static str {
        let full = std::any::type_name::<Self>();
        full.rsplit("::").next().unwrap_or(full)
    }

    /// True while no id has been assigned.
    fn is_transient(&self) -> bool {
        *self.id() == Self::Id::default()
    }

    /// Identity equality between two entities of the same type.
    fn entity_eq(&self, other: &Self) -> bool {
        match (self.is_transient(), other.is_transient()) {
            (false, false) => self.id() == other.id(),
            (true, true) => self.signature() == other.signature(),
            _ => false,
        }
    }

    /// Identity equality against a value of unknown type.
    ///
    /// Values of any other concrete type are never equal.
    fn eq_dyn(&self, other: &dyn Any) -> bool {
        other
            .downcast_ref::<Self>()
            .is_some_and(|other| self.entity_eq(other))
    }

    /// Hash consistent with [`Entity::entity_eq`].
    fn entity_hash(&self) -> u64 {
        let mut hasher = DefaultHasher::new();
        TypeId::of::<Self>().hash(&mut hasher);
        if self.is_transient() {
            true.hash(&mut hasher);
            self.signature().hash(&mut hasher);
        } else {
            false.hash(&mut hasher);
            self.id().hash(&mut hasher);
        }
        hasher.finish()
    }
}

/// Hash-map key wrapper giving an entity identity semantics.
///
/// The hash is computed on first use and then fixed for the lifetime of the
/// key, so mutating non-identity fields through [`EntityKey::get_mut`] never
/// moves the key within a map. Assigning an id to a key that already sits in
/// a hashed collection is not supported.
pub struct EntityKey<E: Entity> {
    entity: E,
    hash: OnceLock<u64>,
}

impl<E: Entity> EntityKey<E> {
    pub fn new(entity: E) -> Self {
        Self {
            entity,
            hash: OnceLock::new(),
        }
    }

    pub fn get(&self) -> &E {
        &self.entity
    }

    pub fn get_mut(&mut self) -> &mut E {
        &mut self.entity
    }

    pub fn into_inner(self) -> E {
        self.entity
    }

    fn cached_hash(&self) -> u64 {
        *self.hash.get_or_init(|| self.entity.entity_hash())
    }
}

impl<E: Entity> Clone for EntityKey<E> {
    fn clone(&self) -> Self {
        Self {
            entity: self.entity.clone(),
            hash: self.hash.clone(),
        }
    }
}

impl<E: Entity + Debug> Debug for EntityKey<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("EntityKey").field(&self.entity).finish()
    }
}

impl<E: Entity> Deref for EntityKey<E> {
    type Target = E;

    fn deref(&self) -> &E {
        &self.entity
    }
}

impl<E: Entity> From<E> for EntityKey<E> {
    fn from(entity: E) -> Self {
        Self::new(entity)
    }
}

impl<E: Entity> PartialEq for EntityKey<E> {
    fn eq(&self, other: &Self) -> bool {
        self.entity.entity_eq(&other.entity)
    }
}

impl<E: Entity> Eq for EntityKey<E> {}

impl<E: Entity> Hash for EntityKey<E> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        state.write_u64(self.cached_hash());
    }
}
