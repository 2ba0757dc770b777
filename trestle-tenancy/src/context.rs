//! Tenant Context
//!
//! The resolved, cached representation of a tenant plus per-tenant derived
//! state (connection pools, service handles) kept in a property bag.

use crate::tenant::Tenant;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use trestle_core::{Disposable, DisposeFlag};
use trestle_log::debug;
use uuid::Uuid;

struct Property {
    value: Arc<dyn Any + Send + Sync>,
    disposable: Option<Arc<dyn Disposable>>,
}

impl Property {
    fn plain<T: Send + Sync + 'static>(value: Arc<T>) -> Self {
        Self {
            value,
            disposable: None,
        }
    }

    fn disposable<T: Disposable + 'static>(value: Arc<T>) -> Self {
        Self {
            value: value.clone(),
            disposable: Some(value),
        }
    }

    fn downcast<T: Send + Sync + 'static>(&self) -> Option<Arc<T>> {
        self.value.clone().downcast::<T>().ok()
    }

    fn release(self) {
        if let Some(disposable) = self.disposable {
            disposable.dispose();
        }
    }
}

/// String-keyed bag of shared values.
///
/// Values registered through the `*_disposable` methods are disposed when the
/// bag is disposed, or when they are replaced under the same key.
#[derive(Default)]
pub struct Properties {
    entries: RwLock<HashMap<String, Property>>,
}

impl Properties {
    pub fn new() -> Self {
        Self::default()
    }

    fn insert(&self, key: String, property: Property) {
        let replaced = self.entries.write().insert(key, property);
        if let Some(old) = replaced {
            old.release();
        }
    }

    pub fn set<T: Send + Sync + 'static>(&self, key: impl Into<String>, value: T) {
        self.insert(key.into(), Property::plain(Arc::new(value)));
    }

    /// Store a value that must be disposed along with the context.
    pub fn set_disposable<T: Disposable + 'static>(&self, key: impl Into<String>, value: Arc<T>) {
        self.insert(key.into(), Property::disposable(value));
    }

    /// The value under `key`, if present and of type `T`.
    pub fn get<T: Send + Sync + 'static>(&self, key: &str) -> Option<Arc<T>> {
        self.entries.read().get(key).and_then(Property::downcast)
    }

    /// The value under `key`, inserting `init()` first if the key is absent
    /// or holds another type.
    pub fn get_or_insert_with<T, F>(&self, key: &str, init: F) -> Arc<T>
    where
        T: Send + Sync + 'static,
        F: FnOnce() -> T,
    {
        self.get_or_insert(key, || {
            let value = Arc::new(init());
            (value.clone(), Property::plain(value))
        })
    }

    /// Like [`Properties::get_or_insert_with`] for values that need disposal.
    pub fn get_or_insert_disposable_with<T, F>(&self, key: &str, init: F) -> Arc<T>
    where
        T: Disposable + 'static,
        F: FnOnce() -> T,
    {
        self.get_or_insert(key, || {
            let value = Arc::new(init());
            (value.clone(), Property::disposable(value))
        })
    }

    fn get_or_insert<T, F>(&self, key: &str, make: F) -> Arc<T>
    where
        T: Send + Sync + 'static,
        F: FnOnce() -> (Arc<T>, Property),
    {
        if let Some(existing) = self.get::<T>(key) {
            return existing;
        }

        let mut entries = self.entries.write();
        if let Some(existing) = entries.get(key).and_then(Property::downcast::<T>) {
            return existing;
        }
        let (value, property) = make();
        let replaced = entries.insert(key.to_string(), property);
        drop(entries);

        if let Some(old) = replaced {
            old.release();
        }
        value
    }

    /// Remove `key` without disposing it; the caller takes ownership.
    pub fn remove(&self, key: &str) -> Option<Arc<dyn Any + Send + Sync>> {
        self.entries.write().remove(key).map(|property| property.value)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.read().contains_key(key)
    }

    pub fn keys(&self) -> Vec<String> {
        self.entries.read().keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Drop every entry, disposing the disposable ones. Returns how many
    /// were disposed.
    pub fn dispose_all(&self) -> usize {
        let drained: Vec<Property> = self.entries.write().drain().map(|(_, p)| p).collect();
        let mut disposed = 0;
        for property in drained {
            if property.disposable.is_some() {
                disposed += 1;
            }
            property.release();
        }
        disposed
    }
}

impl fmt::Debug for Properties {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Properties")
            .field("keys", &self.keys())
            .finish()
    }
}

/// Tenant context shared by every request for the same tenant while cached.
///
/// The tenant record is fixed for the context's lifetime; the property bag
/// accumulates derived state. Disposing the context disposes each disposable
/// property exactly once.
pub struct TenantContext {
    id: Uuid,
    created_at: DateTime<Utc>,
    tenant: Arc<Tenant>,
    properties: Properties,
    disposed: DisposeFlag,
}

impl TenantContext {
    pub fn new(tenant: Tenant) -> Self {
        Self {
            id: Uuid::new_v4(),
            created_at: Utc::now(),
            tenant: Arc::new(tenant),
            properties: Properties::new(),
            disposed: DisposeFlag::new(),
        }
    }

    /// Unique id of this context instance.
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn tenant(&self) -> &Tenant {
        &self.tenant
    }

    pub fn tenant_arc(&self) -> Arc<Tenant> {
        self.tenant.clone()
    }

    pub fn tenant_id(&self) -> &str {
        &self.tenant.id
    }

    pub fn connection_string(&self) -> &str {
        &self.tenant.connection_string
    }

    pub fn properties(&self) -> &Properties {
        &self.properties
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.is_disposed()
    }
}

impl Disposable for TenantContext {
    fn dispose(&self) {
        if self.disposed.try_dispose() {
            let released = self.properties.dispose_all();
            debug!(
                "Disposed context {} for tenant '{}' ({} resources released)",
                self.id, self.tenant.id, released
            );
        }
    }
}

impl fmt::Debug for TenantContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TenantContext")
            .field("id", &self.id)
            .field("tenant", &self.tenant.id)
            .field("created_at", &self.created_at)
            .field("properties", &self.properties)
            .finish()
    }
}
