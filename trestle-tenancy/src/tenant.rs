//! Tenant records.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

/// Storage backend a tenant's connection string points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DbType {
    #[default]
    Memory,
    Postgres,
    MySql,
    Sqlite,
    Document,
}

impl DbType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DbType::Memory => "memory",
            DbType::Postgres => "postgres",
            DbType::MySql => "mysql",
            DbType::Sqlite => "sqlite",
            DbType::Document => "document",
        }
    }
}

impl fmt::Display for DbType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DbType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "memory" => Ok(DbType::Memory),
            "postgres" | "postgresql" => Ok(DbType::Postgres),
            "mysql" => Ok(DbType::MySql),
            "sqlite" => Ok(DbType::Sqlite),
            "document" | "mongo" | "mongodb" => Ok(DbType::Document),
            other => Err(format!("unknown database type '{}'", other)),
        }
    }
}

fn default_active() -> bool {
    true
}

/// Tenant information
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Tenant {
    /// Unique tenant identifier
    pub id: String,

    /// Tenant name/slug
    #[serde(default)]
    pub name: String,

    /// Host names routed to this tenant, lower-cased
    #[serde(default)]
    pub hostnames: Vec<String>,

    /// Connection string of the tenant's database
    #[serde(default)]
    pub connection_string: String,

    #[serde(default)]
    pub db_type: DbType,

    /// Whether tenant is active
    #[serde(default = "default_active")]
    pub active: bool,

    /// Additional metadata
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

impl Tenant {
    /// Create a new tenant
    ///
    /// # Examples
    ///
    /// ```
    /// use trestle_tenancy::Tenant;
    ///
    /// let tenant = Tenant::new("tenant-123", "acme-corp")
    ///     .with_hostname("Acme.Example.com")
    ///     .with_connection_string("db_a");
    /// assert!(tenant.serves_host("acme.example.com"));
    /// ```
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            hostnames: Vec::new(),
            connection_string: String::new(),
            db_type: DbType::default(),
            active: true,
            metadata: HashMap::new(),
        }
    }

    /// Route a host name to this tenant
    pub fn with_hostname(mut self, hostname: impl Into<String>) -> Self {
        self.hostnames.push(hostname.into().to_lowercase());
        self
    }

    pub fn with_connection_string(mut self, connection_string: impl Into<String>) -> Self {
        self.connection_string = connection_string.into();
        self
    }

    pub fn with_db_type(mut self, db_type: DbType) -> Self {
        self.db_type = db_type;
        self
    }

    /// Set active status
    pub fn with_active(mut self, active: bool) -> Self {
        self.active = active;
        self
    }

    /// Add metadata
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn serves_host(&self, host: &str) -> bool {
        self.hostnames.iter().any(|h| h.eq_ignore_ascii_case(host))
    }

    /// Every identifier the tenant is known by: its id, then its host names.
    pub fn identifiers(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.id.as_str()).chain(self.hostnames.iter().map(String::as_str))
    }

    /// Lower-case host names in place.
    pub(crate) fn normalize(&mut self) {
        for host in &mut self.hostnames {
            *host = host.trim().to_lowercase();
        }
    }
}
