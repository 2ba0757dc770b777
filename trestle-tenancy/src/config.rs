//! Tenancy configuration
//!
//! The tenant registry and cache settings, loaded from TOML or JSON:
//!
//! ```toml
//! [cache]
//! sliding_expiration = "10m"
//! evict_all_on_expiry = false
//!
//! [[tenants]]
//! id = "acme"
//! name = "Acme"
//! hostnames = ["acme.example.com"]
//! connection_string = "db_a"
//! ```
//!
//! `TRESTLE_TENANT_CACHE_TTL` and `TRESTLE_TENANT_EVICT_ALL` override the
//! cache section when [`TenancyConfig::with_env_overrides`] is applied.

use crate::cache::TenantCacheOptions;
use crate::resolver::{InMemoryTenantStore, TenantError};
use crate::tenant::Tenant;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::Path;
use std::time::Duration;
use trestle_log::debug;

pub const ENV_CACHE_TTL: &str = "TRESTLE_TENANT_CACHE_TTL";
pub const ENV_EVICT_ALL: &str = "TRESTLE_TENANT_EVICT_ALL";

/// Supported configuration file formats
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileFormat {
    Json,
    Toml,
}

impl FileFormat {
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_lowercase().as_str() {
            "json" => Some(FileFormat::Json),
            "toml" => Some(FileFormat::Toml),
            _ => None,
        }
    }

    /// Detect the format from a file's extension.
    pub fn from_path(path: &Path) -> Result<Self, TenantError> {
        let ext = path
            .extension()
            .and_then(|s| s.to_str())
            .ok_or_else(|| TenantError::Config(format!("no file extension on {}", path.display())))?;

        Self::from_extension(ext)
            .ok_or_else(|| TenantError::Config(format!("unsupported config format: {}", ext)))
    }
}

fn default_sliding_expiration() -> Duration {
    TenantCacheOptions::default().sliding_expiration
}

/// `[cache]` section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "default_sliding_expiration", with = "humantime_serde")]
    pub sliding_expiration: Duration,

    #[serde(default)]
    pub evict_all_on_expiry: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            sliding_expiration: default_sliding_expiration(),
            evict_all_on_expiry: false,
        }
    }
}

impl From<&CacheConfig> for TenantCacheOptions {
    fn from(config: &CacheConfig) -> Self {
        TenantCacheOptions::new()
            .with_sliding_expiration(config.sliding_expiration)
            .with_evict_all_on_expiry(config.evict_all_on_expiry)
    }
}

#[derive(Deserialize)]
struct HumanDuration(#[serde(with = "humantime_serde")] Duration);

fn parse_duration(key: &str, raw: &str) -> Result<Duration, TenantError> {
    serde_json::from_value::<HumanDuration>(serde_json::Value::String(raw.trim().to_string()))
        .map(|HumanDuration(duration)| duration)
        .map_err(|e| TenantError::Config(format!("{}: invalid duration '{}': {}", key, raw, e)))
}

fn parse_flag(key: &str, raw: &str) -> Result<bool, TenantError> {
    match raw.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => Err(TenantError::Config(format!(
            "{}: expected a boolean, got '{}'",
            key, other
        ))),
    }
}

/// Tenant registry plus cache settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TenancyConfig {
    #[serde(default)]
    pub cache: CacheConfig,

    #[serde(default)]
    pub tenants: Vec<Tenant>,
}

impl TenancyConfig {
    pub fn from_toml_str(content: &str) -> Result<Self, TenantError> {
        toml::from_str(content)
            .map_err(|e| TenantError::Config(format!("TOML parse error: {}", e)))
    }

    pub fn from_json_str(content: &str) -> Result<Self, TenantError> {
        serde_json::from_str(content)
            .map_err(|e| TenantError::Config(format!("JSON parse error: {}", e)))
    }

    pub fn parse(content: &str, format: FileFormat) -> Result<Self, TenantError> {
        match format {
            FileFormat::Json => Self::from_json_str(content),
            FileFormat::Toml => Self::from_toml_str(content),
        }
    }

    /// Load a file, picking the format from its extension.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, TenantError> {
        let path = path.as_ref();
        let format = FileFormat::from_path(path)?;
        let content = fs::read_to_string(path).map_err(|e| {
            TenantError::Config(format!("failed to read {}: {}", path.display(), e))
        })?;

        let config = Self::parse(&content, format)?;
        debug!(
            "Loaded {} tenants from {}",
            config.tenants.len(),
            path.display()
        );
        Ok(config)
    }

    /// Apply `TRESTLE_TENANT_*` overrides from the process environment.
    pub fn with_env_overrides(self) -> Result<Self, TenantError> {
        self.with_overrides(|key| std::env::var(key).ok())
    }

    /// Apply overrides from `lookup`, keyed by environment variable name.
    pub fn with_overrides<F>(mut self, lookup: F) -> Result<Self, TenantError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(raw) = lookup(ENV_CACHE_TTL) {
            self.cache.sliding_expiration = parse_duration(ENV_CACHE_TTL, &raw)?;
        }
        if let Some(raw) = lookup(ENV_EVICT_ALL) {
            self.cache.evict_all_on_expiry = parse_flag(ENV_EVICT_ALL, &raw)?;
        }
        Ok(self)
    }

    /// Reject registries that cannot be served.
    pub fn validate(&self) -> Result<(), TenantError> {
        if self.cache.sliding_expiration.is_zero() {
            return Err(TenantError::Config(
                "cache.sliding_expiration must be positive".to_string(),
            ));
        }

        let mut ids = HashSet::new();
        let mut hosts = HashSet::new();
        for tenant in &self.tenants {
            if tenant.id.trim().is_empty() {
                return Err(TenantError::Config("tenant with empty id".to_string()));
            }
            if !ids.insert(tenant.id.as_str()) {
                return Err(TenantError::Config(format!(
                    "duplicate tenant id '{}'",
                    tenant.id
                )));
            }
            if tenant.connection_string.trim().is_empty() {
                return Err(TenantError::Config(format!(
                    "tenant '{}' has no connection string",
                    tenant.id
                )));
            }
            for host in &tenant.hostnames {
                if !hosts.insert(host.trim().to_lowercase()) {
                    return Err(TenantError::Config(format!(
                        "host '{}' is claimed by more than one tenant",
                        host
                    )));
                }
            }
        }
        Ok(())
    }

    pub fn cache_options(&self) -> TenantCacheOptions {
        TenantCacheOptions::from(&self.cache)
    }

    /// Build the in-memory registry.
    pub fn into_store(self) -> InMemoryTenantStore {
        InMemoryTenantStore::with_tenants(self.tenants)
    }
}
