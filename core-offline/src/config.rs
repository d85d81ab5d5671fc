//! Cache configuration
//!
//! Everything deployment-specific lives here: the generation name, the scope
//! relative identifiers resolve against, and the bootstrap asset list.

use crate::error::{OfflineError, Result};
use crate::store::StoreId;
use serde::{Deserialize, Serialize};
use url::Url;

/// Configuration for one cache controller deployment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Application prefix of every store generation name
    pub cache_prefix: String,

    /// Generation version. Changing it starts a fresh, empty store.
    pub version: String,

    /// Base URL relative resource identifiers are resolved against
    pub scope: String,

    /// Bootstrap assets cached eagerly at install time, best-effort
    pub shell_files: Vec<String>,

    /// Parallel fetches allowed inside one bulk population (default: 6)
    pub max_concurrent_fetches: usize,

    /// Delete every other generation of this prefix on activation
    pub purge_stale_generations: bool,

    /// Collapse concurrent misses for the same request into one network call
    pub coalesce_concurrent_misses: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            cache_prefix: "nossa-musica-cache".to_string(),
            version: "v1".to_string(),
            scope: "http://localhost/".to_string(),
            shell_files: default_shell_files(),
            max_concurrent_fetches: 6,
            purge_stale_generations: false,
            coalesce_concurrent_misses: false,
        }
    }
}

fn default_shell_files() -> Vec<String> {
    [
        "/",
        "index.html",
        "https://cdn.tailwindcss.com",
        "manifest.json",
        "icons/icon-192x192.png",
        "favicon.png",
        "favicon.jpg",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}

impl CacheConfig {
    /// Create a new cache configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a configuration from a JSON object. Missing fields take their
    /// default values.
    pub fn from_json(json: &str) -> Result<Self> {
        let value: serde_json::Value = serde_json::from_str(json)
            .map_err(|e| OfflineError::Config(format!("Invalid cache config JSON: {}", e)))?;
        // Sequences would otherwise decode positionally into the fields
        if !value.is_object() {
            return Err(OfflineError::Config(
                "Cache config JSON must be an object".to_string(),
            ));
        }

        let config: Self = serde_json::from_value(value)
            .map_err(|e| OfflineError::Config(format!("Invalid cache config JSON: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Set the generation version.
    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    /// Set the base URL for relative identifiers.
    pub fn with_scope(mut self, scope: impl Into<String>) -> Self {
        self.scope = scope.into();
        self
    }

    /// Replace the bootstrap asset list.
    pub fn with_shell_files<I, S>(mut self, files: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.shell_files = files.into_iter().map(Into::into).collect();
        self
    }

    /// Set maximum parallel fetches per bulk population.
    pub fn with_max_concurrent_fetches(mut self, count: usize) -> Self {
        self.max_concurrent_fetches = count;
        self
    }

    /// Enable or disable deleting superseded generations on activation.
    pub fn with_stale_generation_purge(mut self, enabled: bool) -> Self {
        self.purge_stale_generations = enabled;
        self
    }

    /// Enable or disable de-duplication of concurrent identical misses.
    pub fn with_miss_coalescing(mut self, enabled: bool) -> Self {
        self.coalesce_concurrent_misses = enabled;
        self
    }

    /// Name of the store generation this configuration targets.
    pub fn store_id(&self) -> StoreId {
        StoreId::new(format!("{}-{}", self.cache_prefix, self.version))
    }

    /// Parsed scope URL.
    pub fn scope_url(&self) -> Result<Url> {
        let scope = Url::parse(&self.scope)
            .map_err(|e| OfflineError::Config(format!("Invalid scope '{}': {}", self.scope, e)))?;

        if !matches!(scope.scheme(), "http" | "https") {
            return Err(OfflineError::Config(format!(
                "Scope must be an http(s) URL, got '{}'",
                self.scope
            )));
        }
        Ok(scope)
    }

    /// Validate configuration.
    pub fn validate(&self) -> Result<()> {
        if self.cache_prefix.trim().is_empty() {
            return Err(OfflineError::Config("cache_prefix cannot be empty".to_string()));
        }

        if self.version.trim().is_empty() {
            return Err(OfflineError::Config("version cannot be empty".to_string()));
        }

        if self.max_concurrent_fetches == 0 {
            return Err(OfflineError::Config(
                "max_concurrent_fetches must be at least 1".to_string(),
            ));
        }

        self.scope_url()?;
        Ok(())
    }
}
