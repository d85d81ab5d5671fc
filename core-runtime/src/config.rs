//! # Core Configuration Module
//!
//! Collects the host capabilities the cache core needs and validates them
//! before anything starts.
//!
//! ## Required Capabilities
//!
//! - `HttpClient` - the network behind the interception boundary
//! - `CacheStorage` - persistent named caches
//!
//! Both have desktop defaults (`ReqwestHttpClient`, `SqliteCacheStorage`) that
//! are injected automatically when the `desktop-shims` feature is enabled.
//! Without that feature a missing capability is a fail-fast
//! [`Error::CapabilityMissing`].
//!
//! ## Optional Capabilities
//!
//! - `Clock` - defaults to [`SystemClock`]
//!
//! ## Usage
//!
//! ```ignore
//! use core_runtime::config::CoreConfig;
//! use std::sync::Arc;
//!
//! let config = CoreConfig::builder()
//!     .http_client(Arc::new(MyHttpClient))
//!     .cache_storage(Arc::new(MyCacheStorage))
//!     .build()?;
//! ```
//!
//! ```should_panic
//! use core_runtime::config::CoreConfig;
//!
//! // Without desktop shims nothing can stand in for the missing bridges
//! # #[cfg(not(feature = "desktop-shims"))]
//! let config = CoreConfig::builder()
//!     .build()
//!     .expect("Should fail - missing required bridges");
//! # #[cfg(feature = "desktop-shims")]
//! # panic!("desktop shims provide defaults");
//! ```

use crate::error::{Error, Result};
use bridge_traits::{CacheStorage, Clock, HttpClient, SystemClock};
use std::path::PathBuf;
use std::sync::Arc;

/// Core configuration: the injected bridges every component is built from.
///
/// Use [`CoreConfigBuilder`] to construct instances.
#[derive(Clone)]
pub struct CoreConfig {
    /// SQLite file backing the default desktop cache storage, if one was set
    pub database_path: Option<PathBuf>,

    /// Network client for cache misses and preloads
    pub http_client: Arc<dyn HttpClient>,

    /// Persistent cache storage shared by every generation
    pub cache_storage: Arc<dyn CacheStorage>,

    /// Time source used to stamp stored responses
    pub clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for CoreConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CoreConfig")
            .field("database_path", &self.database_path)
            .field("http_client", &"HttpClient { ... }")
            .field("cache_storage", &"CacheStorage { ... }")
            .field("clock", &"Clock { ... }")
            .finish()
    }
}

impl CoreConfig {
    /// Creates a new builder for constructing a `CoreConfig`.
    pub fn builder() -> CoreConfigBuilder {
        CoreConfigBuilder::default()
    }

    /// Validates the configuration and returns an error if invalid.
    pub fn validate(&self) -> Result<()> {
        if let Some(path) = &self.database_path {
            if path.as_os_str().is_empty() {
                return Err(Error::Config("Database path cannot be empty".to_string()));
            }
        }

        Ok(())
    }
}

#[cfg(not(feature = "desktop-shims"))]
fn provide_default_http_client() -> Result<Arc<dyn HttpClient>> {
    Err(Error::capability_missing(
        "HttpClient",
        "An HttpClient is required to fetch cache misses and preload assets. \
         Desktop: enable the 'desktop-shims' feature to use ReqwestHttpClient. \
         Other hosts: inject a platform-native adapter.",
    ))
}

#[cfg(feature = "desktop-shims")]
fn provide_default_http_client() -> Result<Arc<dyn HttpClient>> {
    use bridge_desktop::ReqwestHttpClient;

    let client = ReqwestHttpClient::try_new()
        .map_err(|e| Error::Internal(format!("Failed to build default HttpClient: {}", e)))?;
    Ok(Arc::new(client))
}

#[cfg(not(feature = "desktop-shims"))]
fn provide_default_cache_storage(_database_path: Option<&PathBuf>) -> Result<Arc<dyn CacheStorage>> {
    Err(Error::capability_missing(
        "CacheStorage",
        "A CacheStorage is required to persist cached responses. \
         Desktop: enable the 'desktop-shims' feature to use SqliteCacheStorage. \
         Other hosts: inject a platform-native adapter.",
    ))
}

#[cfg(feature = "desktop-shims")]
fn provide_default_cache_storage(database_path: Option<&PathBuf>) -> Result<Arc<dyn CacheStorage>> {
    use bridge_desktop::SqliteCacheStorage;

    let path = match database_path {
        Some(path) => path.clone(),
        None => SqliteCacheStorage::default_path().ok_or_else(|| {
            Error::Config(
                "No platform cache directory found. Use .database_path() to set one.".to_string(),
            )
        })?,
    };

    let storage = SqliteCacheStorage::open_lazy(path)
        .map_err(|e| Error::Internal(format!("Failed to initialize default CacheStorage: {}", e)))?;
    Ok(Arc::new(storage))
}

/// Builder for constructing [`CoreConfig`] instances.
#[derive(Default)]
pub struct CoreConfigBuilder {
    database_path: Option<PathBuf>,
    http_client: Option<Arc<dyn HttpClient>>,
    cache_storage: Option<Arc<dyn CacheStorage>>,
    clock: Option<Arc<dyn Clock>>,
}

impl CoreConfigBuilder {
    /// Sets the SQLite file used by the default desktop cache storage.
    ///
    /// Ignored when a [`CacheStorage`] is injected explicitly.
    pub fn database_path<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.database_path = Some(path.into());
        self
    }

    /// Sets the HTTP client implementation.
    pub fn http_client(mut self, client: Arc<dyn HttpClient>) -> Self {
        self.http_client = Some(client);
        self
    }

    /// Sets the cache storage implementation.
    pub fn cache_storage(mut self, storage: Arc<dyn CacheStorage>) -> Self {
        self.cache_storage = Some(storage);
        self
    }

    /// Sets the time source.
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Builds the final `CoreConfig` instance.
    ///
    /// # Errors
    ///
    /// - A required bridge is missing and no desktop default is available
    /// - The default desktop storage cannot be set up
    /// - Configuration values are invalid
    pub fn build(self) -> Result<CoreConfig> {
        if let Some(path) = &self.database_path {
            if path.as_os_str().is_empty() {
                return Err(Error::Config("Database path cannot be empty".to_string()));
            }
        }

        let http_client = match self.http_client {
            Some(client) => client,
            None => provide_default_http_client()?,
        };

        let cache_storage = match self.cache_storage {
            Some(storage) => storage,
            None => provide_default_cache_storage(self.database_path.as_ref())?,
        };

        let config = CoreConfig {
            database_path: self.database_path,
            http_client,
            cache_storage,
            clock: self.clock.unwrap_or_else(|| Arc::new(SystemClock)),
        };

        config.validate()?;

        Ok(config)
    }
}
