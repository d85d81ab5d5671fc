//! Response Cache Storage Abstraction
//!
//! A platform key-value store holding any number of named caches, each of
//! which maps a request key to a captured response:
//! - Desktop: SQLite (`bridge-desktop`)
//! - Web: the browser Cache Storage API
//! - Tests: an in-memory map (`core-offline`)
//!
//! The trait is deliberately thin. Normalizing requests into keys, deciding
//! what to store and when, and fetching from the network all live in the core.

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use std::collections::HashMap;

use crate::error::Result;
use crate::http::HttpResponse;

/// Immutable capture of a network response at the time it was stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedResponse {
    pub status: u16,
    pub headers: HashMap<String, String>,
    pub body: Bytes,
    pub stored_at: DateTime<Utc>,
}

impl CachedResponse {
    /// Take a snapshot of `response`. The body buffer is shared, not copied,
    /// and the response stays usable by the caller.
    pub fn capture(response: &HttpResponse, stored_at: DateTime<Utc>) -> Self {
        Self {
            status: response.status,
            headers: response.headers.clone(),
            body: response.body.clone(),
            stored_at,
        }
    }

    /// Rebuild a response from the snapshot, verbatim.
    pub fn to_response(&self) -> HttpResponse {
        HttpResponse {
            status: self.status,
            headers: self.headers.clone(),
            body: self.body.clone(),
        }
    }

    /// Number of bytes this entry accounts for against a storage quota.
    pub fn size_bytes(&self) -> u64 {
        let headers: usize = self
            .headers
            .iter()
            .map(|(key, value)| key.len() + value.len())
            .sum();
        (self.body.len() + headers) as u64
    }
}

/// Named response caches.
///
/// Every method is async and may suspend; callers must not assume ordering
/// between concurrent calls beyond "last write for a key wins".
///
/// # Example
///
/// ```ignore
/// use bridge_traits::cache::CacheStorage;
///
/// async fn warm(storage: &dyn CacheStorage, entry: CachedResponse) -> Result<()> {
///     storage.open("app-cache-v1").await?;
///     storage.put("app-cache-v1", "GET https://example.com/", entry).await
/// }
/// ```
#[async_trait]
pub trait CacheStorage: Send + Sync {
    /// Create the named cache if it does not exist. Idempotent.
    async fn open(&self, cache_name: &str) -> Result<()>;

    /// Whether the named cache exists.
    async fn has(&self, cache_name: &str) -> Result<bool>;

    /// Delete a cache and all its entries. Returns `false` if it did not exist.
    async fn delete(&self, cache_name: &str) -> Result<bool>;

    /// Names of all existing caches, in creation order.
    async fn keys(&self) -> Result<Vec<String>>;

    /// Look up a single entry.
    async fn match_entry(&self, cache_name: &str, key: &str) -> Result<Option<CachedResponse>>;

    /// Insert or overwrite a single entry. The cache must have been opened.
    async fn put(&self, cache_name: &str, key: &str, response: CachedResponse) -> Result<()>;

    /// Insert or overwrite several entries as one unit: either every entry is
    /// written or none is.
    async fn put_batch(&self, cache_name: &str, entries: Vec<(String, CachedResponse)>)
        -> Result<()>;

    /// Keys of every entry in the named cache.
    async fn entry_keys(&self, cache_name: &str) -> Result<Vec<String>>;
}
