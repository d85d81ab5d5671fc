//! In-memory [`CacheStorage`] for tests and ephemeral hosts.

use async_trait::async_trait;
use bridge_traits::{
    error::{BridgeError, Result},
    CacheStorage, CachedResponse,
};
use parking_lot::RwLock;
use std::collections::HashMap;

#[derive(Default)]
struct MemoryCache {
    entries: HashMap<String, CachedResponse>,
    order: Vec<String>,
}

impl MemoryCache {
    fn insert(&mut self, key: String, response: CachedResponse) {
        if self.entries.insert(key.clone(), response).is_none() {
            self.order.push(key);
        }
    }

    fn size_bytes(&self) -> u64 {
        self.entries.values().map(CachedResponse::size_bytes).sum()
    }
}

#[derive(Default)]
struct Inner {
    caches: HashMap<String, MemoryCache>,
    order: Vec<String>,
}

impl Inner {
    fn usage(&self) -> u64 {
        self.caches.values().map(MemoryCache::size_bytes).sum()
    }

    fn cache_mut(&mut self, cache_name: &str) -> Result<&mut MemoryCache> {
        self.caches.get_mut(cache_name).ok_or_else(|| {
            BridgeError::OperationFailed(format!("Cache '{}' has not been opened", cache_name))
        })
    }
}

/// Named caches held in process memory.
///
/// An optional byte quota (bodies plus headers, across every cache) makes
/// writes that would exceed it fail with [`BridgeError::QuotaExceeded`].
#[derive(Default)]
pub struct MemoryCacheStorage {
    inner: RwLock<Inner>,
    quota_bytes: Option<u64>,
}

impl MemoryCacheStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Limit total stored bytes.
    pub fn with_quota(quota_bytes: u64) -> Self {
        Self {
            inner: RwLock::new(Inner::default()),
            quota_bytes: Some(quota_bytes),
        }
    }

    /// Bytes currently stored across every cache.
    pub fn usage_bytes(&self) -> u64 {
        self.inner.read().usage()
    }

    /// Number of entries in one cache, 0 if it does not exist.
    pub fn entry_count(&self, cache_name: &str) -> usize {
        self.inner
            .read()
            .caches
            .get(cache_name)
            .map(|cache| cache.entries.len())
            .unwrap_or(0)
    }

    fn check_quota<'a>(
        &self,
        inner: &Inner,
        cache_name: &str,
        writes: impl Iterator<Item = (&'a String, &'a CachedResponse)>,
    ) -> Result<()> {
        let Some(quota) = self.quota_bytes else {
            return Ok(());
        };

        let existing = inner.caches.get(cache_name);
        let mut replaced: HashMap<&String, u64> = HashMap::new();
        let mut added = 0u64;
        for (key, response) in writes {
            // A later write for the same key in one batch replaces the earlier one
            let previous = replaced.insert(key, response.size_bytes());
            if let Some(previous) = previous {
                added -= previous;
            }
            added += response.size_bytes();
        }

        let freed: u64 = replaced
            .keys()
            .filter_map(|key| existing.and_then(|cache| cache.entries.get(*key)))
            .map(CachedResponse::size_bytes)
            .sum();

        let projected = inner.usage() - freed + added;
        if projected > quota {
            return Err(BridgeError::QuotaExceeded(format!(
                "{} bytes requested, quota is {} bytes",
                projected, quota
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl CacheStorage for MemoryCacheStorage {
    async fn open(&self, cache_name: &str) -> Result<()> {
        let mut inner = self.inner.write();
        if !inner.caches.contains_key(cache_name) {
            inner.caches.insert(cache_name.to_string(), MemoryCache::default());
            inner.order.push(cache_name.to_string());
        }
        Ok(())
    }

    async fn has(&self, cache_name: &str) -> Result<bool> {
        Ok(self.inner.read().caches.contains_key(cache_name))
    }

    async fn delete(&self, cache_name: &str) -> Result<bool> {
        let mut inner = self.inner.write();
        let existed = inner.caches.remove(cache_name).is_some();
        inner.order.retain(|name| name != cache_name);
        Ok(existed)
    }

    async fn keys(&self) -> Result<Vec<String>> {
        Ok(self.inner.read().order.clone())
    }

    async fn match_entry(&self, cache_name: &str, key: &str) -> Result<Option<CachedResponse>> {
        Ok(self
            .inner
            .read()
            .caches
            .get(cache_name)
            .and_then(|cache| cache.entries.get(key))
            .cloned())
    }

    async fn put(&self, cache_name: &str, key: &str, response: CachedResponse) -> Result<()> {
        let mut inner = self.inner.write();
        let key = key.to_string();
        inner.cache_mut(cache_name)?;
        self.check_quota(&inner, cache_name, std::iter::once((&key, &response)))?;
        inner.cache_mut(cache_name)?.insert(key, response);
        Ok(())
    }

    async fn put_batch(
        &self,
        cache_name: &str,
        entries: Vec<(String, CachedResponse)>,
    ) -> Result<()> {
        let mut inner = self.inner.write();
        inner.cache_mut(cache_name)?;
        self.check_quota(
            &inner,
            cache_name,
            entries.iter().map(|(key, response)| (key, response)),
        )?;

        let cache = inner.cache_mut(cache_name)?;
        for (key, response) in entries {
            cache.insert(key, response);
        }
        Ok(())
    }

    async fn entry_keys(&self, cache_name: &str) -> Result<Vec<String>> {
        Ok(self
            .inner
            .read()
            .caches
            .get(cache_name)
            .map(|cache| cache.order.clone())
            .unwrap_or_default())
    }
}
