//! # Store Manager
//!
//! Thin façade over the host [`CacheStorage`]: names generations, turns
//! requests into keys, and implements the two bulk population modes.
//!
//! - [`Store::put_all`] is atomic. Every resource is fetched first; entries
//!   are committed in one `put_batch` only when all of them succeeded.
//! - [`Store::add_each`] is best-effort. Each resource is fetched and stored
//!   on its own and failures are collected into a [`PopulateOutcome`].
//!
//! Both bound parallel fetches with `max_concurrent_fetches` and report
//! results in input order.

use crate::config::CacheConfig;
use crate::descriptor::RequestDescriptor;
use crate::error::{OfflineError, Result};
use bridge_traits::{CacheStorage, CachedResponse, Clock, HttpClient, HttpResponse};
use futures::stream::{self, StreamExt, TryStreamExt};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, instrument};
use url::Url;

/// Name of one store generation, e.g. `nossa-musica-cache-v1`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StoreId(String);

impl StoreId {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for StoreId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for StoreId {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

/// A resource that could not be cached during best-effort population.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailedAsset {
    pub url: String,
    pub reason: String,
}

/// Result of a best-effort population.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PopulateOutcome {
    /// Every resource was cached.
    Complete { cached: usize },
    /// Some resources failed; the rest were cached.
    PartialSuccess {
        cached: usize,
        failed: Vec<FailedAsset>,
    },
}

impl PopulateOutcome {
    pub fn cached(&self) -> usize {
        match self {
            PopulateOutcome::Complete { cached } | PopulateOutcome::PartialSuccess { cached, .. } => {
                *cached
            }
        }
    }

    pub fn failed(&self) -> &[FailedAsset] {
        match self {
            PopulateOutcome::Complete { .. } => &[],
            PopulateOutcome::PartialSuccess { failed, .. } => failed,
        }
    }

    pub fn is_complete(&self) -> bool {
        matches!(self, PopulateOutcome::Complete { .. })
    }
}

/// Why a response cannot be written to a store, if it cannot.
///
/// Partial content and `Vary: *` responses are refused, matching what
/// platform response caches accept.
pub fn unstorable_reason(response: &HttpResponse) -> Option<&'static str> {
    if response.status == 206 {
        return Some("partial content");
    }

    let varies_on_everything = response
        .header("vary")
        .map(|vary| vary.split(',').any(|field| field.trim() == "*"))
        .unwrap_or(false);
    if varies_on_everything {
        return Some("Vary: *");
    }

    None
}

/// Opens and manages store generations.
///
/// Cheap to clone; every clone shares the same storage and network bridges.
#[derive(Clone)]
pub struct StoreManager {
    storage: Arc<dyn CacheStorage>,
    http_client: Arc<dyn HttpClient>,
    clock: Arc<dyn Clock>,
    scope: Url,
    max_concurrent_fetches: usize,
}

impl StoreManager {
    pub fn new(
        storage: Arc<dyn CacheStorage>,
        http_client: Arc<dyn HttpClient>,
        clock: Arc<dyn Clock>,
        scope: Url,
    ) -> Self {
        Self {
            storage,
            http_client,
            clock,
            scope,
            max_concurrent_fetches: 6,
        }
    }

    /// Build a manager with the scope and fetch limit of `config`.
    pub fn from_config(
        config: &CacheConfig,
        storage: Arc<dyn CacheStorage>,
        http_client: Arc<dyn HttpClient>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self::new(storage, http_client, clock, config.scope_url()?)
            .with_max_concurrent_fetches(config.max_concurrent_fetches))
    }

    pub fn with_max_concurrent_fetches(mut self, count: usize) -> Self {
        self.max_concurrent_fetches = count.max(1);
        self
    }

    pub fn scope(&self) -> &Url {
        &self.scope
    }

    pub fn http_client(&self) -> &Arc<dyn HttpClient> {
        &self.http_client
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// Open a generation, creating it if absent.
    #[instrument(skip(self), fields(generation = %id))]
    pub async fn open(&self, id: &StoreId) -> Result<Store> {
        self.storage
            .open(id.as_str())
            .await
            .map_err(OfflineError::from_storage)?;

        debug!("Opened store");
        Ok(Store {
            id: id.clone(),
            manager: self.clone(),
        })
    }

    /// All existing generations, oldest first.
    pub async fn generations(&self) -> Result<Vec<StoreId>> {
        let names = self
            .storage
            .keys()
            .await
            .map_err(OfflineError::from_storage)?;
        Ok(names.into_iter().map(StoreId::new).collect())
    }

    /// Delete a generation and everything in it.
    pub async fn delete(&self, id: &StoreId) -> Result<bool> {
        self.storage
            .delete(id.as_str())
            .await
            .map_err(OfflineError::from_storage)
    }

    pub async fn has(&self, id: &StoreId) -> Result<bool> {
        self.storage
            .has(id.as_str())
            .await
            .map_err(OfflineError::from_storage)
    }

    /// Fetch a resource for bulk population: any response outside 2xx, or one
    /// the store would refuse, counts as a failure.
    async fn fetch_for_store(&self, descriptor: &RequestDescriptor) -> Result<HttpResponse> {
        let url = descriptor.url().as_str();
        let response = self
            .http_client
            .execute(descriptor.to_request())
            .await
            .map_err(|e| OfflineError::Network {
                url: url.to_string(),
                message: e.to_string(),
            })?;

        if !response.is_success() {
            return Err(OfflineError::BadStatus {
                url: url.to_string(),
                status: response.status,
            });
        }

        if let Some(reason) = unstorable_reason(&response) {
            return Err(OfflineError::Unstorable {
                url: url.to_string(),
                reason: reason.to_string(),
            });
        }

        Ok(response)
    }
}

/// Handle on one opened generation.
#[derive(Clone)]
pub struct Store {
    id: StoreId,
    manager: StoreManager,
}

impl fmt::Debug for Store {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Store").field("id", &self.id).finish()
    }
}

impl Store {
    pub fn id(&self) -> &StoreId {
        &self.id
    }

    pub fn scope(&self) -> &Url {
        self.manager.scope()
    }

    /// Look up the stored response for a request.
    pub async fn get(&self, descriptor: &RequestDescriptor) -> Result<Option<CachedResponse>> {
        self.manager
            .storage
            .match_entry(self.id.as_str(), &descriptor.key())
            .await
            .map_err(OfflineError::from_storage)
    }

    /// Store a response, replacing any previous entry for the same request.
    pub async fn put(&self, descriptor: &RequestDescriptor, response: CachedResponse) -> Result<()> {
        if !descriptor.is_cacheable() {
            return Err(OfflineError::InvalidRequest {
                url: descriptor.url().to_string(),
                reason: format!("{} responses cannot be cached", descriptor.method()),
            });
        }

        self.manager
            .storage
            .put(self.id.as_str(), &descriptor.key(), response)
            .await
            .map_err(OfflineError::from_storage)
    }

    /// Keys of every stored entry.
    pub async fn keys(&self) -> Result<Vec<String>> {
        self.manager
            .storage
            .entry_keys(self.id.as_str())
            .await
            .map_err(OfflineError::from_storage)
    }

    /// Fetch every resource and commit them together.
    ///
    /// Nothing is written unless every fetch returned a storable 2xx
    /// response. On failure the caller should treat the store contents for
    /// these URLs as unknown and resubmit the whole list.
    #[instrument(skip(self, urls), fields(generation = %self.id, count = urls.len()))]
    pub async fn put_all(&self, urls: &[String]) -> Result<usize> {
        let scope = self.manager.scope();
        let descriptors = urls
            .iter()
            .map(|url| RequestDescriptor::get(url, scope))
            .collect::<Result<Vec<_>>>()?;

        let mut seen = HashSet::with_capacity(descriptors.len());
        for descriptor in &descriptors {
            if !seen.insert(descriptor.key()) {
                return Err(OfflineError::DuplicateRequest(descriptor.url().to_string()));
            }
        }

        // Each fetch owns its inputs so the batch future stays Send
        let fetches: Vec<_> = descriptors
            .iter()
            .cloned()
            .map(|descriptor| {
                let manager = self.manager.clone();
                async move { manager.fetch_for_store(&descriptor).await }
            })
            .collect();
        let responses: Vec<HttpResponse> = stream::iter(fetches)
            .buffered(self.manager.max_concurrent_fetches)
            .try_collect()
            .await?;

        let stored_at = self.manager.clock.now();
        let entries: Vec<(String, CachedResponse)> = descriptors
            .iter()
            .zip(&responses)
            .map(|(descriptor, response)| {
                (descriptor.key(), CachedResponse::capture(response, stored_at))
            })
            .collect();
        let count = entries.len();

        self.manager
            .storage
            .put_batch(self.id.as_str(), entries)
            .await
            .map_err(OfflineError::from_storage)?;

        debug!(count, "Committed batch");
        Ok(count)
    }

    /// Fetch and store each resource independently.
    #[instrument(skip(self, urls), fields(generation = %self.id, count = urls.len()))]
    pub async fn add_each(&self, urls: &[String]) -> PopulateOutcome {
        let additions: Vec<_> = urls
            .iter()
            .cloned()
            .map(|url| {
                let store = self.clone();
                async move {
                    let result = store.add(&url).await;
                    (url, result)
                }
            })
            .collect();
        let results: Vec<(String, Result<()>)> = stream::iter(additions)
            .buffered(self.manager.max_concurrent_fetches)
            .collect()
            .await;

        let mut cached = 0;
        let mut failed = Vec::new();
        for (url, result) in results {
            match result {
                Ok(()) => cached += 1,
                Err(e) => failed.push(FailedAsset {
                    url,
                    reason: e.to_string(),
                }),
            }
        }

        if failed.is_empty() {
            PopulateOutcome::Complete { cached }
        } else {
            PopulateOutcome::PartialSuccess { cached, failed }
        }
    }

    /// Fetch and store a single resource.
    pub async fn add(&self, url: &str) -> Result<()> {
        let descriptor = RequestDescriptor::get(url, self.manager.scope())?;
        let response = self.manager.fetch_for_store(&descriptor).await?;
        let snapshot = CachedResponse::capture(&response, self.manager.clock.now());
        self.put(&descriptor, snapshot).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryCacheStorage;
    use async_trait::async_trait;
    use bridge_traits::{error::Result as BridgeResult, BridgeError, HttpRequest, SystemClock};
    use parking_lot::Mutex;

    /// Answers from a fixed route table and records every URL it was asked for.
    struct RouteClient {
        routes: Vec<(&'static str, u16, &'static str)>,
        calls: Mutex<Vec<String>>,
    }

    impl RouteClient {
        fn new(routes: Vec<(&'static str, u16, &'static str)>) -> Arc<Self> {
            Arc::new(Self {
                routes,
                calls: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl HttpClient for RouteClient {
        async fn execute(&self, request: HttpRequest) -> BridgeResult<HttpResponse> {
            self.calls.lock().push(request.url.clone());
            self.routes
                .iter()
                .find(|(url, _, _)| *url == request.url)
                .map(|(_, status, body)| HttpResponse::new(*status, *body))
                .ok_or_else(|| BridgeError::OperationFailed("connection refused".to_string()))
        }
    }

    fn manager(client: Arc<RouteClient>, storage: Arc<MemoryCacheStorage>) -> StoreManager {
        StoreManager::new(
            storage,
            client,
            Arc::new(SystemClock),
            Url::parse("http://localhost/").unwrap(),
        )
    }

    fn urls(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn test_open_is_idempotent() {
        let storage = Arc::new(MemoryCacheStorage::new());
        let manager = manager(RouteClient::new(vec![]), storage);
        let id = StoreId::new("app-cache-v1");

        manager.open(&id).await.unwrap();
        manager.open(&id).await.unwrap();

        assert_eq!(manager.generations().await.unwrap(), vec![id.clone()]);
        assert!(manager.has(&id).await.unwrap());
    }

    #[tokio::test]
    async fn test_put_all_commits_every_entry() {
        let client = RouteClient::new(vec![
            ("http://localhost/a.png", 200, "A"),
            ("http://localhost/b.png", 200, "B"),
        ]);
        let storage = Arc::new(MemoryCacheStorage::new());
        let store = manager(client, storage).open(&"c".into()).await.unwrap();

        let count = store.put_all(&urls(&["/a.png", "/b.png"])).await.unwrap();

        assert_eq!(count, 2);
        assert_eq!(
            store.keys().await.unwrap(),
            vec!["GET http://localhost/a.png", "GET http://localhost/b.png"]
        );
    }

    #[tokio::test]
    async fn test_put_all_writes_nothing_when_one_fetch_fails() {
        let client = RouteClient::new(vec![
            ("http://localhost/a.png", 200, "A"),
            ("http://localhost/missing.png", 404, "not found"),
        ]);
        let storage = Arc::new(MemoryCacheStorage::new());
        let store = manager(client, storage).open(&"c".into()).await.unwrap();

        let result = store.put_all(&urls(&["/a.png", "/missing.png"])).await;

        assert!(matches!(result, Err(OfflineError::BadStatus { status: 404, .. })));
        assert!(store.keys().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_put_all_rejects_duplicates_before_fetching() {
        let client = RouteClient::new(vec![("http://localhost/a.png", 200, "A")]);
        let storage = Arc::new(MemoryCacheStorage::new());
        let store = manager(client.clone(), storage).open(&"c".into()).await.unwrap();

        let result = store.put_all(&urls(&["/a.png", "a.png"])).await;

        assert!(matches!(result, Err(OfflineError::DuplicateRequest(_))));
        assert!(client.calls.lock().is_empty());
    }

    #[tokio::test]
    async fn test_put_all_empty_list_succeeds() {
        let storage = Arc::new(MemoryCacheStorage::new());
        let store = manager(RouteClient::new(vec![]), storage)
            .open(&"c".into())
            .await
            .unwrap();

        assert_eq!(store.put_all(&[]).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_bulk_population_runs_on_spawned_tasks() {
        let client = RouteClient::new(vec![("http://localhost/a.png", 200, "A")]);
        let storage = Arc::new(MemoryCacheStorage::new());
        let store = manager(client, storage).open(&"c".into()).await.unwrap();
        let list = urls(&["/a.png"]);

        let (batch_store, batch_list) = (store.clone(), list.clone());
        let count = tokio::spawn(async move { batch_store.put_all(&batch_list).await })
            .await
            .unwrap()
            .unwrap();
        let outcome = tokio::spawn(async move { store.add_each(&list).await })
            .await
            .unwrap();

        assert_eq!(count, 1);
        assert!(outcome.is_complete());
    }

    #[tokio::test]
    async fn test_write_to_deleted_generation_is_a_storage_error() {
        let client = RouteClient::new(vec![("http://localhost/a.png", 200, "A")]);
        let storage = Arc::new(MemoryCacheStorage::new());
        let manager = manager(client, storage);
        let store = manager.open(&"c".into()).await.unwrap();

        assert!(manager.delete(&"c".into()).await.unwrap());
        let error = store.add("/a.png").await.unwrap_err();

        assert!(matches!(error, OfflineError::StorageError(_)));
        assert!(error.is_storage_error());
    }

    #[tokio::test]
    async fn test_add_each_collects_failures_in_order() {
        let client = RouteClient::new(vec![
            ("http://localhost/", 200, "root"),
            ("http://localhost/index.html", 200, "<html></html>"),
            ("http://localhost/favicon.jpg", 500, "boom"),
        ]);
        let storage = Arc::new(MemoryCacheStorage::new());
        let store = manager(client, storage).open(&"c".into()).await.unwrap();

        let outcome = store
            .add_each(&urls(&["/", "index.html", "favicon.png", "favicon.jpg"]))
            .await;

        assert_eq!(outcome.cached(), 2);
        let failed: Vec<&str> = outcome.failed().iter().map(|f| f.url.as_str()).collect();
        assert_eq!(failed, vec!["favicon.png", "favicon.jpg"]);
        assert!(!outcome.is_complete());
    }

    #[tokio::test]
    async fn test_put_refuses_non_get() {
        let storage = Arc::new(MemoryCacheStorage::new());
        let store = manager(RouteClient::new(vec![]), storage)
            .open(&"c".into())
            .await
            .unwrap();
        let post = RequestDescriptor::resolve(
            bridge_traits::HttpMethod::Post,
            "/api",
            store.scope(),
        )
        .unwrap();

        let snapshot = CachedResponse::capture(&HttpResponse::new(200, "ok"), chrono::Utc::now());
        assert!(store.put(&post, snapshot).await.is_err());
    }

    #[test]
    fn test_unstorable_responses() {
        assert_eq!(unstorable_reason(&HttpResponse::new(206, "")), Some("partial content"));
        assert_eq!(
            unstorable_reason(&HttpResponse::new(200, "").with_header("Vary", "Accept, *")),
            Some("Vary: *")
        );
        assert_eq!(
            unstorable_reason(&HttpResponse::new(200, "").with_header("Vary", "Accept-Encoding")),
            None
        );
        assert_eq!(unstorable_reason(&HttpResponse::new(404, "")), None);
    }
}
