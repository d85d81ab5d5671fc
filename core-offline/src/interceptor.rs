//! # Interception Strategy
//!
//! Cache-first, network-fallback, write-through on miss.
//!
//! 1. Non-`GET` requests are handed back untouched ([`FetchDisposition::Passthrough`]).
//! 2. A stored response for the request is returned verbatim. There is no
//!    freshness check; an entry lives until it is overwritten or its
//!    generation is dropped.
//! 3. On a miss the request goes to the network. The response body is a
//!    shared buffer, so one snapshot goes to the store and the response goes
//!    back to the caller.
//! 4. A network failure on a miss is returned to the caller as an error. No
//!    placeholder content is substituted.
//!
//! Concurrent misses for the same request race by default: both reach the
//! network and the last store write wins. With `coalesce_concurrent_misses`
//! they queue on a per-request lock and all but the first are answered from
//! the store.

use crate::descriptor::RequestDescriptor;
use crate::error::{OfflineError, Result};
use crate::store::{unstorable_reason, Store, StoreId, StoreManager};
use bridge_traits::{CachedResponse, HttpRequest, HttpResponse};
use core_runtime::events::{CoreEvent, EventBus, FetchEvent};
use core_runtime::logging::display_url;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex as AsyncMutex, OnceCell};
use tracing::{debug, error, instrument};

/// Where an intercepted response came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseSource {
    Cache,
    Network,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterceptedResponse {
    pub response: HttpResponse,
    pub source: ResponseSource,
}

/// What the interceptor decided to do with a request.
#[derive(Debug, Clone)]
pub enum FetchDisposition {
    /// Not intercepted; the caller sends the request to the network as is.
    Passthrough(HttpRequest),
    /// Answered by the interceptor.
    Respond(InterceptedResponse),
}

impl FetchDisposition {
    pub fn is_passthrough(&self) -> bool {
        matches!(self, FetchDisposition::Passthrough(_))
    }
}

/// Answers intercepted requests for one store generation.
pub struct FetchInterceptor {
    generation: StoreId,
    stores: StoreManager,
    store: OnceCell<Store>,
    coalesce_misses: bool,
    in_flight: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
    event_bus: Option<Arc<EventBus>>,
}

impl FetchInterceptor {
    pub fn new(generation: StoreId, stores: StoreManager) -> Self {
        Self {
            generation,
            stores,
            store: OnceCell::new(),
            coalesce_misses: false,
            in_flight: Mutex::new(HashMap::new()),
            event_bus: None,
        }
    }

    /// Collapse concurrent misses for the same request into one network call.
    pub fn with_miss_coalescing(mut self, enabled: bool) -> Self {
        self.coalesce_misses = enabled;
        self
    }

    /// Set event bus for fetch events.
    pub fn with_event_bus(mut self, event_bus: Arc<EventBus>) -> Self {
        self.event_bus = Some(event_bus);
        self
    }

    pub fn generation(&self) -> &StoreId {
        &self.generation
    }

    /// The generation's store, opened on the first intercepted `GET`.
    async fn store(&self) -> Result<&Store> {
        self.store
            .get_or_try_init(|| self.stores.open(&self.generation))
            .await
    }

    fn emit(&self, event: FetchEvent) {
        if let Some(bus) = &self.event_bus {
            bus.emit(CoreEvent::Fetch(event)).ok();
        }
    }

    /// Decide how to answer `request`.
    ///
    /// # Errors
    ///
    /// - [`OfflineError::Network`] when the request missed the store and the
    ///   network gave no response
    /// - storage errors from the lookup or the write-through
    #[instrument(skip(self, request), fields(method = %request.method, url = %display_url(&request.url)))]
    pub async fn intercept(&self, request: HttpRequest) -> Result<FetchDisposition> {
        if !request.method.is_cacheable() {
            return Ok(FetchDisposition::Passthrough(request));
        }

        let descriptor = match RequestDescriptor::from_request(&request, self.stores.scope()) {
            Ok(descriptor) => descriptor,
            Err(e) => {
                // Schemes the store cannot key (extensions, data URLs) go straight out
                debug!(error = %e, "Not interceptable");
                return Ok(FetchDisposition::Passthrough(request));
            }
        };

        let store = self.store().await?;
        if let Some(hit) = self.lookup(store, &descriptor).await? {
            return Ok(FetchDisposition::Respond(hit));
        }

        if !self.coalesce_misses {
            return self.fill_from_network(store, &descriptor, request).await;
        }

        let key = descriptor.key();
        let lock = self.key_lock(&key);
        let result = {
            let _guard = lock.lock().await;
            // Another handler may have filled the entry while we waited
            match self.lookup(store, &descriptor).await {
                Ok(Some(hit)) => Ok(FetchDisposition::Respond(hit)),
                Ok(None) => self.fill_from_network(store, &descriptor, request).await,
                Err(e) => Err(e),
            }
        };
        drop(lock);
        self.release_key_locks();
        result
    }

    /// Answer `request` completely: intercepted requests are resolved through
    /// the store, passthrough requests go straight to the network.
    pub async fn fetch(&self, request: HttpRequest) -> Result<HttpResponse> {
        match self.intercept(request).await? {
            FetchDisposition::Respond(intercepted) => Ok(intercepted.response),
            FetchDisposition::Passthrough(request) => {
                let url = request.url.clone();
                self.stores
                    .http_client()
                    .execute(request)
                    .await
                    .map_err(|e| OfflineError::Network {
                        url,
                        message: e.to_string(),
                    })
            }
        }
    }

    async fn lookup(
        &self,
        store: &Store,
        descriptor: &RequestDescriptor,
    ) -> Result<Option<InterceptedResponse>> {
        let Some(entry) = store.get(descriptor).await? else {
            return Ok(None);
        };

        debug!("Cache hit");
        self.emit(FetchEvent::CacheHit {
            url: display_url(descriptor.url().as_str()),
        });
        Ok(Some(InterceptedResponse {
            response: entry.to_response(),
            source: ResponseSource::Cache,
        }))
    }

    async fn fill_from_network(
        &self,
        store: &Store,
        descriptor: &RequestDescriptor,
        mut request: HttpRequest,
    ) -> Result<FetchDisposition> {
        let url = descriptor.url().as_str();
        debug!("Cache miss, fetching from network");
        request.url = url.to_string();

        let response = match self.stores.http_client().execute(request).await {
            Ok(response) => response,
            Err(e) => {
                error!(error = %e, "Network request failed");
                self.emit(FetchEvent::NetworkFailed {
                    url: display_url(url),
                    message: e.to_string(),
                });
                return Err(OfflineError::Network {
                    url: url.to_string(),
                    message: e.to_string(),
                });
            }
        };

        match unstorable_reason(&response) {
            Some(reason) => debug!(status = response.status, reason, "Response not cached"),
            None => {
                let snapshot = CachedResponse::capture(&response, self.stores.clock().now());
                store.put(descriptor, snapshot).await?;
                self.emit(FetchEvent::NetworkFilled {
                    url: display_url(url),
                    status: response.status,
                });
            }
        }

        Ok(FetchDisposition::Respond(InterceptedResponse {
            response,
            source: ResponseSource::Network,
        }))
    }

    fn key_lock(&self, key: &str) -> Arc<AsyncMutex<()>> {
        let mut in_flight = self.in_flight.lock();
        Arc::clone(in_flight.entry(key.to_string()).or_default())
    }

    /// Drop locks nobody is holding or waiting on.
    fn release_key_locks(&self) {
        self.in_flight
            .lock()
            .retain(|_, lock| Arc::strong_count(lock) > 1);
    }
}
