//! Shared fixtures for the offline cache integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use bridge_traits::{
    error::Result as BridgeResult, BridgeError, CacheStorage, FixedClock, HttpClient, HttpRequest,
    HttpResponse,
};
use chrono::{TimeZone, Utc};
use core_offline::{CacheConfig, MemoryCacheStorage, StoreManager};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// Canned network: answers by absolute URL, records every request.
///
/// Unknown URLs answer 404. URLs registered with [`StubHttpClient::unreachable`]
/// fail the way a dropped connection does.
#[derive(Default)]
pub struct StubHttpClient {
    routes: Mutex<HashMap<String, HttpResponse>>,
    unreachable: Mutex<Vec<String>>,
    calls: Mutex<Vec<String>>,
    delay: Option<Duration>,
}

impl StubHttpClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn route(self, url: &str, status: u16, body: &'static str) -> Self {
        self.routes
            .lock()
            .insert(url.to_string(), HttpResponse::new(status, body));
        self
    }

    pub fn unreachable(self, url: &str) -> Self {
        self.unreachable.lock().push(url.to_string());
        self
    }

    /// Change the body served for `url` from now on.
    pub fn set_body(&self, url: &str, body: &'static str) {
        self.routes
            .lock()
            .insert(url.to_string(), HttpResponse::new(200, body));
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }

    pub fn calls_to(&self, url: &str) -> usize {
        self.calls.lock().iter().filter(|call| *call == url).count()
    }
}

#[async_trait]
impl HttpClient for StubHttpClient {
    async fn execute(&self, request: HttpRequest) -> BridgeResult<HttpResponse> {
        self.calls.lock().push(request.url.clone());
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        if self.unreachable.lock().contains(&request.url) {
            return Err(BridgeError::OperationFailed(format!(
                "connection refused: {}",
                request.url
            )));
        }

        let response = self.routes.lock().get(&request.url).cloned();
        Ok(response.unwrap_or_else(|| HttpResponse::new(404, "not found")))
    }
}

pub fn fixed_clock() -> Arc<FixedClock> {
    Arc::new(FixedClock(Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()))
}

pub fn store_manager(
    config: &CacheConfig,
    storage: Arc<MemoryCacheStorage>,
    http: Arc<StubHttpClient>,
) -> StoreManager {
    StoreManager::from_config(
        config,
        storage as Arc<dyn CacheStorage>,
        http as Arc<dyn HttpClient>,
        fixed_clock(),
    )
    .unwrap()
}
