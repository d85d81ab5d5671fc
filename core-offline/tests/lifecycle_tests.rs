//! Install, activation and generation handling across controller updates.

mod common;

use async_trait::async_trait;
use bridge_traits::{
    error::Result as BridgeResult, BridgeError, CacheStorage, CachedResponse, HttpClient,
};
use common::{fixed_clock, store_manager, StubHttpClient};
use core_offline::{
    CacheConfig, CacheWorker, ChannelPort, ClientRegistry, LifecycleController, LifecycleState,
    MemoryCacheStorage, OfflineError, Registration, RequestDescriptor, StoreId, StoreManager,
};
use core_runtime::events::{CoreEvent, EventBus, LifecycleEvent};
use mockall::mock;
use std::sync::Arc;
use url::Url;

mock! {
    pub Storage {}

    #[async_trait]
    impl CacheStorage for Storage {
        async fn open(&self, cache_name: &str) -> BridgeResult<()>;
        async fn has(&self, cache_name: &str) -> BridgeResult<bool>;
        async fn delete(&self, cache_name: &str) -> BridgeResult<bool>;
        async fn keys(&self) -> BridgeResult<Vec<String>>;
        async fn match_entry(&self, cache_name: &str, key: &str) -> BridgeResult<Option<CachedResponse>>;
        async fn put(&self, cache_name: &str, key: &str, response: CachedResponse) -> BridgeResult<()>;
        async fn put_batch(&self, cache_name: &str, entries: Vec<(String, CachedResponse)>) -> BridgeResult<()>;
        async fn entry_keys(&self, cache_name: &str) -> BridgeResult<Vec<String>>;
    }
}

fn site(index_body: &'static str) -> StubHttpClient {
    StubHttpClient::new()
        .route("http://localhost/", 200, "<html>root</html>")
        .route("http://localhost/index.html", 200, index_body)
        .route("http://localhost/manifest.json", 200, "{}")
}

fn worker(
    config: CacheConfig,
    storage: &Arc<MemoryCacheStorage>,
    http: StubHttpClient,
    clients: &Arc<ClientRegistry>,
) -> Arc<CacheWorker> {
    let stores = store_manager(&config, Arc::clone(storage), Arc::new(http));
    Arc::new(CacheWorker::new(config, stores, Arc::clone(clients)))
}

async fn stored_body(storage: &Arc<MemoryCacheStorage>, generation: &str, path: &str) -> Option<Vec<u8>> {
    let scope = Url::parse("http://localhost/").unwrap();
    let stores = StoreManager::new(
        Arc::clone(storage) as Arc<dyn CacheStorage>,
        Arc::new(StubHttpClient::new()) as Arc<dyn HttpClient>,
        fixed_clock(),
        scope.clone(),
    );
    let store = stores.open(&StoreId::new(generation)).await.unwrap();
    let descriptor = RequestDescriptor::get(path, &scope).unwrap();
    store
        .get(&descriptor)
        .await
        .unwrap()
        .map(|entry| entry.body.to_vec())
}

#[tokio::test]
async fn test_install_survives_one_unreachable_shell_asset() {
    let storage = Arc::new(MemoryCacheStorage::new());
    let clients = Arc::new(ClientRegistry::new());
    let config = CacheConfig::default().with_shell_files([
        "/",
        "index.html",
        "https://cdn.tailwindcss.com",
        "manifest.json",
    ]);
    let http = site("<html>A</html>").unreachable("https://cdn.tailwindcss.com/");
    let worker = worker(config, &storage, http, &clients);

    let report = worker.lifecycle().install().await.unwrap();

    assert_eq!(worker.state(), LifecycleState::Installed);
    assert_eq!(report.shell.cached(), 3);
    assert_eq!(report.shell.failed().len(), 1);
    assert_eq!(report.shell.failed()[0].url, "https://cdn.tailwindcss.com");
    assert_eq!(storage.entry_count("nossa-musica-cache-v1"), 3);
}

#[tokio::test]
async fn test_install_fails_when_store_cannot_be_opened() {
    let mut storage = MockStorage::new();
    storage
        .expect_open()
        .returning(|_| Err(BridgeError::DatabaseError("database is locked".to_string())));

    let stores = StoreManager::new(
        Arc::new(storage),
        Arc::new(StubHttpClient::new()),
        fixed_clock(),
        Url::parse("http://localhost/").unwrap(),
    );
    let controller =
        LifecycleController::new(CacheConfig::default(), stores, Arc::new(ClientRegistry::new()));

    let result = controller.install().await;

    assert!(matches!(result, Err(OfflineError::StorageError(_))));
    assert_eq!(controller.state(), LifecycleState::Redundant);
}

#[tokio::test]
async fn test_generations_are_isolated() {
    let storage = Arc::new(MemoryCacheStorage::new());
    let clients = Arc::new(ClientRegistry::new());
    let registration = Registration::new(Arc::clone(&clients));
    let shell = ["index.html"];

    let v1 = worker(
        CacheConfig::default().with_shell_files(shell),
        &storage,
        site("<html>A</html>"),
        &clients,
    );
    registration.update(Arc::clone(&v1)).await.unwrap();

    let v2 = worker(
        CacheConfig::default().with_version("v2").with_shell_files(shell),
        &storage,
        site("<html>B</html>"),
        &clients,
    );
    registration.update(Arc::clone(&v2)).await.unwrap();

    assert_eq!(
        stored_body(&storage, "nossa-musica-cache-v1", "/index.html").await,
        Some(b"<html>A</html>".to_vec())
    );
    assert_eq!(
        stored_body(&storage, "nossa-musica-cache-v2", "/index.html").await,
        Some(b"<html>B</html>".to_vec())
    );
}

#[tokio::test]
async fn test_activation_purges_stale_generations_when_enabled() {
    let storage = Arc::new(MemoryCacheStorage::new());
    storage.open("unrelated-app-v1").await.unwrap();
    let clients = Arc::new(ClientRegistry::new());
    let registration = Registration::new(Arc::clone(&clients));

    let v1 = worker(
        CacheConfig::default().with_shell_files(["/"]),
        &storage,
        site("A"),
        &clients,
    );
    registration.update(v1).await.unwrap();

    let v2 = worker(
        CacheConfig::default()
            .with_version("v2")
            .with_shell_files(["/"])
            .with_stale_generation_purge(true),
        &storage,
        site("B"),
        &clients,
    );
    let report = registration.update(v2).await.unwrap();

    let activation = report.activation.unwrap();
    assert_eq!(activation.purged, vec![StoreId::new("nossa-musica-cache-v1")]);
    assert_eq!(
        storage.keys().await.unwrap(),
        vec!["unrelated-app-v1".to_string(), "nossa-musica-cache-v2".to_string()]
    );
}

#[tokio::test]
async fn test_activation_keeps_old_generations_by_default() {
    let storage = Arc::new(MemoryCacheStorage::new());
    let clients = Arc::new(ClientRegistry::new());
    let registration = Registration::new(Arc::clone(&clients));

    for version in ["v1", "v2"] {
        let next = worker(
            CacheConfig::default().with_version(version).with_shell_files(["/"]),
            &storage,
            site("A"),
            &clients,
        );
        let report = registration.update(next).await.unwrap();
        assert!(report.activation.unwrap().purged.is_empty());
    }

    assert_eq!(storage.keys().await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_activation_claims_open_clients() {
    let storage = Arc::new(MemoryCacheStorage::new());
    let clients = Arc::new(ClientRegistry::new());
    let (home_port, _home) = ChannelPort::channel();
    let (library_port, _library) = ChannelPort::channel();
    let home = clients.register("http://localhost/", Arc::new(home_port));
    let library = clients.register("http://localhost/library", Arc::new(library_port));
    assert_eq!(clients.controller_of(&home), None);

    let v1 = worker(
        CacheConfig::default().with_shell_files(["/"]),
        &storage,
        site("A"),
        &clients,
    );
    v1.lifecycle().install().await.unwrap();
    let activation = v1.lifecycle().activate().await.unwrap();

    assert_eq!(activation.claimed_clients, 2);
    assert_eq!(clients.controller_of(&home), Some(v1.generation().clone()));
    assert_eq!(clients.controller_of(&library), Some(v1.generation().clone()));
}

#[tokio::test]
async fn test_lifecycle_events_are_published_in_order() {
    let bus = Arc::new(EventBus::new(16));
    let mut events = bus.subscribe();
    let storage = Arc::new(MemoryCacheStorage::new());
    let clients = Arc::new(ClientRegistry::new());
    let stores = store_manager(
        &CacheConfig::default(),
        Arc::clone(&storage),
        Arc::new(site("A")),
    );
    let config = CacheConfig::default().with_shell_files(["/", "favicon.png"]);
    let controller = LifecycleController::new(config, stores, clients).with_event_bus(bus);

    controller.install().await.unwrap();
    controller.activate().await.unwrap();

    let generation = "nossa-musica-cache-v1".to_string();
    assert_eq!(
        events.recv().await.unwrap(),
        CoreEvent::Lifecycle(LifecycleEvent::Installing {
            generation: generation.clone()
        })
    );
    assert_eq!(
        events.recv().await.unwrap(),
        CoreEvent::Lifecycle(LifecycleEvent::Installed {
            generation: generation.clone(),
            shell_cached: 1,
            shell_failed: vec!["favicon.png".to_string()],
        })
    );
    assert_eq!(
        events.recv().await.unwrap(),
        CoreEvent::Lifecycle(LifecycleEvent::Activated {
            generation,
            claimed_clients: 0,
        })
    );
}
