//! # Cache Worker
//!
//! One deployable controller: a lifecycle controller, an interceptor and a
//! preloader sharing the same store generation.
//!
//! The worker can be driven directly, or through an event loop fed by a
//! channel ([`CacheWorker::spawn`]). In the loop each event runs as its own
//! task, so a slow fetch never holds up the next event. Handlers are not
//! cancellable: dropping the reply receiver only stops waiting for the
//! result.

use crate::clients::ClientRegistry;
use crate::config::CacheConfig;
use crate::error::{OfflineError, Result};
use crate::interceptor::{FetchDisposition, FetchInterceptor};
use crate::lifecycle::{ActivationReport, InstallReport, LifecycleController, LifecycleState};
use crate::preload::AssetPreloader;
use crate::store::{StoreId, StoreManager};
use bridge_traits::{ClientPort, ControlReply, HttpRequest, HttpResponse};
use core_runtime::events::EventBus;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::debug;

/// Events delivered to a worker's event loop.
pub enum WorkerEvent {
    Install {
        reply: oneshot::Sender<Result<InstallReport>>,
    },
    Activate {
        reply: oneshot::Sender<Result<ActivationReport>>,
    },
    Fetch {
        request: HttpRequest,
        reply: oneshot::Sender<Result<FetchDisposition>>,
    },
    Message {
        data: Value,
        source: Option<Arc<dyn ClientPort>>,
        reply: Option<oneshot::Sender<Option<ControlReply>>>,
    },
}

impl std::fmt::Debug for WorkerEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WorkerEvent::Install { .. } => f.write_str("Install"),
            WorkerEvent::Activate { .. } => f.write_str("Activate"),
            WorkerEvent::Fetch { request, .. } => write!(f, "Fetch({} {})", request.method, request.url),
            WorkerEvent::Message { .. } => f.write_str("Message"),
        }
    }
}

pub struct CacheWorker {
    lifecycle: LifecycleController,
    interceptor: FetchInterceptor,
    preloader: AssetPreloader,
}

impl CacheWorker {
    pub fn new(config: CacheConfig, stores: StoreManager, clients: Arc<ClientRegistry>) -> Self {
        let generation = config.store_id();
        let interceptor = FetchInterceptor::new(generation.clone(), stores.clone())
            .with_miss_coalescing(config.coalesce_concurrent_misses);
        let preloader = AssetPreloader::new(generation, stores.clone());
        let lifecycle = LifecycleController::new(config, stores, clients);

        Self {
            lifecycle,
            interceptor,
            preloader,
        }
    }

    /// Publish lifecycle, fetch and preload events on `event_bus`.
    pub fn with_event_bus(self, event_bus: Arc<EventBus>) -> Self {
        Self {
            lifecycle: self.lifecycle.with_event_bus(Arc::clone(&event_bus)),
            interceptor: self.interceptor.with_event_bus(Arc::clone(&event_bus)),
            preloader: self.preloader.with_event_bus(event_bus),
        }
    }

    pub fn with_skip_waiting(self, skip_waiting: bool) -> Self {
        Self {
            lifecycle: self.lifecycle.with_skip_waiting(skip_waiting),
            ..self
        }
    }

    pub fn generation(&self) -> &StoreId {
        self.lifecycle.generation()
    }

    pub fn state(&self) -> LifecycleState {
        self.lifecycle.state()
    }

    pub fn lifecycle(&self) -> &LifecycleController {
        &self.lifecycle
    }

    pub fn interceptor(&self) -> &FetchInterceptor {
        &self.interceptor
    }

    pub fn preloader(&self) -> &AssetPreloader {
        &self.preloader
    }

    /// Fetch through the interceptor, resolving passthrough requests on the
    /// network.
    pub async fn fetch(&self, request: HttpRequest) -> Result<HttpResponse> {
        self.interceptor.fetch(request).await
    }

    /// Handle a control message from an application context.
    pub async fn post_message(
        &self,
        data: &Value,
        source: Option<&dyn ClientPort>,
    ) -> Option<ControlReply> {
        self.preloader.handle(data, source).await
    }

    async fn dispatch(&self, event: WorkerEvent) {
        debug!(?event, generation = %self.generation(), "Dispatching worker event");
        match event {
            WorkerEvent::Install { reply } => {
                reply.send(self.lifecycle.install().await).ok();
            }
            WorkerEvent::Activate { reply } => {
                reply.send(self.lifecycle.activate().await).ok();
            }
            WorkerEvent::Fetch { request, reply } => {
                reply.send(self.interceptor.intercept(request).await).ok();
            }
            WorkerEvent::Message {
                data,
                source,
                reply,
            } => {
                let result = self.preloader.handle(&data, source.as_deref()).await;
                if let Some(reply) = reply {
                    reply.send(result).ok();
                }
            }
        }
    }

    /// Run an event loop over `events`, one task per event. The loop ends
    /// when every sender is dropped.
    pub fn spawn_event_loop(
        self: Arc<Self>,
        mut events: mpsc::UnboundedReceiver<WorkerEvent>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                let worker = Arc::clone(&self);
                tokio::spawn(async move { worker.dispatch(event).await });
            }
            debug!(generation = %self.generation(), "Worker event loop stopped");
        })
    }

    /// Start an event loop and return a handle for sending it events.
    pub fn spawn(self: Arc<Self>) -> WorkerHandle {
        let (sender, receiver) = mpsc::unbounded_channel();
        let task = self.spawn_event_loop(receiver);
        WorkerHandle { sender, task }
    }
}

/// Sends events to a running worker event loop.
pub struct WorkerHandle {
    sender: mpsc::UnboundedSender<WorkerEvent>,
    task: JoinHandle<()>,
}

impl WorkerHandle {
    fn send(&self, event: WorkerEvent) -> Result<()> {
        self.sender.send(event).map_err(|_| OfflineError::NoController)
    }

    pub async fn install(&self) -> Result<InstallReport> {
        let (reply, response) = oneshot::channel();
        self.send(WorkerEvent::Install { reply })?;
        response.await.map_err(|_| OfflineError::NoController)?
    }

    pub async fn activate(&self) -> Result<ActivationReport> {
        let (reply, response) = oneshot::channel();
        self.send(WorkerEvent::Activate { reply })?;
        response.await.map_err(|_| OfflineError::NoController)?
    }

    pub async fn intercept(&self, request: HttpRequest) -> Result<FetchDisposition> {
        let (reply, response) = oneshot::channel();
        self.send(WorkerEvent::Fetch { request, reply })?;
        response.await.map_err(|_| OfflineError::NoController)?
    }

    /// Deliver a message and wait until it has been handled.
    pub async fn post_message(
        &self,
        data: Value,
        source: Option<Arc<dyn ClientPort>>,
    ) -> Result<Option<ControlReply>> {
        let (reply, response) = oneshot::channel();
        self.send(WorkerEvent::Message {
            data,
            source,
            reply: Some(reply),
        })?;
        response.await.map_err(|_| OfflineError::NoController)
    }

    /// Stop accepting events. Handlers already running finish on their own.
    pub async fn shutdown(self) {
        drop(self.sender);
        self.task.await.ok();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clients::ChannelPort;
    use crate::memory::MemoryCacheStorage;
    use async_trait::async_trait;
    use bridge_traits::{error::Result as BridgeResult, HttpClient, SystemClock};
    use serde_json::json;
    use std::time::Duration;
    use tokio::sync::Notify;

    struct Echo;

    #[async_trait]
    impl HttpClient for Echo {
        async fn execute(&self, request: HttpRequest) -> BridgeResult<HttpResponse> {
            Ok(HttpResponse::new(200, request.url))
        }
    }

    /// Echoes every URL except `/slow.png`, which waits for the gate.
    struct Gated {
        gate: Notify,
    }

    #[async_trait]
    impl HttpClient for Gated {
        async fn execute(&self, request: HttpRequest) -> BridgeResult<HttpResponse> {
            if request.url.ends_with("/slow.png") {
                self.gate.notified().await;
            }
            Ok(HttpResponse::new(200, request.url))
        }
    }

    fn worker() -> (Arc<CacheWorker>, Arc<ClientRegistry>) {
        worker_with(Arc::new(Echo))
    }

    fn worker_with(http: Arc<dyn HttpClient>) -> (Arc<CacheWorker>, Arc<ClientRegistry>) {
        let config = CacheConfig::default().with_shell_files(["/", "index.html"]);
        let stores = StoreManager::from_config(
            &config,
            Arc::new(MemoryCacheStorage::new()),
            http,
            Arc::new(SystemClock),
        )
        .unwrap();
        let clients = Arc::new(ClientRegistry::new());
        (
            Arc::new(CacheWorker::new(config, stores, Arc::clone(&clients))),
            clients,
        )
    }

    #[tokio::test]
    async fn test_event_loop_drives_lifecycle() {
        let (worker, clients) = worker();
        let (port, _replies) = ChannelPort::channel();
        clients.register("http://localhost/", Arc::new(port));

        let handle = Arc::clone(&worker).spawn();
        let install = handle.install().await.unwrap();
        assert!(install.shell.is_complete());

        let activation = handle.activate().await.unwrap();
        assert_eq!(activation.claimed_clients, 1);
        assert_eq!(worker.state(), LifecycleState::Active);

        handle.shutdown().await;
    }

    #[tokio::test]
    async fn test_event_loop_handles_fetch_and_message() {
        let (worker, _) = worker();
        let handle = Arc::clone(&worker).spawn();
        handle.install().await.unwrap();

        let disposition = handle.intercept(HttpRequest::get("/index.html")).await.unwrap();
        assert!(!disposition.is_passthrough());

        let (port, mut replies) = ChannelPort::channel();
        let reply = handle
            .post_message(
                json!({ "type": "CACHE_ASSETS", "urls": ["/a.png"] }),
                Some(Arc::new(port)),
            )
            .await
            .unwrap();

        assert_eq!(reply, Some(ControlReply::CacheComplete));
        assert_eq!(replies.recv().await, Some(ControlReply::CacheComplete));
    }

    fn assert_send<T: Send>(_: &T) {}

    #[test]
    fn test_event_handlers_are_send() {
        let (worker, _) = worker();
        let (reply, _response) = oneshot::channel();
        let dispatch = worker.dispatch(WorkerEvent::Install { reply });
        assert_send(&dispatch);

        let install = worker.lifecycle().install();
        assert_send(&install);
        let preload = worker.preloader().preload(&[]);
        assert_send(&preload);
    }

    #[tokio::test]
    async fn test_slow_miss_does_not_hold_up_cached_requests() {
        let http = Arc::new(Gated {
            gate: Notify::new(),
        });
        let (worker, _) = worker_with(Arc::clone(&http) as Arc<dyn HttpClient>);
        let handle = Arc::clone(&worker).spawn();
        handle.install().await.unwrap();

        let (reply, mut slow) = oneshot::channel();
        handle
            .send(WorkerEvent::Fetch {
                request: HttpRequest::get("/slow.png"),
                reply,
            })
            .unwrap();

        let cached = tokio::time::timeout(
            Duration::from_secs(1),
            handle.intercept(HttpRequest::get("/index.html")),
        )
        .await
        .expect("cached request waited behind the slow miss")
        .unwrap();
        assert!(!cached.is_passthrough());
        assert!(matches!(slow.try_recv(), Err(oneshot::error::TryRecvError::Empty)));

        http.gate.notify_one();
        let slow = slow.await.unwrap().unwrap();
        assert!(!slow.is_passthrough());
    }

    #[tokio::test]
    async fn test_stopped_loop_reports_no_controller() {
        let (worker, _) = worker();
        let (sender, receiver) = mpsc::unbounded_channel();
        drop(receiver);

        let handle = WorkerHandle {
            sender,
            task: tokio::spawn(async {}),
        };
        let result = handle.install().await;

        assert!(matches!(result, Err(OfflineError::NoController)));
        assert_eq!(worker.state(), LifecycleState::Unregistered);
    }
}
