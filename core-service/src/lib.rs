//! Core service façade and bootstrap helpers.
//!
//! This crate wires host-provided bridge implementations (HTTP, cache
//! storage, clock) into the offline cache core and gives the host a single
//! handle to drive it: connect application contexts, route their requests
//! and control messages to whichever controller is active, and deploy new
//! controller versions. Desktop apps typically enable the `desktop-shims`
//! feature, which supplies reqwest and SQLite defaults through
//! `core-runtime`.

pub mod error;

pub use error::{CoreError, Result};

use std::sync::Arc;

use bridge_traits::{
    CacheStorage, ClientId, Clock, ControlReply, HttpClient, HttpRequest, HttpResponse,
};
use core_offline::{
    ActivationReport, CacheConfig, CacheWorker, ChannelPort, ClientRegistry, OfflineError,
    Registration, StoreManager, UpdateReport,
};
use core_runtime::config::CoreConfig;
use core_runtime::events::{EventBus, EventStream};
use serde_json::Value;
use tokio::sync::mpsc::UnboundedReceiver;
use tracing::{debug, info, instrument};

const EVENT_BUS_CAPACITY: usize = 256;

/// Aggregated handle to all bridge dependencies the core requires.
pub struct CoreDependencies {
    pub http_client: Arc<dyn HttpClient>,
    pub cache_storage: Arc<dyn CacheStorage>,
    pub clock: Arc<dyn Clock>,
}

impl CoreDependencies {
    /// Construct a dependency bundle from explicit bridge handles.
    pub fn new(
        http_client: Arc<dyn HttpClient>,
        cache_storage: Arc<dyn CacheStorage>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            http_client,
            cache_storage,
            clock,
        }
    }
}

impl From<&CoreConfig> for CoreDependencies {
    fn from(config: &CoreConfig) -> Self {
        Self::new(
            Arc::clone(&config.http_client),
            Arc::clone(&config.cache_storage),
            Arc::clone(&config.clock),
        )
    }
}

/// Primary façade exposed to host applications.
#[derive(Clone)]
pub struct CoreService {
    deps: Arc<CoreDependencies>,
    clients: Arc<ClientRegistry>,
    registration: Arc<Registration>,
    event_bus: Arc<EventBus>,
}

impl CoreService {
    /// Create a service with no controller deployed yet.
    pub fn new(deps: CoreDependencies) -> Self {
        let clients = Arc::new(ClientRegistry::new());
        Self {
            deps: Arc::new(deps),
            registration: Arc::new(Registration::new(Arc::clone(&clients))),
            clients,
            event_bus: Arc::new(EventBus::new(EVENT_BUS_CAPACITY)),
        }
    }

    /// Build a service from `config` and deploy the controller described by
    /// `cache_config`.
    #[instrument(skip_all, fields(generation = %cache_config.store_id()))]
    pub async fn bootstrap(config: CoreConfig, cache_config: CacheConfig) -> Result<Self> {
        config.validate().map_err(runtime_error)?;

        let service = Self::new(CoreDependencies::from(&config));
        service.deploy(cache_config).await?;
        Ok(service)
    }

    /// Access the bridge dependencies being used by the service.
    pub fn dependencies(&self) -> Arc<CoreDependencies> {
        Arc::clone(&self.deps)
    }

    pub fn registration(&self) -> &Arc<Registration> {
        &self.registration
    }

    pub fn clients(&self) -> &Arc<ClientRegistry> {
        &self.clients
    }

    /// Subscribe to lifecycle, fetch and preload events.
    pub fn events(&self) -> EventStream {
        EventStream::new(self.event_bus.subscribe())
    }

    /// Install a controller for `cache_config` and activate it in place of
    /// the current one.
    ///
    /// A failed install leaves the current controller in charge.
    pub async fn deploy(&self, cache_config: CacheConfig) -> Result<UpdateReport> {
        let stores = StoreManager::from_config(
            &cache_config,
            Arc::clone(&self.deps.cache_storage),
            Arc::clone(&self.deps.http_client),
            Arc::clone(&self.deps.clock),
        )?;
        let worker = CacheWorker::new(cache_config, stores, Arc::clone(&self.clients))
            .with_event_bus(Arc::clone(&self.event_bus));

        let report = self.registration.update(Arc::new(worker)).await?;
        info!(
            generation = %report.install.generation,
            activated = report.activation.is_some(),
            "Deployed cache controller"
        );
        Ok(report)
    }

    /// Open an application context. Replies to its control messages arrive
    /// on the returned receiver.
    pub fn connect_client(
        &self,
        url: impl Into<String>,
    ) -> (ClientId, UnboundedReceiver<ControlReply>) {
        let (port, replies) = ChannelPort::channel();
        let id = self.clients.register(url, Arc::new(port));
        (id, replies)
    }

    /// Close an application context, then let a waiting controller take
    /// over if nothing else holds the active one.
    pub async fn disconnect_client(&self, id: &ClientId) -> Result<Option<ActivationReport>> {
        if !self.clients.remove(id) {
            return Err(CoreError::UnknownClient(id.to_string()));
        }
        Ok(self.registration.handoff().await?)
    }

    /// Controller for `id`, or `None` if the context is not controlled.
    fn controller_for(&self, id: &ClientId) -> Result<Option<Arc<CacheWorker>>> {
        let info = self
            .clients
            .info(id)
            .ok_or_else(|| CoreError::UnknownClient(id.to_string()))?;

        Ok(info
            .controller
            .and_then(|generation| self.registration.controller(&generation)))
    }

    /// Issue a request from an application context.
    ///
    /// Controlled contexts go through the active controller; others talk to
    /// the network directly.
    pub async fn fetch(&self, id: &ClientId, request: HttpRequest) -> Result<HttpResponse> {
        if let Some(worker) = self.controller_for(id)? {
            return Ok(worker.fetch(request).await?);
        }

        debug!(client = %id, "Uncontrolled client, going to network");
        let url = request.url.clone();
        self.deps
            .http_client
            .execute(request)
            .await
            .map_err(|e| {
                CoreError::Offline(OfflineError::Network {
                    url,
                    message: e.to_string(),
                })
            })
    }

    /// Post a control message from an application context to its
    /// controller. The reply is delivered to that context's receiver and
    /// also returned here.
    pub async fn post_message(&self, id: &ClientId, data: Value) -> Result<Option<ControlReply>> {
        let worker = self
            .controller_for(id)?
            .ok_or(CoreError::Offline(OfflineError::NoController))?;
        let port = self.clients.port(id);

        Ok(worker
            .post_message(&data, port.as_deref())
            .await)
    }
}

fn runtime_error(err: core_runtime::Error) -> CoreError {
    match err {
        core_runtime::Error::CapabilityMissing {
            capability,
            message,
        } => CoreError::CapabilityMissing {
            capability,
            message,
        },
        other => CoreError::Runtime(other),
    }
}

/// Convenience bootstrapper for desktop hosts: reqwest for the network and
/// SQLite under the platform cache directory for storage.
///
/// ```no_run
/// # async fn example() -> core_service::Result<()> {
/// use core_offline::CacheConfig;
/// use core_service::bootstrap_desktop;
///
/// let core = bootstrap_desktop(CacheConfig::default()).await?;
/// let (page, _replies) = core.connect_client("http://localhost/");
/// # Ok(())
/// # }
/// ```
#[cfg(feature = "desktop-shims")]
pub async fn bootstrap_desktop(cache_config: CacheConfig) -> Result<CoreService> {
    let config = CoreConfig::builder().build().map_err(runtime_error)?;
    CoreService::bootstrap(config, cache_config).await
}
