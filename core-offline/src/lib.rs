//! # Offline Cache Core
//!
//! A cache-first resource layer that sits between an application and the
//! network, modeled on a page controller that is installed, activated and
//! then answers every `GET` the application makes.
//!
//! ## Overview
//!
//! - [`store`] - named store generations over a [`CacheStorage`](bridge_traits::CacheStorage)
//! - [`lifecycle`] - install (shell precache) and activation (claim clients)
//! - [`interceptor`] - cache-first answering with write-through on miss
//! - [`preload`] - the `CACHE_ASSETS` bulk preload protocol
//! - [`worker`] - one controller bundling the three, with an optional event loop
//! - [`registration`] - which controller is active and how a new one takes over
//!
//! ## Usage
//!
//! ```ignore
//! use core_offline::{CacheConfig, CacheWorker, ClientRegistry, Registration, StoreManager};
//! use std::sync::Arc;
//!
//! let config = CacheConfig::default().with_version("v2");
//! let stores = StoreManager::from_config(&config, storage, http_client, clock)?;
//! let clients = Arc::new(ClientRegistry::new());
//!
//! let registration = Registration::new(Arc::clone(&clients));
//! let worker = Arc::new(CacheWorker::new(config, stores, Arc::clone(&clients)));
//! registration.update(Arc::clone(&worker)).await?;
//!
//! let response = worker.fetch(HttpRequest::get("/index.html")).await?;
//! ```

pub mod clients;
pub mod config;
pub mod descriptor;
pub mod error;
pub mod interceptor;
pub mod lifecycle;
pub mod memory;
pub mod preload;
pub mod registration;
pub mod store;
pub mod worker;

pub use clients::{ChannelPort, ClientInfo, ClientRegistry};
pub use config::CacheConfig;
pub use descriptor::RequestDescriptor;
pub use error::{OfflineError, Result};
pub use interceptor::{FetchDisposition, FetchInterceptor, InterceptedResponse, ResponseSource};
pub use lifecycle::{ActivationReport, InstallReport, LifecycleController, LifecycleState};
pub use memory::MemoryCacheStorage;
pub use preload::AssetPreloader;
pub use registration::{Registration, UpdateReport};
pub use store::{FailedAsset, PopulateOutcome, Store, StoreId, StoreManager};
pub use worker::{CacheWorker, WorkerEvent, WorkerHandle};
