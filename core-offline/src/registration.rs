//! Registration: which worker controls the scope, and how a new one takes
//! over from the old one.
//!
//! A worker that asks to skip waiting replaces the active worker as soon as
//! it is installed. Any other worker waits until no client is controlled by
//! the active one, which [`Registration::handoff`] checks.

use crate::clients::ClientRegistry;
use crate::error::Result;
use crate::lifecycle::{ActivationReport, InstallReport};
use crate::store::StoreId;
use crate::worker::CacheWorker;
use parking_lot::RwLock;
use std::sync::Arc;
use tokio::sync::Mutex as AsyncMutex;
use tracing::{info, instrument};

/// Outcome of [`Registration::update`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateReport {
    pub install: InstallReport,
    /// Present when the worker was activated right away.
    pub activation: Option<ActivationReport>,
}

#[derive(Default)]
struct Slots {
    active: Option<Arc<CacheWorker>>,
    /// Promoted but still activating; becomes `active` once its claim is done
    activating: Option<Arc<CacheWorker>>,
    waiting: Option<Arc<CacheWorker>>,
}

pub struct Registration {
    clients: Arc<ClientRegistry>,
    slots: RwLock<Slots>,
    update_lock: AsyncMutex<()>,
}

impl Registration {
    pub fn new(clients: Arc<ClientRegistry>) -> Self {
        Self {
            clients,
            slots: RwLock::new(Slots::default()),
            update_lock: AsyncMutex::new(()),
        }
    }

    pub fn clients(&self) -> &Arc<ClientRegistry> {
        &self.clients
    }

    /// The worker currently controlling the scope.
    pub fn active(&self) -> Option<Arc<CacheWorker>> {
        self.slots.read().active.clone()
    }

    /// An installed worker waiting for the active one to be released.
    pub fn waiting(&self) -> Option<Arc<CacheWorker>> {
        self.slots.read().waiting.clone()
    }

    /// The worker serving clients controlled by `generation`.
    ///
    /// While a new worker activates, clients it has not claimed yet keep
    /// being served by the previous one, and clients it already claimed are
    /// served by the new one.
    pub fn controller(&self, generation: &StoreId) -> Option<Arc<CacheWorker>> {
        let slots = self.slots.read();
        slots
            .active
            .iter()
            .chain(slots.activating.iter())
            .find(|worker| worker.generation() == generation)
            .cloned()
    }

    /// Install `worker` and, if it asks to skip waiting or nothing is active
    /// yet, activate it in place of the current worker.
    ///
    /// If install fails the worker is discarded and the active worker stays
    /// in control.
    #[instrument(skip(self, worker), fields(generation = %worker.generation()))]
    pub async fn update(&self, worker: Arc<CacheWorker>) -> Result<UpdateReport> {
        let _serialized = self.update_lock.lock().await;

        let install = worker.lifecycle().install().await?;

        let promote_now = install.skip_waiting || self.active().is_none();
        if !promote_now {
            info!("Installed, waiting for clients of the active worker to close");
            let previous = self.slots.write().waiting.replace(worker);
            if let Some(previous) = previous {
                previous.lifecycle().mark_redundant();
            }
            return Ok(UpdateReport {
                install,
                activation: None,
            });
        }

        let activation = self.promote(worker).await?;
        Ok(UpdateReport {
            install,
            activation: Some(activation),
        })
    }

    /// Activate the waiting worker if the active one no longer controls any
    /// client. Returns `None` if nothing changed.
    pub async fn handoff(&self) -> Result<Option<ActivationReport>> {
        let _serialized = self.update_lock.lock().await;

        let waiting = {
            let slots = self.slots.read();
            let Some(waiting) = slots.waiting.clone() else {
                return Ok(None);
            };
            let still_in_use = slots
                .active
                .as_ref()
                .map(|active| self.clients.controlled_by(active.generation()) > 0)
                .unwrap_or(false);
            if still_in_use {
                return Ok(None);
            }
            waiting
        };

        self.promote(waiting).await.map(Some)
    }

    async fn promote(&self, worker: Arc<CacheWorker>) -> Result<ActivationReport> {
        self.slots.write().activating = Some(Arc::clone(&worker));

        let activation = match worker.lifecycle().activate().await {
            Ok(activation) => activation,
            Err(e) => {
                self.slots.write().activating = None;
                return Err(e);
            }
        };

        let (previous, superseded_waiting) = {
            let mut slots = self.slots.write();
            slots.activating = None;
            let waiting = slots.waiting.take();
            (slots.active.replace(Arc::clone(&worker)), waiting)
        };

        for retired in previous.into_iter().chain(superseded_waiting) {
            if !Arc::ptr_eq(&retired, &worker) {
                retired.lifecycle().mark_redundant();
            }
        }

        Ok(activation)
    }
}
