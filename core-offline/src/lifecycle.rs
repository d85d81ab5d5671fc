//! # Lifecycle Controller
//!
//! Drives one store generation from install to activation:
//!
//! ```text
//! Unregistered ─install()─> Installing ─> Installed ─activate()─> Activating ─> Active
//!                              │
//!                              └─ store cannot be opened ─> Redundant
//! ```
//!
//! Install opens the generation's store and caches the shell set
//! best-effort; failures are reported in the [`InstallReport`] and logged,
//! never propagated. Activation claims every open client. No timers and no
//! retries live at this layer.

use crate::clients::ClientRegistry;
use crate::config::CacheConfig;
use crate::error::{OfflineError, Result};
use crate::store::{PopulateOutcome, StoreId, StoreManager};
use core_runtime::events::{CoreEvent, EventBus, LifecycleEvent};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tracing::{info, instrument, warn};

/// Controller lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleState {
    Unregistered,
    Installing,
    /// Installed and waiting to be activated.
    Installed,
    Activating,
    Active,
    /// Superseded by a newer controller, or failed to install.
    Redundant,
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LifecycleState::Unregistered => "unregistered",
            LifecycleState::Installing => "installing",
            LifecycleState::Installed => "installed",
            LifecycleState::Activating => "activating",
            LifecycleState::Active => "active",
            LifecycleState::Redundant => "redundant",
        };
        f.write_str(name)
    }
}

/// Result of a completed install.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallReport {
    pub generation: StoreId,
    pub shell: PopulateOutcome,
    /// The controller asks to replace any prior one without waiting for
    /// its clients to go away.
    pub skip_waiting: bool,
}

/// Result of a completed activation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActivationReport {
    pub generation: StoreId,
    pub claimed_clients: usize,
    /// Superseded generations deleted during activation
    pub purged: Vec<StoreId>,
}

/// Governs install and activation of one store generation.
pub struct LifecycleController {
    config: CacheConfig,
    generation: StoreId,
    stores: StoreManager,
    clients: Arc<ClientRegistry>,
    event_bus: Option<Arc<EventBus>>,
    skip_waiting: bool,
    state: Mutex<LifecycleState>,
}

impl LifecycleController {
    pub fn new(config: CacheConfig, stores: StoreManager, clients: Arc<ClientRegistry>) -> Self {
        let generation = config.store_id();
        Self {
            config,
            generation,
            stores,
            clients,
            event_bus: None,
            skip_waiting: true,
            state: Mutex::new(LifecycleState::Unregistered),
        }
    }

    /// Set event bus for lifecycle events.
    pub fn with_event_bus(mut self, event_bus: Arc<EventBus>) -> Self {
        self.event_bus = Some(event_bus);
        self
    }

    /// Whether install asks to replace a prior controller at once (default:
    /// true).
    pub fn with_skip_waiting(mut self, skip_waiting: bool) -> Self {
        self.skip_waiting = skip_waiting;
        self
    }

    pub fn generation(&self) -> &StoreId {
        &self.generation
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub fn state(&self) -> LifecycleState {
        *self.state.lock()
    }

    pub fn is_active(&self) -> bool {
        self.state() == LifecycleState::Active
    }

    fn emit(&self, event: LifecycleEvent) {
        if let Some(bus) = &self.event_bus {
            bus.emit(CoreEvent::Lifecycle(event)).ok();
        }
    }

    /// Move from `from` to `to`, or fail without changing state.
    fn transition(&self, action: &'static str, from: LifecycleState, to: LifecycleState) -> Result<()> {
        let mut state = self.state.lock();
        if *state != from {
            return Err(OfflineError::InvalidTransition {
                action,
                state: state.to_string(),
            });
        }
        *state = to;
        Ok(())
    }

    /// Open the generation's store and cache the shell set.
    ///
    /// Shell failures are logged and reported, never propagated. Only a store
    /// that cannot be opened fails install, and leaves the controller
    /// redundant.
    #[instrument(skip(self), fields(generation = %self.generation))]
    pub async fn install(&self) -> Result<InstallReport> {
        self.transition("install", LifecycleState::Unregistered, LifecycleState::Installing)?;
        info!("Install");
        self.emit(LifecycleEvent::Installing {
            generation: self.generation.to_string(),
        });

        let store = match self.stores.open(&self.generation).await {
            Ok(store) => store,
            Err(e) => {
                warn!(error = %e, "Could not open store, install failed");
                self.mark_redundant();
                return Err(e);
            }
        };

        info!(count = self.config.shell_files.len(), "Caching app shell");
        let shell = store.add_each(&self.config.shell_files).await;
        for failure in shell.failed() {
            warn!(url = %failure.url, reason = %failure.reason, "Failed to cache shell asset");
        }

        *self.state.lock() = LifecycleState::Installed;
        self.emit(LifecycleEvent::Installed {
            generation: self.generation.to_string(),
            shell_cached: shell.cached(),
            shell_failed: shell.failed().iter().map(|f| f.url.clone()).collect(),
        });

        Ok(InstallReport {
            generation: self.generation.clone(),
            shell,
            skip_waiting: self.skip_waiting,
        })
    }

    /// Take control of every open client, optionally deleting superseded
    /// generations first.
    #[instrument(skip(self), fields(generation = %self.generation))]
    pub async fn activate(&self) -> Result<ActivationReport> {
        self.transition("activate", LifecycleState::Installed, LifecycleState::Activating)?;
        info!("Activate");

        let purged = if self.config.purge_stale_generations {
            self.purge_stale_generations().await
        } else {
            Vec::new()
        };

        let claimed_clients = self.clients.claim(&self.generation);
        *self.state.lock() = LifecycleState::Active;

        if !purged.is_empty() {
            self.emit(LifecycleEvent::GenerationsPurged {
                removed: purged.iter().map(ToString::to_string).collect(),
            });
        }
        self.emit(LifecycleEvent::Activated {
            generation: self.generation.to_string(),
            claimed_clients,
        });
        info!(claimed_clients, "Controlling clients");

        Ok(ActivationReport {
            generation: self.generation.clone(),
            claimed_clients,
            purged,
        })
    }

    /// Delete every other generation of this application. Failures are
    /// logged and skipped.
    async fn purge_stale_generations(&self) -> Vec<StoreId> {
        let prefix = format!("{}-", self.config.cache_prefix);
        let generations = match self.stores.generations().await {
            Ok(generations) => generations,
            Err(e) => {
                warn!(error = %e, "Could not list cache generations");
                return Vec::new();
            }
        };

        let stale_generations: Vec<StoreId> = generations
            .into_iter()
            .filter(|id| *id != self.generation && id.as_str().starts_with(&prefix))
            .collect();

        let mut purged = Vec::new();
        for stale in stale_generations {
            match self.stores.delete(&stale).await {
                Ok(true) => {
                    info!(stale = %stale, "Deleted stale generation");
                    purged.push(stale);
                }
                Ok(false) => {}
                Err(e) => warn!(stale = %stale, error = %e, "Could not delete stale generation"),
            }
        }
        purged
    }

    /// Retire this controller. Idempotent.
    pub fn mark_redundant(&self) {
        let mut state = self.state.lock();
        if *state == LifecycleState::Redundant {
            return;
        }
        *state = LifecycleState::Redundant;
        drop(state);

        info!(generation = %self.generation, "Controller is redundant");
        self.emit(LifecycleEvent::Redundant {
            generation: self.generation.to_string(),
        });
    }
}
