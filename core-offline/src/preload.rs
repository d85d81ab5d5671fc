//! # Bulk Preload Protocol
//!
//! Handles `CACHE_ASSETS` control messages: every listed asset is fetched
//! and committed to the active store atomically, then exactly one reply goes
//! back to the context that sent the message.
//!
//! | Outcome | Reply |
//! |---------|-------|
//! | every asset cached | `{ "type": "CACHE_COMPLETE" }` |
//! | any fetch or store failure | `{ "type": "CACHE_ERROR", "error": "..." }` |
//! | malformed `CACHE_ASSETS` body | `{ "type": "CACHE_ERROR", "error": "..." }` |
//! | any other message type | no reply |
//!
//! Replies are never broadcast. Without a source to answer, the reply is
//! dropped. Nothing is retried; a caller that wants to retry resubmits the
//! whole list.

use crate::error::Result;
use crate::store::{StoreId, StoreManager};
use bridge_traits::{ClientPort, ControlMessage, ControlReply};
use core_runtime::events::{CoreEvent, EventBus, PreloadEvent};
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, error, info, instrument, warn};

pub struct AssetPreloader {
    generation: StoreId,
    stores: StoreManager,
    event_bus: Option<Arc<EventBus>>,
}

impl AssetPreloader {
    pub fn new(generation: StoreId, stores: StoreManager) -> Self {
        Self {
            generation,
            stores,
            event_bus: None,
        }
    }

    /// Set event bus for preload events.
    pub fn with_event_bus(mut self, event_bus: Arc<EventBus>) -> Self {
        self.event_bus = Some(event_bus);
        self
    }

    fn emit(&self, event: PreloadEvent) {
        if let Some(bus) = &self.event_bus {
            bus.emit(CoreEvent::Preload(event)).ok();
        }
    }

    /// Handle a raw message payload from an application context.
    ///
    /// Returns the reply that was produced (and posted to `source`, if
    /// there is one), or `None` when the message was not for this protocol.
    pub async fn handle(&self, data: &Value, source: Option<&dyn ClientPort>) -> Option<ControlReply> {
        let reply = match ControlMessage::from_value(data) {
            Ok(Some(message)) => self.reply_to(message).await,
            Ok(None) => {
                debug!("Ignoring message of unknown type");
                return None;
            }
            Err(e) => {
                warn!(error = %e, "Rejected malformed message");
                ControlReply::CacheError {
                    error: e.to_string(),
                }
            }
        };

        self.deliver(&reply, source).await;
        Some(reply)
    }

    /// Handle an already decoded message.
    pub async fn handle_message(
        &self,
        message: ControlMessage,
        source: Option<&dyn ClientPort>,
    ) -> ControlReply {
        let reply = self.reply_to(message).await;
        self.deliver(&reply, source).await;
        reply
    }

    async fn reply_to(&self, message: ControlMessage) -> ControlReply {
        match message {
            ControlMessage::CacheAssets { urls } => match self.preload(&urls).await {
                Ok(_) => ControlReply::CacheComplete,
                Err(e) => ControlReply::CacheError {
                    error: e.to_string(),
                },
            },
        }
    }

    /// Cache every asset in `urls`, all or nothing.
    #[instrument(skip(self, urls), fields(generation = %self.generation, count = urls.len()))]
    pub async fn preload(&self, urls: &[String]) -> Result<usize> {
        info!("Caching assets");
        self.emit(PreloadEvent::Started {
            asset_count: urls.len(),
        });

        let result = match self.stores.open(&self.generation).await {
            Ok(store) => store.put_all(urls).await,
            Err(e) => Err(e),
        };

        match &result {
            Ok(count) => {
                info!(count, "All assets cached");
                self.emit(PreloadEvent::Completed {
                    asset_count: *count,
                });
            }
            Err(e) => {
                error!(error = %e, "Failed to cache assets");
                self.emit(PreloadEvent::Failed {
                    message: e.to_string(),
                });
            }
        }
        result
    }

    async fn deliver(&self, reply: &ControlReply, source: Option<&dyn ClientPort>) {
        let Some(port) = source else {
            debug!("No source to reply to, dropping reply");
            return;
        };

        if let Err(e) = port.post_message(reply.clone()).await {
            warn!(error = %e, "Could not deliver reply");
        }
    }
}
